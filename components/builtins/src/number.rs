//! The Number namespace and global numeric functions.

use crate::errors::throw;
use crate::{arg, num_arg, str_arg};
use core_types::{HostContext, NativeError, Value};

/// `Number(x)` conversion.
pub fn number_new(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    if args.is_empty() {
        return Ok(Value::Int(0));
    }
    Ok(Value::from_f64(num_arg(args, 0)))
}

/// `Boolean(x)` conversion.
pub fn boolean_new(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    Ok(Value::Boolean(arg(args, 0).is_truthy()))
}

/// `isNaN` — coercing, like the global.
pub fn is_nan(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    Ok(Value::Boolean(num_arg(args, 0).is_nan()))
}

/// `isFinite`
pub fn is_finite(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    Ok(Value::Boolean(num_arg(args, 0).is_finite()))
}

/// `Number.isInteger` — non-coercing.
pub fn is_integer(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    Ok(Value::Boolean(match arg(args, 0) {
        Value::Int(_) => true,
        Value::Number(n) => n.is_finite() && n.fract() == 0.0,
        _ => false,
    }))
}

/// `parseInt`
pub fn parse_int(
    host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let text = str_arg(host, args, 0);
    let text = text.trim();
    let radix = match arg(args, 1) {
        Value::Undefined => 10,
        other => {
            let r = other.to_number();
            if r == 0.0 {
                10
            } else if !(2.0..=36.0).contains(&r) {
                return Ok(Value::Number(f64::NAN));
            } else {
                r as u32
            }
        }
    };

    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let digits = if radix == 16 {
        digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits)
    } else {
        digits
    };

    // Longest valid prefix.
    let mut value = 0f64;
    let mut seen = false;
    for c in digits.chars() {
        match c.to_digit(radix) {
            Some(d) => {
                value = value * radix as f64 + d as f64;
                seen = true;
            }
            None => break,
        }
    }
    if !seen {
        return Ok(Value::Number(f64::NAN));
    }
    Ok(Value::from_f64(if negative { -value } else { value }))
}

/// `parseFloat`
pub fn parse_float(
    host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let text = str_arg(host, args, 0);
    let text = text.trim();
    // Longest prefix that parses as a float.
    let mut end = 0;
    for i in (1..=text.len()).rev() {
        if text.is_char_boundary(i) && text[..i].parse::<f64>().is_ok() {
            end = i;
            break;
        }
    }
    if end == 0 {
        return Ok(Value::Number(f64::NAN));
    }
    Ok(Value::from_f64(text[..end].parse::<f64>().unwrap_or(f64::NAN)))
}

/// `toFixed` intrinsic.
pub fn to_fixed(
    host: &mut dyn HostContext,
    this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let n = this
        .as_number()
        .ok_or_else(|| throw("TypeError", "receiver is not a number"))?;
    let digits = num_arg(args, 0);
    if !(0.0..=100.0).contains(&digits) {
        return Err(throw("RangeError", "toFixed() digits out of range"));
    }
    Ok(Value::String(
        host.strings()
            .intern_owned(format!("{:.*}", digits as usize, n)),
    ))
}

/// `toString` intrinsic for numbers.
pub fn number_to_string(
    host: &mut dyn HostContext,
    this: Value,
    _args: &[Value],
) -> Result<Value, NativeError> {
    let text = this.to_string();
    Ok(Value::String(host.strings().intern_owned(text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_host::TestHost;
    use std::rc::Rc;

    fn s(text: &str) -> Value {
        Value::String(Rc::from(text))
    }

    #[test]
    fn test_parse_int_prefix() {
        let mut host = TestHost::new();
        assert_eq!(
            parse_int(&mut host, Value::Undefined, &[s("42px")]).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            parse_int(&mut host, Value::Undefined, &[s("0xff"), Value::Int(16)]).unwrap(),
            Value::Int(255)
        );
        assert!(matches!(
            parse_int(&mut host, Value::Undefined, &[s("zzz")]).unwrap(),
            Value::Number(n) if n.is_nan()
        ));
    }

    #[test]
    fn test_parse_float_prefix() {
        let mut host = TestHost::new();
        assert_eq!(
            parse_float(&mut host, Value::Undefined, &[s("2.5rem")]).unwrap(),
            Value::Number(2.5)
        );
    }

    #[test]
    fn test_to_fixed() {
        let mut host = TestHost::new();
        assert_eq!(
            to_fixed(&mut host, Value::Number(1.005), &[Value::Int(1)]).unwrap(),
            s("1.0")
        );
    }

    #[test]
    fn test_is_integer_non_coercing() {
        let mut host = TestHost::new();
        assert_eq!(
            is_integer(&mut host, Value::Undefined, &[s("3")]).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(
            is_integer(&mut host, Value::Undefined, &[Value::Int(3)]).unwrap(),
            Value::Boolean(true)
        );
    }
}
