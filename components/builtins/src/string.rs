//! The String namespace and string intrinsic methods.

use crate::errors::throw;
use crate::{arg, num_arg, str_arg};
use core_types::{HostContext, JsArray, JsStr, NativeError, Value};
use std::cell::RefCell;
use std::rc::Rc;

fn this_string(this: &Value) -> Result<JsStr, NativeError> {
    match this {
        Value::String(s) => Ok(s.clone()),
        _ => Err(throw("TypeError", "receiver is not a string")),
    }
}

/// `String(x)` conversion.
pub fn string_new(
    host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let text = match arg(args, 0) {
        Value::Undefined if args.is_empty() => String::new(),
        other => other.to_string(),
    };
    Ok(Value::String(host.strings().intern_owned(text)))
}

/// `String.fromCharCode`
pub fn from_char_code(
    host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let text: String = args
        .iter()
        .map(|v| char::from_u32(v.to_number() as u32).unwrap_or('\u{FFFD}'))
        .collect();
    Ok(Value::String(host.strings().intern_owned(text)))
}

/// `charAt`
pub fn char_at(
    host: &mut dyn HostContext,
    this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let s = this_string(&this)?;
    let index = num_arg(args, 0);
    let out = if index < 0.0 {
        String::new()
    } else {
        s.chars()
            .nth(index as usize)
            .map(|c| c.to_string())
            .unwrap_or_default()
    };
    Ok(Value::String(host.strings().intern_owned(out)))
}

/// `charCodeAt`
pub fn char_code_at(
    _host: &mut dyn HostContext,
    this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let s = this_string(&this)?;
    let index = num_arg(args, 0);
    if index < 0.0 {
        return Ok(Value::Number(f64::NAN));
    }
    Ok(match s.chars().nth(index as usize) {
        Some(c) => Value::Int(c as i32),
        None => Value::Number(f64::NAN),
    })
}

/// `indexOf`
pub fn index_of(
    host: &mut dyn HostContext,
    this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let s = this_string(&this)?;
    let needle = str_arg(host, args, 0);
    Ok(match s.find(&needle) {
        Some(byte) => Value::from_f64(s[..byte].chars().count() as f64),
        None => Value::Int(-1),
    })
}

/// `includes`
pub fn includes(
    host: &mut dyn HostContext,
    this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let s = this_string(&this)?;
    let needle = str_arg(host, args, 0);
    Ok(Value::Boolean(s.contains(&needle)))
}

/// `startsWith`
pub fn starts_with(
    host: &mut dyn HostContext,
    this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let s = this_string(&this)?;
    let needle = str_arg(host, args, 0);
    Ok(Value::Boolean(s.starts_with(&needle)))
}

/// `endsWith`
pub fn ends_with(
    host: &mut dyn HostContext,
    this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let s = this_string(&this)?;
    let needle = str_arg(host, args, 0);
    Ok(Value::Boolean(s.ends_with(&needle)))
}

fn char_range(s: &str, start: &Value, end: &Value) -> (usize, usize) {
    let len = s.chars().count();
    let resolve = |v: &Value, default: f64| -> usize {
        let n = match v {
            Value::Undefined => default,
            other => other.to_number(),
        };
        let n = if n < 0.0 { len as f64 + n } else { n };
        n.clamp(0.0, len as f64) as usize
    };
    let from = resolve(start, 0.0);
    let to = resolve(end, len as f64);
    (from, to.max(from))
}

/// `slice`
pub fn slice(
    host: &mut dyn HostContext,
    this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let s = this_string(&this)?;
    let (from, to) = char_range(&s, &arg(args, 0), &arg(args, 1));
    let out: String = s.chars().skip(from).take(to - from).collect();
    Ok(Value::String(host.strings().intern_owned(out)))
}

/// `toUpperCase`
pub fn to_upper_case(
    host: &mut dyn HostContext,
    this: Value,
    _args: &[Value],
) -> Result<Value, NativeError> {
    let s = this_string(&this)?;
    Ok(Value::String(host.strings().intern_owned(s.to_uppercase())))
}

/// `toLowerCase`
pub fn to_lower_case(
    host: &mut dyn HostContext,
    this: Value,
    _args: &[Value],
) -> Result<Value, NativeError> {
    let s = this_string(&this)?;
    Ok(Value::String(host.strings().intern_owned(s.to_lowercase())))
}

/// `trim`
pub fn trim(
    host: &mut dyn HostContext,
    this: Value,
    _args: &[Value],
) -> Result<Value, NativeError> {
    let s = this_string(&this)?;
    Ok(Value::String(host.strings().intern(s.trim())))
}

/// `split`
pub fn split(
    host: &mut dyn HostContext,
    this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let s = this_string(&this)?;
    let parts: Vec<Value> = match arg(args, 0) {
        Value::Undefined => vec![Value::String(s)],
        separator => {
            let separator = separator.to_string();
            if separator.is_empty() {
                s.chars()
                    .map(|c| Value::String(host.strings().intern_owned(c.to_string())))
                    .collect()
            } else {
                s.split(separator.as_str())
                    .map(|part| Value::String(host.strings().intern(part)))
                    .collect()
            }
        }
    };
    Ok(Value::Array(Rc::new(RefCell::new(JsArray::from_elements(
        parts,
    )))))
}

/// `repeat`
pub fn repeat(
    host: &mut dyn HostContext,
    this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let s = this_string(&this)?;
    let count = num_arg(args, 0);
    if count < 0.0 || !count.is_finite() {
        return Err(throw("RangeError", "invalid repeat count"));
    }
    Ok(Value::String(
        host.strings().intern_owned(s.repeat(count as usize)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_host::TestHost;

    fn s(text: &str) -> Value {
        Value::String(Rc::from(text))
    }

    #[test]
    fn test_slice_negative() {
        let mut host = TestHost::new();
        assert_eq!(
            slice(&mut host, s("hello"), &[Value::Int(-3)]).unwrap(),
            s("llo")
        );
    }

    #[test]
    fn test_split_empty_separator() {
        let mut host = TestHost::new();
        let parts = split(&mut host, s("ab"), &[s("")]).unwrap();
        let Value::Array(a) = parts else { panic!() };
        assert_eq!(a.borrow().elements, vec![s("a"), s("b")]);
    }

    #[test]
    fn test_index_of_char_units() {
        let mut host = TestHost::new();
        assert_eq!(
            index_of(&mut host, s("abc"), &[s("c")]).unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            index_of(&mut host, s("abc"), &[s("z")]).unwrap(),
            Value::Int(-1)
        );
    }

    #[test]
    fn test_char_at_out_of_range() {
        let mut host = TestHost::new();
        assert_eq!(char_at(&mut host, s("a"), &[Value::Int(5)]).unwrap(), s(""));
    }
}
