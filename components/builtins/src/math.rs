//! The Math namespace.

use crate::num_arg;
use core_types::{HostContext, NativeError, Value};

macro_rules! unary_math {
    ($fn_name:ident, $method:ident) => {
        /// Unary Math function.
        pub fn $fn_name(
            _host: &mut dyn HostContext,
            _this: Value,
            args: &[Value],
        ) -> Result<Value, NativeError> {
            Ok(Value::from_f64(num_arg(args, 0).$method()))
        }
    };
}

unary_math!(floor, floor);
unary_math!(ceil, ceil);
unary_math!(abs, abs);
unary_math!(sqrt, sqrt);
unary_math!(trunc, trunc);

/// `Math.round` — JavaScript rounds half toward positive infinity.
pub fn round(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let n = num_arg(args, 0);
    Ok(Value::from_f64((n + 0.5).floor()))
}

/// `Math.pow`
pub fn pow(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    Ok(Value::from_f64(num_arg(args, 0).powf(num_arg(args, 1))))
}

/// `Math.max` — `-Infinity` with no arguments, `NaN` wins.
pub fn max(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let mut best = f64::NEG_INFINITY;
    for v in args {
        let n = v.to_number();
        if n.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        if n > best {
            best = n;
        }
    }
    Ok(Value::from_f64(best))
}

/// `Math.min`
pub fn min(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let mut best = f64::INFINITY;
    for v in args {
        let n = v.to_number();
        if n.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        if n < best {
            best = n;
        }
    }
    Ok(Value::from_f64(best))
}

/// `Math.random` — xorshift seeded from the system clock; good enough for
/// scripts, not for cryptography.
pub fn random(
    _host: &mut dyn HostContext,
    _this: Value,
    _args: &[Value],
) -> Result<Value, NativeError> {
    use std::cell::Cell;
    use std::time::{SystemTime, UNIX_EPOCH};
    thread_local! {
        static STATE: Cell<u64> = Cell::new(0);
    }
    let next = STATE.with(|state| {
        let mut x = state.get();
        if x == 0 {
            x = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0x9E3779B97F4A7C15)
                | 1;
        }
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        state.set(x);
        x
    });
    Ok(Value::Number((next >> 11) as f64 / (1u64 << 53) as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_host::TestHost;

    fn host() -> TestHost {
        TestHost::new()
    }

    #[test]
    fn test_floor_and_ceil() {
        let mut h = host();
        assert_eq!(
            floor(&mut h, Value::Undefined, &[Value::Number(2.7)]).unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            ceil(&mut h, Value::Undefined, &[Value::Number(2.1)]).unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    fn test_max_with_nan() {
        let mut h = host();
        let result = max(
            &mut h,
            Value::Undefined,
            &[Value::Int(1), Value::Number(f64::NAN)],
        )
        .unwrap();
        assert!(matches!(result, Value::Number(n) if n.is_nan()));
    }

    #[test]
    fn test_max_empty() {
        let mut h = host();
        let result = max(&mut h, Value::Undefined, &[]).unwrap();
        assert_eq!(result, Value::Number(f64::NEG_INFINITY));
    }
}
