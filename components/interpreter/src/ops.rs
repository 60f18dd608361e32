//! ECMAScript operator semantics.
//!
//! Free functions over values: coercion, NaN propagation, string
//! concatenation on `+`, 32-bit wrapping for the bitwise group, and BigInt
//! arithmetic for matched BigInt operands. Mixing BigInt with numbers is a
//! `TypeError`, as the standard requires.
//!
//! Errors are returned as thrown values for the VM's unwinder.

use builtins::make_error;
use core_types::Value;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use std::rc::Rc;

type OpResult = Result<Value, Value>;

fn type_error(message: &str) -> Value {
    make_error("TypeError", message)
}

fn range_error(message: &str) -> Value {
    make_error("RangeError", message)
}

/// ECMAScript ToInt32.
pub fn to_int32(n: f64) -> i32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let m = n.trunc() % 4_294_967_296.0;
    let m = if m < 0.0 { m + 4_294_967_296.0 } else { m };
    m as u32 as i32
}

/// ECMAScript ToUint32.
pub fn to_uint32(n: f64) -> u32 {
    to_int32(n) as u32
}

fn is_bigint(v: &Value) -> bool {
    matches!(v, Value::BigInt(_))
}

fn bigint_pair<'a>(a: &'a Value, b: &'a Value) -> Option<(&'a BigInt, &'a BigInt)> {
    match (a, b) {
        (Value::BigInt(x), Value::BigInt(y)) => Some((x, y)),
        _ => None,
    }
}

fn mixed_bigint(a: &Value, b: &Value) -> bool {
    is_bigint(a) != is_bigint(b)
}

/// `+`: concatenation when either side is a string, BigInt addition for
/// BigInt pairs, numeric addition otherwise.
pub fn add(a: &Value, b: &Value) -> OpResult {
    if matches!(a, Value::String(_)) || matches!(b, Value::String(_)) {
        let joined = format!("{}{}", a, b);
        return Ok(Value::String(Rc::from(joined.as_str())));
    }
    if let Some((x, y)) = bigint_pair(a, b) {
        return Ok(Value::BigInt(Rc::new(x + y)));
    }
    if mixed_bigint(a, b) {
        return Err(type_error("cannot mix BigInt and other types in addition"));
    }
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        if let Some(sum) = x.checked_add(*y) {
            return Ok(Value::Int(sum));
        }
    }
    Ok(Value::from_f64(a.to_number() + b.to_number()))
}

macro_rules! numeric_op {
    ($fn_name:ident, $op:tt, $int_checked:ident, $what:literal) => {
        /// Numeric operator with the Int fast path.
        pub fn $fn_name(a: &Value, b: &Value) -> OpResult {
            if let Some((x, y)) = bigint_pair(a, b) {
                return Ok(Value::BigInt(Rc::new(x $op y)));
            }
            if mixed_bigint(a, b) {
                return Err(type_error(concat!(
                    "cannot mix BigInt and other types in ",
                    $what
                )));
            }
            if let (Value::Int(x), Value::Int(y)) = (a, b) {
                if let Some(out) = x.$int_checked(*y) {
                    return Ok(Value::Int(out));
                }
            }
            Ok(Value::from_f64(a.to_number() $op b.to_number()))
        }
    };
}

numeric_op!(sub, -, checked_sub, "subtraction");
numeric_op!(mul, *, checked_mul, "multiplication");

/// `/` — always floating point; BigInt pairs truncate, division by zero
/// throws.
pub fn div(a: &Value, b: &Value) -> OpResult {
    if let Some((x, y)) = bigint_pair(a, b) {
        if y.is_zero() {
            return Err(range_error("division by zero"));
        }
        return Ok(Value::BigInt(Rc::new(x / y)));
    }
    if mixed_bigint(a, b) {
        return Err(type_error("cannot mix BigInt and other types in division"));
    }
    Ok(Value::from_f64(a.to_number() / b.to_number()))
}

/// `%`
pub fn rem(a: &Value, b: &Value) -> OpResult {
    if let Some((x, y)) = bigint_pair(a, b) {
        if y.is_zero() {
            return Err(range_error("division by zero"));
        }
        return Ok(Value::BigInt(Rc::new(x % y)));
    }
    if mixed_bigint(a, b) {
        return Err(type_error("cannot mix BigInt and other types in remainder"));
    }
    Ok(Value::from_f64(a.to_number() % b.to_number()))
}

/// `**`
pub fn pow(a: &Value, b: &Value) -> OpResult {
    if let Some((x, y)) = bigint_pair(a, b) {
        if y.is_negative() {
            return Err(range_error("BigInt exponent must not be negative"));
        }
        let exp = y
            .to_u32()
            .ok_or_else(|| range_error("BigInt exponent too large"))?;
        return Ok(Value::BigInt(Rc::new(x.pow(exp))));
    }
    if mixed_bigint(a, b) {
        return Err(type_error(
            "cannot mix BigInt and other types in exponentiation",
        ));
    }
    Ok(Value::from_f64(a.to_number().powf(b.to_number())))
}

macro_rules! bitwise_op {
    ($fn_name:ident, $op:tt) => {
        /// 32-bit bitwise operator.
        pub fn $fn_name(a: &Value, b: &Value) -> OpResult {
            if is_bigint(a) || is_bigint(b) {
                return Err(type_error("BigInt bitwise operations are not supported"));
            }
            Ok(Value::Int(
                to_int32(a.to_number()) $op to_int32(b.to_number()),
            ))
        }
    };
}

bitwise_op!(bit_and, &);
bitwise_op!(bit_or, |);
bitwise_op!(bit_xor, ^);

/// `<<`
pub fn shl(a: &Value, b: &Value) -> OpResult {
    if is_bigint(a) || is_bigint(b) {
        return Err(type_error("BigInt shifts are not supported"));
    }
    Ok(Value::Int(
        to_int32(a.to_number()).wrapping_shl(to_uint32(b.to_number()) & 31),
    ))
}

/// `>>`
pub fn shr(a: &Value, b: &Value) -> OpResult {
    if is_bigint(a) || is_bigint(b) {
        return Err(type_error("BigInt shifts are not supported"));
    }
    Ok(Value::Int(
        to_int32(a.to_number()).wrapping_shr(to_uint32(b.to_number()) & 31),
    ))
}

/// `>>>`
pub fn ushr(a: &Value, b: &Value) -> OpResult {
    if is_bigint(a) || is_bigint(b) {
        return Err(type_error("BigInt shifts are not supported"));
    }
    let out = to_uint32(a.to_number()).wrapping_shr(to_uint32(b.to_number()) & 31);
    Ok(Value::from_f64(out as f64))
}

/// Unary `-`.
pub fn neg(v: &Value) -> OpResult {
    if let Value::BigInt(n) = v {
        return Ok(Value::BigInt(Rc::new(-&**n)));
    }
    match v {
        // -0 must become a double so its sign survives.
        Value::Int(0) => Ok(Value::Number(-0.0)),
        Value::Int(n) if *n != i32::MIN => Ok(Value::Int(-n)),
        other => Ok(Value::from_f64(-other.to_number())),
    }
}

/// Unary `~`.
pub fn bit_not(v: &Value) -> OpResult {
    if is_bigint(v) {
        return Err(type_error("BigInt bitwise operations are not supported"));
    }
    Ok(Value::Int(!to_int32(v.to_number())))
}

/// Relational comparison kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Relational operators: strings compare lexicographically, BigInt pairs
/// exactly, everything else numerically with NaN yielding false.
pub fn compare(op: Compare, a: &Value, b: &Value) -> OpResult {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        let ord = x.cmp(y);
        return Ok(Value::Boolean(match op {
            Compare::Lt => ord.is_lt(),
            Compare::Le => ord.is_le(),
            Compare::Gt => ord.is_gt(),
            Compare::Ge => ord.is_ge(),
        }));
    }
    if let Some((x, y)) = bigint_pair(a, b) {
        let ord = x.cmp(y);
        return Ok(Value::Boolean(match op {
            Compare::Lt => ord.is_lt(),
            Compare::Le => ord.is_le(),
            Compare::Gt => ord.is_gt(),
            Compare::Ge => ord.is_ge(),
        }));
    }
    let (x, y) = (a.to_number(), b.to_number());
    if x.is_nan() || y.is_nan() {
        return Ok(Value::Boolean(false));
    }
    Ok(Value::Boolean(match op {
        Compare::Lt => x < y,
        Compare::Le => x <= y,
        Compare::Gt => x > y,
        Compare::Ge => x >= y,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_numbers_and_strings() {
        assert_eq!(add(&Value::Int(1), &Value::Int(2)).unwrap(), Value::Int(3));
        assert_eq!(
            add(&Value::String(Rc::from("a")), &Value::Int(1)).unwrap(),
            Value::String(Rc::from("a1"))
        );
        assert_eq!(
            add(&Value::Int(1), &Value::String(Rc::from("a"))).unwrap(),
            Value::String(Rc::from("1a"))
        );
    }

    #[test]
    fn test_add_int_overflow_promotes() {
        let result = add(&Value::Int(i32::MAX), &Value::Int(1)).unwrap();
        assert_eq!(result, Value::Number(i32::MAX as f64 + 1.0));
    }

    #[test]
    fn test_nan_propagation() {
        let result = mul(&Value::Number(f64::NAN), &Value::Int(2)).unwrap();
        assert!(matches!(result, Value::Number(n) if n.is_nan()));
        assert_eq!(
            compare(Compare::Lt, &Value::Number(f64::NAN), &Value::Int(1)).unwrap(),
            Value::Boolean(false)
        );
    }

    #[test]
    fn test_division_is_floating() {
        assert_eq!(
            div(&Value::Int(1), &Value::Int(2)).unwrap(),
            Value::Number(0.5)
        );
        assert_eq!(
            div(&Value::Int(4), &Value::Int(2)).unwrap(),
            Value::Int(2)
        );
    }

    #[test]
    fn test_to_int32_wrapping() {
        assert_eq!(to_int32(4_294_967_296.0), 0);
        assert_eq!(to_int32(4_294_967_297.0), 1);
        assert_eq!(to_int32(-1.0), -1);
        assert_eq!(to_int32(2_147_483_648.0), i32::MIN);
        assert_eq!(to_int32(f64::NAN), 0);
    }

    #[test]
    fn test_shifts() {
        assert_eq!(
            shl(&Value::Int(1), &Value::Int(3)).unwrap(),
            Value::Int(8)
        );
        assert_eq!(
            ushr(&Value::Int(-1), &Value::Int(0)).unwrap(),
            Value::Number(4_294_967_295.0)
        );
    }

    #[test]
    fn test_bigint_arithmetic() {
        let a = Value::BigInt(Rc::new(BigInt::from(10)));
        let b = Value::BigInt(Rc::new(BigInt::from(3)));
        assert_eq!(
            add(&a, &b).unwrap(),
            Value::BigInt(Rc::new(BigInt::from(13)))
        );
        assert_eq!(
            div(&a, &b).unwrap(),
            Value::BigInt(Rc::new(BigInt::from(3)))
        );
        assert!(add(&a, &Value::Int(1)).is_err());
    }

    #[test]
    fn test_string_comparison() {
        assert_eq!(
            compare(
                Compare::Lt,
                &Value::String(Rc::from("a")),
                &Value::String(Rc::from("b"))
            )
            .unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_neg_zero() {
        let result = neg(&Value::Int(0)).unwrap();
        assert!(matches!(result, Value::Number(n) if n == 0.0 && n.is_sign_negative()));
    }
}
