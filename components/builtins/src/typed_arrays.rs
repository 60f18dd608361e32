//! Typed-array and ArrayBuffer constructors.

use crate::errors::throw;
use crate::{arg, length_arg};
use core_types::{ArrayBufferObj, HostContext, NativeError, TypedArrayKind, TypedArrayObj, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// `ArrayBuffer(byteLength)`
pub fn array_buffer_new(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let len = length_arg(args, 0)?;
    Ok(Value::ArrayBuffer(Rc::new(RefCell::new(
        ArrayBufferObj::new(len),
    ))))
}

fn typed_array_new(kind: TypedArrayKind, args: &[Value]) -> Result<Value, NativeError> {
    match arg(args, 0) {
        // Over an existing buffer: (buffer, byteOffset?, length?)
        Value::ArrayBuffer(buffer) => {
            let byte_offset = match arg(args, 1) {
                Value::Undefined => 0,
                other => other.to_number() as usize,
            };
            let length = match arg(args, 2) {
                Value::Undefined => {
                    let available = buffer.borrow().byte_length().saturating_sub(byte_offset);
                    available / kind.element_size()
                }
                other => other.to_number() as usize,
            };
            let view = TypedArrayObj::over(buffer, kind, byte_offset, length)
                .ok_or_else(|| throw("RangeError", "typed array view exceeds buffer length"))?;
            Ok(Value::TypedArray(Rc::new(RefCell::new(view))))
        }
        // Fresh storage: (length) or ()
        Value::Undefined => Ok(Value::TypedArray(Rc::new(RefCell::new(
            TypedArrayObj::new(kind, 0),
        )))),
        _ => {
            let length = length_arg(args, 0)?;
            Ok(Value::TypedArray(Rc::new(RefCell::new(
                TypedArrayObj::new(kind, length),
            ))))
        }
    }
}

/// `Int8Array(…)`
pub fn int8_array_new(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    typed_array_new(TypedArrayKind::Int8, args)
}

/// `Uint8Array(…)`
pub fn uint8_array_new(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    typed_array_new(TypedArrayKind::Uint8, args)
}

/// `Int32Array(…)`
pub fn int32_array_new(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    typed_array_new(TypedArrayKind::Int32, args)
}

/// `Float64Array(…)`
pub fn float64_array_new(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    typed_array_new(TypedArrayKind::Float64, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_host::TestHost;

    #[test]
    fn test_fresh_typed_array() {
        let mut host = TestHost::new();
        let ta = int32_array_new(&mut host, Value::Undefined, &[Value::Int(4)]).unwrap();
        let Value::TypedArray(ta) = ta else { panic!() };
        assert_eq!(ta.borrow().length, 4);
    }

    #[test]
    fn test_view_over_shared_buffer() {
        let mut host = TestHost::new();
        let buffer = array_buffer_new(&mut host, Value::Undefined, &[Value::Int(8)]).unwrap();
        let view =
            uint8_array_new(&mut host, Value::Undefined, &[buffer.clone(), Value::Int(4)]).unwrap();
        let Value::TypedArray(view) = view else { panic!() };
        assert_eq!(view.borrow().length, 4);
        assert_eq!(view.borrow().byte_offset, 4);
    }

    #[test]
    fn test_oversized_view_rejected() {
        let mut host = TestHost::new();
        let buffer = array_buffer_new(&mut host, Value::Undefined, &[Value::Int(4)]).unwrap();
        assert!(float64_array_new(
            &mut host,
            Value::Undefined,
            &[buffer, Value::Int(0), Value::Int(2)]
        )
        .is_err());
    }
}
