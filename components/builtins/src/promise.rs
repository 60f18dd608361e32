//! The Promise namespace and promise intrinsic methods.

use crate::arg;
use core_types::{HostContext, NativeError, PromiseObj, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// `Promise.resolve` — promises pass through, everything else wraps.
pub fn resolve(
    host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let value = arg(args, 0);
    if matches!(value, Value::Promise(_)) {
        return Ok(value);
    }
    let promise = Value::Promise(Rc::new(RefCell::new(PromiseObj::new())));
    host.resolve_promise(&promise, value);
    Ok(promise)
}

/// `Promise.reject`
pub fn reject(
    host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let promise = Value::Promise(Rc::new(RefCell::new(PromiseObj::new())));
    host.reject_promise(&promise, arg(args, 0));
    Ok(promise)
}

/// `then` intrinsic.
pub fn then(
    host: &mut dyn HostContext,
    this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    Ok(host.promise_then(&this, arg(args, 0), arg(args, 1)))
}

/// `catch` intrinsic: `then(undefined, onRejected)`.
pub fn catch(
    host: &mut dyn HostContext,
    this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    Ok(host.promise_then(&this, Value::Undefined, arg(args, 0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_host::TestHost;
    use core_types::PromiseState;

    #[test]
    fn test_resolve_wraps_plain_value() {
        let mut host = TestHost::new();
        let p = resolve(&mut host, Value::Undefined, &[Value::Int(1)]).unwrap();
        let Value::Promise(p) = p else { panic!() };
        assert_eq!(p.borrow().state, PromiseState::Fulfilled);
        assert_eq!(p.borrow().value, Value::Int(1));
    }

    #[test]
    fn test_resolve_passes_promises_through() {
        let mut host = TestHost::new();
        let existing = Value::Promise(Rc::new(RefCell::new(PromiseObj::new())));
        let out = resolve(&mut host, Value::Undefined, &[existing.clone()]).unwrap();
        assert!(out.strict_equals(&existing));
    }
}
