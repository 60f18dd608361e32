//! The `process` builtin: argv, env, cwd, exit.
//!
//! Compatible with common Node.js script usage. `exit` does not terminate
//! the host process directly; it unwinds through the VM so the driver can
//! flush and return the code.

use crate::num_arg;
use core_types::{DictObject, HostContext, JsArray, NativeError, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Builds the `process.argv` array from the host arguments.
pub fn build_argv(host: &mut dyn HostContext, args: &[String]) -> Value {
    let elements = args
        .iter()
        .map(|a| Value::String(host.strings().intern(a)))
        .collect();
    Value::Array(Rc::new(RefCell::new(JsArray::from_elements(elements))))
}

/// Builds the `process.env` object from the host environment.
pub fn build_env(host: &mut dyn HostContext) -> Value {
    let mut dict = DictObject::new();
    for (key, value) in std::env::vars() {
        let key = host.strings().intern(&key);
        let value = Value::String(host.strings().intern(&value));
        dict.set(key, value);
    }
    Value::Dict(Rc::new(RefCell::new(dict)))
}

/// `process.cwd()`
pub fn cwd(
    host: &mut dyn HostContext,
    _this: Value,
    _args: &[Value],
) -> Result<Value, NativeError> {
    let dir = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    Ok(Value::String(host.strings().intern_owned(dir)))
}

/// `process.exit(code)`
pub fn exit(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let code = if args.is_empty() { 0.0 } else { num_arg(args, 0) };
    Err(NativeError::Exit(code as i32))
}
