//! Error constructors and the error values natives throw.

use crate::{arg, str_arg};
use core_types::{DictObject, HostContext, NativeError, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Builds a JavaScript error value with `name` and `message` properties.
///
/// Error objects are dictionary objects: they are created on cold paths and
/// never benefit from shapes.
pub fn make_error(kind: &str, message: &str) -> Value {
    let mut dict = DictObject::new();
    dict.set(Rc::from("name"), Value::String(Rc::from(kind)));
    dict.set(Rc::from("message"), Value::String(Rc::from(message)));
    Value::Dict(Rc::new(RefCell::new(dict)))
}

/// Shorthand for throwing an error value from a native.
pub fn throw(kind: &str, message: &str) -> NativeError {
    NativeError::Thrown(make_error(kind, message))
}

/// Formats an error value for diagnostics: `name: message` when the value
/// looks like an error object, `String()` otherwise.
pub fn describe_error(value: &Value) -> String {
    let read = |v: &Value, key: &str| -> Option<String> {
        match v {
            Value::Dict(d) => d.borrow().get(key).map(|p| p.to_string()),
            Value::Object(o) => o.borrow().get_own(key).map(|p| p.to_string()),
            _ => None,
        }
    };
    match (read(value, "name"), read(value, "message")) {
        (Some(name), Some(message)) => format!("{}: {}", name, message),
        _ => value.to_string(),
    }
}

macro_rules! error_ctor {
    ($fn_name:ident, $kind:literal) => {
        /// Constructor for this error kind.
        pub fn $fn_name(
            host: &mut dyn HostContext,
            _this: Value,
            args: &[Value],
        ) -> Result<Value, NativeError> {
            let message = if matches!(arg(args, 0), Value::Undefined) {
                String::new()
            } else {
                str_arg(host, args, 0)
            };
            Ok(make_error($kind, &message))
        }
    };
}

error_ctor!(error_new, "Error");
error_ctor!(type_error_new, "TypeError");
error_ctor!(range_error_new, "RangeError");
error_ctor!(reference_error_new, "ReferenceError");
error_ctor!(syntax_error_new, "SyntaxError");
error_ctor!(eval_error_new, "EvalError");
error_ctor!(uri_error_new, "URIError");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_error_shape() {
        let err = make_error("TypeError", "not callable");
        let Value::Dict(d) = &err else {
            panic!("expected dict");
        };
        assert_eq!(
            d.borrow().get("name"),
            Some(Value::String(Rc::from("TypeError")))
        );
        assert_eq!(describe_error(&err), "TypeError: not callable");
    }

    #[test]
    fn test_describe_non_error() {
        assert_eq!(describe_error(&Value::Int(3)), "3");
    }
}
