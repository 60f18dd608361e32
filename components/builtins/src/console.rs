//! The console namespace.

use core_types::{HostContext, NativeError, Value};

/// Formats a value the way the console shows it: strings bare, arrays and
/// objects with their structure, nested strings quoted.
pub fn format_for_console(value: &Value) -> String {
    fn inner(value: &Value, nested: bool) -> String {
        match value {
            Value::String(s) if nested => format!("'{}'", s),
            Value::Array(a) => {
                let parts: Vec<String> = a
                    .borrow()
                    .elements
                    .iter()
                    .map(|v| inner(v, true))
                    .collect();
                format!("[ {} ]", parts.join(", "))
            }
            Value::Object(o) => {
                let o = o.borrow();
                let parts: Vec<String> = o
                    .keys()
                    .iter()
                    .map(|k| {
                        let v = o.get_own(k).unwrap_or(Value::Undefined);
                        format!("{}: {}", k, inner(&v, true))
                    })
                    .collect();
                if parts.is_empty() {
                    "{}".to_string()
                } else {
                    format!("{{ {} }}", parts.join(", "))
                }
            }
            Value::Dict(d) => {
                let d = d.borrow();
                let parts: Vec<String> = d
                    .keys()
                    .iter()
                    .map(|k| {
                        let v = d.get(k).unwrap_or(Value::Undefined);
                        format!("{}: {}", k, inner(&v, true))
                    })
                    .collect();
                if parts.is_empty() {
                    "{}".to_string()
                } else {
                    format!("{{ {} }}", parts.join(", "))
                }
            }
            other => other.to_string(),
        }
    }
    inner(value, false)
}

fn join_args(args: &[Value]) -> String {
    args.iter()
        .map(format_for_console)
        .collect::<Vec<_>>()
        .join(" ")
}

/// `console.log`
pub fn log(_host: &mut dyn HostContext, _this: Value, args: &[Value]) -> Result<Value, NativeError> {
    println!("{}", join_args(args));
    Ok(Value::Undefined)
}

/// `console.error`
pub fn error(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    eprintln!("{}", join_args(args));
    Ok(Value::Undefined)
}

/// `console.warn`
pub fn warn(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    eprintln!("{}", join_args(args));
    Ok(Value::Undefined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::JsArray;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_format_primitives() {
        assert_eq!(format_for_console(&Value::Int(3)), "3");
        assert_eq!(
            format_for_console(&Value::String(Rc::from("hi"))),
            "hi"
        );
    }

    #[test]
    fn test_format_array_quotes_strings() {
        let arr = Value::Array(Rc::new(RefCell::new(JsArray::from_elements(vec![
            Value::Int(1),
            Value::String(Rc::from("x")),
        ]))));
        assert_eq!(format_for_console(&arr), "[ 1, 'x' ]");
    }
}
