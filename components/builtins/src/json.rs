//! The JSON namespace: `parse` and `stringify` over the runtime value tree.

use crate::errors::throw;
use crate::{arg, str_arg};
use core_types::{DictObject, HostContext, JsArray, NativeError, Value};
use std::cell::RefCell;
use std::rc::Rc;

const MAX_DEPTH: usize = 128;

/// Converts a parsed JSON tree into runtime values.
///
/// JSON objects become dictionary objects: they are string-keyed mutable
/// maps by definition and carry no shape lineage worth caching.
pub fn json_to_value(host: &mut dyn HostContext, json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => Value::from_f64(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::String(host.strings().intern(s)),
        serde_json::Value::Array(items) => {
            let elements = items.iter().map(|item| json_to_value(host, item)).collect();
            Value::Array(Rc::new(RefCell::new(JsArray::from_elements(elements))))
        }
        serde_json::Value::Object(map) => {
            let mut dict = DictObject::new();
            for (key, item) in map {
                let key = host.strings().intern(key);
                let value = json_to_value(host, item);
                dict.set(key, value);
            }
            Value::Dict(Rc::new(RefCell::new(dict)))
        }
    }
}

/// Converts a runtime value into a JSON tree.
///
/// Returns `None` for values JSON omits (functions, `undefined`, symbols).
pub fn value_to_json(value: &Value, depth: usize) -> Result<Option<serde_json::Value>, NativeError> {
    if depth > MAX_DEPTH {
        return Err(throw("TypeError", "converting circular structure to JSON"));
    }
    Ok(match value {
        Value::Undefined
        | Value::Function(_)
        | Value::Closure(_)
        | Value::NativeFunction(_)
        | Value::NativeConstructor(_)
        | Value::BoundMethod(_)
        | Value::Symbol(_)
        | Value::Accessor(_) => None,
        Value::Null => Some(serde_json::Value::Null),
        Value::Boolean(b) => Some(serde_json::Value::Bool(*b)),
        Value::Int(n) => Some(serde_json::Value::from(*n)),
        Value::Number(n) => {
            if n.is_finite() {
                Some(serde_json::Value::from(*n))
            } else {
                Some(serde_json::Value::Null)
            }
        }
        Value::String(s) => Some(serde_json::Value::String(s.to_string())),
        Value::BigInt(_) => {
            return Err(throw("TypeError", "BigInt value cannot be serialized to JSON"));
        }
        Value::Array(a) => {
            let mut items = Vec::new();
            for element in &a.borrow().elements {
                items.push(value_to_json(element, depth + 1)?.unwrap_or(serde_json::Value::Null));
            }
            Some(serde_json::Value::Array(items))
        }
        Value::Object(o) => {
            let o = o.borrow();
            let mut map = serde_json::Map::new();
            for key in o.keys() {
                let slot = o.get_own(key).unwrap_or(Value::Undefined);
                if let Some(json) = value_to_json(&slot, depth + 1)? {
                    map.insert(key.to_string(), json);
                }
            }
            Some(serde_json::Value::Object(map))
        }
        Value::Dict(d) => {
            let d = d.borrow();
            let mut map = serde_json::Map::new();
            for key in d.keys() {
                let slot = d.get(&key).unwrap_or(Value::Undefined);
                if let Some(json) = value_to_json(&slot, depth + 1)? {
                    map.insert(key.to_string(), json);
                }
            }
            Some(serde_json::Value::Object(map))
        }
        // Remaining heap kinds serialize like plain objects with no keys.
        _ => Some(serde_json::Value::Object(serde_json::Map::new())),
    })
}

/// `JSON.parse`
pub fn parse(
    host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let text = str_arg(host, args, 0);
    let json: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| throw("SyntaxError", &format!("invalid JSON: {}", e)))?;
    Ok(json_to_value(host, &json))
}

/// `JSON.stringify`
pub fn stringify(
    host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    match value_to_json(&arg(args, 0), 0)? {
        Some(json) => {
            let text = match arg(args, 2) {
                Value::Int(indent) if indent > 0 => serde_json::to_string_pretty(&json),
                _ => serde_json::to_string(&json),
            }
            .map_err(|e| throw("TypeError", &format!("cannot stringify: {}", e)))?;
            Ok(Value::String(host.strings().intern_owned(text)))
        }
        None => Ok(Value::Undefined),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_host::TestHost;

    #[test]
    fn test_parse_roundtrip_preserves_shape() {
        let mut host = TestHost::new();
        let parsed = parse(
            &mut host,
            Value::Undefined,
            &[Value::String(Rc::from(r#"{"a":[1,2.5,"x"],"b":null}"#))],
        )
        .unwrap();
        let text = stringify(&mut host, Value::Undefined, &[parsed]).unwrap();
        assert_eq!(
            text,
            Value::String(Rc::from(r#"{"a":[1,2.5,"x"],"b":null}"#))
        );
    }

    #[test]
    fn test_parse_objects_are_dicts() {
        let mut host = TestHost::new();
        let parsed = parse(
            &mut host,
            Value::Undefined,
            &[Value::String(Rc::from(r#"{"k":1}"#))],
        )
        .unwrap();
        assert!(matches!(parsed, Value::Dict(_)));
    }

    #[test]
    fn test_stringify_skips_functions() {
        let mut host = TestHost::new();
        let result = stringify(&mut host, Value::Undefined, &[Value::Undefined]).unwrap();
        assert_eq!(result, Value::Undefined);
    }

    #[test]
    fn test_parse_error_is_syntax_error() {
        let mut host = TestHost::new();
        let err = parse(
            &mut host,
            Value::Undefined,
            &[Value::String(Rc::from("{oops"))],
        )
        .unwrap_err();
        assert!(matches!(err, NativeError::Thrown(_)));
    }
}
