//! The Object namespace.

use crate::arg;
use crate::errors::throw;
use core_types::{HostContext, JsArray, NativeError, PlainObject, Value};
use std::cell::RefCell;
use std::rc::Rc;

fn own_keys(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Object(o) => Some(
            o.borrow()
                .keys()
                .iter()
                .map(|k| Value::String(k.clone()))
                .collect(),
        ),
        Value::Dict(d) => Some(
            d.borrow()
                .keys()
                .into_iter()
                .map(Value::String)
                .collect(),
        ),
        Value::Array(a) => Some(
            (0..a.borrow().len())
                .map(|i| Value::String(Rc::from(i.to_string().as_str())))
                .collect(),
        ),
        _ => None,
    }
}

/// `Object.keys` — own enumerable keys in insertion order.
pub fn keys(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let keys = own_keys(&arg(args, 0))
        .ok_or_else(|| throw("TypeError", "Object.keys called on non-object"))?;
    Ok(Value::Array(Rc::new(RefCell::new(JsArray::from_elements(
        keys,
    )))))
}

/// `Object.values`
pub fn values(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let out = match arg(args, 0) {
        Value::Object(o) => {
            let o = o.borrow();
            o.keys()
                .iter()
                .map(|k| match o.get_own(k) {
                    // Accessor slots are engine-internal; surface undefined
                    // rather than the pair.
                    Some(Value::Accessor(_)) | None => Value::Undefined,
                    Some(value) => value,
                })
                .collect()
        }
        Value::Dict(d) => {
            let d = d.borrow();
            d.keys()
                .iter()
                .map(|k| d.get(k).unwrap_or(Value::Undefined))
                .collect()
        }
        Value::Array(a) => a.borrow().elements.clone(),
        _ => return Err(throw("TypeError", "Object.values called on non-object")),
    };
    Ok(Value::Array(Rc::new(RefCell::new(JsArray::from_elements(
        out,
    )))))
}

/// `Object.assign` — copies own properties of each source onto the target.
pub fn assign(
    host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let target = arg(args, 0);
    for source in args.iter().skip(1) {
        let pairs: Vec<(Rc<str>, Value)> = match source {
            Value::Object(o) => {
                let o = o.borrow();
                o.keys()
                    .iter()
                    .map(|k| (k.clone(), o.get_own(k).unwrap_or(Value::Undefined)))
                    .collect()
            }
            Value::Dict(d) => {
                let d = d.borrow();
                d.keys()
                    .into_iter()
                    .map(|k| {
                        let v = d.get(&k).unwrap_or(Value::Undefined);
                        (k, v)
                    })
                    .collect()
            }
            _ => continue,
        };
        match &target {
            Value::Object(o) => {
                for (key, value) in pairs {
                    o.borrow_mut().set(host.shapes(), key, value);
                }
            }
            Value::Dict(d) => {
                for (key, value) in pairs {
                    d.borrow_mut().set(key, value);
                }
            }
            _ => return Err(throw("TypeError", "Object.assign target must be an object")),
        }
    }
    Ok(target)
}

/// `Object.create` — new object with the given prototype.
pub fn create(
    host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let proto = arg(args, 0);
    if !matches!(
        proto,
        Value::Object(_) | Value::Dict(_) | Value::Null
    ) {
        return Err(throw(
            "TypeError",
            "Object.create prototype must be an object or null",
        ));
    }
    let mut obj = PlainObject::new(host.shapes());
    obj.proto = proto;
    Ok(Value::Object(Rc::new(RefCell::new(obj))))
}

/// `Object.getPrototypeOf`
pub fn get_prototype_of(
    _host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    Ok(match arg(args, 0) {
        Value::Object(o) => o.borrow().proto.clone(),
        Value::Dict(d) => d.borrow().proto.clone(),
        _ => Value::Null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_host::TestHost;

    fn obj_with(host: &mut TestHost, pairs: &[(&str, Value)]) -> Value {
        let mut obj = PlainObject::new(host.shapes());
        for (k, v) in pairs {
            let key = host.strings().intern(k);
            obj.set(host.shapes(), key, v.clone());
        }
        Value::Object(Rc::new(RefCell::new(obj)))
    }

    #[test]
    fn test_keys_insertion_order() {
        let mut host = TestHost::new();
        let obj = obj_with(
            &mut host,
            &[("k0", Value::Int(0)), ("k1", Value::Int(1)), ("k2", Value::Int(2))],
        );
        let result = keys(&mut host, Value::Undefined, &[obj]).unwrap();
        let Value::Array(a) = result else {
            panic!("expected array");
        };
        let joined: Vec<String> = a.borrow().elements.iter().map(|v| v.to_string()).collect();
        assert_eq!(joined, vec!["k0", "k1", "k2"]);
    }

    #[test]
    fn test_assign_copies_and_returns_target() {
        let mut host = TestHost::new();
        let target = obj_with(&mut host, &[("a", Value::Int(1))]);
        let source = obj_with(&mut host, &[("b", Value::Int(2))]);
        let result = assign(&mut host, Value::Undefined, &[target.clone(), source]).unwrap();
        assert!(result.strict_equals(&target));
        let Value::Object(o) = result else {
            panic!("expected object");
        };
        assert_eq!(o.borrow().get_own("b"), Some(Value::Int(2)));
    }

    #[test]
    fn test_keys_rejects_primitives() {
        let mut host = TestHost::new();
        assert!(keys(&mut host, Value::Undefined, &[Value::Int(1)]).is_err());
    }
}
