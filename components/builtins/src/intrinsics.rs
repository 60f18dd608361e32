//! Intrinsic method dispatch for primitive and built-in receivers.
//!
//! Method calls on arrays, strings, numbers, promises, and regexes do not
//! walk a prototype chain; the VM's `CallMethod` path asks this table for
//! the receiver kind + name pair and calls the resulting native function.

use crate::{array, number, promise, regexp, string};
use core_types::{NativeFunction, NativeImpl, Value};
use std::rc::Rc;

fn native(name: &str, min_args: u8, imp: NativeImpl) -> Value {
    Value::NativeFunction(Rc::new(NativeFunction::new(
        Rc::from(name),
        min_args,
        true,
        imp,
    )))
}

/// Resolves an intrinsic method on `receiver`, or `None` when the receiver
/// kind has no such method.
pub fn method_for(receiver: &Value, name: &str) -> Option<Value> {
    let entry: (&str, u8, NativeImpl) = match receiver {
        Value::Array(_) => match name {
            "push" => ("push", 0, array::push),
            "pop" => ("pop", 0, array::pop),
            "shift" => ("shift", 0, array::shift),
            "join" => ("join", 0, array::join),
            "indexOf" => ("indexOf", 1, array::index_of),
            "includes" => ("includes", 1, array::includes),
            "slice" => ("slice", 0, array::slice),
            "concat" => ("concat", 0, array::concat),
            "reverse" => ("reverse", 0, array::reverse),
            "map" => ("map", 1, array::map),
            "filter" => ("filter", 1, array::filter),
            "forEach" => ("forEach", 1, array::for_each),
            "fill" => ("fill", 1, array::fill),
            _ => return None,
        },
        Value::String(_) => match name {
            "charAt" => ("charAt", 1, string::char_at),
            "charCodeAt" => ("charCodeAt", 1, string::char_code_at),
            "indexOf" => ("indexOf", 1, string::index_of),
            "includes" => ("includes", 1, string::includes),
            "startsWith" => ("startsWith", 1, string::starts_with),
            "endsWith" => ("endsWith", 1, string::ends_with),
            "slice" => ("slice", 0, string::slice),
            "toUpperCase" => ("toUpperCase", 0, string::to_upper_case),
            "toLowerCase" => ("toLowerCase", 0, string::to_lower_case),
            "trim" => ("trim", 0, string::trim),
            "split" => ("split", 0, string::split),
            "repeat" => ("repeat", 1, string::repeat),
            _ => return None,
        },
        Value::Int(_) | Value::Number(_) => match name {
            "toFixed" => ("toFixed", 0, number::to_fixed),
            "toString" => ("toString", 0, number::number_to_string),
            _ => return None,
        },
        Value::Promise(_) => match name {
            "then" => ("then", 0, promise::then),
            "catch" => ("catch", 1, promise::catch),
            _ => return None,
        },
        Value::Regex(_) => match name {
            "test" => ("test", 1, regexp::test),
            "exec" => ("exec", 1, regexp::exec),
            _ => return None,
        },
        _ => return None,
    };
    Some(native(entry.0, entry.1, entry.2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::JsArray;
    use std::cell::RefCell;

    #[test]
    fn test_array_method_lookup() {
        let arr = Value::Array(Rc::new(RefCell::new(JsArray::new())));
        assert!(method_for(&arr, "join").is_some());
        assert!(method_for(&arr, "flatMapSort").is_none());
    }

    #[test]
    fn test_string_method_lookup() {
        let s = Value::String(Rc::from("x"));
        assert!(method_for(&s, "toUpperCase").is_some());
        assert!(method_for(&Value::Int(1), "toUpperCase").is_none());
    }
}
