//! The RegExp constructor and regex intrinsic methods.
//!
//! Patterns compile lazily through the `regex` crate; flags map onto inline
//! modifiers (`i` → `(?i)`, `m` → `(?m)`, `s` → `(?s)`). Syntax the engine
//! cannot express surfaces as a thrown `SyntaxError`.

use crate::errors::throw;
use crate::{arg, str_arg};
use core_types::{HostContext, JsArray, NativeError, RegexObj, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// `RegExp(pattern, flags)`
pub fn regexp_new(
    host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let (source, flags) = match arg(args, 0) {
        Value::Regex(existing) => (existing.source.clone(), existing.flags.clone()),
        _ => {
            let source_str = str_arg(host, args, 0);
            let source = host.strings().intern_owned(source_str);
            let flags = match arg(args, 1) {
                Value::Undefined => host.strings().intern(""),
                other => host.strings().intern_owned(other.to_string()),
            };
            (source, flags)
        }
    };
    // Validate eagerly so bad patterns fail at construction.
    compile(&source, &flags)?;
    Ok(Value::Regex(Rc::new(RegexObj { source, flags })))
}

fn compile(source: &str, flags: &str) -> Result<regex::Regex, NativeError> {
    let mut prefix = String::new();
    for flag in flags.chars() {
        match flag {
            'i' => prefix.push_str("(?i)"),
            'm' => prefix.push_str("(?m)"),
            's' => prefix.push_str("(?s)"),
            'g' | 'u' => {} // `g` is a matching mode, `u` is the default here
            other => {
                return Err(throw(
                    "SyntaxError",
                    &format!("unsupported regex flag {:?}", other),
                ));
            }
        }
    }
    regex::Regex::new(&format!("{}{}", prefix, source))
        .map_err(|e| throw("SyntaxError", &format!("invalid regular expression: {}", e)))
}

fn this_regex(this: &Value) -> Result<Rc<RegexObj>, NativeError> {
    match this {
        Value::Regex(r) => Ok(r.clone()),
        _ => Err(throw("TypeError", "receiver is not a regular expression")),
    }
}

/// `test` intrinsic.
pub fn test(
    host: &mut dyn HostContext,
    this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let regex = this_regex(&this)?;
    let compiled = compile(&regex.source, &regex.flags)?;
    let text = str_arg(host, args, 0);
    Ok(Value::Boolean(compiled.is_match(&text)))
}

/// `exec` intrinsic — the match plus capture groups, or `null`.
pub fn exec(
    host: &mut dyn HostContext,
    this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let regex = this_regex(&this)?;
    let compiled = compile(&regex.source, &regex.flags)?;
    let text = str_arg(host, args, 0);
    match compiled.captures(&text) {
        Some(captures) => {
            let groups: Vec<Value> = captures
                .iter()
                .map(|group| match group {
                    Some(m) => Value::String(host.strings().intern(m.as_str())),
                    None => Value::Undefined,
                })
                .collect();
            Ok(Value::Array(Rc::new(RefCell::new(JsArray::from_elements(
                groups,
            )))))
        }
        None => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_host::TestHost;

    fn s(text: &str) -> Value {
        Value::String(Rc::from(text))
    }

    #[test]
    fn test_regexp_test_with_flags() {
        let mut host = TestHost::new();
        let re = regexp_new(&mut host, Value::Undefined, &[s("^ab+"), s("i")]).unwrap();
        assert_eq!(
            test(&mut host, re.clone(), &[s("ABBB")]).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            test(&mut host, re, &[s("xa")]).unwrap(),
            Value::Boolean(false)
        );
    }

    #[test]
    fn test_exec_captures() {
        let mut host = TestHost::new();
        let re = regexp_new(&mut host, Value::Undefined, &[s(r"(\d+)-(\d+)")]).unwrap();
        let result = exec(&mut host, re, &[s("a 12-34 b")]).unwrap();
        let Value::Array(a) = result else { panic!() };
        assert_eq!(a.borrow().get(0), s("12-34"));
        assert_eq!(a.borrow().get(1), s("12"));
        assert_eq!(a.borrow().get(2), s("34"));
    }

    #[test]
    fn test_invalid_pattern_throws() {
        let mut host = TestHost::new();
        assert!(regexp_new(&mut host, Value::Undefined, &[s("(")]).is_err());
    }
}
