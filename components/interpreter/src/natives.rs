//! Built-in global installation.
//!
//! Runs once per session before any user code. Standard constructors and
//! namespaces are registered first so they occupy a stable slot prefix in
//! the allocator; the installer finishes by publishing the name map to the
//! VM so `globalThis['name']` resolves.

use crate::vm::Vm;
use builtins as b;
use core_types::{
    BoundMethod, HeapAllocator, HostContext, NativeError, NativeFunction, NativeImpl, PlainObject,
    PromiseObj, Value,
};
use std::cell::RefCell;
use std::rc::Rc;

fn native(vm: &mut Vm, name: &str, min_args: u8, imp: NativeImpl) -> Value {
    Value::NativeFunction(Rc::new(NativeFunction::new(
        vm.strings().intern(name),
        min_args,
        true,
        imp,
    )))
}

fn constructor(
    vm: &mut Vm,
    name: &str,
    min_args: u8,
    imp: NativeImpl,
    statics: Vec<(&str, Value)>,
) -> Value {
    let mut nf = NativeFunction::new(vm.strings().intern(name), min_args, true, imp);
    nf.statics = statics
        .into_iter()
        .map(|(k, v)| (vm.strings().intern(k), v))
        .collect();
    Value::NativeConstructor(Rc::new(nf))
}

fn namespace(vm: &mut Vm, entries: Vec<(&str, Value)>) -> Value {
    let mut obj = PlainObject::new(vm.shapes());
    for (key, value) in entries {
        let key = vm.strings().intern(key);
        obj.set(vm.shapes(), key, value);
    }
    Value::Object(Rc::new(RefCell::new(obj)))
}

fn define(vm: &mut Vm, heap: &mut HeapAllocator, name: &str, value: Value) {
    let slot = heap.get_or_assign(name);
    vm.set_global(slot, value);
}

/// `queueMicrotask(fn)`
fn queue_microtask(
    host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let callable = args.first().cloned().unwrap_or(Value::Undefined);
    if !callable.is_callable() {
        return Err(b::throw("TypeError", "queueMicrotask requires a function"));
    }
    host.enqueue_microtask(callable, Vec::new());
    Ok(Value::Undefined)
}

/// Resolver half of a promise capability, bound to the promise as `this`.
fn promise_capability_resolve(
    host: &mut dyn HostContext,
    this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    host.resolve_promise(&this, args.first().cloned().unwrap_or(Value::Undefined));
    Ok(Value::Undefined)
}

fn promise_capability_reject(
    host: &mut dyn HostContext,
    this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    host.reject_promise(&this, args.first().cloned().unwrap_or(Value::Undefined));
    Ok(Value::Undefined)
}

/// `new Promise(executor)`
fn promise_ctor(
    host: &mut dyn HostContext,
    _this: Value,
    args: &[Value],
) -> Result<Value, NativeError> {
    let executor = args.first().cloned().unwrap_or(Value::Undefined);
    if !executor.is_callable() {
        return Err(b::throw("TypeError", "Promise executor must be a function"));
    }
    let promise = Value::Promise(Rc::new(RefCell::new(PromiseObj::new())));
    let resolve = Value::BoundMethod(Rc::new(BoundMethod {
        target: Value::NativeFunction(Rc::new(NativeFunction::new(
            host.strings().intern("resolve"),
            1,
            true,
            promise_capability_resolve,
        ))),
        receiver: promise.clone(),
        bound_args: Vec::new(),
    }));
    let reject = Value::BoundMethod(Rc::new(BoundMethod {
        target: Value::NativeFunction(Rc::new(NativeFunction::new(
            host.strings().intern("reject"),
            1,
            true,
            promise_capability_reject,
        ))),
        receiver: promise.clone(),
        bound_args: Vec::new(),
    }));
    match host.call_value(executor, Value::Undefined, &[resolve, reject]) {
        Ok(_) => {}
        Err(NativeError::Thrown(reason)) => host.reject_promise(&promise, reason),
        Err(exit @ NativeError::Exit(_)) => return Err(exit),
    }
    Ok(promise)
}

/// Installs every built-in global. `argv` feeds `process.argv`.
pub fn install_builtins(vm: &mut Vm, heap: &mut HeapAllocator, argv: &[String]) {
    // Core namespaces.
    let console_log = native(vm, "log", 0, b::console::log);
    let console_error = native(vm, "error", 0, b::console::error);
    let console_warn = native(vm, "warn", 0, b::console::warn);
    let console = namespace(
        vm,
        vec![
            ("log", console_log),
            ("error", console_error),
            ("warn", console_warn),
        ],
    );
    define(vm, heap, "console", console);

    let math_entries = vec![
        ("floor", native(vm, "floor", 1, b::math::floor)),
        ("ceil", native(vm, "ceil", 1, b::math::ceil)),
        ("round", native(vm, "round", 1, b::math::round)),
        ("trunc", native(vm, "trunc", 1, b::math::trunc)),
        ("abs", native(vm, "abs", 1, b::math::abs)),
        ("sqrt", native(vm, "sqrt", 1, b::math::sqrt)),
        ("pow", native(vm, "pow", 2, b::math::pow)),
        ("max", native(vm, "max", 0, b::math::max)),
        ("min", native(vm, "min", 0, b::math::min)),
        ("random", native(vm, "random", 0, b::math::random)),
        ("PI", Value::Number(std::f64::consts::PI)),
        ("E", Value::Number(std::f64::consts::E)),
    ];
    let math = namespace(vm, math_entries);
    define(vm, heap, "Math", math);

    let json_entries = vec![
        ("parse", native(vm, "parse", 1, b::json::parse)),
        ("stringify", native(vm, "stringify", 1, b::json::stringify)),
    ];
    let json = namespace(vm, json_entries);
    define(vm, heap, "JSON", json);

    let object_entries = vec![
        ("keys", native(vm, "keys", 1, b::object::keys)),
        ("values", native(vm, "values", 1, b::object::values)),
        ("assign", native(vm, "assign", 1, b::object::assign)),
        ("create", native(vm, "create", 1, b::object::create)),
        (
            "getPrototypeOf",
            native(vm, "getPrototypeOf", 1, b::object::get_prototype_of),
        ),
    ];
    let object_ns = namespace(vm, object_entries);
    define(vm, heap, "Object", object_ns);

    // Constructors.
    let is_array = native(vm, "isArray", 1, b::array::is_array);
    let array = constructor(vm, "Array", 0, b::array::array_new, vec![("isArray", is_array)]);
    define(vm, heap, "Array", array);

    let from_char_code = native(vm, "fromCharCode", 0, b::string::from_char_code);
    let string_ctor = constructor(
        vm,
        "String",
        0,
        b::string::string_new,
        vec![("fromCharCode", from_char_code)],
    );
    define(vm, heap, "String", string_ctor);

    let number_is_integer = native(vm, "isInteger", 1, b::number::is_integer);
    let number_ctor = constructor(
        vm,
        "Number",
        0,
        b::number::number_new,
        vec![
            ("isInteger", number_is_integer),
            ("MAX_SAFE_INTEGER", Value::Number(9_007_199_254_740_991.0)),
            ("NaN", Value::Number(f64::NAN)),
        ],
    );
    define(vm, heap, "Number", number_ctor);

    let boolean_ctor = constructor(vm, "Boolean", 0, b::number::boolean_new, Vec::new());
    define(vm, heap, "Boolean", boolean_ctor);

    let promise_resolve = native(vm, "resolve", 0, b::promise::resolve);
    let promise_reject = native(vm, "reject", 0, b::promise::reject);
    let promise = constructor(
        vm,
        "Promise",
        1,
        promise_ctor,
        vec![("resolve", promise_resolve), ("reject", promise_reject)],
    );
    define(vm, heap, "Promise", promise);

    let regexp = constructor(vm, "RegExp", 1, b::regexp::regexp_new, Vec::new());
    define(vm, heap, "RegExp", regexp);

    let array_buffer = constructor(vm, "ArrayBuffer", 1, b::typed_arrays::array_buffer_new, Vec::new());
    define(vm, heap, "ArrayBuffer", array_buffer);
    let int8 = constructor(vm, "Int8Array", 0, b::typed_arrays::int8_array_new, Vec::new());
    define(vm, heap, "Int8Array", int8);
    let uint8 = constructor(vm, "Uint8Array", 0, b::typed_arrays::uint8_array_new, Vec::new());
    define(vm, heap, "Uint8Array", uint8);
    let int32 = constructor(vm, "Int32Array", 0, b::typed_arrays::int32_array_new, Vec::new());
    define(vm, heap, "Int32Array", int32);
    let float64 = constructor(
        vm,
        "Float64Array",
        0,
        b::typed_arrays::float64_array_new,
        Vec::new(),
    );
    define(vm, heap, "Float64Array", float64);

    // Error constructors.
    let error = constructor(vm, "Error", 0, b::errors::error_new, Vec::new());
    define(vm, heap, "Error", error);
    let type_error = constructor(vm, "TypeError", 0, b::errors::type_error_new, Vec::new());
    define(vm, heap, "TypeError", type_error);
    let range_error = constructor(vm, "RangeError", 0, b::errors::range_error_new, Vec::new());
    define(vm, heap, "RangeError", range_error);
    let reference_error = constructor(
        vm,
        "ReferenceError",
        0,
        b::errors::reference_error_new,
        Vec::new(),
    );
    define(vm, heap, "ReferenceError", reference_error);
    let syntax_error = constructor(vm, "SyntaxError", 0, b::errors::syntax_error_new, Vec::new());
    define(vm, heap, "SyntaxError", syntax_error);
    let eval_error = constructor(vm, "EvalError", 0, b::errors::eval_error_new, Vec::new());
    define(vm, heap, "EvalError", eval_error);
    let uri_error = constructor(vm, "URIError", 0, b::errors::uri_error_new, Vec::new());
    define(vm, heap, "URIError", uri_error);

    // Global constants and functions.
    define(vm, heap, "NaN", Value::Number(f64::NAN));
    define(vm, heap, "Infinity", Value::Number(f64::INFINITY));
    define(vm, heap, "undefined", Value::Undefined);
    define(vm, heap, "globalThis", Value::GlobalThis);
    let is_nan = native(vm, "isNaN", 1, b::number::is_nan);
    define(vm, heap, "isNaN", is_nan);
    let is_finite = native(vm, "isFinite", 1, b::number::is_finite);
    define(vm, heap, "isFinite", is_finite);
    let parse_int = native(vm, "parseInt", 1, b::number::parse_int);
    define(vm, heap, "parseInt", parse_int);
    let parse_float = native(vm, "parseFloat", 1, b::number::parse_float);
    define(vm, heap, "parseFloat", parse_float);
    let queue = native(vm, "queueMicrotask", 1, queue_microtask);
    define(vm, heap, "queueMicrotask", queue);

    // process
    let argv_value = b::process::build_argv(vm, argv);
    let env_value = b::process::build_env(vm);
    let cwd = native(vm, "cwd", 0, b::process::cwd);
    let exit = native(vm, "exit", 0, b::process::exit);
    let process = namespace(
        vm,
        vec![
            ("argv", argv_value),
            ("env", env_value),
            ("cwd", cwd),
            ("exit", exit),
        ],
    );
    define(vm, heap, "process", process);

    vm.sync_global_names(heap);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_occupy_stable_prefix() {
        let mut vm = Vm::new();
        let mut heap = HeapAllocator::new();
        install_builtins(&mut vm, &mut heap, &[]);
        let console_slot = heap.lookup("console").expect("console registered");
        assert_eq!(console_slot, 0);
        // A second session initializes the same prefix.
        let mut vm2 = Vm::new();
        let mut heap2 = HeapAllocator::new();
        install_builtins(&mut vm2, &mut heap2, &[]);
        assert_eq!(heap2.lookup("console"), Some(console_slot));
        assert_eq!(heap.lookup("Math"), heap2.lookup("Math"));
    }

    #[test]
    fn test_global_this_reads_builtins() {
        let mut vm = Vm::new();
        let mut heap = HeapAllocator::new();
        install_builtins(&mut vm, &mut heap, &[]);
        assert!(vm.global_by_name("Math").is_some());
        assert!(matches!(
            vm.global_by_name("NaN"),
            Some(Value::Number(n)) if n.is_nan()
        ));
    }

    #[test]
    fn test_process_argv_installed() {
        let mut vm = Vm::new();
        let mut heap = HeapAllocator::new();
        install_builtins(&mut vm, &mut heap, &["paserati".into(), "x.ts".into()]);
        let process = vm.global_by_name("process").expect("process");
        let Value::Object(o) = process else { panic!() };
        let argv = o.borrow().get_own("argv").expect("argv");
        let Value::Array(a) = argv else { panic!() };
        assert_eq!(a.borrow().len(), 2);
    }
}
