//! try/catch/finally and unwinding tests.

use compiler::{parse_program, Compiler};
use core_types::{HeapAllocator, Value};
use interpreter::{install_builtins, Vm, VmError};

fn run(source: &str) -> Result<Value, VmError> {
    let mut vm = Vm::new();
    let mut heap = HeapAllocator::new();
    install_builtins(&mut vm, &mut heap, &[]);
    let program = parse_program(source).expect("parse");
    let chunk = Compiler::new(&mut heap)
        .compile_script(&program)
        .expect("compile");
    vm.sync_global_names(&heap);
    let result = vm.execute(&chunk)?;
    vm.drain_microtasks()?;
    Ok(result)
}

fn eval(source: &str) -> Value {
    run(source).expect("run")
}

#[test]
fn test_catch_receives_thrown_value() {
    assert_eq!(
        eval(r#"let got = ""; try { throw "boom"; } catch (e) { got = e; } got"#),
        Value::String("boom".into())
    );
}

#[test]
fn test_catch_across_call_frames() {
    let source = r#"
        function inner() { throw "deep"; }
        function middle() { inner(); }
        let got = "";
        try { middle(); } catch (e) { got = e; }
        got
    "#;
    assert_eq!(eval(source), Value::String("deep".into()));
}

#[test]
fn test_finally_runs_on_success_and_failure() {
    let source = r#"
        let log = [];
        try { log.push("try"); } finally { log.push("finally"); }
        try {
            try { throw "x"; } finally { log.push("finally2"); }
        } catch (e) { log.push("caught"); }
        log.join(",")
    "#;
    assert_eq!(
        eval(source),
        Value::String("try,finally,finally2,caught".into())
    );
}

#[test]
fn test_try_catch_finally_order() {
    let source = r#"
        let log = [];
        try {
            throw "err";
        } catch (e) {
            log.push("catch:" + e);
        } finally {
            log.push("finally");
        }
        log.join(",")
    "#;
    assert_eq!(eval(source), Value::String("catch:err,finally".into()));
}

#[test]
fn test_rethrow_from_catch_propagates() {
    let source = r#"
        let got = "";
        try {
            try { throw "original"; } catch (e) { throw "rethrown"; }
        } catch (e) { got = e; }
        got
    "#;
    assert_eq!(eval(source), Value::String("rethrown".into()));
}

#[test]
fn test_uncaught_throw_reaches_driver() {
    let err = run(r#"throw Error("fatal");"#).unwrap_err();
    let VmError::Runtime(err) = err else {
        panic!("expected runtime error");
    };
    assert!(err.diagnostic.message.contains("fatal"));
    assert_eq!(err.diagnostic.code, "PS4004");
}

#[test]
fn test_vm_state_survives_uncaught_throw() {
    let mut vm = Vm::new();
    let mut heap = HeapAllocator::new();
    install_builtins(&mut vm, &mut heap, &[]);

    let failing = parse_program("throw 'first';").expect("parse");
    let chunk = Compiler::new(&mut heap)
        .compile_script(&failing)
        .expect("compile");
    vm.sync_global_names(&heap);
    assert!(vm.execute(&chunk).is_err());

    let ok = parse_program("40 + 2").expect("parse");
    let chunk = Compiler::new(&mut heap).compile_script(&ok).expect("compile");
    vm.sync_global_names(&heap);
    assert_eq!(vm.execute(&chunk).expect("second run"), Value::Int(42));
}

#[test]
fn test_handler_popped_on_normal_exit() {
    // A throw after a completed try must not jump into its stale handler.
    let source = r#"
        let got = "";
        try { 1 + 1; } catch (e) { got = "wrong"; }
        try { throw "right"; } catch (e) { got = e; }
        got
    "#;
    assert_eq!(eval(source), Value::String("right".into()));
}

#[test]
fn test_throw_error_object_properties() {
    let source = r#"
        let name = "";
        try { throw TypeError("bad thing"); } catch (e) { name = e.name + ":" + e.message; }
        name
    "#;
    assert_eq!(eval(source), Value::String("TypeError:bad thing".into()));
}

#[test]
fn test_property_access_on_nullish_throws() {
    let err = run("let x = null; x.prop").unwrap_err();
    let VmError::Runtime(err) = err else {
        panic!("expected runtime error");
    };
    assert!(err.diagnostic.message.contains("TypeError"));
}

#[test]
fn test_upvalues_closed_during_unwind() {
    let source = r#"
        let escape = undefined;
        function build() {
            let captured = "alive";
            escape = () => captured;
            throw "unwound";
        }
        try { build(); } catch (e) {}
        escape()
    "#;
    assert_eq!(eval(source), Value::String("alive".into()));
}
