//! Async function, promise, and microtask ordering tests.

use compiler::{parse_program, Compiler};
use core_types::{HeapAllocator, PromiseState, Value};
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
    assert!(vm.microtasks_empty(), "drain left microtasks queued");
    // Top-level-await entries evaluate to the promise of their completion.
    if let Value::Promise(p) = &result {
        let p = p.borrow();
        assert_eq!(p.state, PromiseState::Fulfilled, "entry promise not settled");
        return Ok(p.value.clone());
    }
    Ok(result)
}

fn eval(source: &str) -> Value {
    run(source).expect("run")
}

#[test]
fn test_async_function_returns_promise() {
    let source = r#"
        async function f() { return 42; }
        let p = f();
        typeof p
    "#;
    assert_eq!(eval(source), Value::String("object".into()));
}

#[test]
fn test_await_chain() {
    let source = r#"
        async function g() { return 42; }
        async function f() { return (await g()) + 1; }
        await f()
    "#;
    assert_eq!(eval(source), Value::Int(43));
}

#[test]
fn test_await_non_promise_value() {
    let source = r#"
        async function f() { return (await 5) + 1; }
        await f()
    "#;
    assert_eq!(eval(source), Value::Int(6));
}

#[test]
fn test_await_rejection_is_thrown() {
    let source = r#"
        async function bad() { throw Error("nope"); }
        async function f() {
            try {
                await bad();
                return "unreachable";
            } catch (e) {
                return e.message;
            }
        }
        await f()
    "#;
    assert_eq!(eval(source), Value::String("nope".into()));
}

#[test]
fn test_unhandled_async_rejection_settles_promise() {
    let source = r#"
        async function bad() { throw "reason"; }
        let p = bad();
        p
    "#;
    let mut vm = Vm::new();
    let mut heap = HeapAllocator::new();
    install_builtins(&mut vm, &mut heap, &[]);
    let program = parse_program(source).expect("parse");
    let chunk = Compiler::new(&mut heap)
        .compile_script(&program)
        .expect("compile");
    vm.sync_global_names(&heap);
    let result = vm.execute(&chunk).expect("execute");
    let Value::Promise(p) = result else {
        panic!("expected promise");
    };
    assert_eq!(p.borrow().state, PromiseState::Rejected);
    assert_eq!(p.borrow().value, Value::String("reason".into()));
}

#[test]
fn test_then_callbacks_run_as_microtasks() {
    let source = r#"
        let order = [];
        Promise.resolve(1).then((v) => { order.push("then:" + v); });
        order.push("sync");
        await Promise.resolve(0);
        order.join(",")
    "#;
    assert_eq!(eval(source), Value::String("sync,then:1".into()));
}

#[test]
fn test_microtask_enqueued_during_drain_runs_same_pass() {
    let source = r#"
        let order = [];
        queueMicrotask(() => {
            order.push("first");
            queueMicrotask(() => { order.push("nested"); });
        });
        queueMicrotask(() => { order.push("second"); });
        await Promise.resolve(0);
        await Promise.resolve(0);
        order.join(",")
    "#;
    assert_eq!(eval(source), Value::String("first,second,nested".into()));
}

#[test]
fn test_promise_constructor_with_executor() {
    let source = r#"
        let p = new Promise((resolve, reject) => { resolve(7); });
        (await p) + 1
    "#;
    assert_eq!(eval(source), Value::Int(8));
}

#[test]
fn test_promise_chaining_through_then() {
    let source = r#"
        let final = 0;
        Promise.resolve(2).then((v) => v * 10).then((v) => { final = v + 1; });
        await Promise.resolve(0);
        await Promise.resolve(0);
        await Promise.resolve(0);
        final
    "#;
    assert_eq!(eval(source), Value::Int(21));
}

#[test]
fn test_catch_recovers_rejection() {
    let source = r#"
        let seen = "";
        Promise.reject("oops").catch((e) => { seen = e; });
        await Promise.resolve(0);
        seen
    "#;
    assert_eq!(eval(source), Value::String("oops".into()));
}

#[test]
fn test_awaited_functions_resume_in_settlement_order() {
    let source = r#"
        let order = [];
        async function worker(tag) {
            await 0;
            order.push(tag);
        }
        worker("a");
        worker("b");
        await Promise.resolve(0);
        await Promise.resolve(0);
        order.join(",")
    "#;
    assert_eq!(eval(source), Value::String("a,b".into()));
}

#[test]
fn test_exit_propagates_through_microtasks() {
    let source = r#"
        queueMicrotask(() => { process.exit(3); });
        await Promise.resolve(0);
        "unreachable"
    "#;
    let err = run(source).unwrap_err();
    assert!(matches!(err, VmError::Exit(3)));
}
