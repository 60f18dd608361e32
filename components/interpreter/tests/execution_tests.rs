//! End-to-end execution tests: source → chunk → VM.

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
fn test_arithmetic_expression() {
    assert_eq!(eval("let x = 1 + 2; x"), Value::Int(3));
}

#[test]
fn test_recursion_through_const_binding() {
    assert_eq!(
        eval("const f = (n) => n <= 1 ? 1 : n * f(n - 1); f(5)"),
        Value::Int(120)
    );
}

#[test]
fn test_insertion_order_preserved() {
    assert_eq!(
        eval(r#"let o = {}; for (let i = 0; i < 3; i++) { o["k" + i] = i; } Object.keys(o).join(",")"#),
        Value::String("k0,k1,k2".into())
    );
}

#[test]
fn test_string_concat_on_add() {
    assert_eq!(eval(r#""a" + 1 + 2"#), Value::String("a12".into()));
    assert_eq!(eval("1 + 2 + \"a\""), Value::String("3a".into()));
}

#[test]
fn test_division_semantics() {
    assert_eq!(eval("7 / 2"), Value::Number(3.5));
    assert_eq!(eval("8 / 2"), Value::Int(4));
    assert_eq!(eval("1 / 0"), Value::Number(f64::INFINITY));
}

#[test]
fn test_strict_equality() {
    assert_eq!(eval("1 === 1.0"), Value::Boolean(true));
    assert_eq!(eval("NaN === NaN"), Value::Boolean(false));
    assert_eq!(eval("-0 === 0"), Value::Boolean(true));
    assert_eq!(eval("'1' === 1"), Value::Boolean(false));
    assert_eq!(eval("'1' == 1"), Value::Boolean(true));
}

#[test]
fn test_closures_share_captured_cell() {
    let source = r#"
        function counter() {
            let n = 0;
            return { inc: () => { n = n + 1; return n; }, get: () => n };
        }
        const c = counter();
        c.inc(); c.inc();
        c.get()
    "#;
    assert_eq!(eval(source), Value::Int(2));
}

#[test]
fn test_upvalue_closed_at_block_exit() {
    let source = r#"
        let fns = [];
        for (let i = 0; i < 3; i++) {
            let captured = i;
            fns.push(() => captured);
        }
        fns[0]() + fns[1]() + fns[2]()
    "#;
    assert_eq!(eval(source), Value::Int(3));
}

#[test]
fn test_var_hoists_to_function_scope() {
    assert_eq!(
        eval("function f() { if (true) { var x = 5; } return x; } f()"),
        Value::Int(5)
    );
    // Hoisted but unassigned on the taken path: still bound, undefined.
    assert_eq!(
        eval("function f() { if (false) { var x = 5; } return typeof x; } f()"),
        Value::String("undefined".into())
    );
    // Top-level var in a block is script-scoped.
    assert_eq!(eval("{ var top = 3; } top"), Value::Int(3));
}

#[test]
fn test_missing_args_are_undefined() {
    assert_eq!(
        eval("function f(a, b) { return typeof b; } f(1)"),
        Value::String("undefined".into())
    );
}

#[test]
fn test_rest_args_gathered() {
    assert_eq!(
        eval("function f(a, ...rest) { return rest.length; } f(1, 2, 3, 4)"),
        Value::Int(3)
    );
    assert_eq!(
        eval("function f(a, ...rest) { return rest.length; } f(1)"),
        Value::Int(0)
    );
}

#[test]
fn test_calling_non_callable_throws_type_error() {
    let err = run("let x = 5; x()").unwrap_err();
    let VmError::Runtime(err) = err else {
        panic!("expected runtime error");
    };
    assert!(err.diagnostic.message.contains("TypeError"));
}

#[test]
fn test_while_and_break_continue() {
    let source = r#"
        let sum = 0;
        let i = 0;
        while (true) {
            i = i + 1;
            if (i > 10) { break; }
            if (i % 2 === 0) { continue; }
            sum = sum + i;
        }
        sum
    "#;
    assert_eq!(eval(source), Value::Int(25));
}

#[test]
fn test_ternary_and_logical() {
    assert_eq!(eval("true ? 1 : 2"), Value::Int(1));
    assert_eq!(eval("null ?? 'fallback'"), Value::String("fallback".into()));
    assert_eq!(eval("0 ?? 'fallback'"), Value::Int(0));
    assert_eq!(eval("0 || 'or'"), Value::String("or".into()));
    assert_eq!(eval("1 && 2"), Value::Int(2));
}

#[test]
fn test_delete_changes_shape_and_keys() {
    assert_eq!(
        eval(r#"let o = { a: 1, b: 2, c: 3 }; delete o.b; Object.keys(o).join(",")"#),
        Value::String("a,c".into())
    );
    assert_eq!(eval("let o = { a: 1 }; delete o.missing"), Value::Boolean(false));
}

#[test]
fn test_ic_restabilizes_after_delete() {
    // The same site sees the pre- and post-delete shapes and keeps agreeing
    // with full lookup.
    let source = r#"
        function read(o) { return o.x; }
        let o = { x: 1, y: 2 };
        let total = read(o) + read(o);
        delete o.y;
        total = total + read(o) + read(o);
        total
    "#;
    assert_eq!(eval(source), Value::Int(4));
}

#[test]
fn test_getter_invoked_with_receiver() {
    let source = r#"
        let o = { base: 10, get doubled() { return this.base * 2; } };
        o.doubled
    "#;
    assert_eq!(eval(source), Value::Int(20));
}

#[test]
fn test_setter_invoked() {
    let source = r#"
        let o = { stored: 0, set value(v) { this.stored = v * 10; } };
        o.value = 4;
        o.stored
    "#;
    assert_eq!(eval(source), Value::Int(40));
}

#[test]
fn test_typed_array_over_shared_buffer() {
    let source = r#"
        let buf = ArrayBuffer(8);
        let bytes = Uint8Array(buf);
        let ints = Int32Array(buf);
        ints[0] = 258;
        bytes[0] + bytes[1]
    "#;
    assert_eq!(eval(source), Value::Int(3));
}

#[test]
fn test_json_roundtrip() {
    assert_eq!(
        eval(r#"JSON.stringify(JSON.parse('{"a":[1,2],"b":"x"}'))"#),
        Value::String(r#"{"a":[1,2],"b":"x"}"#.into())
    );
}

#[test]
fn test_global_this_lookup() {
    assert_eq!(eval("globalThis['Infinity']"), Value::Number(f64::INFINITY));
    assert_eq!(
        eval("let named = 7; globalThis['named']"),
        Value::Int(7)
    );
}

#[test]
fn test_string_methods() {
    assert_eq!(eval("'hello'.toUpperCase()"), Value::String("HELLO".into()));
    assert_eq!(eval("'a,b,c'.split(',').length"), Value::Int(3));
    assert_eq!(eval("'hello'.length"), Value::Int(5));
}

#[test]
fn test_stack_overflow_is_range_error() {
    let err = run("function f() { return f(); } f()").unwrap_err();
    let VmError::Runtime(err) = err else {
        panic!("expected runtime error");
    };
    assert!(err.diagnostic.message.contains("RangeError"));
}

#[test]
fn test_cache_stats_observe_hits() {
    let mut vm = Vm::new();
    let mut heap = HeapAllocator::new();
    install_builtins(&mut vm, &mut heap, &[]);
    let program =
        parse_program("function f(o) { return o.x; } let o = { x: 1 }; f(o); f(o); f(o);")
            .expect("parse");
    let chunk = Compiler::new(&mut heap)
        .compile_script(&program)
        .expect("compile");
    vm.sync_global_names(&heap);
    vm.execute(&chunk).expect("run");
    let stats = vm.cache_stats();
    assert!(stats.hits >= 2, "expected cache hits, got {:?}", stats);
    assert!(stats.misses >= 1);
}
