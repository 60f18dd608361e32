//! Whole-pipeline scenarios: source through lexer, parser, compiler, VM,
//! and module loader.

use cli::{Session, SessionError, SessionOptions};
use core_types::Value;
use integration::session_with_files;

fn expr(source: &str) -> Value {
    let mut session = Session::new(".", SessionOptions::default());
    session.run_expression(source).expect("run")
}

#[test]
fn scenario_simple_arithmetic() {
    assert_eq!(expr("let x = 1 + 2; x"), Value::Int(3));
}

#[test]
fn scenario_recursive_factorial() {
    assert_eq!(
        expr("const f = (n) => n <= 1 ? 1 : n * f(n - 1); f(5)"),
        Value::Int(120)
    );
}

#[test]
fn scenario_insertion_order() {
    assert_eq!(
        expr(r#"let o = {}; for (let i = 0; i < 3; i++) { o["k" + i] = i; } Object.keys(o).join(",")"#),
        Value::String("k0,k1,k2".into())
    );
}

#[test]
fn scenario_two_modules_share_export_slot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = session_with_files(
        dir.path(),
        &[
            ("a.ts", "export const x = 1;"),
            ("b.ts", "import { x } from \"./a\";\nx + 1"),
        ],
    );
    let value = session.run_file("./b.ts").expect("load");
    assert_eq!(value, Value::Int(2));
}

#[test]
fn scenario_async_await_chain() {
    assert_eq!(
        expr("async function g() { return 42; } async function f() { return (await g()) + 1; } await f()"),
        Value::Int(43)
    );
}

#[test]
fn scenario_cycle_rejected_before_execution() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = session_with_files(
        dir.path(),
        &[
            ("a.ts", "import { b } from \"./b\";\nexport const a = 1;"),
            ("b.ts", "import { a } from \"./a\";\nexport const b = 2;"),
        ],
    );
    let err = session.run_file("./a.ts").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("circular dependency"), "got: {}", message);
    assert!(message.contains("a.ts"));
    assert!(message.contains("b.ts"));
}

#[test]
fn test_module_graph_with_json_and_expressions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = session_with_files(
        dir.path(),
        &[
            ("config.json", r#"{ "factor": 3 }"#),
            ("math.ts", "export function triple(n: number): number { return n * 3; }"),
            (
                "main.ts",
                "import config from \"./config.json\" with { type: \"json\" };\nimport { triple } from \"./math\";\ntriple(config.factor) + 1",
            ),
        ],
    );
    let value = session.run_file("./main.ts").expect("load");
    assert_eq!(value, Value::Int(10));
}

#[test]
fn test_repl_style_session_state() {
    let mut session = Session::new(".", SessionOptions::default());
    session.run_expression("let total = 0;").expect("declare");
    session.run_expression("total = total + 5;").expect("add");
    assert_eq!(session.run_expression("total").expect("read"), Value::Int(5));
}

#[test]
fn test_uncaught_error_formats_and_keeps_session() {
    let mut session = Session::new(".", SessionOptions::default());
    let err = session
        .run_expression("throw TypeError(\"nope\")")
        .unwrap_err();
    assert!(matches!(err, SessionError::Runtime { .. }));
    assert!(err.to_string().contains("nope"));
    // The session is still usable.
    assert_eq!(session.run_expression("2 + 2").expect("next"), Value::Int(4));
}

#[test]
fn test_strict_equality_reflexive_except_nan() {
    assert_eq!(expr("let v = 3; v === v"), Value::Boolean(true));
    assert_eq!(expr("let o = {}; o === o"), Value::Boolean(true));
    assert_eq!(expr("let n = NaN; n === n"), Value::Boolean(false));
}

#[test]
fn test_json_parse_stringify_shape_preserved() {
    assert_eq!(
        expr(r#"JSON.stringify(JSON.parse('{"a":1,"b":[true,null,"s"]}'))"#),
        Value::String(r#"{"a":1,"b":[true,null,"s"]}"#.into())
    );
}

#[test]
fn test_type_annotations_and_interfaces_erase() {
    let source = r#"
        interface Point { x: number; y: number }
        type Pair = Point | null;
        function len(p: Point): number { return p.x + p.y; }
        len({ x: 3, y: 4 })
    "#;
    assert_eq!(expr(source), Value::Int(7));
}

#[test]
fn test_native_module_reaches_user_code() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut session = session_with_files(
        dir.path(),
        &[(
            "main.ts",
            "import { version } from \"paserati/runtime\";\nversion",
        )],
    );
    session.register_native_module(
        "paserati/runtime",
        vec![("version".to_string(), Value::String("0.1.0".into()))],
    );
    let value = session.run_file("./main.ts").expect("load");
    assert_eq!(value, Value::String("0.1.0".into()));
}

#[test]
fn test_variadic_and_arity_boundaries() {
    assert_eq!(
        expr("function f(a, b, ...rest) { return rest.length * 100 + (b === undefined ? 10 : 0); } f(1)"),
        Value::Int(10)
    );
    assert_eq!(
        expr("function f(a, b, ...rest) { return rest.length; } f(1, 2, 3, 4, 5)"),
        Value::Int(3)
    );
}
