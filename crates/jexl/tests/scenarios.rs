//! End-to-end evaluation scenarios covering the documented surface:
//! precedence, antish variables, safe navigation, locals, lambdas with
//! loops, interpolation, namespaces and the ternary/empty operators.

use std::sync::Arc;

use jexl::{ClassDescriptor, Engine, EngineBuilder, MapContext, Namespace, Value};

fn eval(source: &str) -> Value {
    eval_with(source, MapContext::new())
}

fn eval_with(source: &str, mut ctx: MapContext) -> Value {
    let engine = Engine::new();
    let script = engine.create_script(source).expect("parses");
    script.execute(&mut ctx).expect("evaluates")
}

/// `*` binds tighter than `+`.
#[test]
fn precedence() {
    assert_eq!(eval("1 + 2 * 3"), Value::Int(7));
    assert_eq!(eval("(1 + 2) * 3"), Value::Int(9));
}

/// A dotted context key wins over member navigation (antish resolution is
/// on by default).
#[test]
fn antish_variable() {
    let ctx = MapContext::new().with("x.y.z", 42i64);
    assert_eq!(eval_with("x.y.z", ctx), Value::Int(42));
}

/// Safe navigation turns a null receiver into a null result.
#[test]
fn safe_navigation() {
    let ctx = MapContext::new().with("a", Value::Null);
    assert_eq!(eval_with("a?.b?.c", ctx), Value::Null);
}

/// Locals declare, reassign and read back.
#[test]
fn locals() {
    assert_eq!(eval("var x = 1; x = x + 2; x"), Value::Int(3));
}

/// An immediately-invoked lambda with a loop over a range.
#[test]
fn lambda_with_loop() {
    assert_eq!(
        eval("(i) -> { var s = 0; for (var k : 1..i) s = s + k; s }(5)"),
        Value::Int(15)
    );
}

/// Double-quoted strings interpolate `${...}`.
#[test]
fn interpolation() {
    let ctx = MapContext::new().with("who", "world");
    assert_eq!(eval_with(r#""hello ${who}""#, ctx), Value::string("hello world"));
}

/// Namespace calls dispatch to registered static methods.
#[test]
fn namespace_call() {
    let math = ClassDescriptor::new("host.Math").method("max", 2, |_, args| {
        match (&args[0], &args[1]) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(*a.max(b))),
            _ => Err("max expects two integers".to_string()),
        }
    });
    let engine = EngineBuilder::new()
        .namespace("math", Namespace::Class(Arc::new(math)))
        .create();
    let script = engine.create_script("math:max(a, b)").unwrap();
    let mut ctx = MapContext::new().with("a", 3i64).with("b", 7i64);
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(7));
}

/// `empty` composes with the ternary.
#[test]
fn empty_ternary() {
    let ctx = MapContext::new().with("xs", Value::list(vec![]));
    assert_eq!(eval_with("empty(xs) ? 'y' : 'n'", ctx), Value::string("y"));
    let ctx = MapContext::new().with("xs", Value::list(vec![Value::Int(1)]));
    assert_eq!(eval_with("empty(xs) ? 'y' : 'n'", ctx), Value::string("n"));
}

/// The Elvis form returns the condition value itself when truthy.
#[test]
fn elvis() {
    let ctx = MapContext::new().with("a", "kept");
    assert_eq!(eval_with("a ?: 'fallback'", ctx), Value::string("kept"));
    let ctx = MapContext::new().with("a", Value::Null);
    assert_eq!(eval_with("a ?: 'fallback'", ctx), Value::string("fallback"));
}

/// Null coalescing keeps a non-null (even falsy) left side.
#[test]
fn null_coalesce() {
    let ctx = MapContext::new().with("a", 0i64);
    assert_eq!(eval_with("a ?? 9", ctx), Value::Int(0));
    let ctx = MapContext::new().with("a", Value::Null);
    assert_eq!(eval_with("a ?? 9", ctx), Value::Int(9));
}

/// Collection and map literals evaluate and index.
#[test]
fn literals_and_indexing() {
    assert_eq!(eval("var l = [1, 2, 3]; l[1]"), Value::Int(2));
    assert_eq!(eval("var m = {'a' : 10, 'b' : 20}; m['b']"), Value::Int(20));
    assert_eq!(eval("var m = {'a' : 10}; m.a"), Value::Int(10));
    assert_eq!(eval("var s = {1, 2, 2, 3}; s.size()"), Value::Int(3));
    assert_eq!(eval("var m = {:}; m.size()"), Value::Int(0));
    assert_eq!(eval("'abc'[1]"), Value::string("b"));
}

/// Ranges are inclusive and iterable in either direction.
#[test]
fn ranges() {
    assert_eq!(eval("var s = 0; for (var i : 1..4) s = s + i; s"), Value::Int(10));
    assert_eq!(eval("var s = 0; for (var i : 3..1) s = s + i; s"), Value::Int(6));
    assert_eq!(eval("2 =~ 1..3"), Value::Bool(true));
    assert_eq!(eval("5 =~ 1..3"), Value::Bool(false));
}

/// Matching against strings treats the right side as a pattern.
#[test]
fn matching() {
    assert_eq!(eval("'abc' =~ 'a.c'"), Value::Bool(true));
    assert_eq!(eval("'abc' !~ 'a.d'"), Value::Bool(true));
    assert_eq!(eval("'abcdef' =^ 'abc'"), Value::Bool(true));
    assert_eq!(eval("'abcdef' =$ 'def'"), Value::Bool(true));
    assert_eq!(eval("2 in [1, 2, 3]"), Value::Bool(true));
}

/// Word operators parse like their symbolic forms.
#[test]
fn word_operators() {
    assert_eq!(eval("1 lt 2 and 3 gt 2"), Value::Bool(true));
    assert_eq!(eval("1 eq 1 or false"), Value::Bool(true));
    assert_eq!(eval("not false"), Value::Bool(true));
}

/// Lambdas are first-class: stored, passed and called.
#[test]
fn first_class_lambdas() {
    assert_eq!(eval("var f = (a, b) -> a * b; f(6, 7)"), Value::Int(42));
    assert_eq!(eval("var f = function(a) { a + 1 }; f(1)"), Value::Int(2));
    assert_eq!(eval("var twice = (f, x) -> f(f(x)); twice((n) -> n * 3, 2)"), Value::Int(18));
}
