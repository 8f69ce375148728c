//! Variable and property navigation: antish resolution order, safe
//! navigation, strict/lenient missing references, dotted assignment.

use std::{cell::RefCell, sync::Arc};

use jexl::{Engine, EngineBuilder, ErrorKind, JexlContext, MapContext, RecordingTracer, TraceEvent, Value, VariableIssue};

fn eval_with(source: &str, mut ctx: MapContext) -> Value {
    Engine::new()
        .create_script(source)
        .expect("parses")
        .execute(&mut ctx)
        .expect("evaluates")
}

/// Context recording every `has` probe, for asserting resolution order.
#[derive(Debug, Default)]
struct ProbeContext {
    inner: MapContext,
    probes: RefCell<Vec<String>>,
}

impl JexlContext for ProbeContext {
    fn get(&self, name: &str) -> Option<Value> {
        self.inner.get(name)
    }

    fn set(&mut self, name: &str, value: Value) {
        self.inner.set(name, value);
    }

    fn has(&self, name: &str) -> bool {
        self.probes.borrow_mut().push(name.to_string());
        self.inner.has(name)
    }
}

/// Antish resolution probes prefixes longest-first: when `x.y` exists,
/// `x` alone is never probed.
#[test]
fn antish_probes_longest_prefix_first() {
    let mut inner = MapContext::new();
    let map = Value::map();
    if let Value::Map(m) = &map {
        m.borrow_mut().insert(jexl::MapKey::from_str_key("z"), Value::Int(42));
    }
    inner.set("x.y", map);
    let mut ctx = ProbeContext {
        inner,
        probes: RefCell::new(Vec::new()),
    };
    let engine = Engine::new();
    let script = engine.create_script("x.y.z").unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(42));
    let probes = ctx.probes.into_inner();
    assert_eq!(probes, vec!["x.y.z".to_string(), "x.y".to_string()]);
}

/// The full dotted key wins over any shorter prefix.
#[test]
fn antish_full_key_wins() {
    let mut ctx = MapContext::new().with("a.b", 1i64).with("a.b.c", 2i64);
    ctx.set("a", Value::Int(0));
    assert_eq!(eval_with("a.b.c", ctx), Value::Int(2));
}

/// With antish disabled, dotted names resolve the root variable and then
/// navigate members.
#[test]
fn antish_disabled() {
    let engine = EngineBuilder::new().antish(false).create();
    let map = Value::map();
    if let Value::Map(m) = &map {
        m.borrow_mut().insert(jexl::MapKey::from_str_key("b"), Value::Int(5));
    }
    let mut ctx = MapContext::new().with("a", map).with("a.b", 9i64);
    let script = engine.create_script("a.b").unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(5));
}

/// Safe mode turns a null receiver anywhere in the chain into a null
/// result and traces the event.
#[test]
fn safe_navigation_null_receiver() {
    let tracer = Arc::new(RecordingTracer::new());
    let engine = EngineBuilder::new().tracer(tracer.clone()).create();
    let mut ctx = MapContext::new().with("a", Value::Null);
    let script = engine.create_script("a.b.c").unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Null);
    assert!(
        tracer.take().iter().any(|e| matches!(e, TraceEvent::SafeNull { .. })),
        "safe null should be traced"
    );
}

/// With safe off, the same chain raises.
#[test]
fn unsafe_navigation_raises() {
    let engine = EngineBuilder::new().safe(false).create();
    let mut ctx = MapContext::new().with("a", Value::Null);
    let err = engine.create_script("a.b.c").unwrap().execute(&mut ctx).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Property { .. }), "got {:?}", err.kind);
}

/// Explicit `?.` works even when the engine-wide safe option is off.
#[test]
fn explicit_safe_operators() {
    let engine = EngineBuilder::new().safe(false).create();
    let mut ctx = MapContext::new().with("a", Value::Null);
    let script = engine.create_script("a?.b?.c").unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Null);
    let mut ctx = MapContext::new().with("xs", Value::Null);
    let script = engine.create_script("xs?[0]").unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Null);
}

/// Strict mode raises on undefined variables; lenient yields null.
#[test]
fn undefined_variables() {
    let engine = Engine::new();
    let err = engine
        .create_script("missing")
        .unwrap()
        .execute(&mut MapContext::new())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Variable(VariableIssue::Undefined));

    let lenient = EngineBuilder::new().strict(false).create();
    let result = lenient
        .create_script("missing")
        .unwrap()
        .execute(&mut MapContext::new())
        .unwrap();
    assert_eq!(result, Value::Null);
}

/// Strict mode raises on a missing map key; lenient yields null.
#[test]
fn missing_property() {
    let engine = Engine::new();
    let mut ctx = MapContext::new().with("m", Value::map());
    let err = engine.create_script("m.nope").unwrap().execute(&mut ctx).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Property { undefined: true });

    let lenient = EngineBuilder::new().strict(false).create();
    let mut ctx = MapContext::new().with("m", Value::map());
    assert_eq!(
        lenient.create_script("m.nope").unwrap().execute(&mut ctx).unwrap(),
        Value::Null
    );
}

/// Dotted assignment through an existing prefix writes the property; with
/// no matching prefix the whole dotted name becomes a context variable.
#[test]
fn antish_assignment() {
    let engine = Engine::new();
    let mut ctx = MapContext::new().with("m", Value::map());
    engine.create_script("m.k = 7;").unwrap().execute(&mut ctx).unwrap();
    assert_eq!(eval_with("m.k", ctx), Value::Int(7));

    let mut ctx = MapContext::new();
    engine.create_script("fresh.name = 'x';").unwrap().execute(&mut ctx).unwrap();
    assert_eq!(ctx.get("fresh.name"), Some(Value::string("x")));
}

/// Index assignment into lists and maps.
#[test]
fn index_assignment() {
    let engine = Engine::new();
    let mut ctx = MapContext::new().with("l", Value::list(vec![Value::Int(1), Value::Int(2)]));
    engine.create_script("l[1] = 9;").unwrap().execute(&mut ctx).unwrap();
    assert_eq!(eval_with("l[1]", ctx), Value::Int(9));

    let mut ctx = MapContext::new().with("m", Value::map());
    engine.create_script("m['k'] = 3;").unwrap().execute(&mut ctx).unwrap();
    assert_eq!(eval_with("m['k']", ctx), Value::Int(3));
}
