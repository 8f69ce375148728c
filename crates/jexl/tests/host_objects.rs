//! Host-object dispatch: descriptors, duck typing, operator overloads,
//! equality/ordering delegates, constructors, permissions, sandboxing and
//! the resolution cache.

use std::{cell::RefCell, rc::Rc};

use jexl::{
    ClassDescriptor, Engine, EngineBuilder, ErrorKind, HostObject, JexlOperator, JexlPermissions, MapContext,
    Sandbox, Value,
};

#[derive(Debug)]
struct Point {
    x: RefCell<i64>,
    y: i64,
}

impl HostObject for Point {
    fn class_name(&self) -> &str {
        "host.Point"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn point_of(value: &Value) -> Result<&Point, String> {
    match value {
        Value::Object(obj) => obj
            .as_any()
            .downcast_ref::<Point>()
            .ok_or_else(|| "not a Point".to_string()),
        _ => Err("not an object".to_string()),
    }
}

fn new_point(x: i64, y: i64) -> Value {
    Value::object(Rc::new(Point {
        x: RefCell::new(x),
        y,
    }))
}

fn int_arg(value: &Value) -> Result<i64, String> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(format!("expected an integer, got {}", other.type_name())),
    }
}

fn point_descriptor() -> ClassDescriptor {
    ClassDescriptor::new("host.Point")
        .getter("x", |recv| Ok(Value::Int(*point_of(recv)?.x.borrow())))
        .getter("y", |recv| Ok(Value::Int(point_of(recv)?.y)))
        .setter("x", |recv, value| {
            *point_of(recv)?.x.borrow_mut() = int_arg(value)?;
            Ok(())
        })
        .method("shifted", 1, |recv, args| {
            let p = point_of(recv)?;
            let dx = int_arg(&args[0])?;
            Ok(new_point(*p.x.borrow() + dx, p.y))
        })
        .constructor(2, |args| Ok(new_point(int_arg(&args[0])?, int_arg(&args[1])?)))
        .operator(JexlOperator::Add, |lhs, rhs| {
            let (a, b) = (point_of(lhs)?, point_of(rhs)?);
            Ok(new_point(*a.x.borrow() + *b.x.borrow(), a.y + b.y))
        })
        .equals_with(|lhs, rhs| match (point_of(lhs), point_of(rhs)) {
            (Ok(a), Ok(b)) => *a.x.borrow() == *b.x.borrow() && a.y == b.y,
            _ => false,
        })
}

fn point_engine() -> Engine {
    EngineBuilder::new().register_class(point_descriptor()).create()
}

/// Bean getters resolve dotted property reads on objects.
#[test]
fn property_read() {
    let engine = point_engine();
    let mut ctx = MapContext::new().with("p", new_point(3, 4));
    let script = engine.create_script("p.x + p.y").unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(7));
}

/// Setters write through; the mutation is visible to the host.
#[test]
fn property_write() {
    let engine = point_engine();
    let point = new_point(1, 2);
    let mut ctx = MapContext::new().with("p", point.clone());
    engine.create_script("p.x = 9;").unwrap().execute(&mut ctx).unwrap();
    assert_eq!(*point_of(&point).unwrap().x.borrow(), 9);
}

/// Methods resolve by name and argument count.
#[test]
fn method_call() {
    let engine = point_engine();
    let mut ctx = MapContext::new().with("p", new_point(3, 4));
    let script = engine.create_script("p.shifted(10).x").unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(13));
}

/// An unresolvable method reports its pretty-printed signature.
#[test]
fn method_signature_in_error() {
    let engine = point_engine();
    let mut ctx = MapContext::new().with("p", new_point(0, 0));
    let err = engine
        .create_script("p.frobnicate(1, 'a')")
        .unwrap()
        .execute(&mut ctx)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Method);
    assert!(err.detail.contains("frobnicate(integer, string)"), "got: {}", err.detail);
}

/// `new('class', args...)` dispatches to the registered constructor, also
/// through import prefixes.
#[test]
fn constructors() {
    let engine = point_engine();
    let script = engine.create_script("new('host.Point', 2, 3).y").unwrap();
    assert_eq!(script.execute(&mut MapContext::new()).unwrap(), Value::Int(3));

    let engine = EngineBuilder::new()
        .register_class(point_descriptor())
        .imports(["host"])
        .create();
    let script = engine.create_script("new('Point', 2, 3).x").unwrap();
    assert_eq!(script.execute(&mut MapContext::new()).unwrap(), Value::Int(2));
}

/// A registered operator overload short-circuits built-in arithmetic.
#[test]
fn operator_overload() {
    let engine = point_engine();
    let mut ctx = MapContext::new().with("a", new_point(1, 2)).with("b", new_point(10, 20));
    let script = engine.create_script("(a + b).x").unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(11));
}

/// The equality delegate backs `==`; objects without one compare by
/// identity.
#[test]
fn equality_delegate() {
    let engine = point_engine();
    let mut ctx = MapContext::new()
        .with("a", new_point(1, 2))
        .with("b", new_point(1, 2))
        .with("c", new_point(9, 9));
    assert_eq!(
        engine.create_script("a == b").unwrap().execute(&mut ctx).unwrap(),
        Value::Bool(true)
    );
    assert_eq!(
        engine.create_script("a == c").unwrap().execute(&mut ctx).unwrap(),
        Value::Bool(false)
    );
}

/// The ordering delegate backs the relational operators.
#[test]
fn compare_delegate() {
    let descriptor = ClassDescriptor::new("host.Money")
        .compare_with(|lhs, rhs| match (money(lhs), money(rhs)) {
            (Some(a), Some(b)) => Ok(a.cmp(&b)),
            _ => Err("money comparison expects money".to_string()),
        });
    let engine = EngineBuilder::new().register_class(descriptor).create();
    let mut ctx = MapContext::new().with("a", money_value(5)).with("b", money_value(8));
    assert_eq!(
        engine.create_script("a < b").unwrap().execute(&mut ctx).unwrap(),
        Value::Bool(true)
    );
    assert_eq!(
        engine.create_script("a >= b").unwrap().execute(&mut ctx).unwrap(),
        Value::Bool(false)
    );
}

#[derive(Debug)]
struct Money(i64);

impl HostObject for Money {
    fn class_name(&self) -> &str {
        "host.Money"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn money(value: &Value) -> Option<i64> {
    match value {
        Value::Object(obj) => obj.as_any().downcast_ref::<Money>().map(|m| m.0),
        _ => None,
    }
}

fn money_value(amount: i64) -> Value {
    Value::object(Rc::new(Money(amount)))
}

/// Duck hooks answer ahead of descriptor resolution.
#[derive(Debug)]
struct Bag;

impl HostObject for Bag {
    fn class_name(&self) -> &str {
        "host.Bag"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn duck_get(&self, key: &str) -> Option<Value> {
        (key == "anything").then(|| Value::string("ducked"))
    }
}

#[test]
fn duck_typing() {
    let engine = Engine::new();
    let mut ctx = MapContext::new().with("bag", Value::object(Rc::new(Bag)));
    let script = engine.create_script("bag.anything").unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::string("ducked"));
}

/// Restricted permissions deny dangerous classes on every path: property,
/// method and constructor; denied members read as missing.
#[test]
fn restricted_permissions() {
    let runtime = ClassDescriptor::new("java.lang.Runtime")
        .getter("version", |_| Ok(Value::Int(17)))
        .method("exec", 1, |_, _| Ok(Value::string("boom")))
        .constructor(0, |_| Err("never".to_string()));
    let engine = EngineBuilder::new().register_class(runtime).create();
    let mut ctx = MapContext::new().with(
        "rt",
        Value::object(Rc::new(RuntimeObj)),
    );
    let err = engine.create_script("rt.version").unwrap().execute(&mut ctx).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Property { .. }));
    let err = engine.create_script("rt.exec('ls')").unwrap().execute(&mut ctx).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Method);
    let err = engine
        .create_script("new('java.lang.Runtime')")
        .unwrap()
        .execute(&mut MapContext::new())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Method);
}

#[derive(Debug)]
struct RuntimeObj;

impl HostObject for RuntimeObj {
    fn class_name(&self) -> &str {
        "java.lang.Runtime"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Unrestricted permissions open the same paths back up.
#[test]
fn unrestricted_permissions() {
    let runtime = ClassDescriptor::new("java.lang.Runtime").getter("version", |_| Ok(Value::Int(17)));
    let engine = EngineBuilder::new()
        .permissions(JexlPermissions::Unrestricted)
        .register_class(runtime)
        .create();
    let mut ctx = MapContext::new().with("rt", Value::object(Rc::new(RuntimeObj)));
    assert_eq!(
        engine.create_script("rt.version").unwrap().execute(&mut ctx).unwrap(),
        Value::Int(17)
    );
}

/// Parsed permission sets allow by package and deny listed members.
#[test]
fn parsed_permissions() {
    let permissions = JexlPermissions::parse(&["host.*", "host.Point { y }"]).unwrap();
    let engine = EngineBuilder::new()
        .permissions(permissions)
        .register_class(point_descriptor())
        .create();
    let mut ctx = MapContext::new().with("p", new_point(1, 2));
    assert_eq!(
        engine.create_script("p.x").unwrap().execute(&mut ctx).unwrap(),
        Value::Int(1)
    );
    let err = engine.create_script("p.y").unwrap().execute(&mut ctx).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Property { .. }));
}

/// The sandbox restricts reads, writes and calls per class.
#[test]
fn sandbox_gating() {
    let mut sandbox = Sandbox::new();
    sandbox
        .restrict("host.Point")
        .read_only(["x"])
        .deny_write(["x"])
        .deny_execute(["shifted"]);
    let engine = EngineBuilder::new()
        .sandbox(sandbox)
        .register_class(point_descriptor())
        .create();
    let mut ctx = MapContext::new().with("p", new_point(1, 2));
    assert_eq!(
        engine.create_script("p.x").unwrap().execute(&mut ctx).unwrap(),
        Value::Int(1)
    );
    let err = engine.create_script("p.y").unwrap().execute(&mut ctx).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Property { .. }));
    let err = engine.create_script("p.x = 5;").unwrap().execute(&mut ctx).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Property { .. }));
    let err = engine.create_script("p.shifted(1)").unwrap().execute(&mut ctx).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Method);
}

/// Member resolutions cache per class and invalidate wholesale on a
/// generation bump.
#[test]
fn resolution_cache() {
    let engine = point_engine();
    assert_eq!(engine.cached_member_resolutions(), 0);
    let mut ctx = MapContext::new().with("p", new_point(1, 2));
    let script = engine.create_script("p.x").unwrap();
    script.execute(&mut ctx).unwrap();
    let after_first = engine.cached_member_resolutions();
    assert!(after_first >= 1);
    script.execute(&mut ctx).unwrap();
    assert_eq!(engine.cached_member_resolutions(), after_first);
    engine.bump_class_generation();
    assert_eq!(engine.cached_member_resolutions(), 0);
    // resolution still works after invalidation
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(1));
}

/// Misses cache too: a denied or absent member resolves once and is then
/// served from the cache as a miss.
#[test]
fn miss_caching() {
    let engine = EngineBuilder::new()
        .strict(false)
        .register_class(point_descriptor())
        .create();
    let mut ctx = MapContext::new().with("p", new_point(1, 2));
    let script = engine.create_script("p.nothere").unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Null);
    let cached = engine.cached_member_resolutions();
    assert!(cached >= 1);
    script.execute(&mut ctx).unwrap();
    assert_eq!(engine.cached_member_resolutions(), cached);
}
