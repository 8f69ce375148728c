//! Engine surface: expression cache, option flags, variable collection,
//! parsed-text round-trips, deferred callables, thread context, pragmas,
//! namespace functors and error rendering.

use std::{
    cell::RefCell,
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use jexl::{
    Engine, EngineBuilder, ErrorKind, JexlContext, MapContext, MapKey, Namespace, NamespaceFunctor, Options,
    RecordingTracer, SharedContext, TraceEvent, Value,
};
use pretty_assertions::assert_eq;

fn eval(source: &str) -> Value {
    Engine::new()
        .create_script(source)
        .expect("parses")
        .execute(&mut MapContext::new())
        .expect("evaluates")
}

/// Repeated creation of the same small expression hits the cache; results
/// stay equivalent either way.
#[test]
fn expression_cache_reuse() {
    let engine = Engine::new();
    let first = engine.create_expression("1 + 2").unwrap();
    let second = engine.create_expression("1 + 2").unwrap();
    assert_eq!(engine.cached_expressions(), 1);
    assert_eq!(first.evaluate(&mut MapContext::new()).unwrap(), Value::Int(3));
    assert_eq!(second.evaluate(&mut MapContext::new()).unwrap(), Value::Int(3));

    let uncached = EngineBuilder::new().cache(0).create();
    uncached.create_expression("1 + 2").unwrap();
    uncached.create_expression("1 + 2").unwrap();
    assert_eq!(uncached.cached_expressions(), 0);
    assert_eq!(
        uncached
            .create_expression("1 + 2")
            .unwrap()
            .evaluate(&mut MapContext::new())
            .unwrap(),
        Value::Int(3)
    );
}

/// Sources above the threshold bypass the cache.
#[test]
fn cache_threshold() {
    let engine = Engine::new();
    let long = format!("1 + {}", "0 + ".repeat(20) + "2");
    assert!(long.len() > 64);
    engine.create_expression(&long).unwrap();
    assert_eq!(engine.cached_expressions(), 0);
    engine.create_expression("1 + 2").unwrap();
    assert_eq!(engine.cached_expressions(), 1);
}

/// The flag-string syntax toggles exactly the documented names.
#[test]
fn option_flag_strings() {
    let mut options = Options::default();
    options
        .set_flags(["+lexical", "-strict", "silent", "+booleanLogical", "-cancellable"])
        .unwrap();
    assert!(options.lexical());
    assert!(!options.strict());
    assert!(options.silent());
    assert!(options.boolean_logical());
    assert!(!options.cancellable());
    assert!(options.set_flags(["+noSuchFlag"]).is_err());

    let engine = EngineBuilder::new().flags("-strict").unwrap().create();
    assert_eq!(
        engine
            .create_script("missing")
            .unwrap()
            .execute(&mut MapContext::new())
            .unwrap(),
        Value::Null
    );
}

/// `variables()` reports free dotted references, excluding locals.
#[test]
fn variable_collection() {
    let engine = Engine::new();
    let script = engine.create_script("var x = 1; a.b + c + x").unwrap();
    let vars = script.variables();
    let expected: Vec<Vec<String>> = vec![
        vec!["a".to_string(), "b".to_string()],
        vec!["c".to_string()],
    ];
    assert_eq!(vars.into_iter().collect::<Vec<_>>(), expected);
}

/// Printing a parsed tree and reparsing it is a fixpoint.
#[test]
fn parsed_text_round_trip() {
    let sources = [
        "1 + 2 * 3;",
        "(a + b) * c;",
        "var x = 1; x = x + 2; x;",
        "if (a < 3) { 'low' } else { 'high' }",
        "var f = (a, b) -> a * b; f(2, 3);",
        "for (var i : 1..5) { s = s + i; }",
        "while (n > 0) { n = n - 1; }",
        "do { n = n + 1; } while (n < 3);",
        "a?.b?.c;",
        "x.y.z;",
        "m['k'] = 1 .. 3;",
        "empty(xs) ? 'y' : 'n';",
        "a ?: b;",
        "v ?? 'dflt';",
        "var l = [1, 2.5, 'three', true, null];",
        "var m = {'a' : 1, 'b' : 2};",
        "var s = {1, 2, 3};",
        "var e = {:};",
        "`t ${a + 1} u`;",
        "x =~ 'a.c' && y =^ 'pre' || z =$ 'post';",
        "1h + 2.5b - 3;",
        "@silent 1 / 0;",
        "-x + !y - ~z;",
        "new('host.Point', 1, 2);",
        "ns:fn(1, 2);",
        r"'it\'s' + 'quoted';",
    ];
    let engine = Engine::new();
    for source in sources {
        let printed = engine
            .create_script(source)
            .unwrap_or_else(|e| panic!("{source}: {e}"))
            .parsed_text();
        let reprinted = engine
            .create_script(&printed)
            .unwrap_or_else(|e| panic!("printed form of {source:?} failed to reparse: {printed:?}: {e}"))
            .parsed_text();
        assert_eq!(printed, reprinted, "source: {source}");
    }
}

/// The deferred callable re-runs against any context.
#[test]
fn deferred_callable() {
    let engine = Engine::new();
    let script = engine.create_script_with_params("base + n", &["n"]).unwrap();
    let callable = script.callable(vec![Value::Int(2)]);
    let mut ctx = MapContext::new().with("base", 10i64);
    assert_eq!(callable.call(&mut ctx).unwrap(), Value::Int(12));
    let mut ctx = MapContext::new().with("base", 100i64);
    assert_eq!(callable.call(&mut ctx).unwrap(), Value::Int(102));
}

/// The engine publishes and restores a per-thread context slot.
#[test]
fn thread_context_slot() {
    let engine = Engine::new();
    assert!(engine.thread_context().is_none());
    let shared: SharedContext = Rc::new(RefCell::new(MapContext::new().with("n", 5i64)));
    engine.set_thread_context(Some(shared));
    let fetched = engine.thread_context().expect("published");
    assert_eq!(fetched.borrow().get("n"), Some(Value::Int(5)));
    engine.set_thread_context(None);
    assert!(engine.thread_context().is_none());
}

/// Context recording the pragmas it is handed.
#[derive(Debug, Default)]
struct PragmaContext {
    inner: MapContext,
    seen: Vec<(String, String)>,
}

impl JexlContext for PragmaContext {
    fn get(&self, name: &str) -> Option<Value> {
        self.inner.get(name)
    }

    fn set(&mut self, name: &str, value: Value) {
        self.inner.set(name, value);
    }

    fn has(&self, name: &str) -> bool {
        self.inner.has(name)
    }

    fn process_pragma(&mut self, key: &str, value: &Value) {
        self.seen.push((key.to_string(), value.to_string()));
    }
}

/// Pragmas reach the context before interpretation, in order; the reserved
/// `jexl.options` pragma adjusts the evaluation's own options.
#[test]
fn pragmas() {
    let engine = Engine::new();
    let mut ctx = PragmaContext::default();
    let script = engine
        .create_script("#pragma app.mode 'fast'\n#pragma app.level 3\n1 + 1")
        .unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(2));
    assert_eq!(
        ctx.seen,
        vec![
            ("app.mode".to_string(), "fast".to_string()),
            ("app.level".to_string(), "3".to_string()),
        ]
    );

    // '-strict' applies to this evaluation only
    let script = engine.create_script("#pragma jexl.options '-strict'\nmissing").unwrap();
    assert_eq!(script.execute(&mut MapContext::new()).unwrap(), Value::Null);
    let err = engine
        .create_script("missing")
        .unwrap()
        .execute(&mut MapContext::new())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Variable(jexl::VariableIssue::Undefined));
}

/// A namespace functor runs once per evaluation, however many calls the
/// script makes.
#[test]
fn namespace_functor_lifecycle() {
    #[derive(Debug)]
    struct Counter {
        created: Arc<AtomicUsize>,
    }

    impl NamespaceFunctor for Counter {
        fn create(&self, _ctx: &mut dyn JexlContext) -> Value {
            self.created.fetch_add(1, Ordering::SeqCst);
            let map = Value::map();
            if let Value::Map(m) = &map {
                m.borrow_mut().insert(MapKey::from_str_key("x"), Value::Int(5));
            }
            map
        }
    }

    let created = Arc::new(AtomicUsize::new(0));
    let engine = EngineBuilder::new()
        .namespace(
            "util",
            Namespace::Functor(Arc::new(Counter {
                created: Arc::clone(&created),
            })),
        )
        .create();
    let script = engine.create_script("util:get('x') + util:get('x')").unwrap();
    assert_eq!(script.execute(&mut MapContext::new()).unwrap(), Value::Int(10));
    assert_eq!(created.load(Ordering::SeqCst), 1);
    // a second evaluation creates a fresh instance
    script.execute(&mut MapContext::new()).unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 2);
}

/// Error messages carry `name@line:column` and a snippet of the offending
/// line.
#[test]
fn error_rendering() {
    let engine = Engine::new();
    let err = engine.create_script("1 +").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("@1:"), "got: {message}");
    assert!(message.contains("parsing error"), "got: {message}");
    assert!(message.contains("in '1 +'"), "got: {message}");

    // a long line renders a 42-character window
    let long = format!("{} § end", "a + ".repeat(20));
    let err = engine.create_script(&long).unwrap_err();
    let message = err.to_string();
    assert_eq!(err.kind, ErrorKind::Tokenization);
    assert!(message.contains("near '..."), "got: {message}");
}

/// The silent option downgrades evaluation errors to a traced null.
#[test]
fn silent_errors() {
    let tracer = Arc::new(RecordingTracer::new());
    let engine = EngineBuilder::new().silent(true).tracer(tracer.clone()).create();
    let result = engine
        .create_script("missing + 1")
        .unwrap()
        .execute(&mut MapContext::new())
        .unwrap();
    assert_eq!(result, Value::Null);
    assert!(tracer.take().iter().any(|e| matches!(e, TraceEvent::SilentError { .. })));

    // parse errors are never silenced
    assert!(engine.create_script("1 +").is_err());
}

/// Interpolation options: a lone `${expr}` unwraps by default and forces a
/// string under strict interpolation.
#[test]
fn interpolation_strictness() {
    assert_eq!(eval("`${1 + 2}`"), Value::Int(3));
    let engine = EngineBuilder::new().strict_interpolation(true).create();
    assert_eq!(
        engine
            .create_script("`${1 + 2}`")
            .unwrap()
            .execute(&mut MapContext::new())
            .unwrap(),
        Value::string("3")
    );
    assert_eq!(eval("`a ${1 + 2} b`"), Value::string("a 3 b"));
}

/// One engine, many evaluations: concurrent threads share the caches and
/// nothing else.
#[test]
fn concurrent_evaluations() {
    let engine = Engine::new();
    let mut handles = Vec::new();
    for n in 0..4 {
        let engine = engine.clone();
        handles.push(std::thread::spawn(move || {
            let script = engine.create_script("var s = 0; for (var i : 1..k) s = s + i; s").unwrap();
            let mut ctx = MapContext::new().with("k", i64::from(n) + 3);
            match script.execute(&mut ctx).unwrap() {
                Value::Int(total) => total,
                other => panic!("unexpected {other:?}"),
            }
        }));
    }
    let totals: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(totals, vec![6, 10, 15, 21]);
}
