//! Operator semantics over the numeric tower, end to end.

use jexl::{Engine, EngineBuilder, ErrorKind, MapContext, Value};
use num_bigint::BigInt;

fn eval(source: &str) -> Value {
    Engine::new()
        .create_script(source)
        .expect("parses")
        .execute(&mut MapContext::new())
        .expect("evaluates")
}

fn eval_lenient(source: &str, mut ctx: MapContext) -> Value {
    EngineBuilder::new()
        .strict_arithmetic(false)
        .create()
        .create_script(source)
        .expect("parses")
        .execute(&mut ctx)
        .expect("evaluates")
}

/// Integer overflow promotes to arbitrary precision instead of wrapping.
#[test]
fn overflow_promotes() {
    let max = i64::MAX;
    let result = eval(&format!("{max} + 1"));
    match result {
        Value::BigInt(b) => assert_eq!(*b, BigInt::from(max) + 1),
        other => panic!("expected a big integer, got {other:?}"),
    }
    let result = eval(&format!("{max} * 2"));
    assert!(matches!(result, Value::BigInt(_)));
}

/// Big-integer literals use the `h` suffix; results narrow back when they
/// fit 64 bits.
#[test]
fn bigint_literals_and_narrowing() {
    assert_eq!(eval("10000000000000000000h - 9999999999999999999h"), Value::Int(1));
    assert!(matches!(eval("10000000000000000000h + 1"), Value::BigInt(_)));
}

/// Integer division stays integral when exact, widens to a decimal when
/// not; doubles keep IEEE semantics.
#[test]
fn division() {
    assert_eq!(eval("6 / 3"), Value::Int(2));
    assert_eq!(eval("7 / 2"), Value::Float(3.5));
    assert!(matches!(eval("7 / 2"), Value::Decimal(_)));
    assert_eq!(eval("1.0 / 2"), Value::Float(0.5));
    assert!(matches!(eval("1.0 / 2"), Value::Float(_)));
    assert_eq!(eval("1.0 / 0.0"), Value::Float(f64::INFINITY));
}

/// Division and modulo by integer zero raise under strict arithmetic and
/// yield zero when lenient.
#[test]
fn divide_by_zero() {
    let engine = Engine::new();
    let err = engine
        .create_script("1 / 0")
        .unwrap()
        .execute(&mut MapContext::new())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Operator);
    assert_eq!(eval_lenient("1 / 0", MapContext::new()), Value::Int(0));
    assert_eq!(eval_lenient("1 % 0", MapContext::new()), Value::Int(0));
}

/// Decimal operands promote the whole expression to decimals; `0.1b + 0.2b`
/// is exact.
#[test]
fn decimal_exactness() {
    assert_eq!(eval("0.1b + 0.2b"), eval("0.3b"));
    assert_eq!(eval("1.5b * 2"), eval("3.0b"));
    assert!(matches!(eval("0.1b + 1"), Value::Decimal(_)));
}

/// `+` with a string on either side concatenates.
#[test]
fn string_concatenation() {
    assert_eq!(eval("'a' + 1"), Value::string("a1"));
    assert_eq!(eval("1 + 'a'"), Value::string("1a"));
    assert_eq!(eval("'a' + 'b'"), Value::string("ab"));
}

/// Under strict arithmetic any null operand of a numeric operator raises
/// `NullOperand`; under lenient arithmetic null coerces to zero or the
/// empty string.
#[test]
fn null_operands() {
    let engine = Engine::new(); // strict arithmetic by default
    for source in ["n + 1", "1 - n", "n * 2", "n / 2", "n % 2"] {
        let mut ctx = MapContext::new().with("n", Value::Null);
        let err = engine.create_script(source).unwrap().execute(&mut ctx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NullOperand, "source: {source}");
    }
    let ctx = MapContext::new().with("n", Value::Null);
    assert_eq!(eval_lenient("n + 1", ctx), Value::Int(1));
    let ctx = MapContext::new().with("n", Value::Null);
    assert_eq!(eval_lenient("n + 'x'", ctx), Value::string("x"));
}

/// `a + b` is total across the tower under lenient arithmetic.
#[test]
fn addition_is_total() {
    let operands = ["2", "3.5", "10000000000000000000h", "1.25b", "null", "'s'"];
    let engine = EngineBuilder::new().strict_arithmetic(false).create();
    for a in operands {
        for b in operands {
            let script = engine.create_script(&format!("{a} + {b}")).unwrap();
            script
                .execute(&mut MapContext::new())
                .unwrap_or_else(|err| panic!("{a} + {b} failed: {err}"));
        }
    }
}

/// Equality unifies the numeric tower; comparisons coerce numeric strings.
#[test]
fn comparisons() {
    assert_eq!(eval("1 == 1.0"), Value::Bool(true));
    assert_eq!(eval("1 == 1b"), Value::Bool(true));
    assert_eq!(eval("1 == '1'"), Value::Bool(false));
    assert_eq!(eval("'abc' < 'abd'"), Value::Bool(true));
    assert_eq!(eval("'10' > 9"), Value::Bool(true));
    assert_eq!(eval("2 <= 2"), Value::Bool(true));
    assert_eq!(eval("[1, 2] == [1, 2]"), Value::Bool(true));
    assert_eq!(eval("{'a' : 1} == {'a' : 1}"), Value::Bool(true));
}

/// Bitwise operators work over the integer tower; `>>>` is a logical shift
/// on the 64-bit pattern.
#[test]
fn bitwise_and_shifts() {
    assert_eq!(eval("6 & 3"), Value::Int(2));
    assert_eq!(eval("6 | 1"), Value::Int(7));
    assert_eq!(eval("6 ^ 3"), Value::Int(5));
    assert_eq!(eval("~0"), Value::Int(-1));
    assert_eq!(eval("1 << 4"), Value::Int(16));
    assert_eq!(eval("-8 >> 1"), Value::Int(-4));
    assert_eq!(eval("-1 >>> 60"), Value::Int(15));
    assert!(matches!(eval("1 << 80"), Value::BigInt(_)));
}

/// Unary operators across the tower.
#[test]
fn unary() {
    assert_eq!(eval("-(1 + 2)"), Value::Int(-3));
    assert_eq!(eval("-2.5"), Value::Float(-2.5));
    assert_eq!(eval("!true"), Value::Bool(false));
    assert_eq!(eval("!0"), Value::Bool(true));
    assert_eq!(eval("size('abc')"), Value::Int(3));
    assert_eq!(eval("size([1, 2])"), Value::Int(2));
    assert_eq!(eval("empty('')"), Value::Bool(true));
    assert_eq!(eval("empty(0)"), Value::Bool(true));
    assert_eq!(eval("empty('x')"), Value::Bool(false));
}

/// Logical operators return the deciding operand by default and coerced
/// booleans when `booleanLogical` is set.
#[test]
fn boolean_logical_option() {
    assert_eq!(eval("0 || 'x'"), Value::string("x"));
    assert_eq!(eval("5 && 0"), Value::Int(0));
    assert_eq!(eval("0 && 9"), Value::Int(0));
    let engine = EngineBuilder::new().boolean_logical(true).create();
    let mut ctx = MapContext::new();
    assert_eq!(
        engine.create_script("0 || 'x'").unwrap().execute(&mut ctx).unwrap(),
        Value::Bool(true)
    );
    assert_eq!(
        engine.create_script("5 && 0").unwrap().execute(&mut ctx).unwrap(),
        Value::Bool(false)
    );
}

/// The math context caps decimal division precision.
#[test]
fn math_context_precision() {
    use jexl::{MathContext, RoundingMode};
    let engine = EngineBuilder::new()
        .math_context(MathContext::new(5, RoundingMode::HalfEven))
        .create();
    let result = engine
        .create_script("1b / 3b")
        .unwrap()
        .execute(&mut MapContext::new())
        .unwrap();
    assert_eq!(result.to_string(), "0.33333");
}
