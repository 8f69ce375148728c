//! Run-time value representation.
//!
//! `Value` is a tagged union with a hybrid design: small immediate values
//! (null, booleans, 64-bit integers, doubles, ranges) are stored inline,
//! while larger or shared values (strings, big integers, decimals,
//! collections, host objects, lambdas) sit behind `Rc`. Cloning a value is
//! always cheap; collections share their interior, so mutation through one
//! clone is visible through all of them.
//!
//! Values are confined to the evaluating thread. The engine itself holds no
//! values, which is what keeps one engine usable from many threads at once.

use std::{
    cell::RefCell,
    cmp::Ordering,
    collections::hash_map::DefaultHasher,
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
    sync::Arc,
};

use ahash::RandomState;
use indexmap::{IndexMap, IndexSet};
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use regex::Regex;

use crate::{
    expressions::{Ast, LambdaId},
    types::{Decimal, IntRange},
    uberspect::HostObject,
};

/// Insertion-ordered mapping used by map literals and `{k: v}` values.
pub type ValueMap = IndexMap<MapKey, Value, RandomState>;
/// Insertion-ordered set used by set literals.
pub type ValueSet = IndexSet<MapKey, RandomState>;

/// A run-time value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    /// The primary integer representation. Overflow promotes to `BigInt`.
    Int(i64),
    /// Arbitrary-precision integer, produced by the `h` literal suffix or by
    /// integer overflow promotion.
    BigInt(Arc<BigInt>),
    Float(f64),
    /// Arbitrary-precision decimal, produced by the `b` literal suffix or by
    /// inexact integer division.
    Decimal(Arc<Decimal>),
    Str(Arc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<ValueMap>>),
    Set(Rc<RefCell<ValueSet>>),
    /// Lazy inclusive integer range built by `a..b`.
    Range(IntRange),
    /// A compiled regular expression; the right-hand side of `=~` accepts it.
    Pattern(Arc<Regex>),
    /// Opaque host object dispatched through the uberspect.
    Object(Rc<dyn HostObject>),
    /// A script lambda with its captured cells.
    Lambda(Rc<Closure>),
}

/// A lambda value: a reference into the defining script's syntax plus the
/// capture cells snapshotted at creation.
pub struct Closure {
    pub(crate) ast: Arc<Ast>,
    pub(crate) lambda: LambdaId,
    pub(crate) cells: Vec<CaptureCell>,
}

/// One captured slot carried by a closure.
///
/// `Shared` cells alias the defining frame's cell, so assignments are seen
/// on both sides. `Frozen` cells are a by-value snapshot; the const-capture
/// option decides which kind a closure gets.
#[derive(Debug, Clone)]
pub(crate) enum CaptureCell {
    Shared(Rc<RefCell<Value>>),
    Frozen(Value),
}

impl Closure {
    /// Parameter names of the underlying lambda.
    #[must_use]
    pub fn parameters(&self) -> Vec<String> {
        self.ast.lambda(self.lambda).parameters()
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Closure({})", self.ast.lambda_text(self.lambda))
    }
}

impl Value {
    /// Builds a string value.
    #[must_use]
    pub fn string(s: impl AsRef<str>) -> Self {
        Self::Str(Arc::from(s.as_ref()))
    }

    /// Builds a list value from the given elements.
    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    /// Builds an empty map value.
    #[must_use]
    pub fn map() -> Self {
        Self::Map(Rc::new(RefCell::new(ValueMap::default())))
    }

    /// Builds a big integer value, narrowing to `Int` when it fits.
    #[must_use]
    pub fn big_int(value: BigInt) -> Self {
        match value.to_i64() {
            Some(narrow) => Self::Int(narrow),
            None => Self::BigInt(Arc::new(value)),
        }
    }

    /// Wraps a host object.
    #[must_use]
    pub fn object(obj: Rc<dyn HostObject>) -> Self {
        Self::Object(obj)
    }

    /// Wraps a compiled pattern.
    #[must_use]
    pub fn pattern(re: Regex) -> Self {
        Self::Pattern(Arc::new(re))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Type label used in error messages and method signatures.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::BigInt(_) => "biginteger",
            Self::Float(_) => "float",
            Self::Decimal(_) => "decimal",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Set(_) => "set",
            Self::Range(_) => "range",
            Self::Pattern(_) => "pattern",
            Self::Object(_) => "object",
            Self::Lambda(_) => "lambda",
        }
    }

    /// Truthiness: null and zero and empty things are false, everything
    /// else is true.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::BigInt(b) => !num_traits::Zero::is_zero(&**b),
            Self::Float(f) => *f != 0.0,
            Self::Decimal(d) => !d.is_zero(),
            Self::Str(s) => !s.is_empty(),
            Self::List(l) => !l.borrow().is_empty(),
            Self::Map(m) => !m.borrow().is_empty(),
            Self::Set(s) => !s.borrow().is_empty(),
            Self::Range(_) | Self::Pattern(_) | Self::Object(_) | Self::Lambda(_) => true,
        }
    }

    /// Element count for sized values, `None` otherwise.
    #[must_use]
    pub fn length(&self) -> Option<usize> {
        match self {
            Self::Str(s) => Some(s.chars().count()),
            Self::List(l) => Some(l.borrow().len()),
            Self::Map(m) => Some(m.borrow().len()),
            Self::Set(s) => Some(s.borrow().len()),
            Self::Range(r) => usize::try_from(r.len()).ok(),
            _ => None,
        }
    }

    /// Converts from a JSON document; arrays become lists, objects become
    /// maps with string keys, numbers become `Int` when integral.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::string(s),
            serde_json::Value::Array(items) => Self::list(items.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(fields) => {
                let mut map = ValueMap::default();
                for (k, v) in fields {
                    map.insert(MapKey::from_str_key(k), Self::from_json(v));
                }
                Self::Map(Rc::new(RefCell::new(map)))
            }
        }
    }

    /// Converts to JSON where a faithful mapping exists; host objects,
    /// lambdas and patterns render as their display string.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::List(l) => serde_json::Value::Array(l.borrow().iter().map(Self::to_json).collect()),
            Self::Map(m) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in m.borrow().iter() {
                    obj.insert(k.value().to_string(), v.to_json());
                }
                serde_json::Value::Object(obj)
            }
            Self::Set(s) => serde_json::Value::Array(s.borrow().iter().map(|k| k.value().to_json()).collect()),
            other => serde_json::Value::String(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::BigInt(b) => write!(f, "{b}"),
            Self::Float(v) => {
                let mut buf = ryu::Buffer::new();
                f.write_str(buf.format(*v))
            }
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Str(s) => f.write_str(s),
            Self::List(l) => {
                f.write_str("[")?;
                for (i, item) in l.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(m) => {
                f.write_str("{")?;
                for (i, (k, v)) in m.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {v}", k.value())?;
                }
                f.write_str("}")
            }
            Self::Set(s) => {
                f.write_str("{")?;
                for (i, k) in s.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", k.value())?;
                }
                f.write_str("}")
            }
            Self::Range(r) => write!(f, "{r}"),
            Self::Pattern(p) => write!(f, "~/{}/", p.as_str()),
            Self::Object(o) => f.write_str(o.class_name()),
            Self::Lambda(c) => f.write_str(&c.ast.lambda_text(c.lambda)),
        }
    }
}

impl PartialEq for Value {
    /// Value equality across the numeric tower; see [`value_eq`].
    fn eq(&self, other: &Self) -> bool {
        value_eq(self, other)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::string(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::string(v)
    }
}

impl From<BigInt> for Value {
    fn from(v: BigInt) -> Self {
        Self::big_int(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Self::Decimal(Arc::new(v))
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::list(v)
    }
}

/// Numeric-tower-aware equality.
///
/// `1`, `1.0`, `1h` and `1b` are all equal. Strings compare by content,
/// collections element-wise, host objects and lambdas by identity. Values
/// of unrelated types are unequal; no error is possible.
#[must_use]
pub(crate) fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Range(x), Value::Range(y)) => x == y,
        (Value::Pattern(x), Value::Pattern(y)) => x.as_str() == y.as_str(),
        (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
        (Value::Lambda(x), Value::Lambda(y)) => Rc::ptr_eq(x, y),
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| value_eq(a, b))
        }
        (Value::Map(x), Value::Map(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|other| value_eq(v, other)))
        }
        (Value::Set(x), Value::Set(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().all(|k| y.contains(k))
        }
        _ => numeric_eq(a, b).unwrap_or(false),
    }
}

/// Cross-type numeric equality; `None` when either side is not numeric.
fn numeric_eq(a: &Value, b: &Value) -> Option<bool> {
    Some(numeric_cmp(a, b)? == Ordering::Equal)
}

/// Cross-type numeric ordering following the promotion ladder: decimal if
/// either side is decimal, else float if either side floats, else integer.
#[must_use]
pub(crate) fn numeric_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    if !is_numeric(a) || !is_numeric(b) {
        return None;
    }
    if matches!(a, Value::Decimal(_)) || matches!(b, Value::Decimal(_)) {
        return to_decimal(a)?.partial_cmp(&to_decimal(b)?);
    }
    if matches!(a, Value::Float(_)) || matches!(b, Value::Float(_)) {
        return to_f64(a)?.partial_cmp(&to_f64(b)?);
    }
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::BigInt(x), Value::BigInt(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::BigInt(y)) => Some(BigInt::from(*x).cmp(y)),
        (Value::BigInt(x), Value::Int(y)) => Some((**x).cmp(&BigInt::from(*y))),
        _ => None,
    }
}

#[must_use]
pub(crate) fn is_numeric(v: &Value) -> bool {
    matches!(
        v,
        Value::Int(_) | Value::BigInt(_) | Value::Float(_) | Value::Decimal(_)
    )
}

fn to_decimal(v: &Value) -> Option<Decimal> {
    match v {
        Value::Int(i) => Some(Decimal::from_i64(*i)),
        Value::BigInt(b) => Some(Decimal::from_bigint((**b).clone())),
        Value::Float(f) => Some(Decimal::from_f64(*f)),
        Value::Decimal(d) => Some((**d).clone()),
        _ => None,
    }
}

fn to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::BigInt(b) => b.to_f64(),
        Value::Float(f) => Some(*f),
        Value::Decimal(d) => Some(d.to_f64()),
        _ => None,
    }
}

/// A value usable as a map/set key.
///
/// Keys carry a precomputed hash unified across the numeric tower, so `1`,
/// `1.0` and `1h` address the same entry. Mutable containers, host objects
/// and lambdas are not hashable; [`MapKey::try_new`] rejects them.
#[derive(Debug, Clone)]
pub struct MapKey {
    value: Value,
    hash: u64,
}

impl MapKey {
    /// Wraps a hashable value, or reports the offending type name.
    pub fn try_new(value: Value) -> Result<Self, &'static str> {
        match key_hash(&value) {
            Some(hash) => Ok(Self { value, hash }),
            None => Err(value.type_name()),
        }
    }

    /// Key for a plain string; infallible.
    #[must_use]
    pub fn from_str_key(key: &str) -> Self {
        Self::try_new(Value::string(key)).expect("strings are hashable")
    }

    /// The wrapped value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consumes the key, returning the wrapped value.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }
}

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && value_eq(&self.value, &other.value)
    }
}

impl Eq for MapKey {}

impl Hash for MapKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Computes the unified key hash, or `None` for unhashable values.
fn key_hash(value: &Value) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    match value {
        Value::Null => 0u8.hash(&mut hasher),
        Value::Bool(b) => (1u8, b).hash(&mut hasher),
        Value::Int(i) => hash_integer(&mut hasher, &BigInt::from(*i)),
        Value::BigInt(b) => hash_integer(&mut hasher, b),
        Value::Float(f) => {
            // integral floats hash like the equal integer
            if f.fract() == 0.0 && f.is_finite() {
                hash_integer(&mut hasher, &BigInt::from(*f as i64));
            } else {
                (2u8, f.to_bits()).hash(&mut hasher);
            }
        }
        Value::Decimal(d) => {
            if d.is_integral() {
                hash_integer(&mut hasher, &d.to_bigint());
            } else {
                let norm = d.normalized();
                (3u8, &norm).hash(&mut hasher);
            }
        }
        Value::Str(s) => (4u8, s.as_bytes()).hash(&mut hasher),
        Value::Range(r) => (5u8, r).hash(&mut hasher),
        Value::List(_) | Value::Map(_) | Value::Set(_) | Value::Pattern(_) | Value::Object(_) | Value::Lambda(_) => {
            return None;
        }
    }
    Some(hasher.finish())
}

fn hash_integer(hasher: &mut DefaultHasher, value: &BigInt) {
    (6u8, value).hash(hasher);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_tower_equality() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Int(1), Value::from(Decimal::from_i64(1)));
        assert_eq!(Value::big_int(BigInt::from(i64::MAX)), Value::Int(i64::MAX));
        assert_ne!(Value::Int(1), Value::Float(1.5));
        assert_ne!(Value::Int(1), Value::string("1"));
    }

    #[test]
    fn map_keys_unify_numerics() {
        let a = MapKey::try_new(Value::Int(1)).unwrap();
        let b = MapKey::try_new(Value::Float(1.0)).unwrap();
        let c = MapKey::try_new(Value::from(Decimal::from_i64(1))).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        let mut map = ValueMap::default();
        map.insert(a, Value::Int(10));
        assert_eq!(map.get(&b), Some(&Value::Int(10)));
    }

    #[test]
    fn unhashable_keys_rejected() {
        assert_eq!(MapKey::try_new(Value::list(vec![])), Err("list"));
        assert_eq!(MapKey::try_new(Value::map()), Err("map"));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Int(0).truthy());
        assert!(!Value::string("").truthy());
        assert!(!Value::list(vec![]).truthy());
        assert!(Value::Int(-1).truthy());
        assert!(Value::string("x").truthy());
        assert!(Value::Range(IntRange::new(0, 0)).truthy());
    }

    #[test]
    fn display_forms() {
        assert_eq!(Value::list(vec![Value::Int(1), Value::string("a")]).to_string(), "[1, a]");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Null.to_string(), "null");
    }

    #[test]
    fn json_round_trip() {
        let json: serde_json::Value = serde_json::from_str(r#"{"a": [1, 2.5, null], "b": "x"}"#).unwrap();
        let value = Value::from_json(&json);
        assert_eq!(value.to_json(), json);
    }
}
