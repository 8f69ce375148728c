//! Operator semantics and the coercion tower.
//!
//! One total function per operator over `Value x Value`. The numeric tower
//! promotes `Int -> BigInt -> Float/Decimal`: overflow on 64-bit integers
//! promotes to arbitrary precision, a float operand promotes to doubles,
//! and a decimal operand promotes everything to decimals under the current
//! [`MathContext`].
//!
//! Null handling follows the strict-arithmetic switch: when strict, a null
//! operand to any numeric operator is a [`ArithError::NullOperand`]; when
//! lenient, null coerces to the operator's zero value (`0`, `""`, `false`).
//!
//! Errors here carry no source locations; the interpreter attaches them.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use regex::Regex;

use crate::{
    options::Options,
    types::{Decimal, IntRange, MathContext},
    value::{MapKey, Value, is_numeric, numeric_cmp, value_eq},
};

/// Location-free arithmetic failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ArithError {
    /// Null reached a numeric operator under strict arithmetic.
    NullOperand,
    /// Integer or decimal division/modulo by zero under strict arithmetic.
    DivideByZero,
    /// Anything else; the message names the operator and operand types.
    Operator(String),
}

impl ArithError {
    fn bad_operands(op: &str, l: &Value, r: &Value) -> Self {
        Self::Operator(format!("{op} cannot combine {} and {}", l.type_name(), r.type_name()))
    }
}

pub(crate) type ArithResult<T> = Result<T, ArithError>;

/// Both operands brought to a common numeric representation.
enum NumPair {
    Int(i64, i64),
    Big(BigInt, BigInt),
    Float(f64, f64),
    Dec(Decimal, Decimal),
}

/// Configured operator semantics for one evaluation.
#[derive(Debug, Clone)]
pub struct Arithmetic {
    /// The strict-arithmetic switch.
    pub strict: bool,
    pub math_context: MathContext,
    /// Fraction digits applied when doubles become decimals; negative
    /// leaves conversions unscaled.
    pub math_scale: i32,
}

impl Arithmetic {
    #[must_use]
    pub fn new(strict: bool, math_context: MathContext, math_scale: i32) -> Self {
        Self {
            strict,
            math_context,
            math_scale,
        }
    }

    #[must_use]
    pub(crate) fn from_options(options: &Options) -> Self {
        Self::new(options.strict_arithmetic, options.math_context, options.math_scale)
    }

    /// Replaces nulls by the numeric zero, or errors under strict.
    fn null_to_zero(&self, v: &Value) -> ArithResult<Value> {
        if v.is_null() {
            if self.strict {
                return Err(ArithError::NullOperand);
            }
            return Ok(Value::Int(0));
        }
        Ok(v.clone())
    }

    fn to_decimal(&self, v: &Value) -> ArithResult<Decimal> {
        let dec = match v {
            Value::Int(i) => Decimal::from_i64(*i),
            Value::BigInt(b) => Decimal::from_bigint((**b).clone()),
            Value::Decimal(d) => (**d).clone(),
            Value::Float(f) => {
                let dec = Decimal::from_f64(*f);
                if self.math_scale >= 0 {
                    dec.with_scale(self.math_scale, self.math_context.rounding)
                } else {
                    dec
                }
            }
            Value::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| ArithError::Operator(format!("'{s}' is not a decimal")))?,
            _ => return Err(ArithError::Operator(format!("{} is not numeric", v.type_name()))),
        };
        Ok(dec)
    }

    fn to_f64(v: &Value) -> ArithResult<f64> {
        match v {
            Value::Int(i) => Ok(*i as f64),
            Value::BigInt(b) => Ok(b.to_f64().unwrap_or(f64::INFINITY)),
            Value::Float(f) => Ok(*f),
            Value::Decimal(d) => Ok(d.to_f64()),
            Value::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| ArithError::Operator(format!("'{s}' is not a number"))),
            _ => Err(ArithError::Operator(format!("{} is not numeric", v.type_name()))),
        }
    }

    /// Coerces toward the integer tower; floats and decimals truncate.
    pub(crate) fn to_integer(&self, v: &Value) -> ArithResult<BigInt> {
        match v {
            Value::Null => {
                if self.strict {
                    Err(ArithError::NullOperand)
                } else {
                    Ok(BigInt::zero())
                }
            }
            Value::Bool(b) => Ok(BigInt::from(i64::from(*b))),
            Value::Int(i) => Ok(BigInt::from(*i)),
            Value::BigInt(b) => Ok((**b).clone()),
            Value::Float(f) => Ok(BigInt::from(*f as i64)),
            Value::Decimal(d) => Ok(d.to_bigint()),
            Value::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| ArithError::Operator(format!("'{s}' is not an integer"))),
            _ => Err(ArithError::Operator(format!("{} is not an integer", v.type_name()))),
        }
    }

    fn numeric_pair(&self, l: &Value, r: &Value) -> ArithResult<NumPair> {
        if matches!(l, Value::Decimal(_)) || matches!(r, Value::Decimal(_)) {
            return Ok(NumPair::Dec(self.to_decimal(l)?, self.to_decimal(r)?));
        }
        if matches!(l, Value::Float(_)) || matches!(r, Value::Float(_)) {
            return Ok(NumPair::Float(Self::to_f64(l)?, Self::to_f64(r)?));
        }
        match (l, r) {
            (Value::Int(a), Value::Int(b)) => Ok(NumPair::Int(*a, *b)),
            (Value::BigInt(a), Value::BigInt(b)) => Ok(NumPair::Big((**a).clone(), (**b).clone())),
            (Value::Int(a), Value::BigInt(b)) => Ok(NumPair::Big(BigInt::from(*a), (**b).clone())),
            (Value::BigInt(a), Value::Int(b)) => Ok(NumPair::Big((**a).clone(), BigInt::from(*b))),
            _ => Err(ArithError::Operator(format!(
                "cannot combine {} and {} numerically",
                l.type_name(),
                r.type_name()
            ))),
        }
    }

    /// String coercion used by concatenation and interpolation; null
    /// renders empty (strict null rejection happens before this).
    #[must_use]
    pub fn to_string_coerce(&self, v: &Value) -> String {
        match v {
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// `+`: string concatenation when either side is a string, numeric
    /// addition otherwise.
    pub(crate) fn add(&self, l: &Value, r: &Value) -> ArithResult<Value> {
        if (l.is_null() || r.is_null()) && self.strict {
            return Err(ArithError::NullOperand);
        }
        if matches!(l, Value::Str(_)) || matches!(r, Value::Str(_)) {
            let mut s = self.to_string_coerce(l);
            s.push_str(&self.to_string_coerce(r));
            return Ok(Value::string(s));
        }
        let (l, r) = (self.null_to_zero(l)?, self.null_to_zero(r)?);
        match self.numeric_pair(&l, &r)? {
            NumPair::Int(a, b) => Ok(match a.checked_add(b) {
                Some(sum) => Value::Int(sum),
                None => Value::big_int(BigInt::from(a) + BigInt::from(b)),
            }),
            NumPair::Big(a, b) => Ok(Value::big_int(a + b)),
            NumPair::Float(a, b) => Ok(Value::Float(a + b)),
            NumPair::Dec(a, b) => Ok(Value::from(a.add(&b).round(self.math_context))),
        }
    }

    /// `-` (binary).
    pub(crate) fn subtract(&self, l: &Value, r: &Value) -> ArithResult<Value> {
        let (l, r) = (self.null_to_zero(l)?, self.null_to_zero(r)?);
        match self.numeric_pair(&l, &r)? {
            NumPair::Int(a, b) => Ok(match a.checked_sub(b) {
                Some(diff) => Value::Int(diff),
                None => Value::big_int(BigInt::from(a) - BigInt::from(b)),
            }),
            NumPair::Big(a, b) => Ok(Value::big_int(a - b)),
            NumPair::Float(a, b) => Ok(Value::Float(a - b)),
            NumPair::Dec(a, b) => Ok(Value::from(a.sub(&b).round(self.math_context))),
        }
    }

    /// `*`.
    pub(crate) fn multiply(&self, l: &Value, r: &Value) -> ArithResult<Value> {
        let (l, r) = (self.null_to_zero(l)?, self.null_to_zero(r)?);
        match self.numeric_pair(&l, &r)? {
            NumPair::Int(a, b) => Ok(match a.checked_mul(b) {
                Some(product) => Value::Int(product),
                None => Value::big_int(BigInt::from(a) * BigInt::from(b)),
            }),
            NumPair::Big(a, b) => Ok(Value::big_int(a * b)),
            NumPair::Float(a, b) => Ok(Value::Float(a * b)),
            NumPair::Dec(a, b) => Ok(Value::from(a.mul(&b).round(self.math_context))),
        }
    }

    /// `/`: integer division stays integral when exact, otherwise the
    /// quotient is a decimal under the current math context. Doubles divide
    /// with IEEE semantics (division by zero yields an infinity).
    pub(crate) fn divide(&self, l: &Value, r: &Value) -> ArithResult<Value> {
        let (l, r) = (self.null_to_zero(l)?, self.null_to_zero(r)?);
        match self.numeric_pair(&l, &r)? {
            NumPair::Int(a, b) => {
                if b == 0 {
                    return self.divide_by_zero();
                }
                if a % b == 0 {
                    return Ok(match a.checked_div(b) {
                        Some(q) => Value::Int(q),
                        None => Value::big_int(BigInt::from(a) / BigInt::from(b)),
                    });
                }
                let q = Decimal::from_i64(a)
                    .div(&Decimal::from_i64(b), self.math_context)
                    .expect("nonzero divisor");
                Ok(Value::from(q))
            }
            NumPair::Big(a, b) => {
                if b.is_zero() {
                    return self.divide_by_zero();
                }
                if (&a % &b).is_zero() {
                    return Ok(Value::big_int(a / b));
                }
                let q = Decimal::from_bigint(a)
                    .div(&Decimal::from_bigint(b), self.math_context)
                    .expect("nonzero divisor");
                Ok(Value::from(q))
            }
            NumPair::Float(a, b) => Ok(Value::Float(a / b)),
            NumPair::Dec(a, b) => match a.div(&b, self.math_context) {
                Some(q) => Ok(Value::from(q)),
                None => self.divide_by_zero(),
            },
        }
    }

    /// `%` with the dividend's sign.
    pub(crate) fn modulo(&self, l: &Value, r: &Value) -> ArithResult<Value> {
        let (l, r) = (self.null_to_zero(l)?, self.null_to_zero(r)?);
        match self.numeric_pair(&l, &r)? {
            NumPair::Int(a, b) => {
                if b == 0 {
                    return self.divide_by_zero();
                }
                Ok(match a.checked_rem(b) {
                    Some(rem) => Value::Int(rem),
                    None => Value::Int(0),
                })
            }
            NumPair::Big(a, b) => {
                if b.is_zero() {
                    return self.divide_by_zero();
                }
                Ok(Value::big_int(a % b))
            }
            NumPair::Float(a, b) => Ok(Value::Float(a % b)),
            NumPair::Dec(a, b) => match a.rem(&b) {
                Some(rem) => Ok(Value::from(rem)),
                None => self.divide_by_zero(),
            },
        }
    }

    fn divide_by_zero(&self) -> ArithResult<Value> {
        if self.strict {
            Err(ArithError::DivideByZero)
        } else {
            Ok(Value::Int(0))
        }
    }

    /// Unary `-`; negating a boolean flips it.
    pub(crate) fn negate(&self, v: &Value) -> ArithResult<Value> {
        match v {
            Value::Null => self.null_to_zero(v),
            Value::Bool(b) => Ok(Value::Bool(!b)),
            Value::Int(i) => Ok(match i.checked_neg() {
                Some(n) => Value::Int(n),
                None => Value::big_int(-BigInt::from(*i)),
            }),
            Value::BigInt(b) => Ok(Value::big_int(-(**b).clone())),
            Value::Float(f) => Ok(Value::Float(-f)),
            Value::Decimal(d) => Ok(Value::from(d.neg())),
            _ => Err(ArithError::Operator(format!("cannot negate {}", v.type_name()))),
        }
    }

    /// Unary `~` over the integer tower.
    pub(crate) fn complement(&self, v: &Value) -> ArithResult<Value> {
        let i = self.to_integer(v)?;
        Ok(Value::big_int(-i - 1))
    }

    /// Logical `!`.
    #[must_use]
    pub(crate) fn not(v: &Value) -> Value {
        Value::Bool(!v.truthy())
    }

    fn bitwise(&self, l: &Value, r: &Value, f: fn(BigInt, BigInt) -> BigInt) -> ArithResult<Value> {
        Ok(Value::big_int(f(self.to_integer(l)?, self.to_integer(r)?)))
    }

    /// `&`.
    pub(crate) fn bit_and(&self, l: &Value, r: &Value) -> ArithResult<Value> {
        self.bitwise(l, r, |a, b| a & b)
    }

    /// `|`.
    pub(crate) fn bit_or(&self, l: &Value, r: &Value) -> ArithResult<Value> {
        self.bitwise(l, r, |a, b| a | b)
    }

    /// `^`.
    pub(crate) fn bit_xor(&self, l: &Value, r: &Value) -> ArithResult<Value> {
        self.bitwise(l, r, |a, b| a ^ b)
    }

    fn shift_amount(&self, r: &Value) -> ArithResult<u32> {
        let amount = self.to_integer(r)?;
        amount
            .to_u32()
            .ok_or_else(|| ArithError::Operator(format!("invalid shift amount {amount}")))
    }

    /// `<<`; 64-bit overflow promotes to arbitrary precision.
    pub(crate) fn shift_left(&self, l: &Value, r: &Value) -> ArithResult<Value> {
        let amount = self.shift_amount(r)?;
        match l {
            Value::Int(i) if amount < 63 && i.checked_shl(amount).is_some_and(|s| s >> amount == *i) => {
                Ok(Value::Int(i << amount))
            }
            _ => Ok(Value::big_int(self.to_integer(l)? << amount)),
        }
    }

    /// `>>` (arithmetic, sign-preserving).
    pub(crate) fn shift_right(&self, l: &Value, r: &Value) -> ArithResult<Value> {
        let amount = self.shift_amount(r)?;
        Ok(Value::big_int(self.to_integer(l)? >> amount))
    }

    /// `>>>`: logical shift over the 64-bit pattern. Arbitrary-precision
    /// integers have no fixed width, so they shift arithmetically.
    pub(crate) fn shift_right_unsigned(&self, l: &Value, r: &Value) -> ArithResult<Value> {
        let amount = self.shift_amount(r)?;
        match l {
            Value::Null | Value::Int(_) | Value::Float(_) | Value::Decimal(_) | Value::Bool(_) | Value::Str(_) => {
                let bits = self
                    .to_integer(l)?
                    .to_i64()
                    .ok_or_else(|| ArithError::Operator("value out of 64-bit range for >>>".to_string()))?;
                if amount >= 64 {
                    return Ok(Value::Int(0));
                }
                Ok(Value::Int(((bits as u64) >> amount) as i64))
            }
            Value::BigInt(b) => Ok(Value::big_int((**b).clone() >> amount)),
            _ => Err(ArithError::Operator(format!("cannot shift {}", l.type_name()))),
        }
    }

    /// `==` across the numeric tower; see [`value_eq`].
    #[must_use]
    pub(crate) fn equals(l: &Value, r: &Value) -> bool {
        value_eq(l, r)
    }

    /// Ordering for `<`, `<=`, `>`, `>=`. Numerics widen, strings compare
    /// lexicographically, numeric strings compare against numbers; host
    /// objects must have been handled by the uberspect's comparator first.
    pub(crate) fn compare(&self, l: &Value, r: &Value) -> ArithResult<Ordering> {
        if l.is_null() || r.is_null() {
            if self.strict {
                return Err(ArithError::NullOperand);
            }
            let zero = Value::Int(0);
            let l = if l.is_null() { &zero } else { l };
            let r = if r.is_null() { &zero } else { r };
            return self.compare(l, r);
        }
        if let (Value::Float(a), Value::Float(b)) = (l, r) {
            return Ok(a.total_cmp(b));
        }
        if let Some(ord) = numeric_cmp(l, r) {
            return Ok(ord);
        }
        match (l, r) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            (Value::Str(_), other) if is_numeric(other) => {
                let parsed = Self::to_f64(l).map_err(|_| ArithError::bad_operands("<", l, r))?;
                parsed
                    .partial_cmp(&Self::to_f64(other)?)
                    .ok_or_else(|| ArithError::bad_operands("<", l, r))
            }
            (other, Value::Str(_)) if is_numeric(other) => self.compare(r, l).map(Ordering::reverse),
            _ => Err(ArithError::bad_operands("<", l, r)),
        }
    }

    /// `=~`: is `l` "in" `r`. Strings on the right act as regular
    /// expressions (full match); collections, maps, and ranges test
    /// membership.
    pub(crate) fn matches(&self, l: &Value, r: &Value) -> ArithResult<bool> {
        match r {
            Value::Str(pattern) => {
                let subject = self.to_string_coerce(l);
                let re = Regex::new(pattern).map_err(|e| ArithError::Operator(format!("invalid pattern: {e}")))?;
                Ok(full_match(&re, &subject))
            }
            Value::Pattern(re) => Ok(full_match(re, &self.to_string_coerce(l))),
            Value::List(list) => Ok(list.borrow().iter().any(|v| value_eq(v, l))),
            Value::Set(set) => Ok(MapKey::try_new(l.clone()).is_ok_and(|k| set.borrow().contains(&k))),
            Value::Map(map) => Ok(MapKey::try_new(l.clone()).is_ok_and(|k| map.borrow().contains_key(&k))),
            Value::Range(range) => Ok(match l {
                Value::Int(i) => range.contains(*i),
                _ => false,
            }),
            _ => Err(ArithError::bad_operands("=~", l, r)),
        }
    }

    /// `=^`: starts-with on strings.
    pub(crate) fn starts_with(&self, l: &Value, r: &Value) -> ArithResult<bool> {
        match (l, r) {
            (Value::Null, _) | (_, Value::Null) => {
                if self.strict {
                    Err(ArithError::NullOperand)
                } else {
                    Ok(false)
                }
            }
            (Value::Str(s), Value::Str(prefix)) => Ok(s.starts_with(&**prefix)),
            _ => Err(ArithError::bad_operands("=^", l, r)),
        }
    }

    /// `=$`: ends-with on strings.
    pub(crate) fn ends_with(&self, l: &Value, r: &Value) -> ArithResult<bool> {
        match (l, r) {
            (Value::Null, _) | (_, Value::Null) => {
                if self.strict {
                    Err(ArithError::NullOperand)
                } else {
                    Ok(false)
                }
            }
            (Value::Str(s), Value::Str(suffix)) => Ok(s.ends_with(&**suffix)),
            _ => Err(ArithError::bad_operands("=$", l, r)),
        }
    }

    /// `a..b`: both bounds coerce into the 64-bit integer range.
    pub(crate) fn range(&self, l: &Value, r: &Value) -> ArithResult<Value> {
        let from = self
            .to_integer(l)?
            .to_i64()
            .ok_or_else(|| ArithError::Operator("range bound out of 64-bit range".to_string()))?;
        let to = self
            .to_integer(r)?
            .to_i64()
            .ok_or_else(|| ArithError::Operator("range bound out of 64-bit range".to_string()))?;
        Ok(Value::Range(IntRange::new(from, to)))
    }

    /// `empty x`: null and zero and empty containers are empty.
    #[must_use]
    pub(crate) fn empty(v: &Value) -> bool {
        match v {
            Value::Null => true,
            Value::Bool(_) => false,
            Value::Int(_) | Value::BigInt(_) | Value::Float(_) | Value::Decimal(_) => !v.truthy(),
            other => other.length().is_some_and(|n| n == 0),
        }
    }

    /// `size x`.
    pub(crate) fn size(&self, v: &Value) -> ArithResult<Value> {
        match v {
            Value::Null => {
                if self.strict {
                    Err(ArithError::NullOperand)
                } else {
                    Ok(Value::Int(0))
                }
            }
            other => other
                .length()
                .map(|n| Value::Int(n as i64))
                .ok_or_else(|| ArithError::Operator(format!("size is undefined for {}", other.type_name()))),
        }
    }
}

fn full_match(re: &Regex, subject: &str) -> bool {
    re.find(subject).is_some_and(|m| m.start() == 0 && m.end() == subject.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lenient() -> Arithmetic {
        Arithmetic::new(false, MathContext::DECIMAL128, -1)
    }

    fn strict() -> Arithmetic {
        Arithmetic::new(true, MathContext::DECIMAL128, -1)
    }

    #[test]
    fn add_promotes_on_overflow() {
        let a = lenient();
        let sum = a.add(&Value::Int(i64::MAX), &Value::Int(1)).unwrap();
        match sum {
            Value::BigInt(b) => assert_eq!(*b, BigInt::from(i64::MAX) + 1),
            other => panic!("expected BigInt, got {other:?}"),
        }
    }

    #[test]
    fn add_concatenates_strings() {
        let a = lenient();
        assert_eq!(a.add(&Value::string("a"), &Value::Int(1)).unwrap(), Value::string("a1"));
        assert_eq!(a.add(&Value::Null, &Value::string("x")).unwrap(), Value::string("x"));
    }

    #[test]
    fn strict_null_operand() {
        let a = strict();
        assert_eq!(a.add(&Value::Null, &Value::Int(1)), Err(ArithError::NullOperand));
        assert_eq!(a.multiply(&Value::Int(2), &Value::Null), Err(ArithError::NullOperand));
        assert_eq!(lenient().add(&Value::Null, &Value::Int(1)).unwrap(), Value::Int(1));
    }

    #[test]
    fn division_exactness() {
        let a = strict();
        assert_eq!(a.divide(&Value::Int(6), &Value::Int(3)).unwrap(), Value::Int(2));
        let q = a.divide(&Value::Int(1), &Value::Int(2)).unwrap();
        assert_eq!(q, Value::from(Decimal::from_f64(0.5)));
        assert!(matches!(q, Value::Decimal(_)));
        assert_eq!(a.divide(&Value::Int(1), &Value::Int(0)), Err(ArithError::DivideByZero));
        assert_eq!(lenient().divide(&Value::Int(1), &Value::Int(0)).unwrap(), Value::Int(0));
    }

    #[test]
    fn float_division_is_ieee() {
        let a = strict();
        let q = a.divide(&Value::Float(1.0), &Value::Float(0.0)).unwrap();
        assert_eq!(q, Value::Float(f64::INFINITY));
    }

    #[test]
    fn decimal_promotion() {
        let a = strict();
        let sum = a.add(&Value::from(Decimal::from_f64(0.1)), &Value::Int(1)).unwrap();
        assert_eq!(sum, Value::from(Decimal::from_f64(1.1)));
    }

    #[test]
    fn comparisons() {
        let a = strict();
        assert_eq!(a.compare(&Value::Int(1), &Value::Float(1.5)).unwrap(), Ordering::Less);
        assert_eq!(a.compare(&Value::string("abc"), &Value::string("abd")).unwrap(), Ordering::Less);
        assert_eq!(a.compare(&Value::string("10"), &Value::Int(9)).unwrap(), Ordering::Greater);
        assert!(a.compare(&Value::Null, &Value::Int(1)).is_err());
        assert_eq!(lenient().compare(&Value::Null, &Value::Int(1)).unwrap(), Ordering::Less);
    }

    #[test]
    fn matching() {
        let a = lenient();
        assert!(a.matches(&Value::string("abc"), &Value::string("a.c")).unwrap());
        assert!(!a.matches(&Value::string("abcd"), &Value::string("a.c")).unwrap());
        assert!(a.matches(&Value::Int(2), &Value::Range(IntRange::new(1, 3))).unwrap());
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert!(a.matches(&Value::Int(2), &list).unwrap());
        assert!(!a.matches(&Value::Int(5), &list).unwrap());
    }

    #[test]
    fn bit_ops_and_shifts() {
        let a = strict();
        assert_eq!(a.bit_and(&Value::Int(6), &Value::Int(3)).unwrap(), Value::Int(2));
        assert_eq!(a.shift_left(&Value::Int(1), &Value::Int(4)).unwrap(), Value::Int(16));
        assert_eq!(a.shift_right(&Value::Int(-8), &Value::Int(1)).unwrap(), Value::Int(-4));
        assert_eq!(
            a.shift_right_unsigned(&Value::Int(-1), &Value::Int(60)).unwrap(),
            Value::Int(15)
        );
        // shifting past 64-bit promotes instead of wrapping
        assert!(matches!(a.shift_left(&Value::Int(1), &Value::Int(80)).unwrap(), Value::BigInt(_)));
        assert_eq!(a.complement(&Value::Int(0)).unwrap(), Value::Int(-1));
    }

    #[test]
    fn empty_and_size() {
        let a = strict();
        assert!(Arithmetic::empty(&Value::Null));
        assert!(Arithmetic::empty(&Value::Int(0)));
        assert!(Arithmetic::empty(&Value::string("")));
        assert!(!Arithmetic::empty(&Value::string("x")));
        assert_eq!(a.size(&Value::list(vec![Value::Int(1)])).unwrap(), Value::Int(1));
        assert_eq!(a.size(&Value::string("abc")).unwrap(), Value::Int(3));
    }
}
