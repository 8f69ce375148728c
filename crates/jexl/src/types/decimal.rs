//! Arbitrary precision decimal arithmetic.
//!
//! The representation is a coefficient (`BigInt`) and an exponent (`i32`):
//! value = coefficient * 10^exponent. Trailing zeros are preserved so the
//! scale of a parsed literal survives round-trips; equality and ordering
//! compare numeric value, not representation.
//!
//! Operations that can lose precision (`div`, `round`, `with_scale`) take a
//! [`MathContext`] carrying the target precision and a [`RoundingMode`].
//! Addition, subtraction and multiplication are exact; callers that want
//! context-bounded results round afterwards.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use num_bigint::{BigInt, Sign};
use num_integer::Integer;
use num_traits::{ToPrimitive, Zero};
use strum::EnumString;

/// Rounding mode applied when a result must be shortened to a target
/// precision or scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundingMode {
    /// Round away from zero when any digit is discarded.
    Up,
    /// Truncate toward zero.
    Down,
    /// Round toward positive infinity.
    Ceiling,
    /// Round toward negative infinity.
    Floor,
    /// Round to nearest; ties away from zero.
    HalfUp,
    /// Round to nearest; ties toward zero.
    HalfDown,
    /// Round to nearest; ties to the even neighbor (banker's rounding).
    HalfEven,
}

/// Precision and rounding configuration for inexact decimal operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MathContext {
    /// Number of significant digits results are limited to.
    pub precision: u32,
    /// Rounding applied when digits are discarded.
    pub rounding: RoundingMode,
}

impl MathContext {
    /// The IEEE 754R Decimal128 context: 34 significant digits, ties to even.
    pub const DECIMAL128: Self = Self {
        precision: 34,
        rounding: RoundingMode::HalfEven,
    };

    /// Creates a context with the given precision and rounding mode.
    #[must_use]
    pub const fn new(precision: u32, rounding: RoundingMode) -> Self {
        Self { precision, rounding }
    }
}

impl Default for MathContext {
    fn default() -> Self {
        Self::DECIMAL128
    }
}

/// A finite decimal number with arbitrary precision.
///
/// Stored as coefficient * 10^exponent. There are no non-finite values; a
/// division by zero is reported to the caller instead of producing NaN.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Decimal {
    coefficient: BigInt,
    exponent: i32,
}

impl Decimal {
    /// Creates a decimal from a raw coefficient and exponent.
    #[must_use]
    pub fn new(coefficient: BigInt, exponent: i32) -> Self {
        Self { coefficient, exponent }
    }

    /// Zero with scale 0.
    #[must_use]
    pub fn zero() -> Self {
        Self::new(BigInt::zero(), 0)
    }

    /// Converts a 64-bit integer exactly.
    #[must_use]
    pub fn from_i64(value: i64) -> Self {
        Self::new(BigInt::from(value), 0)
    }

    /// Converts an arbitrary-precision integer exactly.
    #[must_use]
    pub fn from_bigint(value: BigInt) -> Self {
        Self::new(value, 0)
    }

    /// Converts a double using its shortest round-trip representation.
    ///
    /// `0.1f64` becomes the decimal `0.1`, not the nearest binary fraction
    /// expanded to 55 digits.
    #[must_use]
    pub fn from_f64(value: f64) -> Self {
        let mut buf = ryu::Buffer::new();
        let printed = buf.format(value);
        printed.parse().unwrap_or_else(|_| Self::zero())
    }

    /// Returns the number of fraction digits (negative exponents only).
    #[must_use]
    pub fn scale(&self) -> i32 {
        -self.exponent
    }

    /// Returns true if the value is exactly zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.coefficient.is_zero()
    }

    /// Returns true if the value has no fractional part.
    #[must_use]
    pub fn is_integral(&self) -> bool {
        if self.exponent >= 0 {
            return true;
        }
        let (_, rem) = self.coefficient.div_rem(&pow10(-self.exponent));
        rem.is_zero()
    }

    /// Exact negation.
    #[must_use]
    pub fn neg(&self) -> Self {
        Self::new(-&self.coefficient, self.exponent)
    }

    /// Exact addition.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        let (a, b, exp) = align(self, other);
        Self::new(a + b, exp)
    }

    /// Exact subtraction.
    #[must_use]
    pub fn sub(&self, other: &Self) -> Self {
        let (a, b, exp) = align(self, other);
        Self::new(a - b, exp)
    }

    /// Exact multiplication.
    #[must_use]
    pub fn mul(&self, other: &Self) -> Self {
        Self::new(
            &self.coefficient * &other.coefficient,
            self.exponent.saturating_add(other.exponent),
        )
    }

    /// Division to the context's precision. Returns `None` on a zero divisor.
    #[must_use]
    pub fn div(&self, other: &Self, ctx: MathContext) -> Option<Self> {
        if other.is_zero() {
            return None;
        }
        if self.is_zero() {
            return Some(Self::zero());
        }
        let precision = i64::from(ctx.precision.max(1));
        let nd = digit_count(&self.coefficient);
        let dd = digit_count(&other.coefficient);
        // scale the numerator so the integer quotient carries at least
        // precision + 1 digits, then round down to the target precision
        let shift = (dd - nd + precision + 1).max(0);
        let num = &self.coefficient * pow10(i32::try_from(shift).unwrap_or(i32::MAX));
        let (quotient, remainder) = num.div_rem(&other.coefficient);
        let exponent = i64::from(self.exponent) - i64::from(other.exponent) - shift;
        let sticky = !remainder.is_zero();
        Some(round_coefficient(
            quotient,
            clamp_exp(exponent),
            ctx.precision,
            ctx.rounding,
            sticky,
        ))
    }

    /// Remainder with the sign of the dividend, computed exactly.
    /// Returns `None` on a zero divisor.
    #[must_use]
    pub fn rem(&self, other: &Self) -> Option<Self> {
        if other.is_zero() {
            return None;
        }
        let (a, b, exp) = align(self, other);
        let (_, r) = a.div_rem(&b);
        Some(Self::new(r, exp))
    }

    /// Rounds to the context's precision (significant digits).
    #[must_use]
    pub fn round(&self, ctx: MathContext) -> Self {
        round_coefficient(
            self.coefficient.clone(),
            self.exponent,
            ctx.precision,
            ctx.rounding,
            false,
        )
    }

    /// Rescales to exactly `scale` fraction digits, rounding with `mode`.
    #[must_use]
    pub fn with_scale(&self, scale: i32, mode: RoundingMode) -> Self {
        let target_exp = -scale;
        match target_exp.cmp(&self.exponent) {
            Ordering::Equal => self.clone(),
            Ordering::Less => {
                // gaining digits: exact
                let shift = self.exponent - target_exp;
                Self::new(&self.coefficient * pow10(shift), target_exp)
            }
            Ordering::Greater => {
                let drop = target_exp - self.exponent;
                let (q, r) = self.coefficient.div_rem(&pow10(drop));
                let q = apply_rounding(q, &r, &pow10(drop), mode, false);
                Self::new(q, target_exp)
            }
        }
    }

    /// Truncates toward zero to an arbitrary-precision integer.
    #[must_use]
    pub fn to_bigint(&self) -> BigInt {
        if self.exponent >= 0 {
            &self.coefficient * pow10(self.exponent)
        } else {
            let (q, _) = self.coefficient.div_rem(&pow10(-self.exponent));
            q
        }
    }

    /// Approximates as a double.
    #[must_use]
    pub fn to_f64(&self) -> f64 {
        let coeff = self.coefficient.to_f64().unwrap_or(f64::NAN);
        coeff * 10f64.powi(self.exponent)
    }

    /// Numeric comparison, independent of representation.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        let (a, b, _) = align(self, other);
        a.cmp(&b)
    }

    /// Strips trailing zeros from the coefficient, raising the exponent.
    /// `1.50` normalizes to `1.5`; zero normalizes to exponent 0.
    #[must_use]
    pub fn normalized(&self) -> Self {
        if self.coefficient.is_zero() {
            return Self::zero();
        }
        let mut coeff = self.coefficient.clone();
        let mut exp = self.exponent;
        let ten = BigInt::from(10);
        loop {
            let (q, r) = coeff.div_rem(&ten);
            if r.is_zero() && exp < i32::MAX {
                coeff = q;
                exp += 1;
            } else {
                return Self::new(coeff, exp);
            }
        }
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl Hash for Decimal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // hash the normalized form so 1.50 and 1.5 collide
        let norm = self.normalized();
        norm.coefficient.hash(state);
        norm.exponent.hash(state);
    }
}

/// Parse failure for decimal literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDecimalError;

impl fmt::Display for ParseDecimalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid decimal literal")
    }
}

impl std::error::Error for ParseDecimalError {}

impl FromStr for Decimal {
    type Err = ParseDecimalError;

    /// Accepts `[+-]digits[.digits][eE[+-]digits]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (mantissa, exp_part) = match s.find(['e', 'E']) {
            Some(idx) => {
                let exp: i32 = s[idx + 1..].parse().map_err(|_| ParseDecimalError)?;
                (&s[..idx], exp)
            }
            None => (s, 0),
        };
        let (int_part, frac_part) = match mantissa.find('.') {
            Some(idx) => (&mantissa[..idx], &mantissa[idx + 1..]),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(ParseDecimalError);
        }
        if !frac_part.is_empty() && !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseDecimalError);
        }
        let mut digits = String::with_capacity(int_part.len() + frac_part.len());
        digits.push_str(int_part);
        digits.push_str(frac_part);
        let coefficient = BigInt::from_str(&digits).map_err(|_| ParseDecimalError)?;
        let frac_len = i32::try_from(frac_part.len()).map_err(|_| ParseDecimalError)?;
        Ok(Self::new(coefficient, exp_part - frac_len))
    }
}

impl fmt::Display for Decimal {
    /// Plain (non-scientific) notation, preserving the stored scale.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exponent >= 0 {
            let expanded = &self.coefficient * pow10(self.exponent);
            return write!(f, "{expanded}");
        }
        let negative = self.coefficient.sign() == Sign::Minus;
        let magnitude = self.coefficient.magnitude().to_string();
        let scale = (-self.exponent) as usize;
        let sign = if negative { "-" } else { "" };
        if magnitude.len() > scale {
            let split = magnitude.len() - scale;
            write!(f, "{sign}{}.{}", &magnitude[..split], &magnitude[split..])
        } else {
            write!(f, "{sign}0.{}{}", "0".repeat(scale - magnitude.len()), magnitude)
        }
    }
}

/// Brings two decimals to a common exponent (the smaller of the two).
fn align(a: &Decimal, b: &Decimal) -> (BigInt, BigInt, i32) {
    let exp = a.exponent.min(b.exponent);
    let ca = &a.coefficient * pow10(a.exponent - exp);
    let cb = &b.coefficient * pow10(b.exponent - exp);
    (ca, cb, exp)
}

fn pow10(exp: i32) -> BigInt {
    BigInt::from(10).pow(u32::try_from(exp.max(0)).unwrap_or(0))
}

fn digit_count(value: &BigInt) -> i64 {
    if value.is_zero() {
        return 1;
    }
    value.magnitude().to_string().len() as i64
}

fn clamp_exp(exp: i64) -> i32 {
    exp.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Shortens `coeff * 10^exp` to at most `precision` significant digits.
///
/// `sticky` records that digits below the retained remainder were already
/// discarded (by a prior inexact division); it breaks exact ties upward.
fn round_coefficient(coeff: BigInt, exp: i32, precision: u32, mode: RoundingMode, sticky: bool) -> Decimal {
    let digits = digit_count(&coeff);
    let precision = i64::from(precision.max(1));
    if digits <= precision {
        return Decimal::new(coeff, exp);
    }
    let drop = i32::try_from(digits - precision).unwrap_or(i32::MAX);
    let divisor = pow10(drop);
    let (q, r) = coeff.div_rem(&divisor);
    let q = apply_rounding(q, &r, &divisor, mode, sticky);
    Decimal::new(q, exp.saturating_add(drop))
}

/// Applies a rounding mode given quotient `q`, remainder `r` and the divisor
/// that produced them. The remainder carries the sign of the dividend.
fn apply_rounding(q: BigInt, r: &BigInt, divisor: &BigInt, mode: RoundingMode, sticky: bool) -> BigInt {
    if r.is_zero() && !sticky {
        return q;
    }
    let negative = r.sign() == Sign::Minus || (r.is_zero() && q.sign() == Sign::Minus);
    let increment = match mode {
        RoundingMode::Down => false,
        RoundingMode::Up => true,
        RoundingMode::Ceiling => !negative,
        RoundingMode::Floor => negative,
        RoundingMode::HalfUp | RoundingMode::HalfDown | RoundingMode::HalfEven => {
            let doubled = r.magnitude() * 2u32;
            match doubled.cmp(divisor.magnitude()) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => {
                    if sticky {
                        true
                    } else {
                        match mode {
                            RoundingMode::HalfUp => true,
                            RoundingMode::HalfDown => false,
                            _ => q.is_odd(),
                        }
                    }
                }
            }
        }
    };
    if increment {
        if negative { q - 1 } else { q + 1 }
    } else {
        q
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().expect("valid decimal")
    }

    #[test]
    fn parse_and_display_preserve_scale() {
        assert_eq!(dec("1.50").to_string(), "1.50");
        assert_eq!(dec("-0.05").to_string(), "-0.05");
        assert_eq!(dec("42").to_string(), "42");
        assert_eq!(dec("1.5e2").to_string(), "150");
    }

    #[test]
    fn equality_ignores_scale() {
        assert_eq!(dec("1.50"), dec("1.5"));
        assert_eq!(dec("0.00"), Decimal::zero());
    }

    #[test]
    fn exact_arithmetic() {
        assert_eq!(dec("0.1").add(&dec("0.2")), dec("0.3"));
        assert_eq!(dec("1.5").mul(&dec("2")), dec("3.0"));
        assert_eq!(dec("1").sub(&dec("0.25")), dec("0.75"));
    }

    #[test]
    fn division_rounds_to_context() {
        let ctx = MathContext::new(5, RoundingMode::HalfEven);
        let q = dec("1").div(&dec("3"), ctx).unwrap();
        assert_eq!(q.to_string(), "0.33333");
        assert!(dec("1").div(&Decimal::zero(), ctx).is_none());
    }

    #[test]
    fn division_exact_short_circuit() {
        let q = dec("1").div(&dec("4"), MathContext::DECIMAL128).unwrap();
        assert_eq!(q, dec("0.25"));
    }

    #[test]
    fn with_scale_rounding_modes() {
        let v = dec("2.675");
        assert_eq!(v.with_scale(2, RoundingMode::HalfUp).to_string(), "2.68");
        assert_eq!(v.with_scale(2, RoundingMode::Down).to_string(), "2.67");
        assert_eq!(dec("-2.5").with_scale(0, RoundingMode::Floor).to_string(), "-3");
        assert_eq!(dec("-2.5").with_scale(0, RoundingMode::Ceiling).to_string(), "-2");
        assert_eq!(dec("2.5").with_scale(0, RoundingMode::HalfEven).to_string(), "2");
        assert_eq!(dec("3.5").with_scale(0, RoundingMode::HalfEven).to_string(), "4");
    }

    #[test]
    fn integral_checks() {
        assert!(dec("5.0").is_integral());
        assert!(!dec("5.1").is_integral());
        assert_eq!(dec("12.7").to_bigint(), BigInt::from(12));
        assert_eq!(dec("-12.7").to_bigint(), BigInt::from(-12));
    }

    #[test]
    fn rounding_mode_names_parse() {
        assert_eq!("HALF_EVEN".parse::<RoundingMode>().unwrap(), RoundingMode::HalfEven);
        assert_eq!("CEILING".parse::<RoundingMode>().unwrap(), RoundingMode::Ceiling);
        assert!("NEAREST".parse::<RoundingMode>().is_err());
    }
}
