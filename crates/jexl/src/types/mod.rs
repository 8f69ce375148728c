//! Supporting value types that are too large to live in `value.rs`.

pub(crate) mod decimal;
pub(crate) mod range;

pub use decimal::{Decimal, MathContext, RoundingMode};
pub use range::IntRange;
