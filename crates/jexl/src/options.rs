//! Runtime options and parse-time feature gates.
//!
//! Options are a flag mask plus a handful of typed fields, copied once at
//! evaluation start so a script's pragmas can adjust its own run without
//! leaking into the engine. Features gate syntax at parse time; the
//! interpreter trusts that a prepared tree already honors them.

use std::str::FromStr;

use ahash::{AHashMap, AHashSet};
use strum::EnumString;

use crate::{
    types::MathContext,
    uberspect::Namespace,
};

/// Flag bit assignments; the mask is visible through [`Options::flag`].
mod bits {
    pub const CANCELLABLE: u32 = 1 << 0;
    pub const STRICT: u32 = 1 << 1;
    pub const SILENT: u32 = 1 << 2;
    pub const SAFE: u32 = 1 << 3;
    pub const LEXICAL: u32 = 1 << 4;
    pub const ANTISH: u32 = 1 << 5;
    pub const LEXICAL_SHADE: u32 = 1 << 6;
    pub const SHARED_INSTANCE: u32 = 1 << 7;
    pub const CONST_CAPTURE: u32 = 1 << 8;
    pub const STRICT_INTERPOLATION: u32 = 1 << 9;
    pub const BOOLEAN_LOGICAL: u32 = 1 << 10;
}

/// The named runtime flags, exactly as the flag-string syntax spells them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString)]
#[strum(serialize_all = "camelCase")]
pub enum OptionFlag {
    Cancellable,
    Strict,
    Silent,
    Safe,
    Lexical,
    Antish,
    LexicalShade,
    SharedInstance,
    ConstCapture,
    StrictInterpolation,
    BooleanLogical,
}

impl OptionFlag {
    fn mask(self) -> u32 {
        match self {
            Self::Cancellable => bits::CANCELLABLE,
            Self::Strict => bits::STRICT,
            Self::Silent => bits::SILENT,
            Self::Safe => bits::SAFE,
            Self::Lexical => bits::LEXICAL,
            Self::Antish => bits::ANTISH,
            Self::LexicalShade => bits::LEXICAL_SHADE,
            Self::SharedInstance => bits::SHARED_INSTANCE,
            Self::ConstCapture => bits::CONST_CAPTURE,
            Self::StrictInterpolation => bits::STRICT_INTERPOLATION,
            Self::BooleanLogical => bits::BOOLEAN_LOGICAL,
        }
    }
}

/// A flag token that [`Options::set_flags`] did not recognize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFlag(pub String);

impl std::fmt::Display for UnknownFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown option flag '{}'", self.0)
    }
}

impl std::error::Error for UnknownFlag {}

/// Runtime behavior switches read at evaluation start.
#[derive(Debug, Clone)]
pub struct Options {
    flags: u32,
    /// When on, a null operand to any numeric operator is an error; when
    /// off, null coerces to the operator's zero value.
    pub strict_arithmetic: bool,
    /// Precision and rounding for decimal operations.
    pub math_context: MathContext,
    /// Fraction digits applied when coercing doubles to decimals; negative
    /// leaves the conversion unscaled.
    pub math_scale: i32,
    /// Namespaces visible to `ns:fn(...)` calls, on top of the context's
    /// own resolver and the engine's registrations.
    pub namespaces: AHashMap<String, Namespace>,
    /// Package prefixes tried when resolving a bare class name in `new`.
    pub imports: Vec<String>,
}

impl Default for Options {
    /// The stock mask: `cancellable | strict | antish | safe`.
    fn default() -> Self {
        Self {
            flags: bits::CANCELLABLE | bits::STRICT | bits::ANTISH | bits::SAFE,
            strict_arithmetic: true,
            math_context: MathContext::DECIMAL128,
            math_scale: -1,
            namespaces: AHashMap::new(),
            imports: Vec::new(),
        }
    }
}

impl Options {
    #[must_use]
    pub fn flag(&self, flag: OptionFlag) -> bool {
        self.flags & flag.mask() != 0
    }

    pub fn set_flag(&mut self, flag: OptionFlag, on: bool) {
        if on {
            self.flags |= flag.mask();
        } else {
            self.flags &= !flag.mask();
        }
    }

    /// Applies a list of flag tokens, each optionally prefixed with `+`
    /// (set) or `-` (unset); a bare name sets the flag. Unknown names fail
    /// without applying later tokens.
    pub fn set_flags<'a>(&mut self, tokens: impl IntoIterator<Item = &'a str>) -> Result<(), UnknownFlag> {
        for token in tokens {
            let (on, name) = match token.as_bytes().first() {
                Some(b'+') => (true, &token[1..]),
                Some(b'-') => (false, &token[1..]),
                _ => (true, token),
            };
            let flag = OptionFlag::from_str(name).map_err(|_| UnknownFlag(token.to_string()))?;
            self.set_flag(flag, on);
        }
        Ok(())
    }

    /// Applies a whitespace-separated flag string (the `jexl.options`
    /// pragma form).
    pub fn apply_flag_string(&mut self, flags: &str) -> Result<(), UnknownFlag> {
        self.set_flags(flags.split_whitespace())
    }

    #[must_use]
    pub fn cancellable(&self) -> bool {
        self.flag(OptionFlag::Cancellable)
    }

    #[must_use]
    pub fn strict(&self) -> bool {
        self.flag(OptionFlag::Strict)
    }

    #[must_use]
    pub fn silent(&self) -> bool {
        self.flag(OptionFlag::Silent)
    }

    #[must_use]
    pub fn safe(&self) -> bool {
        self.flag(OptionFlag::Safe)
    }

    #[must_use]
    pub fn lexical(&self) -> bool {
        self.flag(OptionFlag::Lexical)
    }

    #[must_use]
    pub fn antish(&self) -> bool {
        self.flag(OptionFlag::Antish)
    }

    #[must_use]
    pub fn lexical_shade(&self) -> bool {
        self.flag(OptionFlag::LexicalShade)
    }

    #[must_use]
    pub fn shared_instance(&self) -> bool {
        self.flag(OptionFlag::SharedInstance)
    }

    #[must_use]
    pub fn const_capture(&self) -> bool {
        self.flag(OptionFlag::ConstCapture)
    }

    #[must_use]
    pub fn strict_interpolation(&self) -> bool {
        self.flag(OptionFlag::StrictInterpolation)
    }

    #[must_use]
    pub fn boolean_logical(&self) -> bool {
        self.flag(OptionFlag::BooleanLogical)
    }
}

mod feature_bits {
    pub const REGISTERS: u32 = 1 << 0;
    pub const LOCALS: u32 = 1 << 1;
    pub const SIDE_EFFECTS: u32 = 1 << 2;
    pub const SIDE_EFFECTS_GLOBALS: u32 = 1 << 3;
    pub const NEW_INSTANCE: u32 = 1 << 4;
    pub const LOOPS: u32 = 1 << 5;
    pub const LAMBDA: u32 = 1 << 6;
}

/// Parse-time gates: a cleared bit makes the corresponding construct a
/// `Feature` parse error. All constructs are allowed by default.
#[derive(Debug, Clone)]
pub struct Features {
    flags: u32,
    reserved: AHashSet<String>,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            flags: feature_bits::REGISTERS
                | feature_bits::LOCALS
                | feature_bits::SIDE_EFFECTS
                | feature_bits::SIDE_EFFECTS_GLOBALS
                | feature_bits::NEW_INSTANCE
                | feature_bits::LOOPS
                | feature_bits::LAMBDA,
            reserved: AHashSet::new(),
        }
    }
}

impl Features {
    fn with(mut self, bit: u32, on: bool) -> Self {
        if on {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
        self
    }

    /// Allows or forbids `var`/`let`/`const` declarations.
    #[must_use]
    pub fn locals(self, on: bool) -> Self {
        self.with(feature_bits::LOCALS, on)
    }

    /// Allows or forbids all assignments.
    #[must_use]
    pub fn side_effects(self, on: bool) -> Self {
        self.with(feature_bits::SIDE_EFFECTS, on)
    }

    /// Allows or forbids assignments to context (global) variables.
    #[must_use]
    pub fn side_effects_globals(self, on: bool) -> Self {
        self.with(feature_bits::SIDE_EFFECTS_GLOBALS, on)
    }

    /// Allows or forbids `new(...)`.
    #[must_use]
    pub fn new_instance(self, on: bool) -> Self {
        self.with(feature_bits::NEW_INSTANCE, on)
    }

    /// Allows or forbids loops.
    #[must_use]
    pub fn loops(self, on: bool) -> Self {
        self.with(feature_bits::LOOPS, on)
    }

    /// Allows or forbids lambda definitions.
    #[must_use]
    pub fn lambda(self, on: bool) -> Self {
        self.with(feature_bits::LAMBDA, on)
    }

    /// Adds a reserved name that scripts may not declare or assign.
    #[must_use]
    pub fn reserve(mut self, name: impl Into<String>) -> Self {
        self.reserved.insert(name.into());
        self
    }

    #[must_use]
    pub fn supports_locals(&self) -> bool {
        self.flags & feature_bits::LOCALS != 0
    }

    #[must_use]
    pub fn supports_side_effects(&self) -> bool {
        self.flags & feature_bits::SIDE_EFFECTS != 0
    }

    #[must_use]
    pub fn supports_side_effects_globals(&self) -> bool {
        self.flags & feature_bits::SIDE_EFFECTS_GLOBALS != 0
    }

    #[must_use]
    pub fn supports_new_instance(&self) -> bool {
        self.flags & feature_bits::NEW_INSTANCE != 0
    }

    #[must_use]
    pub fn supports_loops(&self) -> bool {
        self.flags & feature_bits::LOOPS != 0
    }

    #[must_use]
    pub fn supports_lambda(&self) -> bool {
        self.flags & feature_bits::LAMBDA != 0
    }

    #[must_use]
    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mask() {
        let opts = Options::default();
        assert!(opts.cancellable());
        assert!(opts.strict());
        assert!(opts.antish());
        assert!(opts.safe());
        assert!(!opts.silent());
        assert!(!opts.lexical());
        assert!(!opts.boolean_logical());
    }

    #[test]
    fn flag_tokens() {
        let mut opts = Options::default();
        opts.set_flags(["-strict", "+lexical", "silent"]).unwrap();
        assert!(!opts.strict());
        assert!(opts.lexical());
        assert!(opts.silent());
    }

    #[test]
    fn camel_case_names() {
        let mut opts = Options::default();
        opts.set_flags(["+lexicalShade", "+constCapture", "+booleanLogical"]).unwrap();
        assert!(opts.lexical_shade());
        assert!(opts.const_capture());
        assert!(opts.boolean_logical());
    }

    #[test]
    fn unknown_flag_is_reported() {
        let mut opts = Options::default();
        let err = opts.set_flags(["+bogus"]).unwrap_err();
        assert_eq!(err, UnknownFlag("+bogus".to_string()));
    }

    #[test]
    fn feature_defaults_allow_everything() {
        let f = Features::default();
        assert!(f.supports_loops() && f.supports_lambda() && f.supports_locals());
        let f = f.loops(false).reserve("forbidden");
        assert!(!f.supports_loops());
        assert!(f.is_reserved("forbidden"));
    }
}
