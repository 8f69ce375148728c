//! Structured evaluation and parse errors.
//!
//! Every error carries the script name (when known), a source location and a
//! human-readable detail. The `Display` form is `name@line:column detail`.
//!
//! Errors never expose interpreter internals: the frame vector records
//! script-level calls (lambda invocations) only, so a reported stack reads
//! like the user's script, not like this crate's call graph.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result alias for anything that can fail during evaluation.
///
/// The error is boxed to keep the `Ok` path cheap; evaluation results are
/// returned from every node visit.
pub type EvalResult<T> = Result<T, Box<JexlError>>;

/// A 1-indexed source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeLoc {
    pub line: u32,
    pub column: u32,
}

impl CodeLoc {
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A source span between two positions, inclusive of the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeRange {
    pub start: CodeLoc,
    pub end: CodeLoc,
}

impl CodeRange {
    #[must_use]
    pub const fn new(start: CodeLoc, end: CodeLoc) -> Self {
        Self { start, end }
    }

    /// A degenerate range at a single position.
    #[must_use]
    pub const fn at(loc: CodeLoc) -> Self {
        Self { start: loc, end: loc }
    }

    /// The smallest range covering both operands.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        let start = if (other.start.line, other.start.column) < (self.start.line, self.start.column) {
            other.start
        } else {
            self.start
        };
        let end = if (other.end.line, other.end.column) > (self.end.line, self.end.column) {
            other.end
        } else {
            self.end
        };
        Self { start, end }
    }
}

/// What went wrong with a variable reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableIssue {
    /// The variable was never defined (or never assigned).
    Undefined,
    /// The variable (or a const) was illegally redefined.
    Redefined,
    /// The variable exists but holds null where a value is required.
    NullValue,
}

/// Error category.
///
/// `Cancelled` is control flow escaping the evaluation on purpose; callers
/// usually test for it with [`JexlError::is_cancel`] rather than matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The lexer rejected the source.
    Tokenization,
    /// The parser rejected the token stream.
    Parsing,
    /// A statement is ambiguous (e.g. an expression where a block was required).
    Ambiguous,
    /// The left-hand side of an assignment is not assignable.
    Assignment,
    /// A syntactic feature is disabled by the engine's feature gates.
    Feature,
    /// A variable reference failed.
    Variable(VariableIssue),
    /// A property access failed. `undefined` distinguishes a missing property
    /// from a null-valued one.
    Property { undefined: bool },
    /// A method or function could not be resolved or failed when invoked.
    Method,
    /// An operator application failed.
    Operator,
    /// A null operand reached a numeric operator under strict arithmetic.
    NullOperand,
    /// An annotation processor failed or was missing in strict mode.
    Annotation,
    /// The interpreter's recursion guard tripped.
    StackOverflow,
    /// Evaluation was cancelled cooperatively.
    Cancelled,
}

impl ErrorKind {
    /// Short phrase prefixed to the detail in the rendered message.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Tokenization => "tokenization error",
            Self::Parsing => "parsing error",
            Self::Ambiguous => "ambiguous statement",
            Self::Assignment => "invalid assignment",
            Self::Feature => "feature disabled",
            Self::Variable(VariableIssue::Undefined) => "undefined variable",
            Self::Variable(VariableIssue::Redefined) => "redefined variable",
            Self::Variable(VariableIssue::NullValue) => "null value variable",
            Self::Property { undefined: true } => "unsolvable property",
            Self::Property { undefined: false } => "null property",
            Self::Method => "unsolvable method",
            Self::Operator => "operator error",
            Self::NullOperand => "null operand",
            Self::Annotation => "annotation error",
            Self::StackOverflow => "stack overflow",
            Self::Cancelled => "execution cancelled",
        }
    }
}

/// One script-level call recorded while unwinding, outermost last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptFrame {
    /// Lambda name, or `<lambda>` for anonymous ones.
    pub name: String,
    /// Call site.
    pub loc: CodeLoc,
}

/// An evaluation or parse error with its source locus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JexlError {
    pub kind: ErrorKind,
    /// Script name as given to the engine, if any.
    pub script: Option<String>,
    pub loc: CodeLoc,
    /// Human-readable description of the specific failure. For `Method`
    /// errors this includes the pretty-printed signature `name(T1, T2, …)`.
    pub detail: String,
    /// Script-level call frames traversed while unwinding.
    pub frames: Vec<ScriptFrame>,
}

impl JexlError {
    /// Creates a boxed error; errors travel boxed everywhere.
    #[must_use]
    pub fn new(kind: ErrorKind, loc: CodeLoc, detail: impl Into<String>) -> Box<Self> {
        Box::new(Self {
            kind,
            script: None,
            loc,
            detail: detail.into(),
            frames: Vec::new(),
        })
    }

    /// Convenience constructor from a range (uses the range start).
    #[must_use]
    pub fn at(kind: ErrorKind, range: CodeRange, detail: impl Into<String>) -> Box<Self> {
        Self::new(kind, range.start, detail)
    }

    /// Marks the error as a cooperative cancellation.
    #[must_use]
    pub fn cancelled(loc: CodeLoc) -> Box<Self> {
        Self::new(ErrorKind::Cancelled, loc, "interrupted")
    }

    /// True for errors that represent cancellation rather than failure.
    #[must_use]
    pub fn is_cancel(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Attaches the script name if none was recorded deeper in the call.
    pub fn set_script(&mut self, name: &str) {
        if self.script.is_none() {
            self.script = Some(name.to_string());
        }
    }

    /// Records a script-level call frame while unwinding.
    pub fn push_frame(&mut self, name: &str, loc: CodeLoc) {
        self.frames.push(ScriptFrame {
            name: name.to_string(),
            loc,
        });
    }
}

impl fmt::Display for JexlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.script.as_deref().unwrap_or("jexl");
        write!(f, "{name}@{} {}", self.loc, self.kind.label())?;
        if !self.detail.is_empty() {
            write!(f, " {}", self.detail)?;
        }
        for frame in &self.frames {
            write!(f, "\n    at {} ({name}@{})", frame.name, frame.loc)?;
        }
        Ok(())
    }
}

impl std::error::Error for JexlError {}

/// Width of the rendered source window in parser error messages.
const SNIPPET_WIDTH: usize = 42;

/// Renders the offending source line for a parse/tokenization error.
///
/// A line of at most 42 characters is rendered whole as `in '<line>'`;
/// longer lines get a 42-character window centered on the reported column,
/// rendered as `near '... <slice> ...'`.
#[must_use]
pub fn source_snippet(line: &str, column: u32) -> String {
    let chars: Vec<char> = line.chars().collect();
    if chars.len() <= SNIPPET_WIDTH {
        return format!("in '{line}'");
    }
    let column = (column.max(1) - 1) as usize;
    let half = SNIPPET_WIDTH / 2;
    let start = column.saturating_sub(half).min(chars.len() - SNIPPET_WIDTH);
    let slice: String = chars[start..start + SNIPPET_WIDTH].iter().collect();
    format!("near '... {slice} ...'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_name_line_column() {
        let mut err = *JexlError::new(ErrorKind::Variable(VariableIssue::Undefined), CodeLoc::new(3, 7), "'x'");
        err.set_script("conf.jexl");
        assert_eq!(err.to_string(), "conf.jexl@3:7 undefined variable 'x'");
    }

    #[test]
    fn short_line_rendered_whole() {
        assert_eq!(source_snippet("a + b", 3), "in 'a + b'");
    }

    #[test]
    fn long_line_rendered_as_window() {
        let line = "x".repeat(100);
        let snippet = source_snippet(&line, 50);
        assert!(snippet.starts_with("near '... "));
        assert!(snippet.ends_with(" ...'"));
        // 42 chars plus the ellipsis dressing
        assert_eq!(snippet.len(), SNIPPET_WIDTH + "near '...  ...'".len());
    }

    #[test]
    fn window_clamps_at_line_edges() {
        let line: String = ('a'..='z').cycle().take(60).collect();
        let head = source_snippet(&line, 1);
        let tail = source_snippet(&line, 60);
        assert!(head.contains(&line[..42]));
        assert!(tail.contains(&line[60 - 42..]));
    }
}
