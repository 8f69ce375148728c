//! Engine tracing infrastructure.
//!
//! The engine does not log through a global facade; hosts that want
//! visibility install an [`EngineTracer`] on the builder. All hooks have
//! no-op defaults, so [`NoopTracer`] costs nothing and implementations only
//! override the events they care about.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Silent default |
//! | [`StderrTracer`] | Human-readable event log to stderr |
//! | [`RecordingTracer`] | Captures events for assertions in tests |

use std::sync::Mutex;

use crate::error::{CodeLoc, JexlError};

/// One traced event, as captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// Safe navigation short-circuited a null receiver.
    SafeNull { loc: CodeLoc, what: String },
    /// An evaluation error was swallowed by the `silent` option.
    SilentError { message: String },
    /// An annotation had no processor and ran its statement inline.
    AnnotationFallback { loc: CodeLoc, name: String },
    /// Evaluation observed a cancellation request.
    Cancelled { loc: CodeLoc },
}

/// Hook points for engine-level events worth surfacing to a host.
pub trait EngineTracer: Send + Sync {
    /// A `.`/`[]` chain hit a null receiver under safe navigation.
    fn safe_null(&self, _loc: CodeLoc, _what: &str) {}

    /// An error was downgraded to a null result by the `silent` option.
    fn silent_error(&self, _error: &JexlError) {}

    /// A `@name` annotation had no processor; lenient mode runs the
    /// statement inline after this hook.
    fn annotation_fallback(&self, _loc: CodeLoc, _name: &str) {}

    /// Evaluation is terminating because the cancellation bit was observed.
    fn cancelled(&self, _loc: CodeLoc) {}
}

/// The silent default tracer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl EngineTracer for NoopTracer {}

/// Writes one line per event to stderr; for debugging embeddings.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl EngineTracer for StderrTracer {
    fn safe_null(&self, loc: CodeLoc, what: &str) {
        eprintln!("jexl: safe null at {loc}: {what}");
    }

    fn silent_error(&self, error: &JexlError) {
        eprintln!("jexl: silenced: {error}");
    }

    fn annotation_fallback(&self, loc: CodeLoc, name: &str) {
        eprintln!("jexl: no processor for @{name} at {loc}, statement ran inline");
    }

    fn cancelled(&self, loc: CodeLoc) {
        eprintln!("jexl: cancelled at {loc}");
    }
}

/// Captures events in memory; the test suite asserts against them.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Mutex<Vec<TraceEvent>>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains and returns the captured events.
    #[must_use]
    pub fn take(&self) -> Vec<TraceEvent> {
        std::mem::take(&mut self.events.lock().expect("tracer lock"))
    }

    fn push(&self, event: TraceEvent) {
        self.events.lock().expect("tracer lock").push(event);
    }
}

impl EngineTracer for RecordingTracer {
    fn safe_null(&self, loc: CodeLoc, what: &str) {
        self.push(TraceEvent::SafeNull {
            loc,
            what: what.to_string(),
        });
    }

    fn silent_error(&self, error: &JexlError) {
        self.push(TraceEvent::SilentError {
            message: error.to_string(),
        });
    }

    fn annotation_fallback(&self, loc: CodeLoc, name: &str) {
        self.push(TraceEvent::AnnotationFallback {
            loc,
            name: name.to_string(),
        });
    }

    fn cancelled(&self, loc: CodeLoc) {
        self.push(TraceEvent::Cancelled { loc });
    }
}
