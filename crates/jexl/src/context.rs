//! The bridge between the interpreter and a host-supplied context.
//!
//! A context stores the free ("global") variables a script sees. Beyond
//! `get`/`set`/`has`, contexts can opt into richer collaboration by
//! overriding the capability methods: namespace resolution, annotation
//! processing, pragma processing, an options handle consulted at evaluation
//! start, and a cancellation bit polled at safe points. All of them default
//! to "not provided".

use std::{
    cell::RefCell,
    rc::Rc,
    sync::atomic::AtomicBool,
};

use ahash::AHashMap;

use crate::{
    error::EvalResult,
    options::Options,
    uberspect::Namespace,
    value::Value,
};

/// The statement wrapped by an annotation, handed to the context's
/// processor. A processor must invoke it exactly once; the interpreter
/// verifies the count afterwards.
pub trait AnnotationThunk {
    /// Runs the annotated statement against the given context.
    fn invoke(&mut self, ctx: &mut dyn JexlContext) -> EvalResult<Value>;
}

/// Host-supplied variable storage and optional collaboration hooks.
pub trait JexlContext {
    /// Reads a variable; `None` when undefined. A defined-but-null variable
    /// returns `Some(Value::Null)`.
    fn get(&self, name: &str) -> Option<Value>;

    /// Defines or overwrites a variable.
    fn set(&mut self, name: &str, value: Value);

    /// True when the variable is defined (even if null). Antish resolution
    /// probes dotted keys through this.
    fn has(&self, name: &str) -> bool;

    /// Resolves a namespace prefix (`ns:fn(...)`); consulted before the
    /// engine's registered namespaces.
    fn resolve_namespace(&self, _name: &str) -> Option<Namespace> {
        None
    }

    /// Processes `@name(args) statement`. Returning `None` means this
    /// context has no processor; the interpreter then errors (strict) or
    /// runs the statement inline (lenient). A processor MUST invoke the
    /// thunk exactly once and usually returns its result.
    fn process_annotation(
        &mut self,
        _name: &str,
        _args: &[Value],
        _statement: &mut dyn AnnotationThunk,
    ) -> Option<EvalResult<Value>> {
        None
    }

    /// Receives each `#pragma key value` before interpretation starts.
    fn process_pragma(&mut self, _key: &str, _value: &Value) {}

    /// Options override consulted once at evaluation start. The interpreter
    /// works on a private copy unless the engine's `sharedInstance` flag is
    /// set (in which case the engine options are used as-is and this handle
    /// is ignored).
    fn engine_options(&self) -> Option<Options> {
        None
    }

    /// Cancellation bit polled at statement boundaries, loop iterations and
    /// before method invocations.
    fn cancellation(&self) -> Option<&AtomicBool> {
        None
    }
}

/// The stock map-backed context.
#[derive(Debug, Default)]
pub struct MapContext {
    vars: AHashMap<String, Value>,
}

impl MapContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion, handy in tests and embeddings.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Number of defined variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl JexlContext for MapContext {
    fn get(&self, name: &str) -> Option<Value> {
        self.vars.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
    }

    fn has(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }
}

/// A context handle that can be published in thread-local storage.
pub type SharedContext = Rc<RefCell<dyn JexlContext>>;

thread_local! {
    static THREAD_CONTEXT: RefCell<Option<SharedContext>> = const { RefCell::new(None) };
}

/// Publishes a context for the current thread, returning a guard that
/// restores the previous occupant on drop — on every exit path, panics
/// included.
pub struct ThreadContextScope {
    previous: Option<SharedContext>,
}

impl ThreadContextScope {
    #[must_use]
    pub fn enter(ctx: SharedContext) -> Self {
        let previous = THREAD_CONTEXT.with(|slot| slot.borrow_mut().replace(ctx));
        Self { previous }
    }
}

impl Drop for ThreadContextScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        THREAD_CONTEXT.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Sets (or clears) the thread-published context directly.
pub(crate) fn set_thread_context(ctx: Option<SharedContext>) {
    THREAD_CONTEXT.with(|slot| *slot.borrow_mut() = ctx);
}

/// Reads the thread-published context, if any.
#[must_use]
pub(crate) fn get_thread_context() -> Option<SharedContext> {
    THREAD_CONTEXT.with(|slot| slot.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_context_basics() {
        let mut ctx = MapContext::new().with("a", 1i64);
        assert!(ctx.has("a"));
        assert!(!ctx.has("b"));
        assert_eq!(ctx.get("a"), Some(Value::Int(1)));
        ctx.set("b", Value::Null);
        assert!(ctx.has("b"));
        assert_eq!(ctx.get("b"), Some(Value::Null));
    }

    #[test]
    fn thread_context_scope_restores() {
        let first: SharedContext = Rc::new(RefCell::new(MapContext::new().with("n", 1i64)));
        let second: SharedContext = Rc::new(RefCell::new(MapContext::new().with("n", 2i64)));
        set_thread_context(Some(first));
        {
            let _scope = ThreadContextScope::enter(Rc::clone(&second));
            let current = get_thread_context().unwrap();
            assert_eq!(current.borrow().get("n"), Some(Value::Int(2)));
        }
        let restored = get_thread_context().unwrap();
        assert_eq!(restored.borrow().get("n"), Some(Value::Int(1)));
        set_thread_context(None);
    }
}
