#![doc = include_str!("../../../README.md")]
#![expect(clippy::must_use_candidate, reason = "the public surface is accessor-heavy")]
#![expect(clippy::missing_panics_doc, reason = "lock/borrow panics are engine bugs, not API contract")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is range-checked")]
#![expect(clippy::cast_sign_loss, reason = "bit-pattern casts in shifts are intentional")]
#![expect(clippy::cast_possible_wrap, reason = "unsigned-shift semantics mirror 64-bit hosts")]

mod arithmetic;
mod cache;
mod context;
mod engine;
mod error;
mod expressions;
mod frame;
mod interpreter;
mod options;
mod parse;
mod permissions;
mod prepare;
mod tracer;
mod types;
mod uberspect;
mod value;

pub use crate::{
    arithmetic::Arithmetic,
    context::{AnnotationThunk, JexlContext, MapContext, SharedContext, ThreadContextScope},
    engine::{Engine, EngineBuilder, Expression, Script, ScriptCallable},
    error::{CodeLoc, CodeRange, ErrorKind, EvalResult, JexlError, ScriptFrame, VariableIssue, source_snippet},
    expressions::{Ast, Pragma},
    options::{Features, OptionFlag, Options, UnknownFlag},
    permissions::{ClassSandbox, JexlPermissions, PermissionParseError, Sandbox, SandboxAction},
    tracer::{EngineTracer, NoopTracer, RecordingTracer, StderrTracer, TraceEvent},
    types::{Decimal, IntRange, MathContext, RoundingMode},
    uberspect::{ClassDescriptor, HostObject, JexlOperator, MethodEntry, Namespace, NamespaceFunctor, NativeFn, ResolverStrategy, Uberspect},
    value::{Closure, MapKey, Value, ValueMap, ValueSet},
};
