//! The host-facing engine: builder, expressions and scripts.
//!
//! An [`Engine`] is a cheap-clone handle over shared state (options,
//! feature gates, the uberspect, the expression cache, registered
//! namespaces). One engine serves many concurrent evaluations; each
//! evaluation gets its own interpreter and frame, so the only shared
//! mutable state is the two internally synchronized caches.

use std::{collections::BTreeSet, sync::Arc};

use ahash::AHashMap;

use crate::{
    cache::{DEFAULT_CACHE_SIZE, DEFAULT_CACHE_THRESHOLD, SourceCache},
    context::{self, JexlContext, SharedContext},
    error::JexlError,
    expressions::{AccessKey, Ast, Block, CallTarget, Expr, ExprLoc, Stmt, StmtLoc, TemplatePart},
    interpreter,
    options::{Features, OptionFlag, Options},
    parse,
    permissions::{JexlPermissions, Sandbox},
    prepare::{self, PrepareSettings},
    tracer::{EngineTracer, NoopTracer},
    types::MathContext,
    uberspect::{ClassDescriptor, Namespace, ResolverStrategy, Uberspect},
    value::Value,
};

/// Shared engine state. Everything here is immutable after `create()`
/// except the uberspect caches and the expression cache, which guard
/// themselves.
pub(crate) struct EngineCore {
    pub(crate) options: Options,
    pub(crate) features: Features,
    pub(crate) uberspect: Uberspect,
    pub(crate) cache: SourceCache,
    pub(crate) tracer: Arc<dyn EngineTracer>,
    pub(crate) namespaces: AHashMap<String, Namespace>,
    pub(crate) stack_overflow: usize,
}

impl EngineCore {
    /// Resolves a registered class as a static-method namespace (used by
    /// the `jexl.namespace.*` pragma).
    pub(crate) fn namespace_for_class(&self, class: &str) -> Option<Namespace> {
        self.uberspect.find_class(class).map(Namespace::Class)
    }
}

/// The expression/script engine.
#[derive(Clone)]
pub struct Engine {
    core: Arc<EngineCore>,
}

impl Engine {
    /// An engine with all defaults; equivalent to `EngineBuilder::new().create()`.
    #[must_use]
    pub fn new() -> Self {
        EngineBuilder::new().create()
    }

    /// Parses an expression, consulting the engine's expression cache.
    pub fn create_expression(&self, source: &str) -> Result<Expression, Box<JexlError>> {
        let ast = self.parse_cached(source, None, &[])?;
        Ok(Expression {
            core: Arc::clone(&self.core),
            ast,
        })
    }

    /// Parses a script with no declared parameters.
    pub fn create_script(&self, source: &str) -> Result<Script, Box<JexlError>> {
        let ast = self.parse_cached(source, None, &[])?;
        Ok(Script {
            core: Arc::clone(&self.core),
            ast,
        })
    }

    /// Parses a script whose first frame slots are the named parameters,
    /// bound from the arguments at execution time.
    pub fn create_script_with_params(&self, source: &str, params: &[&str]) -> Result<Script, Box<JexlError>> {
        let ast = self.parse_cached(source, None, params)?;
        Ok(Script {
            core: Arc::clone(&self.core),
            ast,
        })
    }

    /// Parses without caching, under an explicit feature set.
    pub fn parse(&self, source: &str, features: &Features, name: Option<&str>) -> Result<Arc<Ast>, Box<JexlError>> {
        self.parse_uncached(source, features, name, &[])
    }

    fn parse_cached(&self, source: &str, name: Option<&str>, params: &[&str]) -> Result<Arc<Ast>, Box<JexlError>> {
        // parameterized scripts get distinct frames; only the plain form
        // is safe to share through the cache
        if params.is_empty() {
            if let Some(ast) = self.core.cache.get(source) {
                return Ok(ast);
            }
        }
        let ast = self.parse_uncached(source, &self.core.features, name, params)?;
        if params.is_empty() {
            self.core.cache.put(source, &ast);
        }
        Ok(ast)
    }

    fn parse_uncached(
        &self,
        source: &str,
        features: &Features,
        name: Option<&str>,
        params: &[&str],
    ) -> Result<Arc<Ast>, Box<JexlError>> {
        let raw = parse::parse(source, features, name)?;
        let settings = PrepareSettings {
            lexical: self.core.options.lexical(),
            lexical_shade: self.core.options.lexical_shade(),
        };
        let ast = prepare::prepare(raw, params, features, settings, source.to_string(), name.map(String::from))?;
        Ok(Arc::new(ast))
    }

    /// The set of free (context) variables a parsed tree references, as
    /// dotted paths split into segments.
    #[must_use]
    pub fn variables(ast: &Ast) -> BTreeSet<Vec<String>> {
        let mut out = BTreeSet::new();
        collect_block(&ast.body, &mut out);
        for lambda in &ast.lambdas {
            match &lambda.body {
                crate::expressions::LambdaBody::Expr(expr) => collect_expr(expr, &mut out),
                crate::expressions::LambdaBody::Block(block) => collect_block(block, &mut out),
            }
        }
        out
    }

    /// Registers (or replaces) a host class descriptor on the live engine.
    pub fn register_class(&self, descriptor: ClassDescriptor) {
        self.core.uberspect.register(descriptor);
    }

    /// Invalidates all cached member resolutions; call after swapping
    /// registered classes (the class-loader-change analogue).
    pub fn bump_class_generation(&self) {
        self.core.uberspect.bump_generation();
    }

    /// Publishes a context for the current thread; host callbacks can read
    /// it back with [`Engine::thread_context`].
    pub fn set_thread_context(&self, ctx: Option<SharedContext>) {
        context::set_thread_context(ctx);
    }

    /// The context published on the current thread, if any.
    #[must_use]
    pub fn thread_context(&self) -> Option<SharedContext> {
        context::get_thread_context()
    }

    /// Number of entries currently held by the expression cache.
    #[must_use]
    pub fn cached_expressions(&self) -> usize {
        self.core.cache.len()
    }

    /// Number of member resolutions held by the uberspect cache.
    #[must_use]
    pub fn cached_member_resolutions(&self) -> usize {
        self.core.uberspect.cached_resolutions()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// A parsed expression bound to its engine.
#[derive(Clone)]
pub struct Expression {
    core: Arc<EngineCore>,
    ast: Arc<Ast>,
}

impl Expression {
    pub fn evaluate(&self, ctx: &mut dyn JexlContext) -> Result<Value, Box<JexlError>> {
        interpreter::evaluate(&self.core, &self.ast, ctx, &[])
    }

    #[must_use]
    pub fn source_text(&self) -> &str {
        self.ast.source_text()
    }

    #[must_use]
    pub fn parsed_text(&self) -> String {
        self.ast.parsed_text()
    }

    /// Free variables referenced by this expression.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<Vec<String>> {
        Engine::variables(&self.ast)
    }

    /// Defers evaluation: the returned callable can be invoked later (or
    /// repeatedly) against a context.
    #[must_use]
    pub fn callable(&self) -> ScriptCallable {
        ScriptCallable {
            core: Arc::clone(&self.core),
            ast: Arc::clone(&self.ast),
            args: Vec::new(),
        }
    }
}

/// A parsed script bound to its engine.
#[derive(Clone)]
pub struct Script {
    core: Arc<EngineCore>,
    ast: Arc<Ast>,
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script").finish_non_exhaustive()
    }
}

impl Script {
    pub fn execute(&self, ctx: &mut dyn JexlContext) -> Result<Value, Box<JexlError>> {
        interpreter::evaluate(&self.core, &self.ast, ctx, &[])
    }

    /// Executes with arguments bound to the script's declared parameters.
    pub fn execute_with_args(&self, ctx: &mut dyn JexlContext, args: &[Value]) -> Result<Value, Box<JexlError>> {
        interpreter::evaluate(&self.core, &self.ast, ctx, args)
    }

    /// Defers execution with pre-bound arguments.
    #[must_use]
    pub fn callable(&self, args: Vec<Value>) -> ScriptCallable {
        ScriptCallable {
            core: Arc::clone(&self.core),
            ast: Arc::clone(&self.ast),
            args,
        }
    }

    /// Declared parameter names.
    #[must_use]
    pub fn parameters(&self) -> Vec<String> {
        self.ast.frame.parameters().map(|p| p.to_string()).collect()
    }

    /// Declared locals that are not parameters.
    #[must_use]
    pub fn local_variables(&self) -> Vec<String> {
        self.ast.frame.locals().map(|p| p.to_string()).collect()
    }

    /// Free (context) variables as dotted paths.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<Vec<String>> {
        Engine::variables(&self.ast)
    }

    #[must_use]
    pub fn source_text(&self) -> &str {
        self.ast.source_text()
    }

    #[must_use]
    pub fn parsed_text(&self) -> String {
        self.ast.parsed_text()
    }
}

/// A deferred evaluation: a script (or expression) plus pre-bound
/// arguments, invocable any number of times.
pub struct ScriptCallable {
    core: Arc<EngineCore>,
    ast: Arc<Ast>,
    args: Vec<Value>,
}

impl ScriptCallable {
    pub fn call(&self, ctx: &mut dyn JexlContext) -> Result<Value, Box<JexlError>> {
        interpreter::evaluate(&self.core, &self.ast, ctx, &self.args)
    }
}

/// Chainable configuration terminating in [`EngineBuilder::create`].
pub struct EngineBuilder {
    options: Options,
    features: Features,
    permissions: JexlPermissions,
    sandbox: Option<Sandbox>,
    strategy: ResolverStrategy,
    cache_size: i32,
    cache_threshold: usize,
    stack_overflow: usize,
    tracer: Arc<dyn EngineTracer>,
    namespaces: AHashMap<String, Namespace>,
    classes: Vec<ClassDescriptor>,
}

impl EngineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: Options::default(),
            features: Features::default(),
            permissions: JexlPermissions::default(),
            sandbox: None,
            strategy: ResolverStrategy::default(),
            cache_size: DEFAULT_CACHE_SIZE,
            cache_threshold: DEFAULT_CACHE_THRESHOLD,
            stack_overflow: 128,
            tracer: Arc::new(NoopTracer),
            namespaces: AHashMap::new(),
            classes: Vec::new(),
        }
    }

    fn flag(mut self, flag: OptionFlag, on: bool) -> Self {
        self.options.set_flag(flag, on);
        self
    }

    #[must_use]
    pub fn cancellable(self, on: bool) -> Self {
        self.flag(OptionFlag::Cancellable, on)
    }

    #[must_use]
    pub fn strict(self, on: bool) -> Self {
        self.flag(OptionFlag::Strict, on)
    }

    #[must_use]
    pub fn silent(self, on: bool) -> Self {
        self.flag(OptionFlag::Silent, on)
    }

    #[must_use]
    pub fn safe(self, on: bool) -> Self {
        self.flag(OptionFlag::Safe, on)
    }

    #[must_use]
    pub fn lexical(self, on: bool) -> Self {
        self.flag(OptionFlag::Lexical, on)
    }

    #[must_use]
    pub fn antish(self, on: bool) -> Self {
        self.flag(OptionFlag::Antish, on)
    }

    #[must_use]
    pub fn lexical_shade(self, on: bool) -> Self {
        self.flag(OptionFlag::LexicalShade, on)
    }

    #[must_use]
    pub fn shared_instance(self, on: bool) -> Self {
        self.flag(OptionFlag::SharedInstance, on)
    }

    #[must_use]
    pub fn const_capture(self, on: bool) -> Self {
        self.flag(OptionFlag::ConstCapture, on)
    }

    #[must_use]
    pub fn strict_interpolation(self, on: bool) -> Self {
        self.flag(OptionFlag::StrictInterpolation, on)
    }

    #[must_use]
    pub fn boolean_logical(self, on: bool) -> Self {
        self.flag(OptionFlag::BooleanLogical, on)
    }

    /// Applies a flag string like `"+strict -safe lexical"`.
    pub fn flags(mut self, flags: &str) -> Result<Self, Box<JexlError>> {
        self.options.apply_flag_string(flags).map_err(|err| {
            JexlError::new(
                crate::error::ErrorKind::Feature,
                crate::error::CodeLoc::new(0, 0),
                err.to_string(),
            )
        })?;
        Ok(self)
    }

    #[must_use]
    pub fn strict_arithmetic(mut self, on: bool) -> Self {
        self.options.strict_arithmetic = on;
        self
    }

    #[must_use]
    pub fn math_context(mut self, ctx: MathContext) -> Self {
        self.options.math_context = ctx;
        self
    }

    #[must_use]
    pub fn math_scale(mut self, scale: i32) -> Self {
        self.options.math_scale = scale;
        self
    }

    #[must_use]
    pub fn imports<I: IntoIterator<Item = S>, S: Into<String>>(mut self, packages: I) -> Self {
        self.options.imports = packages.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    #[must_use]
    pub fn permissions(mut self, permissions: JexlPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    #[must_use]
    pub fn sandbox(mut self, sandbox: Sandbox) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    #[must_use]
    pub fn strategy(mut self, strategy: ResolverStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Expression-cache capacity; non-positive disables the cache.
    #[must_use]
    pub fn cache(mut self, size: i32) -> Self {
        self.cache_size = size;
        self
    }

    /// Source length above which expressions bypass the cache.
    #[must_use]
    pub fn cache_threshold(mut self, threshold: usize) -> Self {
        self.cache_threshold = threshold;
        self
    }

    /// Maximum interpreter call-frame depth before `StackOverflow`.
    #[must_use]
    pub fn stack_overflow(mut self, limit: usize) -> Self {
        self.stack_overflow = limit.max(1);
        self
    }

    #[must_use]
    pub fn tracer(mut self, tracer: Arc<dyn EngineTracer>) -> Self {
        self.tracer = tracer;
        self
    }

    /// Registers a namespace visible to every script as `name:fn(...)`.
    #[must_use]
    pub fn namespace(mut self, name: impl Into<String>, ns: Namespace) -> Self {
        self.namespaces.insert(name.into(), ns);
        self
    }

    /// Registers a host class descriptor.
    #[must_use]
    pub fn register_class(mut self, descriptor: ClassDescriptor) -> Self {
        self.classes.push(descriptor);
        self
    }

    #[must_use]
    pub fn create(self) -> Engine {
        let uberspect = Uberspect::new(self.strategy, self.permissions, self.sandbox);
        for descriptor in self.classes {
            uberspect.register(descriptor);
        }
        Engine {
            core: Arc::new(EngineCore {
                options: self.options,
                features: self.features,
                uberspect,
                cache: SourceCache::new(self.cache_size, self.cache_threshold),
                tracer: self.tracer,
                namespaces: self.namespaces,
                stack_overflow: self.stack_overflow,
            }),
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_block(block: &Block, out: &mut BTreeSet<Vec<String>>) {
    for stmt in &block.stmts {
        collect_stmt(stmt, out);
    }
}

fn collect_stmt(stmt: &StmtLoc, out: &mut BTreeSet<Vec<String>>) {
    match &stmt.stmt {
        Stmt::Expression(expr) => collect_expr(expr, out),
        Stmt::Var { init, .. } => {
            if let Some(init) = init {
                collect_expr(init, out);
            }
        }
        Stmt::Assign { target, value } => {
            collect_expr(target, out);
            collect_expr(value, out);
        }
        Stmt::If {
            cond,
            then_block,
            else_block,
        } => {
            collect_expr(cond, out);
            collect_block(then_block, out);
            if let Some(else_block) = else_block {
                collect_block(else_block, out);
            }
        }
        Stmt::While { cond, body } => {
            collect_expr(cond, out);
            collect_block(body, out);
        }
        Stmt::DoWhile { body, cond } => {
            collect_block(body, out);
            collect_expr(cond, out);
        }
        Stmt::ForEach { iterable, body, .. } => {
            collect_expr(iterable, out);
            collect_block(body, out);
        }
        Stmt::Return(Some(value)) => collect_expr(value, out),
        Stmt::Return(None) | Stmt::Break | Stmt::Continue => {}
        Stmt::Block(block) => collect_block(block, out),
        Stmt::Annotated { args, body, .. } => {
            for arg in args {
                collect_expr(arg, out);
            }
            collect_stmt(body, out);
        }
    }
}

fn collect_expr(expr: &ExprLoc, out: &mut BTreeSet<Vec<String>>) {
    match &expr.expr {
        Expr::Literal(_) | Expr::Lambda(_) => {}
        Expr::Identifier(id) => {
            if id.slot.is_none() {
                out.insert(vec![id.name.to_string()]);
            }
        }
        Expr::Antish { parts, .. } => {
            out.insert(parts.iter().map(|p| p.to_string()).collect());
        }
        Expr::Unary { operand, .. } => collect_expr(operand, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_expr(lhs, out);
            collect_expr(rhs, out);
        }
        Expr::Ternary { cond, then, other } => {
            collect_expr(cond, out);
            if let Some(then) = then {
                collect_expr(then, out);
            }
            collect_expr(other, out);
        }
        Expr::Access { object, key, .. } => {
            collect_expr(object, out);
            if let AccessKey::Index(index) = key {
                collect_expr(index, out);
            }
        }
        Expr::MethodCall { object, args, .. } => {
            collect_expr(object, out);
            for arg in args {
                collect_expr(arg, out);
            }
        }
        Expr::Call { target, args } => {
            if let CallTarget::Value(callee) = target {
                collect_expr(callee, out);
            }
            for arg in args {
                collect_expr(arg, out);
            }
        }
        Expr::New { class, args } => {
            collect_expr(class, out);
            for arg in args {
                collect_expr(arg, out);
            }
        }
        Expr::List(items) | Expr::Set(items) => {
            for item in items {
                collect_expr(item, out);
            }
        }
        Expr::Map(entries) => {
            for (k, v) in entries {
                collect_expr(k, out);
                collect_expr(v, out);
            }
        }
        Expr::Template(parts) => {
            for part in parts {
                if let TemplatePart::Expr(sub) = part {
                    collect_expr(sub, out);
                }
            }
        }
    }
}
