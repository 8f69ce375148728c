//! The tree-walking evaluator.
//!
//! Control flow travels as a sum type: every statement produces a
//! [`Completion`] (`Normal`, `Return`, `Break`, `Continue`) inside a
//! `Result`; cancellation and real errors travel as `Err` and only those
//! can escape the top-level evaluation.
//!
//! Cancellation is polled cooperatively at every statement boundary, every
//! loop iteration and before every method invocation. A depth counter
//! guards both expression recursion and closure call frames so a runaway
//! script raises `StackOverflow` instead of exhausting the host stack.

use std::{
    rc::Rc,
    sync::{Arc, atomic::{AtomicBool, Ordering as AtomicOrdering}},
};

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    arithmetic::{ArithError, Arithmetic},
    context::{AnnotationThunk, JexlContext},
    engine::EngineCore,
    error::{CodeRange, ErrorKind, EvalResult, JexlError, VariableIssue},
    expressions::{
        AccessKey, Ast, BinaryOp, Block, CallTarget, Expr, ExprLoc, Identifier, LambdaBody, LambdaId, Literal, Stmt,
        StmtLoc, TemplatePart, UnaryOp,
    },
    frame::{Frame, SetOutcome, SlotId},
    options::Options,
    uberspect::{ClassDescriptor, JexlOperator, MethodHandle, Namespace, Resolution, TryResult, Uberspect},
    value::{CaptureCell, Closure, MapKey, Value, ValueMap, ValueSet},
};

/// Hard ceiling on expression-nesting recursion, independent of the
/// configurable call-frame limit. Protects the host stack from
/// pathologically nested expressions.
const MAX_EXPR_DEPTH: usize = 512;

/// Statement outcome.
#[derive(Debug)]
pub(crate) enum Completion {
    Normal(Value),
    Return(Value),
    Break,
    Continue,
}

type StepResult = Result<Completion, Box<JexlError>>;

/// One script or lambda activation.
struct Activation {
    frame: Frame,
    ast: Arc<Ast>,
    lambda: Option<LambdaId>,
}

/// Per-evaluation namespace instance.
enum NsInstance {
    Class(Arc<ClassDescriptor>),
    Object(Value),
}

/// Runs a prepared tree against a context.
pub(crate) fn evaluate(
    engine: &EngineCore,
    ast: &Arc<Ast>,
    ctx: &mut dyn JexlContext,
    args: &[Value],
) -> Result<Value, Box<JexlError>> {
    // the context may override the engine options; the interpreter always
    // works on its own copy so pragmas stay evaluation-local
    let options = if engine.options.shared_instance() {
        engine.options.clone()
    } else {
        ctx.engine_options().unwrap_or_else(|| engine.options.clone())
    };
    let mut interp = Interpreter {
        engine,
        options,
        arithmetic: Arithmetic::new(true, crate::types::MathContext::DECIMAL128, -1),
        cancelled: AtomicBool::new(false),
        expr_depth: 0,
        ns_instances: AHashMap::new(),
        frames: Vec::new(),
    };
    let result = interp.run(ast, ctx, args);
    match result {
        Ok(value) => Ok(value),
        Err(err) if err.is_cancel() => {
            if interp.options.cancellable() {
                Err(attach_name(err, ast))
            } else {
                Ok(Value::Null)
            }
        }
        Err(err) => {
            if interp.options.silent() {
                engine.tracer.silent_error(&err);
                Ok(Value::Null)
            } else {
                Err(attach_name(err, ast))
            }
        }
    }
}

fn attach_name(mut err: Box<JexlError>, ast: &Ast) -> Box<JexlError> {
    if let Some(name) = ast.name() {
        err.set_script(name);
    }
    err
}

struct Interpreter<'e> {
    engine: &'e EngineCore,
    options: Options,
    arithmetic: Arithmetic,
    /// Internal cancel flag, set by the script-level `cancel()` builtin.
    cancelled: AtomicBool,
    expr_depth: usize,
    ns_instances: AHashMap<Arc<str>, NsInstance>,
    frames: Vec<Activation>,
}

impl<'e> Interpreter<'e> {
    fn uberspect(&self) -> &'e Uberspect {
        &self.engine.uberspect
    }

    fn run(&mut self, ast: &Arc<Ast>, ctx: &mut dyn JexlContext, args: &[Value]) -> Result<Value, Box<JexlError>> {
        self.apply_pragmas(ast, ctx);
        self.arithmetic = Arithmetic::from_options(&self.options);

        let mut frame = Frame::new(&ast.frame);
        let param_count = ast.frame.param_count() as usize;
        for (i, arg) in args.iter().take(param_count).enumerate() {
            frame.set(SlotId(i as u16), arg.clone());
        }
        self.frames.push(Activation {
            frame,
            ast: Arc::clone(ast),
            lambda: None,
        });
        let local_ast = Arc::clone(ast);
        let completion = self.eval_block(ctx, &local_ast.body);
        self.frames.pop();
        match completion? {
            Completion::Normal(value) | Completion::Return(value) => Ok(value),
            Completion::Break | Completion::Continue => {
                unreachable!("break/continue outside loops are parse errors")
            }
        }
    }

    /// Dispatches prologue pragmas: the reserved `jexl.*` keys adjust this
    /// evaluation's options, and every pragma reaches the context.
    fn apply_pragmas(&mut self, ast: &Ast, ctx: &mut dyn JexlContext) {
        for pragma in ast.pragmas() {
            let value = literal_value(&pragma.value);
            if pragma.key == "jexl.options" {
                if let Value::Str(flags) = &value {
                    // unknown flags in a pragma are ignored, not fatal
                    let _ = self.options.apply_flag_string(flags);
                }
            } else if pragma.key == "jexl.import" {
                if let Value::Str(package) = &value {
                    self.options.imports.push(package.to_string());
                }
            } else if let Some(ns) = pragma.key.strip_prefix("jexl.namespace.") {
                if let Value::Str(class) = &value {
                    if let Some(namespace) = self.engine.namespace_for_class(class) {
                        self.options.namespaces.insert(ns.to_string(), namespace);
                    }
                }
            }
            ctx.process_pragma(&pragma.key, &value);
        }
    }

    fn frame(&mut self) -> &mut Frame {
        &mut self.frames.last_mut().expect("active frame").frame
    }

    /// Cancellation poll; raises `Cancelled` whenever any cancel source is
    /// set. The top-level evaluator converts it to a null result when the
    /// `cancellable` option is off.
    fn poll_cancel(&self, ctx: &dyn JexlContext, pos: CodeRange) -> EvalResult<()> {
        let tripped = ctx
            .cancellation()
            .is_some_and(|bit| bit.load(AtomicOrdering::Relaxed))
            || self.cancelled.load(AtomicOrdering::Relaxed);
        if tripped {
            self.engine.tracer.cancelled(pos.start);
            return Err(JexlError::cancelled(pos.start));
        }
        Ok(())
    }

    fn enter(&mut self, pos: CodeRange) -> EvalResult<()> {
        self.expr_depth += 1;
        if self.expr_depth > MAX_EXPR_DEPTH || self.frames.len() > self.engine.stack_overflow {
            return Err(JexlError::at(ErrorKind::StackOverflow, pos, "evaluation too deep"));
        }
        Ok(())
    }

    fn eval_block(&mut self, ctx: &mut dyn JexlContext, block: &Block) -> StepResult {
        let mut last = Value::Null;
        for stmt in &block.stmts {
            self.poll_cancel(ctx, stmt.pos)?;
            match self.eval_stmt(ctx, stmt) {
                Ok(Completion::Normal(value)) => last = value,
                other => {
                    self.exit_block(block);
                    return other;
                }
            }
        }
        self.exit_block(block);
        Ok(Completion::Normal(last))
    }

    /// Clears declaration state for the block's locals so re-entering the
    /// block (loop bodies) starts fresh.
    fn exit_block(&mut self, block: &Block) {
        if block.declared_slots.is_empty() {
            return;
        }
        let frame = self.frame();
        for &slot in &block.declared_slots {
            frame.undeclare(slot);
        }
    }

    fn eval_stmt(&mut self, ctx: &mut dyn JexlContext, stmt: &StmtLoc) -> StepResult {
        match &stmt.stmt {
            Stmt::Expression(expr) => Ok(Completion::Normal(self.eval_expr(ctx, expr)?)),
            Stmt::Var { name, init, .. } => {
                let slot = name.slot.expect("declarations are always slot-bound");
                let value = match init {
                    Some(init) => Some(self.eval_expr(ctx, init)?),
                    None => None,
                };
                if self.options.lexical() && self.frame().is_declared(slot) {
                    return Err(JexlError::at(
                        ErrorKind::Variable(VariableIssue::Redefined),
                        name.pos,
                        format!("'{}'", name.name),
                    ));
                }
                self.frame().declare(slot);
                match value {
                    Some(value) => {
                        self.set_slot(slot, value.clone(), name)?;
                        Ok(Completion::Normal(value))
                    }
                    None => Ok(Completion::Normal(Value::Null)),
                }
            }
            Stmt::Assign { target, value } => {
                let value = self.eval_expr(ctx, value)?;
                self.assign(ctx, target, value.clone())?;
                Ok(Completion::Normal(value))
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                if self.eval_expr(ctx, cond)?.truthy() {
                    self.eval_block(ctx, then_block)
                } else if let Some(else_block) = else_block {
                    self.eval_block(ctx, else_block)
                } else {
                    Ok(Completion::Normal(Value::Null))
                }
            }
            Stmt::While { cond, body } => {
                while self.eval_expr(ctx, cond)?.truthy() {
                    self.poll_cancel(ctx, stmt.pos)?;
                    match self.eval_block(ctx, body)? {
                        Completion::Break => break,
                        Completion::Continue | Completion::Normal(_) => {}
                        done @ Completion::Return(_) => return Ok(done),
                    }
                }
                Ok(Completion::Normal(Value::Null))
            }
            Stmt::DoWhile { body, cond } => {
                loop {
                    self.poll_cancel(ctx, stmt.pos)?;
                    match self.eval_block(ctx, body)? {
                        Completion::Break => break,
                        Completion::Continue | Completion::Normal(_) => {}
                        done @ Completion::Return(_) => return Ok(done),
                    }
                    if !self.eval_expr(ctx, cond)?.truthy() {
                        break;
                    }
                }
                Ok(Completion::Normal(Value::Null))
            }
            Stmt::ForEach { var, iterable, body } => {
                let slot = var.slot.expect("loop variables are slot-bound");
                let iterable = self.eval_expr(ctx, iterable)?;
                let items = self.iterate(&iterable, stmt.pos)?;
                for item in items {
                    self.poll_cancel(ctx, stmt.pos)?;
                    self.frame().declare(slot);
                    self.set_slot(slot, item, var)?;
                    match self.eval_block(ctx, body)? {
                        Completion::Break => break,
                        Completion::Continue | Completion::Normal(_) => {}
                        done @ Completion::Return(_) => {
                            self.frame().undeclare(slot);
                            return Ok(done);
                        }
                    }
                }
                self.frame().undeclare(slot);
                Ok(Completion::Normal(Value::Null))
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(value) => self.eval_expr(ctx, value)?,
                    None => Value::Null,
                };
                Ok(Completion::Return(value))
            }
            Stmt::Break => Ok(Completion::Break),
            Stmt::Continue => Ok(Completion::Continue),
            Stmt::Block(block) => self.eval_block(ctx, block),
            Stmt::Annotated { name, args, body } => self.eval_annotated(ctx, stmt.pos, name, args, body),
        }
    }

    /// Materializes the values an iterable produces, snapshotting shared
    /// containers so mutation inside the loop does not affect iteration.
    fn iterate(&self, value: &Value, pos: CodeRange) -> EvalResult<Vec<Value>> {
        match value {
            Value::List(list) => Ok(list.borrow().clone()),
            Value::Set(set) => Ok(set.borrow().iter().map(|k| k.value().clone()).collect()),
            Value::Map(map) => Ok(map.borrow().values().cloned().collect()),
            Value::Range(range) => Ok(range.iter().map(Value::Int).collect()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::string(c.to_string())).collect()),
            Value::Null => {
                if self.options.strict() {
                    Err(JexlError::at(ErrorKind::Operator, pos, "null iterable"))
                } else {
                    Ok(Vec::new())
                }
            }
            other => Err(JexlError::at(
                ErrorKind::Operator,
                pos,
                format!("{} is not iterable", other.type_name()),
            )),
        }
    }

    fn eval_annotated(
        &mut self,
        ctx: &mut dyn JexlContext,
        pos: CodeRange,
        name: &str,
        args: &[ExprLoc],
        body: &StmtLoc,
    ) -> StepResult {
        let mut arg_values = SmallVec::<[Value; 4]>::new();
        for arg in args {
            arg_values.push(self.eval_expr(ctx, arg)?);
        }
        let mut thunk = StatementThunk {
            interp: self,
            stmt: body,
            invocations: 0,
        };
        let outcome = ctx.process_annotation(name, &arg_values, &mut thunk);
        let invocations = thunk.invocations;
        match outcome {
            Some(result) => {
                if invocations != 1 {
                    return Err(JexlError::at(
                        ErrorKind::Annotation,
                        pos,
                        format!("@{name} invoked its statement {invocations} times"),
                    ));
                }
                result.map(Completion::Normal)
            }
            None => {
                if self.options.strict() {
                    return Err(JexlError::at(ErrorKind::Annotation, pos, format!("no processor for @{name}")));
                }
                self.engine.tracer.annotation_fallback(pos.start, name);
                self.eval_stmt(ctx, body)
            }
        }
    }

    fn set_slot(&mut self, slot: SlotId, value: Value, id: &Identifier) -> EvalResult<()> {
        match self.frame().set(slot, value) {
            SetOutcome::Ok => Ok(()),
            SetOutcome::ConstViolation => Err(JexlError::at(
                ErrorKind::Variable(VariableIssue::Redefined),
                id.pos,
                format!("const '{}'", id.name),
            )),
        }
    }

    fn assign(&mut self, ctx: &mut dyn JexlContext, target: &ExprLoc, value: Value) -> EvalResult<()> {
        match &target.expr {
            Expr::Identifier(id) => match id.slot {
                Some(slot) => {
                    self.frame().declare(slot);
                    self.set_slot(slot, value, id)
                }
                None => self.set_context_var(ctx, &id.name, value, target.pos),
            },
            Expr::Antish { parts, prefixes } => {
                if self.options.antish() {
                    for i in (0..prefixes.len()).rev() {
                        if ctx.has(&prefixes[i]) {
                            if i == prefixes.len() - 1 {
                                ctx.set(&prefixes[i], value);
                                return Ok(());
                            }
                            let base = ctx.get(&prefixes[i]).unwrap_or(Value::Null);
                            return self.assign_members(ctx, base, &parts[i + 1..], value, target.pos);
                        }
                    }
                    // nothing matched: the whole dotted name becomes a new
                    // context variable
                    return self.set_context_var(ctx, prefixes.last().expect("antish prefix"), value, target.pos);
                }
                if ctx.has(&parts[0]) {
                    let base = ctx.get(&parts[0]).unwrap_or(Value::Null);
                    return self.assign_members(ctx, base, &parts[1..], value, target.pos);
                }
                if self.options.strict() {
                    return Err(JexlError::at(
                        ErrorKind::Variable(VariableIssue::Undefined),
                        target.pos,
                        format!("'{}'", parts[0]),
                    ));
                }
                Ok(())
            }
            Expr::Access { object, key, .. } => {
                let receiver = self.eval_expr(ctx, object)?;
                let key = match key {
                    AccessKey::Name(name) => Value::Str(Arc::clone(name)),
                    AccessKey::Index(index) => self.eval_expr(ctx, index)?,
                };
                self.write_property(&receiver, &key, value, target.pos)
            }
            _ => Err(JexlError::at(ErrorKind::Assignment, target.pos, "invalid assignment target")),
        }
    }

    /// Navigates `base.p1.p2...` and writes the final member.
    fn assign_members(
        &mut self,
        _ctx: &mut dyn JexlContext,
        base: Value,
        members: &[Arc<str>],
        value: Value,
        pos: CodeRange,
    ) -> EvalResult<()> {
        let mut receiver = base;
        for member in &members[..members.len() - 1] {
            receiver = self.read_property(&receiver, &Value::Str(Arc::clone(member)), false, pos)?;
        }
        let last = members.last().expect("at least one member");
        self.write_property(&receiver, &Value::Str(Arc::clone(last)), value, pos)
    }

    fn set_context_var(&self, ctx: &mut dyn JexlContext, name: &str, value: Value, pos: CodeRange) -> EvalResult<()> {
        if self.options.lexical_shade() && !ctx.has(name) {
            return Err(JexlError::at(
                ErrorKind::Variable(VariableIssue::Undefined),
                pos,
                format!("'{name}'"),
            ));
        }
        ctx.set(name, value);
        Ok(())
    }

    fn write_property(&self, receiver: &Value, key: &Value, value: Value, pos: CodeRange) -> EvalResult<()> {
        if receiver.is_null() {
            if self.options.safe() {
                self.engine.tracer.safe_null(pos.start, "property write on null");
                return Ok(());
            }
            return Err(JexlError::at(
                ErrorKind::Property { undefined: false },
                pos,
                format!("'{key}' on null"),
            ));
        }
        match self.uberspect().set_property(receiver, key, value) {
            Resolution::Value(_) => Ok(()),
            Resolution::Miss => {
                if self.options.strict() {
                    Err(JexlError::at(
                        ErrorKind::Property { undefined: true },
                        pos,
                        format!("'{key}'"),
                    ))
                } else {
                    Ok(())
                }
            }
            Resolution::Error(detail) => Err(JexlError::at(ErrorKind::Property { undefined: false }, pos, detail)),
        }
    }

    fn eval_expr(&mut self, ctx: &mut dyn JexlContext, expr: &ExprLoc) -> EvalResult<Value> {
        self.enter(expr.pos)?;
        let result = self.eval_expr_inner(ctx, expr);
        self.expr_depth -= 1;
        result
    }

    fn eval_expr_inner(&mut self, ctx: &mut dyn JexlContext, expr: &ExprLoc) -> EvalResult<Value> {
        match &expr.expr {
            Expr::Literal(lit) => Ok(literal_value(lit)),
            Expr::Identifier(id) => self.read_identifier(ctx, id),
            Expr::Antish { parts, prefixes } => self.read_antish(ctx, parts, prefixes, expr.pos),
            Expr::Unary { op, operand } => {
                let value = self.eval_expr(ctx, operand)?;
                self.apply_unary(*op, &value, expr.pos)
            }
            Expr::Binary { op, lhs, rhs } => self.eval_binary(ctx, *op, lhs, rhs, expr.pos),
            Expr::Ternary { cond, then, other } => {
                let cond_value = self.eval_expr(ctx, cond)?;
                match then {
                    // Elvis: the condition value itself when truthy
                    None => {
                        if cond_value.truthy() {
                            Ok(cond_value)
                        } else {
                            self.eval_expr(ctx, other)
                        }
                    }
                    Some(then) => {
                        if cond_value.truthy() {
                            self.eval_expr(ctx, then)
                        } else {
                            self.eval_expr(ctx, other)
                        }
                    }
                }
            }
            Expr::Access { object, key, safe } => {
                let receiver = self.eval_expr(ctx, object)?;
                let key = match key {
                    AccessKey::Name(name) => Value::Str(Arc::clone(name)),
                    AccessKey::Index(index) => self.eval_expr(ctx, index)?,
                };
                self.read_property(&receiver, &key, *safe, expr.pos)
            }
            Expr::MethodCall {
                object,
                name,
                args,
                safe,
            } => {
                let receiver = self.eval_expr(ctx, object)?;
                let mut arg_values = SmallVec::<[Value; 4]>::new();
                for arg in args {
                    arg_values.push(self.eval_expr(ctx, arg)?);
                }
                if receiver.is_null() {
                    if *safe || self.options.safe() {
                        self.engine.tracer.safe_null(expr.pos.start, name);
                        return Ok(Value::Null);
                    }
                    return Err(JexlError::at(
                        ErrorKind::Method,
                        expr.pos,
                        format!("null receiver for {}", signature(name, &arg_values)),
                    ));
                }
                if let Value::Lambda(closure) = &receiver {
                    if &**name == "call" {
                        let closure = Rc::clone(closure);
                        return self.call_closure(ctx, &closure, &arg_values, expr.pos);
                    }
                }
                self.poll_cancel(ctx, expr.pos)?;
                match self.uberspect().get_method(&receiver, name, arg_values.len()) {
                    TryResult::Ok(handle) => self.invoke(&handle, &receiver, &arg_values, name, expr.pos),
                    TryResult::Failed => {
                        if self.options.strict() {
                            Err(JexlError::at(
                                ErrorKind::Method,
                                expr.pos,
                                signature(name, &arg_values),
                            ))
                        } else {
                            Ok(Value::Null)
                        }
                    }
                }
            }
            Expr::Call { target, args } => {
                let mut arg_values = SmallVec::<[Value; 4]>::new();
                for arg in args {
                    arg_values.push(self.eval_expr(ctx, arg)?);
                }
                match target {
                    CallTarget::Name(id) => self.call_named(ctx, id, &arg_values, expr.pos),
                    CallTarget::Namespace { ns, name } => self.call_namespace(ctx, ns, name, &arg_values, expr.pos),
                    CallTarget::Value(callee) => {
                        let callee = self.eval_expr(ctx, callee)?;
                        self.call_value(ctx, &callee, &arg_values, expr.pos)
                    }
                }
            }
            Expr::New { class, args } => {
                let class_value = self.eval_expr(ctx, class)?;
                let Value::Str(class_name) = &class_value else {
                    return Err(JexlError::at(
                        ErrorKind::Method,
                        expr.pos,
                        format!("new expects a class name, got {}", class_value.type_name()),
                    ));
                };
                let mut arg_values = SmallVec::<[Value; 4]>::new();
                for arg in args {
                    arg_values.push(self.eval_expr(ctx, arg)?);
                }
                self.poll_cancel(ctx, expr.pos)?;
                self.construct(class_name, &arg_values, expr.pos)
            }
            Expr::Lambda(id) => self.create_closure(*id),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(ctx, item)?);
                }
                Ok(Value::list(values))
            }
            Expr::Map(entries) => {
                let mut map = ValueMap::default();
                for (k, v) in entries {
                    let key = self.eval_expr(ctx, k)?;
                    let value = self.eval_expr(ctx, v)?;
                    let key = MapKey::try_new(key).map_err(|type_name| {
                        JexlError::at(ErrorKind::Operator, k.pos, format!("{type_name} is not a valid map key"))
                    })?;
                    map.insert(key, value);
                }
                Ok(Value::Map(Rc::new(std::cell::RefCell::new(map))))
            }
            Expr::Set(items) => {
                let mut set = ValueSet::default();
                for item in items {
                    let value = self.eval_expr(ctx, item)?;
                    let key = MapKey::try_new(value).map_err(|type_name| {
                        JexlError::at(ErrorKind::Operator, item.pos, format!("{type_name} is not a valid set member"))
                    })?;
                    set.insert(key);
                }
                Ok(Value::Set(Rc::new(std::cell::RefCell::new(set))))
            }
            Expr::Template(parts) => self.eval_template(ctx, parts),
        }
    }

    fn read_identifier(&mut self, ctx: &mut dyn JexlContext, id: &Identifier) -> EvalResult<Value> {
        match id.slot {
            Some(slot) => match self.frame().get(slot) {
                Some(value) => Ok(value),
                None => {
                    if self.options.strict() {
                        Err(JexlError::at(
                            ErrorKind::Variable(VariableIssue::Undefined),
                            id.pos,
                            format!("'{}'", id.name),
                        ))
                    } else {
                        Ok(Value::Null)
                    }
                }
            },
            None => match ctx.get(&id.name) {
                Some(value) => Ok(value),
                None => {
                    if self.options.strict() {
                        Err(JexlError::at(
                            ErrorKind::Variable(VariableIssue::Undefined),
                            id.pos,
                            format!("'{}'", id.name),
                        ))
                    } else {
                        Ok(Value::Null)
                    }
                }
            },
        }
    }

    /// Ant-ish resolution: longest dotted prefix the context knows wins;
    /// remaining segments navigate as properties.
    fn read_antish(
        &mut self,
        ctx: &mut dyn JexlContext,
        parts: &[Arc<str>],
        prefixes: &[Arc<str>],
        pos: CodeRange,
    ) -> EvalResult<Value> {
        if self.options.antish() {
            for i in (0..prefixes.len()).rev() {
                if ctx.has(&prefixes[i]) {
                    let mut value = ctx.get(&prefixes[i]).unwrap_or(Value::Null);
                    for member in &parts[i + 1..] {
                        value = self.read_property(&value, &Value::Str(Arc::clone(member)), false, pos)?;
                    }
                    return Ok(value);
                }
            }
        } else if ctx.has(&parts[0]) {
            let mut value = ctx.get(&parts[0]).unwrap_or(Value::Null);
            for member in &parts[1..] {
                value = self.read_property(&value, &Value::Str(Arc::clone(member)), false, pos)?;
            }
            return Ok(value);
        }
        if self.options.strict() {
            Err(JexlError::at(
                ErrorKind::Variable(VariableIssue::Undefined),
                pos,
                format!("'{}'", prefixes.last().expect("antish prefix")),
            ))
        } else {
            Ok(Value::Null)
        }
    }

    fn read_property(&mut self, receiver: &Value, key: &Value, node_safe: bool, pos: CodeRange) -> EvalResult<Value> {
        if receiver.is_null() {
            if node_safe || self.options.safe() {
                self.engine.tracer.safe_null(pos.start, &key.to_string());
                return Ok(Value::Null);
            }
            return Err(JexlError::at(
                ErrorKind::Property { undefined: false },
                pos,
                format!("'{key}' on null"),
            ));
        }
        match self.uberspect().get_property(receiver, key) {
            Resolution::Value(value) => Ok(value),
            Resolution::Miss => {
                if self.options.strict() {
                    Err(JexlError::at(
                        ErrorKind::Property { undefined: true },
                        pos,
                        format!("'{key}'"),
                    ))
                } else {
                    Ok(Value::Null)
                }
            }
            Resolution::Error(detail) => Err(JexlError::at(ErrorKind::Property { undefined: false }, pos, detail)),
        }
    }

    fn apply_unary(&mut self, op: UnaryOp, value: &Value, pos: CodeRange) -> EvalResult<Value> {
        let overload = match op {
            UnaryOp::Negate => Some(JexlOperator::Negate),
            UnaryOp::Complement => Some(JexlOperator::Complement),
            UnaryOp::Not => Some(JexlOperator::Not),
            UnaryOp::Empty => Some(JexlOperator::Empty),
            UnaryOp::Size => Some(JexlOperator::Size),
        };
        if let Some(opcode) = overload {
            if let Some(f) = self.uberspect().get_operator(opcode, value, None) {
                return f(value, &[]).map_err(|detail| JexlError::at(ErrorKind::Operator, pos, detail));
            }
        }
        let result = match op {
            UnaryOp::Not => Ok(Arithmetic::not(value)),
            UnaryOp::Negate => self.arithmetic.negate(value),
            UnaryOp::Complement => self.arithmetic.complement(value),
            UnaryOp::Empty => Ok(Value::Bool(Arithmetic::empty(value))),
            UnaryOp::Size => self.arithmetic.size(value),
        };
        result.map_err(|err| arith_error(err, op.symbol().trim(), pos))
    }

    fn eval_binary(
        &mut self,
        ctx: &mut dyn JexlContext,
        op: BinaryOp,
        lhs: &ExprLoc,
        rhs: &ExprLoc,
        pos: CodeRange,
    ) -> EvalResult<Value> {
        // short-circuit forms never evaluate the right side eagerly
        match op {
            BinaryOp::And => {
                let left = self.eval_expr(ctx, lhs)?;
                if !left.truthy() {
                    return Ok(self.logical_result(left, false));
                }
                let right = self.eval_expr(ctx, rhs)?;
                let truthy = right.truthy();
                return Ok(self.logical_result(right, truthy));
            }
            BinaryOp::Or => {
                let left = self.eval_expr(ctx, lhs)?;
                if left.truthy() {
                    return Ok(self.logical_result(left, true));
                }
                let right = self.eval_expr(ctx, rhs)?;
                let truthy = right.truthy();
                return Ok(self.logical_result(right, truthy));
            }
            BinaryOp::NullCoalesce => {
                let left = self.eval_expr(ctx, lhs)?;
                if !left.is_null() {
                    return Ok(left);
                }
                return self.eval_expr(ctx, rhs);
            }
            _ => {}
        }
        let left = self.eval_expr(ctx, lhs)?;
        let right = self.eval_expr(ctx, rhs)?;
        self.apply_binary(op, &left, &right, pos)
    }

    fn logical_result(&self, operand: Value, truthy: bool) -> Value {
        if self.options.boolean_logical() {
            Value::Bool(truthy)
        } else {
            operand
        }
    }

    fn apply_binary(&mut self, op: BinaryOp, left: &Value, right: &Value, pos: CodeRange) -> EvalResult<Value> {
        // user-defined overloads short-circuit the built-in semantics;
        // containment-style operators dispatch on the container (right) side
        if let Some((opcode, recv, arg)) = overload_key(op, left, right) {
            if let Some(f) = self.uberspect().get_operator(opcode, recv, Some(arg)) {
                let result = f(recv, std::slice::from_ref(arg))
                    .map_err(|detail| JexlError::at(ErrorKind::Operator, pos, detail))?;
                return Ok(match op {
                    BinaryOp::NotMatch => Value::Bool(!result.truthy()),
                    _ => result,
                });
            }
        }
        let arith = self.arithmetic.clone();
        let result = match op {
            BinaryOp::Add => arith.add(left, right),
            BinaryOp::Subtract => arith.subtract(left, right),
            BinaryOp::Multiply => arith.multiply(left, right),
            BinaryOp::Divide => arith.divide(left, right),
            BinaryOp::Modulo => arith.modulo(left, right),
            BinaryOp::Eq | BinaryOp::Ne => {
                let equal = self
                    .uberspect()
                    .object_equals(left, right)
                    .unwrap_or_else(|| Arithmetic::equals(left, right));
                Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => self.relational(op, left, right),
            BinaryOp::BitAnd => arith.bit_and(left, right),
            BinaryOp::BitOr => arith.bit_or(left, right),
            BinaryOp::BitXor => arith.bit_xor(left, right),
            BinaryOp::Shl => arith.shift_left(left, right),
            BinaryOp::Shr => arith.shift_right(left, right),
            BinaryOp::Shru => arith.shift_right_unsigned(left, right),
            BinaryOp::Match | BinaryOp::In => arith.matches(left, right).map(Value::Bool),
            BinaryOp::NotMatch => arith.matches(left, right).map(|m| Value::Bool(!m)),
            BinaryOp::StartsWith => arith.starts_with(left, right).map(Value::Bool),
            BinaryOp::EndsWith => arith.ends_with(left, right).map(Value::Bool),
            BinaryOp::Range => arith.range(left, right),
            BinaryOp::And | BinaryOp::Or | BinaryOp::NullCoalesce => {
                unreachable!("short-circuit operators handled in eval_binary")
            }
        };
        result.map_err(|err| arith_error(err, op.symbol(), pos))
    }

    fn relational(&self, op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ArithError> {
        let ordering = match self.uberspect().object_compare(left, right) {
            Some(result) => result.map_err(ArithError::Operator)?,
            None => self.arithmetic.compare(left, right)?,
        };
        Ok(Value::Bool(match op {
            BinaryOp::Lt => ordering.is_lt(),
            BinaryOp::Le => ordering.is_le(),
            BinaryOp::Gt => ordering.is_gt(),
            BinaryOp::Ge => ordering.is_ge(),
            _ => unreachable!("relational ops only"),
        }))
    }

    fn eval_template(&mut self, ctx: &mut dyn JexlContext, parts: &[TemplatePart]) -> EvalResult<Value> {
        // a template that is exactly one `${expr}` yields the raw value
        // unless strict interpolation forces a string
        if !self.options.strict_interpolation() && parts.len() == 1 {
            if let TemplatePart::Expr(expr) = &parts[0] {
                return self.eval_expr(ctx, expr);
            }
        }
        let mut out = String::new();
        for part in parts {
            match part {
                TemplatePart::Text(text) => out.push_str(text),
                TemplatePart::Expr(expr) => {
                    let value = self.eval_expr(ctx, expr)?;
                    out.push_str(&self.arithmetic.to_string_coerce(&value));
                }
            }
        }
        Ok(Value::string(out))
    }

    fn create_closure(&mut self, id: LambdaId) -> EvalResult<Value> {
        let activation = self.frames.last().expect("active frame");
        let ast = Arc::clone(&activation.ast);
        let def = ast.lambda(id);
        let mut cells = Vec::with_capacity(def.frame.captures.len());
        let const_capture = self.options.const_capture();
        let frame = &self.frames.last().expect("active frame").frame;
        for spec in &def.frame.captures {
            let cell = frame.capture(spec.source);
            if const_capture {
                cells.push(CaptureCell::Frozen(cell.borrow().clone()));
            } else {
                cells.push(CaptureCell::Shared(cell));
            }
        }
        Ok(Value::Lambda(Rc::new(Closure {
            ast,
            lambda: id,
            cells,
        })))
    }

    fn call_named(
        &mut self,
        ctx: &mut dyn JexlContext,
        id: &Identifier,
        args: &[Value],
        pos: CodeRange,
    ) -> EvalResult<Value> {
        let callee = match id.slot {
            Some(slot) => self.frame().get(slot),
            None => ctx.get(&id.name),
        };
        match callee {
            Some(value) => self.call_value(ctx, &value, args, pos),
            None => {
                // the evaluation-scoped cancel builtin
                if &*id.name == "cancel" && args.is_empty() {
                    self.cancelled.store(true, AtomicOrdering::Relaxed);
                    return Ok(Value::Null);
                }
                if self.options.strict() {
                    Err(JexlError::at(ErrorKind::Method, pos, signature(&id.name, args)))
                } else {
                    Ok(Value::Null)
                }
            }
        }
    }

    fn call_value(&mut self, ctx: &mut dyn JexlContext, callee: &Value, args: &[Value], pos: CodeRange) -> EvalResult<Value> {
        match callee {
            Value::Lambda(closure) => {
                let closure = Rc::clone(closure);
                self.call_closure(ctx, &closure, args, pos)
            }
            Value::Null => {
                if self.options.strict() {
                    Err(JexlError::at(ErrorKind::Method, pos, "null is not callable".to_string()))
                } else {
                    Ok(Value::Null)
                }
            }
            other => Err(JexlError::at(
                ErrorKind::Method,
                pos,
                format!("{} is not callable", other.type_name()),
            )),
        }
    }

    /// Resolves a namespace prefix, caching the instance for the rest of
    /// this evaluation (functors run at most once per evaluation).
    fn call_namespace(
        &mut self,
        ctx: &mut dyn JexlContext,
        ns: &Arc<str>,
        name: &str,
        args: &[Value],
        pos: CodeRange,
    ) -> EvalResult<Value> {
        if !self.ns_instances.contains_key(ns) {
            let namespace = ctx
                .resolve_namespace(ns)
                .or_else(|| self.options.namespaces.get(&**ns).cloned())
                .or_else(|| self.engine.namespaces.get(&**ns).cloned());
            let instance = match namespace {
                Some(Namespace::Class(desc)) => NsInstance::Class(desc),
                Some(Namespace::Functor(functor)) => NsInstance::Object(functor.create(ctx)),
                None => {
                    if self.options.strict() {
                        return Err(JexlError::at(
                            ErrorKind::Method,
                            pos,
                            format!("unknown namespace '{ns}'"),
                        ));
                    }
                    return Ok(Value::Null);
                }
            };
            self.ns_instances.insert(Arc::clone(ns), instance);
        }
        self.poll_cancel(ctx, pos)?;
        match self.ns_instances.get(ns).expect("namespace cached") {
            NsInstance::Class(desc) => {
                let desc = Arc::clone(desc);
                if !self.engine.uberspect.member_permitted(desc.name(), name) {
                    return self.method_miss(ns, name, args, pos);
                }
                match desc.find_method(name, args.len()) {
                    Some(entry) => self.invoke(&MethodHandle::Descriptor(entry), &Value::Null, args, name, pos),
                    None => self.method_miss(ns, name, args, pos),
                }
            }
            NsInstance::Object(instance) => {
                let instance = instance.clone();
                match self.uberspect().get_method(&instance, name, args.len()) {
                    TryResult::Ok(handle) => self.invoke(&handle, &instance, args, name, pos),
                    TryResult::Failed => self.method_miss(ns, name, args, pos),
                }
            }
        }
    }

    fn method_miss(&self, ns: &str, name: &str, args: &[Value], pos: CodeRange) -> EvalResult<Value> {
        if self.options.strict() {
            Err(JexlError::at(
                ErrorKind::Method,
                pos,
                signature(&format!("{ns}:{name}"), args),
            ))
        } else {
            Ok(Value::Null)
        }
    }

    fn construct(&mut self, class_name: &str, args: &[Value], pos: CodeRange) -> EvalResult<Value> {
        let mut candidates = vec![class_name.to_string()];
        for import in &self.options.imports {
            candidates.push(format!("{import}.{class_name}"));
        }
        for candidate in &candidates {
            if let TryResult::Ok(entry) = self.uberspect().get_constructor(candidate, args.len()) {
                return (entry.func)(&Value::Null, args)
                    .map_err(|detail| JexlError::at(ErrorKind::Method, pos, detail));
            }
        }
        if self.options.strict() {
            Err(JexlError::at(ErrorKind::Method, pos, signature(class_name, args)))
        } else {
            Ok(Value::Null)
        }
    }

    /// Invokes a resolved method, attaching the call site to host failures
    /// (the invocation-target-unwrap of the reflective original).
    fn invoke(
        &self,
        handle: &MethodHandle,
        receiver: &Value,
        args: &[Value],
        name: &str,
        pos: CodeRange,
    ) -> EvalResult<Value> {
        handle
            .invoke(receiver, args)
            .map_err(|detail| JexlError::at(ErrorKind::Method, pos, format!("{}: {detail}", signature(name, args))))
    }

    fn call_closure(
        &mut self,
        ctx: &mut dyn JexlContext,
        closure: &Closure,
        args: &[Value],
        pos: CodeRange,
    ) -> EvalResult<Value> {
        self.enter(pos)?;
        let def_ast = Arc::clone(&closure.ast);
        let def = def_ast.lambda(closure.lambda);
        let mut frame = Frame::new(&def.frame);
        for (spec, cell) in def.frame.captures.iter().zip(&closure.cells) {
            frame.install_capture(spec.dest, cell);
        }
        let param_count = def.frame.param_count() as usize;
        for (i, arg) in args.iter().take(param_count).enumerate() {
            frame.set(SlotId(i as u16), arg.clone());
        }
        self.frames.push(Activation {
            frame,
            ast: Arc::clone(&closure.ast),
            lambda: Some(closure.lambda),
        });
        let completion = match &def.body {
            LambdaBody::Expr(expr) => self.eval_expr(ctx, expr).map(Completion::Normal),
            LambdaBody::Block(block) => self.eval_block(ctx, block),
        };
        self.frames.pop();
        self.expr_depth -= 1;
        match completion {
            Ok(Completion::Normal(value) | Completion::Return(value)) => Ok(value),
            Ok(Completion::Break | Completion::Continue) => {
                unreachable!("break/continue escape is a parse error")
            }
            Err(mut err) => {
                if !err.is_cancel() {
                    err.push_frame("<lambda>", pos.start);
                }
                Err(err)
            }
        }
    }
}

/// The annotation statement wrapper handed to context processors.
struct StatementThunk<'i, 'e, 's> {
    interp: &'i mut Interpreter<'e>,
    stmt: &'s StmtLoc,
    invocations: u32,
}

impl AnnotationThunk for StatementThunk<'_, '_, '_> {
    fn invoke(&mut self, ctx: &mut dyn JexlContext) -> EvalResult<Value> {
        self.invocations += 1;
        match self.interp.eval_stmt(ctx, self.stmt)? {
            Completion::Normal(value) => Ok(value),
            _ => Err(JexlError::at(
                ErrorKind::Annotation,
                self.stmt.pos,
                "control flow cannot escape an annotated statement",
            )),
        }
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::BigInt(b) => Value::BigInt(Arc::clone(b)),
        Literal::Float(f) => Value::Float(*f),
        Literal::Decimal(d) => Value::Decimal(Arc::clone(d)),
        Literal::Str(s) => Value::Str(Arc::clone(s)),
    }
}

/// Pretty-printed call signature for method errors: `name(T1, T2)`.
fn signature(name: &str, args: &[Value]) -> String {
    let mut out = String::from(name);
    out.push('(');
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(arg.type_name());
    }
    out.push(')');
    out
}

/// Maps a binary operator to its overload opcode and dispatch order.
/// Containment operators (`=~`, `!~`, `in`) dispatch on the container.
fn overload_key<'v>(op: BinaryOp, left: &'v Value, right: &'v Value) -> Option<(JexlOperator, &'v Value, &'v Value)> {
    Some(match op {
        BinaryOp::Add => (JexlOperator::Add, left, right),
        BinaryOp::Subtract => (JexlOperator::Subtract, left, right),
        BinaryOp::Multiply => (JexlOperator::Multiply, left, right),
        BinaryOp::Divide => (JexlOperator::Divide, left, right),
        BinaryOp::Modulo => (JexlOperator::Mod, left, right),
        BinaryOp::BitAnd => (JexlOperator::BitAnd, left, right),
        BinaryOp::BitOr => (JexlOperator::BitOr, left, right),
        BinaryOp::BitXor => (JexlOperator::BitXor, left, right),
        BinaryOp::Shl => (JexlOperator::Shl, left, right),
        BinaryOp::Shr => (JexlOperator::Shr, left, right),
        BinaryOp::Shru => (JexlOperator::Shru, left, right),
        BinaryOp::Match | BinaryOp::NotMatch | BinaryOp::In => (JexlOperator::Contains, right, left),
        BinaryOp::StartsWith => (JexlOperator::StartsWith, left, right),
        BinaryOp::EndsWith => (JexlOperator::EndsWith, left, right),
        _ => return None,
    })
}

fn arith_error(err: ArithError, op: &str, pos: CodeRange) -> Box<JexlError> {
    match err {
        ArithError::NullOperand => JexlError::at(ErrorKind::NullOperand, pos, format!("in '{op}'")),
        ArithError::DivideByZero => JexlError::at(ErrorKind::Operator, pos, "divide by zero"),
        ArithError::Operator(detail) => JexlError::at(ErrorKind::Operator, pos, detail),
    }
}
