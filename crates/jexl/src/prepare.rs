//! Scope analysis over the raw parse tree.
//!
//! Prepare binds identifiers to frame slots, discovers closure captures
//! (flattening transitive captures through intermediate lambdas), folds
//! free dotted chains into antish nodes, and enforces the scope-sensitive
//! rules: same-block redefinition under the lexical option, const
//! reassignment, reserved names, and the side-effects-globals gate.
//!
//! After this pass the tree is immutable and the interpreter can trust
//! every `Identifier::slot`.

use std::sync::Arc;

use ahash::AHashMap;

use crate::{
    error::{CodeRange, ErrorKind, JexlError, VariableIssue},
    expressions::{AccessKey, Ast, Block, CallTarget, Expr, ExprLoc, Identifier, LambdaBody, LambdaDef, Stmt, StmtLoc, TemplatePart},
    frame::{CaptureSpec, FrameTemplate, SlotId},
    options::Features,
    parse::RawScript,
};

/// Scope-affecting switches, captured from the engine at parse time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PrepareSettings {
    /// Same-block redefinition is an error.
    pub lexical: bool,
    /// Declared names shade same-named context globals for the whole
    /// script body, before their declaration point included.
    pub lexical_shade: bool,
}

/// Binds the raw tree and produces the final [`Ast`].
pub(crate) fn prepare(
    raw: RawScript,
    params: &[&str],
    features: &Features,
    settings: PrepareSettings,
    source: String,
    name: Option<String>,
) -> Result<Ast, Box<JexlError>> {
    let mut preparer = Preparer {
        scopes: Vec::new(),
        lambdas: raw.lambdas,
        features,
        settings,
    };
    let mut body = raw.body;

    let mut scope = Scope::default();
    for param in params {
        let slot = scope.template.declare(Arc::from(*param), false);
        scope
            .blocks
            .last_mut()
            .expect("scope starts with a root block")
            .insert(Arc::from(*param), slot);
    }
    scope
        .template
        .set_param_count(u16::try_from(params.len()).expect("parameter count fits u16"));
    preparer.scopes.push(scope);
    preparer.prescan(&body.stmts);

    let result = preparer.walk_stmts(&mut body.stmts);
    let scope = preparer.scopes.pop().expect("script scope");
    result.map_err(|mut err| {
        if let Some(name) = &name {
            err.set_script(name);
        }
        err
    })?;

    Ok(Ast {
        body,
        frame: scope.template,
        lambdas: preparer.lambdas,
        pragmas: raw.pragmas,
        source,
        name,
    })
}

/// One frame under construction (the script or one lambda).
struct Scope {
    template: FrameTemplate,
    /// Innermost block last; each maps declared names to their slots.
    blocks: Vec<AHashMap<Arc<str>, SlotId>>,
    /// Captures already materialized in this frame.
    captures: AHashMap<Arc<str>, SlotId>,
    /// Pre-declared slots for every name declared anywhere in this frame;
    /// only populated under the lexical-shade option.
    shade: AHashMap<Arc<str>, SlotId>,
}

impl Default for Scope {
    fn default() -> Self {
        Self {
            template: FrameTemplate::default(),
            blocks: vec![AHashMap::new()],
            captures: AHashMap::new(),
            shade: AHashMap::new(),
        }
    }
}

impl Scope {
    /// Positional lookup: blocks innermost-first, then captures, then the
    /// shade pre-declarations.
    fn lookup(&self, name: &str) -> Option<SlotId> {
        for block in self.blocks.iter().rev() {
            if let Some(&slot) = block.get(name) {
                return Some(slot);
            }
        }
        if let Some(&slot) = self.captures.get(name) {
            return Some(slot);
        }
        self.shade.get(name).copied()
    }
}

struct Preparer<'a> {
    scopes: Vec<Scope>,
    lambdas: Vec<LambdaDef>,
    features: &'a Features,
    settings: PrepareSettings,
}

impl Preparer<'_> {
    fn error(&self, kind: ErrorKind, pos: CodeRange, detail: impl Into<String>) -> Box<JexlError> {
        JexlError::at(kind, pos, detail)
    }

    fn current(&mut self) -> &mut Scope {
        self.scopes.last_mut().expect("at least one scope")
    }

    /// Under lexical shade, pre-declare one slot per name declared anywhere
    /// in the current frame, so uses before the declaration point resolve
    /// locally instead of reaching the context.
    fn prescan(&mut self, stmts: &[StmtLoc]) {
        if !self.settings.lexical_shade {
            return;
        }
        let mut decls: Vec<(Arc<str>, bool)> = Vec::new();
        collect_declarations(stmts, &mut decls);
        let scope = self.current();
        for (name, constant) in decls {
            if !scope.shade.contains_key(&name) {
                let slot = scope.template.declare(Arc::clone(&name), constant);
                scope.shade.insert(name, slot);
            }
        }
    }

    fn walk_stmts(&mut self, stmts: &mut [StmtLoc]) -> Result<(), Box<JexlError>> {
        for stmt in stmts {
            self.walk_stmt(stmt)?;
        }
        Ok(())
    }

    fn walk_block(&mut self, block: &mut Block) -> Result<(), Box<JexlError>> {
        self.current().blocks.push(AHashMap::new());
        let result = self.walk_stmts(&mut block.stmts);
        let declared = self.current().blocks.pop().expect("pushed block");
        block.declared_slots = declared.into_values().collect();
        result
    }

    fn declare(&mut self, id: &mut Identifier, constant: bool) -> Result<(), Box<JexlError>> {
        let scope = self.scopes.last().expect("scope");
        let block = scope.blocks.last().expect("block");
        let existing = block.get(&id.name).copied();
        if let Some(existing) = existing {
            if self.settings.lexical || scope.template.is_const(existing) {
                return Err(self.error(
                    ErrorKind::Variable(VariableIssue::Redefined),
                    id.pos,
                    format!("'{}'", id.name),
                ));
            }
        }
        let shade_slot = scope.shade.get(&id.name).copied();
        let scope = self.current();
        let slot = match existing.or(shade_slot) {
            // a permitted redefinition reuses the slot so the runtime
            // lexical check still observes the declaration state
            Some(slot) => slot,
            None => scope.template.declare(Arc::clone(&id.name), constant),
        };
        scope.blocks.last_mut().expect("block").insert(Arc::clone(&id.name), slot);
        id.slot = Some(slot);
        Ok(())
    }

    /// Resolves an identifier to a local slot, materializing capture chains
    /// through enclosing frames; leaves it free when nothing declares it.
    fn resolve(&mut self, id: &mut Identifier) {
        let current = self.scopes.len() - 1;
        if let Some(slot) = self.scopes[current].lookup(&id.name) {
            id.slot = Some(slot);
            return;
        }
        if current == 0 {
            return;
        }
        if let Some(source) = self.capture_source(current - 1, &id.name) {
            let constant = self.scopes[current - 1].template.is_const(source);
            let scope = self.current();
            let dest = scope.template.declare(Arc::clone(&id.name), constant);
            scope.template.mark_cell(dest);
            scope.template.captures.push(CaptureSpec { source, dest });
            scope.captures.insert(Arc::clone(&id.name), dest);
            id.slot = Some(dest);
        }
    }

    /// Finds (or builds) a cell-marked slot for `name` in `scopes[idx]`
    /// usable as a capture source by the frame one level in.
    fn capture_source(&mut self, idx: usize, name: &str) -> Option<SlotId> {
        if let Some(slot) = self.scopes[idx].lookup(name) {
            self.scopes[idx].template.mark_cell(slot);
            return Some(slot);
        }
        if idx == 0 {
            return None;
        }
        let parent = self.capture_source(idx - 1, name)?;
        let constant = self.scopes[idx - 1].template.is_const(parent);
        let scope = &mut self.scopes[idx];
        let dest = scope.template.declare(Arc::from(name), constant);
        scope.template.mark_cell(dest);
        scope.template.captures.push(CaptureSpec { source: parent, dest });
        scope.captures.insert(Arc::from(name), dest);
        Some(dest)
    }

    fn walk_stmt(&mut self, stmt: &mut StmtLoc) -> Result<(), Box<JexlError>> {
        match &mut stmt.stmt {
            Stmt::Expression(expr) => self.walk_expr(expr),
            Stmt::Var { name, constant, init } => {
                // the initializer sees the enclosing binding, not the new one
                if let Some(init) = init {
                    self.walk_expr(init)?;
                }
                self.declare(name, *constant)
            }
            Stmt::Assign { target, value } => {
                self.walk_expr(value)?;
                self.walk_expr(target)?;
                match &target.expr {
                    Expr::Identifier(id) => match id.slot {
                        Some(slot) => {
                            let scope = self.scopes.last().expect("scope");
                            if scope.template.is_const(slot) {
                                return Err(self.error(
                                    ErrorKind::Variable(VariableIssue::Redefined),
                                    id.pos,
                                    format!("const '{}'", id.name),
                                ));
                            }
                        }
                        None => self.check_global_write(target.pos)?,
                    },
                    Expr::Antish { .. } => self.check_global_write(target.pos)?,
                    _ => {}
                }
                Ok(())
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                self.walk_expr(cond)?;
                self.walk_block(then_block)?;
                if let Some(else_block) = else_block {
                    self.walk_block(else_block)?;
                }
                Ok(())
            }
            Stmt::While { cond, body } => {
                self.walk_expr(cond)?;
                self.walk_block(body)
            }
            Stmt::DoWhile { body, cond } => {
                self.walk_block(body)?;
                self.walk_expr(cond)
            }
            Stmt::ForEach { var, iterable, body } => {
                self.walk_expr(iterable)?;
                // the loop variable scopes to the body block
                self.current().blocks.push(AHashMap::new());
                let result = self.declare(var, false).and_then(|()| self.walk_stmts(&mut body.stmts));
                let declared = self.current().blocks.pop().expect("pushed block");
                body.declared_slots = declared.into_values().collect();
                result
            }
            Stmt::Return(value) => match value {
                Some(value) => self.walk_expr(value),
                None => Ok(()),
            },
            Stmt::Break | Stmt::Continue => Ok(()),
            Stmt::Block(block) => self.walk_block(block),
            Stmt::Annotated { args, body, .. } => {
                for arg in args {
                    self.walk_expr(arg)?;
                }
                self.walk_stmt(body)
            }
        }
    }

    fn check_global_write(&self, pos: CodeRange) -> Result<(), Box<JexlError>> {
        if self.features.supports_side_effects_globals() {
            Ok(())
        } else {
            Err(self.error(ErrorKind::Feature, pos, "assignment to global variables is disabled"))
        }
    }

    fn walk_expr(&mut self, expr: &mut ExprLoc) -> Result<(), Box<JexlError>> {
        match &mut expr.expr {
            Expr::Literal(_) | Expr::Antish { .. } => Ok(()),
            Expr::Identifier(id) => {
                self.resolve(id);
                Ok(())
            }
            Expr::Unary { operand, .. } => self.walk_expr(operand),
            Expr::Binary { lhs, rhs, .. } => {
                self.walk_expr(lhs)?;
                self.walk_expr(rhs)
            }
            Expr::Ternary { cond, then, other } => {
                self.walk_expr(cond)?;
                if let Some(then) = then {
                    self.walk_expr(then)?;
                }
                self.walk_expr(other)
            }
            Expr::Access { object, key, .. } => {
                self.walk_expr(object)?;
                if let AccessKey::Index(index) = key {
                    self.walk_expr(index)?;
                }
                fold_antish(expr);
                Ok(())
            }
            Expr::MethodCall { object, args, .. } => {
                self.walk_expr(object)?;
                for arg in args {
                    self.walk_expr(arg)?;
                }
                Ok(())
            }
            Expr::Call { target, args } => {
                if let CallTarget::Name(id) = target {
                    self.resolve(id);
                }
                if let CallTarget::Value(callee) = target {
                    self.walk_expr(callee)?;
                }
                for arg in args {
                    self.walk_expr(arg)?;
                }
                Ok(())
            }
            Expr::New { class, args } => {
                self.walk_expr(class)?;
                for arg in args {
                    self.walk_expr(arg)?;
                }
                Ok(())
            }
            Expr::Lambda(id) => {
                let index = id.index();
                let params = self.lambdas[index].params.clone();
                let mut body = std::mem::replace(&mut self.lambdas[index].body, LambdaBody::Block(Block::default()));

                let mut scope = Scope::default();
                for param in &params {
                    let slot = scope.template.declare(Arc::clone(param), false);
                    scope.blocks.last_mut().expect("root block").insert(Arc::clone(param), slot);
                }
                scope
                    .template
                    .set_param_count(u16::try_from(params.len()).expect("parameter count fits u16"));
                self.scopes.push(scope);
                if let LambdaBody::Block(block) = &body {
                    self.prescan(&block.stmts);
                }
                let result = match &mut body {
                    LambdaBody::Expr(expr) => self.walk_expr(expr),
                    LambdaBody::Block(block) => self.walk_stmts(&mut block.stmts),
                };
                let scope = self.scopes.pop().expect("lambda scope");
                result?;
                self.lambdas[index].body = body;
                self.lambdas[index].frame = scope.template;
                Ok(())
            }
            Expr::List(items) | Expr::Set(items) => {
                for item in items {
                    self.walk_expr(item)?;
                }
                Ok(())
            }
            Expr::Map(entries) => {
                for (k, v) in entries {
                    self.walk_expr(k)?;
                    self.walk_expr(v)?;
                }
                Ok(())
            }
            Expr::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Expr(sub) = part {
                        self.walk_expr(sub)?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Collects `var`/`const`/loop declarations of one frame, without
/// descending into lambda bodies (those are separate frames).
fn collect_declarations(stmts: &[StmtLoc], out: &mut Vec<(Arc<str>, bool)>) {
    for stmt in stmts {
        match &stmt.stmt {
            Stmt::Var { name, constant, .. } => out.push((Arc::clone(&name.name), *constant)),
            Stmt::ForEach { var, body, .. } => {
                out.push((Arc::clone(&var.name), false));
                collect_declarations(&body.stmts, out);
            }
            Stmt::If {
                then_block,
                else_block,
                ..
            } => {
                collect_declarations(&then_block.stmts, out);
                if let Some(else_block) = else_block {
                    collect_declarations(&else_block.stmts, out);
                }
            }
            Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => collect_declarations(&body.stmts, out),
            Stmt::Block(block) => collect_declarations(&block.stmts, out),
            Stmt::Annotated { body, .. } => collect_declarations(std::slice::from_ref(body), out),
            _ => {}
        }
    }
}

/// Rewrites a chain of plain `.name` accesses rooted at a free identifier
/// into an antish node carrying the dotted string split per prefix.
fn fold_antish(expr: &mut ExprLoc) {
    let mut parts: Vec<Arc<str>> = Vec::new();
    if !collect_chain(expr, &mut parts) {
        return;
    }
    let mut prefixes: Vec<Arc<str>> = Vec::with_capacity(parts.len());
    let mut dotted = String::new();
    for part in &parts {
        if !dotted.is_empty() {
            dotted.push('.');
        }
        dotted.push_str(part);
        prefixes.push(Arc::from(dotted.as_str()));
    }
    expr.expr = Expr::Antish { parts, prefixes };
}

/// Accumulates chain segments root-first; true only when the whole chain is
/// plain (non-safe) name accesses over an unbound identifier. Inner links
/// fold before outer ones, so an already-folded antish node is a valid
/// root and contributes its accumulated segments.
fn collect_chain(expr: &ExprLoc, parts: &mut Vec<Arc<str>>) -> bool {
    match &expr.expr {
        Expr::Identifier(id) if id.slot.is_none() => {
            parts.push(Arc::clone(&id.name));
            true
        }
        Expr::Antish { parts: inner, .. } => {
            parts.extend(inner.iter().cloned());
            true
        }
        Expr::Access {
            object,
            key: AccessKey::Name(name),
            safe: false,
        } => {
            if !collect_chain(object, parts) {
                return false;
            }
            parts.push(Arc::clone(name));
            true
        }
        _ => false,
    }
}
