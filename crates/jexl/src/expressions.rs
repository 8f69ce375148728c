//! Syntax tree produced by the parser and consumed by the interpreter.
//!
//! Nodes are immutable after the prepare pass. Every node carries a
//! [`CodeRange`] so evaluation errors point at real source positions.
//! Identifiers are either bound to a frame slot during prepare or left free
//! to be resolved against the evaluation context.

use std::{fmt::Write as _, sync::Arc};

use num_bigint::BigInt;

use crate::{
    error::CodeRange,
    frame::{FrameTemplate, SlotId},
    types::Decimal,
};

/// Index of a lambda definition within its [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LambdaId(pub(crate) u32);

impl LambdaId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A variable reference with optional slot binding.
///
/// After prepare, `slot` is `Some` when the name is a declared local or
/// parameter of the enclosing script/lambda; otherwise the name resolves
/// against the context at runtime.
#[derive(Debug, Clone)]
pub(crate) struct Identifier {
    pub name: Arc<str>,
    pub slot: Option<SlotId>,
    pub pos: CodeRange,
}

impl Identifier {
    pub fn free(name: Arc<str>, pos: CodeRange) -> Self {
        Self { name, slot: None, pos }
    }
}

/// Literal payloads.
#[derive(Debug, Clone)]
pub(crate) enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    BigInt(Arc<BigInt>),
    Float(f64),
    Decimal(Arc<Decimal>),
    Str(Arc<str>),
}

/// Unary operators, including the prefix keywords `empty` and `size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum UnaryOp {
    Not,
    Negate,
    Complement,
    Empty,
    Size,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Not => "!",
            Self::Negate => "-",
            Self::Complement => "~",
            Self::Empty => "empty ",
            Self::Size => "size ",
        }
    }
}

/// Binary operators. `And`/`Or`/`NullCoalesce` short-circuit and are handled
/// specially by the interpreter; everything else evaluates both operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Shru,
    Match,
    NotMatch,
    StartsWith,
    EndsWith,
    In,
    Range,
    NullCoalesce,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Shru => ">>>",
            Self::Match => "=~",
            Self::NotMatch => "!~",
            Self::StartsWith => "=^",
            Self::EndsWith => "=$",
            Self::In => "in",
            Self::Range => "..",
            Self::NullCoalesce => "??",
        }
    }

    /// Binding strength used by the parser and the printer; higher binds
    /// tighter. Must stay in sync with `parse::Parser::parse_binary`.
    pub fn precedence(self) -> u8 {
        match self {
            Self::NullCoalesce => 1,
            Self::Or => 2,
            Self::And => 3,
            Self::BitOr => 4,
            Self::BitXor => 5,
            Self::BitAnd => 6,
            Self::Eq | Self::Ne | Self::Match | Self::NotMatch | Self::StartsWith | Self::EndsWith | Self::In => 7,
            Self::Lt | Self::Le | Self::Gt | Self::Ge => 8,
            Self::Range => 9,
            Self::Shl | Self::Shr | Self::Shru => 10,
            Self::Add | Self::Subtract => 11,
            Self::Multiply | Self::Divide | Self::Modulo => 12,
        }
    }
}

/// Key of a property or index access.
#[derive(Debug, Clone)]
pub(crate) enum AccessKey {
    /// `.name` access.
    Name(Arc<str>),
    /// `[expr]` access.
    Index(Box<ExprLoc>),
}

/// Target of a plain (non-method) call.
#[derive(Debug, Clone)]
pub(crate) enum CallTarget {
    /// `f(args)` — a local slot holding a callable, or a context variable.
    Name(Identifier),
    /// `ns:fn(args)` — a namespaced function.
    Namespace { ns: Arc<str>, name: Arc<str> },
    /// `(expr)(args)` — any expression evaluating to a callable.
    Value(Box<ExprLoc>),
}

/// One piece of a template literal.
#[derive(Debug, Clone)]
pub(crate) enum TemplatePart {
    Text(Arc<str>),
    Expr(Box<ExprLoc>),
}

/// An expression with its source span.
#[derive(Debug, Clone)]
pub(crate) struct ExprLoc {
    pub pos: CodeRange,
    pub expr: Expr,
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Literal),
    Identifier(Identifier),
    /// A free dotted chain (`a.b.c` with no local `a`): resolved against
    /// context keys longest-prefix-first when the antish option is on.
    /// `prefixes[i]` is `parts[0..=i]` joined with dots, precomputed so the
    /// interpreter never rebuilds strings.
    Antish {
        parts: Vec<Arc<str>>,
        prefixes: Vec<Arc<str>>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<ExprLoc>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<ExprLoc>,
        rhs: Box<ExprLoc>,
    },
    /// `cond ? then : other`; `then` is `None` for the Elvis form `a ?: b`.
    Ternary {
        cond: Box<ExprLoc>,
        then: Option<Box<ExprLoc>>,
        other: Box<ExprLoc>,
    },
    Access {
        object: Box<ExprLoc>,
        key: AccessKey,
        /// True for `?.` / `?[`: a null receiver yields null.
        safe: bool,
    },
    MethodCall {
        object: Box<ExprLoc>,
        name: Arc<str>,
        args: Vec<ExprLoc>,
        safe: bool,
    },
    Call {
        target: CallTarget,
        args: Vec<ExprLoc>,
    },
    /// `new('pkg.Class', args…)` — constructor dispatch through the uberspect.
    New {
        class: Box<ExprLoc>,
        args: Vec<ExprLoc>,
    },
    Lambda(LambdaId),
    List(Vec<ExprLoc>),
    Map(Vec<(ExprLoc, ExprLoc)>),
    Set(Vec<ExprLoc>),
    Template(Vec<TemplatePart>),
}

/// A statement with its source span.
#[derive(Debug, Clone)]
pub(crate) struct StmtLoc {
    pub pos: CodeRange,
    pub stmt: Stmt,
}

/// A braced (or implicit) statement list.
///
/// `declared_slots` lists the slots introduced by `var`/`let`/`const`
/// directly in this block; the interpreter clears their declared flag on
/// block exit so a loop body re-entering the block can redeclare them.
#[derive(Debug, Clone, Default)]
pub(crate) struct Block {
    pub stmts: Vec<StmtLoc>,
    pub declared_slots: Vec<SlotId>,
}

#[derive(Debug, Clone)]
pub(crate) enum Stmt {
    Expression(ExprLoc),
    Var {
        name: Identifier,
        constant: bool,
        init: Option<ExprLoc>,
    },
    Assign {
        target: ExprLoc,
        value: ExprLoc,
    },
    If {
        cond: ExprLoc,
        then_block: Block,
        else_block: Option<Block>,
    },
    While {
        cond: ExprLoc,
        body: Block,
    },
    DoWhile {
        body: Block,
        cond: ExprLoc,
    },
    ForEach {
        var: Identifier,
        iterable: ExprLoc,
        body: Block,
    },
    Return(Option<ExprLoc>),
    Break,
    Continue,
    Block(Block),
    Annotated {
        name: Arc<str>,
        args: Vec<ExprLoc>,
        body: Box<StmtLoc>,
    },
}

/// Body of a lambda: a single expression or a braced block.
#[derive(Debug, Clone)]
pub(crate) enum LambdaBody {
    Expr(Box<ExprLoc>),
    Block(Block),
}

/// A lambda definition collected by the parser.
///
/// The definition stays in the owning [`Ast`]; closure values reference it
/// by [`LambdaId`] so a returned lambda keeps its defining tree alive via
/// the `Arc<Ast>` it carries.
#[derive(Debug, Clone)]
pub(crate) struct LambdaDef {
    pub params: Vec<Arc<str>>,
    pub body: LambdaBody,
    pub frame: FrameTemplate,
    pub pos: CodeRange,
}

impl LambdaDef {
    pub(crate) fn parameters(&self) -> Vec<String> {
        self.params.iter().map(|p| p.to_string()).collect()
    }
}

/// A `#pragma key value` prologue directive.
#[derive(Debug, Clone)]
pub struct Pragma {
    pub key: String,
    pub(crate) value: Literal,
    pub(crate) pos: CodeRange,
}

/// A parsed, prepared script or expression.
#[derive(Debug)]
pub struct Ast {
    pub(crate) body: Block,
    pub(crate) frame: FrameTemplate,
    pub(crate) lambdas: Vec<LambdaDef>,
    pub(crate) pragmas: Vec<Pragma>,
    pub(crate) source: String,
    pub(crate) name: Option<String>,
}

impl Ast {
    pub(crate) fn lambda(&self, id: LambdaId) -> &LambdaDef {
        &self.lambdas[id.index()]
    }

    /// The original source text.
    #[must_use]
    pub fn source_text(&self) -> &str {
        &self.source
    }

    /// The script name given at parse time.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Pragmas declared in the script prologue, in order.
    #[must_use]
    pub fn pragmas(&self) -> &[Pragma] {
        &self.pragmas
    }

    /// Renders the tree back to source. Reparsing the result yields a tree
    /// with identical structure (locations excepted).
    #[must_use]
    pub fn parsed_text(&self) -> String {
        let mut out = String::new();
        let printer = Printer { ast: self };
        for (i, stmt) in self.body.stmts.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            printer.stmt(&mut out, stmt);
        }
        out
    }

    /// Renders a single lambda definition back to source.
    #[must_use]
    pub(crate) fn lambda_text(&self, id: LambdaId) -> String {
        let mut out = String::new();
        Printer { ast: self }.lambda(&mut out, self.lambda(id));
        out
    }
}

/// Source printer. Nested operands are parenthesized whenever the child
/// binds no tighter than the parent, which keeps reparses structurally
/// identical without tracking associativity.
struct Printer<'a> {
    ast: &'a Ast,
}

impl Printer<'_> {
    fn stmt(&self, out: &mut String, stmt: &StmtLoc) {
        match &stmt.stmt {
            Stmt::Expression(e) => {
                self.expr(out, e);
                out.push(';');
            }
            Stmt::Var { name, constant, init } => {
                out.push_str(if *constant { "const " } else { "var " });
                out.push_str(&name.name);
                if let Some(init) = init {
                    out.push_str(" = ");
                    self.expr(out, init);
                }
                out.push(';');
            }
            Stmt::Assign { target, value } => {
                self.expr(out, target);
                out.push_str(" = ");
                self.expr(out, value);
                out.push(';');
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                out.push_str("if (");
                self.expr(out, cond);
                out.push_str(") ");
                self.block(out, then_block);
                if let Some(else_block) = else_block {
                    out.push_str(" else ");
                    self.block(out, else_block);
                }
            }
            Stmt::While { cond, body } => {
                out.push_str("while (");
                self.expr(out, cond);
                out.push_str(") ");
                self.block(out, body);
            }
            Stmt::DoWhile { body, cond } => {
                out.push_str("do ");
                self.block(out, body);
                out.push_str(" while (");
                self.expr(out, cond);
                out.push_str(");");
            }
            Stmt::ForEach { var, iterable, body } => {
                out.push_str("for (var ");
                out.push_str(&var.name);
                out.push_str(" : ");
                self.expr(out, iterable);
                out.push_str(") ");
                self.block(out, body);
            }
            Stmt::Return(value) => {
                out.push_str("return");
                if let Some(value) = value {
                    out.push(' ');
                    self.expr(out, value);
                }
                out.push(';');
            }
            Stmt::Break => out.push_str("break;"),
            Stmt::Continue => out.push_str("continue;"),
            Stmt::Block(block) => self.block(out, block),
            Stmt::Annotated { name, args, body } => {
                out.push('@');
                out.push_str(name);
                if !args.is_empty() {
                    out.push('(');
                    self.expr_list(out, args);
                    out.push(')');
                }
                out.push(' ');
                self.stmt(out, body);
            }
        }
    }

    fn block(&self, out: &mut String, block: &Block) {
        out.push('{');
        for stmt in &block.stmts {
            out.push(' ');
            self.stmt(out, stmt);
        }
        out.push_str(" }");
    }

    fn expr(&self, out: &mut String, expr: &ExprLoc) {
        self.expr_prec(out, expr, 0);
    }

    fn expr_prec(&self, out: &mut String, expr: &ExprLoc, min_prec: u8) {
        match &expr.expr {
            Expr::Literal(lit) => Self::literal(out, lit),
            Expr::Identifier(id) => out.push_str(&id.name),
            Expr::Antish { prefixes, .. } => {
                out.push_str(prefixes.last().expect("antish chains are never empty"));
            }
            Expr::Unary { op, operand } => {
                out.push_str(op.symbol());
                self.expr_prec(out, operand, u8::MAX);
            }
            Expr::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                let paren = prec < min_prec || min_prec == u8::MAX;
                if paren {
                    out.push('(');
                }
                self.expr_prec(out, lhs, prec);
                let _ = write!(out, " {} ", op.symbol());
                // parenthesize same-precedence right operands: every binary
                // operator here is left-associative
                self.expr_prec(out, rhs, prec + 1);
                if paren {
                    out.push(')');
                }
            }
            Expr::Ternary { cond, then, other } => {
                let paren = min_prec > 0;
                if paren {
                    out.push('(');
                }
                self.expr_prec(out, cond, 1);
                match then {
                    Some(then) => {
                        out.push_str(" ? ");
                        self.expr_prec(out, then, 1);
                        out.push_str(" : ");
                    }
                    None => out.push_str(" ?: "),
                }
                self.expr_prec(out, other, 1);
                if paren {
                    out.push(')');
                }
            }
            Expr::Access { object, key, safe } => {
                self.expr_prec(out, object, u8::MAX);
                match key {
                    AccessKey::Name(name) => {
                        out.push_str(if *safe { "?." } else { "." });
                        out.push_str(name);
                    }
                    AccessKey::Index(index) => {
                        out.push_str(if *safe { "?[" } else { "[" });
                        self.expr(out, index);
                        out.push(']');
                    }
                }
            }
            Expr::MethodCall { object, name, args, safe } => {
                self.expr_prec(out, object, u8::MAX);
                out.push_str(if *safe { "?." } else { "." });
                out.push_str(name);
                out.push('(');
                self.expr_list(out, args);
                out.push(')');
            }
            Expr::Call { target, args } => {
                match target {
                    CallTarget::Name(id) => out.push_str(&id.name),
                    CallTarget::Namespace { ns, name } => {
                        out.push_str(ns);
                        out.push(':');
                        out.push_str(name);
                    }
                    CallTarget::Value(callee) => self.expr_prec(out, callee, u8::MAX),
                }
                out.push('(');
                self.expr_list(out, args);
                out.push(')');
            }
            Expr::New { class, args } => {
                out.push_str("new(");
                self.expr(out, class);
                for arg in args {
                    out.push_str(", ");
                    self.expr(out, arg);
                }
                out.push(')');
            }
            Expr::Lambda(id) => self.lambda(out, self.ast.lambda(*id)),
            Expr::List(items) => {
                out.push('[');
                self.expr_list(out, items);
                out.push(']');
            }
            Expr::Map(entries) => {
                if entries.is_empty() {
                    out.push_str("{:}");
                    return;
                }
                out.push('{');
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.expr(out, k);
                    out.push_str(" : ");
                    self.expr(out, v);
                }
                out.push('}');
            }
            Expr::Set(items) => {
                out.push('{');
                self.expr_list(out, items);
                out.push('}');
            }
            Expr::Template(parts) => {
                out.push('`');
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => {
                            for ch in text.chars() {
                                if ch == '`' || ch == '$' || ch == '\\' {
                                    out.push('\\');
                                }
                                out.push(ch);
                            }
                        }
                        TemplatePart::Expr(e) => {
                            out.push_str("${");
                            self.expr(out, e);
                            out.push('}');
                        }
                    }
                }
                out.push('`');
            }
        }
    }

    fn expr_list(&self, out: &mut String, items: &[ExprLoc]) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            self.expr(out, item);
        }
    }

    fn lambda(&self, out: &mut String, def: &LambdaDef) {
        out.push('(');
        for (i, p) in def.params.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(p);
        }
        out.push_str(") -> ");
        match &def.body {
            LambdaBody::Expr(e) => self.expr_prec(out, e, u8::MAX),
            LambdaBody::Block(b) => self.block(out, b),
        }
    }

    fn literal(out: &mut String, lit: &Literal) {
        match lit {
            Literal::Null => out.push_str("null"),
            Literal::Bool(b) => {
                let _ = write!(out, "{b}");
            }
            Literal::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Literal::BigInt(b) => {
                let _ = write!(out, "{b}h");
            }
            Literal::Float(v) => {
                let mut buf = ryu::Buffer::new();
                out.push_str(buf.format(*v));
            }
            Literal::Decimal(d) => {
                let _ = write!(out, "{d}b");
            }
            Literal::Str(s) => {
                out.push('\'');
                for ch in s.chars() {
                    match ch {
                        '\'' => out.push_str("\\'"),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        '\r' => out.push_str("\\r"),
                        _ => out.push(ch),
                    }
                }
                out.push('\'');
            }
        }
    }
}
