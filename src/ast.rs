//! Surface syntax tree produced by the parser.
//!
//! Owned by the parse that built it and never mutated afterward; the
//! transform reads it and produces a fresh IR.
use ordered_float::OrderedFloat;
use serde::Serialize;

/// Byte range in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn to(self, other: Span) -> Span {
        Span::new(self.start, other.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ast {
    pub kind: Expr,
    pub span: Span,
}

impl Ast {
    pub fn new(kind: Expr, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl UnaryOp {
    /// Name of the call this operator lowers to.
    pub fn function(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Pos => "pos",
            UnaryOp::Not => "not",
        }
    }
}

impl BinaryOp {
    /// Name of the call this operator lowers to.
    pub fn function(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
            BinaryOp::Pow => "pow",
            BinaryOp::Eq => "eq",
            BinaryOp::Neq => "neq",
            BinaryOp::Lt => "lt",
            BinaryOp::Lte => "lte",
            BinaryOp::Gt => "gt",
            BinaryOp::Gte => "gte",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

/// Failure policy of a type selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SelectPolicy {
    /// `Int(x)`
    Raise,
    /// `Int??(x)`
    OrNull,
    /// `Int?(x)`
    Check,
    /// `Int!(x, 'message')`
    Assert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GuardKind {
    /// Preconditions checked before the body.
    Guard,
    /// Postconditions over `it`, the body's value.
    Check,
}

/// `label: condition`, the label being optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Condition {
    pub label: Option<String>,
    pub test: Ast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Expr {
    Int(i64),
    Float(OrderedFloat<f64>),
    Bool(bool),
    String(String),
    /// `D2024-01-15`, payload without the `D`.
    Date(String),
    /// `D2024-01-15T10:30:00Z`, payload without the `D`.
    DateTime(String),
    /// ISO-8601 text as written, e.g. `P1DT2H`.
    Duration(String),
    Null,
    Array(Vec<Ast>),
    Record(Vec<(String, Ast)>),
    Var(String),
    Unary { op: UnaryOp, operand: Box<Ast> },
    Binary { op: BinaryOp, lhs: Box<Ast>, rhs: Box<Ast> },
    If { cond: Box<Ast>, then: Box<Ast>, else_: Box<Ast> },
    Let { bindings: Vec<(String, Ast)>, body: Box<Ast> },
    Lambda { params: Vec<String>, body: Box<Ast> },
    Call { callee: Box<Ast>, args: Vec<Ast> },
    Member { object: Box<Ast>, field: String },
    /// `value |> function(args...)`
    Pipe { value: Box<Ast>, function: String, args: Vec<Ast> },
    Alternative(Vec<Ast>),
    Select {
        type_name: String,
        policy: SelectPolicy,
        constraints: Vec<Condition>,
        args: Vec<Ast>,
    },
    Guard { kind: GuardKind, conditions: Vec<Condition>, body: Box<Ast> },
}
