// Typed, call-shaped IR consumed by every target. No surface syntax here.

use ordered_float::OrderedFloat;
use serde::Serialize;

use crate::types::{Type, TypeTag};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ir {
    pub kind: IrKind,
    pub ty: Type,           // fully resolved, never missing
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Literal {
    Int(i64),
    Float(OrderedFloat<f64>),
    Bool(bool),
    String(String),
    Date(String),           // `2024-01-15`
    DateTime(String),       // `2024-01-15T10:30:00Z`
    Duration(String),       // `P1D`
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum IrKind {
    Literal(Literal),
    Var(String),
    /// Sequential: each binding sees the previous ones.
    Let { bindings: Vec<(String, Ir)>, body: Box<Ir> },
    Lambda { params: Vec<String>, body: Box<Ir> },
    If { cond: Box<Ir>, then: Box<Ir>, else_: Box<Ir> },
    /// First candidate that neither raises nor yields null wins.
    Alternative(Vec<Ir>),
    /// Every operator and constant-producing construct. Result type is `Ir::ty`.
    Call { name: String, args: Vec<Ir>, arg_types: Vec<Type> },
}

impl Ir {
    pub fn new(kind: IrKind, ty: Type) -> Self {
        Self { kind, ty }
    }

    pub fn literal(lit: Literal) -> Self {
        let ty = match &lit {
            Literal::Int(_) => Type::Int,
            Literal::Float(_) => Type::Float,
            Literal::Bool(_) => Type::Bool,
            Literal::String(_) => Type::String,
            Literal::Date(_) => Type::Date,
            Literal::DateTime(_) => Type::DateTime,
            Literal::Duration(_) => Type::Duration,
            Literal::Null => Type::Null,
        };
        Self::new(IrKind::Literal(lit), ty)
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::literal(Literal::String(s.into()))
    }

    pub fn var(name: impl Into<String>, ty: Type) -> Self {
        Self::new(IrKind::Var(name.into()), ty)
    }

    /// Build a call; argument types are read off the arguments.
    pub fn call(name: impl Into<String>, args: Vec<Ir>, result: Type) -> Self {
        let arg_types = args.iter().map(|a| a.ty.clone()).collect();
        Self::new(IrKind::Call { name: name.into(), args, arg_types }, result)
    }

    pub fn if_(cond: Ir, then: Ir, else_: Ir) -> Self {
        let ty = then.ty.join(&else_.ty);
        Self::new(IrKind::If { cond: Box::new(cond), then: Box::new(then), else_: Box::new(else_) }, ty)
    }

    pub fn let_(bindings: Vec<(String, Ir)>, body: Ir) -> Self {
        let ty = body.ty.clone();
        Self::new(IrKind::Let { bindings, body: Box::new(body) }, ty)
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match &self.kind {
            IrKind::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    pub fn as_str_literal(&self) -> Option<&str> {
        match self.as_literal() {
            Some(Literal::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn tag(&self) -> TypeTag {
        self.ty.tag()
    }
}
