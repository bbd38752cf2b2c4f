//! Closed type lattice for Elo.
//!
//! `Type` is what the transform assigns to every IR node; `TypeTag` is its
//! payload-free projection and the key the dispatch registries are built on.
use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Type {
    Int,
    Float,
    Bool,
    String,
    Date,
    DateTime,
    Duration,
    /// `None` when the items do not share one type.
    Array(Option<Box<Type>>),
    /// Fields in source order.
    Record(IndexMap<String, Type>),
    Function,
    Null,
    /// Universal supertype. Never a runtime value.
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TypeTag {
    Int,
    Float,
    Bool,
    String,
    Date,
    DateTime,
    Duration,
    Array,
    Record,
    Function,
    Null,
    Any,
}

impl Type {
    pub fn tag(&self) -> TypeTag {
        match self {
            Type::Int => TypeTag::Int,
            Type::Float => TypeTag::Float,
            Type::Bool => TypeTag::Bool,
            Type::String => TypeTag::String,
            Type::Date => TypeTag::Date,
            Type::DateTime => TypeTag::DateTime,
            Type::Duration => TypeTag::Duration,
            Type::Array(_) => TypeTag::Array,
            Type::Record(_) => TypeTag::Record,
            Type::Function => TypeTag::Function,
            Type::Null => TypeTag::Null,
            Type::Any => TypeTag::Any,
        }
    }

    pub fn array_of(item: Type) -> Self {
        Type::Array(Some(Box::new(item)))
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Type::Any)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, Type::Date | Type::DateTime)
    }

    /// Element type of an array, `Any` when unknown.
    pub fn element(&self) -> Type {
        match self {
            Type::Array(Some(item)) => (**item).clone(),
            _ => Type::Any,
        }
    }

    /// Least common type of two branches: equal types stay, anything else is `Any`.
    /// `Null` joins with any type into that type since absence is always allowed.
    pub fn join(&self, other: &Type) -> Type {
        match (self, other) {
            (a, b) if a == b => a.clone(),
            (Type::Null, t) | (t, Type::Null) => t.clone(),
            (Type::Array(_), Type::Array(_)) => Type::Array(None),
            _ => Type::Any,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Array(Some(item)) => write!(f, "Array<{item}>"),
            Type::Record(fields) => {
                write!(f, "{{")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {ty}")?;
                }
                write!(f, "}}")
            }
            other => write!(f, "{}", other.tag()),
        }
    }
}

// ------------------------------ Selectors -------------------------------- //

/// Type names accepted by selector syntax (`Int(x)`, `Date??(x)`, ...).
/// Each entry: source name, lowercase stem used in call names, result type.
pub const SELECTABLE: &[(&str, &str, TypeTag)] = &[
    ("Int", "int", TypeTag::Int),
    ("Float", "float", TypeTag::Float),
    ("Bool", "bool", TypeTag::Bool),
    ("String", "string", TypeTag::String),
    ("Date", "date", TypeTag::Date),
    ("DateTime", "datetime", TypeTag::DateTime),
    ("Duration", "duration", TypeTag::Duration),
];

pub fn selectable(name: &str) -> Option<(&'static str, Type)> {
    SELECTABLE.iter().find(|(n, _, _)| *n == name).map(|(_, stem, tag)| (*stem, scalar(*tag)))
}

fn scalar(tag: TypeTag) -> Type {
    match tag {
        TypeTag::Int => Type::Int,
        TypeTag::Float => Type::Float,
        TypeTag::Bool => Type::Bool,
        TypeTag::String => Type::String,
        TypeTag::Date => Type::Date,
        TypeTag::DateTime => Type::DateTime,
        TypeTag::Duration => Type::Duration,
        TypeTag::Null => Type::Null,
        TypeTag::Function => Type::Function,
        TypeTag::Array => Type::Array(None),
        TypeTag::Record => Type::Record(IndexMap::new()),
        TypeTag::Any => Type::Any,
    }
}

// ---------------------------- Result types ------------------------------- //

/// Result type of an operator or standard-library call.
///
/// Total: unknown names and mismatched operands resolve to `Any` rather than
/// failing, value-level mismatches being a runtime concern.
pub fn result_type(name: &str, args: &[Type]) -> Type {
    use Type::*;
    match (name, args) {
        ("eq" | "neq" | "lt" | "lte" | "gt" | "gte" | "and" | "or" | "not", _) => Bool,

        ("neg" | "pos", [t @ (Int | Float | Duration)]) => t.clone(),

        ("add", [a, b]) => add_type(a, b),
        ("sub", [a, b]) => sub_type(a, b),
        ("mul", [Duration, Int | Float]) | ("mul", [Int | Float, Duration]) => Duration,
        ("div", [Duration, Int | Float]) => Duration,
        ("mul" | "div" | "mod" | "pow", [a, b]) => numeric_type(a, b),

        ("trim" | "upper" | "lower" | "join", _) => String,
        ("length" | "round" | "floor" | "ceil" | "year" | "month" | "day", _) => Int,
        ("abs", [t @ (Int | Float)]) => t.clone(),
        ("starts_with" | "ends_with" | "contains" | "any" | "all", _) => Bool,
        ("map", _) => Array(None),
        ("filter", [t @ Array(_), ..]) => t.clone(),
        ("first" | "last", [t]) => t.element(),

        ("today" | "tomorrow" | "yesterday", []) => Date,
        ("start_of_week" | "end_of_week" | "start_of_month" | "end_of_month", []) => Date,
        ("start_of_quarter" | "end_of_quarter" | "start_of_year" | "end_of_year", []) => Date,
        ("now" | "start_of_day" | "end_of_day", []) => DateTime,

        _ => Any,
    }
}

fn numeric_type(a: &Type, b: &Type) -> Type {
    match (a, b) {
        (Type::Int, Type::Int) => Type::Int,
        (x, y) if x.is_numeric() && y.is_numeric() => Type::Float,
        _ => Type::Any,
    }
}

fn add_type(a: &Type, b: &Type) -> Type {
    use Type::*;
    match (a, b) {
        (String, String) => String,
        (Array(_), Array(_)) => a.join(b),
        (t @ (Date | DateTime), Duration) | (Duration, t @ (Date | DateTime)) => t.clone(),
        (Duration, Duration) => Duration,
        _ => numeric_type(a, b),
    }
}

fn sub_type(a: &Type, b: &Type) -> Type {
    use Type::*;
    match (a, b) {
        (t @ (Date | DateTime), Duration) => t.clone(),
        (Date, Date) | (DateTime, DateTime) | (Duration, Duration) => Duration,
        _ => numeric_type(a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparisons_are_bool_even_on_any() {
        assert_eq!(result_type("lt", &[Type::Any, Type::Int]), Type::Bool);
        assert_eq!(result_type("eq", &[Type::Date, Type::Date]), Type::Bool);
    }

    #[test]
    fn arithmetic_widens_and_any_propagates() {
        assert_eq!(result_type("add", &[Type::Int, Type::Int]), Type::Int);
        assert_eq!(result_type("add", &[Type::Int, Type::Float]), Type::Float);
        assert_eq!(result_type("add", &[Type::Any, Type::Int]), Type::Any);
        assert_eq!(result_type("mul", &[Type::String, Type::Int]), Type::Any);
    }

    #[test]
    fn temporal_arithmetic() {
        assert_eq!(result_type("add", &[Type::Date, Type::Duration]), Type::Date);
        assert_eq!(result_type("add", &[Type::Duration, Type::DateTime]), Type::DateTime);
        assert_eq!(result_type("add", &[Type::Duration, Type::Duration]), Type::Duration);
        assert_eq!(result_type("sub", &[Type::Date, Type::Date]), Type::Duration);
        assert_eq!(result_type("mul", &[Type::Int, Type::Duration]), Type::Duration);
    }

    #[test]
    fn join_keeps_equal_types_and_absorbs_null() {
        assert_eq!(Type::Int.join(&Type::Int), Type::Int);
        assert_eq!(Type::Null.join(&Type::String), Type::String);
        assert_eq!(Type::Int.join(&Type::String), Type::Any);
    }

    #[test]
    fn selectable_names() {
        assert_eq!(selectable("DateTime").map(|(stem, _)| stem), Some("datetime"));
        assert!(selectable("Integer").is_none());
    }
}
