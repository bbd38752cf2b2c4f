//! Error taxonomy shared by every stage of the pipeline.
//!
//! Each stage has its own error type; [`CompileError`] wraps them so callers
//! can run parse → transform → emit with `?` all the way through.
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::types::TypeTag;

/// 1-based line/column plus the byte offset into the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Position {
    /// Resolve a byte offset against `source`. Offsets past the end clamp to it.
    pub fn locate(source: &str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let mut line = 1;
        let mut column = 1;
        for (i, c) in source.char_indices() {
            if i >= offset {
                break;
            }
            if c == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        Self { offset, line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Malformed input. Never recovered into a partial AST.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("syntax error at {position}: {message}")]
pub struct SyntaxError {
    pub position: Position,
    pub message: String,
}

impl SyntaxError {
    pub fn at(source: &str, offset: usize, message: impl Into<String>) -> Self {
        Self { position: Position::locate(source, offset), message: message.into() }
    }
}

/// Unbound variable or unknown selector type name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("type error: {message}")]
pub struct TypeError {
    pub message: String,
}

impl TypeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// No emitter matched a call, not even a fallback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no `{function_name}` for ({}) on this target", display_tags(.arg_types))]
pub struct DispatchError {
    pub function_name: String,
    pub arg_types: Vec<TypeTag>,
}

fn display_tags(tags: &[TypeTag]) -> String {
    tags.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// A construct the target cannot express at all (e.g. lambdas in SQL).
    #[error("{target} cannot express {construct}")]
    Unsupported { target: &'static str, construct: &'static str },
}

pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_counts_lines_and_chars() {
        let src = "1 +\n  'é' +\n  x";
        let p = Position::locate(src, src.find('x').unwrap());
        assert_eq!((p.line, p.column), (3, 3));
        let p = Position::locate(src, src.find('+').unwrap());
        assert_eq!((p.line, p.column), (1, 3));
    }

    #[test]
    fn dispatch_error_lists_arg_types() {
        let err = DispatchError {
            function_name: "map".into(),
            arg_types: vec![TypeTag::Array, TypeTag::Function],
        };
        assert_eq!(err.to_string(), "no `map` for (Array, Function) on this target");
    }
}
