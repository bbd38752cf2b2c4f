//! Elo: a small pure expression language compiled to Ruby, JavaScript and
//! PostgreSQL.
//!
//! ```text
//! source ─parse→ Ast ─transform→ Ir ─target→ Compiled { code, helpers }
//! ```
//!
//! The IR is target independent; one `Ir` may be emitted to every target.
pub mod ast;
pub mod emit;
pub mod error;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod prelude;
pub mod registry;
pub mod targets;
pub mod transform;
pub mod types;

use serde::{Deserialize, Serialize};

pub use crate::ast::Ast;
pub use crate::emit::{CompileOptions, Compiled, Input, OutputForm};
pub use crate::error::{CompileError, CompileResult, DispatchError, SyntaxError, TypeError};
pub use crate::ir::Ir;
pub use crate::parser::parse;
pub use crate::transform::transform;

use crate::emit::{compile_with, Target};
use crate::targets::{javascript::JavaScript, ruby::Ruby, sql::Sql};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Ruby,
    JavaScript,
    Sql,
}

impl TargetKind {
    pub const ALL: [TargetKind; 3] = [TargetKind::Ruby, TargetKind::JavaScript, TargetKind::Sql];

    pub fn target(self) -> &'static dyn Target {
        match self {
            TargetKind::Ruby => &Ruby,
            TargetKind::JavaScript => &JavaScript,
            TargetKind::Sql => &Sql,
        }
    }

    pub fn name(self) -> &'static str {
        self.target().name()
    }
}

pub fn compile_to_ruby<'a>(input: impl Into<Input<'a>>, options: &CompileOptions) -> CompileResult<Compiled> {
    compile_with(&Ruby, input, options)
}

pub fn compile_to_javascript<'a>(input: impl Into<Input<'a>>, options: &CompileOptions) -> CompileResult<Compiled> {
    compile_with(&JavaScript, input, options)
}

pub fn compile_to_sql<'a>(input: impl Into<Input<'a>>, options: &CompileOptions) -> CompileResult<Compiled> {
    compile_with(&Sql, input, options)
}

/// Parse, type and emit one source expression.
pub fn compile(source: &str, target: TargetKind, options: &CompileOptions) -> CompileResult<Compiled> {
    let ast = parse(source)?;
    compile_with(target.target(), &ast, options)
}
