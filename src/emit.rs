//! Shared emission machinery: fragments, precedence, the context handed to
//! emitters, and the `Target` seam each binding implements.
use std::borrow::Cow;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ast::Ast;
use crate::error::{CompileError, CompileResult};
use crate::ir::{Ir, IrKind, Literal};
use crate::registry::Registry;
use crate::types::{Type, TypeTag};

// ---- Fragments ---- //

/// Emitted text plus the operator at its top level, if any.
///
/// `op` is a key into the target's `PrecedenceTable`; `None` marks text that
/// never needs wrapping (literals, names, calls, already-parenthesized forms).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub code: String,
    pub op: Option<&'static str>,
}

impl Fragment {
    pub fn atom(code: impl Into<String>) -> Self {
        Self { code: code.into(), op: None }
    }

    pub fn op(code: impl Into<String>, op: &'static str) -> Self {
        Self { code: code.into(), op: Some(op) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
    Left,
    Right,
    /// Chaining is a syntax error or confusing; always parenthesize.
    None,
}

/// Operator key → (binding strength, associativity). Higher binds tighter.
pub struct PrecedenceTable {
    entries: Vec<(&'static str, u8, Assoc)>,
}

impl PrecedenceTable {
    pub fn new(entries: &[(&'static str, u8, Assoc)]) -> Self {
        Self { entries: entries.to_vec() }
    }

    pub fn get(&self, op: &str) -> Option<(u8, Assoc)> {
        self.entries.iter().find(|(k, _, _)| *k == op).map(|(_, l, a)| (*l, *a))
    }

    /// Whether a fragment whose top-level operator is `inner` must be wrapped
    /// when it appears on `side` of `outer`.
    pub fn needs_parens(&self, inner: Option<&str>, outer: &str, side: Side) -> bool {
        let Some(inner) = inner else { return false };
        let (Some((inner_level, _)), Some((outer_level, assoc))) = (self.get(inner), self.get(outer))
        else {
            return true;
        };
        if inner_level != outer_level {
            return inner_level < outer_level;
        }
        match assoc {
            Assoc::Left => side == Side::Right,
            Assoc::Right => side == Side::Left,
            Assoc::None => true,
        }
    }
}

// ---- Call sites and context ---- //

/// What an emitter sees of the call it is rendering.
#[derive(Debug, Clone, Copy)]
pub struct CallSite<'a> {
    pub name: &'a str,
    pub args: &'a [Ir],
    pub arg_types: &'a [Type],
    pub result: &'a Type,
}

impl<'a> CallSite<'a> {
    pub fn arg(&self, i: usize) -> &'a Ir {
        &self.args[i]
    }
}

pub struct EmitContext<'t> {
    target: &'t dyn Target,
    helpers: BTreeSet<String>,
    /// Names bound to already-emitted text, innermost last.
    scope: Vec<(String, Fragment)>,
}

impl<'t> EmitContext<'t> {
    pub fn new(target: &'t dyn Target) -> Self {
        Self { target, helpers: BTreeSet::new(), scope: Vec::new() }
    }

    pub fn target(&self) -> &'t dyn Target {
        self.target
    }

    pub fn fragment(&mut self, node: &Ir) -> CompileResult<Fragment> {
        let target = self.target;
        match &node.kind {
            IrKind::Literal(lit) => target.literal(lit, self),
            IrKind::Var(name) => match self.lookup(name) {
                Some(frag) => Ok(frag.clone()),
                None => Ok(target.variable(name)),
            },
            IrKind::Let { bindings, body } => target.let_in(bindings, body, self),
            IrKind::Lambda { params, body } => target.lambda(params, body, self),
            IrKind::If { cond, then, else_ } => target.conditional(cond, then, else_, &node.ty, self),
            IrKind::Alternative(candidates) => target.alternative(candidates, &node.ty, self),
            IrKind::Call { name, args, arg_types } => {
                let tags = arg_types.iter().map(Type::tag).collect::<Vec<TypeTag>>();
                let emitter = target.registry().lookup(name, &tags)?;
                let call = CallSite { name, args, arg_types, result: &node.ty };
                emitter.emit(&call, self)
            }
        }
    }

    pub fn emit(&mut self, node: &Ir) -> CompileResult<String> {
        Ok(self.fragment(node)?.code)
    }

    /// Emit `node` as an operand of `outer_op`, wrapping it when precedence
    /// or associativity would otherwise change the meaning.
    pub fn emit_with_parens(&mut self, node: &Ir, outer_op: &str, side: Side) -> CompileResult<String> {
        let inner = self.fragment(node)?;
        Ok(self.wrap(inner, outer_op, side))
    }

    pub fn wrap(&self, inner: Fragment, outer_op: &str, side: Side) -> String {
        if self.target.precedence().needs_parens(inner.op, outer_op, side) {
            format!("({})", inner.code)
        } else {
            inner.code
        }
    }

    /// Emit every node, comma separated.
    pub fn emit_list(&mut self, nodes: &[Ir]) -> CompileResult<String> {
        let parts = nodes.iter().map(|n| self.emit(n)).collect::<CompileResult<Vec<_>>>()?;
        Ok(parts.join(", "))
    }

    pub fn require_helper(&mut self, name: &str) {
        self.helpers.insert(name.to_string());
    }

    pub fn helpers(&self) -> &BTreeSet<String> {
        &self.helpers
    }

    pub fn bind(&mut self, name: &str, frag: Fragment) {
        self.scope.push((name.to_string(), frag));
    }

    pub fn scope_depth(&self) -> usize {
        self.scope.len()
    }

    pub fn unbind_to(&mut self, depth: usize) {
        self.scope.truncate(depth);
    }

    pub fn lookup(&self, name: &str) -> Option<&Fragment> {
        self.scope.iter().rev().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    fn finish(self) -> BTreeSet<String> {
        self.helpers
    }
}

// ---- Targets ---- //

/// One output language. Calls go through the registry; the structural forms
/// the registry cannot express are methods here.
pub trait Target: Sync {
    fn name(&self) -> &'static str;
    fn registry(&self) -> &'static Registry;
    fn precedence(&self) -> &'static PrecedenceTable;

    fn literal(&self, lit: &Literal, cx: &mut EmitContext<'_>) -> CompileResult<Fragment>;
    fn variable(&self, name: &str) -> Fragment;
    fn let_in(&self, bindings: &[(String, Ir)], body: &Ir, cx: &mut EmitContext<'_>) -> CompileResult<Fragment>;
    fn lambda(&self, params: &[String], body: &Ir, cx: &mut EmitContext<'_>) -> CompileResult<Fragment>;
    fn conditional(
        &self,
        cond: &Ir,
        then: &Ir,
        else_: &Ir,
        ty: &Type,
        cx: &mut EmitContext<'_>,
    ) -> CompileResult<Fragment>;
    fn alternative(&self, candidates: &[Ir], ty: &Type, cx: &mut EmitContext<'_>) -> CompileResult<Fragment>;

    /// Wrap a compiled expression into a standalone unit taking `_` as input.
    fn executable(&self, code: &str) -> String;
}

// ---- Options and output ---- //

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputForm {
    /// Bare expression, `_` left free.
    #[default]
    Fragment,
    /// A function of `_` (a query for SQL).
    Executable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub form: OutputForm,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Compiled {
    pub code: String,
    /// Runtime helpers the code calls, to be supplied by the host prelude.
    pub helpers: BTreeSet<String>,
}

/// Either stage of the front end; an AST is transformed on the way in.
#[derive(Debug, Clone, Copy)]
pub enum Input<'a> {
    Ast(&'a Ast),
    Ir(&'a Ir),
}

impl<'a> From<&'a Ast> for Input<'a> {
    fn from(ast: &'a Ast) -> Self {
        Input::Ast(ast)
    }
}

impl<'a> From<&'a Ir> for Input<'a> {
    fn from(ir: &'a Ir) -> Self {
        Input::Ir(ir)
    }
}

impl<'a> Input<'a> {
    pub fn into_ir(self) -> CompileResult<Cow<'a, Ir>> {
        match self {
            Input::Ast(ast) => Ok(Cow::Owned(crate::transform::transform(ast)?)),
            Input::Ir(ir) => Ok(Cow::Borrowed(ir)),
        }
    }
}

pub fn compile_with<'a>(
    target: &dyn Target,
    input: impl Into<Input<'a>>,
    options: &CompileOptions,
) -> Result<Compiled, CompileError> {
    let ir = input.into().into_ir()?;
    let mut cx = EmitContext::new(target);
    let code = cx.emit(&ir)?;
    let code = match options.form {
        OutputForm::Fragment => code,
        OutputForm::Executable => target.executable(&code),
    };
    let helpers = cx.finish();
    debug!(lang = target.name(), form = ?options.form, helpers = ?helpers, "compiled");
    Ok(Compiled { code, helpers })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PrecedenceTable {
        PrecedenceTable::new(&[
            ("+", 10, Assoc::Left),
            ("-", 10, Assoc::Left),
            ("*", 20, Assoc::Left),
            ("**", 30, Assoc::Right),
            ("<", 5, Assoc::None),
        ])
    }

    #[test]
    fn lower_precedence_inner_is_wrapped() {
        let t = table();
        assert!(t.needs_parens(Some("+"), "*", Side::Left));
        assert!(!t.needs_parens(Some("*"), "+", Side::Right));
        assert!(!t.needs_parens(None, "*", Side::Left));
    }

    #[test]
    fn associativity_decides_equal_levels() {
        let t = table();
        // a - (b - c) keeps its parens, (a - b) - c drops them
        assert!(t.needs_parens(Some("-"), "-", Side::Right));
        assert!(!t.needs_parens(Some("-"), "-", Side::Left));
        // (a ** b) ** c keeps its parens
        assert!(t.needs_parens(Some("**"), "**", Side::Left));
        assert!(!t.needs_parens(Some("**"), "**", Side::Right));
        assert!(t.needs_parens(Some("<"), "<", Side::Left));
    }

    #[test]
    fn unknown_operators_are_wrapped() {
        let t = table();
        assert!(t.needs_parens(Some("??"), "+", Side::Left));
        assert!(t.needs_parens(Some("+"), "??", Side::Left));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: CompileOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.form, OutputForm::Fragment);
        let opts: CompileOptions = serde_json::from_str(r#"{"form":"executable"}"#).unwrap();
        assert_eq!(opts.form, OutputForm::Executable);
    }
}
