//! Per-target standard-library table: `(name, [TypeTag])` → emitter.
//!
//! Lookup is a static table walk, no inference happens here. The generalized
//! candidates for one call are produced in a fixed order so two lookups with
//! the same key always choose the same emitter.
use std::cmp::Reverse;

use indexmap::IndexMap;
use tracing::trace;

use crate::emit::{CallSite, EmitContext, Fragment};
use crate::error::{CompileResult, DispatchError};
use crate::types::TypeTag;

/// Calls with more arguments than this skip the per-position widening.
pub const MAX_WIDENED_ARITY: usize = 8;

/// Turns one resolved call into target text.
pub trait Emitter: Send + Sync {
    fn emit(&self, call: &CallSite<'_>, cx: &mut EmitContext<'_>) -> CompileResult<Fragment>;
}

impl<F> Emitter for F
where
    F: Fn(&CallSite<'_>, &mut EmitContext<'_>) -> CompileResult<Fragment> + Send + Sync,
{
    fn emit(&self, call: &CallSite<'_>, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        self(call, cx)
    }
}

#[derive(Default)]
pub struct Registry {
    exact: IndexMap<String, IndexMap<Vec<TypeTag>, Box<dyn Emitter>>>,
    /// Matched by name for any arity from the minimum up.
    variadic: IndexMap<String, (usize, Box<dyn Emitter>)>,
    fallback: Option<Box<dyn Emitter>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure emitter. Later definitions of the same key replace
    /// earlier ones.
    pub fn define<F>(&mut self, name: &str, sig: impl Into<Vec<TypeTag>>, emitter: F) -> &mut Self
    where
        F: Fn(&CallSite<'_>, &mut EmitContext<'_>) -> CompileResult<Fragment> + Send + Sync + 'static,
    {
        self.register(name, sig, emitter)
    }

    pub fn register<E>(&mut self, name: &str, sig: impl Into<Vec<TypeTag>>, emitter: E) -> &mut Self
    where
        E: Emitter + 'static,
    {
        self.exact
            .entry(name.to_string())
            .or_default()
            .insert(sig.into(), Box::new(emitter));
        self
    }

    pub fn define_variadic<F>(&mut self, name: &str, min_arity: usize, emitter: F) -> &mut Self
    where
        F: Fn(&CallSite<'_>, &mut EmitContext<'_>) -> CompileResult<Fragment> + Send + Sync + 'static,
    {
        self.variadic.insert(name.to_string(), (min_arity, Box::new(emitter)));
        self
    }

    /// Emitter used when nothing else matches, whatever the name.
    pub fn fallback<F>(&mut self, emitter: F) -> &mut Self
    where
        F: Fn(&CallSite<'_>, &mut EmitContext<'_>) -> CompileResult<Fragment> + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(emitter));
        self
    }

    /// Resolve a call: exact, then generalized, then variadic, then fallback.
    pub fn lookup(&self, name: &str, tags: &[TypeTag]) -> Result<&dyn Emitter, DispatchError> {
        if let Some(table) = self.exact.get(name) {
            if let Some(e) = table.get(tags) {
                trace!(function = name, args = ?tags, "exact match");
                return Ok(e.as_ref());
            }
            for sig in generalizations(tags) {
                if let Some(e) = table.get(&sig) {
                    trace!(function = name, args = ?tags, chosen = ?sig, "generalized match");
                    return Ok(e.as_ref());
                }
            }
        }
        if let Some((_, e)) = self.variadic.get(name).filter(|(min, _)| tags.len() >= *min) {
            trace!(function = name, args = ?tags, "variadic match");
            return Ok(e.as_ref());
        }
        if let Some(e) = &self.fallback {
            trace!(function = name, args = ?tags, "fallback");
            return Ok(e.as_ref());
        }
        trace!(function = name, args = ?tags, "no match");
        Err(DispatchError { function_name: name.to_string(), arg_types: tags.to_vec() })
    }
}

/// Every strictly more general signature of `tags`, most specific first.
///
/// One widened position at a time, then two, and so on. Among signatures
/// with the same widening count those keeping the leftmost positions
/// concrete come first. Signatures equal to `tags` or to an earlier
/// candidate (positions already `Any`) are skipped.
pub fn generalizations(tags: &[TypeTag]) -> Vec<Vec<TypeTag>> {
    let n = tags.len();
    if n == 0 {
        return Vec::new();
    }
    let all_any = vec![TypeTag::Any; n];
    if n > MAX_WIDENED_ARITY {
        return if tags == all_any.as_slice() { Vec::new() } else { vec![all_any] };
    }

    // bit i of a mask = position i widened
    let concreteness = |mask: u32| -> u32 {
        (0..n).filter(|i| mask & (1 << i) == 0).map(|i| 1 << (n - 1 - i)).sum()
    };

    let mut out: Vec<Vec<TypeTag>> = Vec::new();
    for widened in 1..=n as u32 {
        let mut masks = (0u32..1 << n).filter(|m| m.count_ones() == widened).collect::<Vec<_>>();
        masks.sort_by_key(|m| Reverse(concreteness(*m)));
        for mask in masks {
            let sig = tags
                .iter()
                .enumerate()
                .map(|(i, t)| if mask & (1 << i) != 0 { TypeTag::Any } else { *t })
                .collect::<Vec<_>>();
            if sig.as_slice() != tags && !out.contains(&sig) {
                out.push(sig);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeTag::{Any, Bool, Float, Int};

    fn tagged(
        label: &'static str,
    ) -> impl Fn(&CallSite<'_>, &mut EmitContext<'_>) -> CompileResult<Fragment> + Send + Sync + 'static {
        move |_, _| Ok(Fragment::atom(label))
    }

    fn label_of(reg: &Registry, name: &str, tags: &[TypeTag]) -> String {
        let target = crate::targets::ruby::Ruby;
        let mut cx = EmitContext::new(&target);
        let call = CallSite { name, args: &[], arg_types: &[], result: &crate::types::Type::Any };
        reg.lookup(name, tags).unwrap().emit(&call, &mut cx).unwrap().code
    }

    #[test]
    fn generalization_order_prefers_leftmost_concrete() {
        assert_eq!(
            generalizations(&[Int, Float]),
            vec![vec![Int, Any], vec![Any, Float], vec![Any, Any]]
        );
        let three = generalizations(&[Int, Float, TypeTag::String]);
        assert_eq!(three[0], vec![Int, Float, Any]);
        assert_eq!(three[1], vec![Int, Any, TypeTag::String]);
        assert_eq!(three[2], vec![Any, Float, TypeTag::String]);
        assert_eq!(three[3], vec![Int, Any, Any]);
        assert_eq!(three.last().unwrap(), &vec![Any, Any, Any]);
        assert_eq!(three.len(), 7);
    }

    #[test]
    fn generalization_skips_duplicates() {
        assert_eq!(generalizations(&[Int, Any]), vec![vec![Any, Any]]);
        assert!(generalizations(&[Any, Any]).is_empty());
        assert!(generalizations(&[]).is_empty());
    }

    #[test]
    fn wide_calls_jump_to_all_any() {
        let tags = vec![Int; MAX_WIDENED_ARITY + 1];
        assert_eq!(generalizations(&tags), vec![vec![Any; MAX_WIDENED_ARITY + 1]]);
    }

    #[test]
    fn exact_beats_generalized() {
        let mut reg = Registry::new();
        reg.define("add", [Any, Any], tagged("generic"));
        reg.define("add", [Int, Int], tagged("int"));
        assert_eq!(label_of(&reg, "add", &[Int, Int]), "int");
        assert_eq!(label_of(&reg, "add", &[Int, Float]), "generic");
    }

    #[test]
    fn leftmost_concrete_wins_ties() {
        let mut reg = Registry::new();
        reg.define("f", [Any, Float], tagged("right"));
        reg.define("f", [Int, Any], tagged("left"));
        assert_eq!(label_of(&reg, "f", &[Int, Float]), "left");
    }

    #[test]
    fn lookup_is_deterministic() {
        let mut reg = Registry::new();
        reg.define("f", [Any, Bool], tagged("a"));
        reg.define("f", [Int, Any], tagged("b"));
        reg.define("f", [Any, Any], tagged("c"));
        let first = label_of(&reg, "f", &[Int, Bool]);
        for _ in 0..10 {
            assert_eq!(label_of(&reg, "f", &[Int, Bool]), first);
        }
    }

    #[test]
    fn variadic_then_fallback_then_error() {
        let mut reg = Registry::new();
        reg.define_variadic("array", 0, tagged("array"));
        assert_eq!(label_of(&reg, "array", &[Int, Int, Int]), "array");
        assert_eq!(label_of(&reg, "array", &[]), "array");

        let err = reg.lookup("nope", &[Int]).err().unwrap();
        assert_eq!(err.function_name, "nope");
        assert_eq!(err.arg_types, vec![Int]);

        reg.fallback(tagged("fallback"));
        assert_eq!(label_of(&reg, "nope", &[Int]), "fallback");
    }

    #[test]
    fn arity_is_part_of_the_key() {
        let mut reg = Registry::new();
        reg.define("round", [Any], tagged("one"));
        assert!(reg.lookup("round", &[Float, Int]).is_err());
    }

    #[test]
    fn variadic_entries_have_a_minimum_arity() {
        let mut reg = Registry::new();
        reg.define_variadic("invoke", 1, tagged("invoke"));
        assert_eq!(label_of(&reg, "invoke", &[Any, Int]), "invoke");
        let err = reg.lookup("invoke", &[]).err().unwrap();
        assert_eq!(err.function_name, "invoke");
        assert!(err.arg_types.is_empty());
    }
}
