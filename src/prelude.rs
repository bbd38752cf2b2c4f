//! Names of the runtime helpers each target may call.
//!
//! The helper bodies are the host's business (a Ruby module, a JS file, a
//! set of PL/pgSQL functions); the compiler only needs to agree on names and
//! report which ones a piece of code uses.
use std::collections::BTreeSet;

use once_cell::sync::Lazy;

use crate::transform::PERIODS;
use crate::types::SELECTABLE;

/// `as_int` → `elo_as_int`
pub fn snake(function: &str) -> String {
    format!("elo_{function}")
}

/// `as_int_or_null` → `eloAsIntOrNull`
pub fn camel(function: &str) -> String {
    let mut out = String::from("elo");
    for word in function.split('_').filter(|w| !w.is_empty()) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

/// Every selector call the transform can produce: `as_int`, `is_date`, ...
pub fn selector_functions() -> impl Iterator<Item = String> {
    SELECTABLE.iter().flat_map(|(_, stem, _)| {
        [
            format!("as_{stem}"),
            format!("as_{stem}_or_null"),
            format!("is_{stem}"),
            format!("assert_{stem}"),
        ]
    })
}

pub static RUBY: Lazy<BTreeSet<String>> = Lazy::new(|| {
    let mut names = selector_functions().map(|f| snake(&f)).collect::<BTreeSet<_>>();
    names.extend(["alt", "date_diff", "div", "mod"].map(snake));
    names
});

pub static JAVASCRIPT: Lazy<BTreeSet<String>> = Lazy::new(|| {
    let mut names = selector_functions().map(|f| camel(&f)).collect::<BTreeSet<_>>();
    names.extend(PERIODS.iter().map(|(_, f)| camel(f)));
    names.extend(
        [
            "alt", "add", "sub", "mul", "div", "mod", "pow", "eq", "neg", "duration",
            "add_duration", "sub_duration", "mul_duration", "div_duration", "date_diff",
        ]
        .map(camel),
    );
    names
});

pub static SQL: Lazy<BTreeSet<String>> = Lazy::new(|| {
    let mut names = selector_functions().map(|f| snake(&f)).collect::<BTreeSet<_>>();
    // `jsonb` operators and library functions for operands of unknown type
    names.extend(
        [
            "fail", "add", "sub", "mul", "div", "mod", "pow", "eq", "neq", "lt", "lte", "gt", "gte", "neg",
            "abs", "length", "first", "last", "join", "contains",
        ]
        .map(snake),
    );
    names
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{CompileOptions, Compiled};
    use crate::{compile, TargetKind};

    #[test]
    fn helper_naming() {
        assert_eq!(snake("as_int"), "elo_as_int");
        assert_eq!(camel("as_int_or_null"), "eloAsIntOrNull");
        assert_eq!(camel("start_of_week"), "eloStartOfWeek");
    }

    const PROGRAMS: &[&str] = &[
        "_ + 1",
        "_ == null",
        "Int(_) | Float??(_) | 0",
        "Date!(_, 'need a date')",
        "Int{positive: it > 0}(_)",
        "Duration?(_)",
        "D2024-01-15 + P1D",
        "D2024-01-15 + PT2H",
        "D2024-01-15 - D2024-01-01",
        "P1D * 3",
        "-P1D",
        "TODAY + P1D",
        "SOW",
        "EOQ",
        "NOW",
        "length(_)",
        "guard _ > 0 in _",
        "check it > 0 in _ * 2",
        "_ / 2",
        "_.a % _.b",
        "_.x + 1",
        "_.x > 0",
        "_.a == _.b",
        "_ != null",
        "-_",
        "abs(_) + first(_)",
        "Int!(_) | 42",
        "(guard _ > 0 in _) | 42",
    ];

    fn each_compiled(kind: TargetKind) -> Vec<Compiled> {
        PROGRAMS
            .iter()
            .map(|src| compile(src, kind, &CompileOptions::default()).unwrap())
            .collect()
    }

    #[test]
    fn required_helpers_are_catalogued() {
        for (kind, catalogue) in [
            (TargetKind::Ruby, &*RUBY),
            (TargetKind::JavaScript, &*JAVASCRIPT),
            (TargetKind::Sql, &*SQL),
        ] {
            for compiled in each_compiled(kind) {
                for helper in &compiled.helpers {
                    assert!(catalogue.contains(helper), "{kind:?}: `{helper}` not catalogued");
                }
            }
        }
    }
}
