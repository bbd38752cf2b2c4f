//! Target bindings and the emitter shapes they share.
//!
//! Most standard-library entries are one of a handful of shapes (infix
//! operator, prefix operator, function call, method call); the structs below
//! cover those so each binding's table stays declarative. Anything irregular
//! is a closure registered through `Registry::define`.
use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::emit::{CallSite, EmitContext, Fragment, Side};
use crate::error::CompileResult;
use crate::ir::Literal;
use crate::registry::Emitter;
use crate::types::TypeTag;

pub mod javascript;
pub mod ruby;
pub mod sql;

/// Signature of zero-argument calls (period constants).
pub const NULLARY: [TypeTag; 0] = [];

/// Precedence key of member access and method calls; every table has it.
pub const MEMBER: &str = ".";

/// `lhs op rhs`, the operator text doubling as precedence key.
pub struct Infix(pub &'static str);

impl Emitter for Infix {
    fn emit(&self, call: &CallSite<'_>, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        let lhs = cx.emit_with_parens(call.arg(0), self.0, Side::Left)?;
        let rhs = cx.emit_with_parens(call.arg(1), self.0, Side::Right)?;
        Ok(Fragment::op(format!("{lhs} {} {rhs}", self.0), self.0))
    }
}

/// `text operand`. `key` names the operator in the precedence table since
/// prefix minus and infix minus bind differently.
pub struct Prefix {
    pub key: &'static str,
    pub text: &'static str,
}

impl Emitter for Prefix {
    fn emit(&self, call: &CallSite<'_>, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        let operand = cx.emit_with_parens(call.arg(0), self.key, Side::Right)?;
        Ok(Fragment::op(format!("{}{operand}", self.text), self.key))
    }
}

/// `name(args...)`
pub struct Function(pub &'static str);

impl Emitter for Function {
    fn emit(&self, call: &CallSite<'_>, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        Ok(Fragment::atom(format!("{}({})", self.0, cx.emit_list(call.args)?)))
    }
}

/// A runtime prelude function: declared as required, then called.
pub struct Helper(pub String);

impl Emitter for Helper {
    fn emit(&self, call: &CallSite<'_>, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        cx.require_helper(&self.0);
        Ok(Fragment::atom(format!("{}({})", self.0, cx.emit_list(call.args)?)))
    }
}

/// `receiver.method(rest...)`, the receiver being the first argument.
pub struct Method(pub &'static str);

impl Emitter for Method {
    fn emit(&self, call: &CallSite<'_>, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        let recv = receiver(call, cx)?;
        let rest = cx.emit_list(&call.args[1..])?;
        Ok(Fragment::atom(format!("{recv}{}({rest})", self.0)))
    }
}

/// `receiver` followed by fixed text: `.strip`, `.length`, `[0]`.
pub struct Postfix(pub &'static str);

impl Emitter for Postfix {
    fn emit(&self, call: &CallSite<'_>, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        Ok(Fragment::atom(format!("{}{}", receiver(call, cx)?, self.0)))
    }
}

/// The first argument, unchanged.
pub struct Identity;

impl Emitter for Identity {
    fn emit(&self, call: &CallSite<'_>, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        cx.fragment(call.arg(0))
    }
}

/// Fixed text, arguments ignored.
pub struct Constant(pub &'static str);

impl Emitter for Constant {
    fn emit(&self, _: &CallSite<'_>, _: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        Ok(Fragment::atom(self.0))
    }
}

/// First argument rendered as the receiver of a member access.
pub fn receiver(call: &CallSite<'_>, cx: &mut EmitContext<'_>) -> CompileResult<String> {
    cx.emit_with_parens(call.arg(0), MEMBER, Side::Left)
}

static WHOLE_DAYS_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^P(\d+)([DW])$").unwrap());

/// Day count of a duration literal made only of days or weeks (`P3D`, `P2W`).
pub fn whole_days(lit: Option<&Literal>) -> Option<i64> {
    let Some(Literal::Duration(iso)) = lit else { return None };
    let caps = WHOLE_DAYS_RX.captures(iso)?;
    let n = caps[1].parse::<i64>().ok()?;
    if &caps[2] == "W" { n.checked_mul(7) } else { Some(n) }
}

static ZONED_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(Z|[+-]\d{2}(:?\d{2})?)$").unwrap());

/// Datetime literal text with an explicit offset; none means UTC.
pub fn utc_datetime(iso: &str) -> Cow<'_, str> {
    if ZONED_RX.is_match(iso) { Cow::Borrowed(iso) } else { Cow::Owned(format!("{iso}Z")) }
}

/// Shortest float text that reads back as the same value, always with a
/// fractional part or exponent.
pub fn float_text(v: f64) -> String {
    format!("{v:?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_days_only_for_day_and_week_literals() {
        let d = |s: &str| Literal::Duration(s.to_string());
        assert_eq!(whole_days(Some(&d("P1D"))), Some(1));
        assert_eq!(whole_days(Some(&d("P2W"))), Some(14));
        assert_eq!(whole_days(Some(&d("P1DT2H"))), None);
        assert_eq!(whole_days(Some(&d("PT24H"))), None);
        assert_eq!(whole_days(Some(&Literal::Int(1))), None);
        assert_eq!(whole_days(None), None);
    }

    #[test]
    fn huge_week_counts_are_not_day_counts() {
        let d = |s: &str| Literal::Duration(s.to_string());
        assert_eq!(whole_days(Some(&d("P2000000000000000000W"))), None);
        assert_eq!(whole_days(Some(&d("P99999999999999999999D"))), None);
    }

    #[test]
    fn offsetless_datetimes_read_as_utc() {
        assert_eq!(utc_datetime("2024-01-15T10:30:00"), "2024-01-15T10:30:00Z");
        assert_eq!(utc_datetime("2024-01-15T10:30"), "2024-01-15T10:30Z");
        assert_eq!(utc_datetime("2024-01-15T10:30:00.5"), "2024-01-15T10:30:00.5Z");
        assert_eq!(utc_datetime("2024-01-15T10:30:00Z"), "2024-01-15T10:30:00Z");
        assert_eq!(utc_datetime("2024-01-15T10:30:00+02:00"), "2024-01-15T10:30:00+02:00");
        assert_eq!(utc_datetime("2024-01-15T10:30:00-0500"), "2024-01-15T10:30:00-0500");
    }

    #[test]
    fn floats_keep_a_fraction() {
        assert_eq!(float_text(1.0), "1.0");
        assert_eq!(float_text(0.25), "0.25");
    }
}
