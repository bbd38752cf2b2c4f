//! PostgreSQL binding.
//!
//! SQL has no expression-level functions: `let` bindings are substituted
//! into their body, lambdas are rejected, and higher-order library calls
//! have no entry so they fail dispatch. Failures go through `elo_fail`,
//! which raises an ordinary exception scoped to the running statement.
//!
//! Values of unknown static type (the input `_`, fields of untyped records,
//! results of untyped helpers) are `jsonb`. Typed operands meeting one are
//! converted with `to_jsonb` and the operation goes to an `elo_*` helper;
//! library functions read untyped arguments back as the column type they
//! need.
use once_cell::sync::Lazy;

use super::{float_text, utc_datetime, whole_days, Constant, Function, Identity, Infix, Prefix, NULLARY};
use crate::emit::{Assoc, CallSite, EmitContext, Fragment, PrecedenceTable, Side, Target};
use crate::error::{CompileError, CompileResult};
use crate::ir::{Ir, IrKind, Literal};
use crate::prelude::snake;
use crate::registry::{Emitter, Registry};
use crate::transform::may_raise;
use crate::types::{Type, TypeTag as T, SELECTABLE};

pub struct Sql;

static PRECEDENCE: Lazy<PrecedenceTable> = Lazy::new(|| {
    PrecedenceTable::new(&[
        (".", 20, Assoc::Left),
        ("u-", 16, Assoc::None),
        ("^", 15, Assoc::Left),
        ("*", 14, Assoc::Left),
        ("/", 14, Assoc::Left),
        ("%", 14, Assoc::Left),
        ("+", 13, Assoc::Left),
        ("-", 13, Assoc::Left),
        ("||", 12, Assoc::Left),
        ("->", 12, Assoc::Left),
        ("->>", 12, Assoc::Left),
        ("#>>", 12, Assoc::Left),
        ("<", 10, Assoc::None),
        ("<=", 10, Assoc::None),
        (">", 10, Assoc::None),
        (">=", 10, Assoc::None),
        ("=", 10, Assoc::None),
        ("<>", 10, Assoc::None),
        ("IS", 9, Assoc::None),
        ("IS NOT DISTINCT FROM", 9, Assoc::None),
        ("IS DISTINCT FROM", 9, Assoc::None),
        ("NOT", 8, Assoc::None),
        ("AND", 6, Assoc::Left),
        ("OR", 5, Assoc::Left),
    ])
});

static REGISTRY: Lazy<Registry> = Lazy::new(build_registry);

const RESERVED: &[&str] = &[
    "all", "and", "any", "array", "as", "case", "cast", "check", "date", "else", "end", "false",
    "from", "in", "interval", "is", "not", "null", "or", "select", "table", "then", "time",
    "timestamp", "true", "user", "when", "where",
];

/// Column type of a statically known Elo type.
pub fn sql_type(ty: &Type) -> Option<&'static str> {
    match ty {
        Type::Int => Some("BIGINT"),
        Type::Float => Some("DOUBLE PRECISION"),
        Type::Bool => Some("BOOLEAN"),
        Type::String => Some("TEXT"),
        Type::Date => Some("DATE"),
        Type::DateTime => Some("TIMESTAMPTZ"),
        Type::Duration => Some("INTERVAL"),
        Type::Record(_) => Some("JSONB"),
        _ => None,
    }
}

/// `node` as a `jsonb` value.
fn jsonb(node: &Ir, cx: &mut EmitContext<'_>) -> CompileResult<String> {
    match (&node.ty, node.as_literal()) {
        (Type::Any | Type::Record(_), _) => cx.emit(node),
        (Type::Null, _) => Ok("CAST(NULL AS JSONB)".to_string()),
        // a bare string literal has no type `to_jsonb` could resolve
        (_, Some(Literal::String(_))) => Ok(format!("to_jsonb(CAST({} AS TEXT))", cx.emit(node)?)),
        _ => Ok(format!("to_jsonb({})", cx.emit(node)?)),
    }
}

/// `node` read as column type `ty`. Only untyped (`jsonb`) values change.
fn coerce(node: &Ir, cx: &mut EmitContext<'_>, ty: &str) -> CompileResult<Fragment> {
    let frag = cx.fragment(node)?;
    if node.ty != Type::Any {
        return Ok(frag);
    }
    let code = match ty {
        "BIGINT" | "NUMERIC" | "DOUBLE PRECISION" | "BOOLEAN" => format!("CAST({} AS {ty})", frag.code),
        "TEXT" => format!("({} #>> '{{}}')", cx.wrap(frag, "#>>", Side::Left)),
        _ => format!("CAST({} #>> '{{}}' AS {ty})", cx.wrap(frag, "#>>", Side::Left)),
    };
    Ok(Fragment::atom(code))
}

/// `elo_<name>(..)` over `jsonb` arguments.
fn untyped(call: &CallSite<'_>, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
    let helper = snake(call.name);
    cx.require_helper(&helper);
    let args = call.args.iter().map(|a| jsonb(a, cx)).collect::<CompileResult<Vec<_>>>()?;
    Ok(Fragment::atom(format!("{helper}({})", args.join(", "))))
}

/// Native operator on typed operands. `jsonb` has no arithmetic and no
/// ordering, so a call with an untyped operand goes to the prelude instead.
struct Operator(&'static str);

impl Emitter for Operator {
    fn emit(&self, call: &CallSite<'_>, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        if call.arg_types.contains(&Type::Any) {
            return untyped(call, cx);
        }
        Infix(self.0).emit(call, cx)
    }
}

/// `FUNCTION(args)` with untyped arguments read as `ty`.
struct Coerced {
    function: &'static str,
    ty: &'static str,
}

impl Emitter for Coerced {
    fn emit(&self, call: &CallSite<'_>, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        let args = call
            .args
            .iter()
            .map(|a| Ok(coerce(a, cx, self.ty)?.code))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(Fragment::atom(format!("{}({})", self.function, args.join(", "))))
    }
}

/// `CAST(x AS type)`
struct Cast(&'static str);

impl Emitter for Cast {
    fn emit(&self, call: &CallSite<'_>, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        Ok(Fragment::atom(format!("CAST({} AS {})", cx.emit(call.arg(0))?, self.0)))
    }
}

/// Integer result of a numeric function: `CAST(ROUND(x) AS BIGINT)`.
struct IntegerOf(&'static str);

impl Emitter for IntegerOf {
    fn emit(&self, call: &CallSite<'_>, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        let value = coerce(call.arg(0), cx, "NUMERIC")?;
        Ok(Fragment::atom(format!("CAST({}({}) AS BIGINT)", self.0, value.code)))
    }
}

/// `CAST(EXTRACT(YEAR FROM x) AS BIGINT)`. Datetimes are read in UTC, not
/// the session time zone.
struct Extract(&'static str);

impl Emitter for Extract {
    fn emit(&self, call: &CallSite<'_>, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        let value = coerce(call.arg(0), cx, "TIMESTAMP")?;
        let value = match call.arg_types[0] {
            Type::DateTime => format!("{} AT TIME ZONE 'UTC'", cx.wrap(value, "AT", Side::Left)),
            _ => value.code,
        };
        Ok(Fragment::atom(format!("CAST(EXTRACT({} FROM {value}) AS BIGINT)", self.0)))
    }
}

fn build_registry() -> Registry {
    let mut reg = Registry::new();
    let any2 = [T::Any, T::Any];

    // ---- operators ---- //
    for (name, op) in [
        ("add", "+"),
        ("sub", "-"),
        ("mul", "*"),
        ("div", "/"),
        ("mod", "%"),
        ("pow", "^"),
        ("lt", "<"),
        ("lte", "<="),
        ("gt", ">"),
        ("gte", ">="),
        // `=` is NULL as soon as either side is
        ("eq", "IS NOT DISTINCT FROM"),
        ("neq", "IS DISTINCT FROM"),
    ] {
        reg.register(name, any2, Operator(op));
    }
    for (name, op) in [("add", "+"), ("sub", "-"), ("mul", "*")] {
        reg.define(name, [T::Int, T::Int], move |call, cx| bigint_arith(call, cx, op));
    }
    reg.register("add", [T::String, T::String], Infix("||"));
    reg.register("add", [T::Array, T::Array], Infix("||"));
    // `^` is double precision even on integers
    reg.define("pow", [T::Int, T::Int], |call, cx| {
        let power = Infix("^").emit(call, cx)?;
        Ok(Fragment::atom(format!("CAST({} AS BIGINT)", power.code)))
    });
    reg.define("neg", [T::Any], |call, cx| match call.arg_types[0] {
        Type::Any => untyped(call, cx),
        _ => Prefix { key: "u-", text: "-" }.emit(call, cx),
    });
    reg.register("pos", [T::Any], Identity);

    for (name, op) in [("and", "AND"), ("or", "OR")] {
        reg.define(name, any2, move |call, cx| {
            let lhs = coerce(call.arg(0), cx, "BOOLEAN")?;
            let rhs = coerce(call.arg(1), cx, "BOOLEAN")?;
            let lhs = cx.wrap(lhs, op, Side::Left);
            let rhs = cx.wrap(rhs, op, Side::Right);
            Ok(Fragment::op(format!("{lhs} {op} {rhs}"), op))
        });
    }
    reg.define("not", [T::Any], |call, cx| {
        let operand = coerce(call.arg(0), cx, "BOOLEAN")?;
        Ok(Fragment::op(format!("NOT {}", cx.wrap(operand, "NOT", Side::Right)), "NOT"))
    });

    reg.define("eq", [T::Any, T::Null], |call, cx| null_test(call, cx, 0, "IS NULL"));
    reg.define("eq", [T::Null, T::Any], |call, cx| null_test(call, cx, 1, "IS NULL"));
    reg.define("neq", [T::Any, T::Null], |call, cx| null_test(call, cx, 0, "IS NOT NULL"));
    reg.define("neq", [T::Null, T::Any], |call, cx| null_test(call, cx, 1, "IS NOT NULL"));

    // date + interval is a timestamp; keep dates dates
    reg.define("add", [T::Date, T::Duration], |call, cx| date_shift(call, cx, 0, 1, "+"));
    reg.define("add", [T::Duration, T::Date], |call, cx| date_shift(call, cx, 1, 0, "+"));
    reg.define("sub", [T::Date, T::Duration], |call, cx| date_shift(call, cx, 0, 1, "-"));
    reg.define("sub", [T::Date, T::Date], |call, cx| {
        let days = Infix("-").emit(call, cx)?;
        Ok(Fragment::atom(format!("make_interval(days => {})", days.code)))
    });

    // ---- selectors ---- //
    for (_, stem, tag) in SELECTABLE {
        let as_ = format!("as_{stem}");
        let or_null = format!("as_{stem}_or_null");
        let is = format!("is_{stem}");
        let assert = format!("assert_{stem}");
        reg.register(&as_, [*tag], Identity);
        reg.register(&or_null, [*tag], Identity);
        reg.register(&is, [*tag], Constant("TRUE"));
        reg.register(&assert, [*tag, T::Any], Identity);
        for f in [&as_, &or_null, &is] {
            reg.define(f, [T::Any], untyped);
        }
        reg.define(&assert, any2, |call, cx| {
            let helper = snake(call.name);
            cx.require_helper(&helper);
            let value = jsonb(call.arg(0), cx)?;
            let message = coerce(call.arg(1), cx, "TEXT")?;
            Ok(Fragment::atom(format!("{helper}({value}, {})", message.code)))
        });
    }
    for (function, from, to) in [
        ("as_int", T::String, "BIGINT"),
        ("as_float", T::String, "DOUBLE PRECISION"),
        ("as_float", T::Int, "DOUBLE PRECISION"),
        ("as_float_or_null", T::Int, "DOUBLE PRECISION"),
        ("as_bool", T::String, "BOOLEAN"),
        ("as_date", T::String, "DATE"),
        ("as_datetime", T::String, "TIMESTAMPTZ"),
        ("as_duration", T::String, "INTERVAL"),
        ("as_string", T::Int, "TEXT"),
        ("as_string", T::Float, "TEXT"),
        ("as_string", T::Bool, "TEXT"),
        ("as_string", T::Date, "TEXT"),
        ("as_string", T::DateTime, "TEXT"),
    ] {
        reg.register(function, [from], Cast(to));
    }
    reg.register("is_float", [T::Int], Constant("TRUE"));

    // ---- periods ---- //
    reg.register("today", NULLARY, Constant("CURRENT_DATE"));
    reg.register("now", NULLARY, Constant("CURRENT_TIMESTAMP"));
    reg.define("tomorrow", NULLARY, |_, _| Ok(Fragment::op("CURRENT_DATE + 1", "+")));
    reg.define("yesterday", NULLARY, |_, _| Ok(Fragment::op("CURRENT_DATE - 1", "-")));
    reg.register("start_of_day", NULLARY, Constant("date_trunc('day', CURRENT_TIMESTAMP)"));
    reg.define("end_of_day", NULLARY, |_, _| {
        Ok(Fragment::op(
            "date_trunc('day', CURRENT_TIMESTAMP) + INTERVAL '1 day' - INTERVAL '1 microsecond'",
            "-",
        ))
    });
    for (unit, span) in [("week", "1 week"), ("month", "1 month"), ("quarter", "3 months"), ("year", "1 year")] {
        let start = format!("start_of_{unit}");
        let end = format!("end_of_{unit}");
        reg.define(&start, NULLARY, move |_, _| {
            Ok(Fragment::atom(format!("CAST(date_trunc('{unit}', CURRENT_DATE) AS DATE)")))
        });
        reg.define(&end, NULLARY, move |_, _| {
            Ok(Fragment::atom(format!(
                "CAST(date_trunc('{unit}', CURRENT_DATE) + INTERVAL '{span}' - INTERVAL '1 day' AS DATE)"
            )))
        });
    }

    // ---- library ---- //
    for (name, function) in [("trim", "TRIM"), ("upper", "UPPER"), ("lower", "LOWER")] {
        reg.register(name, [T::Any], Coerced { function, ty: "TEXT" });
    }
    reg.register("starts_with", any2, Coerced { function: "starts_with", ty: "TEXT" });
    for t in [T::Int, T::Float] {
        reg.register("abs", [t], Function("ABS"));
    }
    for name in ["abs", "length", "first", "last"] {
        reg.define(name, [T::Any], untyped);
    }
    for name in ["join", "contains"] {
        reg.define(name, any2, untyped);
    }
    reg.register("length", [T::String], Function("LENGTH"));
    reg.register("length", [T::Array], Function("cardinality"));
    for (name, function) in [("round", "ROUND"), ("floor", "FLOOR"), ("ceil", "CEIL")] {
        reg.register(name, [T::Any], IntegerOf(function));
    }
    for (name, field) in [("year", "YEAR"), ("month", "MONTH"), ("day", "DAY")] {
        reg.register(name, [T::Any], Extract(field));
    }
    reg.define("ends_with", any2, |call, cx| {
        let s = coerce(call.arg(0), cx, "TEXT")?.code;
        let suffix = coerce(call.arg(1), cx, "TEXT")?.code;
        Ok(Fragment::op(format!("RIGHT({s}, LENGTH({suffix})) = {suffix}"), "="))
    });
    reg.define("contains", [T::String, T::Any], |call, cx| {
        let s = cx.emit(call.arg(0))?;
        let part = coerce(call.arg(1), cx, "TEXT")?.code;
        Ok(Fragment::op(format!("POSITION({part} IN {s}) > 0"), ">"))
    });
    reg.define("contains", [T::Array, T::Any], |call, cx| {
        let item = cx.emit_with_parens(call.arg(1), "=", Side::Left)?;
        let items = cx.emit(call.arg(0))?;
        Ok(Fragment::op(format!("{item} = ANY({items})"), "="))
    });
    reg.define("join", [T::Array, T::Any], |call, cx| {
        let items = cx.emit(call.arg(0))?;
        let separator = coerce(call.arg(1), cx, "TEXT")?.code;
        Ok(Fragment::atom(format!("array_to_string({items}, {separator})")))
    });
    reg.define("first", [T::Array], |call, cx| Ok(Fragment::atom(format!("({})[1]", cx.emit(call.arg(0))?))));
    reg.define("last", [T::Array], |call, cx| {
        let items = cx.emit(call.arg(0))?;
        Ok(Fragment::atom(format!("({items})[cardinality({items})]")))
    });

    // ---- structure ---- //
    reg.define_variadic("array", 0, |call, cx| Ok(Fragment::atom(format!("ARRAY[{}]", cx.emit_list(call.args)?))));
    reg.define_variadic("record", 0, |call, cx| Function("jsonb_build_object").emit(call, cx));
    reg.define("field", any2, |call, cx| {
        let object = cx.emit_with_parens(call.arg(0), "->", Side::Left)?;
        let key = cx.emit(call.arg(1))?;
        let code = match sql_type(call.result) {
            None | Some("JSONB") => format!("({object} -> {key})"),
            Some("TEXT") => format!("({object} ->> {key})"),
            Some(ty) => format!("CAST({object} ->> {key} AS {ty})"),
        };
        Ok(Fragment::atom(code))
    });
    reg.define("fail", [T::Any], |call, cx| {
        let message = coerce(call.arg(0), cx, "TEXT")?.code;
        Ok(Fragment::atom(fail(call.result, &message, cx)))
    });

    reg
}

/// `elo_fail` call typed as the value it stands in for, so `CASE` and
/// `COALESCE` branches still agree. Untyped, it is `jsonb` like any other
/// value of unknown type.
fn fail(ty: &Type, message: &str, cx: &mut EmitContext<'_>) -> String {
    let helper = snake("fail");
    cx.require_helper(&helper);
    match sql_type(ty) {
        Some(t) => format!("{helper}(CAST(NULL AS {t}), {message})"),
        None => format!("{helper}({message})"),
    }
}

/// `x IS NULL` on typed values. An untyped value may hold a JSON `null`,
/// which SQL `IS NULL` does not see, so that side goes to the prelude.
fn null_test(call: &CallSite<'_>, cx: &mut EmitContext<'_>, side: usize, test: &str) -> CompileResult<Fragment> {
    if call.arg_types[side] == Type::Any {
        return untyped(call, cx);
    }
    let value = cx.emit_with_parens(call.arg(side), "IS", Side::Left)?;
    Ok(Fragment::op(format!("{value} {test}"), "IS"))
}

/// Integer arithmetic in `BIGINT`. Small literals and `LENGTH` are 32-bit
/// `INTEGER`, which overflows long before Elo integers do.
fn bigint_arith(call: &CallSite<'_>, cx: &mut EmitContext<'_>, op: &'static str) -> CompileResult<Fragment> {
    let lhs = if is_int4(call.arg(0)) && is_int4(call.arg(1)) {
        format!("CAST({} AS BIGINT)", cx.emit(call.arg(0))?)
    } else {
        cx.emit_with_parens(call.arg(0), op, Side::Left)?
    };
    let rhs = cx.emit_with_parens(call.arg(1), op, Side::Right)?;
    Ok(Fragment::op(format!("{lhs} {op} {rhs}"), op))
}

/// Whether PostgreSQL types `node` as 32-bit `INTEGER`.
fn is_int4(node: &Ir) -> bool {
    match &node.kind {
        IrKind::Literal(Literal::Int(v)) => i32::try_from(*v).is_ok(),
        IrKind::Call { name, args, .. } => match name.as_str() {
            "neg" | "pos" => args.iter().all(is_int4),
            "length" => true,
            _ => false,
        },
        _ => false,
    }
}

/// Date shifted by a duration: whole-day literals become day counts,
/// anything else is cast back from timestamp.
fn date_shift(
    call: &CallSite<'_>,
    cx: &mut EmitContext<'_>,
    date: usize,
    duration: usize,
    op: &'static str,
) -> CompileResult<Fragment> {
    let lhs = cx.emit_with_parens(call.arg(date), op, Side::Left)?;
    if let Some(days) = whole_days(call.arg(duration).as_literal()) {
        return Ok(Fragment::op(format!("{lhs} {op} {days}"), op));
    }
    let rhs = cx.emit_with_parens(call.arg(duration), op, Side::Right)?;
    Ok(Fragment::atom(format!("CAST({lhs} {op} {rhs} AS DATE)")))
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn identifier(name: &str) -> String {
    let plain = name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if plain && !RESERVED.contains(&name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Branch of a `CASE` or `COALESCE` whose result type is `ty`; branches of
/// an untyped result are all `jsonb`.
fn branch(node: &Ir, ty: &Type, cx: &mut EmitContext<'_>) -> CompileResult<String> {
    match ty {
        Type::Any => jsonb(node, cx),
        _ => cx.emit(node),
    }
}

impl Target for Sql {
    fn name(&self) -> &'static str {
        "sql"
    }

    fn registry(&self) -> &'static Registry {
        &REGISTRY
    }

    fn precedence(&self) -> &'static PrecedenceTable {
        &PRECEDENCE
    }

    fn literal(&self, lit: &Literal, _: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        Ok(Fragment::atom(match lit {
            Literal::Int(v) => v.to_string(),
            // read by PostgreSQL as exact NUMERIC
            Literal::Float(v) => float_text(v.0),
            Literal::Bool(true) => "TRUE".to_string(),
            Literal::Bool(false) => "FALSE".to_string(),
            Literal::String(s) => quote(s),
            Literal::Date(s) => format!("DATE {}", quote(s)),
            Literal::DateTime(s) => format!("TIMESTAMPTZ {}", quote(&utc_datetime(s))),
            Literal::Duration(s) => format!("INTERVAL {}", quote(s)),
            Literal::Null => "NULL".to_string(),
        }))
    }

    fn variable(&self, name: &str) -> Fragment {
        Fragment::atom(identifier(name))
    }

    fn let_in(&self, bindings: &[(String, Ir)], body: &Ir, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        let depth = cx.scope_depth();
        for (name, value) in bindings {
            let frag = match cx.fragment(value) {
                Ok(frag) => frag,
                Err(e) => {
                    cx.unbind_to(depth);
                    return Err(e);
                }
            };
            // substituted names are wide integers, like every other `BIGINT`
            let frag = if is_int4(value) {
                Fragment::atom(format!("CAST({} AS BIGINT)", frag.code))
            } else if frag.op.is_some() {
                Fragment::atom(format!("({})", frag.code))
            } else {
                frag
            };
            cx.bind(name, frag);
        }
        let body = cx.fragment(body);
        cx.unbind_to(depth);
        body
    }

    fn lambda(&self, _: &[String], _: &Ir, _: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        Err(CompileError::Unsupported { target: "sql", construct: "lambda" })
    }

    fn conditional(
        &self,
        cond: &Ir,
        then: &Ir,
        else_: &Ir,
        ty: &Type,
        cx: &mut EmitContext<'_>,
    ) -> CompileResult<Fragment> {
        let cond = coerce(cond, cx, "BOOLEAN")?.code;
        let then = branch(then, ty, cx)?;
        let else_ = branch(else_, ty, cx)?;
        Ok(Fragment::atom(format!("CASE WHEN {cond} THEN {then} ELSE {else_} END")))
    }

    /// `COALESCE` moves on at a NULL but cannot catch an exception, so every
    /// candidate but the last must yield NULL rather than raise.
    fn alternative(&self, candidates: &[Ir], ty: &Type, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        if let Some((_, rest)) = candidates.split_last() {
            if rest.iter().any(may_raise) {
                let construct = "a candidate raising before the last alternative";
                return Err(CompileError::Unsupported { target: "sql", construct });
            }
        }
        let mut parts = candidates.iter().map(|c| branch(c, ty, cx)).collect::<CompileResult<Vec<_>>>()?;
        parts.push(fail(ty, &quote("no alternative matched"), cx));
        Ok(Fragment::atom(format!("COALESCE({})", parts.join(", "))))
    }

    fn executable(&self, code: &str) -> String {
        format!("SELECT {code} AS result")
    }
}

#[cfg(test)]
mod tests {
    use crate::emit::{CompileOptions, OutputForm};
    use crate::error::CompileError;
    use crate::{compile, Compiled, TargetKind};

    fn sql_full(src: &str) -> Compiled {
        compile(src, TargetKind::Sql, &CompileOptions::default()).unwrap()
    }

    fn sql(src: &str) -> String {
        sql_full(src).code
    }

    fn sql_err(src: &str) -> CompileError {
        compile(src, TargetKind::Sql, &CompileOptions::default()).unwrap_err()
    }

    #[test]
    fn operators() {
        assert_eq!(sql("(1.5 + 2) * 3"), "(1.5 + 2) * 3");
        assert_eq!(sql("'a' + 'b'"), "'a' || 'b'");
        assert_eq!(sql("2 ^ 3"), "CAST(2 ^ 3 AS BIGINT)");
        assert_eq!(sql("-(-2)"), "-(-2)");
        assert_eq!(sql("not (1 == 2)"), "NOT 1 IS NOT DISTINCT FROM 2");
        assert_eq!(sql("1 < 2 and true"), "1 < 2 AND TRUE");
        assert_eq!(sql("1 != 2"), "1 IS DISTINCT FROM 2");
        assert_eq!(sql("1 == null"), "1 IS NULL");
    }

    #[test]
    fn integer_arithmetic_is_bigint() {
        assert_eq!(sql("2000000000 + 2000000000"), "CAST(2000000000 AS BIGINT) + 2000000000");
        assert_eq!(sql("2 + 3 * 4"), "2 + CAST(3 AS BIGINT) * 4");
        assert_eq!(sql("(1 + 2) * 3"), "(CAST(1 AS BIGINT) + 2) * 3");
        assert_eq!(sql("1 - -2"), "CAST(1 AS BIGINT) - -2");
        assert_eq!(sql("5000000000 * 2"), "5000000000 * 2");
        assert_eq!(sql("length('ab') * 3"), "CAST(LENGTH('ab') AS BIGINT) * 3");
        assert_eq!(sql("7 / 2"), "7 / 2");
    }

    #[test]
    fn untyped_values_are_jsonb() {
        let out = sql_full("_.x + 1");
        assert_eq!(out.code, "elo_add((_ -> 'x'), to_jsonb(1))");
        assert_eq!(out.helpers.iter().cloned().collect::<Vec<_>>(), ["elo_add"]);
        assert_eq!(sql("_.x > 0"), "elo_gt((_ -> 'x'), to_jsonb(0))");
        assert_eq!(sql("_ + 'a'"), "elo_add(_, to_jsonb(CAST('a' AS TEXT)))");
        assert_eq!(sql("-_"), "elo_neg(_)");
        assert_eq!(sql("_.ok and true"), "CAST((_ -> 'ok') AS BOOLEAN) AND TRUE");
        assert_eq!(sql("not _"), "NOT CAST(_ AS BOOLEAN)");
        assert_eq!(sql("upper(_.name)"), "UPPER(((_ -> 'name') #>> '{}'))");
        assert_eq!(sql("round(_)"), "CAST(ROUND(CAST(_ AS NUMERIC)) AS BIGINT)");
        assert_eq!(sql("year(_)"), "CAST(EXTRACT(YEAR FROM CAST(_ #>> '{}' AS TIMESTAMP)) AS BIGINT)");
        assert_eq!(sql("length(_)"), "elo_length(_)");
    }

    #[test]
    fn equality_is_null_safe() {
        assert_eq!(sql("_.a == _.b"), "elo_eq((_ -> 'a'), (_ -> 'b'))");
        assert_eq!(sql("_ != 1"), "elo_neq(_, to_jsonb(1))");
        assert_eq!(sql("_ == null"), "elo_eq(_, CAST(NULL AS JSONB))");
        assert_eq!(sql("null != _"), "elo_neq(CAST(NULL AS JSONB), _)");
        assert_eq!(sql("'a' == 'b'"), "'a' IS NOT DISTINCT FROM 'b'");
        assert_eq!(sql("null == null"), "NULL IS NULL");
    }

    #[test]
    fn dates_stay_dates() {
        assert_eq!(sql("D2024-01-15 + P1D"), "DATE '2024-01-15' + 1");
        assert_eq!(sql("P1W + D2024-01-15"), "DATE '2024-01-15' + 7");
        assert_eq!(sql("D2024-01-15 + PT2H"), "CAST(DATE '2024-01-15' + INTERVAL 'PT2H' AS DATE)");
        assert_eq!(sql("D2024-01-15T10:30:00Z + PT2H"), "TIMESTAMPTZ '2024-01-15T10:30:00Z' + INTERVAL 'PT2H'");
        assert_eq!(sql("D2024-01-15 - D2024-01-01"), "make_interval(days => DATE '2024-01-15' - DATE '2024-01-01')");
        assert_eq!(
            sql("year(D2024-01-15T23:30:00Z)"),
            "CAST(EXTRACT(YEAR FROM TIMESTAMPTZ '2024-01-15T23:30:00Z' AT TIME ZONE 'UTC') AS BIGINT)"
        );
    }

    #[test]
    fn datetimes_without_offset_are_utc() {
        assert_eq!(sql("D2024-01-15T10:30"), "TIMESTAMPTZ '2024-01-15T10:30Z'");
        assert_eq!(sql("D2024-01-15T10:30:00-05:00"), "TIMESTAMPTZ '2024-01-15T10:30:00-05:00'");
    }

    #[test]
    fn let_is_inlined() {
        assert_eq!(sql("let x = 2 in x * x"), "CAST(2 AS BIGINT) * CAST(2 AS BIGINT)");
        assert_eq!(sql("let x = 1.5 + 2 in x * x"), "(1.5 + 2) * (1.5 + 2)");
        assert_eq!(sql("let x = 'a' in x + x"), "'a' || 'a'");
    }

    #[test]
    fn pipes_nest_calls() {
        assert_eq!(sql("'  hi  ' |> trim |> upper"), "UPPER(TRIM('  hi  '))");
        assert_eq!(sql("[1, 2] |> length"), "cardinality(ARRAY[1, 2])");
        assert_eq!(sql("['a', 'b'] |> join(', ')"), "array_to_string(ARRAY['a', 'b'], ', ')");
    }

    #[test]
    fn guards_fail_through_the_prelude() {
        let out = sql_full("guard positive: _ > 0 in 1");
        assert_eq!(
            out.code,
            "CASE WHEN elo_gt(_, to_jsonb(0)) THEN 1 ELSE elo_fail(CAST(NULL AS BIGINT), 'positive') END"
        );
        assert_eq!(out.helpers.iter().cloned().collect::<Vec<_>>(), ["elo_fail", "elo_gt"]);
        assert_eq!(
            sql("guard _ > 0 in _"),
            "CASE WHEN elo_gt(_, to_jsonb(0)) THEN _ ELSE elo_fail('guard failed') END"
        );
        assert_eq!(
            sql("if true then 1 else 'a'"),
            "CASE WHEN TRUE THEN to_jsonb(1) ELSE to_jsonb(CAST('a' AS TEXT)) END"
        );
    }

    #[test]
    fn alternatives_coalesce() {
        assert_eq!(
            sql("Int??('12') | 0"),
            "COALESCE(elo_as_int_or_null(to_jsonb(CAST('12' AS TEXT))), 0, \
             elo_fail(CAST(NULL AS BIGINT), 'no alternative matched'))"
        );
        assert_eq!(sql("Int('12')"), "CAST('12' AS BIGINT)");
    }

    #[test]
    fn alternatives_reach_the_fallback() {
        assert_eq!(
            sql("Int!(_) | 42"),
            "COALESCE(elo_as_int_or_null(_), 42, elo_fail(CAST(NULL AS BIGINT), 'no alternative matched'))"
        );
        assert_eq!(
            sql("(guard _ > 0 in _) | 42"),
            "COALESCE(CASE WHEN elo_gt(_, to_jsonb(0)) THEN _ ELSE NULL END, to_jsonb(42), \
             elo_fail('no alternative matched'))"
        );
    }

    #[test]
    fn raising_candidates_are_rejected() {
        let err = sql_err("Int(Float(_)) | 0");
        assert!(matches!(err, CompileError::Unsupported { target: "sql", .. }));
        assert_eq!(
            sql("0 | Int(_)"),
            "COALESCE(0, elo_as_int(_), elo_fail(CAST(NULL AS BIGINT), 'no alternative matched'))"
        );
    }

    #[test]
    fn functions_are_rejected() {
        let err = sql_err("x ~> x");
        assert!(matches!(err, CompileError::Unsupported { target: "sql", .. }));
        let err = sql_err("[1] |> map(x ~> x)");
        assert!(matches!(err, CompileError::Dispatch(ref e) if e.function_name == "map"));
    }

    #[test]
    fn fields_read_json() {
        assert_eq!(sql("_.age"), "(_ -> 'age')");
        assert_eq!(sql("{age: 3}.age"), "CAST(jsonb_build_object('age', 3) ->> 'age' AS BIGINT)");
        assert_eq!(sql("{name: 'x'}.name"), "(jsonb_build_object('name', 'x') ->> 'name')");
    }

    #[test]
    fn periods_and_executable_form() {
        assert_eq!(sql("TODAY"), "CURRENT_DATE");
        assert_eq!(sql("SOM"), "CAST(date_trunc('month', CURRENT_DATE) AS DATE)");
        let opts = CompileOptions { form: OutputForm::Executable };
        assert_eq!(
            compile("1 + 1", TargetKind::Sql, &opts).unwrap().code,
            "SELECT CAST(1 AS BIGINT) + 1 AS result"
        );
    }
}
