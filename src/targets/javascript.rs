//! JavaScript binding.
//!
//! JavaScript has no operator overloading, so only operands of known
//! primitive type use native operators. Temporal values and operands of
//! unknown type go through prelude helpers.
use once_cell::sync::Lazy;

use super::{
    float_text, receiver, utc_datetime, Constant, Function, Helper, Identity, Infix, Method, Postfix, Prefix,
    NULLARY,
};
use crate::emit::{Assoc, CallSite, EmitContext, Fragment, PrecedenceTable, Side, Target};
use crate::error::CompileResult;
use crate::ir::{Ir, Literal};
use crate::prelude::camel;
use crate::registry::{Emitter, Registry};
use crate::transform::PERIODS;
use crate::types::{Type, TypeTag as T, SELECTABLE};

pub struct JavaScript;

static PRECEDENCE: Lazy<PrecedenceTable> = Lazy::new(|| {
    PrecedenceTable::new(&[
        (".", 20, Assoc::Left),
        // unary operators cannot be the base of `**`, so both share a level
        ("**", 15, Assoc::Right),
        ("u-", 15, Assoc::None),
        ("!", 15, Assoc::None),
        ("*", 12, Assoc::Left),
        ("/", 12, Assoc::Left),
        ("%", 12, Assoc::Left),
        ("+", 11, Assoc::Left),
        ("-", 11, Assoc::Left),
        ("<", 9, Assoc::None),
        ("<=", 9, Assoc::None),
        (">", 9, Assoc::None),
        (">=", 9, Assoc::None),
        ("===", 8, Assoc::None),
        ("!==", 8, Assoc::None),
        ("==", 8, Assoc::None),
        ("!=", 8, Assoc::None),
        ("&&", 5, Assoc::Left),
        ("||", 4, Assoc::Left),
        ("?:", 2, Assoc::Right),
        ("=>", 1, Assoc::Right),
    ])
});

static REGISTRY: Lazy<Registry> = Lazy::new(build_registry);

const RESERVED: &[&str] = &[
    "arguments", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "enum", "eval", "export", "extends", "false", "finally",
    "for", "function", "if", "implements", "import", "in", "instanceof", "interface", "let", "new",
    "null", "package", "private", "protected", "public", "return", "static", "super", "switch",
    "this", "throw", "true", "try", "typeof", "undefined", "var", "void", "while", "with", "yield",
];

const NUMERIC: [T; 2] = [T::Int, T::Float];

fn build_registry() -> Registry {
    let mut reg = Registry::new();
    let any2 = [T::Any, T::Any];

    // ---- arithmetic ---- //
    for (name, op) in [("add", "+"), ("sub", "-"), ("mul", "*"), ("div", "/"), ("mod", "%"), ("pow", "**")] {
        for a in NUMERIC {
            for b in NUMERIC {
                reg.register(name, [a, b], Infix(op));
            }
        }
        reg.register(name, any2, Helper(camel(name)));
    }
    reg.register("add", [T::String, T::String], Infix("+"));
    reg.register("add", [T::Array, T::Array], Method(".concat"));
    reg.define("div", [T::Int, T::Int], |call, cx| {
        let quotient = Infix("/").emit(call, cx)?;
        Ok(Fragment::atom(format!("Math.trunc({})", quotient.code)))
    });

    for t in [T::Date, T::DateTime] {
        reg.register("add", [t, T::Duration], Helper(camel("add_duration")));
        reg.define("add", [T::Duration, t], |call, cx| swapped(call, cx, "add_duration"));
        reg.register("sub", [t, T::Duration], Helper(camel("sub_duration")));
        reg.register("sub", [t, t], Helper(camel("date_diff")));
    }
    reg.register("add", [T::Duration, T::Duration], Helper(camel("add_duration")));
    reg.register("sub", [T::Duration, T::Duration], Helper(camel("sub_duration")));
    for n in NUMERIC {
        reg.register("mul", [T::Duration, n], Helper(camel("mul_duration")));
        reg.define("mul", [n, T::Duration], |call, cx| swapped(call, cx, "mul_duration"));
        reg.register("div", [T::Duration, n], Helper(camel("div_duration")));
    }

    reg.register("neg", [T::Int], Prefix { key: "u-", text: "-" });
    reg.register("neg", [T::Float], Prefix { key: "u-", text: "-" });
    reg.register("neg", [T::Any], Helper(camel("neg")));
    reg.register("pos", [T::Any], Identity);

    // ---- comparison ---- //
    let primitives = [T::Int, T::Float, T::Bool, T::String];
    for a in primitives {
        for b in primitives {
            if a == b || (NUMERIC.contains(&a) && NUMERIC.contains(&b)) {
                reg.register("eq", [a, b], Infix("==="));
                reg.register("neq", [a, b], Infix("!=="));
            }
        }
    }
    for t in [T::Date, T::DateTime] {
        reg.define("eq", [t, t], |call, cx| by_time(call, cx, "==="));
        reg.define("neq", [t, t], |call, cx| by_time(call, cx, "!=="));
    }
    // loose equality also catches `undefined` from missing fields
    reg.define("eq", [T::Any, T::Null], |call, cx| null_test(call, cx, 0, "=="));
    reg.define("eq", [T::Null, T::Any], |call, cx| null_test(call, cx, 1, "=="));
    reg.define("neq", [T::Any, T::Null], |call, cx| null_test(call, cx, 0, "!="));
    reg.define("neq", [T::Null, T::Any], |call, cx| null_test(call, cx, 1, "!="));
    reg.register("eq", any2, Helper(camel("eq")));
    reg.define("neq", any2, |call, cx| {
        let eq = Helper(camel("eq")).emit(call, cx)?;
        Ok(Fragment::op(format!("!{}", eq.code), "!"))
    });
    for (name, op) in [("lt", "<"), ("lte", "<="), ("gt", ">"), ("gte", ">="), ("and", "&&"), ("or", "||")] {
        reg.register(name, any2, Infix(op));
    }
    reg.register("not", [T::Any], Prefix { key: "!", text: "!" });

    // ---- selectors ---- //
    for (_, stem, tag) in SELECTABLE {
        let as_ = format!("as_{stem}");
        let or_null = format!("as_{stem}_or_null");
        let is = format!("is_{stem}");
        let assert = format!("assert_{stem}");
        reg.register(&as_, [*tag], Identity);
        reg.register(&or_null, [*tag], Identity);
        reg.register(&is, [*tag], Constant("true"));
        reg.register(&assert, [*tag, T::Any], Identity);
        for f in [&as_, &or_null, &is] {
            reg.register(f, [T::Any], Helper(camel(f)));
        }
        reg.register(&assert, any2, Helper(camel(&assert)));
    }
    reg.register("as_float", [T::Int], Identity);
    reg.register("as_float_or_null", [T::Int], Identity);
    reg.register("is_float", [T::Int], Constant("true"));

    // ---- periods ---- //
    for (_, function) in PERIODS {
        reg.register(function, NULLARY, Helper(camel(function)));
    }

    // ---- library ---- //
    for (name, method) in [
        ("trim", ".trim"),
        ("upper", ".toUpperCase"),
        ("lower", ".toLowerCase"),
        ("year", ".getUTCFullYear"),
        ("day", ".getUTCDate"),
    ] {
        reg.register(name, [T::Any], Method(method));
    }
    reg.define("month", [T::Any], |call, cx| {
        Ok(Fragment::op(format!("{}.getUTCMonth() + 1", receiver(call, cx)?), "+"))
    });
    reg.register("length", [T::Any], Postfix(".length"));
    reg.register("first", [T::Any], Postfix("[0]"));
    reg.register("last", [T::Any], Postfix(".at(-1)"));
    for (name, function) in [
        ("abs", "Math.abs"),
        ("round", "Math.round"),
        ("floor", "Math.floor"),
        ("ceil", "Math.ceil"),
    ] {
        reg.register(name, [T::Any], Function(function));
    }
    for (name, method) in [
        ("starts_with", ".startsWith"),
        ("ends_with", ".endsWith"),
        ("contains", ".includes"),
        ("join", ".join"),
        ("map", ".map"),
        ("filter", ".filter"),
        ("any", ".some"),
        ("all", ".every"),
    ] {
        reg.register(name, any2, Method(method));
    }
    reg.define("reduce", [T::Any; 3], |call, cx| {
        let recv = receiver(call, cx)?;
        let init = cx.emit(call.arg(1))?;
        let f = cx.emit(call.arg(2))?;
        Ok(Fragment::atom(format!("{recv}.reduce({f}, {init})")))
    });

    // ---- structure ---- //
    reg.define_variadic("array", 0, |call, cx| Ok(Fragment::atom(format!("[{}]", cx.emit_list(call.args)?))));
    reg.define_variadic("record", 0, |call, cx| {
        let mut pairs = Vec::with_capacity(call.args.len() / 2);
        for pair in call.args.chunks_exact(2) {
            pairs.push(format!("{}: {}", cx.emit(&pair[0])?, cx.emit(&pair[1])?));
        }
        Ok(Fragment::atom(if pairs.is_empty() { "{}".to_string() } else { format!("{{ {} }}", pairs.join(", ")) }))
    });
    reg.define("field", any2, |call, cx| {
        let recv = receiver(call, cx)?;
        match call.arg(1).as_str_literal() {
            Some(key) if is_identifier(key) => Ok(Fragment::atom(format!("{recv}.{key}"))),
            _ => Ok(Fragment::atom(format!("{recv}[{}]", cx.emit(call.arg(1))?))),
        }
    });
    reg.define_variadic("invoke", 1, |call, cx| {
        let f = receiver(call, cx)?;
        Ok(Fragment::atom(format!("{f}({})", cx.emit_list(&call.args[1..])?)))
    });
    reg.define("fail", [T::Any], |call, cx| {
        let message = cx.emit(call.arg(0))?;
        Ok(Fragment::atom(format!("(() => {{ throw new Error({message}); }})()")))
    });

    reg
}

/// Helper call with the two arguments exchanged, for commutative forms
/// written duration first.
fn swapped(call: &CallSite<'_>, cx: &mut EmitContext<'_>, helper: &str) -> CompileResult<Fragment> {
    let helper = camel(helper);
    cx.require_helper(&helper);
    let a = cx.emit(call.arg(1))?;
    let b = cx.emit(call.arg(0))?;
    Ok(Fragment::atom(format!("{helper}({a}, {b})")))
}

/// Dates compare by identity under `===`; compare their timestamps.
fn by_time(call: &CallSite<'_>, cx: &mut EmitContext<'_>, op: &'static str) -> CompileResult<Fragment> {
    let a = receiver(call, cx)?;
    let b = cx.emit_with_parens(call.arg(1), ".", Side::Left)?;
    Ok(Fragment::op(format!("{a}.getTime() {op} {b}.getTime()"), op))
}

fn null_test(call: &CallSite<'_>, cx: &mut EmitContext<'_>, side: usize, op: &'static str) -> CompileResult<Fragment> {
    let value = cx.emit_with_parens(call.arg(side), op, Side::Left)?;
    Ok(Fragment::op(format!("{value} {op} null"), op))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn quote(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

fn local(name: &str) -> String {
    if RESERVED.contains(&name) { format!("{name}$") } else { name.to_string() }
}

/// Arrow bodies starting with `{` would parse as blocks.
fn arrow_body(code: String) -> String {
    if code.starts_with('{') { format!("({code})") } else { code }
}

impl Target for JavaScript {
    fn name(&self) -> &'static str {
        "javascript"
    }

    fn registry(&self) -> &'static Registry {
        &REGISTRY
    }

    fn precedence(&self) -> &'static PrecedenceTable {
        &PRECEDENCE
    }

    fn literal(&self, lit: &Literal, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        Ok(Fragment::atom(match lit {
            Literal::Int(v) => v.to_string(),
            Literal::Float(v) => float_text(v.0),
            Literal::Bool(v) => v.to_string(),
            Literal::String(s) => quote(s),
            // date-only text is UTC already; datetimes without an offset
            // would be local time
            Literal::Date(s) => format!("new Date({})", quote(s)),
            Literal::DateTime(s) => format!("new Date({})", quote(&utc_datetime(s))),
            Literal::Duration(s) => {
                let helper = camel("duration");
                cx.require_helper(&helper);
                format!("{helper}({})", quote(s))
            }
            Literal::Null => "null".to_string(),
        }))
    }

    fn variable(&self, name: &str) -> Fragment {
        Fragment::atom(local(name))
    }

    fn let_in(&self, bindings: &[(String, Ir)], body: &Ir, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        let mut code = cx.emit(body)?;
        for (name, value) in bindings.iter().rev() {
            let value = cx.emit(value)?;
            code = format!("(({}) => {})({value})", local(name), arrow_body(code));
        }
        Ok(Fragment::atom(code))
    }

    fn lambda(&self, params: &[String], body: &Ir, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        let body = arrow_body(cx.emit(body)?);
        let params = params.iter().map(|p| local(p)).collect::<Vec<_>>().join(", ");
        Ok(Fragment::op(format!("({params}) => {body}"), "=>"))
    }

    fn conditional(
        &self,
        cond: &Ir,
        then: &Ir,
        else_: &Ir,
        _: &Type,
        cx: &mut EmitContext<'_>,
    ) -> CompileResult<Fragment> {
        let cond = cx.emit_with_parens(cond, "?:", Side::Left)?;
        let then = cx.emit_with_parens(then, "?:", Side::Right)?;
        let else_ = cx.emit_with_parens(else_, "?:", Side::Right)?;
        Ok(Fragment::op(format!("{cond} ? {then} : {else_}"), "?:"))
    }

    fn alternative(&self, candidates: &[Ir], _: &Type, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        let helper = camel("alt");
        cx.require_helper(&helper);
        let thunks = candidates
            .iter()
            .map(|c| Ok(format!("() => {}", arrow_body(cx.emit(c)?))))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(Fragment::atom(format!("{helper}({})", thunks.join(", "))))
    }

    fn executable(&self, code: &str) -> String {
        format!("(function(_) {{ return {code}; }})")
    }
}

#[cfg(test)]
mod tests {
    use crate::emit::{CompileOptions, OutputForm};
    use crate::error::CompileError;
    use crate::{compile, Compiled, TargetKind};

    fn js_full(src: &str) -> Compiled {
        compile(src, TargetKind::JavaScript, &CompileOptions::default()).unwrap()
    }

    fn js(src: &str) -> String {
        js_full(src).code
    }

    #[test]
    fn numeric_operators_are_native() {
        assert_eq!(js("2 + 3 * 4"), "2 + 3 * 4");
        assert_eq!(js("(1 + 2) * 3"), "(1 + 2) * 3");
        assert_eq!(js("7 / 2"), "Math.trunc(7 / 2)");
        assert_eq!(js("7.5 / 2"), "7.5 / 2");
        assert_eq!(js("-2 ^ 2"), "(-2) ** 2");
        assert_eq!(js("-(2 ^ 2)"), "-(2 ** 2)");
        assert_eq!(js("'a' + 'b'"), "\"a\" + \"b\"");
    }

    #[test]
    fn unknown_operands_use_helpers() {
        let out = js_full("_ + 1");
        assert_eq!(out.code, "eloAdd(_, 1)");
        assert!(out.helpers.contains("eloAdd"));
        assert_eq!(js("_ == 1"), "eloEq(_, 1)");
        assert_eq!(js("_ != 1"), "!eloEq(_, 1)");
        assert_eq!(js("_ == null"), "_ == null");
        assert_eq!(js("1 == 1.0"), "1 === 1.0");
    }

    #[test]
    fn temporal_arithmetic_goes_through_helpers() {
        let out = js_full("D2024-01-15 + P1D");
        assert_eq!(out.code, "eloAddDuration(new Date(\"2024-01-15\"), eloDuration(\"P1D\"))");
        assert_eq!(out.helpers.iter().cloned().collect::<Vec<_>>(), ["eloAddDuration", "eloDuration"]);
        assert_eq!(
            js("P1D + D2024-01-15"),
            "eloAddDuration(new Date(\"2024-01-15\"), eloDuration(\"P1D\"))"
        );
        assert_eq!(
            js("D2024-01-15 == D2024-01-16"),
            "new Date(\"2024-01-15\").getTime() === new Date(\"2024-01-16\").getTime()"
        );
    }

    #[test]
    fn pipes_and_lambdas() {
        assert_eq!(js("'  hi  ' |> trim |> upper"), "\"  hi  \".trim().toUpperCase()");
        assert_eq!(js("[1, 2] |> map(x ~> x * 2)"), "[1, 2].map((x) => eloMul(x, 2))");
        assert_eq!(js("let f = x ~> x in f(1)"), "((f) => f(1))((x) => x)");
        assert_eq!(js("(x ~> x)(1)"), "((x) => x)(1)");
        assert_eq!(js("[1, 2] |> reduce(0, fn(a, b ~> a + b))"), "[1, 2].reduce((a, b) => eloAdd(a, b), 0)");
    }

    #[test]
    fn records_are_wrapped_in_arrow_bodies() {
        assert_eq!(js("let x = 2 in {a: x}"), "((x) => ({ \"a\": x }))(2)");
        assert_eq!(js("_.name"), "_.name");
    }

    #[test]
    fn failures_throw_from_an_arrow() {
        assert_eq!(js("guard _ > 0 in _"), "_ > 0 ? _ : (() => { throw new Error(\"guard failed\"); })()");
    }

    #[test]
    fn alternatives_and_selectors() {
        let out = js_full("Int(_) | 0");
        assert_eq!(out.code, "eloAlt(() => eloAsIntOrNull(_), () => 0)");
        assert!(out.helpers.contains("eloAlt"));
        assert_eq!(js("Float(1)"), "1");
        assert_eq!(js("Int?(_)"), "eloIsInt(_)");
    }

    #[test]
    fn datetimes_without_offset_are_utc() {
        assert_eq!(js("D2024-01-15T10:30"), "new Date(\"2024-01-15T10:30Z\")");
        assert_eq!(js("D2024-01-15T10:30:00+02:00"), "new Date(\"2024-01-15T10:30:00+02:00\")");
        assert_eq!(js("D2024-01-15"), "new Date(\"2024-01-15\")");
    }

    #[test]
    fn invoke_needs_a_callee() {
        let err = compile("invoke()", TargetKind::JavaScript, &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::Dispatch(ref e) if e.function_name == "invoke"));
    }

    #[test]
    fn periods_and_executable_form() {
        assert_eq!(js("TODAY"), "eloToday()");
        assert_eq!(js("EOM"), "eloEndOfMonth()");
        let opts = CompileOptions { form: OutputForm::Executable };
        assert_eq!(
            compile("_.x", TargetKind::JavaScript, &opts).unwrap().code,
            "(function(_) { return _.x; })"
        );
    }
}
