//! Ruby binding.
//!
//! Ruby overloads its operators for every Elo type once ActiveSupport is
//! loaded, so the table is mostly the all-`Any` operator entries; the
//! concrete entries below exist where Ruby's own semantics differ (integer
//! division, whole-day date shifts) or where a native parse is available.
use once_cell::sync::Lazy;

use super::{
    float_text, receiver, whole_days, Constant, Function, Helper, Identity, Infix, Method, Postfix, Prefix,
    NULLARY,
};
use crate::emit::{Assoc, CallSite, EmitContext, Fragment, PrecedenceTable, Side, Target};
use crate::error::CompileResult;
use crate::ir::{Ir, Literal};
use crate::prelude::snake;
use crate::registry::{Emitter, Registry};
use crate::types::{Type, TypeTag as T, SELECTABLE};

pub struct Ruby;

static PRECEDENCE: Lazy<PrecedenceTable> = Lazy::new(|| {
    PrecedenceTable::new(&[
        (".", 20, Assoc::Left),
        ("!", 16, Assoc::None),
        ("**", 15, Assoc::Right),
        ("u-", 14, Assoc::None),
        ("u+", 14, Assoc::None),
        ("*", 12, Assoc::Left),
        ("/", 12, Assoc::Left),
        ("%", 12, Assoc::Left),
        ("+", 11, Assoc::Left),
        ("-", 11, Assoc::Left),
        ("<", 9, Assoc::None),
        ("<=", 9, Assoc::None),
        (">", 9, Assoc::None),
        (">=", 9, Assoc::None),
        ("==", 8, Assoc::None),
        ("!=", 8, Assoc::None),
        ("&&", 6, Assoc::Left),
        ("||", 5, Assoc::Left),
        ("?:", 3, Assoc::Right),
    ])
});

static REGISTRY: Lazy<Registry> = Lazy::new(build_registry);

const RESERVED: &[&str] = &[
    "alias", "and", "begin", "break", "case", "class", "def", "defined?", "do", "else", "elsif",
    "end", "ensure", "false", "for", "if", "in", "module", "next", "nil", "not", "or", "redo",
    "rescue", "retry", "return", "self", "super", "then", "true", "undef", "unless", "until",
    "when", "while", "yield", "__FILE__", "__LINE__", "__method__",
];

/// `xs.map(&f)`, `xs.reduce(init, &f)`: the last argument is passed as block.
struct BlockMethod(&'static str);

impl Emitter for BlockMethod {
    fn emit(&self, call: &CallSite<'_>, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        let recv = receiver(call, cx)?;
        let mut args = Vec::with_capacity(call.args.len() - 1);
        for (i, arg) in call.args.iter().enumerate().skip(1) {
            let code = cx.emit(arg)?;
            args.push(if i + 1 == call.args.len() { format!("&{code}") } else { code });
        }
        Ok(Fragment::atom(format!("{recv}{}({})", self.0, args.join(", "))))
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
        ("pow", "**"),
        ("eq", "=="),
        ("neq", "!="),
        ("lt", "<"),
        ("lte", "<="),
        ("gt", ">"),
        ("gte", ">="),
        ("and", "&&"),
        ("or", "||"),
    ] {
        reg.register(name, any2, Infix(op));
    }
    reg.register("neg", [T::Any], Prefix { key: "u-", text: "-" });
    reg.register("pos", [T::Any], Prefix { key: "u+", text: "+" });
    reg.register("not", [T::Any], Prefix { key: "!", text: "!" });

    // Elo division truncates toward zero, Ruby's `/` and `%` floor. Operands
    // of unknown type may be integers, so they go through the prelude.
    reg.register("div", any2, Helper(snake("div")));
    reg.register("mod", any2, Helper(snake("mod")));
    reg.define("div", [T::Int, T::Int], |call, cx| {
        let lhs = receiver(call, cx)?;
        let rhs = cx.emit(call.arg(1))?;
        Ok(Fragment::atom(format!("{lhs}.quo({rhs}).truncate")))
    });
    reg.register("mod", [T::Int, T::Int], Method(".remainder"));
    for sig in [[T::Float, T::Any], [T::Any, T::Float]] {
        reg.register("div", sig, Infix("/"));
        reg.register("mod", sig, Method(".remainder"));
    }
    reg.register("div", [T::Duration, T::Any], Infix("/"));

    reg.define("add", [T::Date, T::Duration], |call, cx| day_shift(call, cx, "+"));
    reg.define("sub", [T::Date, T::Duration], |call, cx| day_shift(call, cx, "-"));
    reg.define("add", [T::Duration, T::Date], duration_first);
    reg.define("add", [T::Duration, T::DateTime], duration_first);
    reg.register("sub", [T::Date, T::Date], Helper(snake("date_diff")));
    reg.register("sub", [T::DateTime, T::DateTime], Helper(snake("date_diff")));

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
            reg.register(f, [T::Any], Helper(snake(f)));
        }
        reg.register(&assert, any2, Helper(snake(&assert)));
    }
    reg.define("as_int", [T::String], |call, cx| {
        Ok(Fragment::atom(format!("Integer({}, 10)", cx.emit(call.arg(0))?)))
    });
    reg.define("as_int_or_null", [T::String], |call, cx| {
        Ok(Fragment::atom(format!("Integer({}, 10, exception: false)", cx.emit(call.arg(0))?)))
    });
    reg.register("as_float", [T::String], Function("Float"));
    reg.define("as_float_or_null", [T::String], |call, cx| {
        Ok(Fragment::atom(format!("Float({}, exception: false)", cx.emit(call.arg(0))?)))
    });
    reg.register("as_float", [T::Int], Postfix(".to_f"));
    reg.register("as_float_or_null", [T::Int], Postfix(".to_f"));
    reg.register("is_float", [T::Int], Constant("true"));
    reg.register("as_date", [T::String], Function("Date.iso8601"));
    reg.register("as_datetime", [T::String], Function("DateTime.iso8601"));
    reg.register("as_duration", [T::String], Function("ActiveSupport::Duration.parse"));
    reg.register("as_string", [T::Int], Postfix(".to_s"));
    reg.register("as_string", [T::Float], Postfix(".to_s"));

    // ---- periods ---- //
    for (name, code) in [
        ("today", "Date.today"),
        ("now", "DateTime.now"),
        ("start_of_day", "DateTime.now.beginning_of_day"),
        ("end_of_day", "DateTime.now.end_of_day"),
        ("start_of_week", "Date.today.beginning_of_week"),
        ("end_of_week", "Date.today.end_of_week"),
        ("start_of_month", "Date.today.beginning_of_month"),
        ("end_of_month", "Date.today.end_of_month"),
        ("start_of_quarter", "Date.today.beginning_of_quarter"),
        ("end_of_quarter", "Date.today.end_of_quarter"),
        ("start_of_year", "Date.today.beginning_of_year"),
        ("end_of_year", "Date.today.end_of_year"),
    ] {
        reg.register(name, NULLARY, Constant(code));
    }
    reg.define("tomorrow", NULLARY, |_, _| Ok(Fragment::op("Date.today + 1", "+")));
    reg.define("yesterday", NULLARY, |_, _| Ok(Fragment::op("Date.today - 1", "-")));

    // ---- library ---- //
    for (name, suffix) in [
        ("trim", ".strip"),
        ("upper", ".upcase"),
        ("lower", ".downcase"),
        ("length", ".length"),
        ("abs", ".abs"),
        ("round", ".round"),
        ("floor", ".floor"),
        ("ceil", ".ceil"),
        ("year", ".year"),
        ("month", ".month"),
        ("day", ".day"),
        ("first", ".first"),
        ("last", ".last"),
    ] {
        reg.register(name, [T::Any], Postfix(suffix));
    }
    for (name, method) in [
        ("starts_with", ".start_with?"),
        ("ends_with", ".end_with?"),
        ("contains", ".include?"),
        ("join", ".join"),
    ] {
        reg.register(name, any2, Method(method));
    }
    for (name, method) in [("map", ".map"), ("filter", ".select"), ("any", ".any?"), ("all", ".all?")] {
        reg.register(name, any2, BlockMethod(method));
    }
    reg.register("reduce", [T::Any; 3], BlockMethod(".reduce"));

    // ---- structure ---- //
    reg.define_variadic("array", 0, |call, cx| Ok(Fragment::atom(format!("[{}]", cx.emit_list(call.args)?))));
    reg.define_variadic("record", 0, |call, cx| {
        let mut pairs = Vec::with_capacity(call.args.len() / 2);
        for pair in call.args.chunks_exact(2) {
            pairs.push(format!("{} => {}", cx.emit(&pair[0])?, cx.emit(&pair[1])?));
        }
        Ok(Fragment::atom(if pairs.is_empty() { "{}".to_string() } else { format!("{{ {} }}", pairs.join(", ")) }))
    });
    reg.define("field", any2, |call, cx| {
        let recv = receiver(call, cx)?;
        Ok(Fragment::atom(format!("{recv}[{}]", cx.emit(call.arg(1))?)))
    });
    reg.define_variadic("invoke", 1, |call, cx| Method(".call").emit(call, cx));
    reg.register("fail", [T::Any], Function("raise"));

    reg
}

/// Date shifted by a duration; whole-day literals become plain day counts.
fn day_shift(call: &CallSite<'_>, cx: &mut EmitContext<'_>, op: &'static str) -> CompileResult<Fragment> {
    let lhs = cx.emit_with_parens(call.arg(0), op, Side::Left)?;
    let rhs = match whole_days(call.arg(1).as_literal()) {
        Some(days) => days.to_string(),
        None => cx.emit_with_parens(call.arg(1), op, Side::Right)?,
    };
    Ok(Fragment::op(format!("{lhs} {op} {rhs}"), op))
}

/// `Duration + Date` is not defined in Ruby; put the date first.
fn duration_first(call: &CallSite<'_>, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
    let date = cx.emit_with_parens(call.arg(1), "+", Side::Left)?;
    let duration = cx.emit_with_parens(call.arg(0), "+", Side::Right)?;
    Ok(Fragment::op(format!("{date} + {duration}"), "+"))
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Elo names that Ruby would read as keywords or constants.
fn local(name: &str) -> String {
    if RESERVED.contains(&name) {
        format!("{name}_")
    } else if name.starts_with(|c: char| c.is_ascii_uppercase()) {
        format!("_{name}")
    } else {
        name.to_string()
    }
}

impl Target for Ruby {
    fn name(&self) -> &'static str {
        "ruby"
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
            Literal::Float(v) => float_text(v.0),
            Literal::Bool(v) => v.to_string(),
            Literal::String(s) => quote(s),
            Literal::Date(s) => format!("Date.iso8601({})", quote(s)),
            Literal::DateTime(s) => format!("DateTime.iso8601({})", quote(s)),
            Literal::Duration(s) => format!("ActiveSupport::Duration.parse({})", quote(s)),
            Literal::Null => "nil".to_string(),
        }))
    }

    fn variable(&self, name: &str) -> Fragment {
        Fragment::atom(local(name))
    }

    fn let_in(&self, bindings: &[(String, Ir)], body: &Ir, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        let mut code = cx.emit(body)?;
        for (name, value) in bindings.iter().rev() {
            let value = cx.emit(value)?;
            code = format!("->({}) {{ {code} }}.call({value})", local(name));
        }
        Ok(Fragment::atom(code))
    }

    fn lambda(&self, params: &[String], body: &Ir, cx: &mut EmitContext<'_>) -> CompileResult<Fragment> {
        let body = cx.emit(body)?;
        if params.is_empty() {
            return Ok(Fragment::atom(format!("-> {{ {body} }}")));
        }
        let params = params.iter().map(|p| local(p)).collect::<Vec<_>>().join(", ");
        Ok(Fragment::atom(format!("->({params}) {{ {body} }}")))
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
        let helper = snake("alt");
        cx.require_helper(&helper);
        let thunks = candidates
            .iter()
            .map(|c| Ok(format!("-> {{ {} }}", cx.emit(c)?)))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(Fragment::atom(format!("{helper}({})", thunks.join(", "))))
    }

    fn executable(&self, code: &str) -> String {
        format!("->(_) {{ {code} }}")
    }
}

#[cfg(test)]
mod tests {
    use crate::emit::{CompileOptions, OutputForm};
    use crate::error::CompileError;
    use crate::{compile, TargetKind};

    fn ruby(src: &str) -> String {
        compile(src, TargetKind::Ruby, &CompileOptions::default()).unwrap().code
    }

    #[test]
    fn arithmetic_keeps_source_grouping() {
        assert_eq!(ruby("2 + 3 * 4"), "2 + 3 * 4");
        assert_eq!(ruby("(1 + 2) * 3"), "(1 + 2) * 3");
        assert_eq!(ruby("1 - (2 - 3)"), "1 - (2 - 3)");
        assert_eq!(ruby("1 - 2 - 3"), "1 - 2 - 3");
        assert_eq!(ruby("2 ^ 3 ^ 2"), "2 ** 3 ** 2");
        assert_eq!(ruby("(2 ^ 3) ^ 2"), "(2 ** 3) ** 2");
        assert_eq!(ruby("-2 ^ 2"), "(-2) ** 2");
    }

    #[test]
    fn integer_division_truncates() {
        assert_eq!(ruby("7 / 2"), "7.quo(2).truncate");
        assert_eq!(ruby("-7 / 2"), "(-7).quo(2).truncate");
        assert_eq!(ruby("7 % 2"), "7.remainder(2)");
        assert_eq!(ruby("7.0 / 2"), "7.0 / 2");
        assert_eq!(ruby("-7.5 % 2"), "(-7.5).remainder(2)");
        assert_eq!(ruby("P1D / 2"), "ActiveSupport::Duration.parse('P1D') / 2");
    }

    #[test]
    fn untyped_division_goes_through_the_prelude() {
        let out = compile("_ / 2", TargetKind::Ruby, &CompileOptions::default()).unwrap();
        assert_eq!(out.code, "elo_div(_, 2)");
        assert_eq!(out.helpers.iter().cloned().collect::<Vec<_>>(), ["elo_div"]);
        assert_eq!(ruby("_.a % _.b"), "elo_mod(_['a'], _['b'])");
        assert_eq!(ruby("_ / 2.0"), "_ / 2.0");
    }

    #[test]
    fn whole_day_durations_shift_dates_by_days() {
        assert_eq!(ruby("D2024-01-15 + P1D"), "Date.iso8601('2024-01-15') + 1");
        assert_eq!(ruby("D2024-01-15 - P2W"), "Date.iso8601('2024-01-15') - 14");
        assert_eq!(
            ruby("D2024-01-15 + PT2H"),
            "Date.iso8601('2024-01-15') + ActiveSupport::Duration.parse('PT2H')"
        );
        assert_eq!(ruby("P1D + D2024-01-15"), "Date.iso8601('2024-01-15') + ActiveSupport::Duration.parse('P1D')");
    }

    #[test]
    fn pipes_become_method_chains() {
        assert_eq!(ruby("'  hi  ' |> trim |> upper"), "'  hi  '.strip.upcase");
        assert_eq!(ruby("'abc' |> starts_with('a')"), "'abc'.start_with?('a')");
    }

    #[test]
    fn selectors_parse_strings_natively() {
        assert_eq!(ruby("Int('12')"), "Integer('12', 10)");
        assert_eq!(ruby("Int??('x')"), "Integer('x', 10, exception: false)");
        assert_eq!(ruby("Int(12)"), "12");
        let out = compile("Int(_)", TargetKind::Ruby, &CompileOptions::default()).unwrap();
        assert_eq!(out.code, "elo_as_int(_)");
        assert!(out.helpers.contains("elo_as_int"));
    }

    #[test]
    fn alternatives_use_the_prelude() {
        let out = compile("Int(_) | 0", TargetKind::Ruby, &CompileOptions::default()).unwrap();
        assert_eq!(out.code, "elo_alt(-> { elo_as_int_or_null(_) }, -> { 0 })");
        assert_eq!(out.helpers.iter().cloned().collect::<Vec<_>>(), ["elo_alt", "elo_as_int_or_null"]);
    }

    #[test]
    fn let_and_lambdas() {
        assert_eq!(ruby("let x = 2 in x * x"), "->(x) { x * x }.call(2)");
        assert_eq!(ruby("let x = 1, y = x + 1 in y"), "->(x) { ->(y) { y }.call(x + 1) }.call(1)");
        assert_eq!(ruby("[1, 2] |> map(x ~> x * 2)"), "[1, 2].map(&->(x) { x * 2 })");
        assert_eq!(ruby("let f = fn(a ~> a) in f(1)"), "->(f) { f.call(1) }.call(->(a) { a })");
        assert_eq!(ruby("let end = 1 in end"), "->(end_) { end_ }.call(1)");
    }

    #[test]
    fn guards_raise_with_their_label() {
        assert_eq!(ruby("guard positive: _ > 0 in _"), "_ > 0 ? _ : raise('positive')");
        assert_eq!(ruby("guard _ > 0 in _"), "_ > 0 ? _ : raise('guard failed')");
    }

    #[test]
    fn records_and_fields() {
        assert_eq!(ruby("{a: 1, b: 'x'}"), "{ 'a' => 1, 'b' => 'x' }");
        assert_eq!(ruby("_.name"), "_['name']");
        assert_eq!(ruby("'it\\'s'"), "'it\\'s'");
    }

    #[test]
    fn invoke_needs_a_callee() {
        let err = compile("invoke()", TargetKind::Ruby, &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::Dispatch(ref e) if e.function_name == "invoke"));
        assert_eq!(ruby("invoke(x ~> x, 1)"), "->(x) { x }.call(1)");
    }

    #[test]
    fn periods_and_executable_form() {
        assert_eq!(ruby("TODAY"), "Date.today");
        assert_eq!(ruby("SOW"), "Date.today.beginning_of_week");
        assert_eq!(ruby("TOMORROW - P1D"), "Date.today + 1 - 1");
        let opts = CompileOptions { form: OutputForm::Executable };
        assert_eq!(compile("_ + 1", TargetKind::Ruby, &opts).unwrap().code, "->(_) { _ + 1 }");
    }
}
