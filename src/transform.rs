//! AST → IR: type every node and desugar every construct into calls.
use crate::ast::{Ast, Condition, Expr, GuardKind, SelectPolicy};
use crate::error::TypeError;
use crate::ir::{Ir, IrKind, Literal};
use crate::types::{self, Type};

/// Name bound to the expression's input.
pub const INPUT: &str = "_";

/// Name bound to the dressed value in selector constraints and `check`.
pub const IT: &str = "it";

/// Uppercase period constants and the zero-argument calls they lower to.
pub const PERIODS: &[(&str, &str)] = &[
    ("TODAY", "today"),
    ("NOW", "now"),
    ("TOMORROW", "tomorrow"),
    ("YESTERDAY", "yesterday"),
    ("SOD", "start_of_day"),
    ("EOD", "end_of_day"),
    ("SOW", "start_of_week"),
    ("EOW", "end_of_week"),
    ("SOM", "start_of_month"),
    ("EOM", "end_of_month"),
    ("SOQ", "start_of_quarter"),
    ("EOQ", "end_of_quarter"),
    ("SOY", "start_of_year"),
    ("EOY", "end_of_year"),
];

pub fn transform(ast: &Ast) -> Result<Ir, TypeError> {
    let mut lw = Lowerer { scope: vec![(INPUT.to_string(), Type::Any)] };
    lw.lower(ast)
}

struct Lowerer {
    scope: Vec<(String, Type)>,
}

impl Lowerer {
    fn lookup(&self, name: &str) -> Option<&Type> {
        self.scope.iter().rev().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    fn lower(&mut self, ast: &Ast) -> Result<Ir, TypeError> {
        match &ast.kind {
            Expr::Int(v) => Ok(Ir::literal(Literal::Int(*v))),
            Expr::Float(v) => Ok(Ir::literal(Literal::Float(*v))),
            Expr::Bool(v) => Ok(Ir::literal(Literal::Bool(*v))),
            Expr::String(s) => Ok(Ir::literal(Literal::String(s.clone()))),
            Expr::Date(s) => Ok(Ir::literal(Literal::Date(s.clone()))),
            Expr::DateTime(s) => Ok(Ir::literal(Literal::DateTime(s.clone()))),
            Expr::Duration(s) => Ok(Ir::literal(Literal::Duration(s.clone()))),
            Expr::Null => Ok(Ir::literal(Literal::Null)),

            Expr::Array(items) => {
                let items = items.iter().map(|i| self.lower(i)).collect::<Result<Vec<_>, _>>()?;
                let item = items.iter().map(|i| i.ty.clone()).reduce(|a, b| a.join(&b));
                let ty = match item {
                    Some(t) if !t.is_any() => Type::array_of(t),
                    _ => Type::Array(None),
                };
                Ok(Ir::call("array", items, ty))
            }

            Expr::Record(fields) => {
                let mut args = Vec::with_capacity(fields.len() * 2);
                let mut shape = indexmap::IndexMap::new();
                for (name, value) in fields {
                    let value = self.lower(value)?;
                    shape.insert(name.clone(), value.ty.clone());
                    args.push(Ir::string(name.clone()));
                    args.push(value);
                }
                Ok(Ir::call("record", args, Type::Record(shape)))
            }

            Expr::Var(name) => self.variable(name),

            Expr::Unary { op, operand } => {
                let operand = self.lower(operand)?;
                Ok(self.operator(op.function(), vec![operand]))
            }

            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.lower(lhs)?;
                let rhs = self.lower(rhs)?;
                Ok(self.operator(op.function(), vec![lhs, rhs]))
            }

            Expr::If { cond, then, else_ } => {
                let cond = self.lower(cond)?;
                let then = self.lower(then)?;
                let else_ = self.lower(else_)?;
                Ok(Ir::if_(cond, then, else_))
            }

            Expr::Let { bindings, body } => {
                let depth = self.scope.len();
                let mut lowered = Vec::with_capacity(bindings.len());
                for (name, value) in bindings {
                    let value = self.lower(value)?;
                    self.scope.push((name.clone(), value.ty.clone()));
                    lowered.push((name.clone(), value));
                }
                let body = self.lower(body);
                self.scope.truncate(depth);
                Ok(Ir::let_(lowered, body?))
            }

            Expr::Lambda { params, body } => {
                let depth = self.scope.len();
                self.scope.extend(params.iter().map(|p| (p.clone(), Type::Any)));
                let body = self.lower(body);
                self.scope.truncate(depth);
                Ok(Ir::new(
                    IrKind::Lambda { params: params.clone(), body: Box::new(body?) },
                    Type::Function,
                ))
            }

            Expr::Call { callee, args } => {
                let args = args.iter().map(|a| self.lower(a)).collect::<Result<Vec<_>, _>>()?;
                match &callee.kind {
                    Expr::Var(name) if self.lookup(name).is_none() && !is_period(name) => {
                        Ok(self.operator(name, args))
                    }
                    _ => {
                        let callee = self.lower(callee)?;
                        Ok(invoke(callee, args))
                    }
                }
            }

            Expr::Member { object, field } => {
                let object = self.lower(object)?;
                let ty = match &object.ty {
                    Type::Record(fields) => fields.get(field).cloned().unwrap_or(Type::Any),
                    _ => Type::Any,
                };
                Ok(Ir::call("field", vec![object, Ir::string(field.clone())], ty))
            }

            Expr::Pipe { value, function, args } => {
                if types::selectable(function).is_some() && args.is_empty() {
                    let value = self.lower(value)?;
                    return self.select(function, SelectPolicy::Raise, &[], value, None);
                }
                let mut all = vec![self.lower(value)?];
                for a in args {
                    all.push(self.lower(a)?);
                }
                match self.lookup(function).cloned() {
                    Some(ty) => Ok(invoke(Ir::var(function.clone(), ty), all)),
                    None => Ok(self.operator(function, all)),
                }
            }

            Expr::Alternative(candidates) => {
                let last = candidates.len().saturating_sub(1);
                let mut lowered = Vec::with_capacity(candidates.len());
                for (i, cand) in candidates.iter().enumerate() {
                    if i == last {
                        lowered.push(self.lower(cand)?);
                        continue;
                    }
                    // a raising dress can only be recovered on targets with
                    // try/catch; lower it to its null-policy twin instead
                    let ir = match &cand.kind {
                        Expr::Select {
                            type_name,
                            policy: SelectPolicy::Raise | SelectPolicy::Assert,
                            constraints,
                            args,
                        } => {
                            let value = self.selector_value(type_name, args)?;
                            self.select(type_name, SelectPolicy::OrNull, constraints, value, None)?
                        }
                        _ => self.lower(cand)?,
                    };
                    soften_into(ir, &mut lowered);
                }
                let ty = lowered
                    .iter()
                    .map(|c| c.ty.clone())
                    .reduce(|a, b| a.join(&b))
                    .unwrap_or(Type::Any);
                Ok(Ir::new(IrKind::Alternative(lowered), ty))
            }

            Expr::Select { type_name, policy, constraints, args } => {
                let value = self.selector_value(type_name, args)?;
                let message = match args.get(1) {
                    Some(m) => Some(self.lower(m)?),
                    None => None,
                };
                self.select(type_name, *policy, constraints, value, message)
            }

            Expr::Guard { kind: GuardKind::Guard, conditions, body } => {
                let tests = self.conditions(conditions, None)?;
                let body = self.lower(body)?;
                Ok(fail_fast(tests, body, "guard failed"))
            }

            Expr::Guard { kind: GuardKind::Check, conditions, body } => {
                let value = self.lower(body)?;
                let tests = self.conditions(conditions, Some(value.ty.clone()))?;
                let it = Ir::var(IT, value.ty.clone());
                Ok(Ir::let_(vec![(IT.to_string(), value)], fail_fast(tests, it, "check failed")))
            }
        }
    }

    fn selector_value(&mut self, type_name: &str, args: &[Ast]) -> Result<Ir, TypeError> {
        match args.first() {
            Some(a) => self.lower(a),
            None => Err(TypeError::new(format!("`{type_name}` selector needs a value"))),
        }
    }

    fn variable(&self, name: &str) -> Result<Ir, TypeError> {
        if let Some(ty) = self.lookup(name) {
            return Ok(Ir::var(name, ty.clone()));
        }
        if let Some((_, function)) = PERIODS.iter().find(|(k, _)| *k == name) {
            return Ok(Ir::call(*function, Vec::new(), types::result_type(function, &[])));
        }
        Err(TypeError::new(format!("unbound variable `{name}`")))
    }

    /// A named call whose result type follows the fixed per-operation rules.
    fn operator(&self, name: &str, args: Vec<Ir>) -> Ir {
        let arg_types = args.iter().map(|a| a.ty.clone()).collect::<Vec<_>>();
        let result = types::result_type(name, &arg_types);
        Ir::new(IrKind::Call { name: name.to_string(), args, arg_types }, result)
    }

    /// Lower labeled conditions, optionally with `it` bound to `it_ty`.
    fn conditions(
        &mut self,
        conditions: &[Condition],
        it_ty: Option<Type>,
    ) -> Result<Vec<(Option<String>, Ir)>, TypeError> {
        let depth = self.scope.len();
        if let Some(ty) = it_ty {
            self.scope.push((IT.to_string(), ty));
        }
        let out = conditions
            .iter()
            .map(|c| Ok((c.label.clone(), self.lower(&c.test)?)))
            .collect::<Result<Vec<_>, TypeError>>();
        self.scope.truncate(depth);
        out
    }

    fn select(
        &mut self,
        type_name: &str,
        policy: SelectPolicy,
        constraints: &[Condition],
        value: Ir,
        message: Option<Ir>,
    ) -> Result<Ir, TypeError> {
        let (stem, ty) = types::selectable(type_name)
            .ok_or_else(|| TypeError::new(format!("unknown type `{type_name}` in selector")))?;

        let dress = |policy: SelectPolicy, value: Ir, message: Option<Ir>| match policy {
            SelectPolicy::Raise => Ir::call(format!("as_{stem}"), vec![value], ty.clone()),
            SelectPolicy::OrNull => Ir::call(format!("as_{stem}_or_null"), vec![value], ty.clone()),
            SelectPolicy::Check => Ir::call(format!("is_{stem}"), vec![value], Type::Bool),
            SelectPolicy::Assert => {
                let message = message.unwrap_or_else(|| Ir::string(format!("expected {type_name}")));
                Ir::call(format!("assert_{stem}"), vec![value, message], ty.clone())
            }
        };

        if constraints.is_empty() {
            return Ok(dress(policy, value, message));
        }

        let tests = self.conditions(constraints, Some(ty.clone()))?;
        let it = || Ir::var(IT, ty.clone());
        let default_label = format!("{type_name} constraint failed");

        let out = match policy {
            SelectPolicy::Raise | SelectPolicy::Assert => {
                let dressed = dress(policy, value, message);
                Ir::let_(vec![(IT.to_string(), dressed)], fail_fast(tests, it(), &default_label))
            }
            SelectPolicy::OrNull => {
                let dressed = dress(SelectPolicy::OrNull, value, None);
                let is_null = Ir::call("eq", vec![it(), Ir::literal(Literal::Null)], Type::Bool);
                let null = || Ir::literal(Literal::Null);
                let body = Ir::if_(is_null, null(), Ir::if_(all_of(tests), it(), null()));
                Ir::let_(vec![(IT.to_string(), dressed)], body)
            }
            SelectPolicy::Check => {
                let test = dress(SelectPolicy::Check, value.clone(), None);
                let dressed = dress(SelectPolicy::Raise, value, None);
                let holds = Ir::let_(vec![(IT.to_string(), dressed)], all_of(tests));
                Ir::if_(test, holds, Ir::literal(Literal::Bool(false)))
            }
        };
        Ok(out)
    }
}

fn is_period(name: &str) -> bool {
    PERIODS.iter().any(|(k, _)| *k == name)
}

fn invoke(callee: Ir, args: Vec<Ir>) -> Ir {
    let mut all = Vec::with_capacity(args.len() + 1);
    all.push(callee);
    all.extend(args);
    Ir::call("invoke", all, Type::Any)
}

/// `fail(message)` typed as the value it replaces.
pub fn fail(message: &str, ty: Type) -> Ir {
    Ir::call("fail", vec![Ir::string(message)], ty)
}

/// Stem of a selector call that raises when the value does not fit
/// (`as_int`, `assert_int`).
fn raising_stem(name: &str) -> Option<&'static str> {
    types::SELECTABLE
        .iter()
        .map(|(_, stem, _)| *stem)
        .find(|stem| name.strip_prefix("as_").or_else(|| name.strip_prefix("assert_")) == Some(*stem))
}

/// Append a non-last alternative candidate in a form that fails by yielding
/// null. Only the last candidate's failure reason is ever reported, so
/// raises in result position become nulls and nested alternatives are
/// spliced in.
fn soften_into(ir: Ir, out: &mut Vec<Ir>) {
    match ir.kind {
        IrKind::Alternative(inner) => {
            for cand in inner {
                soften_into(cand, out);
            }
        }
        kind => out.push(soften(Ir::new(kind, ir.ty))),
    }
}

fn soften(ir: Ir) -> Ir {
    let Ir { kind, ty } = ir;
    match kind {
        IrKind::Call { name, .. } if name == "fail" => Ir::new(IrKind::Literal(Literal::Null), ty),
        IrKind::Call { name, mut args, arg_types } => match raising_stem(&name) {
            Some(stem) => {
                args.truncate(1);
                Ir::call(format!("as_{stem}_or_null"), args, ty)
            }
            None => Ir::new(IrKind::Call { name, args, arg_types }, ty),
        },
        IrKind::If { cond, then, else_ } => {
            let then = Box::new(soften(*then));
            let else_ = Box::new(soften(*else_));
            Ir::new(IrKind::If { cond, then, else_ }, ty)
        }
        IrKind::Let { bindings, body } => Ir::new(IrKind::Let { bindings, body: Box::new(soften(*body)) }, ty),
        kind => Ir::new(kind, ty),
    }
}

/// Whether evaluating `ir` can raise through `fail` or a raising selector.
/// Lambda bodies only raise when called and are not looked into.
pub fn may_raise(ir: &Ir) -> bool {
    match &ir.kind {
        IrKind::Literal(_) | IrKind::Var(_) | IrKind::Lambda { .. } => false,
        IrKind::Call { name, args, .. } => {
            name == "fail" || raising_stem(name).is_some() || args.iter().any(may_raise)
        }
        IrKind::If { cond, then, else_ } => may_raise(cond) || may_raise(then) || may_raise(else_),
        IrKind::Let { bindings, body } => bindings.iter().any(|(_, v)| may_raise(v)) || may_raise(body),
        // raises once every candidate failed
        IrKind::Alternative(_) => true,
    }
}

/// Nested conditionals, first failing test wins.
fn fail_fast(tests: Vec<(Option<String>, Ir)>, body: Ir, default_label: &str) -> Ir {
    let ty = body.ty.clone();
    tests.into_iter().rev().fold(body, |inner, (label, test)| {
        let message = label.as_deref().unwrap_or(default_label);
        Ir::if_(test, inner, fail(message, ty.clone()))
    })
}

fn all_of(tests: Vec<(Option<String>, Ir)>) -> Ir {
    tests
        .into_iter()
        .map(|(_, t)| t)
        .reduce(|a, b| Ir::call("and", vec![a, b], Type::Bool))
        .unwrap_or_else(|| Ir::literal(Literal::Bool(true)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn lower(src: &str) -> Ir {
        transform(&parse(src).unwrap()).unwrap()
    }

    fn call_parts(ir: &Ir) -> (&str, &[Type]) {
        match &ir.kind {
            IrKind::Call { name, arg_types, .. } => (name.as_str(), arg_types.as_slice()),
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn operators_become_typed_calls() {
        let ir = lower("2 + 3 * 4");
        assert_eq!(call_parts(&ir), ("add", &[Type::Int, Type::Int][..]));
        assert_eq!(ir.ty, Type::Int);

        let ir = lower("1 < 2.5");
        assert_eq!(call_parts(&ir), ("lt", &[Type::Int, Type::Float][..]));
        assert_eq!(ir.ty, Type::Bool);
    }

    #[test]
    fn temporal_literals_type_their_arithmetic() {
        let ir = lower("D2024-01-15 + P1D");
        assert_eq!(call_parts(&ir), ("add", &[Type::Date, Type::Duration][..]));
        assert_eq!(ir.ty, Type::Date);
    }

    #[test]
    fn input_is_any_and_propagates() {
        let ir = lower("_ + 1");
        assert_eq!(call_parts(&ir).1, &[Type::Any, Type::Int]);
        assert_eq!(ir.ty, Type::Any);
    }

    #[test]
    fn let_propagates_binding_types() {
        let ir = lower("let x = 1, y = x + 1.5 in y");
        assert_eq!(ir.ty, Type::Float);
    }

    #[test]
    fn unbound_variables_are_type_errors() {
        let err = transform(&parse("x + 1").unwrap()).unwrap_err();
        assert!(err.message.contains("unbound variable `x`"));
        // bindings do not leak out of their let
        assert!(transform(&parse("(let x = 1 in x) + x").unwrap()).is_err());
    }

    #[test]
    fn unknown_selector_type_is_a_type_error() {
        let err = transform(&parse("Integer(_)").unwrap()).unwrap_err();
        assert!(err.message.contains("unknown type `Integer`"));
    }

    #[test]
    fn pipes_prepend_the_value() {
        let ir = lower("'  hi  ' |> trim |> upper");
        let IrKind::Call { name, args, .. } = &ir.kind else { panic!() };
        assert_eq!(name, "upper");
        assert_eq!(call_parts(&args[0]).0, "trim");
        assert_eq!(ir.ty, Type::String);
    }

    #[test]
    fn selectors_pick_policy_specific_calls() {
        assert_eq!(call_parts(&lower("Int(_)")).0, "as_int");
        assert_eq!(call_parts(&lower("Int??(_)")).0, "as_int_or_null");
        assert_eq!(call_parts(&lower("Date?(_)")).0, "is_date");
        assert_eq!(lower("Date?(_)").ty, Type::Bool);
        let ir = lower("Int!(_)");
        let IrKind::Call { name, args, .. } = &ir.kind else { panic!() };
        assert_eq!(name, "assert_int");
        assert_eq!(args[1].as_str_literal(), Some("expected Int"));
        assert_eq!(call_parts(&lower("_ |> Int")).0, "as_int");
    }

    #[test]
    fn constrained_selectors_bind_it() {
        let ir = lower("Int{positive: it > 0}(_)");
        let IrKind::Let { bindings, body } = &ir.kind else { panic!("{ir:?}") };
        assert_eq!(bindings[0].0, IT);
        let IrKind::If { else_, .. } = &body.kind else { panic!() };
        let IrKind::Call { name, args, .. } = &else_.kind else { panic!() };
        assert_eq!(name, "fail");
        assert_eq!(args[0].as_str_literal(), Some("positive"));
        assert_eq!(ir.ty, Type::Int);
    }

    #[test]
    fn alternatives_soften_raising_candidates_but_the_last() {
        let ir = lower("Int(_) | Int(_)");
        let IrKind::Alternative(cands) = &ir.kind else { panic!() };
        assert_eq!(call_parts(&cands[0]).0, "as_int_or_null");
        assert_eq!(call_parts(&cands[1]).0, "as_int");
        assert_eq!(ir.ty, Type::Int);

        let ir = lower("Int!(_, 'bad') | (_ |> Int) | 0");
        let IrKind::Alternative(cands) = &ir.kind else { panic!() };
        assert_eq!(call_parts(&cands[0]), ("as_int_or_null", &[Type::Any][..]));
        assert_eq!(call_parts(&cands[1]), ("as_int_or_null", &[Type::Any][..]));
    }

    #[test]
    fn alternatives_turn_tail_failures_into_nulls() {
        let ir = lower("(guard _ > 0 in _) | fail('no') | 42");
        let IrKind::Alternative(cands) = &ir.kind else { panic!() };
        let IrKind::If { cond, else_, .. } = &cands[0].kind else { panic!("{:?}", cands[0]) };
        assert_eq!(call_parts(cond).0, "gt");
        assert_eq!(else_.as_literal(), Some(&Literal::Null));
        assert_eq!(cands[1].as_literal(), Some(&Literal::Null));
        assert!(!cands.iter().any(may_raise));

        // the last candidate keeps its reason
        let ir = lower("0 | (check it > 0 in _)");
        let IrKind::Alternative(cands) = &ir.kind else { panic!() };
        assert!(may_raise(&cands[1]));
    }

    #[test]
    fn nested_alternatives_are_spliced() {
        let ir = lower("(Int(_) | fail('x')) | 0");
        let IrKind::Alternative(cands) = &ir.kind else { panic!() };
        assert_eq!(cands.len(), 3);
        assert_eq!(call_parts(&cands[0]).0, "as_int_or_null");
        assert_eq!(cands[1].as_literal(), Some(&Literal::Null));
    }

    #[test]
    fn raises_outside_result_position_are_reported() {
        assert!(may_raise(&lower("Int(_) + 1")));
        assert!(may_raise(&lower("let x = fail('a') in 1")));
        assert!(!may_raise(&lower("Int??(_) + 1")));
        assert!(!may_raise(&lower("x ~> fail('later')")));
    }

    #[test]
    fn guards_fail_fast_in_order() {
        let ir = lower("guard a: _ > 0, b: _ < 10 in _");
        let IrKind::If { then, else_, .. } = &ir.kind else { panic!() };
        let IrKind::Call { args, .. } = &else_.kind else { panic!() };
        assert_eq!(args[0].as_str_literal(), Some("a"));
        assert!(matches!(then.kind, IrKind::If { .. }));
    }

    #[test]
    fn check_binds_the_result_as_it() {
        let ir = lower("check it > 0 in 1 + 2");
        let IrKind::Let { bindings, body } = &ir.kind else { panic!() };
        assert_eq!(bindings[0].1.ty, Type::Int);
        let IrKind::If { else_, .. } = &body.kind else { panic!() };
        let IrKind::Call { args, .. } = &else_.kind else { panic!() };
        assert_eq!(args[0].as_str_literal(), Some("check failed"));
    }

    #[test]
    fn member_access_reads_record_types() {
        let ir = lower("{name: 'x', age: 3}.age");
        assert_eq!(call_parts(&ir).0, "field");
        assert_eq!(ir.ty, Type::Int);
        assert_eq!(lower("_.name").ty, Type::Any);
    }

    #[test]
    fn calling_a_bound_function_invokes_it() {
        let ir = lower("let f = x ~> x * 2 in f(3)");
        let IrKind::Let { body, .. } = &ir.kind else { panic!() };
        assert_eq!(call_parts(body), ("invoke", &[Type::Function, Type::Int][..]));
    }

    #[test]
    fn period_constants_are_calls() {
        let ir = lower("TODAY + P1D");
        let IrKind::Call { args, .. } = &ir.kind else { panic!() };
        assert_eq!(call_parts(&args[0]).0, "today");
        assert_eq!(ir.ty, Type::Date);
        // shadowing wins
        assert!(matches!(lower("let TODAY = 1 in TODAY").kind, IrKind::Let { .. }));
    }

    #[test]
    fn arrays_record_a_shared_item_type() {
        assert_eq!(lower("[1, 2, null]").ty, Type::array_of(Type::Int));
        assert_eq!(lower("[1, 'a']").ty, Type::Array(None));
    }
}
