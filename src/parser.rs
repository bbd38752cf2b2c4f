//! Recursive-descent parser: tokens → [`Ast`].
//!
//! One helper per precedence level, lowest first: pipe/alternative, `or`,
//! `and`, equality, comparison, additive, multiplicative, power (right
//! associative), unary, postfix. Prefix forms (`let`, `if`, `fn`, `guard`,
//! `check`, `x ~> ...`) extend as far to the right as possible.
use ordered_float::OrderedFloat;

use crate::ast::{Ast, BinaryOp, Condition, Expr, GuardKind, SelectPolicy, Span, UnaryOp};
use crate::error::SyntaxError;
use crate::lexer::{Token, TokenKind, tokenize};

/// Parse one Elo expression.
pub fn parse(source: &str) -> Result<Ast, SyntaxError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { source, tokens, pos: 0 };
    let ast = parser.expr()?;
    if !parser.at_eof() {
        return Err(parser.unexpected("end of input"));
    }
    tracing::trace!(len = source.len(), "parsed expression");
    Ok(ast)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    // ---------------------------- Token stream ---------------------------- //

    fn peek(&self) -> &TokenKind {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &TokenKind {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)].kind
    }

    fn span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn prev_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if !matches!(token.kind, TokenKind::Eof) {
            self.pos += 1;
        }
        token
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), TokenKind::Punct(q) if *q == p)
    }

    fn is_keyword(&self, k: &str) -> bool {
        matches!(self.peek(), TokenKind::Keyword(q) if *q == k)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, k: &str) -> bool {
        if self.is_keyword(k) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), SyntaxError> {
        if self.eat_punct(p) { Ok(()) } else { Err(self.unexpected(&format!("`{p}`"))) }
    }

    fn expect_keyword(&mut self, k: &str) -> Result<(), SyntaxError> {
        if self.eat_keyword(k) { Ok(()) } else { Err(self.unexpected(&format!("`{k}`"))) }
    }

    fn expect_ident(&mut self) -> Result<String, SyntaxError> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.bump();
                Ok(name)
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        let span = self.span();
        let found = match self.peek() {
            TokenKind::Eof => "end of input".to_string(),
            _ => format!("`{}`", &self.source[span.start..span.end]),
        };
        SyntaxError::at(self.source, span.start, format!("expected {expected}, found {found}"))
    }

    fn node(&self, kind: Expr, start: Span) -> Ast {
        Ast::new(kind, start.to(self.prev_span()))
    }

    // ----------------------------- Precedence ----------------------------- //

    fn expr(&mut self) -> Result<Ast, SyntaxError> {
        self.pipe()
    }

    fn pipe(&mut self) -> Result<Ast, SyntaxError> {
        let start = self.span();
        let mut lhs = self.or()?;
        loop {
            if self.eat_punct("|") {
                let mut candidates = vec![lhs];
                loop {
                    candidates.push(self.or()?);
                    if !self.eat_punct("|") {
                        break;
                    }
                }
                lhs = self.node(Expr::Alternative(candidates), start);
            } else if self.eat_punct("|>") {
                let function = self.expect_ident()?;
                let args = if self.eat_punct("(") { self.args(")")? } else { Vec::new() };
                lhs = self.node(Expr::Pipe { value: Box::new(lhs), function, args }, start);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn or(&mut self) -> Result<Ast, SyntaxError> {
        self.binary_level(Self::and, |p| p.eat_keyword("or").then_some(BinaryOp::Or))
    }

    fn and(&mut self) -> Result<Ast, SyntaxError> {
        self.binary_level(Self::equality, |p| p.eat_keyword("and").then_some(BinaryOp::And))
    }

    fn equality(&mut self) -> Result<Ast, SyntaxError> {
        self.binary_level(Self::comparison, |p| {
            if p.eat_punct("==") { Some(BinaryOp::Eq) }
            else if p.eat_punct("!=") { Some(BinaryOp::Neq) }
            else { None }
        })
    }

    fn comparison(&mut self) -> Result<Ast, SyntaxError> {
        self.binary_level(Self::additive, |p| {
            if p.eat_punct("<=") { Some(BinaryOp::Lte) }
            else if p.eat_punct(">=") { Some(BinaryOp::Gte) }
            else if p.eat_punct("<") { Some(BinaryOp::Lt) }
            else if p.eat_punct(">") { Some(BinaryOp::Gt) }
            else { None }
        })
    }

    fn additive(&mut self) -> Result<Ast, SyntaxError> {
        self.binary_level(Self::multiplicative, |p| {
            if p.eat_punct("+") { Some(BinaryOp::Add) }
            else if p.eat_punct("-") { Some(BinaryOp::Sub) }
            else { None }
        })
    }

    fn multiplicative(&mut self) -> Result<Ast, SyntaxError> {
        self.binary_level(Self::power, |p| {
            if p.eat_punct("*") { Some(BinaryOp::Mul) }
            else if p.eat_punct("/") { Some(BinaryOp::Div) }
            else if p.eat_punct("%") { Some(BinaryOp::Mod) }
            else { None }
        })
    }

    /// Left-associative level: `next (op next)*`.
    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Ast, SyntaxError>,
        op: fn(&mut Self) -> Option<BinaryOp>,
    ) -> Result<Ast, SyntaxError> {
        let start = self.span();
        let mut lhs = next(self)?;
        while let Some(op) = op(self) {
            let rhs = next(self)?;
            lhs = self.node(Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, start);
        }
        Ok(lhs)
    }

    fn power(&mut self) -> Result<Ast, SyntaxError> {
        let start = self.span();
        let base = self.unary()?;
        if self.eat_punct("^") {
            let exponent = self.power()?;
            return Ok(self.node(
                Expr::Binary { op: BinaryOp::Pow, lhs: Box::new(base), rhs: Box::new(exponent) },
                start,
            ));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<Ast, SyntaxError> {
        let start = self.span();
        let op = if self.eat_punct("-") {
            UnaryOp::Neg
        } else if self.eat_punct("+") {
            UnaryOp::Pos
        } else if self.eat_keyword("not") {
            UnaryOp::Not
        } else {
            return self.postfix();
        };
        let operand = self.unary()?;
        Ok(self.node(Expr::Unary { op, operand: Box::new(operand) }, start))
    }

    fn postfix(&mut self) -> Result<Ast, SyntaxError> {
        let start = self.span();
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(".") {
                let field = self.expect_ident()?;
                expr = self.node(Expr::Member { object: Box::new(expr), field }, start);
            } else if self.eat_punct("(") {
                let args = self.args(")")?;
                expr = self.node(Expr::Call { callee: Box::new(expr), args }, start);
            } else {
                return Ok(expr);
            }
        }
    }

    // ------------------------------ Primaries ----------------------------- //

    fn primary(&mut self) -> Result<Ast, SyntaxError> {
        let start = self.span();
        let kind = match self.peek().clone() {
            TokenKind::Int(v) => {
                self.bump();
                Expr::Int(v)
            }
            TokenKind::Float(v) => {
                self.bump();
                Expr::Float(OrderedFloat(v))
            }
            TokenKind::Str(s) => {
                self.bump();
                Expr::String(s)
            }
            TokenKind::Date(s) => {
                self.bump();
                Expr::Date(s)
            }
            TokenKind::DateTime(s) => {
                self.bump();
                Expr::DateTime(s)
            }
            TokenKind::Duration(s) => {
                self.bump();
                Expr::Duration(s)
            }
            TokenKind::Keyword("true") => {
                self.bump();
                Expr::Bool(true)
            }
            TokenKind::Keyword("false") => {
                self.bump();
                Expr::Bool(false)
            }
            TokenKind::Keyword("null") => {
                self.bump();
                Expr::Null
            }
            TokenKind::Keyword("let") => return self.let_in(),
            TokenKind::Keyword("if") => return self.if_then_else(),
            TokenKind::Keyword("fn") => return self.fn_lambda(),
            TokenKind::Keyword("guard") => return self.guard(GuardKind::Guard),
            TokenKind::Keyword("check") => return self.guard(GuardKind::Check),
            TokenKind::Ident(name) => {
                if matches!(self.peek_at(1), TokenKind::Punct("~>")) {
                    return self.short_lambda();
                }
                if self.starts_selector(&name) {
                    return self.selector();
                }
                self.bump();
                Expr::Var(name)
            }
            TokenKind::Punct("(") => {
                self.bump();
                let inner = self.expr()?;
                self.expect_punct(")")?;
                return Ok(inner);
            }
            TokenKind::Punct("[") => {
                self.bump();
                Expr::Array(self.args("]")?)
            }
            TokenKind::Punct("{") => {
                self.bump();
                Expr::Record(self.fields()?)
            }
            _ => return Err(self.unexpected("an expression")),
        };
        Ok(self.node(kind, start))
    }

    /// Comma-separated expressions up to `close`; trailing comma allowed.
    fn args(&mut self, close: &str) -> Result<Vec<Ast>, SyntaxError> {
        let mut items = Vec::new();
        while !self.eat_punct(close) {
            items.push(self.expr()?);
            if !self.eat_punct(",") {
                self.expect_punct(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn fields(&mut self) -> Result<Vec<(String, Ast)>, SyntaxError> {
        let mut fields: Vec<(String, Ast)> = Vec::new();
        while !self.eat_punct("}") {
            let at = self.span();
            let name = match self.peek().clone() {
                TokenKind::Ident(name) | TokenKind::Str(name) => {
                    self.bump();
                    name
                }
                TokenKind::Keyword(k) => {
                    self.bump();
                    k.to_string()
                }
                _ => return Err(self.unexpected("a field name")),
            };
            if fields.iter().any(|(n, _)| *n == name) {
                return Err(SyntaxError::at(self.source, at.start, format!("duplicate field `{name}`")));
            }
            self.expect_punct(":")?;
            fields.push((name, self.expr()?));
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        Ok(fields)
    }

    fn let_in(&mut self) -> Result<Ast, SyntaxError> {
        let start = self.span();
        self.expect_keyword("let")?;
        let mut bindings = Vec::new();
        loop {
            let name = self.expect_ident()?;
            self.expect_punct("=")?;
            bindings.push((name, self.expr()?));
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_keyword("in")?;
        let body = self.expr()?;
        Ok(self.node(Expr::Let { bindings, body: Box::new(body) }, start))
    }

    fn if_then_else(&mut self) -> Result<Ast, SyntaxError> {
        let start = self.span();
        self.expect_keyword("if")?;
        let cond = self.expr()?;
        self.expect_keyword("then")?;
        let then = self.expr()?;
        self.expect_keyword("else")?;
        let else_ = self.expr()?;
        Ok(self.node(
            Expr::If { cond: Box::new(cond), then: Box::new(then), else_: Box::new(else_) },
            start,
        ))
    }

    /// `fn(a, b ~> body)`
    fn fn_lambda(&mut self) -> Result<Ast, SyntaxError> {
        let start = self.span();
        self.expect_keyword("fn")?;
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.eat_punct("~>") {
            let at = self.span();
            let name = self.expect_ident()?;
            if params.contains(&name) {
                return Err(SyntaxError::at(self.source, at.start, format!("duplicate parameter `{name}`")));
            }
            params.push(name);
            if !self.eat_punct(",") {
                self.expect_punct("~>")?;
                break;
            }
        }
        let body = self.expr()?;
        self.expect_punct(")")?;
        Ok(self.node(Expr::Lambda { params, body: Box::new(body) }, start))
    }

    /// `x ~> body`
    fn short_lambda(&mut self) -> Result<Ast, SyntaxError> {
        let start = self.span();
        let param = self.expect_ident()?;
        self.expect_punct("~>")?;
        let body = self.expr()?;
        Ok(self.node(Expr::Lambda { params: vec![param], body: Box::new(body) }, start))
    }

    fn guard(&mut self, kind: GuardKind) -> Result<Ast, SyntaxError> {
        let start = self.span();
        self.bump();
        let mut conditions = Vec::new();
        loop {
            conditions.push(self.condition()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_keyword("in")?;
        let body = self.expr()?;
        Ok(self.node(Expr::Guard { kind, conditions, body: Box::new(body) }, start))
    }

    /// `[label:] test`
    fn condition(&mut self) -> Result<Condition, SyntaxError> {
        let labeled = matches!(self.peek(), TokenKind::Ident(_) | TokenKind::Str(_))
            && matches!(self.peek_at(1), TokenKind::Punct(":"));
        let label = if labeled {
            match self.bump().kind {
                TokenKind::Ident(s) | TokenKind::Str(s) => {
                    self.bump();
                    Some(s)
                }
                _ => None,
            }
        } else {
            None
        };
        Ok(Condition { label, test: self.expr()? })
    }

    // ------------------------------ Selectors ----------------------------- //

    fn starts_selector(&self, name: &str) -> bool {
        if !name.starts_with(|c: char| c.is_ascii_uppercase()) {
            return false;
        }
        match self.peek_at(1) {
            TokenKind::Punct("(" | "{") => true,
            TokenKind::Punct("?" | "??" | "!") => matches!(self.peek_at(2), TokenKind::Punct("(")),
            _ => false,
        }
    }

    /// `Type[{constraints}][?|??|!](args)`
    fn selector(&mut self) -> Result<Ast, SyntaxError> {
        let start = self.span();
        let type_name = self.expect_ident()?;

        let mut constraints = Vec::new();
        if self.eat_punct("{") {
            while !self.eat_punct("}") {
                constraints.push(self.condition()?);
                if !self.eat_punct(",") {
                    self.expect_punct("}")?;
                    break;
                }
            }
        }

        let policy = if self.eat_punct("??") {
            SelectPolicy::OrNull
        } else if self.eat_punct("?") {
            SelectPolicy::Check
        } else if self.eat_punct("!") {
            SelectPolicy::Assert
        } else {
            SelectPolicy::Raise
        };

        let args_at = self.span();
        self.expect_punct("(")?;
        let args = self.args(")")?;
        let arity_ok = match policy {
            SelectPolicy::Assert => matches!(args.len(), 1 | 2),
            _ => args.len() == 1,
        };
        if !arity_ok {
            return Err(SyntaxError::at(
                self.source,
                args_at.start,
                format!("`{type_name}` selector takes one value, found {} arguments", args.len()),
            ));
        }

        Ok(self.node(Expr::Select { type_name, policy, constraints, args }, start))
    }
}
