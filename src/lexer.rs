//! Lexical analysis: source text → flat token vector terminated by `Eof`.
//!
//! Temporal literals are validated here so a malformed `D2024-02-30` or
//! `P1DT` is a positioned syntax error rather than something a target has to
//! reject later.
use chrono::{NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::Span;
use crate::error::SyntaxError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    Date(String),
    DateTime(String),
    Duration(String),
    Ident(String),
    Keyword(&'static str),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

pub const KEYWORDS: &[&str] = &[
    "let", "in", "fn", "if", "then", "else", "and", "or", "not",
    "true", "false", "null", "guard", "check",
];

// Multi-character punctuators first so `|>` never lexes as `|` then `>`.
const PUNCTUATORS: &[&str] = &[
    "|>", "~>", "==", "!=", "<=", ">=", "??",
    "+", "-", "*", "/", "%", "^", "<", ">", "(", ")", "[", "]", "{", "}",
    ",", ":", ".", "|", "?", "!", "=",
];

static DATE_RX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^D(\d{4}-\d{2}-\d{2})(T(\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?)(Z|[+-]\d{2}:\d{2})?)?").unwrap()
});

static DURATION_RX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^P(?:\d+Y)?(?:\d+M)?(?:\d+W)?(?:\d+D)?(?:T(?:\d+H)?(?:\d+M)?(?:\d+(?:\.\d+)?S)?)?").unwrap()
});

/// Lex the input into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = Vec::new();
    let bytes = source.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c == b'#' {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }

        let start = i;

        if c.is_ascii_digit() {
            let (kind, end) = lex_number(source, start)?;
            tokens.push(Token { kind, span: Span::new(start, end) });
            i = end;
            continue;
        }

        if c == b'\'' || c == b'"' {
            let (value, end) = lex_string(source, start)?;
            tokens.push(Token { kind: TokenKind::Str(value), span: Span::new(start, end) });
            i = end;
            continue;
        }

        if c == b'D' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
            let (kind, end) = lex_temporal(source, start)?;
            tokens.push(Token { kind, span: Span::new(start, end) });
            i = end;
            continue;
        }

        if c == b'P' && starts_duration(&bytes[i + 1..]) {
            let (kind, end) = lex_duration(source, start)?;
            tokens.push(Token { kind, span: Span::new(start, end) });
            i = end;
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' {
            while i < bytes.len() && is_ident_byte(bytes[i]) {
                i += 1;
            }
            let word = &source[start..i];
            let kind = match KEYWORDS.iter().find(|k| **k == word) {
                Some(k) => TokenKind::Keyword(*k),
                None => TokenKind::Ident(word.to_string()),
            };
            tokens.push(Token { kind, span: Span::new(start, i) });
            continue;
        }

        if let Some(p) = PUNCTUATORS.iter().find(|p| source[i..].starts_with(**p)) {
            i += p.len();
            tokens.push(Token { kind: TokenKind::Punct(*p), span: Span::new(start, i) });
            continue;
        }

        let invalid = source[i..].chars().next().unwrap_or('\0');
        return Err(SyntaxError::at(source, i, format!("invalid character `{invalid}`")));
    }

    tokens.push(Token { kind: TokenKind::Eof, span: Span::new(source.len(), source.len()) });
    Ok(tokens)
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

// `P1D`, `PT2H`; but not `Price` or `PT` on its own.
fn starts_duration(rest: &[u8]) -> bool {
    match rest {
        [d, ..] if d.is_ascii_digit() => true,
        [b'T', d, ..] if d.is_ascii_digit() => true,
        _ => false,
    }
}

fn lex_number(source: &str, start: usize) -> Result<(TokenKind, usize), SyntaxError> {
    let bytes = source.as_bytes();
    let mut i = start;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }

    let mut is_float = false;
    if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
        is_float = true;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            is_float = true;
            i = j;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    if i < bytes.len() && is_ident_byte(bytes[i]) {
        return Err(SyntaxError::at(source, i, "invalid numeric literal"));
    }

    let text = &source[start..i];
    let kind = if is_float {
        let value = text
            .parse::<f64>()
            .map_err(|err| SyntaxError::at(source, start, format!("invalid float `{text}`: {err}")))?;
        if !value.is_finite() {
            return Err(SyntaxError::at(source, start, format!("float `{text}` is out of range")));
        }
        TokenKind::Float(value)
    } else {
        let value = text
            .parse::<i64>()
            .map_err(|err| SyntaxError::at(source, start, format!("invalid integer `{text}`: {err}")))?;
        TokenKind::Int(value)
    };
    Ok((kind, i))
}

fn lex_string(source: &str, start: usize) -> Result<(String, usize), SyntaxError> {
    let mut chars = source[start..].char_indices();
    let (_, quote) = chars.next().unwrap_or((0, '\''));
    let mut out = String::new();

    while let Some((rel, c)) = chars.next() {
        let at = start + rel;
        match c {
            c if c == quote => return Ok((out, at + c.len_utf8())),
            '\\' => {
                let Some((_, e)) = chars.next() else { break };
                match e {
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'u' => out.push(lex_unicode_escape(source, at, &mut chars)?),
                    other => {
                        return Err(SyntaxError::at(source, at, format!("unknown escape `\\{other}`")));
                    }
                }
            }
            c => out.push(c),
        }
    }

    Err(SyntaxError::at(source, start, "unterminated string literal"))
}

fn lex_unicode_escape(
    source: &str,
    at: usize,
    chars: &mut std::str::CharIndices<'_>,
) -> Result<char, SyntaxError> {
    let bad = || SyntaxError::at(source, at, "invalid unicode escape, expected `\\u{XXXX}`");
    if chars.next().map(|(_, c)| c) != Some('{') {
        return Err(bad());
    }
    let mut hex = String::new();
    loop {
        match chars.next() {
            Some((_, '}')) => break,
            Some((_, h)) if h.is_ascii_hexdigit() && hex.len() < 6 => hex.push(h),
            _ => return Err(bad()),
        }
    }
    u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32).ok_or_else(bad)
}

fn lex_temporal(source: &str, start: usize) -> Result<(TokenKind, usize), SyntaxError> {
    let rest = &source[start..];
    let caps = DATE_RX
        .captures(rest)
        .ok_or_else(|| SyntaxError::at(source, start, "invalid date literal, expected `DYYYY-MM-DD`"))?;
    let whole = caps.get(0).map_or("", |m| m.as_str());
    let end = start + whole.len();
    if source.as_bytes().get(end).is_some_and(|b| is_ident_byte(*b)) {
        return Err(SyntaxError::at(source, end, "invalid date literal"));
    }

    let date = caps.get(1).map_or("", |m| m.as_str());
    if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
        return Err(SyntaxError::at(source, start, format!("invalid calendar date `{date}`")));
    }

    match caps.get(3) {
        None => Ok((TokenKind::Date(date.to_string()), end)),
        Some(time) => {
            let time = time.as_str();
            let valid = NaiveTime::parse_from_str(time, "%H:%M:%S%.f").is_ok()
                || NaiveTime::parse_from_str(time, "%H:%M").is_ok();
            if !valid {
                return Err(SyntaxError::at(source, start, format!("invalid time of day `{time}`")));
            }
            Ok((TokenKind::DateTime(whole[1..].to_string()), end))
        }
    }
}

fn lex_duration(source: &str, start: usize) -> Result<(TokenKind, usize), SyntaxError> {
    let rest = &source[start..];
    let whole = DURATION_RX.find(rest).map_or("", |m| m.as_str());
    let end = start + whole.len();
    let dangling = whole.ends_with('T')
        || source.as_bytes().get(end).is_some_and(|b| is_ident_byte(*b) || *b == b'.');
    if whole.len() < 3 || dangling {
        return Err(SyntaxError::at(source, start, "invalid ISO-8601 duration literal"));
    }
    Ok((TokenKind::Duration(whole.to_string()), end))
}
