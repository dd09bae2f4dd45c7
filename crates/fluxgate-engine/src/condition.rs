//! Boolean expression evaluation for `condition` nodes.
//!
//! Conditions mix `${path}` placeholders with comparison and logical
//! operators: `"${user.role} === 'admin' && ${order.total} > 100"`. Each
//! placeholder is resolved against the context *before* parsing and enters
//! the token stream as a hole carrying the raw value — so `${name} ===
//! 'admin'` compares the actual value, never a concatenated string. No
//! string is ever evaluated as code.
//!
//! Accepted grammar:
//! - comparisons: `===`, `!==` (`==`/`!=` accepted as aliases), `>`, `>=`,
//!   `<`, `<=`
//! - logical: `!`, `&&`, `||`; grouping with parentheses
//! - literals: number, single- or double-quoted string, `true`, `false`,
//!   `null`
//!
//! A bare `${path}` with no operators collapses to truthiness. A
//! placeholder whose path is missing is *undefined*: falsy, and strictly
//! unequal to `null`.

use serde_json::Value;
use thiserror::Error;

use crate::context::FlowContext;
use crate::interpolate::{resolve_str, truthy};

/// Errors from condition parsing.
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("parse error: {message}")]
    Parse { message: String },
}

fn parse_err(message: impl Into<String>) -> ConditionError {
    ConditionError::Parse {
        message: message.into(),
    }
}

/// Evaluate a condition expression against the context.
///
/// Parse or evaluation failure is not fatal: it logs a warning and falls
/// back to the truthiness of the interpolated expression.
pub fn evaluate_condition(expr: &str, ctx: &FlowContext) -> bool {
    match evaluate(expr, ctx) {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(
                expression = expr,
                error = %e,
                "condition did not parse, falling back to truthiness"
            );
            truthy(&resolve_str(expr, ctx))
        }
    }
}

/// Strict evaluation: errors instead of falling back.
pub fn evaluate(expr: &str, ctx: &FlowContext) -> Result<bool, ConditionError> {
    let tokens = tokenize(expr, ctx)?;
    if tokens.is_empty() {
        return Err(parse_err("empty expression"));
    }
    let (value, rest) = parse_or(&tokens)?;
    if let Some(tok) = rest.first() {
        return Err(parse_err(format!("unexpected token: {tok:?}")));
    }
    Ok(value.as_bool())
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// A pre-resolved `${path}` value; `None` when the path was missing.
    Hole(Option<Value>),
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    Eq,     // === or ==
    Ne,     // !== or !=
    Gt,     // >
    Lt,     // <
    Ge,     // >=
    Le,     // <=
    And,    // &&
    Or,     // ||
    Not,    // !
    LParen, // (
    RParen, // )
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

fn tokenize(input: &str, ctx: &FlowContext) -> Result<Vec<Token>, ConditionError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '$' if peek(&chars, i + 1) == Some('{') => {
                i += 2;
                let start = i;
                while i < chars.len() && chars[i] != '}' {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(parse_err("unterminated ${ expression"));
                }
                let path: String = chars[start..i].iter().collect();
                tokens.push(Token::Hole(ctx.lookup(path.trim())));
                i += 1; // closing brace
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' if peek(&chars, i + 1) == Some('=') => {
                tokens.push(Token::Eq);
                i += if peek(&chars, i + 2) == Some('=') { 3 } else { 2 };
            }
            '!' if peek(&chars, i + 1) == Some('=') => {
                tokens.push(Token::Ne);
                i += if peek(&chars, i + 2) == Some('=') { 3 } else { 2 };
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' if peek(&chars, i + 1) == Some('=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '<' if peek(&chars, i + 1) == Some('=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '&' if peek(&chars, i + 1) == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if peek(&chars, i + 1) == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '"' | '\'' => {
                let quote = chars[i];
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != quote {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(parse_err("unterminated string literal"));
                }
                let s: String = chars[start..i].iter().collect();
                tokens.push(Token::Str(s));
                i += 1; // closing quote
            }
            c if c.is_ascii_digit()
                || (c == '-' && peek(&chars, i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let start = i;
                if c == '-' {
                    i += 1;
                }
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let num_str: String = chars[start..i].iter().collect();
                let num: f64 = num_str
                    .parse()
                    .map_err(|_| parse_err(format!("invalid number: {num_str}")))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                match ident.as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    "null" => tokens.push(Token::Null),
                    other => {
                        return Err(parse_err(format!("unknown identifier: {other}")));
                    }
                }
            }
            other => {
                return Err(parse_err(format!("unexpected character: {other}")));
            }
        }
    }
    Ok(tokens)
}

fn peek(chars: &[char], idx: usize) -> Option<char> {
    chars.get(idx).copied()
}

// ---------------------------------------------------------------------------
// Evaluated value (internal)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum EvalValue {
    Undefined,
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    /// Arrays and objects from holes.
    Json(Value),
}

impl EvalValue {
    fn from_hole(value: Option<Value>) -> Self {
        match value {
            None => Self::Undefined,
            Some(Value::Null) => Self::Null,
            Some(Value::Bool(b)) => Self::Bool(b),
            Some(Value::Number(n)) => Self::Num(n.as_f64().unwrap_or(0.0)),
            Some(Value::String(s)) => Self::Str(s),
            Some(composite) => Self::Json(composite),
        }
    }

    fn as_bool(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Num(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            Self::Json(_) => true,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Num(n) => Some(*n),
            _ => None,
        }
    }

    fn as_str_value(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Recursive descent parser — precedence: ! > comparison > && > ||
// ---------------------------------------------------------------------------

type ParseResult<'a> = Result<(EvalValue, &'a [Token]), ConditionError>;

/// or = and ( "||" and )*
fn parse_or(tokens: &[Token]) -> ParseResult<'_> {
    let (mut left, mut rest) = parse_and(tokens)?;
    while rest.first() == Some(&Token::Or) {
        let (right, r) = parse_and(&rest[1..])?;
        left = EvalValue::Bool(left.as_bool() || right.as_bool());
        rest = r;
    }
    Ok((left, rest))
}

/// and = not ( "&&" not )*
fn parse_and(tokens: &[Token]) -> ParseResult<'_> {
    let (mut left, mut rest) = parse_not(tokens)?;
    while rest.first() == Some(&Token::And) {
        let (right, r) = parse_not(&rest[1..])?;
        left = EvalValue::Bool(left.as_bool() && right.as_bool());
        rest = r;
    }
    Ok((left, rest))
}

/// not = "!"* comparison
fn parse_not(tokens: &[Token]) -> ParseResult<'_> {
    if tokens.first() == Some(&Token::Not) {
        let (value, rest) = parse_not(&tokens[1..])?;
        return Ok((EvalValue::Bool(!value.as_bool()), rest));
    }
    parse_comparison(tokens)
}

/// comparison = atom ( ("===" | "!==" | ">" | ">=" | "<" | "<=") atom )?
fn parse_comparison(tokens: &[Token]) -> ParseResult<'_> {
    let (left, rest) = parse_atom(tokens)?;
    let op = match rest.first() {
        Some(Token::Eq) => CompOp::Eq,
        Some(Token::Ne) => CompOp::Ne,
        Some(Token::Gt) => CompOp::Gt,
        Some(Token::Lt) => CompOp::Lt,
        Some(Token::Ge) => CompOp::Ge,
        Some(Token::Le) => CompOp::Le,
        _ => return Ok((left, rest)),
    };
    let (right, rest) = parse_atom(&rest[1..])?;
    Ok((EvalValue::Bool(compare(&left, &right, op)), rest))
}

/// atom = literal | hole | "(" or ")"
fn parse_atom(tokens: &[Token]) -> ParseResult<'_> {
    match tokens.first() {
        None => Err(parse_err("unexpected end of expression")),
        Some(Token::Hole(v)) => Ok((EvalValue::from_hole(v.clone()), &tokens[1..])),
        Some(Token::Str(s)) => Ok((EvalValue::Str(s.clone()), &tokens[1..])),
        Some(Token::Num(n)) => Ok((EvalValue::Num(*n), &tokens[1..])),
        Some(Token::Bool(b)) => Ok((EvalValue::Bool(*b), &tokens[1..])),
        Some(Token::Null) => Ok((EvalValue::Null, &tokens[1..])),
        Some(Token::LParen) => {
            let (value, rest) = parse_or(&tokens[1..])?;
            if rest.first() != Some(&Token::RParen) {
                return Err(parse_err("expected ')'"));
            }
            Ok((value, &rest[1..]))
        }
        Some(other) => Err(parse_err(format!("expected value, got {other:?}"))),
    }
}

enum CompOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

fn compare(left: &EvalValue, right: &EvalValue, op: CompOp) -> bool {
    use EvalValue::*;

    // undefined and null: equal only to themselves, never ordered.
    let left_missing = matches!(left, Undefined | Null);
    let right_missing = matches!(right, Undefined | Null);
    if left_missing || right_missing {
        let same = matches!((left, right), (Undefined, Undefined) | (Null, Null));
        return match op {
            CompOp::Eq => same,
            CompOp::Ne => !same,
            _ => false,
        };
    }

    // Numeric comparison with f64 coercion.
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return match op {
            CompOp::Eq => (l - r).abs() < f64::EPSILON,
            CompOp::Ne => (l - r).abs() >= f64::EPSILON,
            CompOp::Gt => l > r,
            CompOp::Lt => l < r,
            CompOp::Ge => l >= r || (l - r).abs() < f64::EPSILON,
            CompOp::Le => l <= r || (l - r).abs() < f64::EPSILON,
        };
    }

    // String comparison.
    if let (Some(l), Some(r)) = (left.as_str_value(), right.as_str_value()) {
        return match op {
            CompOp::Eq => l == r,
            CompOp::Ne => l != r,
            CompOp::Gt => l > r,
            CompOp::Lt => l < r,
            CompOp::Ge => l >= r,
            CompOp::Le => l <= r,
        };
    }

    // Bool equality.
    if let (Bool(l), Bool(r)) = (left, right) {
        return match op {
            CompOp::Eq => l == r,
            CompOp::Ne => l != r,
            _ => false,
        };
    }

    // Composite values: structural equality, no ordering.
    if let (Json(l), Json(r)) = (left, right) {
        return match op {
            CompOp::Eq => l == r,
            CompOp::Ne => l != r,
            _ => false,
        };
    }

    // Type mismatch: equal never, unequal always, ordered never.
    matches!(op, CompOp::Ne)
}
