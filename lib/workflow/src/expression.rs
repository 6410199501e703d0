//! Condition expressions.
//!
//! A small boolean language evaluated against a [`VariableContext`]:
//!
//! ```text
//! input.priority == "high" && (fetch.count > 0 || !input.dry_run)
//! fetch.body.tags contains "urgent"
//! ```
//!
//! Operators, loosest binding first: `||`, `&&`, `!`, then the comparisons
//! `== != > >= < <= contains`. Operands are literals (numbers, quoted
//! strings, `true`, `false`, `null`), dotted variable paths, or parenthesized
//! sub-expressions. A path that does not resolve evaluates to `null`.
//!
//! Expressions are parsed once when a plan is built and evaluated on every
//! run.

use crate::context::VariableContext;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;
use std::iter::Peekable;
use std::str::{CharIndices, FromStr};

/// Error returned for malformed expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Byte offset of the offending input.
    pub position: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.position)
    }
}

impl std::error::Error for ParseError {}

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    /// Parses an expression.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] locating the first problem.
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: source.len(),
            depth: 0,
        };
        let root = parser.or()?;
        if let Some((token, position)) = parser.peek_with_position() {
            return Err(ParseError {
                position,
                message: format!("unexpected {token}"),
            });
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// Returns the source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the expression to a boolean.
    ///
    /// Non-boolean results are converted by truthiness: `null`, `0`, `""`,
    /// `[]` and `{}` are false.
    #[must_use]
    pub fn evaluate(&self, variables: &VariableContext) -> bool {
        truthy(&self.root.eval(variables))
    }
}

impl FromStr for Expression {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(JsonValue),
    Path(Vec<String>),
    Not(Box<Expr>),
    All(Vec<Expr>),
    Any(Vec<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, variables: &VariableContext) -> JsonValue {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Path(segments) => variables
                .resolve_segments(segments)
                .cloned()
                .unwrap_or(JsonValue::Null),
            Self::Not(inner) => JsonValue::Bool(!truthy(&inner.eval(variables))),
            Self::All(terms) => JsonValue::Bool(terms.iter().all(|t| truthy(&t.eval(variables)))),
            Self::Any(terms) => JsonValue::Bool(terms.iter().any(|t| truthy(&t.eval(variables)))),
            Self::Compare(op, left, right) => {
                let left = left.eval(variables);
                let right = right.eval(variables);
                JsonValue::Bool(compare(*op, &left, &right))
            }
        }
    }
}

fn compare(op: CompareOp, left: &JsonValue, right: &JsonValue) -> bool {
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !values_equal(left, right),
        CompareOp::Gt => order(left, right) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(
            order(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        CompareOp::Lt => order(left, right) == Some(Ordering::Less),
        CompareOp::Le => matches!(order(left, right), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Contains => match (left, right) {
            (JsonValue::String(haystack), JsonValue::String(needle)) => haystack.contains(needle),
            (JsonValue::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
            (JsonValue::Object(map), JsonValue::String(key)) => map.contains_key(key),
            _ => false,
        },
    }
}

/// Equality that treats `1` and `1.0` as the same number.
fn values_equal(left: &JsonValue, right: &JsonValue) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn order(left: &JsonValue, right: &JsonValue) -> Option<Ordering> {
    match (left, right) {
        (JsonValue::Number(l), JsonValue::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (JsonValue::String(l), JsonValue::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Compare(CompareOp),
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "identifier `{name}`"),
            Self::Number(n) => write!(f, "number `{n}`"),
            Self::Str(s) => write!(f, "string \"{s}\""),
            Self::Compare(op) => {
                let symbol = match op {
                    CompareOp::Eq => "==",
                    CompareOp::Ne => "!=",
                    CompareOp::Gt => ">",
                    CompareOp::Ge => ">=",
                    CompareOp::Lt => "<",
                    CompareOp::Le => "<=",
                    CompareOp::Contains => "contains",
                };
                write!(f, "`{symbol}`")
            }
            Self::AndAnd => f.write_str("`&&`"),
            Self::OrOr => f.write_str("`||`"),
            Self::Bang => f.write_str("`!`"),
            Self::LParen => f.write_str("`(`"),
            Self::RParen => f.write_str("`)`"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        let error = |message: &str| ParseError {
            position: start,
            message: message.to_string(),
        };
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' => {
                chars.next();
                let token = if c == '(' { Token::LParen } else { Token::RParen };
                tokens.push((token, start));
            }
            '=' | '!' | '>' | '<' | '&' | '|' => {
                chars.next();
                let token = match c {
                    '=' if next_is(&mut chars, '=') => Token::Compare(CompareOp::Eq),
                    '!' if next_is(&mut chars, '=') => Token::Compare(CompareOp::Ne),
                    '!' => Token::Bang,
                    '>' if next_is(&mut chars, '=') => Token::Compare(CompareOp::Ge),
                    '>' => Token::Compare(CompareOp::Gt),
                    '<' if next_is(&mut chars, '=') => Token::Compare(CompareOp::Le),
                    '<' => Token::Compare(CompareOp::Lt),
                    '&' if next_is(&mut chars, '&') => Token::AndAnd,
                    '|' if next_is(&mut chars, '|') => Token::OrOr,
                    _ => return Err(error(&format!("unexpected character `{c}`"))),
                };
                tokens.push((token, start));
            }
            '"' | '\'' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, next)) = chars.next() {
                    match next {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => value.push(escaped),
                            None => break,
                        },
                        next if next == c => {
                            closed = true;
                            break;
                        }
                        next => value.push(next),
                    }
                }
                if !closed {
                    return Err(error("unterminated string"));
                }
                tokens.push((Token::Str(value), start));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut end = start;
                while let Some(&(index, next)) = chars.peek() {
                    let sign = next == '-' && index == start;
                    if next.is_ascii_digit() || next == '.' || sign {
                        end = index + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let text = &source[start..end];
                let number = text
                    .parse::<f64>()
                    .map_err(|_| error(&format!("invalid number `{text}`")))?;
                tokens.push((Token::Number(number), start));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some(&(index, next)) = chars.peek() {
                    if next.is_alphanumeric() || matches!(next, '_' | '-' | '.') {
                        end = index + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let word = &source[start..end];
                let token = if word == "contains" {
                    Token::Compare(CompareOp::Contains)
                } else {
                    Token::Ident(word.to_string())
                };
                tokens.push((token, start));
            }
            other => return Err(error(&format!("unexpected character `{other}`"))),
        }
    }

    Ok(tokens)
}

fn next_is(chars: &mut Peekable<CharIndices<'_>>, expected: char) -> bool {
    chars.next_if(|&(_, next)| next == expected).is_some()
}

/// Deepest nesting of `(` and `!` the parser accepts.
const MAX_NESTING: usize = 128;

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn peek_with_position(&self) -> Option<(&Token, usize)> {
        self.tokens
            .get(self.pos)
            .map(|(token, position)| (token, *position))
    }

    fn advance(&mut self) -> Option<(Token, usize)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Runs `f` one nesting level deeper, failing past [`MAX_NESTING`].
    fn nested(
        &mut self,
        position: usize,
        f: impl FnOnce(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError {
                position,
                message: "expression nested too deeply".to_string(),
            });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn or(&mut self) -> Result<Expr, ParseError> {
        let mut terms = vec![self.and()?];
        while self.peek() == Some(&Token::OrOr) {
            self.pos += 1;
            terms.push(self.and()?);
        }
        Ok(if terms.len() == 1 {
            terms.swap_remove(0)
        } else {
            Expr::Any(terms)
        })
    }

    fn and(&mut self) -> Result<Expr, ParseError> {
        let mut terms = vec![self.unary()?];
        while self.peek() == Some(&Token::AndAnd) {
            self.pos += 1;
            terms.push(self.unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.swap_remove(0)
        } else {
            Expr::All(terms)
        })
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if let Some((Token::Bang, position)) = self.peek_with_position() {
            self.pos += 1;
            return self.nested(position, |parser| Ok(Expr::Not(Box::new(parser.unary()?))));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.primary()?;
        if let Some(Token::Compare(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.primary()?;
            return Ok(Expr::Compare(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let Some((token, position)) = self.advance() else {
            return Err(ParseError {
                position: self.end,
                message: "unexpected end of expression".to_string(),
            });
        };
        match token {
            Token::Number(n) => Ok(Expr::Literal(JsonValue::from(n))),
            Token::Str(s) => Ok(Expr::Literal(JsonValue::String(s))),
            Token::Ident(word) => Ok(match word.as_str() {
                "true" => Expr::Literal(JsonValue::Bool(true)),
                "false" => Expr::Literal(JsonValue::Bool(false)),
                "null" => Expr::Literal(JsonValue::Null),
                _ => Expr::Path(word.split('.').map(str::to_string).collect()),
            }),
            Token::LParen => {
                let inner = self.nested(position, Self::or)?;
                match self.advance() {
                    Some((Token::RParen, _)) => Ok(inner),
                    Some((other, position)) => Err(ParseError {
                        position,
                        message: format!("expected `)`, found {other}"),
                    }),
                    None => Err(ParseError {
                        position: self.end,
                        message: "missing `)`".to_string(),
                    }),
                }
            }
            other => Err(ParseError {
                position,
                message: format!("unexpected {other}"),
            }),
        }
    }
}
