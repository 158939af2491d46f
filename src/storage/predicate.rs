//! SQL-like Predicates
//!
//! Server-evaluated filters over map values, e.g. `age >= 18 AND name LIKE 'Jo%'`.
//!
//! Attribute paths are dot-separated field names resolved against the stored JSON
//! value; `this` names the value itself. Keywords are case-insensitive.
//!
//! Queries arrive from untrusted headers, so parenthesis nesting and the number of
//! comparisons are capped. `AND`/`OR` chains are kept flat and `NOT` chains are
//! folded, so evaluation depth only grows with parentheses.

use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

/// Deepest parenthesis nesting a query may use.
pub const MAX_NESTING: usize = 64;
/// Most comparisons a single query may contain.
pub const MAX_TERMS: usize = 1024;

/// Why a query was rejected. Offsets count bytes from the start of the query.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredicateError {
    #[error("query is empty")]
    Empty,
    #[error("unterminated string starting at offset {position}")]
    UnterminatedString { position: usize },
    #[error("unexpected character '{found}' at offset {position}")]
    UnexpectedChar { found: char, position: usize },
    #[error("invalid number '{text}'")]
    InvalidNumber { text: String },
    #[error("expected {expected}, found '{found}'")]
    UnexpectedToken { expected: &'static str, found: String },
    #[error("expected {expected}, found end of query")]
    UnexpectedEnd { expected: &'static str },
    #[error("invalid LIKE pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("query nests parentheses deeper than {limit} levels")]
    TooDeep { limit: usize },
    #[error("query has more than {limit} comparisons")]
    TooManyTerms { limit: usize },
}

/// A parsed, reusable filter.
///
/// Attributes are dotted paths into JSON object values.
#[derive(Debug, Clone)]
pub struct Predicate {
    source: String,
    expr: Expr,
}

impl Predicate {
    /// Parses a query. Blank input is `PredicateError::Empty`.
    pub fn parse(query: &str) -> Result<Self, PredicateError> {
        let tokens = tokenize(query)?;
        if tokens.is_empty() {
            return Err(PredicateError::Empty);
        }

        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            terms: 0,
        };
        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(PredicateError::UnexpectedToken {
                expected: "end of query",
                found: token.to_string(),
            });
        }

        Ok(Self {
            source: query.trim().to_string(),
            expr,
        })
    }

    /// True when `value` satisfies the filter. Missing attributes never match a comparison.
    pub fn matches(&self, value: &Value) -> bool {
        self.expr.eval(value)
    }

    /// The trimmed source text, as sent to remote grid nodes.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// --- Lexer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    Cmp(CmpOp),
    LParen,
    RParen,
    Comma,
    Dot,
}

impl Token {
    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Ident(word) if word.eq_ignore_ascii_case(keyword))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(word) => f.write_str(word),
            Token::Str(text) => write!(f, "'{}'", text),
            Token::Number(n) => write!(f, "{}", n),
            Token::Cmp(op) => f.write_str(op.symbol()),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Comma => f.write_str(","),
            Token::Dot => f.write_str("."),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
        }
    }
}

fn tokenize(query: &str) -> Result<Vec<Token>, PredicateError> {
    let mut tokens = Vec::new();
    let mut chars = query.char_indices().peekable();

    while let Some(&(position, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | ',' | '.' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    _ => Token::Dot,
                });
            }
            '\'' => tokens.push(Token::Str(lex_string(&mut chars, position)?)),
            '=' | '!' | '<' | '>' => tokens.push(Token::Cmp(lex_operator(&mut chars, position)?)),
            c if c.is_ascii_digit() || c == '-' => tokens.push(lex_number(query, &mut chars)?),
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut word = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if !(c.is_alphanumeric() || c == '_' || c == '$') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Ident(word));
            }
            found => return Err(PredicateError::UnexpectedChar { found, position }),
        }
    }

    Ok(tokens)
}

/// Single-quoted string; a doubled quote (`''`) is a literal quote.
fn lex_string(chars: &mut Peekable<CharIndices>, start: usize) -> Result<String, PredicateError> {
    chars.next();
    let mut text = String::new();
    loop {
        match chars.next() {
            Some((_, '\'')) => {
                if matches!(chars.peek(), Some((_, '\''))) {
                    chars.next();
                    text.push('\'');
                } else {
                    return Ok(text);
                }
            }
            Some((_, c)) => text.push(c),
            None => return Err(PredicateError::UnterminatedString { position: start }),
        }
    }
}

fn lex_operator(chars: &mut Peekable<CharIndices>, position: usize) -> Result<CmpOp, PredicateError> {
    let Some((_, first)) = chars.next() else {
        return Err(PredicateError::UnexpectedEnd { expected: "operator" });
    };
    let second = chars.peek().map(|&(_, c)| c);

    let (op, consumed_second) = match (first, second) {
        ('=', Some('=')) => (CmpOp::Eq, true),
        ('=', _) => (CmpOp::Eq, false),
        ('!', Some('=')) => (CmpOp::Ne, true),
        ('<', Some('>')) => (CmpOp::Ne, true),
        ('<', Some('=')) => (CmpOp::Le, true),
        ('<', _) => (CmpOp::Lt, false),
        ('>', Some('=')) => (CmpOp::Ge, true),
        ('>', _) => (CmpOp::Gt, false),
        (found, _) => return Err(PredicateError::UnexpectedChar { found, position }),
    };
    if consumed_second {
        chars.next();
    }
    Ok(op)
}

fn lex_number(query: &str, chars: &mut Peekable<CharIndices>) -> Result<Token, PredicateError> {
    let Some((start, first)) = chars.next() else {
        return Err(PredicateError::UnexpectedEnd { expected: "number" });
    };

    let mut end = start + first.len_utf8();
    // A sign is part of the number only right after the exponent marker.
    let mut previous = first;
    while let Some(&(position, c)) = chars.peek() {
        let exponent_sign = (c == '+' || c == '-') && (previous == 'e' || previous == 'E');
        if !(c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || exponent_sign) {
            break;
        }
        end = position + c.len_utf8();
        previous = c;
        chars.next();
    }

    let text = &query[start..end];
    text.parse::<f64>()
        .map(Token::Number)
        .map_err(|_| PredicateError::InvalidNumber {
            text: text.to_string(),
        })
}

// --- Syntax tree ---

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone)]
enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Compare {
        path: Vec<String>,
        op: CmpOp,
        literal: Literal,
    },
    Like {
        path: Vec<String>,
        pattern: Regex,
        negated: bool,
    },
    In {
        path: Vec<String>,
        items: Vec<Literal>,
        negated: bool,
    },
    Between {
        path: Vec<String>,
        low: Literal,
        high: Literal,
        negated: bool,
    },
    IsNull {
        path: Vec<String>,
        negated: bool,
    },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    terms: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self, expected: &'static str) -> Result<Token, PredicateError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(PredicateError::UnexpectedEnd { expected })?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(keyword)) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect(&mut self, token: Token, expected: &'static str) -> Result<(), PredicateError> {
        let found = self.next(expected)?;
        if found != token {
            return Err(PredicateError::UnexpectedToken {
                expected,
                found: found.to_string(),
            });
        }
        Ok(())
    }

    fn expect_keyword(&mut self, keyword: &'static str) -> Result<(), PredicateError> {
        let found = self.next(keyword)?;
        if !found.is_keyword(keyword) {
            return Err(PredicateError::UnexpectedToken {
                expected: keyword,
                found: found.to_string(),
            });
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, PredicateError> {
        let mut terms = vec![self.parse_and()?];
        while self.eat_keyword("OR") {
            terms.push(self.parse_and()?);
        }
        Ok(flatten(terms, Expr::Or))
    }

    fn parse_and(&mut self) -> Result<Expr, PredicateError> {
        let mut terms = vec![self.parse_unary()?];
        while self.eat_keyword("AND") {
            terms.push(self.parse_unary()?);
        }
        Ok(flatten(terms, Expr::And))
    }

    fn parse_unary(&mut self) -> Result<Expr, PredicateError> {
        let mut negations = 0usize;
        while self.eat_keyword("NOT") {
            negations += 1;
        }

        let operand = if self.eat(&Token::LParen) {
            if self.depth == MAX_NESTING {
                return Err(PredicateError::TooDeep { limit: MAX_NESTING });
            }
            self.depth += 1;
            let inner = self.parse_or()?;
            self.depth -= 1;
            self.expect(Token::RParen, "')'")?;
            inner
        } else {
            self.parse_comparison()?
        };

        // NOT NOT x is x.
        if negations % 2 == 1 {
            return Ok(Expr::Not(Box::new(operand)));
        }
        Ok(operand)
    }

    fn parse_comparison(&mut self) -> Result<Expr, PredicateError> {
        self.terms += 1;
        if self.terms > MAX_TERMS {
            return Err(PredicateError::TooManyTerms { limit: MAX_TERMS });
        }
        let path = self.parse_path()?;

        if let Some(Token::Cmp(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let literal = self.parse_literal()?;
            return Ok(Expr::Compare { path, op, literal });
        }

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Expr::IsNull { path, negated });
        }

        let negated = self.eat_keyword("NOT");

        if self.eat_keyword("LIKE") {
            let pattern = like_pattern(&self.parse_string()?, false)?;
            return Ok(Expr::Like { path, pattern, negated });
        }
        if self.eat_keyword("ILIKE") {
            let pattern = like_pattern(&self.parse_string()?, true)?;
            return Ok(Expr::Like { path, pattern, negated });
        }
        if self.eat_keyword("IN") {
            self.expect(Token::LParen, "'('")?;
            let mut items = vec![self.parse_literal()?];
            while self.eat(&Token::Comma) {
                items.push(self.parse_literal()?);
            }
            self.expect(Token::RParen, "')'")?;
            return Ok(Expr::In { path, items, negated });
        }
        if self.eat_keyword("BETWEEN") {
            let low = self.parse_literal()?;
            self.expect_keyword("AND")?;
            let high = self.parse_literal()?;
            return Ok(Expr::Between {
                path,
                low,
                high,
                negated,
            });
        }

        match self.peek() {
            Some(token) => Err(PredicateError::UnexpectedToken {
                expected: "comparison operator",
                found: token.to_string(),
            }),
            None => Err(PredicateError::UnexpectedEnd {
                expected: "comparison operator",
            }),
        }
    }

    fn parse_path(&mut self) -> Result<Vec<String>, PredicateError> {
        let mut path = vec![self.parse_ident()?];
        while self.eat(&Token::Dot) {
            path.push(self.parse_ident()?);
        }
        Ok(path)
    }

    fn parse_ident(&mut self) -> Result<String, PredicateError> {
        match self.next("attribute")? {
            Token::Ident(word) => Ok(word),
            other => Err(PredicateError::UnexpectedToken {
                expected: "attribute",
                found: other.to_string(),
            }),
        }
    }

    fn parse_string(&mut self) -> Result<String, PredicateError> {
        match self.next("string")? {
            Token::Str(text) => Ok(text),
            other => Err(PredicateError::UnexpectedToken {
                expected: "string",
                found: other.to_string(),
            }),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal, PredicateError> {
        match self.next("literal")? {
            Token::Str(text) => Ok(Literal::Str(text)),
            Token::Number(n) => Ok(Literal::Num(n)),
            token if token.is_keyword("TRUE") => Ok(Literal::Bool(true)),
            token if token.is_keyword("FALSE") => Ok(Literal::Bool(false)),
            token if token.is_keyword("NULL") => Ok(Literal::Null),
            other => Err(PredicateError::UnexpectedToken {
                expected: "literal",
                found: other.to_string(),
            }),
        }
    }
}

fn flatten(mut terms: Vec<Expr>, combine: fn(Vec<Expr>) -> Expr) -> Expr {
    if terms.len() == 1
        && let Some(single) = terms.pop()
    {
        return single;
    }
    combine(terms)
}

/// Translates `%` and `_` wildcards into an anchored regex. A backslash
/// escapes the next character.
fn like_pattern(pattern: &str, case_insensitive: bool) -> Result<Regex, PredicateError> {
    let mut translated = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => translated.push_str(".*"),
            '_' => translated.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    translated.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => translated.push_str(&regex::escape(&other.to_string())),
        }
    }
    translated.push('$');

    Regex::new(&translated).map_err(|e| PredicateError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

// --- Evaluation ---

fn resolve<'a>(path: &[String], value: &'a Value) -> Option<&'a Value> {
    let segments = match path.first() {
        Some(first) if first.eq_ignore_ascii_case("this") => &path[1..],
        _ => path,
    };

    segments
        .iter()
        .try_fold(value, |current, segment| current.get(segment.as_str()))
}

fn is_null(attribute: Option<&Value>) -> bool {
    matches!(attribute, None | Some(Value::Null))
}

/// Orders an attribute against a literal, coercing string literals to the
/// attribute's type. `None` when the two cannot be compared.
fn ordering(attribute: &Value, literal: &Literal) -> Option<Ordering> {
    match (attribute, literal) {
        (Value::Number(n), Literal::Num(x)) => n.as_f64()?.partial_cmp(x),
        (Value::Number(n), Literal::Str(text)) => {
            n.as_f64()?.partial_cmp(&text.trim().parse::<f64>().ok()?)
        }
        (Value::String(s), Literal::Str(text)) => Some(s.as_str().cmp(text.as_str())),
        (Value::Bool(b), Literal::Bool(c)) => Some(b.cmp(c)),
        (Value::Bool(b), Literal::Str(text)) => {
            let c = if text.eq_ignore_ascii_case("true") {
                true
            } else if text.eq_ignore_ascii_case("false") {
                false
            } else {
                return None;
            };
            Some(b.cmp(&c))
        }
        _ => None,
    }
}

impl Expr {
    fn eval(&self, value: &Value) -> bool {
        match self {
            Expr::And(terms) => terms.iter().all(|term| term.eval(value)),
            Expr::Or(terms) => terms.iter().any(|term| term.eval(value)),
            Expr::Not(inner) => !inner.eval(value),
            Expr::Compare { path, op, literal } => {
                let attribute = resolve(path, value);
                if *literal == Literal::Null {
                    return match op {
                        CmpOp::Eq => is_null(attribute),
                        CmpOp::Ne => !is_null(attribute),
                        _ => false,
                    };
                }
                attribute
                    .and_then(|attr| ordering(attr, literal))
                    .is_some_and(|ord| op.accepts(ord))
            }
            Expr::Like {
                path,
                pattern,
                negated,
            } => match resolve(path, value) {
                Some(Value::String(text)) => pattern.is_match(text) != *negated,
                _ => false,
            },
            Expr::In {
                path,
                items,
                negated,
            } => match resolve(path, value) {
                Some(attr) if !attr.is_null() => {
                    let found = items
                        .iter()
                        .any(|item| ordering(attr, item) == Some(Ordering::Equal));
                    found != *negated
                }
                _ => false,
            },
            Expr::Between {
                path,
                low,
                high,
                negated,
            } => match resolve(path, value) {
                Some(attr) => {
                    let above = ordering(attr, low).map(|ord| ord != Ordering::Less);
                    let below = ordering(attr, high).map(|ord| ord != Ordering::Greater);
                    match (above, below) {
                        (Some(above), Some(below)) => (above && below) != *negated,
                        _ => false,
                    }
                }
                None => false,
            },
            Expr::IsNull { path, negated } => is_null(resolve(path, value)) != *negated,
        }
    }
}
