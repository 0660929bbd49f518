//! Expression language used by `set`, `if` and `for_each` steps
//!
//! Expressions are parsed once during validation and evaluated against an
//! [`Environment`] at run time.
//!
//! Supported syntax:
//! - Literals: `1`, `2.5`, `'text'`, `"text"`, `true`, `false`, `null`
//! - Lists and maps: `[1, 2]`, `{a: 1, "b": row.b}`
//! - Variable and field access: `x`, `row.answerKey`, `parsed.SCORE`, `items[0]`
//! - Arithmetic: `+ - * / %` (`+` concatenates when an operand is non-numeric text)
//! - Comparison: `== != < <= > >=`
//! - Boolean: `and`, `or`, `not` (also `&&`, `||`, `!`)

use super::env::Environment;
use super::error::RuntimeError;
use serde_json::{Map, Number, Value};
use std::iter::Peekable;
use std::str::CharIndices;
use thiserror::Error;

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 3,
            BinaryOp::Add | BinaryOp::Sub => 4,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 5,
        }
    }
}

/// Parse failure with a byte offset into the source
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message} at offset {offset}")]
pub struct SyntaxError {
    pub message: String,
    pub offset: usize,
}

impl SyntaxError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Sym(&'static str),
}

const SYMBOLS: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "(", ")", "[", "]", "{", "}", ",", ":", ".", "+", "-",
    "*", "/", "%", "<", ">", "!",
];

struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<(Token, usize)>, SyntaxError> {
        let mut tokens = Vec::new();

        while let Some(&(offset, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
            } else if c.is_ascii_digit() {
                tokens.push((self.number(offset)?, offset));
            } else if c == '\'' || c == '"' {
                tokens.push((self.string(offset, c)?, offset));
            } else if c.is_alphabetic() || c == '_' {
                tokens.push((self.ident(offset), offset));
            } else {
                let rest = &self.source[offset..];
                let sym = SYMBOLS
                    .iter()
                    .find(|s| rest.starts_with(**s))
                    .ok_or_else(|| SyntaxError::new(format!("unexpected character '{}'", c), offset))?;
                for _ in 0..sym.len() {
                    self.chars.next();
                }
                tokens.push((Token::Sym(*sym), offset));
            }
        }

        Ok(tokens)
    }

    fn number(&mut self, start: usize) -> Result<Token, SyntaxError> {
        let mut end = start;
        let mut seen_dot = false;

        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                end = i + 1;
                self.chars.next();
            } else if c == '.' && !seen_dot {
                // Only a fraction if a digit follows, so `items.0` style access still lexes
                let next_is_digit = self.source[i + 1..]
                    .chars()
                    .next()
                    .is_some_and(|n| n.is_ascii_digit());
                if !next_is_digit {
                    break;
                }
                seen_dot = true;
                end = i + 1;
                self.chars.next();
            } else {
                break;
            }
        }

        self.source[start..end]
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|e| SyntaxError::new(format!("invalid number: {}", e), start))
    }

    fn string(&mut self, start: usize, quote: char) -> Result<Token, SyntaxError> {
        self.chars.next();
        let mut text = String::new();

        while let Some((_, c)) = self.chars.next() {
            match c {
                '\\' => match self.chars.next() {
                    Some((_, 'n')) => text.push('\n'),
                    Some((_, 't')) => text.push('\t'),
                    Some((_, other)) => text.push(other),
                    None => break,
                },
                c if c == quote => return Ok(Token::Str(text)),
                c => text.push(c),
            }
        }

        Err(SyntaxError::new("unterminated string", start))
    }

    fn ident(&mut self, start: usize) -> Token {
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        Token::Ident(self.source[start..end].to_string())
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, o)| *o).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn eat(&mut self, sym: &str) -> bool {
        if matches!(self.peek(), Some(Token::Sym(s)) if *s == sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, sym: &str) -> Result<(), SyntaxError> {
        if self.eat(sym) {
            Ok(())
        } else {
            Err(SyntaxError::new(format!("expected '{}'", sym), self.offset()))
        }
    }

    fn peek_binary(&self) -> Option<BinaryOp> {
        match self.peek()? {
            Token::Sym("+") => Some(BinaryOp::Add),
            Token::Sym("-") => Some(BinaryOp::Sub),
            Token::Sym("*") => Some(BinaryOp::Mul),
            Token::Sym("/") => Some(BinaryOp::Div),
            Token::Sym("%") => Some(BinaryOp::Rem),
            Token::Sym("==") => Some(BinaryOp::Eq),
            Token::Sym("!=") => Some(BinaryOp::Ne),
            Token::Sym("<") => Some(BinaryOp::Lt),
            Token::Sym("<=") => Some(BinaryOp::Le),
            Token::Sym(">") => Some(BinaryOp::Gt),
            Token::Sym(">=") => Some(BinaryOp::Ge),
            Token::Sym("&&") => Some(BinaryOp::And),
            Token::Sym("||") => Some(BinaryOp::Or),
            Token::Ident(word) if word == "and" => Some(BinaryOp::And),
            Token::Ident(word) if word == "or" => Some(BinaryOp::Or),
            _ => None,
        }
    }

    fn expression(&mut self, min_prec: u8) -> Result<Expr, SyntaxError> {
        let mut lhs = self.unary()?;

        while let Some(op) = self.peek_binary() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.expression(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        match self.peek() {
            Some(Token::Sym("!")) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.expression(3)?)))
            }
            Some(Token::Ident(word)) if word == "not" => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.expression(3)?)))
            }
            Some(Token::Sym("-")) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.primary()?;

        loop {
            if self.eat(".") {
                let offset = self.offset();
                match self.advance() {
                    Some(Token::Ident(field)) => expr = Expr::Field(Box::new(expr), field),
                    Some(Token::Number(n)) if n.fract() == 0.0 => {
                        expr = Expr::Index(Box::new(expr), Box::new(Expr::Literal(n.into())))
                    }
                    _ => return Err(SyntaxError::new("expected field name after '.'", offset)),
                }
            } else if self.eat("[") {
                let index = self.expression(0)?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number_value(n).unwrap_or(Value::Null))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "none" => Ok(Expr::Literal(Value::Null)),
                "and" | "or" | "not" => Err(SyntaxError::new(
                    format!("unexpected keyword '{}'", word),
                    offset,
                )),
                _ => Ok(Expr::Var(word)),
            },
            Some(Token::Sym("(")) => {
                let inner = self.expression(0)?;
                self.expect(")")?;
                Ok(inner)
            }
            Some(Token::Sym("[")) => {
                let mut items = Vec::new();
                while !self.eat("]") {
                    items.push(self.expression(0)?);
                    if !self.eat(",") {
                        self.expect("]")?;
                        break;
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Token::Sym("{")) => {
                let mut entries = Vec::new();
                while !self.eat("}") {
                    let key_offset = self.offset();
                    let key = match self.advance() {
                        Some(Token::Ident(k)) | Some(Token::Str(k)) => k,
                        _ => return Err(SyntaxError::new("expected map key", key_offset)),
                    };
                    self.expect(":")?;
                    entries.push((key, self.expression(0)?));
                    if !self.eat(",") {
                        self.expect("}")?;
                        break;
                    }
                }
                Ok(Expr::Map(entries))
            }
            Some(Token::Sym(sym)) => Err(SyntaxError::new(format!("unexpected '{}'", sym), offset)),
            None => Err(SyntaxError::new("unexpected end of expression", offset)),
        }
    }
}

/// Parse expression source text
pub fn parse(source: &str) -> Result<Expr, SyntaxError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
    };

    let expr = parser.expression(0)?;
    if parser.pos < parser.tokens.len() {
        return Err(SyntaxError::new("unexpected trailing input", parser.offset()));
    }
    Ok(expr)
}

impl Expr {
    /// Evaluate against the current environment
    pub fn eval(&self, env: &Environment) -> Result<Value, RuntimeError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => env.get(name),
            Expr::Field(base, field) => match base.eval(env)? {
                Value::Object(mut map) => {
                    map.remove(field)
                        .ok_or_else(|| RuntimeError::UndefinedVariable {
                            name: self.describe(),
                        })
                }
                other => Err(RuntimeError::TypeMismatch {
                    op: ".",
                    found: type_name(&other).into(),
                }),
            },
            Expr::Index(base, index) => {
                let container = base.eval(env)?;
                let key = index.eval(env)?;
                index_value(container, key, || self.describe())
            }
            Expr::List(items) => items
                .iter()
                .map(|item| item.eval(env))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), value.eval(env)?);
                }
                Ok(Value::Object(map))
            }
            Expr::Unary(UnaryOp::Not, operand) => Ok(Value::Bool(!is_truthy(&operand.eval(env)?))),
            Expr::Unary(UnaryOp::Neg, operand) => {
                let value = operand.eval(env)?;
                let n = as_number(&value).ok_or_else(|| RuntimeError::TypeMismatch {
                    op: "-",
                    found: type_name(&value).into(),
                })?;
                finite(-n, "-")
            }
            Expr::Binary(BinaryOp::And, lhs, rhs) => {
                if !is_truthy(&lhs.eval(env)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(is_truthy(&rhs.eval(env)?)))
            }
            Expr::Binary(BinaryOp::Or, lhs, rhs) => {
                if is_truthy(&lhs.eval(env)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(is_truthy(&rhs.eval(env)?)))
            }
            Expr::Binary(op, lhs, rhs) => {
                let left = lhs.eval(env)?;
                let right = rhs.eval(env)?;
                apply_binary(*op, &left, &right)
            }
        }
    }

    /// Dotted path for error messages
    pub fn describe(&self) -> String {
        match self {
            Expr::Var(name) => name.clone(),
            Expr::Field(base, field) => format!("{}.{}", base.describe(), field),
            Expr::Index(base, index) => match index.as_ref() {
                Expr::Literal(key) => format!("{}[{}]", base.describe(), key),
                _ => format!("{}[..]", base.describe()),
            },
            _ => "<expression>".into(),
        }
    }
}

fn index_value(
    container: Value,
    key: Value,
    describe: impl Fn() -> String,
) -> Result<Value, RuntimeError> {
    match (container, key) {
        (Value::Array(mut items), key) => {
            let len = items.len();
            let index = as_number(&key)
                .filter(|n| n.fract() == 0.0)
                .ok_or_else(|| RuntimeError::TypeMismatch {
                    op: "[]",
                    found: type_name(&key).into(),
                })? as i64;
            if index < 0 || index as usize >= len {
                return Err(RuntimeError::IndexOutOfRange { index, len });
            }
            Ok(items.swap_remove(index as usize))
        }
        (Value::Object(mut map), Value::String(field)) => map
            .remove(&field)
            .ok_or_else(|| RuntimeError::UndefinedVariable { name: describe() }),
        (other, _) => Err(RuntimeError::TypeMismatch {
            op: "[]",
            found: type_name(&other).into(),
        }),
    }
}

fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let (Some(l), Some(r)) = (as_number(left), as_number(right)) else {
                return Err(RuntimeError::NonNumericComparison {
                    op: op.symbol(),
                    left: preview(left),
                    right: preview(right),
                });
            };
            let result = match op {
                BinaryOp::Lt => l < r,
                BinaryOp::Le => l <= r,
                BinaryOp::Gt => l > r,
                _ => l >= r,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::Add => {
            if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
                return finite(l + r, "+");
            }
            match (left, right) {
                (Value::Array(l), Value::Array(r)) => {
                    Ok(Value::Array(l.iter().chain(r.iter()).cloned().collect()))
                }
                (Value::String(_), _) | (_, Value::String(_)) => {
                    Ok(Value::String(format!("{}{}", to_text(left), to_text(right))))
                }
                _ => Err(RuntimeError::TypeMismatch {
                    op: "+",
                    found: format!("{} and {}", type_name(left), type_name(right)),
                }),
            }
        }
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            let symbol = op.symbol();
            let l = as_number(left).ok_or_else(|| RuntimeError::TypeMismatch {
                op: symbol,
                found: type_name(left).into(),
            })?;
            let r = as_number(right).ok_or_else(|| RuntimeError::TypeMismatch {
                op: symbol,
                found: type_name(right).into(),
            })?;
            match op {
                BinaryOp::Sub => finite(l - r, symbol),
                BinaryOp::Mul => finite(l * r, symbol),
                _ if r == 0.0 => Err(RuntimeError::DivisionByZero),
                BinaryOp::Div => finite(l / r, symbol),
                _ => finite(l % r, symbol),
            }
        }
        BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(match op {
            BinaryOp::And => is_truthy(left) && is_truthy(right),
            _ => is_truthy(left) || is_truthy(right),
        })),
    }
}

fn finite(n: f64, op: &'static str) -> Result<Value, RuntimeError> {
    number_value(n).ok_or(RuntimeError::NotFinite { op })
}

/// Build a JSON number, keeping integral results as integers
pub fn number_value(n: f64) -> Option<Value> {
    if !n.is_finite() {
        return None;
    }
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Some(Value::from(n as i64));
    }
    Number::from_f64(n).map(Value::Number)
}

/// Numeric view of a value: numbers, and strings that parse as finite numbers
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Equality with numeric coercion first, then textual comparison of scalars
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        _ => {
            if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
                return l == r;
            }
            match (scalar_text(left), scalar_text(right)) {
                (Some(l), Some(r)) => l == r,
                _ => left == right,
            }
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Truthiness used by `if`, `and`, `or` and `not`
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Text form used for concatenation and output
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn preview(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() > 40 {
        format!("{}...", text.chars().take(40).collect::<String>())
    } else {
        text
    }
}
