//! Condition expressions for policy statements
//!
//! A small, bounded expression language evaluated against a JSON context of
//! the shape `{ principal, resource, action, context? }`.
//!
//! Supported syntax:
//! - Paths: `principal.id`, `resource.type`, `context.ip`, `context['x-key']`
//! - Comparisons: `==`, `!=`, `<`, `<=`, `>`, `>=` (numbers or strings)
//! - String matching: `=~` / `!~` (regex, full match), `=^` / `!^` (starts
//!   with), `=$` / `!$` (ends with)
//! - Membership: `x in [..]`, `'sub' in context.name`, `'key' in context`
//! - Boolean logic: `&&`, `||`, `!` and `and`, `or`, `not`
//! - Negation: `-x`, `-1`
//! - Literals: `'str'`, `"str"`, `42`, `-3`, `1.5`, `true`, `false`, `null`, `[a, b]`
//! - Functions: `size(x)`, `empty(x)`
//!
//! Evaluation is fail-closed: the public [`ConditionEvaluator::evaluate`]
//! returns `true` only when the expression evaluates to boolean `true`.
//! Parsing enforces a source length and nesting depth limit; evaluation
//! draws from a fuel budget so no stored expression can stall the caller.

use super::cache::ConditionCache;
use crate::core::config::EngineConfig;
use crate::error::{AuthzError, Result};
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use std::borrow::Cow;
use thiserror::Error;
use tracing::debug;

/// Compiled regexes are capped so a stored pattern cannot exhaust memory
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Capability to validate and evaluate statement conditions
///
/// The engine holds one of these behind an `Arc`, so the expression language
/// can be replaced without touching the matching logic.
pub trait ConditionEvaluator: Send + Sync {
    /// Reject expressions that do not parse
    fn validate(&self, expression: &str) -> Result<()>;

    /// Evaluate an optional expression; absent or empty means "no constraint"
    fn evaluate(&self, expression: Option<&str>, context: &Value) -> bool;
}

/// Resource limits applied to every expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionLimits {
    pub max_length: usize,
    pub max_depth: usize,
    pub fuel: u64,
}

impl Default for ConditionLimits {
    fn default() -> Self {
        ConditionLimits {
            max_length: 4096,
            max_depth: 32,
            fuel: 10_000,
        }
    }
}

impl From<&EngineConfig> for ConditionLimits {
    fn from(config: &EngineConfig) -> Self {
        ConditionLimits {
            max_length: config.max_expression_length,
            max_depth: config.max_expression_depth,
            fuel: config.evaluation_fuel,
        }
    }
}

/// Errors raised while parsing or evaluating an expression
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("expression is {actual} characters, limit is {max}")]
    TooLong { max: usize, actual: usize },

    #[error("expression nesting exceeds depth {max}")]
    TooDeep { max: usize },

    #[error("type error: {0}")]
    Type(String),

    #[error("cannot resolve `{0}`")]
    Unresolved(String),

    #[error("evaluation budget exhausted")]
    OutOfFuel,
}

// AST

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Array(Vec<Expr>),
    Variable(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    /// Right-hand regex compiled at parse time when it is a string literal
    RegexMatch {
        negated: bool,
        subject: Box<Expr>,
        pattern: RegexOperand,
    },
    Call(Function, Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum RegexOperand {
    Compiled(Regex),
    Dynamic(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Size,
    Empty,
}

// Lexer

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    True,
    False,
    Null,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Match,
    NotMatch,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    And,
    Or,
    Not,
    Minus,
    In,
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, ConditionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    // Two-character operators, checked before single characters
    const PAIRS: [(&str, Token); 12] = [
        ("==", Token::Eq),
        ("!=", Token::Ne),
        ("<=", Token::Le),
        (">=", Token::Ge),
        ("=~", Token::Match),
        ("!~", Token::NotMatch),
        ("=^", Token::StartsWith),
        ("!^", Token::NotStartsWith),
        ("=$", Token::EndsWith),
        ("!$", Token::NotEndsWith),
        ("&&", Token::And),
        ("||", Token::Or),
    ];

    'outer: while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if i + 1 < chars.len() {
            for (op, token) in PAIRS.iter() {
                let mut op_chars = op.chars();
                if op_chars.next() == Some(c) && op_chars.next() == Some(chars[i + 1]) {
                    tokens.push(token.clone());
                    i += 2;
                    continue 'outer;
                }
            }
        }

        match c {
            '.' => tokens.push(Token::Dot),
            ',' => tokens.push(Token::Comma),
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '[' => tokens.push(Token::LBracket),
            ']' => tokens.push(Token::RBracket),
            '<' => tokens.push(Token::Lt),
            '>' => tokens.push(Token::Gt),
            '!' => tokens.push(Token::Not),
            '-' => tokens.push(Token::Minus),
            '\'' | '"' => {
                let (s, next) = lex_string(&chars, i)?;
                tokens.push(Token::Str(s));
                i = next;
                continue;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let is_float = i + 1 < chars.len()
                    && chars[i] == '.'
                    && chars[i + 1].is_ascii_digit();
                if is_float {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                if is_float {
                    let f = text
                        .parse::<f64>()
                        .map_err(|_| ConditionError::Syntax(format!("invalid number `{}`", text)))?;
                    tokens.push(Token::Float(f));
                } else {
                    let n = text
                        .parse::<i64>()
                        .map_err(|_| ConditionError::Syntax(format!("invalid number `{}`", text)))?;
                    tokens.push(Token::Int(n));
                }
                continue;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "eq" => Token::Eq,
                    "ne" => Token::Ne,
                    "lt" => Token::Lt,
                    "le" => Token::Le,
                    "gt" => Token::Gt,
                    "ge" => Token::Ge,
                    _ => Token::Ident(word),
                });
                continue;
            }
            other => {
                return Err(ConditionError::Syntax(format!(
                    "unexpected character `{}`",
                    other
                )))
            }
        }
        i += 1;
    }

    Ok(tokens)
}

/// Lex a quoted string starting at `start`; returns the value and the index
/// just past the closing quote
fn lex_string(
    chars: &[char],
    start: usize,
) -> std::result::Result<(String, usize), ConditionError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((out, i + 1)),
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| ConditionError::Syntax("unterminated string literal".into()))?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => *other,
                });
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    Err(ConditionError::Syntax("unterminated string literal".into()))
}

// Parser

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token, what: &str) -> std::result::Result<(), ConditionError> {
        match self.advance() {
            Some(ref t) if *t == expected => Ok(()),
            other => Err(ConditionError::Syntax(format!(
                "expected {}, found {:?}",
                what, other
            ))),
        }
    }

    fn enter(&mut self) -> std::result::Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(ConditionError::TooDeep {
                max: self.max_depth,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_expr(&mut self) -> std::result::Result<Expr, ConditionError> {
        self.enter()?;
        let expr = self.parse_or();
        self.leave();
        expr
    }

    /// or = and ("||" and)*
    ///
    /// Chains build left-nested trees, so every extra operand counts as one
    /// level of depth.
    fn parse_or(&mut self) -> std::result::Result<Expr, ConditionError> {
        let mut left = self.parse_and()?;
        let mut levels = 0;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            self.enter()?;
            levels += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth -= levels;
        Ok(left)
    }

    /// and = comparison ("&&" comparison)*
    fn parse_and(&mut self) -> std::result::Result<Expr, ConditionError> {
        let mut left = self.parse_comparison()?;
        let mut levels = 0;
        while self.peek() == Some(&Token::And) {
            self.advance();
            self.enter()?;
            levels += 1;
            let right = self.parse_comparison()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth -= levels;
        Ok(left)
    }

    /// comparison = unary (op unary)?
    fn parse_comparison(&mut self) -> std::result::Result<Expr, ConditionError> {
        let left = self.parse_unary()?;

        let op = match self.peek() {
            Some(Token::Eq) => CompareOp::Eq,
            Some(Token::Ne) => CompareOp::Ne,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::Le) => CompareOp::Le,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::Ge) => CompareOp::Ge,
            Some(Token::StartsWith) => CompareOp::StartsWith,
            Some(Token::NotStartsWith) => CompareOp::NotStartsWith,
            Some(Token::EndsWith) => CompareOp::EndsWith,
            Some(Token::NotEndsWith) => CompareOp::NotEndsWith,
            Some(Token::In) => CompareOp::In,
            Some(Token::Match) | Some(Token::NotMatch) => {
                let negated = self.advance() == Some(Token::NotMatch);
                let right = self.parse_unary()?;
                let pattern = match right {
                    Expr::Literal(Value::String(ref source)) => {
                        RegexOperand::Compiled(compile_regex(source)?)
                    }
                    other => RegexOperand::Dynamic(Box::new(other)),
                };
                return Ok(Expr::RegexMatch {
                    negated,
                    subject: Box::new(left),
                    pattern,
                });
            }
            _ => return Ok(left),
        };

        self.advance();
        let right = self.parse_unary()?;
        Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
    }

    /// unary = ("!" | "not" | "-") unary | postfix
    fn parse_unary(&mut self) -> std::result::Result<Expr, ConditionError> {
        let negate = match self.peek() {
            Some(Token::Not) => false,
            Some(Token::Minus) => true,
            _ => return self.parse_postfix(),
        };
        self.advance();
        self.enter()?;
        let inner = self.parse_unary();
        self.leave();
        let inner = inner?;

        if !negate {
            return Ok(Expr::Not(Box::new(inner)));
        }
        // Fold `-<number>` into a literal
        match inner {
            Expr::Literal(Value::Number(ref n)) => match negate_number(n) {
                Some(value) => Ok(Expr::Literal(value)),
                None => Err(ConditionError::Syntax(format!("cannot negate `{}`", n))),
            },
            other => Ok(Expr::Neg(Box::new(other))),
        }
    }

    /// postfix = primary ("." ident | "[" expr "]")*
    fn parse_postfix(&mut self) -> std::result::Result<Expr, ConditionError> {
        let mut expr = self.parse_primary()?;
        let mut levels = 0;
        loop {
            if matches!(self.peek(), Some(Token::Dot) | Some(Token::LBracket)) {
                self.enter()?;
                levels += 1;
            }
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(name)) => expr = Expr::Member(Box::new(expr), name),
                        // Keywords are valid property names after a dot
                        Some(Token::In) => expr = Expr::Member(Box::new(expr), "in".into()),
                        Some(Token::Not) => expr = Expr::Member(Box::new(expr), "not".into()),
                        other => {
                            return Err(ConditionError::Syntax(format!(
                                "expected property name after `.`, found {:?}",
                                other
                            )))
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(Token::RBracket, "`]`")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => {
                    self.depth -= levels;
                    return Ok(expr);
                }
            }
        }
    }

    fn parse_primary(&mut self) -> std::result::Result<Expr, ConditionError> {
        match self.advance() {
            Some(Token::Int(n)) => Ok(Expr::Literal(Value::from(n))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Value::from(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    let function = match name.as_str() {
                        "size" => Function::Size,
                        "empty" => Function::Empty,
                        _ => {
                            return Err(ConditionError::Syntax(format!(
                                "unknown function `{}`",
                                name
                            )))
                        }
                    };
                    self.advance();
                    let arg = self.parse_expr()?;
                    self.expect(Token::RParen, "`)`")?;
                    return Ok(Expr::Call(function, Box::new(arg)));
                }
                Ok(Expr::Variable(name))
            }
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect(Token::RParen, "`)`")?;
                Ok(expr)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() == Some(&Token::RBracket) {
                    self.advance();
                    return Ok(Expr::Array(items));
                }
                loop {
                    items.push(self.parse_expr()?);
                    match self.advance() {
                        Some(Token::Comma) => continue,
                        Some(Token::RBracket) => break,
                        other => {
                            return Err(ConditionError::Syntax(format!(
                                "expected `,` or `]` in array literal, found {:?}",
                                other
                            )))
                        }
                    }
                }
                Ok(Expr::Array(items))
            }
            other => Err(ConditionError::Syntax(format!(
                "unexpected token {:?}",
                other
            ))),
        }
    }
}

fn compile_regex(source: &str) -> std::result::Result<Regex, ConditionError> {
    RegexBuilder::new(&format!("^(?:{})$", source))
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| ConditionError::Syntax(format!("invalid regex `{}`: {}", source, e)))
}

/// Parse an expression under the given limits
pub fn parse(source: &str, limits: &ConditionLimits) -> std::result::Result<Expr, ConditionError> {
    let length = source.chars().count();
    if length > limits.max_length {
        return Err(ConditionError::TooLong {
            max: limits.max_length,
            actual: length,
        });
    }

    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(ConditionError::Syntax("empty expression".into()));
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        max_depth: limits.max_depth,
    };
    let expr = parser.parse_expr()?;

    if parser.pos < parser.tokens.len() {
        return Err(ConditionError::Syntax(format!(
            "unexpected trailing token {:?}",
            parser.tokens[parser.pos]
        )));
    }

    Ok(expr)
}

// Evaluation

/// Step budget for a single evaluation
struct Fuel {
    remaining: u64,
}

impl Fuel {
    fn consume(&mut self, amount: u64) -> std::result::Result<(), ConditionError> {
        if amount > self.remaining {
            self.remaining = 0;
            return Err(ConditionError::OutOfFuel);
        }
        self.remaining -= amount;
        Ok(())
    }
}

type Eval<'a> = std::result::Result<Cow<'a, Value>, ConditionError>;

/// Evaluate a parsed expression to a boolean
///
/// Anything other than a boolean result is a type error.
pub fn evaluate_expr(
    expr: &Expr,
    context: &Value,
    fuel: u64,
) -> std::result::Result<bool, ConditionError> {
    let mut fuel = Fuel { remaining: fuel };
    match eval(expr, context, &mut fuel)?.as_ref() {
        Value::Bool(b) => Ok(*b),
        other => Err(ConditionError::Type(format!(
            "condition must evaluate to a boolean, got {}",
            type_name(other)
        ))),
    }
}

fn eval<'a>(expr: &Expr, root: &'a Value, fuel: &mut Fuel) -> Eval<'a> {
    fuel.consume(1)?;

    match expr {
        Expr::Literal(value) => Ok(Cow::Owned(value.clone())),
        Expr::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval(item, root, fuel)?.into_owned());
            }
            Ok(Cow::Owned(Value::Array(values)))
        }
        // Unknown top-level names resolve to null, e.g. `context` when the
        // caller supplied none
        Expr::Variable(name) => Ok(match root.get(name) {
            Some(v) => Cow::Borrowed(v),
            None => Cow::Owned(Value::Null),
        }),
        Expr::Member(target, name) => {
            let target = eval(target, root, fuel)?;
            member(target, name)
        }
        Expr::Index(target, index) => {
            let target = eval(target, root, fuel)?;
            let index = eval(index, root, fuel)?;
            match index.as_ref() {
                Value::String(key) => member(target, key),
                Value::Number(n) => {
                    let idx = n
                        .as_u64()
                        .ok_or_else(|| ConditionError::Type("array index must be a non-negative integer".into()))?;
                    element(target, idx as usize)
                }
                other => Err(ConditionError::Type(format!(
                    "cannot index with {}",
                    type_name(other)
                ))),
            }
        }
        Expr::Not(inner) => {
            let b = as_bool(eval(inner, root, fuel)?.as_ref(), "!")?;
            Ok(Cow::Owned(Value::Bool(!b)))
        }
        Expr::Neg(inner) => match eval(inner, root, fuel)?.as_ref() {
            Value::Number(n) => negate_number(n)
                .map(Cow::Owned)
                .ok_or_else(|| ConditionError::Type(format!("cannot negate {}", n))),
            other => Err(ConditionError::Type(format!(
                "`-` requires a number, got {}",
                type_name(other)
            ))),
        },
        Expr::And(left, right) => {
            if !as_bool(eval(left, root, fuel)?.as_ref(), "&&")? {
                return Ok(Cow::Owned(Value::Bool(false)));
            }
            let r = as_bool(eval(right, root, fuel)?.as_ref(), "&&")?;
            Ok(Cow::Owned(Value::Bool(r)))
        }
        Expr::Or(left, right) => {
            if as_bool(eval(left, root, fuel)?.as_ref(), "||")? {
                return Ok(Cow::Owned(Value::Bool(true)));
            }
            let r = as_bool(eval(right, root, fuel)?.as_ref(), "||")?;
            Ok(Cow::Owned(Value::Bool(r)))
        }
        Expr::Compare(op, left, right) => {
            let l = eval(left, root, fuel)?;
            let r = eval(right, root, fuel)?;
            compare(*op, &l, &r, fuel).map(|b| Cow::Owned(Value::Bool(b)))
        }
        Expr::RegexMatch {
            negated,
            subject,
            pattern,
        } => {
            let subject = eval(subject, root, fuel)?;
            let matched = match pattern {
                RegexOperand::Compiled(regex) => regex_match(regex, &subject, fuel)?,
                RegexOperand::Dynamic(pattern) => {
                    let pattern = eval(pattern, root, fuel)?;
                    match pattern.as_ref() {
                        Value::String(source) => {
                            fuel.consume(source.len() as u64)?;
                            let regex = compile_regex(source)?;
                            regex_match(&regex, &subject, fuel)?
                        }
                        // `x =~ [a, b]` is membership
                        Value::Array(items) => {
                            fuel.consume(items.len() as u64)?;
                            items.iter().any(|item| loose_eq(&subject, item))
                        }
                        other => {
                            return Err(ConditionError::Type(format!(
                                "`=~` requires a string or array pattern, got {}",
                                type_name(other)
                            )))
                        }
                    }
                }
            };
            Ok(Cow::Owned(Value::Bool(matched != *negated)))
        }
        Expr::Call(function, arg) => {
            let arg = eval(arg, root, fuel)?;
            let result = match function {
                Function::Size => Value::from(size_of(&arg)?),
                Function::Empty => Value::Bool(match arg.as_ref() {
                    Value::Null => true,
                    Value::String(s) => s.is_empty(),
                    Value::Array(a) => a.is_empty(),
                    Value::Object(o) => o.is_empty(),
                    _ => false,
                }),
            };
            Ok(Cow::Owned(result))
        }
    }
}

/// Property access; a missing key on an object is null, navigating through
/// anything that is not an object is an error
fn member<'a>(target: Cow<'a, Value>, name: &str) -> Eval<'a> {
    match target {
        Cow::Borrowed(Value::Object(map)) => Ok(match map.get(name) {
            Some(v) => Cow::Borrowed(v),
            None => Cow::Owned(Value::Null),
        }),
        Cow::Owned(Value::Object(mut map)) => Ok(Cow::Owned(map.remove(name).unwrap_or(Value::Null))),
        other => Err(ConditionError::Unresolved(format!(
            "property `{}` of {}",
            name,
            type_name(&other)
        ))),
    }
}

fn element<'a>(target: Cow<'a, Value>, idx: usize) -> Eval<'a> {
    match target {
        Cow::Borrowed(Value::Array(items)) => Ok(match items.get(idx) {
            Some(v) => Cow::Borrowed(v),
            None => Cow::Owned(Value::Null),
        }),
        Cow::Owned(Value::Array(mut items)) => Ok(Cow::Owned(if idx < items.len() {
            items.swap_remove(idx)
        } else {
            Value::Null
        })),
        other => Err(ConditionError::Unresolved(format!(
            "element {} of {}",
            idx,
            type_name(&other)
        ))),
    }
}

fn negate_number(n: &serde_json::Number) -> Option<Value> {
    if let Some(i) = n.as_i64() {
        return i.checked_neg().map(Value::from);
    }
    serde_json::Number::from_f64(-n.as_f64()?).map(Value::Number)
}

fn as_bool(value: &Value, op: &str) -> std::result::Result<bool, ConditionError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(ConditionError::Type(format!(
            "`{}` requires boolean operands, got {}",
            op,
            type_name(other)
        ))),
    }
}

/// Equality with numeric coercion (`1 == 1.0`)
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => left == right,
    }
}

fn compare(
    op: CompareOp,
    left: &Value,
    right: &Value,
    fuel: &mut Fuel,
) -> std::result::Result<bool, ConditionError> {
    match op {
        CompareOp::Eq => Ok(loose_eq(left, right)),
        CompareOp::Ne => Ok(!loose_eq(left, right)),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => {
                    let (a, b) = (a.as_f64(), b.as_f64());
                    a.zip(b).and_then(|(a, b)| a.partial_cmp(&b))
                }
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            }
            .ok_or_else(|| {
                ConditionError::Type(format!(
                    "cannot order {} and {}",
                    type_name(left),
                    type_name(right)
                ))
            })?;
            Ok(match op {
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Le => ordering.is_le(),
                CompareOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        CompareOp::StartsWith | CompareOp::NotStartsWith => {
            let (s, prefix) = string_pair(left, right, "=^")?;
            Ok(s.starts_with(prefix) == (op == CompareOp::StartsWith))
        }
        CompareOp::EndsWith | CompareOp::NotEndsWith => {
            let (s, suffix) = string_pair(left, right, "=$")?;
            Ok(s.ends_with(suffix) == (op == CompareOp::EndsWith))
        }
        CompareOp::In => match right {
            Value::Array(items) => {
                fuel.consume(items.len() as u64)?;
                Ok(items.iter().any(|item| loose_eq(left, item)))
            }
            Value::String(haystack) => match left {
                Value::String(needle) => {
                    fuel.consume(haystack.len() as u64)?;
                    Ok(haystack.contains(needle.as_str()))
                }
                other => Err(ConditionError::Type(format!(
                    "`in` on a string requires a string, got {}",
                    type_name(other)
                ))),
            },
            Value::Object(map) => match left {
                Value::String(key) => Ok(map.contains_key(key)),
                other => Err(ConditionError::Type(format!(
                    "`in` on an object requires a string key, got {}",
                    type_name(other)
                ))),
            },
            other => Err(ConditionError::Type(format!(
                "`in` requires an array, string, or object, got {}",
                type_name(other)
            ))),
        },
    }
}

fn string_pair<'v>(
    left: &'v Value,
    right: &'v Value,
    op: &str,
) -> std::result::Result<(&'v str, &'v str), ConditionError> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok((a, b)),
        _ => Err(ConditionError::Type(format!(
            "`{}` requires string operands, got {} and {}",
            op,
            type_name(left),
            type_name(right)
        ))),
    }
}

fn regex_match(
    regex: &Regex,
    subject: &Value,
    fuel: &mut Fuel,
) -> std::result::Result<bool, ConditionError> {
    match subject {
        Value::String(s) => {
            fuel.consume(s.len() as u64)?;
            Ok(regex.is_match(s))
        }
        other => Err(ConditionError::Type(format!(
            "`=~` requires a string subject, got {}",
            type_name(other)
        ))),
    }
}

fn size_of(value: &Value) -> std::result::Result<usize, ConditionError> {
    match value {
        Value::Null => Ok(0),
        Value::String(s) => Ok(s.chars().count()),
        Value::Array(a) => Ok(a.len()),
        Value::Object(o) => Ok(o.len()),
        other => Err(ConditionError::Type(format!(
            "size() is undefined for {}",
            type_name(other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Default evaluator: the built-in expression language with a compiled
/// expression cache
pub struct ExpressionEvaluator {
    limits: ConditionLimits,
    cache: ConditionCache,
}

impl ExpressionEvaluator {
    /// Create an evaluator with the given limits and cache capacity
    ///
    /// A capacity of zero disables caching.
    pub fn new(limits: ConditionLimits, cache_capacity: usize) -> Self {
        ExpressionEvaluator {
            limits,
            cache: ConditionCache::new(cache_capacity),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(ConditionLimits::from(config), config.condition_cache_capacity)
    }

    pub fn limits(&self) -> &ConditionLimits {
        &self.limits
    }

    /// Number of compiled expressions currently cached
    pub fn cached_expressions(&self) -> usize {
        self.cache.len()
    }

    /// Drop every cached expression
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn try_evaluate(
        &self,
        expression: &str,
        context: &Value,
    ) -> std::result::Result<bool, ConditionError> {
        let expr = self
            .cache
            .get_or_compile(expression, |source| parse(source, &self.limits))?;
        evaluate_expr(&expr, context, self.limits.fuel)
    }
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl ConditionEvaluator for ExpressionEvaluator {
    fn validate(&self, expression: &str) -> Result<()> {
        validate_expression(expression, &self.limits)
    }

    fn evaluate(&self, expression: Option<&str>, context: &Value) -> bool {
        let expression = match expression {
            Some(e) if !e.trim().is_empty() => e,
            _ => return true,
        };

        match self.try_evaluate(expression, context) {
            Ok(result) => result,
            Err(e) => {
                debug!("Condition `{}` treated as false: {}", expression, e);
                false
            }
        }
    }
}

/// Parse-only check used by statement construction
pub fn validate_expression(expression: &str, limits: &ConditionLimits) -> Result<()> {
    parse(expression, limits)
        .map(|_| ())
        .map_err(|e| AuthzError::InvalidCondition {
            expression: expression.to_string(),
            reason: e.to_string(),
        })
}

/// Build the evaluation root for a request
pub(crate) fn evaluation_root(
    principal: Value,
    resource: Value,
    action: &str,
    context: Option<&Value>,
) -> Value {
    let mut root = Map::with_capacity(4);
    root.insert("principal".into(), principal);
    root.insert("resource".into(), resource);
    root.insert("action".into(), Value::String(action.to_string()));
    if let Some(ctx) = context.filter(|c| !c.is_null()) {
        root.insert("context".into(), ctx.clone());
    }
    Value::Object(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval_str(expression: &str, ctx: &Value) -> std::result::Result<bool, ConditionError> {
        let expr = parse(expression, &ConditionLimits::default())?;
        evaluate_expr(&expr, ctx, ConditionLimits::default().fuel)
    }

    fn evaluator() -> ExpressionEvaluator {
        ExpressionEvaluator::default()
    }

    #[test]
    fn test_empty_expression_is_unconstrained() {
        let ev = evaluator();
        assert!(ev.evaluate(None, &json!({})));
        assert!(ev.evaluate(Some(""), &json!({})));
        assert!(ev.evaluate(Some("   "), &json!({})));
    }

    #[test]
    fn test_string_equality_with_both_quote_styles() {
        let ctx = json!({ "context": { "time": "business_hours" } });
        assert!(eval_str("context.time == 'business_hours'", &ctx).unwrap());
        assert!(eval_str("context.time == \"business_hours\"", &ctx).unwrap());
        assert!(!eval_str("context.time == 'after_hours'", &ctx).unwrap());
        assert!(eval_str("context.time != 'after_hours'", &ctx).unwrap());
    }

    #[test]
    fn test_nested_property_access() {
        let ctx = json!({
            "principal": { "id": "user-1", "attributes": { "dept": { "name": "eng" } } },
            "resource": { "id": "doc-1", "type": "document" }
        });
        assert!(eval_str("principal.id == 'user-1'", &ctx).unwrap());
        assert!(eval_str("resource.type == 'document'", &ctx).unwrap());
        assert!(eval_str("principal.attributes.dept.name == 'eng'", &ctx).unwrap());
        assert!(eval_str("principal['attributes']['dept'].name == 'eng'", &ctx).unwrap());
    }

    #[test]
    fn test_numeric_comparisons() {
        let ctx = json!({ "context": { "hour": 14, "score": 2.5 } });
        assert!(eval_str("context.hour >= 9 && context.hour < 17", &ctx).unwrap());
        assert!(!eval_str("context.hour > 20", &ctx).unwrap());
        assert!(eval_str("context.score <= 2.5", &ctx).unwrap());
        assert!(eval_str("context.hour == 14.0", &ctx).unwrap());
        assert!(eval_str("context.hour gt 10 and context.hour le 14", &ctx).unwrap());
    }

    #[test]
    fn test_negative_numbers() {
        let ctx = json!({ "context": { "delta": 0, "offset": -5, "ratio": 0.5 } });
        assert!(eval_str("context.delta > -1", &ctx).unwrap());
        assert!(eval_str("context.offset == -5", &ctx).unwrap());
        assert!(eval_str("context.offset < -4.5", &ctx).unwrap());
        assert!(eval_str("-context.offset == 5", &ctx).unwrap());
        assert!(eval_str("-context.ratio == -0.5", &ctx).unwrap());
        assert!(eval_str("--3 == 3", &ctx).unwrap());
        assert!(eval_str("context.offset in [-5, 5]", &ctx).unwrap());
    }

    #[test]
    fn test_negating_non_number_fails_closed() {
        let ctx = json!({ "context": { "name": "x" } });
        assert!(matches!(
            eval_str("-context.name == 1", &ctx),
            Err(ConditionError::Type(_))
        ));
        assert!(!evaluator().evaluate(Some("-context.name == 1"), &ctx));
        assert!(parse("a == -", &ConditionLimits::default()).is_err());
        assert!(parse("a - 1", &ConditionLimits::default()).is_err());
    }

    #[test]
    fn test_string_ordering_is_lexicographic() {
        let ctx = json!({ "context": { "date": "2024-06-01" } });
        assert!(eval_str("context.date < '2024-12-31'", &ctx).unwrap());
        assert!(!eval_str("context.date > '2025-01-01'", &ctx).unwrap());
    }

    #[test]
    fn test_boolean_logic_and_precedence() {
        let ctx = json!({ "a": true, "b": false, "c": true });
        assert!(eval_str("a || b && c", &ctx).unwrap());
        assert!(!eval_str("(a || b) && !c", &ctx).unwrap());
        assert!(eval_str("not b and (a or b)", &ctx).unwrap());
        assert!(eval_str("!!a", &ctx).unwrap());
    }

    #[test]
    fn test_short_circuit_skips_failing_operand() {
        let ctx = json!({ "a": false });
        // Right side would be a type error
        assert!(!eval_str("a && missing.deep.path == 1", &ctx).unwrap());
        assert!(eval_str("!a || missing.deep.path == 1", &ctx).unwrap());
    }

    #[test]
    fn test_null_checks() {
        let ctx = json!({ "context": { "present": "x", "explicit": null } });
        assert!(eval_str("context.missing == null", &ctx).unwrap());
        assert!(eval_str("context.explicit == null", &ctx).unwrap());
        assert!(eval_str("context.present != null", &ctx).unwrap());
        assert!(eval_str("empty(context.missing)", &ctx).unwrap());
        assert!(!eval_str("empty(context.present)", &ctx).unwrap());
    }

    #[test]
    fn test_absent_context_root_is_null() {
        let ctx = json!({ "principal": { "id": "user-1" } });
        assert!(eval_str("context == null", &ctx).unwrap());
        // Navigating through null is an error
        assert!(matches!(
            eval_str("context.time == 'x'", &ctx),
            Err(ConditionError::Unresolved(_))
        ));
    }

    #[test]
    fn test_membership() {
        let ctx = json!({
            "principal": { "role_ids": ["role-admin", "role-dev"] },
            "context": { "ip": "10.0.0.1", "tags": { "env": "prod" } }
        });
        assert!(eval_str("'role-admin' in principal.role_ids", &ctx).unwrap());
        assert!(!eval_str("'role-ops' in principal.role_ids", &ctx).unwrap());
        assert!(eval_str("context.ip in ['10.0.0.1', '10.0.0.2']", &ctx).unwrap());
        assert!(eval_str("'10.0' in context.ip", &ctx).unwrap());
        assert!(eval_str("'env' in context.tags", &ctx).unwrap());
        assert!(eval_str("1 in [1.0, 2]", &ctx).unwrap());
    }

    #[test]
    fn test_string_match_operators() {
        let ctx = json!({ "context": { "email": "alice@example.com" } });
        assert!(eval_str("context.email =~ '.*@example\\\\.com'", &ctx).unwrap());
        assert!(eval_str("context.email !~ '.*@other\\\\.com'", &ctx).unwrap());
        assert!(eval_str("context.email =^ 'alice'", &ctx).unwrap());
        assert!(eval_str("context.email !^ 'bob'", &ctx).unwrap());
        assert!(eval_str("context.email =$ '.com'", &ctx).unwrap());
        assert!(eval_str("context.email !$ '.org'", &ctx).unwrap());
        // Full match, not substring search
        assert!(!eval_str("context.email =~ 'example'", &ctx).unwrap());
        assert!(eval_str("context.email =~ ['alice@example.com', 'x']", &ctx).unwrap());
    }

    #[test]
    fn test_size_function() {
        let ctx = json!({ "context": { "items": [1, 2, 3], "name": "abc" } });
        assert!(eval_str("size(context.items) == 3", &ctx).unwrap());
        assert!(eval_str("size(context.name) == 3", &ctx).unwrap());
        assert!(eval_str("size(context.missing) == 0", &ctx).unwrap());
    }

    #[test]
    fn test_array_index() {
        let ctx = json!({ "context": { "items": ["a", "b"] } });
        assert!(eval_str("context.items[1] == 'b'", &ctx).unwrap());
        assert!(eval_str("context.items[5] == null", &ctx).unwrap());
    }

    #[test]
    fn test_non_boolean_result_is_error() {
        let ctx = json!({ "context": { "name": "x" } });
        assert!(matches!(
            eval_str("context.name", &ctx),
            Err(ConditionError::Type(_))
        ));
        assert!(!evaluator().evaluate(Some("context.name"), &ctx));
        assert!(!evaluator().evaluate(Some("42"), &ctx));
    }

    #[test]
    fn test_type_errors_fail_closed() {
        let ev = evaluator();
        let ctx = json!({ "context": { "n": 1, "s": "x" } });
        assert!(!ev.evaluate(Some("context.n < 'x'"), &ctx));
        assert!(!ev.evaluate(Some("context.s && true"), &ctx));
        assert!(!ev.evaluate(Some("!context.s"), &ctx));
        assert!(!ev.evaluate(Some("context.s.deeper == 1"), &ctx));
    }

    #[test]
    fn test_parse_errors() {
        let limits = ConditionLimits::default();
        assert!(parse("", &limits).is_err());
        assert!(parse("a ==", &limits).is_err());
        assert!(parse("(a == 1", &limits).is_err());
        assert!(parse("'unterminated", &limits).is_err());
        assert!(parse("a == 1 b", &limits).is_err());
        assert!(parse("a # b", &limits).is_err());
        assert!(parse("unknown(a)", &limits).is_err());
        assert!(parse("a =~ '('", &limits).is_err());
        assert!(parse("[1, 2", &limits).is_err());
    }

    #[test]
    fn test_parse_errors_fail_closed_at_evaluation() {
        assert!(!evaluator().evaluate(Some("a =="), &json!({ "a": 1 })));
    }

    #[test]
    fn test_length_limit() {
        let limits = ConditionLimits {
            max_length: 10,
            ..ConditionLimits::default()
        };
        assert_eq!(
            parse("context.value == 'long'", &limits).unwrap_err(),
            ConditionError::TooLong {
                max: 10,
                actual: 23
            }
        );
    }

    #[test]
    fn test_depth_limit() {
        let limits = ConditionLimits::default();
        let deep = format!("{}true{}", "(".repeat(100), ")".repeat(100));
        assert!(matches!(
            parse(&deep, &limits),
            Err(ConditionError::TooDeep { .. })
        ));

        let negations = format!("{}true", "!".repeat(100));
        assert!(matches!(
            parse(&negations, &limits),
            Err(ConditionError::TooDeep { .. })
        ));

        let chain = vec!["a == 1"; 100].join(" && ");
        assert!(matches!(
            parse(&chain, &limits),
            Err(ConditionError::TooDeep { .. })
        ));

        let path = format!("context{}", ".x".repeat(100));
        assert!(matches!(
            parse(&path, &limits),
            Err(ConditionError::TooDeep { .. })
        ));

        let shallow = format!("{}true{}", "(".repeat(5), ")".repeat(5));
        assert!(parse(&shallow, &limits).is_ok());
    }

    #[test]
    fn test_fuel_exhaustion_fails_closed() {
        let items: Vec<String> = (0..500).map(|i| i.to_string()).collect();
        let expression = format!("context.n in [{}]", items.join(", "));
        let limits = ConditionLimits {
            max_length: 1 << 16,
            max_depth: 32,
            fuel: 100,
        };
        let expr = parse(&expression, &limits).unwrap();
        let ctx = json!({ "context": { "n": 499 } });

        assert_eq!(
            evaluate_expr(&expr, &ctx, limits.fuel).unwrap_err(),
            ConditionError::OutOfFuel
        );
        assert!(evaluate_expr(&expr, &ctx, 10_000).unwrap());

        let ev = ExpressionEvaluator::new(limits, 0);
        assert!(!ev.evaluate(Some(&expression), &ctx));
    }

    #[test]
    fn test_validate_reports_expression() {
        let err = evaluator().validate("a ==").unwrap_err();
        match err {
            AuthzError::InvalidCondition { expression, .. } => assert_eq!(expression, "a =="),
            other => panic!("unexpected error: {other}"),
        }
        assert!(evaluator().validate("context.time == 'business_hours'").is_ok());
    }

    #[test]
    fn test_compiled_expressions_are_cached() {
        let ev = evaluator();
        let ctx = json!({ "a": 1 });
        assert!(ev.evaluate(Some("a == 1"), &ctx));
        assert!(ev.evaluate(Some("a == 1"), &ctx));
        assert!(!ev.evaluate(Some("a == 2"), &ctx));
        assert_eq!(ev.cached_expressions(), 2);

        // Parse failures are never cached
        assert!(!ev.evaluate(Some("a =="), &ctx));
        assert_eq!(ev.cached_expressions(), 2);

        ev.clear_cache();
        assert_eq!(ev.cached_expressions(), 0);
        assert!(ev.evaluate(Some("a == 1"), &ctx));
    }

    #[test]
    fn test_evaluation_root_omits_null_context() {
        let root = evaluation_root(json!({"id": "p"}), json!({"id": "r"}), "read", None);
        assert!(root.get("context").is_none());

        let root = evaluation_root(
            json!({"id": "p"}),
            json!({"id": "r"}),
            "read",
            Some(&Value::Null),
        );
        assert!(root.get("context").is_none());

        let ctx = json!({ "time": "now" });
        let root = evaluation_root(json!({"id": "p"}), json!({"id": "r"}), "read", Some(&ctx));
        assert_eq!(root["context"]["time"], "now");
        assert_eq!(root["action"], "read");
    }
}
