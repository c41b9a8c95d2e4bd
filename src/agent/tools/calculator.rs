//! Arithmetic over spoken-style expressions
//!
//! A small recursive-descent evaluator: `+ - * /`, `^` or `**` for powers,
//! parentheses, percentages (`15%`, `15% of 80`), the constants `pi` and `e`,
//! and a fixed set of functions. Nothing else is callable.

use std::f64::consts::{E, PI};
use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use super::{Tool, parse_arguments};
use crate::{Error, Result};

static PERCENT_OF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*%\s*of\s*(\d+(?:\.\d+)?)")
        .expect("percent-of pattern is valid")
});

static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("percent pattern is valid"));

#[derive(Debug, Deserialize)]
struct CalculatorArgs {
    expression: String,
}

/// Evaluates an arithmetic expression
#[derive(Debug, Clone, Copy, Default)]
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &'static str {
        "calculator"
    }

    fn description(&self) -> &'static str {
        "Calculate a mathematical expression. Supports +, -, *, /, ^, parentheses, \
         percentages, sqrt(), pow(), sin(), cos(), tan(), log(), log10(), exp(), abs(), \
         round(), pi and e."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Expression to evaluate, e.g. \"2 + 2\" or \"15% of 80\"",
                },
            },
            "required": ["expression"],
        })
    }

    async fn execute(&self, arguments: &str) -> Result<String> {
        let args: CalculatorArgs = parse_arguments(arguments)?;
        let value = evaluate(&args.expression)?;
        tracing::debug!(expression = %args.expression, value, "calculated");
        Ok(value.to_string())
    }
}

fn calc_error(message: impl fmt::Display) -> Error {
    Error::Tool(format!("calculator: {message}"))
}

/// Evaluate an arithmetic expression
///
/// # Errors
///
/// Returns a tool error for malformed input, unknown names, or a result that
/// is not a finite number (division by zero, `sqrt(-1)`)
pub fn evaluate(expression: &str) -> Result<f64> {
    let expanded = PERCENT_OF.replace_all(expression, "($1/100)*$2");
    let expanded = PERCENT.replace_all(&expanded, "($1/100)");

    let tokens = tokenize(&expanded)?;
    if tokens.is_empty() {
        return Err(calc_error("empty expression"));
    }
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
    };
    let value = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(calc_error(format!("unexpected {token}")));
    }
    if !value.is_finite() {
        return Err(calc_error("result is not a finite number"));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "number {n}"),
            Self::Ident(name) => write!(f, "name '{name}'"),
            Self::Plus => f.write_str("'+'"),
            Self::Minus => f.write_str("'-'"),
            Self::Star => f.write_str("'*'"),
            Self::Slash => f.write_str("'/'"),
            Self::Caret => f.write_str("'^'"),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::Comma => f.write_str("','"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut text = String::new();
            while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit() || **d == '.') {
                text.push(d);
                chars.next();
            }
            let value = text.parse().map_err(|_| calc_error(format!("bad number '{text}'")))?;
            tokens.push(Token::Number(value));
        } else if c.is_ascii_alphabetic() {
            let mut name = String::new();
            while let Some(&d) = chars.peek().filter(|d| d.is_ascii_alphanumeric() || **d == '_') {
                name.push(d);
                chars.next();
            }
            tokens.push(Token::Ident(name.to_ascii_lowercase()));
        } else {
            chars.next();
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    Token::Caret
                }
                '*' | '×' => Token::Star,
                '/' | '÷' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                ',' => Token::Comma,
                other => return Err(calc_error(format!("unexpected character '{other}'"))),
            };
            tokens.push(token);
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn require(&mut self, token: &Token) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(calc_error(format!("expected {token}")))
        }
    }

    fn expr(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        loop {
            if self.eat(&Token::Plus) {
                value += self.term()?;
            } else if self.eat(&Token::Minus) {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> Result<f64> {
        let mut value = self.unary()?;
        loop {
            if self.eat(&Token::Star) {
                value *= self.unary()?;
            } else if self.eat(&Token::Slash) {
                value /= self.unary()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn unary(&mut self) -> Result<f64> {
        if self.eat(&Token::Minus) {
            return Ok(-self.unary()?);
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        self.power()
    }

    // Right associative, and binds tighter than a leading minus: -2^2 is -4
    fn power(&mut self) -> Result<f64> {
        let base = self.atom()?;
        if self.eat(&Token::Caret) {
            return Ok(base.powf(self.unary()?));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(*n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.require(&Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) if self.eat(&Token::LParen) => {
                let mut args = vec![self.expr()?];
                while self.eat(&Token::Comma) {
                    args.push(self.expr()?);
                }
                self.require(&Token::RParen)?;
                call(name, &args)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "pi" => Ok(PI),
                "e" => Ok(E),
                _ => Err(calc_error(format!("unknown name '{name}'"))),
            },
            Some(token) => Err(calc_error(format!("unexpected {token}"))),
            None => Err(calc_error("unexpected end of expression")),
        }
    }
}

fn call(name: &str, args: &[f64]) -> Result<f64> {
    let value = match (name, args) {
        ("sqrt", [x]) => x.sqrt(),
        ("pow", [x, y]) => x.powf(*y),
        ("sin", [x]) => x.sin(),
        ("cos", [x]) => x.cos(),
        ("tan", [x]) => x.tan(),
        ("log", [x]) => x.ln(),
        ("log", [x, base]) => x.log(*base),
        ("log10", [x]) => x.log10(),
        ("exp", [x]) => x.exp(),
        ("abs", [x]) => x.abs(),
        ("round", [x]) => x.round(),
        _ => {
            return Err(calc_error(format!(
                "unknown function {name}() with {} argument(s)",
                args.len()
            )));
        }
    };
    Ok(value)
}
