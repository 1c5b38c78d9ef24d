//! Boolean rules from `validate { ... }` blocks, evaluated over an object's fields.

use crate::ast::Span;
use crate::error::ParserError;
use crate::lexer::TokenType;
use crate::parser::Parser;
use crate::serialization::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// A sibling field, optionally followed by `.member` steps into nested objects.
    Field(Vec<String>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::String(s)) => write!(f, "{s:?}"),
            Expr::Literal(Value::Int(i)) => write!(f, "{i}"),
            Expr::Literal(Value::Float(n)) => write!(f, "{n:?}"),
            Expr::Literal(Value::Bool(b)) => write!(f, "{b}"),
            Expr::Literal(_) => f.write_str("null"),
            Expr::Field(path) => f.write_str(&path.join(".")),
            Expr::Not(inner) => write!(f, "!{inner}"),
            Expr::And(l, r) => write!(f, "({l} && {r})"),
            Expr::Or(l, r) => write!(f, "({l} || {r})"),
            Expr::Compare(l, op, r) => write!(f, "{l} {op} {r}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub expr: Expr,
    pub span: Span,
}

/// Why a rule could not be evaluated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("unknown field '{0}'")]
    UnknownField(String),
    #[error("cannot compare {left} {op} {right}")]
    TypeMismatch {
        op: CmpOp,
        left: &'static str,
        right: &'static str,
    },
    #[error("expected a boolean, found {0}")]
    NotBoolean(&'static str),
}

impl Rule {
    /// Evaluates the rule over `fields`. `Ok(false)` means the rule is violated.
    pub fn check(&self, fields: &BTreeMap<String, Value>) -> Result<bool, RuleError> {
        as_bool(&evaluate(&self.expr, fields)?)
    }
}

pub fn evaluate(expr: &Expr, fields: &BTreeMap<String, Value>) -> Result<Value, RuleError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Field(path) => lookup(fields, path)
            .cloned()
            .ok_or_else(|| RuleError::UnknownField(path.join("."))),
        Expr::Not(inner) => Ok(Value::Bool(!as_bool(&evaluate(inner, fields)?)?)),
        Expr::And(l, r) => {
            if !as_bool(&evaluate(l, fields)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(as_bool(&evaluate(r, fields)?)?))
        }
        Expr::Or(l, r) => {
            if as_bool(&evaluate(l, fields)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(as_bool(&evaluate(r, fields)?)?))
        }
        Expr::Compare(l, op, r) => {
            let left = evaluate(l, fields)?;
            let right = evaluate(r, fields)?;
            compare(&left, *op, &right).map(Value::Bool)
        }
    }
}

fn lookup<'v>(fields: &'v BTreeMap<String, Value>, path: &[String]) -> Option<&'v Value> {
    let (first, rest) = path.split_first()?;
    rest.iter().try_fold(fields.get(first)?, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        _ => None,
    })
}

fn as_bool(value: &Value) -> Result<bool, RuleError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(RuleError::NotBoolean(other.type_name())),
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> Result<bool, RuleError> {
    let mismatch = || RuleError::TypeMismatch {
        op,
        left: left.type_name(),
        right: right.type_name(),
    };

    let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };

    match op {
        CmpOp::Eq | CmpOp::Ne => {
            let equal = match ordering {
                Some(o) => o == Ordering::Equal,
                None if std::mem::discriminant(left) == std::mem::discriminant(right) => left == right,
                None => return Err(mismatch()),
            };
            Ok(equal == (op == CmpOp::Eq))
        }
        _ => {
            let o = ordering.ok_or_else(mismatch)?;
            Ok(match op {
                CmpOp::Gt => o == Ordering::Greater,
                CmpOp::Ge => o != Ordering::Less,
                CmpOp::Lt => o == Ordering::Less,
                _ => o != Ordering::Greater,
            })
        }
    }
}

// === Grammar ===

impl Parser {
    /// Rule ::= Or
    /// Or   ::= And { ( "||" | "or" ) And }
    pub(crate) fn parse_rule(&mut self) -> Result<Rule, ParserError> {
        let start = self.current_token().span();
        let expr = self.parse_rule_or()?;
        Ok(Rule {
            expr,
            span: self.span_from(start),
        })
    }

    fn parse_rule_or(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.parse_rule_and()?;
        while self.match_token(TokenType::Or) || self.match_word("or") {
            let right = self.parse_rule_and()?;
            expr = Expr::Or(Box::new(expr), Box::new(right));
        }
        Ok(expr)
    }

    /// And ::= Not { ( "&&" | "and" ) Not }
    fn parse_rule_and(&mut self) -> Result<Expr, ParserError> {
        let mut expr = self.parse_rule_not()?;
        while self.match_token(TokenType::And) || self.match_word("and") {
            let right = self.parse_rule_not()?;
            expr = Expr::And(Box::new(expr), Box::new(right));
        }
        Ok(expr)
    }

    /// Not ::= ( "!" | "not" ) Not | Cmp
    fn parse_rule_not(&mut self) -> Result<Expr, ParserError> {
        if self.match_token(TokenType::Bang) || self.match_word("not") {
            return Ok(Expr::Not(Box::new(self.parse_rule_not()?)));
        }
        self.parse_rule_comparison()
    }

    /// Cmp ::= Operand [ CmpOp Operand ]
    fn parse_rule_comparison(&mut self) -> Result<Expr, ParserError> {
        let left = self.parse_rule_operand()?;
        let op = match self.current_token().ttype {
            TokenType::Greater => CmpOp::Gt,
            TokenType::GreaterEqual => CmpOp::Ge,
            TokenType::Less => CmpOp::Lt,
            TokenType::LessEqual => CmpOp::Le,
            TokenType::EqualEqual => CmpOp::Eq,
            TokenType::NotEqual => CmpOp::Ne,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_rule_operand()?;
        Ok(Expr::Compare(Box::new(left), op, Box::new(right)))
    }

    /// Operand ::= literal | Ident { "." Ident } | "(" Or ")"
    fn parse_rule_operand(&mut self) -> Result<Expr, ParserError> {
        let token = self.current_token().clone();
        let literal = match token.ttype {
            TokenType::Integer(i) => Value::Int(i),
            TokenType::Float(f) => Value::Float(f),
            TokenType::String(s) => Value::String(s),
            TokenType::True => Value::Bool(true),
            TokenType::False => Value::Bool(false),
            TokenType::Null => Value::Null,
            TokenType::LParen => {
                self.advance();
                let inner = self.parse_rule_or()?;
                self.expect(TokenType::RParen, "')'")?;
                return Ok(inner);
            }
            TokenType::Identifier(name) => {
                self.advance();
                let mut path = vec![name];
                while self.match_token(TokenType::Dot) {
                    let (segment, _) = self.expect_identifier("a field name after '.'")?;
                    path.push(segment);
                }
                return Ok(Expr::Field(path));
            }
            _ => return Err(self.err_unexpected("a field name or literal")),
        };
        self.advance();
        Ok(Expr::Literal(literal))
    }

    fn match_word(&mut self, word: &str) -> bool {
        if self.check_word(word) {
            self.advance();
            true
        } else {
            false
        }
    }
}
