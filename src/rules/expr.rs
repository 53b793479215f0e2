//! Expression rules - a small opt-in DSL behind the `rule_dsl` flag
//!
//! Grammar (case-insensitive keywords):
//!
//! ```text
//! expr      := or
//! or        := and ( "or" and )*
//! and       := unary ( "and" unary )*
//! unary     := "not" unary | "(" expr ")" | predicate
//! predicate := name "(" arg ("," arg)* ")"
//! ```
//!
//! Predicates map onto the same leaf semantics as the template registry.
//! Prefetch capability is derived recursively with conservative defaults:
//! a combinator is capable only when every child is.

use std::fmt;

use crate::types::{
    RuleLeaf, RuleRole, RuleTemplate, SecurityBand, SignalCategory, WatchlistScope,
};

use super::templates::{self, RuleInput};

/// Parsed expression tree.
#[derive(Debug, Clone)]
pub enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Leaf(RuleLeaf),
}

#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token '{0}' at offset {1}")]
    UnexpectedToken(String, usize),
    #[error("unknown predicate '{0}'")]
    UnknownPredicate(String),
    #[error("predicate '{0}': {1}")]
    BadArguments(String, String),
}

impl Expr {
    pub fn evaluate(&self, input: &RuleInput<'_>) -> bool {
        match self {
            Expr::And(children) => children.iter().all(|c| c.evaluate(input)),
            Expr::Or(children) => children.iter().any(|c| c.evaluate(input)),
            Expr::Not(child) => !child.evaluate(input),
            Expr::Leaf(leaf) => templates::evaluate_leaf(leaf, input),
        }
    }

    /// Conservative recursive capability: all children must be capable.
    pub fn prefetch_capable(
        &self,
        prefetch_known: &[SignalCategory],
        watchlist_scope: WatchlistScope,
    ) -> bool {
        match self {
            Expr::And(children) | Expr::Or(children) => children
                .iter()
                .all(|c| c.prefetch_capable(prefetch_known, watchlist_scope)),
            Expr::Not(child) => child.prefetch_capable(prefetch_known, watchlist_scope),
            Expr::Leaf(leaf) => {
                templates::leaf_prefetch_capable(leaf, prefetch_known, watchlist_scope)
            }
        }
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "{s}"),
            Token::Number(n) => write!(f, "{n}"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
        }
    }
}

fn tokenize(raw: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = raw.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push((Token::LParen, i));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, i));
                i += 1;
            }
            ',' => {
                tokens.push((Token::Comma, i));
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().filter(|&&c| c != '_').collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::UnexpectedToken(text.clone(), start))?;
                tokens.push((Token::Number(value), start));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push((Token::Ident(text), start));
            }
            other => return Err(ExprError::UnexpectedToken(other.to_string(), i)),
        }
    }
    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Result<(Token, usize), ExprError> {
        let item = self.tokens.get(self.pos).cloned().ok_or(ExprError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(item)
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExprError> {
        let (token, offset) = self.next()?;
        if &token == expected {
            Ok(())
        } else {
            Err(ExprError::UnexpectedToken(token.to_string(), offset))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut children = vec![self.parse_and()?];
        while matches!(self.peek(), Some(Token::Ident(k)) if k.eq_ignore_ascii_case("or")) {
            self.next()?;
            children.push(self.parse_and()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            Expr::Or(children)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut children = vec![self.parse_unary()?];
        while matches!(self.peek(), Some(Token::Ident(k)) if k.eq_ignore_ascii_case("and")) {
            self.next()?;
            children.push(self.parse_unary()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            Expr::And(children)
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Some(Token::Ident(k)) if k.eq_ignore_ascii_case("not") => {
                self.next()?;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::LParen) => {
                self.next()?;
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            _ => self.parse_predicate(),
        }
    }

    fn parse_predicate(&mut self) -> Result<Expr, ExprError> {
        let (token, offset) = self.next()?;
        let Token::Ident(name) = token else {
            return Err(ExprError::UnexpectedToken(token.to_string(), offset));
        };
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                let (token, _) = self.next()?;
                args.push(token);
                match self.peek() {
                    Some(Token::Comma) => {
                        self.next()?;
                    }
                    _ => break,
                }
            }
        }
        self.expect(&Token::RParen)?;
        build_leaf(&name, &args).map(Expr::Leaf)
    }
}

fn ident_arg<'a>(name: &str, args: &'a [Token], index: usize) -> Result<&'a str, ExprError> {
    match args.get(index) {
        Some(Token::Ident(s)) => Ok(s),
        _ => Err(ExprError::BadArguments(
            name.to_string(),
            format!("expected identifier argument {index}"),
        )),
    }
}

fn number_arg(name: &str, args: &[Token], index: usize) -> Result<f64, ExprError> {
    match args.get(index) {
        Some(Token::Number(n)) => Ok(*n),
        _ => Err(ExprError::BadArguments(
            name.to_string(),
            format!("expected numeric argument {index}"),
        )),
    }
}

fn parse_category(name: &str, raw: &str) -> Result<SignalCategory, ExprError> {
    serde_yaml::from_str::<SignalCategory>(raw)
        .map_err(|_| ExprError::BadArguments(name.to_string(), format!("unknown category '{raw}'")))
}

fn parse_role(name: &str, raw: &str) -> Result<RuleRole, ExprError> {
    serde_yaml::from_str::<RuleRole>(raw)
        .map_err(|_| ExprError::BadArguments(name.to_string(), format!("unknown role '{raw}'")))
}

fn build_leaf(name: &str, args: &[Token]) -> Result<RuleLeaf, ExprError> {
    let template = match name.to_lowercase().as_str() {
        "category_match" => RuleTemplate::CategoryMatch {
            category: parse_category(name, ident_arg(name, args, 0)?)?,
        },
        "category_score" => RuleTemplate::CategoryScore {
            category: parse_category(name, ident_arg(name, args, 0)?)?,
            min: number_arg(name, args, 1)?,
        },
        "group_role" => RuleTemplate::GroupRole {
            group: ident_arg(name, args, 0)?.to_string(),
            role: parse_role(name, ident_arg(name, args, 1)?)?,
        },
        "value_above" => RuleTemplate::ValueAbove {
            isk: number_arg(name, args, 0)?,
        },
        "value_below" => RuleTemplate::ValueBelow {
            isk: number_arg(name, args, 0)?,
        },
        "security_band" => {
            let raw_band = ident_arg(name, args, 0)?;
            // "null" is a YAML keyword, so bands are matched by hand.
            let band = match raw_band.to_lowercase().as_str() {
                "high" => SecurityBand::High,
                "low" => SecurityBand::Low,
                "null" => SecurityBand::Null,
                other => {
                    return Err(ExprError::BadArguments(
                        name.to_string(),
                        format!("unknown band '{other}'"),
                    ))
                }
            };
            RuleTemplate::SecurityBand { bands: vec![band] }
        }
        "attacker_count" => RuleTemplate::AttackerCount {
            min: number_arg(name, args, 0)? as u32,
            max: args.get(1).and_then(|t| match t {
                Token::Number(n) => Some(*n as u32),
                _ => None,
            }),
        },
        "solo_kill" => RuleTemplate::SoloKill,
        other => return Err(ExprError::UnknownPredicate(other.to_string())),
    };
    Ok(RuleLeaf::Template(template))
}

/// Parse an expression string into an AST.
pub fn parse(raw: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(raw)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if let Some((token, offset)) = parser.tokens.get(parser.pos) {
        return Err(ExprError::UnexpectedToken(token.to_string(), *offset));
    }
    Ok(expr)
}
