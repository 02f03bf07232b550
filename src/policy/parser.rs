// src/policy/parser.rs

//! Text and list forms of policy rules.
//!
//! Text grammar (lowest precedence first):
//!
//! ```text
//! expr  := and ("or" and)*
//! and   := not ("and" not)*
//! not   := "not" not | atom
//! atom  := "(" expr ")" | "@" | "!" | <kind>:<match>
//! ```
//!
//! A rule with any part that does not parse becomes [`Check::False`] as a
//! whole, so `not <garbage>` denies instead of allowing.

use tracing::warn;

use crate::policy::check::Check;

/// Parse a rule in text form. The empty rule allows everything.
pub fn parse_rule(rule: &str) -> Check {
    let tokens = tokenize(rule);
    if tokens.is_empty() {
        return Check::True;
    }

    let mut parser = Parser { tokens, pos: 0 };
    match parser.expr() {
        Some(check) if parser.pos == parser.tokens.len() => check,
        _ => {
            warn!(rule, "failed to parse rule; denying");
            Check::False
        }
    }
}

/// Parse the legacy list form: an OR of ANDs of single checks. The empty
/// list allows everything.
pub fn parse_list(rule: &[Vec<String>]) -> Check {
    if rule.is_empty() {
        return Check::True;
    }

    let parsed: Option<Vec<Check>> = rule
        .iter()
        .filter(|inner| !inner.is_empty())
        .map(|inner| {
            let mut ands = inner.iter().map(|s| leaf(s)).collect::<Option<Vec<Check>>>()?;
            Some(if ands.len() == 1 {
                ands.remove(0)
            } else {
                Check::And(ands)
            })
        })
        .collect();

    let Some(mut ors) = parsed else {
        warn!(?rule, "failed to parse rule; denying");
        return Check::False;
    };

    match ors.len() {
        0 => Check::False,
        1 => ors.remove(0),
        _ => Check::Or(ors),
    }
}

/// Parse a single leaf check such as `role:admin`. Unknown syntax denies.
pub fn parse_check(token: &str) -> Check {
    leaf(token).unwrap_or(Check::False)
}

fn leaf(token: &str) -> Option<Check> {
    match token {
        "@" => return Some(Check::True),
        "!" => return Some(Check::False),
        _ => {}
    }

    let Some((kind, value)) = token.split_once(':') else {
        warn!(check = token, "unrecognized check");
        return None;
    };

    if kind.is_empty() {
        warn!(check = token, "check without a kind");
        return None;
    }

    Some(match kind {
        "role" => Check::Role(value.to_string()),
        "rule" => Check::Rule(value.to_string()),
        _ => Check::Generic {
            field: kind.to_string(),
            value: value.to_string(),
        },
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    And,
    Or,
    Not,
    Check(String),
}

fn tokenize(rule: &str) -> Vec<Token> {
    let mut tokens = Vec::new();

    for word in rule.split_whitespace() {
        let trimmed_start = word.trim_start_matches('(');
        for _ in 0..(word.len() - trimmed_start.len()) {
            tokens.push(Token::Open);
        }

        let core = trimmed_start.trim_end_matches(')');
        let closes = trimmed_start.len() - core.len();

        if !core.is_empty() {
            tokens.push(match core.to_lowercase().as_str() {
                "and" => Token::And,
                "or" => Token::Or,
                "not" => Token::Not,
                _ => Token::Check(core.to_string()),
            });
        }

        for _ in 0..closes {
            tokens.push(Token::Close);
        }
    }

    tokens
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Option<Check> {
        let mut checks = vec![self.and()?];
        while self.eat(&Token::Or) {
            checks.push(self.and()?);
        }
        Some(collapse(checks, Check::Or))
    }

    fn and(&mut self) -> Option<Check> {
        let mut checks = vec![self.not()?];
        while self.eat(&Token::And) {
            checks.push(self.not()?);
        }
        Some(collapse(checks, Check::And))
    }

    fn not(&mut self) -> Option<Check> {
        if self.eat(&Token::Not) {
            return Some(Check::Not(Box::new(self.not()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Option<Check> {
        match self.tokens.get(self.pos)?.clone() {
            Token::Open => {
                self.pos += 1;
                let inner = self.expr()?;
                self.eat(&Token::Close).then_some(inner)
            }
            Token::Check(text) => {
                self.pos += 1;
                leaf(&text)
            }
            Token::Close | Token::And | Token::Or | Token::Not => None,
        }
    }
}

fn collapse(mut checks: Vec<Check>, combine: fn(Vec<Check>) -> Check) -> Check {
    if checks.len() == 1 {
        checks.remove(0)
    } else {
        combine(checks)
    }
}
