// src/policy/check.rs

//! Rule trees and their evaluation.

use std::fmt;

use tracing::warn;

use crate::policy::context::{RequestContext, Target};
use crate::policy::rules::RuleSet;

/// Nesting limit for `rule:` references. Deeper chains (including cycles)
/// evaluate to deny.
pub const MAX_RULE_DEPTH: usize = 16;

/// A parsed policy rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// `@` or the empty rule: always allow.
    True,
    /// `!`, or anything that failed to parse: always deny.
    False,
    /// `role:<name>`
    Role(String),
    /// `rule:<name>`, a reference to another rule in the set.
    Rule(String),
    /// `<field>:<value>`: a credential must equal a literal or a
    /// `%(key)s` target attribute.
    Generic { field: String, value: String },
    Not(Box<Check>),
    And(Vec<Check>),
    Or(Vec<Check>),
}

/// What a check is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct Evaluation<'a> {
    pub rules: &'a RuleSet,
    pub context: &'a RequestContext,
    pub target: &'a Target,
}

impl Check {
    pub fn evaluate(&self, env: &Evaluation<'_>) -> bool {
        evaluate(self, env, 0)
    }
}

fn evaluate(check: &Check, env: &Evaluation<'_>, depth: usize) -> bool {
    match check {
        Check::True => true,
        Check::False => false,
        Check::Role(role) => match substitute(role, env.target) {
            Some(role) => env.context.has_role(&role),
            None => false,
        },
        Check::Rule(name) => {
            if depth >= MAX_RULE_DEPTH {
                warn!(rule = %name, depth, "rule references nested too deeply; denying");
                return false;
            }
            match env.rules.get(name) {
                Some(inner) => evaluate(inner, env, depth + 1),
                None => false,
            }
        }
        Check::Generic { field, value } => {
            let Some(expected) = substitute(value, env.target) else {
                return false;
            };
            env.context
                .credential(field)
                .is_some_and(|actual| actual == unquote(&expected))
        }
        Check::Not(inner) => !evaluate(inner, env, depth),
        Check::And(checks) => checks.iter().all(|c| evaluate(c, env, depth)),
        Check::Or(checks) => checks.iter().any(|c| evaluate(c, env, depth)),
    }
}

/// Replace `%(key)s` placeholders with target attributes. A placeholder
/// naming a missing attribute makes the whole check fail.
fn substitute(template: &str, target: &Target) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("%(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find(")s")?;
        let key = &after[..end];
        out.push_str(target.get(key)?);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Some(out)
}

/// `'literal'` and `"literal"` compare as the bare literal.
fn unquote(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'\'' || bytes[0] == b'"')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Check::True => f.write_str("@"),
            Check::False => f.write_str("!"),
            Check::Role(r) => write!(f, "role:{r}"),
            Check::Rule(r) => write!(f, "rule:{r}"),
            Check::Generic { field, value } => write!(f, "{field}:{value}"),
            Check::Not(inner) => write!(f, "not {inner}"),
            Check::And(checks) => write_joined(f, checks, " and "),
            Check::Or(checks) => write_joined(f, checks, " or "),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, checks: &[Check], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, c) in checks.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{c}")?;
    }
    f.write_str(")")
}
