// src/policy/rules.rs

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use tracing::warn;

use crate::policy::check::Check;
use crate::policy::parser::{parse_list, parse_rule};

/// Mapping from action name to rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: BTreeMap<String, Check>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a policy document: a JSON object whose values are rule strings
    /// or lists of lists of check strings. Values of any other shape become
    /// deny rules.
    pub fn from_json(text: &str) -> Result<RuleSet, serde_json::Error> {
        let raw: BTreeMap<String, Value> = serde_json::from_str(text)?;
        let rules = raw
            .into_iter()
            .map(|(name, value)| {
                let check = rule_from_value(&name, &value);
                (name, check)
            })
            .collect();
        Ok(RuleSet { rules })
    }

    /// Build a rule set from `(action, rule text)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> RuleSet
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        pairs
            .into_iter()
            .map(|(k, v)| (k.into(), parse_rule(v.as_ref())))
            .collect()
    }

    pub fn insert(&mut self, name: impl Into<String>, check: Check) {
        self.rules.insert(name.into(), check);
    }

    pub fn get(&self, name: &str) -> Option<&Check> {
        self.rules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Check)> {
        self.rules.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Add every rule of `other`; on collision `other` wins.
    pub fn merge(&mut self, other: RuleSet) {
        self.rules.extend(other.rules);
    }
}

impl FromIterator<(String, Check)> for RuleSet {
    fn from_iter<T: IntoIterator<Item = (String, Check)>>(iter: T) -> Self {
        RuleSet {
            rules: iter.into_iter().collect(),
        }
    }
}

/// Renders as a JSON object of rule strings.
impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: BTreeMap<&str, String> = self
            .rules
            .iter()
            .map(|(k, v)| (k.as_str(), v.to_string()))
            .collect();
        match serde_json::to_string_pretty(&rendered) {
            Ok(text) => f.write_str(&text),
            Err(_) => Err(fmt::Error),
        }
    }
}

fn rule_from_value(name: &str, value: &Value) -> Check {
    match value {
        Value::String(text) => parse_rule(text),
        Value::Array(outer) => {
            let mut lists = Vec::with_capacity(outer.len());
            for inner in outer {
                let Some(items) = inner.as_array() else {
                    warn!(rule = name, "list rule entry is not a list; denying");
                    return Check::False;
                };
                let mut checks = Vec::with_capacity(items.len());
                for item in items {
                    let Some(s) = item.as_str() else {
                        warn!(rule = name, "list rule item is not a string; denying");
                        return Check::False;
                    };
                    checks.push(s.to_string());
                }
                lists.push(checks);
            }
            parse_list(&lists)
        }
        _ => {
            warn!(rule = name, "rule is neither a string nor a list; denying");
            Check::False
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_rule_forms() {
        let rules = RuleSet::from_json(
            r#"{
                "deny_stack_user": "not role:heat_stack_user",
                "legacy": [["role:a", "role:b"], ["role:c"]],
                "open": [],
                "odd": 42
            }"#,
        )
        .unwrap();

        assert_eq!(rules.len(), 4);
        assert_eq!(
            rules.get("deny_stack_user"),
            Some(&Check::Not(Box::new(Check::Role("heat_stack_user".into()))))
        );
        assert_eq!(rules.get("open"), Some(&Check::True));
        assert_eq!(rules.get("odd"), Some(&Check::False));
        assert_eq!(rules.get("legacy").unwrap().to_string(), "((role:a and role:b) or role:c)");
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(RuleSet::from_json("{not json").is_err());
        assert!(RuleSet::from_json("[1, 2]").is_err());
    }

    #[test]
    fn merge_prefers_incoming_rules() {
        let mut rules = RuleSet::from_pairs([("a", "role:x"), ("b", "role:y")]);
        rules.merge(RuleSet::from_pairs([("b", "!"), ("c", "@")]));
        assert_eq!(rules.names().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(rules.get("b"), Some(&Check::False));
    }

    #[test]
    fn display_renders_json() {
        let rules = RuleSet::from_pairs([("a", "role:x")]);
        let back = RuleSet::from_json(&rules.to_string()).unwrap();
        assert_eq!(back, rules);
    }
}
