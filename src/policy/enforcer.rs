// src/policy/enforcer.rs

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::{debug, info, warn};

use crate::policy::check::{Check, Evaluation};
use crate::policy::context::{RequestContext, Target};
use crate::policy::parser::parse_rule;
use crate::policy::rules::RuleSet;
use crate::policy::source::{FilePolicySource, PolicyLocation, PolicySource};
use crate::policy::PolicyError;

/// Rule consulted by [`Enforcer::check_is_admin`], without scope prefix.
pub const ADMIN_RULE: &str = "context_is_admin";

/// Default rule for actions the rule set does not mention.
pub const DEFAULT_RULE: &str = "rule:default";

/// Owns a rule set and its load lifecycle, and answers authorization
/// questions against it.
///
/// Readers take a cheap `Arc` snapshot of the current rule set; writers are
/// serialized among themselves and swap in a new snapshot, so a reader never
/// sees a partially updated set.
pub struct Enforcer {
    scope: Option<String>,
    exc: bool,
    default_rule: Check,
    source: Box<dyn PolicySource>,
    /// `None` until rules are loaded (or after `clear`).
    rules: RwLock<Option<Arc<RuleSet>>>,
    writer: Mutex<()>,
}

impl fmt::Debug for Enforcer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enforcer")
            .field("scope", &self.scope)
            .field("exc", &self.exc)
            .field("default_rule", &self.default_rule.to_string())
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl Enforcer {
    /// Unscoped enforcer that raises `Forbidden` on denial and falls back to
    /// `rule:default`.
    pub fn new(source: impl PolicySource + 'static) -> Self {
        Self {
            scope: None,
            exc: true,
            default_rule: parse_rule(DEFAULT_RULE),
            source: Box::new(source),
            rules: RwLock::new(None),
            writer: Mutex::new(()),
        }
    }

    /// Enforcer reading a policy file.
    pub fn from_location(location: PolicyLocation) -> Self {
        Self::new(FilePolicySource::new(location))
    }

    /// Namespace actions as `<scope>:<action>`.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Whether a denial is returned as `Err(Forbidden)` (`true`) or as
    /// `Ok(false)`.
    pub fn with_exc(mut self, exc: bool) -> Self {
        self.exc = exc;
        self
    }

    pub fn with_default_rule(mut self, rule: Check) -> Self {
        self.default_rule = rule;
        self
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn default_rule(&self) -> &Check {
        &self.default_rule
    }

    pub fn is_loaded(&self) -> bool {
        self.read().is_some()
    }

    /// Snapshot of the current rules (empty when nothing is loaded).
    pub fn rules(&self) -> Arc<RuleSet> {
        self.read().clone().unwrap_or_default()
    }

    /// Load rules from the source if none are loaded yet or `force_reload`
    /// is set. Already loaded rules are otherwise kept as they are.
    pub fn load_rules(&self, force_reload: bool) -> Result<(), PolicyError> {
        if !force_reload && self.is_loaded() {
            return Ok(());
        }

        let _writer = self.lock_writer();
        // Another writer may have loaded while we waited.
        if !force_reload && self.is_loaded() {
            return Ok(());
        }

        let rules = self.source.load(force_reload)?;
        info!(scope = ?self.scope, rules = rules.len(), force_reload, "policy rules loaded");
        self.swap(Some(Arc::new(rules)));
        Ok(())
    }

    /// Install rules directly. With `overwrite` the set is replaced,
    /// otherwise the given rules are merged in and win on collision.
    pub fn set_rules(&self, rules: RuleSet, overwrite: bool) {
        let _writer = self.lock_writer();

        let next = if overwrite {
            rules
        } else {
            let mut merged = self.read().as_deref().cloned().unwrap_or_default();
            merged.merge(rules);
            merged
        };
        debug!(rules = next.len(), overwrite, "policy rules set");
        self.swap(Some(Arc::new(next)));
    }

    /// Drop all rules; the next `enforce` loads from the source again.
    pub fn clear(&self) {
        let _writer = self.lock_writer();
        self.swap(None);
    }

    /// Check whether `context` may perform `action` on `target`.
    ///
    /// Rules are loaded first if needed. The action is looked up as
    /// `<scope>:<action>`; unknown actions use the default rule.
    pub fn enforce(
        &self,
        context: &RequestContext,
        action: &str,
        target: &Target,
    ) -> Result<bool, PolicyError> {
        self.load_rules(false)?;
        let rules = self.rules();

        let full_action = match &self.scope {
            Some(scope) => format!("{scope}:{action}"),
            None => action.to_string(),
        };

        let check = match rules.get(&full_action) {
            Some(check) => check,
            None => {
                debug!(action = %full_action, default = %self.default_rule, "no rule for action; using default");
                &self.default_rule
            }
        };

        let allowed = check.evaluate(&Evaluation {
            rules: &rules,
            context,
            target,
        });
        debug!(action = %full_action, allowed, "policy evaluated");

        if !allowed && self.exc {
            return Err(PolicyError::Forbidden {
                action: full_action,
            });
        }
        Ok(allowed)
    }

    /// Whether `context` satisfies the `context_is_admin` rule. Never
    /// fails: load errors and a missing rule both mean "not admin".
    pub fn check_is_admin(&self, context: &RequestContext) -> bool {
        if let Err(e) = self.load_rules(false) {
            warn!(error = %e, "could not load policy rules for admin check");
            return false;
        }
        let rules = self.rules();
        let target = Target::new();
        rules.get(ADMIN_RULE).is_some_and(|check| {
            check.evaluate(&Evaluation {
                rules: &rules,
                context,
                target: &target,
            })
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<Arc<RuleSet>>> {
        self.rules.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn swap(&self, next: Option<Arc<RuleSet>>) {
        *self.rules.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
