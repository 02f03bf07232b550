// src/policy/mod.rs

//! Rule-based policy enforcement.
//!
//! - [`check`] holds the rule tree and its evaluation.
//! - [`parser`] reads the text and list-of-lists rule forms.
//! - [`rules`] is the action → rule mapping loaded from a policy file.
//! - [`context`] describes the caller and the target.
//! - [`source`] locates and reads policy files.
//! - [`enforcer`] owns a rule set and its load lifecycle.

use std::path::PathBuf;

use thiserror::Error;

pub mod check;
pub mod context;
pub mod enforcer;
pub mod parser;
pub mod rules;
pub mod source;

pub use check::{Check, Evaluation};
pub use context::{RequestContext, Target};
pub use enforcer::{Enforcer, ADMIN_RULE, DEFAULT_RULE};
pub use parser::{parse_check, parse_list, parse_rule};
pub use rules::RuleSet;
pub use source::{FilePolicySource, PolicyLocation, PolicySource, StaticPolicySource};

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("action '{action}' is not permitted by policy")]
    Forbidden { action: String },

    #[error("policy file not found: {}", .0.display())]
    PolicyFileNotFound(PathBuf),

    #[error("failed to read policy file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid policy file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PolicyError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, PolicyError::Forbidden { .. })
    }
}
