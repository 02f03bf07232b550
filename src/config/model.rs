// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::api::Properties;
use crate::engine::EngineOptions;
use crate::types::FailurePolicy;

/// Top-level stack file as read from TOML, before validation.
///
/// ```toml
/// [stack]
/// name = "edge"
///
/// [engine]
/// max_in_flight = 4
/// on_failure = "skip_dependents"
///
/// [resource.web_rule]
/// type = "OS::Neutron::FirewallRule"
/// properties = { protocol = "tcp", destination_port = "80", action = "allow" }
///
/// [resource.web_policy]
/// type = "OS::Neutron::FirewallPolicy"
/// properties = { firewall_rules = [{ get_resource = "web_rule" }] }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub stack: StackSection,

    #[serde(default)]
    pub engine: EngineSection,

    /// Absent means no policy enforcement.
    #[serde(default)]
    pub policy: Option<PolicySection>,

    /// All resources from `[resource.<name>]`, keyed by node name.
    #[serde(default)]
    pub resource: BTreeMap<String, ResourceConfig>,
}

/// Validated stack file. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub stack: StackSection,
    pub engine: EngineOptions,
    pub policy: Option<PolicySection>,
    /// Resources with schema defaults applied.
    pub resource: BTreeMap<String, ResourceConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        stack: StackSection,
        engine: EngineOptions,
        policy: Option<PolicySection>,
        resource: BTreeMap<String, ResourceConfig>,
    ) -> Self {
        Self {
            stack,
            engine,
            policy,
            resource,
        }
    }
}

/// `[stack]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StackSection {
    /// Prefix of physical resource names.
    #[serde(default = "default_stack_name")]
    pub name: String,
}

fn default_stack_name() -> String {
    "stack".to_string()
}

impl Default for StackSection {
    fn default() -> Self {
        Self {
            name: default_stack_name(),
        }
    }
}

/// `[engine]` section. Durations are strings like `"200ms"` or `"5m"`.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(default = "default_max_poll_interval")]
    pub max_poll_interval: String,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Per-operation deadline; none when omitted.
    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub on_failure: FailurePolicy,

    /// Retries of retryable API errors per operation.
    #[serde(default)]
    pub max_retries: u32,
}

fn default_max_in_flight() -> usize {
    4
}

fn default_poll_interval() -> String {
    "200ms".to_string()
}

fn default_max_poll_interval() -> String {
    "2s".to_string()
}

fn default_backoff_factor() -> f64 {
    1.5
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            poll_interval: default_poll_interval(),
            max_poll_interval: default_max_poll_interval(),
            backoff_factor: default_backoff_factor(),
            timeout: None,
            on_failure: FailurePolicy::default(),
            max_retries: 0,
        }
    }
}

/// `[policy]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolicySection {
    /// Prefix for action names; `None` looks actions up unprefixed.
    #[serde(default)]
    pub scope: Option<String>,

    #[serde(default = "default_project")]
    pub project: String,

    /// Relative paths are resolved against the stack file's directory.
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    #[serde(default = "default_policy_file")]
    pub policy_file: PathBuf,

    #[serde(default = "default_rule")]
    pub default_rule: String,
}

fn default_project() -> String {
    "stackdag".to_string()
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("policy")
}

fn default_policy_file() -> PathBuf {
    PathBuf::from("policy.json")
}

fn default_rule() -> String {
    crate::policy::DEFAULT_RULE.to_string()
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            scope: None,
            project: default_project(),
            config_dir: default_config_dir(),
            policy_file: default_policy_file(),
            default_rule: default_rule(),
        }
    }
}

/// Whether a resource should exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    #[default]
    Present,
    Absent,
}

/// `[resource.<name>]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResourceConfig {
    /// Resource type, e.g. `OS::Neutron::FirewallRule`.
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub properties: Properties,

    /// Explicit dependencies in addition to `get_resource` references.
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub state: ResourceState,
}
