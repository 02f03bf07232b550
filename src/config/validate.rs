// src/config/validate.rs

use std::collections::BTreeMap;

use crate::config::model::{
    ConfigFile, EngineSection, RawConfigFile, ResourceConfig, ResourceState,
};
use crate::dag::{DependencyGraph, SchedulerOptions};
use crate::engine::EngineOptions;
use crate::errors::{Result, StackdagError};
use crate::resource::{reference, schema_for};
use crate::task::{RetryPolicy, RunnerOptions};
use crate::types::parse_duration;

/// Largest accepted `[engine].backoff_factor`.
const MAX_BACKOFF_FACTOR: f64 = 10.0;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = StackdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_resources(&raw)?;
        let engine = engine_options(&raw.engine)?;
        let resource = validate_resources(&raw.resource)?;
        validate_dependencies(&resource)?;
        validate_dag(&resource)?;
        Ok(ConfigFile::new_unchecked(raw.stack, engine, raw.policy, resource))
    }
}

fn ensure_has_resources(cfg: &RawConfigFile) -> Result<()> {
    if cfg.resource.is_empty() {
        return Err(StackdagError::ConfigError(
            "stack file must contain at least one [resource.<name>] section".to_string(),
        ));
    }
    if cfg.stack.name.trim().is_empty() {
        return Err(StackdagError::ConfigError(
            "[stack].name must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn engine_options(engine: &EngineSection) -> Result<EngineOptions> {
    if engine.max_in_flight == 0 {
        return Err(StackdagError::ConfigError(
            "[engine].max_in_flight must be >= 1 (got 0)".to_string(),
        ));
    }
    if !(1.0..=MAX_BACKOFF_FACTOR).contains(&engine.backoff_factor) {
        return Err(StackdagError::ConfigError(format!(
            "[engine].backoff_factor must be between 1.0 and {MAX_BACKOFF_FACTOR} (got {})",
            engine.backoff_factor
        )));
    }

    let duration = |field: &str, value: &str| {
        parse_duration(value)
            .map_err(|e| StackdagError::ConfigError(format!("[engine].{field}: {e}")))
    };

    let poll_interval = duration("poll_interval", &engine.poll_interval)?;
    let max_poll_interval = duration("max_poll_interval", &engine.max_poll_interval)?;
    if max_poll_interval < poll_interval {
        return Err(StackdagError::ConfigError(format!(
            "[engine].max_poll_interval ({}) is shorter than poll_interval ({})",
            engine.max_poll_interval, engine.poll_interval
        )));
    }
    let timeout = engine
        .timeout
        .as_deref()
        .map(|t| duration("timeout", t))
        .transpose()?;

    Ok(EngineOptions {
        scheduler: SchedulerOptions {
            max_in_flight: engine.max_in_flight,
            failure_policy: engine.on_failure,
        },
        runner: RunnerOptions {
            poll_interval,
            max_poll_interval,
            backoff_factor: engine.backoff_factor,
            timeout,
        },
        retry: RetryPolicy::new(engine.max_retries),
    })
}

/// Known types only; present resources get their properties checked
/// against the schema and defaults filled in.
fn validate_resources(
    resources: &BTreeMap<String, ResourceConfig>,
) -> Result<BTreeMap<String, ResourceConfig>> {
    let mut out = BTreeMap::new();
    for (name, res) in resources {
        let schema = schema_for(&res.type_name).ok_or_else(|| {
            StackdagError::ConfigError(format!(
                "resource '{}' has unknown type '{}'",
                name, res.type_name
            ))
        })?;

        let properties = match res.state {
            ResourceState::Present => schema.validate(&res.properties).map_err(|e| {
                StackdagError::ConfigError(format!("resource '{}': {}", name, e))
            })?,
            ResourceState::Absent => res.properties.clone(),
        };

        out.insert(
            name.clone(),
            ResourceConfig {
                properties,
                ..res.clone()
            },
        );
    }
    Ok(out)
}

fn validate_dependencies(resources: &BTreeMap<String, ResourceConfig>) -> Result<()> {
    for (name, res) in resources {
        for dep in &res.depends_on {
            if !resources.contains_key(dep) {
                return Err(StackdagError::ConfigError(format!(
                    "resource '{}' has unknown dependency '{}' in `depends_on`",
                    name, dep
                )));
            }
            if dep == name {
                return Err(StackdagError::ConfigError(format!(
                    "resource '{}' cannot depend on itself in `depends_on`",
                    name
                )));
            }
        }

        for target in reference::collect(&res.properties) {
            if !resources.contains_key(&target) {
                return Err(StackdagError::ConfigError(format!(
                    "resource '{}' references unknown resource '{}' via get_resource",
                    name, target
                )));
            }
            if &target == name {
                return Err(StackdagError::ConfigError(format!(
                    "resource '{}' cannot reference itself via get_resource",
                    name
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(resources: &BTreeMap<String, ResourceConfig>) -> Result<()> {
    let mut graph = DependencyGraph::new();
    for (name, res) in resources {
        graph.add_node(name);
        for dep in &res.depends_on {
            graph.add_dependency(name, dep);
        }
        for target in reference::collect(&res.properties) {
            graph.add_dependency(name, &target);
        }
    }
    graph.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_from_str;
    use crate::types::FailurePolicy;
    use std::time::Duration;

    fn validate(text: &str) -> Result<ConfigFile> {
        ConfigFile::try_from(load_from_str(text)?)
    }

    const MINIMAL: &str = r#"
[resource.r]
type = "OS::Neutron::FirewallRule"
"#;

    #[test]
    fn defaults_apply() {
        let cfg = validate(MINIMAL).unwrap();
        assert_eq!(cfg.stack.name, "stack");
        assert_eq!(cfg.engine.scheduler.max_in_flight, 4);
        assert_eq!(cfg.engine.scheduler.failure_policy, FailurePolicy::SkipDependents);
        assert_eq!(cfg.engine.runner.poll_interval, Duration::from_millis(200));
        assert_eq!(cfg.engine.runner.timeout, None);
        assert_eq!(cfg.engine.retry.max_retries, 0);
        assert!(cfg.policy.is_none());

        let props = &cfg.resource["r"].properties;
        assert_eq!(props["action"], "deny");
        assert_eq!(props["ip_version"], "4");
        assert!(!props.contains_key("protocol"));
    }

    #[test]
    fn engine_section_is_parsed() {
        let cfg = validate(
            r#"
[engine]
max_in_flight = 2
poll_interval = "10ms"
max_poll_interval = "1s"
backoff_factor = 2.0
timeout = "5m"
on_failure = "stop_all"
max_retries = 3

[resource.r]
type = "OS::Neutron::FirewallRule"
"#,
        )
        .unwrap();
        assert_eq!(cfg.engine.scheduler.max_in_flight, 2);
        assert_eq!(cfg.engine.scheduler.failure_policy, FailurePolicy::StopAll);
        assert_eq!(cfg.engine.runner.timeout, Some(Duration::from_secs(300)));
        assert_eq!(cfg.engine.retry.max_retries, 3);
    }

    #[test]
    fn rejects_bad_engine_values() {
        for engine in [
            "max_in_flight = 0",
            "poll_interval = \"fast\"",
            "timeout = \"10d\"",
            "backoff_factor = 0.5",
            "backoff_factor = 1e300",
            "backoff_factor = inf",
            "backoff_factor = nan",
            "poll_interval = \"5s\"\nmax_poll_interval = \"1s\"",
        ] {
            let text = format!("[engine]\n{engine}\n{MINIMAL}");
            assert!(
                matches!(validate(&text), Err(StackdagError::ConfigError(_))),
                "accepted: {engine}"
            );
        }
        let text = format!("[engine]\non_failure = \"panic\"\n{MINIMAL}");
        assert!(matches!(validate(&text), Err(StackdagError::TomlError(_))));
    }

    #[test]
    fn rejects_unknown_type_and_bad_properties() {
        let err = validate("[resource.x]\ntype = \"OS::Nova::Server\"\n").unwrap_err();
        assert!(err.to_string().contains("unknown type"));

        let err = validate(
            "[resource.x]\ntype = \"OS::Neutron::FirewallRule\"\nproperties = { action = \"maybe\" }\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("resource 'x'"));

        let err = validate("[resource.fw]\ntype = \"OS::Neutron::Firewall\"\n").unwrap_err();
        assert!(err.to_string().contains("firewall_policy_id"));
    }

    #[test]
    fn absent_resources_skip_property_checks() {
        let cfg = validate("[resource.fw]\ntype = \"OS::Neutron::Firewall\"\nstate = \"absent\"\n").unwrap();
        assert_eq!(cfg.resource["fw"].state, ResourceState::Absent);
    }

    #[test]
    fn references_must_exist() {
        let err = validate(
            r#"
[resource.p]
type = "OS::Neutron::FirewallPolicy"
properties = { firewall_rules = [{ get_resource = "missing" }] }
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown resource 'missing'"));
    }

    #[test]
    fn empty_stack_is_rejected() {
        assert!(matches!(validate("[stack]\nname = \"x\"\n"), Err(StackdagError::ConfigError(_))));
    }
}
