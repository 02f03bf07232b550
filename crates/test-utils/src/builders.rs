#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use stackdag::api::{InMemoryNetworkApi, NetworkApi, Properties};
use stackdag::config::{
    ConfigFile, EngineSection, RawConfigFile, ResourceConfig, ResourceState, StackSection,
};
use stackdag::dag::{DesiredState, Stack};
use stackdag::resource::{adapter_for, schema_for};
use stackdag::types::FailurePolicy;

pub const RULE: &str = "OS::Neutron::FirewallRule";
pub const POLICY: &str = "OS::Neutron::FirewallPolicy";
pub const FIREWALL: &str = "OS::Neutron::Firewall";

/// Turn a JSON object literal into a property map.
pub fn props(value: Value) -> Properties {
    serde_json::from_value(value).expect("properties must be a JSON object")
}

/// `{"get_resource": name}`.
pub fn get_resource(name: &str) -> Value {
    json!({ "get_resource": name })
}

/// Builder for `Stack` backed by an `InMemoryNetworkApi`.
///
/// Properties go through schema validation, so defaults are applied the
/// same way as for a stack file.
pub struct StackBuilder {
    name: String,
    api: Arc<InMemoryNetworkApi>,
    resources: Vec<(String, &'static str, Option<Properties>)>,
    deps: Vec<(String, String)>,
}

impl StackBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            api: Arc::new(InMemoryNetworkApi::new()),
            resources: Vec::new(),
            deps: Vec::new(),
        }
    }

    pub fn with_api(mut self, api: Arc<InMemoryNetworkApi>) -> Self {
        self.api = api;
        self
    }

    pub fn api(&self) -> Arc<InMemoryNetworkApi> {
        Arc::clone(&self.api)
    }

    /// A present resource of any known type.
    pub fn resource(mut self, name: &str, type_name: &'static str, properties: Value) -> Self {
        self.resources
            .push((name.to_string(), type_name, Some(props(properties))));
        self
    }

    /// A firewall rule with default properties plus `properties`.
    pub fn rule(self, name: &str, properties: Value) -> Self {
        self.resource(name, RULE, properties)
    }

    /// A firewall policy referencing the given rules.
    pub fn policy(self, name: &str, rules: &[&str]) -> Self {
        let refs: Vec<Value> = rules.iter().map(|r| get_resource(r)).collect();
        self.resource(name, POLICY, json!({ "firewall_rules": refs }))
    }

    /// A firewall referencing a policy.
    pub fn firewall(self, name: &str, policy: &str) -> Self {
        self.resource(name, FIREWALL, json!({ "firewall_policy_id": get_resource(policy) }))
    }

    /// A resource that should not exist.
    pub fn absent(mut self, name: &str, type_name: &'static str) -> Self {
        self.resources.push((name.to_string(), type_name, None));
        self
    }

    /// `a` requires `b`.
    pub fn depends(mut self, a: &str, b: &str) -> Self {
        self.deps.push((a.to_string(), b.to_string()));
        self
    }

    pub fn build(self) -> Stack {
        let api: Arc<dyn NetworkApi> = self.api;
        let mut stack = Stack::new(&self.name);

        for (name, type_name, properties) in self.resources {
            let adapter = adapter_for(type_name, Arc::clone(&api)).expect("known resource type");
            let desired = match properties {
                Some(p) => {
                    let schema = schema_for(type_name).expect("known resource type");
                    DesiredState::Present(schema.validate(&p).expect("valid properties"))
                }
                None => DesiredState::Absent,
            };
            stack
                .add_resource(&name, adapter, desired)
                .expect("resource added");
        }
        for (a, b) in self.deps {
            stack.add_dependency(&a, &b).expect("dependency added");
        }
        stack
    }
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                stack: StackSection::default(),
                engine: EngineSection::default(),
                policy: None,
                resource: BTreeMap::new(),
            },
        }
    }

    pub fn stack_name(mut self, name: &str) -> Self {
        self.config.stack.name = name.to_string();
        self
    }

    pub fn max_in_flight(mut self, n: usize) -> Self {
        self.config.engine.max_in_flight = n;
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.config.engine.on_failure = policy;
        self
    }

    pub fn poll_interval(mut self, interval: &str) -> Self {
        self.config.engine.poll_interval = interval.to_string();
        self
    }

    pub fn with_resource(mut self, name: &str, type_name: &str, properties: Value) -> Self {
        self.config.resource.insert(
            name.to_string(),
            ResourceConfig {
                type_name: type_name.to_string(),
                properties: props(properties),
                depends_on: Vec::new(),
                state: ResourceState::Present,
            },
        );
        self
    }

    pub fn depends_on(mut self, name: &str, dep: &str) -> Self {
        if let Some(res) = self.config.resource.get_mut(name) {
            res.depends_on.push(dep.to_string());
        }
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
