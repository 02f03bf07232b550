// src/resource/firewall.rs

//! Firewall-as-a-service resource types.

use std::collections::BTreeMap;

use crate::resource::schema::{DefaultValue, PropertySchema, ResourceSchema};

pub static FIREWALL: ResourceSchema = ResourceSchema {
    type_name: "OS::Neutron::Firewall",
    collection: "firewall",
    properties: &[
        PropertySchema::string("name").updatable(),
        PropertySchema::string("description").updatable(),
        PropertySchema::boolean("admin_state_up")
            .default(DefaultValue::Bool(true))
            .updatable(),
        PropertySchema::string("firewall_policy_id")
            .required()
            .updatable(),
    ],
    attributes: &[
        "id",
        "name",
        "description",
        "admin_state_up",
        "firewall_policy_id",
        "status",
        "tenant_id",
    ],
};

pub static FIREWALL_POLICY: ResourceSchema = ResourceSchema {
    type_name: "OS::Neutron::FirewallPolicy",
    collection: "firewall_policy",
    properties: &[
        PropertySchema::string("name").updatable(),
        PropertySchema::string("description").updatable(),
        PropertySchema::boolean("shared")
            .default(DefaultValue::Bool(false))
            .updatable(),
        PropertySchema::boolean("audited")
            .default(DefaultValue::Bool(false))
            .updatable(),
        PropertySchema::list("firewall_rules").required().updatable(),
    ],
    attributes: &[
        "id",
        "name",
        "description",
        "firewall_rules",
        "shared",
        "audited",
        "tenant_id",
    ],
};

pub static FIREWALL_RULE: ResourceSchema = ResourceSchema {
    type_name: "OS::Neutron::FirewallRule",
    collection: "firewall_rule",
    properties: &[
        PropertySchema::string("name").updatable(),
        PropertySchema::string("description").updatable(),
        PropertySchema::boolean("shared")
            .default(DefaultValue::Bool(false))
            .updatable(),
        PropertySchema::string("protocol")
            .allowed(&[Some("tcp"), Some("udp"), Some("icmp"), None])
            .default(DefaultValue::Null)
            .updatable(),
        PropertySchema::string("ip_version")
            .allowed(&[Some("4"), Some("6")])
            .default(DefaultValue::Str("4"))
            .updatable(),
        PropertySchema::string("source_ip_address")
            .default(DefaultValue::Null)
            .updatable(),
        PropertySchema::string("destination_ip_address")
            .default(DefaultValue::Null)
            .updatable(),
        PropertySchema::string("source_port")
            .default(DefaultValue::Null)
            .updatable(),
        PropertySchema::string("destination_port")
            .default(DefaultValue::Null)
            .updatable(),
        PropertySchema::string("action")
            .allowed(&[Some("allow"), Some("deny")])
            .default(DefaultValue::Str("deny"))
            .updatable(),
        PropertySchema::boolean("enabled")
            .default(DefaultValue::Bool(true))
            .updatable(),
    ],
    attributes: &[
        "id",
        "name",
        "description",
        "firewall_policy_id",
        "shared",
        "protocol",
        "ip_version",
        "source_ip_address",
        "destination_ip_address",
        "source_port",
        "destination_port",
        "action",
        "enabled",
        "position",
        "tenant_id",
    ],
};

/// All resource types this crate knows, keyed by stack-file type name.
pub fn resource_mapping() -> BTreeMap<&'static str, &'static ResourceSchema> {
    [&FIREWALL, &FIREWALL_POLICY, &FIREWALL_RULE]
        .into_iter()
        .map(|s| (s.type_name, s))
        .collect()
}

pub fn schema_for(type_name: &str) -> Option<&'static ResourceSchema> {
    resource_mapping().get(type_name).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Properties;
    use serde_json::json;

    #[test]
    fn mapping_covers_all_types() {
        let names: Vec<_> = resource_mapping().into_keys().collect();
        assert_eq!(
            names,
            vec![
                "OS::Neutron::Firewall",
                "OS::Neutron::FirewallPolicy",
                "OS::Neutron::FirewallRule"
            ]
        );
        assert!(schema_for("OS::Nova::Server").is_none());
    }

    #[test]
    fn firewall_rule_defaults() {
        let out = FIREWALL_RULE.validate(&Properties::new()).unwrap();
        assert_eq!(out["ip_version"], json!("4"));
        assert_eq!(out["action"], json!("deny"));
        assert_eq!(out["enabled"], json!(true));
        assert!(!out.contains_key("protocol"));
    }

    #[test]
    fn attributes_are_declared_per_type() {
        assert!(FIREWALL.has_attribute("status"));
        assert!(FIREWALL_POLICY.has_attribute("firewall_rules"));
        assert!(FIREWALL_RULE.has_attribute("position"));
        assert!(!FIREWALL_RULE.has_attribute("status"));
        assert!(!FIREWALL.has_attribute("bogus"));
    }

    #[test]
    fn firewall_requires_policy_id() {
        assert!(FIREWALL.validate(&Properties::new()).is_err());
    }

    #[test]
    fn firewall_rule_rejects_unknown_protocol() {
        let props: Properties = serde_json::from_value(json!({"protocol": "sctp"})).unwrap();
        assert!(FIREWALL_RULE.validate(&props).is_err());
    }
}
