// src/resource/schema.rs

//! Static, typed property schemas for resource types.
//!
//! Each resource type declares its properties once as a `static`
//! [`ResourceSchema`]; stack definitions are checked against it when the
//! stack file is validated, so the engine never has to inspect property
//! types at runtime.

use serde_json::Value;

use crate::api::Properties;
use crate::errors::{Result, StackdagError};
use crate::resource::reference;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    String,
    Boolean,
    Integer,
    List,
}

/// Default applied when a property is omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    /// Explicit "no value"; the property is left out of API requests.
    Null,
    Bool(bool),
    Str(&'static str),
}

impl DefaultValue {
    fn to_value(self) -> Value {
        match self {
            DefaultValue::Null => Value::Null,
            DefaultValue::Bool(b) => Value::Bool(b),
            DefaultValue::Str(s) => Value::String(s.to_string()),
        }
    }
}

/// Declaration of a single property.
#[derive(Debug, Clone, Copy)]
pub struct PropertySchema {
    pub name: &'static str,
    pub kind: PropertyType,
    pub required: bool,
    pub default: Option<DefaultValue>,
    /// Allowed string values; `None` inside the slice admits null.
    /// An empty slice means "anything of the right type".
    pub allowed_values: &'static [Option<&'static str>],
    /// Whether the property may change without replacing the resource.
    pub update_allowed: bool,
}

impl PropertySchema {
    pub const fn new(name: &'static str, kind: PropertyType) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            allowed_values: &[],
            update_allowed: false,
        }
    }

    pub const fn string(name: &'static str) -> Self {
        Self::new(name, PropertyType::String)
    }

    pub const fn boolean(name: &'static str) -> Self {
        Self::new(name, PropertyType::Boolean)
    }

    pub const fn list(name: &'static str) -> Self {
        Self::new(name, PropertyType::List)
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn default(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    pub const fn allowed(mut self, values: &'static [Option<&'static str>]) -> Self {
        self.allowed_values = values;
        self
    }

    pub const fn updatable(mut self) -> Self {
        self.update_allowed = true;
        self
    }

    /// Check (and lightly coerce) a supplied value.
    ///
    /// Numbers and booleans are accepted for string properties and rendered
    /// as strings, so `destination_port = 80` works in a stack file.
    fn check_value(&self, value: &Value) -> std::result::Result<Value, String> {
        if value.is_null() {
            if self.required {
                return Err(format!("property '{}' must not be null", self.name));
            }
            return Ok(Value::Null);
        }

        let coerced = match (self.kind, value) {
            (_, v) if reference::target_of(v).is_some() => {
                if self.kind != PropertyType::String {
                    return Err(format!(
                        "property '{}' cannot hold a resource reference",
                        self.name
                    ));
                }
                return Ok(v.clone());
            }
            (PropertyType::String, Value::String(_)) => value.clone(),
            (PropertyType::String, Value::Number(n)) => Value::String(n.to_string()),
            (PropertyType::String, Value::Bool(b)) => Value::String(b.to_string()),
            (PropertyType::Boolean, Value::Bool(_)) => value.clone(),
            (PropertyType::Integer, Value::Number(n)) if n.is_i64() => value.clone(),
            (PropertyType::List, Value::Array(items)) => {
                for item in items {
                    if !(item.is_string() || reference::target_of(item).is_some()) {
                        return Err(format!(
                            "property '{}' must be a list of strings or resource references",
                            self.name
                        ));
                    }
                }
                value.clone()
            }
            (kind, other) => {
                return Err(format!(
                    "property '{}' expects {:?}, got {}",
                    self.name, kind, other
                ));
            }
        };

        if !self.allowed_values.is_empty() {
            let s = coerced.as_str();
            if !self.allowed_values.iter().any(|allowed| *allowed == s) {
                return Err(format!(
                    "property '{}' value {} is not one of {:?}",
                    self.name, coerced, self.allowed_values
                ));
            }
        }

        Ok(coerced)
    }
}

/// Schema of a resource type.
#[derive(Debug)]
pub struct ResourceSchema {
    /// Stack-file type name, e.g. `OS::Neutron::Firewall`.
    pub type_name: &'static str,
    /// Remote API collection name, e.g. `firewall`.
    pub collection: &'static str,
    pub properties: &'static [PropertySchema],
    /// Attributes readable from the live remote object.
    pub attributes: &'static [&'static str],
}

impl ResourceSchema {
    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains(&name)
    }

    /// Validate user-supplied properties and apply defaults.
    ///
    /// Null-valued properties (including null defaults) are dropped from the
    /// result.
    pub fn validate(&self, supplied: &Properties) -> Result<Properties> {
        for key in supplied.keys() {
            if self.property(key).is_none() {
                return Err(StackdagError::ConfigError(format!(
                    "unknown property '{}' for {}",
                    key, self.type_name
                )));
            }
        }

        let mut out = Properties::new();
        for prop in self.properties {
            let value = match supplied.get(prop.name) {
                Some(v) => prop
                    .check_value(v)
                    .map_err(|e| StackdagError::ConfigError(format!("{}: {e}", self.type_name)))?,
                None if prop.required => {
                    return Err(StackdagError::ConfigError(format!(
                        "{}: missing required property '{}'",
                        self.type_name, prop.name
                    )));
                }
                None => match prop.default {
                    Some(d) => d.to_value(),
                    None => continue,
                },
            };

            if !value.is_null() {
                out.insert(prop.name.to_string(), value);
            }
        }

        Ok(out)
    }

    /// Ensure every key of an update diff may be changed in place.
    pub fn check_updatable(&self, diff: &Properties) -> std::result::Result<(), String> {
        let fixed: Vec<&str> = diff
            .keys()
            .filter(|k| !self.property(k).is_some_and(|p| p.update_allowed))
            .map(String::as_str)
            .collect();

        if fixed.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "{} does not allow updating {:?}",
                self.type_name, fixed
            ))
        }
    }
}
