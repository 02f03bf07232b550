// src/resource/mod.rs

//! Resource adapters.
//!
//! An adapter translates lifecycle requests from the convergence engine
//! into calls against the [`NetworkApi`](crate::api::NetworkApi):
//!
//! - [`schema`] holds the static typed property schema descriptors.
//! - [`neutron`] is the generic network-resource adapter and its
//!   confirm-delete step.
//! - [`firewall`] declares the firewall, firewall policy and firewall rule
//!   types.
//! - [`reference`] handles `get_resource` references between nodes.

use std::fmt::Debug;
use std::sync::Arc;

use serde_json::Value;

use crate::api::{ApiError, NetworkApi, Properties, RemoteObject};
use crate::task::{Step, TaskError};

pub mod firewall;
pub mod neutron;
pub mod reference;
pub mod schema;

pub use firewall::{resource_mapping, schema_for};
pub use neutron::{ConfirmDelete, NeutronResource};
pub use schema::{DefaultValue, PropertySchema, PropertyType, ResourceSchema};

/// Lifecycle contract between the engine and a resource type.
///
/// Handlers perform a single remote request. Anything that has to wait for
/// the remote side to settle is expressed as a [`Step`] (create completion
/// is polled through [`check_create_complete`](Self::check_create_complete)).
pub trait ResourceAdapter: Send + Sync + Debug {
    fn schema(&self) -> &'static ResourceSchema;

    /// Issue the create request; returns the physical id.
    fn handle_create(&self, physical_name: &str, props: &Properties) -> Result<String, ApiError>;

    /// Whether a created resource has finished building.
    fn check_create_complete(&self, id: &str) -> Result<bool, TaskError>;

    /// Apply a property diff. `Some(step)` means the update completes
    /// asynchronously.
    fn handle_update(&self, id: &str, diff: &Properties) -> Result<Option<Box<dyn Step>>, ApiError>;

    /// Request deletion. `Some(step)` confirms the resource is gone; `None`
    /// means there is nothing left to wait for.
    fn handle_delete(&self, id: &str) -> Result<Option<Box<dyn Step>>, ApiError>;

    /// Current remote state, used for refresh and diffing.
    fn show_resource(&self, id: &str) -> Result<RemoteObject, ApiError>;

    /// Read attribute `name` from the live remote object. Attributes the
    /// remote object does not carry read as null.
    fn resolve_attribute(&self, id: &str, name: &str) -> Result<Value, ApiError> {
        let obj = self.show_resource(id)?;
        Ok(match name {
            "id" => Value::String(obj.id),
            "status" => Value::String(obj.status),
            _ => obj.properties.get(name).cloned().unwrap_or(Value::Null),
        })
    }
}

/// Build the adapter for a stack-file type name, if the type is known.
pub fn adapter_for(type_name: &str, api: Arc<dyn NetworkApi>) -> Option<Arc<dyn ResourceAdapter>> {
    let schema = schema_for(type_name)?;
    Some(Arc::new(NeutronResource::new(schema, api)))
}
