// src/resource/neutron.rs

//! Generic adapter for network-service resources.
//!
//! All firewall resource types share the same lifecycle: create with the
//! prepared properties and poll until built, update with the property diff,
//! delete and confirm the resource is gone. Only the schema (and with it the
//! API collection) differs per type.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::api::{
    ApiError, NetworkApi, Properties, RemoteObject, STATUS_ACTIVE, STATUS_DOWN, STATUS_ERROR,
};
use crate::resource::{ResourceAdapter, ResourceSchema};
use crate::task::{Progress, Step, TaskError, TaskOutput};

pub struct NeutronResource {
    schema: &'static ResourceSchema,
    api: Arc<dyn NetworkApi>,
}

impl fmt::Debug for NeutronResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NeutronResource")
            .field("type", &self.schema.type_name)
            .finish_non_exhaustive()
    }
}

impl NeutronResource {
    pub fn new(schema: &'static ResourceSchema, api: Arc<dyn NetworkApi>) -> Self {
        Self { schema, api }
    }

    /// Properties as sent on create: nulls dropped, `name` defaulted to the
    /// physical resource name when the type has a name property.
    pub fn prepare_properties(&self, props: &Properties, physical_name: &str) -> Properties {
        let mut out: Properties = props
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if self.schema.property("name").is_some() {
            out.entry("name".to_string())
                .or_insert_with(|| serde_json::Value::String(physical_name.to_string()));
        }
        out
    }

    /// Interpret a remote status: built, still building, or failed.
    fn is_built(&self, obj: &RemoteObject) -> Result<bool, TaskError> {
        match obj.status.as_str() {
            STATUS_ACTIVE | STATUS_DOWN => Ok(true),
            s if s.starts_with("PENDING_") => Ok(false),
            STATUS_ERROR => Err(TaskError::ResourceFailed(format!(
                "{} {} went into ERROR",
                self.schema.collection, obj.id
            ))),
            other => Err(TaskError::ResourceFailed(format!(
                "{} {} has unknown status {other}",
                self.schema.collection, obj.id
            ))),
        }
    }
}

impl ResourceAdapter for NeutronResource {
    fn schema(&self) -> &'static ResourceSchema {
        self.schema
    }

    fn handle_create(&self, physical_name: &str, props: &Properties) -> Result<String, ApiError> {
        let body = self.prepare_properties(props, physical_name);
        let created = self.api.create(self.schema.collection, &body)?;
        info!(
            collection = self.schema.collection,
            id = %created.id,
            name = physical_name,
            "create requested"
        );
        Ok(created.id)
    }

    fn check_create_complete(&self, id: &str) -> Result<bool, TaskError> {
        let obj = self.api.show(self.schema.collection, id)?;
        self.is_built(&obj)
    }

    fn handle_update(&self, id: &str, diff: &Properties) -> Result<Option<Box<dyn Step>>, ApiError> {
        if !diff.is_empty() {
            self.api.update(self.schema.collection, id, diff)?;
            debug!(collection = self.schema.collection, id, keys = diff.len(), "update applied");
        }
        Ok(None)
    }

    fn handle_delete(&self, id: &str) -> Result<Option<Box<dyn Step>>, ApiError> {
        match self.api.delete(self.schema.collection, id) {
            Ok(()) => Ok(Some(Box::new(ConfirmDelete::new(
                Arc::clone(&self.api),
                self.schema.collection,
                id,
            )))),
            Err(e) if e.is_not_found() => {
                debug!(collection = self.schema.collection, id, "already deleted");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn show_resource(&self, id: &str) -> Result<RemoteObject, ApiError> {
        self.api.show(self.schema.collection, id)
    }
}

/// Polls `show` until the API reports the resource as not found.
pub struct ConfirmDelete {
    api: Arc<dyn NetworkApi>,
    collection: &'static str,
    id: String,
}

impl ConfirmDelete {
    pub fn new(api: Arc<dyn NetworkApi>, collection: &'static str, id: &str) -> Self {
        Self {
            api,
            collection,
            id: id.to_string(),
        }
    }
}

impl Step for ConfirmDelete {
    fn advance(&mut self) -> Result<Progress, TaskError> {
        match self.api.show(self.collection, &self.id) {
            Ok(obj) => {
                debug!(collection = self.collection, id = %self.id, status = %obj.status, "still deleting");
                Ok(Progress::Pending)
            }
            Err(e) if e.is_not_found() => Ok(Progress::Complete(TaskOutput::default())),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiOp, Fault, InMemoryNetworkApi};
    use crate::resource::firewall::FIREWALL_RULE;
    use serde_json::json;

    fn setup(settle: u32) -> (Arc<InMemoryNetworkApi>, NeutronResource) {
        let api = Arc::new(InMemoryNetworkApi::new().with_settle_polls(settle));
        let res = NeutronResource::new(&FIREWALL_RULE, api.clone());
        (api, res)
    }

    #[test]
    fn prepare_defaults_name_and_drops_nulls() {
        let (_api, res) = setup(0);
        let props: Properties =
            serde_json::from_value(json!({"protocol": null, "action": "allow"})).unwrap();
        let body = res.prepare_properties(&props, "stack-web");
        assert_eq!(body, serde_json::from_value::<Properties>(json!({
            "action": "allow",
            "name": "stack-web"
        })).unwrap());
    }

    #[test]
    fn create_then_poll_until_built() {
        let (_api, res) = setup(1);
        let id = res.handle_create("stack-r", &Properties::new()).unwrap();
        assert!(!res.check_create_complete(&id).unwrap());
        assert!(res.check_create_complete(&id).unwrap());
    }

    #[test]
    fn delete_of_missing_resource_needs_no_confirmation() {
        let (api, res) = setup(0);
        assert!(res.handle_delete("nope").unwrap().is_none());
        assert_eq!(api.count(ApiOp::Show), 0);
    }

    #[test]
    fn delete_returns_confirm_step() {
        let (_api, res) = setup(1);
        let id = res.handle_create("stack-r", &Properties::new()).unwrap();
        let mut confirm = res.handle_delete(&id).unwrap().expect("confirm step");
        assert_eq!(confirm.advance().unwrap(), Progress::Pending);
        assert_eq!(confirm.advance().unwrap(), Progress::Complete(TaskOutput::default()));
    }

    #[test]
    fn non_404_delete_errors_propagate() {
        let (api, res) = setup(0);
        let id = res.handle_create("stack-r", &Properties::new()).unwrap();
        api.inject(Fault {
            op: ApiOp::Delete,
            name: None,
            error: ApiError::Status {
                status: 500,
                message: "boom".into(),
            },
            times: None,
        });
        assert_eq!(res.handle_delete(&id).err().unwrap().status_code(), 500);
    }
}
