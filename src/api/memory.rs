// src/api/memory.rs

//! In-memory [`NetworkApi`] implementation.
//!
//! Objects live in a map keyed by `(collection, id)`. To exercise the
//! polling paths of the engine, creates and deletes can be configured to
//! "settle" only after a number of `show` calls:
//!
//! - a created object reports `PENDING_CREATE` until it has been shown
//!   `settle_polls` times, then `ACTIVE`;
//! - a deleted object reports `PENDING_DELETE` for `settle_polls` shows and
//!   then disappears (`show` returns 404).
//!
//! Faults can be injected per operation and per resource name, and every
//! call is recorded for assertions.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, trace};
use uuid::Uuid;

use super::{
    ApiError, NetworkApi, Properties, RemoteObject, STATUS_ACTIVE, STATUS_PENDING_CREATE,
    STATUS_PENDING_DELETE,
};

/// Operation kinds, used for call recording and fault matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOp {
    Create,
    Update,
    Delete,
    Show,
}

/// A recorded API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCall {
    pub op: ApiOp,
    pub collection: String,
    /// Resource id for update/delete/show; `None` for create.
    pub id: Option<String>,
}

/// An injected failure.
///
/// Matches calls of `op` against resources whose `name` property equals
/// `name` (or any resource when `name` is `None`). `times = None` fails
/// forever; `Some(n)` fails the next `n` matching calls.
#[derive(Debug, Clone)]
pub struct Fault {
    pub op: ApiOp,
    pub name: Option<String>,
    pub error: ApiError,
    pub times: Option<u32>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    properties: Properties,
    status: String,
    polls_left: u32,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<(String, String), StoredObject>,
    faults: Vec<Fault>,
    calls: Vec<ApiCall>,
}

#[derive(Debug, Default)]
pub struct InMemoryNetworkApi {
    inner: Mutex<Inner>,
    settle_polls: u32,
}

impl InMemoryNetworkApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make creates and deletes take `polls` calls to `show` to settle.
    pub fn with_settle_polls(mut self, polls: u32) -> Self {
        self.settle_polls = polls;
        self
    }

    pub fn inject(&self, fault: Fault) {
        self.lock().faults.push(fault);
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    /// Number of calls of `op` made so far.
    pub fn count(&self, op: ApiOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op == op).count()
    }

    /// Number of objects currently stored (including pending deletes).
    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look at a stored object without recording a call.
    pub fn peek(&self, collection: &str, id: &str) -> Option<RemoteObject> {
        let inner = self.lock();
        inner
            .objects
            .get(&(collection.to_string(), id.to_string()))
            .map(|o| RemoteObject {
                id: id.to_string(),
                status: o.status.clone(),
                properties: o.properties.clone(),
            })
    }

    /// Remove an object out-of-band, as if someone deleted it behind the
    /// engine's back.
    pub fn forget(&self, collection: &str, id: &str) -> bool {
        self.lock()
            .objects
            .remove(&(collection.to_string(), id.to_string()))
            .is_some()
    }

    /// Overwrite a property out-of-band (drift).
    pub fn tamper(&self, collection: &str, id: &str, key: &str, value: serde_json::Value) {
        if let Some(obj) = self
            .lock()
            .objects
            .get_mut(&(collection.to_string(), id.to_string()))
        {
            obj.properties.insert(key.to_string(), value);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Inner {
    fn record(&mut self, op: ApiOp, collection: &str, id: Option<&str>) {
        self.calls.push(ApiCall {
            op,
            collection: collection.to_string(),
            id: id.map(str::to_string),
        });
    }

    /// Return the injected error for this call, consuming one use of it.
    fn take_fault(&mut self, op: ApiOp, name: Option<&str>) -> Option<ApiError> {
        let idx = self.faults.iter().position(|f| {
            f.op == op
                && f.times != Some(0)
                && match (&f.name, name) {
                    (None, _) => true,
                    (Some(want), Some(have)) => want == have,
                    (Some(_), None) => false,
                }
        })?;

        let fault = &mut self.faults[idx];
        if let Some(n) = fault.times.as_mut() {
            *n -= 1;
        }
        Some(fault.error.clone())
    }

    fn name_of(&self, collection: &str, id: &str) -> Option<String> {
        self.objects
            .get(&(collection.to_string(), id.to_string()))
            .and_then(|o| o.properties.get("name"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

impl NetworkApi for InMemoryNetworkApi {
    fn create(&self, collection: &str, body: &Properties) -> Result<RemoteObject, ApiError> {
        let mut inner = self.lock();
        inner.record(ApiOp::Create, collection, None);

        let name = body.get("name").and_then(|v| v.as_str());
        if let Some(err) = inner.take_fault(ApiOp::Create, name) {
            debug!(collection, ?name, error = %err, "injected create failure");
            return Err(err);
        }

        let id = Uuid::new_v4().to_string();
        let status = if self.settle_polls == 0 {
            STATUS_ACTIVE
        } else {
            STATUS_PENDING_CREATE
        };

        inner.objects.insert(
            (collection.to_string(), id.clone()),
            StoredObject {
                properties: body.clone(),
                status: status.to_string(),
                polls_left: self.settle_polls,
            },
        );
        debug!(collection, %id, status, "created remote object");

        Ok(RemoteObject {
            id,
            status: status.to_string(),
            properties: body.clone(),
        })
    }

    fn update(&self, collection: &str, id: &str, diff: &Properties) -> Result<(), ApiError> {
        let mut inner = self.lock();
        inner.record(ApiOp::Update, collection, Some(id));

        let name = inner.name_of(collection, id);
        if let Some(err) = inner.take_fault(ApiOp::Update, name.as_deref()) {
            return Err(err);
        }

        let obj = inner
            .objects
            .get_mut(&(collection.to_string(), id.to_string()))
            .ok_or_else(|| ApiError::not_found(collection, id))?;
        for (k, v) in diff {
            obj.properties.insert(k.clone(), v.clone());
        }
        debug!(collection, id, keys = diff.len(), "updated remote object");
        Ok(())
    }

    fn delete(&self, collection: &str, id: &str) -> Result<(), ApiError> {
        let mut inner = self.lock();
        inner.record(ApiOp::Delete, collection, Some(id));

        let name = inner.name_of(collection, id);
        if let Some(err) = inner.take_fault(ApiOp::Delete, name.as_deref()) {
            return Err(err);
        }

        let key = (collection.to_string(), id.to_string());
        if self.settle_polls == 0 {
            return match inner.objects.remove(&key) {
                Some(_) => Ok(()),
                None => Err(ApiError::not_found(collection, id)),
            };
        }

        let obj = inner
            .objects
            .get_mut(&key)
            .ok_or_else(|| ApiError::not_found(collection, id))?;
        obj.status = STATUS_PENDING_DELETE.to_string();
        obj.polls_left = self.settle_polls;
        debug!(collection, id, "remote object pending delete");
        Ok(())
    }

    fn show(&self, collection: &str, id: &str) -> Result<RemoteObject, ApiError> {
        let mut inner = self.lock();
        inner.record(ApiOp::Show, collection, Some(id));

        let name = inner.name_of(collection, id);
        if let Some(err) = inner.take_fault(ApiOp::Show, name.as_deref()) {
            return Err(err);
        }

        let key = (collection.to_string(), id.to_string());
        let obj = inner
            .objects
            .get_mut(&key)
            .ok_or_else(|| ApiError::not_found(collection, id))?;

        if obj.polls_left > 0 {
            obj.polls_left -= 1;
        } else if obj.status == STATUS_PENDING_CREATE {
            obj.status = STATUS_ACTIVE.to_string();
        } else if obj.status == STATUS_PENDING_DELETE {
            inner.objects.remove(&key);
            trace!(collection, id, "pending delete settled");
            return Err(ApiError::not_found(collection, id));
        }

        Ok(RemoteObject {
            id: id.to_string(),
            status: obj.status.clone(),
            properties: obj.properties.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(name: &str) -> Properties {
        let mut p = Properties::new();
        p.insert("name".into(), json!(name));
        p
    }

    #[test]
    fn create_show_delete_without_settling() {
        let api = InMemoryNetworkApi::new();
        let obj = api.create("firewall", &body("fw")).unwrap();
        assert_eq!(obj.status, STATUS_ACTIVE);

        let shown = api.show("firewall", &obj.id).unwrap();
        assert_eq!(shown.properties["name"], json!("fw"));

        api.delete("firewall", &obj.id).unwrap();
        assert!(api.show("firewall", &obj.id).unwrap_err().is_not_found());
        assert!(api.delete("firewall", &obj.id).unwrap_err().is_not_found());
    }

    #[test]
    fn settling_create_and_delete_take_polls() {
        let api = InMemoryNetworkApi::new().with_settle_polls(2);
        let obj = api.create("firewall_rule", &body("r")).unwrap();
        assert_eq!(obj.status, STATUS_PENDING_CREATE);

        assert_eq!(api.show("firewall_rule", &obj.id).unwrap().status, STATUS_PENDING_CREATE);
        assert_eq!(api.show("firewall_rule", &obj.id).unwrap().status, STATUS_PENDING_CREATE);
        assert_eq!(api.show("firewall_rule", &obj.id).unwrap().status, STATUS_ACTIVE);

        api.delete("firewall_rule", &obj.id).unwrap();
        assert_eq!(api.show("firewall_rule", &obj.id).unwrap().status, STATUS_PENDING_DELETE);
        assert_eq!(api.show("firewall_rule", &obj.id).unwrap().status, STATUS_PENDING_DELETE);
        assert!(api.show("firewall_rule", &obj.id).unwrap_err().is_not_found());
        assert!(api.is_empty());
    }

    #[test]
    fn faults_match_by_name_and_expire() {
        let api = InMemoryNetworkApi::new();
        api.inject(Fault {
            op: ApiOp::Create,
            name: Some("bad".into()),
            error: ApiError::Status {
                status: 500,
                message: "boom".into(),
            },
            times: Some(1),
        });

        assert!(api.create("firewall", &body("good")).is_ok());
        assert!(api.create("firewall", &body("bad")).is_err());
        assert!(api.create("firewall", &body("bad")).is_ok());
        assert_eq!(api.count(ApiOp::Create), 3);
    }
}
