// src/api/mod.rs

//! Network-service API boundary.
//!
//! Resource adapters talk to the remote service exclusively through the
//! [`NetworkApi`] trait: create/update/delete/show keyed by a collection name
//! (e.g. `"firewall_rule"`) and a resource identifier string. The only error
//! the engine inspects is the distinguishable [`ApiError::NotFound`], which the
//! delete path treats as success.
//!
//! [`memory::InMemoryNetworkApi`] is the implementation used by the CLI and by
//! tests.

use std::collections::BTreeMap;
use std::fmt::Debug;

use thiserror::Error;

pub mod memory;

pub use memory::{ApiCall, ApiOp, Fault, InMemoryNetworkApi};

/// Property bag sent to / returned from the remote API.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Status string reported for a resource that is fully built.
pub const STATUS_ACTIVE: &str = "ACTIVE";
/// Status string for a resource that is administratively down but built.
pub const STATUS_DOWN: &str = "DOWN";
/// Status string for a resource the service failed to build.
pub const STATUS_ERROR: &str = "ERROR";
pub const STATUS_PENDING_CREATE: &str = "PENDING_CREATE";
pub const STATUS_PENDING_DELETE: &str = "PENDING_DELETE";

/// Remote representation of a resource, as returned by `show`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    pub id: String,
    pub status: String,
    pub properties: Properties,
}

/// Errors raised by a [`NetworkApi`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("{collection} {id} could not be found")]
    NotFound { collection: String, id: String },

    #[error("{collection} {id} is in use: {message}")]
    Conflict {
        collection: String,
        id: String,
        message: String,
    },

    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },
}

impl ApiError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        ApiError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    /// HTTP-equivalent status code of this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::NotFound { .. } => 404,
            ApiError::Conflict { .. } => 409,
            ApiError::Status { status, .. } => *status,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == 404
    }

    /// Conflicts and server-side errors may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self.status_code(), 409 | 500..=599)
    }
}

/// Remote network-service operations used by resource adapters.
pub trait NetworkApi: Send + Sync + Debug {
    /// Create a resource in `collection`; returns the created object.
    fn create(&self, collection: &str, body: &Properties) -> Result<RemoteObject, ApiError>;

    /// Apply a partial property update to an existing resource.
    fn update(&self, collection: &str, id: &str, diff: &Properties) -> Result<(), ApiError>;

    /// Request deletion of a resource. Deletion may complete asynchronously.
    fn delete(&self, collection: &str, id: &str) -> Result<(), ApiError>;

    /// Fetch the current remote state of a resource.
    fn show(&self, collection: &str, id: &str) -> Result<RemoteObject, ApiError>;
}
