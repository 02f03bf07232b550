// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::dag::ConvergenceFailure;
use crate::policy::PolicyError;

#[derive(Error, Debug)]
pub enum StackdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Resource not found in stack: {0}")]
    NodeNotFound(String),

    #[error("Resource '{node}' has no attribute '{attribute}'")]
    UnknownAttribute { node: String, attribute: String },

    #[error("Dependency cycle detected: {0}")]
    DependencyCycle(String),

    #[error("Cannot plan convergence: {0}")]
    PlanError(String),

    #[error(transparent)]
    ConvergenceFailed(#[from] ConvergenceFailure),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, StackdagError>;
