// src/config/mod.rs

//! Stack file loading and validation.
//!
//! - `model.rs` is the TOML-backed data model.
//! - `loader.rs` reads a stack file from disk.
//! - `validate.rs` turns a raw file into a checked [`ConfigFile`]: engine
//!   settings, resource schemas, dependency targets, no cycles.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{config_root_dir, default_config_path, load_and_validate, load_from_path, load_from_str};
pub use model::{
    ConfigFile, EngineSection, PolicySection, RawConfigFile, ResourceConfig, ResourceState,
    StackSection,
};
