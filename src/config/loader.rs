// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Read and deserialize a stack file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    load_from_str(&contents)
}

pub fn load_from_str(contents: &str) -> Result<RawConfigFile> {
    let config: RawConfigFile = toml::from_str(contents)?;
    Ok(config)
}

/// Read a stack file and validate it.
///
/// - Reads TOML and applies section defaults.
/// - Checks engine settings, resource types and properties.
/// - Checks `depends_on` / `get_resource` targets and rejects cycles.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw)?;
    debug!(
        path = %path.as_ref().display(),
        resources = config.resource.len(),
        "stack file loaded"
    );
    Ok(config)
}

/// `Stackdag.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Stackdag.toml")
}

/// Directory relative paths in a stack file are resolved against.
pub fn config_root_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}
