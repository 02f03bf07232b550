// src/policy/source.rs

//! Where rule sets come from.

use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use tracing::{debug, info};

use crate::policy::rules::RuleSet;
use crate::policy::PolicyError;

/// A source of rules. Loading is always explicit.
pub trait PolicySource: Send + Sync + Debug {
    /// Produce the current rules. With `force`, any cached copy is
    /// bypassed and the rules are read again from their origin.
    fn load(&self, force: bool) -> Result<RuleSet, PolicyError>;
}

/// `(config_dir, project, policy_file)` locating a policy file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyLocation {
    pub config_dir: PathBuf,
    pub project: String,
    pub policy_file: PathBuf,
}

impl PolicyLocation {
    pub fn new(
        config_dir: impl Into<PathBuf>,
        project: impl Into<String>,
        policy_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config_dir: config_dir.into(),
            project: project.into(),
            policy_file: policy_file.into(),
        }
    }

    /// First existing candidate of: the policy file itself when absolute,
    /// `<config_dir>/<policy_file>`, `<config_dir>/<project>/<policy_file>`.
    pub fn resolve(&self) -> Result<PathBuf, PolicyError> {
        self.candidates()
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| PolicyError::PolicyFileNotFound(self.policy_file.clone()))
    }

    fn candidates(&self) -> Vec<PathBuf> {
        if self.policy_file.is_absolute() {
            return vec![self.policy_file.clone()];
        }
        vec![
            self.config_dir.join(&self.policy_file),
            self.config_dir.join(&self.project).join(&self.policy_file),
        ]
    }
}

#[derive(Debug)]
struct CachedFile {
    path: PathBuf,
    modified: SystemTime,
    rules: RuleSet,
}

/// Reads rules from a JSON policy file.
///
/// The parsed file is cached per source, keyed by path and modification
/// time: loading an unchanged file again does not re-read it unless the
/// load is forced.
#[derive(Debug)]
pub struct FilePolicySource {
    location: PolicyLocation,
    cache: Mutex<Option<CachedFile>>,
}

impl FilePolicySource {
    pub fn new(location: PolicyLocation) -> Self {
        Self {
            location,
            cache: Mutex::new(None),
        }
    }

    /// Source for a single file path.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let file = path.file_name().map(PathBuf::from).unwrap_or_default();
        Self::new(PolicyLocation::new(dir, "", file))
    }

    pub fn location(&self) -> &PolicyLocation {
        &self.location
    }

    fn lock(&self) -> MutexGuard<'_, Option<CachedFile>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PolicySource for FilePolicySource {
    fn load(&self, force: bool) -> Result<RuleSet, PolicyError> {
        let path = self.location.resolve()?;
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(|source| PolicyError::Io {
                path: path.clone(),
                source,
            })?;

        let mut cache = self.lock();
        if let Some(cached) = cache.as_ref().filter(|_| !force) {
            if cached.path == path && cached.modified == modified {
                debug!(path = %path.display(), "policy file unchanged; using cached rules");
                return Ok(cached.rules.clone());
            }
        }

        let text = fs::read_to_string(&path).map_err(|source| PolicyError::Io {
            path: path.clone(),
            source,
        })?;
        let rules = RuleSet::from_json(&text).map_err(|source| PolicyError::Json {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), rules = rules.len(), "loaded policy file");

        *cache = Some(CachedFile {
            path,
            modified,
            rules: rules.clone(),
        });
        Ok(rules)
    }
}

/// In-memory source whose contents can be swapped, used when rules are
/// assembled programmatically and by tests.
#[derive(Debug, Default)]
pub struct StaticPolicySource {
    rules: Mutex<RuleSet>,
}

impl StaticPolicySource {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules: Mutex::new(rules),
        }
    }

    /// Change what the next `load` returns.
    pub fn replace(&self, rules: RuleSet) {
        *self.rules.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = rules;
    }
}

impl PolicySource for StaticPolicySource {
    fn load(&self, _force: bool) -> Result<RuleSet, PolicyError> {
        Ok(self
            .rules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }
}
