//! Declarative input documents: the multi-project sparse-checkout profile
//! and the path-revision override rules.
//!
//! Both are JSON, deserialized with `serde`. Example profile:
//!
//! ```json
//! {
//!   "projects": {
//!     "px": {
//!       "repo_url": "https://svn.example.com/px/trunk",
//!       "root_path": "px",
//!       "root_depth": "immediates",
//!       "paths": [
//!         { "path": "assets", "depth": "empty" },
//!         { "path": "assets/maps", "depth": "infinity" }
//!       ]
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Sparse profile
// ---------------------------------------------------------------------------

/// A multi-project sparse-checkout profile. Projects are kept in a
/// `BTreeMap` so application order is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseProfile {
    pub projects: BTreeMap<String, Project>,
}

/// One independently checked-out repository within a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub repo_url: String,
    pub root_path: String,
    #[serde(default = "default_depth")]
    pub root_depth: String,
    #[serde(default)]
    pub paths: Vec<PathRule>,
}

/// One sub-path to materialize at a chosen depth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathRule {
    pub path: String,
    #[serde(default = "default_depth")]
    pub depth: String,
}

fn default_depth() -> String {
    "infinity".into()
}

impl SparseProfile {
    /// Load and validate a profile from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading sparse profile");
        if !path.is_file() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Parse and validate a profile from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let profile: SparseProfile =
            serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }

    /// Reject projects with empty required fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, project) in &self.projects {
            if project.repo_url.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("projects.{}.repo_url", name),
                    detail: "must not be empty".into(),
                });
            }
            if project.root_path.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("projects.{}.root_path", name),
                    detail: "must not be empty".into(),
                });
            }
        }
        Ok(())
    }
}

impl Project {
    /// Path rules sorted ascending by path depth (count of separators), so a
    /// parent path is always expanded before any path it is a prefix of.
    ///
    /// The underlying VCS cannot target a descendant path whose ancestor has
    /// not been brought into the working copy yet. The sort is stable, so
    /// rules at equal depth keep their declared order.
    pub fn sorted_rules(&self) -> Vec<&PathRule> {
        let mut rules: Vec<&PathRule> = self.paths.iter().collect();
        rules.sort_by_key(|rule| path_depth(&rule.path));
        rules
    }
}

fn path_depth(path: &str) -> usize {
    path.trim_matches('/').matches('/').count()
}

// ---------------------------------------------------------------------------
// Path-revision overrides
// ---------------------------------------------------------------------------

/// Path-revision override document: pin selected sub-paths to explicit
/// revisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRevisionRules {
    pub paths: Vec<PathRevision>,
}

/// One path pinned to one revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathRevision {
    pub path: String,
    pub revision: String,
}

impl PathRevisionRules {
    /// Load override rules from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading path-revision rules");
        if !path.is_file() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}
