//! Project knowledge supplied by an external scanner.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::types::ProjectProfile;

/// Source of facts about the project. Never blocks dispatch: unknown is a valid answer.
pub trait ProfileProvider {
    fn scan(&self, project_root: &Path) -> ProjectProfile;
}

/// Reads the profile a scanner left at `.agent/profile.json`.
#[derive(Debug, Clone)]
pub struct StoredProfile {
    path: PathBuf,
}

impl StoredProfile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ProfileProvider for StoredProfile {
    fn scan(&self, project_root: &Path) -> ProjectProfile {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(root = %project_root.display(), "no project profile");
                return ProjectProfile::default();
            }
            Err(err) => {
                warn!(path = %self.path.display(), err = %err, "unreadable project profile ignored");
                return ProjectProfile::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(profile) => profile,
            Err(err) => {
                warn!(path = %self.path.display(), err = %err, "invalid project profile ignored");
                ProjectProfile::default()
            }
        }
    }
}
