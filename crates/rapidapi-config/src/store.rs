//! Project record store.
//!
//! One JSON file per project (`<root>/<appId>.json`) plus a reserved
//! `.config.json` holding the root configuration. Every write goes to a
//! temporary file in the same directory and is renamed over the target, so a
//! crash mid-write leaves the previous contents intact.

use crate::{ConfigError, ConfigResult};
use rapidapi_core::{Project, RootConfig};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const ROOT_CONFIG_FILE: &str = ".config.json";
const RESERVED_PREFIX: char = '.';

/// File-per-project store rooted at the application data directory.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    root: PathBuf,
}

impl ProjectStore {
    /// Open a store, creating its directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> ConfigResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The stored root configuration. Missing or unreadable files yield defaults.
    pub fn root_config(&self) -> RootConfig {
        let path = self.root.join(ROOT_CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable root configuration");
                RootConfig::default()
            }),
            Err(_) => RootConfig::default(),
        }
    }

    /// Merge `update` into the stored root configuration and persist it.
    ///
    /// Blank fields in `update` leave stored values untouched.
    pub fn save_root_config(&self, update: &RootConfig) -> ConfigResult<RootConfig> {
        let mut config = self.root_config();
        config.merge(update);
        self.write_json(&self.root.join(ROOT_CONFIG_FILE), &config)?;
        Ok(config)
    }

    /// Create or overwrite a project record.
    pub fn save(&self, project: &Project) -> ConfigResult<()> {
        let path = self.project_path(project.app_id.as_str())?;
        self.write_json(&path, project)?;
        debug!(app = %project.app_id, path = %path.display(), "Saved project record");
        Ok(())
    }

    /// Load a project record. Absent and corrupt records are both not found.
    pub fn load(&self, app_id: &str) -> ConfigResult<Project> {
        let path = self.project_path(app_id)?;
        let content = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::ProjectNotFound(app_id.to_string())
            } else {
                ConfigError::Io(e)
            }
        })?;

        serde_json::from_str(&content).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Corrupt project record");
            ConfigError::ProjectNotFound(app_id.to_string())
        })
    }

    pub fn exists(&self, app_id: &str) -> ConfigResult<bool> {
        Ok(self.project_path(app_id)?.exists())
    }

    /// Remove a project record. Removing an absent record succeeds.
    pub fn delete(&self, app_id: &str) -> ConfigResult<()> {
        let path = self.project_path(app_id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(app = %app_id, "Deleted project record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All stored projects, ordered by app id. Corrupt records are skipped.
    pub fn list_all(&self) -> ConfigResult<Vec<Project>> {
        let mut projects = Vec::new();

        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.starts_with(RESERVED_PREFIX) {
                continue;
            }

            match self.load(stem) {
                Ok(project) => projects.push(project),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping project record"),
            }
        }

        projects.sort_by(|a, b| a.app_id.as_str().cmp(b.app_id.as_str()));
        Ok(projects)
    }

    fn project_path(&self, app_id: &str) -> ConfigResult<PathBuf> {
        if app_id.is_empty()
            || app_id.starts_with(RESERVED_PREFIX)
            || app_id.contains(['/', '\\'])
        {
            return Err(ConfigError::InvalidValue {
                field: "app".to_string(),
                message: format!("'{}' cannot be used as a project name", app_id),
            });
        }
        Ok(self.root.join(format!("{}.json", app_id)))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> ConfigResult<()> {
        let mut file = NamedTempFile::new_in(&self.root)?;
        serde_json::to_writer_pretty(&mut file, value)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| ConfigError::Io(e.error))?;
        Ok(())
    }
}
