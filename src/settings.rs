//! Settings store: connection profiles, the active connection and query
//! defaults.
//!
//! The store is read on every operation, so edits to a settings file take
//! effect without a restart.

use crate::db::AutoCommitPolicy;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionProfile, DEFAULT_ROW_LIMIT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

fn default_limit() -> u64 {
    DEFAULT_ROW_LIMIT
}

/// Everything the core reads from the settings store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_connection: Option<String>,
    #[serde(default)]
    pub auto_commit: AutoCommitPolicy,
    /// 0 disables the automatic LIMIT
    #[serde(default = "default_limit")]
    pub default_limit: u64,
    #[serde(default)]
    pub connections: Vec<ConnectionProfile>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            active_connection: None,
            auto_commit: AutoCommitPolicy::default(),
            default_limit: DEFAULT_ROW_LIMIT,
            connections: Vec::new(),
        }
    }
}

impl Settings {
    pub fn profile(&self, connection_id: &str) -> Option<&ConnectionProfile> {
        self.connections.iter().find(|p| p.id == connection_id)
    }
}

/// Backing storage for [`Settings`].
pub trait SettingsStore: Send + Sync + std::fmt::Debug {
    fn load(&self) -> DbResult<Settings>;

    fn save(&self, settings: &Settings) -> DbResult<()>;

    /// Record the active connection id (`None` clears it).
    fn set_active(&self, connection_id: Option<&str>) -> DbResult<()> {
        let mut settings = self.load()?;
        if let Some(id) = connection_id {
            if settings.profile(id).is_none() {
                return Err(DbError::profile_not_found(id));
            }
        }
        settings.active_connection = connection_id.map(String::from);
        self.save(&settings)
    }

    /// Delete a profile. Clears the active id if it pointed at it.
    fn remove_profile(&self, connection_id: &str) -> DbResult<ConnectionProfile> {
        let mut settings = self.load()?;
        let index = settings
            .connections
            .iter()
            .position(|p| p.id == connection_id)
            .ok_or_else(|| DbError::profile_not_found(connection_id))?;
        let removed = settings.connections.remove(index);
        if settings.active_connection.as_deref() == Some(connection_id) {
            settings.active_connection = None;
        }
        self.save(&settings)?;
        Ok(removed)
    }
}

/// JSON settings file. A missing file reads as default settings.
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettings {
    fn load(&self) -> DbResult<Settings> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Settings file missing; using defaults");
                return Ok(Settings::default());
            }
            Err(e) => {
                return Err(DbError::settings(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_str(&text)
            .map_err(|e| DbError::settings(format!("invalid {}: {e}", self.path.display())))
    }

    fn save(&self, settings: &Settings) -> DbResult<()> {
        let text = serde_json::to_string_pretty(settings)
            .map_err(|e| DbError::settings(e.to_string()))?;
        std::fs::write(&self.path, text)
            .map_err(|e| DbError::settings(format!("cannot write {}: {e}", self.path.display())))
    }
}

/// In-process settings, used for `--database` profiles and in tests.
#[derive(Debug, Default)]
pub struct MemorySettings {
    inner: RwLock<Settings>,
}

impl MemorySettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }
}

impl SettingsStore for MemorySettings {
    fn load(&self) -> DbResult<Settings> {
        self.inner
            .read()
            .map(|s| s.clone())
            .map_err(|_| DbError::internal("settings lock poisoned"))
    }

    fn save(&self, settings: &Settings) -> DbResult<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| DbError::internal("settings lock poisoned"))?;
        *inner = settings.clone();
        Ok(())
    }
}
