//! Persistent state store.
//!
//! The monitor flags are written as a single JSON record, overwritten
//! wholesale on every save. A missing file loads as the all-`false` default.
//! Writes go to a temp file first and are renamed into place, and concurrent
//! writers serialize on an internal lock.

use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Process-wide battery monitor state.
///
/// Mutated only by the monitor tick and the enable/disable toggle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonitorState {
    pub monitoring_enabled: bool,
    pub low_battery_notified: bool,
    pub full_battery_notified: bool,
    pub sensor_unavailable_notified: bool,
    #[serde(rename = "sensorCheckErrorNotified")]
    pub sensor_error_notified: bool,
}

impl MonitorState {
    /// Reset all four debounce flags, leaving `monitoring_enabled` as is.
    pub fn clear_notifications(&mut self) {
        self.low_battery_notified = false;
        self.full_battery_notified = false;
        self.sensor_unavailable_notified = false;
        self.sensor_error_notified = false;
    }
}

/// Serialized form of everything the agent keeps across restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSnapshot {
    #[serde(flatten)]
    pub monitor: MonitorState,
}

/// File-backed snapshot store.
pub struct StateStore {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl StateStore {
    /// Store backed by `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            write_lock: Mutex::new(()),
        }
    }

    /// Store that never touches disk. Loads return defaults, saves succeed.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load the snapshot. A missing file yields the default snapshot.
    pub fn load(&self) -> Result<PersistedSnapshot> {
        let Some(path) = &self.path else {
            return Ok(PersistedSnapshot::default());
        };

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no state file at {}, starting clean", path.display());
                return Ok(PersistedSnapshot::default());
            }
            Err(e) => {
                return Err(AgentError::Persistence(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };

        serde_json::from_slice(&bytes)
            .map_err(|e| AgentError::Persistence(format!("cannot parse {}: {e}", path.display())))
    }

    /// Overwrite the snapshot on disk.
    pub fn save(&self, snapshot: &PersistedSnapshot) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AgentError::Persistence(format!("cannot create state dir: {e}"))
            })?;
        }

        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| AgentError::Persistence(format!("cannot serialize state: {e}")))?;
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, json)
            .map_err(|e| AgentError::Persistence(format!("cannot write state temp file: {e}")))?;
        std::fs::rename(&tmp_path, path)
            .map_err(|e| AgentError::Persistence(format!("cannot finalize state file: {e}")))?;

        debug!("state saved to {}", path.display());
        Ok(())
    }
}
