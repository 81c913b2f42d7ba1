//! Agent configuration, loaded from TOML.
//!
//! Every section is `#[serde(default)]`, so a partial file (or none at all)
//! falls back to the built-in defaults.

use crate::error::{AgentError, Result};
use crate::monitor::BatteryThresholds;
use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// The single operator allowed to control this host. When unset, every
    /// inbound event is refused.
    pub authorized_session: Option<i64>,
    /// Where the monitor state is persisted. Defaults to
    /// [`pilot_dirs::state_file`](crate::pilot_dirs::state_file).
    pub state_file: Option<PathBuf>,
    pub monitor: MonitorConfig,
    pub timer: TimerConfig,
}

/// Battery monitor cadence and thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between checks.
    pub interval_secs: u64,
    /// Seconds before the first check after enabling.
    pub first_delay_secs: u64,
    /// Low-battery alert fires below this percentage while unplugged.
    pub low_threshold: f32,
    /// Low-battery alert re-arms at or above this percentage.
    pub low_reset_threshold: f32,
    /// Full-charge alert fires above this percentage while plugged.
    pub high_threshold: f32,
    /// Full-charge alert re-arms below this percentage.
    pub high_reset_threshold: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let t = BatteryThresholds::default();
        Self {
            interval_secs: 300,
            first_delay_secs: 10,
            low_threshold: t.low,
            low_reset_threshold: t.low_reset,
            high_threshold: t.high,
            high_reset_threshold: t.high_reset,
        }
    }
}

impl MonitorConfig {
    pub fn thresholds(&self) -> BatteryThresholds {
        BatteryThresholds {
            low: self.low_threshold,
            low_reset: self.low_reset_threshold,
            high: self.high_threshold,
            high_reset: self.high_reset_threshold,
        }
    }
}

/// Shutdown timer picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Minute presets offered when `/shutdown_timer` has no argument.
    pub presets_minutes: Vec<u32>,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            presets_minutes: vec![15, 30, 60, 120, 180],
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| AgentError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AgentError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config_dir>/pcpilot/config.toml`.
    pub fn default_config_path() -> PathBuf {
        crate::pilot_dirs::config_file()
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let m = &self.monitor;
        if m.interval_secs == 0 {
            return Err(AgentError::Config("monitor.interval_secs must be > 0".into()));
        }
        if m.low_threshold >= m.low_reset_threshold {
            return Err(AgentError::Config(
                "monitor.low_threshold must be below monitor.low_reset_threshold".into(),
            ));
        }
        if m.high_reset_threshold >= m.high_threshold {
            return Err(AgentError::Config(
                "monitor.high_reset_threshold must be below monitor.high_threshold".into(),
            ));
        }
        if self.timer.presets_minutes.contains(&0) {
            return Err(AgentError::Config("timer presets must be > 0 minutes".into()));
        }
        Ok(())
    }

    pub fn authorized_session(&self) -> Option<SessionId> {
        self.authorized_session.map(SessionId)
    }

    /// Effective state file path.
    pub fn state_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(crate::pilot_dirs::state_file)
    }
}
