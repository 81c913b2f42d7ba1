//! Filesystem locations for pcpilot.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Data (logs) | `~/Library/Application Support/pcpilot/` | `~/.local/share/pcpilot/` |
//! | Config, state | `~/Library/Application Support/pcpilot/` | `~/.config/pcpilot/` |
//!
//! # Environment Overrides
//!
//! - `PCPILOT_DATA_DIR` overrides [`data_dir`]
//! - `PCPILOT_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Data root. Logs live under it.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("PCPILOT_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("pcpilot"))
        .unwrap_or_else(|| std::env::temp_dir().join("pcpilot-data"))
}

/// Config directory, also home of the persisted state file.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("PCPILOT_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("pcpilot"))
        .unwrap_or_else(|| std::env::temp_dir().join("pcpilot-config"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Main config file (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Persisted monitor state (`config_dir()/state.json`).
#[must_use]
pub fn state_file() -> PathBuf {
    config_dir().join("state.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_sit_under_their_directories() {
        assert!(config_file().starts_with(config_dir()));
        assert!(state_file().ends_with("state.json"));
        assert!(logs_dir().starts_with(data_dir()));
    }
}
