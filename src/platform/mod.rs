//! Host power, process and battery operations.
//!
//! The agent talks to the host only through [`OsFacility`]. Platform
//! differences (which command to spawn, where the battery sensor lives) are
//! the facility's concern; callers only branch on the returned values.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod system;

pub use system::SystemFacility;

/// A power-state action the host can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerAction {
    Shutdown,
    Reboot,
    Lock,
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Shutdown => "shutdown",
            Self::Reboot => "reboot",
            Self::Lock => "lock",
        })
    }
}

/// One battery sensor sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatterySnapshot {
    /// Charge level, 0-100.
    pub percent: f32,
    /// Whether external power is connected.
    pub plugged: bool,
    /// Estimated seconds until empty, when discharging and known.
    pub secs_left: Option<u64>,
}

/// Result of a successful sensor query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BatteryReading {
    Present(BatterySnapshot),
    /// The sensor works but reports no battery.
    Absent,
    /// No battery sensor facility on this platform.
    Unsupported,
}

/// A running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

/// Host load at one instant. Sizes are in bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemStatus {
    pub cpu_percent: f32,
    pub memory_used: u64,
    pub memory_total: u64,
    /// The system disk, when one is listed.
    pub disk: Option<DiskUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskUsage {
    pub mount_point: PathBuf,
    pub used: u64,
    pub total: u64,
}

/// What emptying one temporary directory achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirCleanup {
    pub path: PathBuf,
    pub removed: usize,
    pub failed: usize,
}

/// Platform operations used by the agent.
#[async_trait]
pub trait OsFacility: Send + Sync {
    async fn shutdown(&self) -> anyhow::Result<()>;

    async fn reboot(&self) -> anyhow::Result<()>;

    async fn lock(&self) -> anyhow::Result<()>;

    /// Abort an in-flight OS shutdown request. Succeeds as a no-op where the
    /// platform has no such mechanism.
    async fn abort_shutdown(&self) -> anyhow::Result<()>;

    async fn read_battery(&self) -> anyhow::Result<BatteryReading>;

    async fn list_processes(&self) -> anyhow::Result<Vec<ProcessInfo>>;

    async fn terminate_process(&self, pid: u32) -> anyhow::Result<()>;

    async fn system_status(&self) -> anyhow::Result<SystemStatus>;

    /// Time since boot.
    async fn uptime(&self) -> anyhow::Result<Duration>;

    /// Empty the temporary directories. Missing directories are skipped and
    /// entries that cannot be removed are counted, not fatal.
    async fn clear_temp(&self) -> anyhow::Result<Vec<DirCleanup>>;

    /// First running process whose name contains `needle`, ignoring case.
    async fn find_process(&self, needle: &str) -> anyhow::Result<Option<ProcessInfo>> {
        let needle = needle.to_lowercase();
        Ok(self
            .list_processes()
            .await?
            .into_iter()
            .find(|p| p.name.to_lowercase().contains(&needle)))
    }

    /// Dispatch a [`PowerAction`] to the matching operation.
    async fn perform(&self, action: PowerAction) -> anyhow::Result<()> {
        match action {
            PowerAction::Shutdown => self.shutdown().await,
            PowerAction::Reboot => self.reboot().await,
            PowerAction::Lock => self.lock().await,
        }
    }
}

/// Create the facility for the current host.
pub fn create_facility() -> Arc<dyn OsFacility> {
    Arc::new(SystemFacility::new())
}
