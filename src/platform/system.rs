//! [`OsFacility`] backed by the host's own commands and `sysinfo`.

use super::{
    BatteryReading, BatterySnapshot, DirCleanup, DiskUsage, OsFacility, ProcessInfo, SystemStatus,
};
use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{Disks, System};
use tokio::process::Command;
use tracing::{debug, info, warn};

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";

/// Gap between the two CPU samples a usage figure is computed from.
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Runs platform commands through `tokio::process` and reads host
/// telemetry through `sysinfo`.
pub struct SystemFacility {
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    power_supply_dir: PathBuf,
    temp_dirs: Vec<PathBuf>,
}

impl Default for SystemFacility {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemFacility {
    pub fn new() -> Self {
        Self {
            power_supply_dir: PathBuf::from(POWER_SUPPLY_DIR),
            temp_dirs: default_temp_dirs(),
        }
    }

    /// Read the battery from a different sysfs root. Linux only.
    pub fn with_power_supply_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.power_supply_dir = dir.into();
        self
    }

    /// Replace the directories emptied by `clear_temp`.
    pub fn with_temp_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.temp_dirs = dirs;
        self
    }
}

/// The user's temp directory, plus the system temp and prefetch folders on
/// Windows.
fn default_temp_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![std::env::temp_dir()];
    if cfg!(windows) {
        dirs.push(PathBuf::from(r"C:\Windows\Temp"));
        dirs.push(PathBuf::from(r"C:\Windows\Prefetch"));
    }
    dirs
}

/// Run a command to completion, returning stdout. A non-zero exit is an
/// error carrying stderr.
async fn run(program: &str, args: &[&str]) -> anyhow::Result<String> {
    debug!(program, ?args, "running command");
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .with_context(|| format!("cannot run {program}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{program} exited with {}: {}", output.status, stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[async_trait]
impl OsFacility for SystemFacility {
    async fn shutdown(&self) -> anyhow::Result<()> {
        if cfg!(windows) {
            run("shutdown", &["/s", "/t", "0"]).await?;
        } else {
            run("shutdown", &["-h", "now"]).await?;
        }
        Ok(())
    }

    async fn reboot(&self) -> anyhow::Result<()> {
        if cfg!(windows) {
            run("shutdown", &["/r", "/t", "0"]).await?;
        } else if cfg!(target_os = "macos") {
            run("shutdown", &["-r", "now"]).await?;
        } else {
            run("reboot", &[]).await?;
        }
        Ok(())
    }

    async fn lock(&self) -> anyhow::Result<()> {
        if cfg!(windows) {
            run("rundll32.exe", &["user32.dll,LockWorkStation"]).await?;
        } else if cfg!(target_os = "macos") {
            run("pmset", &["displaysleepnow"]).await?;
        } else if cfg!(target_os = "linux") {
            if let Err(e) = run("loginctl", &["lock-session"]).await {
                warn!(error = %e, "loginctl lock failed, trying screensaver");
                run("gnome-screensaver-command", &["-l"]).await?;
            }
        } else {
            anyhow::bail!("locking is not supported on this platform");
        }
        Ok(())
    }

    async fn abort_shutdown(&self) -> anyhow::Result<()> {
        if cfg!(windows) {
            run("shutdown", &["/a"]).await?;
        }
        Ok(())
    }

    async fn read_battery(&self) -> anyhow::Result<BatteryReading> {
        #[cfg(target_os = "linux")]
        {
            read_sysfs_battery(&self.power_supply_dir)
        }
        #[cfg(target_os = "macos")]
        {
            let output = run("pmset", &["-g", "batt"]).await?;
            parse_pmset(&output)
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            Ok(BatteryReading::Unsupported)
        }
    }

    async fn list_processes(&self) -> anyhow::Result<Vec<ProcessInfo>> {
        let mut sys = System::new();
        sys.refresh_processes();
        let mut procs: Vec<ProcessInfo> = sys
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_owned(),
            })
            .collect();
        procs.sort_by_key(|p| p.pid);
        Ok(procs)
    }

    async fn terminate_process(&self, pid: u32) -> anyhow::Result<()> {
        let pid = pid.to_string();
        if cfg!(windows) {
            run("taskkill", &["/PID", &pid, "/F"]).await?;
        } else {
            run("kill", &["-KILL", &pid]).await?;
        }
        Ok(())
    }

    async fn system_status(&self) -> anyhow::Result<SystemStatus> {
        let mut sys = System::new();
        sys.refresh_cpu();
        tokio::time::sleep(CPU_SAMPLE_INTERVAL).await;
        sys.refresh_cpu();
        sys.refresh_memory();

        let disks = Disks::new_with_refreshed_list();
        let usage = disks
            .list()
            .iter()
            .map(|disk| DiskUsage {
                mount_point: disk.mount_point().to_path_buf(),
                used: disk.total_space().saturating_sub(disk.available_space()),
                total: disk.total_space(),
            })
            .collect();

        Ok(SystemStatus {
            cpu_percent: sys.global_cpu_info().cpu_usage(),
            memory_used: sys.used_memory(),
            memory_total: sys.total_memory(),
            disk: pick_system_disk(usage),
        })
    }

    async fn uptime(&self) -> anyhow::Result<Duration> {
        Ok(Duration::from_secs(System::uptime()))
    }

    async fn clear_temp(&self) -> anyhow::Result<Vec<DirCleanup>> {
        let dirs = self.temp_dirs.clone();
        let report: Vec<DirCleanup> = tokio::task::spawn_blocking(move || {
            dirs.iter().filter_map(|dir| clear_directory(dir)).collect()
        })
        .await
        .context("temp cleanup task failed")?;
        Ok(report)
    }
}

/// The disk mounted at `/` (or `C:\` on Windows), else the first one listed.
fn pick_system_disk(disks: Vec<DiskUsage>) -> Option<DiskUsage> {
    let is_root = |d: &DiskUsage| {
        d.mount_point == Path::new("/")
            || d.mount_point
                .to_str()
                .is_some_and(|m| m.eq_ignore_ascii_case(r"C:\"))
    };
    match disks.iter().position(is_root) {
        Some(index) => disks.into_iter().nth(index),
        None => disks.into_iter().next(),
    }
}

/// Delete everything inside `dir`, keeping `dir` itself. Entries that cannot
/// be removed are counted and skipped. Returns `None` when `dir` is missing.
fn clear_directory(dir: &Path) -> Option<DirCleanup> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "skipping temp directory");
            return None;
        }
    };

    let mut report = DirCleanup {
        path: dir.to_path_buf(),
        removed: 0,
        failed: 0,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let removed = match entry.file_type() {
            Ok(kind) if kind.is_dir() => std::fs::remove_dir_all(&path),
            Ok(_) => std::fs::remove_file(&path),
            Err(e) => Err(e),
        };
        match removed {
            Ok(()) => report.removed += 1,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot remove temp entry");
                report.failed += 1;
            }
        }
    }
    info!(
        dir = %dir.display(),
        removed = report.removed,
        failed = report.failed,
        "temp directory cleared"
    );
    Some(report)
}

/// Read the first battery under a sysfs `power_supply` directory.
///
/// A missing directory means the kernel exposes no power supply class at
/// all. A present directory with no `Battery` entry means a desktop host.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn read_sysfs_battery(root: &Path) -> anyhow::Result<BatteryReading> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(BatteryReading::Unsupported);
        }
        Err(e) => return Err(e).with_context(|| format!("cannot list {}", root.display())),
    };

    let mut battery: Option<PathBuf> = None;
    let mut mains_online = false;
    for entry in entries {
        let path = entry?.path();
        match read_attr(&path, "type").as_deref() {
            Some("Battery") if battery.is_none() => battery = Some(path),
            Some("Mains") | Some("USB") => {
                mains_online |= read_attr(&path, "online").as_deref() == Some("1");
            }
            _ => {}
        }
    }

    let Some(battery) = battery else {
        return Ok(BatteryReading::Absent);
    };

    let percent: f32 = read_attr(&battery, "capacity")
        .context("battery has no capacity attribute")?
        .parse()
        .context("battery capacity is not a number")?;
    let status = read_attr(&battery, "status").unwrap_or_default();
    let discharging = status == "Discharging";
    let plugged = mains_online || matches!(status.as_str(), "Charging" | "Full" | "Not charging");

    let secs_left = if discharging && !plugged {
        remaining_secs(&battery)
    } else {
        None
    };

    Ok(BatteryReading::Present(BatterySnapshot {
        percent,
        plugged,
        secs_left,
    }))
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn read_attr(dir: &Path, name: &str) -> Option<String> {
    std::fs::read_to_string(dir.join(name))
        .ok()
        .map(|s| s.trim().to_owned())
}

/// Time to empty from energy/power or charge/current pairs.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn remaining_secs(battery: &Path) -> Option<u64> {
    let num = |name: &str| read_attr(battery, name)?.parse::<u64>().ok();
    let (stored, rate) = match (num("energy_now"), num("power_now")) {
        (Some(e), Some(p)) => (e, p),
        _ => (num("charge_now")?, num("current_now")?),
    };
    (rate > 0).then(|| stored.saturating_mul(3600) / rate)
}

/// Parse `pmset -g batt` output.
///
/// ```text
/// Now drawing from 'Battery Power'
///  -InternalBattery-0 (id=4653155)	85%; discharging; 3:12 remaining present: true
/// ```
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_pmset(output: &str) -> anyhow::Result<BatteryReading> {
    let Some(line) = output.lines().find(|l| l.contains("InternalBattery")) else {
        return Ok(BatteryReading::Absent);
    };
    let plugged = output
        .lines()
        .next()
        .is_some_and(|l| l.contains("AC Power"));

    let mut fields = line.split(';').map(str::trim);
    let percent: f32 = fields
        .next()
        .and_then(|f| f.split_whitespace().last())
        .and_then(|f| f.strip_suffix('%'))
        .with_context(|| format!("no charge level in `{line}`"))?
        .parse()
        .with_context(|| format!("bad charge level in `{line}`"))?;

    let secs_left = if plugged {
        None
    } else {
        fields
            .nth(1)
            .and_then(|f| f.split_whitespace().next())
            .and_then(parse_hours_minutes)
    };

    Ok(BatteryReading::Present(BatterySnapshot {
        percent,
        plugged,
        secs_left,
    }))
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_hours_minutes(s: &str) -> Option<u64> {
    let (h, m) = s.split_once(':')?;
    Some(h.parse::<u64>().ok()? * 3600 + m.parse::<u64>().ok()? * 60)
}
