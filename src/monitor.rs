//! Recurring battery monitor.
//!
//! [`BatteryMonitor`] evaluates one sensor reading per tick against the
//! debounce flags in [`MonitorState`] and returns the notices to deliver. It
//! only notifies on state *transitions*: a low-battery alert is sent once
//! when the level drops under the low threshold and re-armed only after the
//! level climbs back over the reset threshold.
//!
//! # Thresholds
//!
//! | Rule | Condition | Reset |
//! |------|-----------|-------|
//! | Low | `< 20%`, unplugged | `>= 25%` |
//! | Full | `> 95%`, plugged | `< 90%` |
//!
//! The monitor never stops itself. Unsupported or failing sensors are
//! reported once and polled again on the next tick.

use crate::config::MonitorConfig;
use crate::jobs::{JobFacility, JobId, JobPayload};
use crate::platform::{BatteryReading, BatterySnapshot};
use crate::session::SessionId;
use crate::store::MonitorState;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Job name for a session's repeating battery check.
#[must_use]
pub fn monitor_job_name(session: SessionId) -> String {
    format!("battery_check_{session}")
}

/// Entry and reset thresholds, in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryThresholds {
    pub low: f32,
    pub low_reset: f32,
    pub high: f32,
    pub high_reset: f32,
}

impl Default for BatteryThresholds {
    fn default() -> Self {
        Self {
            low: 20.0,
            low_reset: 25.0,
            high: 95.0,
            high_reset: 90.0,
        }
    }
}

/// What one sensor read produced.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorOutcome {
    Reading(BatterySnapshot),
    /// Sensor works but the host has no battery.
    NoBattery,
    /// No sensor facility on this platform.
    Unsupported,
    Failed(String),
}

impl From<anyhow::Result<BatteryReading>> for SensorOutcome {
    fn from(result: anyhow::Result<BatteryReading>) -> Self {
        match result {
            Ok(BatteryReading::Present(snapshot)) => Self::Reading(snapshot),
            Ok(BatteryReading::Absent) => Self::NoBattery,
            Ok(BatteryReading::Unsupported) => Self::Unsupported,
            Err(e) => Self::Failed(format!("{e:#}")),
        }
    }
}

/// A notification the monitor wants delivered to the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum BatteryNotice {
    Low { percent: f32 },
    Full { percent: f32 },
    NoBattery,
    Unsupported,
    CheckFailed { error: String },
}

impl fmt::Display for BatteryNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low { percent } => write!(
                f,
                "Warning! Low battery: {percent:.1}%. Connect the charger."
            ),
            Self::Full { percent } => write!(
                f,
                "Battery charged to {percent:.1}%. You can unplug the charger."
            ),
            Self::NoBattery => f.write_str("Battery monitoring: no battery detected on this host."),
            Self::Unsupported => {
                f.write_str("Battery monitoring: battery sensor is not supported on this host.")
            }
            Self::CheckFailed { error } => write!(f, "Battery monitoring error: {error}"),
        }
    }
}

/// Result of one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    pub notices: Vec<BatteryNotice>,
    /// Whether any flag changed and the state must be persisted.
    pub changed: bool,
}

/// Threshold evaluator and job registration for the battery check.
#[derive(Debug, Clone)]
pub struct BatteryMonitor {
    thresholds: BatteryThresholds,
    interval: Duration,
    first_delay: Duration,
}

impl Default for BatteryMonitor {
    fn default() -> Self {
        Self::new(
            BatteryThresholds::default(),
            Duration::from_secs(300),
            Duration::from_secs(10),
        )
    }
}

impl BatteryMonitor {
    pub fn new(thresholds: BatteryThresholds, interval: Duration, first_delay: Duration) -> Self {
        Self {
            thresholds,
            interval,
            first_delay,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            config.thresholds(),
            Duration::from_secs(config.interval_secs),
            Duration::from_secs(config.first_delay_secs),
        )
    }

    pub fn thresholds(&self) -> BatteryThresholds {
        self.thresholds
    }

    /// Apply one sensor outcome to `state`.
    pub fn evaluate(&self, state: &mut MonitorState, outcome: SensorOutcome) -> TickOutcome {
        let before = *state;
        let mut notices = Vec::new();

        match outcome {
            SensorOutcome::Unsupported => {
                if !state.sensor_unavailable_notified {
                    notices.push(BatteryNotice::Unsupported);
                    state.sensor_unavailable_notified = true;
                }
            }
            SensorOutcome::NoBattery => {
                if !state.sensor_unavailable_notified {
                    notices.push(BatteryNotice::NoBattery);
                    state.sensor_unavailable_notified = true;
                    state.sensor_error_notified = false;
                }
            }
            SensorOutcome::Reading(snapshot) => {
                state.sensor_unavailable_notified = false;
                state.sensor_error_notified = false;
                self.apply_reading(state, snapshot, &mut notices);
            }
            SensorOutcome::Failed(error) => self.apply_error(state, error, &mut notices),
        }

        TickOutcome {
            notices,
            changed: *state != before,
        }
    }

    /// Record that a notice could not be delivered.
    ///
    /// Treated as a tick error so the flags reset and the condition is
    /// reported again on a later tick.
    pub fn delivery_failed(&self, state: &mut MonitorState, error: String) -> TickOutcome {
        let before = *state;
        let mut notices = Vec::new();
        self.apply_error(state, error, &mut notices);
        TickOutcome {
            notices,
            changed: *state != before,
        }
    }

    fn apply_reading(
        &self,
        state: &mut MonitorState,
        snapshot: BatterySnapshot,
        notices: &mut Vec<BatteryNotice>,
    ) {
        let BatterySnapshot {
            percent, plugged, ..
        } = snapshot;
        let t = self.thresholds;

        if percent < t.low && !plugged && !state.low_battery_notified {
            info!(percent, "battery low");
            notices.push(BatteryNotice::Low { percent });
            state.low_battery_notified = true;
            state.full_battery_notified = false;
        } else if percent >= t.low_reset && state.low_battery_notified {
            debug!(percent, "battery low flag reset");
            state.low_battery_notified = false;
        }

        if percent > t.high && plugged && !state.full_battery_notified {
            info!(percent, "battery full");
            notices.push(BatteryNotice::Full { percent });
            state.full_battery_notified = true;
            state.low_battery_notified = false;
        } else if percent < t.high_reset && state.full_battery_notified {
            debug!(percent, "battery full flag reset");
            state.full_battery_notified = false;
        }
    }

    fn apply_error(&self, state: &mut MonitorState, error: String, notices: &mut Vec<BatteryNotice>) {
        warn!(%error, "battery check failed");
        if !state.sensor_error_notified {
            notices.push(BatteryNotice::CheckFailed { error });
            state.sensor_error_notified = true;
        }
        state.low_battery_notified = false;
        state.full_battery_notified = false;
        state.sensor_unavailable_notified = false;
    }

    /// Whether a check job is live for `session`.
    pub fn is_registered(&self, jobs: &dyn JobFacility, session: SessionId) -> bool {
        !jobs.jobs_by_name(&monitor_job_name(session)).is_empty()
    }

    /// Whether a fired tick comes from the session's live check job while
    /// monitoring is on. Ticks queued before a disable are dropped.
    pub fn accepts_tick(
        &self,
        state: &MonitorState,
        jobs: &dyn JobFacility,
        session: SessionId,
        id: JobId,
    ) -> bool {
        state.monitoring_enabled
            && jobs
                .jobs_by_name(&monitor_job_name(session))
                .iter()
                .any(|handle| handle.id == id)
    }

    /// Turn monitoring on. Registers the repeating job unless one is live,
    /// then resets the debounce flags. Returns `true` when a job was registered.
    pub fn enable(
        &self,
        state: &mut MonitorState,
        jobs: &mut dyn JobFacility,
        session: SessionId,
    ) -> bool {
        let registered = if self.is_registered(jobs, session) {
            false
        } else {
            self.register(jobs, session);
            true
        };
        state.monitoring_enabled = true;
        state.clear_notifications();
        info!(%session, "battery monitoring enabled");
        registered
    }

    /// Turn monitoring off. Cancels every check job for the session and
    /// resets the debounce flags. Returns the number of jobs removed.
    pub fn disable(
        &self,
        state: &mut MonitorState,
        jobs: &mut dyn JobFacility,
        session: SessionId,
    ) -> usize {
        let mut removed = 0;
        for handle in jobs.jobs_by_name(&monitor_job_name(session)) {
            match jobs.cancel(&handle) {
                Ok(()) => removed += 1,
                Err(e) => warn!(%session, job = %handle.id, error = %e, "cannot cancel battery check"),
            }
        }
        state.monitoring_enabled = false;
        state.clear_notifications();
        info!(%session, removed, "battery monitoring disabled");
        removed
    }

    /// Re-register the check job after a restart. Returns `true` when a job
    /// was registered; never registers a second one.
    pub fn restore(&self, state: &MonitorState, jobs: &mut dyn JobFacility, session: SessionId) -> bool {
        if !state.monitoring_enabled || self.is_registered(jobs, session) {
            return false;
        }
        self.register(jobs, session);
        info!(%session, "battery monitoring restored");
        true
    }

    fn register(&self, jobs: &mut dyn JobFacility, session: SessionId) {
        let handle = jobs.run_repeating(
            &monitor_job_name(session),
            self.interval,
            self.first_delay,
            JobPayload::BatteryCheck { session },
        );
        debug!(%session, job = %handle.id, "battery check registered");
    }
}
