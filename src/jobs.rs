//! Timer/job facility.
//!
//! [`JobFacility`] is the one-shot and repeating callback primitive the
//! scheduler and the battery monitor register with. Jobs never run agent code
//! directly: on expiry they post a [`JobFired`] onto the agent's dispatch
//! queue, so timer callbacks are handled serially with inbound events.
//!
//! [`TokioJobQueue`] is the runtime implementation. Each job is a spawned
//! tokio task guarded by a [`CancellationToken`].

use crate::error::{AgentError, Result};
use crate::session::SessionId;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Smallest repeat interval accepted by [`TokioJobQueue::run_repeating`].
const MIN_REPEAT_INTERVAL: Duration = Duration::from_millis(1);

/// Opaque job identifier, unique for the lifetime of a job facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Reference to a registered job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: JobId,
    pub name: String,
}

/// What a job is for. Carried back to the agent when the job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPayload {
    /// A pending deferred action reached its fire time.
    DeferredAction { session: SessionId },
    /// Periodic battery check for a session.
    BatteryCheck { session: SessionId },
}

/// Notification that a job expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFired {
    pub id: JobId,
    pub name: String,
    pub payload: JobPayload,
}

/// Runtime timer primitive.
pub trait JobFacility: Send + Sync {
    /// Register a job that fires once after `delay`.
    fn run_once(&mut self, name: &str, delay: Duration, payload: JobPayload) -> JobHandle;

    /// Register a job that fires after `first_delay` and then every `interval`.
    fn run_repeating(
        &mut self,
        name: &str,
        interval: Duration,
        first_delay: Duration,
        payload: JobPayload,
    ) -> JobHandle;

    /// Cancel a live job. Errors when the handle is unknown or already released.
    fn cancel(&mut self, handle: &JobHandle) -> Result<()>;

    /// Live jobs registered under `name`.
    fn jobs_by_name(&self, name: &str) -> Vec<JobHandle>;

    /// Release a one-shot job after its fire has been handled.
    fn finish(&mut self, id: JobId);
}

struct LiveJob {
    name: String,
    token: CancellationToken,
}

/// Tokio-backed [`JobFacility`].
pub struct TokioJobQueue {
    fired_tx: mpsc::UnboundedSender<JobFired>,
    jobs: HashMap<JobId, LiveJob>,
    next_id: u64,
    root: CancellationToken,
}

impl TokioJobQueue {
    /// Create a queue and the receiver its fired jobs are delivered to.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JobFired>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let queue = Self {
            fired_tx,
            jobs: HashMap::new(),
            next_id: 1,
            root: CancellationToken::new(),
        };
        (queue, fired_rx)
    }

    /// Number of live jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Cancel every job.
    pub fn shutdown(&mut self) {
        self.root.cancel();
        self.jobs.clear();
    }

    fn register(&mut self, name: &str) -> (JobHandle, CancellationToken) {
        let id = JobId(self.next_id);
        self.next_id += 1;
        let token = self.root.child_token();
        self.jobs.insert(
            id,
            LiveJob {
                name: name.to_owned(),
                token: token.clone(),
            },
        );
        (
            JobHandle {
                id,
                name: name.to_owned(),
            },
            token,
        )
    }
}

impl JobFacility for TokioJobQueue {
    fn run_once(&mut self, name: &str, delay: Duration, payload: JobPayload) -> JobHandle {
        let (handle, token) = self.register(name);
        let fired = JobFired {
            id: handle.id,
            name: handle.name.clone(),
            payload,
        };
        let tx = self.fired_tx.clone();
        debug!(job = %handle.id, name, ?delay, "one-shot job registered");

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    // A closed queue means the agent is gone.
                    let _ = tx.send(fired);
                }
            }
        });
        handle
    }

    fn run_repeating(
        &mut self,
        name: &str,
        interval: Duration,
        first_delay: Duration,
        payload: JobPayload,
    ) -> JobHandle {
        let (handle, token) = self.register(name);
        let id = handle.id;
        let job_name = handle.name.clone();
        let tx = self.fired_tx.clone();
        let interval = interval.max(MIN_REPEAT_INTERVAL);
        debug!(job = %id, name, ?interval, ?first_delay, "repeating job registered");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + first_delay, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let fired = JobFired {
                            id,
                            name: job_name.clone(),
                            payload,
                        };
                        if tx.send(fired).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        handle
    }

    fn cancel(&mut self, handle: &JobHandle) -> Result<()> {
        match self.jobs.remove(&handle.id) {
            Some(job) => {
                job.token.cancel();
                debug!(job = %handle.id, name = %job.name, "job cancelled");
                Ok(())
            }
            None => Err(AgentError::TimerCancel(format!(
                "{} ({}) is not registered",
                handle.id, handle.name
            ))),
        }
    }

    fn jobs_by_name(&self, name: &str) -> Vec<JobHandle> {
        let mut handles: Vec<JobHandle> = self
            .jobs
            .iter()
            .filter(|(_, job)| job.name == name)
            .map(|(id, job)| JobHandle {
                id: *id,
                name: job.name.clone(),
            })
            .collect();
        handles.sort_by_key(|h| h.id);
        handles
    }

    fn finish(&mut self, id: JobId) {
        if let Some(job) = self.jobs.remove(&id) {
            job.token.cancel();
        }
    }
}

impl Drop for TokioJobQueue {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
