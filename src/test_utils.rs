//! Shared test fakes for the job facility, OS facility and gateway.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::channels::{InboundEvent, MessagingGateway, OutboundMessage};
use crate::error::{AgentError, Result};
use crate::jobs::{JobFacility, JobHandle, JobId, JobPayload};
use crate::platform::{
    BatteryReading, DirCleanup, DiskUsage, OsFacility, ProcessInfo, SystemStatus,
};
use crate::session::{MessageRef, SessionId};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Job facility that records registrations instead of running timers.
#[derive(Default)]
pub struct RecordingJobs {
    pub once: Vec<(JobHandle, Duration, JobPayload)>,
    pub repeating: Vec<(JobHandle, Duration, Duration, JobPayload)>,
    pub cancelled: Vec<JobId>,
    /// Make every `cancel` fail, leaving the job live.
    pub fail_cancel: bool,
    live: BTreeMap<JobId, String>,
    next_id: u64,
}

impl RecordingJobs {
    /// Facility whose `cancel` always fails.
    pub fn failing_cancel() -> Self {
        Self {
            fail_cancel: true,
            ..Self::default()
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    fn register(&mut self, name: &str) -> JobHandle {
        self.next_id += 1;
        let id = JobId(self.next_id);
        self.live.insert(id, name.to_owned());
        JobHandle {
            id,
            name: name.to_owned(),
        }
    }
}

impl JobFacility for RecordingJobs {
    fn run_once(&mut self, name: &str, delay: Duration, payload: JobPayload) -> JobHandle {
        let handle = self.register(name);
        self.once.push((handle.clone(), delay, payload));
        handle
    }

    fn run_repeating(
        &mut self,
        name: &str,
        interval: Duration,
        first_delay: Duration,
        payload: JobPayload,
    ) -> JobHandle {
        let handle = self.register(name);
        self.repeating
            .push((handle.clone(), interval, first_delay, payload));
        handle
    }

    fn cancel(&mut self, handle: &JobHandle) -> Result<()> {
        if self.fail_cancel {
            return Err(AgentError::TimerCancel("scripted failure".into()));
        }
        match self.live.remove(&handle.id) {
            Some(_) => {
                self.cancelled.push(handle.id);
                Ok(())
            }
            None => Err(AgentError::TimerCancel(format!("{} unknown", handle.id))),
        }
    }

    fn jobs_by_name(&self, name: &str) -> Vec<JobHandle> {
        self.live
            .iter()
            .filter(|(_, n)| n.as_str() == name)
            .map(|(id, n)| JobHandle {
                id: *id,
                name: n.clone(),
            })
            .collect()
    }

    fn finish(&mut self, id: JobId) {
        self.live.remove(&id);
    }
}

/// OS facility with scripted battery readings and injectable failures.
#[derive(Default)]
pub struct ScriptedOs {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
    battery: Mutex<VecDeque<std::result::Result<BatteryReading, String>>>,
}

impl ScriptedOs {
    /// Operation names in call order (`terminate` calls carry the pid).
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_on(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    /// Queue a sensor result. An empty queue reads as `Unsupported`.
    pub fn push_battery(&self, reading: std::result::Result<BatteryReading, String>) {
        self.battery.lock().unwrap().push_back(reading);
    }

    fn record(&self, op: &'static str, detail: Option<String>) -> anyhow::Result<()> {
        let entry = match detail {
            Some(d) => format!("{op} {d}"),
            None => op.to_owned(),
        };
        self.calls.lock().unwrap().push(entry);
        if self.failing.lock().unwrap().contains(op) {
            anyhow::bail!("{op} failed");
        }
        Ok(())
    }
}

#[async_trait]
impl OsFacility for ScriptedOs {
    async fn shutdown(&self) -> anyhow::Result<()> {
        self.record("shutdown", None)
    }

    async fn reboot(&self) -> anyhow::Result<()> {
        self.record("reboot", None)
    }

    async fn lock(&self) -> anyhow::Result<()> {
        self.record("lock", None)
    }

    async fn abort_shutdown(&self) -> anyhow::Result<()> {
        self.record("abort", None)
    }

    async fn read_battery(&self) -> anyhow::Result<BatteryReading> {
        self.record("battery", None)?;
        match self.battery.lock().unwrap().pop_front() {
            Some(Ok(reading)) => Ok(reading),
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
            None => Ok(BatteryReading::Unsupported),
        }
    }

    async fn list_processes(&self) -> anyhow::Result<Vec<ProcessInfo>> {
        self.record("processes", None)?;
        Ok(vec![
            ProcessInfo {
                pid: 1,
                name: "init".into(),
            },
            ProcessInfo {
                pid: 4242,
                name: "editor".into(),
            },
        ])
    }

    async fn terminate_process(&self, pid: u32) -> anyhow::Result<()> {
        self.record("terminate", Some(pid.to_string()))
    }

    /// 12.5% CPU, 4 of 16 GiB RAM, 100 of 250 GiB on `/`.
    async fn system_status(&self) -> anyhow::Result<SystemStatus> {
        self.record("status", None)?;
        Ok(SystemStatus {
            cpu_percent: 12.5,
            memory_used: 4 * GIB,
            memory_total: 16 * GIB,
            disk: Some(DiskUsage {
                mount_point: PathBuf::from("/"),
                used: 100 * GIB,
                total: 250 * GIB,
            }),
        })
    }

    /// 2 days, 03:04:05.
    async fn uptime(&self) -> anyhow::Result<Duration> {
        self.record("uptime", None)?;
        Ok(Duration::from_secs(2 * 86_400 + 3 * 3600 + 4 * 60 + 5))
    }

    /// One directory: 7 removed, 1 failed.
    async fn clear_temp(&self) -> anyhow::Result<Vec<DirCleanup>> {
        self.record("clear_temp", None)?;
        Ok(vec![DirCleanup {
            path: PathBuf::from("/tmp"),
            removed: 7,
            failed: 1,
        }])
    }
}

const GIB: u64 = 1024 * 1024 * 1024;

/// Gateway that records outbound traffic.
#[derive(Default)]
pub struct RecordingGateway {
    pub sent: Mutex<Vec<(MessageRef, OutboundMessage)>>,
    pub edits: Mutex<Vec<(MessageRef, OutboundMessage)>>,
    pub answered: Mutex<Vec<String>>,
    pub fail_send: AtomicBool,
    pub fail_edit: AtomicBool,
    next_id: AtomicI64,
}

impl RecordingGateway {
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.text.clone())
            .collect()
    }

    pub fn edit_texts(&self) -> Vec<String> {
        self.edits
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.text.clone())
            .collect()
    }

    pub fn last_sent(&self) -> (MessageRef, OutboundMessage) {
        self.sent.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    fn id(&self) -> &'static str {
        "recording"
    }

    async fn send_message(
        &self,
        session: SessionId,
        message: OutboundMessage,
    ) -> anyhow::Result<MessageRef> {
        if self.fail_send.load(Ordering::SeqCst) {
            anyhow::bail!("send failed");
        }
        let target = MessageRef::new(session, self.next_id.fetch_add(1, Ordering::SeqCst) + 100);
        self.sent.lock().unwrap().push((target, message));
        Ok(target)
    }

    async fn edit_message(
        &self,
        target: &MessageRef,
        message: OutboundMessage,
    ) -> anyhow::Result<()> {
        if self.fail_edit.load(Ordering::SeqCst) {
            anyhow::bail!("edit failed");
        }
        self.edits.lock().unwrap().push((*target, message));
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> anyhow::Result<()> {
        self.answered.lock().unwrap().push(callback_id.to_owned());
        Ok(())
    }

    async fn run(&self, _inbound_tx: mpsc::Sender<InboundEvent>) -> anyhow::Result<()> {
        Ok(())
    }
}
