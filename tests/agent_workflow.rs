//! End-to-end tests for the agent loop.
//!
//! Drives a running [`Agent`] over its inbound queue with the real
//! [`TokioJobQueue`] on a paused clock, and checks what reaches the gateway
//! and the host.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use pcpilot::channels::{InboundEvent, MessagingGateway, OutboundMessage};
use pcpilot::jobs::TokioJobQueue;
use pcpilot::platform::{
    BatteryReading, BatterySnapshot, DirCleanup, OsFacility, ProcessInfo, SystemStatus,
};
use pcpilot::store::{MonitorState, PersistedSnapshot, StateStore};
use pcpilot::{Agent, AgentConfig, MessageRef, SessionId};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const OPERATOR: SessionId = SessionId(77);

#[derive(Default)]
struct Chat {
    sent: Mutex<Vec<String>>,
    edited: Mutex<Vec<String>>,
    next_id: AtomicI64,
}

#[async_trait]
impl MessagingGateway for Chat {
    fn id(&self) -> &'static str {
        "test-chat"
    }

    async fn send_message(
        &self,
        session: SessionId,
        message: OutboundMessage,
    ) -> anyhow::Result<MessageRef> {
        self.sent.lock().unwrap().push(message.text);
        Ok(MessageRef::new(
            session,
            self.next_id.fetch_add(1, Ordering::SeqCst),
        ))
    }

    async fn edit_message(
        &self,
        _target: &MessageRef,
        message: OutboundMessage,
    ) -> anyhow::Result<()> {
        self.edited.lock().unwrap().push(message.text);
        Ok(())
    }

    async fn answer_callback(&self, _callback_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn run(&self, _inbound_tx: mpsc::Sender<InboundEvent>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Host whose battery sits at a fixed level.
struct Host {
    calls: Mutex<Vec<&'static str>>,
    percent: f32,
}

impl Host {
    fn new(percent: f32) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            percent,
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| **c == op).count()
    }

    fn record(&self, op: &'static str) {
        self.calls.lock().unwrap().push(op);
    }
}

#[async_trait]
impl OsFacility for Host {
    async fn shutdown(&self) -> anyhow::Result<()> {
        self.record("shutdown");
        Ok(())
    }

    async fn reboot(&self) -> anyhow::Result<()> {
        self.record("reboot");
        Ok(())
    }

    async fn lock(&self) -> anyhow::Result<()> {
        self.record("lock");
        Ok(())
    }

    async fn abort_shutdown(&self) -> anyhow::Result<()> {
        self.record("abort");
        Ok(())
    }

    async fn read_battery(&self) -> anyhow::Result<BatteryReading> {
        self.record("battery");
        Ok(BatteryReading::Present(BatterySnapshot {
            percent: self.percent,
            plugged: false,
            secs_left: None,
        }))
    }

    async fn list_processes(&self) -> anyhow::Result<Vec<ProcessInfo>> {
        Ok(Vec::new())
    }

    async fn system_status(&self) -> anyhow::Result<SystemStatus> {
        Ok(SystemStatus {
            cpu_percent: 0.0,
            memory_used: 0,
            memory_total: 0,
            disk: None,
        })
    }

    async fn uptime(&self) -> anyhow::Result<Duration> {
        Ok(Duration::from_secs(60))
    }

    async fn clear_temp(&self) -> anyhow::Result<Vec<DirCleanup>> {
        self.record("clear_temp");
        Ok(Vec::new())
    }

    async fn terminate_process(&self, _pid: u32) -> anyhow::Result<()> {
        self.record("terminate");
        Ok(())
    }
}

struct Running {
    chat: Arc<Chat>,
    host: Arc<Host>,
    inbound: mpsc::Sender<InboundEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

fn start(store: StateStore, host: Host) -> Running {
    let chat = Arc::new(Chat::default());
    let host = Arc::new(host);
    let config = AgentConfig {
        authorized_session: Some(OPERATOR.0),
        ..AgentConfig::default()
    };
    let (jobs, fired_rx) = TokioJobQueue::new();
    let mut agent = Agent::new(config, chat.clone(), host.clone(), Box::new(jobs), store);
    agent.restore();

    let (inbound, inbound_rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(agent.run(inbound_rx, fired_rx, cancel.clone()));
    Running {
        chat,
        host,
        inbound,
        cancel,
        task,
    }
}

async fn command(running: &Running, name: &str, args: &[&str]) {
    running
        .inbound
        .send(InboundEvent::Command {
            session: OPERATOR,
            name: name.to_owned(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
            message: None,
        })
        .await
        .unwrap();
    settle().await;
}

/// Let the agent drain its queues.
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn timer_fires_once_and_shuts_down() {
    let running = start(StateStore::in_memory(), Host::new(80.0));

    command(&running, "shutdown_timer", &["2"]).await;
    assert!(running.chat.sent.lock().unwrap()[0].starts_with("Shutdown scheduled"));

    advance(119).await;
    assert!(running.host.calls().is_empty());

    advance(2).await;
    assert_eq!(running.host.calls(), vec!["shutdown"]);
    assert_eq!(
        *running.chat.edited.lock().unwrap(),
        vec!["Shutting down (timer)..."]
    );

    advance(600).await;
    assert_eq!(running.host.count("shutdown"), 1);
}

#[tokio::test(start_paused = true)]
async fn rescheduling_keeps_only_the_latest_timer() {
    let running = start(StateStore::in_memory(), Host::new(80.0));

    command(&running, "shutdown_timer", &["1"]).await;
    command(&running, "shutdown_timer", &["5"]).await;

    advance(120).await;
    assert!(running.host.calls().is_empty(), "first timer was replaced");

    advance(200).await;
    assert_eq!(running.host.count("shutdown"), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_before_expiry_prevents_the_shutdown() {
    let running = start(StateStore::in_memory(), Host::new(80.0));

    command(&running, "shutdown_timer", &["1"]).await;
    advance(30).await;
    command(&running, "cancel", &[]).await;
    advance(300).await;

    assert_eq!(running.host.calls(), vec!["abort"]);
    assert_eq!(
        running.chat.sent.lock().unwrap().last().unwrap(),
        "Scheduled shutdown cancelled."
    );
}

#[tokio::test(start_paused = true)]
async fn monitoring_alerts_once_while_battery_stays_low() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let running = start(StateStore::new(path.clone()), Host::new(12.0));

    command(&running, "toggle_battery_monitoring", &[]).await;
    advance(11).await;
    assert_eq!(running.host.count("battery"), 1);

    advance(300).await;
    advance(300).await;
    assert_eq!(running.host.count("battery"), 3);

    let alerts: Vec<String> = running
        .chat
        .sent
        .lock()
        .unwrap()
        .iter()
        .filter(|t| t.contains("Low battery"))
        .cloned()
        .collect();
    assert_eq!(alerts.len(), 1);

    let saved = StateStore::new(path).load().unwrap().monitor;
    assert!(saved.monitoring_enabled);
    assert!(saved.low_battery_notified);
}

#[tokio::test(start_paused = true)]
async fn restart_resumes_monitoring_with_one_job() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    StateStore::new(path.clone())
        .save(&PersistedSnapshot {
            monitor: MonitorState {
                monitoring_enabled: true,
                ..MonitorState::default()
            },
        })
        .unwrap();

    let running = start(StateStore::new(path), Host::new(50.0));
    advance(11).await;
    assert_eq!(running.host.count("battery"), 1);

    advance(300).await;
    assert_eq!(running.host.count("battery"), 2, "exactly one repeating job");
}

#[tokio::test(start_paused = true)]
async fn disabling_monitoring_stops_battery_reads() {
    let running = start(StateStore::in_memory(), Host::new(12.0));

    command(&running, "toggle_battery_monitoring", &[]).await;
    advance(11).await;
    command(&running, "toggle_battery_monitoring", &[]).await;
    advance(900).await;

    assert_eq!(running.host.count("battery"), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_token_stops_the_loop() {
    let running = start(StateStore::in_memory(), Host::new(80.0));
    command(&running, "shutdown_timer", &["1"]).await;

    running.cancel.cancel();
    running.task.await.unwrap();

    advance(120).await;
    assert!(running.host.calls().is_empty());
}
