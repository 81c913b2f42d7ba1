//! The control agent.
//!
//! [`Agent`] owns every piece of mutable state: the deferred action table,
//! the confirmation book, the monitor flags and the store. Inbound gateway
//! events and fired jobs are handled one at a time from a single
//! `select!` loop, so no state needs a lock.
//!
//! # Usage
//!
//! ```rust,ignore
//! let (jobs, fired_rx) = TokioJobQueue::new();
//! let mut agent = Agent::new(config, gateway, os, Box::new(jobs), store);
//! agent.restore();
//! agent.run(inbound_rx, fired_rx, cancel.child_token()).await;
//! ```

mod handlers;

use crate::approval::{ConfirmationBook, PendingConfirmation};
use crate::channels::{InboundEvent, MessagingGateway, OutboundMessage};
use crate::config::AgentConfig;
use crate::jobs::{JobFacility, JobFired};
use crate::monitor::BatteryMonitor;
use crate::platform::OsFacility;
use crate::scheduler::{DeferredScheduler, PendingDeferredAction};
use crate::session::{MessageRef, SessionId};
use crate::store::{MonitorState, PersistedSnapshot, StateStore};
use chrono::NaiveDateTime;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Clock = Box<dyn Fn() -> NaiveDateTime + Send + Sync>;

pub struct Agent {
    config: AgentConfig,
    gateway: Arc<dyn MessagingGateway>,
    os: Arc<dyn OsFacility>,
    jobs: Box<dyn JobFacility>,
    scheduler: DeferredScheduler,
    confirmations: ConfirmationBook,
    monitor: BatteryMonitor,
    monitor_state: MonitorState,
    store: StateStore,
    clock: Clock,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        gateway: Arc<dyn MessagingGateway>,
        os: Arc<dyn OsFacility>,
        jobs: Box<dyn JobFacility>,
        store: StateStore,
    ) -> Self {
        let monitor = BatteryMonitor::from_config(&config.monitor);
        Self {
            config,
            gateway,
            os,
            jobs,
            scheduler: DeferredScheduler::new(),
            confirmations: ConfirmationBook::new(),
            monitor,
            monitor_state: MonitorState::default(),
            store,
            clock: Box::new(|| chrono::Local::now().naive_local()),
        }
    }

    /// Replace the wall clock used to resolve delays.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Load persisted state and re-register the battery check if monitoring
    /// was on when the process last ran. Returns `true` when a job was
    /// registered.
    pub fn restore(&mut self) -> bool {
        match self.store.load() {
            Ok(snapshot) => self.monitor_state = snapshot.monitor,
            Err(e) => warn!(error = %e, "cannot load state, starting with defaults"),
        }
        let Some(session) = self.config.authorized_session() else {
            if self.monitor_state.monitoring_enabled {
                warn!("monitoring was enabled but no session is authorized");
            }
            return false;
        };
        self.monitor
            .restore(&self.monitor_state, self.jobs.as_mut(), session)
    }

    /// Handle events until the gateway closes or `cancel` fires.
    pub async fn run(
        mut self,
        mut inbound_rx: mpsc::Receiver<InboundEvent>,
        mut fired_rx: mpsc::UnboundedReceiver<JobFired>,
        cancel: CancellationToken,
    ) {
        info!(gateway = self.gateway.id(), "agent started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("agent stopped");
                    break;
                }
                event = inbound_rx.recv() => match event {
                    Some(event) => self.handle_inbound(event).await,
                    None => {
                        info!("gateway closed; agent stopping");
                        break;
                    }
                },
                Some(fired) = fired_rx.recv() => self.handle_fired(fired).await,
            }
        }
    }

    pub fn monitor_state(&self) -> &MonitorState {
        &self.monitor_state
    }

    pub fn pending_deferred(&self, session: SessionId) -> Option<&PendingDeferredAction> {
        self.scheduler.pending(session)
    }

    pub fn pending_confirmation(&self, session: SessionId) -> Option<&PendingConfirmation> {
        self.confirmations.pending(session)
    }

    pub fn jobs(&self) -> &dyn JobFacility {
        self.jobs.as_ref()
    }

    fn now(&self) -> NaiveDateTime {
        (self.clock)()
    }

    fn is_authorized(&self, session: SessionId) -> bool {
        self.config.authorized_session() == Some(session)
    }

    /// Write the monitor flags. A failure is logged; memory stays authoritative.
    fn persist(&self) {
        let snapshot = PersistedSnapshot {
            monitor: self.monitor_state,
        };
        if let Err(e) = self.store.save(&snapshot) {
            error!(error = %e, "cannot persist state");
        }
    }

    /// Send a message, logging delivery failures.
    async fn reply(
        &self,
        session: SessionId,
        message: impl Into<OutboundMessage>,
    ) -> Option<MessageRef> {
        match self.gateway.send_message(session, message.into()).await {
            Ok(sent) => Some(sent),
            Err(e) => {
                warn!(%session, error = %e, "cannot send message");
                None
            }
        }
    }

    /// Edit `target` in place, or send a new message when there is no
    /// target or the edit fails. Returns the message now showing `message`.
    async fn edit_or_send(
        &self,
        session: SessionId,
        target: Option<MessageRef>,
        message: impl Into<OutboundMessage>,
    ) -> Option<MessageRef> {
        let message = message.into();
        if let Some(target) = target {
            match self.gateway.edit_message(&target, message.clone()).await {
                Ok(()) => return Some(target),
                Err(e) => debug!(%session, error = %e, "edit failed, sending instead"),
            }
        }
        self.reply(session, message).await
    }
}
