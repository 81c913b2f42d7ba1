//! Command, button and job handlers.

use super::Agent;
use crate::approval::{PendingConfirmation, ProposedAction};
use crate::channels::{Button, ButtonAction, InboundEvent, OutboundMessage};
use crate::error::{AgentError, Result};
use crate::jobs::{JobFired, JobPayload};
use crate::monitor::SensorOutcome;
use crate::platform::{BatteryReading, BatterySnapshot, DirCleanup, PowerAction, SystemStatus};
use crate::scheduler::{DELAY_FORMAT_HINT, DelaySpec, ResolvedDelay, format_remaining};
use crate::session::{MessageRef, SessionId};
use chrono::{NaiveDateTime, TimeDelta};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const HELP_TEXT: &str = "\
Commands:
/shutdown_now - shut down (asks for confirmation)
/reboot - reboot (asks for confirmation)
/lock - lock the screen (asks for confirmation)
/shutdown_timer <minutes|HH:MM> - shut down later
/cancel - cancel the scheduled shutdown
/status - CPU, memory and disk usage
/uptime - time since boot
/processes - list running processes
/is_running <name> - check whether a process is running
/kill_process <PID> - terminate a process (asks for confirmation)
/clear_temp - delete temporary files (asks for confirmation)
/battery - battery status
/toggle_battery_monitoring - turn battery alerts on or off
/help - this message";

/// Processes listed by `/processes` before the output is cut.
const MAX_LISTED_PROCESSES: usize = 30;

fn confirm_buttons() -> Vec<Button> {
    vec![
        Button::new("Confirm", ButtonAction::Confirm),
        Button::new("Cancel", ButtonAction::Cancel),
    ]
}

fn preset_label(minutes: u32) -> String {
    match (minutes / 60, minutes % 60) {
        (0, m) => format!("{m} min"),
        (h, 0) => format!("{h} h"),
        (h, m) => format!("{h} h {m} min"),
    }
}

fn in_progress_text(action: PowerAction) -> &'static str {
    match action {
        PowerAction::Shutdown => "Shutting down...",
        PowerAction::Reboot => "Rebooting...",
        PowerAction::Lock => "Locking the screen...",
    }
}

fn scheduled_text(now: NaiveDateTime, resolved: &ResolvedDelay) -> String {
    let day = if resolved.fire_at.date() == now.date() {
        ""
    } else {
        " tomorrow"
    };
    format!(
        "Shutdown scheduled for {}{day} (in {}).\nUse /cancel to abort.",
        resolved.fire_at.format("%H:%M:%S"),
        format_remaining(resolved.delay),
    )
}

/// Classify a one-shot battery query for the `/battery` reply.
fn battery_status(reading: anyhow::Result<BatteryReading>) -> Result<Option<BatterySnapshot>> {
    match reading {
        Ok(BatteryReading::Present(snapshot)) => Ok(Some(snapshot)),
        Ok(BatteryReading::Absent) => Ok(None),
        Ok(BatteryReading::Unsupported) => Err(AgentError::SensorUnavailable),
        Err(e) => Err(AgentError::Sensor(format!("{e:#}"))),
    }
}

fn gib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

fn usage_line(label: &str, used: u64, total: u64) -> String {
    let percent = if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    };
    format!(
        "{label}: {percent:.1}% used ({:.1} GB of {:.1} GB)",
        gib(used),
        gib(total)
    )
}

fn describe_status(status: &SystemStatus) -> String {
    let mut lines = vec![
        "System status:".to_owned(),
        format!("CPU: {:.1}%", status.cpu_percent),
        usage_line("RAM", status.memory_used, status.memory_total),
    ];
    if let Some(disk) = &status.disk {
        let label = format!("Disk {}", disk.mount_point.display());
        lines.push(usage_line(&label, disk.used, disk.total));
    }
    lines.join("\n")
}

fn describe_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let days = secs / 86_400;
    let (h, m, s) = (secs % 86_400 / 3600, secs % 3600 / 60, secs % 60);
    let unit = if days == 1 { "day" } else { "days" };
    format!("Uptime: {days} {unit}, {h:02}:{m:02}:{s:02}")
}

fn describe_cleanup(report: &[DirCleanup]) -> String {
    if report.is_empty() {
        return "No temporary directories were found.".to_owned();
    }
    let mut lines = vec!["Temporary files cleared.".to_owned()];
    lines.extend(report.iter().map(|dir| {
        format!(
            "{}: {} removed, {} failed",
            dir.path.display(),
            dir.removed,
            dir.failed
        )
    }));
    let removed: usize = report.iter().map(|d| d.removed).sum();
    let failed: usize = report.iter().map(|d| d.failed).sum();
    lines.push(format!("Total: {removed} removed, {failed} failed."));
    lines.join("\n")
}

fn describe_battery(snapshot: &BatterySnapshot) -> String {
    let power = match (snapshot.plugged, snapshot.secs_left) {
        (true, _) => "plugged in".to_owned(),
        (false, Some(secs)) => {
            let left = i64::try_from(secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .unwrap_or(TimeDelta::MAX);
            format!("on battery, {} left", format_remaining(left))
        }
        (false, None) => "on battery".to_owned(),
    };
    format!("Battery: {:.1}%\nPower: {power}", snapshot.percent)
}

impl Agent {
    /// Handle one gateway event.
    pub async fn handle_inbound(&mut self, event: InboundEvent) {
        let session = event.session();
        if !self.is_authorized(session) {
            warn!(%session, "unauthorized access attempt");
            if let InboundEvent::ButtonPress { callback_id, .. } = &event {
                self.answer(callback_id).await;
            }
            self.reply(session, "Access denied.").await;
            return;
        }

        match event {
            InboundEvent::Command { name, args, .. } => {
                info!(%session, command = %name, "command received");
                self.handle_command(session, &name, &args).await;
            }
            InboundEvent::ButtonPress {
                callback_id,
                data,
                message,
                ..
            } => {
                self.answer(&callback_id).await;
                match data.parse::<ButtonAction>() {
                    Ok(action) => self.handle_button(session, action, message).await,
                    Err(e) => warn!(%session, error = %e, "unrecognised button"),
                }
            }
        }
    }

    async fn answer(&self, callback_id: &str) {
        if let Err(e) = self.gateway.answer_callback(callback_id).await {
            debug!(callback_id, error = %e, "cannot answer callback");
        }
    }

    async fn handle_command(&mut self, session: SessionId, name: &str, args: &[String]) {
        match name {
            "start" | "help" => {
                self.reply(session, HELP_TEXT).await;
            }
            "shutdown_now" => {
                self.propose(session, ProposedAction::Immediate(PowerAction::Shutdown))
                    .await;
            }
            "reboot" => {
                self.propose(session, ProposedAction::Immediate(PowerAction::Reboot))
                    .await;
            }
            "lock" => {
                self.propose(session, ProposedAction::Immediate(PowerAction::Lock))
                    .await;
            }
            "shutdown_timer" if args.is_empty() => self.offer_timer_presets(session).await,
            "shutdown_timer" => self.schedule_from_input(session, &args.join(" ")).await,
            "cancel" => {
                let text = match self.cancel_deferred(session).await {
                    Ok(()) => "Scheduled shutdown cancelled.",
                    Err(_) => "No active shutdown timers to cancel.",
                };
                self.reply(session, text).await;
            }
            "status" => {
                let text = match self.os.system_status().await {
                    Ok(status) => describe_status(&status),
                    Err(e) => format!("Cannot read system status: {e:#}"),
                };
                self.reply(session, text).await;
            }
            "uptime" => {
                let text = match self.os.uptime().await {
                    Ok(uptime) => describe_uptime(uptime),
                    Err(e) => format!("Cannot read uptime: {e:#}"),
                };
                self.reply(session, text).await;
            }
            "processes" => self.list_processes(session).await,
            "is_running" => self.check_running(session, args).await,
            "kill_process" => self.propose_kill(session, args).await,
            "clear_temp" => self.propose(session, ProposedAction::ClearTemp).await,
            "battery" => {
                let text = match battery_status(self.os.read_battery().await) {
                    Ok(Some(snapshot)) => describe_battery(&snapshot),
                    Ok(None) => "No battery detected on this host.".to_owned(),
                    Err(e) => format!("Cannot read the battery: {e}"),
                };
                self.reply(session, text).await;
            }
            "toggle_battery_monitoring" => self.toggle_monitoring(session).await,
            other => {
                self.reply(
                    session,
                    format!("Unknown command /{other}. Send /help for the list of commands."),
                )
                .await;
            }
        }
    }

    /// Record a proposal and send its prompt with Confirm/Cancel buttons.
    async fn propose(&mut self, session: SessionId, action: ProposedAction) {
        self.confirmations.propose(session, action, None);
        let prompt = OutboundMessage::text(format!("Are you sure you want to {action}?"))
            .with_buttons(confirm_buttons());
        if let Some(sent) = self.reply(session, prompt).await {
            self.confirmations.set_prompt(session, sent);
        }
    }

    async fn offer_timer_presets(&self, session: SessionId) {
        let mut buttons: Vec<Button> = self
            .config
            .timer
            .presets_minutes
            .iter()
            .map(|&minutes| Button::new(preset_label(minutes), ButtonAction::Timer { minutes }))
            .collect();
        buttons.push(Button::new("Cancel", ButtonAction::Cancel));

        let text = format!(
            "Choose when to shut down, or send /shutdown_timer <minutes|HH:MM>.\nFormat: {DELAY_FORMAT_HINT}."
        );
        self.reply(session, OutboundMessage::text(text).with_buttons(buttons))
            .await;
    }

    /// Parse, resolve and schedule a delayed shutdown from operator input.
    async fn schedule_from_input(&mut self, session: SessionId, input: &str) {
        let now = self.now();
        let resolved = input
            .parse::<DelaySpec>()
            .and_then(|spec| spec.resolve(now));
        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(e @ AgentError::InvalidDelay) => {
                self.reply(
                    session,
                    format!("Cannot schedule shutdown: {e}.\nFormat: {DELAY_FORMAT_HINT}."),
                )
                .await;
                return;
            }
            Err(e) => {
                self.reply(session, format!("Cannot schedule shutdown: {e}."))
                    .await;
                return;
            }
        };

        if let Err(e) = self.schedule_shutdown(session, resolved, None, now).await {
            self.reply(session, format!("Cannot schedule shutdown: {e}."))
                .await;
        }
    }

    /// Schedule and report a delayed shutdown. The status message (edited in
    /// place when `origin` is given) becomes the action's origin message.
    async fn schedule_shutdown(
        &mut self,
        session: SessionId,
        resolved: ResolvedDelay,
        origin: Option<MessageRef>,
        now: NaiveDateTime,
    ) -> Result<()> {
        self.scheduler.schedule(
            self.jobs.as_mut(),
            session,
            PowerAction::Shutdown,
            resolved,
            origin,
        )?;
        let status = self
            .edit_or_send(session, origin, scheduled_text(now, &resolved))
            .await;
        if let Some(status) = status {
            self.scheduler.set_origin(session, status);
        }
        Ok(())
    }

    /// Cancel the deferred action and attempt the native abort.
    async fn cancel_deferred(&mut self, session: SessionId) -> Result<()> {
        if !self.scheduler.cancel(self.jobs.as_mut(), session) {
            return Err(AgentError::NoPendingDeferredAction);
        }
        if let Err(e) = self.os.abort_shutdown().await {
            warn!(%session, error = %e, "native shutdown abort failed");
        }
        Ok(())
    }

    async fn list_processes(&self, session: SessionId) {
        let text = match self.os.list_processes().await {
            Ok(procs) => {
                let mut lines = vec![format!("Running processes ({}):", procs.len())];
                lines.extend(
                    procs
                        .iter()
                        .take(MAX_LISTED_PROCESSES)
                        .map(|p| format!("{:>7}  {}", p.pid, p.name)),
                );
                if procs.len() > MAX_LISTED_PROCESSES {
                    lines.push(format!("...and {} more", procs.len() - MAX_LISTED_PROCESSES));
                }
                lines.push("Use /kill_process <PID> to terminate one.".to_owned());
                lines.join("\n")
            }
            Err(e) => format!("Cannot list processes: {e:#}"),
        };
        self.reply(session, text).await;
    }

    async fn check_running(&self, session: SessionId, args: &[String]) {
        let needle = args.join(" ");
        if needle.trim().is_empty() {
            self.reply(session, "Usage: /is_running <name>").await;
            return;
        }
        let text = match self.os.find_process(needle.trim()).await {
            Ok(Some(found)) => format!("Process {} (PID {}) is running.", found.name, found.pid),
            Ok(None) => format!("Process {} is not running.", needle.trim()),
            Err(e) => format!("Cannot check processes: {e:#}"),
        };
        self.reply(session, text).await;
    }

    async fn propose_kill(&mut self, session: SessionId, args: &[String]) {
        let pid = match args {
            [pid] => pid.parse::<u32>().ok(),
            _ => None,
        };
        let Some(pid) = pid else {
            self.reply(session, "Usage: /kill_process <PID>").await;
            return;
        };

        match self.os.list_processes().await {
            Ok(procs) if !procs.iter().any(|p| p.pid == pid) => {
                self.reply(session, format!("Process {pid} not found.")).await;
                return;
            }
            Ok(_) => {}
            Err(e) => debug!(%session, error = %e, "cannot verify pid before proposing"),
        }
        self.propose(session, ProposedAction::KillProcess { pid })
            .await;
    }

    async fn toggle_monitoring(&mut self, session: SessionId) {
        let text = if self.monitor.is_registered(self.jobs.as_ref(), session) {
            self.monitor
                .disable(&mut self.monitor_state, self.jobs.as_mut(), session);
            "Battery monitoring disabled.".to_owned()
        } else {
            self.monitor
                .enable(&mut self.monitor_state, self.jobs.as_mut(), session);
            format!(
                "Battery monitoring enabled. Checking every {} min.",
                self.config.monitor.interval_secs.div_ceil(60)
            )
        };
        self.persist();
        self.reply(session, text).await;
    }

    async fn handle_button(
        &mut self,
        session: SessionId,
        action: ButtonAction,
        message: Option<MessageRef>,
    ) {
        match action {
            ButtonAction::Timer { minutes } => {
                let proposal = ProposedAction::DelayedShutdown { minutes };
                self.confirmations.propose(session, proposal, message);
                let prompt = OutboundMessage::text(format!("Are you sure you want to {proposal}?"))
                    .with_buttons(confirm_buttons());
                if let Some(shown) = self.edit_or_send(session, message, prompt).await {
                    self.confirmations.set_prompt(session, shown);
                }
            }
            ButtonAction::Confirm | ButtonAction::Cancel if self.is_stale_press(session, message) => {
                debug!(%session, "press on a superseded prompt");
                self.edit_or_send(session, message, "This request has expired.")
                    .await;
            }
            ButtonAction::Confirm => match self.confirmations.confirm(session) {
                Ok(pending) => self.execute_confirmed(session, pending).await,
                Err(e) => {
                    self.edit_or_send(session, message, format!("Nothing to do: {e}."))
                        .await;
                }
            },
            ButtonAction::Cancel => self.cancel_confirmation(session, message).await,
        }
    }

    /// A press on a message other than the pending proposal's prompt.
    fn is_stale_press(&self, session: SessionId, message: Option<MessageRef>) -> bool {
        let prompt = self
            .confirmations
            .pending(session)
            .and_then(|pending| pending.prompt);
        matches!((prompt, message), (Some(prompt), Some(pressed)) if prompt != pressed)
    }

    async fn execute_confirmed(&mut self, session: SessionId, pending: PendingConfirmation) {
        let PendingConfirmation { action, prompt } = pending;
        info!(%session, %action, "confirmed");
        match action {
            ProposedAction::Immediate(power) => {
                self.edit_or_send(session, prompt, in_progress_text(power))
                    .await;
                if let Err(e) = self.os.perform(power).await {
                    error!(%session, error = %e, "{power} failed");
                    self.reply(session, format!("Failed to {power}: {e:#}"))
                        .await;
                }
            }
            ProposedAction::KillProcess { pid } => {
                let text = match self.os.terminate_process(pid).await {
                    Ok(()) => format!("Process {pid} terminated."),
                    Err(e) => format!("Failed to terminate process {pid}: {e:#}"),
                };
                self.edit_or_send(session, prompt, text).await;
            }
            ProposedAction::ClearTemp => {
                self.edit_or_send(session, prompt, "Clearing temporary files...")
                    .await;
                let text = match self.os.clear_temp().await {
                    Ok(report) => describe_cleanup(&report),
                    Err(e) => {
                        error!(%session, error = %e, "temp cleanup failed");
                        format!("Failed to clear temporary files: {e:#}")
                    }
                };
                self.reply(session, text).await;
            }
            ProposedAction::DelayedShutdown { minutes } => {
                let now = self.now();
                let outcome = match DelaySpec::Minutes(i64::from(minutes)).resolve(now) {
                    Ok(resolved) => self.schedule_shutdown(session, resolved, prompt, now).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = outcome {
                    self.edit_or_send(session, prompt, format!("Cannot schedule shutdown: {e}."))
                        .await;
                }
            }
        }
    }

    /// Discard the pending proposal. A deferred proposal, or a Cancel press
    /// with nothing pending (the timer picker), also cancels the scheduled
    /// shutdown.
    async fn cancel_confirmation(&mut self, session: SessionId, message: Option<MessageRef>) {
        let cleared = self.confirmations.cancel(session);
        let touches_timer = cleared.is_none_or(|pending| pending.action.is_deferred());
        let timer_cancelled = touches_timer && self.cancel_deferred(session).await.is_ok();

        let text = match (cleared, timer_cancelled) {
            (_, true) => "Cancelled. The scheduled shutdown was aborted.",
            (Some(_), false) => "Action cancelled.",
            (None, false) => "Nothing to cancel.",
        };
        self.edit_or_send(session, message, text).await;
    }

    /// Handle an expired job.
    pub async fn handle_fired(&mut self, fired: JobFired) {
        match fired.payload {
            JobPayload::DeferredAction { session } => {
                self.jobs.finish(fired.id);
                let Some(pending) = self.scheduler.take_fired(session, fired.id) else {
                    return;
                };
                info!(%session, job = %fired.id, "deferred {} firing", pending.kind);
                self.edit_or_send(session, pending.origin, "Shutting down (timer)...")
                    .await;
                if let Err(e) = self.os.perform(pending.kind).await {
                    error!(%session, error = %e, "deferred {} failed", pending.kind);
                    self.reply(session, format!("Scheduled {} failed: {e:#}", pending.kind))
                        .await;
                }
            }
            JobPayload::BatteryCheck { session } => {
                let live = self.monitor.accepts_tick(
                    &self.monitor_state,
                    self.jobs.as_ref(),
                    session,
                    fired.id,
                );
                if live {
                    self.battery_tick(session).await;
                } else {
                    debug!(%session, job = %fired.id, "dropping tick from a cancelled battery check");
                }
            }
        }
    }

    async fn battery_tick(&mut self, session: SessionId) {
        let outcome = SensorOutcome::from(self.os.read_battery().await);
        let mut tick = self.monitor.evaluate(&mut self.monitor_state, outcome);

        for notice in std::mem::take(&mut tick.notices) {
            if let Err(e) = self
                .gateway
                .send_message(session, notice.to_string().into())
                .await
            {
                warn!(%session, error = %e, "cannot deliver battery notice");
                let retry = self
                    .monitor
                    .delivery_failed(&mut self.monitor_state, format!("{e:#}"));
                tick.changed |= retry.changed;
                break;
            }
        }

        if tick.changed {
            self.persist();
        }
    }
}
