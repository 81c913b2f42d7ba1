//! Deferred action table.
//!
//! Holds at most one [`PendingDeferredAction`] per session. Scheduling over an
//! existing entry releases the prior timer before registering the new one, in
//! a single `&mut self` call, so two handles are never current at once.

use crate::error::{AgentError, Result};
use crate::jobs::{JobFacility, JobHandle, JobId, JobPayload};
use crate::platform::PowerAction;
use crate::scheduler::delay::ResolvedDelay;
use crate::session::{MessageRef, SessionId};
use chrono::{NaiveDateTime, TimeDelta};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// An action waiting for its timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeferredAction {
    pub kind: PowerAction,
    pub fire_at: NaiveDateTime,
    pub handle: JobHandle,
    /// Status message to edit when the action fires.
    pub origin: Option<MessageRef>,
}

/// Job name used for a session's deferred action timer.
#[must_use]
pub fn deferred_job_name(session: SessionId) -> String {
    format!("shutdown_timer_{session}")
}

/// Per-session deferred action scheduler.
#[derive(Debug, Default)]
pub struct DeferredScheduler {
    pending: HashMap<SessionId, PendingDeferredAction>,
}

impl DeferredScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The session's pending action, if any.
    #[must_use]
    pub fn pending(&self, session: SessionId) -> Option<&PendingDeferredAction> {
        self.pending.get(&session)
    }

    /// Total pending actions across sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Schedule `kind` for `session`, replacing any pending action.
    ///
    /// The prior timer is cancelled best-effort: a cancel failure is logged
    /// and the new schedule proceeds.
    pub fn schedule(
        &mut self,
        jobs: &mut dyn JobFacility,
        session: SessionId,
        kind: PowerAction,
        resolved: ResolvedDelay,
        origin: Option<MessageRef>,
    ) -> Result<&PendingDeferredAction> {
        if resolved.delay <= TimeDelta::zero() {
            return Err(AgentError::InvalidDelay);
        }
        let delay = resolved
            .delay
            .to_std()
            .map_err(|_| AgentError::InvalidDelay)?;

        if let Some(previous) = self.pending.remove(&session) {
            release(jobs, session, &previous);
            info!(%session, "previous deferred {} replaced", previous.kind);
        }

        let handle = jobs.run_once(
            &deferred_job_name(session),
            delay,
            JobPayload::DeferredAction { session },
        );
        info!(%session, job = %handle.id, fire_at = %resolved.fire_at, "deferred {kind} scheduled");

        let entry = self.pending.entry(session).insert_entry(PendingDeferredAction {
            kind,
            fire_at: resolved.fire_at,
            handle,
            origin,
        });
        Ok(&*entry.into_mut())
    }

    /// Attach the status message to edit on fire. Returns `false` when nothing is pending.
    pub fn set_origin(&mut self, session: SessionId, origin: MessageRef) -> bool {
        match self.pending.get_mut(&session) {
            Some(pending) => {
                pending.origin = Some(origin);
                true
            }
            None => false,
        }
    }

    /// Cancel the session's pending action. Returns `false` when nothing was pending.
    pub fn cancel(&mut self, jobs: &mut dyn JobFacility, session: SessionId) -> bool {
        match self.pending.remove(&session) {
            Some(pending) => {
                release(jobs, session, &pending);
                info!(%session, "deferred {} cancelled", pending.kind);
                true
            }
            None => {
                debug!(%session, "nothing to cancel");
                false
            }
        }
    }

    /// Consume the pending action for a fired job.
    ///
    /// Returns `None` when the job is stale (the action was cancelled or
    /// rescheduled after the timer expired). The entry is cleared before the
    /// caller runs any side effect, so a later cancel is a no-op.
    pub fn take_fired(&mut self, session: SessionId, job: JobId) -> Option<PendingDeferredAction> {
        match self.pending.get(&session) {
            Some(pending) if pending.handle.id == job => self.pending.remove(&session),
            Some(pending) => {
                debug!(%session, fired = %job, current = %pending.handle.id, "stale deferred job ignored");
                None
            }
            None => {
                debug!(%session, fired = %job, "deferred job fired with nothing pending");
                None
            }
        }
    }
}

fn release(jobs: &mut dyn JobFacility, session: SessionId, pending: &PendingDeferredAction) {
    if let Err(e) = jobs.cancel(&pending.handle) {
        warn!(%session, job = %pending.handle.id, error = %e, "cannot cancel deferred timer");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::scheduler::delay::DelaySpec;
    use crate::test_utils::RecordingJobs;
    use chrono::NaiveDate;

    const SESSION: SessionId = SessionId(42);

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn minutes(m: i64) -> ResolvedDelay {
        DelaySpec::Minutes(m).resolve(now()).unwrap()
    }

    #[test]
    fn schedule_registers_one_shot_with_the_delay() {
        let mut jobs = RecordingJobs::default();
        let mut scheduler = DeferredScheduler::new();

        let pending = scheduler
            .schedule(&mut jobs, SESSION, PowerAction::Shutdown, minutes(30), None)
            .unwrap()
            .clone();

        assert_eq!(pending.kind, PowerAction::Shutdown);
        assert_eq!(pending.fire_at, now() + TimeDelta::minutes(30));
        assert_eq!(jobs.once.len(), 1);
        assert_eq!(jobs.once[0].1, std::time::Duration::from_secs(1800));
        assert_eq!(jobs.live_count(), 1);
    }

    #[test]
    fn non_positive_delay_is_rejected_without_touching_jobs() {
        let mut jobs = RecordingJobs::default();
        let mut scheduler = DeferredScheduler::new();
        let zero = ResolvedDelay {
            fire_at: now(),
            delay: TimeDelta::zero(),
        };

        let result = scheduler.schedule(&mut jobs, SESSION, PowerAction::Shutdown, zero, None);
        assert!(matches!(result, Err(AgentError::InvalidDelay)));
        assert!(jobs.once.is_empty());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn reschedule_cancels_prior_handle_and_keeps_one_pending() {
        let mut jobs = RecordingJobs::default();
        let mut scheduler = DeferredScheduler::new();

        let first = scheduler
            .schedule(&mut jobs, SESSION, PowerAction::Shutdown, minutes(30), None)
            .unwrap()
            .handle
            .clone();
        let second = scheduler
            .schedule(&mut jobs, SESSION, PowerAction::Shutdown, minutes(90), None)
            .unwrap()
            .handle
            .clone();

        assert_eq!(jobs.cancelled, vec![first.id]);
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.pending(SESSION).unwrap().handle, second);
        assert_eq!(jobs.live_count(), 1);
    }

    #[test]
    fn failed_cancel_of_prior_handle_does_not_block_reschedule() {
        let mut jobs = RecordingJobs::failing_cancel();
        let mut scheduler = DeferredScheduler::new();

        scheduler
            .schedule(&mut jobs, SESSION, PowerAction::Shutdown, minutes(30), None)
            .unwrap();
        let result = scheduler.schedule(&mut jobs, SESSION, PowerAction::Shutdown, minutes(5), None);

        assert!(result.is_ok());
        assert_eq!(scheduler.len(), 1);
        assert_eq!(
            scheduler.pending(SESSION).unwrap().fire_at,
            now() + TimeDelta::minutes(5)
        );
    }

    #[test]
    fn at_most_one_pending_per_session_across_operations() {
        let mut jobs = RecordingJobs::default();
        let mut scheduler = DeferredScheduler::new();
        let other = SessionId(7);

        for step in 0..12_i64 {
            let session = if step % 3 == 0 { other } else { SESSION };
            if step % 4 == 3 {
                scheduler.cancel(&mut jobs, session);
            } else {
                scheduler
                    .schedule(&mut jobs, session, PowerAction::Shutdown, minutes(step + 1), None)
                    .unwrap();
            }
            assert!(scheduler.len() <= 2);
            assert_eq!(jobs.live_count(), scheduler.len(), "step {step}");
        }
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut jobs = RecordingJobs::default();
        let mut scheduler = DeferredScheduler::new();

        assert!(!scheduler.cancel(&mut jobs, SESSION));
        assert!(!scheduler.cancel(&mut jobs, SESSION));

        scheduler
            .schedule(&mut jobs, SESSION, PowerAction::Shutdown, minutes(10), None)
            .unwrap();
        assert!(scheduler.cancel(&mut jobs, SESSION));
        assert!(!scheduler.cancel(&mut jobs, SESSION));
        assert_eq!(jobs.live_count(), 0);
    }

    #[test]
    fn take_fired_consumes_entry_so_racing_cancel_is_noop() {
        let mut jobs = RecordingJobs::default();
        let mut scheduler = DeferredScheduler::new();
        let handle = scheduler
            .schedule(&mut jobs, SESSION, PowerAction::Shutdown, minutes(10), None)
            .unwrap()
            .handle
            .clone();

        let fired = scheduler.take_fired(SESSION, handle.id);
        assert!(fired.is_some());
        assert!(!scheduler.cancel(&mut jobs, SESSION));
        assert!(scheduler.take_fired(SESSION, handle.id).is_none());
    }

    #[test]
    fn stale_fire_after_reschedule_is_ignored() {
        let mut jobs = RecordingJobs::default();
        let mut scheduler = DeferredScheduler::new();
        let stale = scheduler
            .schedule(&mut jobs, SESSION, PowerAction::Shutdown, minutes(10), None)
            .unwrap()
            .handle
            .clone();
        scheduler
            .schedule(&mut jobs, SESSION, PowerAction::Shutdown, minutes(20), None)
            .unwrap();

        assert!(scheduler.take_fired(SESSION, stale.id).is_none());
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn origin_can_be_attached_after_scheduling() {
        let mut jobs = RecordingJobs::default();
        let mut scheduler = DeferredScheduler::new();
        let origin = MessageRef::new(SESSION, 900);

        assert!(!scheduler.set_origin(SESSION, origin));
        scheduler
            .schedule(&mut jobs, SESSION, PowerAction::Shutdown, minutes(10), None)
            .unwrap();
        assert!(scheduler.set_origin(SESSION, origin));
        assert_eq!(scheduler.pending(SESSION).unwrap().origin, Some(origin));
    }
}
