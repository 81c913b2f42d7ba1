//! Confirmation workflow for destructive operator actions.
//!
//! A proposal is held until the operator answers it. There is at most one
//! proposal per session and a new one silently replaces the old
//! (last-write-wins). The book only tracks proposals; executing a confirmed
//! action is the agent's job.

use crate::error::{AgentError, Result};
use crate::platform::PowerAction;
use crate::session::{MessageRef, SessionId};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// An action awaiting the operator's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposedAction {
    /// Run a power action now.
    Immediate(PowerAction),
    /// Terminate a process.
    KillProcess { pid: u32 },
    /// Schedule a shutdown after `minutes`.
    DelayedShutdown { minutes: u32 },
    /// Empty the temporary directories.
    ClearTemp,
}

impl ProposedAction {
    /// Whether cancelling this proposal must also cancel the deferred timer.
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::DelayedShutdown { .. })
    }
}

impl fmt::Display for ProposedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate(PowerAction::Shutdown) => f.write_str("shut down the computer"),
            Self::Immediate(PowerAction::Reboot) => f.write_str("reboot the computer"),
            Self::Immediate(PowerAction::Lock) => f.write_str("lock the computer"),
            Self::KillProcess { pid } => write!(f, "terminate process {pid}"),
            Self::DelayedShutdown { minutes } => {
                write!(f, "shut down the computer in {minutes} minutes")
            }
            Self::ClearTemp => f.write_str("delete all temporary files"),
        }
    }
}

/// A proposal and the prompt message that carries its buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingConfirmation {
    pub action: ProposedAction,
    pub prompt: Option<MessageRef>,
}

/// Per-session pending confirmations.
#[derive(Debug, Default)]
pub struct ConfirmationBook {
    pending: HashMap<SessionId, PendingConfirmation>,
}

impl ConfirmationBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a proposal, returning the one it supersedes.
    pub fn propose(
        &mut self,
        session: SessionId,
        action: ProposedAction,
        prompt: Option<MessageRef>,
    ) -> Option<PendingConfirmation> {
        let superseded = self
            .pending
            .insert(session, PendingConfirmation { action, prompt });
        if let Some(old) = &superseded {
            debug!(%session, old = %old.action, new = %action, "proposal superseded");
        }
        superseded
    }

    /// Attach the prompt message once it has been sent.
    pub fn set_prompt(&mut self, session: SessionId, prompt: MessageRef) -> bool {
        match self.pending.get_mut(&session) {
            Some(pending) => {
                pending.prompt = Some(prompt);
                true
            }
            None => false,
        }
    }

    pub fn pending(&self, session: SessionId) -> Option<&PendingConfirmation> {
        self.pending.get(&session)
    }

    /// Take the pending proposal for execution.
    pub fn confirm(&mut self, session: SessionId) -> Result<PendingConfirmation> {
        self.pending
            .remove(&session)
            .ok_or(AgentError::NoPendingConfirmation)
    }

    /// Discard the pending proposal.
    pub fn cancel(&mut self, session: SessionId) -> Option<PendingConfirmation> {
        self.pending.remove(&session)
    }
}
