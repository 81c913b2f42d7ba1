//! Messaging gateway contract.
//!
//! A gateway delivers operator commands and button presses as
//! [`InboundEvent`]s and carries the agent's replies back. The agent never
//! formats transport markup; it sends plain text plus optional buttons whose
//! callback data is a [`ButtonAction`].

use crate::error::{AgentError, Result};
use crate::session::{MessageRef, SessionId};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;

pub mod stdio;

pub use stdio::StdioGateway;

/// Event received from the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Command {
        session: SessionId,
        /// Command name without the leading slash.
        name: String,
        args: Vec<String>,
        /// The operator's own message, when the transport exposes one.
        message: Option<MessageRef>,
    },
    ButtonPress {
        session: SessionId,
        /// Token to acknowledge the press with.
        callback_id: String,
        data: String,
        /// Message the pressed button belongs to.
        message: Option<MessageRef>,
    },
}

impl InboundEvent {
    pub fn session(&self) -> SessionId {
        match self {
            Self::Command { session, .. } | Self::ButtonPress { session, .. } => *session,
        }
    }
}

/// Callback data carried by a button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    /// Propose a delayed shutdown after this many minutes.
    Timer { minutes: u32 },
    Confirm,
    Cancel,
}

impl fmt::Display for ButtonAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timer { minutes } => write!(f, "timer:{minutes}"),
            Self::Confirm => f.write_str("confirm"),
            Self::Cancel => f.write_str("cancel"),
        }
    }
}

impl FromStr for ButtonAction {
    type Err = AgentError;

    fn from_str(data: &str) -> Result<Self> {
        match data {
            "confirm" => Ok(Self::Confirm),
            "cancel" => Ok(Self::Cancel),
            other => other
                .strip_prefix("timer:")
                .and_then(|m| m.parse().ok())
                .filter(|m| *m > 0)
                .map(|minutes| Self::Timer { minutes })
                .ok_or_else(|| AgentError::parse(other, "unknown button")),
        }
    }
}

/// An inline button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, action: ButtonAction) -> Self {
        Self {
            label: label.into(),
            data: action.to_string(),
        }
    }
}

/// Reply text with optional buttons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    pub buttons: Vec<Button>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_buttons(mut self, buttons: Vec<Button>) -> Self {
        self.buttons = buttons;
        self
    }
}

impl From<&str> for OutboundMessage {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for OutboundMessage {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

/// Gateway contract. New transports only need to implement this trait.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Stable transport identifier (e.g. `stdio`).
    fn id(&self) -> &'static str;

    /// Send a new message and return a reference for later edits.
    async fn send_message(
        &self,
        session: SessionId,
        message: OutboundMessage,
    ) -> anyhow::Result<MessageRef>;

    /// Replace the text and buttons of an earlier message.
    async fn edit_message(&self, target: &MessageRef, message: OutboundMessage)
    -> anyhow::Result<()>;

    /// Acknowledge a button press.
    async fn answer_callback(&self, callback_id: &str) -> anyhow::Result<()>;

    /// Receive inbound events and forward them until the transport closes.
    async fn run(&self, inbound_tx: mpsc::Sender<InboundEvent>) -> anyhow::Result<()>;
}
