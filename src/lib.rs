//! pcpilot: remote power and battery control for a single host.
//!
//! An authorized operator drives the host from a chat client. The crate
//! provides the stateful core behind that conversation:
//!
//! - **Deferred actions**: at most one delayed shutdown per session, with
//!   cancel-then-replace rescheduling ([`scheduler`])
//! - **Battery monitor**: a recurring check with debounced, edge-triggered
//!   alerts ([`monitor`])
//! - **Confirmations**: propose, then confirm or cancel ([`approval`])
//! - **State store**: monitor flags persisted across restarts ([`store`])
//!
//! The [`agent::Agent`] actor ties them together behind a
//! [`channels::MessagingGateway`] and a [`platform::OsFacility`].

pub mod agent;
pub mod approval;
pub mod channels;
pub mod config;
pub mod error;
pub mod jobs;
pub mod monitor;
pub mod pilot_dirs;
pub mod platform;
pub mod scheduler;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod test_utils;

pub use agent::Agent;
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use session::{MessageRef, SessionId};
