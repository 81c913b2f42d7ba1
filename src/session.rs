//! Session identity and message references.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one operator conversation (a chat id on the gateway side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SessionId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A message previously sent or received in a session, addressable for edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub session: SessionId,
    pub message_id: i64,
}

impl MessageRef {
    #[must_use]
    pub fn new(session: SessionId, message_id: i64) -> Self {
        Self {
            session,
            message_id,
        }
    }
}
