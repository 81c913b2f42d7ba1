//! Error types for the pcpilot agent.

/// Top-level error type for the control agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Resolved delay was zero or negative.
    #[error("the delay must be in the future")]
    InvalidDelay,

    /// Operator input could not be parsed.
    #[error("cannot parse `{input}`: {hint}")]
    Parse {
        /// The raw input as received.
        input: String,
        /// User-facing format hint.
        hint: String,
    },

    /// Confirm was requested with no proposal pending.
    #[error("no action is awaiting confirmation")]
    NoPendingConfirmation,

    /// Cancel was requested with no deferred action pending.
    #[error("no deferred action is pending")]
    NoPendingDeferredAction,

    /// The battery sensor facility is not available on this host.
    #[error("battery sensor is unavailable")]
    SensorUnavailable,

    /// A battery sensor read failed.
    #[error("sensor error: {0}")]
    Sensor(String),

    /// A timer handle could not be released.
    #[error("timer cancel failed: {0}")]
    TimerCancel(String),

    /// Snapshot load or save failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Messaging gateway error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Build a parse error with a format hint.
    pub fn parse(input: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Parse {
            input: input.into(),
            hint: hint.into(),
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AgentError>;
