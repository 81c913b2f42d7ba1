//! Deferred power actions.
//!
//! Parses operator delay input and keeps the per-session table of actions
//! waiting on a one-shot timer.

pub mod deferred;
pub mod delay;

pub use deferred::{DeferredScheduler, PendingDeferredAction, deferred_job_name};
pub use delay::{DELAY_FORMAT_HINT, DelaySpec, ResolvedDelay, format_remaining};
