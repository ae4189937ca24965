//! Error taxonomy for the real-time core
//!
//! Every variant is scoped to a single channel, subscription or live query
//! registration; none of them poison the process-wide registries.
//!
//! Unknown handles passed to `unsubscribe` / `release` are not errors: those
//! calls return `false` so that teardown stays idempotent.

use thiserror::Error;

use super::subscription::SubscriptionId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealtimeError {
    /// A payload was published on a channel that carries a different shape.
    #[error("channel '{channel}' carries '{expected}' payloads, got '{actual}'")]
    InvalidPayloadKind {
        channel: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// A subscription fell too far behind and was closed.
    #[error("subscription {subscription} on channel '{channel}' exceeded its queue cap of {cap}")]
    Backpressure {
        channel: String,
        subscription: SubscriptionId,
        cap: usize,
    },

    /// A live query executor failed, either on its initial run or on a recompute.
    #[error("live query '{tag}' failed: {message}")]
    ExecutorFailure { tag: String, message: String },
}

impl RealtimeError {
    pub(crate) fn executor_failure(tag: &str, error: &anyhow::Error) -> Self {
        Self::ExecutorFailure {
            tag: tag.to_string(),
            message: format!("{error:#}"),
        }
    }
}
