// SPDX-License-Identifier: Apache-2.0

//! The consumer contract every node applies to data handed to it (§9):
//! accept, reject permanently (drop and count), or reject transiently (the
//! caller may retry or route to a dead-letter path).

use std::fmt;

/// The outcome of handing a batch of pdata to a downstream consumer.
#[derive(Debug, Clone)]
pub enum ConsumeOutcome {
    /// The consumer durably accepted the data (or, for a fan-out node, at
    /// least one sibling did).
    Accepted,
    /// The data is malformed or otherwise can never succeed; the caller
    /// should drop it and increment a permanent-failure counter, not retry.
    PermanentError(String),
    /// The failure is expected to be transient (backpressure, a saturated
    /// queue, a momentarily unreachable endpoint); the caller may retry.
    RetryableError(String),
}

impl ConsumeOutcome {
    /// True if the outcome represents acceptance.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, ConsumeOutcome::Accepted)
    }
}

impl fmt::Display for ConsumeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumeOutcome::Accepted => write!(f, "accepted"),
            ConsumeOutcome::PermanentError(msg) => write!(f, "permanent error: {msg}"),
            ConsumeOutcome::RetryableError(msg) => write!(f, "retryable error: {msg}"),
        }
    }
}

/// Merges the outcomes of every sibling in a fan-out: any `Accepted` wins,
/// otherwise a `RetryableError` wins over a `PermanentError` since it's the
/// more actionable of the two for an upstream caller deciding whether to
/// retry (§9's "any sibling Accepted ⇒ Accepted" fan-out rule).
#[must_use]
pub fn merge_fanout_outcomes(outcomes: Vec<ConsumeOutcome>) -> ConsumeOutcome {
    let mut retryable: Option<String> = None;
    let mut permanent: Option<String> = None;
    for outcome in outcomes {
        match outcome {
            ConsumeOutcome::Accepted => return ConsumeOutcome::Accepted,
            ConsumeOutcome::RetryableError(msg) => retryable.get_or_insert(msg),
            ConsumeOutcome::PermanentError(msg) => permanent.get_or_insert(msg),
        };
    }
    match retryable {
        Some(msg) => ConsumeOutcome::RetryableError(msg),
        None => ConsumeOutcome::PermanentError(
            permanent.unwrap_or_else(|| "no consumers configured".to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_accepted_wins() {
        let outcomes = vec![
            ConsumeOutcome::PermanentError("a".into()),
            ConsumeOutcome::Accepted,
            ConsumeOutcome::RetryableError("b".into()),
        ];
        assert!(merge_fanout_outcomes(outcomes).is_accepted());
    }

    #[test]
    fn retryable_beats_permanent_when_none_accepted() {
        let outcomes = vec![
            ConsumeOutcome::PermanentError("a".into()),
            ConsumeOutcome::RetryableError("b".into()),
        ];
        assert!(matches!(
            merge_fanout_outcomes(outcomes),
            ConsumeOutcome::RetryableError(_)
        ));
    }
}
