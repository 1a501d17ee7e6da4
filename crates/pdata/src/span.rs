// SPDX-License-Identifier: Apache-2.0

//! Spans (§3). The receivers in this collector are metric/log oriented, but
//! traces are modeled for completeness and to let log records carry
//! trace/span correlation (§4.3.5's query correlator attaches span context
//! when available).

use crate::{Attributes, PDataError};
use std::fmt;
use std::time::SystemTime;

/// A 16-byte trace identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(pub [u8; 16]);

/// An 8-byte span identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub [u8; 8]);

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// The relationship of a span to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    /// No relationship specified.
    Unspecified,
    /// A synchronous call to a downstream service (e.g. the query itself).
    Client,
    /// A synchronous call from an upstream caller.
    Server,
    /// An asynchronous producer.
    Producer,
    /// An asynchronous consumer.
    Consumer,
    /// An internal operation with no remote call.
    Internal,
}

/// A timestamped event attached to a span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanEvent {
    /// Event name.
    pub name: String,
    /// Event time.
    pub time: SystemTime,
    /// Event attributes.
    pub attributes: Attributes,
}

/// A reference to another span, possibly in a different trace.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanLink {
    /// The linked trace.
    pub trace_id: TraceId,
    /// The linked span.
    pub span_id: SpanId,
    /// Link attributes.
    pub attributes: Attributes,
}

/// The canonical OTel status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanStatusCode {
    /// No status has been set.
    Unset,
    /// The operation completed successfully.
    Ok,
    /// The operation contains an error.
    Error,
}

/// Span completion status.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanStatus {
    /// Status code.
    pub code: SpanStatusCode,
    /// Optional human-readable description, populated when `code` is
    /// `Error`.
    pub message: String,
}

impl Default for SpanStatus {
    fn default() -> Self {
        Self {
            code: SpanStatusCode::Unset,
            message: String::new(),
        }
    }
}

/// `(trace_id, span_id, parent_id?, name, kind, start, end, attributes,
/// events, links, status)` (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    /// Trace this span belongs to.
    pub trace_id: TraceId,
    /// This span's id.
    pub span_id: SpanId,
    /// Parent span id, if any. Must refer to a span with the same
    /// `trace_id` (§3); this is an invariant on the caller, not checked here
    /// since parent spans may not be locally resident.
    pub parent_span_id: Option<SpanId>,
    /// Span name.
    pub name: String,
    /// Span kind.
    pub kind: SpanKind,
    /// Start time.
    pub start: SystemTime,
    /// End time; must be `>= start` (§3 invariant, checked by
    /// [`Span::validate`]).
    pub end: SystemTime,
    /// Span attributes.
    pub attributes: Attributes,
    /// Timestamped events.
    pub events: Vec<SpanEvent>,
    /// Links to other spans.
    pub links: Vec<SpanLink>,
    /// Completion status.
    pub status: SpanStatus,
}

impl Span {
    /// Validates the `end >= start` invariant (§3).
    pub fn validate(&self) -> Result<(), PDataError> {
        if self.end < self.start {
            return Err(PDataError::SpanEndBeforeStart);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rejects_end_before_start() {
        let now = SystemTime::now();
        let span = Span {
            trace_id: TraceId([1; 16]),
            span_id: SpanId([1; 8]),
            parent_span_id: None,
            name: "q".into(),
            kind: SpanKind::Client,
            start: now,
            end: now - Duration::from_secs(1),
            attributes: Attributes::new(),
            events: vec![],
            links: vec![],
            status: SpanStatus::default(),
        };
        assert!(matches!(span.validate(), Err(PDataError::SpanEndBeforeStart)));
    }
}
