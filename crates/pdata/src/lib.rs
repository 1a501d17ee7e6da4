// SPDX-License-Identifier: Apache-2.0

//! In-memory representation of the three OpenTelemetry signals (metrics, logs,
//! traces) that flow through the collection pipeline.
//!
//! The model intentionally mirrors the OTLP data model (see the OTLP proto
//! definitions) without depending on the wire format itself: receivers build
//! these types directly, processors transform them in place or by producing
//! new values, and the OTLP exporter is the only place that knows how to
//! serialize them to protobuf.

mod attribute;
mod identity;
mod log;
mod metric;
mod resource;
mod span;

pub use attribute::{AttributeValue, Attributes};
pub use identity::SeriesIdentity;
pub use log::{LogBody, LogRecord, Severity};
pub use metric::{
    ExponentialHistogramDataPoint, HistogramDataPoint, Metric, MetricKind, NumberDataPoint,
    NumberValue, SummaryDataPoint, Temporality,
};
pub use resource::{Resource, ResourceSet, Scope};
pub use span::{Span, SpanEvent, SpanId, SpanKind, SpanLink, SpanStatus, SpanStatusCode, TraceId};

use std::time::SystemTime;

/// A batch of resource sets carrying a single signal type, the unit of work
/// exchanged between receivers, processors, and exporters.
///
/// A pipeline is fixed to one signal (`metrics`, `logs`, or `traces` per
/// §3/§6), so `Batch<T>` is generic over the per-signal item type rather
/// than being a sum type itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch<T> {
    /// Resource sets carried by this batch, in receiver emission order.
    pub resource_sets: Vec<ResourceSet<T>>,
}

impl<T> Batch<T> {
    /// An empty batch.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            resource_sets: Vec::new(),
        }
    }

    /// True if the batch carries no resource sets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resource_sets.is_empty()
    }

    /// Total number of leaf items (metrics/log records/spans) across all
    /// scopes and resource sets.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.resource_sets
            .iter()
            .map(|rs| rs.scopes.iter().map(|s| s.items.len()).sum::<usize>())
            .sum()
    }
}

/// A metrics batch.
pub type MetricsBatch = Batch<Metric>;
/// A logs batch.
pub type LogsBatch = Batch<LogRecord>;
/// A traces batch.
pub type TracesBatch = Batch<Span>;

/// The three signal kinds a pipeline can carry (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalType {
    /// Metrics pipeline.
    Metrics,
    /// Logs pipeline.
    Logs,
    /// Traces pipeline.
    Traces,
}

impl Default for SignalType {
    /// Only meaningful as the placeholder written by `#[serde(skip)]`
    /// fields before the owning key's signal prefix is applied.
    fn default() -> Self {
        SignalType::Metrics
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalType::Metrics => "metrics",
            SignalType::Logs => "logs",
            SignalType::Traces => "traces",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SignalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metrics" => Ok(SignalType::Metrics),
            "logs" => Ok(SignalType::Logs),
            "traces" => Ok(SignalType::Traces),
            other => Err(format!("unknown signal type: {other}")),
        }
    }
}

/// Errors raised while constructing or validating pdata values (§3 invariants).
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PDataError {
    /// A histogram's `count` did not equal the sum of its bucket counts.
    #[error("histogram count {count} does not match sum of bucket counts {bucket_sum}")]
    HistogramCountMismatch {
        /// Count as recorded on the data point.
        count: u64,
        /// Sum computed from `bucket_counts`.
        bucket_sum: u64,
    },

    /// Histogram bucket bounds were not strictly increasing.
    #[error("histogram bucket bounds must be strictly increasing")]
    HistogramBoundsNotIncreasing,

    /// A span's `end` time preceded its `start` time.
    #[error("span end time precedes start time")]
    SpanEndBeforeStart,

    /// Two scopes within the same resource set shared a `(name, version)` pair.
    #[error("duplicate scope identity ({name:?}, {version:?}) within resource set")]
    DuplicateScope {
        /// Scope name.
        name: String,
        /// Scope version.
        version: String,
    },
}

/// The pdata value carried on a pipeline's data channels. One pipeline is
/// fixed to one signal, but receivers, processors, and exporters share a
/// single runtime type so the engine doesn't need to monomorphize a
/// separate node/channel implementation per signal.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyBatch {
    /// A metrics batch.
    Metrics(MetricsBatch),
    /// A logs batch.
    Logs(LogsBatch),
    /// A traces batch.
    Traces(TracesBatch),
}

impl AnyBatch {
    /// The signal type this value carries.
    #[must_use]
    pub fn signal_type(&self) -> SignalType {
        match self {
            AnyBatch::Metrics(_) => SignalType::Metrics,
            AnyBatch::Logs(_) => SignalType::Logs,
            AnyBatch::Traces(_) => SignalType::Traces,
        }
    }

    /// Total number of leaf items carried.
    #[must_use]
    pub fn item_count(&self) -> usize {
        match self {
            AnyBatch::Metrics(b) => b.item_count(),
            AnyBatch::Logs(b) => b.item_count(),
            AnyBatch::Traces(b) => b.item_count(),
        }
    }

    /// True if this batch carries no resource sets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            AnyBatch::Metrics(b) => b.is_empty(),
            AnyBatch::Logs(b) => b.is_empty(),
            AnyBatch::Traces(b) => b.is_empty(),
        }
    }
}

impl From<MetricsBatch> for AnyBatch {
    fn from(batch: MetricsBatch) -> Self {
        AnyBatch::Metrics(batch)
    }
}

impl From<LogsBatch> for AnyBatch {
    fn from(batch: LogsBatch) -> Self {
        AnyBatch::Logs(batch)
    }
}

impl From<TracesBatch> for AnyBatch {
    fn from(batch: TracesBatch) -> Self {
        AnyBatch::Traces(batch)
    }
}

/// Returns the current time. Thin wrapper so receivers/processors can be
/// exercised deterministically in tests via dependency injection rather than
/// calling `SystemTime::now()` directly everywhere.
#[must_use]
pub fn now() -> SystemTime {
    SystemTime::now()
}
