// SPDX-License-Identifier: Apache-2.0

//! Metric records and data points (§3).

use crate::{Attributes, PDataError};
use std::time::SystemTime;

/// Whether a Sum's points are deltas over an interval or cumulative totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Temporality {
    /// Each point covers `[start_time, time)` and is independent of prior
    /// points for the same series.
    Delta,
    /// Each point is a running total since `start_time`, which stays fixed
    /// across emissions for the same series identity (§3).
    Cumulative,
}

/// A single numeric value, used by Gauge and Sum data points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberValue {
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Double(f64),
}

impl NumberValue {
    /// Widens to `f64` for arithmetic (e.g. rate computation, §4.2).
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        match self {
            NumberValue::Int(i) => *i as f64,
            NumberValue::Double(d) => *d,
        }
    }
}

/// `(start_time, time, attributes, value)` (§3). `start_time` is `None` for
/// Gauges, which have no accumulation window.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberDataPoint {
    /// Start of the accumulation window, if any.
    pub start_time: Option<SystemTime>,
    /// Time the point was recorded.
    pub time: SystemTime,
    /// Point attributes — part of the time-series identity (§3).
    pub attributes: Attributes,
    /// The recorded value.
    pub value: NumberValue,
}

/// A histogram data point. `count == sum(bucket_counts)` and bucket bounds
/// are strictly increasing (§3 invariant), checked by [`Metric::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramDataPoint {
    /// Start of the accumulation window.
    pub start_time: Option<SystemTime>,
    /// Time the point was recorded.
    pub time: SystemTime,
    /// Point attributes.
    pub attributes: Attributes,
    /// Total number of observations.
    pub count: u64,
    /// Sum of observed values; only meaningful for non-negative counter-style
    /// usage (§3).
    pub sum: Option<f64>,
    /// Strictly increasing bucket upper bounds, length N.
    pub bucket_bounds: Vec<f64>,
    /// Per-bucket counts, length N+1 (including the overflow bucket).
    pub bucket_counts: Vec<u64>,
    /// Minimum observed value in the window, if tracked.
    pub min: Option<f64>,
    /// Maximum observed value in the window, if tracked.
    pub max: Option<f64>,
}

/// A base-2 exponential histogram data point (simplified: positive buckets
/// only, matching the subset the DB receivers and cost controller need).
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialHistogramDataPoint {
    /// Start of the accumulation window.
    pub start_time: Option<SystemTime>,
    /// Time the point was recorded.
    pub time: SystemTime,
    /// Point attributes.
    pub attributes: Attributes,
    /// Total number of observations.
    pub count: u64,
    /// Sum of observed values.
    pub sum: Option<f64>,
    /// Bucket resolution; bucket `i` covers `(base^i, base^(i+1)]` where
    /// `base = 2^(2^-scale)`.
    pub scale: i32,
    /// Index of the first positive bucket.
    pub zero_count: u64,
    /// Positive-range bucket counts starting at `positive_offset`.
    pub positive_offset: i32,
    /// Counts for consecutive positive buckets.
    pub positive_bucket_counts: Vec<u64>,
}

/// A quantile observation within a Summary data point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueAtQuantile {
    /// Quantile in `[0, 1]`.
    pub quantile: f64,
    /// Observed value at that quantile.
    pub value: f64,
}

/// A summary data point (legacy pre-aggregated quantiles).
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryDataPoint {
    /// Start of the accumulation window.
    pub start_time: Option<SystemTime>,
    /// Time the point was recorded.
    pub time: SystemTime,
    /// Point attributes.
    pub attributes: Attributes,
    /// Total number of observations.
    pub count: u64,
    /// Sum of all observed values.
    pub sum: f64,
    /// Quantile estimates.
    pub quantiles: Vec<ValueAtQuantile>,
}

/// The kind-specific payload of a [`Metric`] (§3).
#[derive(Debug, Clone, PartialEq)]
pub enum MetricKind {
    /// An instantaneous measurement, e.g. `db.connections.active`.
    Gauge(Vec<NumberDataPoint>),
    /// A running or delta total, e.g. `db.io.bytes_read`.
    Sum {
        /// Data points.
        points: Vec<NumberDataPoint>,
        /// Delta vs cumulative semantics.
        temporality: Temporality,
        /// Whether the sum can only increase (ignoring resets).
        monotonic: bool,
    },
    /// A client-side aggregated histogram.
    Histogram(Vec<HistogramDataPoint>),
    /// A client-side exponential-bucket histogram.
    ExponentialHistogram(Vec<ExponentialHistogramDataPoint>),
    /// A legacy pre-aggregated quantile summary.
    Summary(Vec<SummaryDataPoint>),
}

/// Identified by `(name, unit, description, kind)` (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Metric name, e.g. `db.bgwriter.buffers_checkpoint`.
    pub name: String,
    /// Unit string, e.g. `{buffers}`, `By`, `1`.
    pub unit: String,
    /// Human-readable description.
    pub description: String,
    /// The kind-specific payload.
    pub kind: MetricKind,
}

impl Metric {
    /// Validates the §3/§8 invariants that are checkable without the
    /// surrounding series history (histogram shape, bucket monotonicity).
    pub fn validate(&self) -> Result<(), PDataError> {
        if let MetricKind::Histogram(points) = &self.kind {
            for p in points {
                let bucket_sum: u64 = p.bucket_counts.iter().sum();
                if bucket_sum != p.count {
                    return Err(PDataError::HistogramCountMismatch {
                        count: p.count,
                        bucket_sum,
                    });
                }
                if !p.bucket_bounds.windows(2).all(|w| w[0] < w[1]) {
                    return Err(PDataError::HistogramBoundsNotIncreasing);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hist(count: u64, bucket_counts: Vec<u64>, bounds: Vec<f64>) -> Metric {
        Metric {
            name: "latency".into(),
            unit: "ms".into(),
            description: String::new(),
            kind: MetricKind::Histogram(vec![HistogramDataPoint {
                start_time: None,
                time: SystemTime::now(),
                attributes: Attributes::new(),
                count,
                sum: Some(1.0),
                bucket_bounds: bounds,
                bucket_counts,
                min: None,
                max: None,
            }]),
        }
    }

    #[test]
    fn histogram_count_mismatch_rejected() {
        let m = hist(10, vec![3, 3, 3], vec![1.0, 2.0]);
        assert!(matches!(
            m.validate(),
            Err(PDataError::HistogramCountMismatch { .. })
        ));
    }

    #[test]
    fn histogram_non_increasing_bounds_rejected() {
        let m = hist(9, vec![3, 3, 3], vec![2.0, 1.0]);
        assert!(matches!(
            m.validate(),
            Err(PDataError::HistogramBoundsNotIncreasing)
        ));
    }

    #[test]
    fn valid_histogram_passes() {
        let m = hist(9, vec![3, 3, 3], vec![1.0, 2.0]);
        assert!(m.validate().is_ok());
    }
}
