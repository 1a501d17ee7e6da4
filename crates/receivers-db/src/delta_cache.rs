// SPDX-License-Identifier: Apache-2.0

//! Per-series delta cache (§4.2): caches the previous counter value for a
//! monotonic source metric, keyed by time-series identity, so a receiver
//! can emit `(curr - prev) / Δt` rate data points instead of raw counters.
//! Bounded by an LRU so an unbounded number of distinct series (e.g. one
//! per table, growing as tables are created) cannot leak memory.

use dbscope_pdata::SeriesIdentity;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::SystemTime;

struct Previous {
    value: f64,
    time: SystemTime,
}

/// Caches previous `(value, time)` observations per series identity.
pub struct DeltaCache {
    entries: LruCache<SeriesIdentity, Previous>,
}

/// The result of observing a new counter value against the cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delta {
    /// `curr - prev`.
    pub delta: f64,
    /// Elapsed wall-clock time between the two observations.
    pub elapsed_secs: f64,
}

impl DeltaCache {
    /// Creates a cache bounded to `capacity` distinct series.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Records a new observation and returns the delta against the prior
    /// one, or `None` if this is the series' first observation (§4.2:
    /// "on missing history a data point is skipped rather than reported as
    /// zero") or if the counter decreased (a reset, handled by the caller
    /// per the deployment's counter-reset policy).
    pub fn observe(&mut self, id: &SeriesIdentity, value: f64, time: SystemTime) -> Option<Delta> {
        let previous = self.entries.put(id.clone(), Previous { value, time });
        let previous = previous?;
        if value < previous.value {
            return None;
        }
        let elapsed_secs = time
            .duration_since(previous.time)
            .unwrap_or_default()
            .as_secs_f64();
        if elapsed_secs <= 0.0 {
            return None;
        }
        Some(Delta {
            delta: value - previous.value,
            elapsed_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbscope_pdata::{Attributes, Resource};
    use std::time::Duration;

    fn id(name: &str) -> SeriesIdentity {
        SeriesIdentity::new(&Resource::default(), "scope", "1.0", name, &Attributes::new())
    }

    #[test]
    fn first_observation_has_no_delta() {
        let mut cache = DeltaCache::new(8);
        assert!(cache.observe(&id("buffers_checkpoint"), 100.0, SystemTime::now()).is_none());
    }

    #[test]
    fn second_observation_yields_delta() {
        let mut cache = DeltaCache::new(8);
        let t0 = SystemTime::now();
        let t1 = t0 + Duration::from_secs(10);
        let key = id("buffers_checkpoint");
        assert!(cache.observe(&key, 100.0, t0).is_none());
        let delta = cache.observe(&key, 130.0, t1).unwrap();
        assert_eq!(delta.delta, 30.0);
        assert_eq!(delta.elapsed_secs, 10.0);
    }

    #[test]
    fn counter_reset_yields_no_delta() {
        let mut cache = DeltaCache::new(8);
        let key = id("buffers_checkpoint");
        let t0 = SystemTime::now();
        let t1 = t0 + Duration::from_secs(10);
        assert!(cache.observe(&key, 100.0, t0).is_none());
        assert!(cache.observe(&key, 10.0, t1).is_none());
    }
}
