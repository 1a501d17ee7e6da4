// SPDX-License-Identifier: Apache-2.0

//! Self-telemetry for the collector: a metrics registry exposed as
//! Prometheus text (§6 `GET /metrics`) and a `tracing` setup shared by every
//! crate in the workspace.

mod health;
mod registry;
mod tracing_init;

pub use health::{ComponentStatus, HealthRegistryHandle};
pub use registry::{MetricsRegistry, MetricsRegistryHandle};
pub use tracing_init::init_tracing;

// Re-exported so downstream crates depend only on `dbscope-telemetry` for
// the `tracing` macros they use when logging component state (§7).
pub use tracing::{debug, error, info, trace, warn};
