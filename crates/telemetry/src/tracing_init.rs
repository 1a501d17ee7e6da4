// SPDX-License-Identifier: Apache-2.0

//! `tracing` subscriber setup.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber with an `EnvFilter` seeded from
/// `default_directive` (overridable via `RUST_LOG`). Safe to call once at
/// process startup; subsequent calls are no-ops.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
