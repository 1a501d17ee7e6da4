// SPDX-License-Identifier: Apache-2.0

//! A tiny process-wide health registry components can report status into,
//! exposed by `dbscope-admin`'s `GET /health` (§6). Mirrors
//! [`crate::registry::MetricsRegistryHandle`]'s cheap-clone/shared-state
//! shape: one `Arc<Mutex<_>>` per process, handed out to every component.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A component's most recently reported status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    /// Starting up, not yet serving.
    Starting,
    /// Operating normally.
    Healthy,
    /// Degraded but still making progress (e.g. a circuit breaker tripped
    /// for one target, retries elevated).
    Degraded,
    /// Not making progress and not expected to recover without
    /// intervention.
    Failed,
}

/// Process-wide component health, shared by every running component.
#[derive(Clone, Default)]
pub struct HealthRegistryHandle(Arc<Mutex<HashMap<String, ComponentStatus>>>);

impl HealthRegistryHandle {
    /// Creates a fresh, empty health registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `component_id`'s current status, overwriting any prior value.
    pub fn set_status(&self, component_id: &str, status: ComponentStatus) {
        let mut guard = self.0.lock().expect("health registry mutex poisoned");
        let _ = guard.insert(component_id.to_string(), status);
    }

    /// Removes a component's status, e.g. once it has shut down cleanly.
    pub fn clear(&self, component_id: &str) {
        let mut guard = self.0.lock().expect("health registry mutex poisoned");
        let _ = guard.remove(component_id);
    }

    /// A point-in-time snapshot of every reported component's status.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, ComponentStatus> {
        self.0.lock().expect("health registry mutex poisoned").clone()
    }

    /// True if no component has reported `Failed` (§6: "503 if any critical
    /// component is failed and not in recovery" — recovery is represented
    /// by a subsequent `Degraded`/`Healthy` report superseding the failure).
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        !self
            .0
            .lock()
            .expect("health registry mutex poisoned")
            .values()
            .any(|s| *s == ComponentStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_until_a_component_reports_failed() {
        let reg = HealthRegistryHandle::new();
        assert!(reg.is_healthy());
        reg.set_status("postgresql/primary", ComponentStatus::Healthy);
        assert!(reg.is_healthy());
        reg.set_status("postgresql/primary", ComponentStatus::Failed);
        assert!(!reg.is_healthy());
    }

    #[test]
    fn recovery_report_supersedes_a_prior_failure() {
        let reg = HealthRegistryHandle::new();
        reg.set_status("mysql/replica", ComponentStatus::Failed);
        assert!(!reg.is_healthy());
        reg.set_status("mysql/replica", ComponentStatus::Degraded);
        assert!(reg.is_healthy());
    }
}
