// SPDX-License-Identifier: Apache-2.0

//! Traffic-shaping processors for database telemetry: adaptive sampler,
//! circuit breaker, plan attribute extractor, cost control, query
//! correlator, verification, and the New Relic error monitor (§4.3).

mod adaptive_sampler;
mod circuit_breaker;
mod cost_control;
mod error;
mod nr_error_monitor;
mod plan_extractor;
mod query_correlator;
mod verification;

pub use adaptive_sampler::{AdaptiveSampler, AdaptiveSamplerConfig, ConditionConfig, Operator, RuleConfig};
pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig, StateKind};
pub use cost_control::{CostControl, CostControlConfig};
pub use error::Error;
pub use nr_error_monitor::{NrErrorMonitor, NrErrorMonitorConfig, Watchdog};
pub use plan_extractor::{extract, AntiPattern, PlanAttributes, PlanExtractor, PlanExtractorConfig};
pub use query_correlator::{CorrelatorIndex, QueryCorrelator, QueryCorrelatorConfig, SpeedCategory};
pub use verification::{Verification, VerificationConfig, ViolationMode};

use dbscope_engine::Registry;
use dbscope_telemetry::MetricsRegistryHandle;

/// Registers every processor factory in this crate under its `type` name
/// (§6: `adaptive_sampler`, `circuit_breaker`, `plan_extractor`,
/// `cost_control`, `query_correlator`, `verification`, `nr_error_monitor`).
pub fn register(registry: &mut Registry, metrics: MetricsRegistryHandle) {
    let m = metrics.clone();
    registry.register_processor(
        "adaptive_sampler",
        Box::new(move |settings| {
            AdaptiveSampler::from_settings(settings, m.clone())
                .map(|p| Box::new(p) as Box<dyn dbscope_engine::Processor>)
                .map_err(Into::into)
        }),
    );

    let m = metrics.clone();
    registry.register_processor(
        "circuit_breaker",
        Box::new(move |settings| {
            CircuitBreaker::from_settings(settings, m.clone())
                .map(|p| Box::new(p) as Box<dyn dbscope_engine::Processor>)
                .map_err(Into::into)
        }),
    );

    let m = metrics.clone();
    registry.register_processor(
        "plan_extractor",
        Box::new(move |settings| {
            PlanExtractor::from_settings(settings, m.clone())
                .map(|p| Box::new(p) as Box<dyn dbscope_engine::Processor>)
                .map_err(Into::into)
        }),
    );

    let m = metrics.clone();
    registry.register_processor(
        "cost_control",
        Box::new(move |settings| {
            CostControl::from_settings(settings, m.clone())
                .map(|p| Box::new(p) as Box<dyn dbscope_engine::Processor>)
                .map_err(Into::into)
        }),
    );

    let m = metrics.clone();
    registry.register_processor(
        "query_correlator",
        Box::new(move |settings| {
            QueryCorrelator::from_settings(settings, m.clone())
                .map(|p| Box::new(p) as Box<dyn dbscope_engine::Processor>)
                .map_err(Into::into)
        }),
    );

    let m = metrics.clone();
    registry.register_processor(
        "verification",
        Box::new(move |settings| {
            Verification::from_settings(settings, m.clone())
                .map(|p| Box::new(p) as Box<dyn dbscope_engine::Processor>)
                .map_err(Into::into)
        }),
    );

    let m = metrics;
    registry.register_processor(
        "nr_error_monitor",
        Box::new(move |settings| {
            NrErrorMonitor::from_settings(settings, m.clone())
                .map(|p| Box::new(p) as Box<dyn dbscope_engine::Processor>)
                .map_err(Into::into)
        }),
    );
}
