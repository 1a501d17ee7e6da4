// SPDX-License-Identifier: Apache-2.0

//! `Pipeline = (signal, receivers[], processors[], exporters[])` (§3).

use dbscope_pdata::SignalType;
use serde::Deserialize;

/// One configured pipeline: a signal type plus the ordered component keys
/// that make up its receivers, processor chain, and exporters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// The pipeline's signal type, also implied by the `metrics:`/`logs:`/
    /// `traces:` key it's nested under in the top-level `service.pipelines`
    /// map; kept explicit here for internal validation.
    #[serde(skip)]
    pub signal: SignalType,

    /// Receiver component keys (`type[/name]`) feeding this pipeline.
    pub receivers: Vec<String>,

    /// Ordered processor component keys forming the inline transform chain.
    #[serde(default)]
    pub processors: Vec<String>,

    /// Exporter component keys this pipeline's data is shipped to.
    pub exporters: Vec<String>,
}
