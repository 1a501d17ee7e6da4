// SPDX-License-Identifier: Apache-2.0

//! Fan-out wrappers that let a pipeline stage have more than one sibling:
//! several exporters on one pipeline, or a shared receiver feeding several
//! pipelines. Each sibling gets its own clone of the batch (pdata here is a
//! plain owned value, so a "deep clone" is simply `AnyBatch::clone`); the
//! merged result follows the consumer contract's fan-out rule (§9): any
//! sibling `Accepted` makes the whole fan-out `Accepted`.

use crate::component::Exporter;
use crate::consumer::{merge_fanout_outcomes, ConsumeOutcome};
use crate::error::Error;
use dbscope_pdata::AnyBatch;
use async_trait::async_trait;

/// Wraps a pipeline's configured exporters (one or more) behind the single
/// [`Exporter`] interface the pipeline runtime drives.
pub struct FanOutExporter {
    siblings: Vec<Box<dyn Exporter>>,
}

impl FanOutExporter {
    /// Wraps a non-empty set of exporters.
    #[must_use]
    pub fn new(siblings: Vec<Box<dyn Exporter>>) -> Self {
        Self { siblings }
    }
}

#[async_trait]
impl Exporter for FanOutExporter {
    async fn export(&mut self, data: AnyBatch) -> Result<ConsumeOutcome, Error> {
        let mut outcomes = Vec::with_capacity(self.siblings.len());
        for sibling in &mut self.siblings {
            outcomes.push(sibling.export(data.clone()).await?);
        }
        Ok(merge_fanout_outcomes(outcomes))
    }

    async fn shutdown(&mut self) -> Result<(), Error> {
        for sibling in &mut self.siblings {
            sibling.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedExporter(ConsumeOutcome);

    #[async_trait]
    impl Exporter for FixedExporter {
        async fn export(&mut self, _data: AnyBatch) -> Result<ConsumeOutcome, Error> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn fan_out_accepts_if_any_sibling_accepts() {
        let mut fan_out = FanOutExporter::new(vec![
            Box::new(FixedExporter(ConsumeOutcome::RetryableError("busy".into()))),
            Box::new(FixedExporter(ConsumeOutcome::Accepted)),
        ]);
        let outcome = fan_out
            .export(AnyBatch::Metrics(dbscope_pdata::MetricsBatch::empty()))
            .await
            .unwrap();
        assert!(outcome.is_accepted());
    }
}
