// SPDX-License-Identifier: Apache-2.0

//! Component factory registry: maps a configured `type_name` to a
//! constructor for the corresponding [`Receiver`], [`Processor`], or
//! [`Exporter`]. Each component crate (receivers-db, processors-db,
//! exporter-otlp) registers its factories into a [`Registry`] built by
//! `main.rs`; there is no global/static registration, which keeps the
//! registry fully reconstructible in tests.

use crate::component::{Exporter, Processor, Receiver};
use crate::error::Error;
use std::collections::HashMap;

/// Constructs a receiver from its raw, still-untyped configuration value.
pub type ReceiverFactory = Box<dyn Fn(&serde_yaml::Value) -> Result<Box<dyn Receiver>, Error> + Send + Sync>;
/// Constructs a processor from its raw configuration value.
pub type ProcessorFactory = Box<dyn Fn(&serde_yaml::Value) -> Result<Box<dyn Processor>, Error> + Send + Sync>;
/// Constructs an exporter from its raw configuration value.
pub type ExporterFactory = Box<dyn Fn(&serde_yaml::Value) -> Result<Box<dyn Exporter>, Error> + Send + Sync>;

/// Holds every known component factory, keyed by the `type` portion of a
/// `type[/name]` component id.
#[derive(Default)]
pub struct Registry {
    receivers: HashMap<String, ReceiverFactory>,
    processors: HashMap<String, ProcessorFactory>,
    exporters: HashMap<String, ExporterFactory>,
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a receiver factory under `type_name`.
    pub fn register_receiver(&mut self, type_name: &str, factory: ReceiverFactory) {
        let _ = self.receivers.insert(type_name.to_string(), factory);
    }

    /// Registers a processor factory under `type_name`.
    pub fn register_processor(&mut self, type_name: &str, factory: ProcessorFactory) {
        let _ = self.processors.insert(type_name.to_string(), factory);
    }

    /// Registers an exporter factory under `type_name`.
    pub fn register_exporter(&mut self, type_name: &str, factory: ExporterFactory) {
        let _ = self.exporters.insert(type_name.to_string(), factory);
    }

    /// Builds a receiver instance for `type_name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponentType`] if no factory is registered.
    pub fn build_receiver(&self, type_name: &str, settings: &serde_yaml::Value) -> Result<Box<dyn Receiver>, Error> {
        self.receivers
            .get(type_name)
            .ok_or_else(|| Error::UnknownComponentType {
                kind: "receiver",
                type_name: type_name.to_string(),
            })
            .and_then(|factory| factory(settings))
    }

    /// Builds a processor instance for `type_name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponentType`] if no factory is registered.
    pub fn build_processor(&self, type_name: &str, settings: &serde_yaml::Value) -> Result<Box<dyn Processor>, Error> {
        self.processors
            .get(type_name)
            .ok_or_else(|| Error::UnknownComponentType {
                kind: "processor",
                type_name: type_name.to_string(),
            })
            .and_then(|factory| factory(settings))
    }

    /// Builds an exporter instance for `type_name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownComponentType`] if no factory is registered.
    pub fn build_exporter(&self, type_name: &str, settings: &serde_yaml::Value) -> Result<Box<dyn Exporter>, Error> {
        self.exporters
            .get(type_name)
            .ok_or_else(|| Error::UnknownComponentType {
                kind: "exporter",
                type_name: type_name.to_string(),
            })
            .and_then(|factory| factory(settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{EffectHandler, TerminalState};
    use crate::consumer::ConsumeOutcome;
    use async_trait::async_trait;
    use dbscope_pdata::AnyBatch;

    struct NoopExporter;

    #[async_trait]
    impl Exporter for NoopExporter {
        async fn export(&mut self, _data: AnyBatch) -> Result<ConsumeOutcome, Error> {
            Ok(ConsumeOutcome::Accepted)
        }
    }

    struct NoopReceiver;

    #[async_trait]
    impl Receiver for NoopReceiver {
        async fn start(
            &mut self,
            _ctrl: crate::control::ControlChannel,
            _effect_handler: EffectHandler,
        ) -> Result<TerminalState, Error> {
            Ok(TerminalState::Exhausted)
        }
    }

    #[test]
    fn unknown_type_is_an_error() {
        let registry = Registry::new();
        let err = registry
            .build_exporter("otlphttp", &serde_yaml::Value::Null)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownComponentType { .. }));
    }

    #[test]
    fn registered_factory_builds() {
        let mut registry = Registry::new();
        registry.register_exporter("noop", Box::new(|_| Ok(Box::new(NoopExporter))));
        registry.register_receiver("noop", Box::new(|_| Ok(Box::new(NoopReceiver))));
        assert!(registry.build_exporter("noop", &serde_yaml::Value::Null).is_ok());
        assert!(registry.build_receiver("noop", &serde_yaml::Value::Null).is_ok());
    }
}
