//! Named component factories.
//!
//! Worker processes cannot receive live estimators or collectors. They get a
//! [`RunnerBlueprint`] naming each component with its parameters and rebuild
//! the runner from their own [`Components`] registry.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::builtin::{JsonCollector, NullCollector, RawFrameOpener, SyntheticEstimator};
use crate::config::{ComponentSpec, ExecutorConfig, PipelineConfig};
use crate::error::{Error, Result};
use crate::stages::{Collector, Estimator, MediaOpener};

type Factory<T> = Arc<dyn Fn(&serde_json::Value) -> Result<Arc<T>> + Send + Sync>;

/// Registry of component factories keyed by name.
#[derive(Clone, Default)]
pub struct Components {
    estimators: FxHashMap<String, Factory<dyn Estimator>>,
    collectors: FxHashMap<String, Factory<dyn Collector>>,
    openers: FxHashMap<String, Factory<dyn MediaOpener>>,
}

/// The estimator, collector and opener of one runner.
#[derive(Clone)]
pub struct Stages {
    pub estimator: Arc<dyn Estimator>,
    pub collector: Arc<dyn Collector>,
    pub opener: Arc<dyn MediaOpener>,
}

impl Components {
    /// A registry with nothing in it.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The components shipped with framepipe.
    pub fn builtin() -> Self {
        let mut components = Self::empty();
        components.register_estimator("synthetic", |params| {
            Ok(Arc::new(SyntheticEstimator::from_params(params)?) as Arc<dyn Estimator>)
        });
        components.register_collector("json", |params| {
            Ok(Arc::new(JsonCollector::from_params(params)?) as Arc<dyn Collector>)
        });
        components.register_collector("null", |_| Ok(Arc::new(NullCollector) as Arc<dyn Collector>));
        components.register_opener("raw", |params| {
            Ok(Arc::new(RawFrameOpener::from_params(params)?) as Arc<dyn MediaOpener>)
        });
        components
    }

    pub fn register_estimator(
        &mut self,
        name: &str,
        factory: impl Fn(&serde_json::Value) -> Result<Arc<dyn Estimator>> + Send + Sync + 'static,
    ) {
        self.estimators.insert(name.to_string(), Arc::new(factory));
    }

    pub fn register_collector(
        &mut self,
        name: &str,
        factory: impl Fn(&serde_json::Value) -> Result<Arc<dyn Collector>> + Send + Sync + 'static,
    ) {
        self.collectors.insert(name.to_string(), Arc::new(factory));
    }

    pub fn register_opener(
        &mut self,
        name: &str,
        factory: impl Fn(&serde_json::Value) -> Result<Arc<dyn MediaOpener>> + Send + Sync + 'static,
    ) {
        self.openers.insert(name.to_string(), Arc::new(factory));
    }

    pub fn estimator(&self, spec: &ComponentSpec) -> Result<Arc<dyn Estimator>> {
        let factory = self
            .estimators
            .get(&spec.name)
            .ok_or_else(|| unknown("estimator", &spec.name))?;
        factory(&spec.params)
    }

    pub fn collector(&self, spec: &ComponentSpec) -> Result<Arc<dyn Collector>> {
        let factory = self
            .collectors
            .get(&spec.name)
            .ok_or_else(|| unknown("collector", &spec.name))?;
        factory(&spec.params)
    }

    pub fn opener(&self, spec: &ComponentSpec) -> Result<Arc<dyn MediaOpener>> {
        let factory = self
            .openers
            .get(&spec.name)
            .ok_or_else(|| unknown("opener", &spec.name))?;
        factory(&spec.params)
    }

    /// Instantiate every stage a blueprint names.
    pub fn build(&self, blueprint: &RunnerBlueprint) -> Result<Stages> {
        Ok(Stages {
            estimator: self.estimator(&blueprint.estimator.decode()?)?,
            collector: self.collector(&blueprint.collector.decode()?)?,
            opener: self.opener(&blueprint.opener.decode()?)?,
        })
    }
}

fn unknown(role: &str, name: &str) -> Error {
    Error::Component(format!("no {} named '{}' is registered", role, name))
}

/// A `ComponentSpec` in wire form; parameters travel as JSON text.
#[derive(Debug, Clone, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct WireComponent {
    pub name: String,
    pub params_json: String,
}

impl WireComponent {
    pub fn encode(spec: &ComponentSpec) -> Result<Self> {
        let params_json = serde_json::to_string(&spec.params).map_err(|e| {
            Error::Serialization(format!("parameters of '{}': {}", spec.name, e))
        })?;
        Ok(Self {
            name: spec.name.clone(),
            params_json,
        })
    }

    pub fn decode(&self) -> Result<ComponentSpec> {
        let params = serde_json::from_str(&self.params_json).map_err(|e| {
            Error::Serialization(format!("parameters of '{}': {}", self.name, e))
        })?;
        Ok(ComponentSpec {
            name: self.name.clone(),
            params,
        })
    }
}

/// Serializable description of a runner.
#[derive(Debug, Clone, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct RunnerBlueprint {
    pub estimator: WireComponent,
    pub collector: WireComponent,
    pub opener: WireComponent,
    pub executor: ExecutorConfig,
}

impl RunnerBlueprint {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            estimator: WireComponent::encode(&config.estimator)?,
            collector: WireComponent::encode(&config.collector)?,
            opener: WireComponent::encode(&config.opener)?,
            executor: config.executor.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_blueprint_builds() {
        let mut config = PipelineConfig::default();
        config.estimator.set_param("landmarks", 6);
        let blueprint = RunnerBlueprint::from_config(&config).unwrap();

        let stages = Components::builtin().build(&blueprint).unwrap();
        assert_eq!(stages.estimator.shape(), vec![6]);
        assert_eq!(stages.estimator.headers().len(), 6);
    }

    #[test]
    fn test_unknown_component_is_reported() {
        let components = Components::builtin();
        let err = match components.collector(&ComponentSpec::new("csv")) {
            Err(err) => err,
            Ok(_) => panic!("csv collector should not exist"),
        };
        assert!(matches!(err, Error::Component(msg) if msg.contains("'csv'")));
    }

    #[test]
    fn test_wire_component_preserves_params() {
        let spec = ComponentSpec::new("synthetic")
            .with_param("landmarks", 3)
            .with_param("fail_on", serde_json::json!([1, 4]));
        let wire = WireComponent::encode(&spec).unwrap();
        assert_eq!(wire.decode().unwrap(), spec);
    }

    #[test]
    fn test_custom_registration() {
        let mut components = Components::empty();
        components.register_collector("discard", |_| Ok(Arc::new(NullCollector) as Arc<dyn Collector>));
        assert!(components.collector(&ComponentSpec::new("discard")).is_ok());
        assert!(components.estimator(&ComponentSpec::new("synthetic")).is_err());
    }
}
