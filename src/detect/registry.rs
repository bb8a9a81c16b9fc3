use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use super::backend::Detector;
use super::backends::{NullDetector, SyntheticDetector};

type DetectorFactory = Box<dyn Fn() -> Result<Box<dyn Detector>> + Send + Sync>;

/// Registry of detector constructors, keyed by name.
///
/// Detectors are created on demand rather than shared: each inference worker
/// owns its instance, so `infer` never runs behind a shared lock.
pub struct DetectorRegistry {
    factories: BTreeMap<String, DetectorFactory>,
    default_name: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Registry with the detectors that ship with the crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("synthetic", || {
            Ok(Box::new(SyntheticDetector::new()) as Box<dyn Detector>)
        });
        registry.register("null", || Ok(Box::new(NullDetector) as Box<dyn Detector>));
        registry
    }

    /// Register a constructor. The first registered detector becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<Box<dyn Detector>> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("detector '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Detector>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("detector '{}' not registered", name))?;
        factory()
    }

    pub fn create_default(&self) -> Result<Box<dyn Detector>> {
        let name = self
            .default_name
            .as_deref()
            .ok_or_else(|| anyhow!("no detectors registered"))?;
        self.create(name)
    }

    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
