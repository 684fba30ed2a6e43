use std::collections::BTreeMap;
use std::sync::Arc;

use super::StageFactory;

/// Stage types addressable by name (used when specs come from configuration).
#[derive(Clone, Default)]
pub struct StageRegistry {
    factories: BTreeMap<String, Arc<dyn StageFactory>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under its own name, replacing any previous entry.
    pub fn register(&mut self, factory: Arc<dyn StageFactory>) {
        self.factories.insert(factory.name().to_string(), factory);
    }

    pub fn with(mut self, factory: Arc<dyn StageFactory>) -> Self {
        self.register(factory);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StageFactory>> {
        self.factories.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn StageFactory>> {
        self.factories.values()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
