//! Keyed collection of extractor instances owned by a builder

use crate::extractor::EdgeExtractor;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct ExtractorRegistry {
    extractors: HashMap<String, Arc<dyn EdgeExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an extractor under its own id, replacing any previous one.
    pub fn register(&mut self, extractor: Arc<dyn EdgeExtractor>) -> Option<Arc<dyn EdgeExtractor>> {
        let id = extractor.id().to_string();
        let previous = self.extractors.insert(id.clone(), extractor);
        if previous.is_some() {
            tracing::debug!(extractor = %id, "Replaced registered extractor");
        }
        previous
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn EdgeExtractor>> {
        self.extractors.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.extractors.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.extractors.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

impl fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("extractors", &self.ids())
            .finish()
    }
}
