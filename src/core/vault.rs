//! # Resource Store
//!
//! Shared store of normalized resources, keyed by canonical id.
//! The resolver loads every successful fetch here; routes only carry ids.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::resource::Resource;

#[derive(Debug, Default)]
pub struct ResourceStore {
    resources: HashMap<String, Arc<Resource>>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads (or reloads) a resource, replacing any previous record wholesale.
    pub fn load(&mut self, resource: Resource) -> Arc<Resource> {
        let resource = Arc::new(resource);
        self.resources
            .insert(resource.id.clone(), Arc::clone(&resource));
        resource
    }

    pub fn get(&self, id: &str) -> Option<Arc<Resource>> {
        self.resources.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn clear(&mut self) {
        self.resources.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resource::MANIFEST;

    fn manifest(id: &str, label: &str) -> Resource {
        Resource {
            id: id.into(),
            kind: MANIFEST.into(),
            label: Some(label.into()),
            summary: None,
            items: vec![],
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_load_replaces_existing_record() {
        let mut store = ResourceStore::new();
        store.load(manifest("m", "First"));
        store.load(manifest("m", "Second"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("m").unwrap().label.as_deref(), Some("Second"));
    }

    #[test]
    fn test_missing_record() {
        let store = ResourceStore::new();
        assert!(store.get("nope").is_none());
        assert!(!store.contains("nope"));
        assert!(store.is_empty());
    }
}
