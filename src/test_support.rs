//! Test utilities shared across the crate.
//!
//! This module is only compiled during tests (`#[cfg(test)]`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::core::browser::{Browser, BrowserSettings};
use crate::core::events::{BrowserEvent, Emitter, EventTopic};
use crate::core::persistence::MemoryStateStore;
use crate::fetch::{ResolveError, ResourceFetcher};

/// A scripted fetcher. Unscripted URLs answer `HTTP error 404`.
#[derive(Default)]
pub struct MockFetcher {
    responses: Mutex<HashMap<String, Result<Value, ResolveError>>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, body: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(body));
    }

    pub fn fail(&self, url: &str, error: ResolveError) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(error));
    }

    /// Makes fetches of `url` wait until the returned gate is notified.
    pub fn hold(&self, url: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(url.to_string(), Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
    }
}

#[async_trait]
impl ResourceFetcher for MockFetcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, url: &str) -> Result<Value, ResolveError> {
        self.calls.lock().unwrap().push(url.to_string());
        let gate = self.gates.lock().unwrap().get(url).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(Err(ResolveError::Http(404)))
    }
}

/// Records every event emitted on an emitter.
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<BrowserEvent>>>,
}

impl EventRecorder {
    pub fn attach(emitter: &Emitter) -> Self {
        let recorder = Self::default();
        let sink = Arc::clone(&recorder.events);
        emitter.subscribe_all(move |event| sink.lock().unwrap().push(event.clone()));
        recorder
    }

    pub fn events(&self) -> Vec<BrowserEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn topics(&self) -> Vec<EventTopic> {
        self.events().iter().map(BrowserEvent::topic).collect()
    }

    pub fn count(&self, topic: EventTopic) -> usize {
        self.topics().into_iter().filter(|t| *t == topic).count()
    }

    pub fn last(&self, topic: EventTopic) -> Option<BrowserEvent> {
        self.events().into_iter().rev().find(|e| e.topic() == topic)
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

pub fn manifest_json(id: &str, label: &str) -> Value {
    json!({
        "@context": "http://iiif.io/api/presentation/3/context.json",
        "id": id,
        "type": "Manifest",
        "label": { "en": [label] },
        "items": []
    })
}

pub fn canvas_json(id: &str, label: &str) -> Value {
    json!({
        "id": id,
        "type": "Canvas",
        "label": { "none": [label] }
    })
}

/// A collection whose `children` are `(id, label)` manifests.
pub fn collection_json(id: &str, label: &str, children: &[(&str, &str)]) -> Value {
    let items: Vec<Value> = children
        .iter()
        .map(|(child, child_label)| {
            json!({ "id": child, "type": "Manifest", "label": { "en": [child_label] } })
        })
        .collect();
    json!({
        "@context": "http://iiif.io/api/presentation/3/context.json",
        "id": id,
        "type": "Collection",
        "label": { "en": [label] },
        "items": items
    })
}

/// Creates a test Browser over a fresh in-memory store.
pub fn test_browser(fetcher: Arc<MockFetcher>) -> Browser {
    test_browser_with_store(fetcher, Arc::new(MemoryStateStore::new()))
}

/// Creates a test Browser persisting under the `test` storage key.
pub fn test_browser_with_store(fetcher: Arc<MockFetcher>, store: Arc<MemoryStateStore>) -> Browser {
    let settings = BrowserSettings {
        storage_key: "test".to_string(),
        ..Default::default()
    };
    Browser::new(fetcher, Arc::new(Emitter::new()), store, settings)
}
