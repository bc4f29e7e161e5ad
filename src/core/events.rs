//! # Events
//!
//! A typed publish/subscribe bus decoupling the resolver from the search
//! index, the output store and UI observers.
//!
//! Every topic has exactly one [`BrowserEvent`] variant carrying its payload.
//! Delivery is synchronous, in registration order. Handlers are called with
//! the subscriber list unlocked, so a handler may emit or subscribe again.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use crate::core::history::{HistoryAction, HistoryEntry, HistoryListItem};
use crate::core::resource::{ResourceRef, ResourceSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    HistoryChange,
    CollectionChange,
    ManifestChange,
    ResourceChange,
    SearchIndexStart,
    SearchIndexComplete,
    HistoryPage,
    HistoryClear,
}

impl EventTopic {
    pub const ALL: [EventTopic; 8] = [
        EventTopic::HistoryChange,
        EventTopic::CollectionChange,
        EventTopic::ManifestChange,
        EventTopic::ResourceChange,
        EventTopic::SearchIndexStart,
        EventTopic::SearchIndexComplete,
        EventTopic::HistoryPage,
        EventTopic::HistoryClear,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventTopic::HistoryChange => "history.change",
            EventTopic::CollectionChange => "collection.change",
            EventTopic::ManifestChange => "manifest.change",
            EventTopic::ResourceChange => "resource.change",
            EventTopic::SearchIndexStart => "search.index-start",
            EventTopic::SearchIndexComplete => "search.index-complete",
            EventTopic::HistoryPage => "history.page",
            EventTopic::HistoryClear => "history.clear",
        }
    }
}

impl fmt::Display for EventTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BrowserEvent {
    /// The history stack moved; `entry` is the entry now at `cursor`.
    HistoryChange {
        action: HistoryAction,
        entry: HistoryEntry,
        cursor: usize,
    },
    /// The active collection changed. `items` are its children, empty when
    /// the collection is not in the resource store.
    CollectionChange {
        collection: Option<ResourceRef>,
        items: Vec<ResourceSummary>,
    },
    ManifestChange {
        manifest: Option<ResourceRef>,
    },
    /// The routed resource changed.
    ResourceChange {
        resource: Option<ResourceRef>,
        parent: Option<ResourceRef>,
    },
    SearchIndexStart {
        generation: u64,
    },
    SearchIndexComplete {
        generation: u64,
        documents: usize,
    },
    /// A resolution finished and was recorded in the visited list.
    HistoryPage {
        item: HistoryListItem,
    },
    HistoryClear,
}

impl BrowserEvent {
    pub fn topic(&self) -> EventTopic {
        match self {
            BrowserEvent::HistoryChange { .. } => EventTopic::HistoryChange,
            BrowserEvent::CollectionChange { .. } => EventTopic::CollectionChange,
            BrowserEvent::ManifestChange { .. } => EventTopic::ManifestChange,
            BrowserEvent::ResourceChange { .. } => EventTopic::ResourceChange,
            BrowserEvent::SearchIndexStart { .. } => EventTopic::SearchIndexStart,
            BrowserEvent::SearchIndexComplete { .. } => EventTopic::SearchIndexComplete,
            BrowserEvent::HistoryPage { .. } => EventTopic::HistoryPage,
            BrowserEvent::HistoryClear => EventTopic::HistoryClear,
        }
    }
}

pub type Handler = Arc<dyn Fn(&BrowserEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    /// `None` receives every topic.
    topic: Option<EventTopic>,
    handler: Handler,
}

#[derive(Default)]
pub struct Emitter {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, topic: Option<EventTopic>, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber { id, topic, handler });
        id
    }

    /// Subscribes to one topic.
    pub fn subscribe<F>(&self, topic: EventTopic, handler: F) -> SubscriptionId
    where
        F: Fn(&BrowserEvent) + Send + Sync + 'static,
    {
        self.add(Some(topic), Arc::new(handler))
    }

    /// Subscribes to every topic.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&BrowserEvent) + Send + Sync + 'static,
    {
        self.add(None, Arc::new(handler))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn emit(&self, event: &BrowserEvent) {
        let topic = event.topic();
        let handlers: Vec<Handler> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.topic.is_none_or(|t| t == topic))
            .map(|s| Arc::clone(&s.handler))
            .collect();
        debug!("emit {} → {} handler(s)", topic, handlers.len());
        for handler in handlers {
            handler(event);
        }
    }

    pub fn emit_all(&self, events: impl IntoIterator<Item = BrowserEvent>) {
        for event in events {
            self.emit(&event);
        }
    }
}
