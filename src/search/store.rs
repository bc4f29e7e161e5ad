//! # Search Store
//!
//! Keeps an [`ItemIndex`] consistent with a data set that only arrives
//! piecemeal: static pages up front, visited resources one at a time, and
//! the children of whichever collection is active.
//!
//! - `history.page` adds one document in place.
//! - `history.clear` and `collection.change` rebuild the whole index,
//!   bracketed by `search.index-start` / `search.index-complete`.
//!
//! A query issued mid-rebuild is parked and replayed once the rebuild
//! finishes; the active query is always recomputed afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, info, warn};

use crate::core::events::{BrowserEvent, Emitter, EventTopic};
use crate::core::history::HistoryListItem;
use crate::core::resource::{ResourceRef, ResourceSummary};
use crate::core::routes;
use crate::search::index::{Document, IndexError, ItemIndex};
use crate::search::item::{SearchIndexItem, SearchSource, static_items};

pub const DEFAULT_NUMBER_OF_RESULTS: usize = 30;
pub const DEFAULT_DYNAMIC_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    /// Cap on ranked query results.
    pub number_of_results: usize,
    /// Cap on dynamic items listed for an empty query.
    pub dynamic_limit: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            number_of_results: DEFAULT_NUMBER_OF_RESULTS,
            dynamic_limit: DEFAULT_DYNAMIC_LIMIT,
        }
    }
}

#[derive(Debug)]
pub struct SearchStore {
    options: SearchOptions,
    index: ItemIndex,
    static_docs: Vec<Document>,
    /// Visited resources, most recent first.
    history: Vec<SearchIndexItem>,
    collection: Option<ResourceRef>,
    collection_docs: Arc<Vec<Document>>,
    /// Prepared documents per collection id.
    collection_cache: HashMap<String, Arc<Vec<Document>>>,
    dynamic: Vec<SearchIndexItem>,
    custom: Vec<SearchIndexItem>,
    query: String,
    filter: Option<SearchSource>,
    results: Vec<SearchIndexItem>,
    indexing: bool,
    pending: Option<(String, Option<SearchSource>)>,
    generation: u64,
}

impl SearchStore {
    pub fn new(options: SearchOptions) -> Result<Self, IndexError> {
        let static_docs: Vec<Document> = static_items().into_iter().map(Document::prepare).collect();
        let mut store = Self {
            options,
            index: ItemIndex::new()?,
            static_docs,
            history: Vec::new(),
            collection: None,
            collection_docs: Arc::new(Vec::new()),
            collection_cache: HashMap::new(),
            dynamic: Vec::new(),
            custom: Vec::new(),
            query: String::new(),
            filter: None,
            results: Vec::new(),
            indexing: false,
            pending: None,
            generation: 0,
        };
        store.rebuild()?;
        store.refresh();
        Ok(store)
    }

    /// Applies a browser event. Returns `true` when the index needs a
    /// full rebuild.
    pub fn handle_event(&mut self, event: &BrowserEvent) -> bool {
        match event {
            BrowserEvent::HistoryPage { item } => {
                self.add_history(item);
                false
            }
            BrowserEvent::HistoryClear => {
                self.history.clear();
                true
            }
            BrowserEvent::CollectionChange { collection, items } => {
                self.collection = collection.clone();
                self.collection_docs = match collection {
                    Some(collection) => self.collection_documents(collection, items),
                    None => Arc::new(Vec::new()),
                };
                true
            }
            _ => false,
        }
    }

    fn add_history(&mut self, item: &HistoryListItem) {
        let search_item = SearchIndexItem::from_history(item);
        self.history.retain(|existing| existing.id != search_item.id);
        self.history.insert(0, search_item.clone());
        let indexed = self
            .index
            .add(Document::prepare(search_item))
            .and_then(|()| self.index.commit());
        match indexed {
            Ok(()) => debug!("Indexed visited {}", item.url),
            Err(e) => warn!("Failed to index visited {}: {}", item.url, e),
        }
        if !self.indexing {
            self.refresh();
        }
    }

    fn collection_documents(
        &mut self,
        collection: &ResourceRef,
        items: &[ResourceSummary],
    ) -> Arc<Vec<Document>> {
        if let Some(docs) = self.collection_cache.get(&collection.id) {
            return Arc::clone(docs);
        }
        let docs: Arc<Vec<Document>> = Arc::new(
            items
                .iter()
                .map(|child| Document::prepare(SearchIndexItem::from_collection_child(collection, child)))
                .collect(),
        );
        // An unloaded collection arrives without children; don't pin that
        if !docs.is_empty() {
            self.collection_cache
                .insert(collection.id.clone(), Arc::clone(&docs));
        }
        docs
    }

    /// Replaces the visited items wholesale, e.g. after a restore.
    pub fn set_history(&mut self, items: &[HistoryListItem]) {
        self.history = items.iter().map(SearchIndexItem::from_history).collect();
    }

    pub fn set_dynamic_items(&mut self, items: Vec<SearchIndexItem>) {
        self.dynamic = items;
    }

    pub fn set_custom_items(&mut self, items: Vec<SearchIndexItem>) {
        self.custom = items;
    }

    // ========================================================================
    // Reindexing
    // ========================================================================

    /// First half of a rebuild: queries from here on are parked.
    pub fn begin_reindex(&mut self) -> u64 {
        self.indexing = true;
        self.generation += 1;
        self.generation
    }

    /// Second half: rebuilds, replays any parked query and returns the
    /// document count.
    pub fn finish_reindex(&mut self) -> usize {
        if let Err(e) = self.rebuild() {
            warn!("Search index rebuild failed: {}", e);
        }
        self.indexing = false;
        if let Some((query, filter)) = self.pending.take() {
            self.query = query;
            self.filter = filter;
        }
        self.refresh();
        self.index.len()
    }

    pub fn reindex(&mut self) -> usize {
        self.begin_reindex();
        self.finish_reindex()
    }

    fn rebuild(&mut self) -> Result<(), IndexError> {
        self.index.clear()?;
        for doc in self.static_docs.iter().chain(self.collection_docs.iter()) {
            self.index.add(doc.clone())?;
        }
        // Oldest first so a duplicate id keeps the most recent visit
        for item in self
            .history
            .iter()
            .rev()
            .chain(self.dynamic.iter())
            .chain(self.custom.iter())
        {
            self.index.add(Document::prepare(item.clone()))?;
        }
        self.index.commit()?;
        info!(
            "Search index rebuilt: {} documents (generation {})",
            self.index.len(),
            self.generation
        );
        Ok(())
    }

    // ========================================================================
    // Querying
    // ========================================================================

    /// Runs `query`, or parks it while a rebuild is in progress.
    pub fn search(&mut self, query: &str, filter: Option<SearchSource>) -> Vec<SearchIndexItem> {
        if self.indexing {
            debug!("Parking query {:?} until indexing completes", query);
            self.pending = Some((query.to_string(), filter));
            return self.results.clone();
        }
        self.query = query.to_string();
        self.filter = filter;
        self.refresh();
        self.results.clone()
    }

    fn refresh(&mut self) {
        self.results = self.compute(&self.query, self.filter);
    }

    fn compute(&self, query: &str, filter: Option<SearchSource>) -> Vec<SearchIndexItem> {
        let query = query.trim();
        // The active collection's own id reads as an empty query
        let query = match &self.collection {
            Some(collection) if collection.id == query => "",
            _ => query,
        };

        if query.is_empty() && filter.is_none() {
            return self.recent();
        }
        if query.is_empty() {
            return self
                .index
                .documents()
                .map(Document::item)
                .filter(|item| Some(item.source) == filter)
                .take(self.options.number_of_results)
                .cloned()
                .collect();
        }
        if routes::is_network_identifier(query) {
            return vec![SearchIndexItem::open_url(query)];
        }

        match self.index.search(query, self.options.number_of_results) {
            Ok(hits) => hits
                .into_iter()
                .map(|hit| hit.item)
                .filter(|item| filter.is_none_or(|source| item.source == source))
                .collect(),
            Err(e) => {
                warn!("Search for {:?} failed: {}", query, e);
                Vec::new()
            }
        }
    }

    /// What an empty query shows: dynamic, then visited, then always-shown
    /// static items.
    fn recent(&self) -> Vec<SearchIndexItem> {
        let statics = self
            .static_docs
            .iter()
            .map(Document::item)
            .filter(|item| item.always_show);
        let mut seen = HashSet::new();
        self.dynamic
            .iter()
            .take(self.options.dynamic_limit)
            .chain(self.history.iter())
            .chain(statics)
            .filter(|item| seen.insert(item.id.clone()))
            .cloned()
            .collect()
    }

    pub fn results(&self) -> &[SearchIndexItem] {
        &self.results
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn filter(&self) -> Option<SearchSource> {
        self.filter
    }

    pub fn is_indexing(&self) -> bool {
        self.indexing
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn document_count(&self) -> usize {
        self.index.len()
    }

    pub fn active_collection(&self) -> Option<&ResourceRef> {
        self.collection.as_ref()
    }
}

// ============================================================================
// Indexer (event wiring)
// ============================================================================

/// A [`SearchStore`] subscribed to a browser's emitter.
///
/// Holds the emitter weakly: the emitter owns the subscription closures,
/// which own the indexer.
#[derive(Debug)]
pub struct SearchIndexer {
    store: Mutex<SearchStore>,
    emitter: Weak<Emitter>,
}

impl SearchIndexer {
    pub fn attach(emitter: &Arc<Emitter>, options: SearchOptions) -> Result<Arc<Self>, IndexError> {
        let indexer = Arc::new(Self {
            store: Mutex::new(SearchStore::new(options)?),
            emitter: Arc::downgrade(emitter),
        });
        for topic in [
            EventTopic::HistoryPage,
            EventTopic::HistoryClear,
            EventTopic::CollectionChange,
        ] {
            let subscriber = Arc::clone(&indexer);
            emitter.subscribe(topic, move |event| subscriber.on_event(event));
        }
        Ok(indexer)
    }

    fn lock(&self) -> MutexGuard<'_, SearchStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_event(&self, event: &BrowserEvent) {
        let needs_rebuild = self.lock().handle_event(event);
        if needs_rebuild {
            self.reindex();
        }
    }

    fn emit(&self, event: BrowserEvent) {
        if let Some(emitter) = self.emitter.upgrade() {
            emitter.emit(&event);
        }
    }

    /// Rebuilds the index. The start and complete events are emitted with
    /// the store unlocked, so their handlers may query.
    pub fn reindex(&self) -> usize {
        let generation = self.lock().begin_reindex();
        self.emit(BrowserEvent::SearchIndexStart { generation });
        let documents = self.lock().finish_reindex();
        self.emit(BrowserEvent::SearchIndexComplete {
            generation,
            documents,
        });
        documents
    }

    /// Seeds the visited items from a restored history list.
    pub fn bulk_load_history(&self, items: &[HistoryListItem]) -> usize {
        self.lock().set_history(items);
        self.reindex()
    }

    pub fn set_dynamic_items(&self, items: Vec<SearchIndexItem>) -> usize {
        self.lock().set_dynamic_items(items);
        self.reindex()
    }

    pub fn set_custom_items(&self, items: Vec<SearchIndexItem>) -> usize {
        self.lock().set_custom_items(items);
        self.reindex()
    }

    pub fn search(&self, query: &str, filter: Option<SearchSource>) -> Vec<SearchIndexItem> {
        self.lock().search(query, filter)
    }

    pub fn results(&self) -> Vec<SearchIndexItem> {
        self.lock().results().to_vec()
    }

    pub fn query(&self) -> String {
        self.lock().query().to_string()
    }

    pub fn is_indexing(&self) -> bool {
        self.lock().is_indexing()
    }

    pub fn document_count(&self) -> usize {
        self.lock().document_count()
    }
}
