//! # Resolver
//!
//! The navigation state machine. Owns the cache, the history stack, the
//! visited list and the resource store behind one lock, and reports every
//! change through the [`Emitter`].
//!
//! ```text
//!   Idle ──resolve──▶ Loading ──ok──▶ Loaded
//!                       │  ▲
//!                      err │ resolve (cached error)
//!                       ▼  │
//!                     Error ──▶ Retrying ──▶ Loaded | Error
//! ```
//!
//! Only the fetch suspends. Each `resolve()` takes a new generation; a fetch
//! races against the generation moving on and every step after it re-checks
//! before committing, so a superseded request never touches state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use tokio::sync::watch;

use crate::core::cache::{CacheEntry, ResourceCache};
use crate::core::events::{BrowserEvent, Emitter};
use crate::core::history::{
    DEFAULT_HISTORY_LIMIT, HistoryAction, HistoryEntry, HistoryList, HistoryListItem, HistoryStack,
};
use crate::core::persistence::{self, StateStore};
use crate::core::resource::{Resource, ResourceRef};
use crate::core::routes::{self, RouteKind};
use crate::core::vault::ResourceStore;
use crate::fetch::{ResolveError, ResourceFetcher, normalize};

// ============================================================================
// Public types
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveOptions {
    /// Bypass a cached success (or error) and fetch again.
    pub force: bool,
    /// Where the target was reached from, e.g. the manifest of a canvas.
    pub parent: Option<ResourceRef>,
}

impl ResolveOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            parent: None,
        }
    }

    pub fn with_parent(parent: ResourceRef) -> Self {
        Self {
            force: false,
            parent: Some(parent),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResolveState {
    #[default]
    Idle,
    Loading {
        url: String,
    },
    /// Loading an identifier whose last attempt failed.
    Retrying {
        url: String,
        attempt: u32,
    },
    Loaded {
        url: String,
    },
    Error {
        url: String,
        message: String,
    },
}

impl ResolveState {
    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            ResolveState::Loading { .. } | ResolveState::Retrying { .. }
        )
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            ResolveState::Idle => None,
            ResolveState::Loading { url }
            | ResolveState::Retrying { url, .. }
            | ResolveState::Loaded { url }
            | ResolveState::Error { url, .. } => Some(url),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrowserSettings {
    /// Namespace for persisted state.
    pub storage_key: String,
    /// Cap for the persisted stack and the visited list.
    pub history_limit: usize,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            storage_key: "iiif-browser".to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Default)]
struct BrowserState {
    status: ResolveState,
    cache: ResourceCache,
    history: HistoryStack,
    history_list: HistoryList,
    vault: ResourceStore,
    active_collection: Option<ResourceRef>,
    active_manifest: Option<ResourceRef>,
    active_resource: Option<ResourceRef>,
    active_parent: Option<ResourceRef>,
}

/// One resolution in flight.
struct Request {
    generation: u64,
    /// What the caller asked for, `view-source:` prefix included.
    target: String,
    /// The network identifier to fetch.
    url: String,
    view_source: bool,
    parent: Option<ResourceRef>,
}

/// What gets persisted, copied out so the write happens unlocked.
struct Snapshot {
    history: HistoryStack,
    items: Vec<HistoryListItem>,
}

struct Inner {
    state: Mutex<BrowserState>,
    /// Held from snapshot to write so saves land in commit order.
    saving: Mutex<()>,
    fetcher: Arc<dyn ResourceFetcher>,
    emitter: Arc<Emitter>,
    store: Arc<dyn StateStore>,
    settings: BrowserSettings,
    generation: watch::Sender<u64>,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Browser {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Browser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Browser")
            .field("fetcher", &self.inner.fetcher.name())
            .field("settings", &self.inner.settings)
            .field("status", &self.state())
            .finish()
    }
}

impl Browser {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        emitter: Arc<Emitter>,
        store: Arc<dyn StateStore>,
        settings: BrowserSettings,
    ) -> Self {
        let state = BrowserState {
            history_list: HistoryList::new(settings.history_limit),
            ..Default::default()
        };
        let (generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                saving: Mutex::new(()),
                fetcher,
                emitter,
                store,
                settings,
                generation,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrowserState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Navigates to `target`: a scheme token (`iiif://about`), an `http(s)`
    /// identifier, or either behind `view-source:`.
    ///
    /// Never fails. Errors end up in the cache and on a not-found route, and
    /// a request superseded by a later call leaves no trace.
    pub async fn resolve(&self, target: &str, options: ResolveOptions) {
        let target = target.trim();
        let (view_source, url) = match target.strip_prefix(routes::VIEW_SOURCE_PREFIX) {
            Some(rest) => (true, rest.trim()),
            None => (false, target),
        };
        info!("Resolving {} (force: {})", target, options.force);

        let mut pending = None;
        self.commit(|state| {
            let request = Request {
                generation: self.advance_generation(),
                target: target.to_string(),
                url: url.to_string(),
                view_source,
                parent: options.parent.clone(),
            };

            // A loading entry at the cursor belongs to a superseded request
            let action = if current_is_loading(state) {
                HistoryAction::Replace
            } else {
                HistoryAction::Push
            };

            let events = if routes::is_scheme_token(url) {
                show_page(state, &request, action)
            } else if !routes::is_network_identifier(url) {
                let message = format!("Unsupported identifier: {url}");
                fail(state, &request, message, action)
            } else {
                let cached = state
                    .cache
                    .get(url)
                    .filter(|entry| entry.is_resolved())
                    .and_then(|entry| entry.resource.clone());
                match cached {
                    Some(reference) if !options.force => {
                        show_cached(state, &request, reference, action)
                    }
                    _ => {
                        let events = start_loading(state, &request, options.force, action);
                        pending = Some(request);
                        events
                    }
                }
            };
            Some(events)
        });

        let Some(request) = pending else {
            return;
        };

        let result = self.fetch(&request).await;
        if matches!(&result, Err(error) if error.is_abort()) {
            debug!("Dropping superseded request for {}", request.url);
            return;
        }

        self.commit(|state| {
            if self.is_stale(request.generation) {
                debug!("Dropping superseded result for {}", request.url);
                return None;
            }
            Some(match result {
                Ok(resource) => show_fetched(state, &request, resource),
                Err(error) => {
                    let message = error.to_string();
                    state.cache.set_error(&request.url, message.clone());
                    fail(state, &request, message, HistoryAction::Replace)
                }
            })
        });
    }

    /// Fetches and normalizes, giving up as soon as a newer request starts.
    async fn fetch(&self, request: &Request) -> Result<Resource, ResolveError> {
        let mut receiver = self.inner.generation.subscribe();
        let json = tokio::select! {
            biased;
            _ = superseded(&mut receiver, request.generation) => return Err(ResolveError::Aborted),
            result = self.inner.fetcher.fetch(&request.url) => result?,
        };
        if self.is_stale(request.generation) {
            return Err(ResolveError::Aborted);
        }

        let resource = normalize(&json)?;
        if self.is_stale(request.generation) {
            return Err(ResolveError::Aborted);
        }
        debug!(
            "{} normalized to {} {}",
            request.url, resource.kind, resource.id
        );
        Ok(resource)
    }

    /// Starts a new generation, superseding whatever is in flight.
    /// Only called with the state lock held.
    fn advance_generation(&self) -> u64 {
        self.inner
            .generation
            .send_modify(|generation| *generation += 1);
        *self.inner.generation.borrow()
    }

    fn is_stale(&self, generation: u64) -> bool {
        *self.inner.generation.borrow() != generation
    }

    /// Runs `mutate` under the lock, then persists and emits with the lock
    /// released. `None` means nothing changed.
    fn commit<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut BrowserState) -> Option<Vec<BrowserEvent>>,
    {
        let (events, snapshot, saving) = {
            let mut state = self.lock();
            let Some(events) = mutate(&mut state) else {
                return false;
            };
            let saving = self
                .inner
                .saving
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            (events, self.snapshot(&state), saving)
        };
        self.persist(&snapshot);
        drop(saving);
        self.inner.emitter.emit_all(events);
        true
    }

    fn snapshot(&self, state: &BrowserState) -> Snapshot {
        Snapshot {
            history: state.history.snapshot(self.inner.settings.history_limit),
            items: state.history_list.items().to_vec(),
        }
    }

    fn persist(&self, snapshot: &Snapshot) {
        let store = self.inner.store.as_ref();
        let key = &self.inner.settings.storage_key;
        persistence::save_json(store, &persistence::history_key(key), &snapshot.history);
        persistence::save_json(
            store,
            &persistence::history_list_key(key),
            &snapshot.items,
        );
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    pub fn back(&self) -> bool {
        self.go(-1)
    }

    pub fn forward(&self) -> bool {
        self.go(1)
    }

    /// Moves `delta` entries through the stack. Out-of-range moves do nothing.
    pub fn go(&self, delta: isize) -> bool {
        self.pop(|history| history.go(delta))
    }

    /// Moves to the nearest existing entry for `route` without touching the
    /// rest of the stack.
    pub fn pop_to(&self, route: &str) -> bool {
        self.pop(|history| history.pop_to(route))
    }

    fn pop<F>(&self, step: F) -> bool
    where
        F: FnOnce(&mut HistoryStack) -> bool,
    {
        self.commit(|state| {
            if !step(&mut state.history) {
                return None;
            }
            self.advance_generation();
            settle_status(state);
            Some(history_events(state, HistoryAction::Pop))
        })
    }

    /// Pushes an internal route (e.g. `/about` or `/canvas?id=…`) directly.
    pub fn navigate(&self, route: &str) {
        let target = routes::map_route(route);
        let resource = target.resource.as_ref().map(|r| r.id.clone());
        let entry = HistoryEntry::new(target.url, route, resource, target.parent);
        self.commit(|state| {
            self.advance_generation();
            let action = if current_is_loading(state) {
                HistoryAction::Replace
            } else {
                HistoryAction::Push
            };
            record(state, entry, action);
            settle_status(state);
            Some(history_events(state, action))
        });
    }

    /// Loads the persisted stack and visited list. Returns `false` when
    /// nothing was stored.
    pub fn restore(&self) -> bool {
        let store = self.inner.store.as_ref();
        let key = &self.inner.settings.storage_key;
        let stack: Option<HistoryStack> =
            persistence::load_json(store, &persistence::history_key(key));
        let items: Option<Vec<HistoryListItem>> =
            persistence::load_json(store, &persistence::history_list_key(key));

        if stack.is_none() && items.is_none() {
            debug!("No persisted state under {}", key);
            return false;
        }

        let events = {
            let mut state = self.lock();
            self.advance_generation();
            if let Some(items) = items {
                state.history_list = HistoryList::from_items(items, self.inner.settings.history_limit);
            }
            let mut events = Vec::new();
            if let Some(stack) = stack.filter(|stack| !stack.is_empty()) {
                state.history = HistoryStack::from_parts(stack.entries().to_vec(), stack.cursor());
                settle_status(&mut state);
                events = history_events(&mut state, HistoryAction::Restore);
            }
            info!(
                "Restored {} history entries and {} visited items",
                state.history.len(),
                state.history_list.len()
            );
            events
        };
        self.inner.emitter.emit_all(events);
        true
    }

    /// Empties the visited list and drops every stack entry but the current.
    pub fn clear_history(&self) {
        self.commit(|state| {
            state.history_list.clear();
            state.history.collapse();
            info!("History cleared");
            Some(vec![BrowserEvent::HistoryClear])
        });
    }

    /// Forgets every resolution and loaded resource so the next `resolve()`
    /// fetches again.
    pub fn clear_cache(&self) {
        let mut state = self.lock();
        info!(
            "Clearing {} cache entries and {} resources",
            state.cache.len(),
            state.vault.len()
        );
        state.cache.clear();
        state.vault.clear();
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> ResolveState {
        self.lock().status.clone()
    }

    pub fn current(&self) -> Option<HistoryEntry> {
        self.lock().history.current().cloned()
    }

    pub fn history(&self) -> HistoryStack {
        self.lock().history.clone()
    }

    pub fn history_list(&self) -> Vec<HistoryListItem> {
        self.lock().history_list.items().to_vec()
    }

    pub fn can_go_back(&self) -> bool {
        self.lock().history.can_go_back()
    }

    pub fn can_go_forward(&self) -> bool {
        self.lock().history.can_go_forward()
    }

    pub fn cache_entry(&self, url: &str) -> Option<CacheEntry> {
        self.lock().cache.get(url).cloned()
    }

    pub fn resource(&self, id: &str) -> Option<Arc<Resource>> {
        self.lock().vault.get(id)
    }

    pub fn active_resource(&self) -> Option<ResourceRef> {
        self.lock().active_resource.clone()
    }

    pub fn active_collection(&self) -> Option<ResourceRef> {
        self.lock().active_collection.clone()
    }

    pub fn active_manifest(&self) -> Option<ResourceRef> {
        self.lock().active_manifest.clone()
    }

    pub fn emitter(&self) -> &Arc<Emitter> {
        &self.inner.emitter
    }

    pub fn settings(&self) -> &BrowserSettings {
        &self.inner.settings
    }
}

/// Resolves once the generation is no longer `generation`.
async fn superseded(receiver: &mut watch::Receiver<u64>, generation: u64) {
    loop {
        if *receiver.borrow_and_update() != generation {
            return;
        }
        if receiver.changed().await.is_err() {
            // Sender gone: nothing can supersede us any more
            std::future::pending::<()>().await;
        }
    }
}

// ============================================================================
// Transitions (all run under the state lock)
// ============================================================================

fn current_is_loading(state: &BrowserState) -> bool {
    state
        .history
        .current()
        .is_some_and(|current| routes::map_route(&current.route).kind == RouteKind::Loading)
}

/// Pushes `entry`, or overwrites the current one for `Replace`.
fn record(state: &mut BrowserState, entry: HistoryEntry, action: HistoryAction) {
    match action {
        HistoryAction::Replace => state.history.replace(entry),
        _ => state.history.push(entry),
    }
}

fn show_page(state: &mut BrowserState, request: &Request, action: HistoryAction) -> Vec<BrowserEvent> {
    let Some(route) = routes::builtin_route(&request.url) else {
        let message = format!("Unknown page: {}", request.url);
        return fail(state, request, message, action);
    };
    let entry = HistoryEntry::new(request.url.clone(), route, None, None);
    record(state, entry, action);
    state.status = ResolveState::Loaded {
        url: request.url.clone(),
    };
    history_events(state, action)
}

fn show_cached(
    state: &mut BrowserState,
    request: &Request,
    reference: ResourceRef,
    action: HistoryAction,
) -> Vec<BrowserEvent> {
    if !state.vault.contains(&reference.id) {
        let message = ResolveError::UnknownResource(reference.id).to_string();
        state.cache.set_error(&request.url, message.clone());
        return fail(state, request, message, action);
    }
    debug!("Cache hit for {}", request.url);
    show(state, request, reference, action)
}

fn show_fetched(state: &mut BrowserState, request: &Request, resource: Resource) -> Vec<BrowserEvent> {
    if !request.view_source && routes::route_for_type(&resource.kind).is_none() {
        let message =
            ResolveError::UnsupportedType(format!("no view for type {:?}", resource.kind))
                .to_string();
        state.cache.set_error(&request.url, message.clone());
        return fail(state, request, message, HistoryAction::Replace);
    }
    let reference = state.vault.load(resource).reference();
    state.cache.set_resource(&request.url, reference.clone());
    show(state, request, reference, HistoryAction::Replace)
}

/// Puts a resolved resource on screen and records the visit.
fn show(
    state: &mut BrowserState,
    request: &Request,
    reference: ResourceRef,
    action: HistoryAction,
) -> Vec<BrowserEvent> {
    let route = if request.view_source {
        Some(routes::view_source_route(&reference))
    } else {
        routes::resource_route(&reference, request.parent.as_ref())
    };
    let Some(route) = route else {
        let message =
            ResolveError::UnsupportedType(format!("no view for type {:?}", reference.kind))
                .to_string();
        state.cache.set_error(&request.url, message.clone());
        return fail(state, request, message, action);
    };

    let entry = HistoryEntry::new(
        request.target.clone(),
        route.clone(),
        Some(reference.id.clone()),
        request.parent.clone(),
    );
    let timestamp = entry.timestamp;
    record(state, entry, action);
    state.status = ResolveState::Loaded {
        url: request.target.clone(),
    };
    let mut events = history_events(state, action);

    if !request.view_source {
        let item = HistoryListItem {
            url: request.url.clone(),
            route,
            label: state.vault.get(&reference.id).and_then(|r| r.label.clone()),
            resource: reference,
            parent: request.parent.clone(),
            timestamp,
        };
        state.history_list.record(item.clone());
        events.push(BrowserEvent::HistoryPage { item });
    }
    events
}

fn start_loading(
    state: &mut BrowserState,
    request: &Request,
    force: bool,
    action: HistoryAction,
) -> Vec<BrowserEvent> {
    let failed_before = state
        .cache
        .get(&request.url)
        .is_some_and(|entry| entry.error.is_some());
    if force {
        state.cache.reset_retries(&request.url);
    }
    state.status = if failed_before {
        let retries = state.cache.get(&request.url).map_or(0, |entry| entry.retries);
        ResolveState::Retrying {
            url: request.url.clone(),
            attempt: retries + 1,
        }
    } else {
        ResolveState::Loading {
            url: request.url.clone(),
        }
    };

    let entry = HistoryEntry::new(
        request.target.clone(),
        routes::loading_route(&request.url, request.parent.as_ref()),
        None,
        request.parent.clone(),
    );
    record(state, entry, action);
    history_events(state, action)
}

fn fail(
    state: &mut BrowserState,
    request: &Request,
    message: String,
    action: HistoryAction,
) -> Vec<BrowserEvent> {
    warn!("Failed to resolve {}: {}", request.target, message);
    let entry = HistoryEntry::new(
        request.target.clone(),
        routes::not_found_route(&request.url, Some(&message)),
        None,
        request.parent.clone(),
    );
    record(state, entry, action);
    state.status = ResolveState::Error {
        url: request.target.clone(),
        message,
    };
    history_events(state, action)
}

/// Derives the status from the current entry after a pop or restore.
fn settle_status(state: &mut BrowserState) {
    let Some(entry) = state.history.current() else {
        state.status = ResolveState::Idle;
        return;
    };
    let target = routes::map_route(&entry.route);
    state.status = match target.kind {
        RouteKind::NotFound => ResolveState::Error {
            url: entry.url.clone(),
            message: target.error.unwrap_or_default(),
        },
        RouteKind::Loading => ResolveState::Idle,
        _ => ResolveState::Loaded {
            url: entry.url.clone(),
        },
    };
}

/// The history listener. Every stack movement goes through here, so back,
/// forward and restore report exactly what a fresh resolve would.
///
/// Order: `history.change`, then `resource.change`, `collection.change`,
/// `manifest.change` for whatever actually changed.
fn history_events(state: &mut BrowserState, action: HistoryAction) -> Vec<BrowserEvent> {
    let Some(entry) = state.history.current().cloned() else {
        return Vec::new();
    };
    let target = routes::map_route(&entry.route);
    let mut events = vec![BrowserEvent::HistoryChange {
        action,
        entry: entry.clone(),
        cursor: state.history.cursor(),
    }];
    if target.kind == RouteKind::Loading {
        return events;
    }

    let (resource, parent) = match target.kind {
        RouteKind::Collection | RouteKind::Manifest | RouteKind::Canvas => {
            (target.resource, target.parent.or(entry.parent))
        }
        _ => (None, None),
    };

    if resource != state.active_resource || parent != state.active_parent {
        state.active_resource = resource.clone();
        state.active_parent = parent.clone();
        events.push(BrowserEvent::ResourceChange {
            resource: resource.clone(),
            parent: parent.clone(),
        });
    }

    let collection = match &resource {
        Some(r) if r.is_collection() => Some(r.clone()),
        Some(r) if r.is_manifest() => parent.clone().filter(ResourceRef::is_collection),
        _ => None,
    };
    if let Some(collection) = collection
        && state.active_collection.as_ref() != Some(&collection)
    {
        let items = state
            .vault
            .get(&collection.id)
            .map(|record| record.items.clone())
            .unwrap_or_default();
        state.active_collection = Some(collection.clone());
        events.push(BrowserEvent::CollectionChange {
            collection: Some(collection),
            items,
        });
    }

    let manifest = match &resource {
        Some(r) if r.is_manifest() => Some(r.clone()),
        Some(r) if r.is_canvas() => parent.filter(ResourceRef::is_manifest),
        _ => None,
    };
    if let Some(manifest) = manifest
        && state.active_manifest.as_ref() != Some(&manifest)
    {
        state.active_manifest = Some(manifest.clone());
        events.push(BrowserEvent::ManifestChange {
            manifest: Some(manifest),
        });
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::EventTopic;
    use crate::core::persistence::MemoryStateStore;
    use crate::test_support::{
        EventRecorder, MockFetcher, canvas_json, collection_json, manifest_json, test_browser,
        test_browser_with_store,
    };

    const COLLECTION_ID: &str = "https://example.org/collection.json";
    const MANIFEST_A: &str = "https://example.org/a/manifest.json";
    const MANIFEST_B: &str = "https://example.org/b/manifest.json";

    #[tokio::test]
    async fn test_scheme_token_loads_without_fetch() {
        let fetcher = Arc::new(MockFetcher::new());
        let browser = test_browser(fetcher.clone());

        browser.resolve("iiif://about", ResolveOptions::default()).await;

        assert_eq!(
            browser.state(),
            ResolveState::Loaded {
                url: "iiif://about".to_string()
            }
        );
        assert_eq!(browser.current().unwrap().route, "/about");
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_scheme_token_is_not_found() {
        let browser = test_browser(Arc::new(MockFetcher::new()));
        browser.resolve("iiif://nowhere", ResolveOptions::default()).await;

        let current = browser.current().unwrap();
        assert!(current.route.starts_with("/not-found?id=iiif%3A%2F%2Fnowhere"));
        assert!(matches!(browser.state(), ResolveState::Error { .. }));
    }

    #[tokio::test]
    async fn test_unsupported_identifier() {
        let fetcher = Arc::new(MockFetcher::new());
        let browser = test_browser(fetcher.clone());
        browser.resolve("ftp://example.org/x", ResolveOptions::default()).await;

        match browser.state() {
            ResolveState::Error { message, .. } => {
                assert!(message.starts_with("Unsupported identifier"))
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert!(fetcher.calls().is_empty());
        assert!(browser.cache_entry("ftp://example.org/x").is_none());
    }

    #[tokio::test]
    async fn test_http_error_goes_to_not_found() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.fail("https://x/manifest.json", ResolveError::Http(404));
        let browser = test_browser(fetcher);

        browser
            .resolve("https://x/manifest.json", ResolveOptions::default())
            .await;

        let entry = browser.cache_entry("https://x/manifest.json").unwrap();
        assert_eq!(entry.error.as_deref(), Some("HTTP error 404"));
        assert!(entry.resource.is_none());
        assert_eq!(entry.retries, 1);

        let history = browser.history();
        assert_eq!(history.len(), 1, "the loading entry is replaced");
        assert!(
            history.current().unwrap().route.contains("id=https%3A%2F%2Fx%2Fmanifest.json")
        );
    }

    #[tokio::test]
    async fn test_success_caches_and_never_refetches() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(MANIFEST_A, manifest_json(MANIFEST_A, "Book A"));
        let browser = test_browser(fetcher.clone());

        browser.resolve(MANIFEST_A, ResolveOptions::default()).await;
        browser.resolve(MANIFEST_A, ResolveOptions::default()).await;
        browser.resolve(MANIFEST_A, ResolveOptions::default()).await;

        assert_eq!(fetcher.call_count(MANIFEST_A), 1);
        let entry = browser.cache_entry(MANIFEST_A).unwrap();
        assert!(entry.is_resolved());
        assert_eq!(entry.retries, 0);
        assert_eq!(browser.history().len(), 3);
        assert_eq!(browser.history_list().len(), 1);
        assert_eq!(browser.history_list()[0].label.as_deref(), Some("Book A"));

        browser.resolve(MANIFEST_A, ResolveOptions::forced()).await;
        assert_eq!(fetcher.call_count(MANIFEST_A), 2);
    }

    #[tokio::test]
    async fn test_retry_after_error() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.fail(MANIFEST_A, ResolveError::Http(500));
        let browser = test_browser(fetcher.clone());
        let recorder = EventRecorder::attach(browser.emitter());

        browser.resolve(MANIFEST_A, ResolveOptions::default()).await;
        browser.resolve(MANIFEST_A, ResolveOptions::default()).await;
        assert_eq!(browser.cache_entry(MANIFEST_A).unwrap().retries, 2);

        // Succeeds on the forced retry, which also resets the counter
        fetcher.respond(MANIFEST_A, manifest_json(MANIFEST_A, "Book A"));
        browser.resolve(MANIFEST_A, ResolveOptions::forced()).await;
        let entry = browser.cache_entry(MANIFEST_A).unwrap();
        assert!(entry.is_resolved());
        assert_eq!(entry.retries, 0);
        assert_eq!(fetcher.call_count(MANIFEST_A), 3);
        assert!(recorder.count(EventTopic::HistoryPage) == 1);
    }

    #[tokio::test]
    async fn test_retrying_state_while_refetching_failed_url() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.fail(MANIFEST_A, ResolveError::Http(500));
        let browser = test_browser(fetcher.clone());
        browser.resolve(MANIFEST_A, ResolveOptions::default()).await;

        let gate = fetcher.hold(MANIFEST_A);
        let observed = {
            let browser = browser.clone();
            async move {
                while fetcher.call_count(MANIFEST_A) < 2 {
                    tokio::task::yield_now().await;
                }
                let state = browser.state();
                gate.notify_one();
                state
            }
        };
        let (_, state) = tokio::join!(
            browser.resolve(MANIFEST_A, ResolveOptions::default()),
            observed
        );
        assert_eq!(
            state,
            ResolveState::Retrying {
                url: MANIFEST_A.to_string(),
                attempt: 2
            }
        );
    }

    #[tokio::test]
    async fn test_newer_resolve_supersedes_in_flight_request() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(MANIFEST_A, manifest_json(MANIFEST_A, "Book A"));
        fetcher.respond(MANIFEST_B, manifest_json(MANIFEST_B, "Book B"));
        let gate = fetcher.hold(MANIFEST_A);
        let browser = test_browser(fetcher.clone());
        let recorder = EventRecorder::attach(browser.emitter());

        let second = {
            let browser = browser.clone();
            let fetcher = fetcher.clone();
            async move {
                while fetcher.call_count(MANIFEST_A) == 0 {
                    tokio::task::yield_now().await;
                }
                browser.resolve(MANIFEST_B, ResolveOptions::default()).await;
                gate.notify_one();
            }
        };
        tokio::join!(browser.resolve(MANIFEST_A, ResolveOptions::default()), second);

        assert_eq!(
            browser.state(),
            ResolveState::Loaded {
                url: MANIFEST_B.to_string()
            }
        );
        assert!(browser.cache_entry(MANIFEST_A).is_none());
        assert!(browser.resource(MANIFEST_A).is_none());
        assert_eq!(browser.active_resource(), Some(ResourceRef::manifest(MANIFEST_B)));

        // The stale loading entry was reused, not left behind
        let history = browser.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history.current().unwrap().url, MANIFEST_B);
        assert_eq!(recorder.count(EventTopic::HistoryPage), 1);
    }

    fn stack_routes(browser: &Browser) -> Vec<String> {
        browser
            .history()
            .entries()
            .iter()
            .map(|entry| entry.route.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_page_visit_replaces_superseded_loading_entry() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(MANIFEST_A, manifest_json(MANIFEST_A, "Book A"));
        let gate = fetcher.hold(MANIFEST_A);
        let browser = test_browser(fetcher.clone());

        let about = {
            let browser = browser.clone();
            let fetcher = fetcher.clone();
            async move {
                while fetcher.call_count(MANIFEST_A) == 0 {
                    tokio::task::yield_now().await;
                }
                browser.resolve("iiif://about", ResolveOptions::default()).await;
                gate.notify_one();
            }
        };
        tokio::join!(browser.resolve(MANIFEST_A, ResolveOptions::default()), about);

        assert_eq!(stack_routes(&browser), vec!["/about"]);
        assert!(!browser.back());
        assert_eq!(
            browser.state(),
            ResolveState::Loaded {
                url: "iiif://about".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_cache_hit_replaces_superseded_loading_entry() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(MANIFEST_A, manifest_json(MANIFEST_A, "Book A"));
        fetcher.respond(MANIFEST_B, manifest_json(MANIFEST_B, "Book B"));
        let browser = test_browser(fetcher.clone());
        browser.resolve(MANIFEST_B, ResolveOptions::default()).await;
        let gate = fetcher.hold(MANIFEST_A);

        let cached = {
            let browser = browser.clone();
            let fetcher = fetcher.clone();
            async move {
                while fetcher.call_count(MANIFEST_A) == 0 {
                    tokio::task::yield_now().await;
                }
                browser.resolve(MANIFEST_B, ResolveOptions::default()).await;
                gate.notify_one();
            }
        };
        tokio::join!(browser.resolve(MANIFEST_A, ResolveOptions::default()), cached);

        let routes = stack_routes(&browser);
        assert_eq!(routes.len(), 2);
        assert!(routes.iter().all(|route| route.starts_with("/manifest?id=")));
        assert_eq!(fetcher.call_count(MANIFEST_B), 1);

        assert!(browser.back());
        assert_eq!(
            browser.state(),
            ResolveState::Loaded {
                url: MANIFEST_B.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_collection_then_child_manifest_events() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(
            COLLECTION_ID,
            collection_json(COLLECTION_ID, "Top", &[(MANIFEST_A, "Book A")]),
        );
        fetcher.respond(MANIFEST_A, manifest_json(MANIFEST_A, "Book A"));
        let browser = test_browser(fetcher);
        let recorder = EventRecorder::attach(browser.emitter());

        browser.resolve(COLLECTION_ID, ResolveOptions::default()).await;
        assert_eq!(
            recorder.topics(),
            vec![
                EventTopic::HistoryChange,
                EventTopic::HistoryChange,
                EventTopic::ResourceChange,
                EventTopic::CollectionChange,
                EventTopic::HistoryPage,
            ]
        );
        match recorder.last(EventTopic::CollectionChange) {
            Some(BrowserEvent::CollectionChange { items, .. }) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].id, MANIFEST_A);
            }
            other => panic!("unexpected {other:?}"),
        }

        recorder.clear();
        browser
            .resolve(
                MANIFEST_A,
                ResolveOptions::with_parent(ResourceRef::collection(COLLECTION_ID)),
            )
            .await;
        assert_eq!(
            recorder.topics(),
            vec![
                EventTopic::HistoryChange,
                EventTopic::HistoryChange,
                EventTopic::ResourceChange,
                EventTopic::ManifestChange,
                EventTopic::HistoryPage,
            ]
        );
        assert_eq!(browser.active_collection(), Some(ResourceRef::collection(COLLECTION_ID)));
        assert_eq!(browser.active_manifest(), Some(ResourceRef::manifest(MANIFEST_A)));
    }

    #[tokio::test]
    async fn test_canvas_route_carries_manifest() {
        let canvas_id = "https://example.org/a/canvas/1";
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(canvas_id, canvas_json(canvas_id, "p. 1"));
        let browser = test_browser(fetcher);

        browser
            .resolve(
                canvas_id,
                ResolveOptions::with_parent(ResourceRef::manifest(MANIFEST_A)),
            )
            .await;

        let route = browser.current().unwrap().route;
        assert!(route.starts_with("/canvas?id="));
        assert!(route.contains("&manifest="));
        assert_eq!(browser.active_manifest(), Some(ResourceRef::manifest(MANIFEST_A)));
    }

    #[tokio::test]
    async fn test_back_replays_resource_change() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(MANIFEST_A, manifest_json(MANIFEST_A, "Book A"));
        fetcher.respond(MANIFEST_B, manifest_json(MANIFEST_B, "Book B"));
        let browser = test_browser(fetcher);
        let recorder = EventRecorder::attach(browser.emitter());

        browser.resolve(MANIFEST_A, ResolveOptions::default()).await;
        let fresh = recorder.last(EventTopic::ResourceChange);
        browser.resolve(MANIFEST_B, ResolveOptions::default()).await;

        assert!(browser.back());
        assert_eq!(recorder.last(EventTopic::ResourceChange), fresh);
        assert_eq!(
            browser.state(),
            ResolveState::Loaded {
                url: MANIFEST_A.to_string()
            }
        );
        assert!(browser.can_go_forward());

        assert!(browser.forward());
        assert_eq!(browser.active_resource(), Some(ResourceRef::manifest(MANIFEST_B)));
        assert!(!browser.forward());
    }

    fn resource_changes(
        recorder: &EventRecorder,
    ) -> Vec<(Option<ResourceRef>, Option<ResourceRef>)> {
        recorder
            .events()
            .into_iter()
            .filter_map(|event| match event {
                BrowserEvent::ResourceChange { resource, parent } => Some((resource, parent)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_back_and_forward_replay_the_resolved_sequence() {
        let canvas_id = "https://example.org/a/canvas/1";
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(
            COLLECTION_ID,
            collection_json(COLLECTION_ID, "Top", &[(MANIFEST_A, "Book A")]),
        );
        fetcher.respond(MANIFEST_A, manifest_json(MANIFEST_A, "Book A"));
        fetcher.respond(canvas_id, canvas_json(canvas_id, "p. 1"));
        let browser = test_browser(fetcher);
        let recorder = EventRecorder::attach(browser.emitter());

        browser.resolve(COLLECTION_ID, ResolveOptions::default()).await;
        browser
            .resolve(
                MANIFEST_A,
                ResolveOptions::with_parent(ResourceRef::collection(COLLECTION_ID)),
            )
            .await;
        browser
            .resolve(
                canvas_id,
                ResolveOptions::with_parent(ResourceRef::manifest(MANIFEST_A)),
            )
            .await;
        let resolved = resource_changes(&recorder);
        assert_eq!(
            resolved,
            vec![
                (Some(ResourceRef::collection(COLLECTION_ID)), None),
                (
                    Some(ResourceRef::manifest(MANIFEST_A)),
                    Some(ResourceRef::collection(COLLECTION_ID))
                ),
                (
                    Some(ResourceRef::canvas(canvas_id)),
                    Some(ResourceRef::manifest(MANIFEST_A))
                ),
            ]
        );

        recorder.clear();
        assert!(browser.back());
        assert!(browser.back());
        assert!(!browser.can_go_back());
        assert_eq!(
            resource_changes(&recorder),
            vec![resolved[1].clone(), resolved[0].clone()]
        );

        recorder.clear();
        assert!(browser.forward());
        assert!(browser.forward());
        assert!(!browser.can_go_forward());
        assert_eq!(resource_changes(&recorder), resolved[1..].to_vec());
    }

    #[tokio::test]
    async fn test_push_mid_stack_discards_forward_entries() {
        let browser = test_browser(Arc::new(MockFetcher::new()));
        browser.resolve("iiif://home", ResolveOptions::default()).await;
        browser.resolve("iiif://about", ResolveOptions::default()).await;
        browser.resolve("iiif://history", ResolveOptions::default()).await;

        assert!(browser.go(-2));
        browser.navigate("/about");

        let routes: Vec<_> = browser
            .history()
            .entries()
            .iter()
            .map(|e| e.route.clone())
            .collect();
        assert_eq!(routes, vec!["/", "/about"]);
        assert!(!browser.can_go_forward());
    }

    #[tokio::test]
    async fn test_pop_to_moves_without_mutating() {
        let browser = test_browser(Arc::new(MockFetcher::new()));
        browser.resolve("iiif://home", ResolveOptions::default()).await;
        browser.resolve("iiif://about", ResolveOptions::default()).await;
        browser.resolve("iiif://history", ResolveOptions::default()).await;

        assert!(browser.pop_to("/"));
        assert_eq!(browser.history().cursor(), 0);
        assert_eq!(browser.history().len(), 3);
        assert!(!browser.pop_to("/missing"));
    }

    #[tokio::test]
    async fn test_view_source_route() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(MANIFEST_A, manifest_json(MANIFEST_A, "Book A"));
        let browser = test_browser(fetcher);

        browser
            .resolve(&format!("view-source:{MANIFEST_A}"), ResolveOptions::default())
            .await;

        let current = browser.current().unwrap();
        assert!(current.route.starts_with("/view-source?id="));
        assert!(current.route.contains("type=Manifest"));
        assert!(browser.history_list().is_empty());
        assert!(browser.cache_entry(MANIFEST_A).unwrap().is_resolved());
    }

    #[tokio::test]
    async fn test_unroutable_type_is_unsupported() {
        let annotation = "https://example.org/anno/1";
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(
            annotation,
            serde_json::json!({ "id": annotation, "type": "Annotation" }),
        );
        let browser = test_browser(fetcher);

        browser.resolve(annotation, ResolveOptions::default()).await;

        let entry = browser.cache_entry(annotation).unwrap();
        assert!(entry.error.unwrap().contains("Annotation"));
        assert!(browser.resource(annotation).is_none());
    }

    #[tokio::test]
    async fn test_persist_and_restore() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(MANIFEST_A, manifest_json(MANIFEST_A, "Book A"));
        let store = Arc::new(MemoryStateStore::new());

        let browser = test_browser_with_store(fetcher.clone(), store.clone());
        browser.resolve("iiif://home", ResolveOptions::default()).await;
        browser.resolve(MANIFEST_A, ResolveOptions::default()).await;
        assert!(store.get("test.history").is_some());
        assert!(store.get("test.history-list").is_some());

        let restored = test_browser_with_store(fetcher, store);
        let recorder = EventRecorder::attach(restored.emitter());
        assert!(restored.restore());
        assert_eq!(restored.history().len(), 2);
        assert_eq!(restored.history_list().len(), 1);
        assert_eq!(
            restored.state(),
            ResolveState::Loaded {
                url: MANIFEST_A.to_string()
            }
        );
        match recorder.last(EventTopic::HistoryChange) {
            Some(BrowserEvent::HistoryChange { action, cursor, .. }) => {
                assert_eq!(action, HistoryAction::Restore);
                assert_eq!(cursor, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    /// Reads the browser back from inside `save`.
    #[derive(Default)]
    struct ReentrantStore {
        browser: Mutex<Option<Browser>>,
        saved_routes: Mutex<Vec<Option<String>>>,
    }

    impl StateStore for ReentrantStore {
        fn load(&self, _key: &str) -> std::io::Result<Option<String>> {
            Ok(None)
        }

        fn save(&self, key: &str, _value: &str) -> std::io::Result<()> {
            let browser = self.browser.lock().unwrap().clone();
            if let Some(browser) = browser.filter(|_| key.ends_with(".history")) {
                let route = browser.current().map(|entry| entry.route);
                self.saved_routes.lock().unwrap().push(route);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_state_is_unlocked_while_persisting() {
        let store = Arc::new(ReentrantStore::default());
        let browser = Browser::new(
            Arc::new(MockFetcher::new()),
            Arc::new(Emitter::new()),
            store.clone(),
            BrowserSettings::default(),
        );
        *store.browser.lock().unwrap() = Some(browser.clone());

        browser.resolve("iiif://about", ResolveOptions::default()).await;
        browser.navigate("/history");

        assert_eq!(
            *store.saved_routes.lock().unwrap(),
            vec![Some("/about".to_string()), Some("/history".to_string())]
        );
    }

    #[tokio::test]
    async fn test_restore_with_nothing_stored() {
        let browser = test_browser(Arc::new(MockFetcher::new()));
        assert!(!browser.restore());
        assert_eq!(browser.state(), ResolveState::Idle);
    }

    #[tokio::test]
    async fn test_clear_history_keeps_current_entry() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(MANIFEST_A, manifest_json(MANIFEST_A, "Book A"));
        let browser = test_browser(fetcher);
        let recorder = EventRecorder::attach(browser.emitter());

        browser.resolve("iiif://home", ResolveOptions::default()).await;
        browser.resolve(MANIFEST_A, ResolveOptions::default()).await;
        browser.clear_history();

        assert!(browser.history_list().is_empty());
        assert_eq!(browser.history().len(), 1);
        assert_eq!(browser.current().unwrap().url, MANIFEST_A);
        assert_eq!(recorder.count(EventTopic::HistoryClear), 1);
    }

    #[tokio::test]
    async fn test_clear_cache_forces_refetch() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(MANIFEST_A, manifest_json(MANIFEST_A, "Book A"));
        let browser = test_browser(fetcher.clone());

        browser.resolve(MANIFEST_A, ResolveOptions::default()).await;
        browser.clear_cache();
        assert!(browser.cache_entry(MANIFEST_A).is_none());
        assert!(browser.resource(MANIFEST_A).is_none());
        browser.resolve(MANIFEST_A, ResolveOptions::default()).await;
        assert_eq!(fetcher.call_count(MANIFEST_A), 2);
        assert!(browser.resource(MANIFEST_A).is_some());
    }

    #[test]
    fn test_resolve_state_helpers() {
        let loading = ResolveState::Retrying {
            url: "u".into(),
            attempt: 2,
        };
        assert!(loading.is_loading());
        assert_eq!(loading.url(), Some("u"));
        assert!(!ResolveState::Idle.is_loading());
        assert_eq!(ResolveState::Idle.url(), None);
    }
}
