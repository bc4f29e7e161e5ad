use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use serde_json::Value;

use crate::core::events::{BrowserEvent, Emitter, EventTopic, SubscriptionId};
use crate::output::selection::{LinkConfig, SelectedItem, SelectionState};
use crate::output::target::{OutputError, OutputSubject, OutputTarget};

#[derive(Debug)]
struct OutputState {
    selection: SelectionState,
    /// Ids of the targets that support the current selection.
    available: Vec<String>,
}

/// The selection and the export targets it makes available.
#[derive(Debug)]
pub struct OutputStore {
    state: Mutex<OutputState>,
    targets: Vec<Arc<OutputTarget>>,
}

impl OutputStore {
    pub fn new(links: LinkConfig, targets: Vec<OutputTarget>) -> Self {
        let store = Self {
            state: Mutex::new(OutputState {
                selection: SelectionState::new(links),
                available: Vec::new(),
            }),
            targets: targets.into_iter().map(Arc::new).collect(),
        };
        store.update(|_| true);
        store
    }

    /// Follows `resource.change` so the routed resource becomes the default
    /// item.
    pub fn attach(self: &Arc<Self>, emitter: &Emitter) -> SubscriptionId {
        let store = Arc::clone(self);
        emitter.subscribe(EventTopic::ResourceChange, move |event| {
            if let BrowserEvent::ResourceChange { resource, parent } = event {
                let item = resource
                    .clone()
                    .map(|resource| SelectedItem::new(resource, parent.clone()));
                store.set_default_item(item);
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, OutputState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies a selection mutation, then recomputes the available targets.
    fn update<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut SelectionState) -> bool,
    {
        let mut state = self.lock();
        let changed = mutate(&mut state.selection);
        let selected = state.selection.selected_items();
        state.available = self
            .targets
            .iter()
            .filter(|target| target.supports(&selected))
            .map(|target| target.id.clone())
            .collect();
        debug!(
            "{} item(s) selected, {} target(s) available",
            selected.len(),
            state.available.len()
        );
        changed
    }

    pub fn select_item(&self, item: SelectedItem) -> bool {
        self.update(|selection| selection.select_item(item))
    }

    pub fn toggle_item_selection(&self, item: SelectedItem, multi: bool) -> bool {
        self.update(|selection| selection.toggle_item_selection(item, multi))
    }

    pub fn deselect_item(&self, id: &str) -> bool {
        self.update(|selection| selection.deselect_item(id))
    }

    pub fn replace_selected_items(&self, items: Vec<SelectedItem>) {
        self.update(|selection| {
            selection.replace_selected_items(items);
            true
        });
    }

    pub fn set_default_item(&self, item: Option<SelectedItem>) {
        self.update(|selection| {
            selection.set_default_item(item);
            true
        });
    }

    pub fn selected_items(&self) -> Vec<SelectedItem> {
        self.lock().selection.selected_items()
    }

    pub fn default_item(&self) -> Option<SelectedItem> {
        self.lock().selection.default_item().cloned()
    }

    pub fn was_manually_selected(&self) -> bool {
        self.lock().selection.was_manually_selected()
    }

    pub fn available_targets(&self) -> Vec<Arc<OutputTarget>> {
        let state = self.lock();
        self.targets
            .iter()
            .filter(|target| state.available.contains(&target.id))
            .cloned()
            .collect()
    }

    /// Formats the selection with the target's format, then hands the value
    /// to its action. A format error stops before the action runs.
    pub async fn run_target(&self, id: &str, context: &Value) -> Result<(), OutputError> {
        let (target, subject) = {
            let state = self.lock();
            let target = self
                .targets
                .iter()
                .find(|target| target.id == id)
                .cloned()
                .ok_or_else(|| OutputError::UnknownTarget(id.to_string()))?;
            if !state.available.contains(&target.id) {
                return Err(OutputError::Unavailable(id.to_string()));
            }
            let subject = OutputSubject::from_selection(state.selection.selected_items())
                .ok_or(OutputError::NoSelection)?;
            (target, subject)
        };

        info!(
            "Running output target {} on {} item(s)",
            target.id,
            subject.items().len()
        );
        let value = target
            .format
            .format(&subject, &target.format_options, context)
            .await
            .inspect_err(|e| warn!("Output target {} failed to format: {}", target.id, e))?;
        target
            .action
            .run(value, &subject, &target.target_options, context)
            .await
            .inspect_err(|e| warn!("Output target {} failed: {}", target.id, e))
    }
}
