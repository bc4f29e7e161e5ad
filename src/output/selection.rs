use serde::{Deserialize, Serialize};

use crate::core::resource::{CANVAS, COLLECTION, MANIFEST, ResourceRef};

/// Which resource types may be selected for output.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    pub can_select_canvas: bool,
    pub can_select_manifest: bool,
    pub can_select_collection: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            can_select_canvas: true,
            can_select_manifest: true,
            can_select_collection: true,
        }
    }
}

impl LinkConfig {
    /// Types other than the three selectable ones are never admitted.
    pub fn allows(&self, kind: &str) -> bool {
        match kind {
            CANVAS => self.can_select_canvas,
            MANIFEST => self.can_select_manifest,
            COLLECTION => self.can_select_collection,
            _ => false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SelectedItem {
    pub resource: ResourceRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ResourceRef>,
}

impl SelectedItem {
    pub fn new(resource: ResourceRef, parent: Option<ResourceRef>) -> Self {
        Self { resource, parent }
    }

    pub fn id(&self) -> &str {
        &self.resource.id
    }

    pub fn kind(&self) -> &str {
        &self.resource.kind
    }
}

/// Ordered, id-unique selection plus the routed resource it falls back to.
///
/// Every mutation silently drops items [`LinkConfig`] does not admit.
#[derive(Debug, Clone, Default)]
pub struct SelectionState {
    links: LinkConfig,
    selected: Vec<SelectedItem>,
    default_item: Option<SelectedItem>,
    manual: bool,
}

impl SelectionState {
    pub fn new(links: LinkConfig) -> Self {
        Self {
            links,
            ..Default::default()
        }
    }

    fn admits(&self, item: &SelectedItem) -> bool {
        self.links.allows(item.kind())
    }

    fn contains(&self, id: &str) -> bool {
        self.selected.iter().any(|selected| selected.id() == id)
    }

    /// Appends `item`, or makes it the only item when nothing was picked by
    /// hand yet.
    pub fn select_item(&mut self, item: SelectedItem) -> bool {
        if !self.admits(&item) {
            return false;
        }
        if !self.manual {
            self.selected = vec![item];
            self.manual = true;
            return true;
        }
        if self.contains(item.id()) {
            return false;
        }
        self.selected.push(item);
        true
    }

    /// Deselects a selected item; otherwise selects it, alongside the current
    /// selection when `multi` is set.
    pub fn toggle_item_selection(&mut self, item: SelectedItem, multi: bool) -> bool {
        if !self.admits(&item) {
            return false;
        }
        if self.manual && self.contains(item.id()) {
            return self.deselect_item(item.id());
        }
        if multi && self.manual {
            self.selected.push(item);
        } else {
            self.selected = vec![item];
            self.manual = true;
        }
        true
    }

    /// Removes an item. An emptied selection reverts to the default item.
    pub fn deselect_item(&mut self, id: &str) -> bool {
        let before = self.selected.len();
        self.selected.retain(|selected| selected.id() != id);
        if self.selected.is_empty() {
            self.manual = false;
        }
        self.selected.len() != before
    }

    pub fn replace_selected_items(&mut self, items: Vec<SelectedItem>) {
        let mut selected: Vec<SelectedItem> = Vec::with_capacity(items.len());
        for item in items {
            if self.admits(&item) && !selected.iter().any(|s| s.id() == item.id()) {
                selected.push(item);
            }
        }
        self.manual = !selected.is_empty();
        self.selected = selected;
    }

    /// Follows navigation. Resets the selection unless it was made by hand.
    pub fn set_default_item(&mut self, item: Option<SelectedItem>) {
        self.default_item = item;
        if !self.manual {
            self.selected.clear();
        }
    }

    /// The manual selection, or the admissible default item.
    pub fn selected_items(&self) -> Vec<SelectedItem> {
        if !self.selected.is_empty() {
            return self.selected.clone();
        }
        self.default_item
            .iter()
            .filter(|item| self.admits(item))
            .cloned()
            .collect()
    }

    pub fn default_item(&self) -> Option<&SelectedItem> {
        self.default_item.as_ref()
    }

    pub fn was_manually_selected(&self) -> bool {
        self.manual
    }
}
