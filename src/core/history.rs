//! # History
//!
//! Two structures back navigation:
//!
//! - [`HistoryStack`]: ordered, cursor-indexed entries with browser-style
//!   push/replace/pop semantics. A push from a non-tip cursor discards the
//!   entries after the cursor.
//! - [`HistoryList`]: a bounded, most-recent-first list of resolved resources,
//!   unique by URL. This is what the history page and search index show.
//!
//! Both serialize to the persisted layout directly; see `persistence`.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::resource::ResourceRef;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// How the stack moved to its current entry.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Push,
    Replace,
    Pop,
    Restore,
}

/// One navigation in the stack.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Canonical identifier or scheme token.
    pub url: String,
    /// Internal view path + query, used for replay.
    pub route: String,
    /// Normalized resource id; `None` until the fetch resolves.
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ResourceRef>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl HistoryEntry {
    pub fn new(
        url: impl Into<String>,
        route: impl Into<String>,
        resource: Option<String>,
        parent: Option<ResourceRef>,
    ) -> Self {
        Self {
            url: url.into(),
            route: route.into(),
            resource,
            parent,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HistoryStack {
    history: Vec<HistoryEntry>,
    cursor: usize,
}

impl HistoryStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a stack from persisted parts, clamping a stale cursor.
    pub fn from_parts(history: Vec<HistoryEntry>, cursor: usize) -> Self {
        let cursor = cursor.min(history.len().saturating_sub(1));
        Self { history, cursor }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn current(&self) -> Option<&HistoryEntry> {
        self.history.get(self.cursor)
    }

    /// Pushes after the cursor, discarding any forward entries.
    pub fn push(&mut self, entry: HistoryEntry) {
        if !self.history.is_empty() {
            self.history.truncate(self.cursor + 1);
        }
        self.history.push(entry);
        self.cursor = self.history.len() - 1;
    }

    /// Replaces the entry at the cursor (pushes onto an empty stack).
    pub fn replace(&mut self, entry: HistoryEntry) {
        match self.history.get_mut(self.cursor) {
            Some(current) => *current = entry,
            None => self.push(entry),
        }
    }

    /// Moves the cursor by `delta`. Out-of-range moves are ignored.
    pub fn go(&mut self, delta: isize) -> bool {
        let Some(target) = self.cursor.checked_add_signed(delta) else {
            return false;
        };
        if delta == 0 || target >= self.history.len() {
            return false;
        }
        self.cursor = target;
        true
    }

    pub fn can_go_back(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_go_forward(&self) -> bool {
        self.cursor + 1 < self.history.len()
    }

    /// Moves the cursor to the existing entry for `route` without touching the
    /// list. The entry nearest the cursor wins, looking backwards first.
    pub fn pop_to(&mut self, route: &str) -> bool {
        let behind = (0..self.cursor).rev();
        let ahead = self.cursor + 1..self.history.len();
        match behind
            .chain(ahead)
            .find(|&index| self.history[index].route == route)
        {
            Some(index) => {
                self.cursor = index;
                true
            }
            None => false,
        }
    }

    /// Drops every entry except the current one.
    pub fn collapse(&mut self) {
        if let Some(current) = self.history.get(self.cursor).cloned() {
            self.history = vec![current];
        }
        self.cursor = 0;
    }

    /// The `limit` most recent entries, cursor adjusted to match.
    pub fn snapshot(&self, limit: usize) -> HistoryStack {
        let dropped = self.history.len().saturating_sub(limit);
        HistoryStack::from_parts(
            self.history[dropped..].to_vec(),
            self.cursor.saturating_sub(dropped),
        )
    }
}

/// A resolved resource in the visited list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HistoryListItem {
    pub url: String,
    pub route: String,
    pub resource: ResourceRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ResourceRef>,
    pub label: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryList {
    items: Vec<HistoryListItem>,
    limit: usize,
}

impl Default for HistoryList {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl HistoryList {
    pub fn new(limit: usize) -> Self {
        Self {
            items: Vec::new(),
            limit,
        }
    }

    pub fn from_items(mut items: Vec<HistoryListItem>, limit: usize) -> Self {
        items.truncate(limit);
        Self { items, limit }
    }

    /// Moves (or inserts) the item to the front, trimming to the limit.
    pub fn record(&mut self, item: HistoryListItem) {
        self.items.retain(|existing| existing.url != item.url);
        self.items.insert(0, item);
        self.items.truncate(self.limit);
    }

    pub fn items(&self) -> &[HistoryListItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(route: &str) -> HistoryEntry {
        HistoryEntry::new(route, route, None, None)
    }

    fn routes(stack: &HistoryStack) -> Vec<&str> {
        stack.entries().iter().map(|e| e.route.as_str()).collect()
    }

    fn visited(url: &str) -> HistoryListItem {
        HistoryListItem {
            url: url.into(),
            route: format!("/manifest?id={url}"),
            resource: ResourceRef::manifest(url),
            parent: None,
            label: None,
            timestamp: 0,
        }
    }

    #[test]
    fn test_push_moves_cursor_to_tip() {
        let mut stack = HistoryStack::new();
        stack.push(entry("/a"));
        stack.push(entry("/b"));
        assert_eq!(stack.cursor(), 1);
        assert_eq!(stack.current().unwrap().route, "/b");
    }

    #[test]
    fn test_push_from_middle_discards_forward_entries() {
        let mut stack = HistoryStack::new();
        for route in ["/a", "/b", "/c"] {
            stack.push(entry(route));
        }
        assert!(stack.go(-2));
        stack.push(entry("/d"));
        assert_eq!(routes(&stack), vec!["/a", "/d"]);
        assert_eq!(stack.cursor(), 1);
        assert!(!stack.can_go_forward());
    }

    #[test]
    fn test_replace_at_cursor() {
        let mut stack = HistoryStack::new();
        stack.replace(entry("/first"));
        assert_eq!(stack.len(), 1);
        stack.push(entry("/loading"));
        stack.replace(entry("/manifest"));
        assert_eq!(routes(&stack), vec!["/first", "/manifest"]);
    }

    #[test]
    fn test_go_ignores_out_of_range() {
        let mut stack = HistoryStack::new();
        stack.push(entry("/a"));
        stack.push(entry("/b"));
        assert!(!stack.go(1));
        assert!(!stack.go(-2));
        assert!(!stack.go(0));
        assert!(stack.go(-1));
        assert!(stack.can_go_forward());
        assert!(!stack.can_go_back());
    }

    #[test]
    fn test_pop_to_moves_cursor_without_mutating() {
        let mut stack = HistoryStack::new();
        for route in ["/a", "/b", "/c", "/b"] {
            stack.push(entry(route));
        }
        assert!(stack.go(-1)); // cursor at "/c" (index 2)
        assert!(stack.pop_to("/b"));
        assert_eq!(stack.cursor(), 1, "nearest entry behind the cursor wins");
        assert_eq!(routes(&stack), vec!["/a", "/b", "/c", "/b"]);

        assert!(stack.pop_to("/c"));
        assert_eq!(stack.cursor(), 2);
        assert!(!stack.pop_to("/missing"));
    }

    #[test]
    fn test_snapshot_keeps_most_recent_and_adjusts_cursor() {
        let mut stack = HistoryStack::new();
        for i in 0..5 {
            stack.push(entry(&format!("/{i}")));
        }
        let snapshot = stack.snapshot(3);
        assert_eq!(routes(&snapshot), vec!["/2", "/3", "/4"]);
        assert_eq!(snapshot.cursor(), 2);

        stack.go(-4);
        assert_eq!(stack.snapshot(3).cursor(), 0);
    }

    #[test]
    fn test_from_parts_clamps_cursor() {
        let stack = HistoryStack::from_parts(vec![entry("/a")], 7);
        assert_eq!(stack.cursor(), 0);
        let empty = HistoryStack::from_parts(vec![], 3);
        assert!(empty.current().is_none());
    }

    #[test]
    fn test_collapse_keeps_current() {
        let mut stack = HistoryStack::new();
        for route in ["/a", "/b", "/c"] {
            stack.push(entry(route));
        }
        stack.go(-1);
        stack.collapse();
        assert_eq!(routes(&stack), vec!["/b"]);
        assert_eq!(stack.cursor(), 0);
    }

    #[test]
    fn test_persisted_layout() {
        let mut stack = HistoryStack::new();
        stack.push(entry("/a"));
        let json = serde_json::to_value(&stack).unwrap();
        assert!(json["history"].is_array());
        assert_eq!(json["cursor"], 0);
        assert!(json["history"][0].get("parent").is_none());
    }

    #[test]
    fn test_history_list_is_unique_most_recent_first() {
        let mut list = HistoryList::new(2);
        list.record(visited("https://x/1"));
        list.record(visited("https://x/2"));
        list.record(visited("https://x/1"));
        let urls: Vec<_> = list.items().iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["https://x/1", "https://x/2"]);

        list.record(visited("https://x/3"));
        assert_eq!(list.len(), 2);
        assert_eq!(list.items()[0].url, "https://x/3");
    }

    #[test]
    fn test_history_list_from_items_respects_limit() {
        let items = (0..5).map(|i| visited(&format!("https://x/{i}"))).collect();
        let list = HistoryList::from_items(items, 3);
        assert_eq!(list.len(), 3);
    }
}
