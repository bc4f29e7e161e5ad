//! # Resource Cache
//!
//! The single source of truth for "have we already resolved this URL".
//!
//! Entries are created lazily on the first resolution attempt and are
//! overwritten, never appended, on retry. Nothing is evicted except by
//! [`ResourceCache::clear`].

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::resource::ResourceRef;

/// Outcome of the last resolution attempt for one identifier.
///
/// `error.is_some()` implies `resource.is_none()`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub url: String,
    pub resource: Option<ResourceRef>,
    pub error: Option<String>,
    /// Failed attempts since the last success or forced retry.
    pub retries: u32,
}

impl CacheEntry {
    pub fn is_resolved(&self) -> bool {
        self.error.is_none() && self.resource.is_some()
    }
}

#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: HashMap<String, CacheEntry>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    /// Records a successful resolution.
    ///
    /// When the normalized id differs from the requested URL (redirects,
    /// `info.json` style aliases) the canonical id is cached too, so either
    /// spelling is a hit afterwards.
    pub fn set_resource(&mut self, url: &str, resource: ResourceRef) {
        if resource.id != url {
            self.entries.insert(
                resource.id.clone(),
                CacheEntry {
                    url: resource.id.clone(),
                    resource: Some(resource.clone()),
                    error: None,
                    retries: 0,
                },
            );
        }
        self.entries.insert(
            url.to_string(),
            CacheEntry {
                url: url.to_string(),
                resource: Some(resource),
                error: None,
                retries: 0,
            },
        );
    }

    /// Records a failed attempt, clearing any previously cached resource.
    pub fn set_error(&mut self, url: &str, error: impl Into<String>) {
        let retries = self
            .entries
            .get(url)
            .map(|entry| entry.retries + 1)
            .unwrap_or(1);
        let error = error.into();
        debug!("Cache error for {} (attempt {}): {}", url, retries, error);
        self.entries.insert(
            url.to_string(),
            CacheEntry {
                url: url.to_string(),
                resource: None,
                error: Some(error),
                retries,
            },
        );
    }

    /// Resets the retry counter ahead of a forced re-attempt.
    pub fn reset_retries(&mut self, url: &str) {
        if let Some(entry) = self.entries.get_mut(url) {
            entry.retries = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
