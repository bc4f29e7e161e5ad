use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::core::history::HistoryListItem;
use crate::core::resource::{ResourceRef, ResourceSummary};
use crate::core::routes;

/// Which population an item belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    /// Host-supplied items shown first on an empty query.
    Dynamic,
    History,
    Static,
    /// Host-supplied items that are only found by querying.
    Custom,
    Collection,
    /// Synthesized for a query that is itself a URL.
    External,
}

impl SearchSource {
    pub fn name(self) -> &'static str {
        match self {
            SearchSource::Dynamic => "dynamic",
            SearchSource::History => "history",
            SearchSource::Static => "static",
            SearchSource::Custom => "custom",
            SearchSource::Collection => "collection",
            SearchSource::External => "external",
        }
    }
}

impl fmt::Display for SearchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum SearchAction {
    OpenUrl { url: String },
    ClearHistory,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SearchItemKind {
    Action {
        action: SearchAction,
    },
    Resource {
        resource: ResourceRef,
        parent: Option<ResourceRef>,
        url: String,
        /// Display route, when the resource type has one.
        route: Option<String>,
    },
    Page {
        route: String,
        url: String,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchIndexItem {
    /// Unique within one index generation.
    pub id: String,
    pub label: String,
    pub sub_label: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub source: SearchSource,
    /// Static items listed on an empty query.
    #[serde(default)]
    pub always_show: bool,
    #[serde(flatten)]
    pub kind: SearchItemKind,
}

impl SearchIndexItem {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        source: SearchSource,
        kind: SearchItemKind,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            sub_label: None,
            keywords: Vec::new(),
            source,
            always_show: false,
            kind,
        }
    }

    pub fn with_sub_label(mut self, sub_label: impl Into<String>) -> Self {
        self.sub_label = Some(sub_label.into());
        self
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn shown_always(mut self) -> Self {
        self.always_show = true;
        self
    }

    /// A resource item, routed to its display view when it has one.
    pub fn resource(
        id: impl Into<String>,
        label: Option<&str>,
        resource: ResourceRef,
        parent: Option<ResourceRef>,
        source: SearchSource,
    ) -> Self {
        let route = routes::resource_route(&resource, parent.as_ref());
        let label = label.unwrap_or(&resource.id).to_string();
        let kind_name = resource.kind.clone();
        Self::new(
            id,
            label,
            source,
            SearchItemKind::Resource {
                url: resource.id.clone(),
                resource,
                parent,
                route,
            },
        )
        .with_sub_label(kind_name)
    }

    /// A visited resource from the history list.
    pub fn from_history(item: &HistoryListItem) -> Self {
        let mut search_item = Self::resource(
            format!("history:{}", item.url),
            item.label.as_deref(),
            item.resource.clone(),
            item.parent.clone(),
            SearchSource::History,
        );
        if let SearchItemKind::Resource { url, route, .. } = &mut search_item.kind {
            url.clone_from(&item.url);
            *route = Some(item.route.clone());
        }
        search_item
    }

    /// A direct child of the active collection.
    pub fn from_collection_child(collection: &ResourceRef, child: &ResourceSummary) -> Self {
        Self::resource(
            format!("collection:{}:{}", collection.id, child.id),
            child.label.as_deref(),
            child.reference(),
            Some(collection.clone()),
            SearchSource::Collection,
        )
    }

    /// The synthesized item for a query that is a full URL.
    pub fn open_url(url: &str) -> Self {
        Self::new(
            format!("external:{url}"),
            url,
            SearchSource::External,
            SearchItemKind::Action {
                action: SearchAction::OpenUrl {
                    url: url.to_string(),
                },
            },
        )
        .with_sub_label("Open URL")
    }

    pub fn url(&self) -> Option<&str> {
        match &self.kind {
            SearchItemKind::Resource { url, .. } | SearchItemKind::Page { url, .. } => Some(url),
            SearchItemKind::Action {
                action: SearchAction::OpenUrl { url },
            } => Some(url),
            SearchItemKind::Action { .. } => None,
        }
    }

    pub fn route(&self) -> Option<&str> {
        match &self.kind {
            SearchItemKind::Resource { route, .. } => route.as_deref(),
            SearchItemKind::Page { route, .. } => Some(route),
            SearchItemKind::Action { .. } => None,
        }
    }

    /// The type name indexed for this item.
    pub fn type_name(&self) -> &str {
        match &self.kind {
            SearchItemKind::Resource { resource, .. } => &resource.kind,
            SearchItemKind::Page { .. } => "Page",
            SearchItemKind::Action { .. } => "Action",
        }
    }
}

fn page(id: &str, label: &str, token: &str) -> SearchIndexItem {
    SearchIndexItem::new(
        format!("page:{id}"),
        label,
        SearchSource::Static,
        SearchItemKind::Page {
            route: routes::builtin_route(token).unwrap_or("/").to_string(),
            url: token.to_string(),
        },
    )
}

/// The fixed items every index starts with.
pub fn static_items() -> Vec<SearchIndexItem> {
    vec![
        page("home", "Home", routes::HOME)
            .with_keywords(&["start", "index"])
            .shown_always(),
        page("history", "History", routes::HISTORY)
            .with_keywords(&["recent", "visited"])
            .shown_always(),
        page("about", "About", routes::ABOUT).with_keywords(&["help", "info"]),
        SearchIndexItem::new(
            "action:clear-history",
            "Clear history",
            SearchSource::Static,
            SearchItemKind::Action {
                action: SearchAction::ClearHistory,
            },
        )
        .with_keywords(&["reset", "forget"]),
    ]
}
