//! # Routes
//!
//! Internal view paths and the mapping between them and canonical identifiers.
//!
//! ```text
//! iiif://home           ⇄  /
//! iiif://about          ⇄  /about
//! iiif://history        ⇄  /history
//! https://…/c.json      ⇄  /collection?id=…
//! https://…/m.json      ⇄  /manifest?id=…
//! https://…/canvas/1    ⇄  /canvas?id=…&manifest=…
//! view-source:https://… ⇄  /view-source?id=…&type=…
//! (in flight)              /loading?id=…
//! (failed)                 /not-found?id=…&error=…
//! ```
//!
//! [`map_to_route`] is pure and total: every (path, query) pair maps to a
//! target, unknown paths fall back to not-found.

use url::Url;
use url::form_urlencoded;

use crate::core::resource::{CANVAS, COLLECTION, MANIFEST, ResourceRef};

pub const SCHEME_PREFIX: &str = "iiif://";
pub const VIEW_SOURCE_PREFIX: &str = "view-source:";

pub const HOME: &str = "iiif://home";
pub const ABOUT: &str = "iiif://about";
pub const HISTORY: &str = "iiif://history";
pub const NOT_FOUND: &str = "iiif://not-found";

pub const LOADING_PATH: &str = "/loading";
pub const NOT_FOUND_PATH: &str = "/not-found";
pub const VIEW_SOURCE_PATH: &str = "/view-source";

/// What kind of view a route renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKind {
    Home,
    About,
    History,
    Collection,
    Manifest,
    Canvas,
    ViewSource,
    Loading,
    NotFound,
}

/// Built-in pages reachable through scheme tokens.
const BUILTIN_ROUTES: &[(&str, &str, RouteKind)] = &[
    (HOME, "/", RouteKind::Home),
    (ABOUT, "/about", RouteKind::About),
    (HISTORY, "/history", RouteKind::History),
];

/// Display routes for resource types that have a view.
const TYPE_ROUTES: &[(&str, &str, RouteKind)] = &[
    (COLLECTION, "/collection", RouteKind::Collection),
    (MANIFEST, "/manifest", RouteKind::Manifest),
    (CANVAS, "/canvas", RouteKind::Canvas),
];

/// The canonical identifier and resource a route points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub kind: RouteKind,
    pub url: String,
    pub resource: Option<ResourceRef>,
    pub parent: Option<ResourceRef>,
    /// Error message carried by not-found routes.
    pub error: Option<String>,
}

impl RouteTarget {
    fn page(kind: RouteKind, url: &str) -> Self {
        Self {
            kind,
            url: url.to_string(),
            resource: None,
            parent: None,
            error: None,
        }
    }

    fn not_found(id: Option<String>, error: Option<String>) -> Self {
        Self {
            kind: RouteKind::NotFound,
            url: id.unwrap_or_else(|| NOT_FOUND.to_string()),
            resource: None,
            parent: None,
            error,
        }
    }
}

pub fn is_scheme_token(target: &str) -> bool {
    target.starts_with(SCHEME_PREFIX)
}

/// True for absolute `http(s)` identifiers with a host.
pub fn is_network_identifier(target: &str) -> bool {
    match Url::parse(target) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host().is_some(),
        Err(_) => false,
    }
}

/// Looks up a scheme token in the built-in route table.
pub fn builtin_route(token: &str) -> Option<&'static str> {
    BUILTIN_ROUTES
        .iter()
        .find(|(candidate, _, _)| *candidate == token)
        .map(|(_, route, _)| *route)
}

/// Display path for a resource type, `None` when the type has no view.
pub fn route_for_type(kind: &str) -> Option<&'static str> {
    TYPE_ROUTES
        .iter()
        .find(|(candidate, _, _)| *candidate == kind)
        .map(|(_, path, _)| *path)
}

fn encode(pairs: &[(&str, &str)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Display route for a resolved resource.
///
/// Canvases remember their manifest so the view (and replay) can restore it.
pub fn resource_route(resource: &ResourceRef, parent: Option<&ResourceRef>) -> Option<String> {
    let path = route_for_type(&resource.kind)?;
    let query = match parent {
        Some(parent) if resource.is_canvas() && parent.is_manifest() => {
            encode(&[("id", resource.id.as_str()), ("manifest", parent.id.as_str())])
        }
        _ => encode(&[("id", resource.id.as_str())]),
    };
    Some(format!("{path}?{query}"))
}

pub fn view_source_route(resource: &ResourceRef) -> String {
    format!(
        "{VIEW_SOURCE_PATH}?{}",
        encode(&[("id", resource.id.as_str()), ("type", resource.kind.as_str())])
    )
}

pub fn loading_route(id: &str, parent: Option<&ResourceRef>) -> String {
    let query = match parent {
        Some(parent) => encode(&[
            ("id", id),
            ("parent", parent.id.as_str()),
            ("parent-type", parent.kind.as_str()),
        ]),
        None => encode(&[("id", id)]),
    };
    format!("{LOADING_PATH}?{query}")
}

pub fn not_found_route(id: &str, error: Option<&str>) -> String {
    let query = match error {
        Some(error) => encode(&[("id", id), ("error", error)]),
        None => encode(&[("id", id)]),
    };
    format!("{NOT_FOUND_PATH}?{query}")
}

/// Splits a route into its path and (possibly empty) query string.
pub fn split_route(route: &str) -> (&str, &str) {
    match route.split_once('?') {
        Some((path, query)) => (path, query),
        None => (route, ""),
    }
}

fn query_param(query: &str, key: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(candidate, _)| candidate == key)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Maps a view path and query back to the identifier and resource it shows.
pub fn map_to_route(path: &str, query: &str) -> RouteTarget {
    if let Some((token, _, kind)) = BUILTIN_ROUTES.iter().find(|(_, p, _)| *p == path) {
        return RouteTarget::page(*kind, token);
    }

    let id = query_param(query, "id");

    if let Some((kind_name, _, kind)) = TYPE_ROUTES.iter().find(|(_, p, _)| *p == path) {
        let Some(id) = id else {
            return RouteTarget::not_found(None, Some(format!("Missing id for {kind_name}")));
        };
        let parent = match kind {
            RouteKind::Canvas => query_param(query, "manifest").map(ResourceRef::manifest),
            _ => None,
        };
        return RouteTarget {
            kind: *kind,
            url: id.clone(),
            resource: Some(ResourceRef::new(id, *kind_name)),
            parent,
            error: None,
        };
    }

    match path {
        VIEW_SOURCE_PATH => match (id, query_param(query, "type")) {
            (Some(id), kind) => RouteTarget {
                kind: RouteKind::ViewSource,
                url: format!("{VIEW_SOURCE_PREFIX}{id}"),
                resource: kind.map(|kind| ResourceRef::new(id, kind)),
                parent: None,
                error: None,
            },
            (None, _) => RouteTarget::not_found(None, None),
        },
        LOADING_PATH => match id {
            Some(id) => RouteTarget {
                kind: RouteKind::Loading,
                url: id,
                resource: None,
                parent: match (query_param(query, "parent"), query_param(query, "parent-type")) {
                    (Some(parent), Some(kind)) => Some(ResourceRef::new(parent, kind)),
                    _ => None,
                },
                error: None,
            },
            None => RouteTarget::not_found(None, None),
        },
        NOT_FOUND_PATH => RouteTarget::not_found(id, query_param(query, "error")),
        _ => RouteTarget::not_found(None, None),
    }
}

/// [`map_to_route`] over a full route string.
pub fn map_route(route: &str) -> RouteTarget {
    let (path, query) = split_route(route);
    map_to_route(path, query)
}
