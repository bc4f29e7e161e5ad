use serde::{Deserialize, Serialize};

pub const COLLECTION: &str = "Collection";
pub const MANIFEST: &str = "Manifest";
pub const CANVAS: &str = "Canvas";

/// Identity of a resource: its canonical id and IIIF type.
///
/// Never mutated after creation. A reload replaces the whole value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ResourceRef {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
        }
    }

    pub fn collection(id: impl Into<String>) -> Self {
        Self::new(id, COLLECTION)
    }

    pub fn manifest(id: impl Into<String>) -> Self {
        Self::new(id, MANIFEST)
    }

    pub fn canvas(id: impl Into<String>) -> Self {
        Self::new(id, CANVAS)
    }

    pub fn is_collection(&self) -> bool {
        self.kind == COLLECTION
    }

    pub fn is_manifest(&self) -> bool {
        self.kind == MANIFEST
    }

    pub fn is_canvas(&self) -> bool {
        self.kind == CANVAS
    }
}

/// A direct child of a resource (collection member, manifest canvas).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResourceSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: Option<String>,
}

impl ResourceSummary {
    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(self.id.clone(), self.kind.clone())
    }
}

/// A normalized resource as held by the resource store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub items: Vec<ResourceSummary>,
    /// The JSON body as fetched, kept for view-source and output formats.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl Resource {
    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(self.id.clone(), self.kind.clone())
    }

    /// Label for display, falling back to the id.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}
