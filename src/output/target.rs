use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::output::selection::SelectedItem;

/// Supported-type marker for targets that work with any selection.
pub const ALL_TYPES: &str = "All";

/// What a target is run against.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSubject {
    Single(SelectedItem),
    /// Several items, all of one type.
    Multiple(Vec<SelectedItem>),
}

impl OutputSubject {
    /// `None` for an empty selection.
    pub fn from_selection(mut items: Vec<SelectedItem>) -> Option<Self> {
        match items.len() {
            0 => None,
            1 => items.pop().map(OutputSubject::Single),
            _ => Some(OutputSubject::Multiple(items)),
        }
    }

    pub fn items(&self) -> &[SelectedItem] {
        match self {
            OutputSubject::Single(item) => std::slice::from_ref(item),
            OutputSubject::Multiple(items) => items,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputError {
    NoSelection,
    UnknownTarget(String),
    /// The target does not support the current selection.
    Unavailable(String),
    Format(String),
    Action(String),
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputError::NoSelection => write!(f, "Nothing is selected"),
            OutputError::UnknownTarget(id) => write!(f, "Unknown output target: {id}"),
            OutputError::Unavailable(id) => {
                write!(f, "Output target {id} does not support the selection")
            }
            OutputError::Format(msg) => write!(f, "Format error: {msg}"),
            OutputError::Action(msg) => write!(f, "Action error: {msg}"),
        }
    }
}

impl std::error::Error for OutputError {}

/// Turns a selection into an exportable value (a URL, JSON, a content
/// state...).
#[async_trait]
pub trait OutputFormat: Send + Sync {
    async fn format(
        &self,
        subject: &OutputSubject,
        options: &Value,
        context: &Value,
    ) -> Result<Value, OutputError>;
}

/// Delivers a formatted value somewhere (clipboard, download, callback...).
#[async_trait]
pub trait OutputAction: Send + Sync {
    async fn run(
        &self,
        value: Value,
        subject: &OutputSubject,
        options: &Value,
        context: &Value,
    ) -> Result<(), OutputError>;
}

/// A format + action pair offered for exporting the selection.
#[derive(Clone)]
pub struct OutputTarget {
    pub id: String,
    pub label: String,
    /// Resource types, `<Type>List` for uniform multi-selections, or `All`.
    pub supported_types: Vec<String>,
    pub format: Arc<dyn OutputFormat>,
    pub format_options: Value,
    pub action: Arc<dyn OutputAction>,
    pub target_options: Value,
}

impl fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputTarget")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("supported_types", &self.supported_types)
            .finish()
    }
}

impl OutputTarget {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        supported_types: &[&str],
        format: Arc<dyn OutputFormat>,
        action: Arc<dyn OutputAction>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            supported_types: supported_types.iter().map(|t| t.to_string()).collect(),
            format,
            format_options: Value::Null,
            action,
            target_options: Value::Null,
        }
    }

    pub fn with_format_options(mut self, options: Value) -> Self {
        self.format_options = options;
        self
    }

    pub fn with_target_options(mut self, options: Value) -> Self {
        self.target_options = options;
        self
    }

    fn declares(&self, kind: &str) -> bool {
        self.supported_types.iter().any(|t| t == kind)
    }

    /// Whether this target can run against `selection`.
    pub fn supports(&self, selection: &[SelectedItem]) -> bool {
        if self.declares(ALL_TYPES) {
            return true;
        }
        match selection {
            [] => false,
            [single] => self.declares(single.kind()),
            [first, rest @ ..] => {
                rest.iter().all(|item| item.kind() == first.kind())
                    && self.declares(&format!("{}List", first.kind()))
            }
        }
    }
}
