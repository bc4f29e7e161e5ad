use std::fmt;

use async_trait::async_trait;

/// Errors that can occur while resolving a resource.
///
/// Every variant except `Aborted` ends up as a cache error entry and a
/// not-found route. `Aborted` means a newer request superseded this one and
/// is never surfaced.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveError {
    /// Transport-level failure (DNS, connection refused, timeout).
    Network(String),
    /// The server answered with a non-2xx status.
    Http(u16),
    /// The response was not JSON / JSON-LD.
    ContentType(String),
    /// The body could not be parsed as JSON.
    Parse(String),
    /// No id/type could be read, or the type has no view.
    UnsupportedType(String),
    /// The cache claims success but the resource store has no record.
    UnknownResource(String),
    Aborted,
}

impl ResolveError {
    pub fn is_abort(&self) -> bool {
        matches!(self, ResolveError::Aborted)
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::Network(msg) => write!(f, "Network error: {msg}"),
            ResolveError::Http(status) => write!(f, "HTTP error {status}"),
            ResolveError::ContentType(content_type) => {
                write!(f, "Unexpected content type: {content_type}")
            }
            ResolveError::Parse(msg) => write!(f, "Invalid JSON: {msg}"),
            ResolveError::UnsupportedType(msg) => write!(f, "Unsupported resource: {msg}"),
            ResolveError::UnknownResource(id) => write!(f, "Unknown resource: {id}"),
            ResolveError::Aborted => write!(f, "Request superseded"),
        }
    }
}

impl std::error::Error for ResolveError {}

#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Returns the name of the fetcher, for logging.
    fn name(&self) -> &str;

    /// GETs `url` and returns its parsed JSON body.
    async fn fetch(&self, url: &str) -> Result<serde_json::Value, ResolveError>;
}
