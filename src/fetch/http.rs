//! HTTP fetcher for IIIF resources.
//!
//! A single GET per call. The response must be 2xx with a JSON or JSON-LD
//! content type, and the body must parse as JSON. Anything else maps to the
//! matching [`ResolveError`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use crate::fetch::{ResolveError, ResourceFetcher};

const ACCEPT_IIIF: &str = "application/ld+json, application/json;q=0.9, */*;q=0.1";

pub const DEFAULT_USER_AGENT: &str = concat!("iiif-browser/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Request settings applied to every fetch (the injectable request init).
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// True when the content type is JSON (`…/json`) or JSON-LD (`…/ld+json`).
pub fn is_json_content_type(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    content_type.contains("/json") || content_type.contains("/ld+json")
}

fn header_map(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!("Skipping invalid request header {:?}", name),
        }
    }
    map
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(options: &FetchOptions) -> Self {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent.clone())
            .default_headers(header_map(&options.headers))
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build HTTP client ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(&FetchOptions::default())
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, url: &str) -> Result<serde_json::Value, ResolveError> {
        info!("GET {}", url);

        let response = self
            .client
            .get(url)
            .header(ACCEPT, ACCEPT_IIIF)
            .send()
            .await
            .map_err(|e| ResolveError::Network(e.to_string()))?;

        let status = response.status();
        debug!("{} responded {}", url, status);
        if !status.is_success() {
            warn!("HTTP error {} for {}", status.as_u16(), url);
            return Err(ResolveError::Http(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !is_json_content_type(&content_type) {
            let shown = if content_type.is_empty() {
                "none".to_string()
            } else {
                content_type
            };
            return Err(ResolveError::ContentType(shown));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ResolveError::Network(e.to_string()))?;
        debug!("{} body: {} bytes", url, body.len());

        serde_json::from_str(&body).map_err(|e| ResolveError::Parse(e.to_string()))
    }
}
