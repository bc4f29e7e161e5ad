//! # Configuration
//!
//! Centralizes all settings with a clear override hierarchy:
//! defaults → config file → env vars → CLI flags.
//!
//! Config lives at `~/.iiif-browser/config.toml`. If missing on first run, a
//! commented-out default is generated so users can discover all options.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::browser::BrowserSettings;
use crate::core::history::DEFAULT_HISTORY_LIMIT;
use crate::core::routes;
use crate::fetch::FetchOptions;
use crate::fetch::http::{DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use crate::output::LinkConfig;
use crate::search::{DEFAULT_DYNAMIC_LIMIT, DEFAULT_NUMBER_OF_RESULTS, SearchOptions};

// ============================================================================
// Config Structs (all fields Option<T> for sparse TOML)
// ============================================================================

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct BrowserConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub links: LinksConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct GeneralConfig {
    pub storage_key: Option<String>,
    pub history_limit: Option<usize>,
    pub home: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SearchConfig {
    pub number_of_results: Option<usize>,
    pub dynamic_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LinksConfig {
    pub can_select_canvas: Option<bool>,
    pub can_select_manifest: Option<bool>,
    pub can_select_collection: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct HttpConfig {
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_STORAGE_KEY: &str = "iiif-browser";
pub const DEFAULT_HOME: &str = routes::HOME;

// ============================================================================
// Resolved Config (concrete values, no Options)
// ============================================================================

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub storage_key: String,
    pub history_limit: usize,
    pub home: String,
    pub search: SearchOptions,
    pub links: LinkConfig,
    pub fetch: FetchOptions,
}

impl ResolvedConfig {
    pub fn browser_settings(&self) -> BrowserSettings {
        BrowserSettings {
            storage_key: self.storage_key.clone(),
            history_limit: self.history_limit,
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config I/O error: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Loading
// ============================================================================

/// Returns the path to `~/.iiif-browser/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".iiif-browser").join("config.toml"))
}

/// Load config from `~/.iiif-browser/config.toml`.
///
/// If the file doesn't exist, generates a commented-out default and
/// returns `BrowserConfig::default()`. If it exists but is malformed,
/// returns `ConfigError::Parse`.
pub fn load_config() -> Result<BrowserConfig, ConfigError> {
    let path = match config_path() {
        Some(p) => p,
        None => {
            warn!("Could not determine home directory, using default config");
            return Ok(BrowserConfig::default());
        }
    };

    if !path.exists() {
        info!("No config file found, generating default at {}", path.display());
        generate_default_config(&path);
        return Ok(BrowserConfig::default());
    }

    load_config_from(&path)
}

/// Load config from an explicit path.
pub fn load_config_from(path: &Path) -> Result<BrowserConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: BrowserConfig = toml::from_str(&contents).map_err(ConfigError::Parse)?;
    info!("Loaded config from {}", path.display());
    debug!("Config: {:?}", config);
    Ok(config)
}

/// Generates a commented-out default config file at the given path.
fn generate_default_config(path: &Path) {
    let default_content = r#"# iiif-browser configuration
# All settings are optional. Defaults are used for anything not specified.
# Override hierarchy: defaults → this file → env vars → CLI flags.

# [general]
# storage_key = "iiif-browser"       # Or set IIIF_BROWSER_STORAGE_KEY
# history_limit = 100                # Entries kept in persisted history
# home = "iiif://home"               # Or set IIIF_BROWSER_HOME

# [search]
# number_of_results = 30
# dynamic_limit = 5

# [links]
# can_select_canvas = true
# can_select_manifest = true
# can_select_collection = true

# [http]
# timeout_secs = 30
# user_agent = "iiif-browser"
# [http.headers]
# Authorization = "Bearer ..."
"#;

    if let Some(parent) = path.parent()
        && let Err(e) = fs::create_dir_all(parent)
    {
        warn!("Failed to create config directory: {}", e);
        return;
    }
    if let Err(e) = fs::write(path, default_content) {
        warn!("Failed to write default config: {}", e);
    }
}

// ============================================================================
// Resolution
// ============================================================================

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparseable {}={:?}", name, raw);
            None
        }
    }
}

/// Resolve the final config by collapsing: defaults → config file → env vars → CLI.
///
/// `cli_storage_key` is from the CLI flag (None = not specified).
pub fn resolve(config: &BrowserConfig, cli_storage_key: Option<&str>) -> ResolvedConfig {
    // Storage key: CLI → env → config → default
    let storage_key = cli_storage_key
        .map(|s| s.to_string())
        .or_else(|| std::env::var("IIIF_BROWSER_STORAGE_KEY").ok())
        .or_else(|| config.general.storage_key.clone())
        .unwrap_or_else(|| DEFAULT_STORAGE_KEY.to_string());

    // History limit: env → config → default
    let history_limit = env_parse("IIIF_BROWSER_HISTORY_LIMIT")
        .or(config.general.history_limit)
        .unwrap_or(DEFAULT_HISTORY_LIMIT);

    // Home: env → config → default
    let home = std::env::var("IIIF_BROWSER_HOME")
        .ok()
        .or_else(|| config.general.home.clone())
        .unwrap_or_else(|| DEFAULT_HOME.to_string());

    let search = SearchOptions {
        number_of_results: config
            .search
            .number_of_results
            .unwrap_or(DEFAULT_NUMBER_OF_RESULTS),
        dynamic_limit: config.search.dynamic_limit.unwrap_or(DEFAULT_DYNAMIC_LIMIT),
    };

    let defaults = LinkConfig::default();
    let links = LinkConfig {
        can_select_canvas: config
            .links
            .can_select_canvas
            .unwrap_or(defaults.can_select_canvas),
        can_select_manifest: config
            .links
            .can_select_manifest
            .unwrap_or(defaults.can_select_manifest),
        can_select_collection: config
            .links
            .can_select_collection
            .unwrap_or(defaults.can_select_collection),
    };

    // User agent: env → config → default
    let user_agent = std::env::var("IIIF_BROWSER_USER_AGENT")
        .ok()
        .or_else(|| config.http.user_agent.clone())
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

    let fetch = FetchOptions {
        headers: config.http.headers.clone(),
        timeout: Duration::from_secs(config.http.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        user_agent,
    };

    ResolvedConfig {
        storage_key,
        history_limit,
        home,
        search,
        links,
        fetch,
    }
}
