//! Runtime configuration: dispatcher knobs, API keys and the optional config file.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_MAX_RESULTS: usize = 25;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Knobs of the federated dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Results requested from each source
    pub max_results: usize,
    /// Global deadline for one federated call
    pub timeout_ms: u64,
    /// Connector calls allowed in flight at once
    pub max_concurrency: usize,
    /// Ingest aggregated results into the attached index
    pub auto_index: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            auto_index: true,
        }
    }
}

impl DispatcherConfig {
    /// Defaults with `SCHOLAR_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = parse_var(&lookup, "SCHOLAR_TIMEOUT_MS") {
            self.timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "SCHOLAR_MAX_RESULTS") {
            self.max_results = v;
        }
        if let Some(v) = parse_var::<usize>(&lookup, "SCHOLAR_MAX_CONCURRENCY") {
            self.max_concurrency = v.max(1);
        }
        if let Some(raw) = lookup("SCHOLAR_AUTO_INDEX") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.auto_index = true,
                "0" | "false" | "no" | "off" => self.auto_index = false,
                other => warn!(value = other, "Ignoring invalid SCHOLAR_AUTO_INDEX"),
            }
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

/// Credentials that raise a source's rate limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub ncbi_api_key: Option<String>,
    pub semantic_scholar_api_key: Option<String>,
    /// Contact address for the Crossref polite pool
    pub crossref_mailto: Option<String>,
}

impl ApiKeys {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            ncbi_api_key: non_empty("NCBI_API_KEY"),
            semantic_scholar_api_key: non_empty("SEMANTIC_SCHOLAR_API_KEY"),
            crossref_mailto: non_empty("CROSSREF_MAILTO"),
        }
    }

    /// Fill keys missing here from `other`.
    pub fn or(self, other: ApiKeys) -> Self {
        Self {
            ncbi_api_key: self.ncbi_api_key.or(other.ncbi_api_key),
            semantic_scholar_api_key: self
                .semantic_scholar_api_key
                .or(other.semantic_scholar_api_key),
            crossref_mailto: self.crossref_mailto.or(other.crossref_mailto),
        }
    }
}

/// Contents of `<config_dir>/scholar/config.toml`.
///
/// ```toml
/// index_dir = "/var/lib/scholar/index"
/// default_profile = "biomedical"
///
/// [dispatcher]
/// timeout_ms = 15000
/// auto_index = false
///
/// [keys]
/// crossref_mailto = "me@example.org"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScholarConfig {
    pub index_dir: Option<PathBuf>,
    pub default_profile: Option<String>,
    pub dispatcher: DispatcherConfig,
    pub keys: ApiKeys,
}

impl ScholarConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|p| p.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scholar")
            .join("config.toml")
    }

    /// Load the default config file, then apply environment overrides.
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::default_path())?;
        config.dispatcher.apply_env_overrides();
        config.keys = ApiKeys::from_env().or(config.keys);
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Configured index directory, or `<data_dir>/scholar/index`.
    pub fn index_dir(&self) -> PathBuf {
        self.index_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .or_else(|| dirs::home_dir().map(|p| p.join(".local").join("share")))
                .unwrap_or_else(|| PathBuf::from("."))
                .join("scholar")
                .join("index")
        })
    }
}
