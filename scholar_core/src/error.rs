// src/error.rs
use crate::record::SourceTag;
use std::path::PathBuf;

/// Parser-level failure. Surfaced directly to the caller and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Failure of a single source. The dispatcher contains these per task.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("{tag} returned error status: {status}")]
    Status { tag: SourceTag, status: u16 },

    #[error("{tag} rate limit still exceeded after {attempts} attempts")]
    RateLimited { tag: SourceTag, attempts: u32 },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl ConnectorError {
    pub fn code_str(&self) -> &'static str {
        match self {
            ConnectorError::HttpRequest(e) if e.is_timeout() => "timeout",
            ConnectorError::HttpRequest(_) => "upstream_error",
            ConnectorError::Status { .. } => "upstream_error",
            ConnectorError::RateLimited { .. } => "rate_limited",
            ConnectorError::SerdeJson(_) => "parse_error",
            ConnectorError::ParseError(_) => "parse_error",
            ConnectorError::InvalidInput(_) => "invalid_input",
            ConnectorError::Timeout(_) => "timeout",
            ConnectorError::Other(_) => "internal_error",
        }
    }

    /// Whether the failure came from the provider throttling us.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ConnectorError::RateLimited { .. })
    }
}

/// Dispatcher-level failure: the only case in which a federated search fails as a whole.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("No connectors resolved for the requested sources")]
    NoConnectors,

    #[error("Every source task was interrupted: {0}")]
    Interrupted(String),

    #[error("No local index attached")]
    NoIndex,

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Local index error: {0}")]
    Index(#[from] IndexError),
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Index at {} is already open in this process", path.display())]
    LockedBySameProcess { path: PathBuf },

    #[error("Index at {} is locked by running process {pid}", path.display())]
    LockHeld { path: PathBuf, pid: u32 },

    #[error("Index is closed")]
    Closed,

    #[error("Index writer lock poisoned")]
    Poisoned,

    #[error("Background index task failed: {0}")]
    Background(String),

    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure loading the on-disk configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl IndexError {
    /// Lock failures that a retry in the same process can never fix.
    pub fn is_lock_conflict(&self) -> bool {
        matches!(
            self,
            IndexError::LockedBySameProcess { .. } | IndexError::LockHeld { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_str() {
        let err = ConnectorError::RateLimited {
            tag: SourceTag::Arxiv,
            attempts: 4,
        };
        assert_eq!(err.code_str(), "rate_limited");
        assert!(err.is_rate_limited());
        assert_eq!(
            err.to_string(),
            "arxiv rate limit still exceeded after 4 attempts"
        );

        let err = ConnectorError::Status {
            tag: SourceTag::PubMed,
            status: 500,
        };
        assert_eq!(err.code_str(), "upstream_error");
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn test_lock_conflict() {
        let err = IndexError::LockedBySameProcess {
            path: PathBuf::from("/tmp/idx"),
        };
        assert!(err.is_lock_conflict());
        assert!(!IndexError::Closed.is_lock_conflict());
    }
}
