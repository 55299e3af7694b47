//! CST-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, StressError>;

/// Top-level error type for the collection stress harness.
#[derive(Debug, Error)]
pub enum StressError {
    #[error("[CST-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[CST-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[CST-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[CST-2001] timed out after {waited_ms}ms waiting for {waiting_for}")]
    ConvergenceTimeout { waiting_for: String, waited_ms: u64 },

    #[error("[CST-2002] replica {replica} of {collection}/{shard} failed to recover")]
    RecoveryFailed {
        collection: String,
        shard: String,
        replica: String,
    },

    #[error(
        "[CST-3001] data directory exists after collection removal: {path} ({residual_count} residual)"
    )]
    ResidualResource { path: String, residual_count: usize },

    #[error("[CST-3002] query {query:?} expected {expected} results, found {found}")]
    UnexpectedResultCount {
        query: String,
        expected: u64,
        found: u64,
    },

    #[error("[CST-3003] response is missing field {field}")]
    MissingField { field: &'static str },

    #[error("[CST-4001] transport failure talking to {endpoint}: {details}")]
    Transport { endpoint: String, details: String },

    #[error("[CST-4002] storage unavailable: {details}")]
    StorageUnavailable { details: String },

    #[error("[CST-5001] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[CST-5002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[CST-5900] runtime failure: {details}")]
    Runtime { details: String },

    #[error("[CST-5901] interrupted while {during}")]
    Interrupted { during: String },
}

impl StressError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "CST-1001",
            Self::MissingConfig { .. } => "CST-1002",
            Self::ConfigParse { .. } => "CST-1003",
            Self::ConvergenceTimeout { .. } => "CST-2001",
            Self::RecoveryFailed { .. } => "CST-2002",
            Self::ResidualResource { .. } => "CST-3001",
            Self::UnexpectedResultCount { .. } => "CST-3002",
            Self::MissingField { .. } => "CST-3003",
            Self::Transport { .. } => "CST-4001",
            Self::StorageUnavailable { .. } => "CST-4002",
            Self::Serialization { .. } => "CST-5001",
            Self::Io { .. } => "CST-5002",
            Self::Runtime { .. } => "CST-5900",
            Self::Interrupted { .. } => "CST-5901",
        }
    }

    /// Whether an outer runner could reasonably retry the whole scenario.
    ///
    /// The harness itself never retries; convergence timeouts and failed
    /// assertions are always final.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::StorageUnavailable { .. }
                | Self::Io { .. }
        )
    }

    /// Whether this error is a failed correctness assertion rather than an
    /// infrastructure problem.
    #[must_use]
    pub const fn is_assertion(&self) -> bool {
        matches!(
            self,
            Self::ResidualResource { .. } | Self::UnexpectedResultCount { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for transport failures.
    #[must_use]
    pub fn transport(endpoint: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for StressError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for StressError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
