//! Error types for wiki-bundler
//!
//! This module provides the error taxonomy for a bundling run:
//! - Network-layer failures (`Transport`, `HttpStatus`), retried before surfacing
//! - Content failures that abort the run (`MissingRevision`, `PrefixResolution`)
//! - Media failures that are contained at the image level (`TruncatedDownload`)
//! - Pre-flight and persistence failures (`OutputExists`, `Database`)
//!
//! Each variant maps to a stable machine-readable code via [`Error::code`], which
//! is what failure events carry to status consumers.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for wiki-bundler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for wiki-bundler
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "fetch.article_limit")
        key: Option<String>,
    },

    /// Network failure or timeout while talking to a remote service
    #[error("transport error fetching {url}: {source}")]
    Transport {
        /// The URL being fetched
        url: String,
        /// Underlying client error
        #[source]
        source: reqwest::Error,
    },

    /// Remote service answered with a non-2xx status after all retries
    #[error("HTTP status {status} fetching {url}")]
    HttpStatus {
        /// The URL being fetched
        url: String,
        /// Status code of the last attempt
        status: u16,
    },

    /// Response body could not be interpreted
    #[error("invalid response from {url}: {reason}")]
    InvalidResponse {
        /// The URL that produced the response
        url: String,
        /// What was wrong with it
        reason: String,
    },

    /// Rendered article carried no identifiable revision id
    #[error("no revision id in rendered content for {wiki}:{title}")]
    MissingRevision {
        /// Wiki prefix the article was rendered from
        wiki: String,
        /// Article title
        title: String,
    },

    /// Streamed download ended with fewer (or more) bytes than declared
    #[error("download truncated from {url}: got {actual} of {expected} bytes")]
    TruncatedDownload {
        /// Source URL
        url: String,
        /// Declared content length
        expected: u64,
        /// Bytes actually on disk
        actual: u64,
    },

    /// Manifest repair could not map a wiki prefix or build an API URL for it
    #[error("prefix resolution failed: {0}")]
    PrefixResolution(String),

    /// Output location already exists or cannot be created
    #[error("cannot create output directory {path}: {source}")]
    OutputExists {
        /// Requested output path
        path: PathBuf,
        /// Underlying filesystem error
        #[source]
        source: std::io::Error,
    },

    /// Key/value store operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Archive creation failed
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Key/value store errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to open the store file
    #[error("failed to open store: {0}")]
    ConnectionFailed(String),

    /// Failed to create the key/value table
    #[error("failed to prepare store: {0}")]
    SchemaFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

impl Error {
    /// Machine-readable error code, stable across releases
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Transport { .. } => "transport_error",
            Error::HttpStatus { .. } => "http_status_error",
            Error::InvalidResponse { .. } => "invalid_response",
            Error::MissingRevision { .. } => "missing_revision",
            Error::TruncatedDownload { .. } => "truncated_download",
            Error::PrefixResolution(_) => "prefix_resolution",
            Error::OutputExists { .. } => "output_exists",
            Error::Database(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Archive(_) => "archive_error",
            Error::Other(_) => "internal_error",
        }
    }

    /// Shorthand for an [`Error::Config`] tied to a configuration key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    pub(crate) fn invalid_response(url: &str, reason: impl Into<String>) -> Self {
        Error::InvalidResponse {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_per_variant() {
        let errors = vec![
            Error::config("output.output", "empty"),
            Error::HttpStatus {
                url: "http://x".into(),
                status: 503,
            },
            Error::invalid_response("http://x", "not json"),
            Error::MissingRevision {
                wiki: "enwiki".into(),
                title: "Foo".into(),
            },
            Error::TruncatedDownload {
                url: "http://x/a.png".into(),
                expected: 10,
                actual: 4,
            },
            Error::PrefixResolution("xxwiki".into()),
            Error::OutputExists {
                path: PathBuf::from("/tmp/out"),
                source: std::io::Error::new(std::io::ErrorKind::AlreadyExists, "exists"),
            },
            Error::Database(DatabaseError::QueryFailed("locked".into())),
            Error::Io(std::io::Error::other("boom")),
            Error::Other("misc".into()),
        ];

        let mut codes: Vec<&str> = errors.iter().map(Error::code).collect();
        let total = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), total, "every variant should have its own code");
    }

    #[test]
    fn display_includes_context() {
        let err = Error::TruncatedDownload {
            url: "http://media/a.png".into(),
            expected: 100,
            actual: 42,
        };
        let msg = err.to_string();
        assert!(msg.contains("http://media/a.png"));
        assert!(msg.contains("42 of 100"));

        let err = Error::config("fetch.image_limit", "must be at least 1");
        match err {
            Error::Config { key, message } => {
                assert_eq!(key.as_deref(), Some("fetch.image_limit"));
                assert_eq!(message, "must be at least 1");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
