//! Error taxonomy for the playbook core
//!
//! Every core operation returns [`PlaybookError`]. Storage, index and
//! embedding failures keep their underlying cause as `source()` so callers
//! (and `anyhow`'s `{:#}` formatting) can walk the full chain.

use thiserror::Error;

/// Boxed cause carried by the I/O-facing variants
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, PlaybookError>;

#[derive(Debug, Error)]
pub enum PlaybookError {
    /// A playbook or execution id that does not exist
    #[error("{kind} {id}: not found")]
    NotFound { kind: &'static str, id: String },

    /// Empty name, empty step list, empty step action, illegal status change
    #[error("validation failed: {0}")]
    Validation(String),

    /// Filesystem or (de)serialization failure other than not-found
    #[error("storage: {context}")]
    Storage {
        context: String,
        #[source]
        source: BoxError,
    },

    /// Search engine failure
    #[error("search index: {context}")]
    Index {
        context: String,
        #[source]
        source: BoxError,
    },

    /// Embedding provider or network failure
    #[error("embedding provider: {context}")]
    Embedding {
        context: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Unrecognized provider name, malformed duration, unreadable config file
    #[error("config: {0}")]
    Config(String),
}

impl PlaybookError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    pub fn storage(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Storage {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn index(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Index {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn embedding(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Embedding {
            context: context.into(),
            source: Some(source.into()),
        }
    }

    /// Embedding failure with no underlying error value (bad status, empty payload)
    pub fn embedding_msg(context: impl Into<String>) -> Self {
        Self::Embedding {
            context: context.into(),
            source: None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
