use std::fmt;

use thiserror::Error;
use tracing_error::SpanTrace;

use super::result::CapturedFailure;

/// Failures reported by an [`EntityLoader`](super::EntityLoader).
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl PersistenceError {
    pub fn from_persistence(err: impl fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryCacheError {
    #[error("query cache configuration error: {message}")]
    Configuration { message: String },
    /// A single-result failure captured at population time, raised again.
    #[error("cached query failure `{kind}`: {message}")]
    CachedFailure {
        kind: String,
        message: String,
        span_trace: SpanTrace,
    },
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl QueryCacheError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn unbound_parameter(name: &str) -> Self {
        Self::configuration(format!("no value bound for named parameter `:{name}`"))
    }

    /// Rebuild a captured failure with a span trace of the current lookup.
    pub(crate) fn replay(failure: &CapturedFailure) -> Self {
        Self::CachedFailure {
            kind: failure.kind().to_string(),
            message: failure.message().to_string(),
            span_trace: SpanTrace::capture(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    pub fn is_cached_failure(&self) -> bool {
        matches!(self, Self::CachedFailure { .. })
    }
}
