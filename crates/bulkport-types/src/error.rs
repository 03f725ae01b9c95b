//! Structured error model for pipeline steps.
//!
//! [`StepError`] is what extractors, transformers and loaders return. It
//! carries a classification, an exception class name for failure records, and
//! for network failures the transport detail the retry predicate needs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP status that signals the source throttled us.
pub const HTTP_TOO_MANY_REQUESTS: u16 = 429;

/// Broad classification of a step error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transport-level failure talking to the source (possibly retriable).
    Network,
    /// Invalid or corrupt source data.
    Data,
    /// Invalid collaborator configuration.
    Config,
    /// Target store rejected a write.
    Load,
    /// Anything else.
    Internal,
}

impl ErrorCategory {
    /// Default exception class recorded for this category.
    #[must_use]
    pub fn default_class(self) -> &'static str {
        match self {
            Self::Network => "NetworkError",
            Self::Data => "DataError",
            Self::Config => "ConfigError",
            Self::Load => "LoadError",
            Self::Internal => "InternalError",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Data => "data",
            Self::Config => "config",
            Self::Load => "load",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Transport detail attached to network errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum NetworkErrorKind {
    Timeout,
    ConnectionReset,
    ConnectionRefused,
    HostUnreachable,
    Tls,
    UnexpectedEof,
    /// The source answered with a non-success HTTP status.
    Http { status: u16 },
}

impl NetworkErrorKind {
    /// Whether this kind of failure is worth retrying at all.
    ///
    /// Transport failures always are; HTTP responses only when throttled.
    #[must_use]
    pub fn is_retriable(self) -> bool {
        match self {
            Self::Http { status } => status == HTTP_TOO_MANY_REQUESTS,
            _ => true,
        }
    }
}

/// Error returned by an extractor, transformer or loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {exception_class}: {message}")]
pub struct StepError {
    pub category: ErrorCategory,
    pub exception_class: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkErrorKind>,
    /// Source-provided retry hint (e.g. `Retry-After`), in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl StepError {
    fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            exception_class: category.default_class().to_string(),
            message: message.into(),
            network: None,
            retry_after_secs: None,
            details: None,
        }
    }

    /// Transport-level network failure.
    #[must_use]
    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorCategory::Network, message);
        err.network = Some(kind);
        err
    }

    /// Non-success HTTP response from the source.
    #[must_use]
    pub fn http(status: u16, message: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        let mut err = Self::network(NetworkErrorKind::Http { status }, message);
        err.retry_after_secs = retry_after_secs;
        err
    }

    /// Invalid or corrupt source data.
    #[must_use]
    pub fn data(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Data, message)
    }

    /// Invalid collaborator configuration.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, message)
    }

    /// Target store write failure.
    #[must_use]
    pub fn load(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Load, message)
    }

    /// Uncategorised failure.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, message)
    }

    /// Override the exception class recorded in failure records.
    #[must_use]
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.exception_class = class.into();
        self
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Returns `true` for network-classified errors.
    #[must_use]
    pub fn is_network(&self) -> bool {
        self.network.is_some()
    }

    /// Returns `true` when the network kind is one we retry.
    ///
    /// This does not consult any retry budget; see the engine's retry policy.
    #[must_use]
    pub fn has_retriable_kind(&self) -> bool {
        self.network.is_some_and(NetworkErrorKind::is_retriable)
    }
}

impl From<std::io::Error> for StepError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err.to_string()).with_class("IoError")
    }
}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        Self::data(err.to_string()).with_class("JsonError")
    }
}
