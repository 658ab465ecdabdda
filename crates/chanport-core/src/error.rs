//! Unified application error types for Chanport.
//!
//! All crates map their internal errors into [`AppError`] for consistent
//! propagation through the ? operator. The migration-specific kinds carry
//! the recovery semantics: retryable fetch errors, quota throttling that
//! must never fail a job, and the two kinds that do end a job
//! ([`ErrorKind::FailureLimit`] and [`ErrorKind::Persistence`]).

use std::fmt;
use thiserror::Error;

/// Top-level error kind categorization used across the entire engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// The requested resource was not found.
    NotFound,
    /// Input validation failed.
    Validation,
    /// A conflict occurred (duplicate submission, concurrent modification).
    Conflict,
    /// A transient fetch failure from the content platform; retried with backoff.
    TransientFetch,
    /// An outgoing-call budget was exhausted; absorbed by adapter timing,
    /// never surfaced as a job failure.
    QuotaExceeded,
    /// An item-level transform failure; counted, the job continues.
    Transform,
    /// A multi-part group could not be completed within its timeout.
    GroupTimeout,
    /// The consecutive-failure limit was exceeded; the job fails with its
    /// checkpoint preserved.
    FailureLimit,
    /// A checkpoint or job record could not be persisted after retries.
    Persistence,
    /// A configuration error occurred.
    Configuration,
    /// A serialization/deserialization error occurred.
    Serialization,
    /// An internal error occurred.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::Validation => write!(f, "VALIDATION"),
            Self::Conflict => write!(f, "CONFLICT"),
            Self::TransientFetch => write!(f, "TRANSIENT_FETCH"),
            Self::QuotaExceeded => write!(f, "QUOTA_EXCEEDED"),
            Self::Transform => write!(f, "TRANSFORM"),
            Self::GroupTimeout => write!(f, "GROUP_TIMEOUT"),
            Self::FailureLimit => write!(f, "FAILURE_LIMIT"),
            Self::Persistence => write!(f, "PERSISTENCE"),
            Self::Configuration => write!(f, "CONFIGURATION"),
            Self::Serialization => write!(f, "SERIALIZATION"),
            Self::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// The unified application error used throughout Chanport.
///
/// All crate-specific errors are mapped into `AppError` using `From` impls
/// or explicit `.map_err()` calls. This provides a single error type for
/// the entire engine boundary.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    /// The category of error.
    pub kind: ErrorKind,
    /// A human-readable error message.
    pub message: String,
    /// Optional underlying cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new application error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new application error with an underlying cause.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Create a transient fetch error.
    pub fn transient_fetch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientFetch, message)
    }

    /// Create a quota-exceeded error.
    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, message)
    }

    /// Create an item transform error.
    pub fn transform(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transform, message)
    }

    /// Create a group-assembly timeout error.
    pub fn group_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::GroupTimeout, message)
    }

    /// Create a consecutive-failure-limit error.
    pub fn failure_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailureLimit, message)
    }

    /// Create a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Persistence, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Whether a retry with backoff may succeed.
    ///
    /// Quota errors are retryable by definition — the window resets; they
    /// are just never allowed to fail a job.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::TransientFetch | ErrorKind::QuotaExceeded
        )
    }
}

impl Clone for AppError {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            source: None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(
            ErrorKind::Serialization,
            format!("JSON serialization error: {err}"),
            err,
        )
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_source(
            ErrorKind::Configuration,
            format!("Configuration error: {err}"),
            err,
        )
    }
}
