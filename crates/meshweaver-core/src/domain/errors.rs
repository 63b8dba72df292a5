//! Errors - エラー型と分類
//!
//! Every failure the orchestrator can observe is a typed value:
//! - `TransportError`: what the wire said (classified Fatal / Transient)
//! - `TaskError`: what a Task shows in the management view
//! - `SubmitError`: a request rejected before anything goes over the wire
//! - `ImportError`: a result that could not be materialized (never changes Task status)

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::request::{GenerationKind, ModelVersion};

/// ErrorClass は運用上の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Retrying cannot fix it (auth, validation, not-found).
    Fatal,
    /// Expected to go away with a retry (network, rate-limit, server side).
    Transient,
    /// The remote side may have acted; must be verified before concluding.
    Ambiguous,
}

/// A classified failure of a single Transport call.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum TransportError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request timed out after {0:?}")]
    NetworkTimeout(Duration),

    #[error("connection failed: {0}")]
    ConnectionReset(String),

    #[error("request rejected: {0}")]
    Validation(String),

    #[error("server error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed response: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TransportError::Unauthorized(_)
            | TransportError::Validation(_)
            | TransportError::NotFound(_) => ErrorClass::Fatal,
            TransportError::RateLimited { .. }
            | TransportError::NetworkTimeout(_)
            | TransportError::ConnectionReset(_)
            | TransportError::ServerError { .. }
            | TransportError::Protocol(_) => ErrorClass::Transient,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Whether a failed *create* call may still have created (and billed) a
    /// remote task. A 429 is a clean rejection; everything that can fail after
    /// the request left the machine is not.
    pub fn may_have_reached_remote(&self) -> bool {
        matches!(
            self,
            TransportError::NetworkTimeout(_)
                | TransportError::ConnectionReset(_)
                | TransportError::ServerError { .. }
                | TransportError::Protocol(_)
        )
    }

    /// Whether backoff for this error gets jitter.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            TransportError::NetworkTimeout(_) | TransportError::ConnectionReset(_)
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// The last error recorded on a Task.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum TaskError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("submission outcome unknown: {0}")]
    AmbiguousSubmission(TransportError),

    #[error("credit was consumed ({before} -> {after}) but no task id came back; not resubmitting")]
    CreditConsumedWithoutId { before: f64, after: f64 },

    #[error("insufficient balance: {available} available, about {required} required")]
    InsufficientBalance { available: f64, required: f64 },

    #[error("remote task {status}: {message}")]
    RemoteFailure { status: String, message: String },

    #[error("task finished without a downloadable model")]
    MissingResult,

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<TaskError> },
}

impl TaskError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TaskError::Transport(e) => e.class(),
            TaskError::AmbiguousSubmission(_) => ErrorClass::Ambiguous,
            _ => ErrorClass::Fatal,
        }
    }
}

/// A request rejected at submission time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmitError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("negative prompt must not be empty when given")]
    EmptyNegativePrompt,

    #[error("prompt is {len} characters, the limit is {max}")]
    PromptTooLong { len: usize, max: usize },

    #[error("option `{key}` is not recognized for {kind} generation")]
    UnknownOption { kind: GenerationKind, key: String },

    #[error("invalid option value: {0}")]
    InvalidOption(String),

    #[error("option `{option}` does not apply to {kind} generation")]
    NotApplicable {
        option: &'static str,
        kind: GenerationKind,
    },

    #[error("option `{option}` is not supported by model {version}")]
    Unsupported {
        option: &'static str,
        version: ModelVersion,
    },

    #[error("image not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("image {} is {size} bytes, the limit is {max}", .path.display())]
    ImageTooLarge { path: PathBuf, size: u64, max: u64 },

    #[error("unsupported image type `{ext}` for {}", .path.display())]
    UnsupportedImageType { path: PathBuf, ext: String },

    #[error("file token must not be empty")]
    EmptyToken,

    #[error("image {} has not been uploaded yet", .0.display())]
    NotUploaded(PathBuf),
}

/// Why one result handle could not be imported.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ImportError {
    #[error("download failed: {0}")]
    Fetch(#[from] TransportError),

    #[error("could not stage asset: {0}")]
    Stage(String),

    #[error("host rejected asset: {0}")]
    Apply(String),

    #[error("task is not in a state that has results")]
    NoResults,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TransportError::Unauthorized("bad key".into()), ErrorClass::Fatal)]
    #[case(TransportError::Validation("prompt".into()), ErrorClass::Fatal)]
    #[case(TransportError::NotFound("t1".into()), ErrorClass::Fatal)]
    #[case(TransportError::RateLimited { retry_after: None }, ErrorClass::Transient)]
    #[case(TransportError::NetworkTimeout(Duration::from_secs(30)), ErrorClass::Transient)]
    #[case(TransportError::ConnectionReset("reset".into()), ErrorClass::Transient)]
    #[case(TransportError::ServerError { status: 502, message: "bad gateway".into() }, ErrorClass::Transient)]
    fn transport_errors_are_classified(#[case] err: TransportError, #[case] class: ErrorClass) {
        assert_eq!(err.class(), class);
    }

    #[test]
    fn rate_limit_is_not_ambiguous_for_create() {
        assert!(!TransportError::RateLimited { retry_after: None }.may_have_reached_remote());
        assert!(TransportError::NetworkTimeout(Duration::from_secs(1)).may_have_reached_remote());
        assert!(!TransportError::Unauthorized("x".into()).may_have_reached_remote());
    }

    #[test]
    fn task_error_keeps_transport_message() {
        let e = TaskError::from(TransportError::NotFound("task abc".into()));
        assert_eq!(e.to_string(), "not found: task abc");
        assert_eq!(e.class(), ErrorClass::Fatal);

        let e = TaskError::AmbiguousSubmission(TransportError::NetworkTimeout(Duration::from_secs(3)));
        assert_eq!(e.class(), ErrorClass::Ambiguous);
    }

    #[test]
    fn exhausted_error_mentions_last_cause() {
        let e = TaskError::RetriesExhausted {
            attempts: 5,
            last: Box::new(TransportError::RateLimited { retry_after: None }.into()),
        };
        let msg = e.to_string();
        assert!(msg.contains("5 attempts"));
        assert!(msg.contains("rate limited"));
    }

    #[test]
    fn task_error_survives_json() {
        let e = TaskError::RetriesExhausted {
            attempts: 2,
            last: Box::new(TransportError::ServerError { status: 500, message: "boom".into() }.into()),
        };
        let s = serde_json::to_string(&e).unwrap();
        let back: TaskError = serde_json::from_str(&s).unwrap();
        assert_eq!(back, e);
    }
}
