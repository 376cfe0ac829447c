use thiserror::Error;

use crate::model::RunSummary;

/// Failure of a single call against the target API, already classified.
///
/// Produced by the HTTP layer; the engine only decides what a class of
/// failure means for the record (or run) that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// 401/403. Never retried; aborts the run.
    #[error("authentication rejected (HTTP {status}): {message}")]
    Auth { status: u16, message: String },
    /// 404 on a lookup. A negative result, not a failure.
    #[error("not found: {0}")]
    NotFound(String),
    /// Any other non-retryable 4xx.
    #[error("request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    /// 429/5xx/network errors that outlived the retry budget.
    #[error("gave up after {attempts} attempts: {last}")]
    MaxRetriesExceeded { attempts: u32, last: String },
    /// Response body could not be decoded into the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),
    /// A record could not be turned into a request payload.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// The target adapter does not implement this operation.
    #[error("{0} is not supported by this target")]
    Unsupported(&'static str),
}

impl ApiError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

/// Per-record error taxonomy used by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Authentication rejected. The only variant that escapes a run.
    #[error("fatal: {0}")]
    Fatal(ApiError),
    /// A call failed for this record (retries exhausted, rejected payload, …).
    #[error("{0}")]
    Api(ApiError),
    /// A required source field was blank or absent.
    #[error("missing required field '{field}'")]
    ValidationGap { field: String },
    /// A related entity (site, label) could not be resolved or created.
    #[error("cannot resolve {kind} '{name}': {reason}")]
    DependencyFailure {
        kind: &'static str,
        name: String,
        reason: String,
    },
    /// More than one candidate matched and none can be preferred.
    #[error("ambiguous match for '{key}': {}", candidates.join(", "))]
    AmbiguousMatch { key: String, candidates: Vec<String> },
    /// No candidate matched at all.
    #[error("no match for '{key}'")]
    NoMatch { key: String },
}

impl SyncError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<ApiError> for SyncError {
    fn from(err: ApiError) -> Self {
        if err.is_fatal() {
            Self::Fatal(err)
        } else {
            Self::Api(err)
        }
    }
}

/// A run stopped early because of a fatal error.
///
/// Carries the summary of everything processed before the abort so callers
/// can still report it.
#[derive(Debug, Error)]
#[error("run aborted at '{key}': {error}")]
pub struct RunAborted {
    pub key: String,
    pub error: ApiError,
    pub summary: RunSummary,
}
