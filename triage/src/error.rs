//! Error taxonomy for ticket processing.
//!
//! Two layers:
//! - [`HandlerError`]: what a collaborator (classifier, knowledge search,
//!   account ops, escalation queue, persistence) reports back.
//! - [`TriageError`]: what the core surfaces. Only `Validation` ever reaches
//!   the caller of `process`; everything else is folded into a terminal
//!   ticket state.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// The collaborator could not serve the request.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The collaborator did not answer within its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The requested entity (user, ticket, account) does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// High-level classification of a [`TriageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    HandlerUnavailable,
    NotFound,
    Validation,
    Cancelled,
    IllegalTransition,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandlerUnavailable => write!(f, "handler_unavailable"),
            Self::NotFound => write!(f, "not_found"),
            Self::Validation => write!(f, "validation"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::IllegalTransition => write!(f, "illegal_transition"),
        }
    }
}

/// Errors produced by the triage core.
#[derive(Debug, Error)]
pub enum TriageError {
    /// A collaborator call failed or exceeded its deadline.
    #[error("handler `{handler}` unavailable: {source}")]
    HandlerUnavailable {
        handler: &'static str,
        #[source]
        source: HandlerError,
    },

    /// Unknown user or ticket. Callers proceed without the data.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed ticket fields, rejected before any state transition.
    #[error("invalid ticket: {0}")]
    Validation(String),

    /// The caller cancelled processing before a terminal state.
    #[error("processing cancelled")]
    Cancelled,

    /// A state or status change that the lifecycle does not permit.
    #[error("illegal {scope} transition: {from} -> {to}")]
    IllegalTransition {
        scope: &'static str,
        from: String,
        to: String,
    },
}

impl TriageError {
    /// Wrap a collaborator failure. `NotFound` stays `NotFound`.
    pub fn from_handler(handler: &'static str, source: HandlerError) -> Self {
        match source {
            HandlerError::NotFound(what) => Self::NotFound(what),
            other => Self::HandlerUnavailable {
                handler,
                source: other,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::HandlerUnavailable { .. } => ErrorKind::HandlerUnavailable,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::IllegalTransition { .. } => ErrorKind::IllegalTransition,
        }
    }

    /// Whether processing of *other* work may continue after this error.
    ///
    /// Validation failures and lifecycle violations are programming or input
    /// errors; everything else is a runtime condition the orchestrator folds
    /// into a terminal state.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::HandlerUnavailable | ErrorKind::NotFound | ErrorKind::Cancelled
        )
    }
}

/// Result alias for triage operations.
pub type TriageResult<T> = Result<T, TriageError>;
