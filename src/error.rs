//! Error types for pg_funnel.
//!
//! All errors that can occur while planning or executing a coordinator
//! INSERT ... SELECT are represented by [`FunnelError`]. Errors are propagated
//! via `Result<T, FunnelError>` throughout the codebase and converted to
//! PostgreSQL errors at the extension boundary (`FunnelError::raise`, only
//! with the `pg18` feature).
//!
//! # Deferred errors
//!
//! Planning validations that have a possible fallback strategy do not fail
//! the planner. They produce a [`DeferredError`] that is stored on the plan
//! as data. The caller either picks another strategy or raises it, at which
//! point it becomes [`FunnelError::FeatureNotSupported`].
//!
//! # Error Classification
//!
//! - **FeatureNotSupported**: a raised deferred error.
//! - **User**: statements this strategy can never plan, impossible casts,
//!   unknown catalog objects.
//! - **Execution**: failures while running the SELECT or delivering rows.
//! - **Internal**: malformed query trees. Indicates a bug in the caller.

use serde::{Deserialize, Serialize};
use std::fmt;

/// SQLSTATE codes reported by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlState {
    FeatureNotSupported,
    CannotCoerce,
    UndefinedObject,
    NotNullViolation,
    QueryCanceled,
    SystemError,
    InternalError,
}

impl SqlState {
    /// The five-character SQLSTATE code.
    pub fn code(&self) -> &'static str {
        match self {
            SqlState::FeatureNotSupported => "0A000",
            SqlState::CannotCoerce => "42846",
            SqlState::UndefinedObject => "42704",
            SqlState::NotNullViolation => "23502",
            SqlState::QueryCanceled => "57014",
            SqlState::SystemError => "58000",
            SqlState::InternalError => "XX000",
        }
    }
}

impl fmt::Display for SqlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A planning error recorded as data instead of being raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredError {
    pub code: SqlState,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl DeferredError {
    pub fn new(code: SqlState, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            hint: None,
        }
    }

    /// Shorthand for the common `FEATURE_NOT_SUPPORTED` case.
    pub fn feature_not_supported(message: impl Into<String>) -> Self {
        Self::new(SqlState::FeatureNotSupported, message)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Turn the deferred error into a real error, for callers that have no
    /// fallback strategy.
    pub fn raise(self) -> FunnelError {
        FunnelError::FeatureNotSupported(self)
    }
}

impl fmt::Display for DeferredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

/// Primary error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum FunnelError {
    // ── Deferred errors that were raised ─────────────────────────────────
    /// A construct this execution strategy cannot handle.
    #[error("{0}")]
    FeatureNotSupported(DeferredError),

    // ── User errors: raised at plan time ────────────────────────────────
    /// The statement has no safe rewrite for this strategy (e.g. field
    /// stores in the INSERT target list).
    #[error("{message}")]
    StatementRejected {
        message: String,
        hint: Option<String>,
    },

    /// No cast exists between the SELECT output type and the column type.
    #[error("cannot cast type {from} to {to}")]
    CoercionFailed { from: String, to: String },

    /// A relation, column or parameter could not be found.
    #[error("not found: {0}")]
    NotFound(String),

    // ── Execution errors: raised while running the SELECT ───────────────
    /// Any failure reported by the general planner or the running query.
    #[error("execution error: {0}")]
    ExecutionError(String),

    /// The destination writer refused a row under a strict failure policy.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The ambient environment interrupted execution.
    #[error("canceling statement due to user request")]
    Canceled,

    // ── Internal errors: should not happen ──────────────────────────────
    /// An unexpected internal error. Indicates a bug.
    #[error("internal error: {0}")]
    InternalError(String),
}

/// Classification of error kind for callers and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunnelErrorKind {
    FeatureNotSupported,
    User,
    Execution,
    Internal,
}

impl fmt::Display for FunnelErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunnelErrorKind::FeatureNotSupported => write!(f, "FEATURE_NOT_SUPPORTED"),
            FunnelErrorKind::User => write!(f, "USER"),
            FunnelErrorKind::Execution => write!(f, "EXECUTION"),
            FunnelErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}

impl FunnelError {
    /// Build a statement-rejected error without a hint.
    pub fn rejected(message: impl Into<String>) -> Self {
        FunnelError::StatementRejected {
            message: message.into(),
            hint: None,
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> FunnelErrorKind {
        match self {
            FunnelError::FeatureNotSupported(_) => FunnelErrorKind::FeatureNotSupported,

            FunnelError::StatementRejected { .. }
            | FunnelError::CoercionFailed { .. }
            | FunnelError::NotFound(_) => FunnelErrorKind::User,

            FunnelError::ExecutionError(_)
            | FunnelError::ConstraintViolation(_)
            | FunnelError::Canceled => FunnelErrorKind::Execution,

            FunnelError::InternalError(_) => FunnelErrorKind::Internal,
        }
    }

    /// SQLSTATE reported to the client.
    pub fn sqlstate(&self) -> SqlState {
        match self {
            FunnelError::FeatureNotSupported(deferred) => deferred.code,
            FunnelError::StatementRejected { .. } => SqlState::FeatureNotSupported,
            FunnelError::CoercionFailed { .. } => SqlState::CannotCoerce,
            FunnelError::NotFound(_) => SqlState::UndefinedObject,
            FunnelError::ExecutionError(_) => SqlState::SystemError,
            FunnelError::ConstraintViolation(_) => SqlState::NotNullViolation,
            FunnelError::Canceled => SqlState::QueryCanceled,
            FunnelError::InternalError(_) => SqlState::InternalError,
        }
    }

    /// Hint text, when the error carries one.
    pub fn hint(&self) -> Option<&str> {
        match self {
            FunnelError::FeatureNotSupported(deferred) => deferred.hint.as_deref(),
            FunnelError::StatementRejected { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }

    /// Whether the error originates from a check that is recorded on the
    /// plan rather than raised while planning.
    pub fn is_deferrable(&self) -> bool {
        matches!(self, FunnelError::FeatureNotSupported(_))
    }

    /// Whether the error is caused by the statement itself.
    pub fn is_user_error(&self) -> bool {
        self.kind() == FunnelErrorKind::User
    }

    /// Whether the error was raised during execution, after planning
    /// succeeded.
    pub fn is_execution_error(&self) -> bool {
        self.kind() == FunnelErrorKind::Execution
    }

    /// Report the error to PostgreSQL. Never returns.
    #[cfg(feature = "pg18")]
    pub fn raise(self) -> ! {
        match self.hint() {
            Some(hint) => pgrx::error!("{} (SQLSTATE {}) HINT: {}", self, self.sqlstate(), hint),
            None => pgrx::error!("{} (SQLSTATE {})", self, self.sqlstate()),
        }
    }
}
