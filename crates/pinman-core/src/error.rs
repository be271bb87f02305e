//! Error types module
//!
//! All coordinator errors are unified under the `PinError` enum. The
//! `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx`
//! feature; with `default-features = false` the variant carries a plain
//! string instead.

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

#[derive(Debug, thiserror::Error)]
pub enum PinError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Pool unavailable: {0}")]
    PoolUnavailable(String),

    /// The optimistic-concurrency guard rejected a stale protocol step.
    /// Internal: folded into whichever external operation triggered it.
    #[error("Operation was aborted")]
    Aborted,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Terminal failure reported by a remote collaborator.
    #[error("Remote failure: {0}")]
    Remote(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for PinError {
    fn from(e: SqlxError) -> Self {
        match e {
            SqlxError::RowNotFound => PinError::NotFound("No such record".to_string()),
            other => PinError::Database(other),
        }
    }
}

impl PinError {
    /// True if the error was caused by the caller rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PinError::PermissionDenied(_) | PinError::NotFound(_) | PinError::InvalidRequest(_)
        )
    }
}
