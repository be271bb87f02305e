//! Collaborator traits and the remote error taxonomy.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use pinman_core::models::{FileAttributes, FileId};

use crate::messages::{PoolSelection, SelectReadPool, SetSticky};

/// Outcome classes of a remote call, as the retry policy sees them.
///
/// `NoRoute`, `Timeout`, `PoolDisabled` and `FileNotInRepository` are
/// transient and handled by the coordinator's backoff policy; everything
/// else is terminal for the attempt.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The service is structurally unreachable. Signals an outage unlikely
    /// to resolve quickly; retried with the long backoff.
    #[error("No route to {0}")]
    NoRoute(String),

    /// No answer within the call's own timeout. Usually transient overload
    /// or a race with just-updated remote state; retried with the short
    /// backoff.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The selected pool refuses commands at the moment.
    #[error("Pool disabled: {0}")]
    PoolDisabled(String),

    /// The file disappeared from the pool after selection. The pool drops
    /// its stale location as a result, so a quick retry is expected to
    /// re-select a different pool.
    #[error("File not in repository: {0}")]
    FileNotInRepository(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote failure: {0}")]
    Failure(String),
}

impl RemoteError {
    /// True if the coordinator's retry policy handles this error rather
    /// than failing the attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::NoRoute(_)
                | RemoteError::Timeout(_)
                | RemoteError::PoolDisabled(_)
                | RemoteError::FileNotInRepository(_)
        )
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// The pool-selection service ("PoolManager").
///
/// Selection may itself stage the file from archive, so calls can take a
/// long time; `timeout()` is the per-call budget the coordinator enforces
/// and feeds into protocol-step deadlines.
#[async_trait]
pub trait PoolManager: Send + Sync {
    async fn select_read_pool(&self, request: SelectReadPool) -> RemoteResult<PoolSelection>;

    fn timeout(&self) -> Duration;
}

/// The pool fleet, addressed by pool name.
#[async_trait]
pub trait Pools: Send + Sync {
    /// Set or clear a sticky flag on the named pool.
    async fn set_sticky(&self, request: SetSticky) -> RemoteResult<()>;

    fn timeout(&self) -> Duration;
}

/// The metadata/namespace service.
#[async_trait]
pub trait Namespace: Send + Sync {
    /// Fetch the file attributes pool selection requires.
    async fn file_attributes(&self, file_id: &FileId) -> RemoteResult<FileAttributes>;

    fn timeout(&self) -> Duration;
}
