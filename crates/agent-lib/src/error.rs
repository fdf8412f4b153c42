//! Typed errors returned at component boundaries

use thiserror::Error;

/// Errors surfaced by a container runtime adapter
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The container no longer exists; callers treat this as nothing to do
    #[error("container not found: {0}")]
    NotFound(String),

    /// The container is already in the requested state
    #[error("container already in requested state: {0}")]
    NotModified(String),

    #[error("image not present locally: {0}")]
    ImageNotFound(String),

    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    #[error("{operation} failed for {target}: {message}")]
    Operation {
        operation: &'static str,
        target: String,
        message: String,
    },
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }

    pub fn is_not_modified(&self) -> bool {
        matches!(self, RuntimeError::NotModified(_))
    }
}

/// Errors surfaced by the central API transport
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("request to central API failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid central API url: {0}")]
    Url(#[from] url::ParseError),

    #[error("create of {0} conflicted and the record never became readable")]
    Conflict(String),
}

impl SyncError {
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Status { status, .. } => Some(*status),
            SyncError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the next periodic cycle may succeed where this one failed.
    /// Any non-2xx answer qualifies; only a malformed URL never heals.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Status { .. } | SyncError::Transport(_) | SyncError::Conflict(_) => true,
            SyncError::Url(_) => false,
        }
    }
}

/// Errors from syncing a single container
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Errors raised while executing a task
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0} task carries no container spec")]
    MissingSpec(&'static str),

    #[error("{0} task carries no container id")]
    MissingContainerId(&'static str),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
