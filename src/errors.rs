//! Error types for the resource pool

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Error returned by collaborators (factory, resource activation).
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// A collaborator error that can be handed to many callers at once.
pub type SharedError = Arc<dyn StdError + Send + Sync>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Pool is not running")]
    PoolUnavailable,

    #[error("Timed out after {0:?} waiting for a pooled object")]
    Timeout(Duration),

    #[error("Failed to create pooled resource: {0}")]
    CreationFailed(SharedError),

    #[error("Failed to activate pooled resource: {0}")]
    ActivationFailed(SharedError),

    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Worker runtime unavailable: {0}")]
    Runtime(String),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Pool invariant violated: {0}")]
    Internal(String),
}

impl PoolError {
    /// The stored collaborator error, if this is a creation or activation failure.
    pub fn cause(&self) -> Option<&SharedError> {
        match self {
            PoolError::CreationFailed(err) | PoolError::ActivationFailed(err) => Some(err),
            _ => None,
        }
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
