//! Error types for the resource pool

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Error type returned by [`ObjectFactory`](crate::ObjectFactory) implementations.
pub type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Could not create a new {resource_type}: {source}")]
    Creation {
        resource_type: &'static str,
        #[source]
        source: Arc<dyn StdError + Send + Sync>,
    },

    #[error("Could not create enough Components to service your request.")]
    Exhausted,

    #[error("Could not create enough Components to service your request (timed out after {0:?}).")]
    Timeout(Duration),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Released object {0} is not checked out from this pool")]
    InvalidRelease(String),

    #[error("Unknown lifecycle policy: {0}")]
    UnknownPolicy(String),

    #[error("No component registered under key {0}")]
    UnknownComponent(String),

    #[error("A component is already registered under key {0}")]
    DuplicateComponent(String),

    #[error("Pool has been disposed")]
    Disposed,

    #[error("Tracing is disabled for this pool")]
    TracingDisabled,
}

impl PoolError {
    pub(crate) fn creation(resource_type: &'static str, source: BoxError) -> Self {
        PoolError::Creation {
            resource_type,
            source: Arc::from(source),
        }
    }

    /// Whether retrying the same call later may succeed.
    ///
    /// ```
    /// use esox_resourcepool::PoolError;
    /// use std::time::Duration;
    ///
    /// assert!(PoolError::Exhausted.is_retryable());
    /// assert!(PoolError::Timeout(Duration::from_millis(5)).is_retryable());
    /// assert!(!PoolError::UnknownPolicy("eternal".into()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Exhausted | PoolError::Timeout(_))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
