/*!
Error taxonomy shared by the kernel primitives
*/

use std::time::Duration;
use thiserror::Error;

/// Raised before any attempt when the caller cannot prove an identity
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityBoundaryError {
    #[error("identity boundary: no access token available")]
    Missing,

    #[error("identity boundary: malformed access token ({reason})")]
    Malformed { reason: String },
}

/// Why a single attempt of a retried operation failed
#[derive(Debug, Error)]
pub enum AttemptFailure<E> {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Operation(E),
}

impl<E> AttemptFailure<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AttemptFailure::TimedOut(_))
    }

    /// The operation's own error, if the attempt did not simply time out
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            AttemptFailure::Operation(e) => Some(e),
            AttemptFailure::TimedOut(_) => None,
        }
    }
}

/// Errors surfaced by the retry executor
#[derive(Debug, Error)]
pub enum ResurrectionError<E> {
    #[error(transparent)]
    IdentityBoundary(#[from] IdentityBoundaryError),

    #[error("retry exhausted after {attempts} attempts ({total_backoff:?} backoff): {last}")]
    RetryExhausted {
        attempts: u32,
        total_backoff: Duration,
        #[source]
        last: AttemptFailure<E>,
    },
}

impl<E> ResurrectionError<E> {
    pub fn is_identity_boundary(&self) -> bool {
        matches!(self, ResurrectionError::IdentityBoundary(_))
    }
}

/// Errors from the findings channel
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("findings channel connection timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error("finding serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors while loading a kernel configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors from the local token store
#[derive(Debug, Error)]
pub enum TokenStoreError {
    #[error("token store i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("token store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
