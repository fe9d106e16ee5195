//! Error types for engine operations

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum EngineError {
    /// A bounded wait expired before the condition was met
    #[error("Wait timeout: {0}")]
    WaitTimeout(String),

    /// Operation was cancelled or interrupted
    #[error("Operation interrupted: {0}")]
    Interrupted(String),

    /// CDP communication or protocol error
    #[error("CDP I/O error: {0}")]
    CdpIo(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::WaitTimeout(_) | EngineError::CdpIo(_))
    }
}
