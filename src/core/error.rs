use std::time::Duration;
use thiserror::Error;

/// Request-level failures of the chat pipeline. Everything that maps to an
/// HTTP status code the caller can act on lives here; transient per-file and
/// per-tool faults are absorbed into the response text instead.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("chat not found")]
    NotFound,

    #[error("chat belongs to a different user")]
    Forbidden,

    #[error("completion request failed: {0}")]
    Completion(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Outcome of a single tool invocation against the worker. Absorbed into the
/// assistant text as an annotation; never fatal for the request.
#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("tool worker is not ready")]
    WorkerNotReady,

    #[error("tool call timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Invocation(String),
}
