//! Error types for Parley

use thiserror::Error;

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Parley
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Context overflow: required context needs {required} tokens, budget is {budget}")]
    ContextOverflow { required: usize, budget: usize },

    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("Loop detected: the same action repeated {repeats} times without progress")]
    LoopDetected { repeats: usize },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Max iterations reached")]
    MaxIterations,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable code sent to clients in `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            Error::UpstreamTimeout(_) => "upstream_timeout",
            Error::Http(e) if e.is_timeout() => "upstream_timeout",
            Error::Llm(_) | Error::Http(_) => "upstream_error",
            Error::ContextOverflow { .. } => "context_overflow",
            Error::UnsupportedAction(_) => "unsupported_action",
            Error::LoopDetected { .. } => "loop_detected",
            Error::Protocol(_) | Error::Json(_) => "protocol_error",
            Error::MaxIterations => "max_iterations",
            _ => "internal",
        }
    }

    /// Whether the error ends the current turn.
    ///
    /// Only search-path upstream failures are recovered from, and those never
    /// reach the session as an `Error` (the dispatcher folds them into a
    /// failed `ActionResult`), so every error seen by a turn is fatal to it.
    pub fn is_turn_fatal(&self) -> bool {
        !matches!(self, Error::Protocol(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
