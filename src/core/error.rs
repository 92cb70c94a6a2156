use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the favorites registry and the streaming session.
///
/// None of these are fatal to the host process. The controller and the registry
/// turn each one into a single `[ERROR]` log line before returning it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Could not resolve media URL: {0}")]
    ResolutionFailed(String),

    #[error("{0} not found. Check if it's installed and in PATH.")]
    BinaryNotFound(String),

    #[error("Failed to start encoder: {0}")]
    SpawnFailed(String),

    #[error("A streaming session is already active")]
    SessionAlreadyActive,

    #[error("A favorite with the name '{0}' already exists")]
    DuplicateName(String),

    #[error("Favorite '{0}' not found")]
    NotFound(String),

    #[error("Encoder did not exit within {0:?}")]
    TerminationTimeout(Duration),

    #[error("Config error: {0}")]
    Config(String),
}

pub type StreamResult<T> = Result<T, StreamError>;
