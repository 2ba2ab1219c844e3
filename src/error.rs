use std::error::Error as StdError;

use thiserror::Error;

/// Lovanote's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Lovanote's crate-wide error type.
///
/// This is intentionally decoupled from `anyhow` so downstream libraries aren't forced to
/// adopt `anyhow` in their own public APIs.
#[derive(Debug, Error)]
pub enum Error {
    /// Writing (or later removing) a staged upload failed.
    #[error("staging failed: {0}")]
    Staging(#[source] std::io::Error),

    /// The engine process could not be launched at all (missing binary, bad permissions).
    ///
    /// Kept separate from a started-then-failed engine: launch failures are reported out of
    /// band, while runtime failures travel inside the reply stream as its terminal line.
    #[error("engine unavailable: {0}")]
    EngineUnavailable(#[source] std::io::Error),

    /// Reading engine output or writing the reply stream failed mid-run.
    #[error("stream failed: {0}")]
    Stream(#[source] std::io::Error),

    /// The object store rejected or failed an upload.
    #[error("store upload failed: {0}")]
    Upload(String),

    /// Required configuration was missing or malformed.
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

impl Error {
    pub(crate) fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Whether this error means the engine never started.
    pub fn is_engine_unavailable(&self) -> bool {
        matches!(self, Self::EngineUnavailable(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Message(format!("{err:#}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Stream(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(Box::new(err))
    }
}
