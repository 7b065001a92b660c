use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Error type shared by a work function, its failure subscribers and the
/// caller of `execute_async`.
#[derive(Error, Debug, Clone)]
pub enum CommandError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Execution failed: {0}")]
    Failed(Arc<dyn StdError + Send + Sync + 'static>),

    #[error("Timed out after {0:?} waiting for command to finish")]
    TimedOut(Duration),

    #[error("No tokio runtime available to run the command")]
    NoRuntime,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("TOML error: {0}")]
    Toml(Arc<toml::de::Error>),

    #[error("Serialization error: {0}")]
    Serde(Arc<serde_json::Error>),
}

impl CommandError {
    /// Wrap an arbitrary error as a work failure
    pub fn failed<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(error))
    }

    /// Wrap a plain message as a work failure
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(Arc::new(MessageError(message.into())))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The underlying failure, if this is a work failure
    pub fn failure(&self) -> Option<&Arc<dyn StdError + Send + Sync + 'static>> {
        match self {
            Self::Failed(inner) => Some(inner),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CommandError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

impl From<toml::de::Error> for CommandError {
    fn from(error: toml::de::Error) -> Self {
        Self::Toml(Arc::new(error))
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serde(Arc::new(error))
    }
}

/// Plain-text failure produced by [`CommandError::msg`]
#[derive(Error, Debug)]
#[error("{0}")]
pub struct MessageError(pub String);

pub type Result<T> = std::result::Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_keeps_identity_across_clones() {
        let err = CommandError::msg("boom");
        let copy = err.clone();
        let (a, b) = (err.failure().unwrap(), copy.failure().unwrap());
        assert!(Arc::ptr_eq(a, b));
        assert_eq!(copy.to_string(), "Execution failed: boom");
    }

    #[test]
    fn test_cancelled_is_not_a_failure() {
        let err = CommandError::Cancelled;
        assert!(err.is_cancelled());
        assert!(err.failure().is_none());
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CommandError = io.into();
        assert!(matches!(err, CommandError::Io(_)));
    }
}
