use thiserror::Error;

use crate::id::StorageKey;
use crate::info::Status;

/// Canonical result for tmpstore.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("storage handler is not started")]
    HandlerStopped,

    #[error("temporary storage {key} does not exist")]
    NotExists { key: StorageKey },

    #[error("temporary storage {key} has status '{actual}', expected '{expected}'")]
    InvalidStatus {
        key: StorageKey,
        expected: Status,
        actual: Status,
    },

    // Any lock taken while opening has already been released when this is returned.
    #[error("failed to open stream on temporary storage {key}: {source}")]
    StreamOpen {
        key: StorageKey,
        #[source]
        source: Box<Error>,
    },

    #[error("stream on temporary storage {key} is already closed")]
    StreamClosed { key: StorageKey },

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn stream_open(key: StorageKey, source: Error) -> Self {
        Error::StreamOpen {
            key,
            source: Box::new(source),
        }
    }

    /// Innermost error, looking through `StreamOpen` wrappers.
    pub fn cause(&self) -> &Error {
        match self {
            Error::StreamOpen { source, .. } => source.cause(),
            other => other,
        }
    }

    pub fn is_not_exists(&self) -> bool {
        matches!(self.cause(), Error::NotExists { .. })
    }

    pub fn is_invalid_status(&self) -> bool {
        matches!(self.cause(), Error::InvalidStatus { .. })
    }

    pub fn is_handler_stopped(&self) -> bool {
        matches!(self.cause(), Error::HandlerStopped)
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(io) => io,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}
