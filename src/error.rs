//! Error types shared across the crate.
//!
//! Errors are scoped as narrowly as possible. Incomplete data is never an
//! error. [`DecodeError`] abandons one connection, [`SinkError`] one message,
//! and [`Error`] aborts the whole run.

use std::io;

use thiserror::Error;

use crate::{
    capture::CaptureError,
    config::ConfigError,
    endpoint::ConnectionKey,
    h2::FrameError,
    schema::ResolveError,
};

/// A connection's framing became unparseable.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("connection {connection}: {source}")]
pub struct DecodeError {
    /// Connection that was abandoned.
    pub connection: ConnectionKey,
    /// The framing violation.
    #[source]
    pub source: FrameError,
}

/// A sink failed to render or write a message.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
    #[error("serialisation failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fatal errors that stop a run.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Schema(#[from] ResolveError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

impl Error {
    /// Process exit code for this error: 2 for setup problems, 1 for
    /// capture failures.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Schema(_) => 2,
            Self::Capture(_) => 1,
        }
    }
}

/// Result alias for fallible run-level operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::{capture::CaptureError, config::ConfigError};

    #[test]
    fn exit_codes_follow_error_scope() {
        assert_eq!(Error::from(ConfigError::MissingSource).exit_code(), 2);
        let capture = CaptureError::UnsupportedLinkType(147);
        assert_eq!(Error::from(capture).exit_code(), 1);
    }
}
