//! Error types for cachet.

use std::io;

use thiserror::Error;

use crate::effects::{CacheError, TransportError};

/// Failure reported by a content parser.
pub type ParseError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Client-side status (4xx by default). Never retried.
    #[error("access failed with HTTP {status}: {url}")]
    AccessFailed {
        status: u16,
        url:    String,
        body:   Option<Vec<u8>>,
    },

    #[error("server error HTTP {status}: {url}")]
    Server {
        status: u16,
        url:    String,
        body:   Option<Vec<u8>>,
    },

    #[error("unexpected HTTP {status}: {url}")]
    Status {
        status: u16,
        url:    String,
        body:   Option<Vec<u8>>,
    },

    #[error("connection failed after {attempts} attempts: {url}")]
    RetryExhausted {
        attempts: u32,
        url:      String,
        errors:   Vec<Error>,
    },

    #[error("task canceled")]
    Interrupted,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("parse failed: {0}")]
    Parse(#[source] ParseError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("config syntax error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// HTTP status of a status-class failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::AccessFailed { status, .. }
            | Error::Server { status, .. }
            | Error::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Captured error-response body, when the error policy asked for it.
    pub fn error_body(&self) -> Option<&[u8]> {
        match self {
            Error::AccessFailed { body, .. }
            | Error::Server { body, .. }
            | Error::Status { body, .. } => body.as_deref(),
            _ => None,
        }
    }

    pub fn error_text(&self) -> Option<String> {
        self.error_body()
            .map(|body| String::from_utf8_lossy(body).into_owned())
    }

    pub fn is_interrupted(&self) -> bool { matches!(self, Error::Interrupted) }

    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_timeout(),
            Error::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Failures that no retry can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::AccessFailed { .. }
                | Error::Interrupted
                | Error::InvalidPolicy(_)
                | Error::InvalidRequest(_)
                | Error::Url(_)
                | Error::Config(_)
                | Error::InvalidConfig(_)
        )
    }
}
