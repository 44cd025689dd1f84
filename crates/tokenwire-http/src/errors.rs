use tokenwire_core::{ProtocolError, StreamError};

/// Failures of a single upstream HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or its response not read.
    #[error("request failed: {message}")]
    Request { message: String },
    /// The upstream answered with a non-success status.
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },
    /// Client or request configuration was invalid.
    #[error("config error: {0}")]
    Config(String),
}

impl TransportError {
    /// Creates a request-level error.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Creates a status error from a response code and body text.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// Returns the HTTP status code, if the upstream answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::request(err.to_string())
    }
}

/// Errors surfaced by [`CompletionClient`](crate::client::CompletionClient).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The client was configured incorrectly.
    #[error("config error: {0}")]
    Config(String),
    /// The request failed or the response stream broke.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The response body was not valid tagged protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<StreamError> for ClientError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Transport { message } => Self::Transport(TransportError::request(message)),
            StreamError::Protocol(err) => Self::Protocol(err),
        }
    }
}
