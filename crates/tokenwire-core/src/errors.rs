/// Errors carried inside a text or encoded byte stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Reading from the upstream byte source failed.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// A tagged protocol line could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl StreamError {
    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Returns true for errors raised by the protocol decoder.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

/// Decode failures for the tagged line protocol.
///
/// Every variant is fatal for the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The line has no `<tag>:` prefix.
    #[error("stream part is missing the tag separator: {line:?}")]
    MissingSeparator { line: String },
    /// The tag is not one of the defined stream part tags.
    #[error("unknown stream part tag {tag:?}")]
    UnknownTag { tag: String },
    /// The payload is not valid JSON of the type the tag requires.
    #[error("invalid payload for stream part tag {tag}: {message}")]
    InvalidPayload { tag: char, message: String },
    /// The line is not valid UTF-8.
    #[error("stream part is not valid UTF-8")]
    InvalidUtf8,
}

impl ProtocolError {
    pub(crate) fn invalid_payload(tag: char, err: impl std::fmt::Display) -> Self {
        Self::InvalidPayload {
            tag,
            message: err.to_string(),
        }
    }
}

/// Misuse of the side-channel producer API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataError {
    /// `append` was called after `close`.
    #[error("stream data is closed; no further values can be appended")]
    Closed,
    /// The appended value could not be converted to JSON.
    #[error("failed to serialize stream data value: {0}")]
    Serialize(String),
}
