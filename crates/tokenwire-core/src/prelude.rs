//! Common imports for producers and consumers of token streams.
pub use crate::protocol::{decode_stream, decode_text, encode};
pub use crate::{
    AbortHandle, ByteStream, DataError, ProtocolError, ProviderFormat, StreamCallbacks,
    StreamData, StreamError, StreamPart, TextStream,
};
