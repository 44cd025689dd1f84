//! Streaming transport for incremental model output.
//!
//! Provider byte streams are normalized into a [`TextStream`] of text
//! fragments. The [`protocol`] module multiplexes that stream with a
//! [`StreamData`] side channel of JSON values into `0:`/`2:` tagged lines and
//! decodes them again on the consuming side.
//!
//! ```no_run
//! use futures::StreamExt as _;
//! use tokenwire_core::prelude::*;
//!
//! # async fn demo(bytes: ByteStream) -> Result<(), StreamError> {
//! let text = TextStream::from_provider(ProviderFormat::OpenAi, bytes, StreamCallbacks::new());
//! let data = StreamData::new();
//! data.append(&serde_json::json!({"source": "docs"})).ok();
//! data.close();
//!
//! let mut parts = decode_stream(encode(text, Some(data)));
//! while let Some(part) = parts.next().await {
//!     println!("{:?}", part?);
//! }
//! # Ok(())
//! # }
//! ```

/// Cooperative cancellation primitives.
pub mod abort;
/// Side channel of JSON values.
pub mod data;
pub mod errors;
/// Byte framing for provider streams.
pub mod frame;
pub mod observability;
pub mod prelude;
/// Tagged line protocol encoder and decoder.
pub mod protocol;
/// Canonical text fragment stream.
pub mod stream;
/// Provider wire formats.
pub mod vendors;

pub use abort::{AbortHandle, AbortSignal};
pub use data::StreamData;
pub use errors::{DataError, ProtocolError, StreamError};
pub use frame::{Frame, FrameDelimiter, FrameReader};
pub use protocol::{EncodedStream, ProtocolDecoder, StreamPart};
pub use stream::{ByteStream, FRAGMENT_BUFFER, StreamCallbacks, TextStream};
pub use vendors::{FrameOutcome, ProviderFormat};
