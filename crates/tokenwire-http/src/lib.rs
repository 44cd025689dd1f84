//! HTTP surfaces for tokenwire streams.
//!
//! [`ProviderClient`] opens one upstream provider stream, [`StreamingTextResponse`]
//! serves a text stream from an axum handler, and [`CompletionClient`] consumes
//! such an endpoint into a shared [`CompletionStore`].

/// Completion client and shared completion store.
pub mod client;
/// Upstream connection settings.
pub mod config;
pub mod errors;
pub mod prelude;
/// Streamed axum response.
pub mod response;
/// Transport trait and reqwest implementation.
pub mod transport;
/// Provider client.
pub mod upstream;

pub use client::{
    Completion, CompletionClient, CompletionClientBuilder, CompletionState, CompletionStore,
    StreamMode,
};
pub use config::{AuthScheme, UpstreamConfig, provider_defaults};
pub use errors::{ClientError, TransportError};
pub use response::{STREAM_DATA_HEADER, StreamingTextResponse};
pub use transport::{ERROR_BODY_LIMIT, ReqwestTransport, Transport, TransportRequest, TransportResponse};
pub use upstream::{ProviderClient, StreamRequest};
