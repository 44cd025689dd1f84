//! Common imports for serving and consuming completions.
pub use crate::{
    ClientError, CompletionClient, CompletionState, CompletionStore, ProviderClient, StreamMode,
    StreamingTextResponse, TransportError, UpstreamConfig,
};
pub use tokenwire_core::prelude::*;
