//! Streamed HTTP response body for a text stream.

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tokenwire_core::protocol::encode;
use tokenwire_core::{AbortHandle, StreamData, TextStream};
use tracing::{debug, warn};

/// Marks a body that uses the tagged `0:`/`2:` line protocol.
pub const STREAM_DATA_HEADER: &str = "x-experimental-stream-data";

/// Response wrapping a [`TextStream`], optionally multiplexed with [`StreamData`].
///
/// The body length is unknown, so transfer framing is left to the server.
/// Dropping the body (for example on client disconnect) releases the
/// upstream connection.
pub struct StreamingTextResponse {
    text: TextStream,
    data: Option<StreamData>,
    status: StatusCode,
    headers: HeaderMap,
}

impl StreamingTextResponse {
    /// Plain mode: fragments are written as raw UTF-8.
    pub fn new(text: TextStream) -> Self {
        Self {
            text,
            data: None,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
        }
    }

    /// Switches to tagged mode with the given data channel.
    ///
    /// The body does not end until `data` is closed or the session aborts.
    pub fn with_data(mut self, data: StreamData) -> Self {
        self.data = Some(data);
        self
    }

    /// Response status; defaults to `200 OK`.
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Adds a header, replacing any default of the same name.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Adds a header value, keeping earlier values of the same name.
    pub fn append_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Cancels the upstream read. Bytes already emitted still reach the client.
    pub fn abort_handle(&self) -> AbortHandle {
        self.text.abort_handle()
    }

    /// True when the body uses the tagged line protocol.
    pub fn is_tagged(&self) -> bool {
        self.data.is_some()
    }
}

impl IntoResponse for StreamingTextResponse {
    fn into_response(self) -> Response {
        let tagged = self.is_tagged();
        debug!(tagged, status = %self.status, "streaming text response");
        let mut builder = Response::builder()
            .status(self.status)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .header(CACHE_CONTROL, "no-cache");
        if tagged {
            builder = builder.header(STREAM_DATA_HEADER, "true");
        }
        let body = Body::from_stream(encode(self.text, self.data));
        let mut response = builder.body(body).unwrap_or_else(|err| {
            warn!(error = %err, "failed to build streaming response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        });
        let headers = response.headers_mut();
        let mut current: Option<HeaderName> = None;
        for (name, value) in self.headers {
            if let Some(name) = name {
                headers.remove(&name);
                current = Some(name);
            }
            if let Some(name) = &current {
                headers.append(name.clone(), value);
            }
        }
        response
    }
}
