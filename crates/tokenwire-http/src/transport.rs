//! HTTP transport seam.
//!
//! Everything above this module talks to a [`Transport`]; the production
//! implementation is [`ReqwestTransport`], tests substitute in-memory fakes.

use std::fmt;

use futures::StreamExt as _;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use tokenwire_core::{ByteStream, StreamError};
use tracing::debug;

use crate::errors::TransportError;

/// Most bytes of a non-success body kept in [`TransportError::Status`].
pub const ERROR_BODY_LIMIT: usize = 8 * 1024;

/// One outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    /// JSON body; omitted when `None`.
    pub body: Option<serde_json::Value>,
}

impl TransportRequest {
    /// Creates a JSON `POST` request.
    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Some(body),
        }
    }

    /// Replaces the request headers.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Response head plus the still-unread body.
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl TransportResponse {
    /// Returns the response unchanged on success, or reads the body into a
    /// [`TransportError::Status`].
    ///
    /// Reading stops after [`ERROR_BODY_LIMIT`] bytes.
    pub async fn error_for_status(self) -> Result<Self, TransportError> {
        if self.status.is_success() {
            return Ok(self);
        }
        let status = self.status.as_u16();
        let mut body = self.body;
        let mut raw = Vec::new();
        while raw.len() < ERROR_BODY_LIMIT {
            match body.next().await {
                Some(Ok(chunk)) => raw.extend_from_slice(&chunk),
                Some(Err(_)) | None => break,
            }
        }
        raw.truncate(ERROR_BODY_LIMIT);
        let text = if raw.is_empty() {
            "<empty body>".to_string()
        } else {
            String::from_utf8_lossy(&raw).into_owned()
        };
        Err(TransportError::status(status, text))
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Sends one request and hands back the streaming response. Never retries.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a client without a request timeout; deadlines belong to the caller.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        debug!(method = %request.method, url = %request.url, "sending upstream request");
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        debug!(%status, url = %request.url, "upstream response headers received");
        let body: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| StreamError::transport(e.to_string()))),
        );
        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
