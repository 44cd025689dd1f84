//! Provider client: one upstream call per stream session.

use std::sync::Arc;
use std::time::Duration;

use tokenwire_core::{ProviderFormat, StreamCallbacks, TextStream};
use tokio::time::Instant;
use tracing::debug;

use crate::config::UpstreamConfig;
use crate::errors::TransportError;
use crate::transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};

type ResponseHook = Box<dyn FnOnce(&TransportResponse) + Send>;

/// Issues streaming requests against one configured provider.
#[derive(Clone)]
pub struct ProviderClient {
    config: UpstreamConfig,
    transport: Arc<dyn Transport>,
}

impl ProviderClient {
    /// Creates a client backed by [`ReqwestTransport`].
    pub fn new(config: UpstreamConfig) -> Result<Self, TransportError> {
        Ok(Self::with_transport(config, Arc::new(ReqwestTransport::new()?)))
    }

    /// Creates a client over a custom transport.
    pub fn with_transport(config: UpstreamConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    /// Creates a client from the provider's environment variables.
    pub fn from_env(format: ProviderFormat) -> Result<Self, TransportError> {
        Self::new(UpstreamConfig::from_env(format)?)
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    pub fn format(&self) -> ProviderFormat {
        self.config.format
    }

    /// Starts building a streaming request with the given provider payload.
    ///
    /// The body is sent as-is; for `GET` providers it is ignored.
    pub fn request(&self, body: serde_json::Value) -> StreamRequest<'_> {
        StreamRequest {
            client: self,
            body,
            callbacks: StreamCallbacks::new(),
            on_response: None,
            deadline: self.config.deadline,
        }
    }
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("format", &self.config.format)
            .field("endpoint", &self.config.endpoint)
            .finish_non_exhaustive()
    }
}

/// Builder for one upstream stream session.
pub struct StreamRequest<'a> {
    client: &'a ProviderClient,
    body: serde_json::Value,
    callbacks: StreamCallbacks,
    on_response: Option<ResponseHook>,
    deadline: Option<Duration>,
}

impl StreamRequest<'_> {
    /// Fires once, when the returned stream is first polled.
    pub fn on_start(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.callbacks = self.callbacks.on_start(hook);
        self
    }

    /// Fires for every text fragment.
    pub fn on_token(mut self, hook: impl FnMut(&str) + Send + 'static) -> Self {
        self.callbacks = self.callbacks.on_token(hook);
        self
    }

    /// Fires once with the full text on natural completion.
    pub fn on_completion(mut self, hook: impl FnOnce(&str) + Send + 'static) -> Self {
        self.callbacks = self.callbacks.on_completion(hook);
        self
    }

    /// Fires once when the response head arrives, before the status is checked.
    pub fn on_response(mut self, hook: impl FnOnce(&TransportResponse) + Send + 'static) -> Self {
        self.on_response = Some(Box::new(hook));
        self
    }

    /// Aborts the session once `deadline` has elapsed since [`send`](Self::send).
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sends the request once and returns the provider's text stream.
    pub async fn send(self) -> Result<TextStream, TransportError> {
        let StreamRequest {
            client,
            body,
            callbacks,
            on_response,
            deadline,
        } = self;
        let config = &client.config;
        let request = TransportRequest {
            method: config.method.clone(),
            url: config.endpoint.clone(),
            headers: config.header_map()?,
            body: (config.method != reqwest::Method::GET).then_some(body),
        };
        debug!(provider = %config.format, endpoint = %config.endpoint, "starting upstream stream");

        let started = Instant::now();
        let response = within(
            deadline,
            started,
            "before the upstream responded",
            client.transport.send(request),
        )
        .await?;
        if let Some(hook) = on_response {
            hook(&response);
        }
        let response = within(
            deadline,
            started,
            "while reading the upstream error body",
            response.error_for_status(),
        )
        .await?;

        let mut text = TextStream::from_provider(config.format, response.body, callbacks);
        if let Some(limit) = deadline {
            text = text.with_deadline(limit.saturating_sub(started.elapsed()));
        }
        Ok(text)
    }
}

/// Runs `call` within what is left of `deadline`, if one is set.
async fn within<T>(
    deadline: Option<Duration>,
    started: Instant,
    stage: &str,
    call: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    let Some(limit) = deadline else {
        return call.await;
    };
    let remaining = limit.saturating_sub(started.elapsed());
    tokio::time::timeout(remaining, call)
        .await
        .map_err(|_| TransportError::request(format!("deadline of {limit:?} elapsed {stage}")))?
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use futures::{StreamExt as _, stream};
    use reqwest::StatusCode;
    use reqwest::header::{AUTHORIZATION, HeaderMap};
    use tokenwire_core::{ByteStream, StreamError};

    use super::*;

    struct FakeTransport {
        status: StatusCode,
        chunks: Vec<&'static [u8]>,
        hang_after_chunks: bool,
        seen: Mutex<Vec<TransportRequest>>,
    }

    impl FakeTransport {
        fn new(status: StatusCode, chunks: Vec<&'static [u8]>) -> Self {
            Self {
                status,
                chunks,
                hang_after_chunks: false,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn hanging(mut self) -> Self {
            self.hang_after_chunks = true;
            self
        }
    }

    #[async_trait::async_trait]
    impl Transport for FakeTransport {
        async fn send(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, TransportError> {
            self.seen.lock().expect("lock").push(request);
            let chunks = stream::iter(
                self.chunks
                    .clone()
                    .into_iter()
                    .map(|c| Ok::<_, StreamError>(Bytes::from_static(c))),
            );
            let body: ByteStream = if self.hang_after_chunks {
                Box::pin(chunks.chain(stream::pending()))
            } else {
                Box::pin(chunks)
            };
            Ok(TransportResponse {
                status: self.status,
                headers: HeaderMap::new(),
                body,
            })
        }
    }

    fn openai_client(transport: Arc<FakeTransport>) -> ProviderClient {
        let config = UpstreamConfig::new(ProviderFormat::OpenAi, "http://upstream/v1/chat/completions")
            .api_key("sk-test");
        ProviderClient::with_transport(config, transport)
    }

    #[tokio::test]
    async fn send_streams_provider_text_and_fires_hooks() {
        let transport = Arc::new(FakeTransport::new(
            StatusCode::OK,
            vec![
                b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
                b"data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\ndata: [DONE]\n\n",
            ],
        ));
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let finished = Arc::new(Mutex::new(None));
        let (s, f) = (statuses.clone(), finished.clone());

        let text = openai_client(transport.clone())
            .request(serde_json::json!({"model": "gpt-4o-mini", "stream": true}))
            .on_response(move |res| s.lock().expect("lock").push(res.status))
            .on_completion(move |full| *f.lock().expect("lock") = Some(full.to_string()))
            .send()
            .await
            .expect("stream");
        assert_eq!(text.collect_text().await.expect("text"), "Hi there");
        assert_eq!(*statuses.lock().expect("lock"), vec![StatusCode::OK]);
        assert_eq!(finished.lock().expect("lock").as_deref(), Some("Hi there"));

        let seen = transport.seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].headers[AUTHORIZATION], "Bearer sk-test");
        assert_eq!(
            seen[0].body,
            Some(serde_json::json!({"model": "gpt-4o-mini", "stream": true}))
        );
    }

    #[tokio::test]
    async fn non_success_status_is_returned_after_on_response() {
        let transport = Arc::new(FakeTransport::new(
            StatusCode::TOO_MANY_REQUESTS,
            vec![b"rate limited"],
        ));
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        let err = openai_client(transport.clone())
            .request(serde_json::json!({}))
            .on_response(move |_| *flag.lock().expect("lock") = true)
            .send()
            .await
            .expect_err("status error");
        assert_eq!(err, TransportError::status(429, "rate limited"));
        assert!(*called.lock().expect("lock"));
        assert_eq!(transport.seen.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn get_providers_send_no_body() {
        let transport = Arc::new(FakeTransport::new(
            StatusCode::OK,
            vec![b"event: output\ndata: ok\n\nevent: done\ndata: {}\n\n"],
        ));
        let config = UpstreamConfig::new(ProviderFormat::Replicate, "http://upstream/stream");
        let client = ProviderClient::with_transport(config, transport.clone());
        let text = client
            .request(serde_json::json!({"ignored": true}))
            .send()
            .await
            .expect("stream");
        assert_eq!(text.collect_text().await.expect("text"), "ok");
        let seen = transport.seen.lock().expect("lock");
        assert_eq!(seen[0].method, reqwest::Method::GET);
        assert!(seen[0].body.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts_a_stalled_stream() {
        let transport = Arc::new(
            FakeTransport::new(StatusCode::OK, vec![b"{\"response\":\"par\",\"done\":false}\n"])
                .hanging(),
        );
        let config = UpstreamConfig::new(ProviderFormat::Ollama, "http://upstream/api/generate");
        let client = ProviderClient::with_transport(config, transport);
        let mut text = client
            .request(serde_json::json!({"prompt": "hi"}))
            .deadline(Duration::from_secs(30))
            .send()
            .await
            .expect("stream");
        assert_eq!(text.next().await, Some(Ok("par".to_string())));
        assert_eq!(text.next().await, None);
        assert!(text.abort_handle().is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_covers_a_stalled_error_body() {
        let transport = Arc::new(
            FakeTransport::new(StatusCode::SERVICE_UNAVAILABLE, vec![b"over"]).hanging(),
        );
        let config = UpstreamConfig::new(ProviderFormat::Ollama, "http://upstream/api/generate");
        let client = ProviderClient::with_transport(config, transport);
        let sent = tokio::time::timeout(
            Duration::from_secs(2),
            client
                .request(serde_json::json!({"prompt": "hi"}))
                .deadline(Duration::from_millis(100))
                .send(),
        )
        .await
        .expect("send returns within the deadline");
        let err = sent.expect_err("deadline error");
        assert_eq!(
            err,
            TransportError::request(
                "deadline of 100ms elapsed while reading the upstream error body"
            )
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_timer_ends_with_the_stream() {
        let transport = Arc::new(FakeTransport::new(
            StatusCode::OK,
            vec![b"{\"response\":\"ok\",\"done\":false}\n{\"response\":\"\",\"done\":true}\n"],
        ));
        let config = UpstreamConfig::new(ProviderFormat::Ollama, "http://upstream/api/generate");
        let client = ProviderClient::with_transport(config, transport);
        let text = client
            .request(serde_json::json!({"prompt": "hi"}))
            .deadline(Duration::from_secs(30))
            .send()
            .await
            .expect("stream");
        assert!(text.has_pending_deadline());
        let abort = text.abort_handle();
        assert_eq!(text.collect_text().await.expect("text"), "ok");
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!abort.is_aborted());
    }
}
