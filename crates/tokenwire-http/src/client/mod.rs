//! Completion client: posts a prompt and folds the streamed reply into a
//! shared [`CompletionStore`].

mod store;

pub use store::{Completion, CompletionStore};

use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt as _;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokenwire_core::protocol::{decode_stream, decode_text};
use tokenwire_core::{AbortHandle, AbortSignal, StreamPart};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::errors::ClientError;
use crate::transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};

/// How the response body is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamMode {
    /// Raw UTF-8 text.
    #[default]
    Text,
    /// Tagged `0:`/`2:` lines carrying text and data batches.
    Data,
}

/// Lifecycle of a completion request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CompletionState {
    #[default]
    Idle,
    Streaming,
    Completed,
    /// Failed; partial text stays in the store.
    Errored(String),
    /// Stopped by the caller; partial text stays in the store.
    Aborted,
}

type ResponseHook = Arc<dyn Fn(&TransportResponse) + Send + Sync>;
type FinishHook = Arc<dyn Fn(&str, &str) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&ClientError) + Send + Sync>;

/// Builder for [`CompletionClient`].
pub struct CompletionClientBuilder {
    endpoint: String,
    id: Option<String>,
    store: Option<CompletionStore>,
    transport: Option<Arc<dyn Transport>>,
    headers: Vec<(String, String)>,
    body: serde_json::Map<String, serde_json::Value>,
    mode: StreamMode,
    on_response: Option<ResponseHook>,
    on_finish: Option<FinishHook>,
    on_error: Option<ErrorHook>,
}

impl CompletionClientBuilder {
    /// Session key; clients sharing a key and store share state.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Store to write into; defaults to a private one.
    pub fn store(mut self, store: CompletionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Replaces the default [`ReqwestTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Extra request header, validated in [`build`](Self::build).
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Extra field merged into every request body next to `prompt`.
    pub fn body_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.body.insert(key.into(), value);
        self
    }

    /// How the response body is read. Defaults to [`StreamMode::Text`].
    pub fn stream_mode(mut self, mode: StreamMode) -> Self {
        self.mode = mode;
        self
    }

    /// Called with the response head before its status is checked.
    pub fn on_response(mut self, hook: impl Fn(&TransportResponse) + Send + Sync + 'static) -> Self {
        self.on_response = Some(Arc::new(hook));
        self
    }

    /// Called with `(prompt, completion)` after a natural end.
    pub fn on_finish(mut self, hook: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.on_finish = Some(Arc::new(hook));
        self
    }

    /// Called with the error when a request fails. Not called on `stop`.
    pub fn on_error(mut self, hook: impl Fn(&ClientError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Validates headers and builds the client. Without an explicit `id`
    /// the session key is a fresh UUID.
    pub fn build(self) -> Result<CompletionClient, ClientError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ClientError::Config(format!("invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ClientError::Config(format!("invalid value for header {name}: {e}")))?;
            headers.insert(header, value);
        }
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let id = self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let (state, _) = watch::channel(CompletionState::Idle);
        Ok(CompletionClient {
            inner: Arc::new(Inner {
                endpoint: self.endpoint,
                id,
                store: self.store.unwrap_or_default(),
                transport,
                headers,
                body: self.body,
                mode: self.mode,
                on_response: self.on_response,
                on_finish: self.on_finish,
                on_error: self.on_error,
                state,
                abort: Mutex::new(None),
            }),
        })
    }
}

struct Inner {
    endpoint: String,
    id: String,
    store: CompletionStore,
    transport: Arc<dyn Transport>,
    headers: HeaderMap,
    body: serde_json::Map<String, serde_json::Value>,
    mode: StreamMode,
    on_response: Option<ResponseHook>,
    on_finish: Option<FinishHook>,
    on_error: Option<ErrorHook>,
    state: watch::Sender<CompletionState>,
    abort: Mutex<Option<AbortHandle>>,
}

/// Consumes a completion endpoint and tracks the streamed reply.
///
/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct CompletionClient {
    inner: Arc<Inner>,
}

enum Outcome {
    Finished,
    Aborted,
}

impl CompletionClient {
    pub fn builder(endpoint: impl Into<String>) -> CompletionClientBuilder {
        CompletionClientBuilder {
            endpoint: endpoint.into(),
            id: None,
            store: None,
            transport: None,
            headers: Vec::new(),
            body: serde_json::Map::new(),
            mode: StreamMode::default(),
            on_response: None,
            on_finish: None,
            on_error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn store(&self) -> &CompletionStore {
        &self.inner.store
    }

    /// Current completion text under this client's key.
    pub fn completion(&self) -> String {
        self.inner.store.get(&self.inner.id).text
    }

    /// Data values received under this client's key.
    pub fn data(&self) -> Vec<serde_json::Value> {
        self.inner.store.get(&self.inner.id).data
    }

    /// Current request lifecycle state.
    pub fn state(&self) -> CompletionState {
        self.inner.state.borrow().clone()
    }

    /// True while a request is streaming.
    pub fn is_loading(&self) -> bool {
        self.state() == CompletionState::Streaming
    }

    /// Watches the completion stored under this client's key.
    pub fn subscribe(&self) -> watch::Receiver<Completion> {
        self.inner.store.subscribe(&self.inner.id)
    }

    /// Watches the request lifecycle state.
    pub fn subscribe_state(&self) -> watch::Receiver<CompletionState> {
        self.inner.state.subscribe()
    }

    /// Overwrites the completion text locally.
    pub fn set_completion(&self, text: impl Into<String>) {
        self.inner.store.set_text(&self.inner.id, text);
    }

    /// Stops the in-flight request, keeping the partial text.
    pub fn stop(&self) {
        if let Some(handle) = self.lock_abort().as_ref() {
            debug!(id = %self.inner.id, "stopping completion");
            handle.abort();
        }
    }

    /// Sends `prompt` and streams the reply into the store.
    ///
    /// Returns the text received by this call. A stopped request returns its
    /// partial text as `Ok`. Starting while another request streams stops
    /// the earlier one.
    pub async fn complete(&self, prompt: &str) -> Result<String, ClientError> {
        let inner = &self.inner;
        let (handle, mut signal) = AbortHandle::new();
        {
            let mut slot = self.lock_abort();
            if let Some(previous) = slot.replace(handle.clone()) {
                previous.abort();
            }
            inner.store.set_text(&inner.id, "");
        }
        inner.state.send_replace(CompletionState::Streaming);
        debug!(id = %inner.id, endpoint = %inner.endpoint, mode = ?inner.mode, "completion started");

        let mut text = String::new();
        let result = self.run(prompt, &mut text, &handle, &mut signal).await;
        let state = match &result {
            Ok(Outcome::Finished) => {
                if let Some(hook) = &inner.on_finish {
                    hook(prompt, &text);
                }
                CompletionState::Completed
            }
            Ok(Outcome::Aborted) => CompletionState::Aborted,
            Err(err) => {
                warn!(id = %inner.id, error = %err, "completion failed");
                if let Some(hook) = &inner.on_error {
                    hook(err);
                }
                CompletionState::Errored(err.to_string())
            }
        };
        debug!(id = %inner.id, state = ?state, chars = text.len(), "completion ended");
        if self.release_session(&handle) {
            inner.state.send_replace(state);
        }
        result.map(|_| text)
    }

    async fn run(
        &self,
        prompt: &str,
        text: &mut String,
        handle: &AbortHandle,
        signal: &mut AbortSignal,
    ) -> Result<Outcome, ClientError> {
        let inner = &self.inner;
        let mut body = inner.body.clone();
        body.insert("prompt".into(), serde_json::Value::String(prompt.to_string()));
        let request = TransportRequest::post_json(inner.endpoint.clone(), body.into())
            .headers(inner.headers.clone());

        let response = tokio::select! {
            biased;
            _ = signal.aborted() => return Ok(Outcome::Aborted),
            response = inner.transport.send(request) => response?,
        };
        if let Some(hook) = &inner.on_response {
            hook(&response);
        }
        let response = tokio::select! {
            biased;
            _ = signal.aborted() => return Ok(Outcome::Aborted),
            response = response.error_for_status() => response?,
        };

        match inner.mode {
            StreamMode::Text => {
                let mut fragments = decode_text(response.body);
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = signal.aborted() => return Ok(Outcome::Aborted),
                        next = fragments.next() => next,
                    };
                    let Some(fragment) = next else {
                        return Ok(Outcome::Finished);
                    };
                    let fragment = fragment?;
                    if !self.write_current(handle, |store, id| {
                        store.append_text(id, &fragment)
                    }) {
                        return Ok(Outcome::Aborted);
                    }
                    text.push_str(&fragment);
                }
            }
            StreamMode::Data => {
                let mut parts = decode_stream(response.body);
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = signal.aborted() => return Ok(Outcome::Aborted),
                        next = parts.next() => next,
                    };
                    match next {
                        None => return Ok(Outcome::Finished),
                        Some(Ok(StreamPart::Text(fragment))) => {
                            if !self.write_current(handle, |store, id| {
                                store.append_text(id, &fragment)
                            }) {
                                return Ok(Outcome::Aborted);
                            }
                            text.push_str(&fragment);
                        }
                        Some(Ok(StreamPart::Data(events))) => {
                            if !self.write_current(handle, |store, id| {
                                store.extend_data(id, events)
                            }) {
                                return Ok(Outcome::Aborted);
                            }
                        }
                        Some(Err(err)) => return Err(err.into()),
                    }
                }
            }
        }
    }

    /// Applies `write` to the store only while `handle` is the live, unstopped
    /// request. The abort slot lock orders it against a newer request's reset.
    fn write_current(
        &self,
        handle: &AbortHandle,
        write: impl FnOnce(&CompletionStore, &str),
    ) -> bool {
        let slot = self.lock_abort();
        let live =
            !handle.is_aborted() && slot.as_ref().is_some_and(|h| h.same_session(handle));
        if live {
            write(&self.inner.store, &self.inner.id);
        } else {
            debug!(id = %self.inner.id, "dropped a write from a stopped request");
        }
        live
    }

    /// Clears the abort slot if it still belongs to `handle`. A newer request
    /// owns the state otherwise.
    fn release_session(&self, handle: &AbortHandle) -> bool {
        let mut slot = self.lock_abort();
        let current = slot.as_ref().is_some_and(|h| h.same_session(handle));
        if current {
            *slot = None;
        }
        current
    }

    fn lock_abort(&self) -> std::sync::MutexGuard<'_, Option<AbortHandle>> {
        self.inner
            .abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionClient")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.endpoint)
            .field("mode", &self.inner.mode)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use futures::stream;
    use reqwest::StatusCode;
    use serde_json::json;
    use tokenwire_core::{ByteStream, ProtocolError, StreamError};

    use super::*;
    use crate::errors::TransportError;

    struct FakeTransport {
        status: StatusCode,
        chunks: Vec<&'static [u8]>,
        hang: bool,
        seen: Mutex<Vec<TransportRequest>>,
    }

    impl FakeTransport {
        fn new(chunks: Vec<&'static [u8]>) -> Arc<Self> {
            Arc::new(Self {
                status: StatusCode::OK,
                chunks,
                hang: false,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn hanging(chunks: Vec<&'static [u8]>) -> Arc<Self> {
            Arc::new(Self {
                status: StatusCode::OK,
                chunks,
                hang: true,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn stalled_error(status: StatusCode, body: &'static [u8]) -> Arc<Self> {
            Arc::new(Self {
                status,
                chunks: vec![body],
                hang: true,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing(status: StatusCode, body: &'static [u8]) -> Arc<Self> {
            Arc::new(Self {
                status,
                chunks: vec![body],
                hang: false,
                seen: Mutex::new(Vec::new()),
            })
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
            let body: ByteStream = if self.hang {
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

    fn client(transport: Arc<FakeTransport>) -> CompletionClientBuilder {
        CompletionClient::builder("http://app/api/completion").transport(transport)
    }

    #[tokio::test]
    async fn plain_mode_accumulates_text() {
        let transport = FakeTransport::new(vec![b" Hello", b", world", b". "]);
        let finished = Arc::new(Mutex::new(None));
        let slot = finished.clone();
        let client = client(transport.clone())
            .id("plain")
            .header("x-user", "u1")
            .body_field("temperature", json!(0.2))
            .on_finish(move |prompt, text| {
                *slot.lock().expect("lock") = Some((prompt.to_string(), text.to_string()));
            })
            .build()
            .expect("client");

        let text = client.complete("Say hi").await.expect("completion");
        assert_eq!(text, " Hello, world. ");
        assert_eq!(client.completion(), " Hello, world. ");
        assert_eq!(client.state(), CompletionState::Completed);
        assert_eq!(
            *finished.lock().expect("lock"),
            Some(("Say hi".to_string(), " Hello, world. ".to_string()))
        );

        let seen = transport.seen.lock().expect("lock");
        assert_eq!(seen[0].method, reqwest::Method::POST);
        assert_eq!(seen[0].headers["x-user"], "u1");
        assert_eq!(
            seen[0].body,
            Some(json!({"prompt": "Say hi", "temperature": 0.2}))
        );
    }

    #[tokio::test]
    async fn data_mode_splits_text_and_data() {
        let transport = FakeTransport::new(vec![
            b"2:[{\"t1\":\"v1\"}]\n0:\" Hel",
            b"lo\"\n0:\",\"\n0:\" world\"\n0:\".\"\n0:\" \"\n",
        ]);
        let client = client(transport)
            .stream_mode(StreamMode::Data)
            .build()
            .expect("client");
        let text = client.complete("p").await.expect("completion");
        assert_eq!(text, " Hello, world. ");
        assert_eq!(client.data(), vec![json!({"t1": "v1"})]);
        assert_eq!(client.state(), CompletionState::Completed);
    }

    #[tokio::test]
    async fn malformed_line_errors_and_keeps_partial_text() {
        let transport = FakeTransport::new(vec![b"0:\"par\"\n0:\"tial\"\nnot a part\n0:\"x\"\n"]);
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let client = client(transport)
            .stream_mode(StreamMode::Data)
            .on_error(move |err| sink.lock().expect("lock").push(err.clone()))
            .build()
            .expect("client");
        let err = client.complete("p").await.expect_err("protocol error");
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::MissingSeparator { .. })
        ));
        assert_eq!(client.completion(), "partial");
        assert!(matches!(client.state(), CompletionState::Errored(_)));
        assert_eq!(errors.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn error_status_is_reported_after_on_response() {
        let transport = FakeTransport::failing(StatusCode::INTERNAL_SERVER_ERROR, b"boom");
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = statuses.clone();
        let client = client(transport)
            .on_response(move |res| sink.lock().expect("lock").push(res.status))
            .build()
            .expect("client");
        let err = client.complete("p").await.expect_err("status error");
        assert_eq!(err, ClientError::Transport(TransportError::status(500, "boom")));
        assert_eq!(
            *statuses.lock().expect("lock"),
            vec![StatusCode::INTERNAL_SERVER_ERROR]
        );
        assert_eq!(
            client.state(),
            CompletionState::Errored("upstream returned status 500: boom".into())
        );
    }

    #[tokio::test]
    async fn stop_keeps_partial_text_and_marks_aborted() {
        let transport = FakeTransport::hanging(vec![b"0:\"Hel\"\n", b"0:\"lo\"\n"]);
        let client = client(transport)
            .stream_mode(StreamMode::Data)
            .build()
            .expect("client");
        let mut updates = client.subscribe();
        let running = {
            let client = client.clone();
            tokio::spawn(async move { client.complete("p").await })
        };
        tokio::time::timeout(Duration::from_secs(1), async {
            while updates.borrow_and_update().text != "Hello" {
                updates.changed().await.expect("store open");
            }
        })
        .await
        .expect("partial text arrives");
        assert!(client.is_loading());

        client.stop();
        let result = tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .expect("stop ends the request")
            .expect("join");
        assert_eq!(result, Ok("Hello".to_string()));
        assert_eq!(client.state(), CompletionState::Aborted);
        assert!(!client.is_loading());
        assert_eq!(client.completion(), "Hello");
    }

    #[tokio::test]
    async fn stop_interrupts_a_stalled_error_body() {
        let transport = FakeTransport::stalled_error(StatusCode::INTERNAL_SERVER_ERROR, b"part");
        let client = client(transport).build().expect("client");
        let running = {
            let client = client.clone();
            tokio::spawn(async move { client.complete("p").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(client.is_loading());

        client.stop();
        let result = tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("stop ends the request")
            .expect("join");
        assert_eq!(result, Ok(String::new()));
        assert_eq!(client.state(), CompletionState::Aborted);
    }

    #[tokio::test]
    async fn writes_from_a_superseded_request_are_dropped() {
        let client = client(FakeTransport::new(vec![])).build().expect("client");
        let (old, _) = AbortHandle::new();
        *client.lock_abort() = Some(old.clone());

        let (new, _) = AbortHandle::new();
        if let Some(previous) = client.lock_abort().replace(new.clone()) {
            previous.abort();
        }
        client.set_completion("");

        assert!(!client.write_current(&old, |store, id| store.append_text(id, "stale")));
        assert!(client.write_current(&new, |store, id| store.append_text(id, "fresh")));
        assert_eq!(client.completion(), "fresh");

        new.abort();
        assert!(!client.write_current(&new, |store, id| store.extend_data(id, vec![json!(1)])));
        assert!(client.data().is_empty());
    }

    #[tokio::test]
    async fn clients_with_the_same_key_share_state() {
        let store = CompletionStore::new();
        let writer = client(FakeTransport::new(vec![b"shared text"]))
            .id("chat-1")
            .store(store.clone())
            .build()
            .expect("client");
        let reader = client(FakeTransport::new(vec![]))
            .id("chat-1")
            .store(store)
            .build()
            .expect("client");
        writer.complete("p").await.expect("completion");
        assert_eq!(reader.completion(), "shared text");
        reader.set_completion("edited");
        assert_eq!(writer.completion(), "edited");
    }

    #[tokio::test]
    async fn data_accumulates_across_completions_while_text_resets() {
        let transport = FakeTransport::new(vec![b"2:[1]\n0:\"a\"\n"]);
        let client = client(transport)
            .stream_mode(StreamMode::Data)
            .build()
            .expect("client");
        client.complete("one").await.expect("first");
        client.complete("two").await.expect("second");
        assert_eq!(client.completion(), "a");
        assert_eq!(client.data(), vec![json!(1), json!(1)]);
    }

    #[test]
    fn generated_ids_are_unique_and_headers_validated() {
        let a = client(FakeTransport::new(vec![])).build().expect("client");
        let b = client(FakeTransport::new(vec![])).build().expect("client");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.state(), CompletionState::Idle);

        let err = client(FakeTransport::new(vec![]))
            .header("bad name", "v")
            .build()
            .expect_err("invalid header");
        assert!(matches!(err, ClientError::Config(_)));
    }
}
