//! The canonical text stream every downstream component consumes.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt as _};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::abort::{AbortHandle, AbortSignal};
use crate::errors::StreamError;
use crate::frame::{Frame, FrameReader};
use crate::vendors::{FrameOutcome, ProviderFormat};

/// Raw upstream bytes, as delivered by the transport.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

type StartHook = Box<dyn FnOnce() + Send>;
type TokenHook = Box<dyn FnMut(&str) + Send>;
type CompletionHook = Box<dyn FnOnce(&str) + Send>;

/// Optional hooks fired while a text stream is consumed.
#[derive(Default)]
pub struct StreamCallbacks {
    on_start: Option<StartHook>,
    on_token: Option<TokenHook>,
    on_completion: Option<CompletionHook>,
}

impl StreamCallbacks {
    /// Creates an empty set of hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires once, when the stream is first polled.
    pub fn on_start(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_start = Some(Box::new(hook));
        self
    }

    /// Fires for every fragment, in order.
    pub fn on_token(mut self, hook: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_token = Some(Box::new(hook));
        self
    }

    /// Fires once with the full text when the stream completes naturally.
    ///
    /// Not fired on cancellation or upstream failure.
    pub fn on_completion(mut self, hook: impl FnOnce(&str) + Send + 'static) -> Self {
        self.on_completion = Some(Box::new(hook));
        self
    }

    fn start(&mut self) {
        if let Some(hook) = self.on_start.take() {
            hook();
        }
    }

    fn token(&mut self, fragment: &str) {
        if let Some(hook) = self.on_token.as_mut() {
            hook(fragment);
        }
    }

    fn complete(&mut self, text: &str) {
        if let Some(hook) = self.on_completion.take() {
            hook(text);
        }
    }
}

impl fmt::Debug for StreamCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCallbacks")
            .field("on_start", &self.on_start.is_some())
            .field("on_token", &self.on_token.is_some())
            .field("on_completion", &self.on_completion.is_some())
            .finish()
    }
}

/// Fragments buffered between the provider reader task and the consumer.
pub const FRAGMENT_BUFFER: usize = 32;

/// Lazy, single-consumer sequence of text fragments.
///
/// Ends on natural upstream completion or on cancellation through
/// [`abort_handle`](Self::abort_handle). Empty fragments are preserved.
pub struct TextStream {
    inner: BoxStream<'static, Result<String, StreamError>>,
    abort: AbortHandle,
    deadline: Option<JoinHandle<()>>,
}

impl TextStream {
    /// Normalizes a provider byte stream into text fragments.
    ///
    /// A reader task frames the bytes and feeds deltas through a bounded
    /// channel of [`FRAGMENT_BUFFER`] entries, so a slow consumer stalls
    /// upstream reads. Malformed or unrelated frames are skipped. After the
    /// provider's terminal frame no further bytes are read and the source is
    /// dropped. Must be called from within a tokio runtime.
    pub fn from_provider(
        format: ProviderFormat,
        bytes: ByteStream,
        callbacks: StreamCallbacks,
    ) -> Self {
        let (abort, signal) = AbortHandle::new();
        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        tokio::spawn(read_provider(format, bytes, tx, abort.signal()));
        let state = ReaderState {
            format,
            rx,
            signal,
            callbacks,
            text: String::new(),
            started: false,
            finished: false,
        };
        Self::new(stream::unfold(state, next_fragment).boxed(), abort)
    }

    /// Wraps any fragment producer as a cancellable text stream.
    pub fn from_stream<S>(fragments: S, callbacks: StreamCallbacks) -> Self
    where
        S: Stream<Item = Result<String, StreamError>> + Send + 'static,
    {
        let (abort, signal) = AbortHandle::new();
        let state = ProducerState {
            fragments: Some(fragments.boxed()),
            signal,
            callbacks,
            text: String::new(),
            started: false,
        };
        Self::new(stream::unfold(state, next_produced).boxed(), abort)
    }

    /// Wraps a fixed list of fragments.
    pub fn from_fragments<I>(fragments: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        I::IntoIter: Send + 'static,
    {
        let fragments = stream::iter(fragments.into_iter().map(|f| Ok(f.into())));
        Self::from_stream(fragments, StreamCallbacks::default())
    }

    fn new(inner: BoxStream<'static, Result<String, StreamError>>, abort: AbortHandle) -> Self {
        Self {
            inner,
            abort,
            deadline: None,
        }
    }

    /// Aborts the session once `deadline` elapses.
    ///
    /// The timer is cancelled as soon as the stream ends or is dropped.
    /// Must be called from within a tokio runtime.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.cancel_deadline();
        self.deadline = Some(self.abort.abort_after(deadline));
        self
    }

    /// Returns true while a deadline timer is armed for this stream.
    pub fn has_pending_deadline(&self) -> bool {
        self.deadline.as_ref().is_some_and(|timer| !timer.is_finished())
    }

    fn cancel_deadline(&mut self) {
        if let Some(timer) = self.deadline.take() {
            timer.abort();
        }
    }

    /// Returns the cancellation handle for this session.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub(crate) fn abort_signal(&self) -> AbortSignal {
        self.abort.signal()
    }

    /// Drains the stream and returns the concatenated text.
    pub async fn collect_text(mut self) -> Result<String, StreamError> {
        let mut out = String::new();
        while let Some(fragment) = self.next().await {
            out.push_str(&fragment?);
        }
        Ok(out)
    }
}

impl Stream for TextStream {
    type Item = Result<String, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.as_mut().poll_next(cx);
        if matches!(polled, Poll::Ready(None | Some(Err(_)))) {
            self.cancel_deadline();
        }
        polled
    }
}

impl Drop for TextStream {
    fn drop(&mut self) {
        self.cancel_deadline();
    }
}

impl fmt::Debug for TextStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextStream")
            .field("aborted", &self.abort.is_aborted())
            .field("deadline", &self.has_pending_deadline())
            .finish_non_exhaustive()
    }
}

/// Messages from the provider reader task.
#[derive(Debug)]
enum ReaderEvent {
    Fragment(String),
    Failed(StreamError),
    Completed,
}

/// Reads, frames and classifies upstream bytes until the terminal frame,
/// end of input, a read error, cancellation, or the consumer going away.
async fn read_provider(
    format: ProviderFormat,
    mut bytes: ByteStream,
    tx: mpsc::Sender<ReaderEvent>,
    mut signal: AbortSignal,
) {
    let mut reader = FrameReader::new(format.delimiter());
    let last = loop {
        let next = tokio::select! {
            biased;
            _ = signal.aborted() => break None,
            _ = tx.closed() => break None,
            next = bytes.next() => next,
        };
        let (frames, at_end) = match next {
            Some(Ok(chunk)) => (reader.push(&chunk), false),
            Some(Err(err)) => {
                debug!(provider = %format, error = %err, "upstream read failed");
                break Some(ReaderEvent::Failed(err));
            }
            None => (reader.finish(), true),
        };
        match forward(format, frames, &tx, &mut signal).await {
            Forwarded::More if !at_end => {}
            Forwarded::More | Forwarded::Terminal => break Some(ReaderEvent::Completed),
            Forwarded::Closed => break None,
        }
    };
    drop(bytes);
    debug!(provider = %format, "released upstream byte source");
    if let Some(event) = last {
        send(&tx, &mut signal, event).await;
    }
}

enum Forwarded {
    More,
    Terminal,
    Closed,
}

/// Routes frames through the adapter and forwards every delta.
async fn forward(
    format: ProviderFormat,
    frames: Vec<Frame>,
    tx: &mpsc::Sender<ReaderEvent>,
    signal: &mut AbortSignal,
) -> Forwarded {
    for frame in frames {
        match format.classify(&frame) {
            FrameOutcome::Delta(delta) => {
                if !send(tx, signal, ReaderEvent::Fragment(delta)).await {
                    return Forwarded::Closed;
                }
            }
            FrameOutcome::Skip => {}
            FrameOutcome::Done => {
                trace!(provider = %format, "provider terminal frame");
                return Forwarded::Terminal;
            }
        }
    }
    Forwarded::More
}

/// Waits for queue space. Returns false if the session was aborted or the
/// consumer is gone.
async fn send(tx: &mpsc::Sender<ReaderEvent>, signal: &mut AbortSignal, event: ReaderEvent) -> bool {
    tokio::select! {
        biased;
        _ = signal.aborted() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

struct ReaderState {
    format: ProviderFormat,
    rx: mpsc::Receiver<ReaderEvent>,
    signal: AbortSignal,
    callbacks: StreamCallbacks,
    text: String,
    started: bool,
    finished: bool,
}

async fn next_fragment(
    mut state: ReaderState,
) -> Option<(Result<String, StreamError>, ReaderState)> {
    if !state.started {
        state.started = true;
        state.callbacks.start();
    }
    if state.finished {
        return None;
    }
    if state.signal.is_aborted() {
        debug!(provider = %state.format, "text stream aborted");
        return None;
    }
    let event = tokio::select! {
        biased;
        _ = state.signal.aborted() => {
            debug!(provider = %state.format, "text stream aborted");
            return None;
        }
        event = state.rx.recv() => event,
    };
    match event? {
        ReaderEvent::Fragment(fragment) => {
            state.callbacks.token(&fragment);
            state.text.push_str(&fragment);
            Some((Ok(fragment), state))
        }
        ReaderEvent::Failed(err) => {
            state.finished = true;
            Some((Err(err), state))
        }
        ReaderEvent::Completed => {
            debug!(provider = %state.format, chars = state.text.len(), "text stream completed");
            let ReaderState { callbacks, text, .. } = &mut state;
            callbacks.complete(text);
            None
        }
    }
}

struct ProducerState {
    fragments: Option<BoxStream<'static, Result<String, StreamError>>>,
    signal: AbortSignal,
    callbacks: StreamCallbacks,
    text: String,
    started: bool,
}

async fn next_produced(
    mut state: ProducerState,
) -> Option<(Result<String, StreamError>, ProducerState)> {
    if !state.started {
        state.started = true;
        state.callbacks.start();
    }
    let fragments = state.fragments.as_mut()?;
    if state.signal.is_aborted() {
        state.fragments = None;
        return None;
    }
    let next = tokio::select! {
        biased;
        _ = state.signal.aborted() => None,
        next = fragments.next() => Some(next),
    };
    match next {
        None => {
            state.fragments = None;
            None
        }
        Some(Some(Ok(fragment))) => {
            state.callbacks.token(&fragment);
            state.text.push_str(&fragment);
            Some((Ok(fragment), state))
        }
        Some(Some(Err(err))) => {
            state.fragments = None;
            Some((Err(err), state))
        }
        Some(None) => {
            state.fragments = None;
            let ProducerState { callbacks, text, .. } = &mut state;
            callbacks.complete(text);
            None
        }
    }
}
