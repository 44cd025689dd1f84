use std::collections::VecDeque;

use bytes::Bytes;
use futures::StreamExt as _;
use futures::stream::{self, BoxStream};
use tracing::debug;

use super::{encode_data_line, encode_text_line};
use crate::abort::AbortSignal;
use crate::data::StreamData;
use crate::errors::StreamError;
use crate::stream::TextStream;

/// Encoded response body.
pub type EncodedStream = BoxStream<'static, Result<Bytes, StreamError>>;

/// Encodes a text stream for the wire.
///
/// Without a data channel the fragments are written as raw UTF-8. With one,
/// every fragment becomes a `0:` line and pending data values are flushed as
/// a `2:` batch at each wakeup and always right before the next text line.
/// The tagged stream ends once the text is drained and the data channel is
/// closed, or as soon as the session is aborted.
pub fn encode(text: TextStream, data: Option<StreamData>) -> EncodedStream {
    match data {
        None => text.map(|fragment| fragment.map(Bytes::from)).boxed(),
        Some(data) => {
            let state = Multiplexer {
                signal: text.abort_signal(),
                text: Some(text),
                data,
                out: VecDeque::new(),
                lines: 0,
                done: false,
            };
            stream::unfold(state, next_chunk).boxed()
        }
    }
}

struct Multiplexer {
    text: Option<TextStream>,
    data: StreamData,
    signal: AbortSignal,
    out: VecDeque<Result<Bytes, StreamError>>,
    lines: usize,
    done: bool,
}

impl Multiplexer {
    /// Queues a batch line for everything appended since the last flush.
    /// Returns whether the data channel is closed.
    fn flush_data(&mut self) -> bool {
        let batch = self.data.take_batch();
        if !batch.events.is_empty() {
            self.push_line(encode_data_line(&batch.events));
        }
        batch.closed
    }

    fn push_line(&mut self, line: String) {
        self.lines += 1;
        self.out.push_back(Ok(Bytes::from(line)));
    }
}

async fn next_chunk(
    mut state: Multiplexer,
) -> Option<(Result<Bytes, StreamError>, Multiplexer)> {
    loop {
        if let Some(chunk) = state.out.pop_front() {
            return Some((chunk, state));
        }
        if state.done {
            return None;
        }
        let closed = state.flush_data();
        if !state.out.is_empty() {
            continue;
        }
        let aborted = state.signal.is_aborted();
        if aborted {
            state.text = None;
        }
        let Some(text) = state.text.as_mut() else {
            if closed || aborted {
                debug!(lines = state.lines, aborted, "tagged stream finished");
                state.done = true;
                continue;
            }
            tokio::select! {
                biased;
                _ = state.data.changed() => {}
                _ = state.signal.aborted() => {}
            }
            continue;
        };
        let next = tokio::select! {
            biased;
            _ = state.data.changed() => continue,
            next = text.next() => next,
        };
        match next {
            Some(Ok(fragment)) => {
                state.flush_data();
                state.push_line(encode_text_line(&fragment));
            }
            Some(Err(err)) => {
                state.flush_data();
                state.out.push_back(Err(err));
                state.text = None;
                state.done = true;
            }
            None => state.text = None,
        }
    }
}
