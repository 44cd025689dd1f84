use std::collections::VecDeque;

use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt as _};

use super::{StreamPart, decode_line};
use crate::errors::{ProtocolError, StreamError};
use crate::frame::{LineBuffer, Utf8Buffer};

/// Incremental decoder for the tagged line protocol.
///
/// The only state kept between chunks is the partial trailing line.
#[derive(Debug, Default)]
pub struct ProtocolDecoder {
    lines: LineBuffer,
}

impl ProtocolDecoder {
    /// Creates a decoder with an empty line buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every part completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamPart>, ProtocolError> {
        self.push_each(chunk).into_iter().collect()
    }

    /// Like [`push`](Self::push), but keeps the parts decoded before a bad line.
    pub fn push_each(&mut self, chunk: &[u8]) -> Vec<Result<StreamPart, ProtocolError>> {
        self.lines
            .push(chunk)
            .into_iter()
            .filter(|line| !line.is_empty())
            .map(|line| decode_raw(&line))
            .collect()
    }

    /// Decodes a trailing unterminated line at end of input.
    pub fn finish(&mut self) -> Result<Option<StreamPart>, ProtocolError> {
        match self.lines.take_remainder() {
            Some(rest) if !rest.is_empty() => decode_raw(&rest).map(Some),
            _ => Ok(None),
        }
    }
}

fn decode_raw(line: &[u8]) -> Result<StreamPart, ProtocolError> {
    let line = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
    decode_line(line)
}

/// Decodes a tagged byte stream into parts. The first error ends the stream.
pub fn decode_stream<S>(bytes: S) -> BoxStream<'static, Result<StreamPart, StreamError>>
where
    S: Stream<Item = Result<Bytes, StreamError>> + Send + 'static,
{
    let state = DecodeState {
        bytes: Some(bytes.boxed()),
        decoder: ProtocolDecoder::new(),
        pending: VecDeque::new(),
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(part) = state.pending.pop_front() {
                return Some((part, state));
            }
            let bytes = state.bytes.as_mut()?;
            match bytes.next().await {
                Some(Ok(chunk)) => {
                    for part in state.decoder.push_each(&chunk) {
                        match part {
                            Ok(part) => state.pending.push_back(Ok(part)),
                            Err(err) => {
                                state.fail(err.into());
                                break;
                            }
                        }
                    }
                }
                Some(Err(err)) => state.fail(err),
                None => {
                    state.bytes = None;
                    match state.decoder.finish() {
                        Ok(Some(part)) => state.pending.push_back(Ok(part)),
                        Ok(None) => {}
                        Err(err) => state.pending.push_back(Err(err.into())),
                    }
                }
            }
        }
    })
    .boxed()
}

struct DecodeState {
    bytes: Option<BoxStream<'static, Result<Bytes, StreamError>>>,
    decoder: ProtocolDecoder,
    pending: VecDeque<Result<StreamPart, StreamError>>,
}

impl DecodeState {
    fn fail(&mut self, err: StreamError) {
        self.bytes = None;
        self.pending.push_back(Err(err));
    }
}

/// Decodes an untagged byte stream into text, holding back split code points.
pub fn decode_text<S>(bytes: S) -> BoxStream<'static, Result<String, StreamError>>
where
    S: Stream<Item = Result<Bytes, StreamError>> + Send + 'static,
{
    let state = (Some(bytes.boxed()), Utf8Buffer::default());
    stream::unfold(state, |(mut bytes, mut utf8)| async move {
        loop {
            let source = bytes.as_mut()?;
            match source.next().await {
                Some(Ok(chunk)) => {
                    let text = utf8.push(&chunk);
                    if !text.is_empty() {
                        return Some((Ok(text), (bytes, utf8)));
                    }
                }
                Some(Err(err)) => return Some((Err(err), (None, utf8))),
                None => {
                    utf8.finish();
                    return None;
                }
            }
        }
    })
    .boxed()
}
