//! Anthropic SSE streams.
//!
//! Messages API frames carry text in `content_block_delta` events
//! (`delta.text`) and end with `message_stop`. The legacy completion API sends
//! `{"completion": "..."}` deltas.

use super::parse_json;
use crate::frame::Frame;

pub(super) fn extract(frame: &Frame) -> Option<String> {
    let value = parse_json(frame)?;
    let kind = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
    if kind == "error" || frame.event_name() == "error" {
        let message = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown streaming error");
        tracing::warn!(message, "anthropic stream reported an error event");
        return None;
    }
    if kind == "content_block_delta" {
        return value
            .get("delta")
            .and_then(|delta| delta.get("text"))
            .and_then(|v| v.as_str())
            .map(ToOwned::to_owned);
    }
    value
        .get("completion")
        .and_then(|v| v.as_str())
        .map(ToOwned::to_owned)
}

pub(super) fn is_terminal(frame: &Frame) -> bool {
    if frame.event_name() == "message_stop" {
        return true;
    }
    parse_json(frame)
        .and_then(|value| value.get("type").and_then(|v| v.as_str()).map(|t| t == "message_stop"))
        .unwrap_or(false)
}
