//! Ollama generate/chat streams: one JSON object per line until `"done": true`.

use super::parse_json;
use crate::frame::Frame;

pub(super) fn extract(frame: &Frame) -> Option<String> {
    let value = parse_json(frame)?;
    value
        .get("response")
        .and_then(|v| v.as_str())
        .or_else(|| {
            value
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|v| v.as_str())
        })
        .map(ToOwned::to_owned)
}

pub(super) fn is_terminal(frame: &Frame) -> bool {
    parse_json(frame)
        .and_then(|value| value.get("done").and_then(|v| v.as_bool()))
        .unwrap_or(false)
}
