//! Hugging Face text-generation-inference SSE token streams.
//!
//! Each event carries `{"token":{"text":..,"special":..}}`. Special tokens are
//! dropped and end-of-sequence markers are stripped from the text. There is
//! no sentinel frame; the stream ends with the connection.

use super::parse_json;
use crate::frame::Frame;

const END_MARKERS: [&str; 2] = ["</s>", "<|endoftext|>"];

pub(super) fn extract(frame: &Frame) -> Option<String> {
    let value = parse_json(frame)?;
    let token = value.get("token")?;
    if token.get("special").and_then(|v| v.as_bool()).unwrap_or(false) {
        return None;
    }
    let mut text = token.get("text").and_then(|v| v.as_str())?.to_string();
    for marker in END_MARKERS {
        if text.contains(marker) {
            text = text.replace(marker, "");
        }
    }
    Some(text)
}

pub(super) fn is_terminal(_frame: &Frame) -> bool {
    false
}
