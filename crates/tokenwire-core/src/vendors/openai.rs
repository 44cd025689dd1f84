//! OpenAI chat/completion SSE streams.
//!
//! `data: {"choices":[{"delta":{"content":"Hi"}}]}` for chat models,
//! `data: {"choices":[{"text":"Hi"}]}` for completion models, and a literal
//! `data: [DONE]` sentinel at the end.

use super::parse_json;
use crate::frame::Frame;

pub(super) fn extract(frame: &Frame) -> Option<String> {
    let value = parse_json(frame)?;
    let choice = value.get("choices")?.get(0)?;
    choice
        .get("delta")
        .and_then(|delta| delta.get("content"))
        .and_then(|v| v.as_str())
        .or_else(|| choice.get("text").and_then(|v| v.as_str()))
        .map(ToOwned::to_owned)
}

pub(super) fn is_terminal(frame: &Frame) -> bool {
    frame.data.trim() == "[DONE]"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_chat_delta_content() {
        let frame = Frame::data(r#"{"choices":[{"index":0,"delta":{"content":" Hello"}}]}"#);
        assert_eq!(extract(&frame).as_deref(), Some(" Hello"));
    }

    #[test]
    fn extracts_completion_text() {
        let frame = Frame::data(r#"{"choices":[{"text":"world","index":0}]}"#);
        assert_eq!(extract(&frame).as_deref(), Some("world"));
    }

    #[test]
    fn role_only_and_null_content_chunks_carry_no_text() {
        let role = Frame::data(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#);
        let null = Frame::data(r#"{"choices":[{"delta":{"content":null},"finish_reason":"stop"}]}"#);
        assert_eq!(extract(&role), None);
        assert_eq!(extract(&null), None);
    }

    #[test]
    fn empty_content_is_an_empty_delta() {
        let frame = Frame::data(r#"{"choices":[{"delta":{"content":""}}]}"#);
        assert_eq!(extract(&frame).as_deref(), Some(""));
    }

    #[test]
    fn done_sentinel_is_terminal() {
        assert!(is_terminal(&Frame::data("[DONE]")));
        assert!(!is_terminal(&Frame::data(r#"{"choices":[]}"#)));
    }
}
