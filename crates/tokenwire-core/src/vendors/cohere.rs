//! Cohere generate streams: one JSON object per line, `is_finished` marks the end.

use super::parse_json;
use crate::frame::Frame;

pub(super) fn extract(frame: &Frame) -> Option<String> {
    parse_json(frame)?
        .get("text")
        .and_then(|v| v.as_str())
        .map(ToOwned::to_owned)
}

pub(super) fn is_terminal(frame: &Frame) -> bool {
    parse_json(frame)
        .and_then(|value| value.get("is_finished").and_then(|v| v.as_bool()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_from_unfinished_lines() {
        let frame = Frame::data(r#"{"is_finished":false,"text":" Hello"}"#);
        assert_eq!(extract(&frame).as_deref(), Some(" Hello"));
        assert!(!is_terminal(&frame));
    }

    #[test]
    fn finished_line_is_terminal() {
        let frame = Frame::data(r#"{"is_finished":true,"finish_reason":"COMPLETE","response":{}}"#);
        assert!(is_terminal(&frame));
    }
}
