//! Replicate prediction streams: `output` events carry raw text, `done` ends.

use crate::frame::Frame;

pub(super) fn extract(frame: &Frame) -> Option<String> {
    match frame.event_name() {
        "output" => Some(frame.data.clone()),
        "error" => {
            tracing::warn!(message = %frame.data, "replicate stream reported an error event");
            None
        }
        _ => None,
    }
}

pub(super) fn is_terminal(frame: &Frame) -> bool {
    frame.event_name() == "done"
}
