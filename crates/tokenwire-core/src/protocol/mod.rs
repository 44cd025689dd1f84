//! Tagged line protocol multiplexing text fragments with data batches.
//!
//! Every line is `<tag>:<json>\n`. Tag `0` carries one text fragment as a JSON
//! string, tag `2` carries a JSON array holding every data value appended
//! since the previous batch.

pub mod decoder;
pub mod encoder;

use serde_json::Value;

use crate::errors::ProtocolError;

pub use decoder::{ProtocolDecoder, decode_stream, decode_text};
pub use encoder::{EncodedStream, encode};

/// Tag of a text fragment line.
pub const TEXT_TAG: char = '0';
/// Tag of a data batch line.
pub const DATA_TAG: char = '2';

/// One decoded protocol line.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPart {
    /// A `0:` line: one text fragment, possibly empty.
    Text(String),
    /// A `2:` line: one batch of data values, in append order.
    Data(Vec<Value>),
}

impl StreamPart {
    /// Encodes this part as one newline-terminated protocol line.
    pub fn to_line(&self) -> String {
        match self {
            StreamPart::Text(text) => encode_text_line(text),
            StreamPart::Data(events) => encode_data_line(events),
        }
    }
}

/// Encodes a text fragment line. Empty fragments encode as `0:""`.
pub fn encode_text_line(text: &str) -> String {
    format!("{TEXT_TAG}:{}\n", Value::String(text.to_owned()))
}

/// Encodes a data batch line.
pub fn encode_data_line(events: &[Value]) -> String {
    format!("{DATA_TAG}:{}\n", Value::Array(events.to_vec()))
}

/// Decodes one protocol line, with or without its trailing newline.
pub fn decode_line(line: &str) -> Result<StreamPart, ProtocolError> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);
    let Some((tag, payload)) = line.split_once(':') else {
        return Err(ProtocolError::MissingSeparator {
            line: line.to_string(),
        });
    };
    match tag {
        "0" => match serde_json::from_str(payload) {
            Ok(Value::String(text)) => Ok(StreamPart::Text(text)),
            Ok(other) => Err(ProtocolError::invalid_payload(
                TEXT_TAG,
                format!("expected a string, got {}", json_kind(&other)),
            )),
            Err(err) => Err(ProtocolError::invalid_payload(TEXT_TAG, err)),
        },
        "2" => match serde_json::from_str(payload) {
            Ok(Value::Array(events)) => Ok(StreamPart::Data(events)),
            Ok(other) => Err(ProtocolError::invalid_payload(
                DATA_TAG,
                format!("expected an array, got {}", json_kind(&other)),
            )),
            Err(err) => Err(ProtocolError::invalid_payload(DATA_TAG, err)),
        },
        other => Err(ProtocolError::UnknownTag {
            tag: other.to_string(),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
