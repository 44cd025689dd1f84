//! Provider wire formats.
//!
//! The provider set is closed: each [`ProviderFormat`] variant maps to one
//! [`ProviderEntry`] holding its framing, delta extractor and terminal
//! predicate. Adding a provider means adding a variant and a table row.

mod anthropic;
mod cohere;
mod huggingface;
mod ollama;
mod openai;
mod replicate;

use std::fmt;
use std::str::FromStr;

use tracing::trace;

use crate::frame::{Frame, FrameDelimiter};

/// Upstream wire formats understood by the text stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFormat {
    /// OpenAI chat and completion streams (SSE, `[DONE]` sentinel).
    OpenAi,
    /// Anthropic messages and legacy completion streams (SSE).
    Anthropic,
    /// Cohere generate streams (newline-delimited JSON).
    Cohere,
    /// Hugging Face text-generation-inference token streams (SSE).
    HuggingFace,
    /// Ollama generate and chat streams (newline-delimited JSON).
    Ollama,
    /// Replicate prediction streams (SSE with raw text payloads).
    Replicate,
}

/// Result of running one frame through a provider adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame carried a text delta (possibly empty).
    Delta(String),
    /// The frame carried nothing for the text stream.
    Skip,
    /// The provider signalled end of generation.
    Done,
}

/// Static description of one provider wire format.
pub struct ProviderEntry {
    /// Stable lowercase name, also used for parsing.
    pub name: &'static str,
    /// How frames are delimited in the byte stream.
    pub delimiter: FrameDelimiter,
    /// Extracts the text delta from a frame, if it carries one.
    pub extract: fn(&Frame) -> Option<String>,
    /// Returns true for the provider's end-of-stream marker.
    pub is_terminal: fn(&Frame) -> bool,
}

static PROVIDERS: [ProviderEntry; 6] = [
    ProviderEntry {
        name: "openai",
        delimiter: FrameDelimiter::Sse,
        extract: openai::extract,
        is_terminal: openai::is_terminal,
    },
    ProviderEntry {
        name: "anthropic",
        delimiter: FrameDelimiter::Sse,
        extract: anthropic::extract,
        is_terminal: anthropic::is_terminal,
    },
    ProviderEntry {
        name: "cohere",
        delimiter: FrameDelimiter::Lines,
        extract: cohere::extract,
        is_terminal: cohere::is_terminal,
    },
    ProviderEntry {
        name: "huggingface",
        delimiter: FrameDelimiter::Sse,
        extract: huggingface::extract,
        is_terminal: huggingface::is_terminal,
    },
    ProviderEntry {
        name: "ollama",
        delimiter: FrameDelimiter::Lines,
        extract: ollama::extract,
        is_terminal: ollama::is_terminal,
    },
    ProviderEntry {
        name: "replicate",
        delimiter: FrameDelimiter::Sse,
        extract: replicate::extract,
        is_terminal: replicate::is_terminal,
    },
];

impl ProviderFormat {
    /// Every supported format, in table order.
    pub const ALL: [ProviderFormat; 6] = [
        ProviderFormat::OpenAi,
        ProviderFormat::Anthropic,
        ProviderFormat::Cohere,
        ProviderFormat::HuggingFace,
        ProviderFormat::Ollama,
        ProviderFormat::Replicate,
    ];

    /// Returns the table entry for this format.
    pub fn entry(self) -> &'static ProviderEntry {
        let index = match self {
            ProviderFormat::OpenAi => 0,
            ProviderFormat::Anthropic => 1,
            ProviderFormat::Cohere => 2,
            ProviderFormat::HuggingFace => 3,
            ProviderFormat::Ollama => 4,
            ProviderFormat::Replicate => 5,
        };
        &PROVIDERS[index]
    }

    /// Returns the stable lowercase name of this format.
    pub fn name(self) -> &'static str {
        self.entry().name
    }

    /// Returns the framing convention of this format.
    pub fn delimiter(self) -> FrameDelimiter {
        self.entry().delimiter
    }

    /// Classifies one frame. Never fails: frames that carry no text are skipped.
    pub fn classify(self, frame: &Frame) -> FrameOutcome {
        let entry = self.entry();
        if (entry.is_terminal)(frame) {
            return FrameOutcome::Done;
        }
        match (entry.extract)(frame) {
            Some(delta) => FrameOutcome::Delta(delta),
            None => {
                trace!(
                    provider = entry.name,
                    event = frame.event_name(),
                    "skipping frame without text delta"
                );
                FrameOutcome::Skip
            }
        }
    }
}

impl fmt::Display for ProviderFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown provider name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider format: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderFormat {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace(['-', '_'], "");
        ProviderFormat::ALL
            .into_iter()
            .find(|format| format.name() == wanted)
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}

/// Parses a frame's data as JSON, or `None` for non-JSON chatter.
pub(crate) fn parse_json(frame: &Frame) -> Option<serde_json::Value> {
    serde_json::from_str(frame.data.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_rows_match_variants() {
        for format in ProviderFormat::ALL {
            assert_eq!(format.name().parse::<ProviderFormat>(), Ok(format));
        }
    }

    #[test]
    fn parsing_is_lenient_about_case_and_separators() {
        assert_eq!("OpenAI".parse(), Ok(ProviderFormat::OpenAi));
        assert_eq!("hugging-face".parse(), Ok(ProviderFormat::HuggingFace));
        assert_eq!("hugging_face".parse(), Ok(ProviderFormat::HuggingFace));
        assert!("mistral".parse::<ProviderFormat>().is_err());
    }

    #[test]
    fn serde_names_match_table_names() {
        let json = serde_json::to_string(&ProviderFormat::HuggingFace).expect("serialize");
        assert_eq!(json, "\"huggingface\"");
        let back: ProviderFormat = serde_json::from_str("\"openai\"").expect("deserialize");
        assert_eq!(back, ProviderFormat::OpenAi);
    }

    #[test]
    fn terminal_predicate_wins_over_extraction() {
        let done = Frame::data("{\"text\":\"bye\",\"is_finished\":true}");
        assert_eq!(ProviderFormat::Cohere.classify(&done), FrameOutcome::Done);
    }

    #[test]
    fn non_json_chatter_is_skipped_for_json_providers() {
        for format in [
            ProviderFormat::OpenAi,
            ProviderFormat::Anthropic,
            ProviderFormat::Cohere,
            ProviderFormat::HuggingFace,
            ProviderFormat::Ollama,
        ] {
            assert_eq!(
                format.classify(&Frame::data("not json at all")),
                FrameOutcome::Skip,
                "{format}"
            );
        }
    }
}
