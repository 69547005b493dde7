use serde::{Deserialize, Serialize};

use crate::errors::StreamFailure;

/// One increment of assistant output, or a terminal/error signal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChunk {
    /// Text delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// `true` on the last chunk of a stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    /// Error reported by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatChunk {
    /// A plain text delta.
    pub fn text(data: impl Into<String>) -> Self {
        Self {
            data: Some(data.into()),
            done: Some(false),
            error: None,
        }
    }

    /// The terminal chunk emitted when a stream completes.
    pub fn done() -> Self {
        Self {
            data: Some(String::new()),
            done: Some(true),
            error: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.unwrap_or(false)
    }

    /// Text delta, or `""` when the chunk carries none.
    pub fn delta(&self) -> &str {
        self.data.as_deref().unwrap_or("")
    }

    /// Turns a chunk carrying an `error` into the matching stream failure.
    pub fn into_result(self) -> Result<ChatChunk, StreamFailure> {
        match self.error {
            Some(message) => Err(StreamFailure::Upstream { message }),
            None => Ok(self),
        }
    }
}

/// How frame payloads are interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameMode {
    /// Structured chunks when the payload looks like one, raw text otherwise.
    #[default]
    Auto,
    /// Every payload must be a JSON `ChatChunk`.
    Structured,
    /// Every payload is a raw text delta.
    Raw,
}

/// Result of classifying a single frame payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FramePayload {
    /// JSON-encoded chunk.
    Structured(ChatChunk),
    /// Legacy raw text delta.
    Raw(String),
    /// The `[DONE]` sentinel.
    DoneSentinel,
}

impl FramePayload {
    /// Normalizes the payload into the chunk shape seen downstream.
    pub fn into_chunk(self) -> ChatChunk {
        match self {
            Self::Structured(chunk) => chunk,
            Self::Raw(text) => ChatChunk::text(text),
            Self::DoneSentinel => ChatChunk::done(),
        }
    }
}

const DONE_SENTINEL: &str = "[DONE]";
const CHUNK_KEYS: [&str; 3] = ["data", "done", "error"];

/// Parses and classifies one frame payload.
pub fn classify(payload: &str, mode: FrameMode) -> Result<FramePayload, StreamFailure> {
    match mode {
        FrameMode::Raw => Ok(FramePayload::Raw(payload.to_string())),
        FrameMode::Structured => {
            if payload.trim() == DONE_SENTINEL {
                return Ok(FramePayload::DoneSentinel);
            }
            serde_json::from_str::<ChatChunk>(payload)
                .map(FramePayload::Structured)
                .map_err(|e| StreamFailure::protocol(format!("invalid chunk payload: {e}")))
        }
        FrameMode::Auto => {
            if payload.trim() == DONE_SENTINEL {
                return Ok(FramePayload::DoneSentinel);
            }
            let Ok(serde_json::Value::Object(map)) =
                serde_json::from_str::<serde_json::Value>(payload)
            else {
                return Ok(FramePayload::Raw(payload.to_string()));
            };
            if !CHUNK_KEYS.iter().any(|key| map.contains_key(*key)) {
                return Ok(FramePayload::Raw(payload.to_string()));
            }
            serde_json::from_value::<ChatChunk>(serde_json::Value::Object(map))
                .map(FramePayload::Structured)
                .map_err(|e| StreamFailure::protocol(format!("malformed chunk payload: {e}")))
        }
    }
}
