//! Event Frame Decoder - protocol lines to typed frames
//!
//! A line is a data line only if it starts with [`DATA_MARKER`]. The marker is
//! stripped and the remainder trimmed before anything else looks at it. The
//! literal [`DONE_SENTINEL`] short-circuits to end-of-stream without touching
//! the JSON decoder; every other payload is decoded on its own, so one bad line
//! never affects the next.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::DecodeError;

/// Prefix of a data line
pub const DATA_MARKER: &str = "data:";

/// Payload that terminates a chat stream (not JSON)
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded unit of a streamed chat response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    /// The server opened a conversation
    Start { conversation_id: String },
    /// An incremental piece of the response text
    Token { content: String },
    NodeStart { node: String },
    NodeComplete { node: String },
    Usage {
        #[serde(default)]
        metadata: serde_json::Value,
    },
    /// Error reported in-band by the upstream service
    Error { message: String },
    Complete {
        #[serde(default)]
        metadata: serde_json::Value,
    },
    /// The `[DONE]` sentinel
    #[serde(skip)]
    EndOfStream,
}

impl StreamFrame {
    /// Get the frame type name
    pub fn frame_type(&self) -> &'static str {
        match self {
            StreamFrame::Start { .. } => "start",
            StreamFrame::Token { .. } => "token",
            StreamFrame::NodeStart { .. } => "node_start",
            StreamFrame::NodeComplete { .. } => "node_complete",
            StreamFrame::Usage { .. } => "usage",
            StreamFrame::Error { .. } => "error",
            StreamFrame::Complete { .. } => "complete",
            StreamFrame::EndOfStream => "end_of_stream",
        }
    }

    /// True for frames after which no more frames are expected
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::Complete { .. } | StreamFrame::EndOfStream)
    }
}

/// Result of decoding a data line into an arbitrary payload type
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Value(T),
    EndOfStream,
}

/// Classification of a protocol line before any JSON work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// Post-marker payload, already trimmed
    Data(&'a str),
    /// The sentinel payload
    EndOfStream,
    /// Comments, `event:`/`id:`/`retry:` fields, blank lines
    Ignored,
}

/// Classify a protocol line
pub fn classify(line: &str) -> LineKind<'_> {
    match line.strip_prefix(DATA_MARKER) {
        Some(rest) => {
            let payload = rest.trim();
            if payload == DONE_SENTINEL {
                LineKind::EndOfStream
            } else {
                LineKind::Data(payload)
            }
        }
        None => LineKind::Ignored,
    }
}

/// Decode a post-marker payload as JSON
///
/// Rejects payloads that still carry the data marker: that means the raw line
/// was handed over instead of the stripped payload.
pub fn decode_payload<T: DeserializeOwned>(payload: &str) -> Result<T, DecodeError> {
    if payload.trim_start().starts_with(DATA_MARKER) {
        warn!(payload, "decode_payload: data marker was not stripped");
        return Err(DecodeError::MarkerNotStripped {
            raw: payload.to_string(),
        });
    }

    serde_json::from_str(payload).map_err(|e| DecodeError::Malformed {
        raw: payload.to_string(),
        reason: e.to_string(),
    })
}

/// Decode one protocol line into `T`
///
/// `Ok(None)` means the line is not a data line and should be skipped.
pub fn decode_as<T: DeserializeOwned>(line: &str) -> Result<Option<Decoded<T>>, DecodeError> {
    match classify(line) {
        LineKind::Ignored => Ok(None),
        LineKind::EndOfStream => {
            debug!("decode_as: end-of-stream sentinel");
            Ok(Some(Decoded::EndOfStream))
        }
        LineKind::Data(payload) if payload.is_empty() => Ok(None),
        LineKind::Data(payload) => decode_payload(payload).map(|value| Some(Decoded::Value(value))),
    }
}

/// Decode one protocol line of a chat stream
pub fn decode(line: &str) -> Result<Option<StreamFrame>, DecodeError> {
    Ok(decode_as::<StreamFrame>(line)?.map(|decoded| match decoded {
        Decoded::Value(frame) => frame,
        Decoded::EndOfStream => StreamFrame::EndOfStream,
    }))
}

/// Decode the unterminated fragment left when the stream closed
///
/// A fragment that decodes cleanly is accepted (the server just omitted the
/// final line break); anything else on a data line is a truncated frame.
pub fn decode_final(fragment: &str) -> Result<Option<StreamFrame>, DecodeError> {
    debug!(len = fragment.len(), "decode_final: called");
    decode(fragment).map_err(|e| match e {
        DecodeError::Malformed { raw, .. } => DecodeError::Truncated { raw },
        other => other,
    })
}
