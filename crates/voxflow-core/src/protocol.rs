//! Voxflow stream wire protocol.
//!
//! Clients speak JSON-over-WebSocket. Inbound messages are [`StreamRequest`]s;
//! outbound messages are [`ResponseUnit`]s — JSON envelopes on text frames,
//! except audio fragments which travel as raw binary frames.

use serde::{Deserialize, Serialize};

/// Sentinel hardware identity a client must never send.
pub const UNKNOWN_HARDWARE_ID: &str = "unknown";

/// Two-phase request lifecycle: COLLECT submits partial-utterance deltas,
/// COMMIT finalizes and triggers processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Collect,
    /// Default so single-shot callers can omit the field.
    #[default]
    Commit,
}

/// One inbound message on the bidirectional stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamRequest {
    /// Prompt text. For COMMIT this is a literal tail appended after any
    /// buffered COLLECT deltas; may be empty.
    #[serde(default)]
    pub prompt: String,

    #[serde(default)]
    pub hardware_id: String,

    #[serde(default)]
    pub session_id: String,

    #[serde(default)]
    pub phase: Phase,

    /// Monotonic per-session sequence number making COLLECT deltas
    /// idempotent under retransmission.
    #[serde(default)]
    pub chunk_seq: u64,

    /// Incremental delta for COLLECT.
    #[serde(default)]
    pub chunk_text: String,

    /// Optional captured image, base64-encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl StreamRequest {
    /// Extract the attachment snapshot, if any.
    pub fn attachment(&self) -> Option<Attachment> {
        self.screenshot.as_ref().map(|data| Attachment {
            image_base64: data.clone(),
            width: self.width,
            height: self.height,
        })
    }
}

/// Captured image carried alongside a prompt. Latest-wins per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub image_base64: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Boundary validation for identity fields. Hardware id takes priority when
/// both are invalid; failures short-circuit before any pipeline work.
pub fn validate_identity(request: &StreamRequest) -> Result<(), String> {
    if request.hardware_id.is_empty() || request.hardware_id == UNKNOWN_HARDWARE_ID {
        return Err("missing or invalid hardware_id".to_string());
    }
    if request.session_id.is_empty() {
        return Err("missing session_id".to_string());
    }
    Ok(())
}

/// One outbound unit. Ordering invariant per session: every text/audio unit
/// for sentence N precedes the action payload for the turn, which precedes
/// the terminal marker.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseUnit {
    /// A fragment of assistant text, one sentence at a time.
    Text { content: String },

    /// Raw synthesized audio bytes for the most recently emitted sentence.
    Audio { data: Vec<u8> },

    /// Acknowledgement for a COLLECT chunk (or an empty-commit no-op).
    Ack { session_id: String, chunk_seq: u64 },

    /// Machine-actionable command extracted from the structured response.
    Action {
        session_id: String,
        command: String,
        args: serde_json::Value,
    },

    /// Human-readable failure reason. Admission and rate failures carry a
    /// machine-matchable `ERR_*` prefix.
    Error { message: String },

    /// Terminal marker closing the turn.
    End,
}

impl ResponseUnit {
    /// Serialize a non-audio unit into its JSON envelope. Audio units have
    /// no JSON form; they are sent as binary frames.
    pub fn to_envelope(&self) -> Option<serde_json::Value> {
        match self {
            ResponseUnit::Text { content } => Some(serde_json::json!({
                "event": "text",
                "payload": { "content": content },
            })),
            ResponseUnit::Audio { .. } => None,
            ResponseUnit::Ack { session_id, chunk_seq } => Some(serde_json::json!({
                "event": "ack",
                "payload": { "session_id": session_id, "chunk_seq": chunk_seq },
            })),
            ResponseUnit::Action {
                session_id,
                command,
                args,
            } => Some(serde_json::json!({
                "event": "action",
                "payload": {
                    "session_id": session_id,
                    "command": command,
                    "args": args,
                },
            })),
            ResponseUnit::Error { message } => Some(serde_json::json!({
                "event": "error",
                "payload": { "message": message },
            })),
            ResponseUnit::End => Some(serde_json::json!({ "event": "end" })),
        }
    }
}
