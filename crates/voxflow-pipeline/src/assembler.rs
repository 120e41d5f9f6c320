//! Phase Assembler — merges chunked partial-utterance text into one prompt.
//!
//! COLLECT accumulates deltas per session; COMMIT drains the buffer,
//! appends the commit's own prompt as a literal tail (buffer first, tail
//! last — the ordering is user-visible), and hands the assembled prompt to
//! the orchestrator. Replayed chunks are idempotent via `chunk_seq`.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use voxflow_core::protocol::{Attachment, Phase, StreamRequest};

/// What a `submit` call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// COLLECT delta applied (or replay ignored), or an empty commit:
    /// acknowledged without invoking the rest of the pipeline.
    Ack { chunk_seq: u64 },

    /// COMMIT with a non-empty merged prompt: run the turn.
    Commit(AssembledPrompt),
}

/// The fully merged prompt for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub prompt: String,
    pub attachment: Option<Attachment>,
}

struct PendingBuffer {
    text: String,
    applied_seq: u64,
    attachment: Option<Attachment>,
    updated_at: DateTime<Utc>,
}

/// Per-session accumulator of COLLECT deltas. Buffers are consumed on
/// commit or destroyed by `purge_stale`.
#[derive(Default)]
pub struct PhaseAssembler {
    buffers: Mutex<HashMap<String, PendingBuffer>>,
}

impl PhaseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, request: &StreamRequest) -> SubmitOutcome {
        match request.phase {
            Phase::Collect => self.collect(request),
            Phase::Commit => self.commit(request),
        }
    }

    fn collect(&self, request: &StreamRequest) -> SubmitOutcome {
        let mut buffers = self.buffers.lock().unwrap();
        let buffer = buffers
            .entry(request.session_id.clone())
            .or_insert_with(|| PendingBuffer {
                text: String::new(),
                applied_seq: 0,
                attachment: None,
                updated_at: Utc::now(),
            });

        // Replays with seq <= last-applied are no-ops; the ack is still sent
        // so retransmitting clients settle.
        if request.chunk_seq <= buffer.applied_seq {
            debug!(
                session_id = %request.session_id,
                chunk_seq = request.chunk_seq,
                applied = buffer.applied_seq,
                "Ignoring replayed chunk"
            );
            return SubmitOutcome::Ack {
                chunk_seq: request.chunk_seq,
            };
        }

        buffer.text.push_str(&request.chunk_text);
        buffer.applied_seq = request.chunk_seq;
        buffer.updated_at = Utc::now();
        if let Some(attachment) = request.attachment() {
            buffer.attachment = Some(attachment);
        }

        SubmitOutcome::Ack {
            chunk_seq: request.chunk_seq,
        }
    }

    fn commit(&self, request: &StreamRequest) -> SubmitOutcome {
        let buffered = self.buffers.lock().unwrap().remove(&request.session_id);

        let mut prompt = String::new();
        let mut attachment = None;
        if let Some(buffer) = buffered {
            // A commit may carry one last delta of its own.
            prompt.push_str(&buffer.text);
            if request.chunk_seq > buffer.applied_seq {
                prompt.push_str(&request.chunk_text);
            }
            attachment = buffer.attachment;
        }
        // The commit's prompt is a literal tail, appended — not a
        // replacement. With no COLLECT chunks it is the entire prompt.
        prompt.push_str(&request.prompt);

        if let Some(att) = request.attachment() {
            attachment = Some(att);
        }

        if prompt.is_empty() {
            debug!(session_id = %request.session_id, "Empty commit, acknowledging without a turn");
            return SubmitOutcome::Ack {
                chunk_seq: request.chunk_seq,
            };
        }

        SubmitOutcome::Commit(AssembledPrompt { prompt, attachment })
    }

    /// Destroy buffers not touched within `max_age`. Driven by the gateway
    /// reaper alongside lease eviction.
    pub fn purge_stale(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut buffers = self.buffers.lock().unwrap();
        let before = buffers.len();
        buffers.retain(|session_id, buffer| {
            let keep = buffer.updated_at > cutoff;
            if !keep {
                debug!(%session_id, "Purging stale pending buffer");
            }
            keep
        });
        before - buffers.len()
    }

    pub fn pending_count(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }
}
