//! Streaming Response Orchestrator.
//!
//! Drives one committed turn end to end: stream tokens from the generator,
//! reveal the reply text incrementally, cut it into sentences, synthesize
//! each sentence concurrently, and re-assemble the output in strict
//! sentence order. Interrupt checkpoints sit at every stage boundary.
//!
//! Emission order for N sentences is text₁, audio₁…, text₂, audio₂…, up to
//! textₙ, audioₙ…, then an optional action unit, then the end marker. Audio
//! never precedes its sentence's text and the action never precedes the
//! last sentence's audio.

use std::sync::Arc;

use anyhow::anyhow;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use voxflow_core::config::SentenceConfig;
use voxflow_core::protocol::ResponseUnit;
use voxflow_core::providers::{GenerationRequest, SpeechSynthesizer, TextGenerator};
use voxflow_core::session::SessionRegistry;

use crate::assembler::AssembledPrompt;
use crate::commands::CommandRegistry;
use crate::extract::FieldExtractor;
use crate::interrupt::InterruptCoordinator;
use crate::sentence::SentenceBuffer;

/// Ceiling on overlapping synthesis calls for one turn.
const MAX_CONCURRENT_SYNTHESIS: usize = 3;

/// Everything the orchestrator needs to know about one committed turn.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub hardware_id: String,
    pub session_id: String,
    pub assembled: AssembledPrompt,
}

/// One flushed sentence queued for ordered emission. Synthesis runs in a
/// background task; the emitter drains `audio_rx` to completion before
/// touching the next job.
struct SentenceJob {
    text: String,
    audio_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    result_rx: oneshot::Receiver<anyhow::Result<()>>,
}

pub struct Orchestrator {
    generator: Arc<dyn TextGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    interrupts: Arc<InterruptCoordinator>,
    sessions: Arc<SessionRegistry>,
    commands: Arc<CommandRegistry>,
    sentence: SentenceConfig,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        interrupts: Arc<InterruptCoordinator>,
        sessions: Arc<SessionRegistry>,
        commands: Arc<CommandRegistry>,
        sentence: SentenceConfig,
    ) -> Self {
        Self {
            generator,
            synthesizer,
            interrupts,
            sessions,
            commands,
            sentence,
        }
    }

    /// Run one turn to completion, pushing response units onto `unit_tx`.
    /// Always closes the stream with an end marker, interrupted or not.
    pub async fn run_turn(&self, ctx: TurnContext, unit_tx: mpsc::UnboundedSender<ResponseUnit>) {
        let hardware_id = ctx.hardware_id.clone();

        // Checkpoint: before generation.
        if self.interrupts.check(&hardware_id) {
            debug!(hardware_id, "Turn arrived already interrupted, closing immediately");
            let _ = unit_tx.send(ResponseUnit::End);
            return;
        }

        // Once the turn has begun, every checkpoint polls the turn's own
        // token. The shared flag may be cleared by a superseding commit
        // while this turn is still unwinding; the token stays cancelled.
        let cancel = self.interrupts.begin_turn(&hardware_id);
        self.sessions.touch(&ctx.session_id);
        self.drive_turn(&ctx, cancel.clone(), &unit_tx).await;
        self.interrupts.end_turn(&hardware_id);

        if cancel.is_cancelled() {
            info!(hardware_id, session_id = %ctx.session_id, "Turn unwound by interrupt");
        } else {
            self.sessions.mark_completed(&ctx.session_id);
            self.sessions.remove(&ctx.session_id);
        }
        let _ = unit_tx.send(ResponseUnit::End);
    }

    async fn drive_turn(
        &self,
        ctx: &TurnContext,
        cancel: CancellationToken,
        unit_tx: &mpsc::UnboundedSender<ResponseUnit>,
    ) {
        let request = GenerationRequest {
            prompt: ctx.assembled.prompt.clone(),
            attachment: ctx.assembled.attachment.clone(),
        };

        let mut token_stream = match self.generator.stream(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(hardware_id = %ctx.hardware_id, error = %e, "Generator refused the turn");
                let _ = unit_tx.send(ResponseUnit::Error {
                    message: format!("generation failed: {e}"),
                });
                return;
            }
        };

        let (job_tx, job_rx) = mpsc::unbounded_channel::<SentenceJob>();
        let emitter = tokio::spawn(Self::emit_in_order(
            job_rx,
            unit_tx.clone(),
            cancel.clone(),
            ctx.hardware_id.clone(),
        ));

        let synthesis_slots = Arc::new(Semaphore::new(MAX_CONCURRENT_SYNTHESIS));
        let mut extractor = FieldExtractor::new();
        let mut sentences = SentenceBuffer::new(self.sentence.clone());
        let mut generation_failed = false;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => break,
                chunk = token_stream.next() => chunk,
            };
            // Checkpoint: between generator chunks.
            if cancel.is_cancelled() {
                break;
            }
            match chunk {
                Some(Ok(chunk)) => {
                    let revealed = extractor.feed(&chunk.delta);
                    for sentence in sentences.push(&revealed) {
                        let _ = job_tx.send(self.spawn_synthesis(
                            sentence,
                            &cancel,
                            &synthesis_slots,
                        ));
                    }
                }
                Some(Err(e)) => {
                    error!(hardware_id = %ctx.hardware_id, error = %e, "Generator stream failed mid-turn");
                    let _ = unit_tx.send(ResponseUnit::Error {
                        message: format!("generation failed: {e}"),
                    });
                    generation_failed = true;
                    break;
                }
                None => break,
            }
        }

        let mut has_command = false;
        if !generation_failed && !cancel.is_cancelled() {
            let (remainder, command_present) = extractor.finalize();
            has_command = command_present;
            for sentence in sentences.push(&remainder) {
                let _ = job_tx.send(self.spawn_synthesis(sentence, &cancel, &synthesis_slots));
            }
            if let Some(tail) = sentences.flush_remaining() {
                let _ = job_tx.send(self.spawn_synthesis(tail, &cancel, &synthesis_slots));
            }
        }

        // Closing the queue lets the emitter drain and stop.
        drop(job_tx);
        let _ = emitter.await;

        // Checkpoint: after generation, before the action unit.
        if has_command && !generation_failed && !cancel.is_cancelled() {
            if let Some(unit) = self.derive_action(ctx, extractor.buffer()) {
                let _ = unit_tx.send(unit);
            }
        }
    }

    /// Kick off synthesis for one sentence in the background. Audio chunks
    /// land in the job's channel as they arrive; cancellation drops the
    /// in-flight call at its next await point.
    fn spawn_synthesis(
        &self,
        text: String,
        cancel: &CancellationToken,
        slots: &Arc<Semaphore>,
    ) -> SentenceJob {
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = oneshot::channel();
        let synthesizer = self.synthesizer.clone();
        let cancel = cancel.clone();
        let slots = slots.clone();
        let sentence = text.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(anyhow!("synthesis cancelled")),
                result = async {
                    let _permit = slots.acquire().await?;
                    synthesizer.synthesize(&sentence, audio_tx).await
                } => result,
            };
            let _ = result_tx.send(result);
        });
        SentenceJob {
            text,
            audio_rx,
            result_rx,
        }
    }

    /// Drain sentence jobs strictly in queue order: the sentence's text
    /// unit, then all of its audio, then the next job. An interrupt drops
    /// everything still queued, including audio already synthesized.
    async fn emit_in_order(
        mut job_rx: mpsc::UnboundedReceiver<SentenceJob>,
        unit_tx: mpsc::UnboundedSender<ResponseUnit>,
        cancel: CancellationToken,
        hardware_id: String,
    ) {
        while let Some(mut job) = job_rx.recv().await {
            // Checkpoint: before each emitted unit.
            if cancel.is_cancelled() {
                return;
            }
            let _ = unit_tx.send(ResponseUnit::Text {
                content: job.text.clone(),
            });
            while let Some(data) = job.audio_rx.recv().await {
                if cancel.is_cancelled() {
                    return;
                }
                let _ = unit_tx.send(ResponseUnit::Audio { data });
            }
            match job.result_rx.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if cancel.is_cancelled() {
                        return;
                    }
                    // The text unit already stands; only this sentence's
                    // audio is lost.
                    warn!(hardware_id, error = %e, "Synthesis failed for one sentence");
                    let _ = unit_tx.send(ResponseUnit::Error {
                        message: format!("synthesis failed: {e}"),
                    });
                }
                Err(_) => return,
            }
        }
    }

    /// Parse the complete reply for a device command. Every failure path
    /// degrades to text-only; the text already emitted stands unchanged.
    fn derive_action(&self, ctx: &TurnContext, raw: &str) -> Option<ResponseUnit> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Reply flagged a command but does not parse, staying text-only");
                return None;
            }
        };
        let name = value.get("command").and_then(Value::as_str)?;
        let args = value.get("args").cloned().unwrap_or(Value::Null);
        let command = self.commands.validate(name, &args)?;
        info!(
            session_id = %ctx.session_id,
            command = %command.command,
            "Emitting device command"
        );
        Some(ResponseUnit::Action {
            session_id: ctx.session_id.clone(),
            command: command.command,
            args: command.args,
        })
    }
}
