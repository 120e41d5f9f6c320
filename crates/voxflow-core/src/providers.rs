//! Provider interfaces the pipeline drives.
//!
//! Vendor adapters (model/voice selection, HTTP clients) live outside this
//! system; the pipeline only depends on these traits, with the concrete
//! implementations chosen at startup by explicit configuration.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;

use crate::protocol::Attachment;

/// A request for one generation turn.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Optional captured image accompanying the prompt.
    pub attachment: Option<Attachment>,
}

/// One streamed token (or token batch) from the generator.
#[derive(Debug, Clone, Default)]
pub struct GeneratorChunk {
    pub delta: String,
}

pub type TokenStream = Pin<Box<dyn Stream<Item = anyhow::Result<GeneratorChunk>> + Send>>;

/// Text-generation provider: a token stream given a prompt + optional image.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn id(&self) -> &str;

    async fn stream(&self, request: &GenerationRequest) -> anyhow::Result<TokenStream>;
}

/// Speech-synthesis provider: audio bytes for one sentence, streamed as
/// chunks arrive. A dropped receiver stops the stream early.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn id(&self) -> &str;

    async fn synthesize(
        &self,
        text: &str,
        chunk_tx: mpsc::UnboundedSender<Vec<u8>>,
    ) -> anyhow::Result<()>;
}
