//! Stand-in providers used when no vendor adapters are wired in. The
//! loopback generator streams a structured reply echoing the prompt; the
//! null synthesizer produces no audio.

use async_trait::async_trait;
use tokio::sync::mpsc;

use voxflow_core::providers::{
    GenerationRequest, GeneratorChunk, SpeechSynthesizer, TextGenerator, TokenStream,
};

pub struct LoopbackGenerator;

#[async_trait]
impl TextGenerator for LoopbackGenerator {
    fn id(&self) -> &str {
        "loopback"
    }

    async fn stream(&self, request: &GenerationRequest) -> anyhow::Result<TokenStream> {
        let reply = serde_json::json!({
            "response": format!("I heard: {}.", request.prompt),
        })
        .to_string();

        // Stream in small pieces to exercise incremental extraction.
        let mut parts: Vec<anyhow::Result<GeneratorChunk>> = Vec::new();
        let mut current = String::new();
        for ch in reply.chars() {
            current.push(ch);
            if current.chars().count() >= 16 {
                parts.push(Ok(GeneratorChunk {
                    delta: std::mem::take(&mut current),
                }));
            }
        }
        if !current.is_empty() {
            parts.push(Ok(GeneratorChunk { delta: current }));
        }
        Ok(Box::pin(futures::stream::iter(parts)))
    }
}

pub struct NullSynthesizer;

#[async_trait]
impl SpeechSynthesizer for NullSynthesizer {
    fn id(&self) -> &str {
        "null"
    }

    async fn synthesize(
        &self,
        _text: &str,
        _chunk_tx: mpsc::UnboundedSender<Vec<u8>>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
