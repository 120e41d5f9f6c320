//! Gateway integration tests — start a real gateway and interact over WS + HTTP.
//!
//! Run with: `cargo test -p voxflow-gateway --test integration`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use voxflow_core::config::{Config, LimitsConfig};
use voxflow_core::providers::{
    GenerationRequest, GeneratorChunk, SpeechSynthesizer, TextGenerator, TokenStream,
};
use voxflow_gateway::GatewayState;

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Generator double: records every prompt and replies with a fixed
/// structured payload, streamed in two pieces.
struct RecordingGenerator {
    prompts: Arc<Mutex<Vec<String>>>,
    reply: String,
}

#[async_trait]
impl TextGenerator for RecordingGenerator {
    fn id(&self) -> &str {
        "recording"
    }

    async fn stream(&self, request: &GenerationRequest) -> anyhow::Result<TokenStream> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let mid = self.reply.len() / 2;
        let parts = vec![
            Ok(GeneratorChunk {
                delta: self.reply[..mid].to_string(),
            }),
            Ok(GeneratorChunk {
                delta: self.reply[mid..].to_string(),
            }),
        ];
        Ok(Box::pin(futures::stream::iter(parts)))
    }
}

/// Generator double whose first turn never finishes: one sentence, then a
/// stream that stays pending. Later turns reply normally.
struct StallThenReplyGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl TextGenerator for StallThenReplyGenerator {
    fn id(&self) -> &str {
        "stall-then-reply"
    }

    async fn stream(&self, _request: &GenerationRequest) -> anyhow::Result<TokenStream> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            let head = futures::stream::iter(vec![Ok(GeneratorChunk {
                delta: r#"{"response": "Hold on please. "#.to_string(),
            })]);
            Ok(Box::pin(head.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(futures::stream::iter(vec![Ok(GeneratorChunk {
                delta: r#"{"response": "Back again now."}"#.to_string(),
            })])))
        }
    }
}

/// Synthesizer double: one audio chunk carrying the sentence bytes.
struct EchoSynthesizer;

#[async_trait]
impl SpeechSynthesizer for EchoSynthesizer {
    fn id(&self) -> &str {
        "echo"
    }

    async fn synthesize(
        &self,
        text: &str,
        chunk_tx: mpsc::UnboundedSender<Vec<u8>>,
    ) -> anyhow::Result<()> {
        let _ = chunk_tx.send(text.as_bytes().to_vec());
        Ok(())
    }
}

struct TestGateway {
    port: u16,
    prompts: Arc<Mutex<Vec<String>>>,
    #[allow(dead_code)]
    state: Arc<GatewayState>,
}

async fn start_test_gateway(limits: LimitsConfig, reply: &str) -> TestGateway {
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let generator = Arc::new(RecordingGenerator {
        prompts: prompts.clone(),
        reply: reply.to_string(),
    });
    let (port, state) = start_gateway_with(limits, generator).await;
    TestGateway {
        port,
        prompts,
        state,
    }
}

async fn start_gateway_with(
    limits: LimitsConfig,
    generator: Arc<dyn TextGenerator>,
) -> (u16, Arc<GatewayState>) {
    let port = find_free_port();
    let config = Config {
        limits: Some(limits),
        ..Default::default()
    };

    let state = Arc::new(GatewayState::new(
        Arc::new(config),
        generator,
        Arc::new(EchoSynthesizer),
    ));

    let state_clone = state.clone();
    tokio::spawn(async move {
        let _ = voxflow_gateway::start_gateway(state_clone, port).await;
    });

    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .is_ok()
        {
            break;
        }
    }

    (port, state)
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(port: u16) -> WsStream {
    let (ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws"))
        .await
        .unwrap();
    ws
}

async fn next_frame(ws: &mut WsStream) -> Message {
    tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for frame")
        .expect("stream ended")
        .expect("websocket error")
}

fn request(session: &str, phase: &str, seq: u64, chunk: &str, prompt: &str) -> Message {
    Message::Text(
        json!({
            "hardware_id": "hw-int",
            "session_id": session,
            "phase": phase,
            "chunk_seq": seq,
            "chunk_text": chunk,
            "prompt": prompt,
        })
        .to_string()
        .into(),
    )
}

/// Read frames until the end marker, returning (events, binary frames).
async fn read_turn(ws: &mut WsStream) -> (Vec<Value>, Vec<Vec<u8>>) {
    let mut events = Vec::new();
    let mut audio = Vec::new();
    loop {
        match next_frame(ws).await {
            Message::Text(text) => {
                let envelope: Value = serde_json::from_str(&text).unwrap();
                let done = envelope["event"] == "end";
                events.push(envelope);
                if done {
                    break;
                }
            }
            Message::Binary(data) => audio.push(data.to_vec()),
            _ => {}
        }
    }
    (events, audio)
}

#[tokio::test]
async fn test_health_endpoint() {
    let gateway = start_test_gateway(LimitsConfig::default(), "{}").await;

    let body: Value = reqwest::get(format!("http://127.0.0.1:{}/health", gateway.port))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["streams"], 0);
}

#[tokio::test]
async fn test_collect_commit_assembles_and_streams_reply() {
    let gateway = start_test_gateway(
        LimitsConfig::default(),
        r#"{"response": "The weather is sunny today."}"#,
    )
    .await;
    let mut ws = connect(gateway.port).await;

    ws.send(request("s1", "collect", 1, "what's", "")).await.unwrap();
    ws.send(request("s1", "collect", 2, " the weather", ""))
        .await
        .unwrap();
    ws.send(request("s1", "commit", 3, "", "?")).await.unwrap();

    let (events, audio) = read_turn(&mut ws).await;

    // Two acks for the collect chunks, then text before audio, then end.
    let kinds: Vec<&str> = events.iter().map(|e| e["event"].as_str().unwrap()).collect();
    assert_eq!(kinds, vec!["ack", "ack", "text", "end"]);
    assert_eq!(
        events[2]["payload"]["content"],
        "The weather is sunny today."
    );
    assert_eq!(audio, vec![b"The weather is sunny today.".to_vec()]);

    // The assembled prompt reached the generator exactly once.
    let prompts = gateway.prompts.lock().unwrap().clone();
    assert_eq!(prompts, vec!["what's the weather?".to_string()]);
}

#[tokio::test]
async fn test_action_follows_audio_for_command_reply() {
    let gateway = start_test_gateway(
        LimitsConfig::default(),
        r#"{"response": "Opening it now.", "command": "open_app", "args": {"app": "mail"}}"#,
    )
    .await;
    let mut ws = connect(gateway.port).await;

    ws.send(request("s1", "commit", 1, "", "open mail")).await.unwrap();
    let (events, audio) = read_turn(&mut ws).await;

    let kinds: Vec<&str> = events.iter().map(|e| e["event"].as_str().unwrap()).collect();
    assert_eq!(kinds, vec!["text", "action", "end"]);
    assert_eq!(events[1]["payload"]["command"], "open_app");
    assert_eq!(events[1]["payload"]["session_id"], "s1");
    assert_eq!(events[1]["payload"]["args"]["app"], "mail");
    assert_eq!(audio.len(), 1);
}

#[tokio::test]
async fn test_rate_ceiling_rejects_with_error_prefix() {
    let limits = LimitsConfig {
        max_messages_per_second: 2,
        ..LimitsConfig::default()
    };
    let gateway = start_test_gateway(limits, "{}").await;
    let mut ws = connect(gateway.port).await;

    for seq in 1..=3 {
        ws.send(request("s1", "collect", seq, "x", "")).await.unwrap();
    }

    let mut saw_rate_error = false;
    for _ in 0..3 {
        if let Message::Text(text) = next_frame(&mut ws).await {
            let envelope: Value = serde_json::from_str(&text).unwrap();
            if envelope["event"] == "error" {
                let message = envelope["payload"]["message"].as_str().unwrap();
                assert!(message.starts_with("ERR_RATE_LIMIT"), "got: {message}");
                saw_rate_error = true;
            }
        }
    }
    assert!(saw_rate_error);
}

#[tokio::test]
async fn test_stream_ceiling_rejects_second_connection() {
    let limits = LimitsConfig {
        max_streams: 1,
        ..LimitsConfig::default()
    };
    let gateway = start_test_gateway(limits, "{}").await;

    let _first = connect(gateway.port).await;
    // Give the first connection time to claim its lease.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut second = connect(gateway.port).await;
    match next_frame(&mut second).await {
        Message::Text(text) => {
            let envelope: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(envelope["event"], "error");
            let message = envelope["payload"]["message"].as_str().unwrap();
            assert!(message.starts_with("ERR_STREAM_LIMIT"), "got: {message}");
        }
        other => panic!("expected error envelope, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_hardware_id_is_rejected() {
    let gateway = start_test_gateway(LimitsConfig::default(), "{}").await;
    let mut ws = connect(gateway.port).await;

    ws.send(Message::Text(
        json!({
            "hardware_id": "unknown",
            "session_id": "s1",
            "phase": "commit",
            "prompt": "hello",
        })
        .to_string()
        .into(),
    ))
    .await
    .unwrap();

    match next_frame(&mut ws).await {
        Message::Text(text) => {
            let envelope: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(envelope["event"], "error");
            assert!(envelope["payload"]["message"]
                .as_str()
                .unwrap()
                .contains("hardware_id"));
        }
        other => panic!("expected error envelope, got {other:?}"),
    }

    // No turn was started for the rejected request.
    assert!(gateway.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_collect_chunk_is_acked_but_ignored() {
    let gateway = start_test_gateway(
        LimitsConfig::default(),
        r#"{"response": "Here is the answer."}"#,
    )
    .await;
    let mut ws = connect(gateway.port).await;

    ws.send(request("s1", "collect", 1, "what's", "")).await.unwrap();
    // Retransmission of the same sequence number.
    ws.send(request("s1", "collect", 1, "what's", "")).await.unwrap();
    ws.send(request("s1", "commit", 2, " the weather", ""))
        .await
        .unwrap();

    let (_events, _audio) = read_turn(&mut ws).await;
    let prompts = gateway.prompts.lock().unwrap().clone();
    assert_eq!(prompts, vec!["what's the weather".to_string()]);
}

#[tokio::test]
async fn test_reconnect_after_mid_turn_disconnect_serves_next_turn() {
    let generator = Arc::new(StallThenReplyGenerator {
        calls: AtomicUsize::new(0),
    });
    let (port, _state) = start_gateway_with(LimitsConfig::default(), generator).await;

    // First connection commits against a turn that never finishes; drop
    // the socket once the first sentence proves the turn is in flight.
    let mut first = connect(port).await;
    first.send(request("s1", "commit", 1, "", "hello")).await.unwrap();
    loop {
        if let Message::Text(text) = next_frame(&mut first).await {
            let envelope: Value = serde_json::from_str(&text).unwrap();
            if envelope["event"] == "text" {
                break;
            }
        }
    }
    drop(first);
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The same hardware identity reconnects and commits a fresh turn. It
    // must stream real content, not just an end marker.
    let mut second = connect(port).await;
    second
        .send(request("s2", "commit", 1, "", "hello again"))
        .await
        .unwrap();
    let (events, _audio) = read_turn(&mut second).await;

    let texts: Vec<&str> = events
        .iter()
        .filter(|e| e["event"] == "text")
        .map(|e| e["payload"]["content"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["Back again now."], "second turn events: {events:?}");
    assert_eq!(events.last().unwrap()["event"], "end");
}

#[tokio::test]
async fn test_idle_eviction_notifies_client_before_close() {
    let limits = LimitsConfig {
        idle_timeout_secs: 0,
        sweep_interval_secs: 1,
        ..LimitsConfig::default()
    };
    let gateway = start_test_gateway(limits, "{}").await;
    let mut ws = connect(gateway.port).await;

    // The reaper's next sweep evicts the untouched lease; the client must
    // still receive the reason before the socket closes.
    let mut saw_eviction_notice = false;
    for _ in 0..3 {
        match tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let envelope: Value = serde_json::from_str(&text).unwrap();
                if envelope["event"] == "error"
                    && envelope["payload"]["message"]
                        .as_str()
                        .unwrap()
                        .contains("evicted")
                {
                    saw_eviction_notice = true;
                    break;
                }
            }
            Ok(Some(Ok(_))) => {}
            _ => break,
        }
    }
    assert!(saw_eviction_notice);
}
