//! WebSocket connection lifecycle — admission, read loop, ordered writes.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use voxflow_core::protocol::{validate_identity, Phase, ResponseUnit, StreamRequest};
use voxflow_pipeline::assembler::SubmitOutcome;
use voxflow_pipeline::orchestrator::TurnContext;

use crate::state::GatewayState;

/// Handle a new WebSocket stream end to end.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket) {
    let conn_id = Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = ws.split();

    let evict = match state.admission.acquire(&conn_id) {
        Ok(token) => token,
        Err(e) => {
            let unit = ResponseUnit::Error {
                message: e.to_string(),
            };
            let _ = send_unit(&mut ws_tx, unit).await;
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };
    info!(conn_id = %conn_id, "New stream connection");

    // All response units funnel through one writer task so text and audio
    // frames keep their emission order on the wire.
    let (unit_tx, mut unit_rx) = mpsc::unbounded_channel::<ResponseUnit>();
    let send_task = tokio::spawn(async move {
        while let Some(unit) = unit_rx.recv().await {
            if send_unit(&mut ws_tx, unit).await.is_err() {
                break;
            }
        }
    });

    // Hardware identity of the most recent valid request, for interrupt
    // cleanup when the socket drops mid-turn.
    let mut current_hardware: Option<String> = None;

    loop {
        let msg_result = tokio::select! {
            _ = evict.cancelled() => {
                let _ = unit_tx.send(ResponseUnit::Error {
                    message: "stream evicted after idle timeout".to_string(),
                });
                break;
            }
            msg = ws_rx.next() => match msg {
                Some(result) => result,
                None => break,
            },
        };

        match msg_result {
            Ok(Message::Text(text)) => {
                if let Err(e) = state.admission.check_rate(&conn_id) {
                    let _ = unit_tx.send(ResponseUnit::Error {
                        message: e.to_string(),
                    });
                    continue;
                }

                let request = match serde_json::from_str::<StreamRequest>(&text) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(conn_id = %conn_id, %e, "Unparseable stream request");
                        let _ = unit_tx.send(ResponseUnit::Error {
                            message: format!("invalid request: {e}"),
                        });
                        continue;
                    }
                };
                if let Err(reason) = validate_identity(&request) {
                    let _ = unit_tx.send(ResponseUnit::Error { message: reason });
                    continue;
                }

                state
                    .admission
                    .bind_hardware(&conn_id, &request.hardware_id);
                current_hardware = Some(request.hardware_id.clone());
                state
                    .sessions
                    .create(&request.hardware_id, &request.session_id);
                handle_request(&state, request, &unit_tx).await;
            }
            Ok(Message::Binary(_)) => {
                debug!(conn_id = %conn_id, "Ignoring inbound binary frame");
            }
            Ok(Message::Close(_)) => {
                debug!(conn_id = %conn_id, "Client requested close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(conn_id = %conn_id, %e, "WebSocket error");
                break;
            }
        }
    }

    // A dropped socket supersedes whatever turn it was carrying.
    if let Some(hardware_id) = current_hardware {
        if state.interrupts.interrupt(&hardware_id).was_active {
            info!(conn_id = %conn_id, hardware_id, "Interrupted in-flight turn on disconnect");
        }
    }
    // Let the writer drain queued units (the eviction notice included)
    // before the sink drops.
    drop(unit_tx);
    let _ = tokio::time::timeout(Duration::from_secs(5), send_task).await;
    state.admission.release(&conn_id);
    info!(conn_id = %conn_id, "Stream connection closed");
}

/// Route one validated request through the assembler and, on a commit,
/// into a new turn.
async fn handle_request(
    state: &Arc<GatewayState>,
    request: StreamRequest,
    unit_tx: &mpsc::UnboundedSender<ResponseUnit>,
) {
    let hardware_id = request.hardware_id.clone();
    let session_id = request.session_id.clone();
    let is_commit = request.phase == Phase::Commit;

    match state.assembler.submit(&request) {
        SubmitOutcome::Ack { chunk_seq } => {
            let _ = unit_tx.send(ResponseUnit::Ack {
                session_id,
                chunk_seq,
            });
        }
        SubmitOutcome::Commit(assembled) => {
            debug_assert!(is_commit);
            supersede_in_flight(state, &hardware_id).await;

            let ctx = TurnContext {
                hardware_id,
                session_id,
                assembled,
            };
            let orchestrator = state.orchestrator.clone();
            let unit_tx = unit_tx.clone();
            tokio::spawn(async move {
                orchestrator.run_turn(ctx, unit_tx).await;
            });
        }
    }
}

/// A new committed utterance supersedes any turn still in flight for the
/// same hardware identity: interrupt it, give it a bounded window to
/// unwind, then reset the flag for the new turn.
async fn supersede_in_flight(state: &Arc<GatewayState>, hardware_id: &str) {
    if state.interrupts.interrupt(hardware_id).was_active {
        info!(hardware_id, "New commit supersedes in-flight turn");
        let wait = Duration::from_millis(state.config.limits().interrupt_wait_ms);
        if let Err(e) = state.interrupts.wait_for_idle(hardware_id, wait).await {
            warn!(hardware_id, %e, "Superseded turn did not unwind in time, proceeding");
        }
    }
    // Reset unconditionally: a disconnect-triggered interrupt leaves the
    // flag set with no turn active, and it must not leak into this turn.
    state.interrupts.clear(hardware_id);
}

/// Serialize one unit onto the socket: JSON envelopes ride text frames,
/// audio rides raw binary frames.
async fn send_unit(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    unit: ResponseUnit,
) -> anyhow::Result<()> {
    let frame = match unit {
        ResponseUnit::Audio { data } => Message::Binary(data.into()),
        other => match other.to_envelope() {
            Some(envelope) => Message::Text(envelope.to_string().into()),
            None => return Ok(()),
        },
    };
    ws_tx.send(frame).await?;
    Ok(())
}
