//! Connection gateway: one duplex WebSocket per tutoring session.
//!
//! The gateway owns the socket and nothing else touches framing. Inbound
//! frames are deserialized and routed (barge-in synchronously to the
//! controller, audio to the STT queue, everything else to the session or the
//! orchestrator queue); outbound messages drain through a single writer task
//! that drops output from superseded turn epochs before serializing.

use std::sync::Arc;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::stt::{AUDIO_QUEUE_CAPACITY, AudioQueue};
use crate::orchestrator::barge::{BargeController, EchoGate};
use crate::orchestrator::{Orchestrator, TRIGGER_QUEUE_CAPACITY, TurnTrigger, scheduler};
use crate::session::{BoardSnapshot, TutorSession};
use crate::state::AppState;

use super::messages::{IncomingMessage, MessageRoute, OutgoingMessage};
use super::stt::SttPipeline;

/// Depth of the single outbound queue (multi-producer, one writer).
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// WebSocket upgrade for `/ws/{session_id}`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!(%session_id, "session WebSocket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

/// Everything a live connection owns.
struct Connection {
    state: Arc<AppState>,
    session: Arc<Mutex<TutorSession>>,
    outbound: mpsc::Sender<MessageRoute>,
    triggers: mpsc::Sender<TurnTrigger>,
    barge: Arc<BargeController>,
    gate: Arc<EchoGate>,
    session_cancel: CancellationToken,
    audio: Option<Arc<AudioQueue>>,
    stt_task: Option<JoinHandle<()>>,
    /// Tells the STT pipeline to drain its merge buffer right now
    stt_flush: Option<mpsc::Sender<()>>,
}

async fn handle_socket(socket: WebSocket, session_id: String, state: Arc<AppState>) {
    info!(%session_id, "session established");
    let (sender, receiver) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<MessageRoute>(OUTBOUND_QUEUE_CAPACITY);
    let (trigger_tx, trigger_rx) = mpsc::channel::<TurnTrigger>(TRIGGER_QUEUE_CAPACITY);

    let session_cancel = CancellationToken::new();
    let barge = Arc::new(BargeController::new(
        session_cancel.clone(),
        outbound_tx.clone(),
    ));
    let gate = Arc::new(EchoGate::new(state.config.echo.clone()));
    let session = Arc::new(Mutex::new(TutorSession::new(
        session_id.clone(),
        &state.config.board,
    )));

    let writer_task = tokio::spawn(write_outbound(sender, outbound_rx, barge.clone()));

    let orchestrator = Orchestrator {
        session: session.clone(),
        outbound: outbound_tx.clone(),
        barge: barge.clone(),
        gate: gate.clone(),
        model: state.model.clone(),
        synth: state.synth.clone(),
        writer: state.writer.clone(),
        board_cfg: state.config.board.clone(),
        latex_cfg: state.config.latex.clone(),
    };
    let orchestrator_task = tokio::spawn(orchestrator.run(trigger_rx));

    let scheduler_task = tokio::spawn(scheduler::run(
        session.clone(),
        barge.clone(),
        trigger_tx.clone(),
        state.config.silence_threshold,
        state.config.min_proactive_interval,
        session_cancel.clone(),
    ));

    let _ = outbound_tx
        .send(MessageRoute::control(OutgoingMessage::Connected {
            session_id: session_id.clone(),
            message: "Connected to AI Tutor. Say hello to Professor Ada!".to_string(),
        }))
        .await;

    let mut connection = Connection {
        state,
        session,
        outbound: outbound_tx.clone(),
        triggers: trigger_tx.clone(),
        barge,
        gate,
        session_cancel: session_cancel.clone(),
        audio: None,
        stt_task: None,
        stt_flush: None,
    };

    read_loop(receiver, &mut connection).await;

    // Teardown: every background task is bound to the session lifetime.
    info!(%session_id, "session closing");
    session_cancel.cancel();
    if let Some(queue) = connection.audio.take() {
        queue.close();
    }
    if let Some(task) = connection.stt_task.take() {
        task.abort();
    }
    drop(trigger_tx);
    drop(connection);
    let _ = outbound_tx.send(MessageRoute::Close).await;
    drop(outbound_tx);

    scheduler_task.abort();
    let _ = orchestrator_task.await;
    let _ = writer_task.await;
    info!(%session_id, "session terminated");
}

/// Writer task: sole consumer of the outbound queue, sole producer of
/// frames. Drops epoch-tagged messages that a barge-in superseded.
async fn write_outbound(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<MessageRoute>,
    barge: Arc<BargeController>,
) {
    while let Some(route) = rx.recv().await {
        match route {
            MessageRoute::Outgoing { epoch, message } => {
                if !should_send(epoch, barge.current_epoch()) {
                    debug!(?epoch, "dropping output from superseded turn");
                    continue;
                }
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(err) => {
                        warn!(error = %err, "failed to serialize outbound message");
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    // Transport failure terminates the session
                    warn!("outbound write failed; closing");
                    return;
                }
            }
            MessageRoute::Close => {
                let _ = sender.send(Message::Close(None)).await;
                return;
            }
        }
    }
}

/// The gateway's epoch filter: untagged messages always pass; tagged ones
/// must not be older than the current epoch floor.
pub fn should_send(epoch: Option<u64>, floor: u64) -> bool {
    epoch.is_none_or(|e| e >= floor)
}

async fn read_loop(mut receiver: SplitStream<WebSocket>, connection: &mut Connection) {
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let message: IncomingMessage = match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(err) => {
                        // Fail-open: log, tell the client, keep the session
                        warn!(error = %err, "malformed inbound frame dropped");
                        let _ = connection
                            .outbound
                            .send(MessageRoute::control(OutgoingMessage::Error {
                                message: format!("unrecognized message: {err}"),
                            }))
                            .await;
                        continue;
                    }
                };
                handle_incoming(message, connection).await;
            }
            Ok(Message::Close(_)) => {
                debug!("client closed the session");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "session socket error");
                return;
            }
        }
    }
}

async fn handle_incoming(message: IncomingMessage, connection: &mut Connection) {
    match message {
        IncomingMessage::SessionStart { subject } => {
            let _ = connection
                .triggers
                .send(TurnTrigger::Greeting { subject })
                .await;
        }

        IncomingMessage::Transcript { text } => {
            let text = text.trim().to_string();
            if text.is_empty() {
                return;
            }
            let _ = connection.triggers.send(TurnTrigger::Student { text }).await;
        }

        IncomingMessage::BoardSnapshot {
            image_base64,
            width,
            height,
            student_max_y,
        } => {
            if image_base64.is_empty() {
                return;
            }
            // Stored only; a snapshot never interrupts an in-flight turn
            let count = {
                let mut session = connection.session.lock().await;
                session.store_snapshot(
                    BoardSnapshot {
                        image_base64,
                        width,
                        height,
                    },
                    student_max_y,
                )
            };
            let _ = connection
                .outbound
                .send(MessageRoute::control(OutgoingMessage::SnapshotReceived {
                    count,
                }))
                .await;
        }

        IncomingMessage::AudioStart => start_listening(connection).await,

        IncomingMessage::AudioData { data } => {
            let Some(queue) = &connection.audio else { return };
            match BASE64.decode(data.as_bytes()) {
                Ok(bytes) => queue.push(bytes.into()),
                Err(err) => debug!(error = %err, "undecodable audio frame dropped"),
            }
        }

        IncomingMessage::AudioStop => {
            if let Some(queue) = connection.audio.take() {
                queue.close();
            }
            // Drain any buffered partial utterance immediately rather than
            // racing the upstream close handshake
            if let Some(flush) = connection.stt_flush.take() {
                let _ = flush.try_send(());
            }
        }

        IncomingMessage::BargeIn => {
            // Prioritized: applied immediately, never queued behind a turn
            connection.gate.reset_cooldown();
            connection.barge.barge().await;
        }
    }
}

async fn start_listening(connection: &mut Connection) {
    // Once the recognizer has failed past its retry budget, STT stays down
    // for the rest of the session; don't reconnect from scratch.
    if connection.session.lock().await.stt_disabled {
        let _ = connection
            .outbound
            .send(MessageRoute::control(OutgoingMessage::Error {
                message: "speech recognition is unavailable for this session".to_string(),
            }))
            .await;
        return;
    }
    let Some(stt) = connection.state.stt.clone() else {
        let _ = connection
            .outbound
            .send(MessageRoute::control(OutgoingMessage::Error {
                message: "speech recognition is not configured".to_string(),
            }))
            .await;
        return;
    };

    // A fresh audio_start supersedes any previous listening period
    if let Some(previous) = connection.audio.take() {
        previous.close();
    }
    if let Some(task) = connection.stt_task.take() {
        task.abort();
    }

    let queue = Arc::new(AudioQueue::new(AUDIO_QUEUE_CAPACITY));
    connection.audio = Some(queue.clone());
    let (flush_tx, flush_rx) = mpsc::channel(1);
    connection.stt_flush = Some(flush_tx);

    let pipeline = SttPipeline {
        session: connection.session.clone(),
        gate: connection.gate.clone(),
        barge: connection.barge.clone(),
        outbound: connection.outbound.clone(),
        triggers: connection.triggers.clone(),
        merge_window: connection.state.config.stt_merge_window,
    };
    let cancel = connection.session_cancel.clone();
    connection.stt_task = Some(tokio::spawn(pipeline.run(stt, queue, flush_rx, cancel)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_filter_passes_control_and_current_messages() {
        assert!(should_send(None, 5));
        assert!(should_send(Some(5), 5));
        assert!(should_send(Some(6), 5));
    }

    #[test]
    fn epoch_filter_drops_superseded_messages() {
        assert!(!should_send(Some(4), 5));
        assert!(!should_send(Some(0), 1));
    }
}
