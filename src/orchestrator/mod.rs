//! The turn orchestrator: the conversational state machine.
//!
//! All turn triggers — session start, student utterances, proactive board
//! checks — multiplex onto one queue, and this module's single consumer loop
//! is the session's conversational exclusion lease: at most one LLM call is
//! ever in flight, and turn `E+1` produces no output until turn `E` finished
//! or was superseded by a barge-in.

pub mod barge;
pub mod scheduler;

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::board::{self, BoardAction, Position};
use crate::config::{BoardConfig, LatexConfig};
use crate::core::llm::{LlmError, LlmRequest, TutorModel, prompt::greeting_opener};
use crate::core::strokes::{BoardWriter, StrokeBatch, WriteRequest, calibrate_animation};
use crate::core::tts::SpeechSynth;
use crate::handlers::ws::messages::{BoardActionMessage, MessageRoute, OutgoingMessage};
use crate::session::{PROACTIVE_NOTE, Role, Turn, TutorMode, TutorSession};

use barge::{BargeController, EchoGate, TurnLease};

/// Bound on the trigger queue; events past this are arriving faster than
/// turns can ever drain them.
pub const TRIGGER_QUEUE_CAPACITY: usize = 32;

/// How long stroke emission waits for the first TTS chunk so speech leads
/// writing. Writing never stalls longer than this.
const TTS_START_GRACE: Duration = Duration::from_millis(800);

/// Per-turn audio channel depth between the TTS stream and the gateway.
const TTS_CHANNEL_CAPACITY: usize = 64;

/// One queued reason to run a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnTrigger {
    /// `session_start`: produce the greeting
    Greeting { subject: Option<String> },
    /// A complete student utterance (manual or merged from STT)
    Student { text: String },
    /// The idle scheduler noticed silent drawing
    ProactiveCheck,
}

/// Per-session turn orchestrator. Owns no tasks itself; `run` is spawned by
/// the gateway and lives exactly as long as the trigger queue.
pub struct Orchestrator {
    pub session: Arc<Mutex<TutorSession>>,
    pub outbound: mpsc::Sender<MessageRoute>,
    pub barge: Arc<BargeController>,
    pub gate: Arc<EchoGate>,
    pub model: Arc<dyn TutorModel>,
    pub synth: Arc<dyn SpeechSynth>,
    pub writer: Arc<dyn BoardWriter>,
    pub board_cfg: BoardConfig,
    pub latex_cfg: LatexConfig,
}

/// Emission plan entry: strokes reference the synthesized batch list so the
/// whole turn can be speed-calibrated before anything is sent.
enum Emit {
    Strokes(usize),
    Board(BoardActionMessage),
}

impl Orchestrator {
    /// Consume triggers until the queue closes (session teardown).
    pub async fn run(self, mut triggers: mpsc::Receiver<TurnTrigger>) {
        while let Some(trigger) = triggers.recv().await {
            self.run_turn(trigger).await;
        }
        debug!("orchestrator loop ended");
    }

    async fn run_turn(&self, trigger: TurnTrigger) {
        let lease = self.barge.begin_turn();
        let is_proactive = matches!(trigger, TurnTrigger::ProactiveCheck);

        let request = self.record_trigger_and_snapshot_inputs(&trigger).await;

        let reply = self.model.respond(request, &lease.cancel).await;
        let reply = match reply {
            Ok(reply) if !reply.speech.trim().is_empty() => reply,
            Ok(_) => {
                debug!(epoch = lease.epoch, "model returned empty speech");
                self.abandon_turn(is_proactive, &lease).await;
                return;
            }
            Err(LlmError::Cancelled) => {
                debug!(epoch = lease.epoch, "model call cancelled by barge-in");
                self.abandon_turn(is_proactive, &lease).await;
                return;
            }
            Err(err) => {
                warn!(epoch = lease.epoch, error = %err, "model call failed; turn dropped");
                self.abandon_turn(is_proactive, &lease).await;
                return;
            }
        };

        let actions: Vec<BoardAction> = reply
            .board_actions
            .into_iter()
            .filter(|action| {
                let ok = action.is_valid();
                if !ok {
                    warn!(?action, "dropping invalid board action");
                }
                ok
            })
            .collect();

        // Rebase onto the live board and commit the tutor turn atomically.
        let outcome = {
            let mut session = self.session.lock().await;
            let normalized = board::normalize(actions, session.board.board_width);
            let outcome = board::rebase(
                normalized,
                &session.board,
                &self.board_cfg,
                &self.latex_cfg,
            );
            session.board = outcome.state;
            session.add_tutor_turn(reply.speech.clone());
            session.mode = reply.tutor_state;
            session.wait_for_student = reply.wait_for_student;
            session.last_interaction = Instant::now();
            outcome
        };
        self.gate.note_tutor_utterance(&reply.speech);

        info!(
            epoch = lease.epoch,
            actions = outcome.actions.len(),
            mode = ?reply.tutor_state,
            "dispatching turn"
        );

        // Speech text always precedes the first audio chunk of the turn.
        if !self
            .emit(&lease, OutgoingMessage::SpeechText {
                text: reply.speech.clone(),
            })
            .await
        {
            self.barge.finish_turn(lease.epoch);
            return;
        }

        let (first_chunk_tx, first_chunk_rx) = oneshot::channel();
        let tts_handle = tokio::spawn(stream_tts(
            self.synth.clone(),
            reply.speech.clone(),
            self.outbound.clone(),
            self.gate.clone(),
            lease.epoch,
            lease.cancel.clone(),
            first_chunk_tx,
        ));

        // Synthesize every write up front so animation speeds can be matched
        // to the speech duration before anything is emitted.
        let (plan, mut batches) = self.prepare_board_output(&outcome.actions, &lease).await;
        calibrate_animation(&mut batches, &reply.speech);

        // Let audio lead, briefly: a professor starts talking, then writes.
        let _ = tokio::time::timeout(TTS_START_GRACE, first_chunk_rx).await;

        for item in plan {
            if lease.cancel.is_cancelled() {
                debug!(epoch = lease.epoch, "stroke emission stopped by barge-in");
                break;
            }
            let message = match item {
                Emit::Strokes(idx) => OutgoingMessage::Strokes {
                    strokes: batches[idx].clone(),
                },
                Emit::Board(action) => OutgoingMessage::BoardAction { action },
            };
            if !self.emit(&lease, message).await {
                self.barge.finish_turn(lease.epoch);
                return;
            }
        }

        if let Some(by) = outcome.scroll_by {
            self.emit(&lease, OutgoingMessage::ScrollBoard {
                scroll_by: by.round() as i64,
            })
            .await;
        }

        self.emit(&lease, OutgoingMessage::StateUpdate {
            tutor_state: reply.tutor_state,
            wait_for_student: reply.wait_for_student,
        })
        .await;

        // The turn owns its TTS stream; surfacing its end here is what keeps
        // turns strictly serialized.
        if let Err(err) = tts_handle.await {
            error!(error = %err, "TTS task panicked");
        }

        self.barge.finish_turn(lease.epoch);
    }

    /// Record the trigger in history (per its kind) and snapshot everything
    /// the model call needs, under one short lock.
    async fn record_trigger_and_snapshot_inputs(&self, trigger: &TurnTrigger) -> LlmRequest {
        let mut session = self.session.lock().await;
        match trigger {
            TurnTrigger::Greeting { subject } => {
                session.subject = subject.clone();
                session.is_active = true;
                session.mode = TutorMode::Listening;
                session.last_interaction = Instant::now();
            }
            TurnTrigger::Student { text } => {
                session.add_student_turn(text.clone());
                session.last_interaction = Instant::now();
                session.wait_for_student = false;
            }
            TurnTrigger::ProactiveCheck => {
                session.add_student_turn(PROACTIVE_NOTE);
            }
        }

        let mut turns = session.history.clone();
        if turns.is_empty() {
            // Greeting: the opener rides in the request without ever
            // entering the history (the first recorded turn is the tutor's).
            turns.push(Turn {
                role: Role::Student,
                content: greeting_opener(session.subject.as_deref()),
            });
        }
        let snapshot = match trigger {
            TurnTrigger::Greeting { .. } => None,
            _ => session.last_snapshot.clone(),
        };
        LlmRequest {
            turns,
            board_note: session.board_context_note(&self.board_cfg),
            snapshot,
        }
    }

    /// Synthesize strokes for every write; underline/clear pass through.
    async fn prepare_board_output(
        &self,
        actions: &[BoardAction],
        lease: &TurnLease,
    ) -> (Vec<Emit>, Vec<StrokeBatch>) {
        let mut plan = Vec::with_capacity(actions.len());
        let mut batches = Vec::new();
        for (idx, action) in actions.iter().enumerate() {
            if lease.cancel.is_cancelled() {
                break;
            }
            match action {
                BoardAction::Write {
                    content,
                    format,
                    position,
                    color,
                } => {
                    let max_width = (self.width_hint().await - 180.0).max(240.0);
                    let batch = self
                        .writer
                        .synthesize(WriteRequest {
                            content: content.clone(),
                            format: *format,
                            color: color.clone(),
                            position: Position::new(position.x, position.y),
                            max_width,
                            // Stable per (turn, action): reruns of a turn's
                            // synthesis reproduce identical strokes
                            seed: lease.epoch * 1000 + idx as u64,
                        })
                        .await;
                    batches.push(batch);
                    plan.push(Emit::Strokes(batches.len() - 1));
                }
                other => {
                    if let Some(message) = BoardActionMessage::from_action(other) {
                        plan.push(Emit::Board(message));
                    }
                }
            }
        }
        (plan, batches)
    }

    async fn width_hint(&self) -> f64 {
        self.session.lock().await.board.board_width
    }

    /// A turn that produced nothing: unwind the synthetic proactive note and
    /// release the lease. Committed history is never rolled back — only the
    /// note that exists solely to anchor a reply that never came.
    async fn abandon_turn(&self, is_proactive: bool, lease: &TurnLease) {
        if is_proactive {
            self.session.lock().await.remove_trailing_proactive_note();
        }
        self.barge.finish_turn(lease.epoch);
    }

    /// Queue one epoch-tagged message; false when the session is gone.
    async fn emit(&self, lease: &TurnLease, message: OutgoingMessage) -> bool {
        self.outbound
            .send(MessageRoute::turn(lease.epoch, message))
            .await
            .is_ok()
    }
}

/// Stream one turn's TTS audio into the outbound queue.
///
/// Chunks are base64-encoded and tagged with the turn epoch; the gate learns
/// when the tutor's voice starts and stops so the STT side can tell student
/// speech from echo. Cancellation closes the upstream promptly.
async fn stream_tts(
    synth: Arc<dyn SpeechSynth>,
    text: String,
    outbound: mpsc::Sender<MessageRoute>,
    gate: Arc<EchoGate>,
    epoch: u64,
    cancel: CancellationToken,
    first_chunk: oneshot::Sender<()>,
) {
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<Bytes>(TTS_CHANNEL_CAPACITY);
    let stream_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { synth.stream(&text, chunk_tx, cancel).await })
    };

    let mut first = Some(first_chunk);
    while let Some(chunk) = chunk_rx.recv().await {
        let now = Instant::now();
        if first.is_some() {
            gate.on_tts_start(now);
        } else {
            gate.on_tts_chunk(now);
        }
        let message = OutgoingMessage::AudioChunk {
            data: BASE64.encode(&chunk),
        };
        if outbound.send(MessageRoute::turn(epoch, message)).await.is_err() {
            break;
        }
        if let Some(tx) = first.take() {
            let _ = tx.send(());
        }
    }
    gate.on_tts_end();

    match stream_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(epoch, error = %err, "TTS stream failed"),
        Err(err) => error!(epoch, error = %err, "TTS stream task panicked"),
    }
}
