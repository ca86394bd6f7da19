//! End-to-end turn flow tests against in-process mock providers.
//!
//! These drive the orchestrator exactly the way the gateway does — triggers
//! in, epoch-filtered outbound messages out — with scripted LLM replies and
//! a chunked fake TTS stream, so the conversational invariants (ordering,
//! serialization, barge-in suppression, history consistency) are observable
//! without any network.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use tutor_gateway::board::{BoardAction, Position, WriteFormat};
use tutor_gateway::config::{BoardConfig, LatexConfig};
use tutor_gateway::core::llm::{LlmError, LlmReply, LlmRequest, TutorModel};
use tutor_gateway::core::strokes::{
    BoardWriter, Stroke, StrokeBatch, StrokePoint, WriteRequest,
};
use tutor_gateway::core::tts::{SpeechSynth, TtsError};
use tutor_gateway::handlers::ws::messages::{MessageRoute, OutgoingMessage};
use tutor_gateway::handlers::ws::should_send;
use tutor_gateway::orchestrator::barge::{BargeController, EchoGate};
use tutor_gateway::orchestrator::{Orchestrator, TurnTrigger};
use tutor_gateway::session::{Role, TutorMode, TutorSession};

// ── Mock providers ─────────────────────────────────────────────────────────

struct ScriptedModel {
    replies: StdMutex<VecDeque<Result<LlmReply, LlmError>>>,
    delay: Duration,
}

impl ScriptedModel {
    fn new(replies: Vec<Result<LlmReply, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: StdMutex::new(replies.into()),
            delay: Duration::from_millis(10),
        })
    }
}

#[async_trait]
impl TutorModel for ScriptedModel {
    async fn respond(
        &self,
        _request: LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<LlmReply, LlmError> {
        tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            _ = tokio::time::sleep(self.delay) => {}
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(LlmError::Timeout))
    }
}

/// Fake TTS: emits `chunks` PCM chunks spaced `spacing` apart.
struct ChunkedSynth {
    chunks: usize,
    spacing: Duration,
}

#[async_trait]
impl SpeechSynth for ChunkedSynth {
    async fn stream(
        &self,
        _text: &str,
        audio_tx: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Result<(), TtsError> {
        for i in 0..self.chunks {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.spacing) => {}
            }
            if audio_tx
                .send(Bytes::from(vec![i as u8; 64]))
                .await
                .is_err()
            {
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Fake stroke synthesis: one two-point stroke per write.
struct FakeWriter;

#[async_trait]
impl BoardWriter for FakeWriter {
    async fn synthesize(&self, req: WriteRequest) -> StrokeBatch {
        StrokeBatch {
            strokes: vec![Stroke {
                points: vec![
                    StrokePoint {
                        x: req.position.x,
                        y: req.position.y,
                        pressure: 0.8,
                    },
                    StrokePoint {
                        x: req.position.x + 10.0,
                        y: req.position.y,
                        pressure: 0.8,
                    },
                ],
                color: req.color,
                width: 2.0,
            }],
            position: req.position,
            animation_speed: 1.0,
        }
    }
}

// ── Harness ────────────────────────────────────────────────────────────────

struct Harness {
    triggers: mpsc::Sender<TurnTrigger>,
    session: Arc<Mutex<TutorSession>>,
    barge: Arc<BargeController>,
    sink: Arc<StdMutex<Vec<OutgoingMessage>>>,
    orchestrator_task: tokio::task::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
}

fn reply(speech: &str, actions: Vec<BoardAction>) -> Result<LlmReply, LlmError> {
    let value = serde_json::json!({
        "speech": speech,
        "board_actions": serde_json::to_value(&actions).unwrap(),
        "tutor_state": "guiding",
        "wait_for_student": false,
    });
    Ok(serde_json::from_value(value).unwrap())
}

fn write_action(content: &str, y: f64) -> BoardAction {
    BoardAction::Write {
        content: content.to_string(),
        format: WriteFormat::Text,
        position: Position::new(80.0, y),
        color: "#000000".to_string(),
    }
}

fn start(model: Arc<ScriptedModel>, synth: ChunkedSynth) -> Harness {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<MessageRoute>(256);
    let (trigger_tx, trigger_rx) = mpsc::channel::<TurnTrigger>(32);
    let cancel = CancellationToken::new();
    let barge = Arc::new(BargeController::new(cancel, outbound_tx.clone()));
    let session = Arc::new(Mutex::new(TutorSession::new(
        "test-session".to_string(),
        &BoardConfig::default(),
    )));

    // Mirror of the gateway writer: apply the epoch filter at the send step
    let sink = Arc::new(StdMutex::new(Vec::new()));
    let writer_task = {
        let sink = sink.clone();
        let barge = barge.clone();
        tokio::spawn(async move {
            while let Some(route) = outbound_rx.recv().await {
                match route {
                    MessageRoute::Outgoing { epoch, message } => {
                        if should_send(epoch, barge.current_epoch()) {
                            sink.lock().unwrap().push(message);
                        }
                    }
                    MessageRoute::Close => break,
                }
            }
        })
    };

    let orchestrator = Orchestrator {
        session: session.clone(),
        outbound: outbound_tx,
        barge: barge.clone(),
        gate: Arc::new(EchoGate::new(Default::default())),
        model,
        synth: Arc::new(synth),
        writer: Arc::new(FakeWriter),
        board_cfg: BoardConfig::default(),
        latex_cfg: LatexConfig::default(),
    };
    let orchestrator_task = tokio::spawn(orchestrator.run(trigger_rx));

    Harness {
        triggers: trigger_tx,
        session,
        barge,
        sink,
        orchestrator_task,
        writer_task,
    }
}

impl Harness {
    fn messages(&self) -> Vec<OutgoingMessage> {
        self.sink.lock().unwrap().clone()
    }

    async fn wait_until(&self, predicate: impl Fn(&[OutgoingMessage]) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if predicate(&self.messages()) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting; got {:?}",
                self.messages()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Close the trigger queue and let both tasks drain.
    async fn shutdown(self) -> Vec<OutgoingMessage> {
        drop(self.triggers);
        self.orchestrator_task.await.unwrap();
        self.writer_task.abort();
        let _ = self.writer_task.await;
        let messages = self.sink.lock().unwrap().clone();
        messages
    }
}

fn state_updates(messages: &[OutgoingMessage]) -> usize {
    messages
        .iter()
        .filter(|m| matches!(m, OutgoingMessage::StateUpdate { .. }))
        .count()
}

// ── Scenarios ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn greeting_produces_speech_then_audio_then_state() {
    let model = ScriptedModel::new(vec![reply("Hey! Ready for some algebra?", vec![])]);
    let harness = start(model, ChunkedSynth {
        chunks: 3,
        spacing: Duration::from_millis(5),
    });

    harness
        .triggers
        .send(TurnTrigger::Greeting {
            subject: Some("Algebra".to_string()),
        })
        .await
        .unwrap();
    harness.wait_until(|m| state_updates(m) == 1).await;

    {
        let session = harness.session.lock().await;
        assert_eq!(session.history.len(), 1, "only the tutor greeting");
        assert_eq!(session.history[0].role, Role::Tutor);
        assert_eq!(session.mode, TutorMode::Guiding);
    }

    let messages = harness.shutdown().await;
    let speech_idx = messages
        .iter()
        .position(|m| matches!(m, OutgoingMessage::SpeechText { .. }))
        .expect("speech_text present");
    let first_audio = messages
        .iter()
        .position(|m| matches!(m, OutgoingMessage::AudioChunk { .. }))
        .expect("audio chunks present");
    assert!(
        speech_idx < first_audio,
        "speech_text precedes every audio_chunk"
    );
    assert_eq!(state_updates(&messages), 1);
}

#[tokio::test]
async fn question_and_answer_appends_both_turns() {
    let model = ScriptedModel::new(vec![reply("Four! What made you ask?", vec![])]);
    let harness = start(model, ChunkedSynth {
        chunks: 2,
        spacing: Duration::from_millis(5),
    });

    harness
        .triggers
        .send(TurnTrigger::Student {
            text: "What is 2+2?".to_string(),
        })
        .await
        .unwrap();
    harness.wait_until(|m| state_updates(m) == 1).await;

    {
        let session = harness.session.lock().await;
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].role, Role::Student);
        assert_eq!(session.history[0].content, "What is 2+2?");
        assert_eq!(session.history[1].role, Role::Tutor);
    }

    let messages = harness.shutdown().await;
    assert!(
        !messages
            .iter()
            .any(|m| matches!(m, OutgoingMessage::Strokes { .. })),
        "a plain answer writes nothing"
    );
}

#[tokio::test]
async fn writes_are_emitted_as_strokes_after_speech() {
    let model = ScriptedModel::new(vec![reply(
        "Let's write it out.",
        vec![write_action("x + 3 = 7", 140.0), write_action("x = 4", 200.0)],
    )]);
    let harness = start(model, ChunkedSynth {
        chunks: 2,
        spacing: Duration::from_millis(5),
    });

    harness
        .triggers
        .send(TurnTrigger::Student {
            text: "Solve x+3=7 on the board".to_string(),
        })
        .await
        .unwrap();
    harness.wait_until(|m| state_updates(m) == 1).await;
    let messages = harness.shutdown().await;

    let strokes: Vec<&StrokeBatch> = messages
        .iter()
        .filter_map(|m| match m {
            OutgoingMessage::Strokes { strokes } => Some(strokes),
            _ => None,
        })
        .collect();
    assert_eq!(strokes.len(), 2);
    // Rebased sequential placement: second row sits below the first
    assert!(strokes[1].position.y > strokes[0].position.y);

    let speech_idx = messages
        .iter()
        .position(|m| matches!(m, OutgoingMessage::SpeechText { .. }))
        .unwrap();
    let first_strokes = messages
        .iter()
        .position(|m| matches!(m, OutgoingMessage::Strokes { .. }))
        .unwrap();
    assert!(speech_idx < first_strokes);
}

#[tokio::test]
async fn barge_in_suppresses_the_rest_of_the_turn() {
    let model = ScriptedModel::new(vec![
        reply("This will take a while to say out loud.", vec![]),
        reply("Sure — go ahead!", vec![]),
    ]);
    // Long stream: ~50 chunks over ~1.5 s
    let harness = start(model, ChunkedSynth {
        chunks: 50,
        spacing: Duration::from_millis(30),
    });

    harness
        .triggers
        .send(TurnTrigger::Student {
            text: "Tell me everything about polynomials".to_string(),
        })
        .await
        .unwrap();
    harness
        .wait_until(|m| {
            m.iter()
                .filter(|m| matches!(m, OutgoingMessage::AudioChunk { .. }))
                .count()
                >= 3
        })
        .await;

    assert!(harness.barge.barge().await, "an active turn was interrupted");
    harness
        .wait_until(|m| m.iter().any(|m| matches!(m, OutgoingMessage::BargeIn)))
        .await;

    // The interrupted tutor turn stays committed
    assert_eq!(harness.session.lock().await.history.len(), 2);

    // A new turn on a fresh epoch still produces output. (The interrupted
    // turn's own state_update is superseded output and never arrives.)
    harness
        .triggers
        .send(TurnTrigger::Student {
            text: "Actually, can we do fractions?".to_string(),
        })
        .await
        .unwrap();
    harness
        .wait_until(|m| {
            m.iter().any(
                |m| matches!(m, OutgoingMessage::SpeechText { text } if text == "Sure — go ahead!"),
            )
        })
        .await;
    let messages = harness.shutdown().await;

    // No audio of the superseded epoch after the barge notice
    let barge_idx = messages
        .iter()
        .position(|m| matches!(m, OutgoingMessage::BargeIn))
        .unwrap();
    let second_speech_idx = messages
        .iter()
        .rposition(|m| matches!(m, OutgoingMessage::SpeechText { .. }))
        .unwrap();
    for message in &messages[barge_idx..second_speech_idx] {
        assert!(
            !matches!(message, OutgoingMessage::AudioChunk { .. }),
            "superseded audio leaked past the barge notice"
        );
    }
}

#[tokio::test]
async fn empty_proactive_check_leaves_no_trace() {
    let model = ScriptedModel::new(vec![reply("", vec![])]);
    let harness = start(model, ChunkedSynth {
        chunks: 1,
        spacing: Duration::from_millis(5),
    });

    harness
        .triggers
        .send(TurnTrigger::ProactiveCheck)
        .await
        .unwrap();
    // Give the turn time to run and abandon itself
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(
        harness.session.lock().await.history.is_empty(),
        "synthetic note removed when the model has nothing to say"
    );
    let messages = harness.shutdown().await;
    assert!(messages.is_empty(), "no output for an empty turn: {messages:?}");
}

#[tokio::test]
async fn model_failure_drops_the_turn_quietly() {
    let model = ScriptedModel::new(vec![Err(LlmError::InvalidResponse(
        "not json".to_string(),
    ))]);
    let harness = start(model, ChunkedSynth {
        chunks: 1,
        spacing: Duration::from_millis(5),
    });

    harness
        .triggers
        .send(TurnTrigger::Student {
            text: "hello there professor".to_string(),
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    {
        let session = harness.session.lock().await;
        // The student's words stay; no tutor turn was committed
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.history[0].role, Role::Student);
    }
    let messages = harness.shutdown().await;
    assert!(messages.is_empty());
}

#[tokio::test]
async fn turns_are_strictly_serialized() {
    let model = ScriptedModel::new(vec![
        reply("First answer.", vec![]),
        reply("Second answer.", vec![]),
    ]);
    let harness = start(model, ChunkedSynth {
        chunks: 2,
        spacing: Duration::from_millis(5),
    });

    // Queue two triggers back to back; FIFO processing must interleave
    // nothing
    harness
        .triggers
        .send(TurnTrigger::Student {
            text: "first question here".to_string(),
        })
        .await
        .unwrap();
    harness
        .triggers
        .send(TurnTrigger::Student {
            text: "second question here".to_string(),
        })
        .await
        .unwrap();
    harness.wait_until(|m| state_updates(m) == 2).await;

    let history: Vec<(Role, String)> = {
        let session = harness.session.lock().await;
        session
            .history
            .iter()
            .map(|t| (t.role, t.content.clone()))
            .collect()
    };
    assert_eq!(
        history,
        vec![
            (Role::Student, "first question here".to_string()),
            (Role::Tutor, "First answer.".to_string()),
            (Role::Student, "second question here".to_string()),
            (Role::Tutor, "Second answer.".to_string()),
        ]
    );

    let messages = harness.shutdown().await;
    let texts: Vec<&str> = messages
        .iter()
        .filter_map(|m| match m {
            OutgoingMessage::SpeechText { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec!["First answer.", "Second answer."]);

    // All of turn 1's audio precedes turn 2's speech_text
    let second_speech = messages
        .iter()
        .position(
            |m| matches!(m, OutgoingMessage::SpeechText { text } if text == "Second answer."),
        )
        .unwrap();
    let last_first_audio = messages[..second_speech]
        .iter()
        .rposition(|m| matches!(m, OutgoingMessage::AudioChunk { .. }));
    assert!(last_first_audio.is_some());
}
