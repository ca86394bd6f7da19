//! STT pipeline: bridges the upstream recognizer to the orchestrator.
//!
//! Owns one listening period (from `audio_start` to `audio_stop`): spawns
//! the upstream client over the audio queue, then consumes its events —
//! arming and confirming auto-barges through the echo gate, coalescing final
//! transcripts into whole utterances, and handing each merged utterance to
//! the orchestrator as a student turn. The gateway's `audio_stop` handler
//! signals `flush_now` so a buffered partial utterance drains the moment the
//! mic stops, without waiting for the upstream socket to round-trip closed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::stt::{AudioQueue, DeepgramStt, SttEvent, UtteranceBuffer};
use crate::orchestrator::TurnTrigger;
use crate::orchestrator::barge::{BargeController, EchoGate};
use crate::session::TutorSession;

use super::messages::{MessageRoute, OutgoingMessage};

/// Event channel depth between the upstream client and this consumer.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Shared handles the pipeline needs from the connection.
#[derive(Clone)]
pub struct SttPipeline {
    pub session: Arc<Mutex<TutorSession>>,
    pub gate: Arc<EchoGate>,
    pub barge: Arc<BargeController>,
    pub outbound: mpsc::Sender<MessageRoute>,
    pub triggers: mpsc::Sender<TurnTrigger>,
    pub merge_window: Duration,
}

impl SttPipeline {
    /// Run one listening period. Returns when the audio queue closes, the
    /// session tears down, or the upstream fails permanently.
    pub async fn run(
        self,
        stt: Arc<DeepgramStt>,
        audio: Arc<AudioQueue>,
        flush_now: mpsc::Receiver<()>,
        cancel: CancellationToken,
    ) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let upstream = {
            let cancel = cancel.clone();
            tokio::spawn(async move { stt.run(audio, event_tx, cancel).await })
        };

        self.consume(event_rx, flush_now).await;

        if let Err(err) = upstream.await {
            warn!(error = %err, "STT upstream task panicked");
        }
    }

    async fn consume(
        &self,
        mut events: mpsc::Receiver<SttEvent>,
        mut flush_now: mpsc::Receiver<()>,
    ) {
        let mut buffer = UtteranceBuffer::default();
        let mut flush_at: Option<Instant> = None;
        let mut flush_open = true;

        loop {
            // Evaluated even when its branch is disabled, so it needs a value
            let merge_deadline: tokio::time::Instant =
                flush_at.unwrap_or_else(Instant::now).into();

            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        // Upstream ended (audio_stop or teardown): flush
                        // what's left
                        self.flush(&mut buffer).await;
                        return;
                    };
                    if !self.handle_event(event, &mut buffer, &mut flush_at).await {
                        return;
                    }
                }
                signal = flush_now.recv(), if flush_open => {
                    match signal {
                        Some(()) => {
                            // The mic stopped; drain the partial utterance
                            // now instead of racing the upstream close
                            flush_at = None;
                            self.flush(&mut buffer).await;
                        }
                        None => flush_open = false,
                    }
                }
                _ = tokio::time::sleep_until(merge_deadline), if flush_at.is_some() => {
                    flush_at = None;
                    self.flush(&mut buffer).await;
                }
            }
        }
    }

    /// Route one upstream event. Returns false when the pipeline is done.
    async fn handle_event(
        &self,
        event: SttEvent,
        buffer: &mut UtteranceBuffer,
        flush_at: &mut Option<Instant>,
    ) -> bool {
        let now = Instant::now();
        match event {
            SttEvent::SpeechStarted => {
                // Arms a pending auto-barge; the cut waits for a real
                // transcript so the tutor never interrupts itself
                let _ = self.gate.on_speech_started(now);
            }
            SttEvent::Interim(text) => {
                if self.gate.on_transcript(now, &text).barge {
                    self.confirm_barge().await;
                }
            }
            SttEvent::Final(text) => {
                let decision = self.gate.on_transcript(now, &text);
                if decision.barge {
                    self.confirm_barge().await;
                }
                if decision.drop_as_echo {
                    info!(text, "self-transcription suppressed");
                    return true;
                }
                buffer.push(&text);
                *flush_at = Some(Instant::now() + self.merge_window);
            }
            SttEvent::Failed(message) => {
                // Past the retry budget: STT stays down for this session
                self.session.lock().await.stt_disabled = true;
                let _ = self
                    .outbound
                    .send(MessageRoute::control(OutgoingMessage::Error { message }))
                    .await;
                self.flush(buffer).await;
                return false;
            }
        }
        true
    }

    async fn confirm_barge(&self) {
        // The words that caused the barge must themselves be processed
        self.gate.reset_cooldown();
        self.barge.barge().await;
    }

    /// Surface the merged utterance and start a student turn.
    async fn flush(&self, buffer: &mut UtteranceBuffer) {
        let Some(merged) = buffer.take() else { return };
        debug!(text = %merged, "utterance assembled");
        let _ = self
            .outbound
            .send(MessageRoute::control(OutgoingMessage::TranscriptInterim {
                text: merged.clone(),
            }))
            .await;
        let _ = self
            .triggers
            .send(TurnTrigger::Student { text: merged })
            .await;
    }
}
