//! Barge-in controller and echo gate.
//!
//! The controller is the session's cancellation fabric: each turn leases an
//! epoch and a child cancellation token; a barge-in cancels the active token
//! (stopping the LLM call, the TTS stream, and stroke emission) and advances
//! the epoch so the gateway writer drops any output the turn already queued.
//!
//! The echo gate keeps the tutor from interrupting itself: voice activity
//! right after TTS starts is ignored, an auto-barge needs a corroborating
//! transcript, auto-barges are debounced, and transcripts landing in the
//! cooldown after TTS that look like the tutor's own words are discarded.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::EchoConfig;
use crate::handlers::ws::messages::{MessageRoute, OutgoingMessage};

/// An exclusive turn lease: the epoch tagging this turn's output and the
/// token that aborts it.
#[derive(Debug, Clone)]
pub struct TurnLease {
    pub epoch: u64,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
struct ActiveTurn {
    epoch: u64,
    cancel: CancellationToken,
}

/// Per-session barge-in controller.
#[derive(Debug)]
pub struct BargeController {
    /// Epoch of the newest turn; gateway output tagged below this is stale
    current: AtomicU64,
    active: Mutex<Option<ActiveTurn>>,
    session_cancel: CancellationToken,
    outbound: mpsc::Sender<MessageRoute>,
}

impl BargeController {
    pub fn new(session_cancel: CancellationToken, outbound: mpsc::Sender<MessageRoute>) -> Self {
        Self {
            current: AtomicU64::new(0),
            active: Mutex::new(None),
            session_cancel,
            outbound,
        }
    }

    /// The epoch floor: messages tagged with an older epoch must be dropped.
    pub fn current_epoch(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// A turn holds the lease right now.
    pub fn has_active_turn(&self) -> bool {
        self.active.lock().expect("barge state poisoned").is_some()
    }

    /// Reserve the next epoch for a new turn.
    pub fn begin_turn(&self) -> TurnLease {
        let epoch = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        let cancel = self.session_cancel.child_token();
        *self.active.lock().expect("barge state poisoned") = Some(ActiveTurn {
            epoch,
            cancel: cancel.clone(),
        });
        debug!(epoch, "turn lease issued");
        TurnLease { epoch, cancel }
    }

    /// Release the lease after a turn finishes producing output.
    pub fn finish_turn(&self, epoch: u64) {
        let mut active = self.active.lock().expect("barge state poisoned");
        if active.as_ref().is_some_and(|t| t.epoch == epoch) {
            *active = None;
        }
    }

    /// Interrupt the active turn, if any. Idempotent: with no turn in
    /// flight this is a no-op, so repeated triggers collapse into one.
    pub async fn barge(&self) -> bool {
        let interrupted = {
            let mut active = self.active.lock().expect("barge state poisoned");
            match active.take() {
                Some(turn) => {
                    turn.cancel.cancel();
                    // Everything tagged with the superseded epoch is dropped
                    // at the gateway send step from here on.
                    self.current.store(turn.epoch + 1, Ordering::Release);
                    info!(epoch = turn.epoch, "barge-in: turn superseded");
                    true
                }
                None => false,
            }
        };
        if interrupted {
            let _ = self
                .outbound
                .send(MessageRoute::control(OutgoingMessage::BargeIn))
                .await;
        }
        interrupted
    }
}

/// What to do with a voice-activity event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechStartDecision {
    /// Not speaking over the tutor, or inside a guard window — ignore
    Ignore,
    /// Armed; a confirming transcript within the window will barge
    Armed,
}

/// What to do with a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscriptDecision {
    /// A pending auto-barge was confirmed; interrupt the tutor now
    pub barge: bool,
    /// The text is the tutor's own voice coming back; do not process it
    pub drop_as_echo: bool,
}

#[derive(Debug, Default)]
struct GateState {
    tts_active: bool,
    tts_started_at: Option<Instant>,
    last_chunk_at: Option<Instant>,
    pending_auto_barge: Option<Instant>,
    last_auto_barge: Option<Instant>,
    last_tutor_utterance: String,
}

/// Echo/barge gate shared by the TTS streamer and the STT pipeline.
#[derive(Debug)]
pub struct EchoGate {
    cfg: EchoConfig,
    state: Mutex<GateState>,
}

impl EchoGate {
    pub fn new(cfg: EchoConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Remember what the tutor is about to say, for self-transcription
    /// comparison.
    pub fn note_tutor_utterance(&self, text: &str) {
        self.lock().last_tutor_utterance = text.to_string();
    }

    pub fn on_tts_start(&self, now: Instant) {
        let mut state = self.lock();
        state.tts_active = true;
        state.tts_started_at = Some(now);
        state.last_chunk_at = Some(now);
    }

    pub fn on_tts_chunk(&self, now: Instant) {
        let mut state = self.lock();
        state.last_chunk_at = Some(now);
    }

    pub fn on_tts_end(&self) {
        let mut state = self.lock();
        state.tts_active = false;
        state.pending_auto_barge = None;
    }

    /// Voice activity detected by STT.
    pub fn on_speech_started(&self, now: Instant) -> SpeechStartDecision {
        let mut state = self.lock();
        if !state.tts_active {
            // The tutor isn't talking; nothing to interrupt
            return SpeechStartDecision::Ignore;
        }
        if state
            .last_auto_barge
            .is_some_and(|at| now.duration_since(at) < self.cfg.debounce)
        {
            return SpeechStartDecision::Ignore;
        }
        if state
            .tts_started_at
            .is_some_and(|at| now.duration_since(at) < self.cfg.start_guard)
        {
            // TTS playback just began; this is almost certainly the tutor's
            // own voice hitting the microphone
            return SpeechStartDecision::Ignore;
        }
        // Don't cut the tutor on VAD alone — wait for a real transcript
        state.pending_auto_barge = Some(now);
        SpeechStartDecision::Armed
    }

    /// A transcript arrived (interim or final).
    pub fn on_transcript(&self, now: Instant, text: &str) -> TranscriptDecision {
        let mut state = self.lock();

        let mut barge = false;
        if let Some(pending_at) = state.pending_auto_barge.take() {
            if state.tts_active
                && now.duration_since(pending_at) <= self.cfg.confirm_window
                && !text.trim().is_empty()
            {
                state.last_auto_barge = Some(now);
                barge = true;
            }
        }

        let in_cooldown = state
            .last_chunk_at
            .is_some_and(|at| now.duration_since(at) < self.cfg.cooldown);
        let drop_as_echo =
            !barge && in_cooldown && is_near_duplicate(text, &state.last_tutor_utterance);

        TranscriptDecision {
            barge,
            drop_as_echo,
        }
    }

    /// A confirmed barge-in resets the cooldown so the student's words that
    /// caused it are processed, not suppressed.
    pub fn reset_cooldown(&self) {
        let mut state = self.lock();
        state.last_chunk_at = None;
        state.pending_auto_barge = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().expect("echo gate poisoned")
    }
}

/// Near-duplicate check for self-transcription: normalized containment with
/// a length guard, so "let's solve for x" coming back through the mic
/// matches the tutor's longer sentence around it.
fn is_near_duplicate(heard: &str, spoken: &str) -> bool {
    let heard_norm = normalize(heard);
    let spoken_norm = normalize(spoken);
    if heard_norm.is_empty() || spoken_norm.is_empty() {
        return false;
    }
    if heard_norm.len() * 3 < spoken_norm.len().min(30) {
        // Too short to attribute either way; keep it
        return false;
    }
    spoken_norm.contains(&heard_norm) || heard_norm.contains(&spoken_norm)
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn gate() -> EchoGate {
        EchoGate::new(EchoConfig::default())
    }

    fn controller() -> (BargeController, mpsc::Receiver<MessageRoute>) {
        let (tx, rx) = mpsc::channel(16);
        (BargeController::new(CancellationToken::new(), tx), rx)
    }

    #[tokio::test]
    async fn barge_cancels_and_advances_the_epoch() {
        let (controller, mut rx) = controller();
        let lease = controller.begin_turn();
        assert_eq!(lease.epoch, 1);
        assert_eq!(controller.current_epoch(), 1);

        assert!(controller.barge().await);
        assert!(lease.cancel.is_cancelled());
        assert_eq!(controller.current_epoch(), 2);
        assert!(matches!(
            rx.try_recv(),
            Ok(MessageRoute::Outgoing {
                epoch: None,
                message: OutgoingMessage::BargeIn
            })
        ));
    }

    #[tokio::test]
    async fn double_barge_is_idempotent() {
        let (controller, mut rx) = controller();
        controller.begin_turn();
        assert!(controller.barge().await);
        assert!(!controller.barge().await);
        assert_eq!(controller.current_epoch(), 2);
        // Exactly one notice went out
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn barge_with_no_active_turn_is_a_no_op() {
        let (controller, mut rx) = controller();
        assert!(!controller.barge().await);
        assert_eq!(controller.current_epoch(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn finished_turns_keep_their_epoch_valid() {
        let (controller, _rx) = controller();
        let lease = controller.begin_turn();
        controller.finish_turn(lease.epoch);
        assert!(!controller.has_active_turn());
        // Output tagged with the finished epoch still passes the floor
        assert_eq!(controller.current_epoch(), lease.epoch);
    }

    #[test]
    fn speech_start_is_ignored_while_tutor_is_silent() {
        let gate = gate();
        assert_eq!(
            gate.on_speech_started(Instant::now()),
            SpeechStartDecision::Ignore
        );
    }

    #[test]
    fn speech_start_inside_the_guard_window_is_echo() {
        let gate = gate();
        let t0 = Instant::now();
        gate.on_tts_start(t0);
        assert_eq!(
            gate.on_speech_started(t0 + Duration::from_millis(100)),
            SpeechStartDecision::Ignore
        );
        // No transcript follows — no barge either
        let decision = gate.on_transcript(t0 + Duration::from_secs(3), "hello there friend");
        assert!(!decision.barge);
    }

    #[test]
    fn armed_barge_confirms_on_a_transcript_within_the_window() {
        let gate = gate();
        let t0 = Instant::now();
        gate.on_tts_start(t0);
        let armed_at = t0 + Duration::from_millis(600);
        assert_eq!(gate.on_speech_started(armed_at), SpeechStartDecision::Armed);
        let decision =
            gate.on_transcript(armed_at + Duration::from_millis(500), "wait I have a question");
        assert!(decision.barge);
        assert!(!decision.drop_as_echo);
    }

    #[test]
    fn armed_barge_expires_after_the_confirm_window() {
        let gate = gate();
        let t0 = Instant::now();
        gate.on_tts_start(t0);
        let armed_at = t0 + Duration::from_millis(600);
        gate.on_speech_started(armed_at);
        let decision =
            gate.on_transcript(armed_at + Duration::from_secs(3), "wait I have a question");
        assert!(!decision.barge);
    }

    #[test]
    fn auto_barges_are_debounced() {
        let gate = gate();
        let t0 = Instant::now();
        gate.on_tts_start(t0);
        let first = t0 + Duration::from_millis(600);
        gate.on_speech_started(first);
        assert!(gate.on_transcript(first + Duration::from_millis(100), "stop").barge);

        gate.on_tts_start(first + Duration::from_millis(150));
        assert_eq!(
            gate.on_speech_started(first + Duration::from_millis(250)),
            SpeechStartDecision::Ignore
        );
    }

    #[test]
    fn tutor_words_in_the_cooldown_are_dropped_as_echo() {
        let gate = gate();
        let t0 = Instant::now();
        gate.note_tutor_utterance("Let's solve for x together, shall we?");
        gate.on_tts_start(t0);
        gate.on_tts_chunk(t0 + Duration::from_secs(1));
        gate.on_tts_end();

        let decision = gate.on_transcript(
            t0 + Duration::from_millis(1500),
            "let's solve for x together",
        );
        assert!(decision.drop_as_echo);

        // A genuinely different sentence in the same window is kept
        let decision = gate.on_transcript(
            t0 + Duration::from_millis(1600),
            "actually can we do geometry instead",
        );
        assert!(!decision.drop_as_echo);
    }

    #[test]
    fn transcripts_after_the_cooldown_are_kept() {
        let gate = gate();
        let t0 = Instant::now();
        gate.note_tutor_utterance("Let's solve for x together");
        gate.on_tts_start(t0);
        gate.on_tts_end();
        let decision = gate.on_transcript(
            t0 + Duration::from_secs(10),
            "let's solve for x together",
        );
        assert!(!decision.drop_as_echo);
    }
}
