//! Speech-to-text: upstream client, event model, and utterance assembly.

pub mod deepgram;
mod queue;

pub use deepgram::DeepgramStt;
pub use queue::AudioQueue;

use thiserror::Error;

/// Minimum confidence for a final transcript to be processed. Genuine speech
/// scores well above this; background noise well below.
pub const MIN_CONFIDENCE: f32 = 0.60;

/// Minimum word count — filters single-word ghost transcripts from noise.
pub const MIN_WORDS: usize = 3;

/// Bound on the microphone frame queue (≈ several seconds of opus frames).
pub const AUDIO_QUEUE_CAPACITY: usize = 64;

/// Events published by the upstream client.
#[derive(Debug, Clone, PartialEq)]
pub enum SttEvent {
    /// Voice activity detected, before any transcript exists
    SpeechStarted,
    /// Partial transcript while the student is still talking
    Interim(String),
    /// A finished utterance chunk that passed the noise filters
    Final(String),
    /// STT is permanently down for this session
    Failed(String),
}

/// Errors from the upstream STT connection.
#[derive(Debug, Error)]
pub enum SttError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Final transcripts passing the noise gate.
pub fn passes_noise_filter(transcript: &str, confidence: f32) -> bool {
    confidence >= MIN_CONFIDENCE && transcript.split_whitespace().count() >= MIN_WORDS
}

/// Assembles adjacent final transcript chunks into one utterance.
///
/// Streaming STT can split a single human sentence into several finals;
/// chunks are buffered and merged until the merge window elapses without a
/// new one, so the tutor responds to the complete thought.
#[derive(Debug, Default)]
pub struct UtteranceBuffer {
    parts: Vec<String>,
}

impl UtteranceBuffer {
    pub fn push(&mut self, text: &str) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.parts.push(trimmed.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Drain the buffer into one merged utterance.
    pub fn take(&mut self) -> Option<String> {
        if self.parts.is_empty() {
            return None;
        }
        let merged = self.parts.join(" ");
        self.parts.clear();
        Some(merged)
    }
}
