//! WebSocket wire protocol for tutoring sessions.
//!
//! Every frame is a JSON record discriminated by a `type` field. Binary data
//! (audio in both directions, board snapshots) travels as base64 strings
//! inside JSON payloads.

use serde::{Deserialize, Serialize};

use crate::board::{Area, BoardAction};
use crate::core::strokes::StrokeBatch;
use crate::session::TutorMode;

/// Incoming WebSocket messages from the client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    /// Begin the session; triggers the greeting turn
    SessionStart {
        #[serde(default)]
        subject: Option<String>,
    },

    /// Open the STT upstream
    AudioStart,

    /// Microphone audio (base64 opus-in-webm), forwarded to STT
    AudioData { data: String },

    /// Close the STT upstream
    AudioStop,

    /// Manual final transcript (bypasses STT)
    Transcript { text: String },

    /// Whiteboard snapshot; may later trigger a proactive check
    BoardSnapshot {
        image_base64: String,
        width: f64,
        height: f64,
        #[serde(default)]
        student_max_y: Option<f64>,
    },

    /// Interrupt the current tutor turn
    BargeIn,
}

/// Non-stroke board mutation forwarded to the client.
///
/// `write` actions never reach the client directly — they become `strokes`
/// messages after synthesis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoardActionMessage {
    Underline { area: Area, color: String },
    Clear,
}

impl BoardActionMessage {
    /// Convert a layout action; `None` for writes (those go out as strokes).
    pub fn from_action(action: &BoardAction) -> Option<Self> {
        match action {
            BoardAction::Underline { area, color } => Some(Self::Underline {
                area: *area,
                color: color.clone(),
            }),
            BoardAction::Clear => Some(Self::Clear),
            BoardAction::Write { .. } => None,
        }
    }
}

/// Outgoing WebSocket messages to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    /// Handshake complete
    Connected { session_id: String, message: String },

    /// The tutor's spoken text for this turn
    SpeechText { text: String },

    /// Next synthesized audio frames (base64 pcm16le @ 22050 Hz mono)
    AudioChunk { data: String },

    /// Animated handwriting
    Strokes { strokes: StrokeBatch },

    /// Non-stroke board mutation
    BoardAction { action: BoardActionMessage },

    /// Last recognized student phrase
    TranscriptInterim { text: String },

    /// Tutor mode change
    StateUpdate {
        tutor_state: TutorMode,
        wait_for_student: bool,
    },

    /// Ask the client to pan the board down
    ScrollBoard { scroll_by: i64 },

    /// Tutor output was interrupted
    BargeIn,

    /// Board snapshot stored
    SnapshotReceived { count: u64 },

    /// Non-fatal error report
    Error { message: String },
}

/// Routed entry on the single outbound queue.
///
/// Messages produced by a turn carry that turn's epoch; the gateway writer
/// drops entries whose epoch has been superseded before serializing. Session
/// control messages carry no epoch and always go out.
#[derive(Debug, Clone)]
pub enum MessageRoute {
    Outgoing {
        epoch: Option<u64>,
        message: OutgoingMessage,
    },
    Close,
}

impl MessageRoute {
    pub fn control(message: OutgoingMessage) -> Self {
        Self::Outgoing {
            epoch: None,
            message,
        }
    }

    pub fn turn(epoch: u64, message: OutgoingMessage) -> Self {
        Self::Outgoing {
            epoch: Some(epoch),
            message,
        }
    }
}
