//! In-memory state for one tutoring session.
//!
//! A `TutorSession` lives behind a single `tokio::sync::Mutex` shared by the
//! gateway, the orchestrator, and the scheduler. Critical sections stay
//! short and the lock is never held across I/O; snapshot bytes are shared
//! through `Arc` so readers clone the handle and release the lock before
//! touching the image.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::board::BoardState;
use crate::config::BoardConfig;

/// What the tutor is currently doing, as reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TutorMode {
    #[default]
    Listening,
    Guiding,
    Demonstrating,
    Evaluating,
}

/// Who spoke a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Tutor,
}

/// One entry of the conversation history. Append-only during the session.
#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// The most recent whiteboard snapshot. Immutable after publish; overwritten
/// by the next snapshot, never queued.
#[derive(Debug, Clone)]
pub struct BoardSnapshot {
    pub image_base64: String,
    pub width: f64,
    pub height: f64,
}

/// Per-session conversational and board state.
#[derive(Debug)]
pub struct TutorSession {
    pub id: String,
    pub subject: Option<String>,
    pub history: Vec<Turn>,
    pub mode: TutorMode,
    pub is_active: bool,
    /// The tutor asked the student to show work; gates proactive checks
    pub wait_for_student: bool,
    /// The recognizer failed past its retry budget; STT stays down for the
    /// rest of the session
    pub stt_disabled: bool,

    pub board: BoardState,
    pub last_snapshot: Option<Arc<BoardSnapshot>>,
    pub snapshot_count: u64,

    /// Last time either party produced a message
    pub last_interaction: Instant,
    /// Last proactive board check, if any
    pub last_proactive_at: Option<Instant>,
    /// A snapshot arrived since the last proactive check
    pub snapshot_since_proactive: bool,
}

/// Synthetic student turn recorded for proactive board checks. Removed again
/// when the check produces nothing to say.
pub const PROACTIVE_NOTE: &str = "[checking my work on the board]";

impl TutorSession {
    pub fn new(id: String, board_cfg: &BoardConfig) -> Self {
        Self {
            id,
            subject: None,
            history: Vec::new(),
            mode: TutorMode::Listening,
            is_active: false,
            wait_for_student: false,
            stt_disabled: false,
            board: BoardState::new(board_cfg),
            last_snapshot: None,
            snapshot_count: 0,
            last_interaction: Instant::now(),
            last_proactive_at: None,
            snapshot_since_proactive: false,
        }
    }

    pub fn add_student_turn(&mut self, text: impl Into<String>) {
        self.history.push(Turn {
            role: Role::Student,
            content: text.into(),
        });
    }

    pub fn add_tutor_turn(&mut self, text: impl Into<String>) {
        self.history.push(Turn {
            role: Role::Tutor,
            content: text.into(),
        });
    }

    /// Drop the trailing synthetic proactive note, if it is still the last
    /// entry. The only sanctioned removal from the otherwise append-only
    /// history.
    pub fn remove_trailing_proactive_note(&mut self) {
        if self
            .history
            .last()
            .is_some_and(|t| t.role == Role::Student && t.content == PROACTIVE_NOTE)
        {
            self.history.pop();
        }
    }

    /// Store a snapshot, updating board dimensions and the student extent.
    pub fn store_snapshot(
        &mut self,
        snapshot: BoardSnapshot,
        student_max_y: Option<f64>,
    ) -> u64 {
        if snapshot.width > 200.0 {
            self.board.board_width = snapshot.width;
        }
        if snapshot.height > 200.0 {
            self.board.board_height = snapshot.height;
        }
        if let Some(max_y) = student_max_y {
            if max_y.is_finite() && max_y > self.board.student_max_y {
                self.board.student_max_y = max_y;
            }
        }
        self.last_snapshot = Some(Arc::new(snapshot));
        self.snapshot_count += 1;
        self.snapshot_since_proactive = true;
        self.snapshot_count
    }

    /// Short whiteboard status note appended to the final user message, so
    /// the LLM knows placement is automatic and keeps using the fixed
    /// origin.
    pub fn board_context_note(&self, board_cfg: &BoardConfig) -> Option<String> {
        let effective_y = (self.board.cursor_y - self.board.viewport_y).max(0.0);
        if effective_y <= board_cfg.write_y {
            return None;
        }
        let space_left = self.board.board_height - effective_y;
        let origin = format!(
            "x={}, y={}",
            board_cfg.write_x as i64, board_cfg.write_y as i64
        );
        if space_left < 150.0 {
            Some(format!(
                "[Whiteboard: nearly full — the board will scroll on your next write. \
                 Write at your normal starting position {origin}.]"
            ))
        } else {
            Some(format!(
                "[Whiteboard: has existing content. Your writing will be placed below it \
                 automatically — always use {origin} as your starting position.]"
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> TutorSession {
        TutorSession::new("s1".to_string(), &BoardConfig::default())
    }

    #[test]
    fn proactive_note_is_removed_only_when_trailing() {
        let mut s = session();
        s.add_student_turn(PROACTIVE_NOTE);
        s.remove_trailing_proactive_note();
        assert!(s.history.is_empty());

        s.add_student_turn(PROACTIVE_NOTE);
        s.add_tutor_turn("looks good!");
        s.remove_trailing_proactive_note();
        assert_eq!(s.history.len(), 2);
    }

    #[test]
    fn snapshots_overwrite_and_count() {
        let mut s = session();
        let first = BoardSnapshot {
            image_base64: "a".to_string(),
            width: 1200.0,
            height: 700.0,
        };
        let second = BoardSnapshot {
            image_base64: "b".to_string(),
            width: 1400.0,
            height: 900.0,
        };
        assert_eq!(s.store_snapshot(first, None), 1);
        assert_eq!(s.store_snapshot(second, Some(512.0)), 2);
        let snap = s.last_snapshot.as_ref().unwrap();
        assert_eq!(snap.image_base64, "b");
        assert_eq!(s.board.board_width, 1400.0);
        assert_eq!(s.board.student_max_y, 512.0);
        assert!(s.snapshot_since_proactive);
    }

    #[test]
    fn tiny_snapshot_dimensions_are_ignored() {
        let mut s = session();
        s.store_snapshot(
            BoardSnapshot {
                image_base64: "a".to_string(),
                width: 64.0,
                height: 64.0,
            },
            None,
        );
        assert_eq!(s.board.board_width, 1200.0);
        assert_eq!(s.board.board_height, 700.0);
    }

    #[test]
    fn board_note_reflects_fill_level() {
        let cfg = BoardConfig::default();
        let mut s = session();
        assert!(s.board_context_note(&cfg).is_none());

        s.board.cursor_y = 400.0;
        let note = s.board_context_note(&cfg).unwrap();
        assert!(note.contains("existing content"));

        s.board.cursor_y = s.board.board_height - 60.0;
        let note = s.board_context_note(&cfg).unwrap();
        assert!(note.contains("nearly full"));
    }

    #[test]
    fn tutor_mode_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TutorMode::Demonstrating).unwrap(),
            r#""demonstrating""#
        );
        let mode: TutorMode = serde_json::from_str(r#""evaluating""#).unwrap();
        assert_eq!(mode, TutorMode::Evaluating);
    }
}
