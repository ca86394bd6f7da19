//! Board action types shared by the LLM reply schema, the layout engine,
//! and the outbound wire protocol.

use serde::{Deserialize, Serialize};

/// A point on the whiteboard, in world (page) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A rectangular region on the whiteboard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// Content format of a `write` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteFormat {
    #[default]
    Text,
    Latex,
}

fn default_color() -> String {
    "#000000".to_string()
}

fn default_position() -> Position {
    Position { x: 80.0, y: 140.0 }
}

/// One board mutation proposed by the LLM.
///
/// Writes are rendered as handwriting strokes; underline and clear pass
/// through to the client as plain `board_action` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoardAction {
    Write {
        content: String,
        #[serde(default)]
        format: WriteFormat,
        #[serde(default = "default_position")]
        position: Position,
        #[serde(default = "default_color")]
        color: String,
    },
    Underline {
        area: Area,
        #[serde(default = "default_color")]
        color: String,
    },
    Clear,
}

impl BoardAction {
    /// Reject actions with content or geometry the renderer cannot handle.
    pub fn is_valid(&self) -> bool {
        match self {
            BoardAction::Write {
                content, position, ..
            } => {
                !content.trim().is_empty()
                    && position.x.is_finite()
                    && position.y.is_finite()
            }
            BoardAction::Underline { area, .. } => {
                [area.x, area.y, area.w, area.h].iter().all(|v| v.is_finite())
                    && area.w > 0.0
                    && area.h > 0.0
            }
            BoardAction::Clear => true,
        }
    }
}
