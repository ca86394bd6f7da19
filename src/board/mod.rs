//! Whiteboard layout: normalization, rebasing, and cursor tracking.
//!
//! The LLM always writes as if the board were blank, starting at the
//! configured origin. This module shifts those proposals so tutor content
//! lands below everything already on the board (the tutor's own writing and
//! the student's drawings), wraps long text to the board width, auto-clears
//! when the vertical budget is exhausted, and asks the client to scroll when
//! new content ends below the visible viewport.

mod action;

pub use action::{Area, BoardAction, Position, WriteFormat};

use tracing::warn;

use crate::config::{BoardConfig, LatexConfig};
use crate::core::strokes::latex::estimate_target_height;

/// Gap between stacked rows of tutor writing.
pub const INTERLINE_MARGIN: f64 = 20.0;

/// Vertical extent of one row of handwritten text (cap height + spacing).
pub const TEXT_ROW_EXTENT: f64 = 50.0;

/// Vertical step between wrapped lines produced by normalization.
const WRAP_LINE_STEP: f64 = 52.0;

/// Extra lead added to a scroll request so new content is not flush with the
/// bottom edge.
const SCROLL_LEAD: f64 = 40.0;

/// Mutable board geometry carried on the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoardState {
    /// Next y at which the tutor may write; reset to the top margin on clear
    pub cursor_y: f64,
    /// Bottommost extent of known student content
    pub student_max_y: f64,
    /// World y of the top of the client's visible viewport
    pub viewport_y: f64,
    pub board_width: f64,
    pub board_height: f64,
}

impl BoardState {
    pub fn new(cfg: &BoardConfig) -> Self {
        Self {
            cursor_y: cfg.write_y,
            student_max_y: 0.0,
            viewport_y: 0.0,
            board_width: 1200.0,
            board_height: 700.0,
        }
    }
}

/// Result of laying out one turn's actions.
#[derive(Debug, Clone)]
pub struct LayoutOutcome {
    /// Actions with final positions, possibly prefixed by an auto-clear
    pub actions: Vec<BoardAction>,
    /// Board state after the turn
    pub state: BoardState,
    /// Pixels the client should pan down, if content passed the viewport
    pub scroll_by: Option<f64>,
}

/// Estimated vertical extent of a single action, before synthesis.
pub fn estimated_extent(action: &BoardAction, latex_cfg: &LatexConfig) -> f64 {
    match action {
        BoardAction::Write {
            format: WriteFormat::Latex,
            content,
            ..
        } => estimate_target_height(content, latex_cfg) + 16.0,
        BoardAction::Write { .. } => TEXT_ROW_EXTENT,
        BoardAction::Underline { area, .. } => area.h,
        BoardAction::Clear => 0.0,
    }
}

/// Wrap long text writes to the board width.
///
/// Splits multi-line or over-long `write` content into one single-line write
/// per rendered line, clamps x into visible bounds, and drops blank writes.
/// LaTeX content passes through untouched (line breaking is the renderer's
/// job there).
pub fn normalize(actions: Vec<BoardAction>, board_width: f64) -> Vec<BoardAction> {
    let usable_width = (board_width - 160.0).max(360.0);
    // Handwriting averages roughly 13 px per character.
    let chars_per_line = ((usable_width / 13.0) as usize).clamp(18, 80);
    let max_x = (board_width - 220.0).max(80.0);

    let mut normalized = Vec::with_capacity(actions.len());
    for action in actions {
        let (content, format, position, color) = match action {
            BoardAction::Write {
                content,
                format,
                position,
                color,
            } => (content, format, position, color),
            other => {
                normalized.push(other);
                continue;
            }
        };

        if content.trim().is_empty() {
            continue;
        }
        if format == WriteFormat::Latex {
            normalized.push(BoardAction::Write {
                content,
                format,
                position,
                color,
            });
            continue;
        }

        let base_x = position.x.clamp(20.0, max_x);
        let mut rendered: Vec<String> = Vec::new();
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            rendered.extend(wrap_line(line, chars_per_line));
        }
        if rendered.is_empty() {
            rendered.push(content.trim().to_string());
        }

        for (idx, line) in rendered.into_iter().enumerate() {
            normalized.push(BoardAction::Write {
                content: line,
                format,
                position: Position::new(base_x, position.y + idx as f64 * WRAP_LINE_STEP),
                color: color.clone(),
            });
        }
    }
    normalized
}

/// Greedy word wrap that never breaks a word.
fn wrap_line(line: &str, width: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for word in line.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
        } else if current.chars().count() + 1 + word.chars().count() <= width {
            current.push(' ');
            current.push_str(word);
        } else {
            out.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Rebase a turn's actions onto the live board.
///
/// Each distinct raw y among the turn's writes forms a row; rows are placed
/// at `max(cursor, student_max_y + margin)` unless the LLM already put them
/// lower, and the cursor advances past each row. Writes sharing a raw y stay
/// on one row, so side-by-side layouts survive. When a row would exceed the
/// vertical budget, a `clear` is prepended and the layout redone from a
/// blank board.
pub fn rebase(
    actions: Vec<BoardAction>,
    state: &BoardState,
    cfg: &BoardConfig,
    latex_cfg: &LatexConfig,
) -> LayoutOutcome {
    match rebase_once(&actions, state, cfg, latex_cfg, false) {
        Some(outcome) => outcome,
        None => {
            // Canvas can't fit the new block — auto-clear and start fresh.
            let cleared = BoardState {
                cursor_y: cfg.write_y,
                student_max_y: 0.0,
                viewport_y: 0.0,
                ..*state
            };
            let mut outcome = rebase_once(&actions, &cleared, cfg, latex_cfg, true)
                .expect("layout with overflow allowed always succeeds");
            outcome.actions.insert(0, BoardAction::Clear);
            outcome.scroll_by = None;
            outcome
        }
    }
}

fn rebase_once(
    actions: &[BoardAction],
    state: &BoardState,
    cfg: &BoardConfig,
    latex_cfg: &LatexConfig,
    allow_overflow: bool,
) -> Option<LayoutOutcome> {
    let mut out = Vec::with_capacity(actions.len());
    let mut next = *state;
    // (raw y, placed y) of rows already laid out this turn
    let mut rows: Vec<(f64, f64)> = Vec::new();
    let mut last_delta = 0.0;
    let mut content_bottom: Option<f64> = None;

    for action in actions {
        match action {
            BoardAction::Write {
                content,
                format,
                position,
                color,
            } => {
                let extent = estimated_extent(action, latex_cfg);
                let placed_y = match rows
                    .iter()
                    .find(|(raw, _)| (raw - position.y).abs() < 0.5)
                {
                    Some(&(_, placed)) => {
                        // Same row as an earlier write this turn; the row may
                        // grow if this member is taller.
                        next.cursor_y = next.cursor_y.max(placed + extent + INTERLINE_MARGIN);
                        placed
                    }
                    None => {
                        let y_base = next
                            .cursor_y
                            .max(next.student_max_y + cfg.margin_below_student);
                        let placed = position.y.max(y_base);
                        if placed + extent > cfg.max_board_height {
                            if !allow_overflow {
                                return None;
                            }
                            warn!(
                                placed,
                                extent,
                                budget = cfg.max_board_height,
                                "board content exceeds vertical budget even after clear"
                            );
                        }
                        rows.push((position.y, placed));
                        next.cursor_y = placed + extent + INTERLINE_MARGIN;
                        placed
                    }
                };
                last_delta = placed_y - position.y;
                content_bottom =
                    Some(content_bottom.unwrap_or(0.0).max(placed_y + extent));
                out.push(BoardAction::Write {
                    content: content.clone(),
                    format: *format,
                    position: Position::new(position.x, placed_y),
                    color: color.clone(),
                });
            }
            BoardAction::Underline { area, color } => {
                let shifted = Area {
                    y: area.y + last_delta,
                    ..*area
                };
                content_bottom =
                    Some(content_bottom.unwrap_or(0.0).max(shifted.y + shifted.h));
                out.push(BoardAction::Underline {
                    area: shifted,
                    color: color.clone(),
                });
            }
            BoardAction::Clear => {
                next.cursor_y = cfg.write_y;
                next.student_max_y = 0.0;
                next.viewport_y = 0.0;
                rows.clear();
                last_delta = 0.0;
                content_bottom = None;
                out.push(BoardAction::Clear);
            }
        }
    }

    let mut scroll_by = None;
    if let Some(bottom) = content_bottom {
        let visible_bottom = next.viewport_y + next.board_height;
        if bottom > visible_bottom {
            let by = bottom - visible_bottom + SCROLL_LEAD;
            next.viewport_y += by;
            scroll_by = Some(by);
        }
    }

    Some(LayoutOutcome {
        actions: out,
        state: next,
        scroll_by,
    })
}
