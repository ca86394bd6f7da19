//! Handwriting stroke synthesis.
//!
//! Converts board `write` actions into animatable stroke batches: plain text
//! through the built-in stroke font, LaTeX through the MathJax renderer.
//! Synthesis is deterministic given its inputs plus an explicit jitter seed.

pub mod handwriting;
pub mod latex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::board::{Position, WriteFormat};

pub use latex::LatexRenderer;

/// One sampled pen position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokePoint {
    pub x: f64,
    pub y: f64,
    pub pressure: f64,
}

/// A continuous pen-down polyline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub points: Vec<StrokePoint>,
    pub color: String,
    pub width: f64,
}

/// A bundle of strokes the client animates as one write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeBatch {
    pub strokes: Vec<Stroke>,
    pub position: Position,
    pub animation_speed: f64,
}

impl StrokeBatch {
    pub fn total_points(&self) -> usize {
        self.strokes.iter().map(|s| s.points.len()).sum()
    }
}

/// A `write` action after rebasing, ready for synthesis.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub content: String,
    pub format: WriteFormat,
    pub color: String,
    pub position: Position,
    /// Available horizontal space from the write position to the board edge
    pub max_width: f64,
    /// Jitter seed; same inputs + same seed reproduce the same strokes
    pub seed: u64,
}

/// Seam between the orchestrator and the synthesis backends.
///
/// Implementations never fail: the LaTeX path falls back to handwriting
/// internally, and handwriting always produces something drawable.
#[async_trait]
pub trait BoardWriter: Send + Sync {
    async fn synthesize(&self, req: WriteRequest) -> StrokeBatch;
}

/// Production writer: stroke font for text, MathJax pipeline for LaTeX.
pub struct StrokeWriter {
    latex: LatexRenderer,
}

impl StrokeWriter {
    pub fn new(latex: LatexRenderer) -> Self {
        Self { latex }
    }
}

#[async_trait]
impl BoardWriter for StrokeWriter {
    async fn synthesize(&self, req: WriteRequest) -> StrokeBatch {
        match req.format {
            WriteFormat::Text => {
                handwriting::synthesize(&req.content, &req.color, req.position, req.seed)
            }
            WriteFormat::Latex => self.latex.convert(&req).await,
        }
    }
}

/// Scale animation speeds so all writing finishes roughly when speech does.
///
/// Speech duration is estimated at ~2.4 words per second (1.5 s minimum) and
/// spread evenly across the turn's batches; `animation_speed` is the number
/// of points the client advances per frame pair at 60 fps.
pub fn calibrate_animation(batches: &mut [StrokeBatch], speech: &str) {
    if batches.is_empty() || speech.trim().is_empty() {
        return;
    }
    let words = speech.split_whitespace().count() as f64;
    let speech_duration = (words / 2.4).max(1.5);
    let target_per_batch = speech_duration / batches.len() as f64;

    for batch in batches.iter_mut() {
        let total_points = batch.total_points() as f64;
        if total_points > 0.0 {
            let speed = total_points / (target_per_batch * 60.0 * 2.0);
            batch.animation_speed = ((speed * 100.0).round() / 100.0).max(1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_with_points(n: usize) -> StrokeBatch {
        StrokeBatch {
            strokes: vec![Stroke {
                points: (0..n)
                    .map(|i| StrokePoint {
                        x: i as f64,
                        y: 0.0,
                        pressure: 0.8,
                    })
                    .collect(),
                color: "#000000".to_string(),
                width: 2.0,
            }],
            position: Position::new(80.0, 140.0),
            animation_speed: 1.0,
        }
    }

    #[test]
    fn calibration_slows_dense_batches_to_match_speech() {
        let mut batches = vec![batch_with_points(2400)];
        calibrate_animation(&mut batches, "a short sentence of exactly eight words here");
        // 8 words / 2.4 wps ≈ 3.33 s -> 2400 / (3.33 * 120) ≈ 6
        assert!(batches[0].animation_speed > 4.0 && batches[0].animation_speed < 8.0);
    }

    #[test]
    fn calibration_never_drops_below_one() {
        let mut batches = vec![batch_with_points(4)];
        calibrate_animation(&mut batches, "quite a few words spoken over a tiny drawing");
        assert_eq!(batches[0].animation_speed, 1.0);
    }

    #[test]
    fn calibration_is_a_no_op_without_speech() {
        let mut batches = vec![batch_with_points(500)];
        calibrate_animation(&mut batches, "   ");
        assert_eq!(batches[0].animation_speed, 1.0);
    }
}
