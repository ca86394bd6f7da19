//! Text-to-handwriting synthesis.
//!
//! Renders text through a built-in stroke font: each glyph is a small set of
//! polylines in em-space, scaled to board pixels, subdivided for smooth
//! animation, jittered by a seeded generator for an organic look, and given a
//! pressure envelope that rises and falls along each stroke.

use crate::board::Position;

use super::{Stroke, StrokeBatch, StrokePoint};

/// Pixel height of one em (cap line to baseline).
const EM_PX: f64 = 26.0;

/// Horizontal advance of a space, in em units.
const SPACE_ADVANCE: f64 = 0.38;

/// Extra tracking between glyphs, in em units.
const TRACKING: f64 = 0.10;

/// Maximum jitter displacement per point, in pixels.
const JITTER_PX: f64 = 0.9;

/// Segments longer than this are subdivided before jittering, in pixels.
const SUBDIVIDE_PX: f64 = 4.0;

type Polyline = Vec<(f64, f64)>;

/// Render `text` as handwriting strokes anchored at `position` (top-left).
///
/// Deterministic: the same `(text, position, seed)` always produces the same
/// batch.
pub fn synthesize(text: &str, color: &str, position: Position, seed: u64) -> StrokeBatch {
    let mut rng = SplitMix64::new(seed);
    let mut strokes = Vec::new();
    let mut pen_x = 0.0f64;

    for c in text.chars() {
        if c == ' ' {
            pen_x += SPACE_ADVANCE * EM_PX;
            continue;
        }
        let (polylines, advance) = glyph(c);
        for polyline in polylines {
            let mut points: Vec<StrokePoint> = Vec::new();
            let scaled: Polyline = polyline
                .iter()
                .map(|&(x, y)| (position.x + pen_x + x * EM_PX, position.y + y * EM_PX))
                .collect();
            let dense = subdivide(&scaled);
            let last = dense.len().saturating_sub(1).max(1);
            for (i, &(x, y)) in dense.iter().enumerate() {
                let t = i as f64 / last as f64;
                points.push(StrokePoint {
                    x: x + rng.jitter(JITTER_PX),
                    y: y + rng.jitter(JITTER_PX),
                    pressure: pressure_at(t),
                });
            }
            if points.len() >= 2 {
                strokes.push(Stroke {
                    points,
                    color: color.to_string(),
                    width: 2.0,
                });
            }
        }
        pen_x += (advance + TRACKING) * EM_PX;
    }

    StrokeBatch {
        strokes,
        position,
        animation_speed: 1.0,
    }
}

/// Pen pressure along a stroke: light at the ends, firm in the middle.
fn pressure_at(t: f64) -> f64 {
    0.58 + 0.32 * (std::f64::consts::PI * t).sin()
}

/// Insert intermediate points so no segment exceeds `SUBDIVIDE_PX`.
fn subdivide(polyline: &Polyline) -> Polyline {
    let mut out = Vec::with_capacity(polyline.len() * 2);
    for window in polyline.windows(2) {
        let (x0, y0) = window[0];
        let (x1, y1) = window[1];
        out.push((x0, y0));
        let len = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
        let steps = (len / SUBDIVIDE_PX).ceil() as usize;
        for i in 1..steps {
            let t = i as f64 / steps as f64;
            out.push((x0 + (x1 - x0) * t, y0 + (y1 - y0) * t));
        }
    }
    if let Some(&last) = polyline.last() {
        out.push(last);
    }
    out
}

/// Deterministic jitter source (splitmix64).
///
/// A tiny seeded generator keeps stroke tests reproducible without pulling in
/// a randomness crate for two lines of noise.
struct SplitMix64(u64);

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }

    /// Uniform value in `[-range, range]`.
    fn jitter(&mut self, range: f64) -> f64 {
        let unit = self.next_u64() as f64 / u64::MAX as f64;
        (unit - 0.5) * 2.0 * range
    }
}

/// Polyline arc approximation around `(cx, cy)` with radii `(rx, ry)`.
fn arc(cx: f64, cy: f64, rx: f64, ry: f64, start_deg: f64, end_deg: f64, n: usize) -> Polyline {
    (0..=n)
        .map(|i| {
            let t = start_deg + (end_deg - start_deg) * i as f64 / n as f64;
            let rad = t.to_radians();
            (cx + rx * rad.cos(), cy + ry * rad.sin())
        })
        .collect()
}

fn line(points: &[(f64, f64)]) -> Polyline {
    points.to_vec()
}

/// Glyph shapes in em-space: y = 0.0 at the cap/ascender line, 1.0 at the
/// baseline, descenders reaching ~1.3. Returns the polylines and the advance
/// width in em units. Unknown characters render as a small box.
fn glyph(c: char) -> (Vec<Polyline>, f64) {
    // Uppercase reuses the lowercase forms stretched above the baseline —
    // quick cursive "small caps".
    if c.is_ascii_uppercase() {
        let (polys, advance) = glyph(c.to_ascii_lowercase());
        let stretched = polys
            .into_iter()
            .map(|p| {
                p.into_iter()
                    .map(|(x, y)| (x * 1.12, (1.0 - (1.0 - y) * 1.45).max(0.0)))
                    .collect()
            })
            .collect();
        return (stretched, advance * 1.12);
    }

    match c {
        'a' => (
            vec![
                arc(0.26, 0.72, 0.26, 0.27, 0.0, 360.0, 10),
                line(&[(0.52, 0.45), (0.52, 1.0)]),
            ],
            0.60,
        ),
        'b' => (
            vec![
                line(&[(0.08, 0.0), (0.08, 1.0)]),
                arc(0.32, 0.72, 0.24, 0.27, 90.0, 450.0, 10),
            ],
            0.62,
        ),
        'c' => (vec![arc(0.28, 0.72, 0.26, 0.27, 40.0, 320.0, 9)], 0.56),
        'd' => (
            vec![
                arc(0.26, 0.72, 0.26, 0.27, 0.0, 360.0, 10),
                line(&[(0.52, 0.0), (0.52, 1.0)]),
            ],
            0.60,
        ),
        'e' => (
            vec![
                line(&[(0.03, 0.70), (0.51, 0.70)]),
                arc(0.27, 0.72, 0.25, 0.27, 0.0, 300.0, 9),
            ],
            0.58,
        ),
        'f' => (
            vec![
                line(&[(0.40, 0.10), (0.30, 0.02), (0.20, 0.10), (0.20, 1.0)]),
                line(&[(0.04, 0.48), (0.40, 0.48)]),
            ],
            0.46,
        ),
        'g' => (
            vec![
                arc(0.26, 0.70, 0.26, 0.25, 0.0, 360.0, 10),
                line(&[(0.52, 0.45), (0.52, 1.18), (0.38, 1.30), (0.16, 1.24)]),
            ],
            0.60,
        ),
        'h' => (
            vec![
                line(&[(0.08, 0.0), (0.08, 1.0)]),
                line(&[(0.08, 0.62), (0.22, 0.46), (0.40, 0.47), (0.47, 0.62), (0.47, 1.0)]),
            ],
            0.58,
        ),
        'i' => (
            vec![
                line(&[(0.10, 0.48), (0.10, 1.0)]),
                line(&[(0.09, 0.26), (0.12, 0.29)]),
            ],
            0.24,
        ),
        'j' => (
            vec![
                line(&[(0.20, 0.48), (0.20, 1.18), (0.08, 1.30), (-0.06, 1.24)]),
                line(&[(0.19, 0.26), (0.22, 0.29)]),
            ],
            0.32,
        ),
        'k' => (
            vec![
                line(&[(0.08, 0.0), (0.08, 1.0)]),
                line(&[(0.44, 0.46), (0.08, 0.76), (0.46, 1.0)]),
            ],
            0.54,
        ),
        'l' => (vec![line(&[(0.10, 0.0), (0.13, 1.0)])], 0.26),
        'm' => (
            vec![
                line(&[(0.06, 1.0), (0.06, 0.46)]),
                line(&[(0.06, 0.58), (0.18, 0.45), (0.30, 0.58), (0.30, 1.0)]),
                line(&[(0.30, 0.58), (0.42, 0.45), (0.54, 0.58), (0.54, 1.0)]),
            ],
            0.66,
        ),
        'n' => (
            vec![
                line(&[(0.07, 1.0), (0.07, 0.46)]),
                line(&[(0.07, 0.60), (0.22, 0.45), (0.40, 0.50), (0.45, 0.66), (0.45, 1.0)]),
            ],
            0.58,
        ),
        'o' => (vec![arc(0.27, 0.72, 0.26, 0.27, 80.0, 440.0, 11)], 0.60),
        'p' => (
            vec![
                line(&[(0.08, 0.46), (0.08, 1.30)]),
                arc(0.32, 0.72, 0.24, 0.26, 90.0, 450.0, 10),
            ],
            0.62,
        ),
        'q' => (
            vec![
                arc(0.26, 0.72, 0.26, 0.26, 0.0, 360.0, 10),
                line(&[(0.52, 0.46), (0.52, 1.26), (0.62, 1.14)]),
            ],
            0.64,
        ),
        'r' => (
            vec![
                line(&[(0.08, 1.0), (0.08, 0.46)]),
                line(&[(0.08, 0.62), (0.20, 0.47), (0.36, 0.46)]),
            ],
            0.42,
        ),
        's' => (
            vec![line(&[
                (0.44, 0.52),
                (0.30, 0.44),
                (0.12, 0.50),
                (0.12, 0.64),
                (0.40, 0.78),
                (0.42, 0.92),
                (0.26, 1.01),
                (0.06, 0.94),
            ])],
            0.52,
        ),
        't' => (
            vec![
                line(&[(0.20, 0.12), (0.20, 0.90), (0.30, 1.0), (0.42, 0.96)]),
                line(&[(0.04, 0.46), (0.40, 0.46)]),
            ],
            0.46,
        ),
        'u' => (
            vec![
                line(&[(0.07, 0.46), (0.07, 0.84), (0.16, 1.0), (0.34, 1.0), (0.45, 0.84)]),
                line(&[(0.45, 0.46), (0.45, 1.0)]),
            ],
            0.58,
        ),
        'v' => (vec![line(&[(0.04, 0.46), (0.25, 1.0), (0.46, 0.46)])], 0.52),
        'w' => (
            vec![line(&[
                (0.02, 0.46),
                (0.16, 1.0),
                (0.30, 0.56),
                (0.44, 1.0),
                (0.58, 0.46),
            ])],
            0.64,
        ),
        'x' => (
            vec![
                line(&[(0.04, 0.46), (0.46, 1.0)]),
                line(&[(0.46, 0.46), (0.04, 1.0)]),
            ],
            0.52,
        ),
        'y' => (
            vec![
                line(&[(0.04, 0.46), (0.26, 1.0)]),
                line(&[(0.48, 0.46), (0.16, 1.30)]),
            ],
            0.54,
        ),
        'z' => (
            vec![line(&[(0.06, 0.46), (0.44, 0.46), (0.06, 1.0), (0.46, 1.0)])],
            0.52,
        ),
        '0' => (vec![arc(0.26, 0.5, 0.24, 0.48, 80.0, 440.0, 12)], 0.58),
        '1' => (
            vec![line(&[(0.10, 0.22), (0.24, 0.02), (0.24, 1.0)])],
            0.40,
        ),
        '2' => (
            vec![line(&[
                (0.06, 0.22),
                (0.18, 0.02),
                (0.38, 0.04),
                (0.44, 0.24),
                (0.30, 0.52),
                (0.06, 1.0),
                (0.48, 1.0),
            ])],
            0.56,
        ),
        '3' => (
            vec![line(&[
                (0.06, 0.12),
                (0.28, 0.02),
                (0.44, 0.16),
                (0.32, 0.44),
                (0.20, 0.48),
                (0.34, 0.52),
                (0.46, 0.72),
                (0.34, 0.96),
                (0.08, 0.98),
            ])],
            0.56,
        ),
        '4' => (
            vec![
                line(&[(0.34, 0.0), (0.06, 0.64), (0.50, 0.64)]),
                line(&[(0.38, 0.40), (0.38, 1.0)]),
            ],
            0.58,
        ),
        '5' => (
            vec![line(&[
                (0.44, 0.02),
                (0.10, 0.02),
                (0.08, 0.42),
                (0.30, 0.38),
                (0.46, 0.56),
                (0.42, 0.88),
                (0.20, 1.01),
                (0.05, 0.92),
            ])],
            0.56,
        ),
        '6' => (
            vec![
                line(&[(0.40, 0.04), (0.16, 0.34), (0.07, 0.66)]),
                arc(0.27, 0.74, 0.21, 0.25, 0.0, 360.0, 10),
            ],
            0.56,
        ),
        '7' => (
            vec![line(&[(0.06, 0.04), (0.48, 0.04), (0.20, 1.0)])],
            0.54,
        ),
        '8' => (
            vec![
                arc(0.26, 0.26, 0.18, 0.24, 90.0, 450.0, 10),
                arc(0.26, 0.76, 0.22, 0.25, 270.0, 630.0, 10),
            ],
            0.56,
        ),
        '9' => (
            vec![
                arc(0.26, 0.28, 0.21, 0.26, 0.0, 360.0, 10),
                line(&[(0.47, 0.30), (0.40, 0.70), (0.26, 1.0)]),
            ],
            0.56,
        ),
        '.' => (vec![line(&[(0.08, 0.96), (0.11, 1.0)])], 0.22),
        ',' => (vec![line(&[(0.12, 0.94), (0.06, 1.14)])], 0.22),
        '!' => (
            vec![
                line(&[(0.10, 0.02), (0.12, 0.70)]),
                line(&[(0.11, 0.94), (0.13, 0.99)]),
            ],
            0.26,
        ),
        '?' => (
            vec![
                line(&[
                    (0.05, 0.18),
                    (0.16, 0.02),
                    (0.38, 0.04),
                    (0.44, 0.24),
                    (0.26, 0.46),
                    (0.24, 0.68),
                ]),
                line(&[(0.23, 0.94), (0.26, 0.99)]),
            ],
            0.52,
        ),
        ':' => (
            vec![
                line(&[(0.08, 0.54), (0.11, 0.58)]),
                line(&[(0.08, 0.94), (0.11, 0.98)]),
            ],
            0.24,
        ),
        ';' => (
            vec![
                line(&[(0.10, 0.54), (0.13, 0.58)]),
                line(&[(0.13, 0.92), (0.06, 1.12)]),
            ],
            0.24,
        ),
        '\'' => (vec![line(&[(0.10, 0.02), (0.08, 0.20)])], 0.18),
        '"' => (
            vec![
                line(&[(0.08, 0.02), (0.06, 0.20)]),
                line(&[(0.20, 0.02), (0.18, 0.20)]),
            ],
            0.30,
        ),
        '-' => (vec![line(&[(0.04, 0.66), (0.40, 0.66)])], 0.48),
        '+' => (
            vec![
                line(&[(0.04, 0.66), (0.44, 0.66)]),
                line(&[(0.24, 0.44), (0.24, 0.88)]),
            ],
            0.52,
        ),
        '=' => (
            vec![
                line(&[(0.04, 0.56), (0.44, 0.56)]),
                line(&[(0.04, 0.76), (0.44, 0.76)]),
            ],
            0.52,
        ),
        '*' => (
            vec![
                line(&[(0.22, 0.40), (0.22, 0.72)]),
                line(&[(0.08, 0.48), (0.36, 0.64)]),
                line(&[(0.36, 0.48), (0.08, 0.64)]),
            ],
            0.48,
        ),
        '/' => (vec![line(&[(0.40, 0.02), (0.04, 1.0)])], 0.46),
        '\\' => (vec![line(&[(0.04, 0.02), (0.40, 1.0)])], 0.46),
        '(' => (vec![arc(0.44, 0.5, 0.30, 0.54, 140.0, 220.0, 7)], 0.34),
        ')' => (vec![arc(-0.06, 0.5, 0.30, 0.54, -40.0, 40.0, 7)], 0.34),
        '[' => (
            vec![line(&[(0.26, 0.02), (0.08, 0.02), (0.08, 1.0), (0.26, 1.0)])],
            0.34,
        ),
        ']' => (
            vec![line(&[(0.04, 0.02), (0.22, 0.02), (0.22, 1.0), (0.04, 1.0)])],
            0.34,
        ),
        '<' => (vec![line(&[(0.42, 0.40), (0.06, 0.66), (0.42, 0.92)])], 0.50),
        '>' => (vec![line(&[(0.04, 0.40), (0.40, 0.66), (0.04, 0.92)])], 0.50),
        '^' => (vec![line(&[(0.06, 0.30), (0.22, 0.04), (0.38, 0.30)])], 0.46),
        '_' => (vec![line(&[(0.02, 1.06), (0.46, 1.06)])], 0.50),
        '|' => (vec![line(&[(0.10, 0.0), (0.10, 1.1)])], 0.22),
        // Unknown glyph: draw a small placeholder box
        _ => (
            vec![line(&[
                (0.06, 0.50),
                (0.44, 0.50),
                (0.44, 1.0),
                (0.06, 1.0),
                (0.06, 0.50),
            ])],
            0.56,
        ),
    }
}
