//! LaTeX-to-strokes synthesis.
//!
//! Pipeline: LaTeX → MathJax microservice SVG → collect `<path d=…>` under
//! accumulated affine transforms → sample each path at even arc length →
//! normalize to an adaptive target height → offset to the write position.
//! Any failure along the way falls back to a plain-text transliteration
//! rendered through the handwriting path.

use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LatexConfig;

use super::handwriting;
use super::{Stroke, StrokeBatch, StrokePoint, WriteRequest};

/// Render request timeout (the microservice is local and fast).
const RENDER_TIMEOUT: Duration = Duration::from_secs(8);

/// Fixed subdivisions used to flatten curve segments before resampling.
const CURVE_STEPS: usize = 16;

/// Target arc-length spacing between sampled points, in SVG units.
const SAMPLE_SPACING: f64 = 3.0;

/// Errors from the MathJax render call. Internal only — `convert` never
/// surfaces them, it falls back.
#[derive(Debug, Error)]
pub enum LatexError {
    #[error("render request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("renderer returned status {0}")]
    BadStatus(u16),
}

/// Client for the LaTeX renderer microservice plus the sampling pipeline.
pub struct LatexRenderer {
    client: reqwest::Client,
    cfg: LatexConfig,
}

impl LatexRenderer {
    pub fn new(client: reqwest::Client, cfg: LatexConfig) -> Self {
        Self { client, cfg }
    }

    /// Convert a LaTeX expression to strokes. Falls back to handwriting the
    /// transliterated expression when rendering or extraction fails.
    pub async fn convert(&self, req: &WriteRequest) -> StrokeBatch {
        let svg = match self.render_svg(&req.content).await {
            Ok(svg) => svg,
            Err(err) => {
                warn!(error = %err, "LaTeX render failed, falling back to handwriting");
                return self.fallback(req);
            }
        };

        let strokes = svg_to_strokes(&svg, &req.content, req, &self.cfg);
        if strokes.is_empty() {
            debug!("no drawable paths extracted from SVG, falling back");
            return self.fallback(req);
        }

        StrokeBatch {
            strokes,
            position: req.position,
            animation_speed: 1.0,
        }
    }

    async fn render_svg(&self, latex: &str) -> Result<String, LatexError> {
        let response = self
            .client
            .post(&self.cfg.render_url)
            .timeout(RENDER_TIMEOUT)
            .json(&json!({ "latex": latex, "display": true }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LatexError::BadStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.contains("application/json") {
            let value: serde_json::Value = response.json().await?;
            if let Some(svg) = value.get("svg").and_then(|v| v.as_str()) {
                return Ok(svg.to_string());
            }
            return Ok(String::new());
        }
        Ok(response.text().await?)
    }

    fn fallback(&self, req: &WriteRequest) -> StrokeBatch {
        let plain = latex_to_plain(&req.content);
        handwriting::synthesize(&plain, &req.color, req.position, req.seed)
    }
}

/// Heuristic sizing: simple inline expressions stay compact, structurally
/// dense ones (fractions, roots, integrals, sums, matrices) grow so they
/// remain legible without zooming.
pub fn estimate_target_height(latex: &str, cfg: &LatexConfig) -> f64 {
    let weighted: [(&str, f64); 13] = [
        ("\\frac", 2.0),
        ("\\dfrac", 2.0),
        ("\\tfrac", 1.5),
        ("\\sqrt", 1.4),
        ("\\int", 1.8),
        ("\\sum", 1.8),
        ("\\prod", 1.8),
        ("\\lim", 1.2),
        ("\\begin{matrix}", 2.4),
        ("\\begin{pmatrix}", 2.4),
        ("\\begin{bmatrix}", 2.4),
        ("\\left", 1.0),
        ("\\right", 1.0),
    ];

    let mut complexity = 0.0;
    for (token, weight) in weighted {
        complexity += latex.matches(token).count() as f64 * weight;
    }
    complexity += latex.matches('^').count() as f64 * 0.45;
    complexity += latex.matches('_').count() as f64 * 0.45;
    // Very long expressions get a small readability bump.
    complexity += ((latex.len() as f64 - 24.0) / 40.0).clamp(0.0, 2.0);

    let height = cfg.target_height_px + complexity * 2.2 - 4.0;
    height.clamp(cfg.target_height_min_px, cfg.target_height_max_px)
}

/// 2D affine transform in SVG order: `[a, b, c, d, e, f]` mapping
/// `(x, y) → (a·x + c·y + e, b·x + d·y + f)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine([f64; 6]);

impl Affine {
    pub const IDENTITY: Affine = Affine([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    pub fn mul(self, rhs: Affine) -> Affine {
        let [a0, a1, a2, a3, a4, a5] = self.0;
        let [b0, b1, b2, b3, b4, b5] = rhs.0;
        Affine([
            a0 * b0 + a2 * b1,
            a1 * b0 + a3 * b1,
            a0 * b2 + a2 * b3,
            a1 * b2 + a3 * b3,
            a0 * b4 + a2 * b5 + a4,
            a1 * b4 + a3 * b5 + a5,
        ])
    }

    pub fn apply(self, x: f64, y: f64) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }
}

/// Parse an SVG `transform` attribute (`matrix`, `translate`, `scale`;
/// rotations do not appear in MathJax output and are ignored).
pub fn parse_transform(transform: &str) -> Affine {
    let mut current = Affine::IDENTITY;
    let bytes = transform.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_alphabetic() {
            i += 1;
            continue;
        }
        let name_start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
            i += 1;
        }
        let name = &transform[name_start..i];
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'(' {
            continue;
        }
        let args_start = i + 1;
        let args_end = match transform[args_start..].find(')') {
            Some(offset) => args_start + offset,
            None => break,
        };
        let nums: Vec<f64> = transform[args_start..args_end]
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect();
        i = args_end + 1;

        let m = match (name, nums.len()) {
            ("matrix", 6) => Affine([nums[0], nums[1], nums[2], nums[3], nums[4], nums[5]]),
            ("translate", n) if n >= 1 => {
                let ty = nums.get(1).copied().unwrap_or(0.0);
                Affine([1.0, 0.0, 0.0, 1.0, nums[0], ty])
            }
            ("scale", n) if n >= 1 => {
                let sy = nums.get(1).copied().unwrap_or(nums[0]);
                Affine([nums[0], 0.0, 0.0, sy, 0.0, 0.0])
            }
            _ => continue,
        };
        current = current.mul(m);
    }
    current
}

/// Walk the SVG markup collecting `(d, accumulated transform)` for every
/// `<path>` element. A full XML parser is overkill for MathJax output; a tag
/// scanner with a transform stack covers it.
pub fn collect_paths(svg: &str) -> Vec<(String, Affine)> {
    let mut paths = Vec::new();
    let mut stack: Vec<Affine> = vec![Affine::IDENTITY];
    let mut rest = svg;

    while let Some(open) = rest.find('<') {
        rest = &rest[open..];
        if rest.starts_with("<!--") {
            match rest.find("-->") {
                Some(end) => {
                    rest = &rest[end + 3..];
                    continue;
                }
                None => break,
            }
        }
        if rest.starts_with("<?") || rest.starts_with("<!") {
            match rest.find('>') {
                Some(end) => {
                    rest = &rest[end + 1..];
                    continue;
                }
                None => break,
            }
        }
        let Some(end) = rest.find('>') else { break };
        let tag = &rest[1..end];
        rest = &rest[end + 1..];

        if let Some(name) = tag.strip_prefix('/') {
            // Closing tag pops whatever the matching open pushed
            let _ = name;
            if stack.len() > 1 {
                stack.pop();
            }
            continue;
        }

        let self_closing = tag.ends_with('/');
        let tag = tag.trim_end_matches('/');
        let name = tag
            .split_whitespace()
            .next()
            .unwrap_or("")
            .rsplit(':')
            .next()
            .unwrap_or("");

        let parent = *stack.last().unwrap_or(&Affine::IDENTITY);
        let local = attr_value(tag, "transform")
            .map(|t| parse_transform(&t))
            .unwrap_or(Affine::IDENTITY);
        let combined = parent.mul(local);

        if name == "path" {
            if let Some(d) = attr_value(tag, "d") {
                if !d.is_empty() {
                    paths.push((d, combined));
                }
            }
        }
        if !self_closing {
            stack.push(combined);
        }
    }
    paths
}

/// Extract a quoted attribute value from the inside of a tag.
fn attr_value(tag: &str, attr: &str) -> Option<String> {
    let mut search = tag;
    loop {
        let idx = search.find(attr)?;
        let before_ok = idx == 0
            || search[..idx]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_whitespace());
        let after = &search[idx + attr.len()..];
        let after_trim = after.trim_start();
        if before_ok && after_trim.starts_with('=') {
            let after_eq = after_trim[1..].trim_start();
            let quote = after_eq.chars().next()?;
            if quote == '"' || quote == '\'' {
                let inner = &after_eq[1..];
                let end = inner.find(quote)?;
                return Some(inner[..end].to_string());
            }
        }
        search = &search[idx + attr.len()..];
    }
}

/// Sample evenly spaced points along an SVG path string.
///
/// Flattens M/L/H/V/C/S/Q/T segments (arcs degrade to chords), then
/// resamples by cumulative arc length into 12–220 points.
pub fn sample_path(d: &str) -> Vec<(f64, f64)> {
    let flat = flatten_path(d);
    if flat.len() < 2 {
        return flat;
    }

    let mut cumulative = vec![0.0f64];
    for window in flat.windows(2) {
        let (x0, y0) = window[0];
        let (x1, y1) = window[1];
        let len = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
        cumulative.push(cumulative.last().unwrap() + len);
    }
    let total = *cumulative.last().unwrap();
    if total <= f64::EPSILON {
        return vec![flat[0], flat[flat.len() - 1]];
    }

    let num_points = ((total / SAMPLE_SPACING) as usize).clamp(12, 220);
    let mut out = Vec::with_capacity(num_points + 1);
    let mut seg = 0;
    for i in 0..=num_points {
        let target = total * i as f64 / num_points as f64;
        while seg + 1 < cumulative.len() - 1 && cumulative[seg + 1] < target {
            seg += 1;
        }
        let seg_len = cumulative[seg + 1] - cumulative[seg];
        let t = if seg_len > f64::EPSILON {
            (target - cumulative[seg]) / seg_len
        } else {
            0.0
        };
        let (x0, y0) = flat[seg];
        let (x1, y1) = flat[seg + 1];
        out.push((x0 + (x1 - x0) * t, y0 + (y1 - y0) * t));
    }
    out
}

/// Flatten path commands into a polyline (curves subdivided, subpaths
/// concatenated the way the whole-path sampler expects).
fn flatten_path(d: &str) -> Vec<(f64, f64)> {
    let mut tokens = PathTokens::new(d);
    let mut points: Vec<(f64, f64)> = Vec::new();
    let mut pos = (0.0, 0.0);
    let mut subpath_start = (0.0, 0.0);
    let mut last_ctrl: Option<(f64, f64)> = None;
    let mut last_cmd = ' ';

    while let Some(cmd) = tokens.next_command(last_cmd) {
        let relative = cmd.is_ascii_lowercase();
        let upper = cmd.to_ascii_uppercase();
        match upper {
            'M' => {
                let Some((x, y)) = tokens.next_pair() else { break };
                pos = if relative { (pos.0 + x, pos.1 + y) } else { (x, y) };
                subpath_start = pos;
                points.push(pos);
                last_ctrl = None;
            }
            'L' => {
                let Some((x, y)) = tokens.next_pair() else { break };
                pos = if relative { (pos.0 + x, pos.1 + y) } else { (x, y) };
                points.push(pos);
                last_ctrl = None;
            }
            'H' => {
                let Some(x) = tokens.next_number() else { break };
                pos = (if relative { pos.0 + x } else { x }, pos.1);
                points.push(pos);
                last_ctrl = None;
            }
            'V' => {
                let Some(y) = tokens.next_number() else { break };
                pos = (pos.0, if relative { pos.1 + y } else { y });
                points.push(pos);
                last_ctrl = None;
            }
            'C' | 'S' => {
                let (c1, c2, end) = if upper == 'C' {
                    let (Some(c1), Some(c2), Some(end)) =
                        (tokens.next_pair(), tokens.next_pair(), tokens.next_pair())
                    else {
                        break;
                    };
                    (c1, c2, end)
                } else {
                    let (Some(c2), Some(end)) = (tokens.next_pair(), tokens.next_pair()) else {
                        break;
                    };
                    let reflected = reflect(pos, last_ctrl);
                    ((reflected.0 - if relative { pos.0 } else { 0.0 },
                      reflected.1 - if relative { pos.1 } else { 0.0 }), c2, end)
                };
                let abs = |p: (f64, f64)| if relative { (pos.0 + p.0, pos.1 + p.1) } else { p };
                let (c1, c2, end) = (abs(c1), abs(c2), abs(end));
                for i in 1..=CURVE_STEPS {
                    let t = i as f64 / CURVE_STEPS as f64;
                    points.push(cubic_at(pos, c1, c2, end, t));
                }
                last_ctrl = Some(c2);
                pos = end;
            }
            'Q' | 'T' => {
                let (ctrl, end) = if upper == 'Q' {
                    let (Some(ctrl), Some(end)) = (tokens.next_pair(), tokens.next_pair()) else {
                        break;
                    };
                    let abs = |p: (f64, f64)| if relative { (pos.0 + p.0, pos.1 + p.1) } else { p };
                    (abs(ctrl), abs(end))
                } else {
                    let Some(end) = tokens.next_pair() else { break };
                    let end = if relative { (pos.0 + end.0, pos.1 + end.1) } else { end };
                    (reflect(pos, last_ctrl), end)
                };
                for i in 1..=CURVE_STEPS {
                    let t = i as f64 / CURVE_STEPS as f64;
                    points.push(quadratic_at(pos, ctrl, end, t));
                }
                last_ctrl = Some(ctrl);
                pos = end;
            }
            'A' => {
                // Elliptical arcs do not appear in MathJax glyph paths;
                // degrade to a chord toward the endpoint.
                for _ in 0..5 {
                    tokens.next_number();
                }
                let Some((x, y)) = tokens.next_pair() else { break };
                pos = if relative { (pos.0 + x, pos.1 + y) } else { (x, y) };
                points.push(pos);
                last_ctrl = None;
            }
            'Z' => {
                pos = subpath_start;
                points.push(pos);
                last_ctrl = None;
            }
            _ => break,
        }
        last_cmd = cmd;
    }
    points
}

fn reflect(pos: (f64, f64), ctrl: Option<(f64, f64)>) -> (f64, f64) {
    match ctrl {
        Some((cx, cy)) => (2.0 * pos.0 - cx, 2.0 * pos.1 - cy),
        None => pos,
    }
}

fn cubic_at(p0: (f64, f64), c1: (f64, f64), c2: (f64, f64), p1: (f64, f64), t: f64) -> (f64, f64) {
    let u = 1.0 - t;
    let (b0, b1, b2, b3) = (u * u * u, 3.0 * u * u * t, 3.0 * u * t * t, t * t * t);
    (
        b0 * p0.0 + b1 * c1.0 + b2 * c2.0 + b3 * p1.0,
        b0 * p0.1 + b1 * c1.1 + b2 * c2.1 + b3 * p1.1,
    )
}

fn quadratic_at(p0: (f64, f64), c: (f64, f64), p1: (f64, f64), t: f64) -> (f64, f64) {
    let u = 1.0 - t;
    let (b0, b1, b2) = (u * u, 2.0 * u * t, t * t);
    (
        b0 * p0.0 + b1 * c.0 + b2 * p1.0,
        b0 * p0.1 + b1 * c.1 + b2 * p1.1,
    )
}

/// Tokenizer over SVG path data: commands and floats, commas as whitespace.
struct PathTokens<'a> {
    rest: &'a str,
}

impl<'a> PathTokens<'a> {
    fn new(d: &'a str) -> Self {
        Self { rest: d }
    }

    fn skip_separators(&mut self) {
        self.rest = self
            .rest
            .trim_start_matches(|c: char| c.is_whitespace() || c == ',');
    }

    /// Next command letter; implicit repeats reuse the previous command
    /// (an implicit repeat of `M` becomes `L`, per the SVG spec).
    fn next_command(&mut self, last: char) -> Option<char> {
        self.skip_separators();
        let c = self.rest.chars().next()?;
        if c.is_ascii_alphabetic() {
            self.rest = &self.rest[1..];
            Some(c)
        } else if last != ' ' && !matches!(last, 'Z' | 'z') {
            // Z takes no parameters, so it cannot repeat implicitly
            match last {
                'M' => Some('L'),
                'm' => Some('l'),
                other => Some(other),
            }
        } else {
            None
        }
    }

    fn next_number(&mut self) -> Option<f64> {
        self.skip_separators();
        let bytes = self.rest.as_bytes();
        let mut end = 0;
        let mut seen_digit = false;
        let mut seen_dot = false;
        let mut seen_exp = false;
        while end < bytes.len() {
            let b = bytes[end];
            match b {
                b'+' | b'-' if end == 0 || bytes[end - 1] == b'e' || bytes[end - 1] == b'E' => {}
                b'.' if !seen_dot && !seen_exp => seen_dot = true,
                b'e' | b'E' if seen_digit && !seen_exp => seen_exp = true,
                b'0'..=b'9' => seen_digit = true,
                _ => break,
            }
            end += 1;
        }
        if !seen_digit {
            return None;
        }
        let value = self.rest[..end].parse().ok()?;
        self.rest = &self.rest[end..];
        Some(value)
    }

    fn next_pair(&mut self) -> Option<(f64, f64)> {
        Some((self.next_number()?, self.next_number()?))
    }
}

/// Sample every path, normalize to the adaptive target height, clamp to the
/// available width, and offset to the write position.
fn svg_to_strokes(
    svg: &str,
    latex: &str,
    req: &WriteRequest,
    cfg: &LatexConfig,
) -> Vec<Stroke> {
    let entries = collect_paths(svg);
    if entries.is_empty() {
        return Vec::new();
    }

    let mut sampled: Vec<Vec<(f64, f64)>> = Vec::new();
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);

    for (d, affine) in entries {
        let pts = sample_path(&d);
        if pts.len() < 2 {
            continue;
        }
        let transformed: Vec<(f64, f64)> =
            pts.into_iter().map(|(x, y)| affine.apply(x, y)).collect();
        for &(x, y) in &transformed {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        sampled.push(transformed);
    }

    if sampled.is_empty() || !min_x.is_finite() || !max_y.is_finite() {
        return Vec::new();
    }

    let src_w = (max_x - min_x).max(1.0);
    let src_h = (max_y - min_y).max(1.0);

    let target_height = estimate_target_height(latex, cfg);
    let mut scale = target_height / src_h;

    // Keep long equations within available board width.
    if req.max_width > 40.0 {
        let scaled_w = src_w * scale;
        if scaled_w > req.max_width {
            scale *= req.max_width / scaled_w;
        }
    }

    let mut strokes = Vec::with_capacity(sampled.len());
    for contour in sampled {
        let points: Vec<StrokePoint> = contour
            .into_iter()
            .map(|(x, y)| StrokePoint {
                x: req.position.x + (x - min_x) * scale,
                y: req.position.y + (y - min_y) * scale,
                pressure: 0.75,
            })
            .collect();
        if points.len() >= 2 {
            strokes.push(Stroke {
                points,
                color: req.color.clone(),
                width: 2.0,
            });
        }
    }
    strokes
}

/// Down-convert LaTeX to a speakable plain string for the fallback path.
pub fn latex_to_plain(latex: &str) -> String {
    let mut out = latex.trim().to_string();
    out = rewrite_two_arg(&out, "\\frac", |a, b| format!("({a})/({b})"));
    out = rewrite_one_arg(&out, "\\sqrt", |a| format!("sqrt({a})"));

    // Strip remaining backslash commands down to their names
    let mut stripped = String::with_capacity(out.len());
    let mut chars = out.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek().is_some_and(|n| n.is_ascii_alphabetic()) {
            continue;
        }
        stripped.push(c);
    }
    out = stripped
        .replace('{', "(")
        .replace('}', ")")
        .replace('^', " ^ ")
        .replace('_', " _ ");

    let collapsed = out.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "math".to_string()
    } else {
        collapsed
    }
}

/// Rewrite `cmd{a}{b}` occurrences (non-nested arguments only).
fn rewrite_two_arg(input: &str, cmd: &str, f: impl Fn(&str, &str) -> String) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(idx) = rest.find(cmd) {
        out.push_str(&rest[..idx]);
        let after = &rest[idx + cmd.len()..];
        match braced(after).and_then(|(a, r)| braced(r).map(|(b, r2)| (a, b, r2))) {
            Some((a, b, remainder)) => {
                out.push_str(&f(a, b));
                rest = remainder;
            }
            None => {
                out.push_str(cmd);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Rewrite `cmd{a}` occurrences (non-nested argument only).
fn rewrite_one_arg(input: &str, cmd: &str, f: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(idx) = rest.find(cmd) {
        out.push_str(&rest[..idx]);
        let after = &rest[idx + cmd.len()..];
        match braced(after) {
            Some((a, remainder)) => {
                out.push_str(&f(a));
                rest = remainder;
            }
            None => {
                out.push_str(cmd);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Match a leading `{…}` group with no nested braces.
fn braced(input: &str) -> Option<(&str, &str)> {
    let trimmed = input.trim_start();
    let inner = trimmed.strip_prefix('{')?;
    let end = inner.find(['{', '}'])?;
    if inner.as_bytes()[end] != b'}' {
        return None;
    }
    Some((&inner[..end], &inner[end + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Position, WriteFormat};

    fn cfg() -> LatexConfig {
        LatexConfig::default()
    }

    #[test]
    fn affine_multiplication_matches_composition() {
        let translate = parse_transform("translate(10, 20)");
        let scale = parse_transform("scale(2)");
        let combined = translate.mul(scale);
        assert_eq!(combined.apply(1.0, 1.0), (12.0, 22.0));
    }

    #[test]
    fn matrix_transform_parses_all_six_terms() {
        let m = parse_transform("matrix(1 0 0 -1 5 7)");
        assert_eq!(m.apply(2.0, 3.0), (7.0, 4.0));
    }

    #[test]
    fn chained_transforms_compose_left_to_right() {
        let m = parse_transform("translate(10,0) scale(3)");
        assert_eq!(m.apply(1.0, 0.0), (13.0, 0.0));
    }

    #[test]
    fn collect_paths_accumulates_nested_group_transforms() {
        let svg = r#"<svg><g transform="translate(100, 0)">
            <g transform="scale(2)"><path d="M0 0 L10 0"/></g>
        </g></svg>"#;
        let paths = collect_paths(svg);
        assert_eq!(paths.len(), 1);
        let (d, affine) = &paths[0];
        assert_eq!(d, "M0 0 L10 0");
        assert_eq!(affine.apply(10.0, 0.0), (120.0, 0.0));
    }

    #[test]
    fn collect_paths_ignores_comments_and_declarations() {
        let svg = r#"<?xml version="1.0"?><!-- generated --><svg>
            <path d="M0 0 L1 1"/></svg>"#;
        assert_eq!(collect_paths(svg).len(), 1);
    }

    #[test]
    fn sample_path_resamples_to_even_spacing() {
        let pts = sample_path("M0 0 L120 0");
        assert!(pts.len() >= 12);
        assert_eq!(pts.first().copied(), Some((0.0, 0.0)));
        let (last_x, last_y) = *pts.last().unwrap();
        assert!((last_x - 120.0).abs() < 1e-6 && last_y.abs() < 1e-6);
        let step = pts[1].0 - pts[0].0;
        for window in pts.windows(2) {
            assert!(((window[1].0 - window[0].0) - step).abs() < 1e-6);
        }
    }

    #[test]
    fn sample_path_flattens_quadratics() {
        let pts = sample_path("M0 0 Q50 100 100 0");
        assert!(pts.len() >= 12);
        // The curve's midpoint must bow toward the control point
        let mid = pts[pts.len() / 2];
        assert!(mid.1 > 20.0);
    }

    #[test]
    fn implicit_lineto_after_moveto() {
        let pts = flatten_path("M0 0 10 0 20 0");
        assert_eq!(pts, vec![(0.0, 0.0), (10.0, 0.0), (20.0, 0.0)]);
    }

    #[test]
    fn close_command_returns_to_subpath_start() {
        let pts = flatten_path("M0 0 L10 0 L10 10 Z");
        assert_eq!(pts.last().copied(), Some((0.0, 0.0)));
    }

    #[test]
    fn target_height_grows_with_structural_complexity() {
        let c = cfg();
        let simple = estimate_target_height("x + 1", &c);
        let dense = estimate_target_height("\\frac{\\int_0^1 f}{\\sum_k g_k}", &c);
        assert!(dense > simple);
        assert!(simple >= c.target_height_min_px);
        assert!(dense <= c.target_height_max_px);
    }

    #[test]
    fn svg_to_strokes_scales_to_target_height_and_offsets() {
        let svg = r#"<svg><path d="M0 0 L100 0 L100 50 L0 50 Z"/></svg>"#;
        let req = WriteRequest {
            content: "x".to_string(),
            format: WriteFormat::Latex,
            color: "#0000FF".to_string(),
            position: Position::new(200.0, 300.0),
            max_width: 800.0,
            seed: 0,
        };
        let c = cfg();
        let strokes = svg_to_strokes(svg, "x", &req, &c);
        assert!(!strokes.is_empty());
        let target = estimate_target_height("x", &c);
        let (mut min_y, mut max_y) = (f64::INFINITY, f64::NEG_INFINITY);
        for p in strokes.iter().flat_map(|s| &s.points) {
            assert!(p.x >= 200.0 - 1e-6);
            min_y = min_y.min(p.y);
            max_y = max_y.max(p.y);
        }
        assert!((min_y - 300.0).abs() < 1e-6);
        assert!((max_y - 300.0 - target).abs() < 1.0);
    }

    #[test]
    fn svg_to_strokes_clamps_to_available_width() {
        let svg = r#"<svg><path d="M0 0 L1000 0 L1000 10"/></svg>"#;
        let req = WriteRequest {
            content: "x".to_string(),
            format: WriteFormat::Latex,
            color: "#000000".to_string(),
            position: Position::new(0.0, 0.0),
            max_width: 200.0,
            seed: 0,
        };
        let strokes = svg_to_strokes(svg, "x", &req, &cfg());
        let max_x = strokes
            .iter()
            .flat_map(|s| &s.points)
            .map(|p| p.x)
            .fold(f64::MIN, f64::max);
        assert!(max_x <= 200.0 + 1e-6);
    }

    #[test]
    fn latex_to_plain_rewrites_common_commands() {
        assert_eq!(latex_to_plain("\\frac{1}{2}"), "(1)/(2)");
        assert_eq!(latex_to_plain("\\sqrt{x+1}"), "sqrt(x+1)");
        assert_eq!(latex_to_plain("x^2"), "x ^ 2");
        assert_eq!(latex_to_plain(""), "math");
    }
}
