//! Local-contrast face localizer.
//!
//! Grids the grayscale frame into cells, scores each cell by intensity
//! standard deviation, and groups salient cells into connected components.
//! Each component becomes one candidate box. Deterministic, model-free,
//! and pure over the frame — instances are trivially shareable.

use image::RgbImage;
use thiserror::Error;

use crate::types::FaceBox;

// Cell grid and saliency parameters.
const CELL_SIZE: u32 = 16;
/// A cell is salient when its stddev exceeds this fraction of the frame max.
const SALIENCY_RATIO: f32 = 0.5;
/// Absolute stddev floor; below it a cell is never salient (blank frames).
const SALIENCY_FLOOR: f32 = 8.0;
/// Components smaller than this many cells are discarded as speckle.
const MIN_COMPONENT_CELLS: usize = 2;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("frame is empty or degenerate ({width}x{height})")]
    BadFrame { width: u32, height: u32 },
}

/// Pluggable face localization backend.
///
/// Returning an empty vector means "no face found" and is a valid outcome,
/// not an error; callers must check it explicitly.
pub trait FaceLocalizer: Send + Sync {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<FaceBox>, DetectError>;
}

/// How to pick one box when the localizer returns several.
///
/// Localizer output order is row-major scan order, which is documented
/// here but is not a contract of localizers in general — hence an explicit
/// named policy rather than a silent dependence on ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// First box in detector output order.
    #[default]
    First,
    /// Highest detection confidence.
    Confidence,
    /// Largest box area.
    Area,
}

impl SelectionPolicy {
    pub fn select<'a>(&self, boxes: &'a [FaceBox]) -> Option<&'a FaceBox> {
        match self {
            SelectionPolicy::First => boxes.first(),
            SelectionPolicy::Confidence => boxes
                .iter()
                .max_by(|a, b| a.confidence.total_cmp(&b.confidence)),
            SelectionPolicy::Area => boxes.iter().max_by(|a, b| a.area().total_cmp(&b.area())),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "first" => Some(SelectionPolicy::First),
            "confidence" => Some(SelectionPolicy::Confidence),
            "area" => Some(SelectionPolicy::Area),
            _ => None,
        }
    }
}

/// Cell-grid local-contrast localizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContrastLocalizer;

impl FaceLocalizer for ContrastLocalizer {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<FaceBox>, DetectError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectError::BadFrame { width, height });
        }

        let gray = image::imageops::grayscale(frame);
        let cells_x = width.div_ceil(CELL_SIZE) as usize;
        let cells_y = height.div_ceil(CELL_SIZE) as usize;

        let scores = cell_scores(gray.as_raw(), width, height, cells_x, cells_y);
        let max_score = scores.iter().cloned().fold(0.0f32, f32::max);
        if max_score < SALIENCY_FLOOR {
            return Ok(Vec::new());
        }

        let threshold = (max_score * SALIENCY_RATIO).max(SALIENCY_FLOOR);
        let salient: Vec<bool> = scores.iter().map(|&s| s >= threshold).collect();

        let boxes = group_components(&salient, &scores, cells_x, cells_y, max_score, width, height);
        tracing::debug!(candidates = boxes.len(), max_score, "localizer pass complete");
        Ok(boxes)
    }
}

/// Per-cell intensity standard deviation, row-major over the cell grid.
fn cell_scores(
    gray: &[u8],
    width: u32,
    height: u32,
    cells_x: usize,
    cells_y: usize,
) -> Vec<f32> {
    let mut scores = vec![0.0f32; cells_x * cells_y];

    for cy in 0..cells_y {
        for cx in 0..cells_x {
            let x0 = cx as u32 * CELL_SIZE;
            let y0 = cy as u32 * CELL_SIZE;
            let x1 = (x0 + CELL_SIZE).min(width);
            let y1 = (y0 + CELL_SIZE).min(height);

            let mut sum = 0u64;
            let mut sum_sq = 0u64;
            let n = ((x1 - x0) * (y1 - y0)) as u64;

            for y in y0..y1 {
                for x in x0..x1 {
                    let v = gray[(y * width + x) as usize] as u64;
                    sum += v;
                    sum_sq += v * v;
                }
            }

            let mean = sum as f32 / n as f32;
            let variance = (sum_sq as f32 / n as f32 - mean * mean).max(0.0);
            scores[cy * cells_x + cx] = variance.sqrt();
        }
    }

    scores
}

/// Group salient cells into 8-connected components and emit one box per
/// component, in row-major discovery order.
fn group_components(
    salient: &[bool],
    scores: &[f32],
    cells_x: usize,
    cells_y: usize,
    max_score: f32,
    width: u32,
    height: u32,
) -> Vec<FaceBox> {
    let mut visited = vec![false; salient.len()];
    let mut boxes = Vec::new();

    for start in 0..salient.len() {
        if !salient[start] || visited[start] {
            continue;
        }

        let mut stack = vec![start];
        visited[start] = true;
        let mut members = Vec::new();

        while let Some(idx) = stack.pop() {
            members.push(idx);
            let cx = (idx % cells_x) as isize;
            let cy = (idx / cells_x) as isize;

            for dy in -1..=1isize {
                for dx in -1..=1isize {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = cx + dx;
                    let ny = cy + dy;
                    if nx < 0 || ny < 0 || nx >= cells_x as isize || ny >= cells_y as isize {
                        continue;
                    }
                    let nidx = ny as usize * cells_x + nx as usize;
                    if salient[nidx] && !visited[nidx] {
                        visited[nidx] = true;
                        stack.push(nidx);
                    }
                }
            }
        }

        if members.len() < MIN_COMPONENT_CELLS {
            continue;
        }

        let mut min_cx = usize::MAX;
        let mut min_cy = usize::MAX;
        let mut max_cx = 0usize;
        let mut max_cy = 0usize;
        let mut score_sum = 0.0f32;
        for &idx in &members {
            let cx = idx % cells_x;
            let cy = idx / cells_x;
            min_cx = min_cx.min(cx);
            min_cy = min_cy.min(cy);
            max_cx = max_cx.max(cx);
            max_cy = max_cy.max(cy);
            score_sum += scores[idx];
        }

        let x0 = (min_cx as u32 * CELL_SIZE) as f32;
        let y0 = (min_cy as u32 * CELL_SIZE) as f32;
        let x1 = (((max_cx as u32 + 1) * CELL_SIZE).min(width)) as f32;
        let y1 = (((max_cy as u32 + 1) * CELL_SIZE).min(height)) as f32;

        boxes.push(FaceBox {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
            confidence: (score_sum / members.len() as f32) / max_score,
        });
    }

    boxes
}
