//! Keypoint detection and binary descriptors.
//!
//! FAST-9 corner detection with a 3×3 score non-max suppression, followed
//! by 256-bit BRIEF descriptors sampled from a fixed pseudo-random pattern
//! over a Gaussian-smoothed grayscale copy of the canonical face. The
//! pattern is generated from a constant seed so descriptors are stable
//! across runs and toolchain versions.

use image::imageops;
use image::GrayImage;

use crate::types::{CanonicalFace, DescriptorSet, Keypoint, DESCRIPTOR_BYTES};

const FAST_THRESHOLD: i16 = 20;
const FAST_ARC_LENGTH: usize = 9;
/// BRIEF tests sample within ±PATTERN_SPREAD of the keypoint (31×31 patch).
const PATTERN_SPREAD: i32 = 13;
/// Keypoints are kept this far from every border so all tests stay in bounds.
const BORDER: u32 = 16;
const DESCRIPTOR_BITS: usize = DESCRIPTOR_BYTES * 8;
const PATTERN_SEED: u32 = 0x9e37_79b9;
/// Gaussian sigma for the pre-descriptor smoothing pass.
const SMOOTHING_SIGMA: f32 = 2.0;
/// Cap on keypoints per image, strongest first.
const MAX_KEYPOINTS: usize = 500;

/// Bresenham circle of radius 3: the 16 pixels of the FAST segment test.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// One BRIEF intensity test: compare the pixel at `a` with the pixel at `b`,
/// both relative to the keypoint.
#[derive(Clone, Copy)]
struct BriefTest {
    ax: i32,
    ay: i32,
    bx: i32,
    by: i32,
}

/// Descriptor extractor holding the generated BRIEF sampling pattern.
///
/// Cheap to construct; one instance per engine is plenty. Extraction is
/// `&self` and allocates only the output set.
pub struct FeatureExtractor {
    pattern: Vec<BriefTest>,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        let mut state = PATTERN_SEED;
        let mut offset = || {
            // xorshift32; maps into [-PATTERN_SPREAD, PATTERN_SPREAD]
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state % (2 * PATTERN_SPREAD as u32 + 1)) as i32 - PATTERN_SPREAD
        };

        let pattern = (0..DESCRIPTOR_BITS)
            .map(|_| BriefTest {
                ax: offset(),
                ay: offset(),
                bx: offset(),
                by: offset(),
            })
            .collect();

        Self { pattern }
    }

    /// Compute keypoints and descriptors for one canonical face.
    ///
    /// A face with no detectable corners (uniform crop) yields an empty
    /// set; the matcher turns that into its own failure kind.
    pub fn extract(&self, face: &CanonicalFace) -> DescriptorSet {
        let gray = imageops::grayscale(face.as_image());
        let smoothed = imageops::blur(&gray, SMOOTHING_SIGMA);

        let mut keypoints = detect_fast(&gray);
        if keypoints.len() > MAX_KEYPOINTS {
            keypoints.sort_by(|a, b| b.score.total_cmp(&a.score));
            keypoints.truncate(MAX_KEYPOINTS);
        }

        let descriptors = keypoints
            .iter()
            .map(|kp| self.describe(&smoothed, kp))
            .collect();

        tracing::trace!(keypoints = keypoints.len(), "descriptor extraction complete");
        DescriptorSet {
            keypoints,
            descriptors,
        }
    }

    fn describe(&self, smoothed: &GrayImage, kp: &Keypoint) -> [u8; DESCRIPTOR_BYTES] {
        let mut descriptor = [0u8; DESCRIPTOR_BYTES];
        for (bit, test) in self.pattern.iter().enumerate() {
            let a = smoothed
                .get_pixel((kp.x as i32 + test.ax) as u32, (kp.y as i32 + test.ay) as u32)
                .0[0];
            let b = smoothed
                .get_pixel((kp.x as i32 + test.bx) as u32, (kp.y as i32 + test.by) as u32)
                .0[0];
            if a < b {
                descriptor[bit / 8] |= 1 << (bit % 8);
            }
        }
        descriptor
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience wrapper constructing a fresh extractor.
pub fn extract_descriptors(face: &CanonicalFace) -> DescriptorSet {
    FeatureExtractor::new().extract(face)
}

/// FAST-9 segment test over the interior of the image, with 3×3 non-max
/// suppression on the corner score.
fn detect_fast(gray: &GrayImage) -> Vec<Keypoint> {
    let (width, height) = gray.dimensions();
    if width <= 2 * BORDER || height <= 2 * BORDER {
        return Vec::new();
    }

    let data = gray.as_raw();
    let w = width as usize;
    let mut score_map = vec![0.0f32; w * height as usize];
    let mut candidates = Vec::new();

    for y in BORDER..height - BORDER {
        for x in BORDER..width - BORDER {
            let center = data[y as usize * w + x as usize] as i16;
            let mut circle = [0i16; 16];
            for (i, (dx, dy)) in CIRCLE.iter().enumerate() {
                let px = (x as i32 + dx) as usize;
                let py = (y as i32 + dy) as usize;
                circle[i] = data[py * w + px] as i16;
            }

            if !segment_test(center, &circle) {
                continue;
            }

            let score: f32 = circle
                .iter()
                .map(|&v| ((v - center).abs() - FAST_THRESHOLD).max(0) as f32)
                .sum();
            score_map[y as usize * w + x as usize] = score;
            candidates.push((x, y, score));
        }
    }

    // Keep only local maxima of the score over a 3×3 neighborhood.
    candidates
        .into_iter()
        .filter(|&(x, y, score)| {
            let mut is_max = true;
            for dy in -1..=1i32 {
                for dx in -1..=1i32 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = (x as i32 + dx) as usize;
                    let ny = (y as i32 + dy) as usize;
                    if score_map[ny * w + nx] > score {
                        is_max = false;
                    }
                }
            }
            is_max
        })
        .map(|(x, y, score)| Keypoint { x, y, score })
        .collect()
}

/// True when at least `FAST_ARC_LENGTH` contiguous circle pixels are all
/// brighter than center + threshold or all darker than center - threshold.
fn segment_test(center: i16, circle: &[i16; 16]) -> bool {
    let bright: Vec<bool> = circle.iter().map(|&v| v >= center + FAST_THRESHOLD).collect();
    let dark: Vec<bool> = circle.iter().map(|&v| v <= center - FAST_THRESHOLD).collect();
    has_contiguous_run(&bright) || has_contiguous_run(&dark)
}

fn has_contiguous_run(flags: &[bool]) -> bool {
    let mut run = 0usize;
    // Walk twice around the circle to catch runs that wrap.
    for i in 0..flags.len() * 2 {
        if flags[i % flags.len()] {
            run += 1;
            if run >= FAST_ARC_LENGTH {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}
