//! Canonical face crops.
//!
//! Crops a localized face out of the frame and resizes it to the fixed
//! 150×200 comparison resolution with a Catmull-Rom (cubic) kernel — a
//! deliberate quality/latency tradeoff to reduce aliasing in the crop.

use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

use crate::types::{CanonicalFace, FaceBox, CANONICAL_HEIGHT, CANONICAL_WIDTH};

#[derive(Error, Debug)]
pub enum CanonicalizeError {
    #[error("face region degenerate after clamping to {frame_width}x{frame_height}")]
    InvalidRegion { frame_width: u32, frame_height: u32 },
    #[error("image is {width}x{height}, expected {CANONICAL_WIDTH}x{CANONICAL_HEIGHT}")]
    WrongDimensions { width: u32, height: u32 },
}

/// Crop `face` out of `frame` (clamped to frame bounds) and resize to the
/// canonical resolution.
///
/// The box may legitimately extend past the frame edge; only a region that
/// is empty after clamping is an error.
pub fn canonicalize(frame: &RgbImage, face: &FaceBox) -> Result<CanonicalFace, CanonicalizeError> {
    let (fw, fh) = frame.dimensions();

    let x0 = face.x.max(0.0).min(fw as f32) as u32;
    let y0 = face.y.max(0.0).min(fh as f32) as u32;
    let x1 = (face.x + face.width).max(0.0).min(fw as f32) as u32;
    let y1 = (face.y + face.height).max(0.0).min(fh as f32) as u32;

    if x1 <= x0 || y1 <= y0 {
        return Err(CanonicalizeError::InvalidRegion {
            frame_width: fw,
            frame_height: fh,
        });
    }

    let crop = imageops::crop_imm(frame, x0, y0, x1 - x0, y1 - y0).to_image();
    let resized = imageops::resize(
        &crop,
        CANONICAL_WIDTH,
        CANONICAL_HEIGHT,
        FilterType::CatmullRom,
    );

    CanonicalFace::from_image(resized)
}
