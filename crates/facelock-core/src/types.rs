use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::canonical::CanonicalizeError;

/// Width of a canonical face crop in pixels.
pub const CANONICAL_WIDTH: u32 = 150;
/// Height of a canonical face crop in pixels.
pub const CANONICAL_HEIGHT: u32 = 200;

/// Number of bytes in one BRIEF descriptor (256 bits).
pub const DESCRIPTOR_BYTES: usize = 32;

/// Bounding box for a localized face.
///
/// Coordinates are in frame pixels and may extend past the frame edge;
/// canonicalization clamps them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// A face crop normalized to exactly 150×200 RGB pixels.
///
/// The constructor enforces the dimensions, so every consumer (the
/// reference store, the feature extractor) can rely on them.
#[derive(Debug, Clone)]
pub struct CanonicalFace(RgbImage);

impl CanonicalFace {
    /// Wrap an image, verifying it has canonical dimensions.
    pub fn from_image(image: RgbImage) -> Result<Self, CanonicalizeError> {
        if image.width() != CANONICAL_WIDTH || image.height() != CANONICAL_HEIGHT {
            return Err(CanonicalizeError::WrongDimensions {
                width: image.width(),
                height: image.height(),
            });
        }
        Ok(Self(image))
    }

    pub fn as_image(&self) -> &RgbImage {
        &self.0
    }

    pub fn into_image(self) -> RgbImage {
        self.0
    }
}

/// A FAST corner location with its non-max-suppression score.
#[derive(Debug, Clone, Copy)]
pub struct Keypoint {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

/// Keypoints and their 256-bit BRIEF descriptors for one canonical face.
///
/// `keypoints[i]` is described by `descriptors[i]`. Transient — recomputed
/// on every comparison, never persisted.
#[derive(Debug, Clone)]
pub struct DescriptorSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<[u8; DESCRIPTOR_BYTES]>,
}

impl DescriptorSet {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// One cross-checked descriptor pairing with its Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorMatch {
    /// Index into the probe descriptor set.
    pub query: usize,
    /// Index into the reference descriptor set.
    pub train: usize,
    pub distance: u32,
}
