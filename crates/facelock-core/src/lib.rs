//! facelock-core — Face localization and comparison engine.
//!
//! Localizes a face in a captured frame, crops it into a fixed-size
//! canonical image, and compares canonical images with FAST keypoints and
//! binary BRIEF descriptors under cross-checked Hamming matching. No
//! learned models; the whole pipeline is deterministic and explainable.

pub mod canonical;
pub mod decision;
pub mod detector;
pub mod features;
pub mod matcher;
pub mod types;

pub use canonical::{canonicalize, CanonicalizeError};
pub use decision::{Decision, DecisionError, DecisionPolicy};
pub use detector::{ContrastLocalizer, DetectError, FaceLocalizer, SelectionPolicy};
pub use features::{extract_descriptors, FeatureExtractor};
pub use matcher::{match_descriptors, MatchError};
pub use types::{
    CanonicalFace, DescriptorMatch, DescriptorSet, FaceBox, Keypoint, CANONICAL_HEIGHT,
    CANONICAL_WIDTH,
};
