use std::path::PathBuf;

use facelock_core::{DecisionPolicy, SelectionPolicy};

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Directory holding credential records.
    pub credentials_dir: PathBuf,
    /// Directory holding reference face images.
    pub references_dir: PathBuf,
    /// Per-match Hamming distance cutoff for a "good" match.
    pub distance_cutoff: u32,
    /// Similarity threshold for acceptance (inclusive).
    pub accept_threshold: f32,
    /// How to pick one box when the localizer returns several.
    pub selection_policy: SelectionPolicy,
    /// Lifetime of a pending-enrollment token in seconds.
    pub enroll_token_ttl_secs: u64,
    /// Maximum accepted capture payload after base64 decoding.
    pub max_capture_bytes: usize,
}

impl Config {
    /// Load configuration from `FACELOCK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facelock");

        let credentials_dir = std::env::var("FACELOCK_CREDENTIALS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("credentials"));
        let references_dir = std::env::var("FACELOCK_REFERENCES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("references"));

        let selection_policy = std::env::var("FACELOCK_SELECTION_POLICY")
            .ok()
            .and_then(|v| {
                let parsed = SelectionPolicy::parse(&v);
                if parsed.is_none() {
                    tracing::warn!(value = %v, "unrecognized FACELOCK_SELECTION_POLICY, using 'first'");
                }
                parsed
            })
            .unwrap_or_default();

        Self {
            credentials_dir,
            references_dir,
            distance_cutoff: env_u32(
                "FACELOCK_DISTANCE_CUTOFF",
                facelock_core::decision::DEFAULT_DISTANCE_CUTOFF,
            ),
            accept_threshold: env_f32(
                "FACELOCK_ACCEPT_THRESHOLD",
                facelock_core::decision::DEFAULT_ACCEPT_THRESHOLD,
            ),
            selection_policy,
            enroll_token_ttl_secs: env_u64("FACELOCK_ENROLL_TOKEN_TTL_SECS", 300),
            max_capture_bytes: env_usize("FACELOCK_MAX_CAPTURE_BYTES", 16 * 1024 * 1024),
        }
    }

    /// Decision parameters for the verification pipeline.
    pub fn decision_policy(&self) -> DecisionPolicy {
        DecisionPolicy {
            distance_cutoff: self.distance_cutoff,
            accept_threshold: self.accept_threshold,
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
