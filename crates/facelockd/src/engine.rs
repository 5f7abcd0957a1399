//! Authentication engine.
//!
//! Owns the pipeline instances (localizer, extractor, policies) on one
//! dedicated OS thread and serializes enrollment/verification requests
//! through it. D-Bus handlers talk to it via a clone-safe [`EngineHandle`].

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use facelock_core::{
    canonicalize, match_descriptors, CanonicalizeError, ContrastLocalizer, Decision,
    DecisionError, DecisionPolicy, DetectError, FaceLocalizer, FeatureExtractor, MatchError,
    SelectionPolicy,
};
use facelock_store::{
    CredentialDirectory, CredentialError, PendingEnrollments, ReferenceStore, StoreError,
};

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("capture could not be decoded: {0}")]
    BadFrame(String),
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error("no face detected in the capture")]
    NoFaceDetected,
    #[error(transparent)]
    Canonicalize(#[from] CanonicalizeError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Decision(#[from] DecisionError),
    #[error("face does not match the enrolled reference (similarity {similarity:.3})")]
    RejectedBySimilarity { similarity: f32 },
    #[error("unknown identity '{user}'")]
    UnknownIdentity { user: String },
    #[error("identity '{user}' has no enrolled face reference")]
    NotEnrolled { user: String },
    #[error("no pending enrollment for this token; register first or request a new token")]
    NoPendingEnrollment,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl AuthError {
    /// True for faults that must surface as hard failures at the
    /// transport boundary; everything else is a business outcome.
    pub fn is_hard(&self) -> bool {
        match self {
            AuthError::Store(StoreError::NotFound { .. }) => false,
            AuthError::Store(StoreError::Identity(_)) => false,
            AuthError::Store(_) => true,
            AuthError::Credentials(
                CredentialError::Read { .. }
                | CredentialError::Write { .. }
                | CredentialError::Corrupt { .. },
            ) => true,
            AuthError::ChannelClosed => true,
            _ => false,
        }
    }
}

/// The pipeline instances one engine thread owns.
///
/// Detection and extraction are `&self` and per-request state lives on the
/// stack, so serializing requests through one thread is the whole
/// synchronization story.
pub struct Pipeline {
    localizer: ContrastLocalizer,
    extractor: FeatureExtractor,
    selection: SelectionPolicy,
    decision: DecisionPolicy,
}

impl Pipeline {
    pub fn new(selection: SelectionPolicy, decision: DecisionPolicy) -> Self {
        Self {
            localizer: ContrastLocalizer,
            extractor: FeatureExtractor::new(),
            selection,
            decision,
        }
    }
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        token: String,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<String, AuthError>>,
    },
    Verify {
        user: String,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Decision, AuthError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Redeem a pending-enrollment token and persist a reference face from
    /// the capture. Returns the enrolled identity.
    pub async fn enroll(&self, token: String, image: Vec<u8>) -> Result<String, AuthError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                token,
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| AuthError::ChannelClosed)?;
        reply_rx.await.map_err(|_| AuthError::ChannelClosed)?
    }

    /// Verify a capture against the stored reference for `user`.
    pub async fn verify(&self, user: String, image: Vec<u8>) -> Result<Decision, AuthError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify {
                user,
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| AuthError::ChannelClosed)?;
        reply_rx.await.map_err(|_| AuthError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread and enter its request loop.
pub fn spawn_engine(
    pipeline: Pipeline,
    credentials: Arc<CredentialDirectory>,
    references: Arc<ReferenceStore>,
    pending: Arc<PendingEnrollments>,
) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facelock-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll {
                        token,
                        image,
                        reply,
                    } => {
                        let result =
                            run_enroll(&pipeline, &credentials, &references, &pending, &token, &image);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Verify { user, image, reply } => {
                        let result =
                            run_verify(&pipeline, &credentials, &references, &user, &image);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

fn decode_frame(image: &[u8]) -> Result<image::RgbImage, AuthError> {
    let decoded = image::load_from_memory(image).map_err(|err| AuthError::BadFrame(err.to_string()))?;
    Ok(decoded.to_rgb8())
}

/// EnrollmentFlow: redeem token → precondition gate → localize →
/// canonicalize → persist. Nothing is persisted on any failure, and the
/// token is refunded so the user can retry the capture.
pub fn run_enroll(
    pipeline: &Pipeline,
    credentials: &CredentialDirectory,
    references: &ReferenceStore,
    pending: &PendingEnrollments,
    token: &str,
    image: &[u8],
) -> Result<String, AuthError> {
    let token_id = Uuid::parse_str(token).map_err(|_| AuthError::NoPendingEnrollment)?;
    let record = pending
        .redeem(&token_id)
        .ok_or(AuthError::NoPendingEnrollment)?;
    let user = record.identity.clone();

    let result = enroll_attempt(pipeline, credentials, references, &user, image);
    match result {
        Ok(()) => {
            tracing::info!(user = %user, "enrollment complete");
            Ok(user)
        }
        Err(err) => {
            tracing::info!(user = %user, kind = %err, "enrollment attempt failed, token refunded");
            pending.reinstate(token_id, record);
            Err(err)
        }
    }
}

fn enroll_attempt(
    pipeline: &Pipeline,
    credentials: &CredentialDirectory,
    references: &ReferenceStore,
    user: &str,
    image: &[u8],
) -> Result<(), AuthError> {
    if !credentials.identity_exists(user) {
        return Err(AuthError::UnknownIdentity {
            user: user.to_string(),
        });
    }

    let frame = decode_frame(image)?;
    let boxes = pipeline.localizer.detect(&frame)?;
    let face = pipeline
        .selection
        .select(&boxes)
        .ok_or(AuthError::NoFaceDetected)?;

    let canonical = canonicalize(&frame, face)?;
    references.save(user, &canonical)?;
    Ok(())
}

/// VerificationFlow: precondition gates → localize → canonicalize →
/// match against the stored reference → decide.
///
/// "Unknown identity" and "no reference enrolled" are distinct outcomes
/// with different remediation; every later failure is reported precisely
/// here and collapsed to a generic rejection at the transport boundary.
pub fn run_verify(
    pipeline: &Pipeline,
    credentials: &CredentialDirectory,
    references: &ReferenceStore,
    user: &str,
    image: &[u8],
) -> Result<Decision, AuthError> {
    if !credentials.identity_exists(user) {
        return Err(AuthError::UnknownIdentity {
            user: user.to_string(),
        });
    }
    if !references.exists(user) {
        return Err(AuthError::NotEnrolled {
            user: user.to_string(),
        });
    }

    let frame = decode_frame(image)?;
    let boxes = pipeline.localizer.detect(&frame)?;
    let face = pipeline
        .selection
        .select(&boxes)
        .ok_or(AuthError::NoFaceDetected)?;
    let probe = canonicalize(&frame, face)?;

    let reference = references.load(user).map_err(|err| match err {
        StoreError::NotFound { identity } => AuthError::NotEnrolled { user: identity },
        other => AuthError::from(other),
    })?;

    let probe_set = pipeline.extractor.extract(&probe);
    let reference_set = pipeline.extractor.extract(&reference);
    let matches = match_descriptors(&probe_set, &reference_set)?;
    let decision = pipeline.decision.decide(&matches)?;

    tracing::info!(
        user,
        similarity = decision.similarity,
        good = decision.good_matches,
        total = decision.total_matches,
        accepted = decision.accepted,
        "verification scored"
    );

    if decision.accepted {
        Ok(decision)
    } else {
        Err(AuthError::RejectedBySimilarity {
            similarity: decision.similarity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        pipeline: Pipeline,
        credentials: Arc<CredentialDirectory>,
        references: Arc<ReferenceStore>,
        pending: Arc<PendingEnrollments>,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        Fixture {
            pipeline: Pipeline::new(SelectionPolicy::First, DecisionPolicy::default()),
            credentials: Arc::new(
                CredentialDirectory::open(tmp.path().join("credentials")).unwrap(),
            ),
            references: Arc::new(ReferenceStore::open(tmp.path().join("references")).unwrap()),
            pending: Arc::new(PendingEnrollments::new(Duration::from_secs(60))),
            _tmp: tmp,
        }
    }

    /// PNG bytes of a frame holding a blocky-noise face patch.
    fn capture(seed: u32) -> Vec<u8> {
        let mut state = seed;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };
        let mut blocks = [[0u8; 16]; 12];
        for col in blocks.iter_mut() {
            for v in col.iter_mut() {
                *v = (next() % 256) as u8;
            }
        }
        let frame = RgbImage::from_fn(320, 240, |x, y| {
            if (96..192).contains(&x) && (56..184).contains(&y) {
                let v = blocks[((x - 96) / 8) as usize][((y - 56) / 8) as usize];
                Rgb([v, v, v])
            } else {
                Rgb([120, 120, 120])
            }
        });

        let mut bytes = Vec::new();
        frame
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn blank_capture() -> Vec<u8> {
        let frame = RgbImage::from_pixel(320, 240, Rgb([120, 120, 120]));
        let mut bytes = Vec::new();
        frame
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn enroll(f: &Fixture, user: &str, image: &[u8]) -> Result<String, AuthError> {
        let token = f.pending.issue(user).to_string();
        run_enroll(
            &f.pipeline,
            &f.credentials,
            &f.references,
            &f.pending,
            &token,
            image,
        )
    }

    #[test]
    fn unknown_token_is_no_pending_enrollment() {
        let f = fixture();
        let err = run_enroll(
            &f.pipeline,
            &f.credentials,
            &f.references,
            &f.pending,
            "not-a-token",
            &capture(1),
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::NoPendingEnrollment));
    }

    #[test]
    fn enrollment_requires_a_registered_identity() {
        let f = fixture();
        // Token issued for an identity the credential store never saw.
        let err = enroll(&f, "ghost", &capture(1)).unwrap_err();
        assert!(matches!(err, AuthError::UnknownIdentity { .. }));
        assert!(!f.references.exists("ghost"));
    }

    #[test]
    fn enrollment_persists_a_reference() {
        let f = fixture();
        f.credentials.register("ana", "hunter22").unwrap();
        let user = enroll(&f, "ana", &capture(42)).unwrap();
        assert_eq!(user, "ana");
        assert!(f.references.exists("ana"));
    }

    #[test]
    fn no_face_persists_nothing_and_refunds_the_token() {
        let f = fixture();
        f.credentials.register("ana", "hunter22").unwrap();

        let token = f.pending.issue("ana").to_string();
        let err = run_enroll(
            &f.pipeline,
            &f.credentials,
            &f.references,
            &f.pending,
            &token,
            &blank_capture(),
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::NoFaceDetected));
        assert!(!f.references.exists("ana"));

        // Same token is good for a retry with a usable capture.
        let user = run_enroll(
            &f.pipeline,
            &f.credentials,
            &f.references,
            &f.pending,
            &token,
            &capture(42),
        )
        .unwrap();
        assert_eq!(user, "ana");
        assert!(f.references.exists("ana"));
    }

    #[test]
    fn tokens_are_single_use_after_success() {
        let f = fixture();
        f.credentials.register("ana", "hunter22").unwrap();

        let token = f.pending.issue("ana").to_string();
        run_enroll(
            &f.pipeline,
            &f.credentials,
            &f.references,
            &f.pending,
            &token,
            &capture(42),
        )
        .unwrap();

        let err = run_enroll(
            &f.pipeline,
            &f.credentials,
            &f.references,
            &f.pending,
            &token,
            &capture(42),
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::NoPendingEnrollment));
    }

    #[test]
    fn undecodable_capture_is_a_bad_frame() {
        let f = fixture();
        f.credentials.register("ana", "hunter22").unwrap();
        let err = enroll(&f, "ana", b"definitely not an image").unwrap_err();
        assert!(matches!(err, AuthError::BadFrame(_)));
        assert!(!f.references.exists("ana"));
    }

    #[test]
    fn verify_unknown_identity_is_distinct_from_unenrolled() {
        let f = fixture();
        f.credentials.register("ana", "hunter22").unwrap();

        let err =
            run_verify(&f.pipeline, &f.credentials, &f.references, "ghost", &capture(1)).unwrap_err();
        assert!(matches!(err, AuthError::UnknownIdentity { .. }));

        let err =
            run_verify(&f.pipeline, &f.credentials, &f.references, "ana", &capture(1)).unwrap_err();
        assert!(matches!(err, AuthError::NotEnrolled { .. }));
    }

    #[test]
    fn same_capture_verifies_with_full_similarity() {
        let f = fixture();
        f.credentials.register("ana", "hunter22").unwrap();
        enroll(&f, "ana", &capture(42)).unwrap();

        let decision =
            run_verify(&f.pipeline, &f.credentials, &f.references, "ana", &capture(42)).unwrap();
        assert!(decision.accepted);
        assert!((decision.similarity - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn different_capture_is_rejected() {
        let f = fixture();
        f.credentials.register("ana", "hunter22").unwrap();
        enroll(&f, "ana", &capture(42)).unwrap();

        let err = run_verify(
            &f.pipeline,
            &f.credentials,
            &f.references,
            "ana",
            &capture(1_000_003),
        )
        .unwrap_err();
        assert!(
            matches!(
                err,
                AuthError::RejectedBySimilarity { .. }
                    | AuthError::Decision(DecisionError::NoMatches)
                    | AuthError::Match(_)
            ),
            "unexpected verification outcome: {err}"
        );
    }

    #[test]
    fn reenrollment_replaces_the_reference() {
        let f = fixture();
        f.credentials.register("ana", "hunter22").unwrap();

        enroll(&f, "ana", &capture(42)).unwrap();
        run_verify(&f.pipeline, &f.credentials, &f.references, "ana", &capture(42)).unwrap();

        enroll(&f, "ana", &capture(1_000_003)).unwrap();

        // New reference verifies; the old one is unreachable.
        run_verify(
            &f.pipeline,
            &f.credentials,
            &f.references,
            "ana",
            &capture(1_000_003),
        )
        .unwrap();
        assert!(
            run_verify(&f.pipeline, &f.credentials, &f.references, "ana", &capture(42)).is_err()
        );
    }

    #[test]
    fn concurrent_verifications_do_not_interfere() {
        let f = fixture();
        f.credentials.register("ana", "hunter22").unwrap();
        f.credentials.register("bob", "hunter22").unwrap();
        enroll(&f, "ana", &capture(42)).unwrap();
        enroll(&f, "bob", &capture(777)).unwrap();

        let pipeline = Arc::new(f.pipeline);
        let handles: Vec<_> = [("ana", 42u32), ("bob", 777)]
            .into_iter()
            .map(|(user, seed)| {
                let pipeline = Arc::clone(&pipeline);
                let credentials = Arc::clone(&f.credentials);
                let references = Arc::clone(&f.references);
                std::thread::spawn(move || {
                    let decision =
                        run_verify(&pipeline, &credentials, &references, user, &capture(seed))
                            .unwrap();
                    assert!(decision.accepted);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[tokio::test]
    async fn engine_handle_round_trip() {
        let f = fixture();
        f.credentials.register("ana", "hunter22").unwrap();
        let token = f.pending.issue("ana").to_string();

        let handle = spawn_engine(
            Pipeline::new(SelectionPolicy::First, DecisionPolicy::default()),
            Arc::clone(&f.credentials),
            Arc::clone(&f.references),
            Arc::clone(&f.pending),
        );

        let user = handle.enroll(token, capture(42)).await.unwrap();
        assert_eq!(user, "ana");

        let decision = handle.verify("ana".into(), capture(42)).await.unwrap();
        assert!(decision.accepted);
    }
}
