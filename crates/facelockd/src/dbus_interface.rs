//! D-Bus interface for the Facelock authentication daemon.
//!
//! Bus name: org.facelock.Facelock1
//! Object path: /org/facelock/Facelock1
//!
//! Structured results travel as JSON strings. Verification failures past
//! the identity/enrollment gates are collapsed into one generic rejection
//! here; the precise failure kind is logged, never surfaced.

use std::sync::Arc;

use base64::Engine as _;
use uuid::Uuid;
use zbus::interface;

use facelock_store::{CredentialDirectory, CredentialError, PendingEnrollments, ReferenceStore};

use crate::engine::{AuthError, EngineHandle};
use crate::sessions::SessionRegistry;

/// The one message every post-gate verification failure maps to.
const GENERIC_REJECTION: &str = "face not recognized; try again or use your password";

pub struct FacelockService {
    engine: EngineHandle,
    credentials: Arc<CredentialDirectory>,
    references: Arc<ReferenceStore>,
    pending: Arc<PendingEnrollments>,
    sessions: Arc<SessionRegistry>,
    max_capture_bytes: usize,
}

impl FacelockService {
    pub fn new(
        engine: EngineHandle,
        credentials: Arc<CredentialDirectory>,
        references: Arc<ReferenceStore>,
        pending: Arc<PendingEnrollments>,
        sessions: Arc<SessionRegistry>,
        max_capture_bytes: usize,
    ) -> Self {
        Self {
            engine,
            credentials,
            references,
            pending,
            sessions,
            max_capture_bytes,
        }
    }

    /// Decode a (possibly data-URL prefixed) base64 capture, enforcing the
    /// payload cap before decoding.
    fn decode_capture(&self, data: &str) -> zbus::fdo::Result<Vec<u8>> {
        // Browsers send "data:image/jpeg;base64,<payload>"; accept both.
        let payload = match data.split_once(',') {
            Some((_, rest)) => rest,
            None => data,
        };

        // 4 base64 chars encode 3 bytes; reject before allocating.
        if payload.len() / 4 * 3 > self.max_capture_bytes {
            return Err(zbus::fdo::Error::LimitsExceeded(format!(
                "capture exceeds the {} byte limit",
                self.max_capture_bytes
            )));
        }

        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|err| zbus::fdo::Error::InvalidArgs(format!("capture is not valid base64: {err}")))
    }

    fn map_hard_failure(&self, err: &AuthError) -> zbus::fdo::Error {
        tracing::error!(kind = %err, "internal failure");
        zbus::fdo::Error::Failed("internal error".into())
    }
}

#[interface(name = "org.facelock.Facelock1")]
impl FacelockService {
    /// Register a new identity. Returns a pending-enrollment token for the
    /// optional face capture step.
    async fn register(&self, user: &str, password: &str) -> zbus::fdo::Result<String> {
        match self.credentials.register(user, password) {
            Ok(()) => {
                let token = self.pending.issue(user);
                tracing::info!(user, "registered, enrollment token issued");
                Ok(token.to_string())
            }
            Err(
                err @ (CredentialError::Identity(_)
                | CredentialError::PasswordTooShort
                | CredentialError::AlreadyRegistered { .. }),
            ) => Err(zbus::fdo::Error::InvalidArgs(err.to_string())),
            Err(err) => Err(self.map_hard_failure(&AuthError::Credentials(err))),
        }
    }

    /// Capture a reference face for a pending enrollment.
    async fn enroll_face(&self, token: &str, image_b64: &str) -> zbus::fdo::Result<String> {
        let image = self.decode_capture(image_b64)?;

        match self.engine.enroll(token.to_string(), image).await {
            Ok(user) => Ok(serde_json::json!({
                "enrolled": true,
                "user": user,
            })
            .to_string()),
            Err(err @ (AuthError::NoPendingEnrollment | AuthError::UnknownIdentity { .. })) => {
                Err(zbus::fdo::Error::InvalidArgs(err.to_string()))
            }
            Err(AuthError::NoFaceDetected) => Ok(serde_json::json!({
                "enrolled": false,
                "reason": "no-face-detected",
                "retry": true,
            })
            .to_string()),
            Err(err) if err.is_hard() => Err(self.map_hard_failure(&err)),
            Err(err) => {
                tracing::info!(kind = %err, "enrollment capture unusable");
                Ok(serde_json::json!({
                    "enrolled": false,
                    "reason": "bad-capture",
                    "retry": true,
                })
                .to_string())
            }
        }
    }

    /// Skip the face capture step; the account stays password-only.
    async fn skip_enrollment(&self, token: &str) -> zbus::fdo::Result<bool> {
        let Ok(token) = Uuid::parse_str(token) else {
            return Ok(false);
        };
        Ok(self.pending.discard(&token))
    }

    /// Password login. On success opens a session interchangeable with the
    /// face path's.
    async fn login_password(&self, user: &str, password: &str) -> zbus::fdo::Result<String> {
        match self.credentials.verify_password(user, password) {
            Ok(true) => {
                let session = self.sessions.open(user);
                Ok(serde_json::json!({
                    "accepted": true,
                    "user": user,
                    "session": session.to_string(),
                })
                .to_string())
            }
            Ok(false) => Ok(serde_json::json!({
                "accepted": false,
                "reason": "wrong-password",
            })
            .to_string()),
            Err(CredentialError::UnknownIdentity { .. }) => Ok(serde_json::json!({
                "accepted": false,
                "reason": "unknown-user",
            })
            .to_string()),
            Err(err @ CredentialError::Identity(_)) => {
                Err(zbus::fdo::Error::InvalidArgs(err.to_string()))
            }
            Err(err) => Err(self.map_hard_failure(&AuthError::Credentials(err))),
        }
    }

    /// Face login. Pre-pipeline routing outcomes (unknown user, nothing
    /// enrolled) are surfaced distinctly; every other failure is the same
    /// generic rejection.
    async fn login_face(&self, user: &str, image_b64: &str) -> zbus::fdo::Result<String> {
        let image = self.decode_capture(image_b64)?;

        match self.engine.verify(user.to_string(), image).await {
            Ok(decision) => {
                let session = self.sessions.open(user);
                Ok(serde_json::json!({
                    "accepted": true,
                    "user": user,
                    "session": session.to_string(),
                    "similarity": decision.similarity,
                })
                .to_string())
            }
            Err(AuthError::UnknownIdentity { .. }) => Ok(serde_json::json!({
                "accepted": false,
                "reason": "unknown-user",
            })
            .to_string()),
            Err(AuthError::NotEnrolled { .. }) => Ok(serde_json::json!({
                "accepted": false,
                "reason": "not-enrolled",
                "hint": "use password login",
            })
            .to_string()),
            Err(err) if err.is_hard() => Err(self.map_hard_failure(&err)),
            Err(err) => {
                // Log the precise kind; the caller learns nothing about
                // which stage failed.
                tracing::info!(user, kind = %err, "face login rejected");
                Ok(serde_json::json!({
                    "accepted": false,
                    "reason": GENERIC_REJECTION,
                })
                .to_string())
            }
        }
    }

    /// Close a session. `false` when the token was not live.
    async fn logout(&self, session: &str) -> zbus::fdo::Result<bool> {
        let Ok(token) = Uuid::parse_str(session) else {
            return Ok(false);
        };
        Ok(self.sessions.close(&token))
    }

    /// Every registered identity with its enrollment state.
    async fn list_users(&self) -> zbus::fdo::Result<String> {
        let users = self
            .credentials
            .list()
            .map_err(|err| self.map_hard_failure(&AuthError::Credentials(err)))?;

        let records: Vec<serde_json::Value> = users
            .iter()
            .map(|user| {
                serde_json::json!({
                    "user": user,
                    "has_face": self.references.exists(user),
                })
            })
            .collect();

        Ok(serde_json::Value::Array(records).to_string())
    }

    /// Daemon status document.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let users = self
            .credentials
            .list()
            .map_err(|err| self.map_hard_failure(&AuthError::Credentials(err)))?;

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "users": users.len(),
            "max_capture_bytes": self.max_capture_bytes,
        })
        .to_string())
    }
}
