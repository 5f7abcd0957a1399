//! Pending-enrollment tokens.
//!
//! Registration hands the caller a short-lived, single-use token that the
//! face-capture step redeems. This replaces ambient session state with an
//! explicit record, so the biometric flows carry no hidden dependency on a
//! web session object.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub identity: String,
    issued: Instant,
}

/// In-memory registry of pending enrollments with a fixed TTL.
pub struct PendingEnrollments {
    ttl: Duration,
    inner: Mutex<HashMap<Uuid, PendingRecord>>,
}

impl PendingEnrollments {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh token for `identity`. A second issue for the same
    /// identity creates an independent token; both honor the TTL.
    pub fn issue(&self, identity: &str) -> Uuid {
        let token = Uuid::new_v4();
        let mut inner = self.inner.lock().expect("pending registry poisoned");
        inner.insert(
            token,
            PendingRecord {
                identity: identity.to_string(),
                issued: Instant::now(),
            },
        );
        token
    }

    /// Redeem a token, removing it. `None` for unknown or expired tokens.
    pub fn redeem(&self, token: &Uuid) -> Option<PendingRecord> {
        let mut inner = self.inner.lock().expect("pending registry poisoned");
        inner.retain(|_, record| record.issued.elapsed() <= self.ttl);
        inner.remove(token)
    }

    /// Put a redeemed record back under the same token, preserving its
    /// original expiry. Used to refund a failed capture attempt.
    pub fn reinstate(&self, token: Uuid, record: PendingRecord) {
        let mut inner = self.inner.lock().expect("pending registry poisoned");
        inner.insert(token, record);
    }

    /// Drop a token without enrolling. `false` if it was unknown/expired.
    pub fn discard(&self, token: &Uuid) -> bool {
        self.redeem(token).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_then_redeem_returns_the_identity() {
        let pending = PendingEnrollments::new(Duration::from_secs(60));
        let token = pending.issue("ana");
        let record = pending.redeem(&token).unwrap();
        assert_eq!(record.identity, "ana");
    }

    #[test]
    fn tokens_are_single_use() {
        let pending = PendingEnrollments::new(Duration::from_secs(60));
        let token = pending.issue("ana");
        assert!(pending.redeem(&token).is_some());
        assert!(pending.redeem(&token).is_none());
    }

    #[test]
    fn unknown_token_does_not_redeem() {
        let pending = PendingEnrollments::new(Duration::from_secs(60));
        assert!(pending.redeem(&Uuid::new_v4()).is_none());
    }

    #[test]
    fn expired_token_does_not_redeem() {
        let pending = PendingEnrollments::new(Duration::from_millis(10));
        let token = pending.issue("ana");
        std::thread::sleep(Duration::from_millis(30));
        assert!(pending.redeem(&token).is_none());
    }

    #[test]
    fn reinstate_allows_a_retry() {
        let pending = PendingEnrollments::new(Duration::from_secs(60));
        let token = pending.issue("ana");
        let record = pending.redeem(&token).unwrap();
        pending.reinstate(token, record);
        assert_eq!(pending.redeem(&token).unwrap().identity, "ana");
    }

    #[test]
    fn discard_consumes_the_token() {
        let pending = PendingEnrollments::new(Duration::from_secs(60));
        let token = pending.issue("ana");
        assert!(pending.discard(&token));
        assert!(!pending.discard(&token));
    }
}
