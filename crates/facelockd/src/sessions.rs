//! Authenticated sessions.
//!
//! Both login paths (password and face) converge here: success opens a
//! session token, and downstream consumers are agnostic about which path
//! produced it.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

pub struct SessionRegistry {
    inner: Mutex<HashMap<Uuid, String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Open a session for an authenticated identity.
    pub fn open(&self, identity: &str) -> Uuid {
        let token = Uuid::new_v4();
        let mut inner = self.inner.lock().expect("session registry poisoned");
        inner.insert(token, identity.to_string());
        tracing::info!(identity, "session opened");
        token
    }

    /// The identity behind a session token, if the session is live.
    pub fn resolve(&self, token: &Uuid) -> Option<String> {
        let inner = self.inner.lock().expect("session registry poisoned");
        inner.get(token).cloned()
    }

    /// Close a session. `false` when the token was not live.
    pub fn close(&self, token: &Uuid) -> bool {
        let mut inner = self.inner.lock().expect("session registry poisoned");
        inner.remove(token).is_some()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
