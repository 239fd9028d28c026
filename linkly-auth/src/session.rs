//! OAuth session correlation keyed by the `state` parameter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::platform::Platform;

/// State held for one OAuth round-trip, from `/auth/init` to the callback.
#[derive(Debug, Clone)]
pub struct OAuthSession {
    pub platform: Platform,
    pub state: String,
    pub code_verifier: Option<String>,
    pub redirect_uri: String,
    pub created_at: DateTime<Utc>,
}

impl OAuthSession {
    pub fn new(
        platform: Platform,
        state: String,
        code_verifier: Option<String>,
        redirect_uri: String,
    ) -> Self {
        Self {
            platform,
            state,
            code_verifier,
            redirect_uri,
            created_at: Utc::now(),
        }
    }
}

/// Store of live OAuth sessions with expiration.
///
/// At most one live session exists per `state` value; inserting again under
/// the same state replaces the previous session. Sessions are consumed
/// destructively when the callback arrives, so a replayed callback finds
/// nothing.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, OAuthSession>>>,
    ttl: Duration,
}

impl SessionStore {
    /// Create a session store with the default TTL of 10 minutes.
    pub fn new() -> Self {
        Self::with_ttl(Duration::minutes(10))
    }

    /// Create a session store with a TTL given in seconds.
    pub fn with_ttl_secs(secs: i64) -> Self {
        Self::with_ttl(Duration::seconds(secs))
    }

    /// Create a session store with a custom TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Register a session under its `state` key, replacing any previous one.
    pub fn insert(&self, session: OAuthSession) {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(session.state.clone(), session);
    }

    /// Validate and consume the session for a `state`.
    ///
    /// Removes the session and returns it if it exists and has not expired.
    /// Expired sessions are removed and reported as absent.
    pub fn consume(&self, state: &str) -> Option<OAuthSession> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.remove(state)?;
        if Utc::now() - session.created_at > self.ttl {
            return None;
        }
        Some(session)
    }

    /// Drop expired sessions. Called opportunistically by long-running hosts.
    pub fn cleanup_expired(&self) {
        let mut sessions = self.sessions.lock().unwrap();
        let now = Utc::now();
        sessions.retain(|_, session| now - session.created_at <= self.ttl);
    }

    /// Number of live (possibly expired, not yet swept) sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
