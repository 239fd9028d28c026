//! PKCE (Proof Key for Code Exchange) verifier caching, RFC 7636.
//!
//! The backend issues the code verifier during `/auth/init` and derives the
//! challenge itself; the client's job is custody. The verifier is parked in a
//! session-scoped cache keyed by the OAuth `state` parameter and consumed
//! destructively exactly once, so a reloaded callback page can never replay
//! it.

use std::sync::Arc;

use crate::error::Error;
use crate::storage::KeyValueStore;

/// Storage key prefix for cached verifiers.
const VERIFIER_KEY_PREFIX: &str = "pkce_verifier_";

/// PKCE code verifier (opaque random string, 43-128 characters).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verifier(String);

impl Verifier {
    /// Wrap a verifier issued by the backend.
    pub fn from_string(verifier: String) -> Self {
        Self(verifier)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Session-scoped cache associating an OAuth `state` with its code verifier.
///
/// Backed by a [`KeyValueStore`] under `pkce_verifier_<state>` keys. The cache
/// should always be given a session-lifetime store; verifiers must never be
/// persisted beyond the process.
#[derive(Clone)]
pub struct VerifierCache {
    store: Arc<dyn KeyValueStore>,
}

impl VerifierCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Associate a verifier with a `state` value for one OAuth round-trip.
    pub async fn store(&self, state: &str, verifier: &Verifier) -> Result<(), Error> {
        self.store
            .set(&Self::key(state), verifier.as_str())
            .await
    }

    /// Destructively consume the verifier for a `state`.
    ///
    /// Returns `None` when no verifier was cached (or it was already
    /// consumed); the entry is removed either way, guaranteeing at-most-once
    /// use per authorization attempt.
    pub async fn consume(&self, state: &str) -> Result<Option<Verifier>, Error> {
        Ok(self
            .store
            .remove(&Self::key(state))
            .await?
            .map(Verifier::from_string))
    }

    fn key(state: &str) -> String {
        format!("{}{}", VERIFIER_KEY_PREFIX, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_consume_returns_verifier_exactly_once() {
        let cache = VerifierCache::new(Arc::new(MemoryStore::new()));
        let verifier = Verifier::from_string("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".into());
        cache.store("twitter_xyz", &verifier).await.unwrap();

        let first = cache.consume("twitter_xyz").await.unwrap();
        assert_eq!(first, Some(verifier));

        let second = cache.consume("twitter_xyz").await.unwrap();
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn test_consume_unknown_state_returns_none() {
        let cache = VerifierCache::new(Arc::new(MemoryStore::new()));
        assert_eq!(cache.consume("never_stored").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_states_do_not_collide() {
        let cache = VerifierCache::new(Arc::new(MemoryStore::new()));
        let a = Verifier::from_string("verifier_a".to_string());
        let b = Verifier::from_string("verifier_b".to_string());
        cache.store("state_a", &a).await.unwrap();
        cache.store("state_b", &b).await.unwrap();

        assert_eq!(cache.consume("state_a").await.unwrap(), Some(a));
        assert_eq!(cache.consume("state_b").await.unwrap(), Some(b));
    }
}
