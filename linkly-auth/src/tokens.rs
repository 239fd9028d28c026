//! Host-app auth token management with single-flight refresh.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{token_error, Error, TokenErrorKind};
use crate::storage::KeyValueStore;

/// Persistent storage key for the access token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Persistent storage key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// The access/refresh token pair issued by the Linkly backend.
#[derive(Debug, Clone)]
pub struct AuthTokenPair {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
}

impl AuthTokenPair {
    pub fn new(access_token: String, refresh_token: String) -> Self {
        Self {
            access_token: SecretString::from(access_token),
            refresh_token: SecretString::from(refresh_token),
        }
    }
}

/// Exchanges a refresh token for a fresh pair. Implemented by the API client.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh_tokens(&self, refresh_token: &str) -> Result<AuthTokenPair, Error>;
}

/// Coordinates token reads, writes, and rotation.
///
/// Rotation is single-flight: concurrent 401s serialize on one async lock,
/// and the second waiter re-reads storage before refreshing so only one
/// network refresh ever fires. The new pair is fully written before the lock
/// releases, so queued requests never reuse half-rotated headers.
pub struct TokenManager {
    store: Arc<dyn KeyValueStore>,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Read the stored pair, if the user is logged in.
    pub async fn current(&self) -> Result<Option<AuthTokenPair>, Error> {
        let access = self.store.get(ACCESS_TOKEN_KEY).await?;
        let refresh = self.store.get(REFRESH_TOKEN_KEY).await?;
        Ok(match (access, refresh) {
            (Some(access), Some(refresh)) => Some(AuthTokenPair::new(access, refresh)),
            _ => None,
        })
    }

    /// Read just the access token.
    pub async fn access_token(&self) -> Result<Option<SecretString>, Error> {
        Ok(self.current().await?.map(|pair| pair.access_token))
    }

    /// Persist a pair, e.g. after login or registration.
    pub async fn store_pair(&self, pair: &AuthTokenPair) -> Result<(), Error> {
        self.store
            .set(REFRESH_TOKEN_KEY, pair.refresh_token.expose_secret())
            .await?;
        self.store
            .set(ACCESS_TOKEN_KEY, pair.access_token.expose_secret())
            .await
    }

    /// Destroy the stored pair, e.g. on logout.
    pub async fn clear(&self) -> Result<(), Error> {
        self.store.remove(ACCESS_TOKEN_KEY).await?;
        self.store.remove(REFRESH_TOKEN_KEY).await?;
        Ok(())
    }

    /// Rotate the pair after a request saw a 401 with `stale_access`.
    ///
    /// If another caller already rotated while we waited on the lock, the
    /// fresh access token is returned without a second network refresh. A
    /// failed refresh destroys the stored pair; the user must log in again.
    pub async fn refresh(
        &self,
        refresher: &dyn TokenRefresher,
        stale_access: &str,
    ) -> Result<SecretString, Error> {
        let _guard = self.refresh_lock.lock().await;

        let pair = self.current().await?.ok_or_else(|| {
            token_error(TokenErrorKind::NotFound, "no stored tokens to refresh")
        })?;

        if pair.access_token.expose_secret() != stale_access {
            debug!("tokens already rotated by a concurrent request");
            return Ok(pair.access_token);
        }

        match refresher
            .refresh_tokens(pair.refresh_token.expose_secret())
            .await
        {
            Ok(new_pair) => {
                self.store_pair(&new_pair).await?;
                debug!("token pair rotated");
                Ok(new_pair.access_token)
            }
            Err(e) => {
                // The refresh token is spent or rejected; keeping the pair
                // around would just replay the same failure.
                self.clear().await?;
                Err(Error {
                    source: Some(Box::new(e)),
                    error_kind: crate::error::ErrorKind::Token(TokenErrorKind::Refresh),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingRefresher {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingRefresher {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh_tokens(&self, _refresh_token: &str) -> Result<AuthTokenPair, Error> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(token_error(TokenErrorKind::Refresh, "refresh rejected"));
            }
            Ok(AuthTokenPair::new(
                format!("access_v{}", call + 2),
                format!("refresh_v{}", call + 2),
            ))
        }
    }

    fn manager() -> TokenManager {
        TokenManager::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_store_and_read_pair() {
        let manager = manager();
        manager
            .store_pair(&AuthTokenPair::new("a1".into(), "r1".into()))
            .await
            .unwrap();

        let pair = manager.current().await.unwrap().unwrap();
        assert_eq!(pair.access_token.expose_secret(), "a1");
        assert_eq!(pair.refresh_token.expose_secret(), "r1");
    }

    #[tokio::test]
    async fn test_clear_destroys_pair() {
        let manager = manager();
        manager
            .store_pair(&AuthTokenPair::new("a1".into(), "r1".into()))
            .await
            .unwrap();
        manager.clear().await.unwrap();
        assert!(manager.current().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_single_flight() {
        let manager = Arc::new(manager());
        manager
            .store_pair(&AuthTokenPair::new("a1".into(), "r1".into()))
            .await
            .unwrap();
        let refresher = Arc::new(CountingRefresher::new(false));

        let (first, second) = tokio::join!(
            {
                let manager = Arc::clone(&manager);
                let refresher = Arc::clone(&refresher);
                async move { manager.refresh(refresher.as_ref(), "a1").await }
            },
            {
                let manager = Arc::clone(&manager);
                let refresher = Arc::clone(&refresher);
                async move { manager.refresh(refresher.as_ref(), "a1").await }
            },
        );

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.unwrap().expose_secret(), "access_v2");
        assert_eq!(second.unwrap().expose_secret(), "access_v2");
    }

    #[tokio::test]
    async fn test_refresh_failure_destroys_pair() {
        let manager = manager();
        manager
            .store_pair(&AuthTokenPair::new("a1".into(), "r1".into()))
            .await
            .unwrap();
        let refresher = CountingRefresher::new(true);

        let err = manager.refresh(&refresher, "a1").await.unwrap_err();
        assert_eq!(
            err.error_kind,
            crate::error::ErrorKind::Token(TokenErrorKind::Refresh)
        );
        assert!(manager.current().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_without_tokens_is_not_found() {
        let manager = manager();
        let refresher = CountingRefresher::new(false);
        let err = manager.refresh(&refresher, "stale").await.unwrap_err();
        assert_eq!(
            err.error_kind,
            crate::error::ErrorKind::Token(TokenErrorKind::NotFound)
        );
    }
}
