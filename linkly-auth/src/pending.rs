//! Deferred connection completion.
//!
//! A connect attempt made while the user is not logged in to Linkly still
//! finishes the provider-side steps; the backend parks the authorization
//! under a `code_id` and reports `auth_required`. The code id is stored here
//! per platform and replayed after login. Entries move NoPending -> Pending
//! -> (replay) -> NoPending, and a failed replay leaves the entry in place
//! for a manual retry rather than silently dropping it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::{ApiClient, ConnectedAccount};
use crate::error::Error;
use crate::platform::Platform;
use crate::storage::KeyValueStore;

/// Storage key prefix for pending connections.
const PENDING_KEY_PREFIX: &str = "pending_oauth_";

/// A provider-approved connection waiting for the user to log in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConnection {
    pub platform: Platform,
    pub code_id: String,
    pub stored_at: DateTime<Utc>,
}

/// Per-platform store of pending connections, at most one per platform
/// (last write wins).
#[derive(Clone)]
pub struct PendingStore {
    store: Arc<dyn KeyValueStore>,
}

impl PendingStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Record a pending connection, replacing any earlier one for the
    /// platform.
    pub async fn record(&self, platform: Platform, code_id: &str) -> Result<(), Error> {
        let pending = PendingConnection {
            platform,
            code_id: code_id.to_string(),
            stored_at: Utc::now(),
        };
        let value = serde_json::to_string(&pending).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: crate::error::ErrorKind::Storage(
                crate::error::StorageErrorKind::Serialization,
            ),
        })?;
        info!(%platform, "stored pending connection for completion after login");
        self.store.set(&Self::key(platform), &value).await
    }

    /// Read the pending connection for a platform, if any.
    pub async fn get(&self, platform: Platform) -> Result<Option<PendingConnection>, Error> {
        let value = self.store.get(&Self::key(platform)).await?;
        Ok(value.and_then(|v| serde_json::from_str(&v).ok()))
    }

    /// Remove the pending connection for a platform.
    pub async fn clear(&self, platform: Platform) -> Result<(), Error> {
        self.store.remove(&Self::key(platform)).await?;
        Ok(())
    }

    /// All pending connections, across every platform.
    pub async fn all(&self) -> Vec<PendingConnection> {
        let mut pending = Vec::new();
        for platform in Platform::ALL {
            match self.get(platform).await {
                Ok(Some(entry)) => pending.push(entry),
                Ok(None) => {}
                Err(e) => warn!(%platform, error = %e, "could not read pending connection"),
            }
        }
        pending
    }

    /// Replay every pending connection against the backend.
    ///
    /// Platforms are processed independently: one failure neither aborts the
    /// sweep nor surfaces to the caller. Successes are cleared and returned;
    /// failures are logged and their entries retained for retry.
    pub async fn complete_all(&self, api: &ApiClient) -> Vec<ConnectedAccount> {
        let mut connected = Vec::new();
        for pending in self.all().await {
            match api
                .complete_pending(pending.platform, &pending.code_id)
                .await
            {
                Ok(account) => {
                    if let Err(e) = self.clear(pending.platform).await {
                        warn!(
                            platform = %pending.platform,
                            error = %e,
                            "completed connection but could not clear pending entry"
                        );
                    }
                    info!(platform = %pending.platform, "completed pending connection");
                    connected.push(account);
                }
                Err(e) => {
                    warn!(
                        platform = %pending.platform,
                        error = %e,
                        "pending connection failed; entry retained for retry"
                    );
                }
            }
        }
        connected
    }

    fn key(platform: Platform) -> String {
        format!("{}{}", PENDING_KEY_PREFIX, platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::tokens::{AuthTokenPair, TokenManager};
    use serde_json::json;

    fn store() -> PendingStore {
        PendingStore::new(Arc::new(MemoryStore::new()))
    }

    async fn logged_in_api(base: &str) -> ApiClient {
        let tokens = Arc::new(TokenManager::new(Arc::new(MemoryStore::new())));
        tokens
            .store_pair(&AuthTokenPair::new("access".into(), "refresh".into()))
            .await
            .unwrap();
        ApiClient::new(Some(base), tokens).unwrap()
    }

    #[tokio::test]
    async fn test_record_and_get() {
        let pending = store();
        pending.record(Platform::Facebook, "code_1").await.unwrap();

        let entry = pending.get(Platform::Facebook).await.unwrap().unwrap();
        assert_eq!(entry.code_id, "code_1");
        assert_eq!(entry.platform, Platform::Facebook);
        assert!(pending.get(Platform::Twitter).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_last_write_wins_per_platform() {
        let pending = store();
        pending.record(Platform::Twitter, "first").await.unwrap();
        pending.record(Platform::Twitter, "second").await.unwrap();

        let entry = pending.get(Platform::Twitter).await.unwrap().unwrap();
        assert_eq!(entry.code_id, "second");
        assert_eq!(pending.all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_complete_all_isolates_partial_failure() {
        let mut server = mockito::Server::new_async().await;
        let _facebook_ok = server
            .mock("POST", "/auth/complete/facebook/")
            .with_status(200)
            .with_body(
                json!({
                    "success": true,
                    "account": { "id": "fb_9", "platform": "facebook" }
                })
                .to_string(),
            )
            .create_async()
            .await;
        let _twitter_down = server
            .mock("POST", "/auth/complete/twitter/")
            .with_status(400)
            .with_body(json!({ "success": false, "error": "expired_code" }).to_string())
            .create_async()
            .await;

        let pending = store();
        pending.record(Platform::Facebook, "code_fb").await.unwrap();
        pending.record(Platform::Twitter, "code_tw").await.unwrap();

        let api = logged_in_api(&server.url()).await;
        let connected = pending.complete_all(&api).await;

        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].id, "fb_9");
        // Facebook entry consumed, twitter retained for retry.
        assert!(pending.get(Platform::Facebook).await.unwrap().is_none());
        let retained = pending.get(Platform::Twitter).await.unwrap().unwrap();
        assert_eq!(retained.code_id, "code_tw");
    }

    #[tokio::test]
    async fn test_complete_all_with_nothing_pending() {
        let server = mockito::Server::new_async().await;
        let api = logged_in_api(&server.url()).await;
        assert!(store().complete_all(&api).await.is_empty());
    }
}
