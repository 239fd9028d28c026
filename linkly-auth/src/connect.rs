//! The account connection flow.
//!
//! Wires the pieces together: resolve the callback URL, ask the backend for
//! an authorization URL, park the PKCE verifier and session state, open the
//! popup, wait on the message bridge, and either hand back a connected
//! account or defer the connection until the user logs in.
//!
//! Attempts are independent per platform: each gets its own popup, poll
//! timer, and bridge subscription, correlated by the backend-issued `state`,
//! so concurrent flows for different platforms cannot interfere.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use url::Url;

use crate::api::{normalize_account, ApiClient, ConnectedAccount};
use crate::bridge::{MessageBridge, OAuthOutcome};
use crate::error::{oauth_error, Error, ErrorKind, HttpErrorKind, OAuthErrorKind};
use crate::pending::PendingStore;
use crate::pkce::{Verifier, VerifierCache};
use crate::platform::{resolve_callback_url, Platform};
use crate::popup::{open_auth_popup, WindowOpener};
use crate::session::{OAuthSession, SessionStore};

/// Default per-attempt deadline.
pub const DEFAULT_ATTEMPT_DEADLINE: Duration = Duration::from_secs(300);

/// Connection flow settings.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Base URL the per-platform callback URLs are resolved against.
    pub callback_base_url: Option<String>,
    /// Deadline applied uniformly to every attempt.
    pub attempt_deadline: Duration,
    /// Ask the backend to use its own app credentials for the provider.
    pub use_client_credentials: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            callback_base_url: None,
            attempt_deadline: DEFAULT_ATTEMPT_DEADLINE,
            use_client_credentials: false,
        }
    }
}

/// How a connect attempt ended, short of an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    /// The account is connected and the backend returned its record.
    Connected(ConnectedAccount),
    /// Provider auth succeeded but the user must log in to Linkly; the
    /// connection is stored for deferred completion.
    Deferred { code_id: String },
}

/// Drives OAuth connection flows against the Linkly backend.
pub struct AccountConnector {
    api: Arc<ApiClient>,
    opener: Arc<dyn WindowOpener>,
    bridge: MessageBridge,
    sessions: SessionStore,
    verifiers: VerifierCache,
    pending: PendingStore,
    config: ConnectorConfig,
}

impl AccountConnector {
    pub fn new(
        api: Arc<ApiClient>,
        opener: Arc<dyn WindowOpener>,
        bridge: MessageBridge,
        sessions: SessionStore,
        verifiers: VerifierCache,
        pending: PendingStore,
        config: ConnectorConfig,
    ) -> Self {
        Self {
            api,
            opener,
            bridge,
            sessions,
            verifiers,
            pending,
            config,
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn bridge(&self) -> &MessageBridge {
        &self.bridge
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn verifiers(&self) -> &VerifierCache {
        &self.verifiers
    }

    pub fn pending(&self) -> &PendingStore {
        &self.pending
    }

    /// Run one full connect attempt for `platform`.
    pub async fn connect(&self, platform: Platform) -> Result<ConnectOutcome, Error> {
        let redirect_uri =
            resolve_callback_url(self.config.callback_base_url.as_deref(), platform)?;
        let init = self
            .api
            .auth_init(platform, &redirect_uri, self.config.use_client_credentials)
            .await?;

        let auth_url = Url::parse(&init.auth_url).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Http(HttpErrorKind::InvalidResponse),
        })?;

        // Park the verifier only when the backend issued one; a flow without
        // PKCE writes nothing to the cache.
        if let Some(verifier) = &init.code_verifier {
            self.verifiers
                .store(&init.state, &Verifier::from_string(verifier.clone()))
                .await?;
        }
        self.sessions.insert(OAuthSession::new(
            platform,
            init.state.clone(),
            init.code_verifier.clone(),
            redirect_uri.to_string(),
        ));

        // Subscribe before the popup exists so the callback cannot slip
        // between opening and waiting.
        let rx = self.bridge.subscribe();
        let popup = match open_auth_popup(self.opener.as_ref(), &auth_url, platform) {
            Ok(popup) => popup,
            Err(e) => {
                self.discard_attempt(&init.state).await;
                return Err(e);
            }
        };

        info!(%platform, state = %init.state, "authorization popup open, waiting for callback");
        let result = self
            .bridge
            .wait_on(rx, platform, &popup, self.config.attempt_deadline)
            .await;

        // The attempt has settled; whatever happened, nothing for this state
        // may survive, and the popup comes down with its poll timer.
        self.discard_attempt(&init.state).await;
        drop(popup);

        match result? {
            OAuthOutcome::Success { account } => {
                let account = normalize_account(Some(platform), &account)?;
                info!(%platform, account_id = %account.id, "account connected");
                Ok(ConnectOutcome::Connected(account))
            }
            OAuthOutcome::AuthRequired { code_id } => {
                self.pending.record(platform, &code_id).await?;
                Ok(ConnectOutcome::Deferred { code_id })
            }
            OAuthOutcome::Failure { reason } => {
                Err(oauth_error(OAuthErrorKind::Provider, &reason))
            }
        }
    }

    /// Replay all deferred connections after login. Failures are logged per
    /// platform and never propagate.
    pub async fn complete_all_pending(&self) -> Vec<ConnectedAccount> {
        self.pending.complete_all(&self.api).await
    }

    /// List connected accounts.
    pub async fn accounts(&self) -> Result<Vec<ConnectedAccount>, Error> {
        self.api.list_accounts().await
    }

    /// Disconnect an account by id.
    pub async fn disconnect(&self, account_id: &str) -> Result<(), Error> {
        self.api.disconnect(account_id).await
    }

    async fn discard_attempt(&self, state: &str) {
        self.sessions.consume(state);
        if let Err(e) = self.verifiers.consume(state).await {
            warn!(state, error = %e, "could not discard cached verifier");
        }
    }
}
