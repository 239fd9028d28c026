//! Command implementations wiring configuration to the connection engine.

use std::sync::Arc;
use std::time::Duration;

use linkly_auth::api::ApiClient;
use linkly_auth::bridge::MessageBridge;
use linkly_auth::connect::{AccountConnector, ConnectOutcome, ConnectorConfig};
use linkly_auth::error::Error;
use linkly_auth::pending::PendingStore;
use linkly_auth::pkce::VerifierCache;
use linkly_auth::platform::Platform;
use linkly_auth::popup::{AuthWindow, PopupGeometry, WindowOpener};
use linkly_auth::session::SessionStore;
use linkly_auth::storage::{FileStore, KeyValueStore, MemoryStore};
use linkly_auth::tokens::{AuthTokenPair, TokenManager};
use log::{info, warn};
use service::config::Config;
use url::Url;

use crate::callback::{self, CallbackState};
use crate::Command;

/// A tab in the user's default browser.
///
/// The system browser gives us no handle to observe or close the tab, so the
/// flow settles only through the callback or its deadline.
struct BrowserTab;

impl AuthWindow for BrowserTab {
    fn is_closed(&self) -> bool {
        false
    }

    fn close(&self) {}
}

struct BrowserOpener;

impl WindowOpener for BrowserOpener {
    fn screen_size(&self) -> (u32, u32) {
        (1920, 1080)
    }

    fn open(&self, url: &Url, _geometry: &PopupGeometry) -> Option<Arc<dyn AuthWindow>> {
        match open::that(url.as_str()) {
            Ok(()) => Some(Arc::new(BrowserTab)),
            Err(e) => {
                warn!("could not open the system browser: {e}");
                None
            }
        }
    }
}

pub async fn run(config: Config, command: Command) -> Result<(), Error> {
    let store: Arc<dyn KeyValueStore> = match config.storage_path() {
        Some(path) => Arc::new(FileStore::open(path, config.storage_encryption_key())?),
        None => Arc::new(MemoryStore::new()),
    };
    let tokens = Arc::new(TokenManager::new(Arc::clone(&store)));
    let api = Arc::new(ApiClient::new(
        config.api_base_url().as_deref(),
        Arc::clone(&tokens),
    )?);

    match command {
        Command::Login {
            access_token,
            refresh_token,
        } => {
            tokens
                .store_pair(&AuthTokenPair::new(access_token, refresh_token))
                .await?;
            info!("stored Linkly token pair");
            Ok(())
        }
        Command::Connect { platform } => connect(config, store, api, platform).await,
        Command::CompletePending => {
            let pending = PendingStore::new(store);
            let connected = pending.complete_all(&api).await;
            if connected.is_empty() {
                info!("no pending connections were completed");
            }
            for account in connected {
                info!("connected {} account {}", account.platform, account.id);
            }
            Ok(())
        }
        Command::Accounts => {
            let accounts = api.list_accounts().await?;
            if accounts.is_empty() {
                info!("no connected accounts");
            }
            for account in accounts {
                info!(
                    "{} account {} ({}, {:?})",
                    account.platform, account.id, account.account_type, account.status
                );
            }
            Ok(())
        }
        Command::Disconnect { account_id } => {
            api.disconnect(&account_id).await?;
            info!("disconnected account {account_id}");
            Ok(())
        }
    }
}

async fn connect(
    config: Config,
    store: Arc<dyn KeyValueStore>,
    api: Arc<ApiClient>,
    platform: Platform,
) -> Result<(), Error> {
    // The listener's own origin is always trusted; it is where the exchange
    // outcome gets posted from.
    let origin = format!("http://{}:{}", config.interface(), config.port);
    let mut allowed_origins = config.allowed_origins.clone();
    allowed_origins.push(origin.clone());

    let bridge = MessageBridge::new(allowed_origins);
    let sessions = SessionStore::with_ttl_secs(config.oauth_session_ttl_secs as i64);
    let verifiers = VerifierCache::new(Arc::new(MemoryStore::new()));
    let pending = PendingStore::new(Arc::clone(&store));

    let server = callback::spawn(
        CallbackState::new(
            Arc::clone(&api),
            bridge.clone(),
            sessions.clone(),
            verifiers.clone(),
            origin,
        ),
        config.interface(),
        config.port,
    )
    .await?;

    let connector = AccountConnector::new(
        api,
        Arc::new(BrowserOpener),
        bridge,
        sessions,
        verifiers,
        pending,
        ConnectorConfig {
            callback_base_url: Some(config.callback_base_url()),
            attempt_deadline: Duration::from_secs(config.attempt_deadline_secs),
            use_client_credentials: config.use_client_credentials,
        },
    );

    info!("connecting {platform}, finish the authorization in your browser");
    let result = connector.connect(platform).await;
    server.abort();

    match result? {
        ConnectOutcome::Connected(account) => {
            info!("connected {} account {}", account.platform, account.id);
        }
        ConnectOutcome::Deferred { code_id } => {
            info!(
                "provider approved the connection; log in to Linkly and run \
                 complete-pending to finish (code {code_id})"
            );
        }
    }
    Ok(())
}
