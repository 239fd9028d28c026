//! Typed client for the Linkly backend's auth and account endpoints.
//!
//! The backend is an opaque collaborator: this client does not implement the
//! provider-side OAuth exchange, it only drives `/auth/init`,
//! `/auth/callback/<platform>/`, and the account CRUD the dashboard needs.
//! Response shapes from older backend revisions are duck-typed (`type` vs
//! `_type`, numeric vs string ids); they are normalized here, once, so the
//! fallback chains never reach business logic.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::{
    config_error, oauth_error, token_error, ConfigErrorKind, Error, ErrorKind, HttpErrorKind,
    OAuthErrorKind, TokenErrorKind,
};
use crate::http::{HttpClient, HttpClientBuilder};
use crate::platform::Platform;
use crate::tokens::{AuthTokenPair, TokenManager, TokenRefresher};

/// Response of `GET /auth/init/`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthInitResponse {
    pub auth_url: String,
    pub state: String,
    #[serde(default)]
    pub code_verifier: Option<String>,
}

/// Raw response of the callback and pending-completion endpoints.
#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    account: Option<Value>,
    #[serde(default)]
    auth_required: Option<bool>,
    #[serde(default)]
    code_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Result of a backend code exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Connected(ConnectedAccount),
    /// The user must log in to Linkly before the connection can complete.
    AuthRequired { code_id: String },
}

/// Connection health of a server-owned account record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Connected,
    TokenExpired,
    Error,
}

/// A connected social account, in canonical shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectedAccount {
    pub id: String,
    pub platform: Platform,
    pub account_type: String,
    pub status: AccountStatus,
    pub profile: Value,
}

/// Account payload as older and newer backend revisions emit it.
#[derive(Debug, Deserialize)]
struct RawAccount {
    #[serde(default, alias = "account_id")]
    id: Option<Value>,
    #[serde(default)]
    platform: Option<Platform>,
    #[serde(default, rename = "type", alias = "_type", alias = "account_type")]
    account_type: Option<String>,
    #[serde(default)]
    status: Option<AccountStatus>,
    #[serde(default)]
    profile: Option<Value>,
}

/// Normalize a raw account payload into the one canonical shape.
///
/// `platform_hint` supplies the platform for payloads that omit it (e.g. a
/// callback response, where the flow already knows which platform it is
/// completing).
pub fn normalize_account(
    platform_hint: Option<Platform>,
    data: &Value,
) -> Result<ConnectedAccount, Error> {
    let raw: RawAccount = serde_json::from_value(data.clone()).map_err(|e| Error {
        source: Some(Box::new(e)),
        error_kind: ErrorKind::Http(HttpErrorKind::InvalidResponse),
    })?;

    let id = raw.id.ok_or_else(|| Error {
        source: Some("account payload missing id".to_string().into()),
        error_kind: ErrorKind::Http(HttpErrorKind::InvalidResponse),
    })?;
    let id = id
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| id.to_string());

    let platform = raw.platform.or(platform_hint).ok_or_else(|| Error {
        source: Some("account payload missing platform".to_string().into()),
        error_kind: ErrorKind::Http(HttpErrorKind::InvalidResponse),
    })?;

    Ok(ConnectedAccount {
        id,
        platform,
        account_type: raw.account_type.unwrap_or_else(|| "personal".to_string()),
        status: raw.status.unwrap_or(AccountStatus::Connected),
        profile: raw.profile.unwrap_or(Value::Null),
    })
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(alias = "access")]
    access_token: String,
    #[serde(alias = "refresh")]
    refresh_token: String,
}

/// Client for the Linkly backend.
pub struct ApiClient {
    base_url: Url,
    http: HttpClient,
    tokens: Arc<TokenManager>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a client for the configured backend base URL.
    ///
    /// Fails with a configuration error when no base URL is configured. The
    /// base URL is explicit configuration; the client never probes endpoint
    /// availability at runtime.
    pub fn new(base_url: Option<&str>, tokens: Arc<TokenManager>) -> Result<Self, Error> {
        let base = base_url.ok_or_else(|| {
            config_error(ConfigErrorKind::MissingBaseUrl, "no API base URL configured")
        })?;
        // Normalize to a trailing slash so Url::join keeps the full path.
        let base = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{}/", base)
        };
        let base_url = Url::parse(&base).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Config(ConfigErrorKind::InvalidValue),
        })?;

        Ok(Self {
            base_url,
            http: HttpClientBuilder::new().build()?,
            tokens,
        })
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.base_url.join(path).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Config(ConfigErrorKind::InvalidValue),
        })
    }

    /// `GET /auth/init/`: ask the backend to prepare an authorization URL.
    pub async fn auth_init(
        &self,
        platform: Platform,
        redirect_uri: &Url,
        use_client_credentials: bool,
    ) -> Result<AuthInitResponse, Error> {
        let mut url = self.endpoint("auth/init/")?;
        url.query_pairs_mut()
            .append_pair("platform", platform.as_str())
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair(
                "use_client_credentials",
                if use_client_credentials { "true" } else { "false" },
            );

        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(oauth_error(
                OAuthErrorKind::Exchange,
                &format!("auth init failed with status {}", response.status()),
            ));
        }
        let init: AuthInitResponse = response.json().await?;
        debug!(%platform, state = %init.state, "received authorization URL");
        Ok(init)
    }

    /// `GET /auth/callback/<platform>/`: exchange an authorization code.
    pub async fn complete_callback(
        &self,
        platform: Platform,
        code: &str,
        state: &str,
        code_verifier: Option<&str>,
    ) -> Result<CallbackOutcome, Error> {
        let mut url = self.endpoint(&format!("auth/callback/{}/", platform))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("code", code).append_pair("state", state);
            if let Some(verifier) = code_verifier {
                pairs.append_pair("code_verifier", verifier);
            }
        }

        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(oauth_error(
                OAuthErrorKind::Exchange,
                &format!("code exchange failed with status {}", response.status()),
            ));
        }

        let exchange: ExchangeResponse = response.json().await?;
        self.interpret_exchange(platform, exchange)
    }

    /// `POST /auth/complete/<platform>/`: replay a deferred connection.
    pub async fn complete_pending(
        &self,
        platform: Platform,
        code_id: &str,
    ) -> Result<ConnectedAccount, Error> {
        let url = self.endpoint(&format!("auth/complete/{}/", platform))?;
        let body = serde_json::json!({ "code_id": code_id });
        let response = self.authorized(Method::POST, url, Some(body)).await?;
        if !response.status().is_success() {
            return Err(oauth_error(
                OAuthErrorKind::Exchange,
                &format!(
                    "pending completion failed with status {}",
                    response.status()
                ),
            ));
        }

        let exchange: ExchangeResponse = response.json().await?;
        match self.interpret_exchange(platform, exchange)? {
            CallbackOutcome::Connected(account) => Ok(account),
            CallbackOutcome::AuthRequired { .. } => Err(oauth_error(
                OAuthErrorKind::Exchange,
                "backend still reports auth_required for a logged-in user",
            )),
        }
    }

    /// `GET /accounts/`: list connected accounts, normalized.
    pub async fn list_accounts(&self) -> Result<Vec<ConnectedAccount>, Error> {
        let url = self.endpoint("accounts/")?;
        let response = self.authorized(Method::GET, url, None).await?;
        if !response.status().is_success() {
            return Err(Error {
                source: Some(
                    format!("account listing failed with status {}", response.status()).into(),
                ),
                error_kind: ErrorKind::Http(HttpErrorKind::RequestFailed),
            });
        }

        let body: Value = response.json().await?;
        let entries = match &body {
            Value::Array(entries) => entries.as_slice(),
            Value::Object(map) => map
                .get("accounts")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
            _ => &[],
        };

        let mut accounts = Vec::with_capacity(entries.len());
        for entry in entries {
            match normalize_account(None, entry) {
                Ok(account) => accounts.push(account),
                Err(e) => warn!(error = %e, "skipping malformed account record"),
            }
        }
        Ok(accounts)
    }

    /// `DELETE /accounts/<id>/`: disconnect an account.
    pub async fn disconnect(&self, account_id: &str) -> Result<(), Error> {
        let url = self.endpoint(&format!("accounts/{}/", account_id))?;
        let response = self.authorized(Method::DELETE, url, None).await?;
        if !response.status().is_success() {
            return Err(Error {
                source: Some(
                    format!("disconnect failed with status {}", response.status()).into(),
                ),
                error_kind: ErrorKind::Http(HttpErrorKind::RequestFailed),
            });
        }
        Ok(())
    }

    fn interpret_exchange(
        &self,
        platform: Platform,
        exchange: ExchangeResponse,
    ) -> Result<CallbackOutcome, Error> {
        if exchange.auth_required.unwrap_or(false) {
            let code_id = exchange.code_id.ok_or_else(|| {
                oauth_error(OAuthErrorKind::Exchange, "auth_required without code_id")
            })?;
            return Ok(CallbackOutcome::AuthRequired { code_id });
        }

        if !exchange.success {
            return Err(oauth_error(
                OAuthErrorKind::Exchange,
                exchange.error.as_deref().unwrap_or("code exchange failed"),
            ));
        }

        let account = exchange.account.ok_or_else(|| {
            oauth_error(OAuthErrorKind::Exchange, "successful exchange without account")
        })?;
        Ok(CallbackOutcome::Connected(normalize_account(
            Some(platform),
            &account,
        )?))
    }

    /// Send an authenticated request, rotating the token pair once on 401.
    async fn authorized(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> Result<reqwest::Response, Error> {
        let access = self.tokens.access_token().await?.ok_or_else(|| {
            token_error(TokenErrorKind::NotFound, "not logged in to Linkly")
        })?;

        let response = self
            .send_with_bearer(method.clone(), url.clone(), body.as_ref(), access.expose_secret())
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("request was rejected with 401, rotating tokens");
        let fresh = self.tokens.refresh(self, access.expose_secret()).await?;
        self.send_with_bearer(method, url, body.as_ref(), fresh.expose_secret())
            .await
    }

    async fn send_with_bearer(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        bearer: &str,
    ) -> Result<reqwest::Response, Error> {
        let mut request = self.http.request(method, url).bearer_auth(bearer);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }
}

#[async_trait]
impl TokenRefresher for ApiClient {
    async fn refresh_tokens(&self, refresh_token: &str) -> Result<AuthTokenPair, Error> {
        let url = self.endpoint("auth/refresh/")?;
        let body = serde_json::json!({ "refresh": refresh_token });
        let response = self.http.post(url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(token_error(
                TokenErrorKind::Refresh,
                &format!("token refresh rejected with status {}", response.status()),
            ));
        }
        let refreshed: RefreshResponse = response.json().await?;
        Ok(AuthTokenPair::new(
            refreshed.access_token,
            refreshed.refresh_token,
        ))
    }
}
