//! Local HTTP listener for OAuth provider redirects.
//!
//! When a provider redirects back with `code` and `state`, this route
//! validates the live session, consumes the cached PKCE verifier, completes
//! the code exchange against the Linkly backend, and reports the outcome to
//! the message bridge the waiting flow is subscribed to.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use linkly_auth::api::{ApiClient, CallbackOutcome};
use linkly_auth::bridge::{IncomingMessage, MessageBridge};
use linkly_auth::error::{Error, ErrorKind, HttpErrorKind};
use linkly_auth::pkce::VerifierCache;
use linkly_auth::platform::Platform;
use linkly_auth::session::SessionStore;
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};

const CLOSE_PAGE: &str = "<!doctype html>\
<html><head><title>Linkly</title></head>\
<body><p>Authorization finished. You can close this window and return to Linkly.</p></body></html>";

/// Everything the callback route needs to settle a waiting flow.
#[derive(Clone)]
pub struct CallbackState {
    api: Arc<ApiClient>,
    bridge: MessageBridge,
    sessions: SessionStore,
    verifiers: VerifierCache,
    origin: String,
}

impl CallbackState {
    pub fn new(
        api: Arc<ApiClient>,
        bridge: MessageBridge,
        sessions: SessionStore,
        verifiers: VerifierCache,
        origin: String,
    ) -> Self {
        Self {
            api,
            bridge,
            sessions,
            verifiers,
            origin,
        }
    }
}

/// Query parameters a provider redirect may carry.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

pub fn router(state: CallbackState) -> Router {
    Router::new()
        .route("/auth/callback/{platform}", get(oauth_callback))
        .route("/auth/callback/{platform}/", get(oauth_callback))
        .with_state(state)
}

/// Bind the listener and serve the callback route in the background.
pub async fn spawn(
    state: CallbackState,
    interface: &str,
    port: u16,
) -> Result<tokio::task::JoinHandle<()>, Error> {
    let listener = tokio::net::TcpListener::bind((interface, port))
        .await
        .map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Http(HttpErrorKind::Network),
        })?;
    info!("OAuth callback listener on http://{}:{}", interface, port);

    let app = router(state);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("callback listener stopped: {e}");
        }
    }))
}

async fn oauth_callback(
    State(ctx): State<CallbackState>,
    Path(platform): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    match platform.parse::<Platform>() {
        Ok(platform) => {
            let payload = callback_payload(&ctx, platform, params).await;
            ctx.bridge.post(IncomingMessage {
                origin: ctx.origin.clone(),
                payload,
            });
        }
        Err(_) => warn!("callback for unsupported platform {platform:?}"),
    }
    Html(CLOSE_PAGE)
}

/// Turn a provider redirect into the message the waiting flow expects.
async fn callback_payload(
    ctx: &CallbackState,
    platform: Platform,
    params: CallbackParams,
) -> Value {
    if let Some(error) = params.error {
        let reason = params.error_description.unwrap_or(error);
        warn!("{platform} authorization denied: {reason}");
        return error_payload(platform, &reason);
    }

    let (code, state) = match (params.code, params.state) {
        (Some(code), Some(state)) => (code, state),
        _ => return error_payload(platform, "missing code or state"),
    };

    // The session must be live and is consumed here; a replayed or forged
    // callback finds nothing.
    if ctx.sessions.consume(&state).is_none() {
        warn!("{platform} callback carried an unknown or expired state");
        return error_payload(platform, "invalid_state");
    }

    let verifier = match ctx.verifiers.consume(&state).await {
        Ok(verifier) => verifier,
        Err(e) => {
            warn!("could not read cached verifier: {e}");
            None
        }
    };

    match ctx
        .api
        .complete_callback(
            platform,
            &code,
            &state,
            verifier.as_ref().map(|v| v.as_str()),
        )
        .await
    {
        Ok(CallbackOutcome::Connected(account)) => {
            let account = serde_json::to_value(&account).unwrap_or(Value::Null);
            json!({ "type": "OAUTH_SUCCESS", "platform": platform, "data": account })
        }
        Ok(CallbackOutcome::AuthRequired { code_id }) => json!({
            "type": "OAUTH_SUCCESS",
            "platform": platform,
            "data": { "auth_required": true, "code_id": code_id }
        }),
        Err(e) => {
            warn!("{platform} code exchange failed: {e}");
            error_payload(platform, &e.to_string())
        }
    }
}

fn error_payload(platform: Platform, reason: &str) -> Value {
    json!({ "type": "OAUTH_ERROR", "platform": platform, "error": reason })
}
