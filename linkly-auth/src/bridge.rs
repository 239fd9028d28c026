//! Cross-window message bridge.
//!
//! The callback route (popup, redirect handler, or loopback server) reports
//! the outcome of an authorization attempt by posting a message; a flow
//! awaiting that attempt interprets the first trustworthy message tagged with
//! its platform. Unrelated traffic is common (other frames and extensions
//! post freely) and must be ignored without settling anything.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{oauth_error, Error, OAuthErrorKind};
use crate::platform::Platform;
use crate::popup::PopupHandle;

/// Capacity of the in-flight message buffer.
const CHANNEL_CAPACITY: usize = 64;

/// Raw message as delivered by the host, before any validation.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Origin the message arrived from, e.g. `https://app.linkly.io`.
    pub origin: String,
    /// Untyped payload; anything that is not a well-formed OAuth message is
    /// dropped silently.
    pub payload: Value,
}

/// Message types the bridge interprets. Everything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum MessageType {
    OauthSuccess,
    OauthError,
}

/// The subset of the payload the bridge understands.
#[derive(Debug, Deserialize)]
struct OAuthMessage {
    #[serde(rename = "type")]
    message_type: MessageType,
    platform: Platform,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// How one authorization attempt settled.
#[derive(Debug, Clone, PartialEq)]
pub enum OAuthOutcome {
    /// Provider auth and backend exchange both succeeded; `account` is the
    /// raw account payload, normalized by the caller at the API boundary.
    Success { account: Value },
    /// The backend requires the user to authenticate with Linkly first; the
    /// exchange is parked under `code_id` for deferred completion.
    AuthRequired { code_id: String },
    /// The provider or the exchange reported an error.
    Failure { reason: String },
}

/// Fallback reason when the provider gives none.
const GENERIC_FAILURE: &str = "oauth_failed";

/// Routes callback messages to waiting flows, keyed by platform.
///
/// Multiple flows may wait concurrently (one per platform); each sees every
/// message and keeps only the ones tagged with its platform, so a `twitter`
/// success can never settle a pending `facebook` wait.
#[derive(Clone)]
pub struct MessageBridge {
    allowed_origins: Arc<Vec<String>>,
    tx: broadcast::Sender<IncomingMessage>,
}

impl MessageBridge {
    /// Create a bridge trusting only the given origins.
    ///
    /// An empty allowlist trusts nothing: every message is dropped with a
    /// warning until the host configures its origins.
    pub fn new(allowed_origins: Vec<String>) -> Self {
        let allowed_origins = allowed_origins
            .into_iter()
            .map(|o| o.trim_end_matches('/').to_string())
            .collect();
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            allowed_origins: Arc::new(allowed_origins),
            tx,
        }
    }

    /// Deliver a message to every waiting flow.
    pub fn post(&self, message: IncomingMessage) {
        // Send only fails when nobody is waiting, which is fine: messages for
        // settled flows are meant to be dropped.
        let _ = self.tx.send(message);
    }

    /// Subscribe before opening the popup so no message can slip between
    /// opening and waiting.
    pub fn subscribe(&self) -> broadcast::Receiver<IncomingMessage> {
        self.tx.subscribe()
    }

    /// Wait for the outcome of the attempt for `platform`, on a subscription
    /// taken before the popup was opened.
    ///
    /// Settles exactly once, via whichever of these happens first:
    /// a trusted message for this platform, the popup closing (cancellation),
    /// or the deadline elapsing. When a message and a closure race within the
    /// same tick the message wins deterministically.
    pub async fn wait_on(
        &self,
        mut rx: broadcast::Receiver<IncomingMessage>,
        platform: Platform,
        popup: &PopupHandle,
        deadline: Duration,
    ) -> Result<OAuthOutcome, Error> {
        let closed = popup.closed();
        tokio::pin!(closed);
        let timeout = tokio::time::sleep(deadline);
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                // Biased so a buffered message beats a simultaneous closure.
                biased;
                message = rx.recv() => match message {
                    Ok(incoming) => {
                        if let Some(outcome) = self.interpret(platform, &incoming) {
                            return Ok(outcome);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%platform, skipped, "message bridge lagged; dropped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = &mut closed => {
                    return Err(oauth_error(
                        OAuthErrorKind::Cancelled,
                        &format!("{} authorization window closed before completion", platform),
                    ));
                }
                _ = &mut timeout => {
                    return Err(oauth_error(
                        OAuthErrorKind::Timeout,
                        &format!("{} authorization attempt exceeded its deadline", platform),
                    ));
                }
            }
        }

        // No more senders; only closure or the deadline can settle now.
        tokio::select! {
            _ = &mut closed => Err(oauth_error(
                OAuthErrorKind::Cancelled,
                &format!("{} authorization window closed before completion", platform),
            )),
            _ = &mut timeout => Err(oauth_error(
                OAuthErrorKind::Timeout,
                &format!("{} authorization attempt exceeded its deadline", platform),
            )),
        }
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        let origin = origin.trim_end_matches('/');
        self.allowed_origins.iter().any(|allowed| allowed == origin)
    }

    /// Decide whether a message settles the attempt for `platform`.
    ///
    /// Returns `None` for anything untrusted, malformed, or aimed at another
    /// platform; such messages never error and never settle.
    fn interpret(&self, platform: Platform, incoming: &IncomingMessage) -> Option<OAuthOutcome> {
        if !self.origin_allowed(&incoming.origin) {
            warn!(
                origin = %incoming.origin,
                "dropping message from untrusted origin"
            );
            return None;
        }

        let message: OAuthMessage = match serde_json::from_value(incoming.payload.clone()) {
            Ok(message) => message,
            // Unrelated postMessage traffic; not ours to judge.
            Err(_) => return None,
        };

        if message.platform != platform {
            debug!(
                got = %message.platform,
                waiting_for = %platform,
                "ignoring message for another platform"
            );
            return None;
        }

        Some(match message.message_type {
            MessageType::OauthError => OAuthOutcome::Failure {
                reason: message
                    .error
                    .unwrap_or_else(|| GENERIC_FAILURE.to_string()),
            },
            MessageType::OauthSuccess => {
                let data = message.data.unwrap_or(Value::Null);
                let auth_required = data
                    .get("auth_required")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if auth_required {
                    match data.get("code_id").and_then(Value::as_str) {
                        Some(code_id) => OAuthOutcome::AuthRequired {
                            code_id: code_id.to_string(),
                        },
                        None => OAuthOutcome::Failure {
                            reason: "auth_required without code_id".to_string(),
                        },
                    }
                } else {
                    OAuthOutcome::Success { account: data }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::popup::test_support::{MockOpener, MockWindow};
    use crate::popup::{open_auth_popup, AuthWindow};
    use serde_json::json;
    use url::Url;

    const ORIGIN: &str = "https://app.linkly.io";

    fn bridge() -> MessageBridge {
        MessageBridge::new(vec![ORIGIN.to_string()])
    }

    fn popup(platform: Platform) -> (Arc<MockWindow>, PopupHandle) {
        let window = MockWindow::open_window();
        let opener = MockOpener::with_window(Arc::clone(&window));
        let url = Url::parse("https://provider.example/oauth/authorize").unwrap();
        let handle = open_auth_popup(&opener, &url, platform).unwrap();
        (window, handle)
    }

    fn success_message(platform: &str, data: Value) -> IncomingMessage {
        IncomingMessage {
            origin: ORIGIN.to_string(),
            payload: json!({ "type": "OAUTH_SUCCESS", "platform": platform, "data": data }),
        }
    }

    #[tokio::test]
    async fn test_success_message_settles_with_account_payload() {
        let bridge = bridge();
        let (_window, handle) = popup(Platform::Twitter);
        let rx = bridge.subscribe();

        bridge.post(success_message("twitter", json!({ "account_id": 42 })));

        let outcome = bridge
            .wait_on(rx, Platform::Twitter, &handle, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            OAuthOutcome::Success {
                account: json!({ "account_id": 42 })
            }
        );
    }

    #[tokio::test]
    async fn test_error_message_maps_to_failure_with_verbatim_reason() {
        let bridge = bridge();
        let (_window, handle) = popup(Platform::Facebook);
        let rx = bridge.subscribe();

        bridge.post(IncomingMessage {
            origin: ORIGIN.to_string(),
            payload: json!({ "type": "OAUTH_ERROR", "platform": "facebook", "error": "access_denied" }),
        });

        let outcome = bridge
            .wait_on(rx, Platform::Facebook, &handle, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            OAuthOutcome::Failure {
                reason: "access_denied".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_error_without_reason_falls_back_to_generic() {
        let bridge = bridge();
        let (_window, handle) = popup(Platform::Instagram);
        let rx = bridge.subscribe();

        bridge.post(IncomingMessage {
            origin: ORIGIN.to_string(),
            payload: json!({ "type": "OAUTH_ERROR", "platform": "instagram" }),
        });

        let outcome = bridge
            .wait_on(rx, Platform::Instagram, &handle, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            OAuthOutcome::Failure {
                reason: "oauth_failed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_auth_required_maps_to_deferred_outcome() {
        let bridge = bridge();
        let (_window, handle) = popup(Platform::Youtube);
        let rx = bridge.subscribe();

        bridge.post(success_message(
            "youtube",
            json!({ "auth_required": true, "code_id": "code_789" }),
        ));

        let outcome = bridge
            .wait_on(rx, Platform::Youtube, &handle, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            OAuthOutcome::AuthRequired {
                code_id: "code_789".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unrelated_messages_are_ignored() {
        let bridge = bridge();
        let (_window, handle) = popup(Platform::Linkedin);
        let rx = bridge.subscribe();

        bridge.post(IncomingMessage {
            origin: ORIGIN.to_string(),
            payload: json!({ "type": "SET_THEME", "theme": "dark" }),
        });
        bridge.post(IncomingMessage {
            origin: ORIGIN.to_string(),
            payload: json!("not even an object"),
        });
        bridge.post(success_message("linkedin", json!({ "account_id": 7 })));

        let outcome = bridge
            .wait_on(rx, Platform::Linkedin, &handle, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(outcome, OAuthOutcome::Success { .. }));
    }

    #[tokio::test]
    async fn test_message_for_another_platform_does_not_cross_resolve() {
        let bridge = bridge();
        let (_window, handle) = popup(Platform::Facebook);
        let rx = bridge.subscribe();

        bridge.post(success_message("twitter", json!({ "account_id": 1 })));

        let waited = tokio::time::timeout(
            Duration::from_millis(100),
            bridge.wait_on(rx, Platform::Facebook, &handle, Duration::from_secs(60)),
        )
        .await;
        assert!(waited.is_err(), "twitter message must not settle facebook");
    }

    #[tokio::test]
    async fn test_untrusted_origin_is_dropped() {
        let bridge = bridge();
        let (_window, handle) = popup(Platform::Tiktok);
        let rx = bridge.subscribe();

        bridge.post(IncomingMessage {
            origin: "https://evil.example".to_string(),
            payload: json!({ "type": "OAUTH_SUCCESS", "platform": "tiktok", "data": {} }),
        });

        let waited = tokio::time::timeout(
            Duration::from_millis(100),
            bridge.wait_on(rx, Platform::Tiktok, &handle, Duration::from_secs(60)),
        )
        .await;
        assert!(waited.is_err(), "untrusted origin must not settle the flow");
    }

    #[tokio::test]
    async fn test_empty_allowlist_trusts_nothing() {
        let bridge = MessageBridge::new(Vec::new());
        let (_window, handle) = popup(Platform::Telegram);
        let rx = bridge.subscribe();

        bridge.post(success_message("telegram", json!({})));

        let waited = tokio::time::timeout(
            Duration::from_millis(100),
            bridge.wait_on(rx, Platform::Telegram, &handle, Duration::from_secs(60)),
        )
        .await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_popup_closure_cancels_the_flow() {
        let bridge = bridge();
        let (window, handle) = popup(Platform::Facebook);
        let rx = bridge.subscribe();

        window.close();
        let err = bridge
            .wait_on(rx, Platform::Facebook, &handle, Duration::from_secs(300))
            .await
            .unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::OAuth(OAuthErrorKind::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires_the_flow() {
        let bridge = bridge();
        let (_window, handle) = popup(Platform::Twitter);
        let rx = bridge.subscribe();

        let err = bridge
            .wait_on(rx, Platform::Twitter, &handle, Duration::from_secs(300))
            .await
            .unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::OAuth(OAuthErrorKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_beats_simultaneous_closure() {
        let bridge = bridge();
        let (window, handle) = popup(Platform::Instagram);
        let rx = bridge.subscribe();

        // Both a buffered message and a closed window are observable in the
        // same tick; the message must win.
        bridge.post(success_message("instagram", json!({ "account_id": 3 })));
        window.close();

        let outcome = bridge
            .wait_on(rx, Platform::Instagram, &handle, Duration::from_secs(300))
            .await
            .unwrap();
        assert!(matches!(outcome, OAuthOutcome::Success { .. }));
    }
}
