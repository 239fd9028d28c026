//! Authorization popup lifecycle.
//!
//! The engine never talks to a window system directly; hosts provide a
//! [`WindowOpener`] (a real browser popup, a system-browser shim, or a test
//! double). The controller owns the one closure-poll timer an attempt is
//! allowed, and releases it on every settlement path via `Drop`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;
use url::Url;

use crate::error::{popup_error, Error, PopupErrorKind};
use crate::platform::Platform;

/// Default popup width in pixels.
pub const DEFAULT_WIDTH: u32 = 600;
/// Default popup height in pixels.
pub const DEFAULT_HEIGHT: u32 = 700;
/// Interval between popup liveness checks.
pub const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Size and position of the authorization popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupGeometry {
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
}

impl PopupGeometry {
    /// Center a default-sized (600x700) popup on the given screen.
    pub fn centered(screen_width: u32, screen_height: u32) -> Self {
        Self::centered_with_size(screen_width, screen_height, DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }

    /// Center a popup of the given size on the given screen.
    pub fn centered_with_size(
        screen_width: u32,
        screen_height: u32,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            width,
            height,
            left: (screen_width.saturating_sub(width) / 2) as i32,
            top: (screen_height.saturating_sub(height) / 2) as i32,
        }
    }
}

/// A live authorization window.
///
/// `close` must be idempotent: the controller closes the window again on drop
/// regardless of how the flow settled.
pub trait AuthWindow: Send + Sync {
    /// Whether the user (or the window itself) has closed the window.
    fn is_closed(&self) -> bool;

    /// Close the window. No-op if already closed.
    fn close(&self);
}

/// Host-provided factory for authorization windows.
pub trait WindowOpener: Send + Sync {
    /// Current screen dimensions, used to center the popup.
    fn screen_size(&self) -> (u32, u32);

    /// Open a window at the given URL. Returns `None` when the environment
    /// refuses to open one (popup blocker).
    fn open(&self, url: &Url, geometry: &PopupGeometry) -> Option<Arc<dyn AuthWindow>>;
}

/// Handle to an open authorization popup.
///
/// Holds exactly one closure-poll timer; dropping the handle aborts the timer
/// and closes the window, so no path can leak either.
pub struct PopupHandle {
    platform: Platform,
    window: Arc<dyn AuthWindow>,
    closed_rx: watch::Receiver<bool>,
    poll_task: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for PopupHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PopupHandle")
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

impl PopupHandle {
    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn is_closed(&self) -> bool {
        self.window.is_closed()
    }

    /// Close the window now. The poll timer notices on its next tick.
    pub fn close(&self) {
        self.window.close();
    }

    /// Resolves when the user closes the popup.
    ///
    /// Never resolves spuriously: if the popup stays open this future stays
    /// pending, and the caller's deadline takes over.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
        // Poll task gone without reporting closure (handle being torn down);
        // stay pending and let the owner settle the flow.
        std::future::pending::<()>().await
    }
}

impl Drop for PopupHandle {
    fn drop(&mut self) {
        self.poll_task.abort();
        self.window.close();
    }
}

/// Open a centered authorization popup and start watching it for closure.
///
/// Fails with a popup-blocked error when the opener refuses the window or
/// hands back one that is already closed; in that case no timer has been
/// started and nothing needs cleanup. Must be called from within a tokio
/// runtime.
pub fn open_auth_popup(
    opener: &dyn WindowOpener,
    auth_url: &Url,
    platform: Platform,
) -> Result<PopupHandle, Error> {
    let (screen_width, screen_height) = opener.screen_size();
    let geometry = PopupGeometry::centered(screen_width, screen_height);

    let window = opener.open(auth_url, &geometry).ok_or_else(|| {
        popup_error(
            PopupErrorKind::Blocked,
            &format!("browser blocked the {} authorization popup", platform),
        )
    })?;

    if window.is_closed() {
        return Err(popup_error(
            PopupErrorKind::Blocked,
            &format!("{} authorization popup closed before it could load", platform),
        ));
    }

    debug!(%platform, "opened authorization popup");

    let (closed_tx, closed_rx) = watch::channel(false);
    let poll_window = Arc::clone(&window);
    let poll_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLOSE_POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if poll_window.is_closed() {
                let _ = closed_tx.send(true);
                break;
            }
        }
    });

    Ok(PopupHandle {
        platform,
        window,
        closed_rx,
        poll_task,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::{MockOpener, MockWindow};
    use super::*;
    use crate::error::ErrorKind;

    fn auth_url() -> Url {
        Url::parse("https://provider.example/oauth/authorize?state=abc").unwrap()
    }

    #[test]
    fn test_geometry_is_centered() {
        let geometry = PopupGeometry::centered(1920, 1080);
        assert_eq!(geometry.width, 600);
        assert_eq!(geometry.height, 700);
        assert_eq!(geometry.left, 660);
        assert_eq!(geometry.top, 190);
    }

    #[test]
    fn test_geometry_on_tiny_screen_does_not_underflow() {
        let geometry = PopupGeometry::centered(320, 480);
        assert_eq!(geometry.left, 0);
        assert_eq!(geometry.top, 0);
    }

    #[tokio::test]
    async fn test_blocked_popup_is_rejected_without_a_timer() {
        let opener = MockOpener::blocked();
        let err = open_auth_popup(&opener, &auth_url(), Platform::Facebook).unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Popup(PopupErrorKind::Blocked));
    }

    #[tokio::test]
    async fn test_window_closed_on_open_counts_as_blocked() {
        let window = MockWindow::open_window();
        window.close();
        let opener = MockOpener::with_window(window);
        let err = open_auth_popup(&opener, &auth_url(), Platform::Twitter).unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Popup(PopupErrorKind::Blocked));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closure_is_detected_by_polling() {
        let window = MockWindow::open_window();
        let opener = MockOpener::with_window(Arc::clone(&window));
        let handle = open_auth_popup(&opener, &auth_url(), Platform::Linkedin).unwrap();

        window.close();
        tokio::time::timeout(Duration::from_secs(5), handle.closed())
            .await
            .expect("closure should be observed within the poll interval");
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_future_stays_pending_while_window_open() {
        let window = MockWindow::open_window();
        let opener = MockOpener::with_window(Arc::clone(&window));
        let handle = open_auth_popup(&opener, &auth_url(), Platform::Youtube).unwrap();

        let waited = tokio::time::timeout(Duration::from_secs(10), handle.closed()).await;
        assert!(waited.is_err(), "open popup must not report closure");
    }

    #[tokio::test]
    async fn test_drop_closes_the_window() {
        let window = MockWindow::open_window();
        let opener = MockOpener::with_window(Arc::clone(&window));
        let handle = open_auth_popup(&opener, &auth_url(), Platform::Tiktok).unwrap();

        drop(handle);
        assert!(window.is_closed());
    }
}
