//! OAuth account-connection engine for the Linkly dashboard.
//!
//! This crate drives the popup-based flow that connects a user's social
//! accounts (Facebook, Instagram, Twitter, LinkedIn, YouTube, TikTok,
//! Telegram) through the Linkly backend:
//!
//! - [`platform`] names the supported platforms and resolves per-platform
//!   callback URLs.
//! - [`pkce`] caches PKCE verifiers keyed by the OAuth `state`.
//! - [`session`] correlates live authorization round-trips.
//! - [`popup`] owns the authorization window lifecycle behind host-provided
//!   traits.
//! - [`bridge`] routes callback messages to waiting flows and settles each
//!   attempt exactly once.
//! - [`connect`] ties the above into one connect operation.
//! - [`pending`] defers connections made before the user logged in.
//! - [`tokens`] and [`api`] handle backend auth tokens and endpoints.
//! - [`storage`] provides the key-value stores everything persists through.
//!
//! The provider-side OAuth exchange itself lives in the backend; this crate
//! is the client half of the handshake.

pub mod api;
pub mod bridge;
pub mod connect;
pub mod error;
pub mod http;
pub mod pending;
pub mod pkce;
pub mod platform;
pub mod popup;
pub mod session;
pub mod storage;
pub mod tokens;

pub use error::{Error, ErrorKind};
