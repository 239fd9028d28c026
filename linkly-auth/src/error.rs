//! Error types for the `linkly-auth` crate.
//!
//! A root Error struct holds an error kind plus an optional source for
//! error chaining.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for linkly-auth.
/// Holds error kind and optional source for error chaining.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in linkly-auth.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Popup(PopupErrorKind),
    OAuth(OAuthErrorKind),
    Token(TokenErrorKind),
    Storage(StorageErrorKind),
    Config(ConfigErrorKind),
    Http(HttpErrorKind),
}

/// Errors from the authorization popup lifecycle.
#[derive(Debug, PartialEq)]
pub enum PopupErrorKind {
    /// The browser refused to open the popup. User-actionable: the caller
    /// should show instructions rather than swallow this.
    Blocked,
}

/// Errors from the OAuth connection flow itself.
#[derive(Debug, PartialEq)]
pub enum OAuthErrorKind {
    /// The user closed the authorization window before completing. Non-fatal;
    /// the flow can simply be re-initiated.
    Cancelled,
    /// The OAuth provider returned an error code (e.g. `access_denied`).
    Provider,
    /// The backend code exchange failed. Retryable by re-initiating the flow,
    /// never by resubmitting the same code.
    Exchange,
    /// The callback carried a `state` value with no live session.
    InvalidState,
    /// The attempt outlived its deadline.
    Timeout,
}

/// Errors from token management operations.
#[derive(Debug, PartialEq)]
pub enum TokenErrorKind {
    NotFound,
    Refresh,
}

/// Errors from key-value storage operations.
#[derive(Debug, PartialEq)]
pub enum StorageErrorKind {
    Io,
    Serialization,
    EncryptionFailed,
    DecryptionFailed,
}

/// Configuration errors. Fatal and developer-facing.
#[derive(Debug, PartialEq)]
pub enum ConfigErrorKind {
    MissingBaseUrl,
    UnsupportedPlatform,
    InvalidValue,
}

/// Errors from HTTP client operations.
#[derive(Debug, PartialEq)]
pub enum HttpErrorKind {
    BuilderFailed,
    RequestFailed,
    Network,
    InvalidResponse,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Popup(kind) => write!(f, "popup error: {:?}", kind),
            ErrorKind::OAuth(kind) => write!(f, "OAuth error: {:?}", kind),
            ErrorKind::Token(kind) => write!(f, "token error: {:?}", kind),
            ErrorKind::Storage(kind) => write!(f, "storage error: {:?}", kind),
            ErrorKind::Config(kind) => write!(f, "configuration error: {:?}", kind),
            ErrorKind::Http(kind) => write!(f, "HTTP error: {:?}", kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_builder() {
            ErrorKind::Http(HttpErrorKind::BuilderFailed)
        } else if err.is_request() {
            ErrorKind::Http(HttpErrorKind::RequestFailed)
        } else if err.is_decode() {
            ErrorKind::Http(HttpErrorKind::InvalidResponse)
        } else {
            ErrorKind::Http(HttpErrorKind::Network)
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<reqwest_middleware::Error> for Error {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(e) => e.into(),
            other => Error {
                source: Some(Box::new(other)),
                error_kind: ErrorKind::Http(HttpErrorKind::Network),
            },
        }
    }
}

/// Helper function to create popup errors.
pub fn popup_error(kind: PopupErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Popup(kind),
    }
}

/// Helper function to create OAuth flow errors.
pub fn oauth_error(kind: OAuthErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::OAuth(kind),
    }
}

/// Helper function to create token errors.
pub fn token_error(kind: TokenErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Token(kind),
    }
}

/// Helper function to create storage errors.
pub fn storage_error(kind: StorageErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Storage(kind),
    }
}

/// Helper function to create configuration errors.
pub fn config_error(kind: ConfigErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Config(kind),
    }
}
