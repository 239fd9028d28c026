//! Social platform identifiers and callback URL resolution.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{config_error, ConfigErrorKind, Error};

/// Social platforms a Linkly account can be connected to.
///
/// This enumeration is closed: the backend rejects anything outside it, so
/// there is deliberately no `Other(String)` escape hatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Facebook,
    Instagram,
    Twitter,
    Linkedin,
    Youtube,
    Tiktok,
    Telegram,
}

impl Platform {
    /// All supported platforms, in display order.
    pub const ALL: [Platform; 7] = [
        Platform::Facebook,
        Platform::Instagram,
        Platform::Twitter,
        Platform::Linkedin,
        Platform::Youtube,
        Platform::Tiktok,
        Platform::Telegram,
    ];

    /// Get the platform identifier string used in URLs and storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Twitter => "twitter",
            Platform::Linkedin => "linkedin",
            Platform::Youtube => "youtube",
            Platform::Tiktok => "tiktok",
            Platform::Telegram => "telegram",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(value: &str) -> Result<Platform, Self::Err> {
        match value.to_lowercase().as_str() {
            "facebook" => Ok(Platform::Facebook),
            "instagram" => Ok(Platform::Instagram),
            "twitter" => Ok(Platform::Twitter),
            "linkedin" => Ok(Platform::Linkedin),
            "youtube" => Ok(Platform::Youtube),
            "tiktok" => Ok(Platform::Tiktok),
            "telegram" => Ok(Platform::Telegram),
            other => Err(config_error(
                ConfigErrorKind::UnsupportedPlatform,
                &format!("unknown platform '{}'", other),
            )),
        }
    }
}

/// Resolve the registered OAuth callback URL for a platform.
///
/// Deterministic, pure function of the platform and the configured base URL.
/// The URL is built from a parsed [`Url`], so each component is encoded exactly
/// once regardless of how many times the result is serialized. Twitter's
/// registration additionally requires a `platform=twitter` query parameter on
/// the callback.
///
/// Fails with a configuration error when no base URL is configured or the
/// configured value does not parse.
pub fn resolve_callback_url(base_url: Option<&str>, platform: Platform) -> Result<Url, Error> {
    let base = base_url.ok_or_else(|| {
        config_error(
            ConfigErrorKind::MissingBaseUrl,
            "no callback base URL configured",
        )
    })?;

    let mut url = Url::parse(base).map_err(|e| Error {
        source: Some(Box::new(e)),
        error_kind: crate::error::ErrorKind::Config(ConfigErrorKind::InvalidValue),
    })?;

    {
        let mut segments = url.path_segments_mut().map_err(|_| {
            config_error(
                ConfigErrorKind::InvalidValue,
                "callback base URL cannot be a base",
            )
        })?;
        segments.pop_if_empty();
        segments.push("auth");
        segments.push("callback");
        segments.push(platform.as_str());
        // Trailing slash, matching the backend's route registration.
        segments.push("");
    }

    if platform == Platform::Twitter {
        url.query_pairs_mut()
            .append_pair("platform", Platform::Twitter.as_str());
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_resolver_is_deterministic() {
        for platform in Platform::ALL {
            let first = resolve_callback_url(Some("https://app.linkly.io"), platform).unwrap();
            let second = resolve_callback_url(Some("https://app.linkly.io"), platform).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_resolver_builds_platform_path() {
        let url = resolve_callback_url(Some("https://app.linkly.io"), Platform::Facebook).unwrap();
        assert_eq!(url.as_str(), "https://app.linkly.io/auth/callback/facebook/");
    }

    #[test]
    fn test_twitter_gets_extra_query_parameter() {
        let url = resolve_callback_url(Some("https://app.linkly.io"), Platform::Twitter).unwrap();
        assert_eq!(
            url.as_str(),
            "https://app.linkly.io/auth/callback/twitter/?platform=twitter"
        );
    }

    #[test]
    fn test_twitter_url_is_never_double_encoded() {
        let url = resolve_callback_url(Some("https://app.linkly.io"), Platform::Twitter).unwrap();
        // Re-serializing the parsed URL must not re-encode anything.
        let reparsed = Url::parse(url.as_str()).unwrap();
        assert_eq!(reparsed.as_str(), url.as_str());
        assert!(!url.as_str().contains("%25"));
    }

    #[test]
    fn test_missing_base_url_is_a_configuration_error() {
        let err = resolve_callback_url(None, Platform::Facebook).unwrap_err();
        assert_eq!(
            err.error_kind,
            ErrorKind::Config(ConfigErrorKind::MissingBaseUrl)
        );
    }

    #[test]
    fn test_base_url_with_path_is_respected() {
        let url =
            resolve_callback_url(Some("https://linkly.io/api/"), Platform::Youtube).unwrap();
        assert_eq!(url.as_str(), "https://linkly.io/api/auth/callback/youtube/");
    }

    #[test]
    fn test_platform_round_trips_through_from_str() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
        assert!("myspace".parse::<Platform>().is_err());
    }
}
