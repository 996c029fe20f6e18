//! Fetch configuration
//!
//! A [`FetchConfig`] is assembled from layers, lowest precedence first:
//! - `CARDPROXY_*` environment variables
//! - a TOML config file
//! - explicit overrides (CLI flags, builder calls)
//!
//! Each source produces a [`ConfigLayer`]; layers are overlaid and then
//! resolved into a validated config.

use crate::error::ConfigError;
use crate::types::CredentialsPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Environment variable holding the image endpoint
pub const ENV_BASE_URL: &str = "CARDPROXY_IMAGE_BASE_URL";
/// Environment variable holding the calling page's origin
pub const ENV_PAGE_ORIGIN: &str = "CARDPROXY_PAGE_ORIGIN";
/// Environment variable holding the credentials policy
pub const ENV_CREDENTIALS: &str = "CARDPROXY_CREDENTIALS";
/// Environment variable holding the request timeout in milliseconds
pub const ENV_TIMEOUT_MS: &str = "CARDPROXY_TIMEOUT_MS";
/// Environment variable holding the worker queue capacity
pub const ENV_QUEUE_CAPACITY: &str = "CARDPROXY_QUEUE_CAPACITY";

/// Default number of queued, not yet dispatched, requests
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Image fetch configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Endpoint that receives `?id=<identifier>`
    pub base_url: Url,
    /// Origin of the page the worker acts for
    #[serde(default)]
    pub page_origin: Option<Url>,
    /// When to attach credentials
    #[serde(default)]
    pub credentials: CredentialsPolicy,
    /// Whole-request timeout in milliseconds; none waits indefinitely
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Capacity of the worker's request queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl FetchConfig {
    /// Create configuration for an endpoint, defaults elsewhere
    #[inline]
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            page_origin: None,
            credentials: CredentialsPolicy::default(),
            timeout_ms: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Create configuration from an endpoint string
    ///
    /// # Errors
    /// - `ConfigError::InvalidUrl` if `base_url` does not parse
    pub fn parse(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(parse_url("base_url", base_url)?))
    }

    /// With page origin
    #[inline]
    #[must_use]
    pub fn with_page_origin(mut self, origin: Url) -> Self {
        self.page_origin = Some(origin);
        self
    }

    /// With credentials policy
    #[inline]
    #[must_use]
    pub fn with_credentials(mut self, policy: CredentialsPolicy) -> Self {
        self.credentials = policy;
        self
    }

    /// With request timeout
    ///
    /// Kept at millisecond precision; a non-zero timeout shorter than one
    /// millisecond is rounded up to one.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.timeout_ms = Some(if millis == 0 && !timeout.is_zero() { 1 } else { millis });
        self
    }

    /// With worker queue capacity
    #[inline]
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Request timeout, if any
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Load from `CARDPROXY_*` environment variables
    ///
    /// # Errors
    /// Any error of [`ConfigLayer::from_env`] or [`ConfigLayer::build`].
    pub fn from_env() -> Result<Self, ConfigError> {
        ConfigLayer::from_env()?.build()
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Any error of [`ConfigLayer::from_file`] or [`ConfigLayer::build`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        ConfigLayer::from_file(path)?.build()
    }

    /// Check settings the HTTP client and worker rely on
    ///
    /// # Errors
    /// - `ConfigError::UnsupportedScheme` unless the base URL is http(s)
    /// - `ConfigError::InvalidValue` for a zero queue capacity or timeout
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.base_url.scheme() {
            "http" | "https" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queue_capacity",
                value: "0".to_string(),
            });
        }

        if self.timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "timeout_ms",
                value: "0".to_string(),
            });
        }

        Ok(())
    }
}

/// One source's partial view of the configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    /// Endpoint that receives `?id=<identifier>`
    pub base_url: Option<Url>,
    /// Origin of the page the worker acts for
    pub page_origin: Option<Url>,
    /// When to attach credentials
    pub credentials: Option<CredentialsPolicy>,
    /// Whole-request timeout in milliseconds
    pub timeout_ms: Option<u64>,
    /// Capacity of the worker's request queue
    pub queue_capacity: Option<usize>,
}

impl ConfigLayer {
    /// Read the `CARDPROXY_*` environment variables
    ///
    /// # Errors
    /// See [`ConfigLayer::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a layer from a key lookup, unset keys stay empty
    ///
    /// # Errors
    /// - `ConfigError::InvalidUrl` for an unparsable URL variable
    /// - `ConfigError::InvalidValue` for an unparsable policy or number
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            let value = lookup(key).filter(|v| !v.trim().is_empty());
            if value.is_none() {
                debug!("{key} not set");
            }
            value
        };

        Ok(Self {
            base_url: var(ENV_BASE_URL)
                .map(|v| parse_url(ENV_BASE_URL, &v))
                .transpose()?,
            page_origin: var(ENV_PAGE_ORIGIN)
                .map(|v| parse_url(ENV_PAGE_ORIGIN, &v))
                .transpose()?,
            credentials: var(ENV_CREDENTIALS)
                .map(|v| parse_value(ENV_CREDENTIALS, &v))
                .transpose()?,
            timeout_ms: var(ENV_TIMEOUT_MS)
                .map(|v| parse_value(ENV_TIMEOUT_MS, &v))
                .transpose()?,
            queue_capacity: var(ENV_QUEUE_CAPACITY)
                .map(|v| parse_value(ENV_QUEUE_CAPACITY, &v))
                .transpose()?,
        })
    }

    /// Parse a TOML document
    ///
    /// # Errors
    /// - `ConfigError::Toml` on syntax errors, bad URLs or unknown keys
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file cannot be read
    /// - `ConfigError::Toml` if it does not parse
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "reading fetch config");
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Overlay `higher`, whose set fields win
    #[must_use]
    pub fn overlay(self, higher: ConfigLayer) -> Self {
        Self {
            base_url: higher.base_url.or(self.base_url),
            page_origin: higher.page_origin.or(self.page_origin),
            credentials: higher.credentials.or(self.credentials),
            timeout_ms: higher.timeout_ms.or(self.timeout_ms),
            queue_capacity: higher.queue_capacity.or(self.queue_capacity),
        }
    }

    /// Resolve into a validated config
    ///
    /// # Errors
    /// - `ConfigError::MissingBaseUrl` if no layer set the base URL
    /// - any error of [`FetchConfig::validate`]
    pub fn build(self) -> Result<FetchConfig, ConfigError> {
        let base_url = self.base_url.ok_or(ConfigError::MissingBaseUrl)?;

        let config = FetchConfig {
            base_url,
            page_origin: self.page_origin,
            credentials: self.credentials.unwrap_or_default(),
            timeout_ms: self.timeout_ms,
            queue_capacity: self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
        };
        config.validate()?;

        Ok(config)
    }
}

fn parse_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|source| ConfigError::InvalidUrl { key, source })
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_layer_reads_every_setting() {
        let layer = ConfigLayer::from_lookup(lookup(&[
            (ENV_BASE_URL, "https://img.example.com/api/image"),
            (ENV_PAGE_ORIGIN, "https://app.example.com"),
            (ENV_CREDENTIALS, "include"),
            (ENV_TIMEOUT_MS, "1500"),
            (ENV_QUEUE_CAPACITY, "8"),
        ]))
        .unwrap();

        let config = layer.build().unwrap();
        assert_eq!(config.base_url.as_str(), "https://img.example.com/api/image");
        assert_eq!(
            config.page_origin.as_ref().map(Url::as_str),
            Some("https://app.example.com/")
        );
        assert_eq!(config.credentials, CredentialsPolicy::Include);
        assert_eq!(config.timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.queue_capacity, 8);
    }

    #[test]
    fn empty_env_defaults_everything_but_the_base_url() {
        let layer = ConfigLayer::from_lookup(lookup(&[(ENV_BASE_URL, "http://localhost:8787/")]))
            .unwrap();
        let config = layer.build().unwrap();

        assert_eq!(config, FetchConfig::parse("http://localhost:8787/").unwrap());
        assert_eq!(config.credentials, CredentialsPolicy::SameOrigin);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn missing_base_url_is_reported() {
        let layer = ConfigLayer::from_lookup(lookup(&[(ENV_CREDENTIALS, "omit")])).unwrap();
        assert!(matches!(layer.build(), Err(ConfigError::MissingBaseUrl)));
    }

    #[test]
    fn bad_env_values_name_their_variable() {
        let err = ConfigLayer::from_lookup(lookup(&[(ENV_BASE_URL, "not a url")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { key: ENV_BASE_URL, .. }));

        let err = ConfigLayer::from_lookup(lookup(&[(ENV_TIMEOUT_MS, "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: ENV_TIMEOUT_MS, .. }));

        let err = ConfigLayer::from_lookup(lookup(&[(ENV_CREDENTIALS, "sometimes")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: ENV_CREDENTIALS, .. }));
    }

    #[test]
    fn higher_layers_win_field_by_field() {
        let env = ConfigLayer::from_lookup(lookup(&[
            (ENV_BASE_URL, "https://env.example.com/"),
            (ENV_QUEUE_CAPACITY, "4"),
        ]))
        .unwrap();
        let file = ConfigLayer::from_toml_str(
            r#"
            base_url = "https://file.example.com/image"
            credentials = "omit"
            "#,
        )
        .unwrap();
        let flags = ConfigLayer {
            timeout_ms: Some(3000),
            ..ConfigLayer::default()
        };

        let config = env.overlay(file).overlay(flags).build().unwrap();
        assert_eq!(config.base_url.as_str(), "https://file.example.com/image");
        assert_eq!(config.credentials, CredentialsPolicy::Omit);
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn toml_file_round_trips_through_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            base_url = "https://img.example.com/api/image"
            page_origin = "https://img.example.com"
            credentials = "same-origin"
            queue_capacity = 16
            "#
        )
        .unwrap();

        let config = FetchConfig::from_file(file.path()).unwrap();
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.credentials, CredentialsPolicy::SameOrigin);
        assert!(config.page_origin.is_some());
    }

    #[test]
    fn unknown_toml_keys_are_rejected() {
        let err = ConfigLayer::from_toml_str("base_url = \"https://a.test/\"\nretries = 3\n");
        assert!(matches!(err, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn validation_rejects_unusable_settings() {
        let config = FetchConfig::parse("ftp://files.example.com/").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedScheme(scheme)) if scheme == "ftp"
        ));

        let config = FetchConfig::parse("https://img.example.com/")
            .unwrap()
            .with_queue_capacity(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key: "queue_capacity", .. })
        ));

        let config = FetchConfig::parse("https://img.example.com/")
            .unwrap()
            .with_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key: "timeout_ms", .. })
        ));
    }

    #[test]
    fn sub_second_timeouts_keep_their_precision() {
        let base = FetchConfig::parse("https://img.example.com/").unwrap();

        let config = base.clone().with_timeout(Duration::from_millis(500));
        assert_eq!(config.timeout(), Some(Duration::from_millis(500)));
        assert!(config.validate().is_ok());

        let config = base.clone().with_timeout(Duration::from_millis(1500));
        assert_eq!(config.timeout(), Some(Duration::from_millis(1500)));

        let config = base.with_timeout(Duration::from_micros(300));
        assert_eq!(config.timeout(), Some(Duration::from_millis(1)));
        assert!(config.validate().is_ok());

        let layer = ConfigLayer::from_toml_str("base_url = \"https://a.test/\"\ntimeout_ms = 250\n")
            .unwrap();
        assert_eq!(layer.build().unwrap().timeout(), Some(Duration::from_millis(250)));
    }
}
