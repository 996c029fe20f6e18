//! HTTP transport for image retrieval
//!
//! One `GET <base_url>?id=<identifier>` per download, body returned as
//! text whatever the status. Nothing is retried, cached, or validated.
//!
//! Under the same-origin credentials policy redirects are only followed
//! while they stay on the page origin; a hop elsewhere ends the exchange and
//! the redirect response itself is the payload.

use crate::config::FetchConfig;
use crate::error::{ConfigError, FetchError};
use crate::types::{CredentialsPolicy, ImageIdentifier, ImagePayload};
use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::redirect::Policy;
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

/// Anything that can resolve an identifier to a payload
///
/// The worker dispatches through this seam.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Retrieve the payload for `identifier`
    async fn fetch(&self, identifier: &ImageIdentifier) -> Result<ImagePayload, FetchError>;
}

const MAX_REDIRECTS: usize = 10;

/// Redirect policy that never carries credentials off `origin`
fn same_origin_redirects(origin: url::Origin) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if attempt.url().origin() == origin {
            attempt.follow()
        } else {
            debug!(next = %attempt.url(), "not following cross-origin redirect");
            attempt.stop()
        }
    })
}

/// Image host client
#[derive(Debug, Clone)]
pub struct ImageFetchClient {
    http: reqwest::Client,
    base_url: Url,
    credentials_attached: bool,
}

impl ImageFetchClient {
    /// Build a client for `config`
    ///
    /// When the credentials policy permits, responses' cookies are kept in
    /// a session store and sent back on later requests.
    ///
    /// # Errors
    /// - any error of [`FetchConfig::validate`]
    /// - `ConfigError::Client` if the HTTP client cannot be built
    pub fn new(config: &FetchConfig) -> Result<Self, ConfigError> {
        Self::build(config, None)
    }

    /// Build a client whose credentials come from `jar`
    ///
    /// The jar is only consulted if the credentials policy permits; otherwise
    /// requests carry no cookies at all.
    ///
    /// # Errors
    /// Same as [`ImageFetchClient::new`].
    pub fn with_cookie_jar(config: &FetchConfig, jar: Arc<Jar>) -> Result<Self, ConfigError> {
        Self::build(config, Some(jar))
    }

    fn build(config: &FetchConfig, jar: Option<Arc<Jar>>) -> Result<Self, ConfigError> {
        config.validate()?;

        let credentials_attached = config
            .credentials
            .attaches_credentials(config.page_origin.as_ref(), &config.base_url);

        let mut builder = reqwest::Client::builder();
        if credentials_attached {
            builder = match jar {
                Some(jar) => builder.cookie_provider(jar),
                None => builder.cookie_store(true),
            };
            if let (CredentialsPolicy::SameOrigin, Some(page_origin)) =
                (config.credentials, config.page_origin.as_ref())
            {
                builder = builder.redirect(same_origin_redirects(page_origin.origin()));
            }
        }
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(ConfigError::Client)?;

        debug!(
            base_url = %config.base_url,
            credentials = %config.credentials,
            credentials_attached,
            "image fetch client ready"
        );

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            credentials_attached,
        })
    }

    /// Endpoint requests are sent to
    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Whether requests carry credentials
    #[inline]
    #[must_use]
    pub fn credentials_attached(&self) -> bool {
        self.credentials_attached
    }

    /// Exact URL requested for `identifier`
    ///
    /// Existing query pairs of the base URL are kept and `id` is appended
    /// after them, form-encoded.
    #[must_use]
    pub fn request_url(&self, identifier: &ImageIdentifier) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut().append_pair("id", identifier.as_str());
        url
    }

    /// Download the payload for `identifier`
    ///
    /// Non-success statuses are not errors: the error page's body is
    /// returned like any other payload.
    ///
    /// # Errors
    /// - `FetchError::Transport` if the request or the body read fails
    #[instrument(skip_all, fields(id = %identifier))]
    pub async fn download(&self, identifier: &ImageIdentifier) -> Result<ImagePayload, FetchError> {
        let url = self.request_url(identifier);
        debug!(%url, "requesting image");

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            debug!(%status, "passing through error response body");
        }

        let body = response.text().await?;
        debug!(%status, bytes = body.len(), "image payload received");

        Ok(ImagePayload::from(body))
    }
}

#[async_trait]
impl ImageSource for ImageFetchClient {
    async fn fetch(&self, identifier: &ImageIdentifier) -> Result<ImagePayload, FetchError> {
        self.download(identifier).await
    }
}
