//! Error types for image retrieval
//!
//! Two families:
//! - Fetch errors, surfaced to callers of a download
//! - Config errors, surfaced while building a client or worker
//!
//! Remote error statuses (4xx/5xx) are not errors here; their bodies are
//! delivered as ordinary payloads.

/// Failure of a single download
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The network exchange itself could not complete
    ///
    /// DNS failure, refused or reset connection, timeout, TLS failure, or an
    /// interrupted body. Never retried.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// The worker could not accept or answer the request
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),
}

impl FetchError {
    /// Check if the network exchange failed
    #[inline]
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Check if the failure was a request timeout
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}

/// Worker boundary errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    /// Worker shut down or every receiver is gone
    #[error("worker is closed")]
    Closed,

    /// Request was accepted but its reply never arrived
    #[error("worker dropped the request before replying")]
    Dropped,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No base URL in any configuration source
    #[error("image base URL is not configured")]
    MissingBaseUrl,

    /// A URL setting failed to parse
    #[error("invalid URL for {key}: {source}")]
    InvalidUrl {
        /// Setting name
        key: &'static str,
        /// Parse failure
        #[source]
        source: url::ParseError,
    },

    /// Base URL scheme the HTTP client cannot speak
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// A setting had an unusable value
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Setting name
        key: &'static str,
        /// Offending value
        value: String,
    },

    /// Config file could not be read
    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for this schema
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP client construction failed
    #[error("http client error: {0}")]
    Client(#[source] reqwest::Error),
}
