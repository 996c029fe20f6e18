//! Core types for image retrieval
//!
//! Defines the values exchanged across the worker boundary:
//! - Image identifiers (opaque request input)
//! - Image payloads (opaque response text)
//! - Credentials policy for outbound requests

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use url::Url;

/// Opaque token naming a remotely hosted image
///
/// No structure is assumed and nothing is validated. The token is sent
/// verbatim as the `id` query parameter; rejecting malformed values is the
/// remote host's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageIdentifier(String);

impl ImageIdentifier {
    /// Wrap a token
    #[inline]
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Token as sent on the wire
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ImageIdentifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ImageIdentifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for ImageIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw text body of an image response
///
/// Returned as-is; the caller decides how to decode it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImagePayload(String);

impl ImagePayload {
    /// Wrap a response body
    #[inline]
    #[must_use]
    pub fn new(body: impl Into<String>) -> Self {
        Self(body.into())
    }

    /// Body text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Body length in bytes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the body is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Take the body text
    #[inline]
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for ImagePayload {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ImagePayload {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for ImagePayload {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// When credentials (cookies) accompany an outbound request
///
/// Mirrors the browser fetch `credentials` modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialsPolicy {
    /// Never attach credentials
    Omit,
    /// Attach only when the target shares the page's origin
    #[default]
    SameOrigin,
    /// Always attach credentials
    Include,
}

impl CredentialsPolicy {
    /// Decide whether a request to `target` carries credentials
    ///
    /// Under `SameOrigin` a missing page origin means there is nothing to
    /// match against, so credentials are withheld.
    #[must_use]
    pub fn attaches_credentials(self, page_origin: Option<&Url>, target: &Url) -> bool {
        match self {
            Self::Omit => false,
            Self::Include => true,
            Self::SameOrigin => page_origin.is_some_and(|page| page.origin() == target.origin()),
        }
    }

    /// Kebab-case name as accepted by [`FromStr`]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Omit => "omit",
            Self::SameOrigin => "same-origin",
            Self::Include => "include",
        }
    }
}

impl FromStr for CredentialsPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "omit" => Ok(Self::Omit),
            "same-origin" | "same_origin" | "sameorigin" => Ok(Self::SameOrigin),
            "include" => Ok(Self::Include),
            other => Err(format!("unknown credentials policy: {other}")),
        }
    }
}

impl std::fmt::Display for CredentialsPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
