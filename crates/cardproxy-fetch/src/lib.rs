//! cardproxy image fetch
//!
//! Retrieves remotely hosted card images by identifier, off the caller's
//! task:
//! - Sends one `GET <base_url>?id=<identifier>` per request
//! - Returns the response body as text, whatever the HTTP status
//! - Propagates transport failures unmodified, never retrying
//! - Runs each download in its own task behind a message-passing handle
//!
//! # Example
//!
//! ```rust,ignore
//! use cardproxy_fetch::{FetchConfig, ImageFetchWorker};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FetchConfig::parse("https://img.example.com/api/image")?;
//! let worker = ImageFetchWorker::spawn(&config)?;
//!
//! let payload = worker.download("1A2b3C").await?;
//! println!("{} bytes", payload.len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod client;
pub mod config;
pub mod error;
pub mod types;
pub mod worker;

// Re-exports for convenience
pub use client::{ImageFetchClient, ImageSource};
pub use config::{ConfigLayer, FetchConfig};
pub use error::{ConfigError, FetchError, WorkerError};
pub use types::{CredentialsPolicy, ImageIdentifier, ImagePayload};
pub use worker::{ImageFetchWorker, PendingDownload, WorkerHandle, WorkerMessage, WorkerStats};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for fetching images
    pub use crate::{
        FetchConfig, FetchError, ImageFetchClient, ImageFetchWorker, ImageIdentifier,
        ImagePayload, WorkerHandle,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
