//! Image fetch worker
//!
//! Runs downloads off the caller's task:
//! - Requests reach the worker as messages over a bounded channel
//! - Each download runs in its own spawned task, so calls never queue
//!   behind one another and complete in whatever order the network allows
//! - Results come back through a per-request oneshot reply
//!
//! Only the identifier goes in and only the payload or error comes out.

use crate::client::{ImageFetchClient, ImageSource};
use crate::config::FetchConfig;
use crate::error::{ConfigError, FetchError, WorkerError};
use crate::types::{ImageIdentifier, ImagePayload};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Messages sent to the worker
#[derive(Debug)]
pub enum WorkerMessage {
    /// Download an image and reply with the result
    Download {
        /// Image to fetch
        identifier: ImageIdentifier,
        /// Where the result goes
        reply: oneshot::Sender<Result<ImagePayload, FetchError>>,
    },
    /// Stop accepting work
    Shutdown,
}

/// Worker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Downloads accepted by the worker
    pub submitted: u64,
    /// Downloads that returned a payload (any HTTP status)
    pub succeeded: u64,
    /// Downloads that failed
    pub failed: u64,
    /// Downloads still running
    pub in_flight: u64,
}

/// Spawns image fetch workers
#[derive(Debug)]
pub struct ImageFetchWorker;

impl ImageFetchWorker {
    /// Start a worker that downloads through an [`ImageFetchClient`]
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Any error of [`ImageFetchClient::new`].
    pub fn spawn(config: &FetchConfig) -> Result<WorkerHandle, ConfigError> {
        let client = ImageFetchClient::new(config)?;
        Ok(Self::with_source(Arc::new(client), config.queue_capacity))
    }

    /// Start a worker over any image source
    ///
    /// A zero `queue_capacity` is raised to one.
    #[must_use]
    pub fn with_source(source: Arc<dyn ImageSource>, queue_capacity: usize) -> WorkerHandle {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let stats = Arc::new(Mutex::new(WorkerStats::default()));

        tokio::spawn(dispatch_loop(source, rx, Arc::clone(&stats)));

        WorkerHandle {
            sender: tx,
            stats,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Caller's side of a worker
///
/// Cheap to clone; the worker stops once every handle is dropped or
/// [`WorkerHandle::shutdown`] is called.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    sender: mpsc::Sender<WorkerMessage>,
    stats: Arc<Mutex<WorkerStats>>,
    closed: Arc<AtomicBool>,
}

impl WorkerHandle {
    /// Queue a download and return its pending result
    ///
    /// Waits only for queue space, never for the download itself.
    ///
    /// # Errors
    /// - `WorkerError::Closed` if the worker has shut down
    pub async fn submit(
        &self,
        identifier: impl Into<ImageIdentifier>,
    ) -> Result<PendingDownload, FetchError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WorkerError::Closed.into());
        }

        let identifier = identifier.into();
        let (reply, rx) = oneshot::channel();

        trace!(id = %identifier, "submitting download");
        self.sender
            .send(WorkerMessage::Download { identifier, reply })
            .await
            .map_err(|_| WorkerError::Closed)?;

        Ok(PendingDownload { rx })
    }

    /// Download an image through the worker
    ///
    /// # Errors
    /// - `FetchError::Transport` if the network exchange fails
    /// - `FetchError::Worker` if the worker is closed or drops the request
    pub async fn download(
        &self,
        identifier: impl Into<ImageIdentifier>,
    ) -> Result<ImagePayload, FetchError> {
        self.submit(identifier).await?.await
    }

    /// Stop accepting new downloads
    ///
    /// Takes effect for every clone of this handle as soon as it is called.
    /// Downloads already accepted keep running and still deliver results.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.sender.send(WorkerMessage::Shutdown).await;
    }

    /// Whether the worker has stopped accepting downloads
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.sender.is_closed()
    }

    /// Snapshot of the worker counters
    #[inline]
    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        *self.stats.lock()
    }
}

/// Result of a submitted download
///
/// Dropping it does not cancel the request; the result is discarded.
#[derive(Debug)]
#[must_use = "a pending download does nothing unless awaited"]
pub struct PendingDownload {
    rx: oneshot::Receiver<Result<ImagePayload, FetchError>>,
}

impl Future for PendingDownload {
    type Output = Result<ImagePayload, FetchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|reply| reply.unwrap_or_else(|_| Err(WorkerError::Dropped.into())))
    }
}

/// Worker task (runs in separate tokio task)
async fn dispatch_loop(
    source: Arc<dyn ImageSource>,
    mut rx: mpsc::Receiver<WorkerMessage>,
    stats: Arc<Mutex<WorkerStats>>,
) {
    debug!("image fetch worker started");

    while let Some(msg) = rx.recv().await {
        match msg {
            WorkerMessage::Download { identifier, reply } => {
                {
                    let mut stats = stats.lock();
                    stats.submitted += 1;
                    stats.in_flight += 1;
                }

                let source = Arc::clone(&source);
                let stats = Arc::clone(&stats);
                tokio::spawn(async move {
                    let result = source.fetch(&identifier).await;

                    {
                        let mut stats = stats.lock();
                        stats.in_flight -= 1;
                        match &result {
                            Ok(_) => stats.succeeded += 1,
                            Err(_) => stats.failed += 1,
                        }
                    }

                    if let Err(e) = &result {
                        debug!(id = %identifier, error = %e, "download failed");
                    }
                    // Caller may have dropped its PendingDownload
                    let _ = reply.send(result);
                });
            }
            WorkerMessage::Shutdown => {
                rx.close();
                debug!("image fetch worker shutting down");
            }
        }
    }

    debug!("image fetch worker stopped");
}
