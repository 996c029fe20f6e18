//! Testing utilities for cardproxy workspace
//!
//! Local stand-ins for the remote image host:
//! - [`MockImageHost`]: answers `?id=` requests with scripted status, body
//!   and delay, recording every request it sees; responses can also
//!   redirect elsewhere
//! - [`ResettingHost`]: accepts connections and drops them unanswered
//! - [`unreachable_url`]: a loopback URL nothing listens on

#![allow(missing_docs)]

use parking_lot::Mutex;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use url::Url;
use warp::http::header::{HeaderValue, LOCATION};
use warp::http::{Method, StatusCode};
use warp::path::FullPath;
use warp::{Filter, Reply};

/// Scripted answer for one identifier
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
    pub location: Option<Url>,
}

impl MockResponse {
    pub fn ok(body: &str) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: Duration::ZERO,
            location: None,
        }
    }

    /// `302 Found` pointing at `to`
    pub fn redirect(to: Url) -> Self {
        Self {
            location: Some(to),
            ..Self::status(302, "moved")
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// What the host saw for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub id: Option<String>,
    pub cookie: Option<String>,
}

#[derive(Debug)]
struct HostState {
    responses: Mutex<HashMap<String, MockResponse>>,
    fallback: Mutex<MockResponse>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// In-process image host on an ephemeral loopback port
#[derive(Debug, Clone)]
pub struct MockImageHost {
    addr: SocketAddr,
    state: Arc<HostState>,
}

impl MockImageHost {
    /// Start serving; unknown identifiers get `404 not found`
    pub async fn start() -> Self {
        let state = Arc::new(HostState {
            responses: Mutex::new(HashMap::new()),
            fallback: Mutex::new(MockResponse::status(404, "not found")),
            requests: Mutex::new(Vec::new()),
        });

        let with_state = {
            let state = Arc::clone(&state);
            warp::any().map(move || Arc::clone(&state))
        };

        let routes = warp::method()
            .and(warp::path::full())
            .and(
                warp::query::raw()
                    .or(warp::any().map(String::new))
                    .unify(),
            )
            .and(warp::header::optional::<String>("cookie"))
            .and(with_state)
            .and_then(handle);

        let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        Self { addr, state }
    }

    /// Answer requests for `id` with `response`
    pub fn respond(&self, id: &str, response: MockResponse) {
        self.state
            .responses
            .lock()
            .insert(id.to_string(), response);
    }

    /// Answer unknown identifiers with `response`
    pub fn respond_by_default(&self, response: MockResponse) {
        *self.state.fallback.lock() = response;
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://127.0.0.1:<port>/`
    pub fn origin(&self) -> Url {
        self.url("/")
    }

    /// URL of `path` on this host
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        Url::parse(&format!("http://{}/{path}", self.addr)).expect("loopback url")
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().len()
    }
}

async fn handle(
    method: Method,
    path: FullPath,
    query: String,
    cookie: Option<String>,
    state: Arc<HostState>,
) -> Result<warp::reply::Response, Infallible> {
    let id = url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned());

    state.requests.lock().push(RecordedRequest {
        method: method.to_string(),
        path: path.as_str().to_string(),
        query,
        id: id.clone(),
        cookie,
    });

    let response = id
        .and_then(|id| state.responses.lock().get(&id).cloned())
        .unwrap_or_else(|| state.fallback.lock().clone());

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut reply = warp::reply::with_status(response.body, status).into_response();
    if let Some(location) = response.location {
        let value = HeaderValue::from_str(location.as_str()).expect("url is a valid header value");
        reply.headers_mut().insert(LOCATION, value);
    }
    Ok(reply)
}

/// Host that accepts TCP connections and closes them without answering
#[derive(Debug)]
pub struct ResettingHost {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
}

impl ResettingHost {
    pub async fn start() -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind loopback listener");
        let addr = listener.local_addr().expect("listener address");
        let connections = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&connections);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                // Read the request head so the client is mid-exchange when we hang up
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                drop(stream);
            }
        });

        Self { addr, connections }
    }

    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        Url::parse(&format!("http://{}/{path}", self.addr)).expect("loopback url")
    }

    /// Connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Loopback URL with no listener behind it
pub async fn unreachable_url(path: &str) -> Url {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .expect("bind loopback listener");
    let addr = listener.local_addr().expect("listener address");
    drop(listener);

    let path = path.trim_start_matches('/');
    Url::parse(&format!("http://{addr}/{path}")).expect("loopback url")
}
