//! Test utilities for proxy module testing
//!
//! A mock upstream bound to an ephemeral port, stores with scripted failures,
//! and helpers for building a proxy router against them.

use crate::infrastructure::store::{
    collections, Document, DocumentStore, StoreConnector, StoreError, StoreResult,
};
use crate::infrastructure::MemoryStore;
use crate::proxy::types::*;
use crate::proxy::ProxyService;
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bytes that are not valid UTF-8
pub const BINARY_PAYLOAD: &[u8] = &[0x00, 0xff, 0xfe, 0x80, 0x7f];

/// Running mock upstream; counts every request it receives
pub struct MockUpstream {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let hits = Arc::new(AtomicUsize::new(0));

        let app = Router::new()
            .route("/x", get(hello_handler))
            .route("/counter", get(counter_handler))
            .route("/widgets", get(uri_echo_handler))
            .route("/host", get(host_echo_handler))
            .route("/request-id", get(request_id_echo_handler))
            .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "missing") }))
            .route("/created", any(|| async { (StatusCode::CREATED, "created") }))
            .route("/echo", any(body_echo_handler))
            .route("/binary", get(binary_handler))
            .route("/chunked", get(chunked_handler))
            .route("/cdn", get(cdn_handler))
            .route("/slow", get(slow_handler))
            .layer(from_fn_with_state(hits.clone(), count_hits))
            .with_state(hits.clone());

        let addr = serve(app).await;

        Self {
            base_url: format!("http://{addr}"),
            hits,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Serves `router` on an ephemeral loopback port for the rest of the test
pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("ephemeral port should bind");
    let addr = listener.local_addr().expect("bound listener has an address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    addr
}

async fn count_hits(
    State(hits): State<Arc<AtomicUsize>>,
    request: Request,
    next: Next,
) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    next.run(request).await
}

async fn hello_handler() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/plain"),
            (header::HeaderName::from_static("x-upstream"), "mock"),
        ],
        "hello",
    )
}

/// A different body on every call, so replays are distinguishable from forwards
async fn counter_handler(State(hits): State<Arc<AtomicUsize>>) -> impl IntoResponse {
    format!("call-{}", hits.load(Ordering::SeqCst))
}

async fn uri_echo_handler(request: Request) -> impl IntoResponse {
    request.uri().to_string()
}

async fn host_echo_handler(headers: HeaderMap) -> impl IntoResponse {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// The `x-request-id` the upstream saw, or `none`
async fn request_id_echo_handler(headers: HeaderMap) -> impl IntoResponse {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("none")
        .to_string()
}

async fn body_echo_handler(body: axum::body::Bytes) -> impl IntoResponse {
    body
}

async fn binary_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from(BINARY_PAYLOAD),
    )
}

/// Streamed without a `Content-Length`, so it is sent chunked
async fn chunked_handler() -> impl IntoResponse {
    let chunks = [b"hel".as_slice(), b"lo"]
        .map(|chunk| Ok::<_, std::io::Error>(Bytes::from_static(chunk)));
    Body::from_stream(futures_util::stream::iter(chunks))
}

async fn cdn_handler() -> impl IntoResponse {
    ([(header::HeaderName::from_static("x-cache"), "HIT from edge")], "edge")
}

async fn slow_handler() -> impl IntoResponse {
    tokio::time::sleep(Duration::from_millis(300)).await;
    "slow"
}

/// Routes `/svc` and `/api` to the given upstream
pub fn proxy_config(upstream: &str) -> ProxyConfig {
    let target = TargetUrl::try_new(upstream.to_string()).expect("mock upstream URL is valid");
    ProxyConfig {
        routes: vec![
            RouteRule::new(
                PathPrefix::try_new("/svc".to_string()).expect("valid prefix"),
                target.clone(),
            ),
            RouteRule::new(
                PathPrefix::try_new("/api".to_string()).expect("valid prefix"),
                target,
            ),
        ],
        request_timeout: Duration::from_secs(5),
        ..ProxyConfig::default()
    }
}

pub fn proxy_router(config: ProxyConfig, connector: Arc<dyn StoreConnector>) -> Router {
    ProxyService::new(config, connector)
        .expect("proxy service should build")
        .into_router()
}

/// Persistence runs on background tasks; poll until it lands or give up
pub async fn wait_for_documents(store: &MemoryStore, collection: &str, expected: usize) -> usize {
    for _ in 0..100 {
        let count = store.count(collection);
        if count >= expected {
            return count;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    store.count(collection)
}

pub async fn wait_for_cache_entries(store: &MemoryStore, expected: usize) -> usize {
    wait_for_documents(store, collections::CACHE, expected).await
}

/// Reads fail, writes land in the wrapped memory store
#[derive(Clone, Default)]
pub struct FailingLookupStore {
    pub inner: MemoryStore,
}

#[async_trait]
impl DocumentStore for FailingLookupStore {
    async fn insert(&self, collection: &str, document: Document) -> StoreResult<()> {
        self.inner.insert(collection, document).await
    }

    async fn find(&self, _collection: &str, _filter: &Document) -> StoreResult<Vec<Document>> {
        Err(StoreError::Unavailable("lookup refused".to_string()))
    }
}

#[async_trait]
impl StoreConnector for FailingLookupStore {
    async fn connect(&self) -> StoreResult<Arc<dyn DocumentStore>> {
        Ok(Arc::new(self.clone()))
    }
}
