//! Response capture stage: buffer the upstream body while it streams to the client
//!
//! Each response moves through
//! `AwaitingHeaders -> StreamingBody -> Complete -> Persist | Skip`, or ends in
//! `Aborted` when the upstream body fails or the client goes away first. Only
//! a response with status exactly `200` is persisted, and only after the body
//! has been read to the end.
//!
//! The end of the body is either the end of the upstream stream or, when the
//! upstream declared a `Content-Length`, the chunk that reaches it. The HTTP
//! server stops polling a body once the declared length has been written, so
//! the stream's terminating `None` is never observed for those responses.

use crate::domain::{CacheEntry, CacheKey, RequestId};
use crate::infrastructure::store::{collections, to_document, DocumentStore, StoreResult};
use crate::proxy::context::RequestContext;
use bytes::{Bytes, BytesMut};
use derive_more::Display;
use futures_util::Stream;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, StatusCode};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum CaptureState {
    AwaitingHeaders,
    StreamingBody,
    Complete,
    Persist,
    Skip,
    Aborted,
}

impl CaptureState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Persist | Self::Skip | Self::Aborted)
    }
}

/// Accumulates one upstream response and decides whether it becomes a cache entry
pub struct ResponseCapture {
    state: CaptureState,
    request_id: RequestId,
    url: CacheKey,
    store: Option<Arc<dyn DocumentStore>>,
    status: Option<StatusCode>,
    headers: HeaderMap,
    buffer: BytesMut,
    /// Upstream `Content-Length`, when declared
    expected_len: Option<u64>,
    received: u64,
}

impl ResponseCapture {
    pub fn new(ctx: &RequestContext) -> Self {
        Self {
            state: CaptureState::AwaitingHeaders,
            request_id: ctx.request_id,
            url: ctx.url.clone(),
            store: ctx.store.clone(),
            status: None,
            headers: HeaderMap::new(),
            buffer: BytesMut::new(),
            expected_len: None,
            received: 0,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn is_cacheable(&self) -> bool {
        self.status == Some(StatusCode::OK) && self.store.is_some()
    }

    /// True once every byte of a declared `Content-Length` has passed through
    pub fn is_body_complete(&self) -> bool {
        self.expected_len
            .is_some_and(|expected| self.received >= expected)
    }

    pub fn on_headers(&mut self, status: StatusCode, headers: &HeaderMap) {
        if self.state != CaptureState::AwaitingHeaders {
            return;
        }
        self.status = Some(status);
        self.expected_len = headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok());
        if status == StatusCode::OK {
            self.headers = headers.clone();
        }
        self.state = CaptureState::StreamingBody;
    }

    /// Records one body chunk. Returns the write to perform when this chunk completes the body.
    pub fn on_chunk(&mut self, chunk: &[u8]) -> Option<PendingWrite> {
        if self.state != CaptureState::StreamingBody {
            return None;
        }
        self.received += chunk.len() as u64;
        if self.is_cacheable() {
            self.buffer.extend_from_slice(chunk);
        }

        if self.is_body_complete() {
            self.finish()
        } else {
            None
        }
    }

    /// Drops the buffer; nothing will be persisted for this response
    pub fn abort(&mut self, reason: &str) {
        if self.state.is_terminal() {
            return;
        }
        debug!(
            request_id = %self.request_id,
            url = %self.url,
            reason,
            "Response capture aborted"
        );
        self.buffer = BytesMut::new();
        self.state = CaptureState::Aborted;
    }

    /// Called once the upstream body has ended. Returns the write to perform, if any.
    ///
    /// A declared `Content-Length` that was not reached means the body was cut short.
    pub fn finish(&mut self) -> Option<PendingWrite> {
        if self.state != CaptureState::StreamingBody {
            return None;
        }
        if self.expected_len.is_some() && !self.is_body_complete() {
            self.abort("upstream body shorter than its content-length");
            return None;
        }
        self.state = CaptureState::Complete;

        let status = self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status != StatusCode::OK {
            debug!(
                request_id = %self.request_id,
                url = %self.url,
                status = status.as_u16(),
                "~> NO CACHE"
            );
            self.state = CaptureState::Skip;
            return None;
        }

        let Some(store) = self.store.take() else {
            debug!(request_id = %self.request_id, url = %self.url, "No store connection, response not cached");
            self.state = CaptureState::Skip;
            return None;
        };

        let body = std::mem::take(&mut self.buffer).freeze();
        self.state = CaptureState::Persist;
        Some(PendingWrite {
            request_id: self.request_id,
            store,
            entry: CacheEntry::new(self.url.clone(), &self.headers, &body),
        })
    }
}

impl Drop for ResponseCapture {
    fn drop(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        // a zero-length body is complete without ever being polled
        if self.state == CaptureState::StreamingBody && self.is_body_complete() {
            if let Some(write) = self.finish() {
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn(write.record());
                    }
                    Err(_) => warn!(
                        request_id = %self.request_id,
                        url = %self.url,
                        "No runtime to persist completed response"
                    ),
                }
            }
            return;
        }
        self.abort("response dropped before completion");
    }
}

/// A cache entry ready to be written
pub struct PendingWrite {
    request_id: RequestId,
    store: Arc<dyn DocumentStore>,
    entry: CacheEntry,
}

impl PendingWrite {
    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }

    pub async fn persist(&self) -> StoreResult<()> {
        self.store
            .insert(collections::CACHE, to_document(&self.entry)?)
            .await
    }

    /// Persists on a background task; the client already has its response
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.record())
    }

    async fn record(self) {
        match self.persist().await {
            Ok(()) => debug!(
                request_id = %self.request_id,
                url = %self.entry.url,
                "~> CACHED"
            ),
            Err(e) => warn!(
                request_id = %self.request_id,
                url = %self.entry.url,
                error = %e,
                "Error storing cache"
            ),
        }
    }
}

pin_project! {
    /// Passes upstream chunks through untouched while feeding them to a [`ResponseCapture`]
    pub struct CapturingStream<S> {
        #[pin]
        inner: S,
        capture: ResponseCapture,
    }
}

impl<S> CapturingStream<S> {
    pub fn new(inner: S, capture: ResponseCapture) -> Self {
        Self { inner, capture }
    }
}

impl<S, E> Stream for CapturingStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some(write) = this.capture.on_chunk(&chunk) {
                    write.spawn();
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.capture.abort(&e.to_string());
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                if let Some(write) = this.capture.finish() {
                    write.spawn();
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
