//! Forwarding stage: relay the request to the routed upstream
//!
//! The upstream body is handed back as a byte stream so the client starts
//! receiving data as soon as the upstream sends it.

use crate::proxy::context::RequestContext;
use crate::proxy::headers::{strip_hop_by_hop, CONTENT_LENGTH, HOST};
use crate::proxy::router::PathRouter;
use crate::proxy::types::*;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use http::{HeaderMap, HeaderValue, StatusCode};
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Upstream response head plus its still-streaming body
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
}

#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    router: Arc<PathRouter>,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(config: &ProxyConfig) -> ProxyResult<Self> {
        Ok(Self {
            client: build_client(config.verify_tls)?,
            router: Arc::new(PathRouter::from_config(config)),
            timeout: config.request_timeout,
        })
    }

    pub fn router(&self) -> &PathRouter {
        &self.router
    }

    /// Sends the request upstream and returns once response headers arrive
    pub async fn forward(
        &self,
        ctx: &RequestContext,
        mut headers: HeaderMap,
        body: Bytes,
    ) -> ProxyResult<UpstreamResponse> {
        let route = self.router.route(ctx.url.as_ref())?;
        let upstream_url = route.upstream_url();
        let url = Url::parse(&upstream_url)
            .map_err(|e| ProxyError::InvalidUpstreamUrl(format!("{upstream_url}: {e}")))?;

        strip_hop_by_hop(&mut headers);
        // recomputed by the client from the buffered body
        headers.remove(CONTENT_LENGTH);
        rewrite_host(&mut headers, &url)?;

        debug!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            upstream = %url,
            "Forwarding request"
        );

        let send = self
            .client
            .request(ctx.method.clone(), url)
            .headers(headers)
            .body(body)
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| ProxyError::UpstreamTimeout(self.timeout))?
            .map_err(|e| ProxyError::from_upstream(e, self.timeout))?;

        Ok(UpstreamResponse {
            status: response.status(),
            headers: response.headers().clone(),
            body: response.bytes_stream().boxed(),
        })
    }
}

/// Builds the upstream client; redirects are passed through to the caller untouched
pub fn build_client(verify_tls: bool) -> ProxyResult<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(!verify_tls)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| ProxyError::ClientBuild(e.to_string()))
}

/// Points `Host` at the upstream authority instead of the proxy's
pub fn rewrite_host(headers: &mut HeaderMap, url: &Url) -> ProxyResult<()> {
    let host = url
        .host_str()
        .ok_or_else(|| ProxyError::InvalidUpstreamUrl(format!("{url}: missing host")))?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let value = HeaderValue::from_str(&authority)
        .map_err(|e| ProxyError::InvalidUpstreamUrl(format!("{authority}: {e}")))?;
    headers.insert(HOST, value);
    Ok(())
}
