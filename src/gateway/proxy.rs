//! Chunk-by-chunk HTTP forwarding to workspace machines.
//!
//! The request body is buffered up to a configured cap; the response is
//! streamed with no total deadline, only an idle timeout between chunks so
//! server-sent events survive as long as the upstream keeps talking. A client
//! disconnect drops the response body stream, which stops the forwarding.

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::header::{HeaderMap, HeaderValue, CONNECTION, HOST, TRANSFER_ENCODING};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::config::ProxyConfig;

use super::pages;

/// How upstream base URLs are derived from a machine id.
enum Upstream {
    /// The provider's internal DNS zone: `http://<id>.vm.<app>.internal:8080`.
    InternalDns { app_name: String },
    /// Fixed base URL, for exercising the proxy against a local server.
    #[cfg(test)]
    Fixed(String),
}

impl Upstream {
    fn base_url(&self, machine_id: &str) -> String {
        match self {
            Upstream::InternalDns { app_name } => {
                format!("http://{machine_id}.vm.{app_name}.internal:8080")
            }
            #[cfg(test)]
            Upstream::Fixed(base) => base.clone(),
        }
    }
}

pub struct StreamingProxy {
    client: reqwest::Client,
    upstream: Upstream,
    body_limit: usize,
    chunk_idle_timeout: Duration,
}

impl StreamingProxy {
    pub fn new(config: &ProxyConfig, app_name: &str) -> anyhow::Result<Self> {
        Ok(Self {
            // Connect deadline only; receive runs as long as the upstream
            // keeps streaming.
            client: reqwest::Client::builder()
                .connect_timeout(config.connect_timeout())
                .build()?,
            upstream: Upstream::InternalDns {
                app_name: app_name.to_string(),
            },
            body_limit: config.body_limit_bytes,
            chunk_idle_timeout: config.chunk_idle_timeout(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_fixed_upstream(config: &ProxyConfig, base_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(config.connect_timeout())
                .build()
                .unwrap(),
            upstream: Upstream::Fixed(base_url),
            body_limit: config.body_limit_bytes,
            chunk_idle_timeout: config.chunk_idle_timeout(),
        }
    }

    /// Forward one request to the machine and stream the response back.
    pub async fn forward(&self, machine_id: &str, request: Request) -> Response {
        let (parts, body) = request.into_parts();

        let mut url = format!(
            "{}{}",
            self.upstream.base_url(machine_id),
            parts.uri.path()
        );
        if let Some(query) = parts.uri.query() {
            url.push('?');
            url.push_str(query);
        }

        let body = match axum::body::to_bytes(body, self.body_limit).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "request body over limit or unreadable");
                return StatusCode::PAYLOAD_TOO_LARGE.into_response();
            }
        };

        let mut headers = HeaderMap::new();
        for (name, value) in parts.headers.iter() {
            if name == HOST || name == CONNECTION {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        debug!(machine_id = %machine_id, url = %url, method = %parts.method, "forwarding to workspace");
        let upstream_response = match self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                // Typically the machine's hostname not resolving while it
                // boots; the starting page has the client retry.
                warn!(machine_id = %machine_id, error = %e, "upstream dial failed");
                return pages::starting_workspace();
            }
        };

        let status = upstream_response.status();
        let headers = normalize_headers(upstream_response.headers());
        let stream = with_idle_timeout(
            Box::pin(upstream_response.bytes_stream()),
            self.chunk_idle_timeout,
        );

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

/// Copy upstream headers for the downstream response: multi-valued headers
/// collapse to one comma-joined value, names stay lowercase, hop-by-hop
/// framing headers are dropped.
fn normalize_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for name in upstream.keys() {
        if name == TRANSFER_ENCODING || name == CONNECTION {
            continue;
        }
        let mut joined: Vec<u8> = Vec::new();
        for (i, value) in upstream.get_all(name).iter().enumerate() {
            if i > 0 {
                joined.extend_from_slice(b", ");
            }
            joined.extend_from_slice(value.as_bytes());
        }
        match HeaderValue::from_bytes(&joined) {
            Ok(value) => {
                out.insert(name.clone(), value);
            }
            Err(e) => warn!(header = %name, error = %e, "dropping unrepresentable header"),
        }
    }
    out
}

/// Wrap a byte stream so that a gap longer than `idle` between chunks ends
/// the stream with an error. There is deliberately no total deadline.
fn with_idle_timeout<S, E>(
    upstream: S,
    idle: Duration,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Unpin + Send + 'static,
    E: std::fmt::Display,
{
    futures::stream::unfold(Some(upstream), move |state| async move {
        let mut upstream = state?;
        match tokio::time::timeout(idle, upstream.next()).await {
            Err(_) => Some((
                Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "upstream idle timeout",
                )),
                None,
            )),
            Ok(None) => None,
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(upstream))),
            Ok(Some(Err(e))) => Some((
                Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    e.to_string(),
                )),
                None,
            )),
        }
    })
}
