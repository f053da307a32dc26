//! Proxy pass to external destinations.
//!
//! The request is forwarded to the route's absolute destination with its
//! method, headers and body; the upstream response is relayed with its body
//! streamed through unchanged.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, Request},
    response::Response,
};
use thiserror::Error;

use crate::http::response::ServedBy;

/// Largest request body forwarded upstream.
pub const MAX_PROXY_BODY: usize = 32 * 1024 * 1024;

/// Headers that describe a single connection and must not be forwarded.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Error type for proxy pass.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid proxy destination {0}")]
    InvalidDestination(String),

    #[error("failed to read request body: {0}")]
    Body(#[source] axum::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("invalid upstream response: {0}")]
    Response(#[from] axum::http::Error),
}

/// Build the shared upstream client. Redirects are relayed, not followed.
pub fn build_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

/// Forward `request` to `destination` and relay the answer.
pub async fn proxy_pass(client: &reqwest::Client, destination: &str, request: Request<Body>) -> Result<Response, ProxyError> {
    let url = reqwest::Url::parse(destination).map_err(|_| ProxyError::InvalidDestination(destination.to_string()))?;
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_PROXY_BODY).await.map_err(ProxyError::Body)?;

    tracing::debug!(method = %parts.method, upstream = %url, "Proxying request");
    let upstream = client
        .request(parts.method, url)
        .headers(forwarded_headers(&parts.headers))
        .body(body)
        .send()
        .await?;

    let mut response = Response::builder().status(upstream.status());
    if let Some(headers) = response.headers_mut() {
        for (name, value) in upstream.headers() {
            if !is_hop_by_hop(name) {
                headers.append(name.clone(), value.clone());
            }
        }
    }

    let mut response = response
        .body(Body::from_stream(upstream.bytes_stream()))?;
    response.extensions_mut().insert(ServedBy("proxy"));
    Ok(response)
}

fn forwarded_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(incoming.len());
    for (name, value) in incoming {
        if name != axum::http::header::HOST && !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn strips_host_and_hop_by_hop_headers() {
        let mut incoming = HeaderMap::new();
        incoming.insert("host", HeaderValue::from_static("localhost:3000"));
        incoming.insert("connection", HeaderValue::from_static("keep-alive"));
        incoming.insert("x-custom", HeaderValue::from_static("1"));

        let forwarded = forwarded_headers(&incoming);
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded["x-custom"], "1");
    }
}
