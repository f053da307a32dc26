//! Request tracing and response stamping.
//!
//! # Responsibilities
//! - Generate a trace id per request (`<podId>-<epochMillis>-<hex32>`)
//! - Run the request inside a span carrying that id
//! - Stamp every response with the trace and cache-status headers
//! - Record request metrics once the response is known
//!
//! # Design Decisions
//! - `podId` is chosen once per server process
//! - Trace ids are never persisted

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::Instrument;
use uuid::Uuid;

use crate::http::response::ServedBy;
use crate::http::state::DevState;
use crate::observability::metrics;

pub const X_NOW_ID: &str = "x-now-id";
pub const X_NOW_TRACE: &str = "x-now-trace";
pub const X_NOW_CACHE: &str = "x-now-cache";

/// Value of `x-now-trace` for every local response.
pub const TRACE_REGION: &str = "dev1";

/// Five random lowercase alphanumerics identifying this server process.
pub fn generate_pod_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(5)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

/// Per-request identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTrace {
    id: String,
    log_id: String,
}

impl RequestTrace {
    pub fn generate(pod_id: &str) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let log_id = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{pod_id}-{millis}-{log_id}"),
            log_id,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    /// The random hex segment.
    pub fn log_id(&self) -> &str {
        &self.log_id
    }
}

impl std::fmt::Display for RequestTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Middleware: attach a [`RequestTrace`], span the request, stamp the response.
pub async fn trace_request(State(state): State<Arc<DevState>>, mut request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let trace = RequestTrace::generate(&state.pod_id);
    let method = request.method().to_string();
    let span = tracing::info_span!(
        "request",
        trace_id = %trace,
        method = %method,
        path = %request.uri().path()
    );

    request.extensions_mut().insert(trace.clone());
    let mut response = next.run(request).instrument(span.clone()).await;

    stamp_headers(&mut response, &trace);
    let kind = response.extensions().get::<ServedBy>().map_or("error", |s| s.0);
    metrics::record_request(&method, response.status().as_u16(), kind, start);
    span.in_scope(|| {
        tracing::debug!(
            status = response.status().as_u16(),
            kind,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Request complete"
        );
    });
    response
}

/// Add the trace and cache-status headers to `response`.
pub fn stamp_headers(response: &mut Response, trace: &RequestTrace) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(trace.as_str()) {
        headers.insert(X_NOW_ID, value);
    }
    headers.insert(X_NOW_TRACE, HeaderValue::from_static(TRACE_REGION));
    headers.insert(X_NOW_CACHE, HeaderValue::from_static("MISS"));
    headers.insert(header::SERVER, HeaderValue::from_static("now"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_id_is_five_lowercase_alphanumerics() {
        let pod = generate_pod_id();
        assert_eq!(pod.len(), 5);
        assert!(pod.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn trace_id_format() {
        let trace = RequestTrace::generate("ab12c");
        let parts: Vec<&str> = trace.as_str().split('-').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ab12c");
        assert!(parts[1].parse::<u128>().is_ok());
        assert_eq!(parts[2].len(), 32);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(trace.log_id(), parts[2]);
        assert_ne!(trace, RequestTrace::generate("ab12c"));
    }

    #[test]
    fn stamps_trace_headers() {
        let trace = RequestTrace::generate("zzzzz");
        let mut response = Response::new(Body::empty());
        stamp_headers(&mut response, &trace);

        let headers = response.headers();
        assert_eq!(headers[X_NOW_ID], trace.as_str());
        assert_eq!(headers[X_NOW_TRACE], "dev1");
        assert_eq!(headers[X_NOW_CACHE], "MISS");
        assert_eq!(headers[header::SERVER], "now");
    }
}
