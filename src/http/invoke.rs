//! Function invocation over HTTP.
//!
//! # Responsibilities
//! - Turn an inbound request into an [`InvocationPayload`]
//! - Turn an [`InvocationResult`] back into a response
//!
//! # Design Decisions
//! - The payload path is the original pathname with the route's merged
//!   query arguments, not the rewritten destination
//! - Hop-by-hop headers are dropped in both directions

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::{
    body::Body,
    http::{header, request::Parts, HeaderName, HeaderValue, StatusCode},
    response::Response,
};

use crate::assets::function::{InvocationPayload, InvocationResult};
use crate::http::proxy::HOP_BY_HOP;
use crate::http::request::{RequestTrace, TRACE_REGION, X_NOW_ID, X_NOW_TRACE};
use crate::http::response::{DevErrorResponse, ErrorCode, ServedBy};

/// Build the payload for one invocation.
pub fn build_payload(
    parts: &Parts,
    body: &[u8],
    trace: &RequestTrace,
    remote: Option<SocketAddr>,
    args: &BTreeMap<String, String>,
) -> InvocationPayload {
    let mut headers = BTreeMap::new();
    for (name, value) in &parts.headers {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        let Ok(value) = value.to_str() else {
            continue;
        };
        headers
            .entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()))
        .unwrap_or_default();
    let ip = remote.map(|addr| addr.ip().to_string()).unwrap_or_default();

    headers.insert("x-forwarded-for".into(), ip.clone());
    headers.insert("x-forwarded-proto".into(), "http".into());
    headers.insert("x-forwarded-host".into(), host.clone());
    headers.insert("x-real-ip".into(), ip);
    headers.insert(X_NOW_ID.into(), trace.as_str().to_string());
    headers.insert(X_NOW_TRACE.into(), TRACE_REGION.into());
    headers.insert("x-now-deployment-url".into(), host);
    headers.insert("x-now-log-id".into(), trace.log_id().to_string());

    InvocationPayload::new(parts.method.as_str(), invocation_path(parts.uri.path(), args), headers, body)
}

/// `pathname` with `args` as its query string.
pub fn invocation_path(pathname: &str, args: &BTreeMap<String, String>) -> String {
    if args.is_empty() {
        return pathname.to_string();
    }
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(args)
        .finish();
    format!("{pathname}?{query}")
}

/// Convert a function result into a response.
pub fn relay_result(result: InvocationResult) -> Result<Response, DevErrorResponse> {
    let status = result.status_code.ok_or_else(|| {
        DevErrorResponse::new(
            ErrorCode::NoStatusCodeFromLambda,
            "The function did not return a status code",
        )
    })?;
    let status = StatusCode::from_u16(status).map_err(|_| {
        DevErrorResponse::new(
            ErrorCode::InvalidLambdaResponse,
            format!("The function returned an invalid status code {status}"),
        )
    })?;
    let body = result
        .decode_body()
        .map_err(|e| DevErrorResponse::new(ErrorCode::InvalidLambdaResponse, e.to_string()))?;

    let mut response = Response::new(Body::from(body.clone()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for (name, values) in &result.headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            tracing::warn!(header = %name, "Dropping invalid function response header");
            continue;
        };
        if HOP_BY_HOP.contains(&name.as_str()) || name == header::CONTENT_LENGTH {
            continue;
        }
        for value in values.iter() {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(name.clone(), value);
            }
        }
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    response.extensions_mut().insert(ServedBy("function"));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::function::HeaderValues;
    use axum::http::Request;

    #[test]
    fn payload_carries_forwarding_headers_and_merged_path() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/user?x=1")
            .header("host", "localhost:3000")
            .header("connection", "keep-alive")
            .header("accept", "text/html")
            .body(())
            .unwrap();
        let (parts, ()) = request.into_parts();
        let trace = RequestTrace::generate("abcde");
        let args = BTreeMap::from([("id".to_string(), "7".to_string()), ("x".to_string(), "1".to_string())]);

        let payload = build_payload(&parts, b"hi", &trace, Some("10.0.0.2:5000".parse().unwrap()), &args);

        assert_eq!(payload.method, "POST");
        assert_eq!(payload.path, "/api/user?id=7&x=1");
        assert_eq!(payload.body, "aGk=");
        assert_eq!(payload.headers["x-forwarded-for"], "10.0.0.2");
        assert_eq!(payload.headers["x-real-ip"], "10.0.0.2");
        assert_eq!(payload.headers["x-forwarded-host"], "localhost:3000");
        assert_eq!(payload.headers["x-forwarded-proto"], "http");
        assert_eq!(payload.headers["x-now-id"], trace.as_str());
        assert_eq!(payload.headers["x-now-log-id"], trace.log_id());
        assert_eq!(payload.headers["accept"], "text/html");
        assert!(!payload.headers.contains_key("connection"));
    }

    #[test]
    fn path_without_args_is_the_pathname() {
        assert_eq!(invocation_path("/a b", &BTreeMap::new()), "/a b");
    }

    #[test]
    fn relays_status_headers_and_body() {
        let mut result = InvocationResult::text(201, "created");
        result
            .headers
            .insert("set-cookie".into(), HeaderValues::Many(vec!["a=1".into(), "b=2".into()]));
        result.headers.insert("connection".into(), HeaderValues::One("close".into()));

        let response = relay_result(result).unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get_all("set-cookie").iter().count(), 2);
        assert!(response.headers().get("connection").is_none());
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "7");
    }

    #[test]
    fn missing_status_code_is_rejected() {
        let err = relay_result(InvocationResult::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::NoStatusCodeFromLambda);
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }
}
