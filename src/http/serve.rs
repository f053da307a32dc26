//! Serving stored static files and blobs.
//!
//! Static files go through `tower-http`'s `ServeFile` (MIME by extension,
//! ranges, conditional requests). Blobs are answered from memory.

use std::collections::BTreeMap;
use std::path::Path;

use axum::{
    body::Body,
    http::{header, HeaderName, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Response},
};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::assets::artifact::Blob;
use crate::http::response::ServedBy;

/// Stream a file from disk.
pub async fn serve_static(path: &Path, request: Request<Body>) -> Response {
    let mut response = match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    };
    response.extensions_mut().insert(ServedBy("static"));
    response
}

/// Answer with an in-memory blob stored under `key`.
pub fn serve_blob(key: &str, blob: &Blob, method: &Method) -> Response {
    let content_type = blob
        .content_type
        .clone()
        .unwrap_or_else(|| mime_guess::from_path(key).first_or_octet_stream().to_string());

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(blob.bytes.clone())
    };
    let mut response = (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, blob.bytes.len().to_string()),
        ],
        body,
    )
        .into_response();
    response.extensions_mut().insert(ServedBy("blob"));
    response
}

/// Apply a route's status and headers to a locally served response.
///
/// The status only replaces a plain 200, so partial and not-modified
/// answers keep their meaning. Route headers replace existing ones.
pub fn apply_route(response: &mut Response, status: Option<u16>, headers: &BTreeMap<String, String>) {
    if let Some(status) = status.and_then(|s| StatusCode::from_u16(s).ok()) {
        if response.status() == StatusCode::OK {
            *response.status_mut() = status;
        }
    }
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            response.headers_mut().insert(name, value);
        }
    }
}

/// Add a route's headers to a function response without overriding it.
pub fn merge_route_headers(response: &mut Response, headers: &BTreeMap<String, String>) {
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            if !response.headers().contains_key(&name) {
                response.headers_mut().insert(name, value);
            }
        }
    }
}
