//! Error and redirect responses.
//!
//! # Responsibilities
//! - Map per-request failures to a status, a stable code and a message
//! - Render them as JSON or plaintext depending on `Accept`
//! - Build redirect responses
//!
//! # Design Decisions
//! - Every failure is answered here; nothing propagates past the handler
//! - Codes are stable strings clients can match on

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;

/// How a response was produced, for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServedBy(pub &'static str);

/// Stable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    FileNotFound,
    NoStatusCodeFromLambda,
    InvalidLambdaResponse,
    BuildFailed,
    ProxyError,
    InvalidRequestBody,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::NoStatusCodeFromLambda => "NO_STATUS_CODE_FROM_LAMBDA",
            ErrorCode::InvalidLambdaResponse => "INVALID_LAMBDA_RESPONSE",
            ErrorCode::BuildFailed => "BUILD_FAILED",
            ErrorCode::ProxyError => "PROXY_ERROR",
            ErrorCode::InvalidRequestBody => "INVALID_REQUEST_BODY",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::FileNotFound => StatusCode::NOT_FOUND,
            ErrorCode::NoStatusCodeFromLambda | ErrorCode::InvalidLambdaResponse | ErrorCode::ProxyError => {
                StatusCode::BAD_GATEWAY
            }
            ErrorCode::BuildFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InvalidRequestBody => StatusCode::BAD_REQUEST,
        }
    }
}

/// A per-request failure ready to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevErrorResponse {
    pub status: StatusCode,
    pub code: ErrorCode,
    pub message: String,
}

impl DevErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status(),
            code,
            message: message.into(),
        }
    }

    pub fn not_found() -> Self {
        Self::new(ErrorCode::FileNotFound, "The page could not be found")
    }

    /// Render for a client that sent `request_headers`.
    pub fn render(&self, request_headers: &HeaderMap) -> Response {
        let (content_type, body) = if accepts_json(request_headers) {
            let body = json!({
                "error": {
                    "code": self.code.as_str(),
                    "message": self.message,
                    "status": self.status.as_u16(),
                }
            });
            ("application/json; charset=utf-8", body.to_string())
        } else {
            (
                "text/plain; charset=utf-8",
                format!("{}: {}\nCode: {}\n", self.status.as_u16(), self.message, self.code.as_str()),
            )
        };

        let mut response = (self.status, [(header::CONTENT_TYPE, content_type)], body).into_response();
        response.extensions_mut().insert(ServedBy("error"));
        response
    }
}

/// True when the client asked for JSON.
pub fn accepts_json(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|v| v.split(';').next().unwrap_or("").trim())
        .any(|media| media == "application/json" || media.ends_with("+json"))
}

/// Redirect to `location` with a short human-readable body.
pub fn redirect(status: StatusCode, location: &str) -> Response {
    let body = format!("Redirecting to {location} ({})\n", status.as_u16());
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    if let Ok(value) = HeaderValue::from_str(location) {
        headers.insert(header::LOCATION, value);
    }
    response.extensions_mut().insert(ServedBy("redirect"));
    response
}

/// Answer for requests arriving after shutdown began.
pub fn unavailable() -> Response {
    let mut response = DevErrorResponse::not_found().render(&HeaderMap::new());
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn renders_json_when_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html, application/json;q=0.9"));

        let response = DevErrorResponse::not_found().render(&headers);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["error"]["code"], "FILE_NOT_FOUND");
        assert_eq!(body["error"]["status"], 404);
    }

    #[tokio::test]
    async fn renders_plaintext_otherwise() {
        let response = DevErrorResponse::new(ErrorCode::NoStatusCodeFromLambda, "boom").render(&HeaderMap::new());
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_string(response).await, "502: boom\nCode: NO_STATUS_CODE_FROM_LAMBDA\n");
    }

    #[tokio::test]
    async fn redirect_sets_location_and_body() {
        let response = redirect(StatusCode::MOVED_PERMANENTLY, "/new/page");
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "/new/page");
        assert_eq!(body_string(response).await, "Redirecting to /new/page (301)\n");
    }
}
