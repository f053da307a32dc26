//! Function invocation contract.
//!
//! A function receives one JSON payload per request and answers with one
//! JSON result. Bodies travel base64-encoded in both directions so binary
//! content survives the trip.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Encoding marker for base64 bodies.
pub const BASE64_ENCODING: &str = "base64";

/// A live function produced by a builder.
#[async_trait]
pub trait FunctionHandle: Send + Sync + fmt::Debug {
    /// Run the function for one request.
    async fn invoke(&self, payload: InvocationPayload) -> Result<InvocationResult, InvokeError>;

    /// Release whatever the function holds. Called once it leaves the store.
    async fn destroy(&self) {}
}

/// Request handed to a function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvocationPayload {
    pub method: String,
    /// Original pathname plus the merged query arguments.
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub encoding: String,
    pub body: String,
}

impl InvocationPayload {
    pub fn new(method: impl Into<String>, path: impl Into<String>, headers: BTreeMap<String, String>, body: &[u8]) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers,
            encoding: BASE64_ENCODING.to_string(),
            body: STANDARD.encode(body),
        }
    }

    pub fn decode_body(&self) -> Result<Vec<u8>, InvokeError> {
        STANDARD
            .decode(&self.body)
            .map_err(|e| InvokeError::InvalidResponse(format!("payload body: {e}")))
    }
}

/// A header value that may repeat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum HeaderValues {
    One(String),
    Many(Vec<String>),
}

impl HeaderValues {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values: Vec<&str> = match self {
            HeaderValues::One(value) => vec![value.as_str()],
            HeaderValues::Many(values) => values.iter().map(String::as_str).collect(),
        };
        values.into_iter()
    }
}

/// Response produced by a function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InvocationResult {
    #[serde(rename = "statusCode", default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub headers: BTreeMap<String, HeaderValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl InvocationResult {
    /// A plain-text result with the given status.
    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status_code: Some(status),
            headers: BTreeMap::new(),
            encoding: Some(BASE64_ENCODING.to_string()),
            body: Some(STANDARD.encode(body)),
        }
    }

    /// Raw response bytes, decoding base64 when the result says so.
    pub fn decode_body(&self) -> Result<Bytes, InvokeError> {
        let Some(body) = &self.body else {
            return Ok(Bytes::new());
        };
        match self.encoding.as_deref() {
            Some(BASE64_ENCODING) => STANDARD
                .decode(body)
                .map(Bytes::from)
                .map_err(|e| InvokeError::InvalidResponse(format!("body is not valid base64: {e}"))),
            _ => Ok(Bytes::copy_from_slice(body.as_bytes())),
        }
    }
}

/// Error type for function invocation.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("failed to start function: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("function i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("function exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },

    #[error("invalid function response: {0}")]
    InvalidResponse(String),

    #[error("function has been destroyed")]
    Destroyed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_bodies_decode_by_encoding() {
        let encoded: InvocationResult = serde_json::from_str(
            r#"{ "statusCode": 200, "headers": { "x-a": ["1", "2"] }, "encoding": "base64", "body": "aGVsbG8=" }"#,
        )
        .unwrap();
        assert_eq!(encoded.status_code, Some(200));
        assert_eq!(&encoded.decode_body().unwrap()[..], b"hello");
        assert_eq!(encoded.headers["x-a"].iter().collect::<Vec<_>>(), vec!["1", "2"]);

        let plain: InvocationResult = serde_json::from_str(r#"{ "statusCode": 201, "body": "raw" }"#).unwrap();
        assert_eq!(&plain.decode_body().unwrap()[..], b"raw");
    }

    #[test]
    fn missing_status_code_deserializes_as_none() {
        let result: InvocationResult = serde_json::from_str(r#"{ "body": "" }"#).unwrap();
        assert_eq!(result.status_code, None);
    }

    #[test]
    fn payload_carries_base64_body() {
        let payload = InvocationPayload::new("POST", "/api?x=1", BTreeMap::new(), b"hi");
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["encoding"], "base64");
        assert_eq!(json["body"], "aGk=");
        assert_eq!(payload.decode_body().unwrap(), b"hi");
    }
}
