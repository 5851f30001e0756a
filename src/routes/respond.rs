//! JSON response helpers shared by every route

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, CONTENT_TYPE,
};
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::error;

use crate::types::{Result, SpendbookError};

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Error body returned by every failing route
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    /// Underlying cause when a dependency is unavailable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

fn with_cors(mut response: Response<BoxBody>) -> Response<BoxBody> {
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PATCH, DELETE, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    response
}

fn build(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<BoxBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    with_cors(response)
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    build(status, "application/json", json)
}

pub fn text_response(status: StatusCode, text: &'static str) -> Response<BoxBody> {
    build(status, "text/plain", text)
}

pub fn cors_preflight() -> Response<BoxBody> {
    let mut response = build(StatusCode::NO_CONTENT, "text/plain", Bytes::new());
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    response
}

pub fn not_found() -> Response<BoxBody> {
    json_response(
        StatusCode::NOT_FOUND,
        &ErrorResponse {
            success: false,
            message: "Route not found".into(),
            code: None,
            cause: None,
        },
    )
}

/// Render an error as a JSON response.
///
/// Store connection failures become `503 dependency unavailable` with the
/// cause attached for diagnostics.
pub fn error_response(err: &SpendbookError) -> Response<BoxBody> {
    let status = err.status_code();
    let body = match err {
        SpendbookError::Connection(cause) => ErrorResponse {
            success: false,
            message: "dependency unavailable".into(),
            code: Some(cause.code()),
            cause: Some(cause.to_string()),
        },
        other => {
            if status.is_server_error() {
                error!("Request failed: {}", other);
            }
            ErrorResponse {
                success: false,
                message: other.to_string(),
                code: Some(other.code()),
                cause: None,
            }
        }
    };
    json_response(status, &body)
}

pub fn from_result(result: Result<Response<BoxBody>>) -> Response<BoxBody> {
    result.unwrap_or_else(|e| error_response(&e))
}
