//! Response construction.
//!
//! # Responsibilities
//! - Build the fixed-text error responses (403/404/422/429/500/503)
//! - Build redirects
//! - Stamp `Vary: Accept-Encoding` on everything the pipeline returns
//!
//! # Design Decisions
//! - Error bodies are short plain text, never internal error details
//! - Builders cannot fail: invalid header values fall back to a safe default

use axum::body::{Body, Bytes};
use axum::http::header::{self, HeaderValue};
use axum::http::StatusCode;
use axum::response::Response;

/// Body of the fixed response for directory targets without an index.
pub const DIRECTORY_BROWSING_UNSUPPORTED: &str = "directory browsing is not supported";

/// Plain-text response with the canonical reason as body when `message` is empty.
pub fn text(status: StatusCode, message: &str) -> Response {
    let body = if message.is_empty() {
        status.canonical_reason().unwrap_or("error").to_string()
    } else {
        message.to_string()
    };
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    vary(response)
}

/// `302 Found` pointing at `location`.
pub fn redirect(location: &str) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::FOUND;
    match HeaderValue::from_str(location) {
        Ok(value) => {
            response.headers_mut().insert(header::LOCATION, value);
        }
        Err(_) => {
            tracing::warn!(location, "redirect target is not a valid header value");
            return text(StatusCode::INTERNAL_SERVER_ERROR, "");
        }
    }
    vary(response)
}

/// Generated content with an optional `Content-Encoding`.
pub fn content(status: StatusCode, content_type: &str, encoding: Option<&'static str>, body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type).unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    if let Some(encoding) = encoding {
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(encoding));
    }
    vary(response)
}

/// Add `Vary: Accept-Encoding`.
pub fn vary(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
    response
}
