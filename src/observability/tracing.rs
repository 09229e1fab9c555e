//! Request spans.
//!
//! # Responsibilities
//! - Create one span per request carrying the request id, method, host and path
//!
//! # Design Decisions
//! - The request id is set before the span is created, so every event
//!   logged while serving carries it

use axum::body::Body;
use axum::http::{header, Request};
use ::tracing::Span;

use crate::http::request::RequestIdExt;

/// `make_span_with` callback for the HTTP trace layer.
pub fn request_span(request: &Request<Body>) -> Span {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    ::tracing::info_span!(
        "request",
        request_id = %request.request_id(),
        method = %request.method(),
        host = %host,
        path = %request.uri().path()
    )
}
