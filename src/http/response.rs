//! Mutable response written by middleware and handlers.
//!
//! # Responsibilities
//! - Accumulate status, headers and body during chain execution
//! - Convert into a wire response for hyper
//!
//! # Design Decisions
//! - Body is buffered; Content-Length is computed on conversion
//! - A response starts as `200 OK` with an empty body

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use axum::http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};

/// Response under construction.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn set_content_type(&mut self, content_type: &'static str) {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }

    /// Append bytes to the body.
    pub fn write(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    /// Replace the body.
    pub fn set_body(&mut self, bytes: impl AsRef<[u8]>) {
        self.body.clear();
        self.body.extend_from_slice(bytes.as_ref());
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Replace status and body with a plain-text error message.
    pub fn send_error(&mut self, status: StatusCode, message: &str) {
        self.status = status;
        self.set_content_type("text/plain; charset=utf-8");
        self.set_body(message.as_bytes());
    }

    /// Convert into the response type hyper writes to the socket.
    pub fn into_http(self) -> axum::response::Response {
        let body: Bytes = self.body.freeze();
        let len = body.len();
        let mut response = axum::response::Response::new(Body::from(body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(len));
        response
    }
}

/// Fixed response produced without running the pipeline.
pub fn plain(status: StatusCode, message: &str) -> axum::response::Response {
    let mut response = Response::new();
    response.send_error(status, message);
    response.into_http()
}
