//! HTTP Response types
//!
//! Responses carry either a fully buffered body or a channel-fed stream
//! (file streaming, server-sent events). Conversion to hyper happens once
//! at the connection edge.

use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use smallvec::SmallVec;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Channel capacity for streamed response bodies
const STREAM_BUFFER: usize = 16;

/// Outbound body handed to hyper
pub type OutboundBody = BoxBody<Bytes, Infallible>;

/// HTTP Status Code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const PAYLOAD_TOO_LARGE: StatusCode = StatusCode(413);
    pub const UNSUPPORTED_MEDIA_TYPE: StatusCode = StatusCode(415);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);

    /// Get the numeric code
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Check if this is a success status (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    /// Check if this is a server error status (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.0)
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode(code)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Response payload: buffered, or fed chunk by chunk over a channel
#[derive(Debug)]
pub enum Body {
    Full(Bytes),
    Channel(mpsc::Receiver<Bytes>),
}

/// HTTP Response
#[derive(Debug)]
pub struct Response {
    /// Status code
    pub status: StatusCode,
    /// Response headers (stack-allocated for small header counts)
    pub headers: SmallVec<[(String, String); 8]>,
    /// Response body
    pub body: Body,
}

impl Response {
    /// Create an empty response
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: SmallVec::new(),
            body: Body::Full(Bytes::new()),
        }
    }

    /// Create a 200 text/plain response
    pub fn text(body: impl Into<Bytes>) -> Self {
        let mut res = Self::new(StatusCode::OK);
        res.set_header("Content-Type", "text/plain");
        res.body = Body::Full(body.into());
        res
    }

    /// Create a 404 Not Found response
    pub fn not_found() -> Self {
        let mut res = Self::new(StatusCode::NOT_FOUND);
        res.set_header("Content-Type", "text/plain");
        res.body = Body::Full(Bytes::from_static(b"Not Found"));
        res
    }

    /// Create a 400 Bad Request response
    pub fn bad_request() -> Self {
        let mut res = Self::new(StatusCode::BAD_REQUEST);
        res.set_header("Content-Type", "text/plain");
        res.body = Body::Full(Bytes::from_static(b"Bad Request"));
        res
    }

    /// Create a 500 Internal Server Error response
    pub fn internal_error() -> Self {
        let mut res = Self::new(StatusCode::INTERNAL_SERVER_ERROR);
        res.set_header("Content-Type", "text/plain");
        res.body = Body::Full(Bytes::from_static(b"Internal Server Error"));
        res
    }

    /// Create a 503 Service Unavailable response (discarded backlog)
    pub fn service_unavailable() -> Self {
        let mut res = Self::new(StatusCode::SERVICE_UNAVAILABLE);
        res.set_header("Content-Type", "text/plain");
        res.body = Body::Full(Bytes::from_static(b"Service Unavailable"));
        res
    }

    /// Create a JSON error-object response, e.g. `{"error":"..."}`
    pub fn json_error(status: u16, message: &str) -> Self {
        let mut res = Self::new(StatusCode(status));
        res.set_header("Content-Type", "application/json");
        let body = serde_json::json!({ "error": message });
        res.body = Body::Full(Bytes::from(body.to_string()));
        res
    }

    /// Create a channel-fed streaming response. The returned sender feeds
    /// body chunks; dropping it ends the body, and a send error means the
    /// client went away.
    pub fn channel(status: StatusCode) -> (mpsc::Sender<Bytes>, Self) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let mut res = Self::new(status);
        res.body = Body::Channel(rx);
        (tx, res)
    }

    /// Get a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }

    /// Set a header, replacing any existing value (case-insensitive)
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let name_lower = name.to_lowercase();
        self.headers.retain(|(k, _)| k.to_lowercase() != name_lower);
        self.headers.push((name, value.into()));
    }

    /// Get content-type header
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Get a buffered body as UTF-8, for assertions
    pub fn body_string(&self) -> Option<String> {
        match &self.body {
            Body::Full(bytes) => std::str::from_utf8(bytes).ok().map(|s| s.to_string()),
            Body::Channel(_) => None,
        }
    }

    /// Convert to a hyper response at the connection edge.
    pub fn into_hyper(self) -> hyper::Response<OutboundBody> {
        let body = match self.body {
            Body::Full(bytes) => Full::new(bytes).boxed(),
            Body::Channel(rx) => {
                let frames =
                    ReceiverStream::new(rx).map(|chunk| Ok::<_, Infallible>(Frame::data(chunk)));
                // StreamBody is both a Stream and a Body, so `.boxed()`
                // would be ambiguous between StreamExt and BodyExt
                BodyExt::boxed(StreamBody::new(frames))
            }
        };

        let mut res = hyper::Response::new(body);
        *res.status_mut() = hyper::StatusCode::from_u16(self.status.0)
            .unwrap_or(hyper::StatusCode::INTERNAL_SERVER_ERROR);
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                http::HeaderName::try_from(name.as_str()),
                http::HeaderValue::try_from(value.as_str()),
            ) {
                res.headers_mut().append(n, v);
            }
        }
        res
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}
