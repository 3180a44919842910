//! HTTP Request type
//!
//! The engine works on its own request value, decoupled from hyper;
//! conversion happens once at the connection edge. The body stays a lazy
//! byte stream until a handler asks for it.

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use smallvec::SmallVec;

/// Boxed error for body streams
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The undecoded request payload: a byte stream read on demand
pub type IncomingBody = BoxBody<Bytes, BoxError>;

/// HTTP Request
pub struct Request {
    /// Uppercase HTTP method
    pub method: String,
    /// Raw request target (path plus optional query string)
    pub target: String,
    /// Request headers (stack-allocated for small header counts)
    pub headers: SmallVec<[(String, String); 16]>,
    /// Undecoded request payload
    pub body: IncomingBody,
}

impl Request {
    /// Create a request with an empty body.
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            target: target.into(),
            headers: SmallVec::new(),
            body: empty_body(),
        }
    }

    /// Get a header value (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }

    /// Get the declared content type, treating an empty header as absent.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type").filter(|v| !v.is_empty())
    }

    /// Convert a hyper request at the connection edge.
    pub fn from_hyper(req: hyper::Request<Incoming>) -> Self {
        let method = req.method().as_str().to_uppercase();
        let target = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default();

        let mut headers = SmallVec::new();
        for (name, value) in req.headers() {
            if let Ok(v) = value.to_str() {
                headers.push((name.to_string(), v.to_string()));
            }
        }

        Self {
            method,
            target,
            headers,
            body: req.into_body().map_err(|e| Box::new(e) as BoxError).boxed(),
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// An empty request body
pub fn empty_body() -> IncomingBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// A fully buffered request body (used by tests and local dispatch)
pub fn full_body(bytes: impl Into<Bytes>) -> IncomingBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Builder for constructing requests
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// Create a new builder
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            request: Request::new(method, target),
        }
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.push((name.into(), value.into()));
        self
    }

    /// Set a buffered body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request.body = full_body(body);
        self
    }

    /// Build the request
    pub fn build(self) -> Request {
        self.request
    }
}
