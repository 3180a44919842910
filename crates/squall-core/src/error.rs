//! Error types for squall-core

use thiserror::Error;

use crate::response::Response;

/// Result type alias for squall operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the request-dispatch engine
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Malformed request line (missing method or target)
    #[error("bad request")]
    BadRequest,

    /// Request body exceeded the configured ceiling
    #[error("payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Declared content type is not decodable
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Body failed structured parsing, or carried a forbidden key
    #[error("malformed body: {0}")]
    MalformedBody(String),

    /// No route matched
    #[error("route not found: {method} {path}")]
    NotFound { method: String, path: String },

    /// I/O error (listener, file streaming)
    #[error("I/O error: {0}")]
    Io(String),

    /// Any uncaught failure in middleware, handler or routing
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// The HTTP status this error maps to on the wire.
    pub fn status(&self) -> u16 {
        match self {
            Error::BadRequest => 400,
            Error::PayloadTooLarge { .. } => 413,
            Error::UnsupportedMediaType(_) => 415,
            Error::MalformedBody(_) => 400,
            Error::NotFound { .. } => 404,
            Error::Io(_) | Error::Internal(_) => 500,
        }
    }

    /// Convert into a wire response. Body-class errors carry a JSON error
    /// object; the rest use the canned plain-text bodies.
    pub fn into_response(self) -> Response {
        match &self {
            Error::BadRequest => Response::bad_request(),
            Error::NotFound { .. } => Response::not_found(),
            Error::Io(_) | Error::Internal(_) => Response::internal_error(),
            Error::PayloadTooLarge { .. }
            | Error::UnsupportedMediaType(_)
            | Error::MalformedBody(_) => Response::json_error(self.status(), &self.to_string()),
        }
    }
}
