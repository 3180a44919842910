//! Engine configuration
//!
//! All tuning lives on one value passed in at construction: set once at
//! startup, immutable afterwards. No process-wide mutable defaults.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// MIME lookup collaborator: resolves a file path to a content type,
/// falling back to a generic binary type when unknown.
pub type MimeLookup = Arc<dyn Fn(&Path) -> String + Send + Sync>;

/// Engine configuration
#[derive(Clone)]
pub struct Config {
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Maximum concurrently executing requests (admission bound)
    pub max_concurrent_requests: usize,
    /// TCP keep-alive probe interval for accepted connections
    pub keep_alive_timeout: Duration,
    /// Deadline for reading a request's header section
    pub headers_timeout: Duration,
    /// Content-type resolution for file responses
    pub mime_lookup: MimeLookup,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_body_size: 1_000_000,
            max_concurrent_requests: 100,
            keep_alive_timeout: Duration::from_secs(10),
            headers_timeout: Duration::from_secs(6),
            mime_lookup: Arc::new(|_| "application/octet-stream".to_string()),
        }
    }
}

impl Config {
    /// Create a configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request body ceiling in bytes.
    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    /// Set the admission bound.
    pub fn max_concurrent_requests(mut self, bound: usize) -> Self {
        self.max_concurrent_requests = bound;
        self
    }

    /// Set the TCP keep-alive interval.
    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    /// Set the header-read deadline.
    pub fn headers_timeout(mut self, timeout: Duration) -> Self {
        self.headers_timeout = timeout;
        self
    }

    /// Set the MIME lookup collaborator.
    pub fn mime_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&Path) -> String + Send + Sync + 'static,
    {
        self.mime_lookup = Arc::new(lookup);
        self
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("max_body_size", &self.max_body_size)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("keep_alive_timeout", &self.keep_alive_timeout)
            .field("headers_timeout", &self.headers_timeout)
            .finish_non_exhaustive()
    }
}
