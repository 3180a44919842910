//! Route discovery contract
//!
//! The filesystem walk that finds route modules lives outside the engine.
//! Whatever discovers them hands over an explicit, statically-typed
//! `RouteSet`: per declared path, the `(METHOD, handler)` pairs it exports
//! and an optional ordered middleware list.

use crate::middleware::{Handler, Middleware};

/// One discovered route module: a declared path plus its exports
pub struct RouteModule {
    /// Declared URL path, possibly with `[param]` segments
    pub path: String,
    /// Ordered middlewares registered under this path as a prefix
    pub middlewares: Vec<Middleware>,
    /// Handlers keyed by uppercase HTTP method, in declaration order
    pub handlers: Vec<(String, Handler)>,
}

impl RouteModule {
    /// Start a module for the given declared path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            middlewares: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Attach a handler for an HTTP method.
    pub fn handle(mut self, method: &str, handler: Handler) -> Self {
        self.handlers.push((method.to_uppercase(), handler));
        self
    }

    /// Attach a GET handler.
    pub fn get(self, handler: Handler) -> Self {
        self.handle("GET", handler)
    }

    /// Attach a POST handler.
    pub fn post(self, handler: Handler) -> Self {
        self.handle("POST", handler)
    }

    /// Attach a PUT handler.
    pub fn put(self, handler: Handler) -> Self {
        self.handle("PUT", handler)
    }

    /// Attach a DELETE handler.
    pub fn delete(self, handler: Handler) -> Self {
        self.handle("DELETE", handler)
    }

    /// Attach a middleware under this module's path prefix.
    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }
}

/// The full set of discovered route modules, in discovery order
#[derive(Default)]
pub struct RouteSet {
    pub modules: Vec<RouteModule>,
}

impl RouteSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module.
    pub fn module(mut self, module: RouteModule) -> Self {
        self.modules.push(module);
        self
    }
}
