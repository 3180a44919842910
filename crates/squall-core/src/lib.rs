//! squall-core: embedded HTTP dispatch engine
//!
//! Routes declared with `[param]` patterns, prefix middlewares with an
//! explicit continuation, bounded-concurrency admission, on-demand body
//! decoding and channel-fed streaming responses (files, server-sent
//! events). Route discovery lives outside the engine; callers hand over a
//! [`RouteSet`] and get a running [`Server`].

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod body;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod middleware;
pub mod queue;
pub mod request;
pub mod response;
pub mod routes;
pub mod server;
pub mod sse;

// Re-exports
pub use body::DecodedBody;
pub use config::Config;
pub use context::Context;
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use middleware::{handler_fn, middleware_fn, Handler, Middleware, MiddlewareIndex, Next};
pub use queue::AdmissionQueue;
pub use request::{Request, RequestBuilder};
pub use response::{Body, Response, StatusCode};
pub use routes::{RouteModule, RouteSet};
pub use server::Server;
pub use sse::{EventSource, StreamSession};

// Router re-exports
pub use squall_router::{normalize_path, PathPattern, RouteTable};
