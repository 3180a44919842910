//! Request dispatch
//!
//! The per-request control flow: validate the request line, parse the
//! target, resolve the middleware chain, run it to the endpoint (route
//! lookup plus handler), and convert every uncaught failure into a 500 at
//! the outermost boundary so the listener never crashes.

use futures_util::FutureExt;
use squall_router::{normalize_path, RouteTable};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::middleware::{Handler, MiddlewareIndex, Next};
use crate::request::Request;
use crate::response::Response;
use crate::routes::RouteSet;

/// The control-flow coordinator for one engine instance
pub struct Dispatcher {
    routes: Arc<RouteTable<Handler>>,
    middlewares: MiddlewareIndex,
    config: Config,
}

impl Dispatcher {
    /// Build the routing table and middleware index from a discovered
    /// route set.
    pub fn new(set: RouteSet, config: Config) -> Self {
        let mut routes = RouteTable::new();
        let middlewares = MiddlewareIndex::new();

        for module in set.modules {
            if !module.middlewares.is_empty() {
                middlewares.register_prefix(&module.path, module.middlewares);
            }
            for (method, handler) in module.handlers {
                tracing::info!(method = %method, path = %module.path, "registered route");
                routes.register(&method, &module.path, handler);
            }
        }

        Self {
            routes: Arc::new(routes),
            middlewares,
            config,
        }
    }

    /// Register a middleware prefix at runtime.
    pub fn use_middleware(&self, prefix: &str, middleware: crate::middleware::Middleware) {
        self.middlewares.register_prefix(prefix, vec![middleware]);
    }

    /// Run one request through the full pipeline. Never returns an error
    /// and never unwinds: failures become taxonomy responses, panics
    /// become 500s.
    pub async fn dispatch(&self, request: Request) -> Response {
        let method = request.method.clone();
        let target = request.target.clone();

        match AssertUnwindSafe(self.run_pipeline(request)).catch_unwind().await {
            Ok(Ok(response)) => {
                tracing::debug!(
                    method = %method,
                    target = %target,
                    status = %response.status,
                    "request handled"
                );
                response
            }
            Ok(Err(err)) => {
                if err.status() >= 500 {
                    tracing::error!(method = %method, target = %target, error = %err, "request failed");
                } else {
                    tracing::debug!(method = %method, target = %target, error = %err, "request rejected");
                }
                err.into_response()
            }
            Err(_) => {
                tracing::error!(method = %method, target = %target, "request pipeline panicked");
                Response::internal_error()
            }
        }
    }

    async fn run_pipeline(&self, request: Request) -> Result<Response> {
        if request.method.is_empty() || request.target.is_empty() {
            return Err(Error::BadRequest);
        }

        let (path, query) = parse_target(&request.target);
        let chain = self.middlewares.resolve(&path);
        let ctx = Context::new(request, path, query, &self.config);

        let routes = self.routes.clone();
        let endpoint: Handler = Arc::new(move |mut ctx: Context| {
            let routes = routes.clone();
            Box::pin(async move {
                match routes.resolve(ctx.method(), ctx.path()) {
                    Some((handler, params)) => {
                        ctx.params = params.into_iter().collect();
                        handler(ctx).await
                    }
                    None => Err(Error::NotFound {
                        method: ctx.method().to_string(),
                        path: ctx.path().to_string(),
                    }),
                }
            })
        });

        Next::new(chain, endpoint).run(ctx).await
    }
}

/// Split a request target into its normalized path and decoded query map.
fn parse_target(target: &str) -> (String, HashMap<String, String>) {
    let (raw_path, raw_query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };
    let query = form_urlencoded::parse(raw_query.as_bytes())
        .into_owned()
        .collect();
    (normalize_path(raw_path), query)
}
