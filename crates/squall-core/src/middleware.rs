//! Middleware resolution and the continuation chain
//!
//! Middlewares register under path prefixes. For a given request path, the
//! qualifying entries flatten in descending prefix specificity (longer
//! declared prefix first) and run via an explicit continuation: a
//! middleware either awaits `next.run(ctx)` or returns a response itself
//! to stop the chain. Resolved lists are memoized per normalized path.

use parking_lot::RwLock;
use squall_router::{normalize_path, PathPattern};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;
use crate::response::Response;

/// Boxed future returned by middlewares and handlers
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A route handler
pub type Handler = Arc<dyn Fn(Context) -> BoxFuture<Result<Response>> + Send + Sync>;

/// A middleware: receives the context and the continuation
pub type Middleware = Arc<dyn Fn(Context, Next) -> BoxFuture<Result<Response>> + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Wrap an async closure as a [`Middleware`].
pub fn middleware_fn<F, Fut>(f: F) -> Middleware
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    Arc::new(move |ctx, next| Box::pin(f(ctx, next)))
}

/// The continuation through the remaining chain, ending at the endpoint
/// (route lookup plus handler).
pub struct Next {
    chain: Arc<[Middleware]>,
    index: usize,
    endpoint: Handler,
}

impl Next {
    pub(crate) fn new(chain: Arc<[Middleware]>, endpoint: Handler) -> Self {
        Self {
            chain,
            index: 0,
            endpoint,
        }
    }

    /// Run the rest of the chain. Not calling this terminates the chain
    /// early with whatever response the current middleware returns.
    pub fn run(mut self, ctx: Context) -> BoxFuture<Result<Response>> {
        match self.chain.get(self.index).cloned() {
            Some(middleware) => {
                self.index += 1;
                middleware(ctx, self)
            }
            None => (self.endpoint)(ctx),
        }
    }
}

struct PrefixEntry {
    prefix: PathPattern,
    middlewares: Vec<Middleware>,
}

/// Maps a normalized path to the ordered middlewares whose registered
/// prefix matches it, with per-path memoization.
pub struct MiddlewareIndex {
    entries: RwLock<Vec<PrefixEntry>>,
    cache: RwLock<HashMap<String, Arc<[Middleware]>>>,
}

impl MiddlewareIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Register middlewares under a path prefix. Clears the memo cache so
    /// paths resolved before a late registration pick up the new entry.
    pub fn register_prefix(&self, prefix: &str, middlewares: Vec<Middleware>) {
        if middlewares.is_empty() {
            return;
        }
        self.entries.write().push(PrefixEntry {
            prefix: PathPattern::compile(prefix),
            middlewares,
        });
        self.cache.write().clear();
    }

    /// The ordered middleware list for a path: qualifying entries sorted
    /// by descending prefix specificity (stable, so ties keep registration
    /// order), flattened. Deterministic across calls via the memo cache.
    pub fn resolve(&self, path: &str) -> Arc<[Middleware]> {
        let path = normalize_path(path);
        if let Some(hit) = self.cache.read().get(&path) {
            return hit.clone();
        }

        let entries = self.entries.read();
        let mut matched: Vec<&PrefixEntry> = entries
            .iter()
            .filter(|entry| entry.prefix.match_prefix(&path))
            .collect();
        matched.sort_by(|a, b| b.prefix.specificity().cmp(&a.prefix.specificity()));

        let flat: Arc<[Middleware]> = matched
            .iter()
            .flat_map(|entry| entry.middlewares.iter().cloned())
            .collect::<Vec<_>>()
            .into();
        drop(entries);

        self.cache.write().insert(path, flat.clone());
        flat
    }

    /// Registered prefix count.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether any prefixes are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for MiddlewareIndex {
    fn default() -> Self {
        Self::new()
    }
}
