//! Minimal server: a few routes, a request-logging middleware and a
//! server-sent-event counter.
//!
//! Run with `cargo run --example hello`, then try:
//!   curl http://localhost:3000/
//!   curl http://localhost:3000/api/users/7?verbose=yes
//!   curl -N http://localhost:3000/events

use serde_json::json;
use squall_core::{
    handler_fn, middleware_fn, Config, EventSource, RouteModule, RouteSet, Server,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> squall_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let counter = Arc::new(AtomicU64::new(0));

    let routes = RouteSet::new()
        .module(
            RouteModule::new("/")
                .middleware(middleware_fn(|ctx, next| async move {
                    tracing::info!(method = %ctx.method(), path = %ctx.path(), "request");
                    next.run(ctx).await
                }))
                .get(handler_fn(|ctx| async move { Ok(ctx.text("hello")) })),
        )
        .module(
            RouteModule::new("/api/users/[id]").get(handler_fn(|ctx| async move {
                let id = ctx.param("id").unwrap_or_default().to_string();
                let verbose = ctx.query("verbose") == Some("yes");
                ctx.json(&json!({ "id": id, "verbose": verbose }))
            })),
        )
        .module(
            RouteModule::new("/events").get(handler_fn(move |ctx| {
                let counter = counter.clone();
                async move {
                    let source = EventSource::poll(
                        move || {
                            let n = counter.fetch_add(1, Ordering::SeqCst);
                            async move { Ok(json!({ "count": n })) }
                        },
                        Duration::from_secs(1),
                    );
                    Ok(ctx.events(source))
                }
            })),
        );

    let server = Server::start(routes, Config::default());
    server.listen(3000).await
}
