//! HTTP server front end
//!
//! Owns the listening socket and the accept loop. Each parsed request is
//! converted once at the connection edge, then handed to the admission
//! queue; the connection waits on a oneshot for its response. A request
//! discarded from the backlog at shutdown resolves as 503.

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::middleware::Middleware;
use crate::queue::AdmissionQueue;
use crate::request::Request;
use crate::response::{OutboundBody, Response};
use crate::routes::RouteSet;

struct Inner {
    dispatcher: Arc<Dispatcher>,
    queue: AdmissionQueue,
    config: Config,
    // Level-triggered so a close() before or between accept polls is not lost
    shutdown: watch::Sender<bool>,
    local_addr: Mutex<Option<SocketAddr>>,
}

/// The engine entry point: routes plus configuration, ready to listen
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    /// Build a server from discovered routes and configuration.
    pub fn start(set: RouteSet, config: Config) -> Self {
        let queue = AdmissionQueue::new(config.max_concurrent_requests);
        let dispatcher = Arc::new(Dispatcher::new(set, config.clone()));
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                dispatcher,
                queue,
                config,
                shutdown,
                local_addr: Mutex::new(None),
            }),
        }
    }

    /// Register a middleware prefix after startup. Takes effect for the
    /// next resolved request.
    pub fn use_middleware(&self, prefix: &str, middleware: Middleware) {
        self.inner.dispatcher.use_middleware(prefix, middleware);
    }

    /// The bound address, available once `listen` has opened the socket.
    /// Port 0 in the listen call resolves to the real port here.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Run one request through the dispatch pipeline directly, without a
    /// socket. The admission queue is bypassed.
    pub async fn dispatch(&self, request: Request) -> Response {
        self.inner.dispatcher.dispatch(request).await
    }

    /// Stop accepting connections and discard the backlog. In-flight
    /// requests run to completion; queued ones resolve with 503.
    pub fn close(&self) {
        self.inner.shutdown.send_replace(true);
        self.inner.queue.clear();
    }

    /// Bind the port and serve until `close` is called.
    pub async fn listen(&self, port: u16) -> Result<()> {
        let mut shutdown = self.inner.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Ok(());
        }

        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let listener = self.bind(&addr)?;
        let local = listener.local_addr()?;
        *self.inner.local_addr.lock() = Some(local);
        tracing::info!(addr = %local, "listening");

        loop {
            let stream = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _peer)) => stream,
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                        continue;
                    }
                },
                _ = shutdown.wait_for(|closed| *closed) => {
                    tracing::info!(addr = %local, "shutting down");
                    return Ok(());
                }
            };

            let inner = self.inner.clone();
            tokio::spawn(async move {
                let headers_timeout = inner.config.headers_timeout;
                let service = service_fn(move |req: hyper::Request<Incoming>| {
                    let inner = inner.clone();
                    async move { Ok::<_, Infallible>(handle(inner, req).await) }
                });

                let io = TokioIo::new(stream);
                let conn = hyper::server::conn::http1::Builder::new()
                    .timer(TokioTimer::new())
                    .header_read_timeout(headers_timeout)
                    .serve_connection(io, service);
                if let Err(err) = conn.await {
                    tracing::debug!(error = %err, "connection ended with error");
                }
            });
        }
    }

    fn bind(&self, addr: &SocketAddr) -> Result<TcpListener> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nodelay(true)?;
        socket.set_tcp_keepalive(
            &TcpKeepalive::new().with_time(self.inner.config.keep_alive_timeout),
        )?;
        socket.bind(&(*addr).into())?;
        socket.listen(1024)?;
        socket.set_nonblocking(true)?;
        Ok(TcpListener::from_std(socket.into())?)
    }
}

/// Admit one request and wait for its response. The oneshot closes without
/// a value only when the backlog discarded the task at shutdown.
async fn handle(inner: Arc<Inner>, req: hyper::Request<Incoming>) -> hyper::Response<OutboundBody> {
    let request = Request::from_hyper(req);
    let (tx, rx) = oneshot::channel();

    let dispatcher = inner.dispatcher.clone();
    inner.queue.admit(Box::pin(async move {
        let _ = tx.send(dispatcher.dispatch(request).await);
    }));

    match rx.await {
        Ok(response) => response.into_hyper(),
        Err(_) => Response::service_unavailable().into_hyper(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::handler_fn;
    use crate::routes::RouteModule;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::sleep;

    fn demo_routes() -> RouteSet {
        RouteSet::new()
            .module(RouteModule::new("/").get(handler_fn(|ctx| async move {
                Ok(ctx.text("hello"))
            })))
            .module(
                RouteModule::new("/api/[id]").get(handler_fn(|ctx| async move {
                    let id = ctx.param("id").unwrap_or_default().to_string();
                    ctx.json(&json!({ "id": id }))
                })),
            )
    }

    async fn bound_server() -> (Server, SocketAddr) {
        let server = Server::start(demo_routes(), Config::default());
        let listening = server.clone();
        tokio::spawn(async move { listening.listen(0).await });

        for _ in 0..100 {
            if let Some(addr) = server.local_addr() {
                return (server, addr);
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("server never bound");
    }

    async fn raw_request(addr: SocketAddr, target: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request =
            format!("GET {target} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        String::from_utf8(raw).unwrap()
    }

    #[tokio::test]
    async fn test_serves_param_route_over_socket() {
        let (server, addr) = bound_server().await;

        let response = raw_request(addr, "/api/7").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("content-type: application/json"));
        assert!(response.ends_with(r#"{"id":"7"}"#));

        server.close();
    }

    #[tokio::test]
    async fn test_unknown_path_is_404_over_socket() {
        let (server, addr) = bound_server().await;

        let response = raw_request(addr, "/nope").await;
        assert!(response.starts_with("HTTP/1.1 404"));
        assert!(response.ends_with("Not Found"));

        server.close();
    }

    #[tokio::test]
    async fn test_close_stops_accepting() {
        let (server, addr) = bound_server().await;
        server.close();
        sleep(Duration::from_millis(20)).await;

        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_close_before_listen_never_accepts() {
        let server = Server::start(demo_routes(), Config::default());
        server.close();

        // An already-closed server must return instead of serving
        tokio::time::timeout(Duration::from_secs(1), server.listen(0))
            .await
            .expect("listen must return once closed")
            .unwrap();
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_local_dispatch_bypasses_socket() {
        let server = Server::start(demo_routes(), Config::default());
        let res = server
            .dispatch(crate::request::RequestBuilder::new("GET", "/").build())
            .await;
        assert_eq!(res.body_string().unwrap(), "hello");
    }
}
