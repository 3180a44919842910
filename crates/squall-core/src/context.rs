//! Per-request context
//!
//! The façade handed to middlewares and handlers: route parameters, query
//! parameters, the memoized body accessor, and the response-writing
//! primitives. Setters return `self`, so a handler reads as one chain:
//! `ctx.status(201).set_header("x-id", id).json(&value)`.

use bytes::{Bytes, BytesMut};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

use crate::body::{self, DecodedBody};
use crate::config::{Config, MimeLookup};
use crate::error::{Error, Result};
use crate::request::{IncomingBody, Request};
use crate::response::{Body, Response, StatusCode};
use crate::sse::{EventSource, StreamSession};

/// File streaming chunk size
const FILE_CHUNK: usize = 64 * 1024;

enum BodyState {
    Pending(IncomingBody),
    Decoded(Result<Arc<DecodedBody>>),
}

/// Per-request façade binding routing, body decoding and response writing
pub struct Context {
    method: String,
    path: String,
    /// Route parameters, populated at route match
    pub params: HashMap<String, String>,
    query: HashMap<String, String>,
    request_headers: SmallVec<[(String, String); 16]>,
    body: BodyState,
    max_body_size: usize,
    mime_lookup: MimeLookup,
    status: StatusCode,
    response_headers: SmallVec<[(String, String); 8]>,
}

impl Context {
    /// Build a context from a converted request plus its parsed target.
    pub fn new(
        request: Request,
        path: String,
        query: HashMap<String, String>,
        config: &Config,
    ) -> Self {
        Self {
            method: request.method,
            path,
            params: HashMap::new(),
            query,
            request_headers: request.headers,
            body: BodyState::Pending(request.body),
            max_body_size: config.max_body_size,
            mime_lookup: config.mime_lookup.clone(),
            status: StatusCode::OK,
            response_headers: SmallVec::new(),
        }
    }

    /// The request's uppercase HTTP method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The normalized request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// A route parameter captured during route match.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// A query-string parameter.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// All query-string parameters.
    pub fn query_map(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// A request header value (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.request_headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }

    /// The decoded request body, computed at most once per request.
    /// Decoding failures (size ceiling, unsupported type, parse failure)
    /// surface here; repeat calls return the memoized outcome.
    pub async fn body(&mut self) -> Result<Arc<DecodedBody>> {
        let state = std::mem::replace(
            &mut self.body,
            BodyState::Decoded(Err(Error::Internal("body read interrupted".into()))),
        );
        let result = match state {
            BodyState::Pending(raw) => {
                let content_type = self
                    .header("content-type")
                    .filter(|v| !v.is_empty())
                    .map(str::to_string);
                body::decode(raw, content_type.as_deref(), self.max_body_size)
                    .await
                    .map(Arc::new)
            }
            BodyState::Decoded(memoized) => memoized,
        };
        self.body = BodyState::Decoded(result.clone());
        result
    }

    // ------------------------------------------------------------------
    // Response scaffold
    // ------------------------------------------------------------------

    /// Set the response status.
    pub fn status(mut self, code: u16) -> Self {
        self.status = StatusCode(code);
        self
    }

    /// Set one response header, replacing any existing value.
    pub fn set_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let name_lower = name.to_lowercase();
        self.response_headers
            .retain(|(k, _)| k.to_lowercase() != name_lower);
        self.response_headers.push((name, value.into()));
        self
    }

    /// Set several response headers at once.
    pub fn set_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self = self.set_header(name, value);
        }
        self
    }

    // ------------------------------------------------------------------
    // Terminators
    // ------------------------------------------------------------------

    /// Respond with a JSON body.
    pub fn json<T: serde::Serialize>(self, value: &T) -> Result<Response> {
        let bytes = serde_json::to_vec(value).map_err(|e| Error::Internal(e.to_string()))?;
        let mut res = self.finish(Body::Full(Bytes::from(bytes)));
        res.set_header("Content-Type", "application/json");
        Ok(res)
    }

    /// Respond with a plain-text body.
    pub fn text(self, body: impl Into<Bytes>) -> Response {
        let mut res = self.finish(Body::Full(body.into()));
        res.set_header("Content-Type", "text/plain");
        res
    }

    /// Respond with an HTML body.
    pub fn html(self, body: impl Into<Bytes>) -> Response {
        let mut res = self.finish(Body::Full(body.into()));
        res.set_header("Content-Type", "text/html");
        res
    }

    /// Respond with raw bytes, leaving the content type to the scaffold.
    pub fn bytes(self, body: impl Into<Bytes>) -> Response {
        self.finish(Body::Full(body.into()))
    }

    /// Redirect with status 302.
    pub fn redirect(self, location: &str) -> Response {
        self.redirect_with(location, 302)
    }

    /// Redirect with an explicit status.
    pub fn redirect_with(self, location: &str, code: u16) -> Response {
        let mut res = self.status(code).finish(Body::Full(Bytes::new()));
        res.set_header("Location", location);
        res
    }

    /// Stream a file. Content type comes from the MIME collaborator unless
    /// the scaffold already set one. A file that cannot be opened yields
    /// 404; a first read that fails yields 500; later read failures are
    /// logged and truncate the committed stream.
    pub async fn send_file(self, path: impl AsRef<Path>) -> Response {
        let path = path.as_ref();
        let mut file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "file open failed");
                return Response::not_found();
            }
        };

        let mut first = BytesMut::with_capacity(FILE_CHUNK);
        if let Err(err) = file.read_buf(&mut first).await {
            tracing::error!(path = %path.display(), error = %err, "file read failed");
            return Response::internal_error();
        }

        let mime = (self.mime_lookup)(path);
        let (tx, stream) = Response::channel(self.status);
        let mut response = stream;
        response.headers = self.response_headers;
        if response.content_type().is_none() {
            response.set_header("Content-Type", mime);
        }

        let log_path = path.to_path_buf();
        tokio::spawn(async move {
            if !first.is_empty() && tx.send(first.freeze()).await.is_err() {
                return;
            }
            loop {
                let mut chunk = BytesMut::with_capacity(FILE_CHUNK);
                match file.read_buf(&mut chunk).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.send(chunk.freeze()).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::error!(
                            path = %log_path.display(),
                            error = %err,
                            "file stream failed"
                        );
                        break;
                    }
                }
            }
        });

        response
    }

    /// Stream a file as an attachment. The filename defaults to the file's
    /// basename.
    pub async fn download(self, path: impl AsRef<Path>, file_name: Option<&str>) -> Response {
        let path = path.as_ref();
        let name = file_name
            .map(str::to_string)
            .or_else(|| {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_default();
        self.set_header(
            "Content-Disposition",
            format!("attachment; filename=\"{name}\""),
        )
        .send_file(path)
        .await
    }

    /// Open a server-sent-event stream driven by the given source.
    pub fn events(self, source: EventSource) -> Response {
        let (_session, mut response) = StreamSession::open(source);
        for (name, value) in self.response_headers {
            response.set_header(name, value);
        }
        response
    }

    fn finish(self, body: Body) -> Response {
        Response {
            status: self.status,
            headers: self.response_headers,
            body,
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("query", &self.query)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBuilder;
    use serde_json::json;

    fn context_for(request: Request) -> Context {
        Context::new(request, "/".to_string(), HashMap::new(), &Config::default())
    }

    #[test]
    fn test_chained_json_response() {
        let ctx = context_for(RequestBuilder::new("GET", "/").build());
        let res = ctx
            .status(201)
            .set_header("X-Request-Id", "abc")
            .json(&json!({"ok": true}))
            .unwrap();

        assert_eq!(res.status.as_u16(), 201);
        assert_eq!(res.header("x-request-id"), Some("abc"));
        assert_eq!(res.content_type(), Some("application/json"));
        assert_eq!(res.body_string().unwrap(), r#"{"ok":true}"#);
    }

    #[test]
    fn test_text_and_html() {
        let ctx = context_for(RequestBuilder::new("GET", "/").build());
        let res = ctx.text("hello");
        assert_eq!(res.content_type(), Some("text/plain"));
        assert_eq!(res.body_string().unwrap(), "hello");

        let ctx = context_for(RequestBuilder::new("GET", "/").build());
        let res = ctx.html("<p>hi</p>");
        assert_eq!(res.content_type(), Some("text/html"));
    }

    #[test]
    fn test_redirect_default_status() {
        let ctx = context_for(RequestBuilder::new("GET", "/").build());
        let res = ctx.redirect("/elsewhere");
        assert_eq!(res.status.as_u16(), 302);
        assert_eq!(res.header("location"), Some("/elsewhere"));
    }

    #[test]
    fn test_set_headers_bulk() {
        let ctx = context_for(RequestBuilder::new("GET", "/").build());
        let res = ctx
            .set_headers([("X-A", "1"), ("X-B", "2")])
            .text("ok");
        assert_eq!(res.header("x-a"), Some("1"));
        assert_eq!(res.header("x-b"), Some("2"));
    }

    #[tokio::test]
    async fn test_body_memoized() {
        let request = RequestBuilder::new("POST", "/")
            .header("content-type", "application/json")
            .body(r#"{"n":1}"#)
            .build();
        let mut ctx = context_for(request);

        let first = ctx.body().await.unwrap();
        let second = ctx.body().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.as_json().unwrap()["n"], 1);
    }

    #[tokio::test]
    async fn test_body_error_memoized() {
        let request = RequestBuilder::new("POST", "/")
            .header("content-type", "application/json")
            .body("{broken")
            .build();
        let mut ctx = context_for(request);

        assert!(matches!(
            ctx.body().await.unwrap_err(),
            Error::MalformedBody(_)
        ));
        // Second call hits the memoized failure, no re-decode
        assert!(matches!(
            ctx.body().await.unwrap_err(),
            Error::MalformedBody(_)
        ));
    }

    #[tokio::test]
    async fn test_send_file_missing_is_404() {
        let ctx = context_for(RequestBuilder::new("GET", "/").build());
        let res = ctx.send_file("/definitely/not/here.bin").await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_send_file_streams_with_mime() {
        use http_body_util::BodyExt;

        let dir = std::env::temp_dir().join("squall-ctx-test");
        std::fs::create_dir_all(&dir).unwrap();
        let file_path = dir.join("hello.txt");
        std::fs::write(&file_path, b"file contents").unwrap();

        let request = RequestBuilder::new("GET", "/").build();
        let config = Config::default().mime_lookup(|_| "text/plain".to_string());
        let ctx = Context::new(request, "/".to_string(), HashMap::new(), &config);

        let res = ctx.send_file(&file_path).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.content_type(), Some("text/plain"));

        let collected = res.into_hyper().into_body().collect().await.unwrap();
        assert_eq!(collected.to_bytes().as_ref(), b"file contents");
    }

    #[tokio::test]
    async fn test_download_sets_disposition() {
        let dir = std::env::temp_dir().join("squall-ctx-test");
        std::fs::create_dir_all(&dir).unwrap();
        let file_path = dir.join("report.csv");
        std::fs::write(&file_path, b"a,b\n").unwrap();

        let ctx = context_for(RequestBuilder::new("GET", "/").build());
        let res = ctx.download(&file_path, None).await;
        assert_eq!(
            res.header("content-disposition"),
            Some(r#"attachment; filename="report.csv""#)
        );
    }

    #[tokio::test]
    async fn test_events_keeps_sse_headers() {
        let ctx = context_for(RequestBuilder::new("GET", "/").build());
        let res = ctx
            .set_header("X-Stream-Id", "s1")
            .events(EventSource::stream(futures_util::stream::empty()));
        assert_eq!(res.content_type(), Some("text/event-stream"));
        assert_eq!(res.header("x-stream-id"), Some("s1"));
    }
}
