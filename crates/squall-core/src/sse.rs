//! Server-sent event streaming
//!
//! A handler opens a `StreamSession` with either a value stream (pull-based
//! producer) or a poll function plus interval. Each produced value is
//! serialized as one `data: <json>\n\n` frame. Client disconnect closes the
//! session, cancels any active timer and stops further emission.

use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::request::BoxError;
use crate::response::{Response, StatusCode};

/// Pull-based producer: a stream of values, consumed one at a time
pub type EventStream =
    Pin<Box<dyn Stream<Item = std::result::Result<serde_json::Value, BoxError>> + Send>>;

/// Interval-driven producer: invoked once per tick
pub type EventProducer = Box<
    dyn FnMut() -> Pin<
            Box<dyn Future<Output = std::result::Result<serde_json::Value, BoxError>> + Send>,
        > + Send,
>;

/// What drives a stream session. Statically typed, so a caller cannot hand
/// the entry point something that is neither a sequence nor a producer.
pub enum EventSource {
    /// Consume a stream of values until it is exhausted or errors
    Stream(EventStream),
    /// Invoke a producer on a fixed interval
    Poll {
        produce: EventProducer,
        every: Duration,
    },
}

impl EventSource {
    /// Build a stream-driven source.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<serde_json::Value, BoxError>> + Send + 'static,
    {
        EventSource::Stream(Box::pin(stream))
    }

    /// Build an interval-driven source from an async producer.
    pub fn poll<F, Fut>(mut produce: F, every: Duration) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<serde_json::Value, BoxError>> + Send + 'static,
    {
        EventSource::Poll {
            produce: Box::new(move || Box::pin(produce())),
            every,
        }
    }
}

/// Serialize one value as an event frame terminated by a blank line.
pub fn frame(value: &serde_json::Value) -> Bytes {
    Bytes::from(format!("data: {value}\n\n"))
}

/// One server-sent-event connection: `Open -> Closed`, terminal.
pub struct StreamSession {
    closed: Arc<AtomicBool>,
}

impl StreamSession {
    /// Open a session and return it with the streaming response. Headers
    /// for no-caching, persistent-connection streaming and the event-stream
    /// content type are set before any byte is written.
    pub fn open(source: EventSource) -> (Self, Response) {
        let (tx, mut response) = Response::channel(StatusCode::OK);
        response.set_header("Content-Type", "text/event-stream");
        response.set_header("Cache-Control", "no-cache");
        response.set_header("Connection", "keep-alive");

        let closed = Arc::new(AtomicBool::new(false));
        tokio::spawn(pump(source, tx, closed.clone()));

        (Self { closed }, response)
    }

    /// Whether the session has reached its terminal state.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Emission loop. The response channel doubles as the disconnect signal:
/// the receiver is dropped when the client goes away, so the closed check
/// runs before every emission and a failed send ends the loop.
async fn pump(source: EventSource, tx: mpsc::Sender<Bytes>, closed: Arc<AtomicBool>) {
    match source {
        EventSource::Poll { mut produce, every } => {
            // First tick waits a full period; interval() would fire at t=0
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                match produce().await {
                    Ok(value) => {
                        if tx.send(frame(&value)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "event producer failed, closing stream");
                        break;
                    }
                }
            }
        }
        EventSource::Stream(mut stream) => {
            while let Some(item) = stream.next().await {
                if tx.is_closed() {
                    break;
                }
                match item {
                    Ok(value) => {
                        if tx.send(frame(&value)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "event stream failed, closing stream");
                        break;
                    }
                }
            }
        }
    }
    closed.store(true, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Body;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    fn take_receiver(response: Response) -> mpsc::Receiver<Bytes> {
        match response.body {
            Body::Channel(rx) => rx,
            Body::Full(_) => panic!("expected streaming body"),
        }
    }

    #[test]
    fn test_frame_format() {
        let bytes = frame(&json!({"count": 1}));
        assert_eq!(&bytes[..], b"data: {\"count\":1}\n\n");
    }

    #[tokio::test]
    async fn test_headers_set_before_first_byte() {
        let (_session, response) = StreamSession::open(EventSource::stream(
            futures_util::stream::empty(),
        ));
        assert_eq!(response.content_type(), Some("text/event-stream"));
        assert_eq!(response.header("cache-control"), Some("no-cache"));
        assert_eq!(response.header("connection"), Some("keep-alive"));
    }

    #[tokio::test]
    async fn test_stream_source_emits_then_closes() {
        let values = futures_util::stream::iter(vec![Ok(json!(1)), Ok(json!(2))]);
        let (session, response) = StreamSession::open(EventSource::stream(values));
        let mut rx = take_receiver(response);

        assert_eq!(&rx.recv().await.unwrap()[..], b"data: 1\n\n");
        assert_eq!(&rx.recv().await.unwrap()[..], b"data: 2\n\n");
        assert!(rx.recv().await.is_none());

        sleep(Duration::from_millis(10)).await;
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_source_emits_on_interval() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        let source = EventSource::poll(
            move || {
                let n = counter2.fetch_add(1, Ordering::SeqCst);
                async move { Ok(json!({ "count": n })) }
            },
            Duration::from_secs(1),
        );
        let (_session, response) = StreamSession::open(source);
        let mut rx = take_receiver(response);

        assert_eq!(&rx.recv().await.unwrap()[..], b"data: {\"count\":0}\n\n");
        assert_eq!(&rx.recv().await.unwrap()[..], b"data: {\"count\":1}\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_frame_waits_one_period() {
        let source = EventSource::poll(
            || async { Ok(json!("tick")) },
            Duration::from_secs(1),
        );
        let (_session, response) = StreamSession::open(source);
        let mut rx = take_receiver(response);

        let opened = tokio::time::Instant::now();
        rx.recv().await.unwrap();
        assert!(opened.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_disconnect_stops_emission_and_timer() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        let source = EventSource::poll(
            move || {
                counter2.fetch_add(1, Ordering::SeqCst);
                async move { Ok(json!("tick")) }
            },
            Duration::from_millis(5),
        );
        let (session, response) = StreamSession::open(source);
        let mut rx = take_receiver(response);

        assert!(rx.recv().await.is_some());
        drop(rx); // client went away

        sleep(Duration::from_millis(30)).await;
        assert!(session.is_closed());
        let after_close = counter.load(Ordering::SeqCst);

        // No further emission once the session is closed
        sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), after_close);
    }

    #[tokio::test]
    async fn test_producer_error_closes_stream() {
        let source = EventSource::poll(
            || async { Err::<serde_json::Value, BoxError>("db went away".into()) },
            Duration::from_millis(1),
        );
        let (session, response) = StreamSession::open(source);
        let mut rx = take_receiver(response);

        assert!(rx.recv().await.is_none());
        sleep(Duration::from_millis(10)).await;
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_stream_error_closes_after_prior_values() {
        let values = futures_util::stream::iter(vec![
            Ok(json!("first")),
            Err::<serde_json::Value, BoxError>("boom".into()),
            Ok(json!("never")),
        ]);
        let (session, response) = StreamSession::open(EventSource::stream(values));
        let mut rx = take_receiver(response);

        assert_eq!(&rx.recv().await.unwrap()[..], b"data: \"first\"\n\n");
        assert!(rx.recv().await.is_none());
        sleep(Duration::from_millis(10)).await;
        assert!(session.is_closed());
    }
}
