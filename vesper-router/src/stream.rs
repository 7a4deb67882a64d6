//! Per-bucket request streams and their worker tasks.
//!
//! Every bucket owns exactly one stream: a FIFO of pending correlations and
//! a spawned task dequeuing them one at a time. The task is the only place a
//! request is dispatched from, which is what serializes a bucket — at most
//! one request per stream is ever in flight, and the wait a strategy demands
//! is honored before the next dispatch rather than the current one.

use crate::{
    error::Error,
    global::GlobalRateLimiter,
    headers::{RateLimitBody, RateLimitHeaders},
    request::Correlation,
    response::RawResponse,
    route::BucketKey,
    strategy::{RateLimitStrategy, SnapshotCell},
    transform::{ResponseTransformer, Transformed},
    transport::Transport,
};
use http::StatusCode;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender},
    time::{sleep, timeout},
};

/// Map of buckets to their streams, shared between the router and every
/// worker for idle eviction.
pub(crate) type StreamMap = Mutex<HashMap<BucketKey, Arc<RequestStream>>>;

/// Handle to a bucket's stream, held in the router's map.
#[derive(Debug)]
pub(crate) struct RequestStream {
    /// Sending half of the stream's queue.
    queue: UnboundedSender<Correlation>,
    /// Last snapshot the worker published.
    snapshot: Arc<SnapshotCell>,
}

impl RequestStream {
    /// Enqueue a correlation at the back of the stream.
    pub fn push(&self, correlation: Correlation) {
        let _ = self.queue.send(correlation);
    }

    /// Last snapshot the worker published.
    pub fn snapshot(&self) -> crate::strategy::Snapshot {
        self.snapshot.load()
    }
}

/// Create a stream handle and the worker driving it.
///
/// The worker must be spawned by the caller; splitting creation from
/// spawning keeps stream insertion under the router's map lock race-free.
#[allow(clippy::too_many_arguments)]
pub(crate) fn create(
    key: BucketKey,
    strategy: RateLimitStrategy,
    streams: Arc<StreamMap>,
    closed: Arc<AtomicBool>,
    global: Arc<GlobalRateLimiter>,
    transport: Arc<dyn Transport>,
    transformers: Arc<[ResponseTransformer]>,
    idle_timeout: Option<Duration>,
) -> (Arc<RequestStream>, StreamWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let snapshot = Arc::new(SnapshotCell::new());

    let stream = Arc::new(RequestStream {
        queue: tx,
        snapshot: Arc::clone(&snapshot),
    });

    let worker = StreamWorker {
        closed,
        global,
        idle_timeout,
        key,
        rx,
        snapshot,
        strategy,
        streams,
        transformers,
        transport,
    };

    (stream, worker)
}

/// Worker task serializing one bucket's requests.
pub(crate) struct StreamWorker {
    /// Router-wide shutdown flag.
    closed: Arc<AtomicBool>,
    /// Shared global gate.
    global: Arc<GlobalRateLimiter>,
    /// How long to wait on an empty queue before self-evicting, if at all.
    idle_timeout: Option<Duration>,
    /// Bucket the worker serves.
    key: BucketKey,
    /// Receiving half of the stream's queue.
    rx: UnboundedReceiver<Correlation>,
    /// Cell the worker publishes strategy snapshots through.
    snapshot: Arc<SnapshotCell>,
    /// Rate-limit policy of the bucket.
    strategy: RateLimitStrategy,
    /// Router's stream map, for idle eviction.
    streams: Arc<StreamMap>,
    /// Response pipeline, applied in order.
    transformers: Arc<[ResponseTransformer]>,
    /// Transport requests are dispatched over.
    transport: Arc<dyn Transport>,
}

impl StreamWorker {
    /// Drive the stream until its queue closes or it self-evicts.
    pub async fn run(mut self) {
        let mut head: Option<Correlation> = None;
        let mut delay = Duration::ZERO;

        loop {
            let mut correlation = match head.take() {
                Some(correlation) => correlation,
                None => match self.next().await {
                    Some(correlation) => correlation,
                    None => break,
                },
            };

            if self.closed.load(Ordering::Relaxed) {
                correlation.complete(Err(Error::canceled()));

                continue;
            }

            if correlation.is_canceled() {
                #[cfg(feature = "tracing")]
                tracing::debug!(bucket = %self.key, "correlation canceled while queued");

                continue;
            }

            // The global gate is re-checked after the bucket wait so a trip
            // landing mid-sleep still suspends this dispatch.
            loop {
                self.global.acquire().await;

                if delay.is_zero() {
                    break;
                }

                #[cfg(feature = "tracing")]
                tracing::debug!(
                    bucket = %self.key,
                    milliseconds = %delay.as_millis(),
                    "waiting for bucket to refresh",
                );
                sleep(delay).await;
                delay = Duration::ZERO;
            }

            self.strategy.acquire().await;

            #[cfg(feature = "tracing")]
            tracing::debug!(
                bucket = %self.key,
                path = correlation.request().path(),
                shard = ?correlation.request().shard_ref(),
                "dispatching request",
            );

            let (next_delay, outcome) = self.dispatch(&mut correlation).await;
            delay = next_delay;

            match outcome {
                Some(result) => correlation.complete(result),
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(bucket = %self.key, "re-enqueued correlation at stream head");
                    head = Some(correlation);
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(bucket = %self.key, "request stream finished");
    }

    /// Dispatch one correlation and post-process its outcome.
    ///
    /// Returns the delay to honor before the next dispatch and the final
    /// result to complete the caller with; a `None` result asks the caller
    /// to re-enqueue the correlation at the stream's head.
    async fn dispatch(
        &mut self,
        correlation: &mut Correlation,
    ) -> (Duration, Option<Result<RawResponse, Error>>) {
        let sent = self.transport.send(correlation.request()).await;
        let mut delay = Duration::ZERO;

        let mut result = match sent {
            Ok(raw) => {
                let headers = self.parse_headers(&raw);

                if raw.status() == StatusCode::TOO_MANY_REQUESTS {
                    if self.rate_limited(&mut delay, correlation, &raw, &headers) {
                        return (delay, None);
                    }
                } else {
                    delay = self.strategy.observe(raw.status(), &headers);
                    self.snapshot.store(self.strategy.snapshot());
                }

                Ok(raw)
            }
            Err(source) => Err(Error::transport(source)),
        };

        for transformer in self.transformers.iter() {
            if !transformer.matcher().matches(correlation.request().route()) {
                continue;
            }

            match transformer.apply(correlation, result) {
                Transformed::Forward(forwarded) => result = forwarded,
                Transformed::Retry => return (delay, None),
            }
        }

        let finished = match result {
            Ok(raw) if raw.is_empty() || raw.status().is_success() => Ok(raw),
            Ok(raw) => {
                let status = raw.status();

                Err(Error::response(status, raw.into_body()))
            }
            Err(source) => Err(source),
        };

        (delay, Some(finished))
    }

    /// Parse a response's rate-limit headers, degrading to "none" on a
    /// malformed set.
    fn parse_headers(&self, raw: &RawResponse) -> RateLimitHeaders {
        let pairs = raw
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_bytes()));

        match RateLimitHeaders::from_pairs(pairs) {
            Ok(headers) => headers,
            Err(_source) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    bucket = %self.key,
                    "failed to parse rate limit headers: {_source}",
                );

                RateLimitHeaders::None
            }
        }
    }

    /// Absorb a 429, returning whether the correlation should be retried at
    /// the stream's head.
    ///
    /// The automatic retry budget is one per correlation; a second 429 falls
    /// through to the transformer pipeline and surfaces.
    fn rate_limited(
        &mut self,
        delay: &mut Duration,
        correlation: &mut Correlation,
        raw: &RawResponse,
        headers: &RateLimitHeaders,
    ) -> bool {
        let body = RateLimitBody::from_slice(raw.body());

        if headers.is_global() || body.global {
            let retry_after = match headers {
                RateLimitHeaders::GlobalLimited(info) => Some(info.retry_after()),
                _ => body.retry_after(),
            };

            if let Some(retry_after) = retry_after {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    bucket = %self.key,
                    milliseconds = %retry_after.as_millis(),
                    "globally rate limited",
                );
                self.global.trip(retry_after);
            }
        } else {
            *delay = self.strategy.observe(StatusCode::TOO_MANY_REQUESTS, headers);
            self.snapshot.store(self.strategy.snapshot());

            if delay.is_zero() {
                // No reset headers on the 429; fall back to the body's
                // retry window.
                if let Some(retry_after) = body.retry_after() {
                    *delay = retry_after;
                }
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(
                bucket = %self.key,
                milliseconds = %delay.as_millis(),
                "bucket rate limited",
            );
        }

        if correlation.auto_retried() {
            return false;
        }

        correlation.mark_auto_retried();

        true
    }

    /// Wait for the next queued correlation.
    ///
    /// With an idle timeout configured, an expired wait evicts the stream
    /// from the router's map. The final `try_recv` runs under the map lock —
    /// the same lock enqueues are performed under — so a racing enqueue
    /// either lands before the check or observes the vacated entry and
    /// creates a fresh stream.
    async fn next(&mut self) -> Option<Correlation> {
        let idle = match self.idle_timeout {
            Some(idle) => idle,
            None => return self.rx.recv().await,
        };

        match timeout(idle, self.rx.recv()).await {
            Ok(maybe) => maybe,
            Err(_) => {
                let mut streams = self.streams.lock().expect("stream map poisoned");

                match self.rx.try_recv() {
                    Ok(correlation) => Some(correlation),
                    Err(TryRecvError::Empty) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(bucket = %self.key, "stream idle, evicting");
                        streams.remove(&self.key);

                        None
                    }
                    Err(TryRecvError::Disconnected) => None,
                }
            }
        }
    }
}
