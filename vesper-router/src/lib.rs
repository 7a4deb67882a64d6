#![doc = include_str!("../README.md")]
#![deny(
    clippy::all,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    unsafe_code,
    unused
)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod headers;
pub mod request;
pub mod response;
pub mod route;
pub mod strategy;
pub mod transform;
pub mod transport;

mod clock;
mod global;
mod stream;

pub use self::{
    error::{Error, ErrorType},
    request::Request,
    response::{RawResponse, Response, ResponseFuture},
    route::{BucketKey, Method, Route, RouteMatcher},
    strategy::Snapshot,
    transform::ResponseTransformer,
    transport::{HyperTransport, Transport},
};

use self::{
    global::GlobalRateLimiter,
    request::Correlation,
    strategy::RateLimitStrategy,
    stream::StreamMap,
};
use std::{
    collections::hash_map::Entry,
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::oneshot;

/// Read-only projection of one bucket's rate-limit state.
///
/// Obtained from [`Router::status`]; only meaningful once at least one
/// request has been routed through the bucket.
#[derive(Clone, Copy, Debug)]
pub struct RequestStreamStatus {
    /// Whether the shared global gate is currently suspending requests.
    globally_limited: bool,
    /// Last snapshot the bucket's strategy published.
    snapshot: Snapshot,
}

impl RequestStreamStatus {
    /// Whether the shared global gate is currently suspending requests.
    #[must_use]
    pub const fn globally_limited(&self) -> bool {
        self.globally_limited
    }

    /// Last snapshot the bucket's strategy published.
    #[must_use]
    pub const fn snapshot(&self) -> Snapshot {
        self.snapshot
    }

    /// Whether the next request on this bucket would have to wait.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        self.globally_limited || self.snapshot.remaining == 0
    }
}

/// Configure and build a [`Router`].
#[derive(Debug)]
pub struct RouterBuilder {
    /// How long a stream may sit idle before self-evicting.
    idle_timeout: Option<Duration>,
    /// Routes self-limited by a client-side token bucket.
    token_buckets: Vec<(RouteMatcher, u32, Duration)>,
    /// Response pipeline, applied in registration order.
    transformers: Vec<ResponseTransformer>,
    /// Transport requests are dispatched over.
    transport: Arc<dyn Transport>,
}

impl RouterBuilder {
    /// Create a new builder around a transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            idle_timeout: None,
            token_buckets: Vec::new(),
            transformers: Vec::new(),
            transport,
        }
    }

    /// Let idle streams evict themselves after the given timeout.
    ///
    /// By default streams live for the router's lifetime. Eviction is
    /// transparent: the next request on the bucket creates a fresh stream.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout.replace(timeout);

        self
    }

    /// Self-limit matching routes to `capacity` dispatches per
    /// `refill_interval` instead of trusting response headers.
    ///
    /// Meant for endpoints the service does not meter but punishes when
    /// hammered, such as reaction adds.
    #[must_use]
    pub fn token_bucket(
        mut self,
        matcher: RouteMatcher,
        capacity: u32,
        refill_interval: Duration,
    ) -> Self {
        self.token_buckets.push((matcher, capacity, refill_interval));

        self
    }

    /// Append a transformer to the response pipeline.
    ///
    /// Transformers run in registration order; an earlier transformer that
    /// converts a response shadows later ones matching the same response.
    #[must_use]
    pub fn transformer(mut self, transformer: ResponseTransformer) -> Self {
        self.transformers.push(transformer);

        self
    }

    /// Build the configured router.
    #[must_use]
    pub fn build(self) -> Router {
        Router {
            inner: Arc::new(RouterInner {
                closed: Arc::new(AtomicBool::new(false)),
                global: Arc::new(GlobalRateLimiter::new()),
                idle_timeout: self.idle_timeout,
                streams: Arc::new(Mutex::new(HashMap::new())),
                token_buckets: self.token_buckets,
                transformers: self.transformers.into(),
                transport: self.transport,
            }),
        }
    }
}

/// Façade routing every REST call through its bucket's stream.
///
/// Cloning is cheap and every clone routes through the same buckets, the
/// same global gate, and the same transport.
#[derive(Clone, Debug)]
pub struct Router {
    /// State shared by clones and worker tasks.
    inner: Arc<RouterInner>,
}

/// Shared state of a router.
#[derive(Debug)]
struct RouterInner {
    /// Whether [`Router::close`] has been called.
    closed: Arc<AtomicBool>,
    /// Gate tripped by globally rate-limited responses.
    global: Arc<GlobalRateLimiter>,
    /// How long a stream may sit idle before self-evicting.
    idle_timeout: Option<Duration>,
    /// Map of buckets to their streams.
    streams: Arc<StreamMap>,
    /// Routes self-limited by a client-side token bucket.
    token_buckets: Vec<(RouteMatcher, u32, Duration)>,
    /// Response pipeline, applied in registration order.
    transformers: Arc<[ResponseTransformer]>,
    /// Transport requests are dispatched over.
    transport: Arc<dyn Transport>,
}

impl RouterInner {
    /// Pick the rate-limit strategy for a route.
    fn strategy_for(&self, route: &Route) -> RateLimitStrategy {
        for (matcher, capacity, refill_interval) in &self.token_buckets {
            if matcher.matches(route) {
                return RateLimitStrategy::token_bucket(*capacity, *refill_interval);
            }
        }

        RateLimitStrategy::header()
    }
}

impl Router {
    /// Create a router with the default configuration around a transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::builder(transport).build()
    }

    /// Create a builder to configure a router.
    #[must_use]
    pub fn builder(transport: Arc<dyn Transport>) -> RouterBuilder {
        RouterBuilder::new(transport)
    }

    /// Exchange a request for its eventual response.
    ///
    /// The request is queued on its bucket's stream — created on first use —
    /// and dispatched once every request queued before it on the same bucket
    /// has completed and every rate-limit gate has passed. Requests on
    /// distinct buckets don't wait for each other.
    ///
    /// Dropping the returned future cancels the request; a queued
    /// correlation is skipped, an in-flight one has its result discarded.
    pub fn exchange<T>(&self, request: Request) -> ResponseFuture<T> {
        let (tx, rx) = oneshot::channel();

        if self.inner.closed.load(Ordering::Relaxed) {
            let _ = tx.send(Err(Error::canceled()));

            return ResponseFuture::new(rx);
        }

        let key = BucketKey::new(request.route(), request.path());
        let correlation = Correlation::new(request, tx);

        // Enqueueing under the map lock is what makes get-or-create atomic:
        // of two concurrent calls, exactly one creates the stream, and a
        // stream observed here cannot self-evict before the push lands.
        let mut streams = self.inner.streams.lock().expect("stream map poisoned");

        match streams.entry(key.clone()) {
            Entry::Occupied(entry) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(bucket = %key, "queued request on existing stream");
                entry.get().push(correlation);
            }
            Entry::Vacant(entry) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(bucket = %key, "creating request stream");

                let strategy = self.inner.strategy_for(correlation.request().route());
                let (stream, worker) = stream::create(
                    key,
                    strategy,
                    Arc::clone(&self.inner.streams),
                    Arc::clone(&self.inner.closed),
                    Arc::clone(&self.inner.global),
                    Arc::clone(&self.inner.transport),
                    Arc::clone(&self.inner.transformers),
                    self.inner.idle_timeout,
                );

                stream.push(correlation);
                entry.insert(stream);
                tokio::spawn(worker.run());
            }
        }

        drop(streams);

        ResponseFuture::new(rx)
    }

    /// Rate-limit status of a request's bucket.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorType::UnknownBucket`] error type if no request has
    /// been routed through the bucket yet — status is only meaningful after
    /// at least one exchange.
    pub fn status(&self, request: &Request) -> Result<RequestStreamStatus, Error> {
        let key = BucketKey::new(request.route(), request.path());
        let streams = self.inner.streams.lock().expect("stream map poisoned");
        let stream = streams.get(&key).ok_or_else(Error::unknown_bucket)?;

        Ok(RequestStreamStatus {
            globally_limited: self.inner.global.is_limited(),
            snapshot: stream.snapshot(),
        })
    }

    /// Close the router.
    ///
    /// Queued correlations are canceled; in-flight requests drain. Further
    /// calls to [`exchange`] complete immediately with a cancellation error.
    ///
    /// [`exchange`]: Self::exchange
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Relaxed);
        self.inner
            .streams
            .lock()
            .expect("stream map poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{RequestStreamStatus, Router, RouterBuilder};
    use crate::strategy::Snapshot;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(Router: Clone, Debug, Send, Sync);
    assert_impl_all!(RouterBuilder: Debug, Send, Sync);
    assert_impl_all!(RequestStreamStatus: Clone, Copy, Debug, Send, Sync);

    #[test]
    fn status_rate_limited_projection() {
        let exhausted = RequestStreamStatus {
            globally_limited: false,
            snapshot: Snapshot {
                date: 1,
                remaining: 0,
                reset_at: 2,
            },
        };
        assert!(exhausted.is_rate_limited());

        let unknown = RequestStreamStatus {
            globally_limited: false,
            snapshot: Snapshot::UNKNOWN,
        };
        assert!(!unknown.is_rate_limited());

        let global = RequestStreamStatus {
            globally_limited: true,
            snapshot: Snapshot::UNKNOWN,
        };
        assert!(global.is_rate_limited());
    }
}
