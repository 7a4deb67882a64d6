//! Per-bucket rate-limit policies.
//!
//! A strategy observes every response its stream produces and answers one
//! question: how long must the stream wait before dispatching the next
//! request. The header-driven variant trusts the service's bucket headers;
//! the token-bucket variant self-limits endpoints the service does not
//! meter. Global 429 handling is deliberately not here — it belongs to the
//! shared [`GlobalRateLimiter`].
//!
//! [`GlobalRateLimiter`]: crate::global::GlobalRateLimiter

use crate::{
    clock,
    headers::{Present, RateLimitHeaders},
};
use http::StatusCode;
use leaky_bucket_lite::LeakyBucket;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::time::Instant;

/// Point-in-time view of a bucket's rate-limit state.
///
/// `reset_at` and `date` are unix milliseconds on the clock that produced
/// them — the server's for header-driven buckets, the local one for token
/// buckets. A `remaining` of [`u64::MAX`] means no information yet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Snapshot {
    /// Clock anchor the snapshot was taken against.
    pub date: u64,
    /// Remaining requests in the current window.
    pub remaining: u64,
    /// When the current window resets.
    pub reset_at: u64,
}

impl Snapshot {
    /// Snapshot of a bucket nothing is known about yet.
    pub(crate) const UNKNOWN: Self = Self {
        date: 0,
        remaining: u64::MAX,
        reset_at: 0,
    };
}

/// Lock-free cell a stream publishes its snapshot through.
///
/// The three fields are read individually by [`Router::status`] while the
/// owning stream's task is the only writer.
///
/// [`Router::status`]: crate::Router::status
#[derive(Debug)]
pub(crate) struct SnapshotCell {
    date: AtomicU64,
    remaining: AtomicU64,
    reset_at: AtomicU64,
}

impl SnapshotCell {
    /// Create a cell holding the unknown snapshot.
    pub fn new() -> Self {
        Self {
            date: AtomicU64::new(Snapshot::UNKNOWN.date),
            remaining: AtomicU64::new(Snapshot::UNKNOWN.remaining),
            reset_at: AtomicU64::new(Snapshot::UNKNOWN.reset_at),
        }
    }

    /// Publish a new snapshot.
    pub fn store(&self, snapshot: Snapshot) {
        self.date.store(snapshot.date, Ordering::Relaxed);
        self.remaining.store(snapshot.remaining, Ordering::Relaxed);
        self.reset_at.store(snapshot.reset_at, Ordering::Relaxed);
    }

    /// Read the current snapshot.
    pub fn load(&self) -> Snapshot {
        Snapshot {
            date: self.date.load(Ordering::Relaxed),
            remaining: self.remaining.load(Ordering::Relaxed),
            reset_at: self.reset_at.load(Ordering::Relaxed),
        }
    }
}

/// Policy deciding when a stream may dispatch its next request.
#[derive(Debug)]
pub enum RateLimitStrategy {
    /// Trust the service's bucket headers.
    Header {
        /// Most recently observed bucket headers, if any.
        last: Option<Present>,
    },
    /// Self-limit with a client-side token bucket.
    TokenBucket {
        /// Bucket handing out dispatch permits.
        bucket: LeakyBucket,
    },
}

impl RateLimitStrategy {
    /// Create the default, header-driven strategy.
    #[must_use]
    pub const fn header() -> Self {
        Self::Header { last: None }
    }

    /// Create a token-bucket strategy allowing `capacity` dispatches per
    /// `refill_interval`.
    #[must_use]
    pub fn token_bucket(capacity: u32, refill_interval: Duration) -> Self {
        let bucket = LeakyBucket::builder()
            .max(capacity)
            .tokens(capacity)
            .refill_interval(refill_interval)
            .refill_amount(capacity)
            .build();

        Self::TokenBucket { bucket }
    }

    /// Wait for a dispatch permit.
    ///
    /// Header-driven buckets pace through the delay returned by
    /// [`observe`], so this returns immediately; token buckets suspend until
    /// a permit is available and consume it.
    ///
    /// [`observe`]: Self::observe
    pub async fn acquire(&self) {
        if let Self::TokenBucket { bucket } = self {
            bucket.acquire_one().await;
        }
    }

    /// Observe a response, returning the minimum wait before the stream's
    /// next dispatch.
    pub fn observe(&mut self, _status: StatusCode, headers: &RateLimitHeaders) -> Duration {
        match self {
            Self::Header { last } => match headers {
                RateLimitHeaders::Present(present) => {
                    let delay = present.delay();
                    last.replace(present.clone());

                    delay
                }
                // Unknown or global headers carry no bucket schedule.
                RateLimitHeaders::GlobalLimited(_) | RateLimitHeaders::None => Duration::ZERO,
            },
            // Pacing happens in `acquire`; responses carry no information
            // for a self-limited bucket.
            Self::TokenBucket { .. } => Duration::ZERO,
        }
    }

    /// Current snapshot of the bucket's state.
    pub fn snapshot(&self) -> Snapshot {
        match self {
            Self::Header { last } => last.as_ref().map_or(Snapshot::UNKNOWN, |present| Snapshot {
                date: present.date(),
                remaining: present.remaining(),
                reset_at: present.reset(),
            }),
            Self::TokenBucket { bucket } => {
                let now = clock::unix_ms();
                let until_refill = bucket
                    .next_refill()
                    .checked_duration_since(Instant::now())
                    .unwrap_or(Duration::ZERO);

                let until_refill = u64::try_from(until_refill.as_millis()).unwrap_or(u64::MAX);

                Snapshot {
                    date: now,
                    remaining: u64::from(bucket.tokens()),
                    reset_at: now.saturating_add(until_refill),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RateLimitStrategy, Snapshot, SnapshotCell};
    use crate::headers::RateLimitHeaders;
    use http::StatusCode;
    use static_assertions::assert_impl_all;
    use std::{fmt::Debug, time::Duration};
    use tokio::time::Instant;

    assert_impl_all!(RateLimitStrategy: Debug, Send, Sync);
    assert_impl_all!(Snapshot: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);

    const DATE: &str = "Thu, 01 Jan 2015 00:00:00 GMT";

    fn present(remaining: u64, reset_offset_secs: u64) -> RateLimitHeaders {
        let remaining = remaining.to_string();
        let reset = (1_420_070_400 + reset_offset_secs).to_string();
        let headers = [
            ("date", DATE.as_bytes()),
            ("x-ratelimit-remaining", remaining.as_bytes()),
            ("x-ratelimit-reset", reset.as_bytes()),
        ];

        RateLimitHeaders::from_pairs(headers.into_iter()).unwrap()
    }

    #[test]
    fn header_delay_when_exhausted() {
        let mut strategy = RateLimitStrategy::header();

        let delay = strategy.observe(StatusCode::OK, &present(0, 2));
        assert_eq!(Duration::from_secs(2), delay);
        assert_eq!(0, strategy.snapshot().remaining);
    }

    #[test]
    fn header_no_delay_with_remaining() {
        let mut strategy = RateLimitStrategy::header();

        let delay = strategy.observe(StatusCode::OK, &present(4, 1));
        assert_eq!(Duration::ZERO, delay);
        assert_eq!(4, strategy.snapshot().remaining);
    }

    #[test]
    fn header_unknown_headers_no_delay() {
        let mut strategy = RateLimitStrategy::header();

        let delay = strategy.observe(StatusCode::OK, &RateLimitHeaders::None);
        assert_eq!(Duration::ZERO, delay);
        assert_eq!(Snapshot::UNKNOWN, strategy.snapshot());
    }

    #[tokio::test(start_paused = true)]
    async fn token_bucket_paces_dispatches() {
        let strategy = RateLimitStrategy::token_bucket(2, Duration::from_secs(1));

        let start = Instant::now();
        strategy.acquire().await;
        strategy.acquire().await;
        assert_eq!(Duration::ZERO, start.elapsed());

        strategy.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn snapshot_cell_roundtrip() {
        let cell = SnapshotCell::new();
        assert_eq!(Snapshot::UNKNOWN, cell.load());

        let snapshot = Snapshot {
            date: 10,
            remaining: 2,
            reset_at: 20,
        };
        cell.store(snapshot);
        assert_eq!(snapshot, cell.load());
    }
}
