//! Process-wide gate suspending all outgoing requests.
//!
//! The gate is a single atomic deadline rather than a lock: every request
//! stream reads the same cell, so an untripped gate costs one relaxed load
//! and no stream ever contends with another. Tripping compares-and-swaps the
//! deadline to the later value, which both makes concurrent trips safe and
//! guarantees an active suspension is never shortened.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::time::{sleep, Instant};

/// Gate tripped by a globally rate-limited response.
///
/// One instance is shared by every request stream of a router. While the
/// deadline lies in the future, [`acquire`] suspends the calling stream until
/// it has passed; otherwise it returns immediately.
///
/// [`acquire`]: Self::acquire
#[derive(Debug)]
pub struct GlobalRateLimiter {
    /// Deadline in milliseconds relative to [`Self::epoch`]; zero when the
    /// gate has never been tripped.
    deadline: AtomicU64,
    /// Creation instant all deadlines are measured against.
    epoch: Instant,
}

impl GlobalRateLimiter {
    /// Create a new, untripped gate.
    pub(crate) fn new() -> Self {
        Self {
            deadline: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    /// Suspend until the active deadline, if any, has passed.
    pub(crate) async fn acquire(&self) {
        loop {
            let deadline = self.deadline.load(Ordering::Acquire);
            let now = self.elapsed_ms();

            if now >= deadline {
                return;
            }

            sleep(Duration::from_millis(deadline - now)).await;
        }
    }

    /// Suspend every stream for the given duration.
    ///
    /// The deadline only ever moves later; tripping with a duration that
    /// would end before the current deadline is a no-op.
    pub(crate) fn trip(&self, duration: Duration) {
        let duration = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let target = self.elapsed_ms().saturating_add(duration);

        self.deadline.fetch_max(target, Ordering::AcqRel);
    }

    /// Whether the gate is currently suspending requests.
    pub(crate) fn is_limited(&self) -> bool {
        self.elapsed_ms() < self.deadline.load(Ordering::Acquire)
    }

    /// Milliseconds elapsed since the gate was created.
    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
