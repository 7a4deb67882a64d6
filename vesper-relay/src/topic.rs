//! Bounded keep-latest topics backing the downstream node's pipelines.
//!
//! Every internal topic prefers fresh state to completeness: when a consumer
//! falls behind a bounded topic, it skips the overwritten messages and
//! resumes at the newest available one. The leader is the source of truth, so
//! replaying stale state to a slow worker would only delay convergence.

use futures_util::stream::{self, Stream};
use tokio::sync::broadcast::{error::RecvError, Receiver};

/// Number of messages a topic retains before overwriting the oldest.
pub(crate) const TOPIC_CAPACITY: usize = 64;

/// Subscription to one of a downstream node's topics.
#[derive(Debug)]
pub struct Topic<T> {
    /// Underlying broadcast subscription.
    rx: Receiver<T>,
}

impl<T: Clone> Topic<T> {
    /// Wrap a broadcast subscription.
    pub(crate) fn new(rx: Receiver<T>) -> Self {
        Self { rx }
    }

    /// Receive the next message, skipping to the latest on overflow.
    ///
    /// Resolves to `None` once the topic closes.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(_skipped)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(skipped = %_skipped, "topic overflowed, skipping to latest");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Adapt a broadcast subscription into a [`Stream`] with the same
/// skip-to-latest behavior as [`Topic::next`].
pub(crate) fn into_stream<T: Clone + Send + 'static>(
    rx: Receiver<T>,
) -> impl Stream<Item = T> + Send {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(message) => return Some((message, rx)),
                Err(RecvError::Lagged(_skipped)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(skipped = %_skipped, "topic overflowed, skipping to latest");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::Topic;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;
    use tokio::sync::broadcast;

    assert_impl_all!(Topic<u64>: Debug, Send);

    #[tokio::test]
    async fn overflow_skips_to_latest() {
        let (tx, rx) = broadcast::channel(2);
        let mut topic = Topic::new(rx);

        for message in 0..5_u64 {
            tx.send(message).unwrap();
        }
        drop(tx);

        // The two newest survive; everything older was overwritten.
        assert_eq!(Some(3), topic.next().await);
        assert_eq!(Some(4), topic.next().await);
        assert_eq!(None, topic.next().await);
    }
}
