//! Transport-agnostic bridge to an external pub/sub broker.
//!
//! The relay never talks to a broker directly; it pushes and pulls framed
//! payloads and control messages through the [`PayloadSink`] and
//! [`PayloadSource`] capabilities. Implementations choose their own encoding
//! and delivery guarantees — the relay only requires that one broker message
//! corresponds to one payload or control message, tolerates duplicates, and
//! survives sequence gaps.

use crate::{control::NodeControl, payload::Payload};
use futures_util::stream::{Stream, StreamExt};
use std::{error::Error as StdError, fmt::Debug, future::Future, pin::Pin};
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    Mutex,
};

/// A generic error type a broker may fail with.
pub type GenericError = Box<dyn StdError + Send + Sync>;

/// Lazy, possibly infinite sequence of payloads to publish.
pub type PayloadStream = Pin<Box<dyn Stream<Item = Payload> + Send + 'static>>;

/// Lazy, possibly infinite sequence of control messages to publish.
pub type ControlStream = Pin<Box<dyn Stream<Item = NodeControl> + Send + 'static>>;

/// Future returned by every sink and source operation.
///
/// Resolves when the consumed stream or the underlying subscription ends; a
/// transport error terminates it early.
pub type BrokerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), GenericError>> + Send + 'a>>;

/// Asynchronous callback invoked per received payload.
pub type PayloadHandler =
    Box<dyn FnMut(Payload) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Asynchronous callback invoked per received control message.
pub type ControlHandler =
    Box<dyn FnMut(NodeControl) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Capability to publish payloads and control messages to the broker.
///
/// Ordering is preserved within a single call; nothing is guaranteed across
/// calls.
pub trait PayloadSink: Debug + Send + Sync {
    /// Publish every payload of the stream on the payload topic.
    fn send(&self, payloads: PayloadStream) -> BrokerFuture<'_>;

    /// Publish every control message of the stream on the control topic.
    fn send_control(&self, controls: ControlStream) -> BrokerFuture<'_>;
}

/// Capability to consume payloads and control messages from the broker.
pub trait PayloadSource: Debug + Send + Sync {
    /// Invoke the handler for each payload received on the payload topic.
    fn receive(&self, handler: PayloadHandler) -> BrokerFuture<'_>;

    /// Invoke the handler for each message received on the control topic.
    fn receive_control(&self, handler: ControlHandler) -> BrokerFuture<'_>;
}

/// In-process loopback broker.
///
/// [`pair`] returns two cross-wired halves: whatever one half publishes, the
/// other receives, JSON-framed the way an external broker would carry it.
/// Useful for single-process deployments and for tests; multi-process setups
/// implement the sink and source over a real broker instead.
///
/// [`pair`]: Self::pair
#[derive(Debug)]
pub struct LocalBroker {
    /// Receiving half of the control topic.
    control_rx: Mutex<UnboundedReceiver<Vec<u8>>>,
    /// Sending half of the control topic.
    control_tx: UnboundedSender<Vec<u8>>,
    /// Receiving half of the payload topic.
    payload_rx: Mutex<UnboundedReceiver<Vec<u8>>>,
    /// Sending half of the payload topic.
    payload_tx: UnboundedSender<Vec<u8>>,
}

impl LocalBroker {
    /// Create two cross-wired broker halves.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (payload_ab_tx, payload_ab_rx) = mpsc::unbounded_channel();
        let (payload_ba_tx, payload_ba_rx) = mpsc::unbounded_channel();
        let (control_ab_tx, control_ab_rx) = mpsc::unbounded_channel();
        let (control_ba_tx, control_ba_rx) = mpsc::unbounded_channel();

        (
            Self {
                control_rx: Mutex::new(control_ba_rx),
                control_tx: control_ab_tx,
                payload_rx: Mutex::new(payload_ba_rx),
                payload_tx: payload_ab_tx,
            },
            Self {
                control_rx: Mutex::new(control_ab_rx),
                control_tx: control_ba_tx,
                payload_rx: Mutex::new(payload_ab_rx),
                payload_tx: payload_ba_tx,
            },
        )
    }
}

impl PayloadSink for LocalBroker {
    fn send(&self, mut payloads: PayloadStream) -> BrokerFuture<'_> {
        Box::pin(async move {
            while let Some(payload) = payloads.next().await {
                let frame = serde_json::to_vec(&payload)?;

                self.payload_tx
                    .send(frame)
                    .map_err(|_| GenericError::from("payload topic closed"))?;
            }

            Ok(())
        })
    }

    fn send_control(&self, mut controls: ControlStream) -> BrokerFuture<'_> {
        Box::pin(async move {
            while let Some(control) = controls.next().await {
                let frame = serde_json::to_vec(&control)?;

                self.control_tx
                    .send(frame)
                    .map_err(|_| GenericError::from("control topic closed"))?;
            }

            Ok(())
        })
    }
}

impl PayloadSource for LocalBroker {
    fn receive(&self, mut handler: PayloadHandler) -> BrokerFuture<'_> {
        Box::pin(async move {
            let mut rx = self.payload_rx.lock().await;

            while let Some(frame) = rx.recv().await {
                match Payload::from_slice(&frame) {
                    Ok(payload) => handler(payload).await,
                    Err(_source) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("dropping malformed payload frame: {_source}");
                    }
                }
            }

            Ok(())
        })
    }

    fn receive_control(&self, mut handler: ControlHandler) -> BrokerFuture<'_> {
        Box::pin(async move {
            let mut rx = self.control_rx.lock().await;

            while let Some(frame) = rx.recv().await {
                match NodeControl::from_slice(&frame) {
                    Ok(control) => handler(control).await,
                    Err(_source) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("dropping malformed control frame: {_source}");
                    }
                }
            }

            Ok(())
        })
    }
}
