//! Worker node consuming the gateway through the broker.

use crate::{
    broker::{PayloadSink, PayloadSource},
    control::{ControlOp, NodeControl},
    error::Error,
    payload::Payload,
    session::Session,
    topic::{self, Topic, TOPIC_CAPACITY},
};
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast::{error::RecvError, Receiver, Sender};

/// Node presenting the gateway-client surface without a real connection.
///
/// Inbound payloads arrive from the broker, outbound commands leave through
/// it, and closing is a remote operation: the worker publishes a control
/// request and waits for the leader's acknowledgment. Four keep-latest
/// topics wire the pipelines together; a worker that falls behind skips to
/// fresh state rather than draining a backlog, since the leader is the
/// source of truth.
#[derive(Debug)]
pub struct DownstreamRelay {
    /// Control messages received from the leader.
    control_receiver: Sender<NodeControl>,
    /// Guard subscription keeping the control-receiver topic open.
    _control_receiver_guard: Receiver<NodeControl>,
    /// Control messages to publish to the leader.
    control_sender: Sender<NodeControl>,
    /// Guard subscription keeping the control-sender topic open.
    _control_sender_guard: Receiver<NodeControl>,
    /// Dispatch events with data, fanned out to the application.
    dispatch: Sender<Payload>,
    /// Guard subscription keeping the dispatch topic open.
    _dispatch_guard: Receiver<Payload>,
    /// Every payload received from the broker.
    receiver: Sender<Payload>,
    /// Guard subscription keeping the receiver topic open.
    _receiver_guard: Receiver<Payload>,
    /// Commands to publish to the broker.
    sender: Sender<Payload>,
    /// Guard subscription keeping the sender topic open.
    _sender_guard: Receiver<Payload>,
    /// Worker-local session view.
    session: Arc<Session>,
    /// Shard this worker consumes.
    shard_index: u32,
    /// Publishing half of the broker bridge.
    sink: Arc<dyn PayloadSink>,
    /// Consuming half of the broker bridge.
    source: Arc<dyn PayloadSource>,
}

impl DownstreamRelay {
    /// Create a new worker node for a shard.
    #[must_use]
    pub fn new(
        sink: Arc<dyn PayloadSink>,
        source: Arc<dyn PayloadSource>,
        shard_index: u32,
    ) -> Self {
        let (control_receiver, _control_receiver_guard) =
            tokio::sync::broadcast::channel(TOPIC_CAPACITY);
        let (control_sender, _control_sender_guard) =
            tokio::sync::broadcast::channel(TOPIC_CAPACITY);
        let (dispatch, _dispatch_guard) = tokio::sync::broadcast::channel(TOPIC_CAPACITY);
        let (receiver, _receiver_guard) = tokio::sync::broadcast::channel(TOPIC_CAPACITY);
        let (sender, _sender_guard) = tokio::sync::broadcast::channel(TOPIC_CAPACITY);

        Self {
            control_receiver,
            _control_receiver_guard,
            control_sender,
            _control_sender_guard,
            dispatch,
            _dispatch_guard,
            receiver,
            _receiver_guard,
            sender,
            _sender_guard,
            session: Arc::new(Session::default()),
            shard_index,
            sink,
            source,
        }
    }

    /// Run the four broker pipelines until one of them terminates.
    ///
    /// The pipelines are joined with all-must-succeed semantics: the first
    /// terminal error cancels the others and is returned.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorType::BrokerTransport`] error type if a pipeline
    /// terminates with a transport error.
    ///
    /// [`ErrorType::BrokerTransport`]: crate::error::ErrorType::BrokerTransport
    pub async fn execute(&self) -> Result<(), Error> {
        let inbound = {
            let session = Arc::clone(&self.session);
            let receiver = self.receiver.clone();
            let dispatch = self.dispatch.clone();
            let pump = self.source.receive(Box::new(move |payload| {
                track(&session, &receiver, &dispatch, payload);

                Box::pin(std::future::ready(()))
            }));

            async { pump.await.map_err(Error::broker) }
        };

        let outbound = {
            let commands = topic::into_stream(self.sender.subscribe());
            let pump = self.sink.send(Box::pin(commands));

            async { pump.await.map_err(Error::broker) }
        };

        let control_in = {
            let control_receiver = self.control_receiver.clone();
            let pump = self.source.receive_control(Box::new(move |control| {
                let _ = control_receiver.send(control);

                Box::pin(std::future::ready(()))
            }));

            async { pump.await.map_err(Error::broker) }
        };

        let control_out = {
            let controls = topic::into_stream(self.control_sender.subscribe());
            let pump = self.sink.send_control(Box::pin(controls));

            async { pump.await.map_err(Error::broker) }
        };

        tokio::try_join!(inbound, outbound, control_in, control_out).map(|_| ())
    }

    /// Request a remote close and wait for the leader's acknowledgment.
    ///
    /// The worker holds no connection of its own, so closing means asking
    /// the node that does: a RECONNECT (or CLOSE) control is published, and
    /// the returned future resolves once a control with the matching op
    /// arrives back. Closing twice queues two requests.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorType::Sending`] error type if the control topics
    /// are closed.
    ///
    /// [`ErrorType::Sending`]: crate::error::ErrorType::Sending
    pub async fn close(&self, reconnect: bool) -> Result<(), Error> {
        let op = if reconnect {
            ControlOp::Reconnect
        } else {
            ControlOp::Close
        };

        // Subscribe before publishing so the acknowledgment can't slip by.
        let mut acks = self.control_receiver.subscribe();

        self.control_sender
            .send(NodeControl::new(op, self.shard_index))
            .map_err(|_| Error::sending())?;
        #[cfg(feature = "tracing")]
        tracing::debug!(shard = self.shard_index, ?op, "requested remote close");

        loop {
            match acks.recv().await {
                Ok(ack) if ack.op() == op => return Ok(()),
                Ok(_) => {}
                Err(RecvError::Lagged(_skipped)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        skipped = %_skipped,
                        "control topic overflowed while awaiting acknowledgment",
                    );
                }
                Err(RecvError::Closed) => return Err(Error::sending()),
            }
        }
    }

    /// Publish a gateway command through the leader's connection.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorType::Sending`] error type if the sender topic is
    /// closed.
    ///
    /// [`ErrorType::Sending`]: crate::error::ErrorType::Sending
    pub fn send(&self, payload: Payload) -> Result<(), Error> {
        self.sender
            .send(payload)
            .map(|_| ())
            .map_err(|_| Error::sending())
    }

    /// Subscribe to dispatch events carrying data.
    #[must_use]
    pub fn dispatches(&self) -> Topic<Payload> {
        Topic::new(self.dispatch.subscribe())
    }

    /// Subscribe to every payload the worker receives.
    #[must_use]
    pub fn payloads(&self) -> Topic<Payload> {
        Topic::new(self.receiver.subscribe())
    }

    /// Subscribe to control messages received from the leader.
    #[must_use]
    pub fn controls(&self) -> Topic<NodeControl> {
        Topic::new(self.control_receiver.subscribe())
    }

    /// Session id, once a Ready dispatch has been observed.
    #[must_use]
    pub fn session_id(&self) -> Option<Box<str>> {
        self.session.id()
    }

    /// Highest sequence number observed so far.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.session.sequence()
    }

    /// Shard this worker consumes.
    #[must_use]
    pub const fn shard_index(&self) -> u32 {
        self.shard_index
    }

    /// Whether the worker considers itself connected.
    ///
    /// Always `true`: the worker has no liveness signal of its own. A real
    /// signal would take a periodic leader heartbeat over the control
    /// channel.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        true
    }

    /// Heartbeat round-trip time of the connection.
    ///
    /// Always zero; see [`is_connected`].
    ///
    /// [`is_connected`]: Self::is_connected
    #[must_use]
    pub const fn response_time(&self) -> Duration {
        Duration::ZERO
    }
}

/// Track one inbound payload and fan it out.
fn track(
    session: &Session,
    receiver: &Sender<Payload>,
    dispatch: &Sender<Payload>,
    payload: Payload,
) {
    if let Some(sequence) = payload.sequence() {
        session.observe_sequence(sequence);
    }

    if payload.is_ready() {
        if let Some(id) = payload.session_id() {
            #[cfg(feature = "tracing")]
            tracing::debug!(session = id, "session established");
            session.set_id(id);
        }
    }

    let event = (payload.is_dispatch() && payload.d.is_some()).then(|| payload.clone());

    let _ = receiver.send(payload);

    if let Some(event) = event {
        let _ = dispatch.send(event);
    }
}
