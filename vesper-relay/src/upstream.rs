//! Leader node owning the real gateway connection.

use crate::{
    broker::{PayloadSink, PayloadSource},
    control::ControlOp,
    error::Error,
    link::GatewayLink,
    payload::Payload,
};
use futures_util::stream;
use std::{sync::Arc, time::Duration};

/// Node relaying a locally-held gateway connection over the broker.
///
/// The leader pumps everything its connection receives onto the broker's
/// payload topic, injects whatever workers publish back into the
/// connection's outbound side, and services the control topic — a RECONNECT
/// or CLOSE request closes the real connection and is echoed back as the
/// acknowledgment the requesting worker awaits.
#[derive(Debug)]
pub struct UpstreamRelay {
    /// Real gateway connection.
    link: Arc<dyn GatewayLink>,
    /// Publishing half of the broker bridge.
    sink: Arc<dyn PayloadSink>,
    /// Consuming half of the broker bridge.
    source: Arc<dyn PayloadSource>,
}

impl UpstreamRelay {
    /// Create a new leader node.
    #[must_use]
    pub fn new(
        link: Arc<dyn GatewayLink>,
        sink: Arc<dyn PayloadSink>,
        source: Arc<dyn PayloadSource>,
    ) -> Self {
        Self { link, sink, source }
    }

    /// Run the connection and the broker pumps until one of them
    /// terminates.
    ///
    /// The four subtasks are joined with all-must-succeed semantics: the
    /// first terminal error cancels the others and is returned.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorType::LinkClosed`] error type if the connection
    /// terminates with an error, or an [`ErrorType::BrokerTransport`] error
    /// type if a pump does.
    ///
    /// [`ErrorType::BrokerTransport`]: crate::error::ErrorType::BrokerTransport
    /// [`ErrorType::LinkClosed`]: crate::error::ErrorType::LinkClosed
    pub async fn execute(&self, url: impl Into<String>) -> Result<(), Error> {
        let url = url.into();

        let inbound = async {
            self.sink
                .send(self.link.payloads())
                .await
                .map_err(Error::broker)
        };

        let outbound = {
            let link = Arc::clone(&self.link);
            let pump = self.source.receive(Box::new(move |payload: Payload| {
                let link = Arc::clone(&link);

                Box::pin(async move {
                    if let Err(_source) = link.send(payload).await {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("failed to inject payload into gateway: {_source}");
                    }
                })
            }));

            async { pump.await.map_err(Error::broker) }
        };

        let control = {
            let link = Arc::clone(&self.link);
            let sink = Arc::clone(&self.sink);
            let pump = self.source.receive_control(Box::new(move |control| {
                let link = Arc::clone(&link);
                let sink = Arc::clone(&sink);

                Box::pin(async move {
                    let reconnect = control.op() == ControlOp::Reconnect;
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        shard = control.shard_index(),
                        %reconnect,
                        "worker requested remote close",
                    );

                    if let Err(_source) = link.close(reconnect).await {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("failed to close gateway connection: {_source}");
                    }

                    // Echo the control back as the acknowledgment.
                    let ack = Box::pin(stream::iter([control]));
                    if let Err(_source) = sink.send_control(ack).await {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("failed to acknowledge control message: {_source}");
                    }
                })
            }));

            async { pump.await.map_err(Error::broker) }
        };

        let run = async { self.link.execute(url).await.map_err(Error::link_closed) };

        tokio::try_join!(inbound, outbound, control, run).map(|_| ())
    }

    /// Close the real connection.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorType::LinkClosed`] error type if closing fails.
    ///
    /// [`ErrorType::LinkClosed`]: crate::error::ErrorType::LinkClosed
    pub async fn close(&self, reconnect: bool) -> Result<(), Error> {
        self.link.close(reconnect).await.map_err(Error::link_closed)
    }

    /// Session id of the connection, if established.
    #[must_use]
    pub fn session_id(&self) -> Option<Box<str>> {
        self.link.session_id()
    }

    /// Last sequence number the connection observed.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.link.sequence()
    }

    /// Most recent heartbeat round-trip time.
    #[must_use]
    pub fn response_time(&self) -> Duration {
        self.link.response_time()
    }

    /// Whether the connection is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }
}
