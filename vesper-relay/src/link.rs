//! Interface to the real gateway connection.
//!
//! The upstream node does not reimplement the websocket keep-alive machine;
//! it composes an existing client behind this capability. Implementations
//! wrap whatever connection type they use and expose its payload firehose,
//! its outbound side, and a handful of read-only session accessors.

use crate::broker::{GenericError, PayloadStream};
use crate::payload::Payload;
use std::{fmt::Debug, future::Future, pin::Pin, time::Duration};

/// Future returned by [`GatewayLink`] operations.
pub type LinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), GenericError>> + Send + 'a>>;

/// Capability interface over a locally-held gateway connection.
pub trait GatewayLink: Debug + Send + Sync {
    /// Run the connection against the given url until it terminates.
    fn execute(&self, url: String) -> LinkFuture<'_>;

    /// Close the connection, optionally asking the remote to keep the
    /// session resumable.
    fn close(&self, reconnect: bool) -> LinkFuture<'_>;

    /// Stream of every payload the connection receives.
    ///
    /// The stream ends when the connection does.
    fn payloads(&self) -> PayloadStream;

    /// Inject a payload into the connection's outbound side.
    fn send(&self, payload: Payload) -> LinkFuture<'_>;

    /// Session id of the connection, if established.
    fn session_id(&self) -> Option<Box<str>>;

    /// Last sequence number the connection observed.
    fn sequence(&self) -> u64;

    /// Most recent heartbeat round-trip time.
    fn response_time(&self) -> Duration;

    /// Whether the connection is currently up.
    fn is_connected(&self) -> bool;
}
