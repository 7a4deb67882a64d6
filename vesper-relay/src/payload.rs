//! Gateway payload envelope.
//!
//! The relay is deliberately shallow about payloads: it reads the opcode,
//! the sequence number, and whether dispatch data is present, and treats
//! everything else as opaque JSON to be ferried across the broker.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Gateway opcode of a [`Payload`].
#[derive(Clone, Copy, Debug, Deserialize_repr, Eq, Hash, PartialEq, Serialize_repr)]
#[non_exhaustive]
#[repr(u8)]
pub enum OpCode {
    /// An event was dispatched.
    Dispatch = 0,
    /// Keep the session alive.
    Heartbeat = 1,
    /// Start a new session.
    Identify = 2,
    /// Update the client's presence.
    PresenceUpdate = 3,
    /// Join, move, or leave a voice channel.
    VoiceStateUpdate = 4,
    /// Resume a disconnected session.
    Resume = 6,
    /// The server asks the client to reconnect.
    Reconnect = 7,
    /// Request members of a guild.
    RequestGuildMembers = 8,
    /// The session has been invalidated.
    InvalidSession = 9,
    /// First payload of a connection.
    Hello = 10,
    /// Acknowledgment of a heartbeat.
    HeartbeatAck = 11,
}

/// One gateway payload.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Payload {
    /// Opcode of the payload.
    pub op: OpCode,
    /// Sequence number, present on dispatches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    /// Event name, present on dispatches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    /// Inner data of the payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl Payload {
    /// Event name of the dispatch starting a fresh session.
    pub const READY: &'static str = "READY";

    /// Create a payload with only an opcode.
    #[must_use]
    pub const fn new(op: OpCode) -> Self {
        Self {
            op,
            s: None,
            t: None,
            d: None,
        }
    }

    /// Create a dispatch payload.
    #[must_use]
    pub fn dispatch(event: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            s: Some(sequence),
            t: Some(event.into()),
            d: Some(data),
        }
    }

    /// Whether the payload is an event dispatch.
    #[must_use]
    pub fn is_dispatch(&self) -> bool {
        self.op == OpCode::Dispatch
    }

    /// Whether the payload is the dispatch starting a fresh session.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.is_dispatch() && self.t.as_deref() == Some(Self::READY)
    }

    /// Sequence number of the payload, if it carries one.
    #[must_use]
    pub const fn sequence(&self) -> Option<u64> {
        self.s
    }

    /// Session id carried by a Ready dispatch, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.d.as_ref()?.get("session_id")?.as_str()
    }

    /// Decode a payload from broker bytes.
    ///
    /// A payload that doesn't parse is a protocol violation; broker
    /// implementations log and drop it rather than terminating their
    /// pipeline.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error of a malformed payload.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::{OpCode, Payload};
    use serde_json::json;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(OpCode: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(Payload: Clone, Debug, PartialEq, Send, Sync);

    #[test]
    fn dispatch_roundtrip() {
        let payload = Payload::dispatch("MESSAGE_CREATE", 7, json!({"id": "1"}));
        let encoded = serde_json::to_string(&payload).unwrap();
        let decoded = Payload::from_slice(encoded.as_bytes()).unwrap();

        assert_eq!(payload, decoded);
        assert!(decoded.is_dispatch());
        assert_eq!(Some(7), decoded.sequence());
    }

    #[test]
    fn ready_carries_session_id() {
        let payload = Payload::dispatch(Payload::READY, 1, json!({"session_id": "deadbeef"}));
        assert!(payload.is_ready());
        assert_eq!(Some("deadbeef"), payload.session_id());
    }

    #[test]
    fn heartbeat_has_no_sequence_fields_on_the_wire() {
        let encoded = serde_json::to_string(&Payload::new(OpCode::Heartbeat)).unwrap();
        assert_eq!(r#"{"op":1}"#, encoded);
    }

    #[test]
    fn unparseable_is_an_error() {
        assert!(Payload::from_slice(b"not json").is_err());
    }
}
