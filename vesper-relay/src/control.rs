//! Control-plane messages between downstream and upstream nodes.

use serde::{Deserialize, Serialize};

/// Operation requested of the node owning the real connection.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlOp {
    /// Close the connection for good.
    Close,
    /// Close the connection and reconnect.
    Reconnect,
}

/// Out-of-band message between a worker and the leader.
///
/// Control messages are not correlated with any payload sequence; additional
/// wire fields are permitted and ignored.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NodeControl {
    /// Requested operation.
    op: ControlOp,
    /// Shard the request concerns.
    #[serde(rename = "shardIndex")]
    shard_index: u32,
}

impl NodeControl {
    /// Create a new control message.
    #[must_use]
    pub const fn new(op: ControlOp, shard_index: u32) -> Self {
        Self { op, shard_index }
    }

    /// Requested operation.
    #[must_use]
    pub const fn op(&self) -> ControlOp {
        self.op
    }

    /// Shard the request concerns.
    #[must_use]
    pub const fn shard_index(&self) -> u32 {
        self.shard_index
    }

    /// Decode a control message from broker bytes.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error of a malformed message.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::{ControlOp, NodeControl};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(ControlOp: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(NodeControl: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);

    #[test]
    fn wire_shape() {
        let control = NodeControl::new(ControlOp::Reconnect, 3);
        let encoded = serde_json::to_string(&control).unwrap();
        assert_eq!(r#"{"op":"RECONNECT","shardIndex":3}"#, encoded);
    }

    #[test]
    fn extra_fields_ignored() {
        let control =
            NodeControl::from_slice(br#"{"op":"CLOSE","shardIndex":0,"reason":"shutdown"}"#)
                .unwrap();
        assert_eq!(ControlOp::Close, control.op());
        assert_eq!(0, control.shard_index());
    }
}
