//! Worker-local view of the gateway session.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};

/// Session id and last observed sequence of a downstream node.
///
/// This is the only gateway state a worker keeps; the leader owns the real
/// session. The sequence is advanced with a monotone maximum so a duplicated
/// or re-ordered delivery can never move it backwards.
#[derive(Debug, Default)]
pub(crate) struct Session {
    /// Session id, set from the Ready dispatch.
    id: Mutex<Option<Box<str>>>,
    /// Highest sequence number observed so far.
    sequence: AtomicU64,
}

impl Session {
    /// Session id, if a Ready dispatch has been observed.
    pub fn id(&self) -> Option<Box<str>> {
        self.id.lock().expect("session id poisoned").clone()
    }

    /// Set the session id.
    pub fn set_id(&self, id: &str) {
        self.id
            .lock()
            .expect("session id poisoned")
            .replace(Box::from(id));
    }

    /// Highest sequence number observed so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Observe a payload's sequence number.
    pub fn observe_sequence(&self, sequence: u64) {
        self.sequence.fetch_max(sequence, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::Session;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(Session: Debug, Default, Send, Sync);

    #[test]
    fn sequence_is_monotone() {
        let session = Session::default();
        assert_eq!(0, session.sequence());

        session.observe_sequence(3);
        session.observe_sequence(7);
        session.observe_sequence(5);
        assert_eq!(7, session.sequence());
    }

    #[test]
    fn id_roundtrip() {
        let session = Session::default();
        assert!(session.id().is_none());

        session.set_id("deadbeef");
        assert_eq!(Some(Box::from("deadbeef")), session.id());
    }
}
