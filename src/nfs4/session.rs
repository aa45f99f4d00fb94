//! v4.1 sessions (§4.F): a fixed-size slot table per session, exactly-once
//! semantics for SEQUENCE, and the fixed set of operations allowed to skip
//! the SEQUENCE wrapper entirely.

use crate::error::Kind;

pub type SessionId = [u8; 16];

/// Operations the v4.1 wire layer may send outside a SEQUENCE-wrapped
/// COMPOUND (§4.F). Named by tag rather than by the real `nfs_opnum4` enum,
/// since that enum belongs to the wire/XDR layer, out of scope here.
pub const SESSION_EXEMPT: &[&str] =
    &["EXCHANGE_ID", "CREATE_SESSION", "DESTROY_SESSION", "DESTROY_CLIENTID", "BIND_CONN_TO_SESSION"];

pub fn is_session_exempt(op: &str) -> bool {
    SESSION_EXEMPT.contains(&op)
}

#[derive(Debug, Clone, Default)]
pub struct SlotEntry {
    pub last_seqid: u32,
    pub cached_response: Option<Vec<u8>>,
    pub in_progress: bool,
}

/// Outcome of a SEQUENCE call against one slot.
#[derive(Debug, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// First time seeing this seqid; caller should run the operation and
    /// call [`SessionState::cache_response`] with its result.
    Advance,
    /// Same seqid as last time: return the cached bytes verbatim, without
    /// re-running anything.
    Replay(Vec<u8>),
}

pub struct SessionState {
    pub session_id: SessionId,
    pub client_id: Vec<u8>,
    slots: Vec<SlotEntry>,
}

impl SessionState {
    pub fn new(session_id: SessionId, client_id: Vec<u8>, slot_count: usize) -> Self {
        Self { session_id, client_id, slots: vec![SlotEntry::default(); slot_count.max(1)] }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// `SEQUENCE` (§4.F): validates `(slot_id, seqid)` against the slot
    /// table and returns whether the caller should advance or replay.
    pub fn sequence(&mut self, slot_id: usize, seqid: u32) -> Result<SequenceOutcome, Kind> {
        let slot = self.slots.get_mut(slot_id).ok_or(Kind::BadSession)?;
        if slot.in_progress {
            return Err(Kind::SeqMisordered);
        }
        if seqid == slot.last_seqid && slot.last_seqid != 0 {
            return match &slot.cached_response {
                Some(bytes) => Ok(SequenceOutcome::Replay(bytes.clone())),
                None => Err(Kind::SeqMisordered),
            };
        }
        if seqid == slot.last_seqid.wrapping_add(1) {
            slot.in_progress = true;
            slot.last_seqid = seqid;
            return Ok(SequenceOutcome::Advance);
        }
        Err(Kind::SeqMisordered)
    }

    /// Caches the just-computed response bytes for the in-progress slot and
    /// clears its `in_progress` flag, completing the SEQUENCE round trip.
    pub fn cache_response(&mut self, slot_id: usize, response: Vec<u8>) {
        if let Some(slot) = self.slots.get_mut(slot_id) {
            slot.cached_response = Some(response);
            slot.in_progress = false;
        }
    }

    /// Clears `in_progress` without caching anything, for a slot whose
    /// operation failed before producing a cacheable reply.
    pub fn abandon(&mut self, slot_id: usize) {
        if let Some(slot) = self.slots.get_mut(slot_id) {
            slot.in_progress = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionState {
        SessionState::new([1; 16], b"c1".to_vec(), 4)
    }

    #[test]
    fn first_sequence_on_a_slot_advances() {
        let mut s = session();
        assert_eq!(s.sequence(0, 1).unwrap(), SequenceOutcome::Advance);
    }

    #[test]
    fn repeating_the_same_seqid_replays_cached_response() {
        let mut s = session();
        assert_eq!(s.sequence(0, 1).unwrap(), SequenceOutcome::Advance);
        s.cache_response(0, b"result".to_vec());
        assert_eq!(s.sequence(0, 1).unwrap(), SequenceOutcome::Replay(b"result".to_vec()));
    }

    #[test]
    fn skipping_ahead_is_misordered() {
        let mut s = session();
        s.sequence(0, 1).unwrap();
        s.cache_response(0, Vec::new());
        assert_eq!(s.sequence(0, 3).unwrap_err(), Kind::SeqMisordered);
    }

    #[test]
    fn unknown_slot_is_bad_session() {
        let mut s = session();
        assert_eq!(s.sequence(99, 1).unwrap_err(), Kind::BadSession);
    }

    #[test]
    fn replay_before_any_cached_response_is_misordered() {
        let mut s = session();
        s.sequence(0, 1).unwrap();
        // in-progress, no cache yet -- a second SEQUENCE for the same slot
        // before the first completes must not be treated as a replay.
        assert_eq!(s.sequence(0, 1).unwrap_err(), Kind::SeqMisordered);
    }

    #[test]
    fn session_exempt_set_covers_pre_session_ops() {
        assert!(is_session_exempt("EXCHANGE_ID"));
        assert!(is_session_exempt("CREATE_SESSION"));
        assert!(!is_session_exempt("OPEN"));
    }
}
