//! Stateid layout (§4.F): 12 bytes, `seqid(4) || other(8)`, with `other`
//! subdivided into a type tag, the server's boot epoch, and a random tail.
//! Kept file-private to `nfs4` detail; `StateManager` mints and validates
//! these, other components only ever see the full 12-byte array.

use byteorder::{BigEndian, ByteOrder};

use crate::error::Kind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateType {
    Open,
    Lock,
    Deleg,
    Layout,
}

impl StateType {
    fn tag(self) -> u8 {
        match self {
            StateType::Open => 0x01,
            StateType::Lock => 0x02,
            StateType::Deleg => 0x03,
            StateType::Layout => 0x04,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0x01 => StateType::Open,
            0x02 => StateType::Lock,
            0x03 => StateType::Deleg,
            0x04 => StateType::Layout,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stateid {
    pub seqid: u32,
    pub other: [u8; 8],
}

impl Stateid {
    /// Mints a fresh stateid: `other[0]` the type tag, `other[1..5]` the
    /// server's boot epoch (big-endian), `other[5..8]` the caller-supplied
    /// counter (low 3 bytes), `seqid` starting at 1 per NFSv4's convention
    /// that 0 is reserved for the special "anonymous"/"bypass" stateids.
    pub fn mint(stype: StateType, boot_epoch: u32, counter: u64) -> Self {
        let mut other = [0u8; 8];
        other[0] = stype.tag();
        BigEndian::write_u32(&mut other[1..5], boot_epoch);
        let counter_bytes = counter.to_be_bytes();
        other[5..8].copy_from_slice(&counter_bytes[5..8]);
        Self { seqid: 1, other }
    }

    pub fn stype(&self) -> Option<StateType> {
        StateType::from_tag(self.other[0])
    }

    pub fn boot_epoch(&self) -> u32 {
        BigEndian::read_u32(&self.other[1..5])
    }

    pub fn encode(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        BigEndian::write_u32(&mut out[0..4], self.seqid);
        out[4..12].copy_from_slice(&self.other);
        out
    }

    pub fn decode(bytes: &[u8; 12]) -> Self {
        let seqid = BigEndian::read_u32(&bytes[0..4]);
        let mut other = [0u8; 8];
        other.copy_from_slice(&bytes[4..12]);
        Self { seqid, other }
    }

    /// `STALE` once `current_boot_epoch` no longer matches what this
    /// stateid was minted under -- a restart invalidates every outstanding
    /// stateid from the previous run (§4.F).
    pub fn check_epoch(&self, current_boot_epoch: u32) -> Result<(), Kind> {
        if self.boot_epoch() != current_boot_epoch {
            return Err(Kind::StaleStateid);
        }
        Ok(())
    }

    pub fn next_seqid(&self) -> Self {
        Self { seqid: self.seqid.wrapping_add(1), other: self.other }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let id = Stateid::mint(StateType::Open, 7, 42);
        let decoded = Stateid::decode(&id.encode());
        assert_eq!(decoded, id);
        assert_eq!(decoded.stype(), Some(StateType::Open));
        assert_eq!(decoded.boot_epoch(), 7);
    }

    #[test]
    fn epoch_mismatch_is_stale() {
        let id = Stateid::mint(StateType::Lock, 7, 1);
        assert_eq!(id.check_epoch(8), Err(Kind::StaleStateid));
        assert_eq!(id.check_epoch(7), Ok(()));
    }

    #[test]
    fn unknown_type_tag_decodes_to_none() {
        let mut bytes = [0u8; 12];
        bytes[4] = 0xff;
        let id = Stateid::decode(&bytes);
        assert_eq!(id.stype(), None);
    }

    #[test]
    fn next_seqid_increments() {
        let id = Stateid::mint(StateType::Deleg, 1, 1);
        assert_eq!(id.next_seqid().seqid, id.seqid + 1);
    }
}
