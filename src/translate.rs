//! Cross-Protocol Translator (component G): pure, stateless functions that
//! present one protocol's state in another protocol's vocabulary -- an SMB
//! lease holder as an NLM holder, an NLM conflict as an SMB status, and
//! Windows well-known SIDs as the three ACL special principals.
//!
//! Nothing here touches the Unified Lock Manager or any other component's
//! state directly; callers hand in the already-fetched `Lock`/`LeaseState`
//! values from `lock::` and get back the other protocol's shape.

use crate::error::SmbStatus;
use crate::identity::SpecialPrincipal;
use crate::lock::{LeaseState, Owner};

/// An NLM `holder` structure (`nlm4_holder`), as returned by `NLM_TEST` /
/// `NLM_LOCK` when a conflicting lock exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NlmHolder {
    pub caller: String,
    pub svid: i32,
    pub oh: Vec<u8>,
    pub offset: u64,
    pub length: u64,
    pub exclusive: bool,
}

/// `TranslateSMBLeaseToNLMHolder` (§4.G): presents an SMB lease as the NLM
/// holder an `NLM_TEST` response against the same file would show. `oh`
/// (owner handle) takes the lease key's first 8 bytes since NLM's opaque
/// handle is conventionally that size; `length = u64::MAX` mirrors NLM's
/// "lock extends to end of file" convention, matching how a whole-file SMB
/// lease is represented as a byte-range lock elsewhere in this crate.
pub fn smb_lease_to_nlm_holder(owner: &Owner, lease: LeaseState) -> NlmHolder {
    let oh: Vec<u8> = owner.owner_id.iter().copied().chain(std::iter::repeat(0)).take(8).collect();
    NlmHolder {
        caller: format!("smb:{}", String::from_utf8_lossy(&owner.client_id)),
        svid: 0,
        oh,
        offset: 0,
        length: u64::MAX,
        exclusive: lease.w,
    }
}

/// `TranslateNLMLockToSMBConflict` (§4.G): an NLM byte-range conflict,
/// presented to an SMB caller, is always `STATUS_LOCK_NOT_GRANTED` -- SMB's
/// share-mode-specific `STATUS_SHARING_VIOLATION` only applies to SMB's own
/// share-mode conflicts (see `error::Kind::as_smb`'s `share_mode_conflict`
/// flag), never to a cross-protocol byte-range one.
pub fn nlm_lock_to_smb_conflict() -> SmbStatus {
    SmbStatus::LockNotGranted
}

/// A Windows well-known SID in its string form (`S-1-1-0`, ...).
pub fn special_principal_to_sid(special: SpecialPrincipal) -> &'static str {
    match special {
        SpecialPrincipal::Everyone => "S-1-1-0",
        SpecialPrincipal::Owner => "S-1-3-0",
        SpecialPrincipal::Group => "S-1-3-1",
    }
}

/// The reverse of [`special_principal_to_sid`]. A SID that is not one of
/// the three well-known ones is a user/group SID and resolves through the
/// Identity Mapper (component A) instead, so this returns `None` rather
/// than guessing.
pub fn sid_to_special_principal(sid: &str) -> Option<SpecialPrincipal> {
    match sid {
        "S-1-1-0" => Some(SpecialPrincipal::Everyone),
        "S-1-3-0" => Some(SpecialPrincipal::Owner),
        "S-1-3-1" => Some(SpecialPrincipal::Group),
        _ => None,
    }
}
