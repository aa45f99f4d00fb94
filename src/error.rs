//! Typed error kinds shared by every core component, and their mapping onto
//! the three protocol status spaces (NLM, NFSv4, SMB) per the error table.
//!
//! Components never format a string to signal a condition; they return one
//! of these kinds, and a protocol handler (external to this crate) asks the
//! kind for its wire status. This keeps the table in one place instead of
//! scattered across match arms in every handler.

use std::fmt;

/// A structured condition raised by any core component.
///
/// `Kind` intentionally has no payload beyond what each variant already
/// names; holder/owner detail that a handler needs (e.g. who holds a
/// conflicting lock) travels alongside the `Kind` in the component's own
/// return type (see `lock::Denied`, `delegation::Conflict`, ...).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Kind {
    /// Lock conflict with a known holder.
    LockConflict,
    /// A lease break is in progress; the caller should retry.
    LeaseBreakInProgress,
    /// Stateid referenced a pre-restart boot epoch.
    StaleStateid,
    /// Stateid is syntactically plausible but unknown or revoked.
    BadStateid,
    /// Seqid on a v4.0 stateid did not match the expected value.
    BadSeqid,
    /// The client's callback path is known to be down.
    CallbackPathDown,
    /// Refused: in grace period and the request is not a reclaim.
    GraceNonReclaimRefused,
    /// Refused: a reclaim did not match any persisted record.
    GraceReclaimNotMatched,
    /// ACL failed validation (bad order, or too long).
    AclInvalid,
    /// Principal did not resolve to a local identity (not an error by
    /// itself — `identity::Identity::found` is false — but evaluation
    /// code surfaces this kind when a caller insists on a hard resolve).
    PrincipalUnresolved,
    /// The callback RPC itself failed (dial/timeout/transport).
    CallbackRpcFailure,
    /// The backing store is unavailable or returned corrupt data.
    Infrastructure,
    /// Client record does not exist or its lease has expired.
    StaleClientId,
    /// Client's lease has expired.
    Expired,
    /// Operation not supported by this implementation (e.g. CLAIM_PREV).
    NotSupported,
    /// SEQUENCE seqid is neither a replay nor the next expected value.
    SeqMisordered,
    /// SEQUENCE named a session id the server does not know.
    BadSession,
}

/// NFSv4 status-equivalent names, as strings (the actual `nfsstat4` enum is
/// defined by the wire/XDR layer, out of scope for this crate — see
/// SPEC_FULL.md §6).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Nfs4Status {
    Ok,
    Denied,
    Locked,
    Delay,
    StaleStateid,
    BadStateid,
    BadSeqid,
    CbPathDown,
    Grace,
    NoGrace,
    Inval,
    Notsupp,
    StaleClientid,
    Expired,
    Jukebox,
    Serverfault,
    SeqMisordered,
    BadSession,
}

impl fmt::Display for Nfs4Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// NLM status-equivalent names.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NlmStatus {
    Granted,
    Denied,
    Blocked,
    Grace,
}

/// SMB status-equivalent names.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SmbStatus {
    Success,
    LockNotGranted,
    SharingViolation,
    InvalidAcl,
    Pending,
}

impl Kind {
    /// NFSv4 status this kind maps to, per the §7 table. `None` means the
    /// condition cannot arise on the NFSv4 path (e.g. NLM-only kinds).
    pub fn as_nfs4(self) -> Option<Nfs4Status> {
        use Kind::*;
        Some(match self {
            LockConflict => Nfs4Status::Denied,
            LeaseBreakInProgress => Nfs4Status::Delay,
            StaleStateid => Nfs4Status::StaleStateid,
            BadStateid => Nfs4Status::BadStateid,
            BadSeqid => Nfs4Status::BadSeqid,
            CallbackPathDown => Nfs4Status::CbPathDown,
            GraceNonReclaimRefused => Nfs4Status::Grace,
            GraceReclaimNotMatched => Nfs4Status::NoGrace,
            AclInvalid => Nfs4Status::Inval,
            NotSupported => Nfs4Status::Notsupp,
            StaleClientId => Nfs4Status::StaleClientid,
            Expired => Nfs4Status::Expired,
            Infrastructure => Nfs4Status::Jukebox,
            SeqMisordered => Nfs4Status::SeqMisordered,
            BadSession => Nfs4Status::BadSession,
            PrincipalUnresolved | CallbackRpcFailure => return None,
        })
    }

    /// NLM status this kind maps to, where applicable.
    pub fn as_nlm(self) -> Option<NlmStatus> {
        use Kind::*;
        Some(match self {
            LockConflict => NlmStatus::Denied,
            GraceNonReclaimRefused => NlmStatus::Grace,
            _ => return None,
        })
    }

    /// SMB status this kind maps to, where applicable. `share_mode` selects
    /// between `STATUS_LOCK_NOT_GRANTED` (byte-range conflict) and
    /// `STATUS_SHARING_VIOLATION` (share-mode conflict) for `LockConflict`,
    /// per §7's footnote distinguishing the two.
    pub fn as_smb(self, share_mode_conflict: bool) -> Option<SmbStatus> {
        use Kind::*;
        Some(match self {
            LockConflict if share_mode_conflict => SmbStatus::SharingViolation,
            LockConflict => SmbStatus::LockNotGranted,
            LeaseBreakInProgress => SmbStatus::Pending,
            AclInvalid => SmbStatus::InvalidAcl,
            _ => return None,
        })
    }

    /// Whether a client may retry this condition without re-establishing
    /// state, per §7 "Non-retryable conditions."
    pub fn is_retryable(self) -> bool {
        !matches!(self, Kind::StaleClientId | Kind::Expired | Kind::BadStateid)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for Kind {}

/// Convenience alias used across the core's public APIs.
pub type Result<T> = std::result::Result<T, Kind>;
