//! ACL Engine (component B): process-first-match evaluation, canonical
//! ordering, inheritance, and mode/ACL synchronization, per RFC 7530
//! §6.2.1/§6.4.1.

mod inherit;
mod mode;

pub use inherit::{compute_inherited_acl, propagate_acl, PropagateOutcome};
pub use mode::{adjust_acl_for_mode, derive_mode};

use crate::identity::{Identity, Principal, SpecialPrincipal};

/// Maximum number of ACEs an ACL may carry (§3.1).
pub const ACL_MAX_LEN: usize = 128;

/// Depth limit for synchronous `PropagateACL` (§4.B).
pub const PROPAGATE_DEPTH_LIMIT: usize = 10_000;

// --- RFC 7530 §6.2.1 mask bits: 14 file + 2 directory -----------------

pub const ACE4_READ_DATA: u32 = 0x0000_0001;
pub const ACE4_LIST_DIRECTORY: u32 = 0x0000_0001;
pub const ACE4_WRITE_DATA: u32 = 0x0000_0002;
pub const ACE4_ADD_FILE: u32 = 0x0000_0002;
pub const ACE4_APPEND_DATA: u32 = 0x0000_0004;
pub const ACE4_ADD_SUBDIRECTORY: u32 = 0x0000_0004;
pub const ACE4_READ_NAMED_ATTRS: u32 = 0x0000_0008;
pub const ACE4_WRITE_NAMED_ATTRS: u32 = 0x0000_0010;
pub const ACE4_EXECUTE: u32 = 0x0000_0020;
pub const ACE4_DELETE_CHILD: u32 = 0x0000_0040;
pub const ACE4_READ_ATTRIBUTES: u32 = 0x0000_0080;
pub const ACE4_WRITE_ATTRIBUTES: u32 = 0x0000_0100;
pub const ACE4_DELETE: u32 = 0x0001_0000;
pub const ACE4_READ_ACL: u32 = 0x0002_0000;
pub const ACE4_WRITE_ACL: u32 = 0x0004_0000;
pub const ACE4_WRITE_OWNER: u32 = 0x0008_0000;
pub const ACE4_SYNCHRONIZE: u32 = 0x0010_0000;

/// All 16 defined mask bits.
pub const ACE4_ALL_BITS: u32 = ACE4_READ_DATA
    | ACE4_WRITE_DATA
    | ACE4_APPEND_DATA
    | ACE4_READ_NAMED_ATTRS
    | ACE4_WRITE_NAMED_ATTRS
    | ACE4_EXECUTE
    | ACE4_DELETE_CHILD
    | ACE4_READ_ATTRIBUTES
    | ACE4_WRITE_ATTRIBUTES
    | ACE4_DELETE
    | ACE4_READ_ACL
    | ACE4_WRITE_ACL
    | ACE4_WRITE_OWNER
    | ACE4_SYNCHRONIZE;

// --- Inheritance / ACE-type flags --------------------------------------

pub const ACE4_FILE_INHERIT: u32 = 0x0000_0001;
pub const ACE4_DIRECTORY_INHERIT: u32 = 0x0000_0002;
pub const ACE4_NO_PROPAGATE_INHERIT: u32 = 0x0000_0004;
pub const ACE4_INHERIT_ONLY: u32 = 0x0000_0008;
pub const ACE4_INHERITED: u32 = 0x0000_0080;

/// Type of an ACE (§3.1).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AceType {
    Allow,
    Deny,
    Audit,
    Alarm,
}

/// One row of an ACL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ace {
    pub ace_type: AceType,
    pub flags: u32,
    pub mask: u32,
    pub who: Principal,
}

impl Ace {
    pub fn new(ace_type: AceType, flags: u32, mask: u32, who: Principal) -> Self {
        Self { ace_type, flags, mask, who }
    }

    pub fn is_inherited(&self) -> bool {
        self.flags & ACE4_INHERITED != 0
    }

    pub fn is_inherit_only(&self) -> bool {
        self.flags & ACE4_INHERIT_ONLY != 0
    }
}

/// An ordered ACL (§3.1). Ordering is canonical: explicit-DENY,
/// explicit-ALLOW, inherited-DENY, inherited-ALLOW; AUDIT/ALARM may appear
/// anywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
    pub aces: Vec<Ace>,
}

impl Acl {
    pub fn new(aces: Vec<Ace>) -> Self {
        Self { aces }
    }

    pub fn len(&self) -> usize {
        self.aces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aces.is_empty()
    }
}

/// Evaluation context: the requester's identity plus the file's current
/// owner/group, needed to resolve `OWNER@`/`GROUP@`/`EVERYONE@` at
/// evaluation time (§4.B).
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub requester: &'a Identity,
    pub file_owner_uid: u32,
    pub file_owner_gid: u32,
}

/// Errors raised validating an ACL (§7's `AclInvalid` kind covers both).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AclError {
    NotCanonicalOrder,
    TooLong,
}

/// Resolves whether `who` matches the requester in `ctx`, per §4.B:
/// `OWNER@`/`GROUP@`/`EVERYONE@` resolve against the file's *current*
/// owner/group, not whatever was true when the ACE was written.
fn matches(who: &Principal, ctx: &EvalContext<'_>) -> bool {
    match who.special() {
        Some(SpecialPrincipal::Everyone) => true,
        Some(SpecialPrincipal::Owner) => ctx.requester.uid == ctx.file_owner_uid,
        Some(SpecialPrincipal::Group) => {
            ctx.file_owner_gid == ctx.requester.primary_gid
                || ctx.requester.aux_gids.contains(&ctx.file_owner_gid)
        }
        None => {
            // Numeric `NNN@domain` principals match by uid directly
            // (AUTH_SYS interop, §3.1); anything else resolves through the
            // identity mapper upstream of this call and is compared here
            // only by uid already baked into the ctx requester. Unresolved
            // ACEs (identity not carried by the caller) never match.
            if let Some((user, _domain)) = who.split_last_at() {
                if let Ok(uid) = user.parse::<u32>() {
                    return ctx.requester.uid == uid;
                }
            }
            false
        }
    }
}

/// Evaluates an ACL against a requested access mask, per the process-
/// first-match algorithm in §4.B.
///
/// `acl == None` must be handled by the caller (fall through to the Unix
/// mode check, which lives outside this engine per §3.1).
pub fn evaluate(acl: &Acl, ctx: &EvalContext<'_>, requested_mask: u32) -> bool {
    if requested_mask == 0 {
        return true;
    }

    let mut allowed: u32 = 0;
    let mut denied: u32 = 0;

    for ace in &acl.aces {
        if matches!(ace.ace_type, AceType::Audit | AceType::Alarm) {
            continue;
        }
        if ace.is_inherit_only() {
            continue;
        }
        if !matches(&ace.who, ctx) {
            continue;
        }
        let new_bits = ace.mask & !(allowed | denied);
        match ace.ace_type {
            AceType::Allow => allowed |= new_bits,
            AceType::Deny => denied |= new_bits,
            AceType::Audit | AceType::Alarm => unreachable!(),
        }
        if (allowed | denied) & requested_mask == requested_mask {
            break;
        }
    }

    (allowed & requested_mask) == requested_mask
}

/// Bucket an ACE falls into for canonical-ordering purposes.
fn bucket(ace: &Ace) -> u8 {
    match (ace.ace_type, ace.is_inherited()) {
        (AceType::Deny, false) => 0,
        (AceType::Allow, false) => 1,
        (AceType::Deny, true) => 2,
        (AceType::Allow, true) => 3,
        // AUDIT/ALARM may appear anywhere; treat as "wherever it is" by
        // reusing the bucket of the preceding non-informational entry is
        // unnecessary complexity the spec doesn't ask for -- they simply
        // never violate ordering.
        (AceType::Audit, _) | (AceType::Alarm, _) => 4,
    }
}

/// Validates canonical ordering and the length bound (§3.1, §3.2 invariant
/// 2). Rejected ACLs map to `NFS4ERR_INVAL` on SETATTR per §7.
pub fn validate_acl(acl: &Acl) -> Result<(), AclError> {
    if acl.len() > ACL_MAX_LEN {
        return Err(AclError::TooLong);
    }

    let mut max_seen = 0u8;
    for ace in &acl.aces {
        let b = bucket(ace);
        if b == 4 {
            continue; // AUDIT/ALARM: informational, unordered
        }
        if b < max_seen {
            return Err(AclError::NotCanonicalOrder);
        }
        max_seen = b;
    }
    Ok(())
}
