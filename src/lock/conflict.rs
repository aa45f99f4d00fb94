//! The conflict matrix from §4.C, restated as code instead of a table a
//! handler has to re-derive by eye.
//!
//! Byte-range locks (NLM shared/exclusive, and NFSv4 `LOCK`, which shares
//! the same semantics) are classified only by `exclusive` + range overlap.
//! SMB leases are classified by their `R`/`W`/`H` bits, which the spec's
//! named rows/columns ("SMB Read lease", "SMB Write lease", "SMB Handle
//! lease") are shorthand for -- a real lease can carry any combination, so
//! this works bit-by-bit rather than matching five fixed row labels.

use super::{LeaseState, Range};

/// What an existing or proposed lock looks like, stripped of everything
/// `classify` doesn't need (owner, file, timestamps).
#[derive(Debug, Clone, Copy)]
pub enum Shape {
    ByteRange { exclusive: bool, range: Range },
    Lease { state: LeaseState },
}

/// The action a conflict between an existing holder and a proposed
/// request requires, per §4.C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    /// No conflict; proceed.
    Ok,
    /// Deny immediately, no break attempted (NFS locks win over SMB
    /// leases per §4.C's note).
    Deny,
    /// NLM-style: caller may enqueue (if it requested blocking) or else
    /// this is a deny.
    BlockOrDeny,
    /// Break the existing lease (down to `None`) before proceeding.
    Break,
}

/// Classifies the conflict between one existing holder and one proposed
/// request on the same file. Callers fold this over every existing lock
/// on the file and take the most restrictive action (see
/// `UnifiedLockManager::acquire_lock`).
pub fn classify(existing: &Shape, proposed: &Shape) -> ConflictAction {
    match (existing, proposed) {
        (Shape::ByteRange { exclusive: ex, range: er }, Shape::ByteRange { exclusive: px, range: pr }) => {
            if !er.overlaps(pr) {
                ConflictAction::Ok
            } else if !*ex && !*px {
                ConflictAction::Ok
            } else {
                ConflictAction::BlockOrDeny
            }
        }
        (Shape::ByteRange { exclusive, .. }, Shape::Lease { state }) => {
            // Proposed is an SMB lease; existing is a byte-range lock.
            if state.w {
                ConflictAction::Deny
            } else if state.r {
                if *exclusive {
                    ConflictAction::Deny
                } else {
                    ConflictAction::Ok
                }
            } else {
                ConflictAction::Ok
            }
        }
        (Shape::Lease { state }, Shape::ByteRange { exclusive, .. }) => {
            // Existing is an SMB lease; proposed is a byte-range lock.
            if state.w {
                ConflictAction::Break
            } else if state.r {
                if *exclusive {
                    ConflictAction::Break
                } else {
                    ConflictAction::Ok
                }
            } else {
                ConflictAction::Ok
            }
        }
        (Shape::Lease { state: existing }, Shape::Lease { state: proposed }) => {
            if existing.w && (proposed.w || proposed.r) {
                ConflictAction::Break
            } else if existing.r && proposed.w {
                ConflictAction::Break
            } else {
                // read-read, handle-only on either side: compatible. The
                // handle lease's only conflict (DELETE/RENAME) is not a
                // grant-time conflict -- see
                // `UnifiedLockManager::notify_path_removed`.
                ConflictAction::Ok
            }
        }
    }
}

/// Folds `classify` over every existing holder, taking the most
/// restrictive action. `Deny` beats `Break` beats `BlockOrDeny` beats `Ok`.
pub fn most_restrictive(actions: impl IntoIterator<Item = ConflictAction>) -> ConflictAction {
    let mut worst = ConflictAction::Ok;
    for action in actions {
        worst = match (worst, action) {
            (ConflictAction::Deny, _) | (_, ConflictAction::Deny) => ConflictAction::Deny,
            (ConflictAction::Break, _) | (_, ConflictAction::Break) => ConflictAction::Break,
            (ConflictAction::BlockOrDeny, _) | (_, ConflictAction::BlockOrDeny) => ConflictAction::BlockOrDeny,
            _ => ConflictAction::Ok,
        };
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(r: bool, w: bool, h: bool) -> Shape {
        Shape::Lease { state: LeaseState { r, w, h } }
    }

    fn byte_range(exclusive: bool) -> Shape {
        Shape::ByteRange { exclusive, range: Range { offset: 0, length: 10 } }
    }

    #[test]
    fn nlm_shared_vs_shared_ok() {
        assert_eq!(classify(&byte_range(false), &byte_range(false)), ConflictAction::Ok);
    }

    #[test]
    fn nlm_shared_vs_exclusive_blocks() {
        assert_eq!(classify(&byte_range(false), &byte_range(true)), ConflictAction::BlockOrDeny);
        assert_eq!(classify(&byte_range(true), &byte_range(false)), ConflictAction::BlockOrDeny);
    }

    #[test]
    fn existing_nlm_denies_proposed_smb_write_lease_immediately() {
        assert_eq!(classify(&byte_range(false), &lease(false, true, false)), ConflictAction::Deny);
        assert_eq!(classify(&byte_range(true), &lease(false, true, false)), ConflictAction::Deny);
    }

    #[test]
    fn existing_nlm_shared_allows_proposed_smb_read_lease() {
        assert_eq!(classify(&byte_range(false), &lease(true, false, false)), ConflictAction::Ok);
    }

    #[test]
    fn existing_nlm_exclusive_denies_proposed_smb_read_lease() {
        assert_eq!(classify(&byte_range(true), &lease(true, false, false)), ConflictAction::Deny);
    }

    #[test]
    fn existing_smb_read_lease_breaks_for_proposed_nlm_exclusive() {
        assert_eq!(classify(&lease(true, false, false), &byte_range(true)), ConflictAction::Break);
        assert_eq!(classify(&lease(true, false, false), &byte_range(false)), ConflictAction::Ok);
    }

    #[test]
    fn existing_smb_write_lease_breaks_for_any_proposed_byte_range() {
        assert_eq!(classify(&lease(false, true, false), &byte_range(false)), ConflictAction::Break);
        assert_eq!(classify(&lease(false, true, false), &byte_range(true)), ConflictAction::Break);
    }

    #[test]
    fn handle_lease_never_conflicts_at_grant_time() {
        assert_eq!(classify(&lease(false, false, true), &byte_range(true)), ConflictAction::Ok);
        assert_eq!(classify(&byte_range(true), &lease(false, false, true)), ConflictAction::Ok);
        assert_eq!(classify(&lease(false, false, true), &lease(false, false, true)), ConflictAction::Ok);
    }

    #[test]
    fn read_read_lease_is_compatible() {
        assert_eq!(classify(&lease(true, false, false), &lease(true, false, false)), ConflictAction::Ok);
    }

    #[test]
    fn write_lease_vs_write_lease_breaks() {
        assert_eq!(classify(&lease(false, true, false), &lease(false, true, false)), ConflictAction::Break);
    }

    #[test]
    fn non_overlapping_ranges_never_conflict() {
        let a = Shape::ByteRange { exclusive: true, range: Range { offset: 0, length: 5 } };
        let b = Shape::ByteRange { exclusive: true, range: Range { offset: 5, length: 5 } };
        assert_eq!(classify(&a, &b), ConflictAction::Ok);
    }

    #[test]
    fn most_restrictive_picks_deny_over_break_over_block() {
        assert_eq!(
            most_restrictive([ConflictAction::Ok, ConflictAction::BlockOrDeny, ConflictAction::Break]),
            ConflictAction::Break
        );
        assert_eq!(
            most_restrictive([ConflictAction::Break, ConflictAction::Deny]),
            ConflictAction::Deny
        );
    }
}
