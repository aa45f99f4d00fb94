//! Mode <-> ACL synchronization, per RFC 7530 §6.4.1 (§4.B).

use super::{
    Ace, AceType, Acl, ACE4_APPEND_DATA, ACE4_EXECUTE, ACE4_READ_DATA, ACE4_WRITE_DATA,
};
use crate::identity::{Principal, SpecialPrincipal};

const RWX_BITS: u32 = ACE4_READ_DATA | ACE4_WRITE_DATA | ACE4_APPEND_DATA | ACE4_EXECUTE;

fn rwx_to_triad(mask: u32) -> u32 {
    let mut triad = 0;
    if mask & ACE4_READ_DATA != 0 {
        triad |= 0b100;
    }
    if mask & (ACE4_WRITE_DATA | ACE4_APPEND_DATA) != 0 {
        triad |= 0b010;
    }
    if mask & ACE4_EXECUTE != 0 {
        triad |= 0b001;
    }
    triad
}

fn triad_to_rwx(triad: u32) -> u32 {
    let mut mask = 0;
    if triad & 0b100 != 0 {
        mask |= ACE4_READ_DATA;
    }
    if triad & 0b010 != 0 {
        mask |= ACE4_WRITE_DATA | ACE4_APPEND_DATA;
    }
    if triad & 0b001 != 0 {
        mask |= ACE4_EXECUTE;
    }
    mask
}

/// Derives classic Unix mode bits from the ALLOW ACEs whose principal is
/// one of `OWNER@`/`GROUP@`/`EVERYONE@` (§4.B). Other principals and DENY
/// entries are ignored for this derivation, by spec.
pub fn derive_mode(acl: &Acl, _owner_uid: u32, _owner_gid: u32) -> u32 {
    let mut owner_triad = 0u32;
    let mut group_triad = 0u32;
    let mut other_triad = 0u32;

    for ace in &acl.aces {
        if ace.ace_type != AceType::Allow {
            continue;
        }
        match ace.who.special() {
            Some(SpecialPrincipal::Owner) => owner_triad |= rwx_to_triad(ace.mask),
            Some(SpecialPrincipal::Group) => group_triad |= rwx_to_triad(ace.mask),
            Some(SpecialPrincipal::Everyone) => other_triad |= rwx_to_triad(ace.mask),
            None => {}
        }
    }

    (owner_triad << 6) | (group_triad << 3) | other_triad
}

/// Adjusts only the `OWNER@`/`GROUP@`/`EVERYONE@` ALLOW ACEs to reflect
/// `new_mode`; preserves all non-rwx mask bits and every other ACE
/// unchanged (§4.B).
pub fn adjust_acl_for_mode(acl: &Acl, new_mode: u32) -> Acl {
    let owner_triad = (new_mode >> 6) & 0b111;
    let group_triad = (new_mode >> 3) & 0b111;
    let other_triad = new_mode & 0b111;

    let mut out = Vec::with_capacity(acl.len() + 3);
    let mut saw = [false; 3]; // owner, group, everyone

    for ace in &acl.aces {
        let special = ace.who.special();
        if ace.ace_type == AceType::Allow {
            match special {
                Some(SpecialPrincipal::Owner) => {
                    saw[0] = true;
                    out.push(rebuild(ace, owner_triad));
                    continue;
                }
                Some(SpecialPrincipal::Group) => {
                    saw[1] = true;
                    out.push(rebuild(ace, group_triad));
                    continue;
                }
                Some(SpecialPrincipal::Everyone) => {
                    saw[2] = true;
                    out.push(rebuild(ace, other_triad));
                    continue;
                }
                None => {}
            }
        }
        out.push(ace.clone());
    }

    // A classic Unix file always has owner/group/everyone ALLOW entries
    // implicitly; if the ACL never carried one, synthesize it so the mode
    // bits have somewhere to live (kept at the end, which stays canonical:
    // appended ALLOW entries sort after the file's existing ALLOW block
    // but we re-validate canonical order at the caller via ValidateACL).
    if !saw[0] {
        out.push(Ace::new(AceType::Allow, 0, triad_to_rwx(owner_triad), Principal::new("OWNER@")));
    }
    if !saw[1] {
        out.push(Ace::new(AceType::Allow, 0, triad_to_rwx(group_triad), Principal::new("GROUP@")));
    }
    if !saw[2] {
        out.push(Ace::new(
            AceType::Allow,
            0,
            triad_to_rwx(other_triad),
            Principal::new("EVERYONE@"),
        ));
    }

    Acl::new(out)
}

fn rebuild(ace: &Ace, triad: u32) -> Ace {
    let preserved = ace.mask & !RWX_BITS;
    Ace::new(ace.ace_type, ace.flags, preserved | triad_to_rwx(triad), ace.who.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{ACE4_READ_ACL, ACE4_WRITE_ACL};

    #[test]
    fn derive_mode_round_trips_simple_triads() {
        let mode = 0o640;
        let acl = adjust_acl_for_mode(&Acl::default(), mode);
        assert_eq!(derive_mode(&acl, 0, 0), mode);
    }

    #[test]
    fn adjust_preserves_non_rwx_bits_and_other_aces() {
        let acl = Acl::new(vec![
            Ace::new(
                AceType::Allow,
                0,
                ACE4_READ_DATA | ACE4_READ_ACL | ACE4_WRITE_ACL,
                Principal::new("OWNER@"),
            ),
            Ace::new(AceType::Allow, 0, ACE4_READ_DATA, Principal::new("1000@x")),
        ]);
        let adjusted = adjust_acl_for_mode(&acl, 0o600);
        let owner_ace = adjusted.aces.iter().find(|a| a.who.special() == Some(SpecialPrincipal::Owner)).unwrap();
        assert_eq!(owner_ace.mask & (ACE4_READ_ACL | ACE4_WRITE_ACL), ACE4_READ_ACL | ACE4_WRITE_ACL);
        // the unrelated numeric-principal ACE is untouched
        assert!(adjusted.aces.iter().any(|a| a.who.as_str() == "1000@x"));
    }

    #[test]
    fn idempotence_for_simple_owner_group_everyone_acl() {
        for mode in [0o755u32, 0o640, 0o600, 0o777] {
            let acl = adjust_acl_for_mode(&Acl::default(), mode);
            assert_eq!(derive_mode(&acl, 0, 0), mode, "mode {:o}", mode);
        }
    }
}
