//! Inheritance and synchronous propagation (§4.B).

use super::{
    Ace, Acl, ACE4_DIRECTORY_INHERIT, ACE4_FILE_INHERIT, ACE4_INHERITED, ACE4_NO_PROPAGATE_INHERIT,
};

const ALL_INHERIT_FLAGS: u32 = ACE4_FILE_INHERIT
    | ACE4_DIRECTORY_INHERIT
    | ACE4_NO_PROPAGATE_INHERIT
    | super::ACE4_INHERIT_ONLY;

/// Computes the ACL a new child should inherit from its parent, per §4.B:
///
/// - scan the parent for ACEs carrying `FILE_INHERIT` (child is a file) or
///   `DIRECTORY_INHERIT` (child is a directory);
/// - copy them onto the child with `INHERITED` set;
/// - for files, or for directories whose source ACE carries
///   `NO_PROPAGATE_INHERIT`, clear all four inheritance flags on the copy.
///
/// Returns `None` if nothing in the parent ACL is inheritable (the caller
/// should then leave the child without an explicit ACL, i.e. classic mode
/// checking applies, per §3.1's "acl nil" rule).
pub fn compute_inherited_acl(parent_acl: &Acl, child_is_dir: bool) -> Option<Acl> {
    let mut inherited = Vec::new();

    for ace in &parent_acl.aces {
        let applies = if child_is_dir {
            ace.flags & ACE4_DIRECTORY_INHERIT != 0
        } else {
            ace.flags & ACE4_FILE_INHERIT != 0
        };
        if !applies {
            continue;
        }

        let mut flags = ace.flags | ACE4_INHERITED;
        let clear_all = !child_is_dir || ace.flags & ACE4_NO_PROPAGATE_INHERIT != 0;
        if clear_all {
            flags &= !ALL_INHERIT_FLAGS;
        }

        inherited.push(Ace::new(ace.ace_type, flags, ace.mask, ace.who.clone()));
    }

    if inherited.is_empty() {
        None
    } else {
        Some(Acl::new(inherited))
    }
}

/// Outcome of a `PropagateACL` run.
#[derive(Debug, Clone)]
pub struct PropagateOutcome {
    pub changed_paths: Vec<String>,
    /// `true` if the walk stopped early because it exceeded
    /// `PROPAGATE_DEPTH_LIMIT` nodes (§4.B); the caller should suggest
    /// batching in that case.
    pub truncated: bool,
}

/// A minimal view of a directory tree sufficient for synchronous
/// propagation: list children, and apply a new ACL to one node. The real
/// walk (actual storage traversal) is provided by the metadata/payload
/// collaborator (component H); this function is generic over it so the
/// ACL engine never depends on a concrete storage backend.
pub trait TreeWalker {
    /// Lists the direct children of `path`, each tagged with whether it is
    /// a directory.
    fn children(&mut self, path: &str) -> Vec<(String, bool)>;
    /// Applies `acl` to the node at `path`.
    fn apply(&mut self, path: &str, acl: &Acl);
}

/// Synchronously propagates `new_acl` from `root` down the tree, computing
/// each descendant's inherited ACL from its direct parent's (possibly just
/// rewritten) ACL. Depth-limited to `PROPAGATE_DEPTH_LIMIT` nodes (§4.B);
/// beyond that the walk stops and reports `truncated = true` rather than
/// silently covering only part of the tree.
pub fn propagate_acl(walker: &mut impl TreeWalker, root: &str, new_acl: &Acl) -> PropagateOutcome {
    let mut changed = Vec::new();
    let mut queue = std::collections::VecDeque::new();
    queue.push_back((root.to_string(), new_acl.clone(), true));
    walker.apply(root, new_acl);
    changed.push(root.to_string());

    let mut visited = 1usize;
    let mut truncated = false;

    while let Some((path, parent_acl, _is_root)) = queue.pop_front() {
        for (child_path, child_is_dir) in walker.children(&path) {
            if visited >= super::PROPAGATE_DEPTH_LIMIT {
                truncated = true;
                break;
            }
            if let Some(child_acl) = compute_inherited_acl(&parent_acl, child_is_dir) {
                walker.apply(&child_path, &child_acl);
                changed.push(child_path.clone());
                visited += 1;
                if child_is_dir {
                    queue.push_back((child_path, child_acl, false));
                }
            }
        }
        if truncated {
            break;
        }
    }

    PropagateOutcome { changed_paths: changed, truncated }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{AceType, ACE4_READ_DATA};
    use crate::identity::Principal;

    #[test]
    fn file_inherit_copies_and_clears_flags_for_file_child() {
        let parent = Acl::new(vec![Ace::new(
            AceType::Allow,
            ACE4_FILE_INHERIT | ACE4_DIRECTORY_INHERIT,
            ACE4_READ_DATA,
            Principal::new("EVERYONE@"),
        )]);
        let child = compute_inherited_acl(&parent, false).unwrap();
        assert_eq!(child.len(), 1);
        assert!(child.aces[0].is_inherited());
        assert_eq!(child.aces[0].flags & ALL_INHERIT_FLAGS, 0);
    }

    #[test]
    fn directory_inherit_keeps_flags_unless_no_propagate() {
        let parent = Acl::new(vec![Ace::new(
            AceType::Allow,
            ACE4_DIRECTORY_INHERIT,
            ACE4_READ_DATA,
            Principal::new("EVERYONE@"),
        )]);
        let child = compute_inherited_acl(&parent, true).unwrap();
        assert!(child.aces[0].flags & ACE4_DIRECTORY_INHERIT != 0);
        assert!(child.aces[0].is_inherited());
    }

    #[test]
    fn no_propagate_clears_flags_even_for_dir_child() {
        let parent = Acl::new(vec![Ace::new(
            AceType::Allow,
            ACE4_DIRECTORY_INHERIT | ACE4_NO_PROPAGATE_INHERIT,
            ACE4_READ_DATA,
            Principal::new("EVERYONE@"),
        )]);
        let child = compute_inherited_acl(&parent, true).unwrap();
        assert_eq!(child.aces[0].flags & ALL_INHERIT_FLAGS, 0);
    }

    #[test]
    fn no_inheritable_aces_returns_none() {
        let parent = Acl::new(vec![Ace::new(
            AceType::Allow,
            0,
            ACE4_READ_DATA,
            Principal::new("EVERYONE@"),
        )]);
        assert!(compute_inherited_acl(&parent, true).is_none());
    }

    struct FakeTree {
        tree: std::collections::HashMap<String, Vec<(String, bool)>>,
        applied: std::collections::HashMap<String, Acl>,
    }

    impl TreeWalker for FakeTree {
        fn children(&mut self, path: &str) -> Vec<(String, bool)> {
            self.tree.get(path).cloned().unwrap_or_default()
        }
        fn apply(&mut self, path: &str, acl: &Acl) {
            self.applied.insert(path.to_string(), acl.clone());
        }
    }

    #[test]
    fn propagate_applies_inherited_acl_to_descendants() {
        let mut tree = FakeTree { tree: Default::default(), applied: Default::default() };
        tree.tree.insert("/root".into(), vec![("/root/a".into(), true), ("/root/f".into(), false)]);
        tree.tree.insert("/root/a".into(), vec![("/root/a/b".into(), false)]);

        let new_acl = Acl::new(vec![Ace::new(
            AceType::Allow,
            ACE4_FILE_INHERIT | ACE4_DIRECTORY_INHERIT,
            ACE4_READ_DATA,
            Principal::new("EVERYONE@"),
        )]);

        let outcome = propagate_acl(&mut tree, "/root", &new_acl);
        assert!(!outcome.truncated);
        assert!(tree.applied.contains_key("/root/a"));
        assert!(tree.applied.contains_key("/root/f"));
        assert!(tree.applied.contains_key("/root/a/b"));
    }
}
