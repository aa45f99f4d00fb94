//! Metadata/Payload Interface (component H): the external storage boundary
//! this crate consumes but never implements, directly generalizing the
//! teacher's `vfs::Vfs` trait and its `vfs::Error` enum to carry an ACL
//! field through `FileAttr`/`SetAttr`/`Create*` (§4.H).
//!
//! `MetadataStore` is a capability set, per §9's "dynamic type dispatch"
//! restatement: any backend -- a real filesystem, an object store, an
//! in-memory test double -- satisfies it the same way `LockStore` is
//! satisfied by memory and durable implementations.

use std::time::SystemTime;

use async_trait::async_trait;

use crate::acl::{self, Acl, AclError};
use crate::handle::FileHandle;

/// Mirrors the teacher's `vfs::Error` (itself RFC 1813's error set almost
/// bit for bit), extended with the ACL-specific kind §7 calls for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MetadataError {
    Permission,
    NoEntry,
    Io,
    Access,
    Exist,
    NotDir,
    IsDir,
    InvalidArgument,
    FileTooLarge,
    NoSpace,
    ReadOnlyFs,
    NameTooLong,
    NotEmpty,
    StaleFile,
    NotSupp,
    ServerFault,
    /// §7: an ACL submitted via `SetAttr`/`Create*` failed `ValidateACL`.
    AclInvalid,
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for MetadataError {}

impl From<AclError> for MetadataError {
    fn from(_: AclError) -> Self {
        MetadataError::AclInvalid
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
}

/// `file_attr` (§4.H), carrying the ACL alongside the Unix-mode view every
/// protocol still needs for the fallback-to-mode-bits path (§3.1).
#[derive(Debug, Clone)]
pub struct FileAttr {
    pub file_type: FileType,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub acl: Option<Acl>,
}

/// `AttrSet` (§4.H): every field a `SetAttr` may touch, all optional.
#[derive(Debug, Clone, Default)]
pub struct SetAttr {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
    pub acl: Option<Acl>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stability {
    Unstable,
    DataSync,
    FileSync,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub file: FileHandle,
    pub file_type: FileType,
}

/// The storage collaborator's contract (§4.H).
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn lookup(&self, share: &str, parent: &FileHandle, name: &str) -> Result<FileAttr>;
    async fn read_dir(&self, share: &str, dir: &FileHandle) -> Result<Vec<DirEntry>>;
    async fn get_attr(&self, share: &str, file: &FileHandle) -> Result<FileAttr>;
    async fn set_attr(&self, share: &str, file: &FileHandle, set: SetAttr) -> Result<FileAttr>;
    async fn create_file(&self, parent: &FileHandle, name: &str, mode: u32, acl: Option<Acl>) -> Result<FileHandle>;
    async fn create_dir(&self, parent: &FileHandle, name: &str, mode: u32, acl: Option<Acl>) -> Result<FileHandle>;
    async fn create_symlink(&self, parent: &FileHandle, name: &str, target: &str) -> Result<FileHandle>;
    async fn remove(&self, parent: &FileHandle, name: &str) -> Result<()>;
    async fn rename(&self, src_parent: &FileHandle, src_name: &str, dst_parent: &FileHandle, dst_name: &str) -> Result<()>;
    async fn read_at(&self, file: &FileHandle, offset: u64, count: u32) -> Result<(Vec<u8>, bool)>;
    async fn write_at(&self, file: &FileHandle, offset: u64, bytes: &[u8], stability: Stability) -> Result<u32>;
    async fn commit(&self, file: &FileHandle, offset: u64, count: u32) -> Result<()>;
    async fn read_link(&self, file: &FileHandle) -> Result<String>;
}

/// Runs the ACL-specific policy `SetAttr` must apply before handing the
/// request to the store (§4.H: "`SetAttr` invokes ACL Engine's
/// `ValidateACL` and `AdjustACLForMode` as needed"):
/// - an explicit ACL is validated and wins outright;
/// - a mode-only change against a file that already carries an ACL
///   resyncs that ACL to the new mode instead of silently going stale.
pub fn apply_setattr_acl_policy(current_acl: Option<&Acl>, set: &mut SetAttr) -> Result<()> {
    if let Some(acl) = &set.acl {
        acl::validate_acl(acl)?;
        return Ok(());
    }
    if let (Some(mode), Some(current)) = (set.mode, current_acl) {
        set.acl = Some(acl::adjust_acl_for_mode(current, mode));
    }
    Ok(())
}

/// `Create*` invokes `ComputeInheritedACL` (§4.H) to derive the new
/// object's starting ACL from its parent, when the parent carries one.
pub fn inherited_acl_for_create(parent_acl: Option<&Acl>, child_is_dir: bool) -> Option<Acl> {
    parent_acl.and_then(|acl| acl::compute_inherited_acl(acl, child_is_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{Ace, AceType, ACE4_WRITE_DATA};
    use crate::identity::Principal;

    fn acl_with(mask: u32) -> Acl {
        Acl::new(vec![Ace::new(AceType::Allow, 0, mask, Principal::new("OWNER@"))])
    }

    #[test]
    fn explicit_acl_is_validated_and_kept() {
        let mut set = SetAttr { acl: Some(acl_with(ACE4_WRITE_DATA)), ..Default::default() };
        apply_setattr_acl_policy(None, &mut set).unwrap();
        assert!(set.acl.is_some());
    }

    #[test]
    fn mode_only_change_resyncs_existing_acl() {
        let current = acl_with(ACE4_WRITE_DATA);
        let mut set = SetAttr { mode: Some(0o444), ..Default::default() };
        apply_setattr_acl_policy(Some(&current), &mut set).unwrap();
        assert!(set.acl.is_some());
    }

    #[test]
    fn mode_only_change_without_existing_acl_leaves_acl_untouched() {
        let mut set = SetAttr { mode: Some(0o644), ..Default::default() };
        apply_setattr_acl_policy(None, &mut set).unwrap();
        assert!(set.acl.is_none());
    }

    #[test]
    fn create_with_no_parent_acl_inherits_nothing() {
        assert!(inherited_acl_for_create(None, false).is_none());
    }
}
