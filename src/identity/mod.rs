//! Identity Mapper (component A): resolves wire principals to local
//! `(uid, gid, gids)` identities through a chain of strategies, grounded on
//! the teacher's layered-trait style (`vfs::Vfs`) and its `moka` dependency
//! for the TTL cache.

mod cached;
mod chain;
mod convention;
mod r#static;
mod table;

pub use cached::CachedMapper;
pub use chain::ChainMapper;
pub use convention::ConventionMapper;
pub use r#static::StaticMapper;
pub use table::{InMemoryPrincipalTable, PrincipalTable, TableMapper};

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;

/// A principal string as carried on an ACE or in an authentication
/// credential: `user@domain`, `OWNER@`, `GROUP@`, `EVERYONE@`, or
/// `NNN@domain` (numeric UID for AUTH_SYS interop).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal(String);

/// The three special principals recognized during ACL evaluation, per
/// RFC 7530 §5.11.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpecialPrincipal {
    Owner,
    Group,
    Everyone,
}

impl Principal {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits `user@domain` on the **last** `@`, per §4.A's edge-case rule
    /// for principals containing multiple `@` (e.g. an email-shaped user
    /// part).
    pub fn split_last_at(&self) -> Option<(&str, &str)> {
        let idx = self.0.rfind('@')?;
        Some((&self.0[..idx], &self.0[idx + 1..]))
    }

    /// Recognizes one of the three ACL special principals.
    pub fn special(&self) -> Option<SpecialPrincipal> {
        match self.0.as_str() {
            "OWNER@" => Some(SpecialPrincipal::Owner),
            "GROUP@" => Some(SpecialPrincipal::Group),
            "EVERYONE@" => Some(SpecialPrincipal::Everyone),
            _ => None,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Principal {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Resolved local identity for a principal.
///
/// `found = false` allows the identity to propagate through evaluation
/// (e.g. stamped on a newly-created file's owner) without having been
/// resolved to a concrete local account; per §4.A this is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub primary_gid: u32,
    pub aux_gids: BTreeSet<u32>,
    pub found: bool,
}

impl Identity {
    pub fn not_found() -> Self {
        Self { uid: 0, primary_gid: 0, aux_gids: BTreeSet::new(), found: false }
    }

    pub fn resolved(uid: u32, primary_gid: u32, aux_gids: BTreeSet<u32>) -> Self {
        Self { uid, primary_gid, aux_gids, found: true }
    }

    /// All group ids this identity belongs to, primary first.
    pub fn all_gids(&self) -> impl Iterator<Item = u32> + '_ {
        std::iter::once(self.primary_gid).chain(self.aux_gids.iter().copied())
    }
}

/// Infrastructure failure resolving a principal (backend unreachable,
/// corrupt table entry, ...). A principal simply not matching anything is
/// `Ok(Identity::not_found())`, not an `Err`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ResolveError;

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("identity resolution infrastructure failure")
    }
}

impl std::error::Error for ResolveError {}

/// Contract for every Identity Mapper implementation (§4.A).
#[async_trait]
pub trait IdentityMapper: Send + Sync {
    async fn resolve(&self, principal: &Principal) -> Result<Identity, ResolveError>;
}

/// Builds the standard chain: `Convention -> Table -> Static`, wrapped in a
/// `CachedMapper`, matching §4.A's "implementations composed as a chain."
pub fn standard_chain(
    realm: String,
    table: std::sync::Arc<dyn PrincipalTable>,
    cache_ttl: std::time::Duration,
) -> CachedMapper<ChainMapper> {
    let convention = ConventionMapper::new(realm);
    let table_mapper = TableMapper::new(table);
    let fallback = StaticMapper::nobody();
    let chain = ChainMapper::new(vec![
        Box::new(convention),
        Box::new(table_mapper),
        Box::new(fallback),
    ]);
    CachedMapper::new(chain, cache_ttl)
}
