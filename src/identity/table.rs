//! Table strategy: explicit overrides from a persistent store keyed by
//! principal string (§4.A). The store itself is a capability
//! (`PrincipalTable`); the durable implementation is an external
//! collaborator, out of scope per SPEC_FULL.md §1. An in-memory
//! implementation is provided for tests and for embedding callers that
//! don't need persistence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{Identity, IdentityMapper, Principal, ResolveError};

/// Capability a principal table must expose. Mirrors the `LockStore`
/// capability-set framing from SPEC_FULL.md §9: any type exposing this set
/// is interchangeable.
#[async_trait]
pub trait PrincipalTable: Send + Sync {
    async fn get(&self, principal: &Principal) -> Result<Option<Identity>, ResolveError>;
    async fn put(&self, principal: Principal, identity: Identity) -> Result<(), ResolveError>;
    async fn remove(&self, principal: &Principal) -> Result<(), ResolveError>;
}

/// In-memory `PrincipalTable`, suitable for tests and small deployments.
#[derive(Default)]
pub struct InMemoryPrincipalTable {
    entries: RwLock<HashMap<Principal, Identity>>,
}

impl InMemoryPrincipalTable {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PrincipalTable for InMemoryPrincipalTable {
    async fn get(&self, principal: &Principal) -> Result<Option<Identity>, ResolveError> {
        Ok(self.entries.read().unwrap().get(principal).cloned())
    }

    async fn put(&self, principal: Principal, identity: Identity) -> Result<(), ResolveError> {
        self.entries.write().unwrap().insert(principal, identity);
        Ok(())
    }

    async fn remove(&self, principal: &Principal) -> Result<(), ResolveError> {
        self.entries.write().unwrap().remove(principal);
        Ok(())
    }
}

pub struct TableMapper {
    table: Arc<dyn PrincipalTable>,
}

impl TableMapper {
    pub fn new(table: Arc<dyn PrincipalTable>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl IdentityMapper for TableMapper {
    async fn resolve(&self, principal: &Principal) -> Result<Identity, ResolveError> {
        Ok(self.table.get(principal).await?.unwrap_or_else(Identity::not_found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn explicit_override_resolves() {
        let table = Arc::new(InMemoryPrincipalTable::new());
        table
            .put(Principal::new("alice@EXAMPLE.COM"), Identity::resolved(501, 100, Default::default()))
            .await
            .unwrap();
        let mapper = TableMapper::new(table);
        let id = mapper.resolve(&Principal::new("alice@EXAMPLE.COM")).await.unwrap();
        assert!(id.found);
        assert_eq!(id.uid, 501);
    }

    #[tokio::test]
    async fn unknown_principal_not_found() {
        let table = Arc::new(InMemoryPrincipalTable::new());
        let mapper = TableMapper::new(table);
        let id = mapper.resolve(&Principal::new("bob@EXAMPLE.COM")).await.unwrap();
        assert!(!id.found);
    }
}
