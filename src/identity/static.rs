//! Static strategy: deterministic default fallback, always `found = true`
//! (§4.A) — the bottom of the chain, analogous to `nobody`/`nfsnobody`.

use async_trait::async_trait;
use std::collections::BTreeSet;

use super::{Identity, IdentityMapper, Principal, ResolveError};

/// Well-known `nobody` uid/gid used by most NFS servers.
pub const NOBODY_UID: u32 = 65534;
pub const NOBODY_GID: u32 = 65534;

pub struct StaticMapper {
    identity: Identity,
}

impl StaticMapper {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    pub fn nobody() -> Self {
        Self::new(Identity::resolved(NOBODY_UID, NOBODY_GID, BTreeSet::new()))
    }
}

#[async_trait]
impl IdentityMapper for StaticMapper {
    async fn resolve(&self, _principal: &Principal) -> Result<Identity, ResolveError> {
        Ok(self.identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_found() {
        let m = StaticMapper::nobody();
        let id = m.resolve(&Principal::new("anyone@anywhere")).await.unwrap();
        assert!(id.found);
        assert_eq!(id.uid, NOBODY_UID);
    }
}
