//! Convention strategy: if `domain` matches the configured realm
//! (case-insensitive), resolve `user` locally; numeric `user` is treated as
//! a UID with `gid = uid` (§4.A).

use async_trait::async_trait;
use std::collections::BTreeSet;

use super::{Identity, IdentityMapper, Principal, ResolveError};

pub struct ConventionMapper {
    realm: String,
}

impl ConventionMapper {
    pub fn new(realm: String) -> Self {
        Self { realm }
    }
}

#[async_trait]
impl IdentityMapper for ConventionMapper {
    async fn resolve(&self, principal: &Principal) -> Result<Identity, ResolveError> {
        let Some((user, domain)) = principal.split_last_at() else {
            return Ok(Identity::not_found());
        };
        if !domain.eq_ignore_ascii_case(&self.realm) {
            return Ok(Identity::not_found());
        }
        if let Ok(uid) = user.parse::<u32>() {
            return Ok(Identity::resolved(uid, uid, BTreeSet::new()));
        }
        // Non-numeric local users are not resolvable by convention alone;
        // they fall through to the Table strategy.
        Ok(Identity::not_found())
    }
}
