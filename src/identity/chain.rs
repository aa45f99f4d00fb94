//! Composes several `IdentityMapper`s in priority order: the first one to
//! return `found = true` wins (§4.A).

use async_trait::async_trait;

use super::{Identity, IdentityMapper, Principal, ResolveError};

pub struct ChainMapper {
    links: Vec<Box<dyn IdentityMapper>>,
}

impl ChainMapper {
    pub fn new(links: Vec<Box<dyn IdentityMapper>>) -> Self {
        Self { links }
    }
}

#[async_trait]
impl IdentityMapper for ChainMapper {
    async fn resolve(&self, principal: &Principal) -> Result<Identity, ResolveError> {
        for link in &self.links {
            let identity = link.resolve(principal).await?;
            if identity.found {
                return Ok(identity);
            }
        }
        Ok(Identity::not_found())
    }
}
