//! Server façade (§5's construction/shutdown scope): `DittoCore` owns one
//! instance of every core component and drives the five-step graceful
//! shutdown sequence. Wire listeners and per-protocol dispatch live outside
//! this crate; `DittoCore` is what they hold onto.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::callback::{CallbackChannel, MockCallbackChannel, TcpCallbackChannel};
use crate::config::Config;
use crate::delegation::DelegationEngine;
use crate::grace::GracePeriod;
use crate::identity::{standard_chain, IdentityMapper, InMemoryPrincipalTable, PrincipalTable};
use crate::lock::{InMemoryLockStore, LeaseBreakChannel, LockStore, NullBreakChannel, UnifiedLockManager};
use crate::metrics::ShareMetrics;
use crate::nfs4::{LeaseExpiryHooks, StateManager};

/// Bridges the NFSv4 State Manager's lease-expiry teardown (§4.F steps 1-2)
/// to the Delegation Engine and Unified Lock Manager, without giving
/// `StateManager` a strong reference to either -- `DelegationEngine`
/// already holds an `Arc<dyn ClientDirectory>` back to the state manager,
/// so a strong reference here would be a cycle neither side ever drops.
/// `DittoCore` is the only strong owner; this struct only upgrades at call
/// time and logs-and-no-ops if a component has already been torn down.
struct CoreLeaseHooks {
    delegation: Weak<DelegationEngine>,
    locks: Weak<UnifiedLockManager>,
}

#[async_trait]
impl LeaseExpiryHooks for CoreLeaseHooks {
    async fn revoke_client_delegations(&self, client_id: &[u8]) {
        match self.delegation.upgrade() {
            Some(deleg) => deleg.revoke_all_for_client(client_id),
            None => info!(client = ?client_id, "lease expiry ran after delegation engine was dropped"),
        }
    }

    async fn release_client_locks(&self, client_id: &[u8]) {
        match self.locks.upgrade() {
            Some(locks) => locks.release_all_for_client(client_id).await,
            None => info!(client = ?client_id, "lease expiry ran after lock manager was dropped"),
        }
    }
}

/// Owns one instance of every core component for the life of one server
/// process (§5, §9 "construct at server start, long-lived"). Front ends
/// (NFSv3/NFSv4/NLM/SMB dispatch, wire codecs) hold an `Arc<DittoCore>`
/// and call through to the component they need.
pub struct DittoCore {
    pub identity: Arc<dyn IdentityMapper>,
    pub locks: Arc<UnifiedLockManager>,
    pub state: Arc<StateManager>,
    pub delegations: Arc<DelegationEngine>,
    pub callback: Arc<dyn CallbackChannel>,
    pub metrics: Arc<ShareMetrics>,
}

impl DittoCore {
    /// Builds every component against one persisted lock store, wiring the
    /// shared `GracePeriod` (§4.C/§4.F) from the union of both sides'
    /// recovery-eligible client sets, and closing the
    /// `StateManager` <-> `DelegationEngine` cycle through
    /// [`CoreLeaseHooks`] once both exist.
    pub fn start(config: &Config, store: Arc<dyn LockStore>, principals: Arc<dyn PrincipalTable>) -> Arc<Self> {
        Self::start_with(config, store, principals, Arc::new(NullBreakChannel), Arc::new(TcpCallbackChannel::new(config.callback_timeout())))
    }

    /// As [`Self::start`], but with the lease-break and callback channels
    /// supplied explicitly -- real deployments pass the network-backed
    /// implementations; tests pass mocks.
    pub fn start_with(
        config: &Config,
        store: Arc<dyn LockStore>,
        principals: Arc<dyn PrincipalTable>,
        break_channel: Arc<dyn LeaseBreakChannel>,
        callback_channel: Arc<dyn CallbackChannel>,
    ) -> Arc<Self> {
        let mut recovery_clients = UnifiedLockManager::recovery_clients(store.as_ref());
        // The lock store is the only persisted collaborator this crate
        // owns; the state manager itself keeps no cross-restart state, so
        // its side of the union contributes nothing today. Kept as an
        // explicit union (rather than just the ULM's set) so a future
        // persisted `StateManager` only needs to extend this Vec.
        recovery_clients.sort();
        recovery_clients.dedup();
        let grace = if recovery_clients.is_empty() {
            Arc::new(GracePeriod::already_ended())
        } else {
            Arc::new(GracePeriod::start(config.grace_duration(), recovery_clients))
        };

        let metrics = Arc::new(ShareMetrics::new());
        let locks = UnifiedLockManager::with_grace(
            store,
            metrics.clone(),
            break_channel,
            grace.clone(),
            config.lease_break_timeout(),
            config.lease_break_poll_interval(),
        );

        let boot_epoch = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            & u32::MAX as u64) as u32;
        let state = StateManager::new(grace, config.lease_duration(), config.session_slots, Duration::from_secs(10), boot_epoch);

        let delegations = DelegationEngine::new(
            state.clone(),
            callback_channel.clone(),
            config.lease_duration(),
            config.anti_storm_ttl(),
            config.short_recall_timer(),
        );

        state.set_hooks(Arc::new(CoreLeaseHooks { delegation: Arc::downgrade(&delegations), locks: Arc::downgrade(&locks) }));

        let identity = Arc::new(standard_chain(config.realm.clone(), principals, config.identity_cache_ttl()));

        Arc::new(Self { identity, locks, state, delegations, callback: callback_channel, metrics })
    }

    /// A standalone core with in-memory stores and no real network paths,
    /// for tests that need the whole wiring without a durable backend.
    pub fn start_in_memory(config: &Config) -> Arc<Self> {
        Self::start_with(
            config,
            Arc::new(InMemoryLockStore::new()),
            Arc::new(InMemoryPrincipalTable::new()),
            Arc::new(NullBreakChannel),
            Arc::new(MockCallbackChannel::new()),
        )
    }

    /// The five-step graceful shutdown (§5), steps 1-2 (stop accepting
    /// connections, signal handlers) being the listener layer's
    /// responsibility outside this crate. This covers the remaining three:
    /// best-effort CB notification is implicit in step 3 already having
    /// happened via CB_RECALL when a delegation conflicted; persistence is
    /// synchronous per-operation in this design (there is no write-behind
    /// buffer to flush); step 5 stops the background scanners.
    pub async fn shutdown(&self) {
        info!("DittoCore shutting down");
        self.locks.shutdown().await;
        self.state.shutdown().await;
        info!("DittoCore shutdown complete");
    }
}
