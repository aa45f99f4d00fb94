//! NFSv4/4.1 State Manager (component F): client/session lifecycle, lease
//! tracking, stateid minting and validation, and the fixed ordering of
//! `onLeaseExpired`'s teardown sequence.
//!
//! The Delegation Engine (component E) depends on this module through the
//! `delegation::ClientDirectory` trait, which `StateManager` implements
//! below. The reverse dependency -- this module telling the Delegation
//! Engine and Unified Lock Manager to tear down an expired client's state
//! -- goes through `LeaseExpiryHooks` instead of a direct `Arc` to either
//! component, so construction never forms a cycle: `server::DittoCore`
//! (§5, "construct at server start") is the only thing that holds strong
//! references to all three, and its `LeaseExpiryHooks` impl holds the
//! other two only as `Weak`.

mod client;
mod session;
mod stateid;

pub use client::{ClientId, ClientRecord, PendingClient};
pub use session::{is_session_exempt, SequenceOutcome, SessionId, SessionState, SlotEntry, SESSION_EXEMPT};
pub use stateid::{StateType, Stateid};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::callback::CallbackTarget;
use crate::delegation::ClientDirectory;
use crate::error::{Kind, Result};
use crate::grace::GracePeriod;
use crate::handle::FileHandle;

/// Open-owner state minted by `OPEN` and torn down by `CLOSE` or lease
/// expiry. Byte-range locks and delegations have their own owning
/// components (C and E); this is the one piece of per-stateid state that
/// belongs to the State Manager itself.
#[derive(Debug, Clone)]
pub struct OpenState {
    pub other: [u8; 8],
    pub client_id: ClientId,
    pub file: FileHandle,
    pub access_read: bool,
    pub access_write: bool,
    pub deny_read: bool,
    pub deny_write: bool,
    pub seqid: u32,
    pub revoked: bool,
}

/// Steps 1 and 2 of `onLeaseExpired` (§4.F): best-effort delegation revoke
/// and lock release, satisfied by the Delegation Engine and Unified Lock
/// Manager respectively. See the module doc comment for why this is a
/// trait rather than a direct dependency.
#[async_trait]
pub trait LeaseExpiryHooks: Send + Sync {
    async fn revoke_client_delegations(&self, client_id: &[u8]);
    async fn release_client_locks(&self, client_id: &[u8]);
}

/// Hooks that only log; useful standalone (no delegation/lock components
/// wired up yet) and in tests that only care about client/session/stateid
/// bookkeeping.
pub struct NullLeaseExpiryHooks;

#[async_trait]
impl LeaseExpiryHooks for NullLeaseExpiryHooks {
    async fn revoke_client_delegations(&self, client_id: &[u8]) {
        warn!(client = ?client_id, "lease expired with no delegation hook wired; delegations not revoked");
    }
    async fn release_client_locks(&self, client_id: &[u8]) {
        warn!(client = ?client_id, "lease expired with no lock hook wired; locks not released");
    }
}

pub struct StateManager {
    clients: DashMap<ClientId, ClientRecord>,
    pending: DashMap<Vec<u8>, PendingClient>,
    sessions: DashMap<SessionId, AsyncMutex<SessionState>>,
    opens_by_other: DashMap<[u8; 8], OpenState>,
    opens_by_file: DashMap<FileHandle, Vec<[u8; 8]>>,
    next_clientid: AtomicU64,
    next_counter: AtomicU64,
    boot_epoch: u32,
    lease_duration: Duration,
    session_slots: usize,
    grace: Arc<GracePeriod>,
    hooks: OnceLock<Arc<dyn LeaseExpiryHooks>>,
    sweep_interval: Duration,
    scanner: std::sync::Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl StateManager {
    /// `boot_epoch` should be stable for the life of one server process and
    /// different across restarts (e.g. derived from the process start
    /// time); every stateid minted this run carries it, and a mismatch on
    /// an incoming stateid is `STALE` (§4.F). `grace` is expected to be the
    /// same `GracePeriod` instance handed to the Unified Lock Manager, per
    /// §4.C/§4.F's shared-grace design.
    pub fn new(
        grace: Arc<GracePeriod>,
        lease_duration: Duration,
        session_slots: usize,
        sweep_interval: Duration,
        boot_epoch: u32,
    ) -> Arc<Self> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::new(Self {
            clients: DashMap::new(),
            pending: DashMap::new(),
            sessions: DashMap::new(),
            opens_by_other: DashMap::new(),
            opens_by_file: DashMap::new(),
            next_clientid: AtomicU64::new(1),
            next_counter: AtomicU64::new(1),
            boot_epoch,
            lease_duration,
            session_slots: session_slots.max(1),
            grace,
            hooks: OnceLock::new(),
            sweep_interval,
            scanner: std::sync::Mutex::new(None),
            shutdown_tx,
        });

        let scanner_manager = manager.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scanner_manager.sweep_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => scanner_manager.sweep_expired_leases().await,
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        *manager.scanner.lock().unwrap() = Some(handle);
        manager
    }

    /// Wires the delegation-revoke/lock-release collaborators in, once both
    /// exist (`server::DittoCore` calls this after constructing all three
    /// components). Safe to leave unset in tests that only exercise
    /// client/session/stateid behavior.
    pub fn set_hooks(&self, hooks: Arc<dyn LeaseExpiryHooks>) {
        if self.hooks.set(hooks).is_err() {
            warn!("StateManager::set_hooks called more than once; ignoring");
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.scanner.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn alloc_clientid(&self) -> ClientId {
        self.next_clientid.fetch_add(1, Ordering::Relaxed).to_be_bytes().to_vec()
    }

    fn alloc_counter(&self) -> u64 {
        self.next_counter.fetch_add(1, Ordering::Relaxed)
    }

    // -- v4.0 SETCLIENTID / SETCLIENTID_CONFIRM ---------------------------

    /// `SETCLIENTID`: creates an unconfirmed record, keyed by
    /// `nfs_client_id` so a retransmission or a deliberate re-send
    /// supersedes whatever was pending (§4.F). Returns the assigned
    /// `client_id` and the confirm verifier the client must echo back.
    pub fn setclientid(
        &self,
        nfs_client_id: Vec<u8>,
        _client_verifier: [u8; 8],
        callback: Option<CallbackTarget>,
    ) -> (ClientId, [u8; 8]) {
        let client_id = self.alloc_clientid();
        let confirm_verifier = self.alloc_counter().to_be_bytes();
        self.pending.insert(
            nfs_client_id.clone(),
            PendingClient { client_id: client_id.clone(), nfs_client_id, confirm_verifier, callback },
        );
        (client_id, confirm_verifier)
    }

    /// `SETCLIENTID_CONFIRM`: promotes a pending record, superseding any
    /// previously confirmed record for the same `nfs_client_id` (a client
    /// that reconnected with a new `client_id`).
    pub fn setclientid_confirm(&self, client_id: &[u8], confirm_verifier: [u8; 8]) -> Result<()> {
        let matched = self
            .pending
            .iter()
            .find(|e| e.value().client_id == client_id && e.value().confirm_verifier == confirm_verifier)
            .map(|e| e.key().clone());
        let Some(key) = matched else { return Err(Kind::StaleClientId) };
        let Some((_, pending)) = self.pending.remove(&key) else { return Err(Kind::StaleClientId) };

        self.clients.retain(|_, rec| rec.nfs_client_id != pending.nfs_client_id);
        self.clients.insert(
            client_id.to_vec(),
            ClientRecord {
                client_id: client_id.to_vec(),
                nfs_client_id: pending.nfs_client_id,
                verifier: confirm_verifier,
                callback: pending.callback,
                confirmed: true,
                cb_path_up: true,
                lease_expiry: Instant::now() + self.lease_duration,
                sessions: Vec::new(),
            },
        );
        info!(client = ?client_id, "v4.0 client confirmed");
        Ok(())
    }

    // -- v4.1 EXCHANGE_ID / CREATE_SESSION --------------------------------

    /// `EXCHANGE_ID`: creates or updates the record keyed by
    /// `owner.ownerid` directly (§4.F); there is no separate pending stage
    /// since confirmation happens implicitly at `CREATE_SESSION`.
    pub fn exchange_id(&self, owner_id: Vec<u8>, callback: Option<CallbackTarget>) -> ClientId {
        let client_id = owner_id.clone();
        if let Some(mut rec) = self.clients.get_mut(&client_id) {
            rec.callback = callback;
            return client_id;
        }
        self.clients.insert(
            client_id.clone(),
            ClientRecord {
                client_id: client_id.clone(),
                nfs_client_id: owner_id,
                verifier: [0; 8],
                callback,
                confirmed: false,
                cb_path_up: true,
                lease_expiry: Instant::now() + self.lease_duration,
                sessions: Vec::new(),
            },
        );
        client_id
    }

    /// `CREATE_SESSION`: confirms the v4.1 client record and installs a
    /// fresh slot table.
    pub fn create_session(&self, client_id: &[u8], session_id: SessionId) -> Result<()> {
        let mut rec = self.clients.get_mut(client_id).ok_or(Kind::StaleClientId)?;
        rec.confirmed = true;
        rec.lease_expiry = Instant::now() + self.lease_duration;
        rec.sessions.push(session_id);
        drop(rec);
        self.sessions.insert(
            session_id,
            AsyncMutex::new(SessionState::new(session_id, client_id.to_vec(), self.session_slots)),
        );
        Ok(())
    }

    pub async fn destroy_session(&self, session_id: &SessionId) {
        if let Some((_, session)) = self.sessions.remove(session_id) {
            let client_id = session.lock().await.client_id.clone();
            if let Some(mut rec) = self.clients.get_mut(&client_id) {
                rec.sessions.retain(|s| s != session_id);
            }
        }
    }

    /// `SEQUENCE` (§4.F). Renews the owning client's lease on success,
    /// since any stateid-touching (and SEQUENCE itself counts) operation
    /// for a confirmed client renews it.
    pub async fn sequence(&self, session_id: &SessionId, slot_id: usize, seqid: u32) -> Result<SequenceOutcome> {
        let session_lock = self.sessions.get(session_id).ok_or(Kind::BadSession)?;
        let mut session = session_lock.lock().await;
        let outcome = session.sequence(slot_id, seqid)?;
        let client_id = session.client_id.clone();
        drop(session);
        self.renew_lease(&client_id);
        Ok(outcome)
    }

    pub async fn cache_sequence_response(&self, session_id: &SessionId, slot_id: usize, response: Vec<u8>) {
        if let Some(session_lock) = self.sessions.get(session_id) {
            session_lock.lock().await.cache_response(slot_id, response);
        }
    }

    pub async fn abandon_sequence(&self, session_id: &SessionId, slot_id: usize) {
        if let Some(session_lock) = self.sessions.get(session_id) {
            session_lock.lock().await.abandon(slot_id);
        }
    }

    // -- leases ------------------------------------------------------------

    /// Renews a confirmed client's lease; a no-op (not an error) for an
    /// unknown or unconfirmed client, since callers on the hot path treat
    /// renewal as best-effort bookkeeping, not as validation.
    pub fn renew_lease(&self, client_id: &[u8]) {
        if let Some(mut rec) = self.clients.get_mut(client_id) {
            if rec.confirmed {
                rec.lease_expiry = Instant::now() + self.lease_duration;
            }
        }
    }

    /// Whether OPEN dispatch (outside this crate) should currently refuse
    /// anything but a reclaim claim (§4.F).
    pub fn grace_in_progress(&self) -> bool {
        self.grace.in_progress()
    }

    /// `RECLAIM_COMPLETE` (v4.1): signals grace that this client is done
    /// reclaiming, which can end grace early once every expected client has
    /// signaled (§3.3, §4.F).
    pub fn reclaim_complete(&self, client_id: &[u8]) {
        self.grace.reclaim_complete(client_id);
    }

    async fn sweep_expired_leases(&self) {
        let now = Instant::now();
        let expired: Vec<ClientId> =
            self.clients.iter().filter(|e| e.value().confirmed && e.value().lease_expiry <= now).map(|e| e.key().clone()).collect();
        for client_id in expired {
            self.run_lease_expired(&client_id).await;
        }
    }

    /// `onLeaseExpired` (§4.F): the four-step teardown, in fixed order, so
    /// no reader observes an inconsistent snapshot (delegations revoked but
    /// locks still held, etc). Exposed publicly so an administrative
    /// "force expire this client" action can drive the same path the
    /// background sweep uses.
    pub async fn run_lease_expired(&self, client_id: &[u8]) {
        info!(client = ?client_id, "lease expired, tearing down client state");
        if let Some(hooks) = self.hooks.get() {
            hooks.revoke_client_delegations(client_id).await;
            hooks.release_client_locks(client_id).await;
        } else {
            warn!(client = ?client_id, "lease expiry ran with no hooks wired");
        }
        self.release_client_opens(client_id);
        self.clients.remove(client_id);
    }

    fn release_client_opens(&self, client_id: &[u8]) {
        let others: Vec<[u8; 8]> =
            self.opens_by_other.iter().filter(|e| e.value().client_id == client_id).map(|e| *e.key()).collect();
        for other in others {
            if let Some((_, open)) = self.opens_by_other.remove(&other) {
                if let Some(mut list) = self.opens_by_file.get_mut(&open.file) {
                    list.retain(|o| o != &other);
                }
            }
        }
    }

    // -- stateids ------------------------------------------------------------

    /// `OPEN`: mints an open stateid and records the owner/access/deny
    /// bits in the dual index (§4.F: `byOther` / `byFile`).
    pub fn open(
        &self,
        client_id: &[u8],
        file: &FileHandle,
        access_read: bool,
        access_write: bool,
        deny_read: bool,
        deny_write: bool,
    ) -> [u8; 12] {
        let counter = self.alloc_counter();
        let stateid = Stateid::mint(StateType::Open, self.boot_epoch, counter);
        let other = stateid.other;
        self.opens_by_other.insert(
            other,
            OpenState {
                other,
                client_id: client_id.to_vec(),
                file: file.clone(),
                access_read,
                access_write,
                deny_read,
                deny_write,
                seqid: stateid.seqid,
                revoked: false,
            },
        );
        self.opens_by_file.entry(file.clone()).or_default().push(other);
        self.renew_lease(client_id);
        stateid.encode()
    }

    /// `CLOSE`: validates then removes an open stateid. Closing mutates the
    /// stateid (it's the last operation to ever use it), so this checks the
    /// seqid like any other mutating op rather than going through the
    /// shared read-only `validate_stateid`.
    pub fn close(&self, stateid_bytes: &[u8; 12]) -> Result<()> {
        let open = self.validate_stateid_for_mutation(stateid_bytes, StateType::Open)?;
        self.opens_by_other.remove(&open.other);
        if let Some(mut list) = self.opens_by_file.get_mut(&open.file) {
            list.retain(|o| o != &open.other);
        }
        Ok(())
    }

    /// Validates a stateid against the boot epoch and expected type, and
    /// (for opens) returns the live `OpenState` it names. `STALE` takes
    /// priority over `BAD_STATEID` per §4.F. Does not check or advance
    /// `seqid`; callers that mutate the state the stateid names (`CLOSE`,
    /// `OPEN_DOWNGRADE`) must go through [`Self::validate_stateid_for_mutation`]
    /// instead.
    pub fn validate_stateid(&self, bytes: &[u8; 12], expected: StateType) -> Result<OpenState> {
        let id = Stateid::decode(bytes);
        id.check_epoch(self.boot_epoch)?;
        if id.stype() != Some(expected) {
            return Err(Kind::BadStateid);
        }
        let open = self.opens_by_other.get(&id.other).ok_or(Kind::BadStateid)?;
        if open.revoked {
            return Err(Kind::BadStateid);
        }
        Ok(open.clone())
    }

    /// As [`Self::validate_stateid`], plus the seqid check §3.2 requires for
    /// any operation that mutates the state a stateid names: the presented
    /// seqid must equal the one the server last handed back for this
    /// stateid, or the request is `BAD_SEQID` (v4.0; v4.1 sessions make
    /// seqid advisory, but nothing here distinguishes the two yet). On
    /// success, advances the stored seqid so the next mutation must present
    /// the new value.
    fn validate_stateid_for_mutation(&self, bytes: &[u8; 12], expected: StateType) -> Result<OpenState> {
        let id = Stateid::decode(bytes);
        let open = self.validate_stateid(bytes, expected)?;
        if id.seqid != open.seqid {
            return Err(Kind::BadSeqid);
        }
        let mut entry = self.opens_by_other.get_mut(&id.other).ok_or(Kind::BadStateid)?;
        entry.seqid = entry.seqid.wrapping_add(1);
        Ok(entry.clone())
    }

    pub fn opens_on_file(&self, file: &FileHandle) -> Vec<OpenState> {
        self.opens_by_file
            .get(file)
            .map(|others| others.iter().filter_map(|o| self.opens_by_other.get(o).map(|e| e.clone())).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ClientDirectory for StateManager {
    async fn cb_path_up(&self, client_id: &[u8]) -> bool {
        self.clients.get(client_id).is_some_and(|rec| rec.cb_path_up && rec.callback.is_some())
    }

    async fn callback_target(&self, client_id: &[u8]) -> Option<CallbackTarget> {
        self.clients.get(client_id).and_then(|rec| rec.callback)
    }

    async fn mark_cb_path_down(&self, client_id: &[u8]) {
        if let Some(mut rec) = self.clients.get_mut(client_id) {
            rec.cb_path_up = false;
        }
    }

    async fn other_client_has_open(&self, file: &FileHandle, requesting_client: &[u8]) -> bool {
        self.opens_by_file
            .get(file)
            .map(|others| {
                others.iter().any(|o| {
                    self.opens_by_other.get(o).is_some_and(|open| !open.revoked && open.client_id != requesting_client)
                })
            })
            .unwrap_or(false)
    }
}
