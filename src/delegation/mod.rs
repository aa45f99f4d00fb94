//! Delegation Engine (component E): grants NFSv4 READ/WRITE delegations,
//! detects conflicting OPENs from other clients, and drives the
//! acquire-snapshot-release-then-call recall sequence from §9's
//! "coroutine-ish async" restatement.
//!
//! Stateid minting is the NFSv4 State Manager's job (component F); this
//! engine is handed an already-assembled 12-byte `other` value per grant
//! and only tracks it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use moka::sync::Cache;
use tracing::{info, warn};

use crate::callback::{CallbackChannel, CallbackTarget, Encoder};
use crate::error::{Kind, Result};
use crate::handle::FileHandle;

pub type DelegId = [u8; 12];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationType {
    Read,
    Write,
}

#[derive(Debug, Clone)]
pub struct DelegationState {
    pub stateid: DelegId,
    pub client_id: Vec<u8>,
    pub file: FileHandle,
    pub kind: DelegationType,
    pub recall_sent: bool,
    pub recall_time: Option<Instant>,
    pub revoked: bool,
}

/// The Delegation Engine's view of the client/open-state world, satisfied
/// by the NFSv4 State Manager (component F). Kept as a trait, per §9's
/// "keep entities in arena-like maps keyed by identifier... resolve cyclic
/// ownership" note, so neither component needs a direct reference cycle to
/// the other.
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn cb_path_up(&self, client_id: &[u8]) -> bool;
    async fn callback_target(&self, client_id: &[u8]) -> Option<CallbackTarget>;
    async fn mark_cb_path_down(&self, client_id: &[u8]);
    async fn other_client_has_open(&self, file: &FileHandle, requesting_client: &[u8]) -> bool;
}

pub struct DelegationEngine {
    by_id: DashMap<DelegId, DelegationState>,
    by_file: DashMap<FileHandle, DelegId>,
    recently_recalled: Cache<FileHandle, ()>,
    directory: Arc<dyn ClientDirectory>,
    channel: Arc<dyn CallbackChannel>,
    lease_duration: Duration,
    short_recall_timer: Duration,
}

impl DelegationEngine {
    pub fn new(
        directory: Arc<dyn ClientDirectory>,
        channel: Arc<dyn CallbackChannel>,
        lease_duration: Duration,
        anti_storm_ttl: Duration,
        short_recall_timer: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            by_id: DashMap::new(),
            by_file: DashMap::new(),
            recently_recalled: Cache::builder().time_to_live(anti_storm_ttl).build(),
            directory,
            channel,
            lease_duration,
            short_recall_timer,
        })
    }

    /// Grant policy (§4.E): all four conditions must hold, else the caller
    /// returns `OPEN_DELEGATE_NONE` and continues normally.
    pub async fn try_grant(
        &self,
        file: &FileHandle,
        client_id: &[u8],
        kind: DelegationType,
        stateid: DelegId,
    ) -> Option<DelegationState> {
        if !self.directory.cb_path_up(client_id).await {
            return None;
        }
        if self.directory.other_client_has_open(file, client_id).await {
            return None;
        }
        if self.by_file.contains_key(file) {
            return None;
        }
        if self.recently_recalled.contains_key(file) {
            return None;
        }

        let state = DelegationState {
            stateid,
            client_id: client_id.to_vec(),
            file: file.clone(),
            kind,
            recall_sent: false,
            recall_time: None,
            revoked: false,
        };
        self.by_file.insert(file.clone(), stateid);
        self.by_id.insert(stateid, state.clone());
        info!(file = %file, ?kind, "delegation granted");
        Some(state)
    }

    /// Whether an OPEN for `requested_write` access from `client_id`
    /// conflicts with any existing delegation on `file` (§4.E). Read
    /// delegation vs. read open is explicitly not a conflict; a
    /// delegation held by `client_id` itself never conflicts with its own
    /// OPEN (that is the CLAIM_DELEGATE_CUR path).
    pub fn check_conflict(&self, file: &FileHandle, client_id: &[u8], requested_write: bool) -> Option<DelegId> {
        let id = *self.by_file.get(file)?;
        let deleg = self.by_id.get(&id)?;
        if deleg.client_id == client_id || deleg.revoked {
            return None;
        }
        let conflicts = match deleg.kind {
            DelegationType::Write => true,
            DelegationType::Read => requested_write,
        };
        conflicts.then_some(id)
    }

    /// Orchestrates a recall (§4.E, §9): mark `recall_sent`/`recall_time`
    /// under the per-entry lock, release it, then perform the network
    /// call and start the revocation timer outside that lock.
    pub fn send_recall(self: &Arc<Self>, deleg_id: DelegId, encode_recall_args: Encoder) {
        let target = {
            let mut entry = match self.by_id.get_mut(&deleg_id) {
                Some(e) => e,
                None => return,
            };
            if entry.recall_sent {
                return;
            }
            entry.recall_sent = true;
            entry.recall_time = Some(Instant::now());
            entry.client_id.clone()
        };

        let engine = self.clone();
        tokio::spawn(async move {
            let callback_target = engine.directory.callback_target(&target).await;
            let result = match callback_target {
                Some(cb_target) => engine.channel.cb_compound(&cb_target, encode_recall_args).await,
                None => Err(Kind::CallbackRpcFailure),
            };

            let timer = match result {
                Ok(_) => {
                    info!(client = ?target, "CB_RECALL acknowledged");
                    engine.lease_duration
                }
                Err(err) => {
                    warn!(?err, client = ?target, "CB_RECALL failed");
                    engine.directory.mark_cb_path_down(&target).await;
                    engine.short_recall_timer
                }
            };

            tokio::time::sleep(timer).await;
            engine.revoke(deleg_id);
        });
    }

    /// `RevokeDelegation` (§4.E): clears the file index but leaves a
    /// tombstone in `by_id` so a later reference to this stateid reports
    /// `BAD_STATEID` instead of silently succeeding or returning a
    /// not-found that looks transient.
    pub fn revoke(&self, deleg_id: DelegId) {
        if let Some(mut entry) = self.by_id.get_mut(&deleg_id) {
            entry.revoked = true;
            self.by_file.remove(&entry.file);
            self.recently_recalled.insert(entry.file.clone(), ());
            info!(file = %entry.file, "delegation revoked");
        }
    }

    /// Called by the NFSv4 State Manager's lease-expiry teardown (§4.F
    /// step 1): revokes every live delegation owned by `client_id`.
    pub fn revoke_all_for_client(&self, client_id: &[u8]) {
        let ids: Vec<DelegId> =
            self.by_id.iter().filter(|e| e.value().client_id == client_id && !e.value().revoked).map(|e| *e.key()).collect();
        for id in ids {
            self.revoke(id);
        }
    }

    /// Client-initiated DELEGRETURN: same bookkeeping as a revoke, minus
    /// the "force-clear because the client ignored CB_RECALL" framing.
    pub fn return_delegation(&self, deleg_id: DelegId) -> Result<()> {
        let Some(mut entry) = self.by_id.get_mut(&deleg_id) else { return Err(Kind::BadStateid) };
        if entry.revoked {
            return Err(Kind::BadStateid);
        }
        entry.revoked = true;
        self.by_file.remove(&entry.file);
        self.recently_recalled.insert(entry.file.clone(), ());
        Ok(())
    }

    /// `CLAIM_DELEGATE_CUR`: validates the stateid and returns the file it
    /// is for, so the caller can proceed to OPEN against that file
    /// identity without running the conflict check again (§4.E).
    pub fn claim_cur(&self, deleg_id: DelegId) -> Result<FileHandle> {
        let entry = self.by_id.get(&deleg_id).ok_or(Kind::BadStateid)?;
        if entry.revoked {
            return Err(Kind::BadStateid);
        }
        Ok(entry.file.clone())
    }

    /// `CLAIM_DELEGATE_PREV` and `DELEGPURGE` (§4.E): unsupported, since
    /// this implementation keeps no delegation state across a restart.
    pub fn claim_prev_unsupported(&self) -> Kind {
        Kind::NotSupported
    }

    pub fn delegpurge_unsupported(&self) -> Kind {
        Kind::NotSupported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeDirectory {
        cb_up: AtomicBool,
        has_open: AtomicBool,
    }

    #[async_trait]
    impl ClientDirectory for FakeDirectory {
        async fn cb_path_up(&self, _client_id: &[u8]) -> bool {
            self.cb_up.load(Ordering::Relaxed)
        }
        async fn callback_target(&self, _client_id: &[u8]) -> Option<CallbackTarget> {
            Some(CallbackTarget {
                addr: crate::callback::UniversalAddress { ip: IpAddr::V4(Ipv4Addr::LOCALHOST), port: 2049 },
                program: 1,
            })
        }
        async fn mark_cb_path_down(&self, _client_id: &[u8]) {}
        async fn other_client_has_open(&self, _file: &FileHandle, _requesting: &[u8]) -> bool {
            self.has_open.load(Ordering::Relaxed)
        }
    }

    fn engine(cb_up: bool, has_open: bool) -> Arc<DelegationEngine> {
        DelegationEngine::new(
            Arc::new(FakeDirectory { cb_up: AtomicBool::new(cb_up), has_open: AtomicBool::new(has_open) }),
            Arc::new(crate::callback::MockCallbackChannel::new()),
            Duration::from_secs(90),
            Duration::from_millis(20),
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn grants_when_all_conditions_hold() {
        let eng = engine(true, false);
        let file = FileHandle::new(b"f".to_vec());
        let granted = eng.try_grant(&file, b"c1", DelegationType::Read, [1; 12]).await;
        assert!(granted.is_some());
    }

    #[tokio::test]
    async fn refuses_when_cb_path_down() {
        let eng = engine(false, false);
        let file = FileHandle::new(b"f".to_vec());
        assert!(eng.try_grant(&file, b"c1", DelegationType::Read, [1; 12]).await.is_none());
    }

    #[tokio::test]
    async fn refuses_when_another_client_has_open() {
        let eng = engine(true, true);
        let file = FileHandle::new(b"f".to_vec());
        assert!(eng.try_grant(&file, b"c1", DelegationType::Read, [1; 12]).await.is_none());
    }

    #[tokio::test]
    async fn read_read_is_not_a_conflict() {
        let eng = engine(true, false);
        let file = FileHandle::new(b"f".to_vec());
        eng.try_grant(&file, b"c1", DelegationType::Read, [1; 12]).await.unwrap();
        assert!(eng.check_conflict(&file, b"c2", false).is_none());
        assert!(eng.check_conflict(&file, b"c2", true).is_some());
    }

    #[tokio::test]
    async fn write_delegation_conflicts_with_any_other_open() {
        let eng = engine(true, false);
        let file = FileHandle::new(b"f".to_vec());
        eng.try_grant(&file, b"c1", DelegationType::Write, [2; 12]).await.unwrap();
        assert!(eng.check_conflict(&file, b"c2", false).is_some());
        assert!(eng.check_conflict(&file, b"c2", true).is_some());
    }

    #[tokio::test]
    async fn own_clients_delegation_never_conflicts() {
        let eng = engine(true, false);
        let file = FileHandle::new(b"f".to_vec());
        eng.try_grant(&file, b"c1", DelegationType::Write, [3; 12]).await.unwrap();
        assert!(eng.check_conflict(&file, b"c1", true).is_none());
    }

    #[tokio::test]
    async fn revoke_leaves_tombstone_returning_bad_stateid() {
        let eng = engine(true, false);
        let file = FileHandle::new(b"f".to_vec());
        let deleg = eng.try_grant(&file, b"c1", DelegationType::Read, [4; 12]).await.unwrap();
        eng.revoke(deleg.stateid);
        assert_eq!(eng.claim_cur(deleg.stateid).unwrap_err(), Kind::BadStateid);
        // and the file is now free for a new delegation once the
        // anti-storm entry expires, but the id itself is never reused
        assert!(!eng.by_file.contains_key(&file));
    }

    #[tokio::test]
    async fn recently_recalled_blocks_regrant_during_ttl() {
        let eng = engine(true, false);
        let file = FileHandle::new(b"f".to_vec());
        let deleg = eng.try_grant(&file, b"c1", DelegationType::Read, [5; 12]).await.unwrap();
        eng.revoke(deleg.stateid);
        assert!(eng.try_grant(&file, b"c2", DelegationType::Read, [6; 12]).await.is_none());
    }

    #[tokio::test]
    async fn revoke_all_for_client_leaves_other_clients_alone() {
        let eng = engine(true, false);
        let file_a = FileHandle::new(b"a".to_vec());
        let file_b = FileHandle::new(b"b".to_vec());
        let mine = eng.try_grant(&file_a, b"c1", DelegationType::Read, [8; 12]).await.unwrap();
        let theirs = eng.try_grant(&file_b, b"c2", DelegationType::Read, [9; 12]).await.unwrap();

        eng.revoke_all_for_client(b"c1");

        assert_eq!(eng.claim_cur(mine.stateid).unwrap_err(), Kind::BadStateid);
        assert_eq!(eng.claim_cur(theirs.stateid).unwrap(), file_b);
    }

    #[tokio::test]
    async fn send_recall_revokes_after_timer() {
        // A short lease duration so the successful-CB_RECALL branch (which
        // times the revoke off the lease, not the short-recall timer)
        // completes within the test.
        let eng = DelegationEngine::new(
            Arc::new(FakeDirectory { cb_up: AtomicBool::new(true), has_open: AtomicBool::new(false) }),
            Arc::new(crate::callback::MockCallbackChannel::new()),
            Duration::from_millis(20),
            Duration::from_millis(20),
            Duration::from_millis(5),
        );
        let file = FileHandle::new(b"f".to_vec());
        let deleg = eng.try_grant(&file, b"c1", DelegationType::Read, [7; 12]).await.unwrap();
        eng.send_recall(deleg.stateid, Box::new(|_| {}));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(eng.claim_cur(deleg.stateid).unwrap_err(), Kind::BadStateid);
    }

    #[tokio::test]
    async fn send_recall_uses_short_timer_when_callback_path_down() {
        let eng = DelegationEngine::new(
            Arc::new(FakeDirectory { cb_up: AtomicBool::new(true), has_open: AtomicBool::new(false) }),
            Arc::new({
                let mock = crate::callback::MockCallbackChannel::new();
                mock.set_failing(true);
                mock
            }),
            Duration::from_secs(90),
            Duration::from_millis(20),
            Duration::from_millis(5),
        );
        let file = FileHandle::new(b"f".to_vec());
        let deleg = eng.try_grant(&file, b"c1", DelegationType::Read, [8; 12]).await.unwrap();
        eng.send_recall(deleg.stateid, Box::new(|_| {}));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(eng.claim_cur(deleg.stateid).unwrap_err(), Kind::BadStateid);
    }
}
