//! Persistence capability for the Unified Lock Manager (§4.C). The manager
//! is the only caller permitted to mutate a `LockStore`; everything here is
//! a pure data capability, matching §9's "capability set" restatement of
//! `LockStore: {Put, Get, Delete, List, ReclaimLease}`.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::handle::FileHandle;

use super::{LeaseState, Owner, Range};

/// What actually survives a restart for one outstanding lock, keyed by
/// `id` (the same id the in-memory manager assigns). Reclaim matching
/// requires owner + range + lease key to agree with what was persisted
/// (§4.C "Reclaim locks must match a persisted record").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedLockRecord {
    pub id: u64,
    pub file: FileHandle,
    pub owner: Owner,
    pub range: Option<Range>,
    pub exclusive: bool,
    pub lease_state: Option<LeaseState>,
    pub lease_key: Option<[u8; 16]>,
}

/// Capability the manager speaks to for durability. A production
/// implementation backs this with real storage; `InMemoryLockStore` below
/// is the test/dev implementation.
pub trait LockStore: Send + Sync {
    fn put(&self, record: PersistedLockRecord);
    fn get(&self, id: u64) -> Option<PersistedLockRecord>;
    fn delete(&self, id: u64);
    fn list(&self, file: &FileHandle) -> Vec<PersistedLockRecord>;
    /// All persisted records at server start, used to seed the grace
    /// period's recovery-client set (§4.C, §4.F).
    fn list_all(&self) -> Vec<PersistedLockRecord>;
    /// Matches a reclaim request against a persisted record for the same
    /// file/owner/range/lease key; removes it on success.
    fn reclaim(
        &self,
        file: &FileHandle,
        owner: &Owner,
        range: Option<Range>,
        lease_key: Option<[u8; 16]>,
    ) -> Option<PersistedLockRecord>;
}

#[derive(Default)]
pub struct InMemoryLockStore {
    records: Mutex<HashMap<u64, PersistedLockRecord>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockStore for InMemoryLockStore {
    fn put(&self, record: PersistedLockRecord) {
        self.records.lock().unwrap().insert(record.id, record);
    }

    fn get(&self, id: u64) -> Option<PersistedLockRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    fn delete(&self, id: u64) {
        self.records.lock().unwrap().remove(&id);
    }

    fn list(&self, file: &FileHandle) -> Vec<PersistedLockRecord> {
        self.records.lock().unwrap().values().filter(|r| &r.file == file).cloned().collect()
    }

    fn list_all(&self) -> Vec<PersistedLockRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    fn reclaim(
        &self,
        file: &FileHandle,
        owner: &Owner,
        range: Option<Range>,
        lease_key: Option<[u8; 16]>,
    ) -> Option<PersistedLockRecord> {
        let mut records = self.records.lock().unwrap();
        let id = records
            .values()
            .find(|r| &r.file == file && &r.owner == owner && r.range == range && r.lease_key == lease_key)
            .map(|r| r.id)?;
        records.remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::Protocol;

    fn owner() -> Owner {
        Owner { protocol: Protocol::Nlm, client_id: b"c1".to_vec(), owner_id: b"o1".to_vec() }
    }

    #[test]
    fn put_get_delete_round_trip() {
        let store = InMemoryLockStore::new();
        let file = FileHandle::new(b"f1".to_vec());
        let record = PersistedLockRecord {
            id: 1,
            file: file.clone(),
            owner: owner(),
            range: Some(Range { offset: 0, length: 10 }),
            exclusive: true,
            lease_state: None,
            lease_key: None,
        };
        store.put(record.clone());
        assert_eq!(store.get(1), Some(record));
        assert_eq!(store.list(&file).len(), 1);
        store.delete(1);
        assert_eq!(store.get(1), None);
    }

    #[test]
    fn reclaim_matches_owner_and_range() {
        let store = InMemoryLockStore::new();
        let file = FileHandle::new(b"f1".to_vec());
        let range = Some(Range { offset: 0, length: 10 });
        store.put(PersistedLockRecord {
            id: 7,
            file: file.clone(),
            owner: owner(),
            range,
            exclusive: false,
            lease_state: None,
            lease_key: None,
        });
        assert!(store.reclaim(&file, &owner(), range, None).is_some());
        assert!(store.get(7).is_none());
    }
}
