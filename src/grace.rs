//! Shared grace-period controller, used by both the Unified Lock Manager
//! (component C) and the NFSv4 State Manager (component F). §5's design
//! notes call for "scoped lifetime... construct at server start, destroy at
//! shutdown" rather than module-level globals; `GracePeriod` is that scope,
//! owned by `server::DittoCore` and handed to both components.

use std::collections::HashSet;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Tracks whether the server is within its post-restart grace window, and
/// which clients are still expected to reclaim before it can end early
/// (§3.3, §4.C, §4.F).
pub struct GracePeriod {
    started_at: Instant,
    duration: Duration,
    state: RwLock<GraceState>,
}

struct GraceState {
    ended: bool,
    /// Clients the server expects a RECLAIM_COMPLETE (or equivalent SMB
    /// reclaim) from before grace can end early.
    pending_clients: HashSet<Vec<u8>>,
}

impl GracePeriod {
    /// Starts a new grace period. `recovery_clients` is the list of
    /// clients derived from persisted state at boot (§4.F); pass an empty
    /// list if nothing was persisted, in which case the grace period
    /// begins already-eligible-to-end on the next `maybe_end` check below
    /// (callers typically skip grace altogether in that case -- see
    /// `lock::UnifiedLockManager::new`).
    pub fn start(duration: Duration, recovery_clients: Vec<Vec<u8>>) -> Self {
        Self {
            started_at: Instant::now(),
            duration,
            state: RwLock::new(GraceState {
                ended: recovery_clients.is_empty(),
                pending_clients: recovery_clients.into_iter().collect(),
            }),
        }
    }

    /// A grace period that is already over; used when there is nothing to
    /// recover (fresh start, no persisted state).
    pub fn already_ended() -> Self {
        Self::start(Duration::ZERO, Vec::new())
    }

    /// Whether new non-reclaim operations should currently be refused.
    pub fn in_progress(&self) -> bool {
        if self.state.read().unwrap().ended {
            return false;
        }
        if self.started_at.elapsed() >= self.duration {
            self.end();
            return false;
        }
        true
    }

    /// Signals that `client_id` has sent RECLAIM_COMPLETE (v4.1) or its
    /// equivalent; ends grace immediately once every expected client has
    /// signaled (§3.3, §4.F).
    pub fn reclaim_complete(&self, client_id: &[u8]) {
        let mut state = self.state.write().unwrap();
        state.pending_clients.remove(client_id);
        if state.pending_clients.is_empty() {
            state.ended = true;
        }
    }

    fn end(&self) {
        self.state.write().unwrap().ended = true;
    }

    /// Forces grace to end immediately (used by tests and by explicit
    /// admin action).
    pub fn force_end(&self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_recovery_clients_ends_immediately() {
        let grace = GracePeriod::start(Duration::from_secs(90), Vec::new());
        assert!(!grace.in_progress());
    }

    #[test]
    fn ends_when_all_clients_reclaim() {
        let grace = GracePeriod::start(Duration::from_secs(90), vec![b"c1".to_vec(), b"c2".to_vec()]);
        assert!(grace.in_progress());
        grace.reclaim_complete(b"c1");
        assert!(grace.in_progress());
        grace.reclaim_complete(b"c2");
        assert!(!grace.in_progress());
    }

    #[test]
    fn ends_on_timeout() {
        let grace = GracePeriod::start(Duration::from_millis(1), vec![b"c1".to_vec()]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(!grace.in_progress());
    }
}
