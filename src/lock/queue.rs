//! The per-file blocking queue for NLM's "Block" verdict (§4.C).
//!
//! `crossbeam_queue::SegQueue` only supports push/pop, no peek or
//! arbitrary removal, so re-evaluating the queue after a release works by
//! draining it entirely and pushing back whatever is still blocked, in the
//! same order -- which is exactly the FIFO-by-arrival-time tie-break this
//! crate resolves the corresponding open question with (see DESIGN.md).

use std::time::Instant;

use crossbeam_queue::SegQueue;

use super::LockRequest;

/// One caller parked behind a conflicting lock, waiting for
/// `NLM4_GRANTED`.
pub struct BlockedWaiter {
    pub cookie: u64,
    pub request: LockRequest,
    pub queued_at: Instant,
}

/// FIFO-ordered blocking queue for a single file.
#[derive(Default)]
pub struct BlockQueue {
    inner: SegQueue<BlockedWaiter>,
}

impl BlockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, waiter: BlockedWaiter) {
        self.inner.push(waiter);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drains every waiter, in FIFO order, for the caller to re-evaluate.
    pub fn drain(&self) -> Vec<BlockedWaiter> {
        let mut out = Vec::new();
        while let Some(w) = self.inner.pop() {
            out.push(w);
        }
        out
    }

    /// Pushes waiters back, preserving relative order.
    pub fn refill(&self, waiters: Vec<BlockedWaiter>) {
        for w in waiters {
            self.inner.push(w);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::FileHandle;
    use crate::lock::{Owner, Protocol, Range};

    fn waiter(cookie: u64) -> BlockedWaiter {
        BlockedWaiter {
            cookie,
            request: LockRequest {
                file: FileHandle::new(b"f".to_vec()),
                owner: Owner { protocol: Protocol::Nlm, client_id: vec![], owner_id: vec![] },
                range: Range { offset: 0, length: 1 },
                exclusive: true,
                reclaim: false,
                block: true,
            },
            queued_at: Instant::now(),
        }
    }

    #[test]
    fn drain_preserves_fifo_order() {
        let q = BlockQueue::new();
        q.push(waiter(1));
        q.push(waiter(2));
        q.push(waiter(3));
        let drained = q.drain();
        assert_eq!(drained.iter().map(|w| w.cookie).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(q.is_empty());
    }

    #[test]
    fn refill_restores_order_for_requeue() {
        let q = BlockQueue::new();
        q.push(waiter(1));
        q.push(waiter(2));
        let mut drained = q.drain();
        drained.retain(|w| w.cookie != 1); // 1 got granted, 2 stays blocked
        q.refill(drained);
        let remaining = q.drain();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].cookie, 2);
    }
}
