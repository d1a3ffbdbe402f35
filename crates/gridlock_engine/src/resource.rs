//! # Shared Resources
//!
//! A [`SharedResource`] is a single lockable unit with a FIFO wait queue.
//! Acquisition is a non-blocking poll-and-queue primitive, not a mutex: a
//! caller that finds the resource locked is enqueued and told `false`, and
//! the hand-off happens later when the holder releases.
//!
//! The read/write distinction is cosmetic. Both operations take the
//! resource exclusively; there are no multi-reader semantics here, only the
//! label carried around for display.
//!
//! ## Thread Safety
//!
//! All mutable state sits behind one `parking_lot::Mutex` per resource.
//! Resources are independent; there is no global lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::worker::WorkerId;

/// The kind of access a worker asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Shared-read in name only; exclusive in effect.
    Read,
    /// Exclusive write.
    Write,
}

impl Operation {
    /// Display label, lowercase.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// Lock state of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockState {
    /// No holder.
    Unlocked,
    /// Held for a read operation (still exclusive).
    ReadLocked,
    /// Held for a write operation.
    WriteLocked,
}

impl LockState {
    fn for_operation(op: Operation) -> Self {
        match op {
            Operation::Read => Self::ReadLocked,
            Operation::Write => Self::WriteLocked,
        }
    }
}

/// A pending acquisition, FIFO by arrival order.
#[derive(Clone, Debug)]
pub struct WaitEntry {
    /// Who is waiting.
    pub worker: WorkerId,
    /// What access they asked for.
    pub operation: Operation,
    /// When they joined the queue.
    pub queued_at: Instant,
}

/// Mutable state of a resource, all behind the one mutex.
#[derive(Debug)]
struct ResourceState {
    lock: LockState,
    holder: Option<WorkerId>,
    operation: Option<Operation>,
    queue: VecDeque<WaitEntry>,
}

impl ResourceState {
    fn grant(&mut self, worker: WorkerId, op: Operation) {
        self.lock = LockState::for_operation(op);
        self.holder = Some(worker);
        self.operation = Some(op);
    }

    fn clear(&mut self) {
        self.lock = LockState::Unlocked;
        self.holder = None;
        self.operation = None;
    }
}

/// A single lockable unit contended for by workers.
///
/// Invariant: `holder` is `Some` iff the lock state is not `Unlocked`, and
/// there is at most one holder at any time.
pub struct SharedResource {
    name: String,
    state: Mutex<ResourceState>,
}

impl SharedResource {
    /// Creates an unlocked resource with an empty queue.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ResourceState {
                lock: LockState::Unlocked,
                holder: None,
                operation: None,
                queue: VecDeque::new(),
            }),
        }
    }

    /// The resource's stable name ("X", "Y").
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attempts to take the resource for `worker`. Never blocks.
    ///
    /// Grants immediately when unlocked and returns `true`. Otherwise the
    /// request joins the tail of the wait queue (at most one entry per
    /// worker) and the call returns `false`. A worker that already holds
    /// the resource gets `true` without touching the queue.
    pub fn acquire(&self, worker: WorkerId, op: Operation) -> bool {
        let mut state = self.state.lock();
        if state.lock == LockState::Unlocked {
            state.grant(worker, op);
            tracing::trace!(resource = %self.name, worker, op = op.label(), "acquired");
            return true;
        }
        if state.holder == Some(worker) {
            return true;
        }
        if !state.queue.iter().any(|e| e.worker == worker) {
            state.queue.push_back(WaitEntry {
                worker,
                operation: op,
                queued_at: Instant::now(),
            });
            tracing::trace!(resource = %self.name, worker, "queued");
        }
        false
    }

    /// Releases the resource and hands it to the head of the wait queue.
    ///
    /// Exactly one hand-off per call: the head entry (if any) is granted on
    /// the spot and returned so the caller can notify that worker. If the
    /// notified worker declines the grant, the caller releases again, which
    /// moves on to the next queued entry.
    ///
    /// Releasing an unlocked resource is an idempotent no-op apart from the
    /// queue drain attempt.
    pub fn release(&self) -> Option<WaitEntry> {
        let mut state = self.state.lock();
        state.clear();
        let entry = state.queue.pop_front()?;
        state.grant(entry.worker, entry.operation);
        tracing::trace!(
            resource = %self.name,
            worker = entry.worker,
            "handed off to queue head"
        );
        Some(entry)
    }

    /// The deadlock-forcing path: takes the resource unconditionally,
    /// bypassing the wait queue. Existing queue entries stay put and get
    /// their turn on the next release.
    pub fn force_acquire(&self, worker: WorkerId, op: Operation) {
        let mut state = self.state.lock();
        state.grant(worker, op);
        tracing::debug!(resource = %self.name, worker, "force-acquired");
    }

    /// Clears holder, operation, lock state and the whole wait queue.
    /// Used between simulation batches and before forcing a deadlock.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.clear();
        state.queue.clear();
    }

    /// Current lock state.
    #[must_use]
    pub fn lock_state(&self) -> LockState {
        self.state.lock().lock
    }

    /// Current holder, if any.
    #[must_use]
    pub fn holder(&self) -> Option<WorkerId> {
        self.state.lock().holder
    }

    /// Number of queued waiters.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// True when nobody holds the resource.
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.lock_state() == LockState::Unlocked
    }
}

/// The fixed, named collection of resources shared by all workers.
///
/// Created once per simulation batch and passed to every worker explicitly;
/// the supervisor owns it, workers share it by `Arc`.
pub struct ResourcePool {
    resources: Vec<Arc<SharedResource>>,
}

impl ResourcePool {
    /// Creates a pool with the given resource names, in order.
    #[must_use]
    pub fn new(names: &[&str]) -> Self {
        Self {
            resources: names
                .iter()
                .map(|n| Arc::new(SharedResource::new(*n)))
                .collect(),
        }
    }

    /// The conventional two-resource pool, "X" and "Y".
    #[must_use]
    pub fn default_pair() -> Self {
        Self::new(&["X", "Y"])
    }

    /// Looks a resource up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<SharedResource>> {
        self.resources.iter().find(|r| r.name() == name)
    }

    /// All resources, in creation order.
    #[must_use]
    pub fn resources(&self) -> &[Arc<SharedResource>] {
        &self.resources
    }

    /// Resets every resource: holders, operations and queues all cleared.
    pub fn reset_all(&self) {
        for resource in &self.resources {
            resource.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holder_iff_locked() {
        let r = SharedResource::new("X");
        assert_eq!(r.lock_state(), LockState::Unlocked);
        assert_eq!(r.holder(), None);

        assert!(r.acquire(1, Operation::Write));
        assert_eq!(r.lock_state(), LockState::WriteLocked);
        assert_eq!(r.holder(), Some(1));

        r.release();
        assert_eq!(r.lock_state(), LockState::Unlocked);
        assert_eq!(r.holder(), None);
    }

    #[test]
    fn fifo_handoff_one_grant_per_release() {
        let r = SharedResource::new("X");
        assert!(r.acquire(1, Operation::Read));
        assert!(!r.acquire(2, Operation::Write));
        assert!(!r.acquire(3, Operation::Read));
        assert_eq!(r.queue_len(), 2);

        // First release hands to worker 2, and only to worker 2.
        let entry = r.release().unwrap();
        assert_eq!(entry.worker, 2);
        assert_eq!(r.holder(), Some(2));
        assert_eq!(r.queue_len(), 1);

        let entry = r.release().unwrap();
        assert_eq!(entry.worker, 3);
        assert_eq!(r.holder(), Some(3));
        assert!(r.release().is_none());
    }

    #[test]
    fn release_when_unlocked_is_noop() {
        let r = SharedResource::new("Y");
        assert!(r.release().is_none());
        assert_eq!(r.lock_state(), LockState::Unlocked);
    }

    #[test]
    fn duplicate_queue_entries_are_collapsed() {
        let r = SharedResource::new("X");
        assert!(r.acquire(1, Operation::Write));
        assert!(!r.acquire(2, Operation::Write));
        assert!(!r.acquire(2, Operation::Read));
        assert_eq!(r.queue_len(), 1);
    }

    #[test]
    fn reacquire_while_holding_is_a_grant() {
        let r = SharedResource::new("X");
        assert!(r.acquire(1, Operation::Write));
        assert!(r.acquire(1, Operation::Read));
        assert_eq!(r.queue_len(), 0);
        assert_eq!(r.holder(), Some(1));
    }

    #[test]
    fn force_acquire_bypasses_queue() {
        let r = SharedResource::new("X");
        assert!(r.acquire(1, Operation::Read));
        assert!(!r.acquire(2, Operation::Write));

        r.force_acquire(9, Operation::Write);
        assert_eq!(r.holder(), Some(9));
        assert_eq!(r.lock_state(), LockState::WriteLocked);
        // Worker 2 is still queued and gets the next release.
        assert_eq!(r.queue_len(), 1);
        assert_eq!(r.release().unwrap().worker, 2);
    }

    #[test]
    fn reset_clears_everything() {
        let r = SharedResource::new("X");
        assert!(r.acquire(1, Operation::Write));
        assert!(!r.acquire(2, Operation::Read));
        r.reset();
        assert_eq!(r.lock_state(), LockState::Unlocked);
        assert_eq!(r.holder(), None);
        assert_eq!(r.queue_len(), 0);
    }

    #[test]
    fn pool_lookup_and_reset() {
        let pool = ResourcePool::default_pair();
        assert_eq!(pool.resources().len(), 2);
        let x = pool.get("X").unwrap();
        assert!(x.acquire(1, Operation::Write));
        assert!(pool.get("Z").is_none());

        pool.reset_all();
        assert!(pool.get("X").unwrap().is_unlocked());
    }
}
