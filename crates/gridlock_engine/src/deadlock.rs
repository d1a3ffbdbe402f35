//! # Deadlock Controller
//!
//! Installs and resolves the canonical two-resource circular wait:
//!
//! ```text
//!        holds              wants
//!   A ───────────▶ X    A ───────▶ Y
//!   B ───────────▶ Y    B ───────▶ X
//! ```
//!
//! The deadlock is manufactured by direct state mutation, not emergent
//! contention: resources are force-acquired past their wait queues and the
//! chosen pair is pinned in `WaitingForResources` with infinite workloads.
//! Resolution is priority-based: the worker with the larger configured
//! workload survives, the other is aborted, and the victim's release hands
//! its resource to whoever queued up for it.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{EngineError, EngineResult};
use crate::events::EventBus;
use crate::resource::{Operation, ResourcePool};
use crate::worker::{WorkerDirectory, WorkerId};

/// The outcome of resolving a forced deadlock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// The aborted worker (smaller configured workload; ties spare the
    /// first of the pair).
    pub victim: WorkerId,
    /// The resumed worker.
    pub survivor: WorkerId,
}

/// What a toggle invocation ended up doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// A circular wait was installed between the two named workers.
    Forced(WorkerId, WorkerId),
    /// The active deadlock was resolved.
    Resolved(Resolution),
}

/// Orchestrates forcing and resolving a circular wait between two workers.
///
/// Holds no ownership over workers or resources, only the ids of the pair
/// currently pinned. The supervisor remains the authority for both.
pub struct DeadlockController {
    active: Option<(WorkerId, WorkerId)>,
    rng: StdRng,
}

impl DeadlockController {
    pub(crate) fn new(seed: u64) -> Self {
        Self {
            active: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Whether a forced deadlock is currently installed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Drops any recorded pair. Called when the worker batch it referred
    /// to is torn down.
    pub(crate) fn reset(&mut self) {
        self.active = None;
    }

    /// Forces a circular wait between two randomly chosen active workers.
    ///
    /// Every worker first drops all resource assignments and the pool is
    /// reset, so the manufactured cycle is the only lock state left.
    ///
    /// # Errors
    ///
    /// [`EngineError::InsufficientWorkers`] with fewer than two non-terminal
    /// workers; [`EngineError::InvalidConfiguration`] if the pool does not
    /// carry the two conventional resources.
    pub(crate) fn force(
        &mut self,
        directory: &WorkerDirectory,
        pool: &ResourcePool,
        bus: &EventBus,
    ) -> EngineResult<(WorkerId, WorkerId)> {
        let mut candidates: Vec<_> = directory
            .all()
            .into_iter()
            .filter(|w| !w.state().is_terminal())
            .collect();
        if candidates.len() < 2 {
            return Err(EngineError::InsufficientWorkers {
                active: candidates.len(),
            });
        }
        let [x, y, ..] = pool.resources() else {
            return Err(EngineError::InvalidConfiguration(
                "deadlock forcing needs a pool of at least two resources".to_string(),
            ));
        };

        // Full reset: nobody holds or wants anything before the cycle goes
        // in.
        for worker in directory.all() {
            worker.clear_assignments();
        }
        pool.reset_all();

        candidates.shuffle(&mut self.rng);
        let a = &candidates[0];
        let b = &candidates[1];

        x.force_acquire(a.id(), Operation::Write);
        a.install_forced_wait(x, y, bus);
        y.force_acquire(b.id(), Operation::Write);
        b.install_forced_wait(y, x, bus);

        self.active = Some((a.id(), b.id()));
        tracing::info!(
            a = a.id(),
            b = b.id(),
            "forced deadlock: {} holds {} wants {}, {} holds {} wants {}",
            a.name(),
            x.name(),
            y.name(),
            b.name(),
            y.name(),
            x.name()
        );
        Ok((a.id(), b.id()))
    }

    /// Resolves the active forced deadlock by priority comparison.
    ///
    /// The worker with the larger configured workload survives and resumes
    /// with its remaining runtime recomputed; the other is aborted, and its
    /// release hands the resource to the head of the wait queue.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoActiveDeadlock`] when nothing is forced. Callers
    /// treat that as a no-op, not a failure.
    pub(crate) fn resolve(
        &mut self,
        directory: &WorkerDirectory,
        bus: &EventBus,
    ) -> EngineResult<Resolution> {
        let Some((a_id, b_id)) = self.active else {
            return Err(EngineError::NoActiveDeadlock);
        };
        let (Some(a), Some(b)) = (directory.get(a_id), directory.get(b_id)) else {
            // The batch was regenerated underneath the flag.
            self.active = None;
            return Err(EngineError::NoActiveDeadlock);
        };

        let (survivor, victim) = if a.priority() >= b.priority() {
            (a, b)
        } else {
            (b, a)
        };

        victim.abort(directory, bus);
        survivor.resume_after_deadlock(bus);
        self.active = None;

        let resolution = Resolution {
            victim: victim.id(),
            survivor: survivor.id(),
        };
        tracing::info!(
            victim = resolution.victim,
            survivor = resolution.survivor,
            "deadlock resolved"
        );
        Ok(resolution)
    }

    /// The single externally exposed entry point: forces a deadlock when
    /// idle, resolves it when active.
    ///
    /// # Errors
    ///
    /// Only the forcing half can fail (see [`Self::force`]).
    pub(crate) fn toggle(
        &mut self,
        directory: &WorkerDirectory,
        pool: &ResourcePool,
        bus: &EventBus,
    ) -> EngineResult<ToggleOutcome> {
        if self.is_active() {
            self.resolve(directory, bus).map(ToggleOutcome::Resolved)
        } else {
            let (a, b) = self.force(directory, pool, bus)?;
            Ok(ToggleOutcome::Forced(a, b))
        }
    }
}
