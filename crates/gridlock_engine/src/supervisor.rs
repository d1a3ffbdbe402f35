//! # Simulation Supervisor
//!
//! The thin layer the rendering collaborator talks to. Owns the worker
//! collection and the resource pool, handles batch creation, start and
//! teardown, and answers pull-based status queries.
//!
//! ```text
//!   collaborator ──commands──▶ SimulationSupervisor
//!        ▲                        │        │
//!        │                        │        ├── ResourcePool (X, Y)
//!     events,                     │        ├── WorkerDirectory
//!     snapshots ◀─────────────────┘        └── DeadlockController
//! ```
//!
//! Everything here is in-memory and ephemeral per run. Generating a new
//! batch stops and discards the previous one.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SimulationConfig;
use crate::deadlock::{DeadlockController, Resolution, ToggleOutcome};
use crate::error::{EngineError, EngineResult};
use crate::events::{EventBus, EventReceiver};
use crate::resource::{LockState, ResourcePool};
use crate::worker::{Worker, WorkerDirectory, WorkerId, WorkerState, WorkerTiming};

/// Point-in-time view of one worker.
#[derive(Clone, Debug)]
pub struct WorkerSnapshot {
    /// Worker id.
    pub id: WorkerId,
    /// Display name.
    pub name: String,
    /// Lifecycle state.
    pub state: WorkerState,
    /// Completion percentage, 0-100.
    pub progress: f64,
    /// Configured workload length in seconds (the resolution priority).
    pub priority: f64,
    /// Remaining workload in seconds.
    pub remaining_secs: f64,
    /// Names of held resources.
    pub held: Vec<String>,
    /// Names of desired resources.
    pub desired: Vec<String>,
}

/// Point-in-time view of one resource.
#[derive(Clone, Debug)]
pub struct ResourceSnapshot {
    /// Resource name.
    pub name: String,
    /// Current lock state.
    pub lock_state: LockState,
    /// Current holder, if any.
    pub holder: Option<WorkerId>,
    /// Number of queued waiters.
    pub queued: usize,
}

/// Full pull-based status answer.
#[derive(Clone, Debug)]
pub struct SimulationSnapshot {
    /// All workers of the current batch, ordered by id.
    pub workers: Vec<WorkerSnapshot>,
    /// All pool resources, in creation order.
    pub resources: Vec<ResourceSnapshot>,
    /// Whether a forced deadlock is currently installed.
    pub deadlock_active: bool,
}

/// Owns a simulation run: worker batch, resource pool, deadlock controller
/// and the outbound event stream.
pub struct SimulationSupervisor {
    config: SimulationConfig,
    pool: Arc<ResourcePool>,
    directory: Arc<WorkerDirectory>,
    handles: Vec<JoinHandle<()>>,
    bus: EventBus,
    events_rx: EventReceiver,
    controller: DeadlockController,
    rng: StdRng,
}

impl SimulationSupervisor {
    /// Creates a supervisor with the given (validated) configuration and
    /// the conventional two-resource pool.
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        let config = config.validated();
        let seed = config.seed.unwrap_or_else(clock_seed);
        let (bus, events_rx) = EventBus::channel();
        Self {
            pool: Arc::new(ResourcePool::default_pair()),
            directory: WorkerDirectory::new(),
            handles: Vec::new(),
            bus,
            events_rx,
            controller: DeadlockController::new(seed.wrapping_add(1)),
            rng: StdRng::seed_from_u64(seed),
            config,
        }
    }

    /// The active configuration (already validated).
    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// The stream of outbound status events. Clone-cheap; drain at will.
    #[must_use]
    pub fn events(&self) -> EventReceiver {
        self.events_rx.clone()
    }

    /// Generates a fresh worker batch, stopping and discarding any prior
    /// one. The worker count and each workload duration are drawn from the
    /// configured ranges. Returns the new worker ids.
    pub fn generate_batch(&mut self) -> Vec<WorkerId> {
        self.stop_workers();
        self.directory.clear();
        self.pool.reset_all();
        self.controller.reset();

        let count = self
            .rng
            .gen_range(self.config.worker_count_min..=self.config.worker_count_max);
        let timing = WorkerTiming::from_config(&self.config);
        let mut ids = Vec::with_capacity(count as usize);
        for id in 1..=count {
            let workload = self
                .rng
                .gen_range(self.config.workload_secs_min..=self.config.workload_secs_max);
            let worker = Worker::new(id, workload, timing, self.rng.gen::<u64>());
            worker.announce(
                &self.bus,
                format!("{} generated ({workload:.1}s workload)", worker.name()),
            );
            self.directory.insert(worker);
            ids.push(id);
        }
        tracing::info!(count, "generated worker batch");
        ids
    }

    /// Starts every not-yet-started worker of the current batch, one
    /// thread each.
    pub fn start_all(&mut self) {
        let tick = self.config.tick_interval();
        for worker in self.directory.all() {
            if worker.is_alive() || worker.state().is_terminal() {
                continue;
            }
            let handle = worker.spawn(
                Arc::clone(&self.pool),
                Arc::clone(&self.directory),
                self.bus.clone(),
                tick,
            );
            self.handles.push(handle);
        }
        tracing::info!("batch started");
    }

    /// Forces a circular wait between two randomly chosen workers.
    ///
    /// # Errors
    ///
    /// See [`DeadlockController::force`]; fewer than two active workers is
    /// the usual cause.
    pub fn force_deadlock(&mut self) -> EngineResult<(WorkerId, WorkerId)> {
        self.controller.force(&self.directory, &self.pool, &self.bus)
    }

    /// Resolves the forced deadlock, if one is active. Returns `None` when
    /// nothing was forced; that case is deliberately not an error at this
    /// boundary.
    pub fn resolve_deadlock(&mut self) -> Option<Resolution> {
        match self.controller.resolve(&self.directory, &self.bus) {
            Ok(resolution) => Some(resolution),
            Err(EngineError::NoActiveDeadlock) => {
                tracing::debug!("resolve requested with no active deadlock");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "deadlock resolution failed");
                None
            }
        }
    }

    /// The force/resolve toggle: the one entry point a simple frontend
    /// button needs.
    ///
    /// # Errors
    ///
    /// Only the forcing half can fail; see [`Self::force_deadlock`].
    pub fn toggle_deadlock(&mut self) -> EngineResult<ToggleOutcome> {
        self.controller.toggle(&self.directory, &self.pool, &self.bus)
    }

    /// Whether a forced deadlock is currently installed.
    #[must_use]
    pub fn deadlock_active(&self) -> bool {
        self.controller.is_active()
    }

    /// Answers a pull-based status query over the whole simulation.
    #[must_use]
    pub fn snapshot(&self) -> SimulationSnapshot {
        let workers = self
            .directory
            .all()
            .iter()
            .map(|w| WorkerSnapshot {
                id: w.id(),
                name: w.name().to_string(),
                state: w.state(),
                progress: w.progress(),
                priority: w.priority(),
                remaining_secs: w.remaining_secs(),
                held: w.held_names(),
                desired: w.desired_names(),
            })
            .collect();
        let resources = self
            .pool
            .resources()
            .iter()
            .map(|r| ResourceSnapshot {
                name: r.name().to_string(),
                lock_state: r.lock_state(),
                holder: r.holder(),
                queued: r.queue_len(),
            })
            .collect();
        SimulationSnapshot {
            workers,
            resources,
            deadlock_active: self.controller.is_active(),
        }
    }

    /// Stops the current batch and waits for the worker threads to exit.
    /// Bounded by one tick interval per worker; safe to call repeatedly.
    pub fn shutdown(&mut self) {
        self.stop_workers();
    }

    fn stop_workers(&mut self) {
        for worker in self.directory.all() {
            worker.request_stop();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for SimulationSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Fallback seed when the configuration does not pin one.
fn clock_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    (nanos & u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn fixed_config(workers: u32, workload: f64) -> SimulationConfig {
        SimulationConfig {
            worker_count_min: workers,
            worker_count_max: workers,
            workload_secs_min: workload,
            workload_secs_max: workload,
            hold_secs_min: 0.05,
            hold_secs_max: 0.1,
            retry_secs_min: 0.01,
            retry_secs_max: 0.02,
            tick_millis: 5,
            seed: Some(1234),
        }
    }

    #[test]
    fn batch_respects_configured_bounds() {
        let mut supervisor = SimulationSupervisor::new(SimulationConfig {
            worker_count_min: 2,
            worker_count_max: 4,
            seed: Some(99),
            ..SimulationConfig::default()
        });
        let ids = supervisor.generate_batch();
        assert!((2..=4).contains(&ids.len()));

        let snapshot = supervisor.snapshot();
        assert_eq!(snapshot.workers.len(), ids.len());
        for worker in &snapshot.workers {
            assert!((10.0..=60.0).contains(&worker.priority));
            assert_eq!(worker.state, WorkerState::Running);
            assert!(worker.progress < 1.0);
        }
        assert_eq!(snapshot.resources.len(), 2);
        assert!(snapshot
            .resources
            .iter()
            .all(|r| r.lock_state == LockState::Unlocked && r.holder.is_none()));
        assert!(!snapshot.deadlock_active);
    }

    #[test]
    fn regenerating_discards_the_previous_batch() {
        let mut supervisor = SimulationSupervisor::new(fixed_config(3, 30.0));
        let first = supervisor.generate_batch();
        assert_eq!(first.len(), 3);
        supervisor.start_all();
        thread::sleep(Duration::from_millis(25));

        let second = supervisor.generate_batch();
        assert_eq!(second.len(), 3);
        let snapshot = supervisor.snapshot();
        assert_eq!(snapshot.workers.len(), 3);
        // The fresh batch has not started; the pool came back clean.
        assert!(snapshot.resources.iter().all(|r| r.holder.is_none()));
    }

    #[test]
    fn force_and_resolve_via_the_supervisor() {
        let mut supervisor = SimulationSupervisor::new(fixed_config(2, 20.0));
        supervisor.generate_batch();

        let (a, b) = supervisor.force_deadlock().unwrap();
        assert!(supervisor.deadlock_active());
        let snapshot = supervisor.snapshot();
        for id in [a, b] {
            let w = snapshot.workers.iter().find(|w| w.id == id).unwrap();
            assert_eq!(w.state, WorkerState::WaitingForResources);
            assert_eq!(w.held.len(), 1);
            assert_eq!(w.desired.len(), 1);
        }

        let resolution = supervisor.resolve_deadlock().unwrap();
        assert!(!supervisor.deadlock_active());
        let snapshot = supervisor.snapshot();
        let victim = snapshot
            .workers
            .iter()
            .find(|w| w.id == resolution.victim)
            .unwrap();
        let survivor = snapshot
            .workers
            .iter()
            .find(|w| w.id == resolution.survivor)
            .unwrap();
        assert_eq!(victim.state, WorkerState::Aborted);
        assert_eq!(survivor.state, WorkerState::Running);

        // Nothing forced anymore: a second resolve is a quiet no-op.
        assert!(supervisor.resolve_deadlock().is_none());
    }

    #[test]
    fn insufficient_workers_is_reported() {
        let mut supervisor = SimulationSupervisor::new(fixed_config(1, 20.0));
        supervisor.generate_batch();
        let err = supervisor.force_deadlock().unwrap_err();
        assert_eq!(err, EngineError::InsufficientWorkers { active: 1 });
    }

    #[test]
    fn shutdown_releases_everything() {
        let mut supervisor = SimulationSupervisor::new(fixed_config(3, 30.0));
        supervisor.generate_batch();
        supervisor.start_all();
        thread::sleep(Duration::from_millis(40));
        supervisor.shutdown();

        let snapshot = supervisor.snapshot();
        assert!(snapshot.resources.iter().all(|r| r.holder.is_none()));
    }
}
