//! # Workers
//!
//! A [`Worker`] is an independently scheduled unit of simulated work: it
//! progresses toward a configured workload deadline while opportunistically
//! acquiring, holding and releasing shared resources on a randomized
//! cadence.
//!
//! ## State Machine
//!
//! ```text
//!             ┌────────────────────────────────────┐
//!             ▼                                    │
//!        ┌─────────┐   attempt leaves        ┌──────────┐
//!        │ Running │──────desired────────────│ Waiting  │
//!        └────┬────┘      outstanding        └────┬─────┘
//!             │                                   │ last grant
//!             │ all targets granted               ▼
//!             │                              ┌──────────┐
//!             └─────────────────────────────▶│ Holding  │
//!                    holds expire, back to   └──────────┘
//!                    Running
//!
//!        elapsed ≥ total ───────▶ Finished   (terminal)
//!        external abort  ───────▶ Aborted    (terminal, any state)
//! ```
//!
//! Time spent in Waiting/Holding is "paused": it does not count toward
//! workload completion. The elapsed clock only advances while Running.
//!
//! ## Locking Discipline
//!
//! Each worker's mutable state lives behind one mutex (`WorkerCore`). A
//! tick never touches a resource mutex or another worker's core while its
//! own core is locked: it plans under the lock, performs resource calls
//! unlocked, then re-locks to apply. This keeps the lock graph acyclic
//! between worker ticks, queue hand-offs and controller mutations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::{SimulationConfig, MIN_REMAINING_SECS};
use crate::events::{EventBus, StatusEvent};
use crate::resource::{Operation, ResourcePool, SharedResource};

/// Stable worker identifier within a batch.
pub type WorkerId = u32;

/// How many resources a worker tries to collect per acquisition round.
const DESIRED_SET_SIZE: usize = 2;

/// Lifecycle state of a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Making workload progress, no outstanding resource targets.
    Running,
    /// At least one desired resource is still held by someone else.
    WaitingForResources,
    /// Holding everything it asked for; workload progress is paused.
    HoldingResources,
    /// Forcibly terminated by deadlock resolution. Terminal.
    Aborted,
    /// Workload completed. Terminal.
    Finished,
}

impl WorkerState {
    /// True for the two one-way terminal states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Aborted | Self::Finished)
    }

    /// Display label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::WaitingForResources => "waiting",
            Self::HoldingResources => "holding",
            Self::Aborted => "aborted",
            Self::Finished => "finished",
        }
    }
}

/// Timing windows a worker draws from, copied out of the batch config.
#[derive(Clone, Copy, Debug)]
pub(crate) struct WorkerTiming {
    hold_secs: (f64, f64),
    retry_secs: (f64, f64),
}

impl WorkerTiming {
    pub(crate) fn from_config(config: &SimulationConfig) -> Self {
        Self {
            hold_secs: (config.hold_secs_min, config.hold_secs_max),
            retry_secs: (config.retry_secs_min, config.retry_secs_max),
        }
    }

    fn draw_hold(&self, rng: &mut StdRng) -> Duration {
        Duration::from_secs_f64(rng.gen_range(self.hold_secs.0..=self.hold_secs.1))
    }

    fn draw_retry(&self, rng: &mut StdRng) -> Duration {
        Duration::from_secs_f64(rng.gen_range(self.retry_secs.0..=self.retry_secs.1))
    }
}

/// A resource currently owned by a worker.
struct HeldResource {
    resource: Arc<SharedResource>,
    acquired_at: Instant,
    hold_for: Duration,
}

/// All mutable per-worker state, behind the worker's mutex.
struct WorkerCore {
    state: WorkerState,
    /// Workload length in seconds. `INFINITY` for a forced-deadlock holder.
    total_secs: f64,
    started_at: Instant,
    paused: Duration,
    last_tick: Instant,
    next_attempt_at: Instant,
    held: Vec<HeldResource>,
    desired: Vec<Arc<SharedResource>>,
    rng: StdRng,
    last_reported_pct: i64,
}

impl WorkerCore {
    /// Workload-relevant elapsed time: wall time minus accumulated pause.
    fn elapsed_secs(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.started_at)
            .saturating_sub(self.paused)
            .as_secs_f64()
    }

    /// Completion percentage, 0-100. Terminal states read 100.
    fn progress_pct(&self, now: Instant) -> f64 {
        if self.state.is_terminal() {
            return 100.0;
        }
        if !self.total_secs.is_finite() || self.total_secs <= 0.0 {
            return 0.0;
        }
        (self.elapsed_secs(now) / self.total_secs * 100.0).clamp(0.0, 100.0)
    }

    fn holds(&self, name: &str) -> bool {
        self.held.iter().any(|h| h.resource.name() == name)
    }

    fn held_names(&self) -> Vec<String> {
        self.held.iter().map(|h| h.resource.name().to_string()).collect()
    }

    fn desired_names(&self) -> Vec<String> {
        self.desired.iter().map(|r| r.name().to_string()).collect()
    }
}

/// A resource acquisition planned under the core lock and executed outside
/// it.
struct PlannedAttempt {
    resource: Arc<SharedResource>,
    op: Operation,
    hold_for: Duration,
}

/// An independently scheduled simulated task.
///
/// Owned by the supervisor, shared by `Arc` with its own thread, the worker
/// directory and the deadlock controller.
pub struct Worker {
    id: WorkerId,
    name: String,
    /// The configured total runtime in seconds. Doubles as the deadlock
    /// resolution priority: the larger workload survives.
    priority: f64,
    alive: AtomicBool,
    timing: WorkerTiming,
    core: Mutex<WorkerCore>,
}

impl Worker {
    pub(crate) fn new(
        id: WorkerId,
        workload_secs: f64,
        timing: WorkerTiming,
        seed: u64,
    ) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            id,
            name: format!("worker-{id}"),
            priority: workload_secs,
            alive: AtomicBool::new(false),
            timing,
            core: Mutex::new(WorkerCore {
                state: WorkerState::Running,
                total_secs: workload_secs,
                started_at: now,
                paused: Duration::ZERO,
                last_tick: now,
                next_attempt_at: now,
                held: Vec::new(),
                desired: Vec::new(),
                rng: StdRng::seed_from_u64(seed),
                last_reported_pct: -1,
            }),
        })
    }

    /// Stable id within the batch.
    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Display name, "worker-N".
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured workload length in seconds; the deadlock-resolution
    /// priority.
    #[must_use]
    pub fn priority(&self) -> f64 {
        self.priority
    }

    /// Whether the worker's loop should keep scheduling itself.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.core.lock().state
    }

    /// Current completion percentage, 0-100.
    #[must_use]
    pub fn progress(&self) -> f64 {
        self.core.lock().progress_pct(Instant::now())
    }

    /// Remaining workload in seconds. Infinite for a forced-deadlock
    /// holder, zero once terminal.
    #[must_use]
    pub fn remaining_secs(&self) -> f64 {
        let core = self.core.lock();
        if core.state.is_terminal() {
            return 0.0;
        }
        (core.total_secs - core.elapsed_secs(Instant::now())).max(0.0)
    }

    /// Names of resources currently held.
    #[must_use]
    pub fn held_names(&self) -> Vec<String> {
        self.core.lock().held_names()
    }

    /// Names of resources desired but not yet obtained.
    #[must_use]
    pub fn desired_names(&self) -> Vec<String> {
        self.core.lock().desired_names()
    }

    /// Asks the worker loop to exit at the next tick boundary.
    pub(crate) fn request_stop(&self) {
        self.alive.store(false, Ordering::Relaxed);
    }

    /// Emits a status event reflecting the current state.
    pub(crate) fn announce(&self, bus: &EventBus, text: String) {
        let core = self.core.lock();
        bus.emit(self.status_event(&core, text));
    }

    fn status_event(&self, core: &WorkerCore, text: String) -> StatusEvent {
        StatusEvent {
            worker: self.id,
            state: core.state,
            progress: core.progress_pct(Instant::now()),
            held: core.held_names(),
            desired: core.desired_names(),
            text,
        }
    }

    /// Starts the worker's scheduling thread: tick, then a sub-second
    /// sleep, until a terminal state is reached or a stop is requested.
    /// The loop gives back anything still held on its way out.
    pub(crate) fn spawn(
        self: &Arc<Self>,
        pool: Arc<ResourcePool>,
        directory: Arc<WorkerDirectory>,
        bus: EventBus,
        tick: Duration,
    ) -> JoinHandle<()> {
        self.alive.store(true, Ordering::Relaxed);
        {
            let mut core = self.core.lock();
            let now = Instant::now();
            core.started_at = now;
            core.last_tick = now;
            core.next_attempt_at = now + self.timing.draw_retry(&mut core.rng);
        }
        self.announce(&bus, format!("{} started ({:.1}s workload)", self.name, self.priority));
        tracing::info!(worker = self.id, workload = self.priority, "worker started");

        let worker = Arc::clone(self);
        thread::spawn(move || {
            while worker.is_alive() && !worker.state().is_terminal() {
                worker.tick(&pool, &directory, &bus);
                thread::sleep(tick);
            }
            let leftovers: Vec<Arc<SharedResource>> = {
                let mut core = worker.core.lock();
                core.held.drain(..).map(|h| h.resource).collect()
            };
            for resource in &leftovers {
                release_owned(worker.id, resource, &directory, &bus);
            }
            tracing::debug!(worker = worker.id, "worker loop exited");
        })
    }

    /// One scheduling tick: pause accounting, completion check, expired
    /// hold releases, and (on the retry cadence) an acquisition attempt.
    ///
    /// Both the completion check and the expiry releases are suppressed
    /// while the desired set is non-empty. A waiting worker owns its
    /// situation outright or it is part of a forced deadlock; either way
    /// its state must not be torn down underneath the controller.
    pub(crate) fn tick(&self, pool: &ResourcePool, directory: &WorkerDirectory, bus: &EventBus) {
        let now = Instant::now();
        let mut to_release: Vec<Arc<SharedResource>> = Vec::new();
        let mut attempts: Vec<PlannedAttempt> = Vec::new();
        let mut attempted = false;
        let mut finished = false;

        // Phase 1: plan under the core lock. No resource mutex is taken
        // here except the brief lock-state reads while sampling.
        {
            let mut core = self.core.lock();
            if core.state.is_terminal() {
                return;
            }

            let dt = now.saturating_duration_since(core.last_tick);
            core.last_tick = now;
            if matches!(
                core.state,
                WorkerState::WaitingForResources | WorkerState::HoldingResources
            ) {
                core.paused += dt;
            }

            let elapsed = core.elapsed_secs(now);

            if core.desired.is_empty() && elapsed >= core.total_secs {
                core.state = WorkerState::Finished;
                core.last_reported_pct = 100;
                to_release = core.held.drain(..).map(|h| h.resource).collect();
                bus.emit(self.status_event(&core, format!("{} finished", self.name)));
                tracing::info!(worker = self.id, "finished");
                finished = true;
            } else {
                if core.desired.is_empty() {
                    let mut kept = Vec::with_capacity(core.held.len());
                    for h in core.held.drain(..) {
                        if now.saturating_duration_since(h.acquired_at) >= h.hold_for {
                            to_release.push(h.resource);
                        } else {
                            kept.push(h);
                        }
                    }
                    core.held = kept;
                    if !to_release.is_empty() {
                        let names: Vec<String> =
                            to_release.iter().map(|r| r.name().to_string()).collect();
                        if core.held.is_empty() && core.state == WorkerState::HoldingResources {
                            core.state = WorkerState::Running;
                            core.next_attempt_at = now + self.timing.draw_retry(&mut core.rng);
                        }
                        bus.emit(self.status_event(
                            &core,
                            format!("{} released {}", self.name, names.join(", ")),
                        ));
                    }
                }

                if now >= core.next_attempt_at {
                    attempted = true;
                    if core.desired.is_empty() {
                        let mut free: Vec<Arc<SharedResource>> = pool
                            .resources()
                            .iter()
                            .filter(|r| r.is_unlocked() && !core.holds(r.name()))
                            .cloned()
                            .collect();
                        free.shuffle(&mut core.rng);
                        free.truncate(DESIRED_SET_SIZE);
                        core.desired = free;
                    }
                    let mut order = core.desired.clone();
                    order.shuffle(&mut core.rng);
                    for resource in order {
                        let op = if core.rng.gen_bool(0.5) {
                            Operation::Read
                        } else {
                            Operation::Write
                        };
                        let hold_for = self.timing.draw_hold(&mut core.rng);
                        attempts.push(PlannedAttempt { resource, op, hold_for });
                    }
                    core.next_attempt_at = now + self.timing.draw_retry(&mut core.rng);
                }

                // Throttled progress report: one event per whole percent.
                let pct = core.progress_pct(now);
                let rounded = pct.floor() as i64;
                if core.state == WorkerState::Running && rounded != core.last_reported_pct {
                    core.last_reported_pct = rounded;
                    bus.emit(self.status_event(
                        &core,
                        format!("{} at {pct:.1}% ({:.1}s workload)", self.name, self.priority),
                    ));
                }
            }
        }

        // Phase 2: resource calls with no core lock held.
        for resource in &to_release {
            release_owned(self.id, resource, directory, bus);
        }
        if finished {
            self.alive.store(false, Ordering::Relaxed);
            return;
        }

        let mut granted: Vec<PlannedAttempt> = Vec::new();
        for attempt in attempts {
            if attempt.resource.acquire(self.id, attempt.op) {
                granted.push(attempt);
            }
        }

        // Phase 3: apply grants, then pick the visible state.
        let mut stale: Vec<Arc<SharedResource>> = Vec::new();
        {
            let mut core = self.core.lock();
            if core.state.is_terminal() {
                // An abort landed mid-tick. Give everything straight back.
                stale = granted.into_iter().map(|g| g.resource).collect();
            } else {
                for grant in granted {
                    // The controller may have force-acquired this resource
                    // between phases; a grant we no longer hold is not ours
                    // to record.
                    if grant.resource.holder() != Some(self.id) {
                        continue;
                    }
                    let name = grant.resource.name().to_string();
                    core.desired.retain(|r| r.name() != name);
                    if !core.holds(&name) {
                        core.held.push(HeldResource {
                            resource: grant.resource,
                            acquired_at: Instant::now(),
                            hold_for: grant.hold_for,
                        });
                        bus.emit(self.status_event(
                            &core,
                            format!(
                                "{} acquired {} ({}) for {:.1}s",
                                self.name,
                                name,
                                grant.op.label(),
                                grant.hold_for.as_secs_f64()
                            ),
                        ));
                    }
                }
                if attempted {
                    let next = if core.desired.is_empty() {
                        if core.held.is_empty() {
                            WorkerState::Running
                        } else {
                            WorkerState::HoldingResources
                        }
                    } else {
                        WorkerState::WaitingForResources
                    };
                    if next != core.state {
                        core.state = next;
                        bus.emit(self.status_event(
                            &core,
                            format!("{} is {}", self.name, next.label()),
                        ));
                    }
                }
            }
        }
        for resource in &stale {
            release_owned(self.id, resource, directory, bus);
        }
    }

    /// Accepts a queue hand-off: the resource already records this worker
    /// as holder; move it from desired to held. Returns `false` to decline
    /// (terminal, stopped, or no longer desired), in which case the caller
    /// releases again and the next queued waiter gets a turn.
    pub(crate) fn grant_from_queue(
        &self,
        resource: &Arc<SharedResource>,
        op: Operation,
        bus: &EventBus,
    ) -> bool {
        let mut core = self.core.lock();
        if core.state.is_terminal() || !self.is_alive() {
            return false;
        }
        if !core.desired.iter().any(|r| r.name() == resource.name()) {
            return false;
        }
        core.desired.retain(|r| r.name() != resource.name());
        let hold_for = self.timing.draw_hold(&mut core.rng);
        core.held.push(HeldResource {
            resource: Arc::clone(resource),
            acquired_at: Instant::now(),
            hold_for,
        });
        if core.desired.is_empty() && core.state == WorkerState::WaitingForResources {
            core.state = WorkerState::HoldingResources;
        }
        bus.emit(self.status_event(
            &core,
            format!(
                "{} granted {} ({}) from the wait queue",
                self.name,
                resource.name(),
                op.label()
            ),
        ));
        true
    }

    /// Forced termination, used only by deadlock resolution. Releases all
    /// held resources (handing them to queued waiters), clears the desired
    /// set, forces progress to 100% and stops the scheduling loop for
    /// good.
    pub(crate) fn abort(&self, directory: &WorkerDirectory, bus: &EventBus) {
        let released: Vec<Arc<SharedResource>> = {
            let mut core = self.core.lock();
            if core.state.is_terminal() {
                return;
            }
            core.state = WorkerState::Aborted;
            core.desired.clear();
            core.last_reported_pct = 100;
            let released = core.held.drain(..).map(|h| h.resource).collect();
            bus.emit(self.status_event(
                &core,
                format!("{} aborted (deadlock victim)", self.name),
            ));
            released
        };
        self.alive.store(false, Ordering::Relaxed);
        for resource in &released {
            release_owned(self.id, resource, directory, bus);
        }
        tracing::info!(worker = self.id, "aborted as deadlock victim");
    }

    /// The survivor path out of a resolved deadlock: remaining runtime is
    /// recomputed as the configured workload minus what already elapsed
    /// (floored at [`MIN_REMAINING_SECS`]), the clock restarts offset by
    /// the elapsed amount, and the worker re-enters Running.
    pub(crate) fn resume_after_deadlock(&self, bus: &EventBus) {
        let mut core = self.core.lock();
        if core.state.is_terminal() {
            return;
        }
        let now = Instant::now();
        let elapsed = core.elapsed_secs(now);
        let remaining = (self.priority - elapsed).max(MIN_REMAINING_SECS);
        core.total_secs = self.priority.max(remaining);
        let carried = (core.total_secs - remaining).max(0.0);
        core.started_at = now
            .checked_sub(Duration::from_secs_f64(carried))
            .unwrap_or(now);
        core.paused = Duration::ZERO;
        core.last_tick = now;
        core.state = WorkerState::Running;
        core.next_attempt_at = now + self.timing.draw_retry(&mut core.rng);
        bus.emit(self.status_event(
            &core,
            format!("{} resumed, {remaining:.1}s remaining", self.name),
        ));
        tracing::info!(worker = self.id, remaining, "survivor resumed");
    }

    /// Installs one half of a forced deadlock: this worker now holds
    /// `hold`, desires `want`, never finishes on its own, and sits in
    /// `WaitingForResources`. The controller has already force-acquired
    /// `hold` on the worker's behalf.
    pub(crate) fn install_forced_wait(
        &self,
        hold: &Arc<SharedResource>,
        want: &Arc<SharedResource>,
        bus: &EventBus,
    ) {
        let mut core = self.core.lock();
        core.total_secs = f64::INFINITY;
        core.held.clear();
        core.desired.clear();
        let hold_for = self.timing.draw_hold(&mut core.rng);
        core.held.push(HeldResource {
            resource: Arc::clone(hold),
            acquired_at: Instant::now(),
            hold_for,
        });
        core.desired.push(Arc::clone(want));
        core.state = WorkerState::WaitingForResources;
        bus.emit(self.status_event(
            &core,
            format!(
                "{} holds {} and waits for {}",
                self.name,
                hold.name(),
                want.name()
            ),
        ));
    }

    /// The full-reset step before a deadlock is forced: drop all resource
    /// assignments and return to Running. Resource-side state is cleared
    /// separately by the pool reset, so no hand-off happens here.
    pub(crate) fn clear_assignments(&self) {
        let mut core = self.core.lock();
        if core.state.is_terminal() {
            return;
        }
        core.held.clear();
        core.desired.clear();
        if core.state != WorkerState::Running {
            core.state = WorkerState::Running;
            let now = Instant::now();
            core.next_attempt_at = now + self.timing.draw_retry(&mut core.rng);
        }
    }
}

/// The supervisor's authoritative id-to-worker map.
///
/// Resources refer to their holders by [`WorkerId`]; this directory is
/// where those references get resolved, so nothing holds a cyclic
/// ownership pointer.
pub struct WorkerDirectory {
    workers: RwLock<HashMap<WorkerId, Arc<Worker>>>,
}

impl WorkerDirectory {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            workers: RwLock::new(HashMap::new()),
        })
    }

    pub(crate) fn insert(&self, worker: Arc<Worker>) {
        self.workers.write().insert(worker.id(), worker);
    }

    pub(crate) fn get(&self, id: WorkerId) -> Option<Arc<Worker>> {
        self.workers.read().get(&id).cloned()
    }

    /// All workers, ordered by id for stable snapshots.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Worker>> {
        let mut workers: Vec<Arc<Worker>> = self.workers.read().values().cloned().collect();
        workers.sort_by_key(|w| w.id());
        workers
    }

    pub(crate) fn clear(&self) {
        self.workers.write().clear();
    }
}

/// Releases a resource and walks its wait queue until somebody accepts the
/// hand-off (or the queue drains). Callers must not hold any worker core
/// lock.
pub(crate) fn release_with_handoff(
    resource: &Arc<SharedResource>,
    directory: &WorkerDirectory,
    bus: &EventBus,
) {
    let mut next = resource.release();
    while let Some(entry) = next {
        let accepted = directory
            .get(entry.worker)
            .is_some_and(|w| w.grant_from_queue(resource, entry.operation, bus));
        if accepted {
            break;
        }
        next = resource.release();
    }
}

/// Releases only if `owner` is still the recorded holder. The controller
/// can reassign a resource out from under a mid-tick worker; a stale claim
/// must not knock the new holder off.
fn release_owned(
    owner: WorkerId,
    resource: &Arc<SharedResource>,
    directory: &WorkerDirectory,
    bus: &EventBus,
) {
    if resource.holder() != Some(owner) {
        return;
    }
    release_with_handoff(resource, directory, bus);
}
