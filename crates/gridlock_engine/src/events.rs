//! # Outbound Status Events
//!
//! Everything the rendering collaborator learns about the simulation flows
//! through here: a status event on every meaningful state change, carried
//! over a crossbeam channel.
//!
//! The engine never blocks on the collaborator. Emission is fire-and-forget
//! and tolerates a dropped receiver, so a frontend that stops draining (or
//! never existed, as in most tests) costs the workers nothing.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::worker::{WorkerId, WorkerState};

/// Receiver half of the status stream, handed to the collaborator.
pub type EventReceiver = Receiver<StatusEvent>;

/// A status change reported by a worker or the deadlock controller.
#[derive(Clone, Debug)]
pub struct StatusEvent {
    /// The worker this event is about.
    pub worker: WorkerId,
    /// Lifecycle state after the change.
    pub state: WorkerState,
    /// Workload completion percentage, 0-100.
    pub progress: f64,
    /// Names of resources currently held.
    pub held: Vec<String>,
    /// Names of resources desired but not yet obtained.
    pub desired: Vec<String>,
    /// Human-readable status text for direct display.
    pub text: String,
}

/// Sender half of the status stream, cloned into every worker.
#[derive(Clone)]
pub struct EventBus {
    tx: Sender<StatusEvent>,
}

impl EventBus {
    /// Creates a bus and the receiver the collaborator drains.
    #[must_use]
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    /// Emits an event. Never blocks; a disconnected receiver is ignored.
    pub fn emit(&self, event: StatusEvent) {
        let _ = self.tx.send(event);
    }
}
