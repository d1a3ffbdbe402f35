//! # GRIDLOCK Engine
//!
//! An educational simulation of concurrent workers contending for a small
//! set of shared, lockable resources: acquisition, waiting, and deadlock
//! formation/resolution, all observable from outside.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   SimulationSupervisor                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌────────────────┐  │
//! │  │ Worker 1..N  │   │ ResourcePool │   │   Deadlock     │  │
//! │  │ (one thread  │◀─▶│   "X"  "Y"   │◀─▶│   Controller   │  │
//! │  │  each, ticks)│   │ (FIFO queues)│   │ (force/resolve)│  │
//! │  └──────┬───────┘   └──────────────┘   └────────────────┘  │
//! │         │ status events                                     │
//! └─────────┼───────────────────────────────────────────────────┘
//!           ▼
//!   rendering/control collaborator (events + snapshots)
//! ```
//!
//! ## Design Principles
//!
//! 1. **Non-blocking acquisition** - a worker polls and queues, it never
//!    parks on a resource it does not hold
//! 2. **Explicit sharing** - the pool is passed to each worker at
//!    construction; holder back-references are plain ids resolved through
//!    the supervisor's directory, never cyclic owning pointers
//! 3. **Nothing here is fatal** - bad config falls back to defaults,
//!    deadlock-control misuse is a reported no-op
//! 4. **No rendering** - the engine emits events and answers snapshot
//!    queries; what a frontend does with them is not its business
//!
//! ## Example
//!
//! ```rust,ignore
//! use gridlock_engine::{SimulationConfig, SimulationSupervisor};
//!
//! let mut supervisor = SimulationSupervisor::new(SimulationConfig::default());
//! supervisor.generate_batch();
//! supervisor.start_all();
//! supervisor.toggle_deadlock()?;   // force
//! supervisor.toggle_deadlock()?;   // resolve
//! let snapshot = supervisor.snapshot();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod deadlock;
pub mod error;
pub mod events;
pub mod resource;
pub mod supervisor;
pub mod worker;

pub use config::{SimulationConfig, MAX_WORKERS, MIN_REMAINING_SECS};
pub use deadlock::{DeadlockController, Resolution, ToggleOutcome};
pub use error::{EngineError, EngineResult};
pub use events::{EventBus, EventReceiver, StatusEvent};
pub use resource::{LockState, Operation, ResourcePool, SharedResource, WaitEntry};
pub use supervisor::{
    ResourceSnapshot, SimulationSnapshot, SimulationSupervisor, WorkerSnapshot,
};
pub use worker::{Worker, WorkerDirectory, WorkerId, WorkerState};
