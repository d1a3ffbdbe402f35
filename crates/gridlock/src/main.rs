//! # GRIDLOCK Console Frontend
//!
//! The rendering/control collaborator: drives a scripted demonstration of
//! the engine (generate, start, force a deadlock, resolve it) and renders
//! status events and snapshots as text.
//!
//! Usage:
//!
//! ```text
//! gridlock [config.toml]
//! ```
//!
//! Without an argument the default configuration applies: 1-5 workers with
//! 10-60 second workloads contending for resources X and Y.

use std::env;
use std::fs;
use std::thread;
use std::time::Duration;

use gridlock_engine::{
    EventReceiver, SimulationConfig, SimulationSnapshot, SimulationSupervisor, ToggleOutcome,
};

fn main() {
    let config = load_config();
    let mut supervisor = SimulationSupervisor::new(config);
    let events = supervisor.events();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║  GRIDLOCK - shared-resource contention & deadlock simulator  ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let ids = supervisor.generate_batch();
    println!("Generated {} workers:", ids.len());
    for worker in &supervisor.snapshot().workers {
        println!("  {:<10} workload {:>5.1}s", worker.name, worker.priority);
    }
    println!();

    supervisor.start_all();
    println!("▶ workers running, contending for X and Y");
    observe(&supervisor, &events, Duration::from_secs(4));

    println!();
    println!("▶ forcing a deadlock");
    match supervisor.toggle_deadlock() {
        Ok(ToggleOutcome::Forced(a, b)) => {
            println!("  circular wait installed between worker-{a} and worker-{b}");
        }
        Ok(ToggleOutcome::Resolved(_)) => {}
        Err(e) => println!("  cannot force: {e}"),
    }
    observe(&supervisor, &events, Duration::from_secs(3));

    println!();
    println!("▶ resolving by priority (larger workload survives)");
    match supervisor.toggle_deadlock() {
        Ok(ToggleOutcome::Resolved(resolution)) => {
            println!(
                "  worker-{} aborted, worker-{} resumed",
                resolution.victim, resolution.survivor
            );
        }
        Ok(ToggleOutcome::Forced(..)) => {}
        Err(e) => println!("  cannot resolve: {e}"),
    }
    observe(&supervisor, &events, Duration::from_secs(3));

    supervisor.shutdown();
    println!();
    println!("Final state:");
    render(&supervisor.snapshot());
}

/// Loads the configuration from an optional TOML path argument, falling
/// back to the defaults on any problem. A broken config file is worth a
/// message, never a crash.
fn load_config() -> SimulationConfig {
    let Some(path) = env::args().nth(1) else {
        return SimulationConfig::default();
    };
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("cannot read {path}: {e}; using defaults");
            return SimulationConfig::default();
        }
    };
    SimulationConfig::from_toml_str(&text).unwrap_or_else(|e| {
        eprintln!("{path}: {e}; using defaults");
        SimulationConfig::default()
    })
}

/// Watches the simulation for `total`, draining events and rendering a
/// snapshot every half second.
fn observe(supervisor: &SimulationSupervisor, events: &EventReceiver, total: Duration) {
    let interval = Duration::from_millis(500);
    let rounds = (total.as_millis() / interval.as_millis()).max(1);
    for _ in 0..rounds {
        thread::sleep(interval);
        for event in events.try_iter() {
            println!("  [{:<8}] {}", event.state.label(), event.text);
        }
        render(&supervisor.snapshot());
    }
}

/// Renders one snapshot as a compact table.
fn render(snapshot: &SimulationSnapshot) {
    println!("  ┌──────────────────────────────────────────────────────────┐");
    for worker in &snapshot.workers {
        println!(
            "  │ {:<10} {:<8} {:>5.1}%  held[{:<4}] wants[{:<4}]        │",
            worker.name,
            worker.state.label(),
            worker.progress,
            worker.held.join(","),
            worker.desired.join(","),
        );
    }
    for resource in &snapshot.resources {
        let holder = resource
            .holder
            .map_or_else(|| "-".to_string(), |id| format!("worker-{id}"));
        println!(
            "  │ resource {:<2} {:<12?} holder {:<10} queued {}          │",
            resource.name, resource.lock_state, holder, resource.queued,
        );
    }
    if snapshot.deadlock_active {
        println!("  │ ⚠ DEADLOCK ACTIVE                                        │");
    }
    println!("  └──────────────────────────────────────────────────────────┘");
}
