//! Integration tests for the full engine: racing workers, forced deadlock
//! and priority-based resolution, driven through the supervisor boundary
//! only.

use std::thread;
use std::time::Duration;

use gridlock_engine::{
    LockState, SimulationConfig, SimulationSupervisor, ToggleOutcome, WorkerState,
};

fn fast_config(workers: u32, workload: f64) -> SimulationConfig {
    SimulationConfig {
        worker_count_min: workers,
        worker_count_max: workers,
        workload_secs_min: workload,
        workload_secs_max: workload,
        hold_secs_min: 0.05,
        hold_secs_max: 0.1,
        retry_secs_min: 0.01,
        retry_secs_max: 0.03,
        tick_millis: 5,
        seed: Some(0xD1CE),
    }
}

#[test]
fn force_then_resolve_keeps_the_larger_workload() {
    let mut supervisor = SimulationSupervisor::new(fast_config(2, 20.0));
    supervisor.generate_batch();
    supervisor.start_all();
    thread::sleep(Duration::from_millis(30));

    let forced = supervisor.toggle_deadlock().unwrap();
    let (a, b) = match forced {
        ToggleOutcome::Forced(a, b) => (a, b),
        ToggleOutcome::Resolved(_) => panic!("first toggle must force"),
    };

    // The canonical picture: one holds X wants Y, the other holds Y wants
    // X, both waiting.
    let snapshot = supervisor.snapshot();
    assert!(snapshot.deadlock_active);
    let wa = snapshot.workers.iter().find(|w| w.id == a).unwrap();
    let wb = snapshot.workers.iter().find(|w| w.id == b).unwrap();
    assert_eq!(wa.state, WorkerState::WaitingForResources);
    assert_eq!(wb.state, WorkerState::WaitingForResources);
    assert_eq!(wa.held, vec!["X".to_string()]);
    assert_eq!(wa.desired, vec!["Y".to_string()]);
    assert_eq!(wb.held, vec!["Y".to_string()]);
    assert_eq!(wb.desired, vec!["X".to_string()]);

    // Let the pair sit deadlocked across plenty of ticks: neither may
    // release, finish, or move.
    thread::sleep(Duration::from_millis(100));
    let snapshot = supervisor.snapshot();
    let wa = snapshot.workers.iter().find(|w| w.id == a).unwrap();
    let wb = snapshot.workers.iter().find(|w| w.id == b).unwrap();
    assert_eq!(wa.state, WorkerState::WaitingForResources);
    assert_eq!(wb.state, WorkerState::WaitingForResources);

    let resolved = supervisor.toggle_deadlock().unwrap();
    let resolution = match resolved {
        ToggleOutcome::Resolved(r) => r,
        ToggleOutcome::Forced(..) => panic!("second toggle must resolve"),
    };
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
    assert_eq!(victim.progress, 100.0);
    assert!(victim.held.is_empty());

    // Hardly anything elapsed before the pause, so the survivor gets its
    // whole workload back.
    assert!(
        (survivor.remaining_secs - 20.0).abs() < 1.5,
        "survivor remaining was {}",
        survivor.remaining_secs
    );

    supervisor.shutdown();
}

#[test]
fn three_workers_racing_never_share_a_resource() {
    let mut supervisor = SimulationSupervisor::new(fast_config(3, 30.0));
    supervisor.generate_batch();
    supervisor.start_all();

    for _ in 0..20 {
        thread::sleep(Duration::from_millis(20));
        let snapshot = supervisor.snapshot();
        for resource in &snapshot.resources {
            let holders = snapshot
                .workers
                .iter()
                .filter(|w| w.held.contains(&resource.name))
                .count();
            assert!(
                holders <= 1,
                "resource {} claimed by {} workers",
                resource.name,
                holders
            );
            // Holder recorded iff locked, at every observed instant.
            assert_eq!(resource.holder.is_some(), resource.lock_state != LockState::Unlocked);
        }
    }

    supervisor.shutdown();
}

#[test]
fn workers_make_progress_and_report_events() {
    let mut supervisor = SimulationSupervisor::new(fast_config(2, 30.0));
    let events = supervisor.events();
    supervisor.generate_batch();
    supervisor.start_all();
    thread::sleep(Duration::from_millis(150));
    supervisor.shutdown();

    let snapshot = supervisor.snapshot();
    assert!(snapshot.workers.iter().any(|w| w.progress > 0.0));

    let drained: Vec<_> = events.try_iter().collect();
    assert!(!drained.is_empty());
    assert!(drained.iter().any(|e| e.text.contains("started")));
}

#[test]
fn tiny_workloads_run_to_completion() {
    // One worker: two or more can legitimately stall each other in a
    // natural hold-and-wait standoff, which only the controller resolves.
    let mut supervisor = SimulationSupervisor::new(SimulationConfig {
        workload_secs_min: 0.1,
        workload_secs_max: 0.15,
        ..fast_config(1, 0.0)
    });
    supervisor.generate_batch();
    supervisor.start_all();

    // Generous budget: workloads are ~0.1s plus pause time spent holding.
    let mut all_done = false;
    for _ in 0..100 {
        thread::sleep(Duration::from_millis(20));
        let snapshot = supervisor.snapshot();
        if snapshot
            .workers
            .iter()
            .all(|w| w.state == WorkerState::Finished)
        {
            all_done = true;
            break;
        }
    }
    assert!(all_done, "workers never finished");

    let snapshot = supervisor.snapshot();
    assert!(snapshot.workers.iter().all(|w| w.progress == 100.0));
    assert!(snapshot.resources.iter().all(|r| r.holder.is_none()));

    supervisor.shutdown();
}
