//! # Simulation Configuration
//!
//! Inbound configuration for a simulation batch: how many workers to
//! generate, how long their workloads run, how long acquired resources are
//! held, and how often acquisition is retried.
//!
//! All values are loaded once per batch. Invalid values are never fatal:
//! each bad field falls back to its default with a warning, mirroring how
//! the rest of the engine treats every error as locally recoverable.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{EngineError, EngineResult};

/// Hard ceiling on the worker count, whatever the config asks for.
pub const MAX_WORKERS: u32 = 16;

/// Floor for a survivor's recomputed remaining runtime, in seconds.
///
/// Keeps a resumed worker from finishing instantly (or never, with a
/// negative remainder) when the deadlock sat for longer than its workload.
pub const MIN_REMAINING_SECS: f64 = 1.0;

/// Configuration for one simulation batch.
///
/// Every field has a default matching the classroom setup this engine
/// simulates: 1-5 workers, 10-60 second workloads, two shared resources.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Minimum number of workers per batch (inclusive).
    pub worker_count_min: u32,
    /// Maximum number of workers per batch (inclusive).
    pub worker_count_max: u32,
    /// Minimum configured workload duration, seconds.
    pub workload_secs_min: f64,
    /// Maximum configured workload duration, seconds.
    pub workload_secs_max: f64,
    /// Minimum drawn hold duration for an acquired resource, seconds.
    pub hold_secs_min: f64,
    /// Maximum drawn hold duration for an acquired resource, seconds.
    pub hold_secs_max: f64,
    /// Minimum acquisition retry interval, seconds.
    pub retry_secs_min: f64,
    /// Maximum acquisition retry interval, seconds.
    pub retry_secs_max: f64,
    /// Worker scheduling tick, milliseconds. Sub-second by design.
    pub tick_millis: u64,
    /// Optional RNG seed. `None` seeds from the system clock.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            worker_count_min: 1,
            worker_count_max: 5,
            workload_secs_min: 10.0,
            workload_secs_max: 60.0,
            hold_secs_min: 2.0,
            hold_secs_max: 6.0,
            retry_secs_min: 0.5,
            retry_secs_max: 2.0,
            tick_millis: 100,
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Parses a configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfiguration`] when the document does
    /// not parse. Callers are expected to recover with
    /// [`SimulationConfig::default`]; a broken config file never kills a
    /// simulation run.
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let parsed: Self = toml::from_str(text)
            .map_err(|e| EngineError::InvalidConfiguration(e.to_string()))?;
        Ok(parsed.validated())
    }

    /// Returns a copy with every invalid field replaced by its default.
    ///
    /// Each replacement is logged with `warn!`; none is fatal.
    #[must_use]
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();

        if self.worker_count_min == 0
            || self.worker_count_max < self.worker_count_min
            || self.worker_count_max > MAX_WORKERS
        {
            tracing::warn!(
                min = self.worker_count_min,
                max = self.worker_count_max,
                "invalid worker count bounds, using defaults"
            );
            self.worker_count_min = defaults.worker_count_min;
            self.worker_count_max = defaults.worker_count_max;
        }

        if !valid_range(self.workload_secs_min, self.workload_secs_max) {
            tracing::warn!(
                min = self.workload_secs_min,
                max = self.workload_secs_max,
                "invalid workload duration range, using defaults"
            );
            self.workload_secs_min = defaults.workload_secs_min;
            self.workload_secs_max = defaults.workload_secs_max;
        }

        if !valid_range(self.hold_secs_min, self.hold_secs_max) {
            tracing::warn!(
                min = self.hold_secs_min,
                max = self.hold_secs_max,
                "invalid hold duration range, using defaults"
            );
            self.hold_secs_min = defaults.hold_secs_min;
            self.hold_secs_max = defaults.hold_secs_max;
        }

        if !valid_range(self.retry_secs_min, self.retry_secs_max) {
            tracing::warn!(
                min = self.retry_secs_min,
                max = self.retry_secs_max,
                "invalid retry interval range, using defaults"
            );
            self.retry_secs_min = defaults.retry_secs_min;
            self.retry_secs_max = defaults.retry_secs_max;
        }

        if self.tick_millis == 0 {
            tracing::warn!("zero tick interval, using default");
            self.tick_millis = defaults.tick_millis;
        }

        self
    }

    /// The worker scheduling tick as a [`Duration`].
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

/// A duration range is usable when both ends are finite, positive and
/// correctly ordered.
fn valid_range(min: f64, max: f64) -> bool {
    min.is_finite() && max.is_finite() && min > 0.0 && max >= min
}
