//! Per-core performance bookkeeping.
//!
//! One coarse lock guards every record plus the active-worker count, so a
//! snapshot never observes a record with its count bumped but its time not yet
//! accumulated. Updates happen once per request, far below lock contention.

use std::{
  sync::{Mutex, MutexGuard, PoisonError},
  time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Running totals for one core index.
#[derive(Debug, Clone, PartialEq)]
pub struct CorePerformance {
  pub core_id: usize,
  pub total_processed: u64,
  pub total_processing_time: Duration,
  pub last_update: DateTime<Utc>,
}

impl CorePerformance {
  fn new(core_id: usize) -> Self {
    Self {
      core_id,
      total_processed: 0,
      total_processing_time: Duration::ZERO,
      last_update: Utc::now(),
    }
  }

  pub fn average_processing_time_ms(&self) -> f64 {
    if self.total_processed == 0 {
      return 0.0;
    }
    self.total_processing_time.as_secs_f64() * 1000.0 / self.total_processed as f64
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreMetrics {
  pub core_id: usize,
  pub total_processed: u64,
  /// Mean milliseconds per request on this core
  pub average_processing_time: f64,
  pub last_update: DateTime<Utc>,
}

/// Consistent view of the ledger plus queue depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
  pub queue_length: usize,
  pub active_workers: usize,
  pub cores: Vec<CoreMetrics>,
  pub total_processed: u64,
}

#[derive(Debug)]
struct LedgerState {
  cores: Vec<CorePerformance>,
  active_workers: usize,
}

#[derive(Debug)]
pub struct PerformanceLedger {
  state: Mutex<LedgerState>,
}

impl PerformanceLedger {
  /// Create one zeroed record per core index in `[0, core_count)`.
  pub fn new(core_count: usize) -> Self {
    Self {
      state: Mutex::new(LedgerState {
        cores: (0..core_count).map(CorePerformance::new).collect(),
        active_workers: 0,
      }),
    }
  }

  // Every critical section is plain arithmetic, so a poisoned lock still
  // holds coherent data.
  fn lock(&self) -> MutexGuard<'_, LedgerState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Count one finished request against `core_id`.
  pub fn record(&self, core_id: usize, elapsed: Duration) {
    let mut state = self.lock();
    let Some(core) = state.cores.get_mut(core_id) else {
      warn!(core_id, "No ledger record for core");
      return;
    };
    core.total_processed += 1;
    core.total_processing_time += elapsed;
    core.last_update = Utc::now();
  }

  pub fn worker_started(&self) {
    self.lock().active_workers += 1;
  }

  pub fn worker_stopped(&self) {
    let mut state = self.lock();
    state.active_workers = state.active_workers.saturating_sub(1);
  }

  /// Copy of one record
  pub fn core(&self, core_id: usize) -> Option<CorePerformance> {
    self.lock().cores.get(core_id).cloned()
  }

  /// Consistent view of every record. `queue_depth` is sampled while the
  /// ledger is locked, so no request is counted both as queued and processed.
  pub fn snapshot(&self, queue_depth: impl FnOnce() -> usize) -> MetricsSnapshot {
    let state = self.lock();
    let queue_length = queue_depth();
    let cores: Vec<CoreMetrics> = state
      .cores
      .iter()
      .map(|core| CoreMetrics {
        core_id: core.core_id,
        total_processed: core.total_processed,
        average_processing_time: core.average_processing_time_ms(),
        last_update: core.last_update,
      })
      .collect();

    MetricsSnapshot {
      queue_length,
      active_workers: state.active_workers,
      total_processed: cores.iter().map(|c| c.total_processed).sum(),
      cores,
    }
  }
}
