//! Operation processor - maps a decoded request to a result value.
//!
//! The set of operations is closed and fixed at compile time. Fan-out work
//! runs on a rayon pool owned by the processor, never on pool workers, so a
//! worker blocked in `process_data` cannot starve the pool of its own slots.

use std::{sync::Mutex, time::Duration};

use chrono::Utc;
use rayon::prelude::*;
use serde_json::{Value, json};
use tracing::trace;

use crate::{config::ProcessorConfig, protocol::Request};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessError {
  #[error("Result accumulator poisoned")]
  Poisoned,
  #[error("Operation panicked: {0}")]
  Panicked(String),
  #[error("Failed to build fan-out pool: {0}")]
  ThreadPool(String),
}

/// Known computation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
  Calculate,
  ProcessData,
  HeavyComputation,
}

impl Operation {
  pub const ALL: [Operation; 3] = [Operation::Calculate, Operation::ProcessData, Operation::HeavyComputation];

  pub fn name(self) -> &'static str {
    match self {
      Operation::Calculate => "calculate",
      Operation::ProcessData => "process_data",
      Operation::HeavyComputation => "heavy_computation",
    }
  }

  /// Case-insensitive lookup
  pub fn parse(name: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|op| op.name().eq_ignore_ascii_case(name))
  }
}

pub struct OperationProcessor {
  config: ProcessorConfig,
  parallelism: usize,
  pool: rayon::ThreadPool,
}

impl std::fmt::Debug for OperationProcessor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("OperationProcessor")
      .field("config", &self.config)
      .field("parallelism", &self.parallelism)
      .finish_non_exhaustive()
  }
}

impl OperationProcessor {
  pub fn new(config: ProcessorConfig) -> Result<Self, ProcessError> {
    let parallelism = config.parallelism().max(1);
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(parallelism)
      .thread_name(|i| format!("fanout-{i}"))
      .build()
      .map_err(|e| ProcessError::ThreadPool(e.to_string()))?;

    Ok(Self {
      config,
      parallelism,
      pool,
    })
  }

  pub fn parallelism(&self) -> usize {
    self.parallelism
  }

  /// Run `request` on behalf of `worker_id`.
  ///
  /// `worker_id` only annotates results. Unknown operations are not an error:
  /// they produce a result naming the operation.
  pub async fn process(&self, request: &Request, worker_id: usize) -> Result<Value, ProcessError> {
    let Some(operation) = Operation::parse(&request.operation) else {
      trace!(worker_id, operation = %request.operation, "Unknown operation");
      return Ok(json!({
        "error": "Unknown operation",
        "operation": request.operation,
      }));
    };

    trace!(worker_id, operation = operation.name(), len = request.data.len(), "Processing");
    match operation {
      Operation::Calculate => Ok(self.calculate(&request.data, worker_id).await),
      Operation::ProcessData => Ok(self.process_data(&request.data, worker_id)),
      Operation::HeavyComputation => self.heavy_computation(&request.data, worker_id),
    }
  }

  /// Size-derived number after a synthetic I/O wait.
  async fn calculate(&self, data: &str, worker_id: usize) -> Value {
    tokio::time::sleep(Duration::from_millis(self.config.calculate_delay_ms)).await;

    let len = data.chars().count() as u64;
    json!({
      "result": len * self.config.calculate_multiplier,
      "message": format!("Calculated on worker {worker_id}"),
      "timestamp": Utc::now(),
    })
  }

  /// Split `data` into one chunk per fan-out slot and sum the partials.
  fn process_data(&self, data: &str, worker_id: usize) -> Value {
    let chunks = split_chunks(data, self.parallelism);
    let spin = self.config.chunk_spin_iterations;

    let partials: Vec<ChunkSummary> = self
      .pool
      .install(|| chunks.par_iter().map(|chunk| summarize_chunk(chunk, spin)).collect());

    json!({
      "processed": partials.iter().map(|p| p.chars).sum::<u64>(),
      "checksum": partials.iter().map(|p| p.checksum).sum::<u64>(),
      "chunks": chunks.len(),
      "workerId": worker_id,
      "coresUsed": self.parallelism,
    })
  }

  /// Fixed number of independent trials, averaged.
  fn heavy_computation(&self, data: &str, worker_id: usize) -> Result<Value, ProcessError> {
    let trials = self.config.heavy_trials;
    let scale = (data.chars().count() as f64).sqrt();
    let results = Mutex::new(Vec::with_capacity(trials));

    self.pool.install(|| {
      (0..trials).into_par_iter().try_for_each(|i| {
        let value = (i as f64).sqrt() * scale;
        results.lock().map_err(|_| ProcessError::Poisoned)?.push(value);
        Ok::<_, ProcessError>(())
      })
    })?;

    let results = results.into_inner().map_err(|_| ProcessError::Poisoned)?;
    let count = results.len();
    let average = if count == 0 {
      0.0
    } else {
      results.iter().sum::<f64>() / count as f64
    };

    Ok(json!({
      "average": average,
      "count": count,
      "computedBy": "rayon",
      "workerId": worker_id,
    }))
  }
}

#[derive(Debug, Clone, Copy)]
struct ChunkSummary {
  chars: u64,
  checksum: u64,
}

fn summarize_chunk(chunk: &str, spin: u64) -> ChunkSummary {
  for _ in 0..spin {
    std::hint::spin_loop();
  }

  ChunkSummary {
    chars: chunk.chars().count() as u64,
    checksum: chunk.chars().map(u64::from).sum(),
  }
}

/// Exactly `count.max(1)` chunks on char boundaries whose lengths differ by at
/// most one; trailing chunks are empty when `data` is shorter than `count`.
fn split_chunks(data: &str, count: usize) -> Vec<&str> {
  let count = count.max(1);
  let bounds: Vec<usize> = data
    .char_indices()
    .map(|(i, _)| i)
    .chain(std::iter::once(data.len()))
    .collect();
  let chars = bounds.len() - 1;

  (0..count)
    .map(|k| &data[bounds[k * chars / count]..bounds[(k + 1) * chars / count]])
    .collect()
}
