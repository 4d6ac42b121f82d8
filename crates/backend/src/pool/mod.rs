//! Fixed worker pool
//!
//! Each worker is a dedicated OS thread named `worker-{id}` running its own
//! current-thread tokio runtime. The thread is pinned (best effort) to core
//! `id % core_count` before the loop starts, so the hint covers everything
//! the worker executes. Workers share the queue and ledger via `Arc`.

mod affinity;
mod worker;

use std::thread::JoinHandle;

use tracing::{debug, error, info};

pub use self::{
  affinity::try_set_affinity,
  worker::{Worker, WorkerContext},
};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
  #[error("Failed to build runtime for worker {worker_id}: {source}")]
  Runtime { worker_id: usize, source: std::io::Error },
  #[error("Failed to spawn worker {worker_id}: {source}")]
  Spawn { worker_id: usize, source: std::io::Error },
}

#[derive(Debug)]
pub struct WorkerPool {
  workers: Vec<(usize, JoinHandle<()>)>,
}

impl WorkerPool {
  /// Start `count` workers bucketed over `core_count` cores.
  ///
  /// If any worker fails to start, the context's token is cancelled so the
  /// ones already running exit on their own.
  pub fn spawn(count: usize, core_count: usize, ctx: WorkerContext) -> Result<Self, PoolError> {
    let core_count = core_count.max(1);
    let mut workers = Vec::with_capacity(count);

    for worker_id in 0..count {
      match spawn_worker(worker_id, worker_id % core_count, ctx.clone()) {
        Ok(handle) => workers.push((worker_id, handle)),
        Err(e) => {
          ctx.cancel.cancel();
          return Err(e);
        }
      }
    }

    info!(workers = count, cores = core_count, "Worker pool started");
    Ok(Self { workers })
  }

  pub fn len(&self) -> usize {
    self.workers.len()
  }

  /// Wait for every worker thread to exit.
  pub async fn join(self) {
    for (worker_id, handle) in self.workers {
      match tokio::task::spawn_blocking(move || handle.join()).await {
        Ok(Ok(())) => debug!(worker_id, "Worker joined"),
        Ok(Err(_)) => error!(worker_id, "Worker thread panicked"),
        Err(e) => error!(worker_id, error = %e, "Failed to join worker"),
      }
    }
  }
}

fn spawn_worker(worker_id: usize, core_id: usize, ctx: WorkerContext) -> Result<JoinHandle<()>, PoolError> {
  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .map_err(|source| PoolError::Runtime { worker_id, source })?;

  std::thread::Builder::new()
    .name(format!("worker-{worker_id}"))
    .spawn(move || {
      if try_set_affinity(core_id) {
        debug!(worker_id, core_id, "Pinned worker to core");
      } else {
        debug!(worker_id, core_id, "Core affinity unavailable, running unpinned");
      }

      runtime.block_on(Worker::new(worker_id, core_id, ctx).run());
    })
    .map_err(|source| PoolError::Spawn { worker_id, source })
}
