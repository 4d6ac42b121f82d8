//! Controller lifecycle.
//!
//! The controller owns every other component and walks a one-way state
//! machine:
//!
//! ```text
//! created -> starting -> running -> stopping -> stopped
//!     ^          |
//!     +----------+  (start failed, nothing left behind)
//! ```
//!
//! # Start
//!
//! 1. Bind every listen endpoint (fails fast, before any worker exists)
//! 2. Create the queue and the master `CancellationToken`
//! 3. Spawn the worker pool
//! 4. Spawn the gateway accept loops with a child token
//!
//! # Stop
//!
//! 1. Close the queue so readers stop enqueueing
//! 2. Cancel the master token (gateway, readers, idle workers)
//! 3. Join every worker once the queue is drained
//! 4. Collect and drop the listeners

use std::{
  net::SocketAddr,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::{Deserialize, Serialize};
use tokio::{
  net::TcpListener,
  sync::{Mutex as AsyncMutex, watch},
  task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
  config::{ControllerConfig, ProcessorConfig},
  gateway::{Gateway, GatewayError},
  ledger::{CorePerformance, MetricsSnapshot, PerformanceLedger},
  pool::{PoolError, WorkerContext, WorkerPool},
  processor::{OperationProcessor, ProcessError},
  queue::RequestQueue,
};

// ============================================================================
// State & Errors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
  Created,
  Starting,
  Running,
  Stopping,
  Stopped,
}

impl std::fmt::Display for ControllerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      ControllerState::Created => "created",
      ControllerState::Starting => "starting",
      ControllerState::Running => "running",
      ControllerState::Stopping => "stopping",
      ControllerState::Stopped => "stopped",
    };
    f.write_str(name)
  }
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
  #[error(transparent)]
  Gateway(#[from] GatewayError),
  #[error("Controller is already running")]
  AlreadyRunning,
  #[error("Controller has been stopped")]
  Stopped,
  #[error(transparent)]
  Pool(#[from] PoolError),
  #[error(transparent)]
  Processor(#[from] ProcessError),
}

// ============================================================================
// Controller
// ============================================================================

/// Everything that only exists while the controller is running.
struct Running {
  cancel: CancellationToken,
  queue: Arc<RequestQueue>,
  workers: WorkerPool,
  gateway: JoinHandle<Vec<TcpListener>>,
}

impl Running {
  async fn shutdown(self) {
    self.queue.close();
    self.cancel.cancel();

    let draining = self.queue.len();
    debug!(draining, "Waiting for workers to drain the queue");
    self.workers.join().await;

    match self.gateway.await {
      Ok(listeners) => {
        debug!(count = listeners.len(), "Closing listeners");
        drop(listeners);
      }
      Err(e) => error!("Gateway task failed: {}", e),
    }
  }
}

enum Lifecycle {
  Created,
  Running(Running),
  Stopped,
}

pub struct Controller {
  config: ControllerConfig,
  core_count: usize,
  worker_count: usize,
  processor: Arc<OperationProcessor>,
  ledger: Arc<PerformanceLedger>,
  /// Serializes `start` and `stop`
  lifecycle: AsyncMutex<Lifecycle>,
  state: watch::Sender<ControllerState>,
  /// Readable without the lifecycle lock so metrics never wait on a stop.
  queue: Mutex<Option<Arc<RequestQueue>>>,
  local_addrs: Mutex<Vec<SocketAddr>>,
}

impl std::fmt::Debug for Controller {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Controller")
      .field("state", &self.state())
      .field("core_count", &self.core_count)
      .field("worker_count", &self.worker_count)
      .field("listen", &self.config.listen)
      .finish_non_exhaustive()
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Controller {
  /// Build the processor and a zeroed ledger. Nothing is bound or spawned
  /// until [`Controller::start`].
  pub fn new(config: ControllerConfig, mut processor: ProcessorConfig) -> Result<Self, ControllerError> {
    let core_count = config.core_count();
    let worker_count = config.worker_threads();
    if processor.parallelism == 0 {
      processor.parallelism = core_count;
    }

    let processor = Arc::new(OperationProcessor::new(processor)?);
    let (state, _) = watch::channel(ControllerState::Created);

    Ok(Self {
      config,
      core_count,
      worker_count,
      processor,
      ledger: Arc::new(PerformanceLedger::new(core_count)),
      lifecycle: AsyncMutex::new(Lifecycle::Created),
      state,
      queue: Mutex::new(None),
      local_addrs: Mutex::new(Vec::new()),
    })
  }

  pub fn state(&self) -> ControllerState {
    *self.state.borrow()
  }

  /// Watch lifecycle transitions.
  pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
    self.state.subscribe()
  }

  pub fn core_count(&self) -> usize {
    self.core_count
  }

  pub fn worker_count(&self) -> usize {
    self.worker_count
  }

  /// Bound endpoints while running, empty otherwise.
  pub fn local_addrs(&self) -> Vec<SocketAddr> {
    lock(&self.local_addrs).clone()
  }

  /// Running totals for one core index, if it exists.
  pub fn core_performance(&self, core_id: usize) -> Option<CorePerformance> {
    self.ledger.core(core_id)
  }

  /// Callable in any state; all zeros before the first start.
  pub fn metrics(&self) -> MetricsSnapshot {
    let queue = lock(&self.queue).clone();
    self.ledger.snapshot(|| queue.as_ref().map_or(0, |q| q.len()))
  }

  pub async fn start(&self) -> Result<(), ControllerError> {
    let mut lifecycle = self.lifecycle.lock().await;
    match *lifecycle {
      Lifecycle::Created => {}
      Lifecycle::Running(_) => return Err(ControllerError::AlreadyRunning),
      Lifecycle::Stopped => return Err(ControllerError::Stopped),
    }

    self.state.send_replace(ControllerState::Starting);
    info!(
      workers = self.worker_count,
      cores = self.core_count,
      parallelism = self.processor.parallelism(),
      "Starting controller"
    );

    match self.launch().await {
      Ok((running, addrs)) => {
        *lock(&self.queue) = Some(Arc::clone(&running.queue));
        *lock(&self.local_addrs) = addrs;
        *lifecycle = Lifecycle::Running(running);
        self.state.send_replace(ControllerState::Running);
        info!("Controller running");
        Ok(())
      }
      Err(e) => {
        self.state.send_replace(ControllerState::Created);
        error!("Controller failed to start: {}", e);
        Err(e)
      }
    }
  }

  async fn launch(&self) -> Result<(Running, Vec<SocketAddr>), ControllerError> {
    let gateway = Gateway::bind(&self.config.listen).await?;
    let addrs = gateway.local_addrs();

    let cancel = CancellationToken::new();
    let queue = Arc::new(RequestQueue::new());

    let ctx = WorkerContext {
      queue: Arc::clone(&queue),
      processor: Arc::clone(&self.processor),
      ledger: Arc::clone(&self.ledger),
      cancel: cancel.clone(),
    };
    let workers = WorkerPool::spawn(self.worker_count, self.core_count, ctx)?;
    debug!(workers = workers.len(), "Worker pool spawned");

    let gateway = tokio::spawn(gateway.run(Arc::clone(&queue), cancel.child_token()));

    Ok((
      Running {
        cancel,
        queue,
        workers,
        gateway,
      },
      addrs,
    ))
  }

  /// Drain and shut down. Safe to call in any state and more than once; a
  /// controller that never started goes straight to `stopped`.
  pub async fn stop(&self) {
    let mut lifecycle = self.lifecycle.lock().await;

    match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
      Lifecycle::Stopped => {
        debug!("Controller already stopped");
      }
      Lifecycle::Created => {
        self.state.send_replace(ControllerState::Stopped);
        info!("Controller stopped before it started");
      }
      Lifecycle::Running(running) => {
        self.state.send_replace(ControllerState::Stopping);
        info!("Stopping controller");

        running.shutdown().await;

        lock(&self.local_addrs).clear();
        self.state.send_replace(ControllerState::Stopped);
        let metrics = self.metrics();
        info!(total_processed = metrics.total_processed, "Controller stopped");
      }
    }
  }
}

impl Drop for Controller {
  fn drop(&mut self) {
    // Without an explicit stop, let workers and the gateway wind down on
    // their own.
    if let Lifecycle::Running(running) = self.lifecycle.get_mut() {
      running.queue.close();
      running.cancel.cancel();
    }
  }
}
