//! Pool worker loop - dequeue, decode, process, reply, record.

use std::{
  any::Any,
  panic::AssertUnwindSafe,
  sync::Arc,
  time::{Duration, Instant},
};

use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
  ledger::PerformanceLedger,
  processor::{OperationProcessor, ProcessError},
  protocol::{Envelope, ErrorFrame, Reply, Request, Response},
  queue::{Dequeued, RequestQueue},
};

/// Shared state every worker needs. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WorkerContext {
  pub queue: Arc<RequestQueue>,
  pub processor: Arc<OperationProcessor>,
  pub ledger: Arc<PerformanceLedger>,
  pub cancel: CancellationToken,
}

#[derive(Debug, thiserror::Error)]
enum WorkerError {
  #[error("Invalid request: {0}")]
  Decode(#[from] serde_json::Error),
  #[error(transparent)]
  Process(#[from] ProcessError),
}

pub struct Worker {
  id: usize,
  core_id: usize,
  ctx: WorkerContext,
}

impl Worker {
  pub fn new(id: usize, core_id: usize, ctx: WorkerContext) -> Self {
    Self { id, core_id, ctx }
  }

  /// Loop until cancelled and the queue is drained.
  ///
  /// Cancellation is only observed between items, so an envelope that has
  /// been dequeued is always answered.
  pub async fn run(self) {
    self.ctx.ledger.worker_started();
    info!(worker_id = self.id, core_id = self.core_id, "Worker started");

    let mut handled = 0u64;
    loop {
      match self.ctx.queue.dequeue(&self.ctx.cancel).await {
        Dequeued::Item(envelope) => {
          self.handle(envelope).await;
          handled += 1;
        }
        Dequeued::Cancelled => break,
      }
    }

    self.ctx.ledger.worker_stopped();
    info!(worker_id = self.id, handled, "Worker stopped");
  }

  /// Produce exactly one reply for `envelope`.
  async fn handle(&self, envelope: Envelope) {
    let processor = Arc::clone(&self.ctx.processor);
    let worker_id = self.id;
    self
      .handle_with(envelope, |request| async move { processor.process(&request, worker_id).await })
      .await;
  }

  /// [`Worker::handle`] with the routine that turns a decoded request into a
  /// result supplied by the caller.
  async fn handle_with<R, F>(&self, envelope: Envelope, routine: R)
  where
    R: FnOnce(Request) -> F,
    F: Future<Output = Result<Value, ProcessError>>,
  {
    let started = Instant::now();
    let request_id = envelope.request_id.clone();

    let reply: Reply = match self.execute(&envelope.payload, routine).await {
      Ok(result) => Response {
        request_id: request_id.clone(),
        result,
        worker_id: self.id,
        core_id: self.core_id,
        processing_time: millis(started.elapsed()),
      }
      .into(),
      Err(e) => {
        warn!(worker_id = self.id, request_id = %request_id, error = %e, "Request failed");
        ErrorFrame::new(request_id.clone(), e.to_string()).into()
      }
    };
    let elapsed = started.elapsed();

    if let Err(e) = envelope.connection.send_text(reply.to_text()) {
      debug!(
        worker_id = self.id,
        request_id = %request_id,
        peer = %envelope.connection.peer(),
        error = %e,
        "Dropping reply for closed connection"
      );
    }

    self.ctx.ledger.record(self.core_id, elapsed);
    trace!(
      worker_id = self.id,
      core_id = self.core_id,
      request_id = %request_id,
      elapsed_ms = millis(elapsed),
      "Request completed"
    );
  }

  async fn execute<R, F>(&self, payload: &str, routine: R) -> Result<Value, WorkerError>
  where
    R: FnOnce(Request) -> F,
    F: Future<Output = Result<Value, ProcessError>>,
  {
    let request: Request = serde_json::from_str(payload)?;
    let operation = request.operation.clone();

    let outcome = AssertUnwindSafe(routine(request)).catch_unwind().await;

    match outcome {
      Ok(result) => Ok(result?),
      Err(panic) => {
        let message = panic_message(panic.as_ref());
        error!(worker_id = self.id, %operation, %message, "Operation panicked");
        Err(ProcessError::Panicked(message).into())
      }
    }
  }
}

fn millis(elapsed: Duration) -> u64 {
  u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
