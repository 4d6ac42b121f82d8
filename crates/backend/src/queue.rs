//! Request queue between the gateway readers and the pool workers.
//!
//! Unbounded and multi-producer. Consumers share the receiver behind an async
//! mutex, the same way pipeline stage workers share their input channel.
//! Closing refuses new envelopes while workers keep draining what is buffered.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::protocol::Envelope;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
  /// Shutdown has begun. The rejected envelope is handed back so the caller
  /// can still answer it.
  #[error("Request queue is closed")]
  Closed(Box<Envelope>),
}

/// Outcome of a blocking dequeue.
#[derive(Debug)]
pub enum Dequeued {
  Item(Envelope),
  /// Cancellation fired and nothing is left to drain.
  Cancelled,
}

#[derive(Debug)]
pub struct RequestQueue {
  tx: mpsc::UnboundedSender<Envelope>,
  rx: Mutex<mpsc::UnboundedReceiver<Envelope>>,
  depth: AtomicUsize,
  closed: AtomicBool,
}

impl Default for RequestQueue {
  fn default() -> Self {
    Self::new()
  }
}

impl RequestQueue {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self {
      tx,
      rx: Mutex::new(rx),
      depth: AtomicUsize::new(0),
      closed: AtomicBool::new(false),
    }
  }

  /// Push an envelope. Never blocks; fails only once the queue is closed.
  pub fn enqueue(&self, envelope: Envelope) -> Result<(), QueueError> {
    if self.closed.load(Ordering::Acquire) {
      return Err(QueueError::Closed(Box::new(envelope)));
    }

    self.depth.fetch_add(1, Ordering::AcqRel);
    self.tx.send(envelope).map_err(|rejected| {
      self.depth.fetch_sub(1, Ordering::AcqRel);
      QueueError::Closed(Box::new(rejected.0))
    })
  }

  /// Wait for the next envelope.
  ///
  /// Buffered envelopes are always preferred over cancellation, so every item
  /// enqueued before shutdown is handed to some worker. Once `cancel` fires the
  /// receiver is closed, which makes any racing `enqueue` fail rather than
  /// strand its envelope.
  pub async fn dequeue(&self, cancel: &CancellationToken) -> Dequeued {
    let mut rx = self.rx.lock().await;

    let next = tokio::select! {
      biased;

      msg = rx.recv() => msg,

      _ = cancel.cancelled() => {
        rx.close();
        rx.try_recv().ok()
      }
    };

    match next {
      Some(envelope) => {
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Dequeued::Item(envelope)
      }
      None => Dequeued::Cancelled,
    }
  }

  /// Refuse further envelopes. Buffered ones remain available to `dequeue`.
  pub fn close(&self) {
    self.closed.store(true, Ordering::Release);
  }

  /// Envelopes waiting for a worker
  pub fn len(&self) -> usize {
    self.depth.load(Ordering::Acquire)
  }
}
