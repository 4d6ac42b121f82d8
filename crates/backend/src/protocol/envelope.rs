use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::task::{TaskTracker, task_tracker::TaskTrackerToken};
use uuid::Uuid;

/// Reply target for one live connection.
///
/// A clone of the connection's outbound channel. The connection's writer task
/// owns the socket sink and serializes every write, so envelopes from the same
/// connection can be answered by different workers concurrently. The writer
/// closes the socket once the reader and every outstanding handle are gone.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
  id: u64,
  peer: SocketAddr,
  outbound: mpsc::UnboundedSender<Message>,
  /// Keeps the connection's in-flight tracker busy while this handle lives.
  _in_flight: Option<TaskTrackerToken>,
}

impl ConnectionHandle {
  pub(crate) fn new(id: u64, peer: SocketAddr, outbound: mpsc::UnboundedSender<Message>) -> Self {
    Self {
      id,
      peer,
      outbound,
      _in_flight: None,
    }
  }

  /// A clone counted by `tracker` until it is dropped, i.e. until the
  /// envelope carrying it has been answered.
  pub(crate) fn tracked(&self, tracker: &TaskTracker) -> Self {
    Self {
      _in_flight: Some(tracker.token()),
      ..self.clone()
    }
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn peer(&self) -> SocketAddr {
    self.peer
  }

  /// Queue a text frame for the connection's writer.
  pub fn send_text(&self, text: String) -> Result<(), ConnectionError> {
    self
      .outbound
      .send(Message::Text(text))
      .map_err(|_| ConnectionError::Closed { connection: self.id })
  }
}

/// Unit of work: one inbound frame plus where to answer it.
#[derive(Debug)]
pub struct Envelope {
  pub connection: ConnectionHandle,
  pub request_id: String,
  pub payload: String,
}

impl Envelope {
  /// Wrap a raw frame, generating a fresh request id.
  pub fn new(connection: ConnectionHandle, payload: impl Into<String>) -> Self {
    Self {
      connection,
      request_id: Uuid::new_v4().to_string(),
      payload: payload.into(),
    }
  }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
  #[error("Connection {connection} is closed")]
  Closed { connection: u64 },
}
