//! Connection gateway - WebSocket endpoints feeding the request queue.
//!
//! The gateway binds every configured endpoint up front and then runs one
//! accept loop per listener. Each accepted connection gets:
//!
//! - a reader (this module's `handle_connection`) that wraps every inbound
//!   frame in an [`Envelope`] and enqueues it, and
//! - a writer task that owns the socket sink and sends whatever the workers
//!   queue on the connection's [`ConnectionHandle`].
//!
//! The gateway keeps no per-request state. On cancellation readers stop
//! enqueueing and start answering frames themselves, and a connection is only
//! released after every outstanding reply has been written and the close
//! handshake has finished.

use std::{
  net::SocketAddr,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use futures::{
  SinkExt, StreamExt,
  stream::{SplitSink, SplitStream},
};
use tokio::{
  net::{TcpListener, TcpStream},
  sync::mpsc,
};
use tokio_tungstenite::{
  WebSocketStream, accept_async,
  tungstenite::{Error as WsError, Message},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::{
  protocol::{ConnectionHandle, Envelope, ErrorFrame},
  queue::{QueueError, RequestQueue},
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
  #[error("No listen endpoints configured")]
  NoEndpoints,
  #[error("Failed to bind {endpoint}: {source}")]
  Bind { endpoint: String, source: std::io::Error },
}

/// Bound, not yet accepting, listeners.
#[derive(Debug)]
pub struct Gateway {
  listeners: Vec<TcpListener>,
}

impl Gateway {
  /// Bind every endpoint or none: the first failure drops the listeners
  /// bound so far.
  pub async fn bind(endpoints: &[String]) -> Result<Self, GatewayError> {
    if endpoints.is_empty() {
      return Err(GatewayError::NoEndpoints);
    }

    let mut listeners = Vec::with_capacity(endpoints.len());
    for endpoint in endpoints {
      let listener = TcpListener::bind(endpoint.as_str())
        .await
        .map_err(|source| GatewayError::Bind {
          endpoint: endpoint.clone(),
          source,
        })?;
      info!("Gateway listening on {:?}", listener.local_addr().ok());
      listeners.push(listener);
    }

    Ok(Self { listeners })
  }

  pub fn local_addrs(&self) -> Vec<SocketAddr> {
    self.listeners.iter().filter_map(|l| l.local_addr().ok()).collect()
  }

  /// Accept on every listener until `cancel` fires.
  ///
  /// The listeners are handed back rather than dropped so the caller decides
  /// when the endpoints actually close.
  pub async fn run(self, queue: Arc<RequestQueue>, cancel: CancellationToken) -> Vec<TcpListener> {
    let loops = self
      .listeners
      .into_iter()
      .map(|listener| accept_loop(listener, Arc::clone(&queue), cancel.clone()));

    futures::future::join_all(loops).await
  }
}

async fn accept_loop(listener: TcpListener, queue: Arc<RequestQueue>, cancel: CancellationToken) -> TcpListener {
  loop {
    tokio::select! {
      biased;

      _ = cancel.cancelled() => {
        debug!("Accept loop shutting down (cancelled)");
        break;
      }

      result = listener.accept() => {
        match result {
          Ok((stream, peer)) => {
            tokio::spawn(handle_connection(stream, peer, Arc::clone(&queue), cancel.child_token()));
          }
          Err(e) => {
            error!("Accept error: {}", e);
          }
        }
      }
    }
  }

  listener
}

type Socket = WebSocketStream<TcpStream>;

/// Error text for frames that arrive once shutdown has begun.
const SHUTTING_DOWN: &str = "controller is shutting down";

/// How long a drained connection waits for the peer to acknowledge close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadOutcome {
  /// The peer closed, failed or went away.
  PeerGone,
  /// Shutdown began while the peer was still connected.
  ShuttingDown,
}

enum Inbound {
  Payload(String),
  Skip,
  End,
}

fn inbound(connection_id: u64, frame: Option<Result<Message, WsError>>) -> Inbound {
  match frame {
    Some(Ok(Message::Text(text))) => Inbound::Payload(text),
    Some(Ok(Message::Binary(bytes))) => Inbound::Payload(String::from_utf8_lossy(&bytes).into_owned()),
    Some(Ok(Message::Close(_))) | None => Inbound::End,
    Some(Ok(_)) => Inbound::Skip,
    Some(Err(e)) => {
      warn!(connection_id, error = %e, "Error reading from client");
      Inbound::End
    }
  }
}

/// Serve one connection.
///
/// While running, frames become envelopes. Once shutdown begins the socket is
/// drained rather than dropped:
///
/// 1. Further frames get a shutting-down error frame and are never enqueued
/// 2. When every envelope from this connection has been answered, the writer
///    flushes and sends Close
/// 3. Input is discarded until the peer acknowledges the close or goes away
async fn handle_connection(stream: TcpStream, peer: SocketAddr, queue: Arc<RequestQueue>, cancel: CancellationToken) {
  let socket = match accept_async(stream).await {
    Ok(s) => s,
    Err(e) => {
      warn!(%peer, error = %e, "WebSocket handshake failed");
      return;
    }
  };

  let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
  debug!(connection_id, %peer, "Client connected");

  let (sink, mut frames) = socket.split();
  let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
  let writer = tokio::spawn(write_loop(connection_id, sink, outbound_rx));
  let handle = ConnectionHandle::new(connection_id, peer, outbound_tx);
  let in_flight = TaskTracker::new();

  let (enqueued, outcome) = read_loop(&handle, &in_flight, &mut frames, &queue, &cancel).await;

  let mut peer_open = false;
  if outcome == ReadOutcome::ShuttingDown {
    let (rejected, open) = drain(&handle, &in_flight, &mut frames).await;
    debug!(connection_id, enqueued, rejected, "Connection drained");
    peer_open = open;
  }

  // The writer exits once the workers have released every envelope's handle.
  drop(handle);
  if peer_open {
    await_close(connection_id, &mut frames).await;
  }
  if let Err(e) = writer.await {
    error!(connection_id, error = %e, "Connection writer failed");
  }

  debug!(connection_id, enqueued, "Client disconnected");
}

async fn read_loop(
  handle: &ConnectionHandle,
  in_flight: &TaskTracker,
  frames: &mut SplitStream<Socket>,
  queue: &RequestQueue,
  cancel: &CancellationToken,
) -> (u64, ReadOutcome) {
  let mut enqueued = 0u64;

  loop {
    let frame = tokio::select! {
      biased;

      _ = cancel.cancelled() => return (enqueued, ReadOutcome::ShuttingDown),
      frame = frames.next() => frame,
    };

    let payload = match inbound(handle.id(), frame) {
      Inbound::Payload(payload) => payload,
      Inbound::Skip => continue,
      Inbound::End => return (enqueued, ReadOutcome::PeerGone),
    };

    let envelope = Envelope::new(handle.tracked(in_flight), payload);
    let request_id = envelope.request_id.clone();

    match queue.enqueue(envelope) {
      Ok(()) => {
        enqueued += 1;
        trace!(connection_id = handle.id(), request_id = %request_id, "Request enqueued");
      }
      Err(QueueError::Closed(envelope)) => {
        // Shutdown won the race with this frame; answer it here.
        reject(handle, envelope.request_id);
        return (enqueued, ReadOutcome::ShuttingDown);
      }
    }
  }
}

/// Answer frames with a shutdown error until every envelope this connection
/// enqueued has been replied to. Returns the number of rejected frames and
/// whether the peer is still connected.
async fn drain(handle: &ConnectionHandle, in_flight: &TaskTracker, frames: &mut SplitStream<Socket>) -> (u64, bool) {
  in_flight.close();
  let idle = in_flight.wait();
  tokio::pin!(idle);

  let mut rejected = 0u64;
  loop {
    let frame = tokio::select! {
      biased;

      _ = &mut idle => return (rejected, true),
      frame = frames.next() => frame,
    };

    match inbound(handle.id(), frame) {
      Inbound::Payload(_) => {
        reject(handle, Uuid::new_v4().to_string());
        rejected += 1;
      }
      Inbound::Skip => {}
      Inbound::End => return (rejected, false),
    }
  }
}

/// Discard input until the peer acknowledges our Close or goes away.
async fn await_close(connection_id: u64, frames: &mut SplitStream<Socket>) {
  let discard = async {
    let mut discarded = 0u64;
    while let Some(Ok(message)) = frames.next().await {
      if message.is_close() {
        break;
      }
      discarded += 1;
    }
    discarded
  };

  match tokio::time::timeout(CLOSE_TIMEOUT, discard).await {
    Ok(discarded) => trace!(connection_id, discarded, "Close acknowledged"),
    Err(_) => debug!(connection_id, "Peer did not acknowledge close in time"),
  }
}

fn reject(handle: &ConnectionHandle, request_id: String) {
  let frame = ErrorFrame::new(request_id, SHUTTING_DOWN);
  let _ = handle.send_text(frame.to_text());
}

/// Forward queued replies to the socket, then close it.
async fn write_loop(
  connection_id: u64,
  mut sink: SplitSink<Socket, Message>,
  mut outbound: mpsc::UnboundedReceiver<Message>,
) {
  while let Some(message) = outbound.recv().await {
    if let Err(e) = sink.send(message).await {
      debug!(connection_id, error = %e, "Write failed, abandoning connection");
      return;
    }
  }

  let _ = sink.close().await;
}
