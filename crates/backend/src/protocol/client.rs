//! WebSocket client for talking to a running controller.
//!
//! The controller answers every frame exactly once, but not necessarily in
//! the order frames were sent. Callers that pipeline requests should match
//! replies by position only when a single worker is configured.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
  MaybeTlsStream, WebSocketStream, connect_async,
  tungstenite::{self, Message},
};
use tracing::{debug, trace};

use super::{Reply, Request};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
  #[error("WebSocket error: {0}")]
  WebSocket(#[from] tungstenite::Error),
  #[error("Ser/de error: {0}")]
  Serde(#[from] serde_json::Error),
  #[error("Connection closed by controller")]
  Closed,
}

/// A single connection to the controller.
pub struct Client {
  socket: Socket,
}

impl Client {
  /// Connect to `url`, e.g. `ws://127.0.0.1:8080/`.
  pub async fn connect(url: &str) -> Result<Self, ClientError> {
    let (socket, _) = connect_async(url).await?;
    debug!(%url, "Connected to controller");
    Ok(Self { socket })
  }

  /// Send a typed request without waiting for the reply.
  pub async fn send(&mut self, request: &Request) -> Result<(), ClientError> {
    let json = serde_json::to_string(request)?;
    self.send_raw(json).await
  }

  /// Send an arbitrary text frame (used to exercise malformed input).
  pub async fn send_raw(&mut self, text: impl Into<String>) -> Result<(), ClientError> {
    self.socket.send(Message::Text(text.into())).await?;
    Ok(())
  }

  /// Wait for the next reply frame, skipping control frames.
  pub async fn next_reply(&mut self) -> Result<Reply, ClientError> {
    while let Some(message) = self.socket.next().await {
      match message? {
        Message::Text(text) => {
          trace!(%text, "Received frame");
          return Ok(serde_json::from_str(&text)?);
        }
        Message::Binary(bytes) => return Ok(serde_json::from_slice(&bytes)?),
        Message::Close(_) => return Err(ClientError::Closed),
        _ => continue,
      }
    }
    Err(ClientError::Closed)
  }

  /// Send a request and wait for its reply.
  pub async fn call(&mut self, request: &Request) -> Result<Reply, ClientError> {
    self.send(request).await?;
    self.next_reply().await
  }

  /// Close the connection politely.
  pub async fn close(mut self) -> Result<(), ClientError> {
    self.socket.close(None).await?;
    Ok(())
  }
}
