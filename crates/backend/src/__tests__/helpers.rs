//! Test helpers for controller integration tests.
//!
//! Provides `ControllerTestContext`, which starts a real controller on an
//! ephemeral local port and talks to it over WebSockets.

use std::{net::SocketAddr, time::Duration};

use crate::{
  Controller,
  config::{ControllerConfig, ProcessorConfig},
  protocol::{Client, Reply},
};

/// Synthetic `calculate` delay used by every test controller.
pub const TEST_DELAY_MS: u64 = 20;

/// Test context wrapping a started controller.
pub struct ControllerTestContext {
  pub controller: Controller,
  pub addr: SocketAddr,
}

impl ControllerTestContext {
  /// Start a controller with two workers over two cores.
  pub async fn new() -> Self {
    Self::with_workers(2, 2).await
  }

  pub async fn with_workers(workers: usize, cores: usize) -> Self {
    Self::with_config(
      ControllerConfig {
        worker_threads: workers,
        core_count: cores,
        listen: vec!["127.0.0.1:0".to_string()],
      },
      test_processor_config(),
    )
    .await
  }

  pub async fn with_config(controller: ControllerConfig, processor: ProcessorConfig) -> Self {
    let controller = Controller::new(controller, processor).expect("build controller");
    controller.start().await.expect("start controller");
    let addr = controller.local_addrs()[0];
    Self { controller, addr }
  }

  pub fn url(&self) -> String {
    format!("ws://{}/", self.addr)
  }

  pub async fn client(&self) -> Client {
    Client::connect(&self.url()).await.expect("connect client")
  }
}

/// Short delays and tiny spin loops so tests stay fast.
pub fn test_processor_config() -> ProcessorConfig {
  ProcessorConfig {
    calculate_delay_ms: TEST_DELAY_MS,
    parallelism: 2,
    chunk_spin_iterations: 100,
    ..Default::default()
  }
}

/// Read `count` replies, failing the test if any takes longer than 10s.
pub async fn collect_replies(client: &mut Client, count: usize) -> Vec<Reply> {
  let mut replies = Vec::with_capacity(count);
  for _ in 0..count {
    let reply = tokio::time::timeout(Duration::from_secs(10), client.next_reply())
      .await
      .expect("reply timed out")
      .expect("read reply");
    replies.push(reply);
  }
  replies
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_for<F>(timeout: Duration, mut check: F) -> bool
where
  F: FnMut() -> bool,
{
  let start = std::time::Instant::now();
  let poll_interval = Duration::from_millis(5);

  while start.elapsed() < timeout {
    if check() {
      return true;
    }
    tokio::time::sleep(poll_interval).await;
  }

  false
}
