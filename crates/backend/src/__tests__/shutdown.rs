//! Drain-on-stop tests.

#[cfg(test)]
mod tests {
  use std::{collections::HashSet, time::Duration};

  use crate::{
    ControllerError, ControllerState,
    __tests__::helpers::{ControllerTestContext, collect_replies, test_processor_config, wait_for},
    config::{ControllerConfig, ProcessorConfig},
    protocol::{Client, ClientError, Reply, Request},
  };

  /// Test: N requests queued behind a single worker all get answered by stop.
  #[tokio::test]
  async fn test_stop_drains_queued_requests() {
    let ctx = ControllerTestContext::with_workers(1, 1).await;
    let mut client = ctx.client().await;

    let n = 6;
    for i in 0..n {
      client
        .send(&Request::new("calculate", "x".repeat(i + 1)))
        .await
        .expect("send");
    }

    // The lone worker holds at most one item, the rest must be waiting.
    let queued = wait_for(Duration::from_secs(5), || {
      let m = ctx.controller.metrics();
      m.queue_length as u64 + m.total_processed >= (n - 1) as u64
    })
    .await;
    assert!(queued, "requests should reach the queue");

    ctx.controller.stop().await;
    assert_eq!(ctx.controller.state(), ControllerState::Stopped);

    // Workers have been joined, so the ledger is final.
    let metrics = ctx.controller.metrics();
    assert_eq!(metrics.total_processed, n as u64);
    assert_eq!(metrics.queue_length, 0);
    assert_eq!(metrics.active_workers, 0);
    assert_eq!(ctx.controller.core_performance(0).map(|c| c.total_processed), Some(n as u64));
    assert!(ctx.controller.core_performance(1).is_none());

    let replies = collect_replies(&mut client, n).await;
    let results: Vec<_> = replies
      .iter()
      .map(|r| r.response().expect("response").result["result"].as_u64().unwrap())
      .collect();
    assert_eq!(results, (1..=n as u64).map(|len| len * 100).collect::<Vec<_>>());

    let ids: HashSet<_> = replies.iter().map(|r| r.request_id().to_string()).collect();
    assert_eq!(ids.len(), n);
  }

  #[tokio::test]
  async fn test_stop_twice_completes() {
    let ctx = ControllerTestContext::new().await;

    tokio::time::timeout(Duration::from_secs(10), ctx.controller.stop())
      .await
      .expect("first stop");
    tokio::time::timeout(Duration::from_secs(10), ctx.controller.stop())
      .await
      .expect("second stop");

    assert_eq!(ctx.controller.state(), ControllerState::Stopped);
  }

  #[tokio::test]
  async fn test_concurrent_stops_complete() {
    let ctx = ControllerTestContext::new().await;

    let both = async { tokio::join!(ctx.controller.stop(), ctx.controller.stop()) };
    tokio::time::timeout(Duration::from_secs(10), both)
      .await
      .expect("concurrent stops");
    assert_eq!(ctx.controller.state(), ControllerState::Stopped);
  }

  #[tokio::test]
  async fn test_start_after_stop_fails() {
    let ctx = ControllerTestContext::new().await;
    ctx.controller.stop().await;
    assert!(matches!(ctx.controller.start().await, Err(ControllerError::Stopped)));
  }

  #[tokio::test]
  async fn test_stop_closes_idle_connections_and_listener() {
    let ctx = ControllerTestContext::new().await;
    let mut client = ctx.client().await;
    let url = ctx.url();

    ctx.controller.stop().await;

    let next = tokio::time::timeout(Duration::from_secs(5), client.next_reply())
      .await
      .expect("connection should close");
    assert!(matches!(next, Err(ClientError::Closed) | Err(ClientError::WebSocket(_))));

    assert!(Client::connect(&url).await.is_err(), "listener should be closed");
  }

  #[tokio::test]
  async fn test_stop_with_dead_connection() {
    let ctx = ControllerTestContext::with_workers(1, 1).await;
    let mut client = ctx.client().await;

    client.send(&Request::new("calculate", "abc")).await.expect("send");
    client.send(&Request::new("calculate", "def")).await.expect("send");
    drop(client);

    let counted = wait_for(Duration::from_secs(5), || ctx.controller.metrics().total_processed == 2).await;
    assert!(counted, "replies to a vanished client still count");

    tokio::time::timeout(Duration::from_secs(10), ctx.controller.stop())
      .await
      .expect("stop completes");
  }

  /// Test: clients still pipelining when stop lands receive every reply the
  /// ledger counted, and see a clean close instead of a reset.
  #[tokio::test]
  async fn test_stop_racing_pipelined_clients_loses_no_replies() {
    const CLIENTS: usize = 8;
    const FRAMES: usize = 200;

    let ctx = ControllerTestContext::with_config(
      ControllerConfig {
        worker_threads: 2,
        core_count: 2,
        listen: vec!["127.0.0.1:0".to_string()],
      },
      ProcessorConfig {
        calculate_delay_ms: 1,
        ..test_processor_config()
      },
    )
    .await;

    let mut clients = Vec::with_capacity(CLIENTS);
    for _ in 0..CLIENTS {
      let mut client = ctx.client().await;
      clients.push(tokio::spawn(async move {
        for i in 0..FRAMES {
          if client.send(&Request::new("calculate", "x".repeat(i % 7 + 1))).await.is_err() {
            break;
          }
        }

        let mut answered = Vec::new();
        let mut rejected = 0usize;
        loop {
          let next = tokio::time::timeout(Duration::from_secs(20), client.next_reply())
            .await
            .expect("reply or close in time");
          match next {
            Ok(Reply::Response(response)) => answered.push(response.request_id),
            Ok(Reply::Error(frame)) => {
              assert_eq!(frame.error, "controller is shutting down");
              rejected += 1;
            }
            Err(ClientError::Closed) => break,
            Err(e) => panic!("connection failed instead of closing: {e}"),
          }
        }
        let _ = client.close().await;
        (answered, rejected)
      }));
    }

    tokio::time::sleep(Duration::from_millis(30)).await;
    ctx.controller.stop().await;

    let mut ids = HashSet::new();
    let mut answered_total = 0usize;
    for client in clients {
      let (answered, rejected) = client.await.expect("client task");
      assert!(answered.len() + rejected <= FRAMES);
      answered_total += answered.len();
      ids.extend(answered);
    }

    assert_eq!(answered_total as u64, ctx.controller.metrics().total_processed);
    assert_eq!(ids.len(), answered_total, "each reply is delivered once");
  }
}
