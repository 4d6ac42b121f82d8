//! Controller E2E tests over real WebSocket connections.

#[cfg(test)]
mod tests {
  use std::{collections::HashSet, time::Duration};

  use pretty_assertions::assert_eq;
  use tokio::net::TcpListener;

  use crate::{
    Controller, ControllerError, ControllerState, GatewayError,
    __tests__::helpers::{
      ControllerTestContext, TEST_DELAY_MS, collect_replies, test_processor_config, wait_for,
    },
    config::ControllerConfig,
    protocol::Request,
  };

  // ==========================================================================
  // Request Handling
  // ==========================================================================

  #[tokio::test]
  async fn test_calculate_hello() {
    let ctx = ControllerTestContext::new().await;
    let mut client = ctx.client().await;

    let reply = client.call(&Request::new("calculate", "hello")).await.expect("call");
    let response = reply.response().expect("response frame");

    assert_eq!(response.result["result"], 500);
    assert!(response.processing_time >= TEST_DELAY_MS);
    assert!(response.worker_id < 2);
    assert!(response.core_id < 2);
    assert!(!response.request_id.is_empty());

    ctx.controller.stop().await;
  }

  #[tokio::test]
  async fn test_operation_match_is_case_insensitive() {
    let ctx = ControllerTestContext::new().await;
    let mut client = ctx.client().await;

    let reply = client.call(&Request::new("CALCULATE", "abc")).await.expect("call");
    assert_eq!(reply.response().expect("response").result["result"], 300);

    ctx.controller.stop().await;
  }

  #[tokio::test]
  async fn test_unknown_operation_is_not_an_error_frame() {
    let ctx = ControllerTestContext::new().await;
    let mut client = ctx.client().await;

    client
      .send_raw(r#"{"operation":"frobnicate","data":"x"}"#)
      .await
      .expect("send");
    let reply = collect_replies(&mut client, 1).await.remove(0);

    assert!(!reply.is_error());
    assert_eq!(reply.response().unwrap().result["operation"], "frobnicate");

    ctx.controller.stop().await;
  }

  #[tokio::test]
  async fn test_malformed_frame_then_valid_request() {
    // One worker, so the same loop must survive the bad frame.
    let ctx = ControllerTestContext::with_workers(1, 1).await;
    let mut client = ctx.client().await;

    client.send_raw("this is not json").await.expect("send malformed");
    client.send(&Request::new("calculate", "hello")).await.expect("send valid");

    let replies = collect_replies(&mut client, 2).await;
    let error = replies[0].error().expect("first reply is an error frame");
    assert!(!error.request_id.is_empty());
    assert!(error.error.starts_with("Invalid request"));

    let response = replies[1].response().expect("second reply is a response");
    assert_eq!(response.result["result"], 500);
    assert_eq!(response.worker_id, 0);
    assert_ne!(response.request_id, error.request_id);

    ctx.controller.stop().await;
  }

  #[tokio::test]
  async fn test_process_data_and_heavy_computation() {
    let ctx = ControllerTestContext::new().await;
    let mut client = ctx.client().await;

    let data = "the quick brown fox";
    let reply = client.call(&Request::new("process_data", data)).await.expect("call");
    let result = &reply.response().expect("response").result;
    assert_eq!(result["processed"], data.len());
    assert_eq!(result["chunks"], 2);

    let reply = client
      .call(&Request::new("heavy_computation", "abcd"))
      .await
      .expect("call");
    let result = &reply.response().expect("response").result;
    assert_eq!(result["count"], 100);

    ctx.controller.stop().await;
  }

  #[tokio::test]
  async fn test_missing_data_defaults_to_empty() {
    let ctx = ControllerTestContext::new().await;
    let mut client = ctx.client().await;

    client.send_raw(r#"{"operation":"calculate"}"#).await.expect("send");
    let reply = collect_replies(&mut client, 1).await.remove(0);
    assert_eq!(reply.response().expect("response").result["result"], 0);

    ctx.controller.stop().await;
  }

  // ==========================================================================
  // Correlation & Ledger
  // ==========================================================================

  #[tokio::test]
  async fn test_every_request_answered_and_counted() {
    let ctx = ControllerTestContext::with_workers(3, 2).await;
    let mut first = ctx.client().await;
    let mut second = ctx.client().await;

    let operations = ["calculate", "process_data", "heavy_computation", "frobnicate"];
    let per_client = 10;
    for i in 0..per_client {
      let op = operations[i % operations.len()];
      first.send(&Request::new(op, "payload")).await.expect("send");
      second.send(&Request::new(op, "other payload")).await.expect("send");
    }

    let mut replies = collect_replies(&mut first, per_client).await;
    replies.extend(collect_replies(&mut second, per_client).await);

    let ids: HashSet<_> = replies.iter().map(|r| r.request_id().to_string()).collect();
    assert_eq!(ids.len(), per_client * 2, "request ids must be unique");
    assert!(replies.iter().all(|r| !r.is_error()));

    let k = (per_client * 2) as u64;
    let counted = wait_for(Duration::from_secs(5), || ctx.controller.metrics().total_processed == k).await;
    assert!(counted, "ledger should count every request");

    let metrics = ctx.controller.metrics();
    assert_eq!(metrics.cores.iter().map(|c| c.total_processed).sum::<u64>(), k);
    assert_eq!(metrics.queue_length, 0);

    ctx.controller.stop().await;
  }

  #[tokio::test]
  async fn test_metrics_never_count_a_request_as_queued_and_processed() {
    let ctx = ControllerTestContext::new().await;
    let mut client = ctx.client().await;

    let n = 30u64;
    for _ in 0..n {
      client.send(&Request::new("calculate", "abc")).await.expect("send");
    }

    // In-flight requests are in neither figure, so the sum can only fall short.
    let done = wait_for(Duration::from_secs(10), || {
      let m = ctx.controller.metrics();
      assert!(m.queue_length as u64 + m.total_processed <= n, "{m:?}");
      m.total_processed == n
    })
    .await;
    assert!(done, "ledger should count every request");

    collect_replies(&mut client, n as usize).await;
    ctx.controller.stop().await;
  }

  #[tokio::test]
  async fn test_metrics_before_start_are_zero() {
    let controller = Controller::new(
      ControllerConfig {
        worker_threads: 3,
        core_count: 4,
        listen: vec!["127.0.0.1:0".to_string()],
      },
      test_processor_config(),
    )
    .expect("build controller");

    let metrics = controller.metrics();
    assert_eq!(metrics.queue_length, 0);
    assert_eq!(metrics.active_workers, 0);
    assert_eq!(metrics.total_processed, 0);
    assert_eq!(metrics.cores.len(), 4);
    assert!(metrics.cores.iter().all(|c| c.total_processed == 0 && c.average_processing_time == 0.0));
  }

  #[tokio::test]
  async fn test_active_workers_reported_while_running() {
    let ctx = ControllerTestContext::with_workers(3, 2).await;

    let all_up = wait_for(Duration::from_secs(5), || ctx.controller.metrics().active_workers == 3).await;
    assert!(all_up);
    assert_eq!(ctx.controller.metrics().cores.len(), 2);

    ctx.controller.stop().await;
    assert_eq!(ctx.controller.metrics().active_workers, 0);
  }

  // ==========================================================================
  // Lifecycle
  // ==========================================================================

  #[tokio::test]
  async fn test_start_twice_fails() {
    let ctx = ControllerTestContext::new().await;
    assert_eq!(ctx.controller.state(), ControllerState::Running);
    assert!(matches!(
      ctx.controller.start().await,
      Err(ControllerError::AlreadyRunning)
    ));
    ctx.controller.stop().await;
  }

  #[tokio::test]
  async fn test_bind_failure_leaves_controller_retryable() {
    let blocker = TcpListener::bind("127.0.0.1:0").await.expect("bind blocker");
    let endpoint = blocker.local_addr().unwrap().to_string();

    let controller = Controller::new(
      ControllerConfig {
        worker_threads: 1,
        core_count: 1,
        listen: vec![endpoint.clone()],
      },
      test_processor_config(),
    )
    .expect("build controller");

    match controller.start().await {
      Err(ControllerError::Gateway(GatewayError::Bind { endpoint: failed, .. })) => assert_eq!(failed, endpoint),
      other => panic!("expected bind failure, got {other:?}"),
    }
    assert_eq!(controller.state(), ControllerState::Created);
    assert_eq!(controller.metrics().active_workers, 0);

    drop(blocker);
    controller.start().await.expect("retry after the port frees up");
    assert_eq!(controller.state(), ControllerState::Running);
    controller.stop().await;
  }

  #[tokio::test]
  async fn test_multiple_endpoints_share_the_pool() {
    let ctx = ControllerTestContext::with_config(
      ControllerConfig {
        worker_threads: 2,
        core_count: 2,
        listen: vec!["127.0.0.1:0".to_string(), "127.0.0.1:0".to_string()],
      },
      test_processor_config(),
    )
    .await;

    let addrs = ctx.controller.local_addrs();
    assert_eq!(addrs.len(), 2);

    for addr in addrs {
      let mut client = crate::Client::connect(&format!("ws://{addr}/")).await.expect("connect");
      let reply = client.call(&Request::new("calculate", "xy")).await.expect("call");
      assert_eq!(reply.response().expect("response").result["result"], 200);
    }

    let counted = wait_for(Duration::from_secs(5), || ctx.controller.metrics().total_processed == 2).await;
    assert!(counted);
    ctx.controller.stop().await;
  }

  #[tokio::test]
  async fn test_state_transitions_are_observable() {
    let controller = Controller::new(
      ControllerConfig {
        worker_threads: 1,
        core_count: 1,
        listen: vec!["127.0.0.1:0".to_string()],
      },
      test_processor_config(),
    )
    .expect("build controller");
    let mut states = controller.subscribe();
    assert_eq!(*states.borrow_and_update(), ControllerState::Created);

    controller.start().await.expect("start");
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), ControllerState::Running);

    controller.stop().await;
    assert_eq!(*states.borrow_and_update(), ControllerState::Stopped);
    assert!(controller.local_addrs().is_empty());
  }
}
