//! Serve command

use anyhow::{Context, Result};
use coreplex::{Controller, config::Config};
use tokio::signal;
use tracing::{info, warn};

/// Command-line overrides for the `[controller]` section
#[derive(Debug, Default)]
pub struct ServeArgs {
  pub workers: Option<usize>,
  pub cores: Option<usize>,
  pub listen: Vec<String>,
}

/// Run the controller until ctrl-c, drain it, then print the final metrics.
pub async fn cmd_serve(mut config: Config, args: ServeArgs) -> Result<()> {
  if let Some(workers) = args.workers {
    config.controller.worker_threads = workers;
  }
  if let Some(cores) = args.cores {
    config.controller.core_count = cores;
  }
  if !args.listen.is_empty() {
    config.controller.listen = args.listen;
  }

  let controller = Controller::new(config.controller, config.processor).context("Failed to build controller")?;
  controller.start().await.context("Failed to start controller")?;

  for addr in controller.local_addrs() {
    println!("Listening on ws://{addr}/");
  }
  println!(
    "{} workers over {} cores. Press ctrl-c to stop.",
    controller.worker_count(),
    controller.core_count()
  );

  if let Err(e) = signal::ctrl_c().await {
    warn!("Failed to listen for ctrl-c: {}", e);
  } else {
    info!("Received ctrl-c, shutting down...");
  }

  controller.stop().await;

  let metrics = controller.metrics();
  println!("{}", serde_json::to_string_pretty(&metrics)?);
  Ok(())
}
