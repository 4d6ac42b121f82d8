//! Coreplex CLI - multi-worker WebSocket request controller

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod logging;

use commands::{ServeArgs, cmd_config_init, cmd_config_show, cmd_send, cmd_serve};
use logging::{init_cli_logging, init_serve_logging};

#[derive(Parser)]
#[command(name = "coreplex")]
#[command(about = "Multi-worker request controller with per-core metrics")]
#[command(after_help = "\
QUICK START:
  coreplex config init                                  # Write the default config
  coreplex serve                                        # Start the controller
  coreplex send --operation calculate --data hello      # Send one request")]
struct Cli {
  /// Config file (default: ~/.config/coreplex/config.toml)
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `coreplex config`
#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Print the effective configuration
  Show,
  /// Write the default configuration file
  Init {
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
  },
}

#[derive(Subcommand)]
enum Commands {
  /// Run the controller until ctrl-c
  Serve {
    /// Number of pool workers (default: one per core)
    #[arg(short, long)]
    workers: Option<usize>,
    /// Number of cores for affinity and metrics (default: detected)
    #[arg(long)]
    cores: Option<usize>,
    /// Endpoint to listen on; repeat for several
    #[arg(short, long, value_name = "ADDR")]
    listen: Vec<String>,
    /// Write logs to rolling files instead of the console (default DIR: <data dir>/logs)
    #[arg(long, value_name = "DIR", num_args = 0..=1)]
    log_dir: Option<Option<PathBuf>>,
  },
  /// Send one request and print the reply
  Send {
    /// Controller endpoint
    #[arg(long, default_value = "ws://127.0.0.1:8080/")]
    url: String,
    /// Operation name (calculate, process_data, heavy_computation)
    #[arg(short, long)]
    operation: String,
    /// Request data
    #[arg(short, long, default_value = "")]
    data: String,
    /// Extra parameters as a JSON object
    #[arg(short, long, value_name = "JSON")]
    parameters: Option<String>,
  },
  /// Manage configuration
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  match cli.command {
    Commands::Serve {
      workers,
      cores,
      listen,
      log_dir,
    } => {
      let config = coreplex::config::Config::load(cli.config.as_deref())?;
      let log_dir = log_dir.map(|dir| dir.unwrap_or_else(|| coreplex::dirs::default_data_dir().join("logs")));
      let _guard = init_serve_logging(&config.logging, log_dir.as_deref());
      cmd_serve(
        config,
        ServeArgs {
          workers,
          cores,
          listen,
        },
      )
      .await
    }
    Commands::Send {
      url,
      operation,
      data,
      parameters,
    } => {
      init_cli_logging();
      cmd_send(&url, &operation, &data, parameters.as_deref()).await
    }
    Commands::Config { command } => {
      init_cli_logging();
      match command {
        ConfigCommand::Show => cmd_config_show(cli.config.as_deref()),
        ConfigCommand::Init { force } => cmd_config_init(cli.config.as_deref(), force),
      }
    }
  }
}
