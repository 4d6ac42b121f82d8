//! Configuration for the controller, its processor and logging.
//!
//! Config priority: explicit path (`--config`) > user (~/.config/coreplex/config.toml) > defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config {path:?}: {source}")]
  Read { path: PathBuf, source: std::io::Error },
  #[error("Invalid config {path:?}: {source}")]
  Parse { path: PathBuf, source: toml::de::Error },
  #[error("Failed to render config: {0}")]
  Render(#[from] toml::ser::Error),
}

// ============================================================================
// Controller Configuration
// ============================================================================

/// Worker pool and gateway settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
  /// Number of pool workers (0 = one per core)
  pub worker_threads: usize,

  /// Number of cores used for affinity and metrics bucketing (0 = detect)
  pub core_count: usize,

  /// Endpoints to accept WebSocket connections on
  pub listen: Vec<String>,
}

impl Default for ControllerConfig {
  fn default() -> Self {
    Self {
      worker_threads: 0,
      core_count: 0,
      listen: vec![DEFAULT_LISTEN.to_string()],
    }
  }
}

impl ControllerConfig {
  pub fn core_count(&self) -> usize {
    if self.core_count > 0 { self.core_count } else { num_cpus::get() }
  }

  pub fn worker_threads(&self) -> usize {
    if self.worker_threads > 0 {
      self.worker_threads
    } else {
      self.core_count()
    }
  }
}

// ============================================================================
// Processor Configuration
// ============================================================================

/// Tuning for the illustrative computation kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
  /// Synthetic I/O delay for `calculate` in milliseconds (default: 100)
  pub calculate_delay_ms: u64,

  /// `calculate` result = data length * multiplier (default: 100)
  pub calculate_multiplier: u64,

  /// Independent trials run by `heavy_computation` (default: 100)
  pub heavy_trials: usize,

  /// Fan-out width for `process_data` / `heavy_computation` (0 = core count)
  pub parallelism: usize,

  /// Busy-wait iterations per `process_data` chunk (default: 100000)
  pub chunk_spin_iterations: u64,
}

impl Default for ProcessorConfig {
  fn default() -> Self {
    Self {
      calculate_delay_ms: 100,
      calculate_multiplier: 100,
      heavy_trials: 100,
      parallelism: 0,
      chunk_spin_iterations: 100_000,
    }
  }
}

impl ProcessorConfig {
  pub fn parallelism(&self) -> usize {
    if self.parallelism > 0 { self.parallelism } else { num_cpus::get() }
  }
}

// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Log level: "off", "error", "warn", "info", "debug", "trace"
  pub level: String,

  /// Log file rotation when logging to a directory: "daily", "hourly", "never"
  pub rotation: String,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      rotation: "daily".to_string(),
    }
  }
}

// ============================================================================
// Main Configuration
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub controller: ControllerConfig,
  pub processor: ProcessorConfig,
  pub logging: LoggingConfig,
}

impl Config {
  /// Load configuration.
  ///
  /// An explicit path must exist and parse. The user config is optional: a
  /// missing file yields defaults and an invalid one is reported and skipped.
  pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    if let Some(path) = explicit {
      return Self::from_file(path);
    }

    let path = Self::user_config_path();
    if !path.exists() {
      return Ok(Self::default());
    }

    match Self::from_file(&path) {
      Ok(config) => Ok(config),
      Err(e) => {
        warn!("Ignoring user config: {}", e);
        Ok(Self::default())
      }
    }
  }

  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Get the user-level config path
  pub fn user_config_path() -> PathBuf {
    crate::dirs::default_config_dir().join("config.toml")
  }

  /// Render the effective configuration as TOML
  pub fn to_toml(&self) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(self)?)
  }

  /// Generate a default config file as a string
  pub fn generate_template() -> String {
    let defaults = Self::default();
    format!(
      r#"# Coreplex Configuration
# Place in ~/.config/coreplex/config.toml or pass --config <path>

[controller]
# Pool workers; 0 starts one worker per core
worker_threads = {worker_threads}

# Cores used for affinity hints and metrics; 0 detects the machine's count
core_count = {core_count}

# WebSocket endpoints (host:port)
listen = ["{listen}"]

[processor]
# Synthetic delay for "calculate" in milliseconds
calculate_delay_ms = {delay}

# "calculate" returns len(data) * calculate_multiplier
calculate_multiplier = {multiplier}

# Trials run by "heavy_computation"
heavy_trials = {trials}

# Fan-out width for "process_data" and "heavy_computation"; 0 = core count
parallelism = {parallelism}

# Busy-wait iterations per "process_data" chunk
chunk_spin_iterations = {spin}

[logging]
# off, error, warn, info, debug, trace (RUST_LOG overrides)
level = "{level}"

# Rotation for --log-dir: daily, hourly, never
rotation = "{rotation}"
"#,
      worker_threads = defaults.controller.worker_threads,
      core_count = defaults.controller.core_count,
      listen = DEFAULT_LISTEN,
      delay = defaults.processor.calculate_delay_ms,
      multiplier = defaults.processor.calculate_multiplier,
      trials = defaults.processor.heavy_trials,
      parallelism = defaults.processor.parallelism,
      spin = defaults.processor.chunk_spin_iterations,
      level = defaults.logging.level,
      rotation = defaults.logging.rotation,
    )
  }
}
