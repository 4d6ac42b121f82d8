//! Well-known directories.
//!
//! Each lookup respects, in order of precedence:
//! 1. an explicit override variable (`DATA_DIR` / `CONFIG_DIR`)
//! 2. the matching XDG variable, joined with `coreplex`
//! 3. the platform default from the `dirs` crate, joined with `coreplex`

use std::path::PathBuf;

const APP_DIR: &str = "coreplex";

fn resolve(override_var: &str, xdg_var: &str, platform: Option<PathBuf>) -> PathBuf {
  if let Ok(dir) = std::env::var(override_var) {
    return PathBuf::from(dir);
  }

  if let Ok(xdg) = std::env::var(xdg_var) {
    return PathBuf::from(xdg).join(APP_DIR);
  }

  platform.unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR)
}

/// Base directory for runtime data (log files)
pub fn default_data_dir() -> PathBuf {
  resolve("DATA_DIR", "XDG_DATA_HOME", dirs::data_local_dir())
}

/// Directory holding `config.toml`
pub fn default_config_dir() -> PathBuf {
  resolve("CONFIG_DIR", "XDG_CONFIG_HOME", dirs::config_dir())
}
