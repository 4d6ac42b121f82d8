//! Config commands

use std::path::Path;

use anyhow::{Result, bail};
use coreplex::config::Config;

/// Print the effective configuration
pub fn cmd_config_show(explicit: Option<&Path>) -> Result<()> {
  let config = Config::load(explicit)?;

  match explicit {
    Some(path) => println!("Using config: {:?}", path),
    None => {
      let user_config = Config::user_config_path();
      if user_config.exists() {
        println!("Using user config: {:?}", user_config);
      } else {
        println!("Using default configuration (no config file found)");
      }
    }
  }
  println!();

  println!("{}", config.to_toml()?);
  Ok(())
}

/// Write the default configuration template
pub fn cmd_config_init(explicit: Option<&Path>, force: bool) -> Result<()> {
  let config_path = explicit.map(Path::to_path_buf).unwrap_or_else(Config::user_config_path);

  if config_path.exists() && !force {
    bail!("Config file already exists: {:?} (use --force to overwrite)", config_path);
  }

  if let Some(parent) = config_path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  std::fs::write(&config_path, Config::generate_template())?;

  println!("Created config: {:?}", config_path);
  println!("Edit the file to customize settings.");
  Ok(())
}
