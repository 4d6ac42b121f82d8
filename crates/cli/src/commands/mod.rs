//! CLI command implementations

mod config;
mod send;
mod serve;

pub use config::{cmd_config_init, cmd_config_show};
pub use send::cmd_send;
pub use serve::{ServeArgs, cmd_serve};
