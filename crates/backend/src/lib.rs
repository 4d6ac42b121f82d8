mod gateway;
mod ledger;
mod pool;
mod processor;
mod queue;

pub mod config;
pub mod dirs;
pub mod protocol;

mod controller;
pub use controller::{Controller, ControllerError, ControllerState};

pub use gateway::GatewayError;
pub use ledger::{CoreMetrics, CorePerformance, MetricsSnapshot};
pub use pool::PoolError;
pub use processor::{Operation, ProcessError};
pub use protocol::{Client, ClientError, ErrorFrame, Reply, Request, Response};

#[cfg(test)]
mod __tests__;
