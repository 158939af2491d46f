//! Node and dispatcher configuration.

use crate::dispatch::map::MapOperation;
use crate::operation::types::Operation;
use crate::storage::partitioner::DEFAULT_PARTITIONS;
use crate::storage::remote::RemoteConfig;

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// Settings shared by every dispatcher a node creates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatcherConfig {
    /// Used when an exchange carries no operation header.
    pub default_operation: Option<Operation>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),
    #[error("operation '{0}' is not supported on maps")]
    UnsupportedOperation(Operation),
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "grid-dispatch",
    about = "Performs the map operations encoded in message headers"
)]
pub struct NodeConfig {
    /// HTTP address to serve on.
    #[arg(long, default_value = "127.0.0.1:5701")]
    pub bind: SocketAddr,

    /// Base URL of a grid node to use instead of hosting the maps here.
    #[arg(long)]
    pub grid: Option<String>,

    /// Local partitions per hosted map.
    #[arg(long, default_value_t = DEFAULT_PARTITIONS)]
    pub partitions: u32,

    /// Operation (name or code) for exchanges without an operation header.
    #[arg(long)]
    pub default_operation: Option<String>,

    #[arg(long, default_value_t = 500)]
    pub remote_timeout_ms: u64,

    #[arg(long, default_value_t = 30_000)]
    pub remote_lock_timeout_ms: u64,

    #[arg(long, default_value_t = 3)]
    pub remote_attempts: usize,

    /// Seconds between grid stats reports; 0 disables them.
    #[arg(long, default_value_t = 5)]
    pub stats_interval_secs: u64,

    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,
}

impl NodeConfig {
    pub fn dispatcher_config(&self) -> Result<DispatcherConfig, ConfigError> {
        let default_operation = self
            .default_operation
            .as_deref()
            .map(parse_operation)
            .transpose()?;

        if let Some(operation) = default_operation
            && MapOperation::from_operation(operation).is_none()
        {
            return Err(ConfigError::UnsupportedOperation(operation));
        }

        Ok(DispatcherConfig { default_operation })
    }

    pub fn remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            timeout: Duration::from_millis(self.remote_timeout_ms),
            lock_timeout: Duration::from_millis(self.remote_lock_timeout_ms),
            attempts: self.remote_attempts,
        }
    }
}

/// Accepts a code (`3`) or a name (`get`).
pub fn parse_operation(text: &str) -> Result<Operation, ConfigError> {
    let decoded = match text.trim().parse::<i64>() {
        Ok(code) => Operation::from_code(code),
        Err(_) => Operation::from_name(text),
    };
    decoded.ok_or_else(|| ConfigError::UnknownOperation(text.to_string()))
}
