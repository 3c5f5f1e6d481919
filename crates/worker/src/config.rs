//! Configuration for the worker process
//!
//! Loads configuration from environment variables.

use crate::RunnerConfig;
use anyhow::{Context, Result};
use std::env;
use tokio::time::Duration;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Tick period in seconds
    pub poll_interval_secs: u64,

    /// Maximum tasks claimed per workspace per tick
    pub batch_size: i64,

    /// How often the queue-depth status line is logged, in seconds
    pub status_log_interval_secs: u64,
}

impl WorkerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            poll_interval_secs: env::var("WORKER_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("WORKER_POLL_INTERVAL_SECS must be a valid integer")?,

            batch_size: env::var("WORKER_BATCH_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("WORKER_BATCH_SIZE must be a valid integer")?,

            status_log_interval_secs: env::var("WORKER_STATUS_LOG_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("WORKER_STATUS_LOG_INTERVAL_SECS must be a valid integer")?,
        })
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            batch_size: self.batch_size,
            status_log_interval: Duration::from_secs(self.status_log_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_config_mirrors_the_env_values() {
        let config = WorkerConfig {
            poll_interval_secs: 5,
            batch_size: 20,
            status_log_interval_secs: 120,
        };
        let runner = config.runner_config();
        assert_eq!(runner.interval, Duration::from_secs(5));
        assert_eq!(runner.batch_size, 20);
        assert_eq!(runner.status_log_interval, Duration::from_secs(120));
    }
}
