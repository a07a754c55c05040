//! Server Configuration
//!
//! Command-line flags for the listener, logging and every sweeper knob.
//! Sweeper flags are validated into an [`ExpiryConfig`] before the server
//! starts.

use crate::storage::ExpiryConfig;
use clap::Parser;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;

/// Rejected flag combinations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--{0} must be greater than zero")]
    Zero(&'static str),

    #[error("sweep intervals must satisfy min <= base <= max (got {min_ms} / {base_ms} / {max_ms} ms)")]
    IntervalOrder { min_ms: u64, base_ms: u64, max_ms: u64 },
}

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "chronokv", version, about = "chronokv: in-memory key-value store with key expiry")]
pub struct Config {
    /// Host to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Starting delay between sweeper cycles
    #[arg(long, default_value_t = 100)]
    pub sweep_interval_ms: u64,

    /// Shortest delay the sweeper speeds up to
    #[arg(long, default_value_t = 10)]
    pub sweep_min_interval_ms: u64,

    /// Longest delay the sweeper slows down to
    #[arg(long, default_value_t = 1000)]
    pub sweep_max_interval_ms: u64,

    /// Volatile keys sampled per shard visit
    #[arg(long, default_value_t = 20)]
    pub sweep_sample_size: usize,

    /// Shards visited per sweeper pass
    #[arg(long, default_value_t = 16)]
    pub sweep_shards_per_cycle: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            log_level: "info".to_string(),
            sweep_interval_ms: 100,
            sweep_min_interval_ms: 10,
            sweep_max_interval_ms: 1000,
            sweep_sample_size: 20,
            sweep_shards_per_cycle: 16,
        }
    }
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("sweep-interval-ms", self.sweep_interval_ms),
            ("sweep-min-interval-ms", self.sweep_min_interval_ms),
            ("sweep-max-interval-ms", self.sweep_max_interval_ms),
            ("sweep-sample-size", self.sweep_sample_size as u64),
            ("sweep-shards-per-cycle", self.sweep_shards_per_cycle as u64),
        ];
        if let Some((flag, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero(*flag));
        }

        if !(self.sweep_min_interval_ms <= self.sweep_interval_ms
            && self.sweep_interval_ms <= self.sweep_max_interval_ms)
        {
            return Err(ConfigError::IntervalOrder {
                min_ms: self.sweep_min_interval_ms,
                base_ms: self.sweep_interval_ms,
                max_ms: self.sweep_max_interval_ms,
            });
        }

        Ok(())
    }

    /// Sweeper settings, validated. Thresholds and pass limit keep their defaults.
    pub fn expiry_config(&self) -> Result<ExpiryConfig, ConfigError> {
        self.validate()?;

        Ok(ExpiryConfig {
            base_interval: Duration::from_millis(self.sweep_interval_ms),
            min_interval: Duration::from_millis(self.sweep_min_interval_ms),
            max_interval: Duration::from_millis(self.sweep_max_interval_ms),
            sample_size: self.sweep_sample_size,
            shards_per_cycle: self.sweep_shards_per_cycle,
            ..ExpiryConfig::default()
        })
    }
}
