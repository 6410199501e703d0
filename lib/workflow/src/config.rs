//! Engine configuration.
//!
//! Loaded by the host (see the CLI) through the `config` crate; every field
//! has a default so an empty source yields a usable engine.

use serde::Deserialize;
use std::time::Duration;

/// Settings shared by every run an [`Engine`](crate::Engine) starts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Per-attempt timeout for nodes that do not set one, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Retry budget for retrying nodes that do not set one.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Pause between a failed attempt and its retry, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Entries buffered per live log subscriber before it starts lagging.
    #[serde(default = "default_log_channel_capacity")]
    pub log_channel_capacity: usize,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    0
}

fn default_log_channel_capacity() -> usize {
    256
}

impl EngineConfig {
    /// Returns the pause between retry attempts.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            default_max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            log_channel_capacity: default_log_channel_capacity(),
        }
    }
}
