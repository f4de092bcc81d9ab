// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

/// Configuration for the toggle service.
#[derive(Debug, Clone, Parser)]
#[command(name = "togglesvc", version, about)]
pub struct SvcConfig {
    /// Catalog store DSN (Postgres).
    #[arg(long, env = "APP_DB")]
    pub db: String,

    /// Session store DSN (Redis).
    #[arg(long, env = "APP_REDIS")]
    pub redis: String,

    /// Address to serve HTTP on (host:port).
    #[arg(long, env = "APP_ADDR")]
    pub addr: String,

    /// Session liveness TTL as a human duration, e.g. "30m".
    #[arg(long, env = "APP_EXPIRATION")]
    pub expiration: String,

    /// Reconciler sweep interval in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "APP_SWEEP_INTERVAL_MS")]
    pub sweep_interval_ms: u64,

    /// Reconciler inbox capacity.
    #[arg(long, default_value_t = 128, env = "APP_TRACKER_CAPACITY")]
    pub tracker_capacity: usize,

    /// Deadline for handing a session ID to the reconciler, in milliseconds.
    #[arg(long, default_value_t = 500, env = "APP_TRACKER_WAIT_MS")]
    pub tracker_wait_ms: u64,

    /// HTTP request timeout in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "APP_HTTP_TIMEOUT_MS")]
    pub http_timeout_ms: u64,
}

impl SvcConfig {
    /// Parsed session TTL.
    pub fn session_ttl(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.expiration)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn tracker_wait(&self) -> Duration {
        Duration::from_millis(self.tracker_wait_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
