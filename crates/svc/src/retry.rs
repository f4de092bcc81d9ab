// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry-with-backoff for dependency dial-up at startup.

use std::future::Future;
use std::time::Duration;

/// Retry policy: `tries` attempts, sleeping `base + step * attempt`
/// between failures.
#[derive(Debug, Clone, Copy)]
pub struct Retry {
    tries: u32,
    base: Duration,
    step: Duration,
}

impl Retry {
    pub fn new(tries: u32) -> Self {
        Self { tries, base: Duration::from_secs(5), step: Duration::from_secs(1) }
    }

    pub fn with_delays(tries: u32, base: Duration, step: Duration) -> Self {
        Self { tries, base, step }
    }

    /// Run `f` until it succeeds or the attempts are exhausted. Each
    /// failure is logged under `name` and followed by a growing sleep.
    pub async fn run<T, F, Fut>(&self, name: &str, mut f: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut last = None;

        for attempt in 1..=self.tries {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    tracing::warn!(step = name, attempt, err = %e, "dial failed");
                    last = Some(e);

                    if attempt < self.tries {
                        tokio::time::sleep(self.base + self.step * attempt).await;
                    }
                }
            }
        }

        Err(last.unwrap_or_else(|| anyhow::anyhow!("retry {name}: no attempts configured")))
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
