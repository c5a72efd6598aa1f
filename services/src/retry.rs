use log::warn;
use std::future::Future;
use std::time::Duration;

use crate::error::LedgerResult;

/// How often a transactional unit is re-run after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Re-runs after the first attempt. `0` disables retrying.
    pub attempts: u32,
    /// Pause before the first re-run; the n-th re-run waits `n * backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Runs `op`, re-running it while it fails transiently and attempts remain.
    /// Rejections are returned straight away.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> LedgerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(err) if err.is_transient() && attempt < self.attempts => {
                    attempt += 1;
                    let delay = self.backoff * attempt;
                    warn!(
                        "{label} failed: {err}; retry {attempt}/{} in {delay:?}",
                        self.attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}
