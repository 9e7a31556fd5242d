//! Retry policy for backing-document I/O: bounded exponential backoff.

use std::io;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::{ForemanError, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total tries including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(10),
            multiplier: 2.0,
            max_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the `attempts`-th failure (1-indexed):
    /// `base_delay * multiplier^(attempts - 1)`, capped at `max_delay`.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }

    /// `next_delay` scaled into `[50%, 100%]` so racing workers spread out.
    pub fn jittered_delay(&self, attempts: u32) -> Duration {
        let factor = 0.5 + rand::random::<f64>() * 0.5;
        self.next_delay(attempts).mul_f64(factor)
    }

    /// Run `op`, retrying transient failures until the budget is spent.
    pub fn run<T>(&self, path: &Path, mut op: impl FnMut() -> io::Result<T>) -> Result<T> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if is_transient(&err) && attempts < max_attempts => {
                    let delay = self.jittered_delay(attempts);
                    debug!(path = %path.display(), attempts, ?delay, error = %err, "transient I/O failure, retrying");
                    std::thread::sleep(delay);
                }
                Err(err) if is_transient(&err) => {
                    return Err(ForemanError::TransientIo {
                        path: path.to_path_buf(),
                        attempts,
                        source: err,
                    });
                }
                Err(err) => return Err(ForemanError::io(path, err)),
            }
        }
    }
}

pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ResourceBusy
    )
}
