//! Outbound call rate limiting
//!
//! A token bucket that hands out at most `rate` permits in any window of
//! length `interval`. The bucket remembers when each of the last `rate`
//! permits was issued; a new permit is available once the oldest of them
//! has aged out of the window.

use anyhow::Result;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rate limiter shared by every worker.
#[derive(Debug)]
pub struct RateLimiter {
    rate: usize,
    interval: Duration,
    issued: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter releasing `rate` permits per `interval`.
    pub fn new(rate: usize, interval: Duration) -> Result<Self> {
        if rate == 0 {
            anyhow::bail!("Rate limiter needs at least one permit per interval");
        }
        if interval.is_zero() {
            anyhow::bail!("Rate limiter interval must be greater than zero");
        }
        Ok(Self {
            rate,
            interval,
            issued: Mutex::new(VecDeque::with_capacity(rate)),
        })
    }

    /// Wait until a permit is available and take it.
    ///
    /// Waiters queue on the inner lock in FIFO order, so the one holding it
    /// sleeps on behalf of everyone behind it.
    pub async fn take(&self) {
        let mut issued = self.issued.lock().await;
        loop {
            let now = Instant::now();
            while let Some(&oldest) = issued.front() {
                if now.duration_since(oldest) >= self.interval {
                    issued.pop_front();
                } else {
                    break;
                }
            }

            if issued.len() < self.rate {
                issued.push_back(now);
                return;
            }

            if let Some(&oldest) = issued.front() {
                tokio::time::sleep_until(oldest + self.interval).await;
            }
        }
    }
}
