//! Per-source sliding-window rate limiting and retry-with-backoff,
//! generalized from the teacher's Polymarket CLOB rate limiter.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::SourceLimits;

/// Sliding-window limiter scoped to one named bucket (one per
/// marketplace/endpoint). Cheap to clone — the window state is shared.
pub struct SlidingWindowLimiter {
    max_per_window: u32,
    window: Duration,
    state: Mutex<WindowState>,
    name: String,
}

struct WindowState {
    count: u32,
    window_start: std::time::Instant,
}

impl SlidingWindowLimiter {
    pub fn new(name: impl Into<String>, limits: &SourceLimits) -> Self {
        Self {
            max_per_window: limits.requests_per_window,
            window: limits.window,
            state: Mutex::new(WindowState {
                count: 0,
                window_start: std::time::Instant::now(),
            }),
            name: name.into(),
        }
    }

    /// Block until a request slot is available, then reserve it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let elapsed = state.window_start.elapsed();
                if elapsed >= self.window {
                    state.count = 0;
                    state.window_start = std::time::Instant::now();
                }
                if state.count < self.max_per_window {
                    state.count += 1;
                    None
                } else {
                    Some(self.window - elapsed)
                }
            };
            match wait {
                None => return,
                Some(d) if d > Duration::ZERO => {
                    debug!(bucket = %self.name, wait_ms = d.as_millis() as u64, "rate limit wait");
                    sleep(d).await;
                }
                Some(_) => continue,
            }
        }
    }
}

/// Error classification for retry purposes. Adapters map their transport
/// errors into this before handing them to `retry`.
#[derive(Debug)]
pub enum RetryableError {
    /// Network/timeout failure or HTTP 429 — worth retrying.
    Transient(anyhow::Error),
    /// Any other failure (4xx other than 429, parse error, …) — fatal.
    Fatal(anyhow::Error),
}

/// Run `op` with exponential backoff, honoring `limits.max_retries`.
/// Retries only on `RetryableError::Transient`; a `Fatal` error is
/// returned immediately.
pub async fn retry<F, Fut, T>(source: &str, limits: &SourceLimits, mut op: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, RetryableError>>,
{
    let mut backoff_ms = limits.backoff_base_ms;

    for attempt in 0..limits.max_retries {
        match op().await {
            Ok(v) => return Ok(v),
            Err(RetryableError::Fatal(e)) => return Err(e),
            Err(RetryableError::Transient(e)) => {
                warn!(source, attempt = attempt + 1, error = %e, "transient failure, retrying");
                if attempt + 1 < limits.max_retries {
                    sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = ((backoff_ms as f64) * limits.backoff_multiplier) as u64;
                    backoff_ms = backoff_ms.min(limits.backoff_cap_ms);
                }
            }
        }
    }

    anyhow::bail!("max retries exceeded for source {source}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn limiter_allows_burst_up_to_cap() {
        let limits = SourceLimits {
            requests_per_window: 2,
            window: Duration::from_millis(50),
            ..Default::default()
        };
        let limiter = SlidingWindowLimiter::new("test", &limits);
        limiter.acquire().await;
        limiter.acquire().await;
        // third acquire would block until the window resets; just confirm
        // the first two don't panic or deadlock with a timeout wrapper.
        let res = tokio::time::timeout(Duration::from_millis(200), limiter.acquire()).await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let limits = SourceLimits {
            max_retries: 2,
            backoff_base_ms: 1,
            backoff_cap_ms: 2,
            ..Default::default()
        };
        let attempts = AtomicU32::new(0);
        let result: anyhow::Result<()> = retry("test", &limits, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(RetryableError::Transient(anyhow::anyhow!("boom"))) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_stops_immediately_on_fatal() {
        let limits = SourceLimits::default();
        let attempts = AtomicU32::new(0);
        let result: anyhow::Result<()> = retry("test", &limits, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(RetryableError::Fatal(anyhow::anyhow!("unauthorized"))) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
