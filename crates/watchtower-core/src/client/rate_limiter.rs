//! Token-bucket admission control for outbound lookups.
//!
//! Two limits apply together: a burst budget refilled once per 60s wall-clock
//! window, and a cap on admissions within the trailing 60 seconds. `acquire()`
//! suspends until both allow the request; it never fails.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);
const BURST_WAIT: Duration = Duration::from_secs(1);

struct RateWindow {
    /// Admission timestamps within the trailing window, oldest first.
    requests: Vec<Instant>,
    burst_tokens: u32,
    last_refill: Instant,
}

pub struct RateLimiter {
    requests_per_minute: usize,
    burst: u32,
    inner: Mutex<RateWindow>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: usize, burst: u32) -> Self {
        Self {
            requests_per_minute,
            burst,
            inner: Mutex::new(RateWindow {
                requests: Vec::new(),
                burst_tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Suspend until a request may be admitted.
    ///
    /// Explicit bounded-state loop: each pass either admits or computes a sleep
    /// duration, and the lock is never held across the sleep.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut window = self.inner.lock();
                let now = Instant::now();

                if now.duration_since(window.last_refill) >= WINDOW {
                    window.burst_tokens = self.burst;
                    window.last_refill = now;
                    window.requests.clear();
                }

                if window.burst_tokens == 0 {
                    Some(BURST_WAIT)
                } else {
                    window.requests.retain(|t| now.duration_since(*t) < WINDOW);

                    if window.requests.len() >= self.requests_per_minute {
                        // First retained timestamp is the oldest still in-window.
                        let oldest = window.requests[0];
                        Some(WINDOW - now.duration_since(oldest))
                    } else {
                        window.requests.push(now);
                        window.burst_tokens -= 1;
                        None
                    }
                }
            };

            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_budget_limits_instantaneous_admissions() {
        let limiter = Arc::new(RateLimiter::new(100, 3));

        // Three admissions pass without advancing time.
        for _ in 0..3 {
            let before = Instant::now();
            limiter.acquire().await;
            assert_eq!(Instant::now(), before);
        }

        // The fourth must wait for the 60s window refill.
        let before = Instant::now();
        limiter.acquire().await;
        assert!(Instant::now().duration_since(before) >= Duration::from_secs(59));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_window_cap() {
        let limiter = Arc::new(RateLimiter::new(2, 100));

        limiter.acquire().await;
        limiter.acquire().await;

        let before = Instant::now();
        limiter.acquire().await;
        // Admitted only after the oldest timestamp ages out of the window.
        assert!(Instant::now().duration_since(before) >= Duration::from_secs(59));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_restores_burst() {
        let limiter = Arc::new(RateLimiter::new(100, 1));

        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(61)).await;

        let before = Instant::now();
        limiter.acquire().await;
        assert_eq!(Instant::now(), before);
    }
}
