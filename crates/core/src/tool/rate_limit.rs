use std::sync::{Mutex, PoisonError};

use tokio::time::Instant;

use super::RateLimit;

struct Window {
    start: Option<Instant>,
    count: u32,
}

/// Fixed-window call counter for one tool.
pub(crate) struct RateLimiter {
    limit: RateLimit,
    window: Mutex<Window>,
}

impl RateLimiter {
    #[inline]
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            window: Mutex::new(Window {
                start: None,
                count: 0,
            }),
        }
    }

    /// Takes one call from the current window. Returns `false` if the
    /// window is exhausted.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = window
            .start
            .is_none_or(|start| now.duration_since(start) >= self.limit.window);
        if expired {
            window.start = Some(now);
            window.count = 0;
        }
        if window.count >= self.limit.max_calls {
            return false;
        }
        window.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window() {
        let limiter = RateLimiter::new(RateLimit {
            max_calls: 2,
            window: Duration::from_secs(60),
        });
        assert!(limiter.try_acquire());
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
