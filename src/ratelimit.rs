use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Sliding-window request limiter shared by clones of an API client
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<RateLimiterInner>>,
}

#[derive(Debug)]
struct RateLimiterInner {
    max_requests: u32,
    window: Duration,
    timestamps: Vec<Instant>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RateLimiterInner {
                max_requests: max_requests.max(1),
                window,
                timestamps: Vec::new(),
            })),
        }
    }

    /// Wait until a request slot is free, then claim it
    pub async fn acquire(&self) {
        loop {
            let mut inner = self.inner.lock().await;
            let now = Instant::now();
            let window = inner.window;
            inner.timestamps.retain(|&ts| now.duration_since(ts) < window);
            if (inner.timestamps.len() as u32) < inner.max_requests {
                inner.timestamps.push(now);
                return;
            }
            let oldest = inner.timestamps[0];
            let wait = window.saturating_sub(now.duration_since(oldest));
            drop(inner);
            debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests claimed within the current window
    pub async fn in_flight(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let window = inner.window;
        inner.timestamps.retain(|&ts| now.duration_since(ts) < window);
        inner.timestamps.len()
    }
}
