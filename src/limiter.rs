//! Token-bucket rate limiter for the recognition request stream.
//!
//! ## Why a bucket and not a fixed interval?
//!
//! Remote OCR/VLM APIs meter in requests-per-minute but tolerate short
//! bursts. A token bucket lets a cold start fire up to `capacity` requests
//! instantly (filling the concurrency window quickly), then settles to the
//! sustained refill rate. A fixed inter-request delay would waste the burst
//! allowance and stretch every run by `capacity × interval`.
//!
//! All state updates happen under one async mutex, so concurrent page tasks
//! are serialised through `acquire` and the token count can never be
//! corrupted — and a caller that has to wait holds the lock while sleeping,
//! which queues the callers behind it exactly like the upstream API would.

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter shared by every concurrent page task.
pub struct TokenBucket {
    /// Tokens added per second.
    rate: f64,
    /// Maximum bucket size (burst capacity).
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a bucket that starts full.
    ///
    /// `rate` must be > 0; a zero or negative rate is clamped to a minimal
    /// positive rate rather than allowed to divide by zero.
    pub fn new(rate: f64, capacity: u32) -> Self {
        let rate = if rate > 0.0 { rate } else { f64::MIN_POSITIVE };
        Self {
            rate,
            capacity: f64::from(capacity.max(1)),
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity.max(1)),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Convenience constructor from a requests-per-minute budget.
    pub fn per_minute(requests_per_minute: u32, capacity: u32) -> Self {
        Self::new(f64::from(requests_per_minute) / 60.0, capacity)
    }

    /// Acquire `cost` tokens, sleeping if the bucket is short.
    ///
    /// Returns the time waited. Requesting more than `capacity` tokens
    /// always waits (never fails): the deficit is priced at the refill rate.
    pub async fn acquire(&self, cost: u32) -> Duration {
        let cost = f64::from(cost);
        let mut state = self.state.lock().await;

        // Continuous refill based on elapsed wall-clock time.
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;

        if state.tokens < cost {
            let deficit = cost - state.tokens;
            let wait = Duration::from_secs_f64(deficit / self.rate);
            sleep(wait).await;
            state.tokens = 0.0;
            wait
        } else {
            state.tokens -= cost;
            Duration::ZERO
        }
    }

    /// Acquire a single token.
    pub async fn acquire_one(&self) -> Duration {
        self.acquire(1).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_up_to_capacity_is_instant() {
        let bucket = TokenBucket::new(1.0, 5);
        for _ in 0..5 {
            assert_eq!(bucket.acquire_one().await, Duration::ZERO);
        }
        // Sixth acquisition must wait for a refill.
        let waited = bucket.acquire_one().await;
        assert!(waited > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_matches_deficit_over_rate() {
        let bucket = TokenBucket::new(2.0, 1);
        assert_eq!(bucket.acquire_one().await, Duration::ZERO);
        // Bucket empty; one token at 2/s costs 0.5s.
        let waited = bucket.acquire_one().await;
        assert_eq!(waited, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_capacity() {
        let bucket = TokenBucket::new(100.0, 3);
        // Drain the burst.
        for _ in 0..3 {
            bucket.acquire_one().await;
        }
        // A long idle period must not accumulate more than `capacity` tokens.
        tokio::time::advance(Duration::from_secs(60)).await;
        for _ in 0..3 {
            assert_eq!(bucket.acquire_one().await, Duration::ZERO);
        }
        assert!(bucket.acquire_one().await > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_request_waits_instead_of_failing() {
        let bucket = TokenBucket::new(10.0, 2);
        // Cost 4 exceeds capacity 2: the call waits for the deficit.
        let waited = bucket.acquire(4).await;
        assert!(waited > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn never_returns_negative_wait_under_contention() {
        use std::sync::Arc;
        let bucket = Arc::new(TokenBucket::new(50.0, 4));
        let mut handles = Vec::new();
        for _ in 0..12 {
            let b = Arc::clone(&bucket);
            handles.push(tokio::spawn(async move { b.acquire_one().await }));
        }
        for h in handles {
            let waited = h.await.expect("task");
            assert!(waited >= Duration::ZERO);
        }
    }

    #[test]
    fn zero_rate_is_clamped() {
        // Construction must not panic or set up a division by zero.
        let _ = TokenBucket::new(0.0, 1);
    }
}
