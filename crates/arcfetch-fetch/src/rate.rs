//! Byte-rate pacing.

use parking_lot::Mutex;
use tokio::time::{Duration, Instant};

/// Token bucket refilled continuously at `refill_per_sec` tokens, holding at
/// most `capacity`. One token is one byte.
///
/// Reservations may overdraw the bucket; the caller then waits until the
/// debt has been refilled. This keeps chunks larger than the capacity from
/// stalling forever.
#[derive(Debug)]
pub struct TokenBucket {
    capacity:       f64,
    refill_per_sec: f64,
    state:          Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens:      f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u64, refill_per_sec: u64) -> Self {
        let capacity = capacity.max(1) as f64;
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(1) as f64,
            state: Mutex::new(BucketState { tokens: capacity, last_refill: Instant::now() }),
        }
    }

    /// A bucket allowing one second worth of burst.
    pub fn per_second(bytes_per_sec: u64) -> Self { Self::new(bytes_per_sec, bytes_per_sec) }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Debits `bytes` and returns how long the caller should wait before
    /// continuing.
    pub fn reserve(&self, bytes: u64) -> Duration {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens -= bytes as f64;
        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.refill_per_sec)
        }
    }

    pub async fn acquire(&self, bytes: u64) {
        let wait = self.reserve(bytes);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
