use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Process-wide floor between consecutive outbound broker calls. A
/// monotonically-updated "last call" instant with a sleep to the floor —
/// the same shape as the rate gate in the execution gateway this crate is
/// modeled on, just scoped to one external dependency instead of an order
/// router.
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Default floor used by the live Zerodha-style adapter: 200ms.
    pub fn default_floor() -> Self {
        Self::new(Duration::from_millis(200))
    }

    /// Block until at least `min_interval` has elapsed since the previous
    /// call, then record this call's start time.
    pub async fn wait_turn(&self) {
        let mut guard = self.last_call.lock().await;
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }
}
