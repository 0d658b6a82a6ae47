//! Retry backoff and notification throttling.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;

/// Backoff for the `k`-th retry: `min(base * 2^k, cap)` with ±20% jitter.
///
/// Attempts are unbounded; the cap keeps a long-blocked envelope probing
/// once a minute instead of drifting out indefinitely.
pub fn backoff_delay(attempts: u32, base: Duration, cap: Duration) -> Duration {
    let exp = attempts.min(10);
    let raw = base.as_secs_f64() * f64::from(1u32 << exp);
    let capped = raw.min(cap.as_secs_f64());
    let jitter = rand::rng().random_range(0.8..=1.2);
    Duration::from_secs_f64(capped * jitter)
}

/// Per-key rate limiter for operator notifications.
///
/// The key is `(envelope_id, reason_kind)`: each envelope notifies once per
/// blocking reason per window, so a stuck envelope stays visible without
/// flooding the operator on every sweep.
#[derive(Debug)]
pub struct NotifyThrottle {
    window: Duration,
    last: HashMap<(String, String), Instant>,
}

impl NotifyThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    /// Whether a notification for this envelope/reason may fire now.
    /// Recording happens on `true`; callers must then actually notify.
    pub fn should_emit(&mut self, envelope_id: &str, reason_kind: &str) -> bool {
        let key = (envelope_id.to_string(), reason_kind.to_string());
        let now = Instant::now();
        match self.last.get(&key) {
            Some(at) if now.duration_since(*at) < self.window => false,
            _ => {
                self.last.insert(key, now);
                true
            }
        }
    }

    /// Drop throttle state for an envelope that left the queue.
    pub fn forget(&mut self, envelope_id: &str) {
        self.last.retain(|(id, _), _| id != envelope_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_secs(2);
        let cap = Duration::from_secs(60);

        for (attempts, nominal) in [(0u32, 2.0f64), (1, 4.0), (2, 8.0), (3, 16.0)] {
            let d = backoff_delay(attempts, base, cap).as_secs_f64();
            assert!(d >= nominal * 0.8 - 1e-9, "attempt {attempts}: {d}");
            assert!(d <= nominal * 1.2 + 1e-9, "attempt {attempts}: {d}");
        }

        // Deep attempt counts saturate at the cap (± jitter).
        let d = backoff_delay(30, base, cap).as_secs_f64();
        assert!((48.0..=72.0).contains(&d), "capped delay {d}");
    }

    #[test]
    fn throttle_emits_once_per_window() {
        let mut throttle = NotifyThrottle::new(Duration::from_secs(60));
        assert!(throttle.should_emit("E1", "StaleCapability"));
        assert!(!throttle.should_emit("E1", "StaleCapability"));
        // Different reason or envelope is independent.
        assert!(throttle.should_emit("E1", "UnknownRecipient"));
        assert!(throttle.should_emit("E2", "StaleCapability"));
    }

    #[test]
    fn zero_window_always_emits() {
        let mut throttle = NotifyThrottle::new(Duration::ZERO);
        assert!(throttle.should_emit("E1", "r"));
        assert!(throttle.should_emit("E1", "r"));
    }

    #[test]
    fn forget_resets_envelope() {
        let mut throttle = NotifyThrottle::new(Duration::from_secs(60));
        assert!(throttle.should_emit("E1", "r"));
        throttle.forget("E1");
        assert!(throttle.should_emit("E1", "r"));
    }
}
