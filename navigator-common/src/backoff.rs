//! Full-jitter exponential backoff for Edge reconnection: starting at
//! 1s, doubling to a 60s cap, sleep for a random duration in
//! `[0, min(cap, base * 2^attempt)]`.

use std::time::Duration;

pub const RECONNECT_BASE: Duration = Duration::from_secs(1);
pub const RECONNECT_CAP: Duration = Duration::from_secs(60);

pub fn full_jitter(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let base_ms = base.as_millis() as u64;
    let cap_ms = cap.as_millis() as u64;

    let pow = if attempt >= 63 {
        u64::MAX
    } else {
        1u64 << attempt
    };

    let exp_ms = base_ms.saturating_mul(pow);
    let upper = exp_ms.min(cap_ms).max(1);

    let jitter_ms = rand::random_range(0..=upper);
    Duration::from_millis(jitter_ms)
}

/// Tracks reconnect attempts for one session lifetime; resets after a
/// successful handshake.
#[derive(Debug, Default)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = full_jitter(RECONNECT_BASE, RECONNECT_CAP, self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_never_exceeds_cap() {
        for attempt in 0..20 {
            let d = full_jitter(RECONNECT_BASE, RECONNECT_CAP, attempt);
            assert!(d <= RECONNECT_CAP);
        }
    }

    #[test]
    fn reset_restarts_growth_from_base() {
        let mut b = Backoff::new();
        for _ in 0..10 {
            b.next_delay();
        }
        b.reset();
        // attempt=0 bounds delay to [0, base]
        let d = b.next_delay();
        assert!(d <= RECONNECT_BASE);
    }
}
