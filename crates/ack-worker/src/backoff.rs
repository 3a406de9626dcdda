use std::time::Duration;

/// Exponential backoff with a ceiling.
///
/// `delay(n) = min(cap, base * 2^(n-1))` for the n-th failed attempt.
/// Deterministic: the same attempt always yields the same delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Delay before retrying after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.cap, |d| d.min(self.cap))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(3600))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn doubles_until_cap() {
        let policy = BackoffPolicy::new(Duration::from_secs(30), Duration::from_secs(300));
        let delays: Vec<u64> = (1..=6).map(|n| policy.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![30, 60, 120, 240, 300, 300]);
    }

    #[test]
    fn attempt_zero_uses_base() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(30));
        assert_eq!(policy.delay(1), Duration::from_secs(30));
    }

    #[test]
    fn huge_attempts_saturate() {
        let policy = BackoffPolicy::new(Duration::from_secs(u64::MAX / 4), Duration::MAX);
        assert_eq!(policy.delay(u32::MAX), Duration::MAX);
    }

    proptest! {
        #[test]
        fn never_exceeds_cap_and_never_shrinks(
            base_ms in 1u64..10_000,
            cap_ms in 1u64..10_000_000,
            attempt in 1u32..64,
        ) {
            let policy = BackoffPolicy::new(
                Duration::from_millis(base_ms),
                Duration::from_millis(cap_ms),
            );
            let this = policy.delay(attempt);
            let next = policy.delay(attempt + 1);
            prop_assert!(this <= policy.cap());
            prop_assert!(next >= this);
            if this < policy.cap() {
                prop_assert!(next > this);
            }
        }
    }
}
