//! Exponential backoff with jitter (§5): "initial 500ms, cap 2s, max
//! attempts 3 for control paths, unbounded for the background sync loop
//! with the same ceiling", grounded in the retry conventions visible
//! throughout this line of client-sync code's HTTP handling.

use std::time::Duration;

use rand::Rng;

/// Retry tunables, constructed once and threaded down (§9 "global mutable
/// state" — never a bare constant read ad hoc at call sites).
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub cap_ms: u64,
    /// `Some(n)` bounds control-path retries at `n` attempts; `None` means
    /// the background sync loop retries forever at the capped delay.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { base_ms: 500, cap_ms: 2_000, max_attempts: Some(3) }
    }
}

/// The deterministic exponential component: `min(cap_ms, base_ms *
/// 2^(attempt.saturating_sub(1)))`. `attempt` is 1-indexed (the first
/// retry is attempt 1).
pub fn capped_exponential_ms(base_ms: u64, cap_ms: u64, attempt: u32) -> u64 {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(cap_ms)
}

/// The delay to sleep before retry number `attempt`, with up to 50% jitter
/// added on top of the deterministic exponential component so that many
/// clients retrying at once do not all wake in lockstep.
pub fn delay_for_attempt(config: BackoffConfig, attempt: u32) -> Duration {
    let base = capped_exponential_ms(config.base_ms, config.cap_ms, attempt);
    let jitter = rand::thread_rng().gen_range(0..=base / 2 + 1);
    Duration::from_millis(base + jitter)
}

/// Whether the caller should give up after `attempt` failed attempts
/// (control paths only; the background loop never gives up).
pub fn exhausted(config: BackoffConfig, attempt: u32) -> bool {
    matches!(config.max_attempts, Some(max) if attempt >= max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_monotonically_until_the_cap() {
        let d1 = capped_exponential_ms(500, 2_000, 1);
        let d2 = capped_exponential_ms(500, 2_000, 2);
        let d3 = capped_exponential_ms(500, 2_000, 3);
        assert!(d1 <= d2);
        assert!(d2 <= d3);
    }

    #[test]
    fn never_exceeds_the_cap() {
        for attempt in 1..20 {
            assert!(capped_exponential_ms(500, 2_000, attempt) <= 2_000);
        }
    }

    #[test]
    fn first_attempt_is_the_base_delay() {
        assert_eq!(capped_exponential_ms(500, 2_000, 1), 500);
    }

    #[test]
    fn jittered_delay_never_exceeds_one_and_a_half_times_the_cap() {
        let config = BackoffConfig::default();
        for attempt in 1..10 {
            let d = delay_for_attempt(config, attempt);
            assert!(d.as_millis() as u64 <= config.cap_ms + config.cap_ms / 2 + 1);
        }
    }

    #[test]
    fn control_path_is_bounded_background_loop_is_not() {
        let control = BackoffConfig { max_attempts: Some(3), ..Default::default() };
        assert!(exhausted(control, 3));
        assert!(!exhausted(control, 2));

        let background = BackoffConfig { max_attempts: None, ..Default::default() };
        assert!(!exhausted(background, 1_000));
    }
}
