use std::time::Duration;

/// Exponential backoff for stage retries: `base * factor^attempt`, capped.
/// `attempt` counts completed attempts, so the first retry waits `base`.
pub fn backoff_delay(base: Duration, factor: u32, cap: Duration, attempt: u32) -> Duration {
    let mult = factor.checked_pow(attempt).unwrap_or(u32::MAX);
    base.checked_mul(mult).map_or(cap, |d| d.min(cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(5);
    const CAP: Duration = Duration::from_secs(600);

    #[test]
    fn doubles_from_base() {
        assert_eq!(backoff_delay(BASE, 2, CAP, 0), Duration::from_secs(5));
        assert_eq!(backoff_delay(BASE, 2, CAP, 1), Duration::from_secs(10));
        assert_eq!(backoff_delay(BASE, 2, CAP, 2), Duration::from_secs(20));
    }

    #[test]
    fn caps_at_ten_minutes() {
        assert_eq!(backoff_delay(BASE, 2, CAP, 7), CAP);
        assert_eq!(backoff_delay(BASE, 2, CAP, 100), CAP);
    }
}
