//! Monotonic time for budget accounting and log timestamps.

use nix::sys::time::TimeSpec;
use std::time::{Duration, Instant};

/// Current monotonic instant.
pub fn now() -> Instant {
    Instant::now()
}

/// `later - earlier`, saturating to zero when `later` is the earlier one.
pub fn since(later: Instant, earlier: Instant) -> Duration {
    later.saturating_duration_since(earlier)
}

/// Whole-seconds and nanosecond-remainder split for the kernel timeout
/// interface.
pub fn to_timespec(duration: Duration) -> TimeSpec {
    TimeSpec::new(duration.as_secs() as i64, duration.subsec_nanos() as i64)
}

/// Fixed-point seconds with nanosecond precision, as written to the race log.
pub fn fixed_seconds(duration: Duration) -> String {
    format!("{}.{:09}", duration.as_secs(), duration.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtraction_saturates_to_zero() {
        let earlier = now();
        let later = now();
        assert_eq!(since(earlier, later), Duration::ZERO);
        assert!(since(later, earlier) < Duration::from_secs(1));
    }

    #[test]
    fn timespec_split() {
        let ts = to_timespec(Duration::new(3, 250_000_000));
        assert_eq!(ts.tv_sec(), 3);
        assert_eq!(ts.tv_nsec(), 250_000_000);
    }

    #[test]
    fn fixed_point_formatting() {
        assert_eq!(fixed_seconds(Duration::new(0, 123_456)), "0.000123456");
        assert_eq!(fixed_seconds(Duration::new(12, 0)), "12.000000000");
        assert_eq!(
            fixed_seconds(Duration::new(1, 999_999_999)),
            "1.999999999"
        );
    }
}
