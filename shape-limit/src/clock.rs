use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use quanta::Instant;

/// Millisecond clock used by the shapers.
///
/// Reports epoch milliseconds, but advances with a monotonic `quanta` clock from
/// the moment it was created, so it never goes backwards while the process runs.
#[derive(Clone, Debug)]
pub struct Clock {
    clock: quanta::Clock,
    /// A fixed point in time (TSC tick) to calculate deltas from.
    anchor: Instant,
    /// Epoch milliseconds at `anchor`.
    epoch_millis: i64,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        let epoch_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Self::with_epoch(quanta::Clock::new(), epoch_millis)
    }

    /// Builds a clock from an explicit `quanta` clock and starting epoch.
    ///
    /// Pair with `quanta::Clock::mock()` for deterministic tests.
    pub fn with_epoch(clock: quanta::Clock, epoch_millis: i64) -> Self {
        let anchor = clock.now();
        Self {
            clock,
            anchor,
            epoch_millis,
        }
    }

    #[inline]
    pub fn now_millis(&self) -> i64 {
        let elapsed = self.clock.now().duration_since(self.anchor).as_millis() as i64;
        self.epoch_millis.saturating_add(elapsed)
    }

    /// Truncates `millis` to the start of its second.
    #[inline]
    pub fn second_boundary(millis: i64) -> i64 {
        millis - millis.rem_euclid(1000)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn mock_clock_advances_from_epoch() {
        let (qc, mock) = quanta::Clock::mock();
        let clock = Clock::with_epoch(qc, 5_000);

        assert_eq!(clock.now_millis(), 5_000);
        mock.increment(Duration::from_millis(1_234));
        assert_eq!(clock.now_millis(), 6_234);
    }

    #[test]
    fn second_boundary_truncates() {
        assert_eq!(Clock::second_boundary(6_234), 6_000);
        assert_eq!(Clock::second_boundary(6_000), 6_000);
        assert_eq!(Clock::second_boundary(999), 0);
    }

    #[test]
    fn system_clock_is_close_to_wall_time() {
        let clock = Clock::new();
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        assert!((clock.now_millis() - wall).abs() < 1_000);
    }
}
