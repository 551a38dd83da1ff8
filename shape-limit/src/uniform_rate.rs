use std::ops::ControlFlow;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::Clock;
use crate::Reason;
use crate::TrafficShaper;

/// Virtual time before any request has passed.
const NOT_PASSED: i64 = -1;

/// Uniform rate limiter (virtual scheduling).
///
/// Requests are spaced `1000 / target_rate` milliseconds apart on a single shared
/// virtual timeline. A request arriving before its slot is told how long to wait,
/// unless that wait exceeds `max_queueing_delay`, in which case it is rejected.
#[derive(Debug)]
pub struct UniformRate {
    max_queueing_delay_ms: i64,
    target_rate: f64,
    /// Epoch millis at which the most recently scheduled request passes.
    latest_passed: AtomicI64,
    clock: Clock,
}

impl UniformRate {
    /// Creates a new `UniformRate` shaper.
    ///
    /// # Arguments
    ///
    /// * `max_queueing_delay` - The longest a request may wait for its slot.
    /// * `target_rate` - Requests per second. A rate that is not positive rejects everything.
    pub fn new(max_queueing_delay: Duration, target_rate: f64) -> Self {
        Self::with_clock(max_queueing_delay, target_rate, Clock::new())
    }

    pub fn with_clock(max_queueing_delay: Duration, target_rate: f64, clock: Clock) -> Self {
        let max_queueing_delay_ms =
            i64::try_from(max_queueing_delay.as_millis()).unwrap_or(i64::MAX);
        tracing::debug!(
            max_queueing_delay_ms,
            target_rate,
            "created uniform rate shaper"
        );
        Self {
            max_queueing_delay_ms,
            target_rate,
            latest_passed: AtomicI64::new(NOT_PASSED),
            clock,
        }
    }

    /// The virtual pass time of the most recently scheduled request, if any.
    pub fn latest_passed_millis(&self) -> Option<i64> {
        match self.latest_passed.load(Ordering::Acquire) {
            NOT_PASSED => None,
            millis => Some(millis),
        }
    }

    /// Milliseconds of virtual time `acquire_count` units occupy.
    #[inline]
    fn cost_millis(&self, acquire_count: i32) -> i64 {
        // Float to int casts saturate, so a tiny rate yields i64::MAX rather than wrapping.
        (f64::from(acquire_count) / self.target_rate * 1000.0).round() as i64
    }

    fn reject(&self, wait_ms: i64) -> ControlFlow<Reason, Duration> {
        tracing::debug!(
            wait_ms,
            max_queueing_delay_ms = self.max_queueing_delay_ms,
            "uniform rate rejected request"
        );
        ControlFlow::Break(Reason::QueueingDelay {
            wait: Duration::from_millis(wait_ms.max(0) as u64),
        })
    }
}

impl TrafficShaper for UniformRate {
    fn admit(&self, acquire_count: i32, _prioritized: bool) -> ControlFlow<Reason, Duration> {
        if acquire_count <= 0 {
            return ControlFlow::Continue(Duration::ZERO);
        }
        if self.target_rate.is_nan() || self.target_rate <= 0.0 {
            return ControlFlow::Break(Reason::Closed);
        }

        let now = self.clock.now_millis();
        let cost = self.cost_millis(acquire_count);
        let expected = self.latest_passed.load(Ordering::Acquire).saturating_add(cost);

        if expected <= now {
            // Racing callers may overwrite each other here; only spacing is lost.
            self.latest_passed.store(now, Ordering::Release);
            return ControlFlow::Continue(Duration::ZERO);
        }

        let wait = expected.saturating_sub(now);
        if wait > self.max_queueing_delay_ms {
            return self.reject(wait);
        }

        // Reserve the slot before sleeping so concurrent callers queue behind it.
        // A slot past the end of representable virtual time is never handed out.
        let scheduled = match self
            .latest_passed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |latest| {
                latest.checked_add(cost)
            }) {
            Ok(previous) => previous + cost,
            Err(_) => return self.reject(i64::MAX.saturating_sub(now)),
        };
        let wait = scheduled.saturating_sub(self.clock.now_millis());
        if wait > self.max_queueing_delay_ms {
            self.latest_passed.fetch_sub(cost, Ordering::AcqRel);
            return self.reject(wait);
        }

        if wait > 0 {
            tracing::trace!(wait_ms = wait, "uniform rate queued request");
            ControlFlow::Continue(Duration::from_millis(wait as u64))
        } else {
            ControlFlow::Continue(Duration::ZERO)
        }
    }

    fn kind(&self) -> &'static str {
        "uniform_rate"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Instant;

    use more_asserts::assert_ge;
    use more_asserts::assert_le;

    use super::*;

    const EPOCH: i64 = 1_700_000_000_000;

    fn mock_shaper(max_delay_ms: u64, rate: f64) -> (UniformRate, Arc<quanta::Mock>) {
        let (qc, mock) = quanta::Clock::mock();
        let shaper = UniformRate::with_clock(
            Duration::from_millis(max_delay_ms),
            rate,
            Clock::with_epoch(qc, EPOCH),
        );
        (shaper, mock)
    }

    #[test]
    fn burst_is_spread_over_queueing_delay() {
        // One request every 100ms, queue for at most 500ms.
        let (rl, _mock) = mock_shaper(500, 10.0);

        let waits: Vec<_> = (0..6)
            .map(|_| match rl.admit(1, false) {
                ControlFlow::Continue(wait) => wait.as_millis(),
                ControlFlow::Break(reason) => panic!("unexpected rejection: {reason:?}"),
            })
            .collect();
        assert_eq!(waits, vec![0, 100, 200, 300, 400, 500]);

        // The 7th would need 600ms.
        assert_eq!(
            rl.admit(1, false),
            ControlFlow::Break(Reason::QueueingDelay {
                wait: Duration::from_millis(600)
            })
        );
    }

    #[test]
    fn rejection_leaves_virtual_time_untouched() {
        let (rl, mock) = mock_shaper(500, 10.0);

        for _ in 0..6 {
            assert!(rl.admit(1, false).is_continue());
        }
        let before = rl.latest_passed_millis();
        assert!(rl.admit(1, false).is_break());
        assert_eq!(rl.latest_passed_millis(), before);

        // 100ms later the next request behaves as if the rejected one never happened.
        mock.increment(Duration::from_millis(100));
        assert_eq!(
            rl.admit(1, false),
            ControlFlow::Continue(Duration::from_millis(500))
        );
        assert_eq!(rl.latest_passed_millis(), Some(EPOCH + 600));
    }

    #[test]
    fn zero_delay_admits_at_target_rate() {
        let (rl, mock) = mock_shaper(0, 10.0);

        let mut admitted = 0;
        for _ in 0..1_000 {
            match rl.admit(1, false) {
                ControlFlow::Continue(wait) => {
                    assert!(wait.is_zero(), "Nothing should queue with zero delay");
                    admitted += 1;
                }
                ControlFlow::Break(_) => {}
            }
            mock.increment(Duration::from_millis(1));
        }

        // 1000ms elapsed at 10/s: slots at 0, 100, ... 900.
        assert_eq!(admitted, 10);
    }

    #[test]
    fn weighted_requests_cost_proportionally() {
        let (rl, _mock) = mock_shaper(1_000, 10.0);

        assert!(rl.admit(1, false).is_continue());
        assert_eq!(
            rl.admit(3, false),
            ControlFlow::Continue(Duration::from_millis(300))
        );
        assert_eq!(rl.latest_passed_millis(), Some(EPOCH + 300));
    }

    #[test]
    fn non_positive_acquire_is_a_no_op() {
        let (rl, _mock) = mock_shaper(500, 10.0);

        assert_eq!(rl.admit(0, false), ControlFlow::Continue(Duration::ZERO));
        assert_eq!(rl.admit(-5, true), ControlFlow::Continue(Duration::ZERO));
        assert!(rl.can_pass(0, false));
        assert!(rl.can_pass(-5, false));
        assert_eq!(rl.latest_passed_millis(), None);
    }

    #[test]
    fn non_positive_rate_rejects_everything() {
        for rate in [0.0, -10.0, f64::NAN] {
            let (rl, _mock) = mock_shaper(500, rate);
            assert_eq!(rl.admit(1, false), ControlFlow::Break(Reason::Closed));
            assert!(!rl.can_pass(1, false));
            assert_eq!(rl.latest_passed_millis(), None);
        }
    }

    #[test]
    fn tiny_rate_rejects_without_overflow() {
        let (rl, _mock) = mock_shaper(500, f64::MIN_POSITIVE);

        // The cost saturates, so the wait is rejected before anything is reserved.
        assert!(matches!(
            rl.admit(1, false),
            ControlFlow::Break(Reason::QueueingDelay { .. })
        ));
        assert!(rl.admit(1, false).is_break());
        assert_eq!(rl.latest_passed_millis(), None);
    }

    #[test]
    fn unbounded_queue_never_wraps_virtual_time() {
        // Each unit costs about 5e18ms, so the second reservation would overflow.
        let (rl, _mock) = mock_shaper(u64::MAX, 2e-16);

        let ControlFlow::Continue(first_wait) = rl.admit(1, false) else {
            panic!("first request should queue");
        };
        assert!(!first_wait.is_zero());
        let reserved = rl.latest_passed_millis().unwrap();
        assert_ge!(reserved, EPOCH);

        for _ in 0..3 {
            assert!(matches!(
                rl.admit(1, false),
                ControlFlow::Break(Reason::QueueingDelay { .. })
            ));
            assert_eq!(rl.latest_passed_millis(), Some(reserved));
        }
    }

    #[test]
    fn can_pass_blocks_for_queueing_delay() {
        // 20ms spacing on the real clock.
        let rl = UniformRate::new(Duration::from_millis(200), 50.0);

        assert!(rl.can_pass(1, false));
        let start = Instant::now();
        assert!(rl.can_pass(1, false));
        assert!(rl.can_pass(1, false));
        assert_ge!(start.elapsed(), Duration::from_millis(30));
    }

    #[test]
    fn rollback_keeps_reservations_consistent() {
        let (rl, _mock) = mock_shaper(50, 100.0);
        assert!(rl.admit(1, false).is_continue());

        let rl = Arc::new(rl);
        let barrier = Arc::new(Barrier::new(32));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let rl = Arc::clone(&rl);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    rl.admit(1, false)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let admitted = results.iter().filter(|r| r.is_continue()).count() as i64;

        // 10ms slots within a 50ms queue: never more than five.
        assert_ge!(admitted, 1);
        assert_le!(admitted, 5);
        // Every rejected speculative reservation was rolled back.
        assert_eq!(rl.latest_passed_millis(), Some(EPOCH + 10 * admitted));
        for result in results {
            if let ControlFlow::Continue(wait) = result {
                assert_le!(wait, Duration::from_millis(50));
            }
        }
    }
}
