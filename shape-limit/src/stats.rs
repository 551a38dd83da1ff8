use std::fmt::Debug;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::Clock;

const WINDOW_MS: i64 = 1_000;

/// Observed throughput for a protected resource.
///
/// Both readings are requests per second as measured by whatever statistics
/// component backs the resource. Shapers treat them as authoritative.
pub trait StatsSource: Debug + Send + Sync {
    /// Pass rate of the window that is still filling.
    fn current_window_rate(&self) -> f64;

    /// Pass rate of the last complete window.
    fn previous_window_rate(&self) -> f64;
}

/// A one-second bucketed pass counter.
///
/// It maintains the pass count for the current second and for the previous one,
/// which is exactly what [`WarmUp`](crate::WarmUp) consumes. Windows rotate lazily
/// on the next `record`, and reads account for windows that elapsed while idle.
#[derive(Debug)]
pub struct PassCounter {
    current_count: AtomicU64,
    previous_count: AtomicU64,
    /// Epoch millis of the start of the current window.
    current_window_start: AtomicI64,
    clock: Clock,
}

impl Default for PassCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl PassCounter {
    pub fn new() -> Self {
        Self::with_clock(Clock::new())
    }

    pub fn with_clock(clock: Clock) -> Self {
        let start = Clock::second_boundary(clock.now_millis());
        Self {
            current_count: AtomicU64::new(0),
            previous_count: AtomicU64::new(0),
            current_window_start: AtomicI64::new(start),
            clock,
        }
    }

    /// Records `count` admitted units in the current window.
    pub fn record(&self, count: u64) {
        let now = self.clock.now_millis();
        self.rotate(now);
        self.current_count.fetch_add(count, Ordering::AcqRel);
    }

    fn rotate(&self, now: i64) {
        let window_start = self.current_window_start.load(Ordering::Acquire);
        if now < window_start + WINDOW_MS {
            return;
        }

        let new_window_start = Clock::second_boundary(now);
        if self
            .current_window_start
            .compare_exchange(
                window_start,
                new_window_start,
                Ordering::SeqCst,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            // A record that lands between the CAS above and this swap is counted in the
            // window just closed. Nothing is lost; it only shifts by one window.
            let finished = self.current_count.swap(0, Ordering::AcqRel);
            // More than one window went by, so the last complete one saw nothing.
            let previous = if now >= window_start + 2 * WINDOW_MS {
                0
            } else {
                finished
            };
            self.previous_count.store(previous, Ordering::Release);
        }
    }

    /// (current, previous) as they would read after rotating to `now`.
    fn snapshot(&self) -> (u64, u64) {
        let now = self.clock.now_millis();
        let window_start = self.current_window_start.load(Ordering::Acquire);
        let current = self.current_count.load(Ordering::Acquire);
        let previous = self.previous_count.load(Ordering::Acquire);

        if now >= window_start + 2 * WINDOW_MS {
            (0, 0)
        } else if now >= window_start + WINDOW_MS {
            (0, current)
        } else {
            (current, previous)
        }
    }
}

impl StatsSource for PassCounter {
    fn current_window_rate(&self) -> f64 {
        self.snapshot().0 as f64
    }

    fn previous_window_rate(&self) -> f64 {
        self.snapshot().1 as f64
    }
}
