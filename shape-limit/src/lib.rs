//! # shape-limit
//!
//! `shape-limit` provides lock-free traffic shaping controllers for admission control.
//!
//! ## Core Philosophy
//!
//! A shaper is asked, once per incoming request, whether that request may proceed now,
//! proceed after a bounded wait, or must be rejected. Shared state is held in atomics and
//! updated with Compare-And-Swap (CAS) or fetch-and-add, so no caller ever holds a lock
//! while another caller sleeps in its queueing delay.
//!
//! ## Strategies
//!
//! * [`UniformRate`]: virtual scheduling. Each admitted request reserves a slice of virtual
//!   time, smoothing bursts into an even stream at the target rate. Requests that would
//!   have to queue longer than the configured delay are rejected.
//! * [`WarmUp`]: cold-start ramp. Unused capacity accumulates as tokens while traffic is
//!   low; the more tokens stored, the lower the instantaneous allowed rate, so throughput
//!   climbs gradually back to the target after an idle period.
//!
//! ## Example
//!
//! ```rust
//! use shape_limit::TrafficShaper;
//! use shape_limit::UniformRate;
//! use std::time::Duration;
//!
//! // 10 requests per second, queue for at most 500ms.
//! let shaper = UniformRate::new(Duration::from_millis(500), 10.0);
//!
//! if shaper.admit(1, false).is_continue() {
//!     // Request allowed (possibly after waiting)
//! }
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

mod clock;
mod error;
mod rule;
mod stats;
mod uniform_rate;
mod warm_up;

pub use clock::Clock;
pub use error::ConfigError;
pub use rule::ShaperRule;
pub use stats::PassCounter;
pub use stats::StatsSource;
pub use uniform_rate::UniformRate;
pub use warm_up::DEFAULT_COLD_FACTOR;
pub use warm_up::WarmUp;

/// Reasons why a request might be rejected by a shaper.
#[derive(Clone, Debug, PartialEq)]
pub enum Reason {
    /// Admitting the request would mean queueing for longer than allowed.
    QueueingDelay { wait: Duration },
    /// Admitting the request would push the pass rate above the currently allowed rate.
    RateExceeded { allowed: f64 },
    /// The shaper has no usable rate and rejects everything.
    Closed,
}

/// The core trait for all traffic shaping controllers.
///
/// Shapers must be `Send` and `Sync` so a single instance can be shared across
/// threads via `Arc` and serve any number of concurrent callers.
pub trait TrafficShaper: Debug + Send + Sync {
    /// Decides admission for `acquire_count` units without blocking.
    ///
    /// `Continue(wait)` admits the request. A non-zero `wait` is the queueing delay
    /// the caller must observe before proceeding; the slot has already been reserved.
    /// `Break(reason)` rejects it and reserves nothing.
    ///
    /// `prioritized` is accepted for interface uniformity. Neither shaper in this
    /// crate treats prioritized requests differently.
    fn admit(&self, acquire_count: i32, prioritized: bool) -> ControlFlow<Reason, Duration>;

    /// Decides admission and blocks the calling thread for any queueing delay.
    ///
    /// The sleep is not interruptible: once admitted, the call always returns `true`.
    /// Async callers should use [`admit`](TrafficShaper::admit) and await the wait
    /// themselves, which makes it cancellable by dropping the future.
    fn can_pass(&self, acquire_count: i32, prioritized: bool) -> bool {
        match self.admit(acquire_count, prioritized) {
            ControlFlow::Continue(wait) => {
                if !wait.is_zero() {
                    std::thread::sleep(wait);
                }
                true
            }
            ControlFlow::Break(_) => false,
        }
    }

    /// A short, stable name for logs and metric labels.
    fn kind(&self) -> &'static str;
}
