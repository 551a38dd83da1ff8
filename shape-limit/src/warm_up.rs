use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::Clock;
use crate::ConfigError;
use crate::Reason;
use crate::StatsSource;
use crate::TrafficShaper;

/// Ratio between the target rate and the coldest allowed rate, unless configured.
pub const DEFAULT_COLD_FACTOR: u32 = 3;

/// Warm-up (cold-start) limiter.
///
/// Stored tokens measure unused capacity. Every second the bucket is reconciled:
/// tokens are added while traffic stays low, and the previous second's passes are
/// taken out. Above `warning_token` the allowed rate falls linearly with the number
/// of stored tokens, from `target_rate` down to `target_rate / cold_factor` at
/// `max_token`, so a resource that has been idle ramps back up gradually.
///
/// Nothing in this shaper blocks. Requests are admitted or rejected immediately.
#[derive(Debug)]
pub struct WarmUp {
    target_rate: f64,
    cold_factor: u32,
    /// Token count at which the curve starts to slope down.
    warning_token: i64,
    max_token: i64,
    /// Increase of the per-request interval for each token above `warning_token`.
    slope: f64,
    stored_tokens: AtomicI64,
    /// Epoch millis, on a second boundary, of the last reconciliation.
    last_filled: AtomicI64,
    stats: Arc<dyn StatsSource>,
    clock: Clock,
}

impl WarmUp {
    /// Creates a new `WarmUp` shaper reading throughput from `stats`.
    ///
    /// # Errors
    ///
    /// Fails if `cold_factor` is not larger than 1, if `warm_up_period_secs` is zero,
    /// if `target_rate` is negative or not finite, or if rate and period are too small
    /// to put any tokens between `warning_token` and `max_token`.
    pub fn new(
        target_rate: f64,
        warm_up_period_secs: u32,
        cold_factor: u32,
        stats: Arc<dyn StatsSource>,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(
            target_rate,
            warm_up_period_secs,
            cold_factor,
            stats,
            Clock::new(),
        )
    }

    pub fn with_clock(
        target_rate: f64,
        warm_up_period_secs: u32,
        cold_factor: u32,
        stats: Arc<dyn StatsSource>,
        clock: Clock,
    ) -> Result<Self, ConfigError> {
        if cold_factor <= 1 {
            return Err(ConfigError::ColdFactor { cold_factor });
        }
        if warm_up_period_secs == 0 {
            return Err(ConfigError::WarmUpPeriod);
        }
        if !target_rate.is_finite() || target_rate < 0.0 {
            return Err(ConfigError::TargetRate { target_rate });
        }

        let period = f64::from(warm_up_period_secs);
        let cold = f64::from(cold_factor);
        let warning_token = (period * target_rate) as i64 / (i64::from(cold_factor) - 1);
        let max_token = warning_token + (2.0 * period * target_rate / (1.0 + cold)) as i64;
        let slope = (cold - 1.0) / target_rate / (max_token - warning_token) as f64;
        if max_token <= warning_token || !slope.is_finite() {
            return Err(ConfigError::DegenerateCurve {
                warning_token,
                max_token,
            });
        }

        tracing::debug!(
            target_rate,
            warm_up_period_secs,
            cold_factor,
            warning_token,
            max_token,
            slope,
            "created warm-up shaper"
        );

        Ok(Self {
            target_rate,
            cold_factor,
            warning_token,
            max_token,
            slope,
            stored_tokens: AtomicI64::new(0),
            last_filled: AtomicI64::new(0),
            stats,
            clock,
        })
    }

    pub fn warning_token(&self) -> i64 {
        self.warning_token
    }

    pub fn max_token(&self) -> i64 {
        self.max_token
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn stored_tokens(&self) -> i64 {
        self.stored_tokens.load(Ordering::Acquire)
    }

    /// The rate currently allowed for the stored tokens, as of the last reconciliation.
    pub fn allowed_rate(&self) -> f64 {
        self.rate_for(self.stored_tokens())
    }

    fn rate_for(&self, rest_token: i64) -> f64 {
        if rest_token >= self.warning_token {
            let above_token = rest_token - self.warning_token;
            // Rounding in the interval must not reject a request sitting exactly on the curve.
            (1.0 / (above_token as f64 * self.slope + 1.0 / self.target_rate)).next_up()
        } else {
            self.target_rate
        }
    }

    /// Pass rate below which a cold bucket keeps cooling down.
    #[inline]
    fn cold_rate(&self) -> i64 {
        self.target_rate as i64 / i64::from(self.cold_factor)
    }

    fn cool_down_tokens(
        &self,
        current_time: i64,
        last_filled: i64,
        old_value: i64,
        previous_qps: i64,
    ) -> i64 {
        let refilled = || {
            (old_value as f64 + (current_time - last_filled) as f64 * self.target_rate / 1000.0)
                as i64
        };

        // Exactly at the warning line the bucket is left alone.
        let cooling = old_value < self.warning_token
            || (old_value > self.warning_token && previous_qps < self.cold_rate());
        let new_value = if cooling { refilled() } else { old_value };
        new_value.min(self.max_token)
    }

    /// Reconciles stored tokens once per second.
    ///
    /// The caller that moves `last_filled` onto the new second does the reconciliation.
    /// Everyone else defers to it and decides against the tokens as they stand. Once
    /// claimed, a second's reconciliation always lands, even if the reconciliation of
    /// an earlier second is still in flight.
    fn sync_token(&self, previous_qps: i64) {
        let current_time = Clock::second_boundary(self.clock.now_millis());
        let last_filled = self.last_filled.load(Ordering::Acquire);
        if current_time <= last_filled {
            return;
        }
        if self
            .last_filled
            .compare_exchange(last_filled, current_time, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        // Cool-down and the previous second's passes land as one update, so a slow
        // reconciliation of an earlier second cannot make this one drop out.
        let mut cooled = 0;
        let old_value = self
            .stored_tokens
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |old_value| {
                cooled = self.cool_down_tokens(current_time, last_filled, old_value, previous_qps);
                Some(cooled.saturating_sub(previous_qps).max(0))
            })
            .unwrap_or_else(|old_value| old_value);
        tracing::trace!(
            old_value,
            new_value = cooled,
            previous_qps,
            "warm-up tokens reconciled"
        );
    }
}

impl TrafficShaper for WarmUp {
    fn admit(&self, acquire_count: i32, _prioritized: bool) -> ControlFlow<Reason, Duration> {
        if acquire_count <= 0 {
            return ControlFlow::Continue(Duration::ZERO);
        }

        // Observed rates are counted in whole requests.
        let pass_qps = self.stats.current_window_rate() as i64;
        let previous_qps = self.stats.previous_window_rate() as i64;
        self.sync_token(previous_qps);

        let allowed = self.rate_for(self.stored_tokens.load(Ordering::Acquire));
        if pass_qps.saturating_add(i64::from(acquire_count)) as f64 <= allowed {
            ControlFlow::Continue(Duration::ZERO)
        } else {
            tracing::debug!(pass_qps, acquire_count, allowed, "warm-up rejected request");
            ControlFlow::Break(Reason::RateExceeded { allowed })
        }
    }

    fn kind(&self) -> &'static str {
        "warm_up"
    }
}
