use std::sync::Arc;
use std::time::Duration;

use crate::Clock;
use crate::ConfigError;
use crate::DEFAULT_COLD_FACTOR;
use crate::StatsSource;
use crate::TrafficShaper;
use crate::UniformRate;
use crate::WarmUp;

/// Declarative shaper configuration for a protected resource.
///
/// With the `serde` feature this deserializes from a map tagged by `behavior`:
///
/// ```json
/// { "behavior": "warm_up", "target_rate": 100.0, "warm_up_period_secs": 10 }
/// ```
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "behavior", rename_all = "snake_case"))]
pub enum ShaperRule {
    UniformRate {
        max_queueing_delay_ms: u64,
        target_rate: f64,
    },
    WarmUp {
        target_rate: f64,
        warm_up_period_secs: u32,
        #[cfg_attr(feature = "serde", serde(default = "default_cold_factor"))]
        cold_factor: u32,
    },
}

#[cfg(feature = "serde")]
fn default_cold_factor() -> u32 {
    DEFAULT_COLD_FACTOR
}

impl ShaperRule {
    /// A warm-up rule with the default cold factor.
    pub fn warm_up(target_rate: f64, warm_up_period_secs: u32) -> Self {
        Self::WarmUp {
            target_rate,
            warm_up_period_secs,
            cold_factor: DEFAULT_COLD_FACTOR,
        }
    }

    /// Builds the shaper this rule describes.
    ///
    /// `stats` feeds warm-up shapers and is ignored by uniform rate shapers.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the rule cannot produce a working shaper.
    pub fn build(
        &self,
        stats: Arc<dyn StatsSource>,
    ) -> Result<Arc<dyn TrafficShaper>, ConfigError> {
        self.build_with_clock(stats, Clock::new())
    }

    pub fn build_with_clock(
        &self,
        stats: Arc<dyn StatsSource>,
        clock: Clock,
    ) -> Result<Arc<dyn TrafficShaper>, ConfigError> {
        match *self {
            Self::UniformRate {
                max_queueing_delay_ms,
                target_rate,
            } => Ok(Arc::new(UniformRate::with_clock(
                Duration::from_millis(max_queueing_delay_ms),
                target_rate,
                clock,
            ))),
            Self::WarmUp {
                target_rate,
                warm_up_period_secs,
                cold_factor,
            } => Ok(Arc::new(WarmUp::with_clock(
                target_rate,
                warm_up_period_secs,
                cold_factor,
                stats,
                clock,
            )?)),
        }
    }
}
