/// Errors produced when a shaper is constructed with an unusable configuration.
///
/// These are only ever raised at construction time; deciding admission never fails.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The warm-up curve is undefined unless the cold rate is below the target rate.
    #[error("cold factor must be larger than 1, got {cold_factor}")]
    ColdFactor { cold_factor: u32 },

    /// A zero warm-up period leaves no room between the warning and maximum token counts.
    #[error("warm-up period must be at least one second")]
    WarmUpPeriod,

    /// The rate and period are too small to leave any tokens on the warm-up slope.
    #[error(
        "warm-up curve is empty: warning token {warning_token} and max token {max_token}, \
         raise the target rate or the warm-up period"
    )]
    DegenerateCurve { warning_token: i64, max_token: i64 },

    /// The target rate must be a finite, non-negative number.
    #[error("target rate must be finite and non-negative, got {target_rate}")]
    TargetRate { target_rate: f64 },
}
