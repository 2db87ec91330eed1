//! Thread tunable validation.
//!
//! Rejects values that would make the audio thread either block forever or
//! spin without sleeping.

use thiserror::Error;

use crate::ThreadConfig;

/// Validation error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The OS thread name is empty.
    #[error("thread name must not be empty")]
    EmptyThreadName,

    /// A value that must be positive is zero.
    #[error("'{field}' must be greater than zero")]
    Zero {
        /// Name of the offending field.
        field: &'static str,
    },

    /// The input wake floor is not shorter than the sleep ceiling.
    #[error("min_input_wake_ms ({floor_ms}) must be below max_sleep_secs ({ceiling_secs}s)")]
    WakeFloorAboveCeiling {
        /// Configured floor in milliseconds.
        floor_ms: u64,
        /// Configured ceiling in seconds.
        ceiling_secs: u64,
    },

    /// Silence scans run less often than the empty period they feed.
    #[error(
        "non_empty_update_interval_secs ({interval}) must not exceed min_empty_period_secs ({period})"
    )]
    ScanSlowerThanEmptyPeriod {
        /// Scan interval in seconds.
        interval: u64,
        /// Empty period in seconds.
        period: u64,
    },
}

/// Result type for validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Check every tunable in `config`.
pub fn validate_config(config: &ThreadConfig) -> ValidationResult<()> {
    if config.thread_name.trim().is_empty() {
        return Err(ValidationError::EmptyThreadName);
    }
    if config.max_sleep_secs == 0 {
        return Err(ValidationError::Zero {
            field: "max_sleep_secs",
        });
    }
    if config.drop_frames_threshold_ms == 0 {
        return Err(ValidationError::Zero {
            field: "drop_frames_threshold_ms",
        });
    }
    if config.max_continuous_zero_sleep == 0 {
        return Err(ValidationError::Zero {
            field: "max_continuous_zero_sleep",
        });
    }
    if config.non_empty_update_interval_secs == 0 {
        return Err(ValidationError::Zero {
            field: "non_empty_update_interval_secs",
        });
    }
    if config.min_input_wake_ms >= config.max_sleep_secs.saturating_mul(1000) {
        return Err(ValidationError::WakeFloorAboveCeiling {
            floor_ms: config.min_input_wake_ms,
            ceiling_secs: config.max_sleep_secs,
        });
    }
    if config.non_empty_update_interval_secs > config.min_empty_period_secs {
        return Err(ValidationError::ScanSlowerThanEmptyPeriod {
            interval: config.non_empty_update_interval_secs,
            period: config.min_empty_period_secs,
        });
    }
    Ok(())
}
