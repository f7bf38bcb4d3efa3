//! Shared threshold validation helpers.
//!
//! Reusable range checks used by the sustain policy, the state configuration
//! and the smoothing settings.

use crate::error::CoreError;

/// Longest configurable duration, in seconds (one day).
pub const MAX_DURATION_SEC: f64 = 86_400.0;

/// Validate that a value falls within `[0.0, 1.0]`.
///
/// Returns a `CoreError::Validation` naming the field if out of range.
pub fn validate_unit_range(value: f64, name: &str) -> Result<(), CoreError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CoreError::Validation(format!(
            "{name} must be between 0.0 and 1.0, got {value}"
        )));
    }
    Ok(())
}

/// Validate that a value falls within the closed range `[min, max]`.
pub fn validate_range(value: f64, min: f64, max: f64, name: &str) -> Result<(), CoreError> {
    if !(min..=max).contains(&value) {
        return Err(CoreError::Validation(format!(
            "{name} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

/// Validate that a value is finite and strictly greater than zero.
pub fn validate_positive(value: f64, name: &str) -> Result<(), CoreError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(CoreError::Validation(format!(
            "{name} must be greater than 0, got {value}"
        )));
    }
    Ok(())
}

/// Validate that a value is finite and not negative.
pub fn validate_non_negative(value: f64, name: &str) -> Result<(), CoreError> {
    if !value.is_finite() || value < 0.0 {
        return Err(CoreError::Validation(format!(
            "{name} must not be negative, got {value}"
        )));
    }
    Ok(())
}

/// Validate a duration in seconds: finite, not negative and at most
/// [`MAX_DURATION_SEC`].
pub fn validate_duration(value: f64, name: &str) -> Result<(), CoreError> {
    validate_range(value, 0.0, MAX_DURATION_SEC, name)
}

/// Validate an EMA smoothing factor, which must lie in the open interval `(0, 1)`.
pub fn validate_smoothing_alpha(value: f64, name: &str) -> Result<(), CoreError> {
    if !(value > 0.0 && value < 1.0) {
        return Err(CoreError::Validation(format!(
            "{name} must be strictly between 0.0 and 1.0, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_boundary_values() {
        assert!(validate_unit_range(0.0, "test").is_ok());
        assert!(validate_unit_range(0.5, "test").is_ok());
        assert!(validate_unit_range(1.0, "test").is_ok());
    }

    #[test]
    fn rejects_below_zero() {
        assert!(validate_unit_range(-0.01, "test").is_err());
    }

    #[test]
    fn rejects_above_one() {
        assert!(validate_unit_range(1.01, "test").is_err());
    }

    #[test]
    fn range_error_names_the_field() {
        let err = validate_range(0.4, 0.5, 1.0, "majority_fraction").unwrap_err();
        assert!(err.to_string().contains("majority_fraction"));
    }

    #[test]
    fn positive_rejects_zero_and_nan() {
        assert!(validate_positive(0.0, "window_sec").is_err());
        assert!(validate_positive(f64::NAN, "window_sec").is_err());
        assert!(validate_positive(0.1, "window_sec").is_ok());
    }

    #[test]
    fn non_negative_accepts_zero() {
        assert!(validate_non_negative(0.0, "gap").is_ok());
        assert!(validate_non_negative(-1.0, "gap").is_err());
    }

    #[test]
    fn duration_is_bounded_to_one_day() {
        assert!(validate_duration(0.0, "window_sec").is_ok());
        assert!(validate_duration(MAX_DURATION_SEC, "window_sec").is_ok());
        assert!(validate_duration(MAX_DURATION_SEC + 1.0, "window_sec").is_err());
        assert!(validate_duration(1e13, "window_sec").is_err());
        assert!(validate_duration(f64::NAN, "window_sec").is_err());
        assert!(validate_duration(f64::INFINITY, "window_sec").is_err());
    }

    #[test]
    fn smoothing_alpha_is_open_interval() {
        assert!(validate_smoothing_alpha(0.0, "alpha").is_err());
        assert!(validate_smoothing_alpha(1.0, "alpha").is_err());
        assert!(validate_smoothing_alpha(0.3, "alpha").is_ok());
    }
}
