//! Configuration range validation.
//!
//! Out-of-range values are rejected before they reach the control surface;
//! the caller keeps its previous configuration (spec: parameter-bound
//! violations never overwrite a good value).

use crate::ServerConfig;
use thiserror::Error;

/// Validation error types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// Numeric parameter outside its allowed range.
    #[error("parameter '{param}' value {value} out of range [{min}, {max}]")]
    OutOfRange {
        /// Name of the parameter.
        param: &'static str,
        /// The value that was out of range.
        value: f64,
        /// Minimum allowed value.
        min: f64,
        /// Maximum allowed value.
        max: f64,
    },

    /// Structurally invalid parameter.
    #[error("invalid parameter '{param}': {reason}")]
    Invalid {
        /// Name of the parameter.
        param: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Multiple validation errors.
    #[error("multiple validation errors: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

fn check_range(
    errors: &mut Vec<ValidationError>,
    param: &'static str,
    value: f64,
    min: f64,
    max: f64,
) {
    if !value.is_finite() || value < min || value > max {
        errors.push(ValidationError::OutOfRange {
            param,
            value,
            min,
            max,
        });
    }
}

/// Validate a full configuration, collecting every violation.
pub fn validate_config(config: &ServerConfig) -> ValidationResult<()> {
    let mut errors = Vec::new();

    if config.sample_rate == 0 {
        errors.push(ValidationError::Invalid {
            param: "sample_rate",
            reason: "must be positive".into(),
        });
    }
    if config.device_block_frames == 0 || config.device_block_frames % 64 != 0 {
        errors.push(ValidationError::Invalid {
            param: "device_block_frames",
            reason: format!(
                "{} is not a positive multiple of 64",
                config.device_block_frames
            ),
        });
    }
    check_range(
        &mut errors,
        "output_channels",
        config.output_channels as f64,
        1.0,
        8.0,
    );

    check_range(
        &mut errors,
        "phi.manual_depth",
        f64::from(config.phi.manual_depth),
        0.0,
        1.0,
    );
    check_range(
        &mut errors,
        "phi.internal_rate_hz",
        f64::from(config.phi.internal_rate_hz),
        1e-3,
        100.0,
    );
    if !config.phi.manual_phase.is_finite() {
        errors.push(ValidationError::Invalid {
            param: "phi.manual_phase",
            reason: "must be finite".into(),
        });
    }

    check_range(
        &mut errors,
        "adaptive.k",
        f64::from(config.adaptive.k),
        0.0,
        10.0,
    );
    check_range(
        &mut errors,
        "adaptive.gamma",
        f64::from(config.adaptive.gamma),
        0.0,
        10.0,
    );
    check_range(
        &mut errors,
        "adaptive.target",
        f64::from(config.adaptive.target),
        0.0,
        1.5,
    );
    check_range(&mut errors, "adaptive.bias", config.adaptive.bias, -1.0, 1.0);

    check_range(
        &mut errors,
        "latency.compensation_offset_ms",
        f64::from(config.latency.compensation_offset_ms),
        0.0,
        200.0,
    );

    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert_eq!(validate_config(&ServerConfig::default()), Ok(()));
    }

    #[test]
    fn test_bad_block_size_rejected() {
        let mut config = ServerConfig::default();
        config.device_block_frames = 100;
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::Invalid { param: "device_block_frames", .. })
        ));
    }

    #[test]
    fn test_out_of_range_depth_rejected() {
        let mut config = ServerConfig::default();
        config.phi.manual_depth = 1.5;
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::OutOfRange { param: "phi.manual_depth", .. })
        ));
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = ServerConfig::default();
        config.phi.manual_depth = -1.0;
        config.adaptive.target = 9.0;
        config.latency.compensation_offset_ms = 300.0;
        match validate_config(&config) {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected Multiple, got {other:?}"),
        }
    }
}
