//! Error types for pipeline orchestration.

use thiserror::Error;

/// Errors surfaced by the engine's control surface.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Audio device failure (open, start, sudden loss, rate mismatch).
    #[error("audio device error: {0}")]
    Device(String),

    /// Latency calibration failed; the pipeline keeps its previous state.
    #[error("calibration failed: {0}")]
    Calibration(#[from] CalibrationError),

    /// Device block sizes must be a multiple of 64 frames.
    #[error("unsupported device block size {0} (must be a multiple of 64)")]
    UnsupportedBlockSize(usize),

    /// A control parameter was outside its allowed range; the previous
    /// value is retained.
    #[error("parameter '{name}' value {value} out of range [{min}, {max}]")]
    ParameterOutOfRange {
        /// Parameter name as exposed on the control surface.
        name: &'static str,
        /// The rejected value.
        value: f64,
        /// Minimum allowed value.
        min: f64,
        /// Maximum allowed value.
        max: f64,
    },

    /// The requested state transition is not allowed.
    #[error("invalid state transition: {0}")]
    InvalidTransition(&'static str),
}

/// Why a calibration measurement was rejected.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    /// The recording contained no signal; loopback not connected.
    #[error("loopback recording is silent; is the loopback connected?")]
    SilentLoopback,

    /// The correlation peak did not stand out from the noise floor.
    #[error("correlation quality too low (peak-to-mean ratio {ratio:.2} < 3)")]
    LowQuality {
        /// Measured peak-to-mean ratio.
        ratio: f64,
    },

    /// The measured latency was outside the plausible (0, 500) ms window.
    #[error("measured latency {measured_ms:.2} ms outside (0, 500) ms")]
    OutOfRange {
        /// The rejected measurement.
        measured_ms: f64,
    },

    /// The loopback round trip did not complete in time.
    #[error("calibration timed out after {0:.1} s")]
    Timeout(f64),

    /// The loopback capture itself failed.
    #[error("loopback capture failed: {0}")]
    Capture(String),
}

/// Convenience result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
