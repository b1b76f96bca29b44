//! Chroma Core - DSP primitives for the chromatic field pipeline
//!
//! This crate provides the real-time half of the chroma audio server: the
//! 8-channel chromatic field transform, the Φ modulation sources, the
//! downmixer, and the compensation delay line. Everything here is designed
//! for the audio thread: zero heap allocation after construction, no locks,
//! and finite output under any input.
//!
//! # Core Abstractions
//!
//! ## Field Transform
//!
//! - [`ChromaticFieldProcessor`] - 8-channel coupled resonator bank with
//!   per-block metric extraction ([`FieldMetrics`])
//!
//! ## Φ Modulation
//!
//! - [`PhiController`] - produces the per-block `(phase, depth)` pair from
//!   one of four sources, with a 100 ms equal-power crossfade on switches
//! - [`PhiSourceKind`] / [`PhiOutput`] / [`PhiTickContext`]
//!
//! ## Output Stage
//!
//! - [`Downmixer`] / [`DownmixStrategy`] - 8-to-N channel mapping
//! - [`CompensationDelay`] - fractional-sample delay for latency compensation
//!
//! ## Utilities
//!
//! - [`EnvelopeFollower`] - amplitude envelope detection
//! - Math helpers: [`wrap_phase`], [`equal_power_gain`], [`finite_or_zero`],
//!   [`lerp`], etc.
//!
//! # Example
//!
//! ```rust
//! use chroma_core::{
//!     BLOCK_SIZE, ChromaticFieldProcessor, PhiController, PhiTickContext,
//! };
//!
//! let mut phi = PhiController::new(48000.0);
//! let mut field = ChromaticFieldProcessor::new(48000.0);
//!
//! let input = [0.0f32; BLOCK_SIZE];
//! let ctx = PhiTickContext { input: &input, sensor_value: 0.0 };
//! let modulation = phi.tick(BLOCK_SIZE as f32 / 48000.0, &ctx);
//! let metrics = field.process(&input, modulation);
//! assert!(metrics.input_valid);
//! ```

pub mod delay;
pub mod downmix;
pub mod envelope;
pub mod field;
pub mod math;
pub mod phi;

// Re-export main types at crate root
pub use delay::CompensationDelay;
pub use downmix::{Downmixer, DownmixStrategy};
pub use envelope::EnvelopeFollower;
pub use field::{
    BASE_FREQUENCY_HZ, BLOCK_SIZE, CHANNEL_RATIO, ChromaticFieldProcessor, FieldMetrics,
    NUM_CHANNELS, REST_CRITICALITY,
};
pub use math::{
    equal_power_gain, finite_or_zero, flush_denormal, hz_to_omega, lerp, ms_to_samples,
    samples_to_ms, wrap_phase,
};
pub use phi::{
    CROSSFADE_SECS, GOLDEN_RATIO_CONJUGATE, PhiController, PhiOutput, PhiSourceKind,
    PhiTickContext,
};
