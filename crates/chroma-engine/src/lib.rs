//! Pipeline orchestration for the chroma audio server.
//!
//! This crate ties the DSP core to the telemetry fabric:
//!
//! - [`Pipeline`] - the audio-thread orchestrator implementing the
//!   per-callback contract and the `Stopped / Calibrating / Running /
//!   Faulted` state machine
//! - [`ControlSlots`] - one atomic word per externally tunable parameter,
//!   written by the control API with release semantics and read by the
//!   audio thread with acquire semantics
//! - [`LatencyManager`] - impulse-response calibration, latency
//!   decomposition, drift monitoring, and compensation bookkeeping
//! - [`AdaptiveController`] - the feedback loop holding criticality at its
//!   setpoint through the Φ parameters
//! - [`BlockAssembler`] - adapts device block sizes (multiples of 64) to
//!   the engine's fixed 512-frame blocks
//!
//! ## Quick Start
//!
//! ```rust
//! use chroma_engine::{Pipeline, PipelineConfig};
//! use chroma_core::BLOCK_SIZE;
//!
//! let (mut pipeline, handles) = Pipeline::new(PipelineConfig::default());
//! pipeline.start().unwrap();
//!
//! let input = [0.0f32; BLOCK_SIZE];
//! let mut output = [0.0f32; BLOCK_SIZE * 2];
//! pipeline.process_block(&input, &mut output);
//!
//! assert!(pipeline.last_frame().valid);
//! pipeline.stop().unwrap();
//! handles.shutdown();
//! ```

mod adaptive;
mod control;
mod error;
mod latency;
mod pipeline;
mod xcorr;

pub use adaptive::{
    AdaptiveController, DISTURBANCE_THRESHOLD, SETTLE_TOLERANCE, SMOOTHING_WINDOW,
};
pub use control::{ControlSlots, PipelineState, PresetUpdate};
pub use error::{CalibrationError, EngineError, Result};
pub use latency::{
    BURST_FREQUENCY_HZ, BURST_SECS, CalibrationIo, CalibrationOutcome, DriftMonitor,
    LatencyManager, MAX_PLAUSIBLE_MS, MIN_PEAK_RATIO, build_stimulus, decompose,
    measure_round_trip,
};
pub use pipeline::{BlockAssembler, Pipeline, PipelineConfig, PipelineHandles};
pub use xcorr::{peak_with_prominence, xcorr_positive};
