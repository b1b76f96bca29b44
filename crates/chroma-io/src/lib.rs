//! Audio device I/O for the chroma pipeline.
//!
//! This crate provides:
//!
//! - **Backend abstraction**: [`AudioBackend`] decouples the pipeline from
//!   any specific platform audio API
//! - **cpal backend**: [`CpalBackend`], the default implementation (ALSA,
//!   CoreAudio, WASAPI)
//! - **Duplex runner**: [`run_duplex`] wires a [`Pipeline`] between the
//!   input and output devices
//! - **Loopback capture**: [`CpalLoopback`] implements the engine's
//!   calibration round trip
//!
//! [`Pipeline`]: chroma_engine::Pipeline

pub mod backend;
mod cpal_backend;

pub use backend::{
    AudioBackend, AudioDevice, BackendStreamConfig, ErrorCallback, InputCallback, OutputCallback,
    StreamHandle,
};
pub use cpal_backend::{CpalBackend, CpalLoopback, DuplexConfig, DuplexStreams, run_duplex};

/// Error types for audio I/O operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Audio stream setup or runtime error.
    #[error("audio stream error: {0}")]
    Stream(String),

    /// No audio device available on the system.
    #[error("no audio device available")]
    NoDevice,

    /// The requested sample format is not supported.
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// The requested audio device was not found.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Device block size the engine cannot rebuffer.
    #[error(transparent)]
    Engine(#[from] chroma_engine::EngineError),
}

/// Convenience result type for audio I/O operations.
pub type Result<T> = std::result::Result<T, Error>;
