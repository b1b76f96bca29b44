//! Pluggable audio backend abstraction.
//!
//! [`AudioBackend`] decouples the pipeline from any specific platform audio
//! API. The default implementation wraps cpal; the trait uses boxed closures
//! for callbacks so it stays object-safe, and stream handles are returned as
//! type-erased [`StreamHandle`] values that stop the stream on drop.

use crate::Result;

/// Description of one audio device.
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Human-readable device name.
    pub name: String,
    /// Enumeration index.
    pub index: usize,
    /// Maximum input channels (0 = output-only).
    pub input_channels: u16,
    /// Maximum output channels (0 = input-only).
    pub output_channels: u16,
    /// The device's default sample rate in Hz.
    pub default_sample_rate: u32,
}

/// Configuration for building an audio stream.
#[derive(Debug, Clone)]
pub struct BackendStreamConfig {
    /// Requested sample rate in Hz.
    pub sample_rate: u32,
    /// Preferred buffer size in frames.
    pub buffer_size: u32,
    /// Number of audio channels.
    pub channels: u16,
    /// Optional device name (uses system default if `None`).
    pub device_name: Option<String>,
}

impl Default for BackendStreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            buffer_size: 512,
            channels: 2,
            device_name: None,
        }
    }
}

/// Type-erased audio stream handle.
///
/// The stream is active while this handle exists; dropping it stops
/// playback or capture.
pub struct StreamHandle {
    _inner: Box<dyn Send>,
}

impl StreamHandle {
    /// Wrap a backend-specific stream object, keeping it alive until drop.
    pub fn new<T: Send + 'static>(stream: T) -> Self {
        Self {
            _inner: Box::new(stream),
        }
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}

/// Interleaved capture callback.
pub type InputCallback = Box<dyn FnMut(&[f32]) + Send>;

/// Interleaved playback callback.
pub type OutputCallback = Box<dyn FnMut(&mut [f32]) + Send>;

/// Stream error callback.
pub type ErrorCallback = Box<dyn FnMut(&str) + Send>;

/// Platform audio API abstraction.
pub trait AudioBackend {
    /// Short backend identifier ("cpal", "mock", ...).
    fn name(&self) -> &'static str;

    /// Enumerate the system's audio devices.
    fn list_devices(&self) -> Result<Vec<AudioDevice>>;

    /// Build and start a capture stream.
    fn build_input_stream(
        &self,
        config: &BackendStreamConfig,
        callback: InputCallback,
        error_callback: ErrorCallback,
    ) -> Result<StreamHandle>;

    /// Build and start a playback stream.
    fn build_output_stream(
        &self,
        config: &BackendStreamConfig,
        callback: OutputCallback,
        error_callback: ErrorCallback,
    ) -> Result<StreamHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BackendStreamConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.buffer_size, 512);
        assert_eq!(config.channels, 2);
        assert!(config.device_name.is_none());
    }

    #[test]
    fn test_stream_handle_debug() {
        let handle = StreamHandle::new(42u32);
        assert!(format!("{handle:?}").contains("StreamHandle"));
    }
}
