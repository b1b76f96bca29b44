//! cpal-based audio backend, duplex runner, and calibration loopback.
//!
//! The duplex runner wires a [`Pipeline`] between a capture stream and a
//! playback stream: the input callback mixes the device's channels to mono
//! and pushes into a wait-free ring; the output callback drains that ring
//! through a [`BlockAssembler`], runs the pipeline for every complete
//! 512-frame block, and plays the interleaved result. Neither callback
//! allocates or locks.

use crate::backend::{
    AudioBackend, AudioDevice, BackendStreamConfig, ErrorCallback, InputCallback, OutputCallback,
    StreamHandle,
};
use crate::{Error, Result};
use chroma_engine::{BlockAssembler, CalibrationError, CalibrationIo, Pipeline};
use cpal::Host;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// cpal-based audio backend.
///
/// Holds a cpal [`Host`]; on Linux this is ALSA, on macOS CoreAudio, on
/// Windows WASAPI.
pub struct CpalBackend {
    host: Host,
}

impl CpalBackend {
    /// Create a backend on the platform's default audio host.
    pub fn new() -> Self {
        tracing::info!(
            host = cpal::default_host().id().name(),
            "cpal backend initialized"
        );
        Self {
            host: cpal::default_host(),
        }
    }

    fn find_device(&self, name: Option<&str>, input: bool) -> Result<cpal::Device> {
        let default = if input {
            self.host.default_input_device()
        } else {
            self.host.default_output_device()
        };
        let Some(search) = name else {
            return default.ok_or(Error::NoDevice);
        };

        let search_lower = search.to_lowercase();
        let devices = if input {
            self.host.input_devices()
        } else {
            self.host.output_devices()
        }
        .map_err(|e| Error::Stream(e.to_string()))?;

        for device in devices {
            if let Ok(dev_name) = device.name()
                && dev_name.to_lowercase().contains(search_lower.as_str())
            {
                return Ok(device);
            }
        }
        Err(Error::DeviceNotFound(format!(
            "no {} device matching '{search}'",
            if input { "input" } else { "output" }
        )))
    }

    fn stream_config(config: &BackendStreamConfig) -> cpal::StreamConfig {
        cpal::StreamConfig {
            channels: config.channels,
            sample_rate: config.sample_rate,
            buffer_size: cpal::BufferSize::Fixed(config.buffer_size),
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn list_devices(&self) -> Result<Vec<AudioDevice>> {
        let mut devices = Vec::new();
        let iter = self
            .host
            .devices()
            .map_err(|e| Error::Stream(e.to_string()))?;

        for (index, device) in iter.enumerate() {
            let name = device.name().unwrap_or_else(|_| "unknown".to_string());
            let input_channels = device
                .default_input_config()
                .map(|c| c.channels())
                .unwrap_or(0);
            let output_channels = device
                .default_output_config()
                .map(|c| c.channels())
                .unwrap_or(0);
            let default_sample_rate = device
                .default_output_config()
                .or_else(|_| device.default_input_config())
                .map(|c| c.sample_rate())
                .unwrap_or(48000);

            devices.push(AudioDevice {
                name,
                index,
                input_channels,
                output_channels,
                default_sample_rate,
            });
        }
        Ok(devices)
    }

    fn build_input_stream(
        &self,
        config: &BackendStreamConfig,
        mut callback: InputCallback,
        mut error_callback: ErrorCallback,
    ) -> Result<StreamHandle> {
        let device = self.find_device(config.device_name.as_deref(), true)?;
        let stream_config = Self::stream_config(config);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    callback(data);
                },
                move |err| {
                    error_callback(&err.to_string());
                },
                None,
            )
            .map_err(|e| Error::Stream(e.to_string()))?;

        stream.play().map_err(|e| Error::Stream(e.to_string()))?;
        tracing::info!(
            channels = config.channels,
            sample_rate = config.sample_rate,
            "input stream started"
        );
        Ok(StreamHandle::new(stream))
    }

    fn build_output_stream(
        &self,
        config: &BackendStreamConfig,
        mut callback: OutputCallback,
        mut error_callback: ErrorCallback,
    ) -> Result<StreamHandle> {
        let device = self.find_device(config.device_name.as_deref(), false)?;
        let stream_config = Self::stream_config(config);

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    callback(data);
                },
                move |err| {
                    error_callback(&err.to_string());
                },
                None,
            )
            .map_err(|e| Error::Stream(e.to_string()))?;

        stream.play().map_err(|e| Error::Stream(e.to_string()))?;
        tracing::info!(
            channels = config.channels,
            sample_rate = config.sample_rate,
            "output stream started"
        );
        Ok(StreamHandle::new(stream))
    }
}

/// Live duplex session. Streams stop when this is dropped.
#[derive(Debug)]
pub struct DuplexStreams {
    _input: StreamHandle,
    _output: StreamHandle,
}

/// Duplex runner settings.
#[derive(Debug, Clone)]
pub struct DuplexConfig {
    /// Stream settings shared by input and output.
    pub sample_rate: u32,
    /// Device callback size in frames (positive multiple of 64).
    pub device_block_frames: usize,
    /// Capture channel count (mixed to mono for the pipeline).
    pub input_channels: u16,
    /// Playback channel count (must match the pipeline's downmix width).
    pub output_channels: u16,
    /// Input device name filter.
    pub input_device: Option<String>,
    /// Output device name filter.
    pub output_device: Option<String>,
}

/// Wire a pipeline between the capture and playback devices.
///
/// The pipeline is moved into the output callback; its lifecycle and
/// parameters remain reachable through the handles returned by
/// [`Pipeline::new`]. A device error faults the pipeline, which then emits
/// silence until stopped.
pub fn run_duplex(
    backend: &dyn AudioBackend,
    config: &DuplexConfig,
    mut pipeline: Pipeline,
) -> Result<DuplexStreams> {
    let mut assembler = BlockAssembler::new(
        config.device_block_frames,
        usize::from(config.output_channels),
    )?;

    // Mono capture ring: two device blocks of headroom.
    let ring_capacity = (config.device_block_frames * 4).max(2048);
    let (mut mono_tx, mut mono_rx) = rtrb::RingBuffer::<f32>::new(ring_capacity);

    let fault_flag = Arc::new(AtomicBool::new(false));
    let in_channels = usize::from(config.input_channels.max(1));

    let input_config = BackendStreamConfig {
        sample_rate: config.sample_rate,
        buffer_size: config.device_block_frames as u32,
        channels: config.input_channels,
        device_name: config.input_device.clone(),
    };
    let input_fault = Arc::clone(&fault_flag);
    let input = backend.build_input_stream(
        &input_config,
        Box::new(move |interleaved: &[f32]| {
            // Mix capture channels to the mono reference the field consumes.
            for frame in interleaved.chunks_exact(in_channels) {
                let mono = frame.iter().sum::<f32>() / in_channels as f32;
                // A full ring means the output side has stalled; dropping
                // input here is the only wait-free option.
                let _ = mono_tx.push(mono);
            }
        }),
        Box::new(move |err| {
            tracing::error!(err, "input stream error");
            input_fault.store(true, Ordering::Release);
        }),
    )?;

    let output_config = BackendStreamConfig {
        sample_rate: config.sample_rate,
        buffer_size: config.device_block_frames as u32,
        channels: config.output_channels,
        device_name: config.output_device.clone(),
    };
    let output_fault = Arc::clone(&fault_flag);
    let mut faulted = false;
    let output = backend.build_output_stream(
        &output_config,
        Box::new(move |interleaved: &mut [f32]| {
            if !faulted && output_fault.load(Ordering::Acquire) {
                pipeline.fault("audio device error");
                faulted = true;
            }

            while let Ok(sample) = mono_rx.pop() {
                assembler.push_input(&[sample]);
            }
            assembler.drain_into(&mut pipeline);
            assembler.pop_output(interleaved);
        }),
        Box::new(move |err| {
            tracing::error!(err, "output stream error");
        }),
    )?;

    Ok(DuplexStreams {
        _input: input,
        _output: output,
    })
}

/// Physical loopback capture for latency calibration.
///
/// Plays the stimulus on the output device while recording the input
/// device; both streams run for the stimulus duration plus a safety margin,
/// bounded by the engine's absolute calibration timeout.
pub struct CpalLoopback<'a> {
    backend: &'a dyn AudioBackend,
    /// Stream settings for both sides of the loop.
    pub config: BackendStreamConfig,
}

impl<'a> CpalLoopback<'a> {
    /// Create a loopback runner over the given backend.
    pub fn new(backend: &'a dyn AudioBackend, config: BackendStreamConfig) -> Self {
        Self { backend, config }
    }
}

impl CalibrationIo for CpalLoopback<'_> {
    fn round_trip(
        &mut self,
        stimulus: &[f32],
        sample_rate: f32,
    ) -> std::result::Result<Vec<f32>, CalibrationError> {
        let duration = stimulus.len() as f32 / sample_rate;
        let deadline = Duration::from_secs_f32(duration + 2.0);
        let channels = usize::from(self.config.channels.max(1));

        let recorded: Arc<Mutex<Vec<f32>>> =
            Arc::new(Mutex::new(Vec::with_capacity(stimulus.len() * 2)));
        let capture = Arc::clone(&recorded);

        let _input = self
            .backend
            .build_input_stream(
                &self.config,
                Box::new(move |interleaved: &[f32]| {
                    let mut buffer = capture.lock();
                    for frame in interleaved.chunks_exact(channels) {
                        buffer.push(frame.iter().sum::<f32>() / channels as f32);
                    }
                }),
                Box::new(|err| tracing::warn!(err, "loopback input error")),
            )
            .map_err(|e| CalibrationError::Capture(e.to_string()))?;

        let playback: Arc<Vec<f32>> = Arc::new(stimulus.to_vec());
        let mut position = 0usize;
        let out_channels = channels;
        let _output = self
            .backend
            .build_output_stream(
                &self.config,
                Box::new(move |interleaved: &mut [f32]| {
                    for frame in interleaved.chunks_exact_mut(out_channels) {
                        let sample = playback.get(position).copied().unwrap_or(0.0);
                        position += 1;
                        frame.fill(sample);
                    }
                }),
                Box::new(|err| tracing::warn!(err, "loopback output error")),
            )
            .map_err(|e| CalibrationError::Capture(e.to_string()))?;

        // Block until the recording covers the stimulus (plus round-trip
        // headroom) or the absolute timeout expires.
        let target = stimulus.len();
        let started = Instant::now();
        loop {
            std::thread::sleep(Duration::from_millis(20));
            if recorded.lock().len() >= target {
                break;
            }
            if started.elapsed() >= deadline {
                return Err(CalibrationError::Timeout(deadline.as_secs_f64()));
            }
        }

        let buffer = recorded.lock();
        Ok(buffer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpal_backend_name() {
        let backend = CpalBackend::new();
        assert_eq!(backend.name(), "cpal");
    }

    #[test]
    fn test_cpal_backend_list_devices() {
        let backend = CpalBackend::new();
        // Should not panic; device availability depends on the system.
        assert!(backend.list_devices().is_ok());
    }

    #[test]
    fn test_duplex_config_shape() {
        let config = DuplexConfig {
            sample_rate: 48000,
            device_block_frames: 512,
            input_channels: 2,
            output_channels: 2,
            input_device: None,
            output_device: None,
        };
        assert_eq!(config.device_block_frames % 64, 0);
    }
}
