//! The audio pipeline: per-block orchestration and the lifecycle state
//! machine.
//!
//! Per-callback ordering (the hard contract: no allocation, no locks):
//!
//! 1. capture the callback time, update the drift monitor
//! 2. read the control slots (Φ source, manual latch, strategy, adaptive)
//! 3. `PhiController::tick`
//! 4. `ChromaticFieldProcessor::process` → 8-channel bus + metrics
//! 5. `Downmixer::mix`
//! 6. `CompensationDelay` on each output channel
//! 7. populate, sanitize, and classify the `MetricsFrame`
//! 8. publish metrics and latency frames to their buses
//! 9. feed the frame to the adaptive controller (synchronous, bounded)
//! 10. on any non-finite escape from steps 3-6: write silence, mark the
//!     block invalid, continue
//!
//! Lifecycle: `Stopped → (Calibrating →) Running → Stopped`, with `Faulted`
//! reachable from `Running` on irrecoverable device errors. A faulted or
//! stopped pipeline always writes full blocks of silence.

use crate::adaptive::AdaptiveController;
use crate::control::{ControlSlots, PipelineState};
use crate::error::{EngineError, Result};
use crate::latency::{CalibrationIo, CalibrationOutcome, LatencyManager, measure_round_trip};
use chroma_core::{
    BLOCK_SIZE, ChromaticFieldProcessor, CompensationDelay, Downmixer, PhiController, PhiOutput,
    PhiTickContext, ms_to_samples, wrap_phase,
};
use chroma_telemetry::{FanOutBus, FrameSender, LatencyFrame, MetricsFrame};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Static pipeline configuration.
#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    /// Engine sample rate in Hz.
    pub sample_rate: f32,
    /// Output channel count after the downmix.
    pub output_channels: usize,
    /// Capacity of the compensation delay line in milliseconds.
    pub max_compensation_ms: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            output_channels: 2,
            max_compensation_ms: 500.0,
        }
    }
}

/// Consumer-side handles created together with the pipeline: the control
/// slots and the two telemetry buses.
pub struct PipelineHandles {
    /// Shared parameter slots.
    pub slots: Arc<ControlSlots>,
    /// Metrics fan-out (≥ 30 Hz when running, 1 Hz heartbeat when idle).
    pub metrics: FanOutBus<MetricsFrame>,
    /// Latency fan-out.
    pub latency: FanOutBus<LatencyFrame>,
}

impl PipelineHandles {
    /// Non-blocking snapshot of the most recent metrics frame.
    pub fn latest_metrics(&self) -> Option<MetricsFrame> {
        self.metrics.latest()
    }

    /// Shut both buses down (1 s deadline semantics; consumers wake up and
    /// observe the close).
    pub fn shutdown(&self) {
        self.metrics.shutdown();
        self.latency.shutdown();
    }
}

/// The audio-thread object: owns every DSP component and the send side of
/// both buses. Moved into the device callback by the I/O layer.
pub struct Pipeline {
    config: PipelineConfig,
    slots: Arc<ControlSlots>,

    phi: PhiController,
    field: ChromaticFieldProcessor,
    downmixer: Downmixer,
    delays: Vec<CompensationDelay>,
    out_planar: Vec<Vec<f32>>,

    latency: LatencyManager,
    adaptive: AdaptiveController,

    metrics_tx: FrameSender<MetricsFrame>,
    latency_tx: FrameSender<LatencyFrame>,
    frame_counter: Arc<AtomicU64>,

    boot_wall_s: f64,
    boot: Instant,
    run_start_s: f64,
    blocks_processed: u64,
    cpu_load: f64,
    last_frame: MetricsFrame,
}

impl Pipeline {
    /// Build a pipeline and its consumer-side handles.
    pub fn new(config: PipelineConfig) -> (Pipeline, PipelineHandles) {
        let slots = Arc::new(ControlSlots::new());
        let frame_counter = Arc::new(AtomicU64::new(0));

        let boot = Instant::now();
        let boot_wall_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |d| d.as_secs_f64());

        // Heartbeat frames share the pipeline's frame counter so ids stay
        // strictly increasing for every subscriber.
        let hb_counter = Arc::clone(&frame_counter);
        let (metrics_tx, metrics_bus) = FanOutBus::spawn(
            chroma_telemetry::DEFAULT_RING_CAPACITY,
            Some(Box::new(move || {
                let timestamp = boot_wall_s + boot.elapsed().as_secs_f64();
                MetricsFrame::idle(timestamp, hb_counter.fetch_add(1, Ordering::Relaxed))
            })),
        );
        let (latency_tx, latency_bus) =
            FanOutBus::spawn(chroma_telemetry::DEFAULT_RING_CAPACITY, None);

        let sample_rate = config.sample_rate;
        let channels = config.output_channels.max(1);
        let pipeline = Pipeline {
            config,
            slots: Arc::clone(&slots),
            phi: PhiController::new(sample_rate),
            field: ChromaticFieldProcessor::new(sample_rate),
            downmixer: Downmixer::new(channels),
            delays: (0..channels)
                .map(|_| CompensationDelay::from_ms(sample_rate, config.max_compensation_ms))
                .collect(),
            out_planar: vec![vec![0.0; BLOCK_SIZE]; channels],
            latency: LatencyManager::new(f64::from(sample_rate), BLOCK_SIZE as u32),
            adaptive: AdaptiveController::new(0.5),
            metrics_tx,
            latency_tx,
            frame_counter,
            boot_wall_s,
            boot,
            run_start_s: 0.0,
            blocks_processed: 0,
            cpu_load: 0.0,
            last_frame: MetricsFrame::default(),
        };

        (
            pipeline,
            PipelineHandles {
                slots,
                metrics: metrics_bus,
                latency: latency_bus,
            },
        )
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.slots.state()
    }

    /// The shared control slots.
    pub fn slots(&self) -> &Arc<ControlSlots> {
        &self.slots
    }

    /// Transition `Stopped → Running` without calibration.
    pub fn start(&mut self) -> Result<()> {
        if self.slots.state() != PipelineState::Stopped {
            return Err(EngineError::InvalidTransition(
                "start is only valid from Stopped",
            ));
        }
        self.begin_run();
        self.slots.set_state(PipelineState::Running);
        tracing::info!(sample_rate = self.config.sample_rate, "pipeline running");
        Ok(())
    }

    /// Transition `Stopped → Calibrating → Running`.
    ///
    /// Runs the blocking loopback measurement synchronously. On failure the
    /// pipeline returns to `Stopped` and the cause is surfaced.
    pub fn start_calibrated(
        &mut self,
        io: &mut dyn CalibrationIo,
        hw_input_ms: f64,
        hw_output_ms: f64,
    ) -> Result<CalibrationOutcome> {
        if self.slots.state() != PipelineState::Stopped {
            return Err(EngineError::InvalidTransition(
                "start is only valid from Stopped",
            ));
        }
        self.slots.set_state(PipelineState::Calibrating);

        match measure_round_trip(io, self.config.sample_rate) {
            Ok(outcome) => {
                self.latency
                    .apply_calibration(&outcome, hw_input_ms, hw_output_ms, &self.slots);
                self.begin_run();
                self.slots.set_state(PipelineState::Running);
                tracing::info!(
                    total_ms = outcome.total_measured_ms,
                    quality = outcome.quality,
                    "pipeline running, calibrated"
                );
                Ok(outcome)
            }
            Err(cause) => {
                self.slots.set_state(PipelineState::Stopped);
                tracing::warn!(%cause, "calibration failed, pipeline stopped");
                Err(EngineError::Calibration(cause))
            }
        }
    }

    /// One-shot calibration from `Stopped`, without starting the pipeline.
    pub fn calibrate_latency(
        &mut self,
        io: &mut dyn CalibrationIo,
        hw_input_ms: f64,
        hw_output_ms: f64,
    ) -> Result<CalibrationOutcome> {
        if self.slots.state() != PipelineState::Stopped {
            return Err(EngineError::InvalidTransition(
                "calibration never runs concurrently with Running",
            ));
        }
        self.slots.set_state(PipelineState::Calibrating);
        let result = measure_round_trip(io, self.config.sample_rate);
        self.slots.set_state(PipelineState::Stopped);

        let outcome = result.map_err(EngineError::Calibration)?;
        self.latency
            .apply_calibration(&outcome, hw_input_ms, hw_output_ms, &self.slots);
        Ok(outcome)
    }

    /// Transition `Running | Faulted → Stopped`, clearing transient DSP
    /// state.
    pub fn stop(&mut self) -> Result<()> {
        match self.slots.state() {
            PipelineState::Running | PipelineState::Faulted => {
                self.slots.set_state(PipelineState::Stopped);
                for delay in &mut self.delays {
                    delay.clear();
                }
                self.field.reset();
                tracing::info!("pipeline stopped");
                Ok(())
            }
            _ => Err(EngineError::InvalidTransition(
                "stop is only valid from Running or Faulted",
            )),
        }
    }

    /// Mark the pipeline faulted after an irrecoverable device error.
    /// Subsequent blocks are silence until `stop()` is called.
    pub fn fault(&mut self, reason: &str) {
        tracing::error!(reason, "pipeline faulted");
        self.slots.set_state(PipelineState::Faulted);
    }

    /// Most recent metrics frame built by the callback (for tests and the
    /// in-process snapshot path).
    pub fn last_frame(&self) -> &MetricsFrame {
        &self.last_frame
    }

    /// Latency state snapshot.
    pub fn latency_frame(&self) -> LatencyFrame {
        self.latency.snapshot(self.now_s())
    }

    /// Number of drift corrections applied this run.
    pub fn drift_corrections(&self) -> u32 {
        self.latency.corrections()
    }

    fn begin_run(&mut self) {
        self.blocks_processed = 0;
        self.run_start_s = self.now_s();
        self.field.reset();
        for delay in &mut self.delays {
            delay.clear();
        }
    }

    fn now_s(&self) -> f64 {
        self.boot_wall_s + self.boot.elapsed().as_secs_f64()
    }

    /// Process one mono input block into interleaved output.
    ///
    /// `output.len()` must be `input.len() * output_channels`; `input` must
    /// not exceed [`BLOCK_SIZE`] frames. Outside `Running` the output is
    /// silence. This is the audio-thread entry point: wait-free end to end.
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        if self.slots.state() != PipelineState::Running {
            output.fill(0.0);
            return;
        }

        let started = Instant::now();
        let frames = input.len().min(BLOCK_SIZE);
        let channels = self.downmixer.out_channels();
        let dt = frames as f32 / self.config.sample_rate;

        // 1. Timing and drift.
        let now_s = self.now_s();
        let expected_s =
            self.run_start_s + self.blocks_processed as f64 * f64::from(dt);
        self.latency.on_block(expected_s, now_s, &self.slots);

        // 2-3. Controls and Φ tick.
        let desired = self.slots.phi_source();
        if desired != self.phi.active_kind() {
            self.phi.set_source(desired);
        }
        let (manual_phase, manual_depth) = self.slots.phi_manual();
        self.phi.set_manual(manual_phase, manual_depth);
        self.phi.set_internal_rate(self.slots.internal_rate_hz());

        let ctx = PhiTickContext {
            input,
            sensor_value: self.slots.sensor_value(),
        };
        let source_out = self.phi.tick(dt, &ctx);

        // The adaptive controller owns the effective depth when enabled and
        // contributes a phase offset on top of the active source.
        let phi_eff = if self.slots.adaptive_enabled() {
            PhiOutput {
                phase: wrap_phase(
                    source_out.phase
                        + core::f32::consts::TAU * self.slots.auto_phase_offset(),
                ),
                depth: self.slots.auto_depth(),
            }
        } else {
            source_out
        };

        // 4-6. Field transform, downmix, compensation delay.
        let metrics = self.field.process(&input[..frames], phi_eff);
        self.downmixer.mix(
            self.field.bus(),
            &mut self.out_planar,
            self.slots.downmix_strategy(),
            phi_eff,
        );

        let delay_samples = ms_to_samples(
            self.slots.compensation_offset_ms(),
            self.config.sample_rate,
        );
        for (ch, delay) in self.out_planar.iter_mut().zip(self.delays.iter_mut()) {
            delay.set_delay_samples(delay_samples);
            delay.process_block_inplace(&mut ch[..frames]);
        }

        // 10. Containment: any non-finite escape becomes silence.
        let output_finite = self
            .out_planar
            .iter()
            .all(|ch| ch[..frames].iter().all(|s| s.is_finite()));
        if output_finite {
            for n in 0..frames {
                for ch in 0..channels {
                    output[n * channels + ch] = self.out_planar[ch][n];
                }
            }
        } else {
            output.fill(0.0);
        }
        let block_ok = metrics.input_valid && output_finite;

        // 7. Frame assembly.
        let frame_id = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        let mut frame = MetricsFrame {
            timestamp_s: now_s,
            frame_id,
            ici: f64::from(metrics.ici),
            phase_coherence: f64::from(metrics.phase_coherence),
            spectral_centroid_hz: f64::from(metrics.spectral_centroid_hz),
            criticality: f64::from(metrics.criticality),
            consciousness_level: f64::from(metrics.consciousness_level),
            state: chroma_telemetry::ConsciousnessState::Transition,
            phi_phase: f64::from(phi_eff.phase),
            phi_depth: f64::from(phi_eff.depth),
            phi_source: self.phi.active_kind(),
            latency_ms: self.latency.frame().effective_ms,
            cpu_load: self.cpu_load,
            valid: block_ok,
        };
        frame.sanitize();
        frame.classify();

        // 8. Publish (wait-free on both buses).
        self.last_frame = frame.clone();
        self.metrics_tx.publish(frame.clone());
        self.latency_tx.publish(self.latency.snapshot(now_s));

        // 9. Adaptive feedback, synchronous and bounded.
        self.adaptive.observe(&frame, now_s, &self.slots);

        self.blocks_processed += 1;
        let budget = f64::from(dt);
        if budget > 0.0 {
            let spent = started.elapsed().as_secs_f64() / budget;
            self.cpu_load = 0.9 * self.cpu_load + 0.1 * spent.clamp(0.0, 1.0);
        }
    }
}

/// Adapts arbitrary device block sizes (multiples of 64 frames) to the
/// engine's fixed 512-frame blocks.
///
/// The device side pushes mono input and pops interleaved output each
/// callback; whole engine blocks are handed to the pipeline whenever enough
/// input has accumulated. Queues are pre-reserved so steady-state operation
/// does not allocate.
#[derive(Debug)]
pub struct BlockAssembler {
    channels: usize,
    input: VecDeque<f32>,
    output: VecDeque<f32>,
    scratch_in: Vec<f32>,
    scratch_out: Vec<f32>,
}

impl BlockAssembler {
    /// Create an assembler for a given device block size.
    ///
    /// Returns [`EngineError::UnsupportedBlockSize`] unless the size is a
    /// positive multiple of 64 frames.
    pub fn new(device_block_frames: usize, channels: usize) -> Result<Self> {
        if device_block_frames == 0 || device_block_frames % 64 != 0 {
            return Err(EngineError::UnsupportedBlockSize(device_block_frames));
        }
        let channels = channels.max(1);
        let depth = (2 * BLOCK_SIZE).max(2 * device_block_frames);
        Ok(Self {
            channels,
            input: VecDeque::with_capacity(depth),
            output: VecDeque::with_capacity(depth * channels),
            scratch_in: vec![0.0; BLOCK_SIZE],
            scratch_out: vec![0.0; BLOCK_SIZE * channels],
        })
    }

    /// Queue mono input samples from the device callback.
    pub fn push_input(&mut self, mono: &[f32]) {
        self.input.extend(mono.iter().copied());
    }

    /// Run the pipeline for every complete engine block currently queued.
    pub fn drain_into(&mut self, pipeline: &mut Pipeline) {
        while self.input.len() >= BLOCK_SIZE {
            for sample in &mut self.scratch_in {
                *sample = self.input.pop_front().unwrap_or(0.0);
            }
            pipeline.process_block(&self.scratch_in, &mut self.scratch_out);
            self.output.extend(self.scratch_out.iter().copied());
        }
    }

    /// Fill one device output buffer (interleaved). Underruns are padded
    /// with silence.
    pub fn pop_output(&mut self, interleaved: &mut [f32]) {
        for sample in interleaved.iter_mut() {
            *sample = self.output.pop_front().unwrap_or(0.0);
        }
    }

    /// Interleaved output samples currently buffered.
    pub fn buffered_output(&self) -> usize {
        self.output.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_transitions() {
        let (mut pipeline, handles) = Pipeline::new(PipelineConfig::default());
        assert_eq!(pipeline.state(), PipelineState::Stopped);

        assert!(pipeline.stop().is_err(), "stop from Stopped is invalid");
        pipeline.start().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Running);
        assert!(pipeline.start().is_err(), "start from Running is invalid");

        pipeline.fault("device unplugged");
        assert_eq!(pipeline.state(), PipelineState::Faulted);
        pipeline.stop().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        handles.shutdown();
    }

    #[test]
    fn test_stopped_pipeline_emits_silence() {
        let (mut pipeline, handles) = Pipeline::new(PipelineConfig::default());
        let input = vec![0.5f32; BLOCK_SIZE];
        let mut output = vec![1.0f32; BLOCK_SIZE * 2];

        pipeline.process_block(&input, &mut output);
        assert!(output.iter().all(|&s| s == 0.0));
        handles.shutdown();
    }

    #[test]
    fn test_faulted_pipeline_emits_silence() {
        let (mut pipeline, handles) = Pipeline::new(PipelineConfig::default());
        pipeline.start().unwrap();
        pipeline.fault("rate mismatch");

        let input = vec![0.5f32; BLOCK_SIZE];
        let mut output = vec![1.0f32; BLOCK_SIZE * 2];
        pipeline.process_block(&input, &mut output);
        assert!(output.iter().all(|&s| s == 0.0));
        handles.shutdown();
    }

    #[test]
    fn test_block_assembler_rejects_bad_sizes() {
        assert!(matches!(
            BlockAssembler::new(100, 2),
            Err(EngineError::UnsupportedBlockSize(100))
        ));
        assert!(matches!(
            BlockAssembler::new(0, 2),
            Err(EngineError::UnsupportedBlockSize(0))
        ));
        assert!(BlockAssembler::new(64, 2).is_ok());
        assert!(BlockAssembler::new(512, 2).is_ok());
        assert!(BlockAssembler::new(448, 2).is_ok());
    }

    #[test]
    fn test_block_assembler_rebuffers_odd_device_sizes() {
        let (mut pipeline, handles) = Pipeline::new(PipelineConfig::default());
        pipeline.start().unwrap();

        let mut assembler = BlockAssembler::new(192, 2).unwrap();
        let device_in = vec![0.0f32; 192];
        let mut device_out = vec![0.0f32; 192 * 2];

        // 8 device blocks of 192 = 3 engine blocks of 512.
        for _ in 0..8 {
            assembler.push_input(&device_in);
            assembler.drain_into(&mut pipeline);
            assembler.pop_output(&mut device_out);
        }
        // 3 engine blocks ran (ids 0..=2; the idle heartbeat may have
        // consumed additional ids on a slow machine).
        assert!(pipeline.last_frame().frame_id >= 2);
        handles.shutdown();
    }

    #[test]
    fn test_frame_ids_increase() {
        let (mut pipeline, handles) = Pipeline::new(PipelineConfig::default());
        pipeline.start().unwrap();

        let input = vec![0.0f32; BLOCK_SIZE];
        let mut output = vec![0.0f32; BLOCK_SIZE * 2];
        let mut last = None;
        for _ in 0..5 {
            pipeline.process_block(&input, &mut output);
            let id = pipeline.last_frame().frame_id;
            if let Some(prev) = last {
                assert!(id > prev);
            }
            last = Some(id);
        }
        handles.shutdown();
    }
}
