//! Latency calibration, decomposition, drift monitoring, and compensation
//! bookkeeping.
//!
//! Calibration is one-shot and blocking: play a 100 ms 1 kHz burst through
//! the loopback, record simultaneously, and take the positive-lag peak of
//! the cross-correlation as the round-trip delay. A measurement is rejected
//! when it falls outside (0, 500) ms or when the correlation peak does not
//! stand at least 3× above the mean level.
//!
//! The drift monitor runs on every block: it keeps ten minutes of
//! (expected, actual) callback times, estimates the drift rate from a
//! linear fit over the last second, and applies a one-shot compensation
//! correction of `−current_drift_ms` when the cumulative drift exceeds the
//! budget, never more than once per 60 s.

use crate::control::ControlSlots;
use crate::error::CalibrationError;
use crate::xcorr::{peak_with_prominence, xcorr_positive};
use chroma_telemetry::LatencyFrame;

/// Length of the calibration sine burst in seconds.
pub const BURST_SECS: f32 = 0.1;

/// Calibration stimulus tone frequency in Hz.
pub const BURST_FREQUENCY_HZ: f32 = 1000.0;

/// Silence before the burst, so device startup transients settle.
const PRE_SILENCE_SECS: f32 = 0.2;

/// Silence after the burst, covering the round-trip window.
const POST_SILENCE_SECS: f32 = 0.4;

/// Upper bound of plausible round-trip latency in ms.
pub const MAX_PLAUSIBLE_MS: f64 = 500.0;

/// Minimum correlation peak-to-mean ratio for an accepted measurement.
pub const MIN_PEAK_RATIO: f64 = 3.0;

/// Seconds between drift corrections.
pub const CORRECTION_HOLDOFF_SECS: f64 = 60.0;

/// Loopback capture abstraction used by calibration.
///
/// The production implementation plays the stimulus on the output device
/// while recording the input; tests substitute a synthetic delay. Blocking,
/// with an absolute timeout of the stimulus duration plus two seconds.
pub trait CalibrationIo {
    /// Play `stimulus` and return the simultaneous recording.
    fn round_trip(
        &mut self,
        stimulus: &[f32],
        sample_rate: f32,
    ) -> Result<Vec<f32>, CalibrationError>;
}

/// An accepted calibration measurement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationOutcome {
    /// Round-trip latency in milliseconds.
    pub total_measured_ms: f64,
    /// Measurement quality in `[0, 1]`, derived from peak prominence.
    pub quality: f64,
    /// Raw correlation peak lag in samples.
    pub lag_samples: usize,
}

/// Build the calibration stimulus: silence, a 100 ms 1 kHz burst with 5 ms
/// raised-cosine edges, then enough tail silence to cover the round trip.
pub fn build_stimulus(sample_rate: f32) -> Vec<f32> {
    let pre = (PRE_SILENCE_SECS * sample_rate) as usize;
    let burst = (BURST_SECS * sample_rate) as usize;
    let post = (POST_SILENCE_SECS * sample_rate) as usize;
    let ramp = (0.005 * sample_rate) as usize;

    let mut stimulus = vec![0.0f32; pre + burst + post];
    for n in 0..burst {
        let mut gain = 0.8;
        if n < ramp {
            gain *= 0.5 * (1.0 - (core::f32::consts::PI * n as f32 / ramp as f32).cos());
        } else if n >= burst - ramp {
            let k = burst - 1 - n;
            gain *= 0.5 * (1.0 - (core::f32::consts::PI * k as f32 / ramp as f32).cos());
        }
        stimulus[pre + n] =
            gain * (core::f32::consts::TAU * BURST_FREQUENCY_HZ * n as f32 / sample_rate).sin();
    }
    stimulus
}

/// Run one blocking round-trip measurement through `io`.
pub fn measure_round_trip(
    io: &mut dyn CalibrationIo,
    sample_rate: f32,
) -> Result<CalibrationOutcome, CalibrationError> {
    let stimulus = build_stimulus(sample_rate);
    let recorded = io.round_trip(&stimulus, sample_rate)?;

    let peak_level = recorded.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
    if peak_level < 1e-6 {
        return Err(CalibrationError::SilentLoopback);
    }

    let max_lag = (MAX_PLAUSIBLE_MS / 1000.0 * f64::from(sample_rate)) as usize;
    let correlation = xcorr_positive(&stimulus, &recorded, max_lag);
    let (lag, ratio) = peak_with_prominence(&correlation);

    if ratio < MIN_PEAK_RATIO {
        return Err(CalibrationError::LowQuality { ratio });
    }

    let total_measured_ms = lag as f64 / f64::from(sample_rate) * 1000.0;
    if total_measured_ms <= 0.0 || total_measured_ms >= MAX_PLAUSIBLE_MS {
        return Err(CalibrationError::OutOfRange {
            measured_ms: total_measured_ms,
        });
    }

    let quality = (1.0 - MIN_PEAK_RATIO / ratio).clamp(0.0, 1.0);
    tracing::info!(total_measured_ms, quality, lag, "calibration accepted");

    Ok(CalibrationOutcome {
        total_measured_ms,
        quality,
        lag_samples: lag,
    })
}

/// Split a measured total into its components.
///
/// `os_ms` is the residual after the device's nominal hardware latencies and
/// one engine block, clamped at zero.
pub fn decompose(total_ms: f64, hw_input_ms: f64, hw_output_ms: f64, engine_ms: f64) -> f64 {
    (total_ms - (hw_input_ms + hw_output_ms + engine_ms)).max(0.0)
}

/// Bounded history of callback timing with drift-rate estimation.
///
/// Capacity covers ten minutes at the block rate; pushes are allocation-free
/// after construction, so the monitor can be fed from the audio thread.
#[derive(Debug, Clone)]
pub struct DriftMonitor {
    /// Ring of `(expected_s, offset_s)` where offset = actual − expected.
    history: Vec<(f64, f64)>,
    capacity: usize,
    head: usize,
    /// Entries used for the rate fit; at least one second of blocks.
    fit_window: usize,
    /// Offset at the moment of the last correction.
    baseline_s: f64,
    start_s: Option<f64>,
    last_correction_s: Option<f64>,
    corrections: u32,
}

impl DriftMonitor {
    /// Create a monitor for the given callback rate in blocks per second.
    pub fn new(block_rate_hz: f64) -> Self {
        let rate = block_rate_hz.max(1.0);
        let capacity = (600.0 * rate) as usize;
        Self {
            history: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            fit_window: rate.ceil() as usize + 1,
            baseline_s: 0.0,
            start_s: None,
            last_correction_s: None,
            corrections: 0,
        }
    }

    /// Record one callback's `(expected, actual)` times in seconds.
    pub fn record(&mut self, expected_s: f64, actual_s: f64) {
        let entry = (expected_s, actual_s - expected_s);
        if self.history.len() < self.capacity {
            self.history.push(entry);
        } else {
            self.history[self.head] = entry;
        }
        self.head = (self.head + 1) % self.capacity;

        if self.start_s.is_none() {
            self.start_s = Some(actual_s);
            // The holdoff clock starts at boot, so no correction can fire
            // inside the first minute.
            self.last_correction_s = Some(actual_s);
        }
    }

    fn last_entry(&self) -> Option<(f64, f64)> {
        if self.history.is_empty() {
            return None;
        }
        let idx = if self.history.len() < self.capacity {
            self.history.len() - 1
        } else {
            (self.head + self.capacity - 1) % self.capacity
        };
        Some(self.history[idx])
    }

    /// Cumulative drift since the last correction, in milliseconds.
    pub fn current_drift_ms(&self) -> f64 {
        self.last_entry()
            .map_or(0.0, |(_, offset)| (offset - self.baseline_s) * 1000.0)
    }

    /// Drift rate in ms/s: least-squares slope over the last second.
    pub fn drift_rate_ms_per_s(&self) -> f64 {
        let n = self.fit_window.min(self.history.len());
        if n < 2 {
            return 0.0;
        }

        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut sum_xx = 0.0;
        let mut sum_xy = 0.0;
        for i in 0..n {
            let idx = if self.history.len() < self.capacity {
                self.history.len() - n + i
            } else {
                (self.head + self.capacity - n + i) % self.capacity
            };
            let (x, y) = self.history[idx];
            sum_x += x;
            sum_y += y;
            sum_xx += x * x;
            sum_xy += x * y;
        }
        let n_f = n as f64;
        let denom = n_f * sum_xx - sum_x * sum_x;
        if denom.abs() < f64::EPSILON {
            return 0.0;
        }
        (n_f * sum_xy - sum_x * sum_y) / denom * 1000.0
    }

    /// Check the correction budget and, when exceeded, return the one-shot
    /// correction (`−current_drift_ms`) to apply to the compensation offset.
    ///
    /// The drift budget grows with uptime (`2 ms` per ten minutes) and
    /// corrections are held off for 60 s after the previous one.
    pub fn maybe_correct(&mut self, now_s: f64) -> Option<f64> {
        let start = self.start_s?;
        let drift_ms = self.current_drift_ms();

        let elapsed_minutes = (now_s - start) / 60.0;
        let threshold_ms = 2.0 * (elapsed_minutes / 10.0);
        if drift_ms.abs() <= threshold_ms.max(f64::EPSILON) {
            return None;
        }
        if let Some(last) = self.last_correction_s {
            if now_s - last < CORRECTION_HOLDOFF_SECS {
                return None;
            }
        }

        self.baseline_s = self.last_entry().map_or(0.0, |(_, offset)| offset);
        self.last_correction_s = Some(now_s);
        self.corrections += 1;
        Some(-drift_ms)
    }

    /// Number of corrections applied so far.
    pub fn corrections(&self) -> u32 {
        self.corrections
    }
}

/// Owns the [`LatencyFrame`] snapshot and the drift monitor.
#[derive(Debug)]
pub struct LatencyManager {
    frame: LatencyFrame,
    drift: DriftMonitor,
}

impl LatencyManager {
    /// Create a manager with boot defaults.
    pub fn new(sample_rate: f64, buffer_size: u32) -> Self {
        let block_rate = if buffer_size > 0 {
            sample_rate / f64::from(buffer_size)
        } else {
            90.0
        };
        Self {
            frame: LatencyFrame::uncalibrated(sample_rate, buffer_size),
            drift: DriftMonitor::new(block_rate),
        }
    }

    /// Record an accepted calibration and initialise compensation to the
    /// measured total (clamped to the compensation range).
    pub fn apply_calibration(
        &mut self,
        outcome: &CalibrationOutcome,
        hw_input_ms: f64,
        hw_output_ms: f64,
        slots: &ControlSlots,
    ) {
        self.frame.hw_input_ms = hw_input_ms;
        self.frame.hw_output_ms = hw_output_ms;
        self.frame.os_ms = decompose(
            outcome.total_measured_ms,
            hw_input_ms,
            hw_output_ms,
            self.frame.engine_ms,
        );
        self.frame.total_measured_ms = outcome.total_measured_ms;
        self.frame.calibrated = true;
        self.frame.calibration_quality = outcome.quality;

        let offset = outcome.total_measured_ms.clamp(0.0, 200.0) as f32;
        // In range by construction, so this cannot fail.
        let _ = slots.set_compensation_offset_ms(offset);
        self.frame.compensation_offset_ms = f64::from(offset);
        self.frame.update_effective();
    }

    /// Per-block bookkeeping: update the drift history and apply a
    /// correction when the monitor calls for one.
    pub fn on_block(&mut self, expected_s: f64, actual_s: f64, slots: &ControlSlots) {
        self.drift.record(expected_s, actual_s);
        self.frame.drift_ms = self.drift.current_drift_ms();
        self.frame.drift_rate_ms_per_s = self.drift.drift_rate_ms_per_s();

        if let Some(correction_ms) = self.drift.maybe_correct(actual_s) {
            let adjusted = (slots.compensation_offset_ms() + correction_ms as f32)
                .clamp(0.0, 200.0);
            let _ = slots.set_compensation_offset_ms(adjusted);
            tracing::info!(correction_ms, adjusted, "drift correction applied");
        }

        self.frame.compensation_offset_ms = f64::from(slots.compensation_offset_ms());
        self.frame.update_effective();
    }

    /// Current latency state stamped with `timestamp_s`.
    pub fn snapshot(&self, timestamp_s: f64) -> LatencyFrame {
        let mut frame = self.frame.clone();
        frame.timestamp_s = timestamp_s;
        frame
    }

    /// Current latency state (borrowed).
    pub fn frame(&self) -> &LatencyFrame {
        &self.frame
    }

    /// Number of drift corrections applied.
    pub fn corrections(&self) -> u32 {
        self.drift.corrections()
    }
}
