//! Per-block telemetry value records.
//!
//! [`MetricsFrame`] and [`LatencyFrame`] are immutable once published: the
//! pipeline constructs one per block, runs [`MetricsFrame::sanitize`] and
//! [`MetricsFrame::classify`], then moves it into the bus by value. The
//! serde derives define the JSON wire format directly, one object per
//! frame, no array wrapper, with the key names fixed below.

use chroma_core::PhiSourceKind;
use serde::{Deserialize, Serialize};

/// Consciousness-proxy state, classified from the block metrics.
///
/// Serialises as the literal uppercase string (`"DEEP_SLEEP"` etc.).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsciousnessState {
    /// No significant activity.
    #[default]
    Idle,
    /// Low consciousness with high coherence.
    DeepSleep,
    /// Mid-low consciousness with low coherence.
    Dreaming,
    /// Mid consciousness near criticality.
    Rem,
    /// High consciousness.
    Awake,
    /// Criticality beyond the critical band edge.
    Critical,
    /// Anything between the named regimes.
    Transition,
}

/// Deterministic state decision table.
///
/// Rules are evaluated in order; the first match wins:
///
/// 1. criticality > 0.9 → CRITICAL
/// 2. consciousness < 0.1 → IDLE
/// 3. consciousness > 0.6 → AWAKE
/// 4. consciousness < 0.3 and coherence > 0.7 → DEEP_SLEEP
/// 5. 0.3 ≤ consciousness < 0.5 and coherence < 0.5 → DREAMING
/// 6. 0.4 ≤ consciousness < 0.6 and criticality > 0.7 → REM
/// 7. otherwise → TRANSITION
pub fn classify_state(
    consciousness_level: f64,
    phase_coherence: f64,
    criticality: f64,
) -> ConsciousnessState {
    if criticality > 0.9 {
        ConsciousnessState::Critical
    } else if consciousness_level < 0.1 {
        ConsciousnessState::Idle
    } else if consciousness_level > 0.6 {
        ConsciousnessState::Awake
    } else if consciousness_level < 0.3 && phase_coherence > 0.7 {
        ConsciousnessState::DeepSleep
    } else if (0.3..0.5).contains(&consciousness_level) && phase_coherence < 0.5 {
        ConsciousnessState::Dreaming
    } else if (0.4..0.6).contains(&consciousness_level) && criticality > 0.7 {
        ConsciousnessState::Rem
    } else {
        ConsciousnessState::Transition
    }
}

/// One block's metrics snapshot.
///
/// Every numeric field is finite after [`sanitize`](Self::sanitize); `state`
/// is a pure function of `(consciousness_level, phase_coherence,
/// criticality)` via [`classify_state`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsFrame {
    /// Wall-clock timestamp in seconds, monotonic-aligned.
    #[serde(rename = "timestamp")]
    pub timestamp_s: f64,
    /// Monotonically increasing block counter.
    pub frame_id: u64,
    /// Inter-channel interference, `[0, 1]`.
    pub ici: f64,
    /// Phase order parameter, `[0, 1]`.
    pub phase_coherence: f64,
    /// Envelope-weighted mean frequency in Hz.
    #[serde(rename = "spectral_centroid")]
    pub spectral_centroid_hz: f64,
    /// Distance-from-equilibrium proxy, `[0, 1.5]`.
    pub criticality: f64,
    /// Combined consciousness proxy, `[0, 1]`.
    pub consciousness_level: f64,
    /// Classified state (see [`classify_state`]).
    pub state: ConsciousnessState,
    /// Φ modulation phase, `[0, 2π)`.
    pub phi_phase: f64,
    /// Φ modulation depth, `[0, 1]`.
    pub phi_depth: f64,
    /// Which Φ source produced the modulation.
    pub phi_source: PhiSourceKind,
    /// Effective output latency in milliseconds.
    pub latency_ms: f64,
    /// Audio-callback load as a fraction of the block budget, `[0, 1]`.
    pub cpu_load: f64,
    /// False when any source value was non-finite before sanitation.
    pub valid: bool,
}

impl MetricsFrame {
    /// Synthetic idle frame used by the bus heartbeat: all metrics zero,
    /// state IDLE, valid.
    pub fn idle(timestamp_s: f64, frame_id: u64) -> Self {
        Self {
            timestamp_s,
            frame_id,
            state: ConsciousnessState::Idle,
            phi_source: PhiSourceKind::Internal,
            valid: true,
            ..Self::default()
        }
    }

    /// Replace every non-finite numeric field with zero (clearing `valid`),
    /// then clamp all fields into their documented ranges.
    pub fn sanitize(&mut self) {
        for value in [
            &mut self.timestamp_s,
            &mut self.ici,
            &mut self.phase_coherence,
            &mut self.spectral_centroid_hz,
            &mut self.criticality,
            &mut self.consciousness_level,
            &mut self.phi_phase,
            &mut self.phi_depth,
            &mut self.latency_ms,
            &mut self.cpu_load,
        ] {
            if !value.is_finite() {
                *value = 0.0;
                self.valid = false;
            }
        }

        self.ici = self.ici.clamp(0.0, 1.0);
        self.phase_coherence = self.phase_coherence.clamp(0.0, 1.0);
        self.spectral_centroid_hz = self.spectral_centroid_hz.max(0.0);
        self.criticality = self.criticality.clamp(0.0, 1.5);
        self.consciousness_level = self.consciousness_level.clamp(0.0, 1.0);
        self.phi_depth = self.phi_depth.clamp(0.0, 1.0);
        self.cpu_load = self.cpu_load.clamp(0.0, 1.0);
        self.phi_phase = self.phi_phase.rem_euclid(core::f64::consts::TAU);
    }

    /// Set `state` from the current metric values.
    pub fn classify(&mut self) {
        self.state = classify_state(
            self.consciousness_level,
            self.phase_coherence,
            self.criticality,
        );
    }
}

/// Per-block latency calibration snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatencyFrame {
    /// Wall-clock timestamp in seconds.
    #[serde(rename = "timestamp")]
    pub timestamp_s: f64,
    /// Input device's nominal hardware latency in ms.
    pub hw_input_ms: f64,
    /// Output device's nominal hardware latency in ms.
    pub hw_output_ms: f64,
    /// One engine block of latency in ms (`buffer_size / sample_rate`).
    pub engine_ms: f64,
    /// Residual OS/driver latency in ms (clamped at zero).
    pub os_ms: f64,
    /// Round-trip latency measured by calibration in ms.
    pub total_measured_ms: f64,
    /// Delay-line compensation currently applied in ms.
    pub compensation_offset_ms: f64,
    /// `total_measured_ms - compensation_offset_ms`.
    pub effective_ms: f64,
    /// Cumulative callback-clock drift since the last correction in ms.
    pub drift_ms: f64,
    /// Slope of the drift fit over the last second, ms per second.
    #[serde(rename = "drift_rate_ms_per_sec")]
    pub drift_rate_ms_per_s: f64,
    /// True once a calibration measurement has been accepted.
    pub calibrated: bool,
    /// Quality of the last calibration, `[0, 1]`.
    pub calibration_quality: f64,
    /// Engine sample rate in Hz.
    pub sample_rate: f64,
    /// Engine block size in frames.
    pub buffer_size: u32,
    /// Computed: `|effective_ms| <= 5`.
    pub aligned_5ms: bool,
}

impl LatencyFrame {
    /// Boot-time defaults: uncalibrated, zero everywhere.
    pub fn uncalibrated(sample_rate: f64, buffer_size: u32) -> Self {
        let engine_ms = if sample_rate > 0.0 {
            f64::from(buffer_size) / sample_rate * 1000.0
        } else {
            0.0
        };
        Self {
            timestamp_s: 0.0,
            hw_input_ms: 0.0,
            hw_output_ms: 0.0,
            engine_ms,
            os_ms: 0.0,
            total_measured_ms: 0.0,
            compensation_offset_ms: 0.0,
            effective_ms: 0.0,
            drift_ms: 0.0,
            drift_rate_ms_per_s: 0.0,
            calibrated: false,
            calibration_quality: 0.0,
            sample_rate,
            buffer_size,
            aligned_5ms: true,
        }
    }

    /// True iff the effective (residual) latency is within `tolerance_ms`.
    pub fn is_aligned(&self, tolerance_ms: f64) -> bool {
        self.effective_ms.abs() <= tolerance_ms
    }

    /// Recompute `effective_ms` and `aligned_5ms` from the measured total
    /// and the applied compensation.
    pub fn update_effective(&mut self) {
        self.effective_ms = self.total_measured_ms - self.compensation_offset_ms;
        self.aligned_5ms = self.is_aligned(5.0);
    }

    /// Replace non-finite numeric fields with zero.
    pub fn sanitize(&mut self) {
        for value in [
            &mut self.timestamp_s,
            &mut self.hw_input_ms,
            &mut self.hw_output_ms,
            &mut self.engine_ms,
            &mut self.os_ms,
            &mut self.total_measured_ms,
            &mut self.compensation_offset_ms,
            &mut self.effective_ms,
            &mut self.drift_ms,
            &mut self.drift_rate_ms_per_s,
            &mut self.calibration_quality,
            &mut self.sample_rate,
        ] {
            if !value.is_finite() {
                *value = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_decision_table() {
        // Rule 1: criticality dominates everything else.
        assert_eq!(classify_state(0.05, 0.0, 0.95), ConsciousnessState::Critical);
        assert_eq!(classify_state(0.9, 0.9, 1.2), ConsciousnessState::Critical);

        // Rule 2: idle.
        assert_eq!(classify_state(0.05, 0.9, 0.5), ConsciousnessState::Idle);

        // Rule 3: awake.
        assert_eq!(classify_state(0.7, 0.1, 0.5), ConsciousnessState::Awake);

        // Rule 4: deep sleep.
        assert_eq!(classify_state(0.2, 0.8, 0.5), ConsciousnessState::DeepSleep);

        // Rule 5: dreaming.
        assert_eq!(classify_state(0.4, 0.3, 0.5), ConsciousnessState::Dreaming);

        // Rule 6: REM (needs coherence outside the dreaming band).
        assert_eq!(classify_state(0.45, 0.6, 0.8), ConsciousnessState::Rem);

        // Rule 7: fallthrough.
        assert_eq!(classify_state(0.35, 0.6, 0.3), ConsciousnessState::Transition);
    }

    #[test]
    fn test_critical_band_edge_is_exclusive() {
        // Exactly 0.9 is not critical; a resting field sits here.
        assert_ne!(classify_state(0.0, 0.0, 0.9), ConsciousnessState::Critical);
        assert_eq!(classify_state(0.0, 0.0, 0.9), ConsciousnessState::Idle);
        assert_eq!(classify_state(0.0, 0.0, 0.9001), ConsciousnessState::Critical);
    }

    #[test]
    fn test_sanitize_clears_non_finite() {
        let mut frame = MetricsFrame {
            ici: f64::NAN,
            criticality: f64::INFINITY,
            valid: true,
            ..MetricsFrame::default()
        };
        frame.sanitize();
        assert_eq!(frame.ici, 0.0);
        assert_eq!(frame.criticality, 0.0);
        assert!(!frame.valid);
    }

    #[test]
    fn test_sanitize_clamps_ranges() {
        let mut frame = MetricsFrame {
            ici: 1.5,
            phase_coherence: -0.2,
            criticality: 2.0,
            phi_phase: 10.0,
            valid: true,
            ..MetricsFrame::default()
        };
        frame.sanitize();
        assert_eq!(frame.ici, 1.0);
        assert_eq!(frame.phase_coherence, 0.0);
        assert_eq!(frame.criticality, 1.5);
        assert!(frame.phi_phase < core::f64::consts::TAU);
        // Range clamping alone does not invalidate the frame.
        assert!(frame.valid);
    }

    #[test]
    fn test_idle_frame_shape() {
        let frame = MetricsFrame::idle(12.5, 42);
        assert_eq!(frame.timestamp_s, 12.5);
        assert_eq!(frame.frame_id, 42);
        assert_eq!(frame.state, ConsciousnessState::Idle);
        assert_eq!(frame.ici, 0.0);
        assert!(frame.valid);
    }

    #[test]
    fn test_metrics_wire_keys_and_state_string() {
        let mut frame = MetricsFrame::idle(1.0, 7);
        frame.consciousness_level = 0.25;
        frame.phase_coherence = 0.8;
        frame.classify();
        assert_eq!(frame.state, ConsciousnessState::DeepSleep);

        let value = serde_json::to_value(&frame).unwrap();
        let obj = value.as_object().unwrap();
        for key in [
            "timestamp",
            "frame_id",
            "ici",
            "phase_coherence",
            "spectral_centroid",
            "criticality",
            "consciousness_level",
            "state",
            "phi_phase",
            "phi_depth",
            "phi_source",
            "latency_ms",
            "cpu_load",
            "valid",
        ] {
            assert!(obj.contains_key(key), "missing wire key '{key}'");
        }
        assert_eq!(obj["state"], "DEEP_SLEEP");
        assert_eq!(obj["phi_source"], "internal");
    }

    #[test]
    fn test_metrics_json_round_trip_bit_for_bit() {
        let mut frame = MetricsFrame {
            timestamp_s: 1234.567_890_123,
            frame_id: 99,
            ici: 0.123_456_789,
            phase_coherence: 0.987_654_321,
            spectral_centroid_hz: 432.1,
            criticality: 1.037,
            consciousness_level: 0.55,
            state: ConsciousnessState::Rem,
            phi_phase: 3.14159,
            phi_depth: 0.618_033_9,
            phi_source: PhiSourceKind::Audio,
            latency_ms: 12.75,
            cpu_load: 0.42,
            valid: true,
        };
        frame.sanitize();

        let json = serde_json::to_string(&frame).unwrap();
        let back: MetricsFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame, "round trip must preserve every field");
    }

    #[test]
    fn test_latency_frame_effective_and_alignment() {
        let mut frame = LatencyFrame::uncalibrated(48000.0, 512);
        frame.total_measured_ms = 17.5;
        frame.compensation_offset_ms = 14.0;
        frame.update_effective();

        assert_eq!(frame.effective_ms, 3.5);
        assert!(frame.aligned_5ms);
        assert!(frame.is_aligned(5.0));
        assert!(!frame.is_aligned(3.0));

        frame.compensation_offset_ms = 0.0;
        frame.update_effective();
        assert!(!frame.aligned_5ms);
    }

    #[test]
    fn test_latency_frame_wire_keys() {
        let frame = LatencyFrame::uncalibrated(48000.0, 512);
        let value = serde_json::to_value(&frame).unwrap();
        let obj = value.as_object().unwrap();
        for key in [
            "timestamp",
            "hw_input_ms",
            "hw_output_ms",
            "engine_ms",
            "os_ms",
            "total_measured_ms",
            "compensation_offset_ms",
            "effective_ms",
            "drift_ms",
            "drift_rate_ms_per_sec",
            "calibrated",
            "calibration_quality",
            "aligned_5ms",
        ] {
            assert!(obj.contains_key(key), "missing wire key '{key}'");
        }
    }

    #[test]
    fn test_latency_frame_engine_ms() {
        let frame = LatencyFrame::uncalibrated(48000.0, 512);
        assert!((frame.engine_ms - 10.666).abs() < 0.01);
    }
}
