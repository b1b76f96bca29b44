//! Atomic control slots shared between the audio thread and the control API.
//!
//! Every externally tunable parameter lives in its own single-word atomic:
//! the control side writes with release semantics, the audio thread reads
//! with acquire semantics at the top of each block. No lock is ever taken on
//! the audio thread.
//!
//! Setters validate ranges; an out-of-range value is rejected with
//! [`EngineError::ParameterOutOfRange`] and the previous value is retained.

use crate::error::{EngineError, Result};
use chroma_core::{DownmixStrategy, PhiSourceKind, wrap_phase};
use portable_atomic::{AtomicF32, AtomicF64};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Pipeline lifecycle state, stored as a single atomic word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PipelineState {
    /// Not processing; resources released.
    #[default]
    Stopped,
    /// One-shot latency calibration in progress.
    Calibrating,
    /// Audio callback active.
    Running,
    /// Irrecoverable device error; callback emits silence.
    Faulted,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PipelineState::Calibrating,
            2 => PipelineState::Running,
            3 => PipelineState::Faulted,
            _ => PipelineState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PipelineState::Stopped => 0,
            PipelineState::Calibrating => 1,
            PipelineState::Running => 2,
            PipelineState::Faulted => 3,
        }
    }
}

fn source_to_u8(kind: PhiSourceKind) -> u8 {
    match kind {
        PhiSourceKind::Manual => 0,
        PhiSourceKind::Audio => 1,
        PhiSourceKind::Sensor => 2,
        PhiSourceKind::Internal => 3,
    }
}

fn source_from_u8(value: u8) -> PhiSourceKind {
    match value {
        0 => PhiSourceKind::Manual,
        1 => PhiSourceKind::Audio,
        2 => PhiSourceKind::Sensor,
        _ => PhiSourceKind::Internal,
    }
}

fn strategy_to_u8(strategy: DownmixStrategy) -> u8 {
    match strategy {
        DownmixStrategy::Linear => 0,
        DownmixStrategy::Energy => 1,
        DownmixStrategy::Spatial => 2,
        DownmixStrategy::Phi => 3,
    }
}

fn strategy_from_u8(value: u8) -> DownmixStrategy {
    match value {
        1 => DownmixStrategy::Energy,
        2 => DownmixStrategy::Spatial,
        3 => DownmixStrategy::Phi,
        _ => DownmixStrategy::Linear,
    }
}

/// One atomic slot per externally controllable parameter.
#[derive(Debug)]
pub struct ControlSlots {
    state: AtomicU8,

    phi_source: AtomicU8,
    manual_phase: AtomicF32,
    manual_depth: AtomicF32,
    internal_rate_hz: AtomicF32,
    sensor_value: AtomicF32,

    downmix: AtomicU8,

    adaptive_enabled: AtomicBool,
    adaptive_k: AtomicF32,
    adaptive_gamma: AtomicF32,
    adaptive_target: AtomicF32,
    adaptive_bias: AtomicF64,
    auto_depth: AtomicF32,
    auto_phase_offset: AtomicF32,

    compensation_offset_ms: AtomicF32,
}

impl Default for ControlSlots {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(PipelineState::Stopped.as_u8()),
            phi_source: AtomicU8::new(source_to_u8(PhiSourceKind::Internal)),
            manual_phase: AtomicF32::new(0.0),
            manual_depth: AtomicF32::new(0.5),
            internal_rate_hz: AtomicF32::new(chroma_core::GOLDEN_RATIO_CONJUGATE),
            sensor_value: AtomicF32::new(0.0),
            downmix: AtomicU8::new(strategy_to_u8(DownmixStrategy::Linear)),
            adaptive_enabled: AtomicBool::new(false),
            adaptive_k: AtomicF32::new(0.25),
            adaptive_gamma: AtomicF32::new(0.1),
            adaptive_target: AtomicF32::new(1.0),
            adaptive_bias: AtomicF64::new(0.0),
            auto_depth: AtomicF32::new(0.5),
            auto_phase_offset: AtomicF32::new(0.0),
            compensation_offset_ms: AtomicF32::new(0.0),
        }
    }
}

impl ControlSlots {
    /// Create slots with boot defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: PipelineState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Requested Φ source.
    pub fn phi_source(&self) -> PhiSourceKind {
        source_from_u8(self.phi_source.load(Ordering::Acquire))
    }

    /// Select the Φ source; the pipeline starts the crossfade on its next
    /// block.
    pub fn set_phi_source(&self, kind: PhiSourceKind) {
        self.phi_source.store(source_to_u8(kind), Ordering::Release);
    }

    /// Latched manual Φ values.
    pub fn phi_manual(&self) -> (f32, f32) {
        (
            self.manual_phase.load(Ordering::Acquire),
            self.manual_depth.load(Ordering::Acquire),
        )
    }

    /// Set the manual Φ phase (wrapped into `[0, 2π)`) and depth (`[0, 1]`).
    pub fn set_phi_manual(&self, phase: f32, depth: f32) -> Result<()> {
        if !depth.is_finite() || !(0.0..=1.0).contains(&depth) {
            return Err(EngineError::ParameterOutOfRange {
                name: "phi_depth",
                value: f64::from(depth),
                min: 0.0,
                max: 1.0,
            });
        }
        if !phase.is_finite() {
            return Err(EngineError::ParameterOutOfRange {
                name: "phi_phase",
                value: f64::from(phase),
                min: 0.0,
                max: core::f64::consts::TAU,
            });
        }
        self.manual_phase.store(wrap_phase(phase), Ordering::Release);
        self.manual_depth.store(depth, Ordering::Release);
        Ok(())
    }

    /// Internal oscillator rate in Hz.
    pub fn internal_rate_hz(&self) -> f32 {
        self.internal_rate_hz.load(Ordering::Acquire)
    }

    /// Set the internal oscillator rate, `(0, 100]` Hz.
    pub fn set_internal_rate_hz(&self, rate_hz: f32) -> Result<()> {
        if !rate_hz.is_finite() || rate_hz <= 0.0 || rate_hz > 100.0 {
            return Err(EngineError::ParameterOutOfRange {
                name: "internal_rate_hz",
                value: f64::from(rate_hz),
                min: 0.0,
                max: 100.0,
            });
        }
        self.internal_rate_hz.store(rate_hz, Ordering::Release);
        Ok(())
    }

    /// Most recent normalised external sensor sample.
    pub fn sensor_value(&self) -> f32 {
        self.sensor_value.load(Ordering::Acquire)
    }

    /// Feed a sensor sample; clamped into `[0, 1]`.
    pub fn set_sensor_value(&self, value: f32) {
        let value = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
        self.sensor_value.store(value, Ordering::Release);
    }

    /// Active downmix strategy.
    pub fn downmix_strategy(&self) -> DownmixStrategy {
        strategy_from_u8(self.downmix.load(Ordering::Acquire))
    }

    /// Select the downmix strategy.
    pub fn set_downmix_strategy(&self, strategy: DownmixStrategy) {
        self.downmix.store(strategy_to_u8(strategy), Ordering::Release);
    }

    /// Whether the adaptive Φ controller is running.
    pub fn adaptive_enabled(&self) -> bool {
        self.adaptive_enabled.load(Ordering::Acquire)
    }

    /// Enable or disable the adaptive controller. Disabling halts updates
    /// immediately and leaves all parameters untouched.
    pub fn set_adaptive_enabled(&self, enabled: bool) {
        self.adaptive_enabled.store(enabled, Ordering::Release);
    }

    /// Adaptive gains `(k, gamma)`, target criticality, and bias.
    pub fn adaptive_params(&self) -> (f32, f32, f32, f64) {
        (
            self.adaptive_k.load(Ordering::Acquire),
            self.adaptive_gamma.load(Ordering::Acquire),
            self.adaptive_target.load(Ordering::Acquire),
            self.adaptive_bias.load(Ordering::Acquire),
        )
    }

    /// Set the proportional depth gain `k`, `[0, 10]`.
    pub fn set_adaptive_k(&self, k: f32) -> Result<()> {
        if !k.is_finite() || !(0.0..=10.0).contains(&k) {
            return Err(EngineError::ParameterOutOfRange {
                name: "adaptive_k",
                value: f64::from(k),
                min: 0.0,
                max: 10.0,
            });
        }
        self.adaptive_k.store(k, Ordering::Release);
        Ok(())
    }

    /// Set the phase gain `gamma`, `[0, 10]`.
    pub fn set_adaptive_gamma(&self, gamma: f32) -> Result<()> {
        if !gamma.is_finite() || !(0.0..=10.0).contains(&gamma) {
            return Err(EngineError::ParameterOutOfRange {
                name: "adaptive_gamma",
                value: f64::from(gamma),
                min: 0.0,
                max: 10.0,
            });
        }
        self.adaptive_gamma.store(gamma, Ordering::Release);
        Ok(())
    }

    /// Set the criticality setpoint, `[0, 1.5]`.
    pub fn set_adaptive_target(&self, target: f32) -> Result<()> {
        if !target.is_finite() || !(0.0..=1.5).contains(&target) {
            return Err(EngineError::ParameterOutOfRange {
                name: "adaptive_target",
                value: f64::from(target),
                min: 0.0,
                max: 1.5,
            });
        }
        self.adaptive_target.store(target, Ordering::Release);
        Ok(())
    }

    /// Set the external feed-forward bias term, `[-1, 1]`.
    pub fn set_adaptive_bias(&self, bias: f64) -> Result<()> {
        if !bias.is_finite() || !(-1.0..=1.0).contains(&bias) {
            return Err(EngineError::ParameterOutOfRange {
                name: "adaptive_bias",
                value: bias,
                min: -1.0,
                max: 1.0,
            });
        }
        self.adaptive_bias.store(bias, Ordering::Release);
        Ok(())
    }

    /// Effective Φ depth owned by the adaptive controller.
    pub fn auto_depth(&self) -> f32 {
        self.auto_depth.load(Ordering::Acquire)
    }

    pub(crate) fn set_auto_depth(&self, depth: f32) {
        self.auto_depth.store(depth.clamp(0.0, 1.0), Ordering::Release);
    }

    /// Normalised phase offset contributed by the adaptive controller.
    pub fn auto_phase_offset(&self) -> f32 {
        self.auto_phase_offset.load(Ordering::Acquire)
    }

    pub(crate) fn set_auto_phase_offset(&self, offset: f32) {
        self.auto_phase_offset
            .store(offset.rem_euclid(1.0), Ordering::Release);
    }

    /// Delay-line compensation currently applied, in milliseconds.
    pub fn compensation_offset_ms(&self) -> f32 {
        self.compensation_offset_ms.load(Ordering::Acquire)
    }

    /// Set the compensation offset, `[0, 200]` ms.
    pub fn set_compensation_offset_ms(&self, offset_ms: f32) -> Result<()> {
        if !offset_ms.is_finite() || !(0.0..=200.0).contains(&offset_ms) {
            return Err(EngineError::ParameterOutOfRange {
                name: "compensation_offset_ms",
                value: f64::from(offset_ms),
                min: 0.0,
                max: 200.0,
            });
        }
        self.compensation_offset_ms
            .store(offset_ms, Ordering::Release);
        Ok(())
    }

    /// Nudge the compensation offset by `delta_ms ∈ [-50, 50]`; the result
    /// is clamped into `[0, 200]` ms.
    pub fn adjust_compensation_ms(&self, delta_ms: f32) -> Result<()> {
        if !delta_ms.is_finite() || !(-50.0..=50.0).contains(&delta_ms) {
            return Err(EngineError::ParameterOutOfRange {
                name: "compensation_delta_ms",
                value: f64::from(delta_ms),
                min: -50.0,
                max: 50.0,
            });
        }
        let current = self.compensation_offset_ms.load(Ordering::Acquire);
        self.compensation_offset_ms
            .store((current + delta_ms).clamp(0.0, 200.0), Ordering::Release);
        Ok(())
    }

    /// Apply a bulk parameter update.
    ///
    /// Each individual write is an ordered atomic store, but the set as a
    /// whole is not atomic with respect to the audio thread: a block may
    /// observe a partially applied preset.
    pub fn apply_preset(&self, preset: &PresetUpdate) -> Result<()> {
        if let Some(kind) = preset.phi_source {
            self.set_phi_source(kind);
        }
        if let Some((phase, depth)) = preset.phi_manual {
            self.set_phi_manual(phase, depth)?;
        }
        if let Some(rate) = preset.internal_rate_hz {
            self.set_internal_rate_hz(rate)?;
        }
        if let Some(strategy) = preset.downmix {
            self.set_downmix_strategy(strategy);
        }
        if let Some(enabled) = preset.adaptive_enabled {
            self.set_adaptive_enabled(enabled);
        }
        if let Some(k) = preset.adaptive_k {
            self.set_adaptive_k(k)?;
        }
        if let Some(gamma) = preset.adaptive_gamma {
            self.set_adaptive_gamma(gamma)?;
        }
        if let Some(target) = preset.adaptive_target {
            self.set_adaptive_target(target)?;
        }
        if let Some(offset) = preset.compensation_offset_ms {
            self.set_compensation_offset_ms(offset)?;
        }
        Ok(())
    }
}

/// Bulk parameter update for [`ControlSlots::apply_preset`]. `None` fields
/// are left untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct PresetUpdate {
    /// Φ source to activate.
    pub phi_source: Option<PhiSourceKind>,
    /// Manual Φ `(phase, depth)` latch.
    pub phi_manual: Option<(f32, f32)>,
    /// Internal oscillator rate in Hz.
    pub internal_rate_hz: Option<f32>,
    /// Downmix strategy.
    pub downmix: Option<DownmixStrategy>,
    /// Adaptive controller enable flag.
    pub adaptive_enabled: Option<bool>,
    /// Adaptive depth gain.
    pub adaptive_k: Option<f32>,
    /// Adaptive phase gain.
    pub adaptive_gamma: Option<f32>,
    /// Criticality setpoint.
    pub adaptive_target: Option<f32>,
    /// Compensation offset in ms.
    pub compensation_offset_ms: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let slots = ControlSlots::new();
        assert_eq!(slots.state(), PipelineState::Stopped);
        assert_eq!(slots.phi_source(), PhiSourceKind::Internal);
        assert_eq!(slots.downmix_strategy(), DownmixStrategy::Linear);
        assert!(!slots.adaptive_enabled());
        let (k, gamma, target, bias) = slots.adaptive_params();
        assert_eq!(k, 0.25);
        assert_eq!(gamma, 0.1);
        assert_eq!(target, 1.0);
        assert_eq!(bias, 0.0);
    }

    #[test]
    fn test_out_of_range_rejected_previous_retained() {
        let slots = ControlSlots::new();
        slots.set_phi_manual(1.0, 0.7).unwrap();

        assert!(slots.set_phi_manual(1.0, 1.5).is_err());
        assert!(slots.set_phi_manual(f32::NAN, 0.5).is_err());
        let (phase, depth) = slots.phi_manual();
        assert_eq!((phase, depth), (1.0, 0.7), "previous value must survive");

        assert!(slots.set_compensation_offset_ms(250.0).is_err());
        assert_eq!(slots.compensation_offset_ms(), 0.0);
    }

    #[test]
    fn test_manual_phase_wrapped() {
        let slots = ControlSlots::new();
        slots
            .set_phi_manual(2.0 * core::f32::consts::TAU + 1.0, 0.5)
            .unwrap();
        let (phase, _) = slots.phi_manual();
        assert!((phase - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_adjust_compensation_clamps() {
        let slots = ControlSlots::new();
        slots.set_compensation_offset_ms(10.0).unwrap();

        slots.adjust_compensation_ms(-50.0).unwrap();
        assert_eq!(slots.compensation_offset_ms(), 0.0);

        assert!(slots.adjust_compensation_ms(60.0).is_err());
        assert_eq!(slots.compensation_offset_ms(), 0.0);
    }

    #[test]
    fn test_preset_partial_apply() {
        let slots = ControlSlots::new();
        let preset = PresetUpdate {
            phi_source: Some(PhiSourceKind::Manual),
            phi_manual: Some((0.5, 0.8)),
            downmix: Some(DownmixStrategy::Phi),
            adaptive_enabled: Some(true),
            ..PresetUpdate::default()
        };
        slots.apply_preset(&preset).unwrap();

        assert_eq!(slots.phi_source(), PhiSourceKind::Manual);
        assert_eq!(slots.downmix_strategy(), DownmixStrategy::Phi);
        assert!(slots.adaptive_enabled());
        // Untouched fields keep their defaults.
        let (k, _, _, _) = slots.adaptive_params();
        assert_eq!(k, 0.25);
    }

    #[test]
    fn test_sensor_value_sanitised() {
        let slots = ControlSlots::new();
        slots.set_sensor_value(2.0);
        assert_eq!(slots.sensor_value(), 1.0);
        slots.set_sensor_value(f32::NAN);
        assert_eq!(slots.sensor_value(), 0.0);
    }
}
