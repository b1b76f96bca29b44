//! Adaptive Φ controller: closes the loop between measured criticality and
//! the Φ modulation parameters.
//!
//! The controller observes every published [`MetricsFrame`], smooths
//! criticality and coherence over a 30-sample window, and applies the
//! control law at one third of the frame rate (≤ 10 Hz at the nominal
//! ≥ 30 Hz frame rate):
//!
//! ```text
//! phi_depth ← clamp(phi_depth + k·(target − criticality_smoothed)·dt + bias, 0, 1)
//! phi_phase ← (phi_phase + γ·d(coherence_smoothed)/dt) mod 1
//! ```
//!
//! Updates smaller than 0.001 are suppressed so parameter noise never
//! reaches the broadcast path. All writes go through the single-word atomic
//! slots; the enable flag halts updates immediately without touching the
//! parameters.
//!
//! Disturbance bookkeeping: a disturbance is declared while
//! `|criticality error| > 0.15`; the controller counts as settled again once
//! the error re-enters the ±0.05 band, and the interval from the end of the
//! disturbance to settling is recorded.

use crate::control::ControlSlots;
use chroma_telemetry::MetricsFrame;

/// Length of the smoothing window in frames.
pub const SMOOTHING_WINDOW: usize = 30;

/// The control law runs once per this many observed frames.
const UPDATE_DIVISOR: u32 = 3;

/// Criticality error magnitude that declares a disturbance.
pub const DISTURBANCE_THRESHOLD: f64 = 0.15;

/// Criticality error band for "settled".
pub const SETTLE_TOLERANCE: f64 = 0.05;

/// Minimum parameter change worth broadcasting.
const MIN_UPDATE: f64 = 0.001;

/// Fixed-size mean window, allocation-free after construction.
#[derive(Debug, Clone)]
struct MeanWindow {
    values: [f64; SMOOTHING_WINDOW],
    head: usize,
    len: usize,
}

impl MeanWindow {
    fn new() -> Self {
        Self {
            values: [0.0; SMOOTHING_WINDOW],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, value: f64) {
        self.values[self.head] = value;
        self.head = (self.head + 1) % SMOOTHING_WINDOW;
        self.len = (self.len + 1).min(SMOOTHING_WINDOW);
    }

    fn mean(&self) -> f64 {
        if self.len == 0 {
            return 0.0;
        }
        self.values[..self.len].iter().sum::<f64>() / self.len as f64
    }
}

/// Feedback controller holding criticality at the setpoint via Φ depth and
/// phase adjustments.
#[derive(Debug)]
pub struct AdaptiveController {
    criticality: MeanWindow,
    coherence: MeanWindow,
    frames_since_update: u32,
    last_update_s: Option<f64>,
    prev_coherence: Option<f64>,
    depth: f64,
    phase_offset: f64,

    disturbed: bool,
    disturbance_end_s: Option<f64>,
    settled: bool,
    last_settling_secs: Option<f64>,
}

impl AdaptiveController {
    /// Create a controller starting from the given Φ depth.
    pub fn new(initial_depth: f64) -> Self {
        Self {
            criticality: MeanWindow::new(),
            coherence: MeanWindow::new(),
            frames_since_update: 0,
            last_update_s: None,
            prev_coherence: None,
            depth: initial_depth.clamp(0.0, 1.0),
            phase_offset: 0.0,
            disturbed: false,
            disturbance_end_s: None,
            settled: true,
            last_settling_secs: None,
        }
    }

    /// Feed one metrics frame. Bounded work, no allocation; safe to call
    /// synchronously from the pipeline.
    pub fn observe(&mut self, frame: &MetricsFrame, now_s: f64, slots: &ControlSlots) {
        if !slots.adaptive_enabled() {
            return;
        }

        self.criticality.push(frame.criticality);
        self.coherence.push(frame.phase_coherence);

        self.frames_since_update += 1;
        if self.frames_since_update < UPDATE_DIVISOR {
            return;
        }
        self.frames_since_update = 0;

        let (k, gamma, target, bias) = slots.adaptive_params();
        let crit_smoothed = self.criticality.mean();
        let coh_smoothed = self.coherence.mean();
        let error = f64::from(target) - crit_smoothed;

        self.track_settling(error, now_s);

        let dt = self
            .last_update_s
            .map_or(0.1, |last| (now_s - last).clamp(1e-3, 1.0));
        self.last_update_s = Some(now_s);

        let new_depth = (self.depth + f64::from(k) * error * dt + bias).clamp(0.0, 1.0);
        if (new_depth - self.depth).abs() >= MIN_UPDATE {
            self.depth = new_depth;
            slots.set_auto_depth(new_depth as f32);
        }

        if let Some(prev) = self.prev_coherence {
            let coherence_rate = (coh_smoothed - prev) / dt;
            let new_offset = (self.phase_offset + f64::from(gamma) * coherence_rate).rem_euclid(1.0);
            if (new_offset - self.phase_offset).abs() >= MIN_UPDATE {
                self.phase_offset = new_offset;
                slots.set_auto_phase_offset(new_offset as f32);
            }
        }
        self.prev_coherence = Some(coh_smoothed);
    }

    fn track_settling(&mut self, error: f64, now_s: f64) {
        if error.abs() > DISTURBANCE_THRESHOLD {
            if !self.disturbed {
                tracing::debug!(error, "criticality disturbance declared");
            }
            self.disturbed = true;
            self.settled = false;
            self.disturbance_end_s = None;
        } else if self.disturbed {
            // Back under the disturbance threshold: the disturbance is over,
            // settling is counted from here.
            if self.disturbance_end_s.is_none() {
                self.disturbance_end_s = Some(now_s);
            }
            if error.abs() <= SETTLE_TOLERANCE {
                let end = self.disturbance_end_s.unwrap_or(now_s);
                self.last_settling_secs = Some(now_s - end);
                self.disturbed = false;
                self.settled = true;
                tracing::debug!(
                    settling_secs = self.last_settling_secs,
                    "controller settled"
                );
            }
        }
    }

    /// Current controller-owned Φ depth.
    pub fn depth(&self) -> f64 {
        self.depth
    }

    /// Current normalised phase offset.
    pub fn phase_offset(&self) -> f64 {
        self.phase_offset
    }

    /// True once the criticality error is back inside the tolerance band.
    pub fn settled(&self) -> bool {
        self.settled
    }

    /// Seconds the last recovery took, from disturbance end to settling.
    pub fn last_settling_secs(&self) -> Option<f64> {
        self.last_settling_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_DT: f64 = 1.0 / 30.0;

    fn frame_with(criticality: f64, coherence: f64) -> MetricsFrame {
        MetricsFrame {
            criticality,
            phase_coherence: coherence,
            valid: true,
            ..MetricsFrame::default()
        }
    }

    fn run_frames(
        ctl: &mut AdaptiveController,
        slots: &ControlSlots,
        start_s: f64,
        count: usize,
        criticality: f64,
    ) -> f64 {
        let mut t = start_s;
        for _ in 0..count {
            ctl.observe(&frame_with(criticality, 0.5), t, slots);
            t += FRAME_DT;
        }
        t
    }

    #[test]
    fn test_disabled_controller_never_writes() {
        let slots = ControlSlots::new();
        let mut ctl = AdaptiveController::new(0.5);
        let before = slots.auto_depth();

        run_frames(&mut ctl, &slots, 0.0, 100, 0.3);
        assert_eq!(slots.auto_depth(), before);
        assert_eq!(ctl.depth(), 0.5);
    }

    #[test]
    fn test_low_criticality_raises_depth() {
        let slots = ControlSlots::new();
        slots.set_adaptive_enabled(true);
        slots.set_adaptive_k(0.5).unwrap();
        let mut ctl = AdaptiveController::new(0.5);

        run_frames(&mut ctl, &slots, 0.0, 60, 0.6);

        assert!(
            ctl.depth() > 0.5,
            "positive error must raise depth, got {}",
            ctl.depth()
        );
        assert!((f64::from(slots.auto_depth()) - ctl.depth()).abs() < 1e-4);
    }

    #[test]
    fn test_depth_rises_monotonically_during_disturbance() {
        let slots = ControlSlots::new();
        slots.set_adaptive_enabled(true);
        slots.set_adaptive_k(0.5).unwrap();
        let mut ctl = AdaptiveController::new(0.5);

        // Settle at the setpoint first.
        let mut t = run_frames(&mut ctl, &slots, 0.0, 60, 1.0);

        // Force criticality to 0.6 for 500 ms (15 frames at 30 Hz).
        let mut prev_depth = ctl.depth();
        for _ in 0..15 {
            ctl.observe(&frame_with(0.6, 0.5), t, &slots);
            t += FRAME_DT;
            assert!(
                ctl.depth() >= prev_depth,
                "depth must not fall during a positive-error disturbance"
            );
            prev_depth = ctl.depth();
        }
        assert!(ctl.depth() > 0.5);
    }

    #[test]
    fn test_settles_within_five_seconds_after_disturbance() {
        let slots = ControlSlots::new();
        slots.set_adaptive_enabled(true);
        slots.set_adaptive_k(0.5).unwrap();
        let mut ctl = AdaptiveController::new(0.5);

        let t = run_frames(&mut ctl, &slots, 0.0, 60, 1.0);
        assert!(ctl.settled());

        // 500 ms disturbance.
        let t = run_frames(&mut ctl, &slots, t, 15, 0.6);
        assert!(!ctl.settled(), "disturbance must clear the settled flag");

        // Criticality returns to the setpoint; the 1 s window drains and
        // the error falls back inside the band well within 5 s.
        let end = run_frames(&mut ctl, &slots, t, 150, 1.0);
        assert!(ctl.settled(), "controller must settle after recovery");
        let settling = ctl.last_settling_secs().expect("settling time recorded");
        assert!(
            settling <= 5.0,
            "settling took {settling} s (limit 5 s), sim ended at {end}"
        );
    }

    #[test]
    fn test_tiny_updates_suppressed() {
        let slots = ControlSlots::new();
        slots.set_adaptive_enabled(true);
        // Small gain and an error inside the dead-band region.
        slots.set_adaptive_k(0.01).unwrap();
        let mut ctl = AdaptiveController::new(0.5);
        let before = slots.auto_depth();

        // error ≈ 0.001, k = 0.01, dt ≈ 0.1 → step ≈ 1e-6, far below 0.001.
        run_frames(&mut ctl, &slots, 0.0, 30, 0.999);
        assert_eq!(
            slots.auto_depth(),
            before,
            "sub-threshold updates must not be broadcast"
        );
    }

    #[test]
    fn test_bias_feeds_forward() {
        let slots = ControlSlots::new();
        slots.set_adaptive_enabled(true);
        slots.set_adaptive_k(0.0).unwrap();
        slots.set_adaptive_bias(0.01).unwrap();
        let mut ctl = AdaptiveController::new(0.2);

        run_frames(&mut ctl, &slots, 0.0, 30, 1.0);
        assert!(
            ctl.depth() > 0.2,
            "bias must push depth even with zero error, got {}",
            ctl.depth()
        );
    }

    #[test]
    fn test_disable_halts_updates_mid_run() {
        let slots = ControlSlots::new();
        slots.set_adaptive_enabled(true);
        slots.set_adaptive_k(0.5).unwrap();
        let mut ctl = AdaptiveController::new(0.5);

        let t = run_frames(&mut ctl, &slots, 0.0, 30, 0.5);
        let frozen = ctl.depth();

        slots.set_adaptive_enabled(false);
        run_frames(&mut ctl, &slots, t, 60, 0.2);
        assert_eq!(ctl.depth(), frozen, "disable must freeze parameters");
        assert!((f64::from(slots.auto_depth()) - frozen).abs() < 1e-4);
    }
}
