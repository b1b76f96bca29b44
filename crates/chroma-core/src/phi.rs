//! Φ modulation sources and the crossfading Φ controller.
//!
//! The field processor is re-tuned every block by a pair of modulation
//! parameters: a phase in `[0, 2π)` and a depth in `[0, 1]`. Four sources can
//! produce that pair:
//!
//! - **Internal**: free-running oscillator at the golden-ratio rate
//! - **Manual**: latched user values, returned unchanged
//! - **Audio**: envelope follower over the current input block
//! - **Sensor**: most recent normalised external sensor sample
//!
//! Switching sources never jumps the output: the controller runs the old and
//! new source side by side for 100 ms and blends them on an equal-power
//! curve. Requesting another switch mid-fade snaps the fade to completion
//! and starts a fresh one against the now-current source.

use crate::envelope::EnvelopeFollower;
use crate::math::{equal_power_gain, wrap_phase};
use core::f32::consts::TAU;
use libm::sinf;

/// Reciprocal golden ratio, the default internal oscillator rate in Hz.
pub const GOLDEN_RATIO_CONJUGATE: f32 = 0.618_033_99;

/// Duration of the equal-power source crossfade in seconds.
pub const CROSSFADE_SECS: f32 = 0.1;

/// Identifies which Φ source is (or should be) active.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PhiSourceKind {
    /// Latched user-provided phase and depth.
    Manual,
    /// Envelope follower over the live input signal.
    Audio,
    /// External normalised sensor feed.
    Sensor,
    /// Free-running golden-ratio oscillator.
    #[default]
    Internal,
}

impl PhiSourceKind {
    /// Stable lowercase name, matching the wire format.
    pub fn as_str(self) -> &'static str {
        match self {
            PhiSourceKind::Manual => "manual",
            PhiSourceKind::Audio => "audio",
            PhiSourceKind::Sensor => "sensor",
            PhiSourceKind::Internal => "internal",
        }
    }
}

impl core::str::FromStr for PhiSourceKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(PhiSourceKind::Manual),
            "audio" => Ok(PhiSourceKind::Audio),
            "sensor" => Ok(PhiSourceKind::Sensor),
            "internal" => Ok(PhiSourceKind::Internal),
            _ => Err(()),
        }
    }
}

/// One block's worth of Φ modulation: phase in `[0, 2π)`, depth in `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PhiOutput {
    /// Modulation phase in radians, `[0, 2π)`.
    pub phase: f32,
    /// Modulation depth, `[0, 1]`.
    pub depth: f32,
}

/// Per-tick context handed to the sources.
#[derive(Clone, Copy, Debug)]
pub struct PhiTickContext<'a> {
    /// Mono input block for the audio-envelope source.
    pub input: &'a [f32],
    /// Most recent normalised sensor sample, `[0, 1]`.
    pub sensor_value: f32,
}

/// Tagged Φ source state. At most one is active and at most one previous
/// (during the crossfade) inside [`PhiController`].
#[derive(Debug, Clone)]
enum PhiSource {
    Internal {
        phase: f32,
        rate_hz: f32,
    },
    Manual {
        phase: f32,
        depth: f32,
    },
    Audio {
        phase: f32,
        follower: EnvelopeFollower,
    },
    Sensor {
        phase: f32,
    },
}

impl PhiSource {
    fn kind(&self) -> PhiSourceKind {
        match self {
            PhiSource::Internal { .. } => PhiSourceKind::Internal,
            PhiSource::Manual { .. } => PhiSourceKind::Manual,
            PhiSource::Audio { .. } => PhiSourceKind::Audio,
            PhiSource::Sensor { .. } => PhiSourceKind::Sensor,
        }
    }

    /// Advance by `dt` seconds and produce the source's (phase, depth).
    fn update(&mut self, dt: f32, ctx: &PhiTickContext<'_>) -> PhiOutput {
        match self {
            PhiSource::Internal { phase, rate_hz } => {
                *phase = wrap_phase(*phase + TAU * *rate_hz * dt);
                PhiOutput {
                    phase: *phase,
                    depth: 0.5 + 0.3 * sinf(*phase / 2.0),
                }
            }
            PhiSource::Manual { phase, depth } => PhiOutput {
                phase: *phase,
                depth: *depth,
            },
            PhiSource::Audio { phase, follower } => {
                let mut env = follower.level();
                for &sample in ctx.input {
                    env = follower.process(sample);
                }
                let env = env.clamp(0.0, 1.0);
                *phase = wrap_phase(*phase + TAU * (1.0 + env) * dt);
                PhiOutput {
                    phase: *phase,
                    depth: (2.0 * env).clamp(0.0, 1.0),
                }
            }
            PhiSource::Sensor { phase } => {
                let value = ctx.sensor_value.clamp(0.0, 1.0);
                *phase = wrap_phase(*phase + TAU * value * dt);
                PhiOutput {
                    phase: *phase,
                    depth: value,
                }
            }
        }
    }
}

/// Produces the per-block `(phase, depth)` pair, crossfading on source
/// switches.
#[derive(Debug, Clone)]
pub struct PhiController {
    sample_rate: f32,
    active: PhiSource,
    previous: Option<PhiSource>,
    crossfade_elapsed: f32,
    /// Latched values applied when the manual source is constructed or live.
    manual_phase: f32,
    manual_depth: f32,
    internal_rate_hz: f32,
    last_output: PhiOutput,
}

impl PhiController {
    /// Create a controller with the internal oscillator active.
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            active: PhiSource::Internal {
                phase: 0.0,
                rate_hz: GOLDEN_RATIO_CONJUGATE,
            },
            previous: None,
            crossfade_elapsed: 0.0,
            manual_phase: 0.0,
            manual_depth: 0.5,
            internal_rate_hz: GOLDEN_RATIO_CONJUGATE,
            last_output: PhiOutput {
                phase: 0.0,
                depth: 0.5,
            },
        }
    }

    /// Kind of the currently active source.
    pub fn active_kind(&self) -> PhiSourceKind {
        self.active.kind()
    }

    /// True while a source crossfade is in progress.
    pub fn crossfading(&self) -> bool {
        self.previous.is_some()
    }

    /// Update the sample rate (propagates to the audio follower).
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        if let PhiSource::Audio { follower, .. } = &mut self.active {
            follower.set_sample_rate(sample_rate);
        }
    }

    /// Latch manual phase and depth. Takes effect within one block when the
    /// manual source is active; otherwise stored for the next switch.
    pub fn set_manual(&mut self, phase: f32, depth: f32) {
        self.manual_phase = wrap_phase(phase);
        self.manual_depth = depth.clamp(0.0, 1.0);
        if let PhiSource::Manual { phase, depth } = &mut self.active {
            *phase = self.manual_phase;
            *depth = self.manual_depth;
        }
    }

    /// Set the internal oscillator rate in Hz.
    pub fn set_internal_rate(&mut self, rate_hz: f32) {
        self.internal_rate_hz = rate_hz.max(0.0);
        if let PhiSource::Internal { rate_hz, .. } = &mut self.active {
            *rate_hz = self.internal_rate_hz;
        }
    }

    /// Switch to a new source, starting a 100 ms equal-power crossfade.
    ///
    /// A switch requested mid-fade snaps the in-progress fade to completion
    /// first, so the fresh fade starts from the now-current source.
    pub fn set_source(&mut self, kind: PhiSourceKind) {
        if kind == self.active.kind() && self.previous.is_none() {
            return;
        }
        // Abort any in-progress fade: the active source wins outright.
        self.previous = None;

        let fresh = self.make_source(kind);
        let old = core::mem::replace(&mut self.active, fresh);
        self.previous = Some(old);
        self.crossfade_elapsed = 0.0;
    }

    /// Produce the blended `(phase, depth)` for one block of `dt` seconds.
    pub fn tick(&mut self, dt: f32, ctx: &PhiTickContext<'_>) -> PhiOutput {
        let new_out = self.active.update(dt, ctx);

        let out = if let Some(mut prev) = self.previous.take() {
            let old_out = prev.update(dt, ctx);
            self.crossfade_elapsed += dt;
            let alpha = self.crossfade_elapsed / CROSSFADE_SECS;
            let w = equal_power_gain(alpha);
            if alpha < 1.0 {
                self.previous = Some(prev);
            }
            PhiOutput {
                phase: wrap_phase((1.0 - w) * old_out.phase + w * new_out.phase),
                depth: ((1.0 - w) * old_out.depth + w * new_out.depth).clamp(0.0, 1.0),
            }
        } else {
            new_out
        };

        self.last_output = out;
        out
    }

    /// Most recent tick output.
    pub fn last_output(&self) -> PhiOutput {
        self.last_output
    }

    fn make_source(&self, kind: PhiSourceKind) -> PhiSource {
        // Seed the new source's phase from the current output so the fade
        // blends between nearby trajectories.
        let seed_phase = self.last_output.phase;
        match kind {
            PhiSourceKind::Internal => PhiSource::Internal {
                phase: seed_phase,
                rate_hz: self.internal_rate_hz,
            },
            PhiSourceKind::Manual => PhiSource::Manual {
                phase: self.manual_phase,
                depth: self.manual_depth,
            },
            PhiSourceKind::Audio => PhiSource::Audio {
                phase: seed_phase,
                follower: EnvelopeFollower::new(self.sample_rate),
            },
            PhiSourceKind::Sensor => PhiSource::Sensor { phase: seed_phase },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48000.0;
    const BLOCK_DT: f32 = 512.0 / 48000.0;

    fn silent_ctx() -> PhiTickContext<'static> {
        PhiTickContext {
            input: &[],
            sensor_value: 0.0,
        }
    }

    #[test]
    fn test_internal_depth_range() {
        let mut ctl = PhiController::new(SR);
        for _ in 0..1000 {
            let out = ctl.tick(BLOCK_DT, &silent_ctx());
            assert!((0.0..=1.0).contains(&out.depth));
            assert!((0.0..TAU).contains(&out.phase));
        }
    }

    #[test]
    fn test_manual_latch_reflected_within_one_tick() {
        let mut ctl = PhiController::new(SR);
        ctl.set_manual(core::f32::consts::PI, 0.9);
        ctl.set_source(PhiSourceKind::Manual);

        // Run past the crossfade.
        let mut out = PhiOutput::default();
        for _ in 0..20 {
            out = ctl.tick(BLOCK_DT, &silent_ctx());
        }
        assert!((out.phase - core::f32::consts::PI).abs() < 1e-5);
        assert!((out.depth - 0.9).abs() < 1e-5);

        // Updating the latch while manual is active lands on the next tick.
        ctl.set_manual(1.0, 0.25);
        let out = ctl.tick(BLOCK_DT, &silent_ctx());
        assert!((out.phase - 1.0).abs() < 1e-5);
        assert!((out.depth - 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_crossfade_depth_follows_equal_power_curve() {
        let mut ctl = PhiController::new(SR);
        // Settle the internal source near depth 0.5 (phase ~0 at start).
        let start = ctl.tick(BLOCK_DT, &silent_ctx());

        ctl.set_manual(core::f32::consts::PI, 0.9);
        ctl.set_source(PhiSourceKind::Manual);

        let mut elapsed = 0.0f32;
        let mut prev_depth = start.depth;
        let mut depth_at_100ms = 0.0;
        let mut depth_at_125ms = 0.0;
        while elapsed < 0.13 {
            let out = ctl.tick(BLOCK_DT, &silent_ctx());
            elapsed += BLOCK_DT;
            // Target depth is above the start value, so the blend must rise
            // monotonically (the internal source's own drift is tiny over
            // 100 ms at the golden-ratio rate).
            assert!(
                out.depth >= prev_depth - 1e-3,
                "depth regressed during fade: {} -> {} at t={elapsed}",
                prev_depth,
                out.depth
            );
            prev_depth = out.depth;
            if (elapsed - 0.1).abs() < BLOCK_DT / 2.0 {
                depth_at_100ms = out.depth;
            }
            if (elapsed - 0.125).abs() < BLOCK_DT / 2.0 {
                depth_at_125ms = out.depth;
            }
        }

        assert!(
            (depth_at_100ms - 0.9).abs() < 0.009,
            "depth at 100 ms should be within 1% of 0.9, got {depth_at_100ms}"
        );
        assert!(
            (depth_at_125ms - 0.9).abs() < 1e-4,
            "depth must hold at 0.9 after the fade, got {depth_at_125ms}"
        );
    }

    #[test]
    fn test_crossfade_no_depth_discontinuity() {
        let mut ctl = PhiController::new(SR);
        ctl.tick(BLOCK_DT, &silent_ctx());

        ctl.set_manual(0.0, 1.0);
        ctl.set_source(PhiSourceKind::Manual);

        let mut prev = ctl.tick(BLOCK_DT, &silent_ctx()).depth;
        for _ in 0..20 {
            let depth = ctl.tick(BLOCK_DT, &silent_ctx()).depth;
            // The 0.5 -> 1.0 fade over ~9.4 blocks moves at most ~0.085 per
            // block at the steepest point of the cosine curve.
            assert!(
                (depth - prev).abs() < 0.1,
                "adjacent-block depth jump: {prev} -> {depth}"
            );
            prev = depth;
        }
    }

    #[test]
    fn test_switch_mid_fade_snaps_and_restarts() {
        let mut ctl = PhiController::new(SR);
        ctl.tick(BLOCK_DT, &silent_ctx());

        ctl.set_manual(0.0, 1.0);
        ctl.set_source(PhiSourceKind::Manual);
        assert!(ctl.crossfading());

        // Half way through, switch again.
        for _ in 0..5 {
            ctl.tick(BLOCK_DT, &silent_ctx());
        }
        ctl.set_source(PhiSourceKind::Sensor);
        assert!(ctl.crossfading());
        assert_eq!(ctl.active_kind(), PhiSourceKind::Sensor);

        // The fresh fade runs its full 100 ms from the switch.
        for _ in 0..12 {
            ctl.tick(BLOCK_DT, &silent_ctx());
        }
        assert!(!ctl.crossfading());
    }

    #[test]
    fn test_audio_source_tracks_input_level() {
        let mut ctl = PhiController::new(SR);
        ctl.set_source(PhiSourceKind::Audio);

        let loud = vec![0.8f32; 512];
        let ctx = PhiTickContext {
            input: &loud,
            sensor_value: 0.0,
        };
        let mut out = PhiOutput::default();
        for _ in 0..50 {
            out = ctl.tick(BLOCK_DT, &ctx);
        }
        assert!(out.depth > 0.5, "loud input should raise depth, got {}", out.depth);

        let quiet = vec![0.0f32; 512];
        let ctx = PhiTickContext {
            input: &quiet,
            sensor_value: 0.0,
        };
        for _ in 0..100 {
            out = ctl.tick(BLOCK_DT, &ctx);
        }
        assert!(out.depth < 0.1, "silence should decay depth, got {}", out.depth);
    }

    #[test]
    fn test_sensor_source_follows_sample() {
        let mut ctl = PhiController::new(SR);
        ctl.set_source(PhiSourceKind::Sensor);
        let ctx = PhiTickContext {
            input: &[],
            sensor_value: 0.7,
        };
        let mut out = PhiOutput::default();
        for _ in 0..20 {
            out = ctl.tick(BLOCK_DT, &ctx);
        }
        assert!((out.depth - 0.7).abs() < 1e-5);
    }

    #[test]
    fn test_source_kind_round_trip_names() {
        for kind in [
            PhiSourceKind::Manual,
            PhiSourceKind::Audio,
            PhiSourceKind::Sensor,
            PhiSourceKind::Internal,
        ] {
            assert_eq!(kind.as_str().parse::<PhiSourceKind>(), Ok(kind));
        }
        assert!("nonsense".parse::<PhiSourceKind>().is_err());
    }
}
