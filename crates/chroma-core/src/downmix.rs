//! Downmixer: maps the 8-channel field bus onto N output channels.
//!
//! Four weighting strategies are available; anything unrecognised at the
//! string level falls back to [`DownmixStrategy::Linear`]. Mixing never
//! fails and never allocates.

use crate::field::NUM_CHANNELS;
use crate::phi::PhiOutput;
use libm::{cosf, sqrtf};

/// Channel weighting strategy for the 8-to-N downmix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DownmixStrategy {
    /// Equal-weight sum, scaled by 1/√8.
    #[default]
    Linear,
    /// Weights proportional to per-channel RMS over the block.
    Energy,
    /// Channels 0-3 to the left, 4-7 to the right; passthrough beyond stereo.
    Spatial,
    /// Weights `1 + depth·cos(phase + 2πk/8)`, normalised.
    Phi,
}

impl DownmixStrategy {
    /// Stable lowercase name for config and the control surface.
    pub fn as_str(self) -> &'static str {
        match self {
            DownmixStrategy::Linear => "linear",
            DownmixStrategy::Energy => "energy",
            DownmixStrategy::Spatial => "spatial",
            DownmixStrategy::Phi => "phi",
        }
    }

    /// Parse a strategy name. Unknown names fall back to `Linear`; the
    /// downmixer never errors.
    pub fn parse_or_linear(s: &str) -> Self {
        match s {
            "energy" => DownmixStrategy::Energy,
            "spatial" => DownmixStrategy::Spatial,
            "phi" => DownmixStrategy::Phi,
            _ => DownmixStrategy::Linear,
        }
    }
}

/// Mixes the 8-channel bus into `out_channels` planar output buffers.
#[derive(Debug, Clone)]
pub struct Downmixer {
    out_channels: usize,
    /// Per-channel weight scratch, recomputed each block.
    weights: [f32; NUM_CHANNELS],
}

impl Downmixer {
    /// Create a downmixer for the given output channel count (>= 1).
    pub fn new(out_channels: usize) -> Self {
        Self {
            out_channels: out_channels.max(1),
            weights: [0.0; NUM_CHANNELS],
        }
    }

    /// Number of output channels this mixer produces.
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Mix `bus` (8 planar channel buffers of equal length) into `out`
    /// (`out_channels` planar buffers of the same length).
    ///
    /// `out` buffers beyond what the strategy addresses are zeroed.
    pub fn mix(
        &mut self,
        bus: &[Vec<f32>; NUM_CHANNELS],
        out: &mut [Vec<f32>],
        strategy: DownmixStrategy,
        phi: PhiOutput,
    ) {
        let frames = bus[0].len();
        for ch in out.iter_mut() {
            ch[..frames].fill(0.0);
        }

        match strategy {
            DownmixStrategy::Linear => self.mix_weighted(bus, out, frames, |_| INV_SQRT_8),
            DownmixStrategy::Energy => {
                let mut total = 0.0f32;
                for (k, ch) in bus.iter().enumerate() {
                    let rms = block_rms(&ch[..frames]);
                    self.weights[k] = rms;
                    total += rms;
                }
                if total <= f32::EPSILON {
                    // Silent block: energy weighting degenerates, fall back
                    // to the linear scale so output stays silent and finite.
                    self.mix_weighted(bus, out, frames, |_| INV_SQRT_8);
                } else {
                    for w in &mut self.weights {
                        *w /= total;
                    }
                    let weights = self.weights;
                    self.mix_weighted(bus, out, frames, |k| weights[k]);
                }
            }
            DownmixStrategy::Spatial => self.mix_spatial(bus, out, frames),
            DownmixStrategy::Phi => {
                let mut total = 0.0f32;
                for (k, w) in self.weights.iter_mut().enumerate() {
                    let angle = phi.phase + core::f32::consts::TAU * k as f32 / NUM_CHANNELS as f32;
                    *w = 1.0 + phi.depth * cosf(angle);
                    total += *w;
                }
                // Total is >= 8·(1−depth) >= 0 with equality only at depth 1
                // and pathological phase alignment; guard anyway.
                if total <= f32::EPSILON {
                    total = 1.0;
                }
                for w in &mut self.weights {
                    *w /= total;
                }
                let weights = self.weights;
                self.mix_weighted(bus, out, frames, |k| weights[k]);
            }
        }
    }

    /// Sum every bus channel into every output channel with per-channel gain.
    fn mix_weighted(
        &self,
        bus: &[Vec<f32>; NUM_CHANNELS],
        out: &mut [Vec<f32>],
        frames: usize,
        weight: impl Fn(usize) -> f32,
    ) {
        for ch in out.iter_mut() {
            for (k, bus_ch) in bus.iter().enumerate() {
                let w = weight(k);
                for (o, &s) in ch[..frames].iter_mut().zip(&bus_ch[..frames]) {
                    *o += s * w;
                }
            }
        }
    }

    fn mix_spatial(&self, bus: &[Vec<f32>; NUM_CHANNELS], out: &mut [Vec<f32>], frames: usize) {
        match out.len() {
            // Mono has no spatial image: collapse to the linear sum.
            1 => self.mix_weighted(bus, out, frames, |_| INV_SQRT_8),
            2 => {
                let half_scale = 1.0 / sqrtf(4.0);
                let (left, right) = out.split_at_mut(1);
                for (k, bus_ch) in bus.iter().enumerate() {
                    let target = if k < NUM_CHANNELS / 2 {
                        &mut left[0]
                    } else {
                        &mut right[0]
                    };
                    for (o, &s) in target[..frames].iter_mut().zip(&bus_ch[..frames]) {
                        *o += s * half_scale;
                    }
                }
            }
            // Multi-channel: pass bus channels straight through.
            n => {
                for (ch, bus_ch) in out.iter_mut().take(n).zip(bus.iter()) {
                    ch[..frames].copy_from_slice(&bus_ch[..frames]);
                }
            }
        }
    }
}

const INV_SQRT_8: f32 = 0.353_553_39;

/// RMS of one block.
fn block_rms(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = block.iter().map(|&s| s * s).sum();
    sqrtf(sum_sq / block.len() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus_with(value_per_channel: impl Fn(usize) -> f32, frames: usize) -> [Vec<f32>; NUM_CHANNELS] {
        core::array::from_fn(|k| vec![value_per_channel(k); frames])
    }

    fn out_buffers(channels: usize, frames: usize) -> Vec<Vec<f32>> {
        vec![vec![0.0; frames]; channels]
    }

    #[test]
    fn test_linear_scale() {
        let bus = bus_with(|_| 1.0, 64);
        let mut out = out_buffers(1, 64);
        let mut mixer = Downmixer::new(1);
        mixer.mix(&bus, &mut out, DownmixStrategy::Linear, PhiOutput::default());

        // 8 channels of 1.0 scaled by 1/sqrt(8) = sqrt(8).
        let expected = 8.0 * INV_SQRT_8;
        assert!((out[0][0] - expected).abs() < 1e-5, "got {}", out[0][0]);
    }

    #[test]
    fn test_spatial_stereo_split() {
        // Channels 0-3 carry signal, 4-7 are silent.
        let bus = bus_with(|k| if k < 4 { 1.0 } else { 0.0 }, 32);
        let mut out = out_buffers(2, 32);
        let mut mixer = Downmixer::new(2);
        mixer.mix(&bus, &mut out, DownmixStrategy::Spatial, PhiOutput::default());

        assert!(out[0][0] > 1.0, "left should carry channels 0-3");
        assert_eq!(out[1][0], 0.0, "right should be silent");
    }

    #[test]
    fn test_spatial_multichannel_passthrough() {
        let bus = bus_with(|k| k as f32, 16);
        let mut out = out_buffers(8, 16);
        let mut mixer = Downmixer::new(8);
        mixer.mix(&bus, &mut out, DownmixStrategy::Spatial, PhiOutput::default());

        for (k, ch) in out.iter().enumerate() {
            assert_eq!(ch[0], k as f32, "channel {k} should pass through");
        }
    }

    #[test]
    fn test_energy_silent_block_stays_silent() {
        let bus = bus_with(|_| 0.0, 64);
        let mut out = out_buffers(2, 64);
        let mut mixer = Downmixer::new(2);
        mixer.mix(&bus, &mut out, DownmixStrategy::Energy, PhiOutput::default());

        assert!(out.iter().all(|ch| ch.iter().all(|&s| s == 0.0)));
    }

    #[test]
    fn test_energy_favours_loud_channel() {
        let mut bus = bus_with(|_| 0.0, 64);
        bus[3] = vec![1.0; 64];
        bus[5] = vec![0.1; 64];
        let mut out = out_buffers(1, 64);
        let mut mixer = Downmixer::new(1);
        mixer.mix(&bus, &mut out, DownmixStrategy::Energy, PhiOutput::default());

        // Channel 3 holds ~91% of the RMS mass, so the output tracks it.
        assert!(out[0][0] > 0.85, "got {}", out[0][0]);
    }

    #[test]
    fn test_phi_weights_normalised() {
        let bus = bus_with(|_| 1.0, 32);
        let mut out = out_buffers(1, 32);
        let mut mixer = Downmixer::new(1);
        let phi = PhiOutput {
            phase: 1.0,
            depth: 0.8,
        };
        mixer.mix(&bus, &mut out, DownmixStrategy::Phi, phi);

        // Normalised weights sum to 1, so equal channels mix to the input.
        assert!((out[0][0] - 1.0).abs() < 1e-4, "got {}", out[0][0]);
    }

    #[test]
    fn test_phi_zero_depth_matches_uniform() {
        let bus = bus_with(|k| k as f32 * 0.1, 16);
        let mut out_phi = out_buffers(1, 16);
        let mut mixer = Downmixer::new(1);
        mixer.mix(
            &bus,
            &mut out_phi,
            DownmixStrategy::Phi,
            PhiOutput { phase: 0.3, depth: 0.0 },
        );

        // depth 0 gives uniform 1/8 weights: the mean of the channels.
        let mean: f32 = (0..8).map(|k| k as f32 * 0.1).sum::<f32>() / 8.0;
        assert!((out_phi[0][0] - mean).abs() < 1e-5);
    }

    #[test]
    fn test_unknown_strategy_name_falls_back_to_linear() {
        assert_eq!(DownmixStrategy::parse_or_linear("warp"), DownmixStrategy::Linear);
        assert_eq!(DownmixStrategy::parse_or_linear("energy"), DownmixStrategy::Energy);
        assert_eq!(DownmixStrategy::parse_or_linear("spatial"), DownmixStrategy::Spatial);
        assert_eq!(DownmixStrategy::parse_or_linear("phi"), DownmixStrategy::Phi);
    }
}
