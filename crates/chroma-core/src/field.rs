//! The chromatic field processor: an 8-channel coupled resonator bank with
//! per-block metric extraction.
//!
//! Each channel is a band-pass resonator on a circle-of-fifths series
//! (`110 · 1.5^k` Hz) feeding an envelope follower and a phase-coupled
//! oscillator. The Φ parameters re-tune the bank every block: `phi_phase`
//! rotates the coupling matrix, `phi_depth` scales the cross-coupling terms
//! and the oscillator contribution.
//!
//! After filling the 8-channel bus the processor derives the block metrics:
//!
//! | Metric | Definition |
//! |--------|------------|
//! | ICI | mean pairwise envelope disparity / mean envelope, in [0,1] |
//! | Phase coherence | envelope-weighted order parameter of channel phases |
//! | Spectral centroid | envelope-weighted mean of channel frequencies (Hz) |
//! | Criticality | proximity of the energy distribution to equilibrium, 1.0 at equilibrium |
//! | Consciousness level | fixed-weight combination of the above, gated by activity |
//!
//! Guarantees: no heap allocation after construction, deterministic output
//! for identical input and state, and finite outputs always: non-finite
//! input samples are clamped to zero and flagged.

use crate::envelope::EnvelopeFollower;
use crate::math::{finite_or_zero, flush_denormal, hz_to_omega};
use crate::phi::PhiOutput;
use core::f32::consts::{PI, TAU};
use libm::{cosf, sinf, sqrtf};

/// Number of field channels.
pub const NUM_CHANNELS: usize = 8;

/// Samples per processing block.
pub const BLOCK_SIZE: usize = 512;

/// Lowest channel centre frequency in Hz; channel `k` sits at `110 · 1.5^k`.
pub const BASE_FREQUENCY_HZ: f32 = 110.0;

/// Frequency ratio between adjacent channels (a perfect fifth, walking the
/// chromatic circle).
pub const CHANNEL_RATIO: f32 = 1.5;

/// Resonance of the per-channel band-pass filters.
const CHANNEL_Q: f32 = 4.0;

/// Maximum coupling-induced phase drift in rad/s at full depth.
const COUPLING_RAD_PER_S: f32 = 12.0;

/// Criticality reported for a silent field. Sits at equilibrium proximity
/// but at the edge of the critical band, so a resting pipeline never
/// classifies as CRITICAL.
pub const REST_CRITICALITY: f32 = 0.9;

/// Mean-square level at which the activity gate saturates.
const ACTIVITY_REF: f32 = 0.01;

/// Mean-square level below which the field counts as silent.
const SILENCE_EPS: f32 = 1e-8;

/// Envelope mass below which envelope-weighted metrics are defined as zero.
const ENVELOPE_EPS: f32 = 1e-6;

/// Block metrics extracted by [`ChromaticFieldProcessor::process`].
///
/// All fields are finite; ranges are documented per field. State
/// classification happens downstream on the telemetry frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FieldMetrics {
    /// Inter-channel interference, `[0, 1]`.
    pub ici: f32,
    /// Envelope-weighted phase order parameter, `[0, 1]`.
    pub phase_coherence: f32,
    /// Envelope-weighted mean channel frequency in Hz, `>= 0`.
    pub spectral_centroid_hz: f32,
    /// Proximity of the channel-energy distribution to equilibrium,
    /// `[0, 1.5]` with 1.0 at equilibrium.
    pub criticality: f32,
    /// Fixed-weight combination of the metrics above, `[0, 1]`.
    pub consciousness_level: f32,
    /// False when the input block contained NaN or infinity.
    pub input_valid: bool,
}

/// Band-pass resonator (RBJ cookbook coefficients, Direct Form I).
#[derive(Debug, Clone)]
struct BandPass {
    b0: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BandPass {
    fn new(frequency: f32, q: f32, sample_rate: f32) -> Self {
        let mut filter = Self {
            b0: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        };
        filter.retune(frequency, q, sample_rate);
        filter
    }

    fn retune(&mut self, frequency: f32, q: f32, sample_rate: f32) {
        let omega = 2.0 * PI * frequency / sample_rate;
        let cos_omega = cosf(omega);
        let sin_omega = sinf(omega);
        let alpha = sin_omega / (2.0 * q);

        let a0_inv = 1.0 / (1.0 + alpha);
        self.b0 = alpha * a0_inv;
        self.b2 = -alpha * a0_inv;
        self.a1 = -2.0 * cos_omega * a0_inv;
        self.a2 = (1.0 - alpha) * a0_inv;
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        // b1 is zero for the band-pass prototype, so it drops out.
        let output = self.b0 * input + self.b2 * self.x2 - self.a1 * self.y1 - self.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = flush_denormal(output);

        output
    }

    fn clear(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

/// Per-channel state: centre frequency, resonator, envelope, oscillator
/// phase, and block energy accumulator.
#[derive(Debug, Clone)]
struct ChannelState {
    frequency_hz: f32,
    omega: f32,
    osc_phase: f32,
    bandpass: BandPass,
    envelope: EnvelopeFollower,
    energy: f32,
}

impl ChannelState {
    fn new(frequency_hz: f32, sample_rate: f32) -> Self {
        Self {
            frequency_hz,
            omega: hz_to_omega(frequency_hz, sample_rate),
            osc_phase: 0.0,
            bandpass: BandPass::new(frequency_hz, CHANNEL_Q, sample_rate),
            envelope: EnvelopeFollower::new(sample_rate),
            energy: 0.0,
        }
    }
}

/// 8-channel chromatic field transform with metric extraction.
///
/// Owns every scratch buffer it needs; [`process`](Self::process) performs
/// no heap allocation.
#[derive(Debug, Clone)]
pub struct ChromaticFieldProcessor {
    sample_rate: f32,
    channels: [ChannelState; NUM_CHANNELS],
    /// Base coupling matrix row-major; rotated by `phi_phase` per block.
    coupling: [[f32; NUM_CHANNELS]; NUM_CHANNELS],
    bus: [Vec<f32>; NUM_CHANNELS],
}

impl ChromaticFieldProcessor {
    /// Create a processor for the given sample rate.
    pub fn new(sample_rate: f32) -> Self {
        let channels = core::array::from_fn(|k| {
            let frequency = BASE_FREQUENCY_HZ * libm::powf(CHANNEL_RATIO, k as f32);
            ChannelState::new(frequency, sample_rate)
        });

        let mut coupling = [[0.0; NUM_CHANNELS]; NUM_CHANNELS];
        for (k, row) in coupling.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                if k != j {
                    *cell = 1.0 / (1.0 + k.abs_diff(j) as f32);
                }
            }
        }

        Self {
            sample_rate,
            channels,
            coupling,
            bus: core::array::from_fn(|_| vec![0.0; BLOCK_SIZE]),
        }
    }

    /// Channel centre frequency in Hz.
    pub fn channel_frequency(&self, k: usize) -> f32 {
        self.channels[k].frequency_hz
    }

    /// The 8-channel output bus filled by the last [`process`](Self::process)
    /// call. Only the first `frames` samples of each buffer are meaningful.
    pub fn bus(&self) -> &[Vec<f32>; NUM_CHANNELS] {
        &self.bus
    }

    /// Reset all filter, envelope, and oscillator state.
    pub fn reset(&mut self) {
        for ch in &mut self.channels {
            ch.bandpass.clear();
            ch.envelope.reset();
            ch.osc_phase = 0.0;
            ch.energy = 0.0;
        }
        for buf in &mut self.bus {
            buf.fill(0.0);
        }
    }

    /// Update the sample rate, retuning every channel.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        for ch in &mut self.channels {
            ch.omega = hz_to_omega(ch.frequency_hz, sample_rate);
            ch.bandpass.retune(ch.frequency_hz, CHANNEL_Q, sample_rate);
            ch.envelope.set_sample_rate(sample_rate);
        }
    }

    /// Transform one input block, filling the bus and returning the metrics.
    ///
    /// `input` must not exceed [`BLOCK_SIZE`] samples. Non-finite input
    /// samples are clamped to zero and reflected in
    /// [`FieldMetrics::input_valid`]; the processor never errors.
    pub fn process(&mut self, input: &[f32], phi: PhiOutput) -> FieldMetrics {
        let frames = input.len().min(BLOCK_SIZE);
        let depth = phi.depth.clamp(0.0, 1.0);

        // Coupling drift per channel, evaluated once per block from the
        // block-start phases. phi_phase rotates the matrix, depth scales it.
        let mut drift = [0.0f32; NUM_CHANNELS];
        for k in 0..NUM_CHANNELS {
            let mut pull = 0.0f32;
            for j in 0..NUM_CHANNELS {
                if j == k {
                    continue;
                }
                let rotation = cosf(phi.phase + TAU * (k as f32 - j as f32) / NUM_CHANNELS as f32);
                pull += self.coupling[k][j]
                    * rotation
                    * sinf(self.channels[j].osc_phase - self.channels[k].osc_phase);
            }
            drift[k] =
                depth * COUPLING_RAD_PER_S * pull / (NUM_CHANNELS as f32 * self.sample_rate);
        }

        let mut input_valid = true;
        for ch in &mut self.channels {
            ch.energy = 0.0;
        }

        for n in 0..frames {
            let raw = input[n];
            let x = if raw.is_finite() {
                raw
            } else {
                input_valid = false;
                0.0
            };

            for (k, ch) in self.channels.iter_mut().enumerate() {
                let band = ch.bandpass.process(x);
                let env = ch.envelope.process(band);

                ch.osc_phase += ch.omega + drift[k];
                if ch.osc_phase >= TAU {
                    ch.osc_phase -= TAU;
                }

                let y = finite_or_zero(band + depth * env * sinf(ch.osc_phase));
                self.bus[k][n] = y;
                ch.energy += y * y;
            }
        }
        for buf in &mut self.bus {
            buf[frames..].fill(0.0);
        }

        let mut metrics = self.extract_metrics(frames);
        metrics.input_valid = input_valid;
        metrics
    }

    fn extract_metrics(&self, frames: usize) -> FieldMetrics {
        let envelopes: [f32; NUM_CHANNELS] =
            core::array::from_fn(|k| self.channels[k].envelope.level());
        let total_env: f32 = envelopes.iter().sum();

        let (ici, phase_coherence, spectral_centroid_hz) = if total_env < ENVELOPE_EPS {
            (0.0, 0.0, 0.0)
        } else {
            let mean_env = total_env / NUM_CHANNELS as f32;
            let mut disparity = 0.0f32;
            let mut pairs = 0.0f32;
            for j in 0..NUM_CHANNELS {
                for k in (j + 1)..NUM_CHANNELS {
                    disparity += (envelopes[j] - envelopes[k]).abs();
                    pairs += 1.0;
                }
            }
            let ici = (disparity / pairs / mean_env).clamp(0.0, 1.0);

            let mut re = 0.0f32;
            let mut im = 0.0f32;
            let mut centroid = 0.0f32;
            for (k, ch) in self.channels.iter().enumerate() {
                re += envelopes[k] * cosf(ch.osc_phase);
                im += envelopes[k] * sinf(ch.osc_phase);
                centroid += envelopes[k] * ch.frequency_hz;
            }
            let coherence = (sqrtf(re * re + im * im) / total_env).clamp(0.0, 1.0);
            (ici, coherence, centroid / total_env)
        };

        let energies: [f32; NUM_CHANNELS] = core::array::from_fn(|k| self.channels[k].energy);
        let total_energy: f32 = energies.iter().sum();
        let mean_square = if frames > 0 {
            total_energy / frames as f32
        } else {
            0.0
        };

        let criticality = if mean_square < SILENCE_EPS {
            REST_CRITICALITY
        } else {
            let uniform = 1.0 / NUM_CHANNELS as f32;
            let mut dist_sq = 0.0f32;
            let mut max_fraction = 0.0f32;
            for &e in &energies {
                let p = e / total_energy;
                dist_sq += (p - uniform) * (p - uniform);
                max_fraction = max_fraction.max(p);
            }
            // D_max: all energy in one channel.
            let d_max = sqrtf((1.0 - uniform) * (1.0 - uniform)
                + (NUM_CHANNELS - 1) as f32 * uniform * uniform);
            let concentration = ((max_fraction - uniform) / (1.0 - uniform)).max(0.0);
            ((1.0 - sqrtf(dist_sq) / d_max) + 0.5 * concentration).clamp(0.0, 1.5)
        };

        let activity = (mean_square / ACTIVITY_REF).clamp(0.0, 1.0);
        let crit_proximity = (1.0 - (criticality - 1.0).abs() / 0.5).max(0.0);
        let consciousness_level = (activity
            * (0.4 * phase_coherence + 0.3 * (1.0 - ici) + 0.3 * crit_proximity))
            .clamp(0.0, 1.0);

        FieldMetrics {
            ici: finite_or_zero(ici),
            phase_coherence: finite_or_zero(phase_coherence),
            spectral_centroid_hz: finite_or_zero(spectral_centroid_hz),
            criticality: finite_or_zero(criticality),
            consciousness_level: finite_or_zero(consciousness_level),
            input_valid: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48000.0;

    fn sine_block(freq: f32, amplitude: f32, offset: usize) -> Vec<f32> {
        (0..BLOCK_SIZE)
            .map(|n| amplitude * sinf(TAU * freq * (offset + n) as f32 / SR))
            .collect()
    }

    #[test]
    fn test_silence_yields_rest_metrics_and_zero_bus() {
        let mut proc = ChromaticFieldProcessor::new(SR);
        let silence = vec![0.0f32; BLOCK_SIZE];

        for _ in 0..10 {
            let metrics = proc.process(&silence, PhiOutput { phase: 0.0, depth: 0.5 });
            assert_eq!(metrics.ici, 0.0);
            assert_eq!(metrics.phase_coherence, 0.0);
            assert_eq!(metrics.spectral_centroid_hz, 0.0);
            assert_eq!(metrics.criticality, REST_CRITICALITY);
            assert!(metrics.consciousness_level < 0.1);
            assert!(metrics.input_valid);
            for ch in proc.bus() {
                assert!(ch.iter().all(|&s| s == 0.0), "bus must stay silent");
            }
        }
    }

    #[test]
    fn test_tone_produces_finite_bounded_metrics() {
        let mut proc = ChromaticFieldProcessor::new(SR);
        let mut metrics = FieldMetrics::default();
        for block in 0..20 {
            let input = sine_block(440.0, 0.5, block * BLOCK_SIZE);
            metrics = proc.process(&input, PhiOutput { phase: 1.0, depth: 0.5 });
        }

        assert!((0.0..=1.0).contains(&metrics.ici));
        assert!((0.0..=1.0).contains(&metrics.phase_coherence));
        assert!(metrics.spectral_centroid_hz > 0.0);
        assert!(metrics.spectral_centroid_hz < 2000.0);
        assert!((0.0..=1.5).contains(&metrics.criticality));
        assert!((0.0..=1.0).contains(&metrics.consciousness_level));
        for ch in proc.bus() {
            assert!(ch.iter().all(|s| s.is_finite()));
        }
    }

    #[test]
    fn test_nan_input_contained_and_flagged() {
        let mut proc = ChromaticFieldProcessor::new(SR);
        let mut input = sine_block(440.0, 0.5, 0);
        input[100] = f32::NAN;

        let metrics = proc.process(&input, PhiOutput { phase: 0.0, depth: 0.5 });
        assert!(!metrics.input_valid);
        assert!(metrics.ici.is_finite());
        assert!(metrics.criticality.is_finite());
        for ch in proc.bus() {
            assert!(ch.iter().all(|s| s.is_finite()), "bus must stay finite");
        }

        // The next clean block is valid again.
        let clean = sine_block(440.0, 0.5, BLOCK_SIZE);
        let metrics = proc.process(&clean, PhiOutput { phase: 0.0, depth: 0.5 });
        assert!(metrics.input_valid);
    }

    #[test]
    fn test_infinity_input_contained() {
        let mut proc = ChromaticFieldProcessor::new(SR);
        let mut input = vec![0.0f32; BLOCK_SIZE];
        input[0] = f32::INFINITY;
        input[1] = f32::NEG_INFINITY;

        let metrics = proc.process(&input, PhiOutput::default());
        assert!(!metrics.input_valid);
        for ch in proc.bus() {
            assert!(ch.iter().all(|s| s.is_finite()));
        }
    }

    #[test]
    fn test_deterministic_given_identical_state_and_input() {
        let mut a = ChromaticFieldProcessor::new(SR);
        let mut b = ChromaticFieldProcessor::new(SR);
        let phi = PhiOutput { phase: 0.7, depth: 0.8 };

        for block in 0..5 {
            let input = sine_block(330.0, 0.4, block * BLOCK_SIZE);
            let ma = a.process(&input, phi);
            let mb = b.process(&input, phi);
            assert_eq!(ma, mb, "metrics must be deterministic");
            assert_eq!(a.bus(), b.bus(), "bus must be deterministic");
        }
    }

    #[test]
    fn test_depth_modulates_output() {
        let mut dry = ChromaticFieldProcessor::new(SR);
        let mut wet = ChromaticFieldProcessor::new(SR);

        let mut differs = false;
        for block in 0..5 {
            let input = sine_block(440.0, 0.5, block * BLOCK_SIZE);
            dry.process(&input, PhiOutput { phase: 0.5, depth: 0.0 });
            wet.process(&input, PhiOutput { phase: 0.5, depth: 1.0 });
            if dry.bus() != wet.bus() {
                differs = true;
            }
        }
        assert!(differs, "phi_depth must influence the transform");
    }

    #[test]
    fn test_channel_frequencies_walk_fifths() {
        let proc = ChromaticFieldProcessor::new(SR);
        assert_eq!(proc.channel_frequency(0), BASE_FREQUENCY_HZ);
        for k in 1..NUM_CHANNELS {
            let ratio = proc.channel_frequency(k) / proc.channel_frequency(k - 1);
            assert!((ratio - CHANNEL_RATIO).abs() < 1e-4);
        }
    }

    #[test]
    fn test_centroid_tracks_excited_band() {
        let mut proc = ChromaticFieldProcessor::new(SR);
        // Drive near channel 0 (110 Hz): the centroid should sit well below
        // the bank midpoint.
        let mut metrics = FieldMetrics::default();
        for block in 0..30 {
            let input = sine_block(110.0, 0.5, block * BLOCK_SIZE);
            metrics = proc.process(&input, PhiOutput::default());
        }
        assert!(
            metrics.spectral_centroid_hz < 500.0,
            "low tone should pull the centroid down, got {}",
            metrics.spectral_centroid_hz
        );
    }
}
