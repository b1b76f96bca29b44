//! Envelope follower for tracking per-channel signal amplitude.
//!
//! The chromatic field uses one follower per channel to derive the rectified
//! envelopes that feed the ICI and coherence metrics, and the Φ audio source
//! uses one to derive modulation depth from the input signal.

use libm::expf;

/// Peak-detecting envelope follower with separate attack and release times.
///
/// Uses exponential smoothing: `y[n] = coeff·y[n−1] + (1−coeff)·|x[n]|`,
/// with the coefficient chosen per-sample depending on whether the signal
/// is rising (attack) or falling (release).
#[derive(Debug, Clone)]
pub struct EnvelopeFollower {
    /// Current envelope level (linear, always >= 0)
    envelope: f32,
    attack_coeff: f32,
    release_coeff: f32,
    sample_rate: f32,
    attack_ms: f32,
    release_ms: f32,
}

impl EnvelopeFollower {
    /// Create a follower with the field's standard times: attack 20 ms,
    /// release 100 ms.
    pub fn new(sample_rate: f32) -> Self {
        Self::with_times(sample_rate, 20.0, 100.0)
    }

    /// Create with explicit attack and release times in milliseconds.
    pub fn with_times(sample_rate: f32, attack_ms: f32, release_ms: f32) -> Self {
        let mut follower = Self {
            envelope: 0.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            sample_rate,
            attack_ms: attack_ms.max(0.1),
            release_ms: release_ms.max(1.0),
        };
        follower.recalculate_coefficients();
        follower
    }

    /// Update sample rate and recalculate coefficients.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.recalculate_coefficients();
    }

    /// Process one sample and return the current envelope level.
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let input_abs = input.abs();

        let coeff = if input_abs > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };

        self.envelope = coeff * self.envelope + (1.0 - coeff) * input_abs;
        self.envelope
    }

    /// Current envelope level without processing new input.
    #[inline]
    pub fn level(&self) -> f32 {
        self.envelope
    }

    /// Reset the envelope to zero.
    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }

    fn recalculate_coefficients(&mut self) {
        // coeff = exp(-1 / (time_ms * sample_rate / 1000))
        self.attack_coeff = expf(-1.0 / (self.attack_ms * self.sample_rate / 1000.0));
        self.release_coeff = expf(-1.0 / (self.release_ms * self.sample_rate / 1000.0));
    }
}

impl Default for EnvelopeFollower {
    fn default() -> Self {
        Self::new(48000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_rises_on_signal() {
        let mut env = EnvelopeFollower::with_times(48000.0, 1.0, 100.0);

        let mut level = 0.0;
        for _ in 0..500 {
            level = env.process(1.0);
        }
        assert!(level > 0.9, "envelope should rise, got {level}");
    }

    #[test]
    fn test_envelope_falls_on_silence() {
        let mut env = EnvelopeFollower::with_times(48000.0, 1.0, 10.0);

        for _ in 0..500 {
            env.process(1.0);
        }
        let mut level = 0.0;
        for _ in 0..1000 {
            level = env.process(0.0);
        }
        // ~2 release time constants have elapsed; expect < e^-2 + margin.
        assert!(level < 0.15, "envelope should fall, got {level}");
    }

    #[test]
    fn test_envelope_rectifies() {
        let mut env = EnvelopeFollower::with_times(48000.0, 1.0, 100.0);
        assert!(env.process(-0.5) > 0.0);
    }

    #[test]
    fn test_envelope_reset() {
        let mut env = EnvelopeFollower::new(48000.0);
        for _ in 0..100 {
            env.process(1.0);
        }
        env.reset();
        assert_eq!(env.level(), 0.0);
    }

    #[test]
    fn test_default_times_are_field_standard() {
        let env = EnvelopeFollower::new(48000.0);
        assert_eq!(env.attack_ms, 20.0);
        assert_eq!(env.release_ms, 100.0);
    }
}
