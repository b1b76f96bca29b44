//! Property-based tests for the chroma-core DSP primitives.
//!
//! Tests field-processor output hygiene, Φ controller continuity, and delay
//! line integrity using proptest for randomized input generation.

use chroma_core::{
    BLOCK_SIZE, ChromaticFieldProcessor, CompensationDelay, PhiController, PhiOutput,
    PhiSourceKind, PhiTickContext,
};
use proptest::prelude::*;

/// Arbitrary sample that may be non-finite, to exercise containment.
fn hostile_sample() -> impl Strategy<Value = f32> {
    prop_oneof![
        8 => -1.0f32..=1.0f32,
        1 => Just(f32::NAN),
        1 => Just(f32::INFINITY),
        1 => Just(f32::NEG_INFINITY),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Whatever the input contains (including NaN and infinities), every
    /// bus sample and every metric the processor emits is finite, and
    /// metrics stay inside their documented ranges.
    #[test]
    fn field_output_always_finite_and_bounded(
        input in prop::collection::vec(hostile_sample(), BLOCK_SIZE),
        phase in 0.0f32..core::f32::consts::TAU,
        depth in 0.0f32..=1.0f32,
    ) {
        let mut proc = ChromaticFieldProcessor::new(48000.0);
        let metrics = proc.process(&input, PhiOutput { phase, depth });

        prop_assert!(metrics.ici.is_finite());
        prop_assert!((0.0..=1.0).contains(&metrics.ici));
        prop_assert!((0.0..=1.0).contains(&metrics.phase_coherence));
        prop_assert!(metrics.spectral_centroid_hz >= 0.0);
        prop_assert!((0.0..=1.5).contains(&metrics.criticality));
        prop_assert!((0.0..=1.0).contains(&metrics.consciousness_level));
        for ch in proc.bus() {
            for &s in ch.iter() {
                prop_assert!(s.is_finite(), "non-finite bus sample {s}");
            }
        }
    }

    /// A block containing any non-finite sample is flagged invalid; a block
    /// of finite samples is not.
    #[test]
    fn field_validity_tracks_input(
        input in prop::collection::vec(hostile_sample(), BLOCK_SIZE),
    ) {
        let all_finite = input.iter().all(|s| s.is_finite());
        let mut proc = ChromaticFieldProcessor::new(48000.0);
        let metrics = proc.process(&input, PhiOutput::default());
        prop_assert_eq!(metrics.input_valid, all_finite);
    }

    /// The Φ controller's output stays in range and never jumps depth by
    /// more than the steepest point of the 100 ms equal-power curve between
    /// adjacent blocks, across arbitrary source switch schedules.
    #[test]
    fn phi_depth_continuous_under_switching(
        switches in prop::collection::vec(0usize..4, 1..6),
        manual_depth in 0.0f32..=1.0f32,
    ) {
        let dt = BLOCK_SIZE as f32 / 48000.0;
        let mut ctl = PhiController::new(48000.0);
        ctl.set_manual(1.0, manual_depth);

        let ctx = PhiTickContext { input: &[], sensor_value: 0.3 };
        let mut prev = ctl.tick(dt, &ctx).depth;

        for &s in &switches {
            let kind = match s {
                0 => PhiSourceKind::Manual,
                1 => PhiSourceKind::Audio,
                2 => PhiSourceKind::Sensor,
                _ => PhiSourceKind::Internal,
            };
            ctl.set_source(kind);
            for _ in 0..15 {
                let out = ctl.tick(dt, &ctx);
                prop_assert!((0.0..=1.0).contains(&out.depth));
                // Steepest equal-power slope over one 10.7 ms block is
                // ~0.17 of the full fade span.
                prop_assert!(
                    (out.depth - prev).abs() <= 0.18,
                    "depth discontinuity {} -> {}", prev, out.depth
                );
                prev = out.depth;
            }
        }
    }

    /// Writing a block through a zero-delay line returns it unchanged, for
    /// any finite input.
    #[test]
    fn delay_zero_is_identity(
        input in prop::collection::vec(-1.0f32..=1.0f32, 1..=256),
    ) {
        let mut delay = CompensationDelay::new(1024);
        let mut block = input.clone();
        delay.process_block_inplace(&mut block);
        prop_assert_eq!(block, input);
    }

    /// An impulse through an integer delay of d samples comes out exactly
    /// d samples later.
    #[test]
    fn delay_integer_shift_exact(d in 1usize..512) {
        let mut delay = CompensationDelay::new(1024);
        delay.set_delay_samples(d as f32);

        let mut block = vec![0.0f32; 1024];
        block[0] = 1.0;
        delay.process_block_inplace(&mut block);

        prop_assert_eq!(block[d], 1.0);
        let others = block.iter().enumerate().filter(|&(i, _)| i != d);
        for (i, &s) in others {
            prop_assert_eq!(s, 0.0, "unexpected energy at index {}", i);
        }
    }
}
