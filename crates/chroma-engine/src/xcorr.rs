//! FFT-based cross-correlation for round-trip latency estimation.
//!
//! Calibration correlates the transmitted stimulus against the loopback
//! recording; the positive-lag peak gives the round-trip delay in samples.
//! Signals are a second or more of audio, so the O(n log n) FFT method is
//! used via the cross-correlation theorem:
//!
//! ```text
//! R_xy = IFFT( conj(FFT(x)) · FFT(y) )
//! ```
//!
//! with zero-padding to avoid circular wrap-around.
//!
//! Reference: Oppenheim & Schafer, "Discrete-Time Signal Processing"
//! (3rd ed.), section 2.8.

use rustfft::FftPlanner;
use rustfft::num_complex::Complex;

/// Compute the cross-correlation of `x` and `y` for lags `0..=max_lag`.
///
/// Entry `i` of the result is `R_xy(i) = Σ_n x[n]·y[n+i]`: it peaks at lag
/// `d` when `y` is `x` delayed by `d` samples.
pub fn xcorr_positive(x: &[f32], y: &[f32], max_lag: usize) -> Vec<f32> {
    if x.is_empty() || y.is_empty() {
        return vec![0.0; max_lag + 1];
    }

    let fft_size = (x.len() + y.len()).next_power_of_two().max(2);
    let mut planner = FftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(fft_size);
    let inverse = planner.plan_fft_inverse(fft_size);

    let mut buf_x: Vec<Complex<f32>> = x.iter().map(|&v| Complex::new(v, 0.0)).collect();
    buf_x.resize(fft_size, Complex::new(0.0, 0.0));
    let mut buf_y: Vec<Complex<f32>> = y.iter().map(|&v| Complex::new(v, 0.0)).collect();
    buf_y.resize(fft_size, Complex::new(0.0, 0.0));

    forward.process(&mut buf_x);
    forward.process(&mut buf_y);

    for (cx, cy) in buf_x.iter_mut().zip(buf_y.iter()) {
        *cx = cx.conj() * cy;
    }

    inverse.process(&mut buf_x);

    // rustfft's inverse is unnormalised; positive lags sit at the front of
    // the circular result.
    let scale = 1.0 / fft_size as f32;
    (0..=max_lag)
        .map(|lag| {
            if lag < fft_size {
                buf_x[lag].re * scale
            } else {
                0.0
            }
        })
        .collect()
}

/// Locate the peak of a positive-lag correlation and its prominence.
///
/// Returns `(lag, peak_to_mean_ratio)`: the lag of the largest absolute
/// correlation and how far it stands above the mean absolute level. A clean
/// loopback produces ratios in the tens; an unconnected input stays near 1.
pub fn peak_with_prominence(correlation: &[f32]) -> (usize, f64) {
    if correlation.is_empty() {
        return (0, 0.0);
    }

    let mut best_lag = 0;
    let mut best_abs = 0.0f32;
    let mut sum_abs = 0.0f64;
    for (lag, &value) in correlation.iter().enumerate() {
        let abs = value.abs();
        sum_abs += f64::from(abs);
        if abs > best_abs {
            best_abs = abs;
            best_lag = lag;
        }
    }

    let mean_abs = sum_abs / correlation.len() as f64;
    if mean_abs <= f64::EPSILON {
        return (best_lag, 0.0);
    }
    (best_lag, f64::from(best_abs) / mean_abs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::f32::consts::TAU;

    fn sine(freq: f32, sample_rate: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (TAU * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn test_delayed_copy_peaks_at_delay() {
        let x = sine(1000.0, 48000.0, 4800);
        let delay = 360usize;
        let mut y = vec![0.0f32; x.len() + delay];
        y[delay..delay + x.len()].copy_from_slice(&x);

        let corr = xcorr_positive(&x, &y, 1000);
        let (lag, ratio) = peak_with_prominence(&corr);
        assert_eq!(lag, delay, "peak must sit at the delay");
        assert!(ratio > 3.0, "clean copy must be prominent, got {ratio}");
    }

    #[test]
    fn test_zero_delay_peaks_at_zero() {
        let x = sine(440.0, 48000.0, 2048);
        let corr = xcorr_positive(&x, &x, 500);
        let (lag, _) = peak_with_prominence(&corr);
        assert_eq!(lag, 0);
    }

    #[test]
    fn test_silence_has_no_prominence() {
        let x = sine(440.0, 48000.0, 1024);
        let silent = vec![0.0f32; 1024];
        let corr = xcorr_positive(&x, &silent, 200);
        let (_, ratio) = peak_with_prominence(&corr);
        assert!(ratio < 3.0, "silence must not look like a peak, got {ratio}");
    }

    #[test]
    fn test_empty_inputs() {
        let corr = xcorr_positive(&[], &[1.0, 2.0], 4);
        assert_eq!(corr.len(), 5);
        assert!(corr.iter().all(|&v| v == 0.0));
    }
}
