//! Per grain filter stage: a fixed coefficient biquad and a zero-order-hold "bitcrusher".
//!
//! Both stages are pure functions over a single grain window. Filter state never leaks from one
//! window into another, so grains can be filtered in any order and on any thread with identical
//! results.

pub mod biquad;

use biquad::{BiquadCoefficients, BiquadFilter};

// -------------------------------------------------------------------------------------------------

/// Run a direct form I biquad over the window. The filter state starts from silence for every
/// window.
pub fn apply_biquad(window: &mut [f32], coefficients: &BiquadCoefficients) {
    if *coefficients == BiquadCoefficients::PASSTHROUGH {
        return;
    }
    let mut filter = BiquadFilter::new();
    filter.process(coefficients, window);
}

/// Zero-order-hold decimation: every `downsample_factor`th sample is held and replicated over
/// the following `downsample_factor - 1` samples. Factors of 0 or 1 leave the window untouched.
///
/// Despite its name this does not quantize amplitudes.
pub fn apply_bitcrush(window: &mut [f32], downsample_factor: usize) {
    if downsample_factor <= 1 {
        return;
    }
    for chunk in window.chunks_mut(downsample_factor) {
        let held = chunk[0];
        chunk[1..].fill(held);
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::{
        biquad::{BiquadCoefficients, BiquadFilterType},
        *,
    };

    #[test]
    fn passthrough() {
        let mut window = vec![0.25, -1.0, 0.5, 0.0];
        apply_biquad(&mut window, &BiquadCoefficients::PASSTHROUGH);
        assert_eq!(window, vec![0.25, -1.0, 0.5, 0.0]);
    }

    #[test]
    fn direct_form() {
        // y[n] = 0.5 x[n] + 0.25 x[n-1] - 0.5 y[n-1]
        let coefficients = BiquadCoefficients::new(0.5, 0.25, 0.0, 0.5, 0.0);
        let mut window = vec![1.0, 0.0, 0.0, 0.0];
        apply_biquad(&mut window, &coefficients);
        assert_eq!(window, vec![0.5, 0.0, 0.0, 0.0]);

        let mut window = vec![1.0, 1.0, 1.0];
        apply_biquad(&mut window, &coefficients);
        assert_eq!(window, vec![0.5, 0.5, 0.5]);
    }

    #[test]
    fn state_is_reset_per_window() {
        let coefficients =
            BiquadCoefficients::design(BiquadFilterType::Lowpass, 44100, 1000.0, 0.707, 0.0)
                .unwrap();
        let input = (0..64).map(|i| (i as f32 * 0.3).sin()).collect::<Vec<_>>();

        let mut first = input.clone();
        apply_biquad(&mut first, &coefficients);
        let mut other = vec![1.0; 64];
        apply_biquad(&mut other, &coefficients);
        let mut second = input.clone();
        apply_biquad(&mut second, &coefficients);

        assert_eq!(first, second);
    }

    #[test]
    fn lowpass_design() {
        let coefficients =
            BiquadCoefficients::design(BiquadFilterType::Lowpass, 44100, 500.0, 0.707, 0.0)
                .unwrap();
        assert!(coefficients.is_finite());
        // unity gain at DC
        let dc_gain = (coefficients.a0 + coefficients.a1 + coefficients.a2)
            / (1.0 + coefficients.b1 + coefficients.b2);
        assert!((dc_gain - 1.0).abs() < 1e-3);

        let mut window = vec![1.0; 4096];
        apply_biquad(&mut window, &coefficients);
        assert!((window[4095] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn invalid_designs() {
        assert!(BiquadCoefficients::design(BiquadFilterType::Lowpass, 0, 500.0, 0.7, 0.0).is_err());
        assert!(
            BiquadCoefficients::design(BiquadFilterType::Lowpass, 44100, 500.0, 0.0, 0.0).is_err()
        );
        assert!(
            BiquadCoefficients::design(BiquadFilterType::Highpass, 44100, 30000.0, 0.7, 0.0)
                .is_err()
        );
        assert!(
            BiquadCoefficients::design(BiquadFilterType::Peak, 44100, f32::NAN, 0.7, 0.0).is_err()
        );
    }

    #[test]
    fn bitcrush_holds_samples() {
        let mut window = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        apply_bitcrush(&mut window, 3);
        assert_eq!(window, vec![1.0, 1.0, 1.0, 4.0, 4.0, 4.0, 7.0]);

        let mut window = vec![1.0, 2.0, 3.0];
        apply_bitcrush(&mut window, 1);
        assert_eq!(window, vec![1.0, 2.0, 3.0]);
        apply_bitcrush(&mut window, 0);
        assert_eq!(window, vec![1.0, 2.0, 3.0]);
    }
}
