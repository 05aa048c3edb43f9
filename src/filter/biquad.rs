use std::f64;

use strum::{Display, EnumIter, EnumString};

use crate::Error;

// -------------------------------------------------------------------------------------------------

/// Available filter designs for [`BiquadCoefficients::design`].
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug, Display, EnumIter, EnumString)]
pub enum BiquadFilterType {
    #[default]
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
    Peak,
    Allpass,
    Lowshelf,
    Highshelf,
}

// -------------------------------------------------------------------------------------------------

/// Normalized direct form biquad coefficients.
///
/// `a0`, `a1`, `a2` are the feedforward and `b1`, `b2` the feedback coefficients:
/// ```text
/// y[n] = a0*x[n] + a1*x[n-1] + a2*x[n-2] - b1*y[n-1] - b2*y[n-2]
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BiquadCoefficients {
    pub a0: f32,
    pub a1: f32,
    pub a2: f32,
    pub b1: f32,
    pub b2: f32,
}

impl Default for BiquadCoefficients {
    fn default() -> Self {
        Self::PASSTHROUGH
    }
}

impl BiquadCoefficients {
    /// Coefficients which pass the input through unchanged.
    pub const PASSTHROUGH: Self = Self::new(1.0, 0.0, 0.0, 0.0, 0.0);

    /// Create coefficients from raw, already normalized values.
    pub const fn new(a0: f32, a1: f32, a2: f32, b1: f32, b2: f32) -> Self {
        Self { a0, a1, a2, b1, b2 }
    }

    /// Design coefficients with the RBJ audio EQ cookbook formulas.
    ///
    /// * `cutoff`: cutoff or center frequency in Hz. Must be below nyquist.
    /// * `q`: resonance. Must be > 0. 0.707 means no resonant peaking.
    /// * `gain`: gain in dB. Only used by Peak, Lowshelf and Highshelf filters.
    pub fn design(
        filter_type: BiquadFilterType,
        sample_rate: u32,
        cutoff: f32,
        q: f32,
        gain: f32,
    ) -> Result<Self, Error> {
        if sample_rate == 0 {
            return Err(Error::ParameterError(format!(
                "Invalid filter sample-rate: must be > 0, but is {sample_rate}"
            )));
        }
        if q.is_nan() || q <= 0.0 {
            return Err(Error::ParameterError(format!(
                "Invalid filter Q: must be > 0, but is {q}"
            )));
        }
        let nyquist = sample_rate as f32 / 2.0;
        if cutoff.is_nan() || cutoff <= 0.0 || cutoff >= nyquist {
            return Err(Error::ParameterError(format!(
                "Invalid filter frequency: must be in range (0, {nyquist}), but is {cutoff}"
            )));
        }

        let omega = 2.0 * f64::consts::PI * cutoff as f64 / sample_rate as f64;
        let (sin_omega, cos_omega) = omega.sin_cos();
        let alpha = sin_omega / (2.0 * q as f64);
        let a = f64::powf(10.0, gain as f64 / 40.0);

        // (b0, b1, b2, a0, a1, a2) in cookbook naming
        let (b0, b1, b2, a0, a1, a2) = match filter_type {
            BiquadFilterType::Lowpass => (
                (1.0 - cos_omega) / 2.0,
                1.0 - cos_omega,
                (1.0 - cos_omega) / 2.0,
                1.0 + alpha,
                -2.0 * cos_omega,
                1.0 - alpha,
            ),
            BiquadFilterType::Highpass => (
                (1.0 + cos_omega) / 2.0,
                -(1.0 + cos_omega),
                (1.0 + cos_omega) / 2.0,
                1.0 + alpha,
                -2.0 * cos_omega,
                1.0 - alpha,
            ),
            BiquadFilterType::Bandpass => (
                alpha,
                0.0,
                -alpha,
                1.0 + alpha,
                -2.0 * cos_omega,
                1.0 - alpha,
            ),
            BiquadFilterType::Notch => (
                1.0,
                -2.0 * cos_omega,
                1.0,
                1.0 + alpha,
                -2.0 * cos_omega,
                1.0 - alpha,
            ),
            BiquadFilterType::Peak => (
                1.0 + alpha * a,
                -2.0 * cos_omega,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_omega,
                1.0 - alpha / a,
            ),
            BiquadFilterType::Allpass => (
                1.0 - alpha,
                -2.0 * cos_omega,
                1.0 + alpha,
                1.0 + alpha,
                -2.0 * cos_omega,
                1.0 - alpha,
            ),
            BiquadFilterType::Lowshelf => {
                let sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_omega + sqrt_a_alpha),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega),
                    a * ((a + 1.0) - (a - 1.0) * cos_omega - sqrt_a_alpha),
                    (a + 1.0) + (a - 1.0) * cos_omega + sqrt_a_alpha,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_omega),
                    (a + 1.0) + (a - 1.0) * cos_omega - sqrt_a_alpha,
                )
            }
            BiquadFilterType::Highshelf => {
                let sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_omega + sqrt_a_alpha),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega),
                    a * ((a + 1.0) + (a - 1.0) * cos_omega - sqrt_a_alpha),
                    (a + 1.0) - (a - 1.0) * cos_omega + sqrt_a_alpha,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_omega),
                    (a + 1.0) - (a - 1.0) * cos_omega - sqrt_a_alpha,
                )
            }
        };

        let a0_inv = 1.0 / a0;
        Ok(Self {
            a0: (b0 * a0_inv) as f32,
            a1: (b1 * a0_inv) as f32,
            a2: (b2 * a0_inv) as f32,
            b1: (a1 * a0_inv) as f32,
            b2: (a2 * a0_inv) as f32,
        })
    }

    /// Returns true when all coefficients are finite numbers.
    pub fn is_finite(&self) -> bool {
        [self.a0, self.a1, self.a2, self.b1, self.b2]
            .iter()
            .all(|c| c.is_finite())
    }
}

// -------------------------------------------------------------------------------------------------

/// Direct form I biquad filter state.
///
/// The state is meant to live for a single grain window only: see
/// [`apply_biquad`](super::apply_biquad).
#[derive(Debug, Default, Clone)]
pub struct BiquadFilter {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process helper function that calls `process_sample` for each sample in a buffer.
    #[inline]
    pub fn process(&mut self, coefficients: &BiquadCoefficients, buffer: &mut [f32]) {
        for sample in buffer {
            *sample = self.process_sample(coefficients, *sample);
        }
    }

    /// Apply the filter on a single sample.
    #[inline]
    pub fn process_sample(&mut self, coefficients: &BiquadCoefficients, input: f32) -> f32 {
        let output = coefficients.a0 * input + coefficients.a1 * self.x1 + coefficients.a2 * self.x2
            - coefficients.b1 * self.y1
            - coefficients.b2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }
}
