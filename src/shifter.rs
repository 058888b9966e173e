// FrequencyShifter - heterodyne a real signal by a signed frequency offset
//
// The analytic signal is produced once at construction, so a single shifter
// can serve several shift amounts over the same input. Shifting multiplies
// the analytic signal by a complex exponential and keeps the real part:
// re(A[i] * exp(j 2 pi f i / sr)).

use rustfft::num_complex::Complex;

use crate::error::BankError;
use crate::hilbert::HilbertMode;

/// Shifts the spectrum of a fixed input signal by arbitrary offsets
pub struct FrequencyShifter {
    analytic: Vec<Complex<f32>>,
    sample_rate: f64,
}

impl FrequencyShifter {
    /// Build a shifter over `input`, computing its analytic signal with the
    /// operator selected by `mode`
    pub fn new(input: &[f32], sample_rate: f64, mode: HilbertMode) -> Result<Self, BankError> {
        let transformer = mode.create()?;
        let analytic = transformer.analytic(input)?;
        Ok(Self {
            analytic,
            sample_rate,
        })
    }

    /// Write the input shifted by `f_shift` Hz into `shifted`
    ///
    /// A negative offset translates the spectrum downwards. At most
    /// `shifted.len()` samples are produced, clipped to the input length;
    /// the number written is returned.
    pub fn shift(&self, f_shift: f64, shifted: &mut [f32]) -> usize {
        let count = shifted.len().min(self.analytic.len());

        // Running phasor avoids a sin/cos call per sample. f64 keeps the
        // recurrence from drifting over multi-second buffers.
        let mut c = Complex::new(1.0f64, 0.0);
        let phase_inc = Complex::from_polar(
            1.0,
            f_shift * 2.0 * std::f64::consts::PI / self.sample_rate,
        );

        for (out, a) in shifted.iter_mut().take(count).zip(self.analytic.iter()) {
            *out = (a.re as f64 * c.re - a.im as f64 * c.im) as f32;
            c *= phase_inc;
        }
        count
    }

    /// Length of the underlying analytic signal
    pub fn len(&self) -> usize {
        self.analytic.len()
    }

    /// Whether the underlying signal is empty
    pub fn is_empty(&self) -> bool {
        self.analytic.is_empty()
    }
}
