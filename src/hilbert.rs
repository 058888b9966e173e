// Hilbert transform operators - analytic signal construction
//
// Given a real sequence of length S, both operators produce a complex
// sequence of length S whose real part equals the input and whose imaginary
// part approximates its Hilbert transform. The FFT variant does the exact
// one-sided spectrum trick; the FIR variant convolves with a windowed
// odd-tap sinc kernel and is cheaper for long inputs.

use rustfft::{num_complex::Complex, FftPlanner};
use std::str::FromStr;
use std::sync::Mutex;

use crate::error::BankError;

/// Default FIR filter length (must be odd)
pub const DEFAULT_FIR_LENGTH: usize = 19;

/// Selects which analytic-signal operator a `FrequencyShifter` uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HilbertMode {
    /// Windowed FIR approximation (default)
    Fir,
    /// Exact FFT-based transform
    Fft,
}

impl HilbertMode {
    /// Build the operator for this mode
    pub fn create(self) -> Result<Box<dyn HilbertTransform>, BankError> {
        match self {
            HilbertMode::Fir => Ok(Box::new(HilbertFir::new(DEFAULT_FIR_LENGTH)?)),
            HilbertMode::Fft => Ok(Box::new(HilbertFft::new())),
        }
    }
}

impl FromStr for HilbertMode {
    type Err = BankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fir" => Ok(HilbertMode::Fir),
            "fft" => Ok(HilbertMode::Fft),
            _ => Err(BankError::invalid(
                "FrequencyShifter mode should be FIR or FFT",
            )),
        }
    }
}

/// Common contract of the two analytic-signal operators
///
/// Implementations never modify the input and always produce an output of
/// the same length as the input.
pub trait HilbertTransform: Send {
    /// Compute the analytic signal of `input`
    fn analytic(&self, input: &[f32]) -> Result<Vec<Complex<f32>>, BankError>;
}

/// FFT-based Hilbert transform
///
/// Forward FFT, scale DC by 1/S and positive frequencies by 2/S, zero the
/// negative frequencies, inverse FFT. The inverse transform is
/// unnormalised, which the explicit bin scaling accounts for.
pub struct HilbertFft {
    planner: Mutex<FftPlanner<f32>>,
}

impl HilbertFft {
    pub fn new() -> Self {
        Self {
            planner: Mutex::new(FftPlanner::new()),
        }
    }
}

impl Default for HilbertFft {
    fn default() -> Self {
        Self::new()
    }
}

impl HilbertTransform for HilbertFft {
    fn analytic(&self, input: &[f32]) -> Result<Vec<Complex<f32>>, BankError> {
        let size = input.len();
        if size == 0 {
            return Err(BankError::invalid("Hilbert input must not be empty"));
        }

        let mut buffer: Vec<Complex<f32>> =
            input.iter().map(|&x| Complex::new(x, 0.0)).collect();

        let (fft, ifft) = {
            let mut planner = self.planner.lock().unwrap();
            (
                planner.plan_fft_forward(size),
                planner.plan_fft_inverse(size),
            )
        };

        fft.process(&mut buffer);

        let scale = 1.0 / size as f32;
        buffer[0] *= scale;
        for bin in buffer.iter_mut().take(size / 2 + 1).skip(1) {
            *bin *= 2.0 * scale;
        }
        for bin in buffer.iter_mut().skip(size / 2 + 1) {
            *bin = Complex::new(0.0, 0.0);
        }

        ifft.process(&mut buffer);
        Ok(buffer)
    }
}

/// FIR-based Hilbert transform
///
/// The ideal Hilbert impulse response is 2/(m pi) at odd offsets m and zero
/// elsewhere, so only the odd taps are stored. Tap n of the compact kernel
/// sits at offset m = 2n - N + 1 and carries a Blackman window; the kernel
/// is anti-symmetric by construction.
pub struct HilbertFir {
    fir_length: usize,
    kernel: Vec<f32>,
}

impl HilbertFir {
    /// Construct the operator for a FIR filter of length `fir_length`
    ///
    /// Fails with an invalid-argument error if the length is even.
    pub fn new(fir_length: usize) -> Result<Self, BankError> {
        if fir_length % 2 == 0 {
            return Err(BankError::invalid("Hilbert FIR length must be odd"));
        }
        let kernel_size = 2 * ((fir_length + 1) / 4);
        let kernel = Self::make_kernel(kernel_size);
        Ok(Self { fir_length, kernel })
    }

    /// Length of the FIR filter this kernel was built for
    pub fn fir_length(&self) -> usize {
        self.fir_length
    }

    /// Build the compact kernel of the `size` non-zero taps
    fn make_kernel(size: usize) -> Vec<f32> {
        (0..size)
            .map(|n| {
                let m = (2 * n as i64 - size as i64 + 1) as f32;
                let k = -((m * std::f32::consts::PI).cos() - 1.0) / (m * std::f32::consts::PI);
                k * Self::blackman(n, size)
            })
            .collect()
    }

    /// Blackman window value at position `n` of an `size`-point window
    fn blackman(n: usize, size: usize) -> f32 {
        const A0: f32 = 0.42;
        const A1: f32 = 0.5;
        const A2: f32 = 0.08;

        let alpha = std::f32::consts::PI * n as f32 / (size - 1) as f32;
        A0 - A1 * (2.0 * alpha).cos() + A2 * (4.0 * alpha).cos()
    }
}

impl HilbertTransform for HilbertFir {
    fn analytic(&self, input: &[f32]) -> Result<Vec<Complex<f32>>, BankError> {
        let size = input.len();
        if size == 0 {
            return Err(BankError::invalid("Hilbert input must not be empty"));
        }

        let taps = self.kernel.len();
        let mut output = Vec::with_capacity(size);
        for i in 0..size {
            let mut h = 0.0f32;
            for (n, &tap) in self.kernel.iter().enumerate() {
                // offset of this tap from the output sample
                let m = 2 * n as i64 - taps as i64 + 1;
                let j = i as i64 - m;
                if (0..size as i64).contains(&j) {
                    h += tap * input[j as usize];
                }
            }
            output.push(Complex::new(input[i], h));
        }

        debug_assert_eq!(output.len(), size);
        Ok(output)
    }
}
