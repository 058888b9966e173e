// Detector - a single forced Hopf-bifurcation oscillator
//
// Each detector integrates dz/dt = (mu + jw)z + b|z|^2 z + x(t) one audio
// sample at a time, where x(t) is the (possibly amplified) input signal.
// Near its characteristic frequency w the steady-state |z| grows sharply,
// which is what the bank's magnitude stream measures.
//
// Two integrators share the state layout and the post-processing: the
// central-difference scheme (minimum-bandwidth detectors only) and a
// fourth-order Runge-Kutta scheme. They are a tagged variant rather than a
// trait hierarchy; `process_audio` branches once per block.

mod normalize;
mod scale;

use rustfft::num_complex::Complex;

use crate::error::BankError;
use crate::features::Solver;

/// One resonant oscillator tuned to a characteristic frequency
#[derive(Debug, Clone)]
pub struct Detector {
    /// Characteristic angular frequency; search normalisation may adjust it
    w: f64,
    /// Control parameter (distance from the bifurcation point)
    mu: f64,
    damping: f64,
    sample_rate: f64,
    bandwidth: f64,
    /// Forcing amplitude the input was scaled by
    gain: f64,
    /// First Lyapunov coefficient
    b: f64,
    /// Complex amplitude normalisation factor
    a_scale: Complex<f64>,
    /// Eccentricity correction for the imaginary axis
    i_scale: f64,
    /// Static calibration scale
    scale: Complex<f64>,
    /// Whether search normalisation has been applied
    normalized: bool,
    state: Integrator,
}

/// Integrator state. Both schemes keep the last two outputs; the RK4
/// scheme additionally needs the input from two samples ago.
#[derive(Debug, Clone)]
enum Integrator {
    CentralDifference {
        z_prev: Complex<f64>,
        z_prev2: Complex<f64>,
        x_prev: f32,
    },
    RungeKutta {
        z_prev: Complex<f64>,
        z_prev2: Complex<f64>,
        x_prev: f32,
        x_prev2: f32,
    },
}

impl Detector {
    /// Construct a detector
    ///
    /// # Arguments
    /// * `solver` - Numerical method
    /// * `freq` - Characteristic frequency (Hz)
    /// * `mu` - Control parameter (0 positions the system at the bifurcation)
    /// * `damping` - Damping factor
    /// * `sample_rate` - Input sample rate
    /// * `bandwidth` - Detector bandwidth (Hz); 0 selects minimum bandwidth
    /// * `gain` - Forcing amplitude applied to the input
    pub fn new(
        solver: Solver,
        freq: f64,
        mu: f64,
        damping: f64,
        sample_rate: f64,
        bandwidth: f64,
        gain: f64,
    ) -> Result<Self, BankError> {
        let (b, state) = match solver {
            Solver::CentralDifference => (
                // The bank guard forces bandwidth = 0 for this solver
                0.0,
                Integrator::CentralDifference {
                    z_prev: Complex::new(0.0, 0.0),
                    z_prev2: Complex::new(0.0, 0.0),
                    x_prev: 0.0,
                },
            ),
            Solver::RungeKutta => (
                lyapunov(bandwidth, gain)?,
                Integrator::RungeKutta {
                    z_prev: Complex::new(0.0, 0.0),
                    z_prev2: Complex::new(0.0, 0.0),
                    x_prev: 0.0,
                    x_prev2: 0.0,
                },
            ),
        };

        Ok(Self {
            w: freq * 2.0 * std::f64::consts::PI,
            mu,
            damping,
            sample_rate,
            bandwidth,
            gain,
            b,
            a_scale: Complex::new(1.0, 0.0),
            i_scale: 1.0,
            scale: Complex::new(1.0, 0.0),
            normalized: false,
            state,
        })
    }

    /// The solver this detector integrates with
    pub fn solver(&self) -> Solver {
        match self.state {
            Integrator::CentralDifference { .. } => Solver::CentralDifference,
            Integrator::RungeKutta { .. } => Solver::RungeKutta,
        }
    }

    /// Characteristic angular frequency (rad/s), post-normalisation
    pub fn w(&self) -> f64 {
        self.w
    }

    /// Characteristic frequency (Hz), post-normalisation
    pub fn frequency(&self) -> f64 {
        self.w / (2.0 * std::f64::consts::PI)
    }

    /// Complex amplitude normalisation factor
    pub fn a_scale(&self) -> Complex<f64> {
        self.a_scale
    }

    /// Imaginary-axis eccentricity correction
    pub fn i_scale(&self) -> f64 {
        self.i_scale
    }

    /// Reset the integrator state to zero
    ///
    /// Invoked when the owning bank seeks back to the start of its input.
    pub fn reset(&mut self) {
        match &mut self.state {
            Integrator::CentralDifference {
                z_prev,
                z_prev2,
                x_prev,
            } => {
                *z_prev = Complex::new(0.0, 0.0);
                *z_prev2 = Complex::new(0.0, 0.0);
                *x_prev = 0.0;
            }
            Integrator::RungeKutta {
                z_prev,
                z_prev2,
                x_prev,
                x_prev2,
            } => {
                *z_prev = Complex::new(0.0, 0.0);
                *z_prev2 = Complex::new(0.0, 0.0);
                *x_prev = 0.0;
                *x_prev2 = 0.0;
            }
        }
    }

    /// Restore archived tuning when a detector is rebuilt from a profile
    pub(crate) fn restore(&mut self, w_adjusted: f64, a_scale: Complex<f64>, i_scale: f64) {
        self.w = w_adjusted;
        self.a_scale = a_scale;
        self.i_scale = i_scale;
    }

    pub(crate) fn set_normalized(&mut self, normalized: bool) {
        self.normalized = normalized;
    }

    /// Process one block of forcing samples into complex responses
    ///
    /// Writes `target.len()` responses; `input` must supply at least that
    /// many samples starting at the current stream position. The raw
    /// integrator output is multiplied by the combined static and
    /// amplitude scales, then the imaginary part is corrected for orbit
    /// eccentricity.
    pub fn process_audio(&mut self, target: &mut [Complex<f64>], input: &[f32]) {
        debug_assert!(input.len() >= target.len());

        self.process(target, input);

        let total_scale = self.scale * self.a_scale;
        for z in target.iter_mut() {
            *z *= total_scale;
            *z = Complex::new(z.re, z.im * self.i_scale);
        }
    }

    /// Run the integrator over the block, without post-scaling
    fn process(&mut self, target: &mut [Complex<f64>], input: &[f32]) {
        let mu = self.mu;
        let w = self.w;
        let b = self.b;
        let sr = self.sample_rate;
        let keep = 1.0 - self.damping;
        let jw = Complex::new(mu, w);

        match &mut self.state {
            Integrator::CentralDifference {
                z_prev,
                z_prev2,
                x_prev,
            } => {
                for (out, &x) in target.iter_mut().zip(input.iter()) {
                    let result = ((jw * *z_prev
                        + b * z_prev.norm_sqr() * *z_prev
                        + Complex::new(*x_prev as f64, 0.0))
                        * (2.0 / sr)
                        + *z_prev2)
                        * keep;

                    *z_prev2 = *z_prev;
                    *z_prev = result;
                    *out = result;
                    *x_prev = x;
                }
            }
            Integrator::RungeKutta {
                z_prev,
                z_prev2,
                x_prev,
                x_prev2,
            } => {
                let dzdt = |z: Complex<f64>, x: f64| jw * z + b * z.norm_sqr() * z + x;

                for (out, &x) in target.iter_mut().zip(input.iter()) {
                    let u0 = *z_prev2;
                    let k0 = dzdt(u0, *x_prev2 as f64);

                    let u1 = u0 + k0 / sr;
                    let k1 = dzdt(u1, *x_prev as f64);

                    let u2 = u0 + k1 / sr;
                    let k2 = dzdt(u2, *x_prev as f64);

                    let u3 = u0 + k2 * (2.0 / sr);
                    let k3 = dzdt(u3, x as f64);

                    *z_prev2 = *z_prev;
                    let z = (u0 + (k0 + 2.0 * k1 + 2.0 * k2 + k3) / (3.0 * sr)) * keep;
                    *z_prev = z;
                    *out = z;

                    *x_prev2 = *x_prev;
                    *x_prev = x;
                }
            }
        }
    }

    /// Look up and store the static calibration scale for the current
    /// frequency. Applied after any normalisation has settled the final w.
    pub(crate) fn scale_amplitude(&mut self) {
        let factor = scale::scale_factor(
            self.solver(),
            self.normalized,
            self.sample_rate,
            self.frequency(),
        );
        self.scale = Complex::new(1.0, 0.0) / factor;
    }
}

/// First Lyapunov coefficient for a bandwidth and forcing amplitude
///
/// Scales empirical values found at amplitude 25. Zero bandwidth yields
/// b = 0, the narrowest (~1.5 Hz) detector. Negative bandwidths are
/// rejected.
pub fn lyapunov(bandwidth: f64, amplitude: f64) -> Result<f64, BankError> {
    if bandwidth > 0.0 {
        Ok(-12.5 * bandwidth.powi(3) / amplitude.powi(2))
    } else if bandwidth < 0.0 {
        Err(BankError::invalid(
            "Desired bandwidth should be non-negative.",
        ))
    } else {
        Ok(0.0)
    }
}

/// Generate a unit-amplitude sine tone of `duration` samples at `frequency`
pub fn generate_tone(sample_rate: f64, duration: usize, frequency: f64) -> Vec<f32> {
    let w_per_sample = 2.0 * std::f64::consts::PI * frequency / sample_rate;
    let mut theta: f64 = 0.0;

    (0..duration)
        .map(|_| {
            let sample = theta.sin() as f32;
            theta = (theta + w_per_sample) % (2.0 * std::f64::consts::PI);
            sample
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_detector(det: &mut Detector, input: &[f32]) -> Vec<Complex<f64>> {
        let mut out = vec![Complex::new(0.0, 0.0); input.len()];
        det.process_audio(&mut out, input);
        out
    }

    fn sustained_magnitude(responses: &[Complex<f64>]) -> f64 {
        let tail = &responses[responses.len() * 9 / 10..];
        tail.iter().map(|z| z.norm()).fold(0.0, f64::max)
    }

    #[test]
    fn test_lyapunov_coefficient() {
        assert_eq!(lyapunov(0.0, 25.0).unwrap(), 0.0);
        let b = lyapunov(2.0, 25.0).unwrap();
        assert!((b - (-12.5 * 8.0 / 625.0)).abs() < 1e-12);
        assert!(lyapunov(-1.0, 25.0).is_err());
    }

    #[test]
    fn test_generate_tone_shape() {
        let sr = 44100.0;
        let tone = generate_tone(sr, 44100, 441.0);
        assert_eq!(tone.len(), 44100);
        assert_eq!(tone[0], 0.0);
        let peak = tone.iter().fold(0.0f32, |m, &x| m.max(x.abs()));
        assert!((peak - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_rk4_resonates_at_characteristic_frequency() {
        let sr = 44100.0;
        let gain = 25.0;
        let mut det = Detector::new(Solver::RungeKutta, 440.0, 0.0, 1e-4, sr, 0.0, gain).unwrap();

        let on_tone: Vec<f32> = generate_tone(sr, 44100, 440.0)
            .iter()
            .map(|x| x * gain as f32)
            .collect();
        let on_mag = sustained_magnitude(&run_detector(&mut det, &on_tone));

        det.reset();
        let off_tone: Vec<f32> = generate_tone(sr, 44100, 100.0)
            .iter()
            .map(|x| x * gain as f32)
            .collect();
        let off_mag = sustained_magnitude(&run_detector(&mut det, &off_tone));

        assert!(
            on_mag > 10.0 * off_mag,
            "440 Hz response ({}) should dwarf the 100 Hz response ({})",
            on_mag,
            off_mag
        );
    }

    #[test]
    fn test_cd_resonates_at_characteristic_frequency() {
        let sr = 44100.0;
        let gain = 25.0;
        let mut det =
            Detector::new(Solver::CentralDifference, 220.0, 0.0, 1e-4, sr, 0.0, gain).unwrap();

        let on_tone: Vec<f32> = generate_tone(sr, 44100, 220.0)
            .iter()
            .map(|x| x * gain as f32)
            .collect();
        let on_mag = sustained_magnitude(&run_detector(&mut det, &on_tone));

        det.reset();
        let off_tone: Vec<f32> = generate_tone(sr, 44100, 600.0)
            .iter()
            .map(|x| x * gain as f32)
            .collect();
        let off_mag = sustained_magnitude(&run_detector(&mut det, &off_tone));

        assert!(
            on_mag > 5.0 * off_mag,
            "on-frequency response ({}) should exceed off-frequency ({})",
            on_mag,
            off_mag
        );
    }

    #[test]
    fn test_reset_restores_initial_output() {
        let sr = 48000.0;
        let mut det = Detector::new(Solver::RungeKutta, 440.0, 0.0, 1e-4, sr, 0.0, 1.0).unwrap();
        let tone = generate_tone(sr, 4800, 440.0);

        let first = run_detector(&mut det, &tone);
        det.reset();
        let second = run_detector(&mut det, &tone);

        assert_eq!(first, second, "reset must reproduce identical output");
    }

    #[test]
    fn test_process_audio_applies_eccentricity_correction() {
        let sr = 44100.0;
        let mut det = Detector::new(Solver::RungeKutta, 440.0, 0.0, 1e-4, sr, 0.0, 1.0).unwrap();
        det.i_scale = 0.0;

        let tone = generate_tone(sr, 4410, 440.0);
        let out = run_detector(&mut det, &tone);
        for z in &out {
            assert_eq!(z.im, 0.0, "i_scale must multiply the imaginary part");
        }
    }

    #[test]
    fn test_negative_bandwidth_rejected() {
        assert!(Detector::new(Solver::RungeKutta, 440.0, 0.0, 1e-4, 44100.0, -2.0, 25.0).is_err());
    }
}
