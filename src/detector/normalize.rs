// Detector normalisation - frequency search and amplitude calibration
//
// Both routines profile the detector against synthetic tones by building
// small nested banks. The nested banks always request
// freq_unnormalized | amp_unnormalized, which is what stops the recursion.

use rustfft::num_complex::Complex;

use super::{generate_tone, Detector};
use crate::bank::DetectorBank;
use crate::error::BankError;
use crate::features::{Features, Solver};

/// Maximum number of search-normalisation iterations
const MAX_NORM_ITERATIONS: usize = 100;

/// Ratio of the search bounds considered converged.
/// 2^(1/240), i.e. five cents.
const NORM_CONVERGED: f64 = 1.002_892_287_869_367_1;

/// Number of oscillations over which orbit eccentricity is measured
const ECCENTRICITY_OSCILLATIONS: usize = 5;

impl Detector {
    fn method_features(&self) -> Features {
        let method = match self.solver() {
            Solver::CentralDifference => Features::CENTRAL_DIFFERENCE,
            Solver::RungeKutta => Features::RUNGE_KUTTA,
        };
        method | Features::FREQ_UNNORMALIZED | Features::AMP_UNNORMALIZED
    }

    /// Re-tune w so the peak response lies at the nominal frequency
    ///
    /// A three-detector probe at `{search_start*f, search_end*f, f}` first
    /// checks that the bounds span the response maximum; if they do not,
    /// `Ok(false)` is returned and w keeps its last value. Otherwise the
    /// worse-performing bound repeatedly moves halfway towards the midpoint
    /// of the bracket until the bounds converge within five cents or the
    /// iteration budget runs out. The nominal frequency stays inside the
    /// bracket throughout.
    ///
    /// # Arguments
    /// * `search_start` - Lower bound as a ratio of the nominal frequency
    /// * `search_end` - Upper bound as a ratio of the nominal frequency
    /// * `tone_duration` - Probe tone length in seconds
    /// * `forcing_amplitude` - Gain applied to the probe tone
    pub fn search_normalize(
        &mut self,
        search_start: f64,
        search_end: f64,
        tone_duration: f64,
        forcing_amplitude: f64,
    ) -> Result<bool, BankError> {
        self.set_normalized(true);

        let sr = self.sample_rate;
        let f_spec = self.frequency();
        let mut f = f_spec;
        let features = self.method_features();

        let samples = (tone_duration * sr) as usize;
        let tone = generate_tone(sr, samples, f);

        let mut test_freqs = [search_start * f, search_end * f, f];
        let test_bw = [self.bandwidth; 3];

        // Peak magnitudes are measured over the sustained portion of the
        // tone, avoiding both the attack transient and the final samples.
        let test_from = 3 * samples / 4;
        let test_to = 9 * samples / 10;

        let mut results = vec![Complex::new(0.0, 0.0); 3 * samples];

        let mut bank = DetectorBank::new(
            sr,
            &tone,
            3,
            &test_freqs,
            Some(&test_bw),
            features,
            self.damping,
            forcing_amplitude,
        )?;
        bank.get_z(&mut results, 3, samples, 0);

        let mut amplitudes = [0.0f64; 3];
        for i in test_from..test_to {
            for (j, amplitude) in amplitudes.iter_mut().enumerate() {
                *amplitude = amplitude.max(results[j * samples + i].norm());
            }
        }

        if amplitudes[0] > amplitudes[2] || amplitudes[1] > amplitudes[2] {
            return Ok(false);
        }

        let mut iteration = 0;
        while iteration < MAX_NORM_ITERATIONS && test_freqs[1] / test_freqs[0] > NORM_CONVERGED {
            iteration += 1;

            let midpoint = 0.5 * (test_freqs[0] + test_freqs[1]);
            if amplitudes[0] < amplitudes[1] {
                test_freqs[0] = 0.5 * (test_freqs[0] + midpoint);
            } else {
                test_freqs[1] = 0.5 * (test_freqs[1] + midpoint);
            }

            let mut bank = DetectorBank::new(
                sr,
                &tone,
                2,
                &test_freqs[..2],
                Some(&test_bw[..2]),
                features,
                self.damping,
                forcing_amplitude,
            )?;
            bank.get_z(&mut results, 2, samples, 0);

            amplitudes[0] = 0.0;
            amplitudes[1] = 0.0;
            for i in test_from..test_to {
                for (j, amplitude) in amplitudes.iter_mut().take(2).enumerate() {
                    *amplitude = amplitude.max(results[j * samples + i].norm());
                }
            }

            f = 0.5 * (test_freqs[0] + test_freqs[1]);
            self.w = 2.0 * std::f64::consts::PI * f;
        }

        log::debug!(
            "search normalisation: f_spec {:.3} Hz settled at {:.3} Hz after {} iterations",
            f_spec,
            f,
            iteration
        );
        Ok(true)
    }

    /// Profile an ideal response and set the amplitude scales
    ///
    /// Runs a one-detector bank over a 60 second tone at the (possibly
    /// search-adjusted) characteristic frequency. The complex normalisation
    /// factor is the reciprocal of the peak response; the eccentricity
    /// correction compares real- and imaginary-axis extremes over the final
    /// five oscillations.
    pub fn amplitude_normalize(&mut self, forcing_amplitude: f64) -> Result<(), BankError> {
        const TONE_SECONDS: usize = 60;

        let sr = self.sample_rate;
        let f = self.frequency();
        let samples = TONE_SECONDS * sr as usize;
        let tone = generate_tone(sr, samples, f);

        let freqs = [f];
        let test_bw = [self.bandwidth];

        let mut bank = DetectorBank::new(
            sr,
            &tone,
            1,
            &freqs,
            Some(&test_bw),
            self.method_features(),
            self.damping,
            forcing_amplitude,
        )?;

        let mut results = vec![Complex::new(0.0, 0.0); samples];
        bank.get_z(&mut results, 1, samples, 0);

        let mut z_max = 0.0;
        let mut peak = 0;
        for (i, z) in results.iter().enumerate() {
            if z.norm() > z_max {
                z_max = z.norm();
                peak = i;
            }
        }

        self.a_scale = Complex::new(1.0, 0.0) / results[peak];

        // Orbit eccentricity over the last few cycles of the settled response
        let samples_per_window = (sr * ECCENTRICITY_OSCILLATIONS as f64 / f) as usize;
        let mut max_im = 0.0f64;
        let mut max_re = 0.0f64;
        for z in &results[samples.saturating_sub(samples_per_window)..] {
            let scaled = *z * self.a_scale;
            if scaled.im.abs() > max_im.abs() {
                max_im = scaled.im;
            }
            if scaled.re.abs() > max_re.abs() {
                max_re = scaled.re;
            }
        }
        self.i_scale = max_re / max_im;

        log::debug!(
            "amplitude normalisation at {:.3} Hz: a = {:.6}+j{:.6}, i_scale = {:.6}",
            f,
            self.a_scale.re,
            self.a_scale.im,
            self.i_scale
        );
        Ok(())
    }
}
