// DetectorBank - a bank of note-onset detectors analysing one input stream
//
// The bank owns one detector per requested frequency plus the machinery
// that feeds them: an amplified copy of the input when a gain is applied,
// and a pool of heterodyned input copies for detectors whose requested
// frequency is too high for the solver to integrate stably. getZ fans the
// per-channel integration across a WorkerPool; each channel owns its
// detector and writes a disjoint stride of the caller's output buffer.

mod profile;

pub use profile::{BankProfile, DetectorProfile};

use rustfft::num_complex::Complex;
use std::collections::HashMap;

use log::{debug, warn};

use crate::detector::Detector;
use crate::error::BankError;
use crate::features::{AmpNorm, Features, FreqNorm, Solver};
use crate::hilbert::HilbertMode;
use crate::pool::WorkerPool;
use crate::shifter::FrequencyShifter;

/// Recommended damping for all detectors
pub const DEFAULT_DAMPING: f64 = 1e-4;
/// Recommended input gain, keeping internal values in a sensible range
pub const DEFAULT_GAIN: f64 = 25.0;

/// Damping bounds accepted at construction
const MIN_DAMPING: f64 = 1e-4;
const MAX_DAMPING: f64 = 5e-4;

/// Heterodyned detectors run this far above DC rather than at it
const HETERODYNE_MARGIN_HZ: f64 = 50.0;

/// Search-normalisation probe parameters
const SEARCH_LOWER: f64 = 0.92;
const SEARCH_UPPER: f64 = 1.08;
const SEARCH_TONE_SECONDS: f64 = 3.0;

/// Where a channel reads its forcing signal from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalSource {
    /// The (possibly amplified) working input
    Input,
    /// A heterodyned copy of the input, keyed by band index
    Heterodyne(usize),
}

/// Metaparameters for one channel of the bank
#[derive(Debug, Clone)]
struct ChannelComponents {
    /// The caller's requested frequency
    f_in: f64,
    /// The frequency the detector actually runs at
    f_actual: f64,
    source: SignalSource,
    bandwidth: f64,
}

/// The working input: borrowed when no gain is applied, otherwise an
/// owned amplified copy.
enum WorkingInput<'a> {
    Borrowed(&'a [f32]),
    Amplified(Vec<f32>),
}

impl WorkingInput<'_> {
    fn as_slice(&self) -> &[f32] {
        match self {
            WorkingInput::Borrowed(s) => s,
            WorkingInput::Amplified(v) => v,
        }
    }
}

/// Job payload for one getZ partition: a chunk of consecutive channels
struct GetZJob<'j> {
    detectors: &'j mut [Detector],
    /// Output region covering this job's channels
    outputs: &'j mut [Complex<f64>],
    /// Forcing signal per channel, starting at the read cursor
    signals: Vec<&'j [f32]>,
    /// Output stride between consecutive channels
    stride: usize,
    /// Frames to produce per channel
    count: usize,
}

/// Job payload for one absZ partition
struct AbsZJob<'j> {
    output: &'j mut [f64],
    input: &'j [Complex<f64>],
    max: f64,
}

/// Bank of resonant detectors with multithreaded evaluation
pub struct DetectorBank<'a> {
    sample_rate: f64,
    damping: f64,
    gain: f64,
    features: Features,
    input: WorkingInput<'a>,
    /// Next input sample to be read by getZ
    cursor: usize,
    detectors: Vec<Detector>,
    components: Vec<ChannelComponents>,
    /// Heterodyned input copies, band index -> owned buffer.
    /// Cleared whenever the input is replaced.
    heterodyne_pool: HashMap<usize, Vec<f32>>,
    pool: WorkerPool,
    /// Frequency above which the input is heterodyned for a detector
    mod_f: f64,
}

impl<'a> DetectorBank<'a> {
    /// Construct a DetectorBank
    ///
    /// # Arguments
    /// * `sample_rate` - Must be 44100 or 48000
    /// * `input` - Caller-owned mono audio samples
    /// * `num_threads` - Worker threads; 0 selects the hardware parallelism
    /// * `freqs` - One characteristic frequency per detector (Hz)
    /// * `bandwidths` - Per-detector bandwidths; `None` selects minimum
    ///   bandwidth for every detector
    /// * `features` - Solver and normalisation selection
    /// * `damping` - Damping for all detectors, within [1e-4, 5e-4]
    /// * `gain` - Gain applied to the input before analysis
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sample_rate: f64,
        input: &'a [f32],
        num_threads: usize,
        freqs: &[f64],
        bandwidths: Option<&[f64]>,
        features: Features,
        damping: f64,
        gain: f64,
    ) -> Result<Self, BankError> {
        let bandwidths = match bandwidths {
            Some(bw) => {
                if bw.len() != freqs.len() {
                    return Err(BankError::invalid(
                        "Bandwidth list must match the frequency list in length",
                    ));
                }
                bw.to_vec()
            }
            None => vec![0.0; freqs.len()],
        };

        let bank = Self::construct(
            sample_rate,
            input,
            num_threads,
            freqs,
            &bandwidths,
            features,
            damping,
            gain,
            true,
        )?;
        debug_assert_eq!(bank.detectors.len(), bank.components.len());
        Ok(bank)
    }

    /// Shared constructor; `normalize` selects whether the requested
    /// normalisations actually run (profile loading restores archived
    /// values instead).
    #[allow(clippy::too_many_arguments)]
    fn construct(
        sample_rate: f64,
        input: &'a [f32],
        num_threads: usize,
        freqs: &[f64],
        bandwidths: &[f64],
        features: Features,
        damping: f64,
        gain: f64,
        normalize: bool,
    ) -> Result<Self, BankError> {
        if sample_rate != 44100.0 && sample_rate != 48000.0 {
            return Err(BankError::invalid("Sample rate should be 44100 or 48000."));
        }
        features.validate()?;
        if !(MIN_DAMPING..=MAX_DAMPING).contains(&damping) {
            return Err(BankError::invalid("Damping must be between 1e-4 and 5e-4."));
        }

        let solver = features.solver()?;
        let freq_norm = features.freq_norm()?;

        for &bw in bandwidths {
            if bw < 0.0 {
                return Err(BankError::invalid(
                    "Desired bandwidth should be non-negative.",
                ));
            }
            if solver == Solver::CentralDifference && bw != 0.0 {
                return Err(BankError::invalid(
                    "Central difference can only be used for minimum bandwidth detectors.",
                ));
            }
        }

        let mut bank = Self {
            sample_rate,
            damping,
            gain,
            features,
            input: Self::amplify(input, gain),
            cursor: 0,
            detectors: Vec::with_capacity(freqs.len()),
            components: Vec::with_capacity(freqs.len()),
            heterodyne_pool: HashMap::new(),
            pool: WorkerPool::new(num_threads),
            mod_f: mod_frequency(solver, freq_norm),
        };

        bank.build_components(Some((freqs, bandwidths)))?;
        bank.make_detectors(normalize)?;
        Ok(bank)
    }

    /// Copy the input through the gain when one is applied
    fn amplify(input: &'a [f32], gain: f64) -> WorkingInput<'a> {
        if gain != 1.0 {
            WorkingInput::Amplified(input.iter().map(|&x| x * gain as f32).collect())
        } else {
            WorkingInput::Borrowed(input)
        }
    }

    /// Create (or re-point) the per-channel components, materialising
    /// heterodyned input copies for bands above `mod_f`.
    ///
    /// `fresh` carries the frequency and bandwidth lists at construction;
    /// `None` re-binds the existing components to a replaced input.
    fn build_components(&mut self, fresh: Option<(&[f64], &[f64])>) -> Result<(), BankError> {
        let make = self.components.is_empty();
        let count = match fresh {
            Some((freqs, _)) => freqs.len(),
            None => self.components.len(),
        };

        let mut shifter: Option<FrequencyShifter> = None;
        let input_len = self.input.as_slice().len();

        for i in 0..count {
            let (f_in, bandwidth) = match fresh {
                Some((freqs, bws)) => (freqs[i], bws[i]),
                None => (self.components[i].f_in, self.components[i].bandwidth),
            };

            let band = (f_in / self.mod_f) as usize;
            let (f_actual, source) = if band == 0 {
                (f_in, SignalSource::Input)
            } else {
                let f_shift = -(band as f64) * self.mod_f + HETERODYNE_MARGIN_HZ;

                if !self.heterodyne_pool.contains_key(&band) {
                    if shifter.is_none() {
                        shifter = Some(FrequencyShifter::new(
                            self.input.as_slice(),
                            self.sample_rate,
                            HilbertMode::Fir,
                        )?);
                    }
                    if let Some(shifter) = &shifter {
                        let mut buffer = vec![0.0f32; input_len];
                        shifter.shift(f_shift, &mut buffer);
                        debug!(
                            "heterodyne band {}: shifted input by {:.1} Hz",
                            band, f_shift
                        );
                        self.heterodyne_pool.insert(band, buffer);
                    }
                }

                (f_in + f_shift, SignalSource::Heterodyne(band))
            };

            if make {
                self.components.push(ChannelComponents {
                    f_in,
                    f_actual,
                    source,
                    bandwidth,
                });
            } else {
                self.components[i].source = source;
            }
        }
        Ok(())
    }

    /// Build one detector per component, running the requested
    /// normalisations and applying the static calibration scale.
    fn make_detectors(&mut self, normalize: bool) -> Result<(), BankError> {
        let solver = self.features.solver()?;
        let freq_norm = self.features.freq_norm()?;
        let amp_norm = self.features.amp_norm()?;

        for i in 0..self.components.len() {
            let component = self.components[i].clone();
            let mut detector = Detector::new(
                solver,
                component.f_actual,
                0.0,
                self.damping,
                self.sample_rate,
                component.bandwidth,
                self.gain,
            )?;

            if normalize {
                if freq_norm == FreqNorm::SearchNormalized {
                    let spanned = detector.search_normalize(
                        SEARCH_LOWER,
                        SEARCH_UPPER,
                        SEARCH_TONE_SECONDS,
                        self.gain,
                    )?;
                    if !spanned {
                        // Non-fatal: the detector keeps its last frequency
                        warn!(
                            "search normalisation failed for {:.3} Hz: \
                             test range does not span maximum response",
                            component.f_actual
                        );
                    }
                }
                if amp_norm == AmpNorm::Normalized {
                    detector.amplitude_normalize(self.gain)?;
                }
                detector.scale_amplitude();
            } else if freq_norm == FreqNorm::SearchNormalized {
                // Profile loading restores the archived tuning later; the
                // flag still selects the normalised calibration row.
                detector.set_normalized(true);
            }

            self.detectors.push(detector);
        }
        Ok(())
    }

    /// Get the next `num_frames` of output for `chans` channels
    ///
    /// Writes channel-major into `frames`: all frames of the first
    /// requested channel, then the next, with a stride of `num_frames`.
    /// The frame count is clipped to the remaining input and the channel
    /// count to the available detectors. Returns the number of frames
    /// actually processed (0 at the end of the input) and advances the
    /// read cursor by the same amount.
    pub fn get_z(
        &mut self,
        frames: &mut [Complex<f64>],
        chans: usize,
        num_frames: usize,
        start_chan: usize,
    ) -> usize {
        let num_detectors = self.detectors.len();
        let frames_to_do = num_frames.min(self.input.as_slice().len() - self.cursor);
        let first = start_chan.min(num_detectors);
        let chans = chans.min(num_detectors - first);

        if chans == 0 || frames_to_do == 0 {
            self.cursor += frames_to_do;
            return frames_to_do;
        }

        let stride = num_frames;
        let threads = self.pool.threads();
        let chans_per_thread = chans / threads;
        let extra = chans % threads;
        let cursor = self.cursor;

        // Split borrows: immutable signal views alongside the mutable
        // detector chunks handed to the jobs.
        let components = &self.components;
        let heterodyne_pool = &self.heterodyne_pool;
        let input_slice = self.input.as_slice();

        let signal_of = |c: usize| -> &[f32] {
            let signal = match components[c].source {
                SignalSource::Input => input_slice,
                SignalSource::Heterodyne(band) => &heterodyne_pool[&band],
            };
            &signal[cursor..]
        };

        let mut jobs: Vec<GetZJob> = Vec::new();
        let mut detectors_left = &mut self.detectors[first..first + chans];
        let mut outputs_left = &mut frames[..chans * stride];
        let mut channel = first;

        for t in 0..threads {
            let chans_this_thread = chans_per_thread + usize::from(t < extra);
            if chans_this_thread == 0 {
                break;
            }

            let (job_detectors, rest) = detectors_left.split_at_mut(chans_this_thread);
            detectors_left = rest;
            let (job_outputs, rest) = outputs_left.split_at_mut(chans_this_thread * stride);
            outputs_left = rest;

            jobs.push(GetZJob {
                detectors: job_detectors,
                outputs: job_outputs,
                signals: (channel..channel + chans_this_thread)
                    .map(|c| signal_of(c))
                    .collect(),
                stride,
                count: frames_to_do,
            });
            channel += chans_this_thread;
        }

        self.pool.run(
            &|job: &mut GetZJob| {
                for (i, detector) in job.detectors.iter_mut().enumerate() {
                    let target = &mut job.outputs[i * job.stride..i * job.stride + job.count];
                    detector.process_audio(target, job.signals[i]);
                }
            },
            &mut jobs,
        );

        self.cursor += frames_to_do;
        frames_to_do
    }

    /// Fill `abs_frames` with the magnitudes of `frames` and return the
    /// largest magnitude seen
    ///
    /// # Arguments
    /// * `abs_frames` - Output array of at least `abs_chans * abs_num_frames`
    /// * `abs_chans` - Height of the arrays
    /// * `abs_num_frames` - Length of the arrays
    /// * `frames` - Complex responses to convert
    /// * `max_threads` - Thread cap for this call; 0 uses the pool size.
    ///   For small conversions a single thread can be quicker because
    ///   abs(.) is so light-weight.
    pub fn abs_z(
        &self,
        abs_frames: &mut [f64],
        abs_chans: usize,
        abs_num_frames: usize,
        frames: &[Complex<f64>],
        max_threads: usize,
    ) -> f64 {
        let data_points = abs_chans * abs_num_frames;
        if data_points == 0 {
            return 0.0;
        }
        assert!(abs_frames.len() >= data_points && frames.len() >= data_points);

        let num_threads = abs_chans.min(if max_threads == 0 {
            self.pool.threads()
        } else {
            max_threads.min(self.pool.threads())
        });

        let mut jobs: Vec<AbsZJob> = Vec::new();
        let mut outputs_left = &mut abs_frames[..data_points];
        let mut inputs_left = &frames[..data_points];
        let mut start = 0;

        for t in 0..num_threads {
            let end = (t + 1) * data_points / num_threads;
            let (job_out, rest) = outputs_left.split_at_mut(end - start);
            outputs_left = rest;
            let (job_in, rest) = inputs_left.split_at(end - start);
            inputs_left = rest;
            jobs.push(AbsZJob {
                output: job_out,
                input: job_in,
                max: 0.0,
            });
            start = end;
        }

        self.pool.run(
            &|job: &mut AbsZJob| {
                for (o, z) in job.output.iter_mut().zip(job.input.iter()) {
                    *o = z.norm();
                    if *o > job.max {
                        job.max = *o;
                    }
                }
            },
            &mut jobs,
        );

        jobs.iter().map(|j| j.max).fold(0.0, f64::max)
    }

    /// Set the input sample at which the next getZ starts
    ///
    /// Negative offsets seek from the end of the input. Seeking to 0 also
    /// resets every detector's integrator state. Returns `false` when the
    /// offset is out of range.
    pub fn seek(&mut self, offset: i64) -> bool {
        let len = self.input.as_slice().len() as i64;
        let result = if offset >= 0 && offset < len {
            self.cursor = offset as usize;
            true
        } else if offset < 0 && -offset <= len {
            self.cursor = (len + offset) as usize;
            true
        } else {
            false
        };

        if offset == 0 {
            for detector in &mut self.detectors {
                detector.reset();
            }
        }
        result
    }

    /// Replace the input without recreating the detectors
    ///
    /// Resets the read cursor, re-applies the gain, invalidates every
    /// heterodyned copy and rebinds the per-channel signal views.
    pub fn set_input_buffer(&mut self, input: &'a [f32]) -> Result<(), BankError> {
        self.input = Self::amplify(input, self.gain);
        self.cursor = 0;
        self.heterodyne_pool.clear();
        self.build_components(None)
    }

    /// Index of the next input sample to be read
    pub fn tell(&self) -> usize {
        self.cursor
    }

    /// Number of detectors in the bank
    pub fn channels(&self) -> usize {
        self.detectors.len()
    }

    /// Length of the current input in samples
    pub fn input_len(&self) -> usize {
        self.input.as_slice().len()
    }

    /// The bank's sample rate
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// The bank's feature selection
    pub fn features(&self) -> Features {
        self.features
    }

    /// Characteristic angular frequency of a channel's detector, after any
    /// modulation and normalisation. 0 for an invalid channel.
    pub fn w(&self, ch: usize) -> f64 {
        self.detectors.get(ch).map(Detector::w).unwrap_or(0.0)
    }

    /// The requested frequency of a channel. 0 for an invalid channel.
    pub fn freq_in(&self, ch: usize) -> f64 {
        self.components.get(ch).map(|c| c.f_in).unwrap_or(0.0)
    }

    /// The frequency a channel's detector actually runs at (post
    /// heterodyne). 0 for an invalid channel.
    pub fn freq_actual(&self, ch: usize) -> f64 {
        self.components.get(ch).map(|c| c.f_actual).unwrap_or(0.0)
    }

    /// Whether a heterodyned input copy exists for band `n`
    pub fn has_heterodyne_band(&self, n: usize) -> bool {
        self.heterodyne_pool.contains_key(&n)
    }

    /// The frequency threshold above which detectors run on heterodyned
    /// input
    pub fn mod_f(&self) -> f64 {
        self.mod_f
    }
}

/// Threshold above which a detector's input is heterodyned, chosen from
/// the solver and frequency-normalisation combination
fn mod_frequency(solver: Solver, freq_norm: FreqNorm) -> f64 {
    match (solver, freq_norm) {
        (Solver::RungeKutta, FreqNorm::Unnormalized) => 1600.0,
        (Solver::RungeKutta, FreqNorm::SearchNormalized) => 2200.0,
        (Solver::CentralDifference, FreqNorm::Unnormalized) => 500.0,
        (Solver::CentralDifference, FreqNorm::SearchNormalized) => 700.0,
    }
}
