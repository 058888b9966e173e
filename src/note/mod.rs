// Note detection front end - critical bands of detectors around targets
//
// A single detector is too narrow to catch a note whose pitch wanders, so
// each requested frequency gets a critical band: detectors stepped by the
// actual bandwidth from the centre out to a half-step either side. An
// EventDetector analyses one band; a NoteDetector pads the input, builds
// one EventDetector per requested frequency and fans the analyses across
// a WorkerPool.

use std::collections::BTreeMap;

use crate::bank::DetectorBank;
use crate::config::OnsetConfig;
use crate::error::{BankError, CacheError};
use crate::features::Features;
use crate::onset::OnsetAnalyser;
use crate::pool::WorkerPool;

/// Default bandwidth: minimum-bandwidth detectors
pub const DEFAULT_BANDWIDTH: f64 = 0.0;
/// Default damping for note detection
pub const DEFAULT_DAMPING: f64 = 1e-4;
/// Default gain for note detection
pub const DEFAULT_GAIN: f64 = 50.0;

/// Onsets per requested frequency index
pub type Onsets = BTreeMap<usize, Vec<usize>>;

/// Minimum detector bandwidth in Hz for a damping factor
///
/// The minimum bandwidth depends on the damping and the sample rate;
/// measured values over the supported damping grid are interpolated
/// linearly. Damping outside [1e-4, 5e-4] is rejected.
pub fn min_bandwidth(sample_rate: f64, damping: f64) -> Result<f64, BankError> {
    const DAMPINGS: [f64; 5] = [1e-4, 2e-4, 3e-4, 4e-4, 5e-4];

    let bandwidths: [f64; 5] = if sample_rate == 44100.0 {
        [0.850, 1.688, 2.528, 3.360, 4.200]
    } else if sample_rate == 48000.0 {
        [0.922, 1.832, 2.752, 3.660, 4.860]
    } else {
        return Err(BankError::invalid("Sample rate should be 44100 or 48000."));
    };

    if damping < DAMPINGS[0] || damping > DAMPINGS[4] {
        return Err(BankError::invalid("Damping must be between 1e-4 and 5e-4."));
    }

    // Exact grid values short-circuit; everything else interpolates
    // between the two nearest damping factors
    let mut nearest = 1.0;
    let mut idx0 = 0;
    for (i, &d) in DAMPINGS.iter().enumerate() {
        let diff = (d - damping).abs();
        if diff == 0.0 {
            return Ok(bandwidths[i]);
        }
        if diff < nearest {
            nearest = diff;
            idx0 = i;
        }
    }

    let idx1 = if damping > DAMPINGS[idx0] {
        idx0 + 1
    } else {
        idx0 - 1
    };

    let p = (damping - DAMPINGS[idx0]) / (DAMPINGS[idx1] - DAMPINGS[idx0]);
    Ok(bandwidths[idx0] + p * (bandwidths[idx1] - bandwidths[idx0]))
}

/// Onset detection over one critical band
pub struct EventDetector<'s> {
    bank: DetectorBank<'s>,
    /// Pad samples at the beginning of the input
    offset: usize,
    /// Centre frequency of the band
    f0: f64,
    /// Frequencies of the band's detectors
    frequencies: Vec<f64>,
}

impl<'s> EventDetector<'s> {
    /// Build the band around `f0` and its DetectorBank
    ///
    /// # Arguments
    /// * `sample_rate` - Input sample rate
    /// * `input` - (Padded) audio input
    /// * `offset` - Number of pad samples at the beginning of `input`
    /// * `f0` - Centre frequency of the band
    /// * `edo` - Divisions per octave of the tuning system
    /// * `bandwidth` - Detector bandwidth; 0 selects minimum bandwidth
    /// * `features`, `damping`, `gain` - Bank construction parameters
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sample_rate: f64,
        input: &'s [f32],
        offset: usize,
        f0: f64,
        edo: usize,
        bandwidth: f64,
        features: Features,
        damping: f64,
        gain: f64,
    ) -> Result<Self, BankError> {
        // Step size through the band: the real bandwidth in Hz, even when
        // minimum-bandwidth (zero) detectors were requested
        let band_hz = if bandwidth == 0.0 {
            min_bandwidth(sample_rate, damping)?
        } else {
            bandwidth
        };

        let frequencies = make_band(f0, edo, band_hz);
        let bandwidths = vec![bandwidth; frequencies.len()];

        let bank = DetectorBank::new(
            sample_rate,
            input,
            4,
            &frequencies,
            Some(&bandwidths),
            features,
            damping,
            gain,
        )?;

        Ok(Self {
            bank,
            offset,
            f0,
            frequencies,
        })
    }

    /// Centre frequency of this band
    pub fn f0(&self) -> f64 {
        self.f0
    }

    /// Frequencies of the band's detectors
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Find the onsets in this band
    pub fn analyse(&mut self, threshold: f64) -> Result<Vec<usize>, CacheError> {
        let mut analyser = OnsetAnalyser::with_config(&mut self.bank, self.offset, OnsetConfig::default());
        analyser.analyse(threshold)
    }
}

/// Frequencies of the critical band around `f0`: the centre plus steps of
/// `band_hz` out to a half-step (in the `edo` tuning) either side
fn make_band(f0: f64, edo: usize, band_hz: f64) -> Vec<f64> {
    let mut frequencies = Vec::new();
    make_half_band(f0, edo, band_hz, -1.0, &mut frequencies);
    frequencies.push(f0);
    make_half_band(f0, edo, band_hz, 1.0, &mut frequencies);
    frequencies
}

/// Append the half of the band below (`direction` = -1) or above
/// (`direction` = +1) the centre frequency
fn make_half_band(f0: f64, edo: usize, band_hz: f64, direction: f64, out: &mut Vec<f64>) {
    let f_stop = f0 * 2f64.powf(direction / (2.0 * edo as f64));

    let mut f = f0;
    let mut diff = direction * (f_stop - f);

    // Step until the gap to the half-step boundary stops shrinking or
    // falls inside a quarter bandwidth
    while direction * (f_stop - f) <= diff && direction * (f_stop - f) > band_hz / 4.0 {
        diff = direction * (f_stop - f);
        f += direction * band_hz;
        out.push(f);
    }
}

/// Job payload: one thread's worth of bands
struct AnalyseJob<'j, 's> {
    events: &'j mut [EventDetector<'s>],
    results: &'j mut [Result<Vec<usize>, CacheError>],
    threshold: f64,
}

/// Parallel onset detection across many critical bands
pub struct NoteDetector {
    sample_rate: f64,
    /// Zero-padded copy of the input
    padded: Vec<f32>,
    /// Length of the leading zero pad in samples
    offset: usize,
    freqs: Vec<f64>,
    edo: usize,
    bandwidth: f64,
    features: Features,
    damping: f64,
    gain: f64,
    pool: WorkerPool,
}

impl NoteDetector {
    /// Construct a note detector
    ///
    /// The input is copied with a leading quarter-second of silence, so
    /// the earliest onsets are not lost to the detectors' settling time;
    /// reported onsets are relative to the original input.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sample_rate: f64,
        input: &[f32],
        freqs: &[f64],
        edo: usize,
        bandwidth: f64,
        features: Features,
        damping: f64,
        gain: f64,
    ) -> Result<Self, BankError> {
        // Validation that would otherwise only surface when the first
        // band is built during analyse()
        min_bandwidth(sample_rate, damping)?;
        features.validate()?;

        let offset = sample_rate as usize / 4;
        let mut padded = vec![0.0f32; offset + input.len()];
        padded[offset..].copy_from_slice(input);

        Ok(Self {
            sample_rate,
            padded,
            offset,
            freqs: freqs.to_vec(),
            edo,
            bandwidth,
            features,
            damping,
            gain,
            pool: WorkerPool::new(0),
        })
    }

    /// Find onsets for every requested frequency
    ///
    /// Builds one EventDetector per frequency and analyses the bands in
    /// parallel. Frequencies with no onsets are omitted from the map.
    pub fn analyse(&self, threshold: f64) -> Result<Onsets, BankError> {
        let mut events: Vec<EventDetector> = self
            .freqs
            .iter()
            .map(|&f0| {
                EventDetector::new(
                    self.sample_rate,
                    &self.padded,
                    self.offset,
                    f0,
                    self.edo,
                    self.bandwidth,
                    self.features,
                    self.damping,
                    self.gain,
                )
            })
            .collect::<Result<_, _>>()?;

        let num_bands = self.freqs.len();
        let mut results: Vec<Result<Vec<usize>, CacheError>> =
            (0..num_bands).map(|_| Ok(Vec::new())).collect();

        // Partition the bands across the pool the way getZ partitions
        // channels: the first `extra` jobs take one band more
        let threads = self.pool.threads().min(num_bands.max(1));
        let bands_per_thread = num_bands / threads;
        let extra = num_bands % threads;

        let mut jobs: Vec<AnalyseJob> = Vec::new();
        let mut events_left = events.as_mut_slice();
        let mut results_left = results.as_mut_slice();

        for t in 0..threads {
            let bands_this_thread = bands_per_thread + usize::from(t < extra);
            if bands_this_thread == 0 {
                break;
            }
            let (job_events, rest) = events_left.split_at_mut(bands_this_thread);
            events_left = rest;
            let (job_results, rest) = results_left.split_at_mut(bands_this_thread);
            results_left = rest;
            jobs.push(AnalyseJob {
                events: job_events,
                results: job_results,
                threshold,
            });
        }

        self.pool.run(
            &|job: &mut AnalyseJob| {
                for (event, slot) in job.events.iter_mut().zip(job.results.iter_mut()) {
                    *slot = event.analyse(job.threshold);
                }
            },
            &mut jobs,
        );

        let mut onsets = Onsets::new();
        for (i, result) in results.into_iter().enumerate() {
            let found = result.map_err(|err| BankError::invalid(err.to_string()))?;
            if !found.is_empty() {
                onsets.insert(i, found);
            }
        }
        Ok(onsets)
    }
}
