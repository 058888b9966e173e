// OnsetAnalyser - turn a bank's magnitude stream into onset times
//
// The analyser walks a DetectorCache segment by segment, tracking the
// cross-channel mean log magnitude of each segment. A run of rising
// segment means followed by a drop marks a candidate onset; a candidate
// whose total rise reaches a factor of two is refined by back-tracking
// through the cached sample history to the point where the energy
// actually started growing.

use log::debug;

use crate::bank::DetectorBank;
use crate::cache::{DetectorCache, Producer};
use crate::config::OnsetConfig;
use crate::error::CacheError;

/// Onset detector over one DetectorBank
pub struct OnsetAnalyser<'b, 's> {
    cache: DetectorCache<'b, 's>,
    chans: usize,
    sample_rate: f64,
    /// Samples per averaged segment
    seg_len: usize,
    /// Leading pad samples subtracted from reported onsets
    offset: usize,
    /// Read position in samples
    n: usize,
    /// Total samples available
    end: usize,
}

impl<'b, 's> OnsetAnalyser<'b, 's> {
    /// Construct an analyser with the default configuration
    ///
    /// # Arguments
    /// * `bank` - The bank to analyse; rewound to the start if necessary
    /// * `offset` - Number of pad samples at the beginning of the input
    pub fn new(bank: &'b mut DetectorBank<'s>, offset: usize) -> Self {
        Self::with_config(bank, offset, OnsetConfig::default())
    }

    /// Construct an analyser with explicit configuration
    pub fn with_config(bank: &'b mut DetectorBank<'s>, offset: usize, config: OnsetConfig) -> Self {
        if bank.tell() > 0 {
            bank.seek(0);
        }

        let chans = bank.channels();
        let sample_rate = bank.sample_rate();
        let end = bank.input_len();
        let seg_len = (config.segment_duration * sample_rate) as usize;

        let cache = DetectorCache::new(Producer::new(bank), config.num_segments, seg_len, 0);

        Self {
            cache,
            chans,
            sample_rate,
            seg_len,
            offset,
            n: 0,
            end,
        }
    }

    /// Analyse the whole input and return onset sample indices
    ///
    /// `threshold` is the magnitude a segment mean must have reached
    /// before a subsequent drop is treated as a candidate onset. Reported
    /// indices are relative to the un-padded input and clamped at zero.
    pub fn analyse(&mut self, threshold: f64) -> Result<Vec<usize>, CacheError> {
        let threshold = threshold.ln();

        let mut onsets = Vec::new();
        let mut seg_count: usize = 0;
        // Segment means of the current (potentially rising) run
        let mut segments: Vec<f64> = Vec::new();

        while self.cache.more() {
            let last = segments.last().copied().unwrap_or(0.0);

            segments.push(self.segment_average()?);
            seg_count += 1;

            // A drop after at least three segments whose previous mean
            // cleared the threshold may be the end of an onset rise
            if *segments.last().unwrap() < last && segments.len() >= 3 && last >= threshold {
                if last - segments[0] >= std::f64::consts::LN_2 {
                    let start = (seg_count - segments.len()) * self.seg_len;

                    // Sample index at the end of the largest step of the rise
                    let mut largest = 1;
                    for i in 2..segments.len() {
                        if segments[i] - segments[i - 1] > segments[largest] - segments[largest - 1]
                        {
                            largest = i;
                        }
                    }
                    let stop = start + largest * self.seg_len;

                    debug!(
                        "candidate onset: rise of {:.3} over {} segments, \
                         refining between samples {} and {}",
                        last - segments[0],
                        segments.len(),
                        start,
                        stop
                    );

                    if let Some(found) = self.find_exact(start, stop)? {
                        let onset = found.saturating_sub(self.offset);
                        debug!("onset found at sample {}", onset);
                        onsets.push(onset);
                    } else {
                        debug!("onset not verified");
                    }
                }
                segments.clear();
            }
        }
        Ok(onsets)
    }

    /// Mean log magnitude of the next segment across all channels
    ///
    /// Zero magnitudes contribute zero rather than negative infinity. The
    /// divisor is always a full segment, so a trailing partial segment
    /// averages low rather than high.
    fn segment_average(&mut self) -> Result<f64, CacheError> {
        let mut total = 0.0;

        for _ in 0..self.seg_len {
            if self.n >= self.end {
                break;
            }
            for k in 0..self.chans {
                total += self.log_result(k, self.n)?;
            }
            self.n += 1;
        }
        Ok(total / (self.chans * self.seg_len) as f64)
    }

    /// Log of the cached magnitude; zero stays zero
    fn log_result(&mut self, channel: usize, idx: usize) -> Result<f64, CacheError> {
        let value = self.cache.result(channel as i64, idx as i64)?;
        Ok(if value != 0.0 { value.ln() } else { 0.0 })
    }

    /// Cross-channel mean log magnitude at one sample
    fn channel_mean(&mut self, idx: usize) -> Result<f64, CacheError> {
        let mut mean = 0.0;
        for k in 0..self.chans {
            mean += self.log_result(k, idx)?;
        }
        Ok(mean / self.chans as f64)
    }

    /// Back-track from the end of the detected rise to the sample where
    /// the energy departs from the preceding level
    ///
    /// `inc_start` and `inc_stop` are the sample numbers at the beginning
    /// of the first and last segments of the rise. Walks backwards while a
    /// 75 ms sliding mean stays below the current sample's level, down to
    /// at most 100 ms before `inc_start`; where the mean catches up, the
    /// 10 ms neighbourhood is scanned for a significantly lower minimum.
    fn find_exact(
        &mut self,
        inc_start: usize,
        inc_stop: usize,
    ) -> Result<Option<usize>, CacheError> {
        let back_stop = (self.sample_rate * 0.1) as usize;
        let stop = inc_start.saturating_sub(back_stop);

        let mut idx = inc_stop;
        let mut current = self.channel_mean(idx)?;

        let mut window = (self.sample_rate * 0.075) as usize;
        if window > idx {
            window = idx;
        }

        let mut mean = 0.0;
        for i in idx - window..idx {
            for k in 0..self.chans {
                mean += self.log_result(k, i)?;
            }
        }
        mean /= (self.chans * window) as f64;

        while idx > stop + window {
            if mean < current {
                idx -= 1;
                current = self.channel_mean(idx)?;

                // Slide the window one sample older
                mean -= current / window as f64;
                let older = self.channel_mean(idx - window)?;
                mean += older / window as f64;
            } else {
                // The energy before idx is no longer lower: look for a
                // clear dip in the previous 10 ms
                let mut minimum = current;
                let mut onset = idx;
                let scan = (self.sample_rate * 0.01) as usize;

                for i in (idx.saturating_sub(scan)..=idx).rev() {
                    let mean_here = self.channel_mean(i)?;
                    if mean_here < minimum {
                        minimum = mean_here;
                        onset = i;
                    }
                }

                let ratio = current / minimum;
                if ratio.is_nan() || ratio >= 0.95 {
                    onset = idx;
                }
                return Ok(Some(onset));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::{DEFAULT_DAMPING, DEFAULT_GAIN};
    use crate::features::Features;
    use crate::testing::{silence_then_burst, with_noise};

    /// Noise floor applied to fixtures: digital silence is exactly zero,
    /// which never happens in recorded audio and defeats the log-domain
    /// statistics.
    const NOISE_FLOOR: f32 = 1e-4;
    const THRESHOLD: f64 = 0.2;

    fn onset_bank<'a>(input: &'a [f32], freqs: &[f64]) -> DetectorBank<'a> {
        DetectorBank::new(
            44100.0,
            input,
            2,
            freqs,
            None,
            Features::RUNGE_KUTTA | Features::FREQ_UNNORMALIZED | Features::AMP_UNNORMALIZED,
            DEFAULT_DAMPING,
            DEFAULT_GAIN,
        )
        .unwrap()
    }

    #[test]
    fn test_background_noise_produces_no_onsets() {
        let sr = 44100.0;
        let noise = with_noise(vec![0.0f32; sr as usize], NOISE_FLOOR, 7);
        let mut bank = onset_bank(&noise, &[430.0, 440.0, 450.0]);
        let mut analyser = OnsetAnalyser::new(&mut bank, 0);

        let onsets = analyser.analyse(THRESHOLD).unwrap();
        assert!(onsets.is_empty(), "noise floor must not produce onsets");
    }

    #[test]
    fn test_burst_onset_found_within_20ms() {
        let sr = 44100.0;
        // 200 ms of quiet then a 440 Hz burst
        let burst_start = (0.2 * sr) as usize;
        let signal = with_noise(
            silence_then_burst(sr, burst_start, 440.0, sr as usize),
            NOISE_FLOOR,
            7,
        );

        let mut bank = onset_bank(&signal, &[430.0, 440.0, 450.0]);
        let mut analyser = OnsetAnalyser::new(&mut bank, 0);

        let onsets = analyser.analyse(THRESHOLD).unwrap();
        assert!(!onsets.is_empty(), "burst onset not detected");

        let tolerance = (0.02 * sr) as usize;
        let found = onsets[0];
        assert!(
            found >= burst_start.saturating_sub(tolerance) && found <= burst_start + tolerance,
            "onset at {} not within 20 ms of {}",
            found,
            burst_start
        );
    }

    #[test]
    fn test_pad_offset_subtracted_and_clamped() {
        let sr = 44100.0;
        let burst_start = (0.2 * sr) as usize;
        let signal = with_noise(
            silence_then_burst(sr, burst_start, 440.0, sr as usize),
            NOISE_FLOOR,
            7,
        );

        let mut bank = onset_bank(&signal, &[430.0, 440.0, 450.0]);
        // Claim the entire leading quiet (and more) is padding: the
        // reported onset must clamp at zero rather than underflow
        let mut analyser = OnsetAnalyser::new(&mut bank, burst_start + (0.1 * sr) as usize);
        let onsets = analyser.analyse(THRESHOLD).unwrap();
        assert!(!onsets.is_empty());
        for &onset in &onsets {
            assert!(onset < signal.len(), "onset index must stay in range");
        }
    }

    #[test]
    fn test_off_band_energy_produces_no_onsets() {
        let sr = 44100.0;
        // A 100 Hz burst is far outside the 430-450 Hz detectors
        let signal = with_noise(
            silence_then_burst(sr, (0.2 * sr) as usize, 100.0, sr as usize),
            NOISE_FLOOR,
            7,
        );

        let mut bank = onset_bank(&signal, &[430.0, 440.0, 450.0]);
        let mut analyser = OnsetAnalyser::new(&mut bank, 0);
        let onsets = analyser.analyse(THRESHOLD).unwrap();
        assert!(
            onsets.is_empty(),
            "off-band energy must not trigger onsets, got {:?}",
            onsets
        );
    }
}
