// DetectorCache - a sliding window over a bank's magnitude stream
//
// The cache stores the two-dimensional (channel x time) magnitude output
// of a DetectorBank in a one-dimensional SlidingBuffer. Each time-block of
// L samples is one contiguous L*C allocation; the buffer's entities are
// per-channel views into that block, so cache index c = ch + blk*C with
// element offset t = n mod L addresses the magnitude of channel ch at
// sample blk*L + t.

use rustfft::num_complex::Complex;
use std::sync::Arc;

use super::{SegmentProducer, SlidingBuffer};
use crate::bank::DetectorBank;
use crate::error::CacheError;

/// One channel's view into a shared contiguous magnitude block
#[derive(Debug, Clone)]
pub struct ChannelBlock {
    block: Arc<[f64]>,
    offset: usize,
    len: usize,
}

impl ChannelBlock {
    /// Magnitude at offset `t` within this block
    fn value(&self, t: usize) -> f64 {
        self.block[self.offset + t]
    }

    /// This channel's samples
    pub fn as_slice(&self) -> &[f64] {
        &self.block[self.offset..self.offset + self.len]
    }
}

/// Produces blocks of detector magnitudes by driving a DetectorBank
///
/// Each `generate` call advances the bank by one time-block: getZ for
/// `samples_per_segment` frames across all channels, absZ into one
/// contiguous magnitude block, and one ChannelBlock view per channel.
pub struct Producer<'b, 's> {
    bank: &'b mut DetectorBank<'s>,
    samples_per_segment: usize,
    start_chan: usize,
}

impl<'b, 's> Producer<'b, 's> {
    /// Wrap a bank. The block length and start channel are supplied by the
    /// DetectorCache this producer is handed to.
    pub fn new(bank: &'b mut DetectorBank<'s>) -> Self {
        Self {
            bank,
            samples_per_segment: 0,
            start_chan: 0,
        }
    }

    /// Number of channels this producer yields data for
    pub fn channels(&self) -> usize {
        self.bank.channels()
    }

    /// Length of the bank's input in samples
    pub fn input_len(&self) -> usize {
        self.bank.input_len()
    }

    /// The bank's sample rate
    pub fn sample_rate(&self) -> f64 {
        self.bank.sample_rate()
    }

    /// Requested frequency of a channel, 0 if invalid
    pub fn freq_in(&self, ch: usize) -> f64 {
        self.bank.freq_in(ch)
    }

    fn set_samples_per_segment(&mut self, samples: usize) {
        self.samples_per_segment = samples;
    }

    fn set_start_chan(&mut self, start_chan: usize) {
        self.start_chan = start_chan;
    }
}

impl SegmentProducer<ChannelBlock> for Producer<'_, '_> {
    fn generate(&mut self, _origin: usize, capacity: usize) -> Vec<ChannelBlock> {
        let chans = capacity;
        let samples = self.samples_per_segment;

        // An exhausted bank produces an empty segment, so accesses past
        // the data raise an out-of-range error instead of reading zeros
        if self.bank.tell() >= self.bank.input_len() {
            return Vec::new();
        }

        let mut z = vec![Complex::new(0.0, 0.0); samples * chans];
        self.bank.get_z(&mut z, chans, samples, self.start_chan);

        let mut magnitudes = vec![0.0f64; samples * chans];
        self.bank.abs_z(&mut magnitudes, chans, samples, &z, 0);

        let block: Arc<[f64]> = magnitudes.into();
        (0..chans)
            .map(|c| ChannelBlock {
                block: Arc::clone(&block),
                offset: c * samples,
                len: samples,
            })
            .collect()
    }

    fn more(&self) -> bool {
        self.bank.tell() < self.bank.input_len()
    }
}

/// Cache of detector magnitudes with a bounded history window
pub struct DetectorCache<'b, 's> {
    buffer: SlidingBuffer<ChannelBlock, Producer<'b, 's>>,
    chans: usize,
    seg_len: usize,
}

impl<'b, 's> DetectorCache<'b, 's> {
    /// Construct a DetectorCache
    ///
    /// # Arguments
    /// * `producer` - The segment producer for this cache
    /// * `num_segs` - Number of historical time-blocks to remember
    /// * `seg_len` - Audio samples per time-block
    /// * `start_chan` - First bank channel served by this cache
    pub fn new(
        mut producer: Producer<'b, 's>,
        num_segs: usize,
        seg_len: usize,
        start_chan: usize,
    ) -> Self {
        producer.set_samples_per_segment(seg_len);
        producer.set_start_chan(start_chan);
        let chans = producer.channels();
        Self {
            buffer: SlidingBuffer::new(producer, num_segs, chans),
            chans,
            seg_len,
        }
    }

    /// Magnitude of channel `ch` at sample time `n`
    ///
    /// Negative sample times raise `NegativeIndex` here: the underlying
    /// buffer's index is the channel slot, so only a negative channel
    /// would trip its own check. Sample times beyond the input length
    /// return 0 without consulting the buffer.
    pub fn result(&mut self, ch: i64, n: i64) -> Result<f64, CacheError> {
        if n < 0 {
            return Err(CacheError::NegativeIndex { index: n });
        }
        if n as usize >= self.buffer.producer().input_len() {
            return Ok(0.0);
        }

        let block_index = n as usize / self.seg_len;
        let slot = ch + (block_index * self.chans) as i64;
        let t = n as usize % self.seg_len;

        Ok(self.buffer.get(slot)?.value(t))
    }

    /// Copy the `samples.len()` magnitudes of channel `chan` ending at
    /// `current_sample` inclusive into `samples`
    ///
    /// The range may span several time-blocks. Returns the number of
    /// samples copied; ranges reaching before the retained window raise
    /// `ExpiredIndex`. The caller must keep `current_sample + 1` at least
    /// the requested count, so the range cannot reach before the stream.
    pub fn copy_prior(
        &mut self,
        chan: usize,
        current_sample: usize,
        samples: &mut [f64],
    ) -> Result<usize, CacheError> {
        let count = samples.len();
        if count == 0 {
            return Ok(0);
        }
        debug_assert!(
            current_sample + 1 >= count,
            "history request reaches before the start of the stream"
        );

        let start_sample = current_sample - (count - 1);
        let current_block = current_sample / self.seg_len;
        let start_block = start_sample / self.seg_len;
        let current_slot = chan + current_block * self.chans;
        let mut slot = chan + start_block * self.chans;
        let current_offs = current_sample - self.seg_len * current_block;
        let mut start_offs = start_sample - self.seg_len * start_block;

        let mut done = 0;

        // Whole blocks up to (but excluding) the one holding current_sample
        while slot < current_slot {
            let channel = self.buffer.get(slot as i64)?;
            let source = &channel.as_slice()[start_offs..];
            samples[done..done + source.len()].copy_from_slice(source);
            done += source.len();
            slot += self.chans;
            start_offs = 0;
        }

        let channel = self.buffer.get(slot as i64)?;
        let source = &channel.as_slice()[start_offs..=current_offs];
        samples[done..done + source.len()].copy_from_slice(source);
        done += source.len();

        Ok(done)
    }

    /// Raw access to a channel slot of the underlying sliding buffer
    ///
    /// Slot `c = ch + blk * channels` addresses channel `ch` of time-block
    /// `blk`, with the usual sliding-window index errors.
    pub fn channel_block(&mut self, slot: i64) -> Result<&ChannelBlock, CacheError> {
        self.buffer.get(slot)
    }

    /// Total number of sample times the cache can return
    pub fn end(&self) -> usize {
        self.buffer.producer().input_len()
    }

    /// Number of channels in the cache
    pub fn channels(&self) -> usize {
        self.chans
    }

    /// Audio samples per time-block
    pub fn seg_len(&self) -> usize {
        self.seg_len
    }

    /// Sample rate of the associated bank
    pub fn sample_rate(&self) -> f64 {
        self.buffer.producer().sample_rate()
    }

    /// Whether the bank has input left to analyse
    pub fn more(&self) -> bool {
        self.buffer.producer().more()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::{DEFAULT_DAMPING, DEFAULT_GAIN};
    use crate::detector::generate_tone;
    use crate::features::Features;

    fn test_features() -> Features {
        Features::RUNGE_KUTTA | Features::FREQ_UNNORMALIZED | Features::AMP_UNNORMALIZED
    }

    fn make_bank<'a>(input: &'a [f32], freqs: &[f64]) -> DetectorBank<'a> {
        DetectorBank::new(
            44100.0,
            input,
            2,
            freqs,
            None,
            test_features(),
            DEFAULT_DAMPING,
            DEFAULT_GAIN,
        )
        .unwrap()
    }

    #[test]
    fn test_result_matches_direct_evaluation() {
        let sr = 44100.0;
        let tone = generate_tone(sr, 4000, 440.0);
        let freqs = [330.0, 440.0];

        // Direct, unbatched evaluation
        let mut direct_bank = make_bank(&tone, &freqs);
        let mut z = vec![Complex::new(0.0, 0.0); 2 * 4000];
        direct_bank.get_z(&mut z, 2, 4000, 0);
        let mut direct = vec![0.0f64; 2 * 4000];
        direct_bank.abs_z(&mut direct, 2, 4000, &z, 0);

        // Cached evaluation in blocks of 500
        let mut cached_bank = make_bank(&tone, &freqs);
        let mut cache = DetectorCache::new(Producer::new(&mut cached_bank), 10, 500, 0);

        for ch in 0..2 {
            for n in (0..4000).step_by(97) {
                let cached = cache.result(ch as i64, n as i64).unwrap();
                let expected = direct[ch * 4000 + n];
                assert!(
                    (cached - expected).abs() < 1e-9,
                    "ch {} sample {}: cached {} direct {}",
                    ch,
                    n,
                    cached,
                    expected
                );
            }
        }
    }

    #[test]
    fn test_negative_sample_time_rejected() {
        let tone = generate_tone(44100.0, 1000, 440.0);
        let mut bank = make_bank(&tone, &[440.0]);
        let mut cache = DetectorCache::new(Producer::new(&mut bank), 5, 100, 0);

        assert_eq!(
            cache.result(0, -3).unwrap_err(),
            CacheError::NegativeIndex { index: -3 }
        );
    }

    #[test]
    fn test_past_end_sample_time_returns_zero() {
        let tone = generate_tone(44100.0, 1000, 440.0);
        let mut bank = make_bank(&tone, &[440.0]);
        let mut cache = DetectorCache::new(Producer::new(&mut bank), 5, 100, 0);

        assert_eq!(cache.result(0, 100_000).unwrap(), 0.0);
    }

    #[test]
    fn test_expired_and_out_of_range_indices() {
        let sr = 44100.0;
        let tone = generate_tone(sr, 20_000, 440.0);
        let mut bank = make_bank(&tone, &[440.0]);
        // 5 retained segments of 1000 samples over a 20000 sample input
        let mut cache = DetectorCache::new(Producer::new(&mut bank), 5, 1000, 0);

        // Read through 10 segments, far past the retained window
        assert!(cache.result(0, 9_999).unwrap() > 0.0);

        assert_eq!(
            cache.result(0, 0).unwrap_err(),
            CacheError::ExpiredIndex { index: 0 }
        );
        assert!(cache.result(0, 5_000).is_ok());
        // Past the input: 0, never an error
        assert_eq!(cache.result(0, 100_000).unwrap(), 0.0);
    }

    #[test]
    fn test_copy_prior_within_one_block() {
        let sr = 44100.0;
        let tone = generate_tone(sr, 2000, 440.0);
        let mut bank = make_bank(&tone, &[440.0]);
        let mut cache = DetectorCache::new(Producer::new(&mut bank), 10, 500, 0);

        let expected: Vec<f64> = (300..=320)
            .map(|n| cache.result(0, n).unwrap())
            .collect();

        let mut copied = vec![0.0f64; 21];
        assert_eq!(cache.copy_prior(0, 320, &mut copied).unwrap(), 21);
        assert_eq!(copied, expected);
    }

    #[test]
    fn test_copy_prior_spans_blocks() {
        let sr = 44100.0;
        let tone = generate_tone(sr, 3000, 440.0);
        let freqs = [330.0, 440.0];
        let mut bank = make_bank(&tone, &freqs);
        let mut cache = DetectorCache::new(Producer::new(&mut bank), 10, 500, 0);

        // 1200 samples ending at 1499 cross three 500-sample blocks
        let expected: Vec<f64> = (300..=1499)
            .map(|n| cache.result(1, n).unwrap())
            .collect();

        let mut copied = vec![0.0f64; 1200];
        assert_eq!(cache.copy_prior(1, 1499, &mut copied).unwrap(), 1200);
        assert_eq!(copied, expected);
    }

    #[test]
    fn test_copy_prior_expired_range() {
        let sr = 44100.0;
        let tone = generate_tone(sr, 20_000, 440.0);
        let mut bank = make_bank(&tone, &[440.0]);
        let mut cache = DetectorCache::new(Producer::new(&mut bank), 5, 1000, 0);

        // Slide the window well past the start
        assert!(cache.result(0, 9_999).is_ok());

        let mut copied = vec![0.0f64; 3000];
        let err = cache.copy_prior(0, 5_999, &mut copied).unwrap_err();
        assert!(matches!(err, CacheError::ExpiredIndex { .. }));
    }
}
