// SlidingBuffer - a bounded window of lazily produced segments
//
// The buffer reads a data stream through a SegmentProducer and exposes it
// by index, as if it were a plain array whose oldest elements are
// forgotten. Segments are created and filled on demand; once the segment
// cap is exceeded the frontmost segment is dropped and the base origin
// advances by one segment capacity. The buffer only slides forward:
// indices older than the base origin raise an expired-index error even
// though they were once valid.

mod detector;

pub use detector::{ChannelBlock, DetectorCache, Producer};

use std::collections::VecDeque;

use log::debug;

use crate::error::CacheError;

/// Fills segments with newly produced entities
pub trait SegmentProducer<T> {
    /// Produce up to `capacity` entities whose first element has index
    /// `origin` in the logical stream. The returned vector's length is the
    /// produced count and must not exceed `capacity`.
    fn generate(&mut self, origin: usize, capacity: usize) -> Vec<T>;

    /// Whether a further call to `generate` would yield more entities
    fn more(&self) -> bool;
}

/// One fixed-capacity block of consecutive entities
struct Segment<T> {
    /// Produced entities; the length is the produced count
    data: Vec<T>,
    /// Stream index of the first entity in this segment
    origin: usize,
}

/// Sliding window over a produced stream with bounded history
pub struct SlidingBuffer<T, P: SegmentProducer<T>> {
    /// Lowest index still retained
    origin: usize,
    /// Hard cap on retained segments
    max_segs: usize,
    /// Capacity of each segment
    seg_size: usize,
    segments: VecDeque<Segment<T>>,
    producer: P,
}

impl<T, P: SegmentProducer<T>> SlidingBuffer<T, P> {
    /// Create a sliding buffer
    ///
    /// Starting at any point in the stream, a history of at least
    /// `seg_size * (max_segs - 1)` entities remains accessible, subject to
    /// that much data having been produced.
    pub fn new(producer: P, max_segs: usize, seg_size: usize) -> Self {
        Self {
            origin: 0,
            max_segs,
            seg_size,
            segments: VecDeque::new(),
            producer,
        }
    }

    /// Access the entity at stream index `idx`, producing segments on
    /// demand
    ///
    /// # Errors
    /// * `NegativeIndex` - `idx` is less than zero
    /// * `ExpiredIndex` - the entity was evicted from the window
    /// * `IndexOutOfRange` - the entity lies past the produced data
    pub fn get(&mut self, idx: i64) -> Result<&T, CacheError> {
        if idx < 0 {
            return Err(CacheError::NegativeIndex { index: idx });
        }
        let index = idx as usize;
        if index < self.origin {
            return Err(CacheError::ExpiredIndex { index: idx });
        }

        let mut segment = (index - self.origin) / self.seg_size;
        while segment >= self.segments.len() {
            let origin = self.origin + self.segments.len() * self.seg_size;
            let data = self.producer.generate(origin, self.seg_size);
            debug_assert!(data.len() <= self.seg_size);
            self.segments.push_back(Segment { data, origin });

            if self.segments.len() > self.max_segs {
                let evicted = self.segments.pop_front();
                debug!(
                    "sliding buffer: evicted segment at origin {}",
                    evicted.map(|s| s.origin).unwrap_or_default()
                );
                self.origin += self.seg_size;
                segment -= 1;
            }
        }

        let segment = &self.segments[segment];
        let offset = index % self.seg_size;
        if offset >= segment.data.len() {
            return Err(CacheError::IndexOutOfRange { index: idx });
        }
        Ok(&segment.data[offset])
    }

    /// Lowest index still accessible
    pub fn origin(&self) -> usize {
        self.origin
    }

    /// The producer filling this buffer
    pub fn producer(&self) -> &P {
        &self.producer
    }

    /// Mutable access to the producer
    pub fn producer_mut(&mut self) -> &mut P {
        &mut self.producer
    }
}
