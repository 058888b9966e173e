// Detector Bank - note onset detection with banks of Hopf resonators
//
// A bank of nonlinear resonant oscillators, each tuned to one target
// frequency, analyses a mono audio buffer; a sliding cache of response
// magnitudes feeds an onset detector that reports where notes begin.

// Module declarations
pub mod bank;
pub mod cache;
pub mod config;
pub mod detector;
pub mod error;
pub mod features;
pub mod hilbert;
pub mod note;
pub mod onset;
pub mod pitches;
pub mod pool;
pub mod profile;
pub mod shifter;
pub mod testing;

// Re-exports for convenience
pub use bank::{BankProfile, DetectorBank, DetectorProfile, DEFAULT_DAMPING, DEFAULT_GAIN};
pub use cache::{DetectorCache, Producer, SegmentProducer, SlidingBuffer};
pub use config::OnsetConfig;
pub use detector::Detector;
pub use error::{BankError, CacheError, ErrorCode, ProfileError};
pub use features::{AmpNorm, Features, FreqNorm, Solver};
pub use hilbert::{HilbertFft, HilbertFir, HilbertMode, HilbertTransform};
pub use note::{EventDetector, NoteDetector, Onsets};
pub use onset::OnsetAnalyser;
pub use pool::WorkerPool;
pub use profile::ProfileStore;
pub use shifter::FrequencyShifter;
