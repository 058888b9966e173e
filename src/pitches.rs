//! Standard tuning sets
//!
//! The default frequency list for whole-keyboard analysis: the 88 keys of
//! a 12-EDO piano, A4 = 440 Hz, from A0 (27.5 Hz) to C8 (4186 Hz).

use once_cell::sync::Lazy;

/// Frequencies of the 88 piano keys in ascending order
pub static PIANO_KEYS: Lazy<Vec<f64>> = Lazy::new(|| {
    (1..=88)
        .map(|key| 440.0 * 2f64.powf((key as f64 - 49.0) / 12.0))
        .collect()
});
