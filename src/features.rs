// Feature bitset - numerical method and normalisation selection
//
// Three orthogonal 8-bit fields combined by bitwise OR: the solver, the
// frequency normalisation and the amplitude normalisation. The human
// readable comma-separated rendering is part of the profile format, so
// Display and FromStr must round-trip exactly.

use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use crate::error::BankError;

/// Bit mask selecting the solver field
pub const SOLVER_MASK: u32 = 0xff;
/// Bit mask selecting the frequency normalisation field
pub const FREQ_NORM_MASK: u32 = 0xff << 8;
/// Bit mask selecting the amplitude normalisation field
pub const AMP_NORM_MASK: u32 = 0xff << 16;

/// Numerical integration method for a detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Solver {
    /// Central-difference approximation (minimum-bandwidth only)
    CentralDifference,
    /// Fourth-order Runge-Kutta
    RungeKutta,
}

/// Frequency normalisation scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreqNorm {
    /// Run each detector at its requested frequency
    Unnormalized,
    /// Iteratively re-tune so the peak response sits at the nominal frequency
    SearchNormalized,
}

/// Amplitude normalisation scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmpNorm {
    /// Leave the raw response amplitude
    Unnormalized,
    /// Scale responses into the range 0-1 against an ideal tone
    Normalized,
}

/// Combined feature word for a detector bank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features(u32);

impl Features {
    /// Central-difference solver
    pub const CENTRAL_DIFFERENCE: Features = Features(1);
    /// Fourth-order Runge-Kutta solver
    pub const RUNGE_KUTTA: Features = Features(2);

    /// Without frequency normalisation
    pub const FREQ_UNNORMALIZED: Features = Features(1 << 8);
    /// Iteratively adjust each detector's response frequency
    pub const SEARCH_NORMALIZED: Features = Features(2 << 8);

    /// Without amplitude normalisation
    pub const AMP_UNNORMALIZED: Features = Features(1 << 16);
    /// Scale real and imaginary parts of the response
    pub const AMP_NORMALIZED: Features = Features(2 << 16);

    /// Default: Runge-Kutta, unnormalised frequency, normalised amplitude
    pub fn defaults() -> Features {
        Features::RUNGE_KUTTA | Features::FREQ_UNNORMALIZED | Features::AMP_NORMALIZED
    }

    /// Reconstruct a feature word from its raw bits
    pub fn from_bits(bits: u32) -> Features {
        Features(bits)
    }

    /// The raw bit pattern
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Decode the solver field
    pub fn solver(self) -> Result<Solver, BankError> {
        match Features(self.0 & SOLVER_MASK) {
            f if f == Features::CENTRAL_DIFFERENCE => Ok(Solver::CentralDifference),
            f if f == Features::RUNGE_KUTTA => Ok(Solver::RungeKutta),
            _ => Err(BankError::invalid(
                "Features must select exactly one numerical method",
            )),
        }
    }

    /// Decode the frequency normalisation field
    pub fn freq_norm(self) -> Result<FreqNorm, BankError> {
        match Features(self.0 & FREQ_NORM_MASK) {
            f if f == Features::FREQ_UNNORMALIZED => Ok(FreqNorm::Unnormalized),
            f if f == Features::SEARCH_NORMALIZED => Ok(FreqNorm::SearchNormalized),
            _ => Err(BankError::invalid(
                "Features must select exactly one frequency normalisation",
            )),
        }
    }

    /// Decode the amplitude normalisation field
    pub fn amp_norm(self) -> Result<AmpNorm, BankError> {
        match Features(self.0 & AMP_NORM_MASK) {
            f if f == Features::AMP_UNNORMALIZED => Ok(AmpNorm::Unnormalized),
            f if f == Features::AMP_NORMALIZED => Ok(AmpNorm::Normalized),
            _ => Err(BankError::invalid(
                "Features must select exactly one amplitude normalisation",
            )),
        }
    }

    /// Check all three fields decode to a known option
    pub fn validate(self) -> Result<(), BankError> {
        self.solver()?;
        self.freq_norm()?;
        self.amp_norm()?;
        Ok(())
    }
}

impl BitOr for Features {
    type Output = Features;

    fn bitor(self, rhs: Features) -> Features {
        Features(self.0 | rhs.0)
    }
}

const FEATURE_NAMES: [(Features, &str); 6] = [
    (Features::CENTRAL_DIFFERENCE, "Central difference method"),
    (Features::RUNGE_KUTTA, "Runge-Kutta method"),
    (Features::FREQ_UNNORMALIZED, "Frequency unnormalized"),
    (Features::SEARCH_NORMALIZED, "Search-normalized"),
    (Features::AMP_UNNORMALIZED, "Amplitude unnormalized"),
    (Features::AMP_NORMALIZED, "Amplitude normalized"),
];

fn field_name(word: u32, mask: u32, unknown: &'static str) -> &'static str {
    let field = Features(word & mask);
    FEATURE_NAMES
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, name)| *name)
        .unwrap_or(unknown)
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            field_name(self.0, SOLVER_MASK, "[Unknown solver]"),
            field_name(
                self.0,
                FREQ_NORM_MASK,
                "[Unknown frequency normalization method]"
            ),
            field_name(
                self.0,
                AMP_NORM_MASK,
                "[Unknown amplitude normalization method]"
            ),
        )
    }
}

impl FromStr for Features {
    type Err = BankError;

    /// Parse a comma-separated list of human-readable feature names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut result = 0u32;
        for feature in s.split(',') {
            let matched = FEATURE_NAMES.iter().find(|(_, name)| *name == feature);
            match matched {
                Some((f, _)) => result |= f.0,
                None => {
                    return Err(BankError::invalid(format!(
                        "Illegal feature name '{}' reading profile",
                        feature
                    )))
                }
            }
        }
        if result == 0 {
            return Err(BankError::invalid(
                "No valid features in feature list reading profile",
            ));
        }
        Ok(Features(result))
    }
}
