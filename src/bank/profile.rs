// Bank profile serialisation
//
// A profile is the tree-shaped description of a constructed bank: the
// global parameters plus the archived tuning of every detector. Loading a
// profile rebuilds the detectors from scratch, restores their archived
// frequency and amplitude scales instead of re-running normalisation, and
// reconstructs the heterodyne views over the new input.

use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use super::DetectorBank;
use crate::error::{BankError, ProfileError};
use crate::features::Features;
use crate::profile::ProfileStore;

/// Archived tuning of one detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorProfile {
    /// Requested angular frequency (rad/s)
    pub w_in: f64,
    /// Requested bandwidth (Hz)
    pub bw: f64,
    /// Angular frequency after modulation and normalisation (rad/s)
    pub w_adjusted: f64,
    /// Complex amplitude normalisation factor as (re, im)
    #[serde(rename = "aScale")]
    pub a_scale: (f64, f64),
    /// Imaginary-axis eccentricity correction
    #[serde(rename = "iScale")]
    pub i_scale: f64,
}

/// Serialised description of a DetectorBank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankProfile {
    pub sr: f64,
    pub d: f64,
    #[serde(rename = "maxThreads")]
    pub max_threads: usize,
    /// Comma-separated human-readable feature names
    #[serde(rename = "featureSet")]
    pub feature_set: String,
    pub gain: f64,
    #[serde(rename = "numDetectors")]
    pub num_detectors: usize,
    #[serde(rename = "Detectors")]
    pub detectors: Vec<DetectorProfile>,
}

impl BankProfile {
    /// Parse a profile from its serialised form
    pub fn from_json(json: &str) -> Result<Self, ProfileError> {
        let profile: BankProfile = serde_json::from_str(json)?;
        if profile.detectors.len() != profile.num_detectors {
            return Err(ProfileError::Malformed {
                reason: format!(
                    "profile declares {} detectors but records {}",
                    profile.num_detectors,
                    profile.detectors.len()
                ),
            });
        }
        Ok(profile)
    }

    /// Serialise this profile
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("profile serialisation is infallible")
    }
}

impl<'a> DetectorBank<'a> {
    /// Capture this bank's description for archival
    pub fn to_profile(&self) -> BankProfile {
        BankProfile {
            sr: self.sample_rate,
            d: self.damping,
            max_threads: self.pool.threads(),
            feature_set: self.features.to_string(),
            gain: self.gain,
            num_detectors: self.detectors.len(),
            detectors: self
                .components
                .iter()
                .zip(self.detectors.iter())
                .map(|(component, detector)| DetectorProfile {
                    w_in: component.f_in * 2.0 * std::f64::consts::PI,
                    bw: component.bandwidth,
                    w_adjusted: detector.w(),
                    a_scale: (detector.a_scale().re, detector.a_scale().im),
                    i_scale: detector.i_scale(),
                })
                .collect(),
        }
    }

    /// Rebuild a bank from an archived profile over a new input
    ///
    /// Detector construction skips normalisation; the archived frequency
    /// and amplitude scales are restored instead, then the static
    /// calibration scale is re-applied for the restored frequency.
    pub fn from_profile(profile: &BankProfile, input: &'a [f32]) -> Result<Self, BankError> {
        let features: Features = profile.feature_set.parse()?;

        let two_pi = 2.0 * std::f64::consts::PI;
        let freqs: Vec<f64> = profile.detectors.iter().map(|d| d.w_in / two_pi).collect();
        let bandwidths: Vec<f64> = profile.detectors.iter().map(|d| d.bw).collect();

        let mut bank = Self::construct(
            profile.sr,
            input,
            profile.max_threads,
            &freqs,
            &bandwidths,
            features,
            profile.d,
            profile.gain,
            false,
        )?;

        for (detector, archived) in bank.detectors.iter_mut().zip(profile.detectors.iter()) {
            detector.restore(
                archived.w_adjusted,
                Complex::new(archived.a_scale.0, archived.a_scale.1),
                archived.i_scale,
            );
            detector.scale_amplitude();
        }
        Ok(bank)
    }

    /// Archive this bank under `name` in the profile store
    pub fn save_profile(&self, store: &mut ProfileStore, name: &str) -> Result<(), ProfileError> {
        store.put(name, &self.to_profile().to_json())
    }

    /// Construct a bank from a named profile in the store
    pub fn load_profile(
        store: &ProfileStore,
        name: &str,
        input: &'a [f32],
    ) -> Result<Self, ProfileError> {
        let json = store.get(name)?;
        let profile = BankProfile::from_json(&json)?;
        Self::from_profile(&profile, input).map_err(|err| ProfileError::Malformed {
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::{DEFAULT_DAMPING, DEFAULT_GAIN};
    use crate::detector::generate_tone;

    fn test_bank<'a>(input: &'a [f32]) -> DetectorBank<'a> {
        DetectorBank::new(
            48000.0,
            input,
            2,
            &[440.0, 880.0, 20000.0],
            None,
            Features::RUNGE_KUTTA | Features::FREQ_UNNORMALIZED | Features::AMP_UNNORMALIZED,
            DEFAULT_DAMPING,
            DEFAULT_GAIN,
        )
        .unwrap()
    }

    #[test]
    fn test_profile_records_bank_parameters() {
        let tone = generate_tone(48000.0, 4096, 440.0);
        let bank = test_bank(&tone);
        let profile = bank.to_profile();

        assert_eq!(profile.sr, 48000.0);
        assert_eq!(profile.d, DEFAULT_DAMPING);
        assert_eq!(profile.gain, DEFAULT_GAIN);
        assert_eq!(profile.num_detectors, 3);
        assert_eq!(
            profile.feature_set,
            "Runge-Kutta method,Frequency unnormalized,Amplitude unnormalized"
        );

        let two_pi = 2.0 * std::f64::consts::PI;
        assert!((profile.detectors[0].w_in / two_pi - 440.0).abs() < 1e-9);
        // The 20 kHz detector was heterodyned, so its adjusted frequency
        // differs from the requested one
        assert!(profile.detectors[2].w_adjusted < profile.detectors[2].w_in);
    }

    #[test]
    fn test_json_round_trip() {
        let tone = generate_tone(48000.0, 4096, 440.0);
        let profile = test_bank(&tone).to_profile();

        let parsed = BankProfile::from_json(&profile.to_json()).unwrap();
        assert_eq!(parsed, profile);
    }

    #[test]
    fn test_detector_count_mismatch_rejected() {
        let tone = generate_tone(48000.0, 4096, 440.0);
        let mut profile = test_bank(&tone).to_profile();
        profile.num_detectors = 5;

        let err = BankProfile::from_json(&profile.to_json()).unwrap_err();
        assert!(err.to_string().contains("declares 5 detectors"));
    }

    #[test]
    fn test_loaded_bank_reproduces_outputs() {
        let tone = generate_tone(48000.0, 8192, 440.0);
        let mut original = test_bank(&tone);
        let profile = original.to_profile();

        let mut original_out = vec![Complex::new(0.0, 0.0); 3 * 8192];
        original.get_z(&mut original_out, 3, 8192, 0);

        let mut loaded = DetectorBank::from_profile(&profile, &tone).unwrap();
        assert_eq!(loaded.channels(), 3);
        let mut loaded_out = vec![Complex::new(0.0, 0.0); 3 * 8192];
        loaded.get_z(&mut loaded_out, 3, 8192, 0);

        for (a, b) in original_out.iter().zip(loaded_out.iter()) {
            assert!(
                (a - b).norm() < 1e-12,
                "loaded bank output diverged: {} vs {}",
                a,
                b
            );
        }
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(BankProfile::from_json("{not json").is_err());
        assert!(BankProfile::from_json("{}").is_err());
    }
}
