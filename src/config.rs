//! Configuration for the onset analysis stage
//!
//! This module provides runtime configuration loading from JSON files,
//! enabling tuning of the onset detector without recompilation. The
//! defaults reproduce the standard analysis set-up: 20 ms segments with a
//! 20 second history window.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Onset analysis parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnsetConfig {
    /// Length of each averaged segment in seconds
    pub segment_duration: f64,
    /// Number of historical segments the cache retains
    pub num_segments: usize,
    /// Magnitude a segment mean must exceed to qualify as an onset
    pub threshold: f64,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        Self {
            segment_duration: 0.02,
            num_segments: 1000,
            threshold: 0.2,
        }
    }
}

impl OnsetConfig {
    /// Load configuration from a JSON file
    ///
    /// Falls back to the defaults with a logged warning if the file is
    /// missing or unparseable.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded onset configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OnsetConfig::default();
        assert_eq!(config.segment_duration, 0.02);
        assert_eq!(config.num_segments, 1000);
        assert_eq!(config.threshold, 0.2);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = OnsetConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: OnsetConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.segment_duration, config.segment_duration);
        assert_eq!(parsed.num_segments, config.num_segments);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = OnsetConfig::load_from_file("/nonexistent/onset_config.json");
        assert_eq!(config.num_segments, OnsetConfig::default().num_segments);
    }
}
