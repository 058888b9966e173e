//! dbank_diag - run note onset detection over a WAV file
//!
//! Loads a mono (or mixed-down) WAV file, builds a critical band around
//! each requested frequency and prints the detected onset times. Useful
//! for eyeballing detector behaviour against real recordings without
//! wiring up a test.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use detector_bank::note::DEFAULT_GAIN;
use detector_bank::pitches::PIANO_KEYS;
use detector_bank::{Features, NoteDetector, OnsetConfig};

#[derive(Parser, Debug)]
#[command(name = "dbank_diag", about = "Detect note onsets in a WAV file")]
struct Args {
    /// Input WAV file, sampled at 44100 or 48000 Hz
    input: PathBuf,

    /// Comma-separated frequencies to detect in Hz.
    /// Defaults to the 88 piano keys.
    #[arg(short, long, value_delimiter = ',')]
    freqs: Vec<f64>,

    /// Divisions per octave of the tuning system
    #[arg(long, default_value_t = 12)]
    edo: usize,

    /// Onset threshold; overrides the configuration file
    #[arg(short, long)]
    threshold: Option<f64>,

    /// Detector gain applied to the input
    #[arg(long, default_value_t = DEFAULT_GAIN)]
    gain: f64,

    /// Detector damping, within [1e-4, 5e-4]
    #[arg(long, default_value_t = 1e-4)]
    damping: f64,

    /// Integrate with central differences instead of Runge-Kutta
    #[arg(long)]
    central_difference: bool,

    /// Search-normalise detector frequencies
    #[arg(long)]
    search_normalize: bool,

    /// Amplitude-normalise detector responses
    #[arg(long)]
    amp_normalize: bool,

    /// Onset configuration JSON file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let (samples, sample_rate) = read_wav(&args.input)
        .with_context(|| format!("failed to read {:?}", args.input))?;

    let config = match &args.config {
        Some(path) => OnsetConfig::load_from_file(path),
        None => OnsetConfig::default(),
    };
    let threshold = args.threshold.unwrap_or(config.threshold);

    let method = if args.central_difference {
        Features::CENTRAL_DIFFERENCE
    } else {
        Features::RUNGE_KUTTA
    };
    let freq_norm = if args.search_normalize {
        Features::SEARCH_NORMALIZED
    } else {
        Features::FREQ_UNNORMALIZED
    };
    let amp_norm = if args.amp_normalize {
        Features::AMP_NORMALIZED
    } else {
        Features::AMP_UNNORMALIZED
    };
    let features = method | freq_norm | amp_norm;

    let freqs: Vec<f64> = if args.freqs.is_empty() {
        PIANO_KEYS.clone()
    } else {
        args.freqs.clone()
    };

    tracing::info!(
        "analysing {:?}: {} samples at {} Hz, {} bands, features {}",
        args.input,
        samples.len(),
        sample_rate,
        freqs.len(),
        features
    );

    let detector = NoteDetector::new(
        sample_rate,
        &samples,
        &freqs,
        args.edo,
        0.0,
        features,
        args.damping,
        args.gain,
    )?;
    let onsets = detector.analyse(threshold)?;

    if onsets.is_empty() {
        println!("no onsets found");
        return Ok(());
    }

    for (index, times) in &onsets {
        let seconds: Vec<String> = times
            .iter()
            .map(|&n| format!("{:.3}", n as f64 / sample_rate))
            .collect();
        println!("{:9.2} Hz: {}", freqs[*index], seconds.join(", "));
    }
    Ok(())
}

/// Read a WAV file as mono f32 samples plus its sample rate
fn read_wav(path: &PathBuf) -> Result<(Vec<f32>, f64)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    if spec.sample_rate != 44100 && spec.sample_rate != 48000 {
        bail!(
            "unsupported sample rate {} (expected 44100 or 48000)",
            spec.sample_rate
        );
    }

    let channels = spec.channels as usize;
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let full_scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / full_scale))
                .collect::<Result<_, _>>()?
        }
    };

    // Mix multi-channel input down to mono
    let samples: Vec<f32> = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    Ok((samples, spec.sample_rate as f64))
}
