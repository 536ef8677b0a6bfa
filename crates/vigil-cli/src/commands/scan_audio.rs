//! Offline speech scan of a recording
//!
//! Feeds the file through [`SpeechClassifier`] in fixed-size chunks on a
//! synthetic clock, so flicker suppression behaves as it would live.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tabled::{Table, Tabled};
use vigil_core::classifier::speech::{decode_pcm16, SAMPLE_RATE, SUB_FRAME_SAMPLES};
use vigil_core::config::SpeechConfig;
use vigil_core::{Config, EnergyVad, SpeechClassifier};

use super::helpers::{format_secs, has_extension, rule};

pub struct ScanOptions {
    pub chunk_ms: u64,
    pub per_frame: bool,
    pub json: bool,
}

#[derive(Debug, Serialize, Tabled)]
pub struct ChunkRow {
    #[tabled(rename = "Start", display_with = "display_secs")]
    pub start_secs: f64,
    #[tabled(rename = "End", display_with = "display_secs")]
    pub end_secs: f64,
    #[tabled(rename = "Speech")]
    pub speech: bool,
    #[tabled(rename = "Confirmed", display_with = "display_secs")]
    pub speech_secs: f64,
    #[tabled(rename = "Last p(human)", display_with = "display_probability")]
    pub probability: f64,
}

#[derive(Debug, Serialize, Tabled)]
pub struct FrameRow {
    #[tabled(rename = "Start", display_with = "display_secs")]
    pub start_secs: f64,
    /// `None` when the voice-activity check failed
    #[tabled(rename = "VAD", display_with = "display_vad")]
    pub vad_active: Option<bool>,
    #[tabled(rename = "Human")]
    pub is_human: bool,
    #[tabled(rename = "p(human)", display_with = "display_probability")]
    pub probability: f64,
    #[tabled(rename = "Centroid kHz", display_with = "display_optional")]
    pub centroid_khz: Option<f64>,
    #[tabled(rename = "ZCR", display_with = "display_optional")]
    pub zero_crossing_rate: Option<f64>,
}

#[derive(Debug, Default, Serialize)]
pub struct ScanSummary {
    pub duration_secs: f64,
    pub chunks: usize,
    pub speech_chunks: usize,
    pub first_speech_secs: Option<f64>,
}

fn display_secs(secs: &f64) -> String {
    format_secs(*secs)
}

fn display_vad(active: &Option<bool>) -> String {
    active.map_or_else(|| "error".to_string(), |a| a.to_string())
}

fn display_probability(p: &f64) -> String {
    format!("{p:.3}")
}

fn display_optional(value: &Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"))
}

#[allow(clippy::cast_precision_loss)]
fn offset_secs(samples: usize) -> f64 {
    samples as f64 / f64::from(SAMPLE_RATE)
}

/// Read 16 kHz mono PCM16 samples from a WAV file or a raw little-endian dump
///
/// # Errors
///
/// Returns an error if the file cannot be read or the WAV format is not 16 kHz mono 16-bit
pub fn read_samples(path: &Path) -> Result<Vec<i16>> {
    if !has_extension(path, "wav") {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        if bytes.len() % 2 != 0 {
            log::warn!("{} has an odd byte count, ignoring the last byte", path.display());
        }
        return Ok(decode_pcm16(&bytes));
    }

    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file {}", path.display()))?;
    let spec = reader.spec();
    if spec.channels != 1
        || spec.sample_rate != SAMPLE_RATE
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
    {
        bail!(
            "Unsupported WAV format ({} Hz, {} channel(s), {}-bit); expected {SAMPLE_RATE} Hz mono 16-bit PCM",
            spec.sample_rate,
            spec.channels,
            spec.bits_per_sample
        );
    }

    reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to decode {}", path.display()))
}

fn classifier(config: &SpeechConfig) -> SpeechClassifier {
    SpeechClassifier::new(Box::new(EnergyVad::new(config.energy_vad_threshold)), config)
}

/// Submit `samples` in chunks of `chunk_ms`, as a live monitor would receive them
///
/// # Errors
///
/// Returns an error if `chunk_ms` is zero
pub fn scan_chunks(
    samples: &[i16],
    config: &SpeechConfig,
    chunk_ms: u64,
) -> Result<(Vec<ChunkRow>, ScanSummary)> {
    let chunk_samples = usize::try_from(u64::from(SAMPLE_RATE).saturating_mul(chunk_ms) / 1000).unwrap_or(0);
    if chunk_samples == 0 {
        bail!("--chunk-ms must be at least 1");
    }

    let mut classifier = classifier(config);
    let clock = Instant::now();
    let mut rows = Vec::new();
    let mut summary = ScanSummary {
        duration_secs: offset_secs(samples.len()),
        ..ScanSummary::default()
    };

    for (index, chunk) in samples.chunks(chunk_samples).enumerate() {
        let start = index * chunk_samples;
        let end = start + chunk.len();
        let bytes: Vec<u8> = chunk.iter().flat_map(|s| s.to_le_bytes()).collect();
        let now = clock + Duration::from_secs_f64(offset_secs(end));

        let speech = classifier.process_chunk_at(&bytes, now);
        if speech {
            summary.speech_chunks += 1;
            summary.first_speech_secs.get_or_insert(offset_secs(end));
        }
        rows.push(ChunkRow {
            start_secs: offset_secs(start),
            end_secs: offset_secs(end),
            speech,
            speech_secs: classifier.speech_duration().as_secs_f64(),
            probability: classifier.last_human_probability(),
        });
    }

    summary.chunks = rows.len();
    Ok((rows, summary))
}

/// Verdict of every complete 30ms sub-frame, without hysteresis
pub fn scan_frames(samples: &[i16], config: &SpeechConfig) -> Vec<FrameRow> {
    let mut classifier = classifier(config);
    samples
        .chunks_exact(SUB_FRAME_SAMPLES)
        .enumerate()
        .map(|(index, frame)| {
            let verdict = classifier.classify_sub_frame(frame);
            FrameRow {
                start_secs: offset_secs(index * SUB_FRAME_SAMPLES),
                vad_active: (!verdict.inconclusive).then_some(verdict.vad_active),
                is_human: verdict.is_human,
                probability: verdict.probability,
                centroid_khz: verdict.features.map(|f| f.centroid_khz),
                zero_crossing_rate: verdict.features.map(|f| f.zero_crossing_rate),
            }
        })
        .collect()
}

/// Scan a recording and print the speech timeline
///
/// # Errors
///
/// Returns an error if the config or the recording cannot be loaded
pub fn scan_audio_command(config_path: Option<&Path>, file: &Path, options: &ScanOptions) -> Result<()> {
    let config = Config::load(config_path)?;
    let samples = read_samples(file)?;
    log::info!("Scanning {} ({} samples)", file.display(), samples.len());

    let (chunks, summary) = scan_chunks(&samples, &config.speech, options.chunk_ms)?;

    if options.per_frame {
        let frames = scan_frames(&samples, &config.speech);
        if options.json {
            let json = serde_json::json!({ "summary": summary, "frames": frames });
            println!("{}", serde_json::to_string_pretty(&json)?);
            return Ok(());
        }
        println!("\n{}", Table::new(frames));
    } else {
        if options.json {
            let json = serde_json::json!({ "summary": summary, "chunks": chunks });
            println!("{}", serde_json::to_string_pretty(&json)?);
            return Ok(());
        }
        println!("\n{}", Table::new(chunks));
    }

    println!("\nSpeech scan: {}", file.display());
    println!("{}", rule(28));
    println!("Duration:       {}", format_secs(summary.duration_secs));
    println!("Chunks:         {} ({} with speech)", summary.chunks, summary.speech_chunks);
    match summary.first_speech_secs {
        Some(at) => println!("First speech:   {}", format_secs(at)),
        None => println!("No human speech detected"),
    }
    Ok(())
}
