//! Human speech detection over 30ms PCM16 sub-frames
//!
//! Every sub-frame first goes through the voice-activity primitive; voiced
//! frames are then scored by a small logistic model over spectral features
//! and must pass hard plausibility gates. Hysteresis over consecutive
//! verdicts turns the per-frame signal into a speech state, and a short
//! flicker window keeps that state alive between confirmations.

mod features;

#[cfg(test)]
mod tests;

pub use features::{FeatureExtractor, SpeechFeatures};

use std::time::{Duration, Instant};

use crate::config::SpeechConfig;
use crate::detector::VoiceActivityDetector;

pub const SAMPLE_RATE: u32 = 16_000;
pub const SUB_FRAME_MS: u64 = 30;
/// Samples in one sub-frame (480 at 16 kHz)
pub const SUB_FRAME_SAMPLES: usize = 480;
pub const SUB_FRAME_BYTES: usize = SUB_FRAME_SAMPLES * 2;

/// Verdict for a single sub-frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubFrameVerdict {
    pub vad_active: bool,
    pub features: Option<SpeechFeatures>,
    /// Model probability when every gate passed, otherwise 0
    pub probability: f64,
    pub is_human: bool,
    /// The voice-activity check failed, so the frame is neither human nor non-human
    pub inconclusive: bool,
}

impl SubFrameVerdict {
    const fn silent() -> Self {
        Self {
            vad_active: false,
            features: None,
            probability: 0.0,
            is_human: false,
            inconclusive: false,
        }
    }

    const fn inconclusive() -> Self {
        Self {
            inconclusive: true,
            ..Self::silent()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameOutcome {
    Human,
    NonHuman,
    Inconclusive,
}

/// Decode little-endian PCM16; a trailing odd byte is ignored
#[must_use]
pub fn decode_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub struct SpeechClassifier {
    vad: Box<dyn VoiceActivityDetector>,
    extractor: FeatureExtractor,
    required_frames: u32,
    flicker_window: Duration,

    consecutive_human: u32,
    consecutive_non_human: u32,
    speech_detected: bool,
    last_confirmed_at: Option<Instant>,
    speech_duration: Duration,
    last_human_probability: f64,
}

impl SpeechClassifier {
    #[must_use]
    pub fn new(vad: Box<dyn VoiceActivityDetector>, config: &SpeechConfig) -> Self {
        Self {
            vad,
            extractor: FeatureExtractor::new(SAMPLE_RATE),
            required_frames: config.required_consecutive_frames.max(1),
            flicker_window: config.flicker_window(),
            consecutive_human: 0,
            consecutive_non_human: 0,
            speech_detected: false,
            last_confirmed_at: None,
            speech_duration: Duration::ZERO,
            last_human_probability: 0.0,
        }
    }

    #[must_use]
    pub const fn is_speech_detected(&self) -> bool {
        self.speech_detected
    }

    /// Accumulated confirmed speech since the state was last cleared
    #[must_use]
    pub const fn speech_duration(&self) -> Duration {
        self.speech_duration
    }

    #[must_use]
    pub const fn last_human_probability(&self) -> f64 {
        self.last_human_probability
    }

    #[must_use]
    pub const fn consecutive_human_frames(&self) -> u32 {
        self.consecutive_human
    }

    #[must_use]
    pub const fn consecutive_non_human_frames(&self) -> u32 {
        self.consecutive_non_human
    }

    /// Drop all speech state
    pub fn release(&mut self) {
        self.clear_speech();
        self.consecutive_human = 0;
        self.consecutive_non_human = 0;
        self.last_human_probability = 0.0;
        log::debug!("Speech classifier state released");
    }

    fn clear_speech(&mut self) {
        self.speech_detected = false;
        self.speech_duration = Duration::ZERO;
        self.last_confirmed_at = None;
    }

    /// Classify one sub-frame without touching the hysteresis counters
    pub fn classify_sub_frame(&mut self, samples: &[i16]) -> SubFrameVerdict {
        let vad_active = match self.vad.is_speech(samples, SAMPLE_RATE) {
            Ok(active) => active,
            Err(e) => {
                log::warn!("Voice activity check failed, skipping frame: {e}");
                return SubFrameVerdict::inconclusive();
            }
        };
        if !vad_active {
            return SubFrameVerdict::silent();
        }

        let Some(features) = self.extractor.extract(samples) else {
            return SubFrameVerdict {
                vad_active,
                ..SubFrameVerdict::silent()
            };
        };

        let score = features.human_score();
        log::debug!("Sub-frame features {features:?}, human score {score:?}");
        SubFrameVerdict {
            vad_active,
            features: Some(features),
            probability: score.unwrap_or(0.0),
            is_human: score.is_some(),
            inconclusive: false,
        }
    }

    fn evaluate(&mut self, samples: &[i16]) -> FrameOutcome {
        let verdict = self.classify_sub_frame(samples);
        self.last_human_probability = verdict.probability;
        if verdict.inconclusive {
            // A failed check breaks both streaks without voting either way
            self.consecutive_human = 0;
            self.consecutive_non_human = 0;
            return FrameOutcome::Inconclusive;
        }
        if verdict.is_human {
            self.consecutive_human += 1;
            self.consecutive_non_human = 0;
            FrameOutcome::Human
        } else {
            self.consecutive_non_human += 1;
            self.consecutive_human = 0;
            FrameOutcome::NonHuman
        }
    }

    pub fn process_chunk(&mut self, bytes: &[u8]) -> bool {
        self.process_chunk_at(bytes, Instant::now())
    }

    /// Run a PCM16 LE mono chunk through the classifier, as of `now`
    ///
    /// Returns `true` when speech is confirmed in this chunk, or when a
    /// previous confirmation is still inside the flicker window.
    pub fn process_chunk_at(&mut self, bytes: &[u8], now: Instant) -> bool {
        if bytes.len() < SUB_FRAME_BYTES {
            return self.speech_active_at(now);
        }

        let mut processed: u32 = 0;
        let mut confirmed = false;
        for sub_frame in bytes.chunks_exact(SUB_FRAME_BYTES) {
            processed += 1;
            let samples = decode_pcm16(sub_frame);

            match self.evaluate(&samples) {
                FrameOutcome::Human if self.consecutive_human >= self.required_frames => {
                    confirmed = true;
                    break;
                }
                FrameOutcome::NonHuman if self.consecutive_non_human >= self.required_frames => {
                    // Keep scanning: a later sub-frame in this chunk may still confirm
                    self.speech_detected = false;
                    self.speech_duration = Duration::ZERO;
                }
                _ => {}
            }
        }

        if confirmed {
            self.speech_detected = true;
            self.last_confirmed_at = Some(now);
            self.speech_duration += Duration::from_millis(SUB_FRAME_MS) * processed;
            log::debug!(
                "Speech confirmed after {processed} sub-frames ({:.2}s total)",
                self.speech_duration.as_secs_f64()
            );
            return true;
        }

        self.speech_active_at(now)
    }

    pub fn speech_active(&mut self) -> bool {
        self.speech_active_at(Instant::now())
    }

    /// Flicker-suppressed speech state
    ///
    /// Stays true for the flicker window after the last confirmation, then
    /// clears the speech state.
    pub fn speech_active_at(&mut self, now: Instant) -> bool {
        let Some(confirmed_at) = self.last_confirmed_at.filter(|_| self.speech_detected) else {
            return false;
        };

        if now.saturating_duration_since(confirmed_at) <= self.flicker_window {
            return true;
        }

        self.clear_speech();
        false
    }
}
