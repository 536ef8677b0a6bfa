use super::*;
use crate::error::DetectorError;
use std::collections::VecDeque;

struct FixedVad(bool);

impl VoiceActivityDetector for FixedVad {
    fn is_speech(&mut self, _samples: &[i16], _sample_rate: u32) -> Result<bool, DetectorError> {
        Ok(self.0)
    }
}

struct BrokenVad;

impl VoiceActivityDetector for BrokenVad {
    fn is_speech(&mut self, _samples: &[i16], _sample_rate: u32) -> Result<bool, DetectorError> {
        Err(DetectorError::new("broken-vad", "not initialised"))
    }
}

/// Plays back scripted results, then reports voice on every frame
struct ScriptedVad(VecDeque<Result<bool, DetectorError>>);

impl ScriptedVad {
    fn new(script: impl IntoIterator<Item = Result<bool, DetectorError>>) -> Self {
        Self(script.into_iter().collect())
    }
}

impl VoiceActivityDetector for ScriptedVad {
    fn is_speech(&mut self, _samples: &[i16], _sample_rate: u32) -> Result<bool, DetectorError> {
        self.0.pop_front().unwrap_or(Ok(true))
    }
}

fn vad_error() -> Result<bool, DetectorError> {
    Err(DetectorError::new("scripted-vad", "device lost"))
}

fn classifier(vad_active: bool) -> SpeechClassifier {
    SpeechClassifier::new(Box::new(FixedVad(vad_active)), &SpeechConfig::default())
}

fn encode(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// 500 Hz tone at 30% of full scale, voiced and speech-like to the model
#[allow(clippy::cast_possible_truncation)]
fn tone(sub_frames: usize) -> Vec<u8> {
    let samples: Vec<i16> = (0..sub_frames * SUB_FRAME_SAMPLES)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f64 / f64::from(SAMPLE_RATE);
            (0.3 * 32767.0 * (2.0 * std::f64::consts::PI * 500.0 * t).sin()) as i16
        })
        .collect();
    encode(&samples)
}

/// Deterministic white noise from a linear congruential generator
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn noise(sub_frames: usize) -> Vec<u8> {
    let mut state: u32 = 0x1234_5678;
    let samples: Vec<i16> = (0..sub_frames * SUB_FRAME_SAMPLES)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            ((state >> 16) as u16 as i16) / 3
        })
        .collect();
    encode(&samples)
}

#[test]
fn test_five_voiced_sub_frames_confirm_speech() {
    let mut speech = classifier(true);

    assert!(speech.process_chunk(&tone(5)));
    assert!(speech.is_speech_detected());
    assert_eq!(speech.speech_duration(), Duration::from_millis(150));
    assert!(speech.last_human_probability() >= 0.72);
}

#[test]
fn test_confirmation_short_circuits_the_chunk() {
    let mut speech = classifier(true);

    assert!(speech.process_chunk(&tone(8)));
    // Only the five sub-frames up to confirmation are counted
    assert_eq!(speech.speech_duration(), Duration::from_millis(150));
    assert_eq!(speech.consecutive_human_frames(), 5);
}

#[test]
fn test_human_streak_spans_chunks() {
    let mut speech = classifier(true);

    assert!(!speech.process_chunk(&tone(3)));
    assert_eq!(speech.consecutive_human_frames(), 3);
    assert!(speech.process_chunk(&tone(2)));
    assert_eq!(speech.speech_duration(), Duration::from_millis(60));
}

#[test]
fn test_trailing_partial_sub_frame_is_ignored() {
    let mut speech = classifier(true);
    let mut chunk = tone(4);
    chunk.extend_from_slice(&[0; 100]);

    assert!(!speech.process_chunk(&chunk));
    assert_eq!(speech.consecutive_human_frames(), 4);
}

#[test]
fn test_vad_silence_is_never_speech() {
    let mut speech = classifier(false);

    assert!(!speech.process_chunk(&tone(10)));
    assert_eq!(speech.consecutive_non_human_frames(), 10);
    assert!(speech.last_human_probability().abs() < f64::EPSILON);
}

#[test]
fn test_vad_failure_is_inconclusive() {
    let mut speech = SpeechClassifier::new(Box::new(BrokenVad), &SpeechConfig::default());

    let samples = decode_pcm16(&tone(1));
    let verdict = speech.classify_sub_frame(&samples);
    assert!(verdict.inconclusive);
    assert!(!verdict.vad_active && !verdict.is_human);

    assert!(!speech.process_chunk(&tone(6)));
    assert_eq!(speech.consecutive_human_frames(), 0);
    assert_eq!(speech.consecutive_non_human_frames(), 0);
}

#[test]
fn test_vad_failure_does_not_clear_confirmed_speech() {
    let script = std::iter::repeat_with(|| Ok(true))
        .take(5)
        .chain(std::iter::repeat_with(vad_error).take(6));
    let mut speech = SpeechClassifier::new(Box::new(ScriptedVad::new(script)), &SpeechConfig::default());
    let start = Instant::now();

    assert!(speech.process_chunk_at(&tone(5), start));
    // Six failed checks would have been a non-human streak if counted
    assert!(speech.process_chunk_at(&tone(6), start + Duration::from_millis(10)));
    assert!(speech.is_speech_detected());
    assert_eq!(speech.speech_duration(), Duration::from_millis(150));
    assert_eq!(speech.consecutive_non_human_frames(), 0);
}

#[test]
fn test_vad_failure_breaks_human_streak() {
    let script = [Ok(true), Ok(true), Ok(true), vad_error()];
    let mut speech = SpeechClassifier::new(Box::new(ScriptedVad::new(script)), &SpeechConfig::default());

    assert!(!speech.process_chunk(&tone(8)));
    assert_eq!(speech.consecutive_human_frames(), 4);
    assert!(!speech.is_speech_detected());
}

#[test]
fn test_white_noise_is_not_human() {
    let mut speech = classifier(true);

    for sub_frame in noise(3).chunks_exact(SUB_FRAME_BYTES) {
        let verdict = speech.classify_sub_frame(&decode_pcm16(sub_frame));
        assert!(verdict.vad_active);
        assert!(!verdict.is_human);
        let features = verdict.features.unwrap();
        assert!(features.flatness > 0.3 || features.zero_crossing_rate > 0.22);
    }
}

#[test]
fn test_non_human_streak_clears_speech_and_keeps_scanning() {
    let mut speech = classifier(true);
    let start = Instant::now();
    assert!(speech.process_chunk_at(&tone(5), start));

    // Noise clears the state; the tone after it starts a new streak
    let mut chunk = noise(5);
    chunk.extend(tone(2));
    assert!(!speech.process_chunk_at(&chunk, start + Duration::from_millis(10)));
    assert!(!speech.is_speech_detected());
    assert_eq!(speech.speech_duration(), Duration::ZERO);
    assert_eq!(speech.consecutive_human_frames(), 2);
}

#[test]
fn test_flicker_window_holds_state() {
    let mut speech = classifier(true);
    let start = Instant::now();
    assert!(speech.process_chunk_at(&tone(5), start));

    assert!(speech.process_chunk_at(&[0; 10], start + Duration::from_millis(300)));
    assert!(speech.is_speech_detected());
}

#[test]
fn test_flicker_window_expires() {
    let mut speech = classifier(true);
    let start = Instant::now();
    assert!(speech.process_chunk_at(&tone(5), start));

    assert!(!speech.process_chunk_at(&[0; 10], start + Duration::from_millis(310)));
    assert!(!speech.is_speech_detected());
    assert_eq!(speech.speech_duration(), Duration::ZERO);

    // Cleared state stays cleared even when asked inside the old window again
    assert!(!speech.speech_active_at(start + Duration::from_millis(100)));
}

#[test]
fn test_short_chunk_without_history_is_false() {
    let mut speech = classifier(true);
    assert!(!speech.process_chunk(&[]));
    assert!(!speech.process_chunk(&[1; SUB_FRAME_BYTES - 2]));
    assert_eq!(speech.consecutive_human_frames(), 0);
}

#[test]
fn test_release_resets_everything() {
    let mut speech = classifier(true);
    assert!(speech.process_chunk(&tone(5)));

    speech.release();
    assert!(!speech.is_speech_detected());
    assert_eq!(speech.speech_duration(), Duration::ZERO);
    assert_eq!(speech.consecutive_human_frames(), 0);
    assert!(!speech.speech_active());
}

#[test]
fn test_decode_pcm16_little_endian() {
    assert_eq!(decode_pcm16(&[0x01, 0x00, 0xff, 0xff, 0x7f]), vec![1, -1]);
}
