use serde::{Deserialize, Serialize};

use crate::error::DetectorError;
use crate::frame::Frame;

/// Normalized 2-D landmark position (0..1 in image coordinates)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// What the landmark extractor saw in one frame
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceObservation {
    pub face_present: bool,
    /// Full landmark set of the first face, indexed like MediaPipe FaceMesh
    #[serde(default)]
    pub landmarks: Option<Vec<Point>>,
    #[serde(default)]
    pub confidence: f32,
}

impl FaceObservation {
    /// No face in the frame
    #[must_use]
    pub fn absent() -> Self {
        Self::default()
    }

    /// A face with its landmark set
    #[must_use]
    pub fn with_landmarks(landmarks: Vec<Point>, confidence: f32) -> Self {
        Self {
            face_present: true,
            landmarks: Some(landmarks),
            confidence,
        }
    }
}

/// Tagged verdict of a classifier on one input
#[derive(Debug, Clone, PartialEq)]
pub enum Detection<T> {
    /// Input could not be judged (missing landmarks, detector failure)
    Inconclusive,
    /// Judged, nothing to report
    NotDetected,
    /// Judged, violation confirmed
    Detected(T),
}

impl<T> Detection<T> {
    #[must_use]
    pub const fn is_detected(&self) -> bool {
        matches!(self, Self::Detected(_))
    }

    /// Payload of a confirmed detection
    pub fn detected(self) -> Option<T> {
        match self {
            Self::Detected(payload) => Some(payload),
            Self::Inconclusive | Self::NotDetected => None,
        }
    }
}

/// Face landmark primitive
///
/// Implementations may be stateful (tracking across frames), hence `&mut self`.
pub trait LandmarkExtractor: Send {
    /// Detect the first face in a frame and return its landmarks
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying model fails on this frame
    fn detect(&mut self, frame: &Frame) -> Result<FaceObservation, DetectorError>;

    /// Free model resources; the extractor is not used afterwards
    fn release(&mut self) {}
}

/// Voice activity primitive operating on exactly one 30ms sub-frame
pub trait VoiceActivityDetector: Send {
    /// Whether the sub-frame contains voiced energy
    ///
    /// # Errors
    ///
    /// Returns an error if the primitive rejects the frame
    fn is_speech(&mut self, samples: &[i16], sample_rate: u32) -> Result<bool, DetectorError>;
}

/// RMS-threshold voice activity primitive
///
/// Stands in for a real VAD when none is wired in (CLI scans, tests).
#[derive(Debug, Clone, Copy)]
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn is_speech(&mut self, samples: &[i16], _sample_rate: u32) -> Result<bool, DetectorError> {
        if samples.is_empty() {
            return Err(DetectorError::new("energy-vad", "empty frame"));
        }
        #[allow(clippy::cast_precision_loss)]
        let mean_square = samples
            .iter()
            .map(|&s| {
                let x = f32::from(s) / 32768.0;
                x * x
            })
            .sum::<f32>()
            / samples.len() as f32;
        Ok(mean_square.sqrt() >= self.threshold)
    }
}
