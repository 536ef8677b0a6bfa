use crate::config::GazeConfig;
use crate::detector::{Detection, FaceObservation, Point};

const LEFT_EYE_CORNERS: [usize; 2] = [33, 133];
const LEFT_IRIS: [usize; 4] = [468, 469, 470, 471];
const RIGHT_EYE_CORNERS: [usize; 2] = [362, 263];
const RIGHT_IRIS: [usize; 4] = [473, 474, 475, 476];

/// Corner spans at or below this are treated as a degenerate eye
const MIN_CORNER_SPAN: f32 = 1e-6;

/// Confirmed look-away streak
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeAlert {
    pub consecutive_frames: u32,
    pub left_ratio: f32,
    pub right_ratio: f32,
}

impl GazeAlert {
    #[must_use]
    pub fn message(&self) -> String {
        format!(
            "Looking away detected ({} consecutive frames)",
            self.consecutive_frames
        )
    }
}

/// Horizontal iris position of one eye, 0 = outer corner, 1 = inner corner
///
/// `None` when an index is missing or the corner span is degenerate.
fn eye_ratio(landmarks: &[Point], corners: [usize; 2], iris: [usize; 4], mirrored: bool) -> Option<f32> {
    let corner_a = landmarks.get(corners[0])?.x;
    let corner_b = landmarks.get(corners[1])?.x;

    let mut iris_sum = 0.0;
    for idx in iris {
        iris_sum += landmarks.get(idx)?.x;
    }
    #[allow(clippy::cast_precision_loss)]
    let iris_x = iris_sum / iris.len() as f32;

    let min_corner = corner_a.min(corner_b);
    let span = corner_a.max(corner_b) - min_corner;
    if span.is_nan() || span <= MIN_CORNER_SPAN {
        return None;
    }

    let ratio = (iris_x - min_corner) / span;
    let ratio = if mirrored { 1.0 - ratio } else { ratio };
    Some(ratio.clamp(0.0, 1.0))
}

/// Left and right iris ratios of a landmark set, right eye mirrored
#[must_use]
pub fn iris_ratios(landmarks: &[Point]) -> Option<(f32, f32)> {
    let left = eye_ratio(landmarks, LEFT_EYE_CORNERS, LEFT_IRIS, false)?;
    let right = eye_ratio(landmarks, RIGHT_EYE_CORNERS, RIGHT_IRIS, true)?;
    Some((left, right))
}

/// Gaze hysteresis over consecutive frames
#[derive(Debug, Clone)]
pub struct GazeClassifier {
    required_frames: u32,
    min_ratio: f32,
    max_ratio: f32,
    consecutive_look_away_count: u32,
}

impl Default for GazeClassifier {
    fn default() -> Self {
        Self::new(&GazeConfig::default())
    }
}

impl GazeClassifier {
    #[must_use]
    pub fn new(config: &GazeConfig) -> Self {
        Self {
            required_frames: config.consecutive_frames.max(1),
            min_ratio: config.min_ratio,
            max_ratio: config.max_ratio,
            consecutive_look_away_count: 0,
        }
    }

    #[must_use]
    pub const fn consecutive_look_away_count(&self) -> u32 {
        self.consecutive_look_away_count
    }

    pub fn reset(&mut self) {
        self.consecutive_look_away_count = 0;
    }

    fn on_screen(&self, ratio: f32) -> bool {
        self.min_ratio < ratio && ratio < self.max_ratio
    }

    /// Judge one frame's observation
    ///
    /// No face or unusable landmarks reset the streak and come back as
    /// `NotDetected` / `Inconclusive` respectively.
    pub fn classify(&mut self, observation: &FaceObservation) -> Detection<GazeAlert> {
        if !observation.face_present {
            self.reset();
            return Detection::NotDetected;
        }

        let Some((left, right)) = observation.landmarks.as_deref().and_then(iris_ratios) else {
            self.reset();
            return Detection::Inconclusive;
        };

        self.classify_ratios(left, right)
    }

    /// Feed precomputed ratios (left, mirrored right) for one frame
    pub fn classify_ratios(&mut self, left: f32, right: f32) -> Detection<GazeAlert> {
        if self.on_screen(left) || self.on_screen(right) {
            if self.consecutive_look_away_count > 0 {
                log::debug!("Gaze back on screen (left={left:.3}, right={right:.3}), resetting");
            }
            self.reset();
            return Detection::NotDetected;
        }

        self.consecutive_look_away_count += 1;
        log::debug!(
            "Both eyes off screen (left={left:.3}, right={right:.3}), count {}/{}",
            self.consecutive_look_away_count,
            self.required_frames
        );

        if self.consecutive_look_away_count < self.required_frames {
            return Detection::NotDetected;
        }

        let alert = GazeAlert {
            consecutive_frames: self.consecutive_look_away_count,
            left_ratio: left,
            right_ratio: right,
        };
        self.reset();
        log::info!("Look-away confirmed after {} frames", alert.consecutive_frames);
        Detection::Detected(alert)
    }
}
