//! Per-signal state machines turning detector output into violation candidates
//!
//! Each classifier owns the state of exactly one monitoring instance and is
//! driven by a single writer. Results come back as a tagged
//! [`Detection`](crate::detector::Detection) instead of errors.

pub mod gaze;
pub mod presence;
pub mod speech;

pub use gaze::{GazeAlert, GazeClassifier};
pub use presence::{AbsenceAlert, PresenceState, PresenceTracker};
pub use speech::{SpeechClassifier, SpeechFeatures, SubFrameVerdict};
