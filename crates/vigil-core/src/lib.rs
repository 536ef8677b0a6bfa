pub mod classifier;
pub mod config;
pub mod debounce;
pub mod detector;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod service;
pub mod session_manager;

pub use classifier::{GazeClassifier, PresenceTracker, SpeechClassifier};
pub use config::Config;
pub use debounce::{DebounceKey, ViolationDebouncer};
pub use detector::{
    Detection, EnergyVad, FaceObservation, LandmarkExtractor, Point, VoiceActivityDetector,
};
pub use dispatch::{DispatchOutcome, ViolationDispatcher};
pub use error::{DetectorError, Result, VigilError};
pub use frame::{Frame, FrameQueue};
pub use pipeline::{Monitor, MonitorStats, MonitorSubject};
pub use service::{notifier_from_config, DetectorFactory, Vigil};
pub use session_manager::{Session, SessionRegistry};
