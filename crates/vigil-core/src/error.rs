use thiserror::Error;

/// Errors surfaced by the detection core
#[derive(Debug, Error)]
pub enum VigilError {
    /// Malformed media or an unknown session, rejected before any classifier runs
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A landmark or voice-activity primitive failed on this input
    #[error("detector unavailable: {0}")]
    DetectorUnavailable(#[from] DetectorError),

    /// The reporting backend could not be reached or rejected a report
    #[error("notification failed: {0}")]
    Notification(String),

    /// Configuration file could not be read or parsed
    #[error("config error: {0}")]
    Config(String),
}

/// Failure reported by an external detector primitive
#[derive(Debug, Clone, Error)]
#[error("{detector}: {message}")]
pub struct DetectorError {
    pub detector: &'static str,
    pub message: String,
}

impl DetectorError {
    #[must_use]
    pub fn new(detector: &'static str, message: impl Into<String>) -> Self {
        Self {
            detector,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VigilError>;
