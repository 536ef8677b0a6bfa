use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of proctoring violation raised by the detection pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// No face in front of the camera for longer than the absence threshold
    NoFace,
    /// Both eyes off-screen for a sustained run of frames
    LookingAway,
    /// Human speech confirmed on the microphone
    SpeechDetected,
}

impl ViolationKind {
    /// Wire name used by the reporting backend
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoFace => "no_face",
            Self::LookingAway => "looking_away",
            Self::SpeechDetected => "speech_detected",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A confirmed violation, ready to be forwarded to the reporting backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationReport {
    /// Unique per report, lets the backend drop retried deliveries
    pub id: Uuid,
    pub kind: ViolationKind,
    pub message: String,
    pub exam_id: Option<i64>,
    pub student_id: Option<i64>,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

impl ViolationReport {
    /// Create a new report stamped with the current time
    #[must_use]
    pub fn new(
        kind: ViolationKind,
        message: impl Into<String>,
        exam_id: Option<i64>,
        student_id: Option<i64>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            exam_id,
            student_id,
            session_id: session_id.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Outbound channel for confirmed violations
///
/// Implementations report success only once the receiving side acknowledged
/// the report; callers rely on that to decide whether a cooldown is armed.
#[async_trait]
pub trait ViolationNotifier: Send + Sync {
    /// Deliver a single violation report
    ///
    /// # Errors
    ///
    /// Returns an error if the report could not be delivered or was rejected
    async fn send(&self, report: &ViolationReport) -> Result<()>;

    /// Get the notifier name (for logs)
    #[must_use]
    fn system_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(ViolationKind::NoFace.to_string(), "no_face");
        assert_eq!(ViolationKind::LookingAway.to_string(), "looking_away");
        assert_eq!(ViolationKind::SpeechDetected.as_str(), "speech_detected");
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = ViolationReport::new(
            ViolationKind::LookingAway,
            "Looking away detected (5 consecutive frames)",
            Some(12),
            Some(34),
            "abc",
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "looking_away");
        assert_eq!(json["examId"], 12);
        assert_eq!(json["studentId"], 34);
        assert_eq!(json["sessionId"], "abc");
    }

    #[test]
    fn test_report_deserialize_without_subject() {
        let json = r#"{
            "id": "00000000-0000-0000-0000-000000000001",
            "kind": "no_face",
            "message": "Face not detected for 3.2 seconds",
            "examId": null,
            "studentId": null,
            "sessionId": "s-1",
            "timestamp": "2024-01-01T10:00:00Z"
        }"#;
        let report: ViolationReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.kind, ViolationKind::NoFace);
        assert!(report.exam_id.is_none());
    }
}
