//! Test delivery through the configured notifier

use anyhow::{bail, Result};
use std::path::Path;
use tokio::runtime::Handle;
use vigil_core::{notifier_from_config, Config, DispatchOutcome, ViolationDispatcher};
use vigil_integrations::{ViolationKind, ViolationReport};

/// Parse a violation kind from its wire name
///
/// # Errors
///
/// Returns a message listing the accepted names
pub fn parse_kind(value: &str) -> std::result::Result<ViolationKind, String> {
    [
        ViolationKind::NoFace,
        ViolationKind::LookingAway,
        ViolationKind::SpeechDetected,
    ]
    .into_iter()
    .find(|kind| kind.as_str().eq_ignore_ascii_case(value.trim()))
    .ok_or_else(|| {
        format!("unknown violation kind '{value}' (expected no_face, looking_away or speech_detected)")
    })
}

/// Send one synthetic violation and wait for the outcome
///
/// # Errors
///
/// Returns an error if the config is invalid or the notifier rejects the report
pub async fn notify_test_command(
    config_path: Option<&Path>,
    kind: ViolationKind,
    exam_id: Option<i64>,
    student_id: Option<i64>,
) -> Result<()> {
    let config = Config::load(config_path)?;
    let notifier = notifier_from_config(&config.reporter)?;
    let dispatcher = ViolationDispatcher::new(
        notifier,
        Handle::current(),
        config.debounce.cooldown(),
        config.reporter.timeout(),
    );

    let report = ViolationReport::new(
        kind,
        format!("Test {kind} violation from vigil notify-test"),
        exam_id,
        student_id,
        "notify-test".to_string(),
    );
    println!(
        "Sending {kind} via {} (report {})...",
        dispatcher.notifier_name(),
        report.id
    );

    match dispatcher.dispatch_now(report).await {
        DispatchOutcome::Delivered => {
            println!("Delivered.");
            Ok(())
        }
        DispatchOutcome::Suppressed => {
            println!("Suppressed by the debounce cooldown.");
            Ok(())
        }
        DispatchOutcome::Failed => bail!("Delivery failed, see the log above for the cause"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("no_face"), Ok(ViolationKind::NoFace));
        assert_eq!(parse_kind(" Looking_Away "), Ok(ViolationKind::LookingAway));
        assert_eq!(parse_kind("speech_detected"), Ok(ViolationKind::SpeechDetected));
        assert!(parse_kind("tab_switch").is_err());
    }

    #[tokio::test]
    async fn test_notify_without_backend_logs_and_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        Config::default().save(&path).unwrap();

        notify_test_command(Some(path.as_path()), ViolationKind::NoFace, Some(1), Some(2))
            .await
            .unwrap();
    }
}
