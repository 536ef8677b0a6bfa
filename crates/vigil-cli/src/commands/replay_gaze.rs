//! Replay recorded face observations through the frame-path classifiers

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tabled::{Table, Tabled};
use vigil_core::{
    Config, DebounceKey, Detection, FaceObservation, GazeClassifier, PresenceTracker,
    ViolationDebouncer,
};
use vigil_integrations::ViolationKind;

use super::helpers::{format_secs, rule};

/// One recorded frame: an observation plus an optional timestamp in seconds
#[derive(Debug, Deserialize)]
struct ReplayLine {
    #[serde(default)]
    t: Option<f64>,
    #[serde(flatten)]
    observation: FaceObservation,
}

#[derive(Debug, Serialize, Tabled)]
pub struct ReplayViolation {
    #[tabled(rename = "Frame")]
    pub frame: usize,
    #[tabled(rename = "At", display_with = "display_secs")]
    pub at_secs: f64,
    #[tabled(rename = "Kind")]
    pub kind: ViolationKind,
    #[tabled(rename = "Reported")]
    pub reported: bool,
    #[tabled(rename = "Message")]
    pub message: String,
}

fn display_secs(secs: &f64) -> String {
    format_secs(*secs)
}

/// Parse JSON lines, skipping blanks; lines without `t` are placed at `index / fps`
///
/// # Errors
///
/// Returns an error naming the first line that is not a valid observation
pub fn parse_observations(text: &str, fps: f64) -> Result<Vec<(f64, FaceObservation)>> {
    if !fps.is_finite() || fps <= 0.0 {
        bail!("--fps must be a positive number");
    }

    let mut frames = Vec::new();
    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: ReplayLine = serde_json::from_str(line)
            .with_context(|| format!("Invalid observation on line {}", number + 1))?;
        #[allow(clippy::cast_precision_loss)]
        let at = parsed.t.unwrap_or(frames.len() as f64 / fps);
        if !at.is_finite() || at < 0.0 {
            bail!("Invalid timestamp on line {}", number + 1);
        }
        frames.push((at, parsed.observation));
    }
    Ok(frames)
}

/// Run observations through presence and gaze with the monitor's timing rules
///
/// Frames inside the startup grace period are not judged. `reported` shows
/// whether the debounce cooldown would have let the violation through.
pub fn replay(frames: &[(f64, FaceObservation)], config: &Config) -> Vec<ReplayViolation> {
    let mut presence = PresenceTracker::new(config.monitor.face_absence_threshold());
    let mut gaze = GazeClassifier::new(&config.gaze);
    let debouncer = ViolationDebouncer::new(config.debounce.cooldown());
    let grace = config.monitor.startup_grace_period().as_secs_f64();
    let clock = Instant::now();

    let mut violations = Vec::new();
    for (frame, (at, observation)) in frames.iter().enumerate() {
        let now = clock + Duration::from_secs_f64(*at);
        if *at < grace {
            presence.reset_at(now);
            continue;
        }

        let mut candidates = Vec::new();
        if let Detection::Detected(alert) = presence.observe_at(observation.face_present, now) {
            candidates.push((ViolationKind::NoFace, alert.message()));
        }
        if let Detection::Detected(alert) = gaze.classify(observation) {
            candidates.push((ViolationKind::LookingAway, alert.message()));
        }

        for (kind, message) in candidates {
            let reported = match debouncer.try_acquire_at(DebounceKey::new(None, None, kind), now) {
                Some(permit) => {
                    permit.delivered_at(now);
                    true
                }
                None => false,
            };
            violations.push(ReplayViolation {
                frame,
                at_secs: *at,
                kind,
                reported,
                message,
            });
        }
    }
    violations
}

/// Replay a JSON-lines recording and print the violations it produces
///
/// # Errors
///
/// Returns an error if the config or the recording cannot be loaded
pub fn replay_gaze_command(config_path: Option<&Path>, file: &Path, fps: f64, json: bool) -> Result<()> {
    let config = Config::load(config_path)?;
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let frames = parse_observations(&text, fps)?;
    log::info!("Replaying {} frames from {}", frames.len(), file.display());

    let violations = replay(&frames, &config);

    if json {
        println!("{}", serde_json::to_string_pretty(&violations)?);
        return Ok(());
    }

    println!("\nReplay: {}", file.display());
    println!("{}", rule(28));
    if violations.is_empty() {
        println!("No violations in {} frames", frames.len());
        return Ok(());
    }
    let reported = violations.iter().filter(|v| v.reported).count();
    println!("\n{}", Table::new(&violations));
    println!(
        "\n{} violation(s) in {} frames, {reported} outside the cooldown",
        violations.len(),
        frames.len()
    );
    Ok(())
}
