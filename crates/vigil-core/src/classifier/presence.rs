use std::time::{Duration, Instant};

use crate::detector::Detection;

/// Face presence as seen by the consumer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    /// A face was seen in the most recent frame
    Present { last_seen: Instant },
    /// No face since `since`; `reported` once the episode raised a violation
    Absent { since: Instant, reported: bool },
}

/// Continuous absence that crossed the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsenceAlert {
    pub absent_for: Duration,
}

impl AbsenceAlert {
    #[must_use]
    pub fn message(&self) -> String {
        format!("Face not detected for {:.1} seconds", self.absent_for.as_secs_f64())
    }
}

/// Times continuous face absence
///
/// Edge-triggered: one alert per absence episode, re-armed when a face
/// reappears.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    threshold: Duration,
    state: PresenceState,
}

impl PresenceTracker {
    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            state: PresenceState::Present {
                last_seen: Instant::now(),
            },
        }
    }

    #[must_use]
    pub const fn state(&self) -> PresenceState {
        self.state
    }

    #[must_use]
    pub const fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Treat `now` as the last time a face was seen
    pub fn reset_at(&mut self, now: Instant) {
        self.state = PresenceState::Present { last_seen: now };
    }

    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    pub fn observe(&mut self, face_present: bool) -> Detection<AbsenceAlert> {
        self.observe_at(face_present, Instant::now())
    }

    /// Feed one processed frame observed at `now`
    pub fn observe_at(&mut self, face_present: bool, now: Instant) -> Detection<AbsenceAlert> {
        if face_present {
            self.state = PresenceState::Present { last_seen: now };
            return Detection::NotDetected;
        }

        match self.state {
            PresenceState::Present { last_seen } => {
                // The episode starts at the last sighting, not at the first empty frame
                self.state = PresenceState::Absent {
                    since: last_seen,
                    reported: false,
                };
                // A zero threshold fires on the first absent frame
                self.check_absence(now)
            }
            PresenceState::Absent { .. } => self.check_absence(now),
        }
    }

    fn check_absence(&mut self, now: Instant) -> Detection<AbsenceAlert> {
        let PresenceState::Absent { since, reported } = self.state else {
            return Detection::NotDetected;
        };
        if reported {
            return Detection::NotDetected;
        }

        let absent_for = now.saturating_duration_since(since);
        if absent_for < self.threshold {
            return Detection::NotDetected;
        }

        log::debug!("Face absent for {:.2}s", absent_for.as_secs_f64());
        self.state = PresenceState::Absent {
            since,
            reported: true,
        };
        Detection::Detected(AbsenceAlert { absent_for })
    }
}
