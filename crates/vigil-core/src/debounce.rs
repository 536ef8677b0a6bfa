use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use vigil_integrations::{ViolationKind, ViolationReport};

/// Identity of a logical violation for cooldown purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DebounceKey {
    pub exam_id: Option<i64>,
    pub student_id: Option<i64>,
    pub kind: ViolationKind,
}

impl DebounceKey {
    #[must_use]
    pub const fn new(exam_id: Option<i64>, student_id: Option<i64>, kind: ViolationKind) -> Self {
        Self {
            exam_id,
            student_id,
            kind,
        }
    }

    #[must_use]
    pub const fn for_report(report: &ViolationReport) -> Self {
        Self::new(report.exam_id, report.student_id, report.kind)
    }
}

#[derive(Debug, Default)]
struct KeyState {
    last_sent: Option<Instant>,
    in_flight: bool,
}

type Entries = Arc<Mutex<HashMap<DebounceKey, KeyState>>>;

/// Per-key cooldown between successfully delivered notifications
///
/// Only a delivered notification arms the cooldown. While a send is in
/// flight, further candidates for the same key are suppressed.
#[derive(Debug, Clone)]
pub struct ViolationDebouncer {
    cooldown: Duration,
    entries: Entries,
}

impl ViolationDebouncer {
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn try_acquire(&self, key: DebounceKey) -> Option<DebouncePermit> {
        self.try_acquire_at(key, Instant::now())
    }

    /// Admit a candidate at `now`, or `None` if it must be suppressed
    ///
    /// The returned permit must be settled with [`DebouncePermit::delivered`]
    /// or [`DebouncePermit::failed`]; dropping it counts as a failure.
    pub fn try_acquire_at(&self, key: DebounceKey, now: Instant) -> Option<DebouncePermit> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let state = entries.entry(key).or_default();

        if state.in_flight {
            log::debug!("Suppressing {} for {key:?}: send in flight", key.kind);
            return None;
        }
        if let Some(last_sent) = state.last_sent {
            let elapsed = now.saturating_duration_since(last_sent);
            if elapsed < self.cooldown {
                log::debug!(
                    "Suppressing {} for {key:?}: {:.1}s since last report",
                    key.kind,
                    elapsed.as_secs_f64()
                );
                return None;
            }
        }

        state.in_flight = true;
        Some(DebouncePermit {
            key,
            entries: Arc::clone(&self.entries),
            settled: false,
        })
    }

    /// Time of the last delivered notification for `key`
    #[must_use]
    pub fn last_sent(&self, key: &DebounceKey) -> Option<Instant> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).and_then(|state| state.last_sent)
    }

    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    /// Forget keys whose cooldown has lapsed and that have nothing in flight
    pub fn prune_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, state| {
            state.in_flight
                || state
                    .last_sent
                    .is_some_and(|sent| now.saturating_duration_since(sent) < self.cooldown)
        });
        before - entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Right to send one notification for a key
#[derive(Debug)]
pub struct DebouncePermit {
    key: DebounceKey,
    entries: Entries,
    settled: bool,
}

impl DebouncePermit {
    #[must_use]
    pub const fn key(&self) -> DebounceKey {
        self.key
    }

    pub fn delivered(self) {
        self.delivered_at(Instant::now());
    }

    /// Record a successful send acknowledged at `now`, arming the cooldown
    pub fn delivered_at(mut self, now: Instant) {
        self.settle(Some(now));
    }

    /// Release the in-flight mark without arming the cooldown
    pub fn failed(mut self) {
        self.settle(None);
    }

    fn settle(&mut self, sent_at: Option<Instant>) {
        self.settled = true;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let state = entries.entry(self.key).or_default();
        state.in_flight = false;
        if let Some(now) = sent_at {
            state.last_sent = Some(now);
        }
    }
}

impl Drop for DebouncePermit {
    fn drop(&mut self) {
        if !self.settled {
            self.settle(None);
        }
    }
}
