use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::SessionConfig;

/// Bytes of OS entropy behind each session token
const TOKEN_BYTES: usize = 16;

/// One monitoring session of a student in an exam
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub active: bool,
    pub exam_id: Option<i64>,
    pub student_id: Option<i64>,
}

impl Session {
    /// Whether cleanup at `now` would evict this session
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        !self.active || now.signed_duration_since(self.last_seen) > ttl
    }
}

/// Random URL-safe token (lowercase hex)
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let mut token = String::with_capacity(TOKEN_BYTES * 2);
    for byte in bytes {
        let _ = write!(token, "{byte:02x}");
    }
    token
}

/// In-memory registry of monitoring sessions
///
/// Every operation holds the single map lock for its whole duration, and the
/// wall-clock variants read the clock inside that lock.
pub struct SessionRegistry {
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.ttl())
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new active session and return its id
    pub fn create(&self, exam_id: Option<i64>, student_id: Option<i64>) -> String {
        let mut sessions = self.lock();
        Self::insert(&mut sessions, exam_id, student_id, Utc::now())
    }

    pub fn create_at(
        &self,
        exam_id: Option<i64>,
        student_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> String {
        let mut sessions = self.lock();
        Self::insert(&mut sessions, exam_id, student_id, now)
    }

    fn insert(
        sessions: &mut HashMap<String, Session>,
        exam_id: Option<i64>,
        student_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> String {
        let mut id = generate_token();
        while sessions.contains_key(&id) {
            id = generate_token();
        }

        sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                created_at: now,
                last_seen: now,
                active: true,
                exam_id,
                student_id,
            },
        );
        log::info!("Created session {id} (exam {exam_id:?}, student {student_id:?})");
        id
    }

    /// Refresh `last_seen` of an active session
    ///
    /// Returns the updated snapshot, or `None` if the session is unknown or
    /// stopped (in which case nothing changes).
    pub fn touch(&self, id: &str) -> Option<Session> {
        let mut sessions = self.lock();
        Self::refresh(&mut sessions, id, Utc::now())
    }

    pub fn touch_at(&self, id: &str, now: DateTime<Utc>) -> Option<Session> {
        let mut sessions = self.lock();
        Self::refresh(&mut sessions, id, now)
    }

    fn refresh(
        sessions: &mut HashMap<String, Session>,
        id: &str,
        now: DateTime<Utc>,
    ) -> Option<Session> {
        let session = sessions.get_mut(id).filter(|s| s.active)?;
        // last_seen never moves backwards
        session.last_seen = session.last_seen.max(now);
        Some(session.clone())
    }

    /// Mark a session inactive; returns whether it existed
    pub fn stop(&self, id: &str) -> bool {
        let mut sessions = self.lock();
        match sessions.get_mut(id) {
            Some(session) => {
                session.active = false;
                log::info!("Stopped session {id}");
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        self.lock().get(id).cloned()
    }

    /// Evict expired or stopped sessions, returning the evicted ids
    pub fn cleanup(&self) -> Vec<String> {
        let mut sessions = self.lock();
        let now = Utc::now();
        Self::evict(&mut sessions, now, self.ttl)
    }

    pub fn cleanup_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut sessions = self.lock();
        Self::evict(&mut sessions, now, self.ttl)
    }

    fn evict(sessions: &mut HashMap<String, Session>, now: DateTime<Utc>, ttl: Duration) -> Vec<String> {
        let expired: Vec<String> = sessions
            .values()
            .filter(|s| s.is_expired(now, ttl))
            .map(|s| s.id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        if !expired.is_empty() {
            log::info!("Evicted {} session(s), {} remaining", expired.len(), sessions.len());
        }
        expired
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock().values().filter(|s| s.active).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn at(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, min, sec).unwrap()
    }

    #[test]
    fn test_tokens_are_unique_hex() {
        let registry = SessionRegistry::new(Duration::hours(4));
        let ids: HashSet<String> = (0..200).map(|_| registry.create(None, None)).collect();

        assert_eq!(ids.len(), 200);
        for id in &ids {
            assert_eq!(id.len(), 32);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_touch_updates_last_seen() {
        let registry = SessionRegistry::new(Duration::hours(4));
        let id = registry.create_at(Some(1), Some(2), at(9, 0, 0));

        let session = registry.touch_at(&id, at(9, 30, 0)).unwrap();
        assert_eq!(session.last_seen, at(9, 30, 0));
        assert_eq!(session.created_at, at(9, 0, 0));
        assert_eq!(registry.get(&id).unwrap().last_seen, at(9, 30, 0));
    }

    #[test]
    fn test_last_seen_is_monotonic() {
        let registry = SessionRegistry::new(Duration::hours(4));
        let id = registry.create_at(None, None, at(9, 0, 0));
        registry.touch_at(&id, at(10, 0, 0));

        let session = registry.touch_at(&id, at(9, 15, 0)).unwrap();
        assert_eq!(session.last_seen, at(10, 0, 0));
    }

    #[test]
    fn test_touch_after_stop_is_noop() {
        let registry = SessionRegistry::new(Duration::hours(4));
        let id = registry.create_at(None, None, at(9, 0, 0));

        assert!(registry.stop(&id));
        assert!(registry.touch_at(&id, at(9, 5, 0)).is_none());
        let session = registry.get(&id).unwrap();
        assert!(!session.active);
        assert_eq!(session.last_seen, at(9, 0, 0));

        assert!(!registry.stop("unknown"));
        assert!(registry.touch("unknown").is_none());
    }

    #[test]
    fn test_cleanup_evicts_expired_and_stopped() {
        let registry = SessionRegistry::new(Duration::hours(4));
        let stale = registry.create_at(None, None, at(8, 0, 0));
        let stopped = registry.create_at(None, None, at(11, 0, 0));
        let fresh = registry.create_at(None, None, at(11, 0, 0));
        registry.stop(&stopped);

        let mut evicted = registry.cleanup_at(at(12, 0, 1));
        evicted.sort();
        let mut expected = vec![stale, stopped];
        expected.sort();

        assert_eq!(evicted, expected);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&fresh).is_some());
    }

    #[test]
    fn test_exactly_ttl_idle_is_kept() {
        let registry = SessionRegistry::new(Duration::hours(4));
        let id = registry.create_at(None, None, at(8, 0, 0));

        assert!(registry.cleanup_at(at(12, 0, 0)).is_empty());
        assert_eq!(registry.cleanup_at(at(12, 0, 1)), vec![id]);
    }

    #[test]
    fn test_session_touched_before_scan_survives() {
        let registry = SessionRegistry::new(Duration::hours(4));
        let id = registry.create_at(None, None, at(8, 0, 0));

        registry.touch_at(&id, at(12, 30, 0));
        assert!(registry.cleanup_at(at(12, 30, 0)).is_empty());
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_concurrent_touch_never_lost_to_cleanup() {
        let registry = Arc::new(SessionRegistry::new(Duration::seconds(2)));
        let id = registry.create(None, None);
        let done = Arc::new(AtomicBool::new(false));

        let toucher = {
            let registry = Arc::clone(&registry);
            let done = Arc::clone(&done);
            let id = id.clone();
            std::thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    assert!(registry.touch(&id).is_some());
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
            })
        };

        for _ in 0..200 {
            assert!(registry.cleanup().is_empty());
            std::thread::sleep(std::time::Duration::from_micros(500));
        }
        done.store(true, Ordering::SeqCst);
        toucher.join().unwrap();
        assert!(registry.get(&id).is_some());
    }
}
