use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use vigil_integrations::{ViolationKind, ViolationReport};

use crate::classifier::{GazeClassifier, PresenceTracker, SpeechClassifier};
use crate::config::Config;
use crate::detector::{Detection, LandmarkExtractor, VoiceActivityDetector};
use crate::dispatch::ViolationDispatcher;
use crate::error::{Result, VigilError};
use crate::frame::{Frame, FrameQueue};

/// Frames between two progress lines of the consumer
const PROGRESS_EVERY: u64 = 30;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Who is being monitored; copied into every report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorSubject {
    pub session_id: String,
    pub exam_id: Option<i64>,
    pub student_id: Option<i64>,
}

/// Snapshot of a monitor's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub frames_processed: u64,
    pub violations_raised: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    violations: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> MonitorStats {
        MonitorStats {
            frames_received: self.received.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            frames_processed: self.processed.load(Ordering::Relaxed),
            violations_raised: self.violations.load(Ordering::Relaxed),
        }
    }
}

/// Timing knobs the consumer needs, resolved once from config
#[derive(Debug, Clone, Copy)]
struct Timings {
    frame_wait: Duration,
    join_timeout: Duration,
    grace_period: Duration,
    voice_check_interval: Duration,
}

/// Frame-path detectors, touched only by the consumer (and by stop/release)
struct FrameStage {
    extractor: Box<dyn LandmarkExtractor>,
    presence: PresenceTracker,
    gaze: GazeClassifier,
}

impl FrameStage {
    fn evaluate(&mut self, frame: &Frame, now: Instant) -> Vec<(ViolationKind, String)> {
        let observation = match self.extractor.detect(frame) {
            Ok(observation) => observation,
            Err(e) => {
                log::warn!("{}", VigilError::from(e));
                self.gaze.reset();
                return Vec::new();
            }
        };

        let mut candidates = Vec::new();
        if let Detection::Detected(alert) = self.presence.observe_at(observation.face_present, now) {
            candidates.push((ViolationKind::NoFace, alert.message()));
        }
        if let Detection::Detected(alert) = self.gaze.classify(&observation) {
            candidates.push((ViolationKind::LookingAway, alert.message()));
        }
        candidates
    }
}

/// Everything shared between the monitor handle and its consumer thread
struct Shared {
    subject: MonitorSubject,
    timings: Timings,
    queue: FrameQueue,
    latest: Mutex<Option<Frame>>,
    stage: Mutex<FrameStage>,
    speech: Mutex<SpeechClassifier>,
    dispatcher: ViolationDispatcher,
    counters: Counters,
}

impl Shared {
    fn raise(&self, kind: ViolationKind, message: String) {
        self.counters.violations.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Session {}: {kind} violation ({message})",
            self.subject.session_id
        );

        let report = ViolationReport::new(
            kind,
            message,
            self.subject.exam_id,
            self.subject.student_id,
            self.subject.session_id.clone(),
        );
        if !self.dispatcher.dispatch(report) {
            log::debug!("Session {}: {kind} suppressed by cooldown", self.subject.session_id);
        }
    }
}

/// Running consumer thread and the means to stop it
struct Worker {
    stop: Arc<AtomicBool>,
    done: Receiver<()>,
    handle: JoinHandle<()>,
}

/// Real-time monitor for one session
///
/// Frames go through a bounded queue to a dedicated consumer thread that
/// runs presence and gaze detection and periodically checks the speech
/// state. Audio chunks are classified inline on the caller's thread.
pub struct Monitor {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    /// Consumer that missed the join timeout and may still be finishing a frame
    detached: Mutex<Option<JoinHandle<()>>>,
    released: AtomicBool,
}

impl Monitor {
    #[must_use]
    pub fn new(
        subject: MonitorSubject,
        config: &Config,
        extractor: Box<dyn LandmarkExtractor>,
        vad: Box<dyn VoiceActivityDetector>,
        dispatcher: ViolationDispatcher,
    ) -> Self {
        let timings = Timings {
            frame_wait: config.monitor.frame_wait_timeout(),
            join_timeout: config.monitor.join_timeout(),
            grace_period: config.monitor.startup_grace_period(),
            voice_check_interval: config.monitor.voice_check_interval(),
        };

        Self {
            shared: Arc::new(Shared {
                subject,
                timings,
                queue: FrameQueue::new(config.monitor.queue_capacity),
                latest: Mutex::new(None),
                stage: Mutex::new(FrameStage {
                    extractor,
                    presence: PresenceTracker::new(config.monitor.face_absence_threshold()),
                    gaze: GazeClassifier::new(&config.gaze),
                }),
                speech: Mutex::new(SpeechClassifier::new(vad, &config.speech)),
                dispatcher,
                counters: Counters::default(),
            }),
            worker: Mutex::new(None),
            detached: Mutex::new(None),
            released: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn subject(&self) -> &MonitorSubject {
        &self.shared.subject
    }

    /// Start the consumer thread; does nothing if it is already running
    ///
    /// Returns `false` if the monitor was released, a consumer detached by
    /// [`Monitor::stop`] is still running, or the thread could not be spawned.
    pub fn start(&self) -> bool {
        if self.released.load(Ordering::SeqCst) {
            log::warn!("Session {}: monitor already released", self.shared.subject.session_id);
            return false;
        }

        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return true;
        }
        if !self.reap_detached() {
            log::warn!(
                "Session {}: previous consumer is still running, not starting another",
                self.shared.subject.session_id
            );
            return false;
        }

        let started = Instant::now();
        lock(&self.shared.stage).presence.reset_at(started);

        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done) = mpsc::channel();
        let consumer = Consumer {
            shared: Arc::clone(&self.shared),
            stop: Arc::clone(&stop),
            started,
        };
        let spawned = std::thread::Builder::new()
            .name(format!("vigil-monitor-{}", self.shared.subject.session_id))
            .spawn(move || {
                consumer.run();
                let _ = done_tx.send(());
            });

        match spawned {
            Ok(handle) => {
                *worker = Some(Worker { stop, done, handle });
                log::info!("Session {}: monitoring started", self.shared.subject.session_id);
                true
            }
            Err(e) => {
                log::error!("Failed to spawn monitor thread: {e}");
                false
            }
        }
    }

    /// Stop the consumer and drop queued frames
    ///
    /// Waits for the consumer at most the configured join timeout, then
    /// proceeds regardless. A consumer that is still busy is detached and
    /// keeps the frame stage until it exits.
    pub fn stop(&self) {
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };
        worker.stop.store(true, Ordering::SeqCst);

        let joined = match worker.done.recv_timeout(self.shared.timings.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    log::error!("Session {}: monitor thread panicked", self.shared.subject.session_id);
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Session {}: consumer did not exit within {:?}, detaching",
                    self.shared.subject.session_id,
                    self.shared.timings.join_timeout
                );
                *lock(&self.detached) = Some(worker.handle);
                false
            }
        };

        let purged = self.shared.queue.purge();
        *lock(&self.shared.latest) = None;
        if joined {
            // A detached consumer may hold the stage; start() resets presence instead
            lock(&self.shared.stage).presence.reset();
        }
        log::info!(
            "Session {}: monitoring stopped ({purged} queued frames dropped)",
            self.shared.subject.session_id
        );
    }

    /// Join a detached consumer if it has exited; `false` while it still runs
    fn reap_detached(&self) -> bool {
        let mut detached = lock(&self.detached);
        match detached.take() {
            Some(handle) if !handle.is_finished() => {
                *detached = Some(handle);
                false
            }
            Some(handle) => {
                if handle.join().is_err() {
                    log::error!("Session {}: monitor thread panicked", self.shared.subject.session_id);
                }
                true
            }
            None => true,
        }
    }

    /// Stop and reset every classifier; the monitor cannot be restarted
    pub fn release(&self) {
        self.stop();
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut stage = lock(&self.shared.stage);
            stage.gaze.reset();
            stage.extractor.release();
        }
        lock(&self.shared.speech).release();
        log::info!("Session {}: monitor released", self.shared.subject.session_id);
    }

    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        lock(&self.worker)
            .as_ref()
            .is_some_and(|w| !w.stop.load(Ordering::SeqCst) && !w.handle.is_finished())
    }

    /// Enqueue a frame without blocking; `false` if it was dropped
    pub fn submit_frame(&self, frame: Frame) -> bool {
        let counters = &self.shared.counters;
        counters.received.fetch_add(1, Ordering::Relaxed);

        if self.shared.queue.push(frame) {
            return true;
        }
        counters.dropped.fetch_add(1, Ordering::Relaxed);
        log::warn!(
            "Session {}: frame queue full ({}), dropping frame",
            self.shared.subject.session_id,
            self.shared.queue.capacity()
        );
        false
    }

    /// Classify a PCM16 LE mono chunk at 16 kHz on the calling thread
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an empty or odd-length chunk.
    pub fn submit_audio_chunk(&self, bytes: &[u8]) -> Result<bool> {
        if bytes.is_empty() {
            return Err(VigilError::InvalidInput("empty audio chunk".to_string()));
        }
        if bytes.len() % 2 != 0 {
            return Err(VigilError::InvalidInput(format!(
                "audio chunk of {} bytes is not whole PCM16 samples",
                bytes.len()
            )));
        }

        Ok(lock(&self.shared.speech).process_chunk(bytes))
    }

    /// Copy of the most recently dequeued frame
    #[must_use]
    pub fn latest_frame(&self) -> Option<Frame> {
        lock(&self.shared.latest).clone()
    }

    #[must_use]
    pub fn stats(&self) -> MonitorStats {
        self.shared.counters.snapshot()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(worker) = lock(&self.worker).take() {
            worker.stop.store(true, Ordering::SeqCst);
        }
    }
}

/// Body of the consumer thread
struct Consumer {
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    started: Instant,
}

impl Consumer {
    fn run(self) {
        let timings = self.shared.timings;
        let mut last_voice_check = self.started;

        while !self.stop.load(Ordering::SeqCst) {
            let Some(frame) = self.shared.queue.pop_timeout(timings.frame_wait) else {
                log::debug!("Session {}: waiting for frames", self.shared.subject.session_id);
                continue;
            };

            let processed = self.shared.counters.processed.fetch_add(1, Ordering::Relaxed) + 1;
            if processed % PROGRESS_EVERY == 0 {
                log::info!(
                    "Session {}: processed {processed} frames",
                    self.shared.subject.session_id
                );
            }
            *lock(&self.shared.latest) = Some(frame.clone());

            let now = Instant::now();
            if now.saturating_duration_since(self.started) < timings.grace_period {
                lock(&self.shared.stage).presence.reset_at(now);
                last_voice_check = now;
                continue;
            }

            let candidates = lock(&self.shared.stage).evaluate(&frame, now);
            for (kind, message) in candidates {
                self.shared.raise(kind, message);
            }

            if now.saturating_duration_since(last_voice_check) >= timings.voice_check_interval {
                last_voice_check = now;
                let speaking = lock(&self.shared.speech).speech_active_at(now);
                if speaking {
                    self.shared
                        .raise(ViolationKind::SpeechDetected, "Human speech detected".to_string());
                }
            }
        }

        log::debug!("Session {}: consumer exiting", self.shared.subject.session_id);
    }
}
