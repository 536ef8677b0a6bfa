use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use vigil_integrations::{BackendReporter, LogNotifier, ViolationNotifier};

use crate::config::{Config, ReporterConfig, SpeechConfig};
use crate::detector::{EnergyVad, LandmarkExtractor, VoiceActivityDetector};
use crate::dispatch::ViolationDispatcher;
use crate::error::{DetectorError, Result, VigilError};
use crate::frame::Frame;
use crate::pipeline::{Monitor, MonitorStats, MonitorSubject};
use crate::session_manager::{Session, SessionRegistry};

/// Backend reporter when a base URL is configured, log-only notifier otherwise
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be created
pub fn notifier_from_config(config: &ReporterConfig) -> anyhow::Result<Arc<dyn ViolationNotifier>> {
    match config.base_url.as_deref().filter(|url| !url.is_empty()) {
        Some(base_url) => {
            let reporter = BackendReporter::new(
                base_url,
                config.bearer_token.clone(),
                config.signing_secret.clone(),
                config.timeout(),
            )?;
            log::debug!("Reporting violations to {}", reporter.endpoint());
            Ok(Arc::new(reporter))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}

/// Builds fresh detector primitives for each monitored session
pub trait DetectorFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the landmark model cannot be loaded
    fn landmark_extractor(&self) -> std::result::Result<Box<dyn LandmarkExtractor>, DetectorError>;

    /// # Errors
    ///
    /// Returns an error if the voice-activity primitive cannot be created
    fn voice_detector(
        &self,
        config: &SpeechConfig,
    ) -> std::result::Result<Box<dyn VoiceActivityDetector>, DetectorError> {
        Ok(Box::new(EnergyVad::new(config.energy_vad_threshold)))
    }
}

/// Process-wide proctoring context
///
/// Owns the session registry, the shared violation dispatcher and one
/// [`Monitor`] per session. Request handlers hold it behind an `Arc`.
pub struct Vigil {
    config: Config,
    sessions: SessionRegistry,
    dispatcher: ViolationDispatcher,
    detectors: Arc<dyn DetectorFactory>,
    monitors: Mutex<HashMap<String, Arc<Monitor>>>,
    runtime: Handle,
    shutdown_signal: Arc<AtomicBool>,
}

impl Vigil {
    #[must_use]
    pub fn new(
        config: Config,
        notifier: Arc<dyn ViolationNotifier>,
        detectors: Arc<dyn DetectorFactory>,
        runtime: Handle,
    ) -> Self {
        let dispatcher = ViolationDispatcher::new(
            notifier,
            runtime.clone(),
            config.debounce.cooldown(),
            config.reporter.timeout(),
        );
        log::info!("Violations will be reported via {}", dispatcher.notifier_name());

        Self {
            sessions: SessionRegistry::from_config(&config.sessions),
            config,
            dispatcher,
            detectors,
            monitors: Mutex::new(HashMap::new()),
            runtime,
            shutdown_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &ViolationDispatcher {
        &self.dispatcher
    }

    fn monitors(&self) -> MutexGuard<'_, HashMap<String, Arc<Monitor>>> {
        self.monitors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a session and start monitoring it
    ///
    /// # Errors
    ///
    /// Returns `DetectorUnavailable` if the detector primitives cannot be
    /// built or the monitor cannot be started; the session is not kept in
    /// that case.
    pub fn create_session(&self, exam_id: Option<i64>, student_id: Option<i64>) -> Result<String> {
        if self.shutdown_signal.load(Ordering::SeqCst) {
            return Err(VigilError::InvalidInput("service is shutting down".to_string()));
        }

        let id = self.sessions.create(exam_id, student_id);
        let detectors = self.detectors.landmark_extractor().and_then(|extractor| {
            let vad = self.detectors.voice_detector(&self.config.speech)?;
            Ok((extractor, vad))
        });
        let (extractor, vad) = match detectors {
            Ok(pair) => pair,
            Err(e) => {
                self.sessions.stop(&id);
                return Err(e.into());
            }
        };

        let monitor = Arc::new(Monitor::new(
            MonitorSubject {
                session_id: id.clone(),
                exam_id,
                student_id,
            },
            &self.config,
            extractor,
            vad,
            self.dispatcher.clone(),
        ));
        self.launch(&id, monitor)?;
        Ok(id)
    }

    /// Start `monitor` and file it under `id`, stopping the session if it cannot run
    fn launch(&self, id: &str, monitor: Arc<Monitor>) -> Result<()> {
        if !monitor.start() {
            self.sessions.stop(id);
            return Err(VigilError::DetectorUnavailable(DetectorError::new(
                "monitor",
                format!("consumer for session {id} could not be started"),
            )));
        }
        self.monitors().insert(id.to_string(), monitor);
        Ok(())
    }

    pub fn touch_session(&self, id: &str) -> Option<Session> {
        self.sessions.touch(id)
    }

    #[must_use]
    pub fn session(&self, id: &str) -> Option<Session> {
        self.sessions.get(id)
    }

    /// Stop a session and release its monitor; `false` if it is unknown
    pub fn stop_session(&self, id: &str) -> bool {
        let existed = self.sessions.stop(id);
        let monitor = self.monitors().remove(id);
        if let Some(monitor) = monitor {
            monitor.release();
        }
        existed
    }

    /// Monitor of an active session, refreshing its `last_seen`
    fn active_monitor(&self, id: &str) -> Result<Arc<Monitor>> {
        if self.sessions.touch(id).is_none() {
            return Err(VigilError::InvalidInput(format!("unknown or stopped session {id}")));
        }
        self.monitors()
            .get(id)
            .cloned()
            .ok_or_else(|| VigilError::InvalidInput(format!("session {id} has no monitor")))
    }

    /// Queue a frame for the session's monitor; `Ok(false)` if it was dropped
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an unknown or stopped session.
    pub fn submit_frame(&self, id: &str, frame: Frame) -> Result<bool> {
        Ok(self.active_monitor(id)?.submit_frame(frame))
    }

    /// Classify an audio chunk for the session; `Ok(true)` while speaking
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an unknown session or a malformed chunk.
    pub fn submit_audio_chunk(&self, id: &str, bytes: &[u8]) -> Result<bool> {
        self.active_monitor(id)?.submit_audio_chunk(bytes)
    }

    /// # Errors
    ///
    /// Returns `InvalidInput` for an unknown or stopped session.
    pub fn latest_frame(&self, id: &str) -> Result<Option<Frame>> {
        Ok(self.active_monitor(id)?.latest_frame())
    }

    #[must_use]
    pub fn monitor_stats(&self, id: &str) -> Option<MonitorStats> {
        self.monitors().get(id).map(|m| m.stats())
    }

    /// Evict expired and stopped sessions and release their monitors
    pub fn cleanup(&self) -> usize {
        let evicted = self.sessions.cleanup();
        let released: Vec<Arc<Monitor>> = {
            let mut monitors = self.monitors();
            evicted.iter().filter_map(|id| monitors.remove(id)).collect()
        };
        for monitor in released {
            monitor.release();
        }

        let pruned = self.dispatcher.debouncer().prune();
        if pruned > 0 {
            log::debug!("Pruned {pruned} lapsed cooldown entries");
        }
        evicted.len()
    }

    /// Run [`Vigil::cleanup`] every `every` until [`Vigil::shutdown`]
    pub fn spawn_cleanup_task(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let vigil = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown_signal);
        self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately
            ticker.tick().await;
            log::info!("Session cleanup every {}s", every.as_secs_f64());

            loop {
                ticker.tick().await;
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }

                let vigil = Arc::clone(&vigil);
                match tokio::task::spawn_blocking(move || vigil.cleanup()).await {
                    Ok(0) => {}
                    Ok(evicted) => log::info!("Cleanup evicted {evicted} session(s)"),
                    Err(e) => log::error!("Session cleanup failed: {e}"),
                }
            }
            log::debug!("Session cleanup task stopped");
        })
    }

    /// Stop every session and release all monitors
    pub fn shutdown(&self) {
        if self.shutdown_signal.swap(true, Ordering::SeqCst) {
            return;
        }

        let monitors: Vec<(String, Arc<Monitor>)> = self.monitors().drain().collect();
        for (id, monitor) in monitors {
            self.sessions.stop(&id);
            monitor.release();
        }
        log::info!("Vigil shut down gracefully.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::FaceObservation;
    use tokio::runtime::Runtime;

    struct NoFaceDetectors;

    struct NoFace;

    impl LandmarkExtractor for NoFace {
        fn detect(&mut self, _frame: &Frame) -> std::result::Result<FaceObservation, DetectorError> {
            Ok(FaceObservation::absent())
        }
    }

    impl DetectorFactory for NoFaceDetectors {
        fn landmark_extractor(&self) -> std::result::Result<Box<dyn LandmarkExtractor>, DetectorError> {
            Ok(Box::new(NoFace))
        }
    }

    struct MissingModel;

    impl DetectorFactory for MissingModel {
        fn landmark_extractor(&self) -> std::result::Result<Box<dyn LandmarkExtractor>, DetectorError> {
            Err(DetectorError::new("face-mesh", "model file not found"))
        }
    }

    fn vigil(runtime: &Runtime, detectors: Arc<dyn DetectorFactory>) -> Vigil {
        let mut config = Config::default();
        config.monitor.frame_wait_timeout_ms = 20;
        Vigil::new(config, Arc::new(LogNotifier), detectors, runtime.handle().clone())
    }

    #[test]
    fn test_session_lifecycle() {
        let runtime = Runtime::new().unwrap();
        let vigil = vigil(&runtime, Arc::new(NoFaceDetectors));

        let id = vigil.create_session(Some(3), Some(4)).unwrap();
        assert!(vigil.touch_session(&id).is_some());
        assert!(vigil.submit_frame(&id, Frame::from_rgb(1, 1, vec![0; 3]).unwrap()).unwrap());
        assert!(vigil.monitor_stats(&id).is_some());

        assert!(vigil.stop_session(&id));
        assert!(vigil.touch_session(&id).is_none());
        assert!(matches!(
            vigil.submit_frame(&id, Frame::from_rgb(1, 1, vec![0; 3]).unwrap()),
            Err(VigilError::InvalidInput(_))
        ));
        assert!(vigil.monitor_stats(&id).is_none());

        assert_eq!(vigil.cleanup(), 1);
        assert!(vigil.session(&id).is_none());
        assert!(!vigil.stop_session(&id));
    }

    #[test]
    fn test_unknown_session_is_invalid_input() {
        let runtime = Runtime::new().unwrap();
        let vigil = vigil(&runtime, Arc::new(NoFaceDetectors));

        assert!(matches!(
            vigil.submit_audio_chunk("nope", &[0; 960]),
            Err(VigilError::InvalidInput(_))
        ));
        assert!(vigil.latest_frame("nope").is_err());
    }

    #[test]
    fn test_monitor_that_cannot_start_discards_session() {
        let runtime = Runtime::new().unwrap();
        let vigil = vigil(&runtime, Arc::new(NoFaceDetectors));

        let id = vigil.sessions().create(Some(5), Some(6));
        let monitor = Arc::new(Monitor::new(
            MonitorSubject {
                session_id: id.clone(),
                exam_id: Some(5),
                student_id: Some(6),
            },
            vigil.config(),
            Box::new(NoFace),
            Box::new(EnergyVad::new(vigil.config().speech.energy_vad_threshold)),
            vigil.dispatcher().clone(),
        ));
        monitor.release();

        let err = vigil.launch(&id, monitor).unwrap_err();
        assert!(matches!(err, VigilError::DetectorUnavailable(_)));
        assert!(vigil.touch_session(&id).is_none());
        assert!(vigil.monitor_stats(&id).is_none());
        assert_eq!(vigil.sessions().active_count(), 0);
    }

    #[test]
    fn test_detector_failure_discards_session() {
        let runtime = Runtime::new().unwrap();
        let vigil = vigil(&runtime, Arc::new(MissingModel));

        let err = vigil.create_session(Some(1), Some(1)).unwrap_err();
        assert!(matches!(err, VigilError::DetectorUnavailable(_)));
        assert_eq!(vigil.sessions().active_count(), 0);
    }

    #[test]
    fn test_notifier_follows_reporter_config() {
        let mut reporter = ReporterConfig::default();
        assert_eq!(notifier_from_config(&reporter).unwrap().system_name(), "log");

        reporter.base_url = Some("https://exam.example".to_string());
        assert_eq!(notifier_from_config(&reporter).unwrap().system_name(), "backend");
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let runtime = Runtime::new().unwrap();
        let vigil = vigil(&runtime, Arc::new(NoFaceDetectors));
        let first = vigil.create_session(None, None).unwrap();
        let second = vigil.create_session(None, None).unwrap();

        vigil.shutdown();
        assert!(vigil.touch_session(&first).is_none());
        assert!(vigil.touch_session(&second).is_none());
        assert!(vigil.create_session(None, None).is_err());
        assert_eq!(vigil.cleanup(), 2);
    }
}
