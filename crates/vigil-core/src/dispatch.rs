use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use vigil_integrations::{ViolationNotifier, ViolationReport};

use crate::debounce::{DebounceKey, DebouncePermit, ViolationDebouncer};
use crate::error::VigilError;

/// What happened to a violation handed to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Inside the cooldown or already in flight for its key
    Suppressed,
    Delivered,
    /// Rejected, unreachable or timed out; logged and dropped
    Failed,
}

/// Debounced, timeout-bounded delivery of violation reports
///
/// Cloning shares the debouncer, so every monitor of a process sees the same
/// cooldowns.
#[derive(Clone)]
pub struct ViolationDispatcher {
    debouncer: ViolationDebouncer,
    notifier: Arc<dyn ViolationNotifier>,
    runtime: Handle,
    timeout: Duration,
}

impl ViolationDispatcher {
    #[must_use]
    pub fn new(
        notifier: Arc<dyn ViolationNotifier>,
        runtime: Handle,
        cooldown: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            debouncer: ViolationDebouncer::new(cooldown),
            notifier,
            runtime,
            timeout,
        }
    }

    #[must_use]
    pub const fn debouncer(&self) -> &ViolationDebouncer {
        &self.debouncer
    }

    #[must_use]
    pub fn notifier_name(&self) -> &'static str {
        self.notifier.system_name()
    }

    /// Queue a report for delivery without waiting for it
    ///
    /// Returns `false` if the report was suppressed by the debouncer. Safe to
    /// call from threads outside the runtime.
    pub fn dispatch(&self, report: ViolationReport) -> bool {
        let Some(permit) = self.debouncer.try_acquire(DebounceKey::for_report(&report)) else {
            return false;
        };

        let notifier = Arc::clone(&self.notifier);
        let timeout = self.timeout;
        self.runtime.spawn(async move {
            deliver(notifier.as_ref(), timeout, permit, &report).await;
        });
        true
    }

    /// Deliver a report and wait for the outcome
    pub async fn dispatch_now(&self, report: ViolationReport) -> DispatchOutcome {
        let Some(permit) = self.debouncer.try_acquire(DebounceKey::for_report(&report)) else {
            return DispatchOutcome::Suppressed;
        };
        deliver(self.notifier.as_ref(), self.timeout, permit, &report).await
    }
}

async fn deliver(
    notifier: &dyn ViolationNotifier,
    timeout: Duration,
    permit: DebouncePermit,
    report: &ViolationReport,
) -> DispatchOutcome {
    let result = match tokio::time::timeout(timeout, notifier.send(report)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(VigilError::Notification(format!(
            "{} failed to report {}: {e:#}",
            notifier.system_name(),
            report.kind
        ))),
        Err(_) => Err(VigilError::Notification(format!(
            "{} did not answer within {}s for {}",
            notifier.system_name(),
            timeout.as_secs_f64(),
            report.kind
        ))),
    };

    match result {
        Ok(()) => {
            permit.delivered();
            log::info!(
                "Reported {} for session {} via {}",
                report.kind,
                report.session_id,
                notifier.system_name()
            );
            DispatchOutcome::Delivered
        }
        Err(e) => {
            permit.failed();
            log::warn!("{e}");
            DispatchOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use vigil_integrations::ViolationKind;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<ViolationReport>>,
        reject: AtomicBool,
    }

    #[async_trait]
    impl ViolationNotifier for RecordingNotifier {
        async fn send(&self, report: &ViolationReport) -> anyhow::Result<()> {
            if self.reject.load(Ordering::SeqCst) {
                bail!("backend returned 503");
            }
            self.sent.lock().unwrap().push(report.clone());
            Ok(())
        }

        fn system_name(&self) -> &'static str {
            "recording"
        }
    }

    struct StalledNotifier;

    #[async_trait]
    impl ViolationNotifier for StalledNotifier {
        async fn send(&self, _report: &ViolationReport) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }

        fn system_name(&self) -> &'static str {
            "stalled"
        }
    }

    fn report(kind: ViolationKind) -> ViolationReport {
        ViolationReport::new(kind, "test", Some(1), Some(2), "session")
    }

    fn dispatcher(notifier: Arc<dyn ViolationNotifier>, timeout: Duration) -> ViolationDispatcher {
        ViolationDispatcher::new(notifier, Handle::current(), Duration::from_secs(5), timeout)
    }

    #[tokio::test]
    async fn test_delivered_report_arms_cooldown() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher(notifier.clone(), Duration::from_secs(5));

        assert_eq!(
            dispatcher.dispatch_now(report(ViolationKind::NoFace)).await,
            DispatchOutcome::Delivered
        );
        assert_eq!(
            dispatcher.dispatch_now(report(ViolationKind::NoFace)).await,
            DispatchOutcome::Suppressed
        );
        assert_eq!(
            dispatcher.dispatch_now(report(ViolationKind::LookingAway)).await,
            DispatchOutcome::Delivered
        );
        assert_eq!(notifier.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_report_allows_retry() {
        let notifier = Arc::new(RecordingNotifier::default());
        notifier.reject.store(true, Ordering::SeqCst);
        let dispatcher = dispatcher(notifier.clone(), Duration::from_secs(5));

        assert_eq!(
            dispatcher.dispatch_now(report(ViolationKind::SpeechDetected)).await,
            DispatchOutcome::Failed
        );

        notifier.reject.store(false, Ordering::SeqCst);
        assert_eq!(
            dispatcher.dispatch_now(report(ViolationKind::SpeechDetected)).await,
            DispatchOutcome::Delivered
        );
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let dispatcher = dispatcher(Arc::new(StalledNotifier), Duration::from_millis(50));

        assert_eq!(
            dispatcher.dispatch_now(report(ViolationKind::NoFace)).await,
            DispatchOutcome::Failed
        );
        let key = DebounceKey::new(Some(1), Some(2), ViolationKind::NoFace);
        assert!(dispatcher.debouncer().last_sent(&key).is_none());
    }

    #[tokio::test]
    async fn test_spawned_dispatch_delivers_in_background() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher(notifier.clone(), Duration::from_secs(5));

        assert!(dispatcher.dispatch(report(ViolationKind::LookingAway)));
        // Second candidate is suppressed while the first is in flight or cooling down
        assert!(!dispatcher.dispatch(report(ViolationKind::LookingAway)));

        for _ in 0..100 {
            if !notifier.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }
}
