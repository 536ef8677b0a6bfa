use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::http::ResponseExt;
use crate::signing::{sign_payload, SIGNATURE_HEADER};
use crate::traits::{ViolationNotifier, ViolationReport};

/// Path of the violation intake endpoint, relative to the backend base URL
const VIOLATIONS_PATH: &str = "/api/anti-cheat/violations";

// ============================================================================
// Backend Reporter
// ============================================================================

/// HTTP client that forwards violation reports to the exam backend
pub struct BackendReporter {
    endpoint: String,
    bearer_token: Option<String>,
    signing_secret: Option<String>,
    client: reqwest::Client,
}

impl BackendReporter {
    /// Create a new backend reporter
    ///
    /// # Arguments
    /// * `base_url` - Backend root URL (trailing slash optional)
    /// * `bearer_token` - Optional token sent as `Authorization: Bearer ...`
    /// * `signing_secret` - Optional secret used to sign request bodies
    /// * `timeout` - Whole-request timeout, including connect
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created
    pub fn new(
        base_url: &str,
        bearer_token: Option<String>,
        signing_secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let endpoint = format!("{}{VIOLATIONS_PATH}", base_url.trim_end_matches('/'));

        Ok(Self {
            endpoint,
            bearer_token: bearer_token.filter(|t| !t.is_empty()),
            signing_secret: signing_secret.filter(|s| !s.is_empty()),
            client,
        })
    }

    /// Full URL reports are posted to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build the authenticated (and optionally signed) POST for a report
    fn request(&self, report: &ViolationReport) -> Result<reqwest::RequestBuilder> {
        let body = serde_json::to_vec(report).context("Failed to serialize violation report")?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json");

        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        if let Some(secret) = &self.signing_secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(&body, secret));
        }

        Ok(request.body(body))
    }
}

#[async_trait]
impl ViolationNotifier for BackendReporter {
    async fn send(&self, report: &ViolationReport) -> Result<()> {
        log::debug!("POST {} ({} for session {})", self.endpoint, report.kind, report.session_id);

        self.request(report)?
            .send()
            .await
            .context("Failed to send violation report")?
            .ensure_success("Violation backend")
            .await?;

        Ok(())
    }

    fn system_name(&self) -> &'static str {
        "backend"
    }
}

// ============================================================================
// Log-only Notifier
// ============================================================================

/// Notifier that only writes reports to the log
///
/// Used when no backend is configured; every report counts as delivered.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl ViolationNotifier for LogNotifier {
    async fn send(&self, report: &ViolationReport) -> Result<()> {
        log::info!(
            "Violation [{}] exam={:?} student={:?} session={}: {}",
            report.kind,
            report.exam_id,
            report.student_id,
            report.session_id,
            report.message
        );
        Ok(())
    }

    fn system_name(&self) -> &'static str {
        "log"
    }
}
