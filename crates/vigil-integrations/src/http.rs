//! HTTP utilities for the reporting backend.

use anyhow::Result;

/// Longest slice of an error body kept in error messages.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Extension trait for reqwest::Response to turn non-2xx replies into errors.
#[async_trait::async_trait]
pub trait ResponseExt {
    /// Ensure the response status is successful, returning an error with details if not.
    ///
    /// # Errors
    ///
    /// Returns an error if the response status is not successful (2xx),
    /// including the status code and the start of the response body.
    async fn ensure_success(self, endpoint: &str) -> Result<Self>
    where
        Self: Sized;
}

#[async_trait::async_trait]
impl ResponseExt for reqwest::Response {
    async fn ensure_success(self, endpoint: &str) -> Result<Self> {
        if !self.status().is_success() {
            let status = self.status();
            let body = self.text().await.unwrap_or_default();
            anyhow::bail!("{endpoint} rejected report ({status}): {}", truncate_body(&body));
        }
        Ok(self)
    }
}

/// Trim an error body to a loggable size (on char boundaries).
fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > MAX_ERROR_BODY_CHARS {
        let head: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{head}...")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body_short() {
        assert_eq!(truncate_body("  bad token \n"), "bad token");
    }

    #[test]
    fn test_truncate_body_long() {
        let body = "x".repeat(500);
        let out = truncate_body(&body);
        assert_eq!(out.len(), MAX_ERROR_BODY_CHARS + 3);
        assert!(out.ends_with("..."));
    }
}
