//! Client for the external feature-matching service
//!
//! The service exposes `GET /health` and `POST /compare`. Compare takes a
//! query image path on a filesystem both sides can see, plus the stored
//! descriptors of every candidate, and answers with the best match or none.

use archivart_core::MediaId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Matching service failures
#[derive(Debug, thiserror::Error)]
pub enum MatchingError {
    /// Transport failure or timeout
    #[error("matching service request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Service answered but reported failure
    #[error("matching service error: {0}")]
    Service(String),
}

/// Descriptors of one candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredDescriptors {
    /// Candidate media
    pub id: MediaId,
    /// Opaque descriptor payload
    pub descriptors: serde_json::Value,
}

/// Best candidate reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct MatchOutcome {
    /// Matched media
    pub id: MediaId,
    /// Similarity in `0.0..=1.0`
    #[serde(alias = "score")]
    pub similarity: f64,
    /// Matched feature count
    #[serde(default)]
    pub match_count: u32,
}

/// Human label for a similarity score
#[must_use]
pub fn similarity_label(score: f64) -> &'static str {
    if score >= 0.8 {
        "Very High"
    } else if score >= 0.6 {
        "High"
    } else if score >= 0.4 {
        "Medium"
    } else {
        "Low"
    }
}

/// Feature matcher seam
#[async_trait]
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Whether the service answers its health probe
    async fn is_healthy(&self) -> bool;

    /// Best match for the image at `query_image_path`
    ///
    /// `threshold` is a percentage; the service receives it as a fraction.
    async fn compare(
        &self,
        query_image_path: &Path,
        stored: &[StoredDescriptors],
        threshold: f64,
    ) -> Result<Option<MatchOutcome>, MatchingError>;
}

#[derive(Serialize)]
struct CompareRequest<'a> {
    query_image_path: &'a Path,
    stored_descriptors: &'a [StoredDescriptors],
    threshold: f64,
}

#[derive(Deserialize)]
struct CompareResponse {
    success: bool,
    #[serde(default)]
    best_match: Option<MatchOutcome>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the matching service
#[derive(Debug, Clone)]
pub struct HttpMatcher {
    client: reqwest::Client,
    base_url: String,
    health_timeout: Duration,
    compare_timeout: Duration,
}

impl HttpMatcher {
    /// Client for the service rooted at `base_url`
    #[must_use]
    pub fn new(base_url: impl Into<String>, health_timeout: Duration, compare_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            health_timeout,
            compare_timeout,
        }
    }
}

#[async_trait]
impl Matcher for HttpMatcher {
    async fn is_healthy(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(self.health_timeout)
            .send()
            .await;
        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!("matching service health check failed: {}", e);
                false
            }
        }
    }

    async fn compare(
        &self,
        query_image_path: &Path,
        stored: &[StoredDescriptors],
        threshold: f64,
    ) -> Result<Option<MatchOutcome>, MatchingError> {
        let request = CompareRequest {
            query_image_path,
            stored_descriptors: stored,
            threshold: (threshold / 100.0).clamp(0.0, 1.0),
        };
        tracing::debug!("comparing query image against {} candidates", stored.len());
        let response: CompareResponse = self
            .client
            .post(format!("{}/compare", self.base_url))
            .timeout(self.compare_timeout)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;
        if !response.success {
            return Err(MatchingError::Service(
                response.error.unwrap_or_else(|| "compare failed".to_string()),
            ));
        }
        Ok(response.best_match)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_follow_score_bands() {
        assert_eq!(similarity_label(1.0), "Very High");
        assert_eq!(similarity_label(0.8), "Very High");
        assert_eq!(similarity_label(0.6), "High");
        assert_eq!(similarity_label(0.45), "Medium");
        assert_eq!(similarity_label(0.1), "Low");
    }

    #[test]
    fn outcome_accepts_score_alias() {
        let outcome: MatchOutcome =
            serde_json::from_str(r#"{"id": 4, "score": 0.7, "match_count": 31}"#).unwrap();
        assert_eq!(outcome.id, MediaId(4));
        assert_eq!(outcome.similarity, 0.7);
    }

    #[tokio::test]
    async fn unreachable_service_is_unhealthy() {
        let matcher = HttpMatcher::new(
            "http://127.0.0.1:9",
            Duration::from_millis(200),
            Duration::from_millis(200),
        );
        assert!(!matcher.is_healthy().await);
    }
}
