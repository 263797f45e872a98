//! HTTP client for the external job recommendation service

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AppError, Result};

/// Client for the recommendation service. Calls are bounded by a
/// per-request timeout and never hold store locks while in flight.
pub struct RecommendClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl RecommendClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            timeout,
        }
    }

    /// Fetch recommendations for a profile. A timeout is reported as its
    /// own retryable failure class, distinct from other upstream errors.
    pub async fn recommendations(
        &self,
        request: RecommendationRequest,
    ) -> Result<RecommendationResponse> {
        let response = self
            .client
            .post(format!("{}/recommendations", self.base_url))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::UpstreamTimeout(format!("Recommendation service timed out: {}", e))
                } else {
                    AppError::Upstream(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "Failed to fetch recommendations: {} - {}",
                status, text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Upstream(e.to_string()))
    }
}

// Request/Response types

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RecommendationRequest {
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experience_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_sponsorship: Option<bool>,
    #[serde(default)]
    pub preferred_locations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_salary: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_preference: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_job_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub recommendations: Vec<serde_json::Value>,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recommend_client_new() {
        let client = RecommendClient::new("http://localhost:8000", Duration::from_secs(10));
        assert_eq!(client.base_url, "http://localhost:8000");
        assert_eq!(client.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_request_serialization() {
        let request = RecommendationRequest {
            skills: vec!["rust".to_string(), "sql".to_string()],
            experience_level: Some("mid".to_string()),
            needs_sponsorship: Some(false),
            preferred_locations: vec!["Berlin".to_string()],
            min_salary: Some(90000.0),
            remote_preference: Some(true),
            desired_job_role: Some("Backend Engineer".to_string()),
            filters: None,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"skills\":[\"rust\",\"sql\"]"));
        assert!(json.contains("\"experience_level\":\"mid\""));
        assert!(json.contains("\"remote_preference\":true"));
        // absent filters are omitted
        assert!(!json.contains("filters"));
    }

    #[test]
    fn test_request_deserialization_with_defaults() {
        let request: RecommendationRequest =
            serde_json::from_str(r#"{"desired_job_role": "Data Engineer"}"#).unwrap();
        assert!(request.skills.is_empty());
        assert!(request.preferred_locations.is_empty());
        assert_eq!(request.desired_job_role.as_deref(), Some("Data Engineer"));
    }

    #[test]
    fn test_response_deserialization() {
        let json = r#"{"recommendations": [{"title": "Backend Engineer"}], "total": 1}"#;
        let response: RecommendationResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.recommendations.len(), 1);
        assert_eq!(response.recommendations[0]["title"], "Backend Engineer");
    }
}
