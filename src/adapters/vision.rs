//! HTTP client for the AI vision/caption generator service.
//!
//! The model itself is an external collaborator; this client only shapes
//! the request/response envelope the pipeline depends on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::Platform;

use super::{ConfigurationError, DraftGenerator, GeneratedCopy, PlatformError};

/// Generator service client
pub struct VisionClient {
    endpoint: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    photo_ref: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis: Option<&'a GeneratedCopy>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    title: Option<String>,
    body: String,
    #[serde(default)]
    tags: Vec<String>,
}

impl VisionClient {
    /// Create a client with an explicit endpoint
    pub fn new(endpoint: String, token: String) -> Self {
        Self {
            endpoint,
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Create from environment variables, failing fast when missing
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let endpoint = std::env::var("VISION_ENDPOINT")
            .map_err(|_| ConfigurationError("VISION_ENDPOINT".to_string()))?;
        let token = std::env::var("VISION_TOKEN")
            .map_err(|_| ConfigurationError("VISION_TOKEN".to_string()))?;
        Ok(Self::new(endpoint, token))
    }

    async fn generate(&self, request: &GenerateRequest<'_>) -> Result<GeneratedCopy, PlatformError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PlatformError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateResponse = response.json().await?;
        Ok(GeneratedCopy {
            title: body.title,
            body: body.body,
            tags: body.tags,
        })
    }
}

#[async_trait]
impl DraftGenerator for VisionClient {
    async fn analyze_photo(&self, photo_ref: &str) -> Result<GeneratedCopy, PlatformError> {
        self.generate(&GenerateRequest {
            photo_ref,
            platform: None,
            analysis: None,
        })
        .await
    }

    async fn draft_copy(
        &self,
        analysis: &GeneratedCopy,
        platform: Platform,
    ) -> Result<GeneratedCopy, PlatformError> {
        self.generate(&GenerateRequest {
            photo_ref: "",
            platform: Some(platform.as_str()),
            analysis: Some(analysis),
        })
        .await
    }
}
