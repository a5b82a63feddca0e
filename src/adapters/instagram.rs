//! Instagram Graph API adapter.
//!
//! Publishing is the two-call container flow: create a media container
//! from a public image URL, then publish the container. Captions over the
//! platform's soft limit are flagged as warnings, never truncated.

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::{ContentItem, Platform};

use super::{ConfigurationError, PlatformError, PublishResult, Publisher};

/// Caption length past which Instagram clips display (soft limit)
pub const CAPTION_SOFT_LIMIT: usize = 2_200;

/// Instagram Graph API client
pub struct InstagramAdapter {
    /// Graph API base (overridable for tests)
    base_url: String,
    /// Business account id
    account_id: String,
    /// Long-lived access token
    access_token: String,
    client: reqwest::Client,
}

/// Response carrying a created object id
#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

/// Graph API error envelope
#[derive(Debug, Deserialize)]
struct GraphErrorResponse {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: String,
}

impl InstagramAdapter {
    /// Create an adapter with explicit credentials
    pub fn new(account_id: String, access_token: String) -> Self {
        Self {
            base_url: "https://graph.facebook.com/v19.0".to_string(),
            account_id,
            access_token,
            client: reqwest::Client::new(),
        }
    }

    /// Create from environment variables, failing fast when missing
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let account_id = std::env::var("INSTAGRAM_ACCOUNT_ID")
            .map_err(|_| ConfigurationError("INSTAGRAM_ACCOUNT_ID".to_string()))?;
        let access_token = std::env::var("INSTAGRAM_ACCESS_TOKEN")
            .map_err(|_| ConfigurationError("INSTAGRAM_ACCESS_TOKEN".to_string()))?;
        Ok(Self::new(account_id, access_token))
    }

    /// Point the client at a different API host (tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.account_id, path)
    }

    async fn post_for_id(
        &self,
        url: &str,
        params: &serde_json::Value,
    ) -> Result<String, PlatformError> {
        let response = self
            .client
            .post(url)
            .query(&[("access_token", self.access_token.as_str())])
            .json(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<GraphErrorResponse>()
                .await
                .map(|e| e.error.message)
                .unwrap_or_else(|_| "unreadable error body".to_string());
            return Err(PlatformError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<IdResponse>().await?.id)
    }

    /// Pre-call checks: image URL is required; caption length is a warning
    fn validate(item: &ContentItem) -> Result<Vec<String>, PlatformError> {
        if item.image_url.is_none() {
            return Err(PlatformError::InvalidContent(
                "Instagram requires a publicly reachable image URL".to_string(),
            ));
        }

        let mut warnings = Vec::new();
        if item.body.chars().count() > CAPTION_SOFT_LIMIT {
            let warning = format!(
                "caption is {} chars, over the {} char soft limit",
                item.body.chars().count(),
                CAPTION_SOFT_LIMIT
            );
            tracing::warn!(item = %item.id, "{}", warning);
            warnings.push(warning);
        }

        Ok(warnings)
    }

    fn caption(item: &ContentItem) -> String {
        let hashtags: Vec<String> = item.tags.iter().map(|t| format!("#{}", t)).collect();
        if hashtags.is_empty() {
            item.body.clone()
        } else {
            format!("{}\n\n{}", item.body, hashtags.join(" "))
        }
    }
}

#[async_trait]
impl Publisher for InstagramAdapter {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    async fn publish(&self, item: &ContentItem) -> Result<PublishResult, PlatformError> {
        let warnings = Self::validate(item)?;
        let image_url = item.image_url.as_deref().unwrap_or_default();

        // Container, then publish
        let container_id = self
            .post_for_id(
                &self.api_url("media"),
                &serde_json::json!({
                    "image_url": image_url,
                    "caption": Self::caption(item),
                }),
            )
            .await?;

        let media_id = self
            .post_for_id(
                &self.api_url("media_publish"),
                &serde_json::json!({ "creation_id": container_id }),
            )
            .await?;

        let mut result = PublishResult::posted(media_id);
        result.warnings = warnings;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContentDraft;

    fn item(image_url: Option<&str>, body: &str) -> ContentItem {
        ContentItem::from_draft(ContentDraft {
            platform: Platform::Instagram,
            photo_id: "p1".to_string(),
            title: "Title".to_string(),
            body: body.to_string(),
            tags: vec!["print".to_string()],
            collection: None,
            filename: "p1.jpg".to_string(),
            image_url: image_url.map(String::from),
            expires_at: None,
        })
    }

    #[test]
    fn test_missing_image_url_is_invalid_content() {
        let result = InstagramAdapter::validate(&item(None, "caption"));
        assert!(matches!(result, Err(PlatformError::InvalidContent(_))));
    }

    #[test]
    fn test_long_caption_warns_without_truncating() {
        let long = "x".repeat(CAPTION_SOFT_LIMIT + 1);
        let it = item(Some("https://example.com/a.jpg"), &long);

        let warnings = InstagramAdapter::validate(&it).unwrap();
        assert_eq!(warnings.len(), 1);
        // The item body itself is untouched
        assert_eq!(it.body.len(), CAPTION_SOFT_LIMIT + 1);
    }

    #[test]
    fn test_caption_appends_hashtags() {
        let it = item(Some("https://example.com/a.jpg"), "Morning light.");
        assert_eq!(
            InstagramAdapter::caption(&it),
            "Morning light.\n\n#print"
        );
    }

    #[test]
    fn test_api_url() {
        let adapter = InstagramAdapter::new("42".to_string(), "tok".to_string());
        assert_eq!(
            adapter.api_url("media"),
            "https://graph.facebook.com/v19.0/42/media"
        );
    }
}
