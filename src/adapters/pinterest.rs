//! Pinterest API adapter: pin creation, deletion, and board listing.
//!
//! Title and description limits are hard pre-call rejects; the pin link is
//! always populated, falling back to the gallery root when the item has no
//! collection.

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::{ContentItem, Platform};

use super::{Board, ConfigurationError, PinApi, PlatformError, PublishResult, Publisher};

/// Hard limit on pin titles
pub const TITLE_LIMIT: usize = 100;

/// Hard limit on pin descriptions
pub const DESCRIPTION_LIMIT: usize = 500;

/// Pinterest REST API client
pub struct PinterestAdapter {
    base_url: String,
    access_token: String,
    /// Board pins are created on
    board_id: String,
    /// Fallback link when an item has no collection URL
    gallery_root: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct PinResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BoardsResponse {
    items: Vec<Board>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    message: String,
}

impl PinterestAdapter {
    /// Create an adapter with explicit credentials
    pub fn new(access_token: String, board_id: String, gallery_root: String) -> Self {
        Self {
            base_url: "https://api.pinterest.com/v5".to_string(),
            access_token,
            board_id,
            gallery_root,
            client: reqwest::Client::new(),
        }
    }

    /// Create from environment variables, failing fast when missing.
    /// The board id is part of the required configuration: pins cannot be
    /// created without one.
    pub fn from_env(gallery_root: String) -> Result<Self, ConfigurationError> {
        let access_token = std::env::var("PINTEREST_ACCESS_TOKEN")
            .map_err(|_| ConfigurationError("PINTEREST_ACCESS_TOKEN".to_string()))?;
        let board_id = std::env::var("PINTEREST_BOARD_ID")
            .map_err(|_| ConfigurationError("PINTEREST_BOARD_ID".to_string()))?;
        Ok(Self::new(access_token, board_id, gallery_root))
    }

    /// Point the client at a different API host (tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PlatformError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ApiErrorResponse>()
            .await
            .map(|e| e.message)
            .unwrap_or_else(|_| "unreadable error body".to_string());
        Err(PlatformError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Hard pre-call validation
    fn validate(&self, item: &ContentItem) -> Result<(), PlatformError> {
        if self.board_id.is_empty() {
            return Err(PlatformError::InvalidContent(
                "Pinterest requires a board id".to_string(),
            ));
        }
        if item.title.chars().count() > TITLE_LIMIT {
            return Err(PlatformError::InvalidContent(format!(
                "title is {} chars, over the {} char limit",
                item.title.chars().count(),
                TITLE_LIMIT
            )));
        }
        if item.body.chars().count() > DESCRIPTION_LIMIT {
            return Err(PlatformError::InvalidContent(format!(
                "description is {} chars, over the {} char limit",
                item.body.chars().count(),
                DESCRIPTION_LIMIT
            )));
        }
        if item.image_url.is_none() {
            return Err(PlatformError::InvalidContent(
                "Pinterest requires a publicly reachable image URL".to_string(),
            ));
        }
        Ok(())
    }

    /// Pin link: the collection page if the item has one, the gallery root
    /// otherwise. Never empty.
    fn link_for(&self, item: &ContentItem) -> String {
        match &item.collection {
            Some(collection) => format!(
                "{}/{}",
                self.gallery_root.trim_end_matches('/'),
                collection
            ),
            None => self.gallery_root.clone(),
        }
    }
}

#[async_trait]
impl Publisher for PinterestAdapter {
    fn platform(&self) -> Platform {
        Platform::Pinterest
    }

    async fn publish(&self, item: &ContentItem) -> Result<PublishResult, PlatformError> {
        self.validate(item)?;

        let payload = serde_json::json!({
            "board_id": self.board_id,
            "title": item.title,
            "description": item.body,
            "link": self.link_for(item),
            "media_source": {
                "source_type": "image_url",
                "url": item.image_url.as_deref().unwrap_or_default(),
            },
        });

        let response = self
            .client
            .post(self.api_url("pins"))
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;

        let pin: PinResponse = Self::check_status(response).await?.json().await?;
        Ok(PublishResult::posted(pin.id))
    }
}

#[async_trait]
impl PinApi for PinterestAdapter {
    async fn delete_pin(&self, pin_id: &str) -> Result<(), PlatformError> {
        let response = self
            .client
            .delete(self.api_url(&format!("pins/{}", pin_id)))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    async fn list_boards(&self) -> Result<Vec<Board>, PlatformError> {
        let response = self
            .client
            .get(self.api_url("boards"))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        let boards: BoardsResponse = Self::check_status(response).await?.json().await?;
        Ok(boards.items)
    }
}
