//! Etsy Open API adapter: listing creation only.
//!
//! Etsy content is never published single-shot; one approved item fans out
//! to one listing per SKU through the batch coordinator, and this adapter
//! handles exactly one listing per call.

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::sku::required_tag_count;
use crate::domain::{ContentItem, Platform, Sku};

use super::{ConfigurationError, ListingApi, PlatformError};

/// Etsy Open API client
pub struct EtsyAdapter {
    base_url: String,
    api_key: String,
    access_token: String,
    shop_id: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ListingResponse {
    listing_id: u64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: String,
}

impl EtsyAdapter {
    /// Create an adapter with explicit credentials
    pub fn new(api_key: String, access_token: String, shop_id: String) -> Self {
        Self {
            base_url: "https://openapi.etsy.com/v3".to_string(),
            api_key,
            access_token,
            shop_id,
            client: reqwest::Client::new(),
        }
    }

    /// Create from environment variables, failing fast when missing
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let api_key = std::env::var("ETSY_API_KEY")
            .map_err(|_| ConfigurationError("ETSY_API_KEY".to_string()))?;
        let access_token = std::env::var("ETSY_ACCESS_TOKEN")
            .map_err(|_| ConfigurationError("ETSY_ACCESS_TOKEN".to_string()))?;
        let shop_id = std::env::var("ETSY_SHOP_ID")
            .map_err(|_| ConfigurationError("ETSY_SHOP_ID".to_string()))?;
        Ok(Self::new(api_key, access_token, shop_id))
    }

    /// Point the client at a different API host (tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn api_url(&self) -> String {
        format!(
            "{}/application/shops/{}/listings",
            self.base_url, self.shop_id
        )
    }

    /// Etsy listings carry exactly 13 tags
    fn validate(item: &ContentItem) -> Result<(), PlatformError> {
        let required = required_tag_count(Platform::Etsy).unwrap_or(0);
        if item.tags.len() != required {
            return Err(PlatformError::InvalidContent(format!(
                "Etsy requires exactly {} tags, item has {}",
                required,
                item.tags.len()
            )));
        }
        Ok(())
    }

    fn listing_title(item: &ContentItem, sku: &Sku) -> String {
        format!("{} - {} {} print", item.title, sku.size, sku.paper)
    }
}

#[async_trait]
impl ListingApi for EtsyAdapter {
    async fn create_listing(
        &self,
        item: &ContentItem,
        sku: &Sku,
    ) -> Result<String, PlatformError> {
        Self::validate(item)?;

        let payload = serde_json::json!({
            "quantity": 1,
            "title": Self::listing_title(item, sku),
            "description": item.body,
            "price": sku.listing_price(),
            "who_made": "i_did",
            "when_made": "2020_2025",
            "taxonomy_id": 2078, // photography prints
            "tags": item.tags,
            "sku": [sku.id],
        });

        let response = self
            .client
            .post(self.api_url())
            .header("x-api-key", &self.api_key)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ApiErrorResponse>()
                .await
                .map(|e| e.error)
                .unwrap_or_else(|_| "unreadable error body".to_string());
            return Err(PlatformError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let listing: ListingResponse = response.json().await?;
        Ok(listing.listing_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContentDraft;

    fn item_with_tags(n: usize) -> ContentItem {
        ContentItem::from_draft(ContentDraft {
            platform: Platform::Etsy,
            photo_id: "p1".to_string(),
            title: "Dawn over the ridge".to_string(),
            body: "Archival print.".to_string(),
            tags: (0..n).map(|i| format!("tag{}", i)).collect(),
            collection: None,
            filename: "p1.jpg".to_string(),
            image_url: None,
            expires_at: None,
        })
    }

    fn sku() -> Sku {
        Sku {
            id: "p1-12x18-matte".to_string(),
            photo_id: "p1".to_string(),
            size: "12x18".to_string(),
            paper: "matte".to_string(),
            cost_usd: 9.50,
            min_price_usd: 28.0,
            retail_usd: 45.0,
        }
    }

    #[test]
    fn test_exactly_13_tags_required() {
        assert!(EtsyAdapter::validate(&item_with_tags(13)).is_ok());
        assert!(matches!(
            EtsyAdapter::validate(&item_with_tags(12)),
            Err(PlatformError::InvalidContent(_))
        ));
        assert!(matches!(
            EtsyAdapter::validate(&item_with_tags(14)),
            Err(PlatformError::InvalidContent(_))
        ));
    }

    #[test]
    fn test_listing_title_includes_variant() {
        let title = EtsyAdapter::listing_title(&item_with_tags(13), &sku());
        assert_eq!(title, "Dawn over the ridge - 12x18 matte print");
    }

    #[test]
    fn test_api_url() {
        let adapter = EtsyAdapter::new("key".to_string(), "tok".to_string(), "shop-9".to_string());
        assert_eq!(
            adapter.api_url(),
            "https://openapi.etsy.com/v3/application/shops/shop-9/listings"
        );
    }
}
