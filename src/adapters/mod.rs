//! Platform adapter interfaces and shared types.
//!
//! Adapters isolate platform-specific payload shape and error mapping. The
//! traits here are the seams the control plane dispatches through; concrete
//! implementations are thin reqwest clients constructed from environment
//! credentials, failing fast when credentials are missing.

pub mod etsy;
pub mod instagram;
pub mod pinterest;
pub mod vision;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ContentItem, Platform, Sku};

pub use etsy::EtsyAdapter;
pub use instagram::InstagramAdapter;
pub use pinterest::PinterestAdapter;
pub use vision::VisionClient;

/// Third-party API failure. The item stays in its pre-call state; retry is
/// caller-initiated, never automatic.
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid content: {0}")]
    InvalidContent(String),
}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        PlatformError::Network(e.to_string())
    }
}

/// Missing credentials. Surfaces at adapter construction, never mid-batch.
#[derive(Debug, Clone, Error)]
#[error("missing configuration: {0}")]
pub struct ConfigurationError(pub String);

/// Outcome of a single publish call
#[derive(Debug, Clone, Serialize)]
pub struct PublishResult {
    pub success: bool,

    /// Platform-side identifier (media id, pin id, listing id)
    pub external_id: Option<String>,

    pub error: Option<String>,

    /// Soft-limit violations (e.g. an over-long Instagram caption);
    /// reported, never silently fixed
    pub warnings: Vec<String>,
}

impl PublishResult {
    pub fn posted(external_id: impl Into<String>) -> Self {
        Self {
            success: true,
            external_id: Some(external_id.into()),
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            external_id: None,
            error: Some(error.into()),
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// A Pinterest board
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    pub id: String,
    pub name: String,
}

/// Single-item publish seam (Instagram, Pinterest)
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Which platform this adapter posts to
    fn platform(&self) -> Platform;

    /// Publish one content item. Pre-call validation failures surface as
    /// `PlatformError::InvalidContent` without any external call.
    async fn publish(&self, item: &ContentItem) -> Result<PublishResult, PlatformError>;
}

/// Listing-creation seam (Etsy). One content item fans out to one listing
/// per SKU via the batch coordinator.
#[async_trait]
pub trait ListingApi: Send + Sync {
    /// Create one listing; returns the platform listing id
    async fn create_listing(&self, item: &ContentItem, sku: &Sku)
        -> Result<String, PlatformError>;
}

/// Pin management seam (Pinterest batch delete)
#[async_trait]
pub trait PinApi: Send + Sync {
    async fn delete_pin(&self, pin_id: &str) -> Result<(), PlatformError>;

    async fn list_boards(&self) -> Result<Vec<Board>, PlatformError>;
}

/// Copy produced by the AI vision/caption collaborator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratedCopy {
    pub title: Option<String>,
    pub body: String,
    pub tags: Vec<String>,
}

/// The AI vision/caption generator seam. Model calls themselves are out of
/// scope; the control plane only depends on this interface.
#[async_trait]
pub trait DraftGenerator: Send + Sync {
    /// Vision analysis of a photo reference
    async fn analyze_photo(&self, photo_ref: &str) -> Result<GeneratedCopy, PlatformError>;

    /// Platform-specific copy drafted from an analysis
    async fn draft_copy(
        &self,
        analysis: &GeneratedCopy,
        platform: Platform,
    ) -> Result<GeneratedCopy, PlatformError>;
}
