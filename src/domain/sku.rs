//! Priced product variants (SKUs) and the JSON-backed SKU catalog.
//!
//! A SKU is the unit of Etsy listing creation: one approved Etsy content
//! item fans out to one listing per selected SKU. SKUs are immutable once a
//! listing references them.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::content::Platform;

/// A priced, sized product variant of a photo
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sku {
    /// Stable SKU identifier (e.g. "ridge_dawn_001-12x18-matte")
    pub id: String,

    /// Photo this variant prices
    pub photo_id: String,

    /// Print size, e.g. "12x18"
    pub size: String,

    /// Paper/finish, e.g. "matte"
    pub paper: String,

    /// Production cost
    pub cost_usd: f64,

    /// Floor price (never list below this)
    pub min_price_usd: f64,

    /// Listed retail price
    pub retail_usd: f64,
}

impl Sku {
    /// Listing price, clamped to the floor
    pub fn listing_price(&self) -> f64 {
        self.retail_usd.max(self.min_price_usd)
    }
}

/// Catalog of all SKUs, persisted as a single JSON snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkuCatalog {
    /// Catalog format version
    pub version: u32,

    /// All SKUs
    pub skus: Vec<Sku>,
}

impl Default for SkuCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl SkuCatalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self {
            version: 1,
            skus: Vec::new(),
        }
    }

    /// Load the catalog from a snapshot path (empty catalog if absent)
    pub async fn load(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read SKU catalog: {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse SKU catalog JSON")
    }

    /// Save the catalog snapshot
    pub async fn save(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write SKU catalog: {}", path.display()))?;

        Ok(())
    }

    /// Add a SKU, replacing any existing entry with the same id
    pub fn add(&mut self, sku: Sku) {
        if let Some(existing) = self.skus.iter_mut().find(|s| s.id == sku.id) {
            *existing = sku;
        } else {
            self.skus.push(sku);
        }
    }

    /// Look up a SKU by id
    pub fn get(&self, id: &str) -> Option<&Sku> {
        self.skus.iter().find(|s| s.id == id)
    }

    /// All SKUs priced against a photo
    pub fn for_photo(&self, photo_id: &str) -> Vec<&Sku> {
        self.skus.iter().filter(|s| s.photo_id == photo_id).collect()
    }

    /// Whether a photo already has SKUs (sku_gen idempotency)
    pub fn has_photo(&self, photo_id: &str) -> bool {
        self.skus.iter().any(|s| s.photo_id == photo_id)
    }
}

/// Tag cardinality required by a platform, if it has a hard rule
pub fn required_tag_count(platform: Platform) -> Option<usize> {
    match platform {
        // Etsy listings carry exactly 13 tags
        Platform::Etsy => Some(13),
        Platform::Instagram | Platform::Pinterest => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sku(id: &str, photo: &str) -> Sku {
        Sku {
            id: id.to_string(),
            photo_id: photo.to_string(),
            size: "12x18".to_string(),
            paper: "matte".to_string(),
            cost_usd: 9.50,
            min_price_usd: 28.0,
            retail_usd: 45.0,
        }
    }

    #[test]
    fn test_listing_price_respects_floor() {
        let mut s = sku("a", "p1");
        assert_eq!(s.listing_price(), 45.0);

        s.retail_usd = 20.0;
        assert_eq!(s.listing_price(), 28.0);
    }

    #[test]
    fn test_catalog_lookup() {
        let mut catalog = SkuCatalog::new();
        catalog.add(sku("a", "p1"));
        catalog.add(sku("b", "p1"));
        catalog.add(sku("c", "p2"));

        assert_eq!(catalog.for_photo("p1").len(), 2);
        assert!(catalog.has_photo("p2"));
        assert!(!catalog.has_photo("p3"));
        assert_eq!(catalog.get("b").unwrap().photo_id, "p1");
    }

    #[test]
    fn test_add_replaces_same_id() {
        let mut catalog = SkuCatalog::new();
        catalog.add(sku("a", "p1"));

        let mut updated = sku("a", "p1");
        updated.retail_usd = 60.0;
        catalog.add(updated);

        assert_eq!(catalog.skus.len(), 1);
        assert_eq!(catalog.get("a").unwrap().retail_usd, 60.0);
    }

    #[tokio::test]
    async fn test_catalog_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("skus.json");

        let mut catalog = SkuCatalog::new();
        catalog.add(sku("a", "p1"));
        catalog.save(&path).await.unwrap();

        let loaded = SkuCatalog::load(&path).await.unwrap();
        assert_eq!(loaded.skus.len(), 1);
        assert_eq!(loaded.get("a").unwrap().size, "12x18");
    }

    #[tokio::test]
    async fn test_missing_catalog_loads_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("absent.json");

        let loaded = SkuCatalog::load(&path).await.unwrap();
        assert!(loaded.skus.is_empty());
    }

    #[test]
    fn test_etsy_tag_rule() {
        assert_eq!(required_tag_count(Platform::Etsy), Some(13));
        assert_eq!(required_tag_count(Platform::Instagram), None);
    }
}
