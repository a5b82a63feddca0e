//! Event-sourced content queue.
//!
//! Follows the append-only JSONL pattern: every lifecycle change is a new
//! line in `content.jsonl`, and current state is derived by replay. Reads
//! never mutate items; only approval actions and successful publishes do.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{
    next_status, ApprovalAction, ContentDraft, ContentItem, ContentStatus, InvalidTransition,
    Platform,
};

/// Errors from content queue operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("content item not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One line in the content ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentEvent {
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub kind: ContentEventKind,
}

/// Ledger event kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum ContentEventKind {
    /// A new draft entered the queue
    Created { item: Box<ContentItem> },

    /// An approval action moved the item
    Transitioned {
        id: Uuid,
        action: ApprovalAction,
        to: ContentStatus,
    },

    /// A successful publish recorded the platform-side id
    Published { id: Uuid, external_id: String },

    /// A publish attempt failed; the item keeps its state for manual retry
    PublishFailed { id: Uuid, error: String },
}

/// Filter for bulk reads (the only bulk read operation)
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    pub status: Option<ContentStatus>,
    pub platform: Option<Platform>,

    /// Maximum items to return (0 = unlimited)
    pub limit: usize,

    /// Newest first instead of insertion order
    pub newest_first: bool,
}

/// Result of an expiry sweep
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub expired: Vec<Uuid>,
}

/// JSONL-backed content queue
pub struct ContentStore {
    ledger_path: PathBuf,

    /// Serializes read-check-append sequences so two concurrent writers
    /// cannot both observe the same pre-transition state
    write_lock: tokio::sync::Mutex<()>,
}

impl ContentStore {
    /// Create a store at an explicit ledger path
    pub fn new(ledger_path: PathBuf) -> Self {
        Self {
            ledger_path,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Open the store in a home directory, creating it if needed
    pub async fn open(home: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(home).await?;
        Ok(Self::new(home.join("content.jsonl")))
    }

    /// Append an event to the ledger
    async fn append_event(&self, kind: ContentEventKind) -> Result<(), StoreError> {
        let event = ContentEvent {
            timestamp: Utc::now(),
            kind,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ledger_path)
            .await?;

        let json = serde_json::to_string(&event)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// Replay the ledger into current item state
    pub async fn replay(&self) -> Result<HashMap<Uuid, ContentItem>, StoreError> {
        Ok(self.replay_ordered().await?.0)
    }

    /// Replay, additionally returning item ids in creation (ledger) order
    async fn replay_ordered(
        &self,
    ) -> Result<(HashMap<Uuid, ContentItem>, Vec<Uuid>), StoreError> {
        let mut items: HashMap<Uuid, ContentItem> = HashMap::new();
        let mut order: Vec<Uuid> = Vec::new();

        if !self.ledger_path.exists() {
            return Ok((items, order));
        }

        let file = File::open(&self.ledger_path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: ContentEvent = serde_json::from_str(&line)?;
            if let ContentEventKind::Created { ref item } = event.kind {
                order.push(item.id);
            }
            Self::apply_event(&mut items, event);
        }

        Ok((items, order))
    }

    fn apply_event(items: &mut HashMap<Uuid, ContentItem>, event: ContentEvent) {
        match event.kind {
            ContentEventKind::Created { item } => {
                items.insert(item.id, *item);
            }
            ContentEventKind::Transitioned { id, to, .. } => {
                if let Some(item) = items.get_mut(&id) {
                    item.status = to;
                    item.updated_at = event.timestamp;
                    if to != ContentStatus::Posted {
                        item.last_error = None;
                    }
                }
            }
            ContentEventKind::Published { id, external_id } => {
                if let Some(item) = items.get_mut(&id) {
                    item.external_id = Some(external_id);
                    item.last_error = None;
                    item.updated_at = event.timestamp;
                }
            }
            ContentEventKind::PublishFailed { id, error } => {
                if let Some(item) = items.get_mut(&id) {
                    item.last_error = Some(error);
                    item.updated_at = event.timestamp;
                }
            }
        }
    }

    /// Add a draft to the queue in state `pending`
    pub async fn create(&self, draft: ContentDraft) -> Result<ContentItem, StoreError> {
        let item = ContentItem::from_draft(draft);
        self.append_event(ContentEventKind::Created {
            item: Box::new(item.clone()),
        })
        .await?;
        Ok(item)
    }

    /// Apply an approval action. Rejects any edge not in the transition
    /// table and leaves the item unchanged in that case.
    pub async fn transition(
        &self,
        id: Uuid,
        action: ApprovalAction,
    ) -> Result<ContentStatus, StoreError> {
        let _guard = self.write_lock.lock().await;

        let items = self.replay().await?;
        let item = items.get(&id).ok_or(StoreError::NotFound(id))?;

        let to = next_status(item.status, action)?;

        self.append_event(ContentEventKind::Transitioned { id, action, to })
            .await?;

        Ok(to)
    }

    /// Record a successful publish: Post transition + platform-side id
    pub async fn mark_posted(&self, id: Uuid, external_id: &str) -> Result<(), StoreError> {
        let to = self.transition(id, ApprovalAction::Post).await?;
        debug_assert_eq!(to, ContentStatus::Posted);

        self.append_event(ContentEventKind::Published {
            id,
            external_id: external_id.to_string(),
        })
        .await?;

        Ok(())
    }

    /// Record a failed publish attempt without changing lifecycle state
    pub async fn record_publish_failure(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        self.append_event(ContentEventKind::PublishFailed {
            id,
            error: error.to_string(),
        })
        .await
    }

    /// Get one item by id
    pub async fn get(&self, id: Uuid) -> Result<Option<ContentItem>, StoreError> {
        Ok(self.replay().await?.get(&id).cloned())
    }

    /// List items matching a filter, in creation order unless newest-first
    /// is requested
    pub async fn list(&self, filter: &ContentFilter) -> Result<Vec<ContentItem>, StoreError> {
        let (mut items, order) = self.replay_ordered().await?;

        let mut matched: Vec<ContentItem> = order
            .into_iter()
            .filter_map(|id| items.remove(&id))
            .filter(|item| {
                filter.status.map(|s| item.status == s).unwrap_or(true)
                    && filter.platform.map(|p| item.platform == p).unwrap_or(true)
            })
            .collect();

        if filter.newest_first {
            matched.reverse();
        }
        if filter.limit > 0 {
            matched.truncate(filter.limit);
        }

        Ok(matched)
    }

    /// Force expired pending items to rejected. Explicit on-demand sweep;
    /// reads stay free of side effects.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let _guard = self.write_lock.lock().await;

        let items = self.replay().await?;
        let mut report = SweepReport::default();

        for item in items.values() {
            if item.is_expired(now) {
                self.append_event(ContentEventKind::Transitioned {
                    id: item.id,
                    action: ApprovalAction::Expire,
                    to: ContentStatus::Rejected,
                })
                .await?;
                report.expired.push(item.id);
            }
        }

        Ok(report)
    }

    /// Whether a draft for this photo/platform pair already exists
    /// (pipeline idempotency: re-runs never double-create)
    pub async fn has_draft_for(
        &self,
        photo_id: &str,
        platform: Platform,
    ) -> Result<bool, StoreError> {
        let items = self.replay().await?;
        Ok(items
            .values()
            .any(|i| i.photo_id == photo_id && i.platform == platform))
    }
}

/// Stable photo identifier derived from file content (first 12 hex chars
/// of SHA256), so renamed files do not re-enter the pipeline.
pub async fn photo_content_id(path: &Path) -> Result<String, std::io::Error> {
    let content = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    let digest = hasher.finalize();
    Ok(hex::encode(&digest[..6]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (ContentStore, TempDir) {
        let temp = TempDir::new().unwrap();
        (ContentStore::new(temp.path().join("content.jsonl")), temp)
    }

    fn draft(platform: Platform, photo: &str) -> ContentDraft {
        ContentDraft {
            platform,
            photo_id: photo.to_string(),
            title: "Title".to_string(),
            body: "Body".to_string(),
            tags: vec![],
            collection: None,
            filename: format!("{}.jpg", photo),
            image_url: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_is_pending() {
        let (store, _temp) = create_test_store();
        let item = store.create(draft(Platform::Etsy, "p1")).await.unwrap();

        let loaded = store.get(item.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ContentStatus::Pending);
    }

    #[tokio::test]
    async fn test_approve_then_post() {
        let (store, _temp) = create_test_store();
        let item = store.create(draft(Platform::Instagram, "p1")).await.unwrap();

        let state = store
            .transition(item.id, ApprovalAction::Approve)
            .await
            .unwrap();
        assert_eq!(state, ContentStatus::Approved);

        store.mark_posted(item.id, "media-99").await.unwrap();

        let loaded = store.get(item.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ContentStatus::Posted);
        assert_eq!(loaded.external_id.as_deref(), Some("media-99"));
    }

    #[tokio::test]
    async fn test_invalid_transition_leaves_state_unchanged() {
        let (store, _temp) = create_test_store();
        let item = store.create(draft(Platform::Etsy, "p1")).await.unwrap();

        store
            .transition(item.id, ApprovalAction::Reject)
            .await
            .unwrap();

        // Rejected is terminal
        let result = store.transition(item.id, ApprovalAction::Approve).await;
        assert!(matches!(result, Err(StoreError::InvalidTransition(_))));

        let loaded = store.get(item.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ContentStatus::Rejected);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let (store, _temp) = create_test_store();
        let result = store.transition(Uuid::new_v4(), ApprovalAction::Approve).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_state() {
        let (store, _temp) = create_test_store();
        let item = store.create(draft(Platform::Pinterest, "p1")).await.unwrap();
        store
            .transition(item.id, ApprovalAction::Approve)
            .await
            .unwrap();

        store
            .record_publish_failure(item.id, "boom")
            .await
            .unwrap();

        let loaded = store.get(item.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ContentStatus::Approved);
        assert_eq!(loaded.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_list_filters_and_order() {
        let (store, _temp) = create_test_store();
        let a = store.create(draft(Platform::Etsy, "p1")).await.unwrap();
        let _b = store.create(draft(Platform::Instagram, "p2")).await.unwrap();
        let c = store.create(draft(Platform::Etsy, "p3")).await.unwrap();

        let etsy = store
            .list(&ContentFilter {
                platform: Some(Platform::Etsy),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(etsy.len(), 2);
        assert_eq!(etsy[0].id, a.id); // insertion order

        let newest = store
            .list(&ContentFilter {
                platform: Some(Platform::Etsy),
                newest_first: true,
                limit: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(newest[0].id, c.id);
    }

    #[tokio::test]
    async fn test_sweep_expires_pending_only() {
        let (store, _temp) = create_test_store();
        let past = Utc::now() - chrono::Duration::hours(2);

        let mut expiring = draft(Platform::Instagram, "p1");
        expiring.expires_at = Some(past);
        let expired_item = store.create(expiring).await.unwrap();

        let mut approved = draft(Platform::Instagram, "p2");
        approved.expires_at = Some(past);
        let approved_item = store.create(approved).await.unwrap();
        store
            .transition(approved_item.id, ApprovalAction::Approve)
            .await
            .unwrap();

        let report = store.sweep_expired(Utc::now()).await.unwrap();
        assert_eq!(report.expired, vec![expired_item.id]);

        let loaded = store.get(expired_item.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ContentStatus::Rejected);

        let untouched = store.get(approved_item.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, ContentStatus::Approved);
    }

    #[tokio::test]
    async fn test_draft_idempotency_lookup() {
        let (store, _temp) = create_test_store();
        store.create(draft(Platform::Etsy, "p1")).await.unwrap();

        assert!(store.has_draft_for("p1", Platform::Etsy).await.unwrap());
        assert!(!store.has_draft_for("p1", Platform::Instagram).await.unwrap());
        assert!(!store.has_draft_for("p2", Platform::Etsy).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_transitions_only_one_wins() {
        let temp = TempDir::new().unwrap();
        let store =
            std::sync::Arc::new(ContentStore::new(temp.path().join("content.jsonl")));
        let item = store.create(draft(Platform::Instagram, "p1")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = std::sync::Arc::clone(&store);
            let id = item.id;
            handles.push(tokio::spawn(async move {
                store.transition(id, ApprovalAction::Approve).await
            }));
        }

        let mut approved = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                approved += 1;
            }
        }
        // The read-check-append sequence is serialized: exactly one caller
        // sees pending, the rest get InvalidTransition
        assert_eq!(approved, 1);

        let loaded = store.get(item.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ContentStatus::Approved);
    }

    #[tokio::test]
    async fn test_photo_content_id_stable() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.jpg");
        let b = temp.path().join("b.jpg");
        tokio::fs::write(&a, b"same bytes").await.unwrap();
        tokio::fs::write(&b, b"same bytes").await.unwrap();

        let ida = photo_content_id(&a).await.unwrap();
        let idb = photo_content_id(&b).await.unwrap();
        assert_eq!(ida, idb);
        assert_eq!(ida.len(), 12);
    }
}
