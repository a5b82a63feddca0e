//! Content items and the approval-queue state machine.
//!
//! A [`ContentItem`] is one AI-drafted post/listing candidate destined for
//! exactly one platform. Items are created `pending`, moved by explicit
//! approval actions, and end up `posted` or `rejected` (both terminal).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Target platform for a content item (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Instagram,
    Pinterest,
    Etsy,
}

impl Platform {
    /// All platforms, in dispatch order
    pub const ALL: [Platform; 3] = [Platform::Instagram, Platform::Pinterest, Platform::Etsy];

    /// Stable lowercase name (used in scopes, audit detail, CLI output)
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
            Platform::Pinterest => "pinterest",
            Platform::Etsy => "etsy",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a content item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    /// Awaiting human review
    Pending,

    /// Approved for publishing, not yet posted
    Approved,

    /// Rejected by a reviewer or expired (terminal)
    Rejected,

    /// Set aside for later; can be re-queued or rejected
    Deferred,

    /// Successfully published (terminal)
    Posted,
}

impl ContentStatus {
    /// Terminal states accept no further actions
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContentStatus::Rejected | ContentStatus::Posted)
    }
}

impl std::fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContentStatus::Pending => "pending",
            ContentStatus::Approved => "approved",
            ContentStatus::Rejected => "rejected",
            ContentStatus::Deferred => "deferred",
            ContentStatus::Posted => "posted",
        };
        f.write_str(s)
    }
}

/// Actions that move an item through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    /// Reviewer approves a pending item
    Approve,

    /// Reviewer rejects a pending or deferred item
    Reject,

    /// Reviewer sets a pending item aside
    Defer,

    /// A deferred item goes back into the review queue
    Requeue,

    /// A successful publish marks the item posted
    Post,

    /// Expiry sweep forces a pending item to rejected
    Expire,
}

impl std::fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApprovalAction::Approve => "approve",
            ApprovalAction::Reject => "reject",
            ApprovalAction::Defer => "defer",
            ApprovalAction::Requeue => "requeue",
            ApprovalAction::Post => "post",
            ApprovalAction::Expire => "expire",
        };
        f.write_str(s)
    }
}

/// Rejected state-machine edge. Caller error, never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: cannot {action} an item in state {from}")]
pub struct InvalidTransition {
    pub from: ContentStatus,
    pub action: ApprovalAction,
}

/// The transition table. Every edge not listed here is an error, so callers
/// can distinguish "already done" from "succeeded".
///
/// ```text
/// pending  --approve--> approved
/// pending  --reject---> rejected
/// pending  --defer----> deferred
/// pending  --expire---> rejected
/// pending  --post-----> posted      (single-call platforms at publish time)
/// approved --post-----> posted
/// deferred --requeue--> pending
/// deferred --reject---> rejected
/// ```
pub fn next_status(
    from: ContentStatus,
    action: ApprovalAction,
) -> Result<ContentStatus, InvalidTransition> {
    use ApprovalAction::*;
    use ContentStatus::*;

    match (from, action) {
        (Pending, Approve) => Ok(Approved),
        (Pending, Reject) => Ok(Rejected),
        (Pending, Defer) => Ok(Deferred),
        (Pending, Expire) => Ok(Rejected),
        (Pending, Post) => Ok(Posted),
        (Approved, Post) => Ok(Posted),
        (Deferred, Requeue) => Ok(Pending),
        (Deferred, Reject) => Ok(Rejected),
        _ => Err(InvalidTransition { from, action }),
    }
}

/// Fields supplied when a draft enters the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentDraft {
    /// Target platform
    pub platform: Platform,

    /// Photo or mockup this draft was generated from
    pub photo_id: String,

    /// Title / headline
    pub title: String,

    /// Caption or listing description
    pub body: String,

    /// Ordered tag list (platform cardinality rules are enforced by adapters)
    pub tags: Vec<String>,

    /// Collection the photo belongs to (provenance display, pin link)
    pub collection: Option<String>,

    /// Source filename (provenance display)
    pub filename: String,

    /// Publicly reachable image URL, if one exists yet
    pub image_url: Option<String>,

    /// If set, an expiry sweep forces pending -> rejected past this instant
    pub expires_at: Option<DateTime<Utc>>,
}

/// One AI-drafted, human-approvable unit of content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    /// Opaque stable identifier
    pub id: Uuid,

    pub platform: Platform,
    pub photo_id: String,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub collection: Option<String>,
    pub filename: String,
    pub image_url: Option<String>,

    /// Current lifecycle state
    pub status: ContentStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,

    /// Platform-side identifier once posted (media id, pin id, listing id)
    pub external_id: Option<String>,

    /// Last publish error, if any (item stays approved for manual retry)
    pub last_error: Option<String>,
}

impl ContentItem {
    /// Create a new pending item from a draft
    pub fn from_draft(draft: ContentDraft) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            platform: draft.platform,
            photo_id: draft.photo_id,
            title: draft.title,
            body: draft.body,
            tags: draft.tags,
            collection: draft.collection,
            filename: draft.filename,
            image_url: draft.image_url,
            status: ContentStatus::Pending,
            created_at: now,
            updated_at: now,
            expires_at: draft.expires_at,
            external_id: None,
            last_error: None,
        }
    }

    /// Whether the expiry sweep should force this item to rejected
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ContentStatus::Pending
            && self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}
