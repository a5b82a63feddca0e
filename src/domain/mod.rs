//! Core data structures for the control plane.

pub mod content;
pub mod sku;

pub use content::{
    next_status, ApprovalAction, ContentDraft, ContentItem, ContentStatus, InvalidTransition,
    Platform,
};
pub use sku::{required_tag_count, Sku, SkuCatalog};
