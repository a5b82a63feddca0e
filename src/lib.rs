//! darkroom - publication control plane for a studio's content agent
//!
//! Holds the line between AI-drafted content and the outside world:
//! nothing reaches a platform without explicit human approval, an active
//! safety gate, and room in the daily budget.
//!
//! # Architecture
//!
//! The queue is event sourced:
//! - Every draft, review decision, and publish outcome is an immutable
//!   event on an append-only ledger
//! - Current queue state is derived by replaying events
//! - The audit log is a separate append-only trail of everything the
//!   agent did on the operator's behalf
//!
//! # Modules
//!
//! - `adapters`: Platform integrations (Instagram, Pinterest, Etsy) and
//!   the vision/caption generator seam
//! - `core`: Control plane (queue, safety gate, budget, batches, pipeline)
//! - `domain`: Data structures (ContentItem, state machine, SKUs)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Draft content for new photos
//! darkroom run
//!
//! # Review the queue
//! darkroom list --status pending
//! darkroom approve <id>
//!
//! # Publish an approved item
//! darkroom publish <id>
//!
//! # Halt everything
//! darkroom kill global --reason "taking a break"
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use crate::core::{
    AuditEntry, AuditLog, BatchCoordinator, BudgetLedger, ContentStore, ControlPlane,
    PipelineRunner, SafetyGate, Scope,
};
pub use domain::{ApprovalAction, ContentItem, ContentStatus, Platform, Sku, SkuCatalog};
