//! The control plane facade.
//!
//! Owns the content queue, safety gate, audit log, adapter set, and batch
//! coordinator; every externally-visible operation flows through here in
//! the order: load state, gate check, budget reservation, platform call,
//! state transition, audit. Approval and publishing are deliberately two
//! separate operations.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{ListingApi, PinApi, PlatformError, PublishResult, Publisher};
use crate::config::CostTable;
use crate::domain::{
    ApprovalAction, ContentItem, ContentStatus, InvalidTransition, Platform, SkuCatalog,
};

use super::audit_log::{AuditEntry, AuditLog};
use super::batch::{BatchCoordinator, ListingBatchReport, PinBatchReport, SkuOutcome, SkuOutcomeStatus};
use super::safety::{Decision, DenyReason, SafetyGate, SafetyStatus, Scope};
use super::store::{ContentFilter, ContentStore, StoreError, SweepReport};

/// Errors surfaced by control-plane operations
#[derive(Debug, Error)]
pub enum ControlError {
    /// Blocked by design: a kill switch or the budget cap. Never retried
    /// silently; the reason names the specific gate.
    #[error("safety denied: {0}")]
    Denied(DenyReason),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<InvalidTransition> for ControlError {
    fn from(e: InvalidTransition) -> Self {
        ControlError::Store(StoreError::InvalidTransition(e))
    }
}

/// The closed set of platform backends. Dispatch is an enum match, never
/// string branching.
pub struct PlatformSet {
    pub instagram: Arc<dyn Publisher>,
    pub pinterest: Arc<dyn Publisher>,
    pub etsy_listings: Arc<dyn ListingApi>,
    pub pinterest_pins: Arc<dyn PinApi>,
}

/// Control plane over the approval queue and platform adapters
pub struct ControlPlane {
    store: ContentStore,
    gate: Arc<SafetyGate>,
    audit: AuditLog,
    coordinator: BatchCoordinator,
    platforms: PlatformSet,
    costs: CostTable,
    sku_catalog_path: std::path::PathBuf,
}

impl ControlPlane {
    pub fn new(
        store: ContentStore,
        gate: Arc<SafetyGate>,
        audit: AuditLog,
        coordinator: BatchCoordinator,
        platforms: PlatformSet,
        costs: CostTable,
        sku_catalog_path: std::path::PathBuf,
    ) -> Self {
        Self {
            store,
            gate,
            audit,
            coordinator,
            platforms,
            costs,
            sku_catalog_path,
        }
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn gate(&self) -> &Arc<SafetyGate> {
        &self.gate
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Gate an action and audit the check. Returns the denial reason when
    /// blocked.
    pub async fn check_gate(&self, scope: Scope, cost: f64) -> Result<(), DenyReason> {
        let decision = self.gate.check(scope, cost);

        let (success, detail) = match &decision {
            Decision::Allow => (true, format!("{} allowed (est ${:.2})", scope, cost)),
            Decision::Deny(reason) => (false, reason.to_string()),
        };
        self.log(AuditEntry::new("safety_gate", "check", success, detail))
            .await;

        match decision {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(reason),
        }
    }

    async fn log(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.append(&entry).await {
            warn!(error = %e, "Failed to append audit entry");
        }
    }

    // ------------------------------------------------------------------
    // Approval queue
    // ------------------------------------------------------------------

    /// List queue items (the only bulk read)
    pub async fn list_content(&self, filter: &ContentFilter) -> Result<Vec<ContentItem>, ControlError> {
        Ok(self.store.list(filter).await?)
    }

    /// Apply a reviewer action and audit it
    pub async fn review(
        &self,
        id: Uuid,
        action: ApprovalAction,
    ) -> Result<ContentStatus, ControlError> {
        let result = self.store.transition(id, action).await;

        let (success, detail) = match &result {
            Ok(to) => (true, format!("item {} -> {}", id, to)),
            Err(e) => (false, format!("item {}: {}", id, e)),
        };
        self.log(AuditEntry::new("content_store", action.to_string(), success, detail))
            .await;

        Ok(result?)
    }

    /// Force expired pending items to rejected
    pub async fn sweep_expired(&self) -> Result<SweepReport, ControlError> {
        let report = self.store.sweep_expired(Utc::now()).await?;
        if !report.expired.is_empty() {
            self.log(AuditEntry::new(
                "content_store",
                "sweep_expired",
                true,
                format!("{} item(s) expired", report.expired.len()),
            ))
            .await;
        }
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------

    /// Publish one item. Gate check first; on platform failure the item
    /// keeps its pre-call state for a manual retry.
    #[instrument(skip(self))]
    pub async fn publish(&self, id: Uuid) -> Result<PublishResult, ControlError> {
        let item = self
            .store
            .get(id)
            .await?
            .ok_or(StoreError::NotFound(id))?;

        // Pending items may be posted directly only on single-call
        // platforms; Etsy always goes through approval + batch.
        let publishable = match item.status {
            ContentStatus::Approved => true,
            ContentStatus::Pending => item.platform != Platform::Etsy,
            _ => false,
        };
        if !publishable {
            return Err(InvalidTransition {
                from: item.status,
                action: ApprovalAction::Post,
            }
            .into());
        }

        if item.platform == Platform::Etsy {
            // One Etsy item maps to multiple SKU-priced listings
            let catalog = SkuCatalog::load(&self.sku_catalog_path).await?;
            let sku_ids: Vec<String> = catalog
                .for_photo(&item.photo_id)
                .into_iter()
                .map(|s| s.id.clone())
                .collect();

            if sku_ids.is_empty() {
                return Err(PlatformError::InvalidContent(format!(
                    "no SKUs priced for photo {}",
                    item.photo_id
                ))
                .into());
            }

            let report = self.create_listing_batch(id, &sku_ids).await?;
            return Ok(if report.any_created() {
                PublishResult::posted(format!("{} of {} listings", report.created, report.total))
            } else {
                PublishResult::failed(format!("0 of {} listings created", report.total))
            });
        }

        let cost = self.costs.publish_usd;
        let scope = Scope::Platform(item.platform);

        if let Err(reason) = self.check_gate(scope, cost).await {
            return Err(ControlError::Denied(reason));
        }
        if let Err(denied) = self.gate.ledger().try_reserve(cost) {
            let reason = DenyReason::BudgetExceeded {
                spent: denied.spent,
                cap: denied.cap,
                estimated: denied.estimated,
            };
            self.log(AuditEntry::new("safety_gate", "reserve", false, reason.to_string()))
                .await;
            return Err(ControlError::Denied(reason));
        }

        let publisher: &Arc<dyn Publisher> = match item.platform {
            Platform::Instagram => &self.platforms.instagram,
            Platform::Pinterest => &self.platforms.pinterest,
            Platform::Etsy => unreachable!("etsy publishes through the batch path"),
        };

        match publisher.publish(&item).await {
            Ok(result) => {
                let external_id = result.external_id.clone().unwrap_or_default();
                self.store.mark_posted(id, &external_id).await?;
                self.gate.ledger().settle(cost, cost);
                self.log(
                    AuditEntry::new(
                        format!("publisher:{}", item.platform),
                        "publish",
                        true,
                        format!("item {} -> {}", id, external_id),
                    )
                    .with_cost(cost),
                )
                .await;
                info!(item = %id, platform = %item.platform, "Published");
                Ok(result)
            }
            Err(e) => {
                // Nothing was posted; release the reservation
                self.gate.ledger().settle(cost, 0.0);
                self.store.record_publish_failure(id, &e.to_string()).await?;
                self.log(AuditEntry::new(
                    format!("publisher:{}", item.platform),
                    "publish",
                    false,
                    format!("item {}: {}", id, e),
                ))
                .await;
                Err(e.into())
            }
        }
    }

    /// Create one Etsy listing per selected SKU. The item moves to posted
    /// only when at least one listing succeeds; a fully-failed batch leaves
    /// it approved for retry. Retrying remaining SKUs after a partial
    /// success (item already posted) is allowed.
    #[instrument(skip(self, sku_ids), fields(skus = sku_ids.len()))]
    pub async fn create_listing_batch(
        &self,
        content_id: Uuid,
        sku_ids: &[String],
    ) -> Result<ListingBatchReport, ControlError> {
        let item = self
            .store
            .get(content_id)
            .await?
            .ok_or(StoreError::NotFound(content_id))?;

        if !matches!(item.status, ContentStatus::Approved | ContentStatus::Posted) {
            return Err(InvalidTransition {
                from: item.status,
                action: ApprovalAction::Post,
            }
            .into());
        }

        let catalog = SkuCatalog::load(&self.sku_catalog_path).await?;
        let mut skus = Vec::new();
        let mut unknown: Vec<SkuOutcome> = Vec::new();
        for sku_id in sku_ids {
            match catalog.get(sku_id) {
                Some(sku) => skus.push(sku.clone()),
                None => unknown.push(SkuOutcome {
                    sku_id: sku_id.clone(),
                    status: SkuOutcomeStatus::Failed,
                    listing_id: None,
                    error: Some("unknown sku".to_string()),
                }),
            }
        }

        let estimate = self.costs.publish_usd * skus.len() as f64;
        let scope = Scope::Platform(Platform::Etsy);

        if let Err(reason) = self.check_gate(scope, estimate).await {
            return Err(ControlError::Denied(reason));
        }
        if let Err(denied) = self.gate.ledger().try_reserve(estimate) {
            let reason = DenyReason::BudgetExceeded {
                spent: denied.spent,
                cap: denied.cap,
                estimated: denied.estimated,
            };
            self.log(AuditEntry::new("safety_gate", "reserve", false, reason.to_string()))
                .await;
            return Err(ControlError::Denied(reason));
        }

        let mut report = self
            .coordinator
            .create_listings(
                Arc::clone(&self.platforms.etsy_listings),
                &item,
                skus,
                &self.audit,
            )
            .await;

        // Unknown SKUs count as failed outcomes without external calls
        report.total += unknown.len();
        report.results.extend(unknown);

        // Settle the reservation to what was actually created
        let actual = self.costs.publish_usd * report.created as f64;
        self.gate.ledger().settle(estimate, actual);

        if report.any_created() && item.status == ContentStatus::Approved {
            let first_listing = report
                .results
                .iter()
                .find_map(|r| r.listing_id.clone())
                .unwrap_or_default();
            self.store.mark_posted(content_id, &first_listing).await?;
        } else if !report.any_created() {
            self.store
                .record_publish_failure(content_id, "all listings in batch failed")
                .await?;
        }

        self.log(
            AuditEntry::new(
                "control_plane",
                "create_batch",
                report.any_created(),
                format!("content {}: {}/{} listings created", content_id, report.created, report.total),
            )
            .with_cost(actual),
        )
        .await;

        Ok(report)
    }

    /// Delete pins independently; partial failure is reported in aggregate
    #[instrument(skip(self, pin_ids), fields(pins = pin_ids.len()))]
    pub async fn delete_pin_batch(
        &self,
        pin_ids: Vec<String>,
    ) -> Result<PinBatchReport, ControlError> {
        let scope = Scope::Platform(Platform::Pinterest);
        if let Err(reason) = self.check_gate(scope, 0.0).await {
            return Err(ControlError::Denied(reason));
        }

        let report = self
            .coordinator
            .delete_pins(Arc::clone(&self.platforms.pinterest_pins), pin_ids, &self.audit)
            .await;

        self.log(AuditEntry::new(
            "control_plane",
            "delete_batch",
            report.failures.is_empty(),
            format!("{}/{} pins deleted", report.deleted, report.total),
        ))
        .await;

        Ok(report)
    }

    // ------------------------------------------------------------------
    // Safety surface
    // ------------------------------------------------------------------

    /// Activate a kill switch
    pub async fn kill(&self, scope: Scope, reason: Option<String>) {
        self.gate.activate(scope, reason.clone());
        self.log(AuditEntry::new(
            "safety_gate",
            "kill",
            true,
            format!("{} ({})", scope, reason.as_deref().unwrap_or("no reason")),
        ))
        .await;
    }

    /// Resume a scope
    pub async fn resume(&self, scope: Scope) {
        self.gate.resume(scope);
        self.log(AuditEntry::new("safety_gate", "resume", true, scope.to_string()))
            .await;
    }

    /// Kill-switch and budget state
    pub fn safety_status(&self) -> SafetyStatus {
        self.gate.status()
    }
}
