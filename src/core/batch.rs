//! Fan-out of independent per-item platform operations.
//!
//! The coordinator applies the same externally-visible operation to N
//! independent sub-items with bounded concurrency and reports per-item
//! outcomes in aggregate. One item's failure never aborts the batch, and a
//! batch call never returns an error for per-item failures: partial failure
//! is a first-class result.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::{ListingApi, PinApi, PlatformError};
use crate::domain::{ContentItem, Sku};

use super::audit_log::{AuditEntry, AuditLog};

/// Per-SKU outcome status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkuOutcomeStatus {
    Created,
    Failed,
}

/// Outcome of one listing-creation attempt
#[derive(Debug, Clone, Serialize)]
pub struct SkuOutcome {
    pub sku_id: String,
    pub status: SkuOutcomeStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of an Etsy listing batch
#[derive(Debug, Clone, Serialize)]
pub struct ListingBatchReport {
    pub content_id: Uuid,
    pub created: usize,
    pub total: usize,
    pub results: Vec<SkuOutcome>,
}

impl ListingBatchReport {
    /// At least one listing went through
    pub fn any_created(&self) -> bool {
        self.created > 0
    }
}

/// One failed pin deletion
#[derive(Debug, Clone, Serialize)]
pub struct PinFailure {
    pub pin_id: String,
    pub error: String,
}

/// Aggregate result of a pin batch delete
#[derive(Debug, Clone, Serialize)]
pub struct PinBatchReport {
    pub deleted: usize,
    pub total: usize,
    pub failures: Vec<PinFailure>,
}

/// Executes batches with a bounded worker pool
pub struct BatchCoordinator {
    /// Maximum in-flight operations (respects third-party rate limits)
    concurrency: usize,

    /// Past this budget no new items are started; in-flight ones finish
    timeout: Option<Duration>,
}

impl Default for BatchCoordinator {
    fn default() -> Self {
        Self::new(4, None)
    }
}

impl BatchCoordinator {
    /// Create a coordinator with a pool width and optional timeout
    pub fn new(concurrency: usize, timeout: Option<Duration>) -> Self {
        Self {
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    /// Run `op` over every input with bounded concurrency. Results come
    /// back in input order; a panicked task surfaces as a failed item, not
    /// a failed batch.
    async fn run_all<I, T, F, Fut>(&self, inputs: Vec<I>, op: F) -> Vec<(I, Result<T, PlatformError>)>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PlatformError>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let op = Arc::new(op);
        let deadline = self.timeout.map(|t| Instant::now() + t);

        let mut set = JoinSet::new();
        for (idx, input) in inputs.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let op = Arc::clone(&op);
            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("batch semaphore closed");

                // Timeout degrades to "stop starting new items"; an item
                // already dispatched to a third party runs to completion.
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        return (
                            idx,
                            Err(PlatformError::Network(
                                "batch timeout reached before start".to_string(),
                            )),
                        );
                    }
                }

                (idx, op(input).await)
            });
        }

        let mut slots: Vec<Option<Result<T, PlatformError>>> =
            inputs.iter().map(|_| None).collect();

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => warn!(error = %e, "Batch task aborted"),
            }
        }

        inputs
            .into_iter()
            .zip(slots)
            .map(|(input, slot)| {
                let result = slot.unwrap_or_else(|| {
                    Err(PlatformError::Network("batch task aborted".to_string()))
                });
                (input, result)
            })
            .collect()
    }

    /// Create one Etsy listing per SKU. Every per-SKU outcome is
    /// individually audit-logged; the caller decides the item's state
    /// transition from the aggregate.
    pub async fn create_listings(
        &self,
        api: Arc<dyn ListingApi>,
        item: &ContentItem,
        skus: Vec<Sku>,
        audit: &AuditLog,
    ) -> ListingBatchReport {
        let total = skus.len();
        let item = Arc::new(item.clone());

        let outcomes = {
            let item = Arc::clone(&item);
            self.run_all(skus, move |sku: Sku| {
                let api = Arc::clone(&api);
                let item = Arc::clone(&item);
                async move { api.create_listing(&item, &sku).await }
            })
            .await
        };

        let mut results = Vec::with_capacity(total);
        for (sku, result) in outcomes {
            let outcome = match result {
                Ok(listing_id) => SkuOutcome {
                    sku_id: sku.id.clone(),
                    status: SkuOutcomeStatus::Created,
                    listing_id: Some(listing_id),
                    error: None,
                },
                Err(e) => SkuOutcome {
                    sku_id: sku.id.clone(),
                    status: SkuOutcomeStatus::Failed,
                    listing_id: None,
                    error: Some(e.to_string()),
                },
            };

            let entry = AuditEntry::new(
                "batch:etsy",
                "create_listing",
                outcome.status == SkuOutcomeStatus::Created,
                match &outcome.status {
                    SkuOutcomeStatus::Created => format!(
                        "content {} sku {} -> listing {}",
                        item.id,
                        sku.id,
                        outcome.listing_id.as_deref().unwrap_or("-")
                    ),
                    SkuOutcomeStatus::Failed => format!(
                        "content {} sku {}: {}",
                        item.id,
                        sku.id,
                        outcome.error.as_deref().unwrap_or("-")
                    ),
                },
            );
            if let Err(e) = audit.append(&entry).await {
                warn!(error = %e, "Failed to audit-log listing outcome");
            }

            results.push(outcome);
        }

        let created = results
            .iter()
            .filter(|r| r.status == SkuOutcomeStatus::Created)
            .count();

        info!(content = %item.id, created, total, "Listing batch finished");

        ListingBatchReport {
            content_id: item.id,
            created,
            total,
            results,
        }
    }

    /// Delete each pin independently. Partial failure is expected and
    /// reported, never retried automatically.
    pub async fn delete_pins(
        &self,
        api: Arc<dyn PinApi>,
        pin_ids: Vec<String>,
        audit: &AuditLog,
    ) -> PinBatchReport {
        let total = pin_ids.len();

        let outcomes = self
            .run_all(pin_ids, move |pin_id: String| {
                let api = Arc::clone(&api);
                async move { api.delete_pin(&pin_id).await }
            })
            .await;

        let mut failures = Vec::new();
        for (pin_id, result) in outcomes {
            let (success, detail) = match &result {
                Ok(()) => (true, format!("pin {} deleted", pin_id)),
                Err(e) => (false, format!("pin {}: {}", pin_id, e)),
            };

            let entry = AuditEntry::new("batch:pinterest", "delete_pin", success, detail);
            if let Err(e) = audit.append(&entry).await {
                warn!(error = %e, "Failed to audit-log pin deletion");
            }

            if let Err(e) = result {
                failures.push(PinFailure {
                    pin_id,
                    error: e.to_string(),
                });
            }
        }

        let deleted = total - failures.len();
        info!(deleted, total, "Pin delete batch finished");

        PinBatchReport {
            deleted,
            total,
            failures,
        }
    }
}
