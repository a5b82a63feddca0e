//! Staged pipeline from photo inbox to approval queue.
//!
//! Stages run strictly in order: import, vision, provenance, content
//! generation, SKU generation, queue. The safety gate is consulted before
//! every paid stage; a denial blocks the run at that stage and preserves
//! everything earlier stages already produced. Only one run may be active
//! at a time, enforced in-process and with a lock file on disk.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use glob::glob;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{DraftGenerator, GeneratedCopy};
use crate::config::{CostTable, ProductSpec};
use crate::domain::{required_tag_count, ContentDraft, Platform, Sku, SkuCatalog};

use super::audit_log::{AuditEntry, AuditLog};
use super::safety::{Decision, SafetyGate, SafetyStatus, Scope};
use super::store::{photo_content_id, ContentStore};

/// Days a queued draft stays actionable before the expiry sweep rejects it
const DRAFT_TTL_DAYS: i64 = 14;

/// Inbox extensions worth importing
const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff"];

/// Filler tags appended when generated Etsy copy comes back short
const ETSY_FILLER_TAGS: &[&str] = &[
    "fine art print",
    "wall art",
    "photography print",
    "landscape photo",
    "home decor",
    "gallery wall",
    "nature print",
    "archival print",
    "photo art",
    "large wall art",
    "minimalist decor",
    "gift for photographer",
    "matted print",
];

#[derive(Debug, Error)]
pub enum RunnerError {
    /// Another run holds the lock
    #[error("a pipeline run is already in progress")]
    Busy,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Import,
    Vision,
    Provenance,
    ContentGen,
    SkuGen,
    Queue,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Import,
        Stage::Vision,
        Stage::Provenance,
        Stage::ContentGen,
        Stage::SkuGen,
        Stage::Queue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Import => "import",
            Stage::Vision => "vision",
            Stage::Provenance => "provenance",
            Stage::ContentGen => "content_gen",
            Stage::SkuGen => "sku_gen",
            Stage::Queue => "queue",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
    Blocked,
    Skipped,
}

/// Outcome of a single stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub status: StageStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StageResult {
    fn completed(stage: Stage, detail: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Completed,
            detail: Some(detail.into()),
        }
    }

    fn blocked(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Blocked,
            detail: Some(reason.into()),
        }
    }

    fn skipped(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            detail: None,
        }
    }
}

/// Overall run outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithErrors,
    Blocked,
    Failed,
}

/// Persisted record of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    pub dry_run: bool,
    pub status: RunStatus,
    pub stages: Vec<StageResult>,

    /// Photos picked up by the import stage
    pub photos: usize,

    /// Drafts placed on the approval queue
    pub drafts_queued: usize,

    pub errors: Vec<String>,
}

impl RunReport {
    fn new(dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            status: RunStatus::Completed,
            stages: Vec::new(),
            photos: 0,
            drafts_queued: 0,
            errors: Vec::new(),
        }
    }

    /// Mark every stage not yet recorded as skipped
    fn skip_remaining(&mut self) {
        for stage in Stage::ALL {
            if !self.stages.iter().any(|s| s.stage == stage) {
                self.stages.push(StageResult::skipped(stage));
            }
        }
    }

    fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
        if self.status == RunStatus::Completed && !self.errors.is_empty() {
            self.status = RunStatus::CompletedWithErrors;
        }
    }
}

/// Health snapshot for the `health` command
#[derive(Debug, Serialize)]
pub struct Health {
    pub last_run: Option<RunReport>,
    pub safety: SafetyStatus,
    pub recent_activity: Vec<AuditEntry>,
}

/// A photo picked up from the inbox
#[derive(Debug, Clone)]
struct InboxPhoto {
    photo_id: String,
    filename: String,
    collection: Option<String>,
}

/// Drives the staged pipeline
pub struct PipelineRunner {
    inbox: PathBuf,
    store: ContentStore,
    gate: Arc<SafetyGate>,
    audit: AuditLog,
    generator: Arc<dyn DraftGenerator>,
    costs: CostTable,
    products: Vec<ProductSpec>,
    sku_catalog_path: PathBuf,
    last_run_path: PathBuf,
    lock_path: PathBuf,
    run_lock: tokio::sync::Mutex<()>,
    cancel: Arc<AtomicBool>,
}

impl PipelineRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inbox: PathBuf,
        store: ContentStore,
        gate: Arc<SafetyGate>,
        audit: AuditLog,
        generator: Arc<dyn DraftGenerator>,
        costs: CostTable,
        products: Vec<ProductSpec>,
        sku_catalog_path: PathBuf,
        last_run_path: PathBuf,
        lock_path: PathBuf,
    ) -> Self {
        Self {
            inbox,
            store,
            gate,
            audit,
            generator,
            costs,
            products,
            sku_catalog_path,
            last_run_path,
            lock_path,
            run_lock: tokio::sync::Mutex::new(()),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for cancelling an in-flight run between stages
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Execute the full pipeline. A dry run walks every stage and reports
    /// what would happen without external calls or queue writes.
    #[instrument(skip(self))]
    pub async fn run(&self, dry_run: bool) -> Result<RunReport, RunnerError> {
        // In-process exclusivity first, then the cross-process lock file
        let _guard = self.run_lock.try_lock().map_err(|_| RunnerError::Busy)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .with_context(|| format!("Failed to open lock file: {}", self.lock_path.display()))?;
        lock_file.try_lock_exclusive().map_err(|_| RunnerError::Busy)?;

        self.cancel.store(false, Ordering::SeqCst);
        let mut report = RunReport::new(dry_run);
        info!(run_id = %report.run_id, dry_run, "Starting pipeline run");

        self.log(AuditEntry::new(
            "pipeline",
            "run_started",
            true,
            format!("run {} (dry_run={})", report.run_id, dry_run),
        ))
        .await;

        let result = self.execute_stages(&mut report).await;
        if let Err(e) = result {
            report.errors.push(e.to_string());
            report.status = RunStatus::Failed;
            report.skip_remaining();
        }

        report.finish();
        self.persist(&report).await?;
        self.log(AuditEntry::new(
            "pipeline",
            "run_finished",
            report.status != RunStatus::Failed,
            format!(
                "run {}: {:?}, {} photo(s), {} draft(s) queued",
                report.run_id, report.status, report.photos, report.drafts_queued
            ),
        ))
        .await;

        Ok(report)
    }

    /// Cancel any in-flight run at the next stage boundary
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Read the last persisted run plus safety and audit context
    pub async fn status(&self) -> Result<Health> {
        let last_run = if self.last_run_path.exists() {
            let content = tokio::fs::read_to_string(&self.last_run_path)
                .await
                .with_context(|| {
                    format!("Failed to read last run: {}", self.last_run_path.display())
                })?;
            Some(serde_json::from_str(&content).context("Failed to parse last run report")?)
        } else {
            None
        };

        Ok(Health {
            last_run,
            safety: self.gate.status(),
            recent_activity: self.audit.recent_activity(10).await?,
        })
    }

    async fn execute_stages(&self, report: &mut RunReport) -> Result<()> {
        // ---------------- import ----------------
        let photos = self.import_photos().await?;
        report.photos = photos.len();
        report.stages.push(StageResult::completed(
            Stage::Import,
            format!("{} photo(s) in inbox", photos.len()),
        ));

        if photos.is_empty() {
            report.skip_remaining();
            return Ok(());
        }
        if self.check_cancelled(report, Stage::Vision) {
            return Ok(());
        }

        // ---------------- vision ----------------
        let vision_estimate = self.costs.vision_usd * photos.len() as f64;
        if let Some(reason) = self.gate_stage(report, Stage::Vision, vision_estimate).await {
            debug!(%reason, "Vision stage blocked");
            return Ok(());
        }

        let mut analyses: Vec<(InboxPhoto, GeneratedCopy)> = Vec::new();
        if report.dry_run {
            report.stages.push(StageResult::completed(
                Stage::Vision,
                format!("dry run: {} analysis call(s) skipped", photos.len()),
            ));
            for photo in photos {
                analyses.push((photo, GeneratedCopy::default()));
            }
        } else {
            let mut analyzed = 0usize;
            for photo in photos {
                if let Err(denied) = self.gate.ledger().try_reserve(self.costs.vision_usd) {
                    report.errors.push(format!(
                        "vision skipped for {}: {}",
                        photo.photo_id, denied
                    ));
                    continue;
                }
                match self.generator.analyze_photo(&photo.photo_id).await {
                    Ok(analysis) => {
                        self.gate
                            .ledger()
                            .settle(self.costs.vision_usd, self.costs.vision_usd);
                        self.log(
                            AuditEntry::new(
                                "pipeline:vision",
                                "analyze",
                                true,
                                format!("photo {}", photo.photo_id),
                            )
                            .with_cost(self.costs.vision_usd),
                        )
                        .await;
                        analyzed += 1;
                        analyses.push((photo, analysis));
                    }
                    Err(e) => {
                        self.gate.ledger().settle(self.costs.vision_usd, 0.0);
                        self.log(AuditEntry::new(
                            "pipeline:vision",
                            "analyze",
                            false,
                            format!("photo {}: {}", photo.photo_id, e),
                        ))
                        .await;
                        report
                            .errors
                            .push(format!("vision failed for {}: {}", photo.photo_id, e));
                    }
                }
            }
            report.stages.push(StageResult::completed(
                Stage::Vision,
                format!("{} photo(s) analyzed", analyzed),
            ));
        }

        if self.check_cancelled(report, Stage::Provenance) {
            return Ok(());
        }

        // ---------------- provenance ----------------
        for (photo, _) in &analyses {
            self.log(AuditEntry::new(
                "pipeline:provenance",
                "record",
                true,
                format!("photo {} <- {}", photo.photo_id, photo.filename),
            ))
            .await;
        }
        report.stages.push(StageResult::completed(
            Stage::Provenance,
            format!("{} photo(s) recorded", analyses.len()),
        ));

        if self.check_cancelled(report, Stage::ContentGen) {
            return Ok(());
        }

        // ---------------- content generation ----------------
        // One draft per (photo, platform), skipping pairs already queued
        let mut worklist: Vec<(InboxPhoto, GeneratedCopy, Platform)> = Vec::new();
        for (photo, analysis) in &analyses {
            for platform in Platform::ALL {
                if !self.store.has_draft_for(&photo.photo_id, platform).await? {
                    worklist.push((photo.clone(), analysis.clone(), platform));
                }
            }
        }

        let copy_estimate = self.costs.copy_usd * worklist.len() as f64;
        if let Some(reason) = self
            .gate_stage(report, Stage::ContentGen, copy_estimate)
            .await
        {
            debug!(%reason, "Content generation blocked");
            return Ok(());
        }

        let mut drafts: Vec<ContentDraft> = Vec::new();
        if report.dry_run {
            report.stages.push(StageResult::completed(
                Stage::ContentGen,
                format!("dry run: {} draft(s) would be generated", worklist.len()),
            ));
        } else {
            for (photo, analysis, platform) in worklist {
                if let Err(denied) = self.gate.ledger().try_reserve(self.costs.copy_usd) {
                    report.errors.push(format!(
                        "copy skipped for {} ({}): {}",
                        photo.photo_id, platform, denied
                    ));
                    continue;
                }
                match self.generator.draft_copy(&analysis, platform).await {
                    Ok(copy) => {
                        self.gate
                            .ledger()
                            .settle(self.costs.copy_usd, self.costs.copy_usd);
                        self.log(
                            AuditEntry::new(
                                "pipeline:content_gen",
                                "draft",
                                true,
                                format!("photo {} for {}", photo.photo_id, platform),
                            )
                            .with_cost(self.costs.copy_usd),
                        )
                        .await;
                        drafts.push(self.build_draft(&photo, copy, platform));
                    }
                    Err(e) => {
                        self.gate.ledger().settle(self.costs.copy_usd, 0.0);
                        self.log(AuditEntry::new(
                            "pipeline:content_gen",
                            "draft",
                            false,
                            format!("photo {} for {}: {}", photo.photo_id, platform, e),
                        ))
                        .await;
                        report.errors.push(format!(
                            "copy failed for {} ({}): {}",
                            photo.photo_id, platform, e
                        ));
                    }
                }
            }
            report.stages.push(StageResult::completed(
                Stage::ContentGen,
                format!("{} draft(s) generated", drafts.len()),
            ));
        }

        if self.check_cancelled(report, Stage::SkuGen) {
            return Ok(());
        }

        // ---------------- sku generation ----------------
        let mut catalog = SkuCatalog::load(&self.sku_catalog_path)
            .await
            .context("Failed to load SKU catalog")?;
        let mut new_skus = 0usize;
        for (photo, _) in &analyses {
            if catalog.has_photo(&photo.photo_id) {
                continue;
            }
            for product in &self.products {
                catalog.add(Sku {
                    id: format!("{}-{}-{}", photo.photo_id, product.size, product.paper),
                    photo_id: photo.photo_id.clone(),
                    size: product.size.clone(),
                    paper: product.paper.clone(),
                    cost_usd: product.cost_usd,
                    min_price_usd: product.min_price_usd,
                    retail_usd: product.retail_usd,
                });
                new_skus += 1;
            }
        }
        if new_skus > 0 && !report.dry_run {
            catalog
                .save(&self.sku_catalog_path)
                .await
                .context("Failed to save SKU catalog")?;
        }
        report.stages.push(StageResult::completed(
            Stage::SkuGen,
            format!("{} SKU(s) priced", new_skus),
        ));

        if self.check_cancelled(report, Stage::Queue) {
            return Ok(());
        }

        // ---------------- queue ----------------
        if report.dry_run {
            report.stages.push(StageResult::completed(
                Stage::Queue,
                "dry run: queue untouched".to_string(),
            ));
            return Ok(());
        }

        for draft in drafts {
            let platform = draft.platform;
            let item = self.store.create(draft).await?;
            report.drafts_queued += 1;
            self.log(AuditEntry::new(
                "pipeline:queue",
                "enqueue",
                true,
                format!("item {} ({}) pending review", item.id, platform),
            ))
            .await;
        }

        let swept = self.store.sweep_expired(Utc::now()).await?;
        report.stages.push(StageResult::completed(
            Stage::Queue,
            format!(
                "{} draft(s) queued, {} stale draft(s) expired",
                report.drafts_queued,
                swept.expired.len()
            ),
        ));

        Ok(())
    }

    /// Gate a paid stage. On denial, records the blocked stage, skips the
    /// rest, and sets the run status.
    async fn gate_stage(
        &self,
        report: &mut RunReport,
        stage: Stage,
        estimated_cost: f64,
    ) -> Option<String> {
        match self.gate.check(Scope::Global, estimated_cost) {
            Decision::Allow => None,
            Decision::Deny(reason) => {
                let reason = reason.to_string();
                warn!(stage = %stage, %reason, "Stage blocked by safety gate");
                self.log(AuditEntry::new(
                    "pipeline",
                    "stage_blocked",
                    false,
                    format!("{}: {}", stage, reason),
                ))
                .await;
                report.stages.push(StageResult::blocked(stage, &reason));
                report.skip_remaining();
                report.status = RunStatus::Blocked;
                Some(reason)
            }
        }
    }

    /// Cancellation is honored only at stage boundaries
    fn check_cancelled(&self, report: &mut RunReport, next: Stage) -> bool {
        if self.cancel.load(Ordering::SeqCst) {
            report.errors.push(format!("run cancelled before {}", next));
            report.status = RunStatus::Failed;
            report.skip_remaining();
            true
        } else {
            false
        }
    }

    /// Scan the inbox, deriving content-hash photo ids
    async fn import_photos(&self) -> Result<Vec<InboxPhoto>> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for ext in PHOTO_EXTENSIONS {
            let pattern = self.inbox.join("**").join(format!("*.{}", ext));
            let pattern = pattern.to_string_lossy().to_string();
            for entry in glob(&pattern).context("Invalid inbox glob pattern")? {
                match entry {
                    Ok(path) => paths.push(path),
                    Err(e) => warn!(error = %e, "Skipping unreadable inbox entry"),
                }
            }
        }
        paths.sort();

        let mut photos = Vec::with_capacity(paths.len());
        for path in paths {
            let photo_id = photo_content_id(&path)
                .await
                .with_context(|| format!("Failed to hash photo: {}", path.display()))?;
            photos.push(InboxPhoto {
                photo_id,
                filename: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                collection: collection_of(&self.inbox, &path),
            });
        }
        Ok(photos)
    }

    fn build_draft(&self, photo: &InboxPhoto, copy: GeneratedCopy, platform: Platform) -> ContentDraft {
        let mut tags = copy.tags;
        if let Some(required) = required_tag_count(platform) {
            tags.truncate(required);
            let mut filler = ETSY_FILLER_TAGS.iter();
            while tags.len() < required {
                match filler.next() {
                    Some(tag) if !tags.iter().any(|t| t == tag) => tags.push(tag.to_string()),
                    Some(_) => {}
                    None => break,
                }
            }
        }

        ContentDraft {
            platform,
            photo_id: photo.photo_id.clone(),
            title: copy.title.unwrap_or_else(|| photo.filename.clone()),
            body: copy.body,
            tags,
            collection: photo.collection.clone(),
            filename: photo.filename.clone(),
            image_url: None,
            expires_at: Some(Utc::now() + Duration::days(DRAFT_TTL_DAYS)),
        }
    }

    async fn persist(&self, report: &RunReport) -> Result<()> {
        if let Some(parent) = self.last_run_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&self.last_run_path, content)
            .await
            .with_context(|| {
                format!("Failed to write run report: {}", self.last_run_path.display())
            })?;
        Ok(())
    }

    async fn log(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.append(&entry).await {
            warn!(error = %e, "Failed to append audit entry");
        }
    }
}

/// Collection name from the photo's position under the inbox root
fn collection_of(inbox: &Path, path: &Path) -> Option<String> {
    let parent = path.parent()?;
    let relative = parent.strip_prefix(inbox).ok()?;
    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative.to_string_lossy().replace('\\', "/"))
    }
}
