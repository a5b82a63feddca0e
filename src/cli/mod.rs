//! Command-line interface for darkroom.
//!
//! Maps the approval queue, safety controls, publishing, batches, and the
//! pipeline onto subcommands. Review and safety commands work without any
//! platform credentials; publishing commands construct their adapter from
//! the environment and fail fast when a credential is missing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::adapters::{
    EtsyAdapter, InstagramAdapter, ListingApi, PinApi, PinterestAdapter, PlatformError,
    PublishResult, Publisher, VisionClient,
};
use crate::config::{self, ResolvedConfig};
use crate::core::{
    AuditFilter, AuditLog, BatchCoordinator, BudgetCap, BudgetLedger, ContentFilter, ContentStore,
    ControlError, ControlPlane, PipelineRunner, PlatformSet, RunStatus, SafetyGate, Scope,
};
use crate::domain::{ApprovalAction, ContentItem, ContentStatus, Platform, Sku};

/// darkroom - publication control plane for the studio agent
#[derive(Parser, Debug)]
#[command(name = "darkroom")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List items on the approval queue
    List {
        /// Filter by status
        #[arg(short, long, value_enum)]
        status: Option<ContentStatus>,

        /// Filter by platform
        #[arg(short, long, value_enum)]
        platform: Option<Platform>,

        /// Maximum number of items to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Approve a pending item for publishing
    Approve {
        /// Content item ID
        id: String,
    },

    /// Reject a pending or deferred item
    Reject {
        /// Content item ID
        id: String,
    },

    /// Defer a pending item for later review
    Defer {
        /// Content item ID
        id: String,
    },

    /// Return a deferred item to the pending queue
    Requeue {
        /// Content item ID
        id: String,
    },

    /// Publish an item to its platform
    Publish {
        /// Content item ID
        id: String,
    },

    /// Create Etsy listings for an approved item, one per SKU
    BatchCreate {
        /// Content item ID
        id: String,

        /// SKU ids to list (defaults to every SKU priced for the photo)
        #[arg(short, long)]
        sku: Vec<String>,
    },

    /// Delete Pinterest pins in bulk
    DeletePins {
        /// Pin ids to delete
        pin_ids: Vec<String>,
    },

    /// Activate a kill switch (global, instagram, pinterest, etsy)
    Kill {
        /// Scope to halt
        scope: String,

        /// Why (recorded in the audit log)
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Deactivate a kill switch
    Resume {
        /// Scope to resume
        scope: String,
    },

    /// Show kill-switch and budget state
    Safety,

    /// Run the photo-to-queue pipeline
    Run {
        /// Walk every stage without external calls or queue writes
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the last pipeline run and recent activity
    Health,

    /// Expire stale pending drafts
    Sweep,

    /// Show the audit trail
    Audit {
        /// Filter by component (e.g. "safety_gate", "publisher:etsy")
        #[arg(short, long)]
        component: Option<String>,

        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::List {
                status,
                platform,
                limit,
            } => list_content(status, platform, limit).await,
            Commands::Approve { id } => review(&id, ApprovalAction::Approve).await,
            Commands::Reject { id } => review(&id, ApprovalAction::Reject).await,
            Commands::Defer { id } => review(&id, ApprovalAction::Defer).await,
            Commands::Requeue { id } => review(&id, ApprovalAction::Requeue).await,
            Commands::Publish { id } => publish(&id).await,
            Commands::BatchCreate { id, sku } => batch_create(&id, sku).await,
            Commands::DeletePins { pin_ids } => delete_pins(pin_ids).await,
            Commands::Kill { scope, reason } => kill(&scope, reason).await,
            Commands::Resume { scope } => resume(&scope).await,
            Commands::Safety => show_safety().await,
            Commands::Run { dry_run } => run_pipeline(dry_run).await,
            Commands::Health => show_health().await,
            Commands::Sweep => sweep().await,
            Commands::Audit { component, limit } => show_audit(component, limit).await,
            Commands::Config => show_config(),
        }
    }
}

// ----------------------------------------------------------------------
// Wiring
// ----------------------------------------------------------------------

/// Build the control plane. Platform slots come from the environment for
/// publishing commands; every other command gets refusing placeholders so
/// it works without credentials.
async fn control_plane(cfg: &ResolvedConfig, publishing: bool) -> Result<ControlPlane> {
    let store = ContentStore::open(&cfg.home).await?;
    let audit = AuditLog::open(&cfg.home).await?;
    let ledger = Arc::new(BudgetLedger::open(
        BudgetCap::from_config(cfg.daily_budget_usd),
        cfg.budget_snapshot_path(),
    )?);
    let gate = Arc::new(SafetyGate::open(ledger, cfg.safety_snapshot_path())?);
    let coordinator = BatchCoordinator::new(
        cfg.batch.concurrency,
        cfg.batch.timeout_seconds.map(Duration::from_secs),
    );

    let platforms = if publishing {
        platforms_from_env(cfg)?
    } else {
        offline_platforms()
    };

    Ok(ControlPlane::new(
        store,
        gate,
        audit,
        coordinator,
        platforms,
        cfg.costs,
        cfg.sku_catalog_path(),
    ))
}

fn platforms_from_env(cfg: &ResolvedConfig) -> Result<PlatformSet> {
    let pinterest = Arc::new(PinterestAdapter::from_env(cfg.gallery_root.clone())?);
    Ok(PlatformSet {
        instagram: Arc::new(InstagramAdapter::from_env()?),
        pinterest: Arc::clone(&pinterest) as Arc<dyn Publisher>,
        etsy_listings: Arc::new(EtsyAdapter::from_env()?),
        pinterest_pins: pinterest,
    })
}

/// Placeholder adapters for commands that never publish
fn offline_platforms() -> PlatformSet {
    let pinterest = Arc::new(Unconfigured(Platform::Pinterest));
    PlatformSet {
        instagram: Arc::new(Unconfigured(Platform::Instagram)),
        pinterest: Arc::clone(&pinterest) as Arc<dyn Publisher>,
        etsy_listings: Arc::new(Unconfigured(Platform::Etsy)),
        pinterest_pins: pinterest,
    }
}

struct Unconfigured(Platform);

impl Unconfigured {
    fn refuse<T>(&self) -> Result<T, PlatformError> {
        Err(PlatformError::InvalidContent(format!(
            "{} adapter not configured; set its environment variables",
            self.0
        )))
    }
}

#[async_trait::async_trait]
impl Publisher for Unconfigured {
    fn platform(&self) -> Platform {
        self.0
    }

    async fn publish(&self, _item: &ContentItem) -> Result<PublishResult, PlatformError> {
        self.refuse()
    }
}

#[async_trait::async_trait]
impl ListingApi for Unconfigured {
    async fn create_listing(
        &self,
        _item: &ContentItem,
        _sku: &Sku,
    ) -> Result<String, PlatformError> {
        self.refuse()
    }
}

#[async_trait::async_trait]
impl PinApi for Unconfigured {
    async fn delete_pin(&self, _pin_id: &str) -> Result<(), PlatformError> {
        self.refuse()
    }

    async fn list_boards(&self) -> Result<Vec<crate::adapters::Board>, PlatformError> {
        self.refuse()
    }
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("Invalid content item ID: {}", id))
}

// ----------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------

async fn list_content(
    status: Option<ContentStatus>,
    platform: Option<Platform>,
    limit: usize,
) -> Result<()> {
    let cfg = config::config()?;
    let plane = control_plane(cfg, false).await?;

    let items = plane
        .list_content(&ContentFilter {
            status,
            platform,
            limit,
            newest_first: true,
        })
        .await?;

    if items.is_empty() {
        println!("No matching items.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<9}  {:<8}  {:<12}  TITLE",
        "ID", "PLATFORM", "STATUS", "PHOTO"
    );
    for item in items {
        println!(
            "{:<36}  {:<9}  {:<8}  {:<12}  {}",
            item.id, item.platform, item.status, item.photo_id, item.title
        );
    }
    Ok(())
}

async fn review(id: &str, action: ApprovalAction) -> Result<()> {
    let id = parse_id(id)?;
    let cfg = config::config()?;
    let plane = control_plane(cfg, false).await?;

    let to = plane.review(id, action).await?;
    println!("Item {} is now {}", id, to);
    Ok(())
}

async fn publish(id: &str) -> Result<()> {
    let id = parse_id(id)?;
    let cfg = config::config()?;
    let plane = control_plane(cfg, true).await?;

    match plane.publish(id).await {
        Ok(result) => {
            for warning in &result.warnings {
                eprintln!("warning: {}", warning);
            }
            match result.external_id {
                Some(external_id) => println!("Published {} -> {}", id, external_id),
                None => println!("Published {}", id),
            }
            Ok(())
        }
        Err(ControlError::Denied(reason)) => {
            eprintln!("Blocked: {}", reason);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

async fn batch_create(id: &str, mut sku_ids: Vec<String>) -> Result<()> {
    let id = parse_id(id)?;
    let cfg = config::config()?;
    let plane = control_plane(cfg, true).await?;

    if sku_ids.is_empty() {
        // Default to every SKU priced for the item's photo
        let item = plane
            .store()
            .get(id)
            .await?
            .with_context(|| format!("No content item {}", id))?;
        let catalog = crate::domain::SkuCatalog::load(&cfg.sku_catalog_path()).await?;
        sku_ids = catalog
            .for_photo(&item.photo_id)
            .into_iter()
            .map(|s| s.id.clone())
            .collect();
        if sku_ids.is_empty() {
            anyhow::bail!("No SKUs priced for item {}", id);
        }
    }

    match plane.create_listing_batch(id, &sku_ids).await {
        Ok(report) => {
            println!("{}/{} listings created", report.created, report.total);
            for outcome in &report.results {
                match &outcome.listing_id {
                    Some(listing_id) => println!("  {} -> {}", outcome.sku_id, listing_id),
                    None => println!(
                        "  {} FAILED: {}",
                        outcome.sku_id,
                        outcome.error.as_deref().unwrap_or("unknown error")
                    ),
                }
            }
            if !report.any_created() {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(ControlError::Denied(reason)) => {
            eprintln!("Blocked: {}", reason);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

async fn delete_pins(pin_ids: Vec<String>) -> Result<()> {
    if pin_ids.is_empty() {
        anyhow::bail!("No pin ids given");
    }
    let cfg = config::config()?;
    let plane = control_plane(cfg, true).await?;

    match plane.delete_pin_batch(pin_ids).await {
        Ok(report) => {
            println!("{}/{} pins deleted", report.deleted, report.total);
            for failure in &report.failures {
                println!("  {} FAILED: {}", failure.pin_id, failure.error);
            }
            Ok(())
        }
        Err(ControlError::Denied(reason)) => {
            eprintln!("Blocked: {}", reason);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

fn parse_scope(s: &str) -> Result<Scope> {
    Scope::parse(s)
        .with_context(|| format!("Unknown scope '{}' (global, instagram, pinterest, etsy)", s))
}

async fn kill(scope: &str, reason: Option<String>) -> Result<()> {
    let scope = parse_scope(scope)?;
    let cfg = config::config()?;
    let plane = control_plane(cfg, false).await?;

    plane.kill(scope, reason).await;
    println!("Kill switch active for {}", scope);
    Ok(())
}

async fn resume(scope: &str) -> Result<()> {
    let scope = parse_scope(scope)?;
    let cfg = config::config()?;
    let plane = control_plane(cfg, false).await?;

    plane.resume(scope).await;
    println!("{} resumed", scope);
    Ok(())
}

async fn show_safety() -> Result<()> {
    let cfg = config::config()?;
    let plane = control_plane(cfg, false).await?;
    let status = plane.safety_status();

    match status.cap_today_usd {
        Some(cap) => println!(
            "Budget: ${:.2} spent of ${:.2} today",
            status.spent_today_usd, cap
        ),
        None => println!("Budget: ${:.2} spent today (no cap)", status.spent_today_usd),
    }

    let active: Vec<_> = status
        .kill_switches
        .iter()
        .filter(|(_, switch)| switch.active)
        .collect();
    if active.is_empty() {
        println!("Kill switches: none active");
    } else {
        println!("Kill switches:");
        for (scope, switch) in active {
            let since = switch
                .activated_at
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            println!(
                "  {} since {} ({})",
                scope,
                since,
                switch.reason.as_deref().unwrap_or("no reason given")
            );
        }
    }
    Ok(())
}

async fn build_runner(cfg: &ResolvedConfig, with_generator: bool) -> Result<PipelineRunner> {
    let store = ContentStore::open(&cfg.home).await?;
    let audit = AuditLog::open(&cfg.home).await?;
    let ledger = Arc::new(BudgetLedger::open(
        BudgetCap::from_config(cfg.daily_budget_usd),
        cfg.budget_snapshot_path(),
    )?);
    let gate = Arc::new(SafetyGate::open(ledger, cfg.safety_snapshot_path())?);

    let generator: Arc<dyn crate::adapters::DraftGenerator> = if with_generator {
        Arc::new(VisionClient::from_env()?)
    } else {
        Arc::new(offline_generator())
    };

    Ok(PipelineRunner::new(
        cfg.photo_inbox.clone(),
        store,
        gate,
        audit,
        generator,
        cfg.costs,
        cfg.products.clone(),
        cfg.sku_catalog_path(),
        cfg.last_run_path(),
        cfg.pipeline_lock_path(),
    ))
}

struct OfflineGenerator;

#[async_trait::async_trait]
impl crate::adapters::DraftGenerator for OfflineGenerator {
    async fn analyze_photo(
        &self,
        _photo_ref: &str,
    ) -> Result<crate::adapters::GeneratedCopy, PlatformError> {
        Err(PlatformError::InvalidContent(
            "vision generator not configured; set VISION_ENDPOINT and VISION_TOKEN".to_string(),
        ))
    }

    async fn draft_copy(
        &self,
        _analysis: &crate::adapters::GeneratedCopy,
        _platform: Platform,
    ) -> Result<crate::adapters::GeneratedCopy, PlatformError> {
        Err(PlatformError::InvalidContent(
            "vision generator not configured; set VISION_ENDPOINT and VISION_TOKEN".to_string(),
        ))
    }
}

fn offline_generator() -> OfflineGenerator {
    OfflineGenerator
}

async fn run_pipeline(dry_run: bool) -> Result<()> {
    let cfg = config::config()?;
    // A dry run walks the stages without calling the generator
    let runner = build_runner(cfg, !dry_run).await?;

    let report = runner.run(dry_run).await?;

    println!("Run {} ({:?})", report.run_id, report.status);
    for stage in &report.stages {
        println!(
            "  {:<12} {:<10} {}",
            stage.stage,
            format!("{:?}", stage.status).to_lowercase(),
            stage.detail.as_deref().unwrap_or("")
        );
    }
    for error in &report.errors {
        eprintln!("error: {}", error);
    }

    if matches!(report.status, RunStatus::Failed | RunStatus::Blocked) {
        std::process::exit(1);
    }
    Ok(())
}

async fn show_health() -> Result<()> {
    let cfg = config::config()?;
    let runner = build_runner(cfg, false).await?;
    let health = runner.status().await?;

    match &health.last_run {
        Some(run) => {
            println!(
                "Last run: {} ({:?}) started {}",
                run.run_id,
                run.status,
                run.started_at.format("%Y-%m-%d %H:%M UTC")
            );
            println!(
                "  {} photo(s), {} draft(s) queued",
                run.photos, run.drafts_queued
            );
        }
        None => println!("No pipeline runs recorded."),
    }

    match health.safety.cap_today_usd {
        Some(cap) => println!(
            "Budget: ${:.2} of ${:.2}",
            health.safety.spent_today_usd, cap
        ),
        None => println!("Budget: ${:.2} (no cap)", health.safety.spent_today_usd),
    }

    if !health.recent_activity.is_empty() {
        println!("Recent activity:");
        for entry in &health.recent_activity {
            println!(
                "  {} {:<18} {:<14} {}",
                entry.timestamp.format("%m-%d %H:%M"),
                entry.component,
                entry.action,
                if entry.success { "ok" } else { "FAILED" }
            );
        }
    }
    Ok(())
}

async fn sweep() -> Result<()> {
    let cfg = config::config()?;
    let plane = control_plane(cfg, false).await?;

    let report = plane.sweep_expired().await?;
    println!("{} stale draft(s) expired", report.expired.len());
    for id in &report.expired {
        println!("  {}", id);
    }
    Ok(())
}

async fn show_audit(component: Option<String>, limit: usize) -> Result<()> {
    let cfg = config::config()?;
    let audit = AuditLog::open(&cfg.home).await?;

    let entries = audit
        .read(&AuditFilter {
            component,
            limit,
            newest_first: true,
            ..Default::default()
        })
        .await?;

    if entries.is_empty() {
        println!("No audit entries.");
        return Ok(());
    }

    for entry in entries {
        let cost = entry
            .cost_usd
            .map(|c| format!(" (${:.2})", c))
            .unwrap_or_default();
        println!(
            "{} {:<18} {:<14} {:<6} {}{}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.component,
            entry.action,
            if entry.success { "ok" } else { "FAILED" },
            entry.detail,
            cost
        );
    }
    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("Home:         {}", cfg.home.display());
    println!("Photo inbox:  {}", cfg.photo_inbox.display());
    println!("Gallery root: {}", cfg.gallery_root);
    match cfg.daily_budget_usd {
        Some(cap) => println!("Daily budget: ${:.2}", cap),
        None => println!("Daily budget: uncapped"),
    }
    println!(
        "Costs:        vision ${:.2}, copy ${:.2}, publish ${:.2}",
        cfg.costs.vision_usd, cfg.costs.copy_usd, cfg.costs.publish_usd
    );
    println!(
        "Batch:        {} concurrent, timeout {}",
        cfg.batch.concurrency,
        cfg.batch
            .timeout_seconds
            .map(|t| format!("{}s", t))
            .unwrap_or_else(|| "none".to_string())
    );
    println!("Products:     {} variant(s)", cfg.products.len());
    match &cfg.config_file {
        Some(path) => println!("Config file:  {}", path.display()),
        None => println!("Config file:  (defaults)"),
    }
    Ok(())
}
