//! Pipeline Integration Tests
//!
//! Runs the full photo-to-queue pipeline against a temp inbox with a mock
//! generator: dry runs, gate blocking, idempotent re-runs, and the
//! single-run lock.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fs2::FileExt;
use tempfile::TempDir;

use darkroom::adapters::{DraftGenerator, GeneratedCopy, PlatformError};
use darkroom::config::{CostTable, ProductSpec};
use darkroom::core::{
    AuditLog, BudgetCap, BudgetLedger, ContentFilter, ContentStore, PipelineRunner, RunStatus,
    RunnerError, SafetyGate, Scope, Stage, StageStatus,
};
use darkroom::domain::{ContentStatus, Platform, SkuCatalog};

/// Generator that returns canned copy and counts calls
struct CannedGenerator {
    analyze_calls: AtomicUsize,
    draft_calls: AtomicUsize,
}

impl CannedGenerator {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            analyze_calls: AtomicUsize::new(0),
            draft_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DraftGenerator for CannedGenerator {
    async fn analyze_photo(&self, photo_ref: &str) -> Result<GeneratedCopy, PlatformError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        Ok(GeneratedCopy {
            title: None,
            body: format!("analysis of {}", photo_ref),
            tags: vec!["landscape".to_string()],
        })
    }

    async fn draft_copy(
        &self,
        analysis: &GeneratedCopy,
        platform: Platform,
    ) -> Result<GeneratedCopy, PlatformError> {
        self.draft_calls.fetch_add(1, Ordering::SeqCst);
        Ok(GeneratedCopy {
            title: Some(format!("Draft for {}", platform)),
            body: analysis.body.clone(),
            tags: vec!["landscape".to_string(), "print".to_string()],
        })
    }
}

struct Fixture {
    _temp: TempDir,
    home: PathBuf,
    inbox: PathBuf,
    generator: Arc<CannedGenerator>,
    gate: Arc<SafetyGate>,
}

impl Fixture {
    async fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let home = temp.path().join("state");
        let inbox = temp.path().join("inbox");
        tokio::fs::create_dir_all(&inbox).await.unwrap();

        let ledger = Arc::new(BudgetLedger::new(BudgetCap::Uncapped));
        Self {
            home,
            inbox,
            generator: CannedGenerator::new(),
            gate: Arc::new(SafetyGate::new(ledger)),
            _temp: temp,
        }
    }

    async fn add_photo(&self, name: &str, bytes: &[u8]) {
        tokio::fs::write(self.inbox.join(name), bytes).await.unwrap();
    }

    async fn runner(&self) -> PipelineRunner {
        let store = ContentStore::open(&self.home).await.unwrap();
        let audit = AuditLog::open(&self.home).await.unwrap();

        PipelineRunner::new(
            self.inbox.clone(),
            store,
            Arc::clone(&self.gate),
            audit,
            self.generator.clone(),
            CostTable {
                vision_usd: 0.02,
                copy_usd: 0.03,
                publish_usd: 0.01,
            },
            vec![
                ProductSpec {
                    size: "12x18".to_string(),
                    paper: "matte".to_string(),
                    cost_usd: 8.0,
                    min_price_usd: 20.0,
                    retail_usd: 45.0,
                },
                ProductSpec {
                    size: "24x36".to_string(),
                    paper: "lustre".to_string(),
                    cost_usd: 18.0,
                    min_price_usd: 40.0,
                    retail_usd: 95.0,
                },
            ],
            self.home.join("skus.json"),
            self.home.join("last_run.json"),
            self.home.join("pipeline.lock"),
        )
    }

    async fn store(&self) -> ContentStore {
        ContentStore::open(&self.home).await.unwrap()
    }
}

#[tokio::test]
async fn test_run_queues_one_draft_per_platform() {
    let fixture = Fixture::new().await;
    fixture.add_photo("ridge.jpg", b"ridge photo bytes").await;

    let runner = fixture.runner().await;
    let report = runner.run(false).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.photos, 1);
    assert_eq!(report.drafts_queued, Platform::ALL.len());
    assert_eq!(fixture.generator.analyze_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        fixture.generator.draft_calls.load(Ordering::SeqCst),
        Platform::ALL.len()
    );

    let pending = fixture
        .store()
        .await
        .list(&ContentFilter {
            status: Some(ContentStatus::Pending),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(pending.len(), Platform::ALL.len());

    // Every queued draft carries an expiry for the sweep
    assert!(pending.iter().all(|item| item.expires_at.is_some()));

    // Etsy drafts always carry exactly 13 tags
    let etsy = pending
        .iter()
        .find(|item| item.platform == Platform::Etsy)
        .unwrap();
    assert_eq!(etsy.tags.len(), 13);
}

#[tokio::test]
async fn test_run_prices_skus_per_product_variant() {
    let fixture = Fixture::new().await;
    fixture.add_photo("ridge.jpg", b"ridge photo bytes").await;

    let runner = fixture.runner().await;
    runner.run(false).await.unwrap();

    let catalog = SkuCatalog::load(&fixture.home.join("skus.json")).await.unwrap();
    let pending = fixture
        .store()
        .await
        .list(&ContentFilter::default())
        .await
        .unwrap();
    let photo_id = &pending[0].photo_id;

    let skus = catalog.for_photo(photo_id);
    assert_eq!(skus.len(), 2);
    assert!(skus.iter().any(|s| s.size == "12x18"));
    assert!(skus.iter().any(|s| s.size == "24x36"));
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let fixture = Fixture::new().await;
    fixture.add_photo("ridge.jpg", b"ridge photo bytes").await;

    let runner = fixture.runner().await;
    runner.run(false).await.unwrap();
    let second = runner.run(false).await.unwrap();

    // The photo is still in the inbox but everything is already queued
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.drafts_queued, 0);
    assert_eq!(fixture.generator.draft_calls.load(Ordering::SeqCst), Platform::ALL.len());
}

#[tokio::test]
async fn test_renamed_photo_does_not_reenter() {
    let fixture = Fixture::new().await;
    fixture.add_photo("ridge.jpg", b"same bytes").await;

    let runner = fixture.runner().await;
    runner.run(false).await.unwrap();

    // Same content under a new name hashes to the same photo id
    tokio::fs::rename(
        fixture.inbox.join("ridge.jpg"),
        fixture.inbox.join("renamed.jpg"),
    )
    .await
    .unwrap();

    let second = runner.run(false).await.unwrap();
    assert_eq!(second.drafts_queued, 0);
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let fixture = Fixture::new().await;
    fixture.add_photo("ridge.jpg", b"ridge photo bytes").await;

    let runner = fixture.runner().await;
    let report = runner.run(true).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(fixture.generator.analyze_calls.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.generator.draft_calls.load(Ordering::SeqCst), 0);

    let queued = fixture
        .store()
        .await
        .list(&ContentFilter::default())
        .await
        .unwrap();
    assert!(queued.is_empty());
    assert!(!fixture.home.join("skus.json").exists());
}

#[tokio::test]
async fn test_global_kill_blocks_at_vision_and_preserves_import() {
    let fixture = Fixture::new().await;
    fixture.add_photo("ridge.jpg", b"ridge photo bytes").await;
    fixture.gate.activate(Scope::Global, Some("halt".to_string()));

    let runner = fixture.runner().await;
    let report = runner.run(false).await.unwrap();

    assert_eq!(report.status, RunStatus::Blocked);
    assert_eq!(fixture.generator.analyze_calls.load(Ordering::SeqCst), 0);

    let import = report
        .stages
        .iter()
        .find(|s| s.stage == Stage::Import)
        .unwrap();
    assert_eq!(import.status, StageStatus::Completed);

    let vision = report
        .stages
        .iter()
        .find(|s| s.stage == Stage::Vision)
        .unwrap();
    assert_eq!(vision.status, StageStatus::Blocked);

    let queue = report
        .stages
        .iter()
        .find(|s| s.stage == Stage::Queue)
        .unwrap();
    assert_eq!(queue.status, StageStatus::Skipped);
}

#[tokio::test]
async fn test_empty_inbox_completes_without_generator_calls() {
    let fixture = Fixture::new().await;

    let runner = fixture.runner().await;
    let report = runner.run(false).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.photos, 0);
    assert_eq!(fixture.generator.analyze_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concurrent_run_is_refused() {
    let fixture = Fixture::new().await;
    let runner = fixture.runner().await;

    // Must run once first so the state directory and lock file exist
    runner.run(false).await.unwrap();

    // Hold the lock the way another process would
    let lock = std::fs::OpenOptions::new()
        .write(true)
        .open(fixture.home.join("pipeline.lock"))
        .unwrap();
    lock.lock_exclusive().unwrap();

    let err = runner.run(false).await.unwrap_err();
    assert!(matches!(err, RunnerError::Busy));
}

#[tokio::test]
async fn test_last_run_report_is_persisted() {
    let fixture = Fixture::new().await;
    fixture.add_photo("ridge.jpg", b"ridge photo bytes").await;

    let runner = fixture.runner().await;
    let report = runner.run(false).await.unwrap();

    let health = runner.status().await.unwrap();
    let last = health.last_run.unwrap();
    assert_eq!(last.run_id, report.run_id);
    assert_eq!(last.status, RunStatus::Completed);
    assert!(!health.recent_activity.is_empty());
}
