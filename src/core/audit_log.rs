//! Append-only audit ledger with file-based persistence.
//!
//! Entries are stored as newline-delimited JSON (JSONL). Entries are never
//! updated or deleted; the only read operation is a filtered, time-ordered
//! scan.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// One immutable audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When this happened
    pub timestamp: DateTime<Utc>,

    /// Component that acted (e.g. "safety_gate", "publisher:etsy")
    pub component: String,

    /// Action name (e.g. "publish", "kill", "create_listing")
    pub action: String,

    /// Whether the action succeeded
    pub success: bool,

    /// Spend attributed to this action, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,

    /// Free-form detail (NO secrets)
    pub detail: String,
}

impl AuditEntry {
    /// Create an entry stamped now
    pub fn new(
        component: impl Into<String>,
        action: impl Into<String>,
        success: bool,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            component: component.into(),
            action: action.into(),
            success,
            cost_usd: None,
            detail: detail.into(),
        }
    }

    /// Attach a cost to the entry
    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }
}

/// Filter for audit reads
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Only entries from this component
    pub component: Option<String>,

    /// Only entries with this action
    pub action: Option<String>,

    /// Only entries at or after this instant
    pub since: Option<DateTime<Utc>>,

    /// Maximum entries to return (0 = unlimited)
    pub limit: usize,

    /// Return the most recent entries first
    pub newest_first: bool,
}

/// JSONL-backed append-only audit log
pub struct AuditLog {
    /// Path to the audit.jsonl file
    log_path: PathBuf,
}

impl AuditLog {
    /// Create a log at an explicit path
    pub fn new(log_path: PathBuf) -> Self {
        Self { log_path }
    }

    /// Open the log in a home directory, creating the directory if needed
    pub async fn open(home: &Path) -> Result<Self> {
        fs::create_dir_all(home)
            .await
            .with_context(|| format!("Failed to create state directory: {}", home.display()))?;
        Ok(Self::new(home.join("audit.jsonl")))
    }

    /// Append an entry to the ledger
    pub async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
            .with_context(|| format!("Failed to open audit log: {}", self.log_path.display()))?;

        let json = serde_json::to_string(entry).context("Failed to serialize audit entry")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write audit entry")?;
        file.flush().await.context("Failed to flush audit entry")?;

        Ok(())
    }

    /// Read entries matching a filter, in time order
    pub async fn read(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.log_path)
            .await
            .with_context(|| format!("Failed to open audit log: {}", self.log_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut entries = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditEntry = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse audit entry: {}", line))?;

            if let Some(ref component) = filter.component {
                if &entry.component != component {
                    continue;
                }
            }
            if let Some(ref action) = filter.action {
                if &entry.action != action {
                    continue;
                }
            }
            if let Some(since) = filter.since {
                if entry.timestamp < since {
                    continue;
                }
            }

            entries.push(entry);
        }

        if filter.newest_first {
            entries.reverse();
        }
        if filter.limit > 0 {
            entries.truncate(filter.limit);
        }

        Ok(entries)
    }

    /// The n most recent entries, newest first (health surface)
    pub async fn recent_activity(&self, n: usize) -> Result<Vec<AuditEntry>> {
        self.read(&AuditFilter {
            limit: n,
            newest_first: true,
            ..Default::default()
        })
        .await
    }

    /// Total spend recorded since an instant (dashboard support)
    pub async fn spend_since(&self, since: DateTime<Utc>) -> Result<f64> {
        let entries = self
            .read(&AuditFilter {
                since: Some(since),
                ..Default::default()
            })
            .await?;

        Ok(entries.iter().filter_map(|e| e.cost_usd).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_log() -> (AuditLog, TempDir) {
        let temp = TempDir::new().unwrap();
        (AuditLog::new(temp.path().join("audit.jsonl")), temp)
    }

    #[tokio::test]
    async fn test_append_and_read_order() {
        let (log, _temp) = create_test_log();

        for i in 0..5 {
            let entry = AuditEntry::new("safety_gate", "check", true, format!("check {}", i));
            log.append(&entry).await.unwrap();
        }

        let entries = log.read(&AuditFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].detail, "check 0");
        assert_eq!(entries[4].detail, "check 4");
    }

    #[tokio::test]
    async fn test_component_filter() {
        let (log, _temp) = create_test_log();

        log.append(&AuditEntry::new("safety_gate", "check", true, ""))
            .await
            .unwrap();
        log.append(&AuditEntry::new("publisher:etsy", "create_listing", false, "timeout"))
            .await
            .unwrap();

        let entries = log
            .read(&AuditFilter {
                component: Some("publisher:etsy".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert!(!entries[0].success);
    }

    #[tokio::test]
    async fn test_newest_first_and_limit() {
        let (log, _temp) = create_test_log();

        for i in 0..10 {
            log.append(&AuditEntry::new("pipeline", "stage", true, format!("stage {}", i)))
                .await
                .unwrap();
        }

        let recent = log.recent_activity(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].detail, "stage 9");
        assert_eq!(recent[2].detail, "stage 7");
    }

    #[tokio::test]
    async fn test_spend_sum() {
        let (log, _temp) = create_test_log();
        let start = Utc::now();

        log.append(&AuditEntry::new("publisher:instagram", "publish", true, "").with_cost(0.05))
            .await
            .unwrap();
        log.append(&AuditEntry::new("pipeline", "vision", true, "").with_cost(0.02))
            .await
            .unwrap();
        log.append(&AuditEntry::new("pipeline", "stage", true, ""))
            .await
            .unwrap();

        let spend = log.spend_since(start).await.unwrap();
        assert!((spend - 0.07).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_log_reads_empty() {
        let (log, _temp) = create_test_log();
        let entries = log.read(&AuditFilter::default()).await.unwrap();
        assert!(entries.is_empty());
    }
}
