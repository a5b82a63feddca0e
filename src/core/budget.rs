//! Daily spend ledger with an optional hard cap.
//!
//! Spend is tracked per UTC day; a new day's entry appears on the first
//! write after rollover (there is no explicit reset event). All mutation
//! goes through a single mutex so concurrent publish/generate calls can
//! never under-count spend and slip past the cap.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cap policy for the daily budget.
///
/// A missing `daily_budget_usd` in config means *no cap*; an explicit `0.0`
/// means a zero cap that blocks every paid action. The two are deliberately
/// distinct configuration choices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BudgetCap {
    /// No budget enforcement
    Uncapped,

    /// Hard daily cap in USD (may be 0.0)
    Capped(f64),
}

impl BudgetCap {
    /// Build from the optional config value
    pub fn from_config(daily_budget_usd: Option<f64>) -> Self {
        match daily_budget_usd {
            Some(cap) => BudgetCap::Capped(cap),
            None => BudgetCap::Uncapped,
        }
    }
}

/// Returned when a reservation would push today's spend over the cap
#[derive(Debug, Clone, PartialEq, Error)]
#[error("daily budget exceeded: spent ${spent:.2} + ${estimated:.2} > cap ${cap:.2}")]
pub struct BudgetDenied {
    pub spent: f64,
    pub cap: f64,
    pub estimated: f64,
}

/// Snapshot persisted to budget.json
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BudgetSnapshot {
    /// Spend per UTC day
    days: HashMap<NaiveDate, f64>,
}

/// Per-UTC-day spend ledger
pub struct BudgetLedger {
    cap: BudgetCap,

    /// spent_usd per day; guarded so check-then-add is atomic
    days: Mutex<HashMap<NaiveDate, f64>>,

    /// Snapshot path (None = in-memory only, used by tests)
    snapshot_path: Option<PathBuf>,
}

impl BudgetLedger {
    /// Create an in-memory ledger
    pub fn new(cap: BudgetCap) -> Self {
        Self {
            cap,
            days: Mutex::new(HashMap::new()),
            snapshot_path: None,
        }
    }

    /// Open a ledger backed by a JSON snapshot
    pub fn open(cap: BudgetCap, snapshot_path: PathBuf) -> Result<Self> {
        let days = if snapshot_path.exists() {
            let content = std::fs::read_to_string(&snapshot_path).with_context(|| {
                format!("Failed to read budget snapshot: {}", snapshot_path.display())
            })?;
            let snapshot: BudgetSnapshot =
                serde_json::from_str(&content).context("Failed to parse budget snapshot")?;
            snapshot.days
        } else {
            HashMap::new()
        };

        Ok(Self {
            cap,
            days: Mutex::new(days),
            snapshot_path: Some(snapshot_path),
        })
    }

    /// Today's UTC date key
    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Spend recorded so far today
    pub fn spent_today(&self) -> f64 {
        let days = self.days.lock().expect("budget ledger lock poisoned");
        days.get(&Self::today()).copied().unwrap_or(0.0)
    }

    /// The cap in effect today
    pub fn cap_today(&self) -> BudgetCap {
        self.cap
    }

    /// Whether spending `estimated` more right now would stay under the cap.
    /// Read-only; the atomic commitment happens in [`Self::try_reserve`].
    pub fn would_allow(&self, estimated: f64) -> Result<(), BudgetDenied> {
        match self.cap {
            BudgetCap::Uncapped => Ok(()),
            BudgetCap::Capped(cap) => {
                let spent = self.spent_today();
                if spent + estimated > cap {
                    Err(BudgetDenied {
                        spent,
                        cap,
                        estimated,
                    })
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Add to today's spend unconditionally. Monotonic within a day:
    /// negative amounts are clamped to zero.
    pub fn record_spend(&self, amount_usd: f64) {
        let amount = amount_usd.max(0.0);
        {
            let mut days = self.days.lock().expect("budget ledger lock poisoned");
            *days.entry(Self::today()).or_insert(0.0) += amount;
        }
        self.persist();
    }

    /// Atomically re-check the cap and reserve an estimated cost. Two
    /// concurrent callers cannot both squeeze under the cap, because the
    /// check and the add happen under one lock.
    pub fn try_reserve(&self, estimated: f64) -> Result<(), BudgetDenied> {
        let estimated = estimated.max(0.0);
        {
            let mut days = self.days.lock().expect("budget ledger lock poisoned");
            let spent = days.entry(Self::today()).or_insert(0.0);

            if let BudgetCap::Capped(cap) = self.cap {
                if *spent + estimated > cap {
                    return Err(BudgetDenied {
                        spent: *spent,
                        cap,
                        estimated,
                    });
                }
            }

            *spent += estimated;
        }
        self.persist();
        Ok(())
    }

    /// Adjust a reservation to the actual cost once the call has completed.
    /// Small overshoot past the cap from estimation error is accepted;
    /// the day's spend never drops below what was actually spent.
    pub fn settle(&self, reserved: f64, actual: f64) {
        let delta = actual.max(0.0) - reserved.max(0.0);
        {
            let mut days = self.days.lock().expect("budget ledger lock poisoned");
            let spent = days.entry(Self::today()).or_insert(0.0);
            *spent = (*spent + delta).max(0.0);
        }
        self.persist();
    }

    /// Write the snapshot, if this ledger is file-backed
    fn persist(&self) {
        if let Some(ref path) = self.snapshot_path {
            let snapshot = {
                let days = self.days.lock().expect("budget ledger lock poisoned");
                BudgetSnapshot { days: days.clone() }
            };
            if let Ok(json) = serde_json::to_string_pretty(&snapshot) {
                if let Err(e) = std::fs::write(path, json) {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to persist budget snapshot");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_uncapped_allows_everything() {
        let ledger = BudgetLedger::new(BudgetCap::Uncapped);
        ledger.record_spend(1_000_000.0);
        assert!(ledger.would_allow(1_000_000.0).is_ok());
        assert!(ledger.try_reserve(1_000_000.0).is_ok());
    }

    #[test]
    fn test_zero_cap_blocks_all_paid_actions() {
        let ledger = BudgetLedger::new(BudgetCap::Capped(0.0));
        let denied = ledger.would_allow(0.01).unwrap_err();
        assert_eq!(denied.cap, 0.0);

        // Free actions still pass
        assert!(ledger.would_allow(0.0).is_ok());
    }

    #[test]
    fn test_reserve_then_settle_down() {
        let ledger = BudgetLedger::new(BudgetCap::Capped(5.0));

        ledger.try_reserve(1.0).unwrap();
        assert!((ledger.spent_today() - 1.0).abs() < 1e-9);

        // Actual cost came in lower than the estimate
        ledger.settle(1.0, 0.4);
        assert!((ledger.spent_today() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_cap_denial_reports_numbers() {
        let ledger = BudgetLedger::new(BudgetCap::Capped(5.0));
        ledger.record_spend(4.5);

        let denied = ledger.try_reserve(1.0).unwrap_err();
        assert!((denied.spent - 4.5).abs() < 1e-9);
        assert!((denied.cap - 5.0).abs() < 1e-9);
        assert!((denied.estimated - 1.0).abs() < 1e-9);

        // The failed reservation must not have counted
        assert!((ledger.spent_today() - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_increments_sum_exactly() {
        let ledger = Arc::new(BudgetLedger::new(BudgetCap::Uncapped));
        let mut handles = Vec::new();

        for _ in 0..16 {
            let ledger = Arc::clone(&ledger);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    ledger.record_spend(0.25);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert!((ledger.spent_today() - 16.0 * 100.0 * 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_concurrent_reservations_respect_cap() {
        let ledger = Arc::new(BudgetLedger::new(BudgetCap::Capped(10.0)));
        let mut handles = Vec::new();

        for _ in 0..32 {
            let ledger = Arc::clone(&ledger);
            handles.push(std::thread::spawn(move || ledger.try_reserve(1.0).is_ok()));
        }

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(granted, 10);
        assert!((ledger.spent_today() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_spend_is_clamped() {
        let ledger = BudgetLedger::new(BudgetCap::Uncapped);
        ledger.record_spend(1.0);
        ledger.record_spend(-5.0);
        assert!((ledger.spent_today() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("budget.json");

        {
            let ledger = BudgetLedger::open(BudgetCap::Capped(5.0), path.clone()).unwrap();
            ledger.record_spend(2.5);
        }

        let reopened = BudgetLedger::open(BudgetCap::Capped(5.0), path).unwrap();
        assert!((reopened.spent_today() - 2.5).abs() < 1e-9);
    }
}
