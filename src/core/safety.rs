//! Kill switches and the safety gate in front of every external action.
//!
//! The gate composes two checks: manual kill switches (global and
//! per-platform, AND semantics) and the daily budget cap. `check()` is
//! synchronous and in-memory; it sits on the hot path of every publish
//! call and must never block on I/O.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Platform;

use super::budget::{BudgetCap, BudgetLedger};

/// Gating granularity: the global switch overrides every platform scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    Platform(Platform),
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Platform(p) => p.as_str(),
        }
    }

    /// Parse a scope name ("global" or a platform name)
    pub fn parse(s: &str) -> Option<Scope> {
        match s {
            "global" => Some(Scope::Global),
            "instagram" => Some(Scope::Platform(Platform::Instagram)),
            "pinterest" => Some(Scope::Platform(Platform::Pinterest)),
            "etsy" => Some(Scope::Platform(Platform::Etsy)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manual override blocking all external actions for a scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitch {
    pub active: bool,
    pub reason: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self {
            active: false,
            reason: None,
            activated_at: None,
        }
    }
}

/// Why the gate denied an action. Always names the specific gate so the
/// operator knows what to change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "gate")]
pub enum DenyReason {
    /// The global kill switch is active
    GlobalKill { reason: Option<String> },

    /// The scope's own kill switch is active
    PlatformKill {
        scope: String,
        reason: Option<String>,
    },

    /// Estimated cost would push today's spend over the cap
    BudgetExceeded {
        spent: f64,
        cap: f64,
        estimated: f64,
    },
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::GlobalKill { reason } => write!(
                f,
                "global kill switch active ({})",
                reason.as_deref().unwrap_or("no reason recorded")
            ),
            DenyReason::PlatformKill { scope, reason } => write!(
                f,
                "{} kill switch active ({})",
                scope,
                reason.as_deref().unwrap_or("no reason recorded")
            ),
            DenyReason::BudgetExceeded {
                spent,
                cap,
                estimated,
            } => write!(
                f,
                "daily budget exceeded: ${:.2} spent + ${:.2} estimated > ${:.2} cap",
                spent, estimated, cap
            ),
        }
    }
}

/// Outcome of a gate check. Returned, never thrown: a denial is "blocked
/// by design", not a bug.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Point-in-time view of safety state (the `safety status` surface)
#[derive(Debug, Clone, Serialize)]
pub struct SafetyStatus {
    pub kill_switches: Vec<(String, KillSwitch)>,
    pub spent_today_usd: f64,
    pub cap_today_usd: Option<f64>,
}

/// Snapshot persisted to safety.json
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SafetySnapshot {
    switches: Vec<(Scope, KillSwitch)>,
}

/// The safety gate. Owns kill-switch state and consults the budget ledger;
/// never calls out to platforms itself.
pub struct SafetyGate {
    switches: RwLock<HashMap<Scope, KillSwitch>>,
    ledger: Arc<BudgetLedger>,

    /// Snapshot path (None = in-memory only, used by tests)
    snapshot_path: Option<PathBuf>,
}

impl SafetyGate {
    /// Create an in-memory gate
    pub fn new(ledger: Arc<BudgetLedger>) -> Self {
        Self {
            switches: RwLock::new(HashMap::new()),
            ledger,
            snapshot_path: None,
        }
    }

    /// Open a gate backed by a JSON snapshot of switch state
    pub fn open(ledger: Arc<BudgetLedger>, snapshot_path: PathBuf) -> Result<Self> {
        let switches = if snapshot_path.exists() {
            let content = std::fs::read_to_string(&snapshot_path).with_context(|| {
                format!("Failed to read safety snapshot: {}", snapshot_path.display())
            })?;
            let snapshot: SafetySnapshot =
                serde_json::from_str(&content).context("Failed to parse safety snapshot")?;
            snapshot.switches.into_iter().collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            switches: RwLock::new(switches),
            ledger,
            snapshot_path: Some(snapshot_path),
        })
    }

    /// Check whether an action in `scope` costing `estimated_cost_usd` may
    /// proceed. Checks, in order: global kill, scope kill, budget cap.
    /// Synchronous and cheap; callers audit-log the outcome.
    pub fn check(&self, scope: Scope, estimated_cost_usd: f64) -> Decision {
        let switches = self.switches.read().expect("safety gate lock poisoned");

        if let Some(global) = switches.get(&Scope::Global) {
            if global.active {
                return Decision::Deny(DenyReason::GlobalKill {
                    reason: global.reason.clone(),
                });
            }
        }

        if scope != Scope::Global {
            if let Some(switch) = switches.get(&scope) {
                if switch.active {
                    return Decision::Deny(DenyReason::PlatformKill {
                        scope: scope.as_str().to_string(),
                        reason: switch.reason.clone(),
                    });
                }
            }
        }
        drop(switches);

        if let Err(denied) = self.ledger.would_allow(estimated_cost_usd) {
            return Decision::Deny(DenyReason::BudgetExceeded {
                spent: denied.spent,
                cap: denied.cap,
                estimated: denied.estimated,
            });
        }

        Decision::Allow
    }

    /// Activate a kill switch. Idempotent: re-activating updates the reason.
    pub fn activate(&self, scope: Scope, reason: Option<String>) {
        {
            let mut switches = self.switches.write().expect("safety gate lock poisoned");
            let switch = switches.entry(scope).or_default();
            switch.active = true;
            switch.reason = reason.clone();
            switch.activated_at = Some(Utc::now());
        }
        tracing::warn!(scope = %scope, reason = reason.as_deref().unwrap_or("-"), "Kill switch activated");
        self.persist();
    }

    /// Resume a scope. No confirmation at this layer; that is a UI concern.
    pub fn resume(&self, scope: Scope) {
        {
            let mut switches = self.switches.write().expect("safety gate lock poisoned");
            let switch = switches.entry(scope).or_default();
            switch.active = false;
            switch.reason = None;
            switch.activated_at = None;
        }
        tracing::info!(scope = %scope, "Kill switch resumed");
        self.persist();
    }

    /// Whether a specific switch is currently active
    pub fn is_active(&self, scope: Scope) -> bool {
        let switches = self.switches.read().expect("safety gate lock poisoned");
        switches.get(&scope).map(|s| s.active).unwrap_or(false)
    }

    /// Current switch + budget state
    pub fn status(&self) -> SafetyStatus {
        let switches = self.switches.read().expect("safety gate lock poisoned");

        let mut kill_switches: Vec<(String, KillSwitch)> = [Scope::Global]
            .into_iter()
            .chain(Platform::ALL.into_iter().map(Scope::Platform))
            .map(|scope| {
                (
                    scope.as_str().to_string(),
                    switches.get(&scope).cloned().unwrap_or_default(),
                )
            })
            .collect();
        kill_switches.sort_by(|a, b| a.0.cmp(&b.0));

        SafetyStatus {
            kill_switches,
            spent_today_usd: self.ledger.spent_today(),
            cap_today_usd: match self.ledger.cap_today() {
                BudgetCap::Uncapped => None,
                BudgetCap::Capped(cap) => Some(cap),
            },
        }
    }

    /// Shared handle to the budget ledger (for reserve/settle by callers)
    pub fn ledger(&self) -> Arc<BudgetLedger> {
        Arc::clone(&self.ledger)
    }

    fn persist(&self) {
        if let Some(ref path) = self.snapshot_path {
            let snapshot = {
                let switches = self.switches.read().expect("safety gate lock poisoned");
                SafetySnapshot {
                    switches: switches.iter().map(|(k, v)| (*k, v.clone())).collect(),
                }
            };
            if let Ok(json) = serde_json::to_string_pretty(&snapshot) {
                if let Err(e) = std::fs::write(path, json) {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to persist safety snapshot");
                }
            }
        }
    }
}
