//! Control-plane engine: approval queue, safety gate, budget ledger,
//! audit log, batch coordinator, and the staged pipeline runner.

pub mod audit_log;
pub mod batch;
pub mod budget;
pub mod control;
pub mod runner;
pub mod safety;
pub mod store;

pub use audit_log::{AuditEntry, AuditFilter, AuditLog};
pub use batch::{
    BatchCoordinator, ListingBatchReport, PinBatchReport, PinFailure, SkuOutcome, SkuOutcomeStatus,
};
pub use budget::{BudgetCap, BudgetDenied, BudgetLedger};
pub use control::{ControlError, ControlPlane, PlatformSet};
pub use runner::{Health, PipelineRunner, RunReport, RunStatus, RunnerError, Stage, StageStatus};
pub use safety::{Decision, DenyReason, KillSwitch, SafetyGate, SafetyStatus, Scope};
pub use store::{
    photo_content_id, ContentEvent, ContentEventKind, ContentFilter, ContentStore, StoreError,
    SweepReport,
};
