//! Shared types for netpilot components.
//! v0.4.0: threshold rules and inspection documents moved here from the core.

pub mod approval;
pub mod diagnosis;
pub mod error;
pub mod inspection;
pub mod outcome;
pub mod plan;
pub mod query;
pub mod report;
pub mod session;
pub mod threshold;
pub mod tool;

pub use approval::{ApprovalDecision, ApprovalRequest, AuditEntry, PlanOrigin, Resolution, ResumeSnapshot};
pub use diagnosis::{
    ConclusionStatus, DiagnosticConclusion, Evidence, EvidenceSource, Hypothesis, Layer, Phase, Transition,
    LIVE_CONFIDENCE_CEILING, QUICK_PASS_CEILING,
};
pub use error::{NetpilotError, Result};
pub use inspection::{CheckSpec, ExecutionMode, FailurePolicy, InspectionConfig, Schedule, TargetSelector};
pub use outcome::{Outcome, OutcomeStatus};
pub use plan::ExecutionPlan;
pub use query::{Query, RouteDecision, Strategy};
pub use report::{BatchReport, TargetOutcome, TargetStatus};
pub use session::{SessionState, Speaker, Turn};
pub use threshold::{Comparator, RuleOutcome, Severity, ThresholdRule, Violation};
pub use tool::{Capability, FieldKind, FieldSpec, RiskLevel, ToolDescriptor, ToolOutput, ToolSchema};

/// Workspace version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
