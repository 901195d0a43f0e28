//! netpilot core - strategy routing, diagnosis, approval and memory for
//! network operations.

pub mod adapters;
pub mod approval;
pub mod batch;
pub mod classifier;
pub mod config;
pub mod diagnosis;
pub mod fast;
pub mod health;
pub mod knowledge;
pub mod memory;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod session;

pub use adapters::{CommandAdapter, FixtureAdapter, ScriptedAdapter, ToolAdapter};
pub use approval::{ApprovalGate, ApprovedPlan, Resumed};
pub use batch::{BatchExecutor, BatchOptions};
pub use classifier::{IntentClassifier, KeywordClassifier, LlmClassifier, ScriptedClassifier};
pub use config::Config;
pub use diagnosis::DiagnosticEngine;
pub use fast::{FastExecutor, FastResult};
pub use health::{HealthReport, HealthState};
pub use knowledge::{KnowledgeBase, StaticKnowledge};
pub use memory::{EpisodicMemory, Fingerprint, MemoryHit, MemoryPayload, MemoryRecord, MemoryStats};
pub use orchestrator::Orchestrator;
pub use registry::ToolRegistry;
pub use router::StrategyRouter;
pub use session::{SessionStore, SessionSummary};
