//! Layered fault diagnosis.
//!
//! A run is a bounded state machine: cached sweep, ranking, live
//! confirmation, then either a narrower round or a conclusion. The engine
//! only ever proposes remediation; applying it goes through the approval gate.

pub mod engine;
pub mod probes;
pub mod state;

pub use engine::{quick_pass_confidence, supervise, DiagnosticEngine};
pub use probes::{ProbeOutcome, ProbeRequest, ProbeResult};
pub use state::{DiagnosticState, SubProblem};
