//! Progressive primary-key discovery.
//!
//! The scanner walks a seven-step (row-sample x column-subset) schedule,
//! the decision engine applies pure promotion/elimination/escalation logic
//! after each step.

pub mod decision;
pub mod models;
pub mod scanner;

pub use decision::DecisionEngine;
pub use models::{
    ColumnCandidate, CompositeCandidate, Decision, ScanResult, ScanStatus, ScanStep, StepResult,
    Verdict, parse_candidate,
};
pub use scanner::{ProgressiveScanner, pk_priority};
