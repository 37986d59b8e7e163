//! Data models for progressive PK discovery.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Configuration for a single progressive scan step.
///
/// The schedule is an inverse progression: early steps take small row
/// samples across many columns, later steps take large row samples across
/// few columns.
#[derive(Debug, Clone)]
pub struct ScanStep {
    pub step_number: u32,
    pub row_sample_pct: f64,
    pub col_subset_pct: f64,
    pub timeout_secs: u64,
}

/// Default seven-step schedule.
pub const DEFAULT_STEPS: [ScanStep; 7] = [
    ScanStep { step_number: 1, row_sample_pct: 0.1, col_subset_pct: 100.0, timeout_secs: 60 },
    ScanStep { step_number: 2, row_sample_pct: 0.3, col_subset_pct: 30.0, timeout_secs: 120 },
    ScanStep { step_number: 3, row_sample_pct: 1.0, col_subset_pct: 10.0, timeout_secs: 180 },
    ScanStep { step_number: 4, row_sample_pct: 3.0, col_subset_pct: 3.0, timeout_secs: 300 },
    ScanStep { step_number: 5, row_sample_pct: 10.0, col_subset_pct: 1.0, timeout_secs: 300 },
    ScanStep { step_number: 6, row_sample_pct: 30.0, col_subset_pct: 0.3, timeout_secs: 300 },
    ScanStep { step_number: 7, row_sample_pct: 100.0, col_subset_pct: 0.1, timeout_secs: 600 },
];

/// Tracks one column through progressive scanning.
///
/// Once eliminated, a candidate is never revived within the same scan.
#[derive(Debug, Clone)]
pub struct ColumnCandidate {
    pub column_name: String,
    pub data_type: String,
    pub ordinal: u32,
    pub pk_priority: u8,
    pub selectivity: HashMap<u32, f64>,
    pub eliminated_at_step: Option<u32>,
    pub elimination_reason: Option<String>,
}

impl ColumnCandidate {
    pub fn new(column_name: &str, data_type: &str, ordinal: u32, pk_priority: u8) -> Self {
        Self {
            column_name: column_name.to_string(),
            data_type: data_type.to_string(),
            ordinal,
            pk_priority,
            selectivity: HashMap::new(),
            eliminated_at_step: None,
            elimination_reason: None,
        }
    }

    pub fn is_eliminated(&self) -> bool {
        self.eliminated_at_step.is_some()
    }

    pub fn latest_selectivity(&self) -> f64 {
        self.selectivity
            .iter()
            .max_by_key(|(step, _)| **step)
            .map(|(_, sel)| *sel)
            .unwrap_or(0.0)
    }
}

/// An ordered, duplicate-free composite key candidate.
#[derive(Debug, Clone)]
pub struct CompositeCandidate {
    pub columns: Vec<String>,
    pub selectivity: HashMap<u32, f64>,
}

impl CompositeCandidate {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, selectivity: HashMap::new() }
    }

    /// Stable display/lookup key, e.g. `"OrderID + LineNo"`.
    pub fn key_string(&self) -> String {
        self.columns.join(" + ")
    }
}

/// Parse a candidate key string back into its column list.
pub fn parse_candidate(name: &str) -> Vec<String> {
    name.split(" + ").map(|s| s.trim().to_string()).collect()
}

/// Result of one scan step.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_number: u32,
    pub sample_rows: u64,
    pub columns_tested: Vec<String>,
    pub cardinalities: HashMap<String, i64>,
    pub selectivities: HashMap<String, f64>,
    pub candidates_eliminated: Vec<String>,
    pub best_candidate: Option<String>,
    pub best_selectivity: f64,
    pub duration_seconds: f64,
}

/// Terminal status of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Confirmed,
    Escalated,
    Error,
}

/// Final result of progressive scanning one asset.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub qualified_name: String,
    pub total_rows: u64,
    pub total_cols: usize,
    pub status: ScanStatus,
    pub primary_key: Option<Vec<String>>,
    pub confidence: f64,
    pub steps_executed: u32,
    pub candidates_tested: usize,
    pub composites_tested: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub step_history: Vec<StepResult>,
    pub escalation_reason: Option<String>,
}

impl ScanResult {
    /// Best candidate of the last executed step, for escalation handoff.
    pub fn best_candidate(&self) -> Option<(String, f64)> {
        self.step_history
            .last()
            .and_then(|s| s.best_candidate.clone().map(|c| (c, s.best_selectivity)))
    }
}

/// Decision produced by the engine after each step.
#[derive(Debug, Clone, Default)]
pub struct Decision {
    pub verdict: Option<Verdict>,
    pub eliminated: Vec<String>,
    pub best_candidate: Option<String>,
    pub best_selectivity: f64,
}

/// Step-level verdict: the scan is over.
#[derive(Debug, Clone)]
pub enum Verdict {
    Confirmed { columns: Vec<String>, selectivity: f64 },
    Escalate { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_schedule_is_inverse_progression() {
        for pair in DEFAULT_STEPS.windows(2) {
            assert!(pair[1].row_sample_pct > pair[0].row_sample_pct);
            assert!(pair[1].col_subset_pct < pair[0].col_subset_pct);
        }
        assert_eq!(DEFAULT_STEPS[6].row_sample_pct, 100.0);
    }

    #[test]
    fn latest_selectivity_uses_highest_step() {
        let mut c = ColumnCandidate::new("OrderID", "int", 1, 1);
        assert_eq!(c.latest_selectivity(), 0.0);
        c.selectivity.insert(1, 0.5);
        c.selectivity.insert(3, 0.8);
        c.selectivity.insert(2, 0.6);
        assert_eq!(c.latest_selectivity(), 0.8);
    }

    #[test]
    fn candidate_key_round_trip() {
        let comp = CompositeCandidate::new(vec!["OrderID".into(), "LineNo".into()]);
        assert_eq!(comp.key_string(), "OrderID + LineNo");
        assert_eq!(parse_candidate(&comp.key_string()), comp.columns);
        assert_eq!(parse_candidate("OrderID"), vec!["OrderID".to_string()]);
    }
}
