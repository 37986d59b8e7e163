//! Append-only pipeline phase log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Started,
    Success,
    Error,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Started => "started",
            PhaseStatus::Success => "success",
            PhaseStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "started" => PhaseStatus::Started,
            "success" => PhaseStatus::Success,
            _ => PhaseStatus::Error,
        }
    }
}

/// One phase execution record. Append-only: readers take the latest
/// `success` row per (scope, phase).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseLog {
    pub id: String,
    pub run_id: String,
    /// Asset or schema-batch scope this phase ran over.
    pub scope: String,
    pub phase_name: String,
    pub status: PhaseStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub items_processed: i64,
    pub error_detail: Option<String>,
}

impl PhaseLog {
    pub fn started(run_id: &str, scope: &str, phase_name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            scope: scope.to_string(),
            phase_name: phase_name.to_string(),
            status: PhaseStatus::Started,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: 0.0,
            items_processed: 0,
            error_detail: None,
        }
    }

    pub fn finished(
        run_id: &str,
        scope: &str,
        phase_name: &str,
        status: PhaseStatus,
        started_at: DateTime<Utc>,
        items_processed: i64,
        error_detail: Option<String>,
    ) -> Self {
        let completed = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            scope: scope.to_string(),
            phase_name: phase_name.to_string(),
            status,
            started_at,
            completed_at: Some(completed),
            duration_seconds: (completed - started_at).num_milliseconds() as f64 / 1000.0,
            items_processed,
            error_detail,
        }
    }
}
