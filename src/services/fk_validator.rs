//! Progressive FK validation.
//!
//! Validates candidate edges with a seven-step sampling schedule over the
//! parent side of an outer-join integrity query. Small parent tables skip
//! straight to the full-population step. Early termination fires on
//! disjoint populations, stable-high confirmation, or a stable-low signal.

use serde::Serialize;

use crate::models::parse_qualified_name;
use crate::services::fk_discovery::FkCandidate;
use crate::services::source_executor::{OpClass, SourceExecutor, value_as_i64};
use crate::services::sql_dialect::SqlDialect;
use crate::utils::error::CatalogResult;

/// Configuration for one validation step.
#[derive(Debug, Clone, Copy)]
pub struct ValidationStep {
    pub step_number: u32,
    pub row_pct: f64,
    pub integrity_bar: f64,
    pub timeout_secs: u64,
}

pub const VALIDATION_STEPS: [ValidationStep; 7] = [
    ValidationStep { step_number: 1, row_pct: 0.1, integrity_bar: 90.0, timeout_secs: 60 },
    ValidationStep { step_number: 2, row_pct: 0.3, integrity_bar: 95.0, timeout_secs: 120 },
    ValidationStep { step_number: 3, row_pct: 1.0, integrity_bar: 97.0, timeout_secs: 180 },
    ValidationStep { step_number: 4, row_pct: 3.0, integrity_bar: 98.0, timeout_secs: 300 },
    ValidationStep { step_number: 5, row_pct: 10.0, integrity_bar: 99.0, timeout_secs: 300 },
    ValidationStep { step_number: 6, row_pct: 30.0, integrity_bar: 99.5, timeout_secs: 300 },
    ValidationStep { step_number: 7, row_pct: 100.0, integrity_bar: 99.9, timeout_secs: 600 },
];

/// Parent tables below this row count validate at step 7 directly.
pub const PROGRESSIVE_THRESHOLD: u64 = 100_000;

/// An edge is persisted as validated at or above this match percentage.
pub const FK_INTEGRITY_THRESHOLD: f64 = 99.0;

/// One step's recorded measurement.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StepMeasurement {
    pub step_number: u32,
    pub match_pct: f64,
}

/// Why progressive validation stopped before step 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Populations are disjoint: zero matches from step 2 onward.
    Disjoint,
    /// Two consecutive steps at >= 99% within 2 points.
    ConfirmedStable,
    /// Below 50% with the last three steps within 5 points.
    StableLow,
}

/// Evaluate the early-termination predicates against the recorded history
/// (current step last). Precedence: disjoint, stable-high, stable-low.
/// Decisions read only the current step and the immediately prior history.
pub fn early_termination(history: &[StepMeasurement]) -> Option<Termination> {
    let current = history.last()?;

    if current.step_number >= 2 && current.match_pct == 0.0 {
        return Some(Termination::Disjoint);
    }

    if current.step_number >= 2 && current.match_pct >= 99.0 && history.len() >= 2 {
        let prev = history[history.len() - 2];
        if prev.match_pct >= 99.0 && (current.match_pct - prev.match_pct).abs() <= 2.0 {
            return Some(Termination::ConfirmedStable);
        }
    }

    if current.step_number >= 3 && current.match_pct < 50.0 && history.len() >= 3 {
        let recent = &history[history.len() - 3..];
        let max = recent.iter().map(|m| m.match_pct).fold(f64::MIN, f64::max);
        let min = recent.iter().map(|m| m.match_pct).fold(f64::MAX, f64::min);
        if max - min <= 5.0 {
            return Some(Termination::StableLow);
        }
    }

    None
}

/// Result of validating one candidate edge.
#[derive(Debug, Clone, Serialize)]
pub struct FkValidationResult {
    pub match_count: i64,
    pub orphan_count: i64,
    pub pk_only_count: i64,
    /// `match / (match + orphan)` as a percentage, 0 when the denominator
    /// is 0.
    pub match_pct: f64,
    pub orphan_pct: f64,
    pub total_fk_rows: u64,
    pub total_pk_rows: u64,
    pub step_number: u32,
    pub sample_pct: f64,
    pub duration_seconds: f64,
    pub termination: Option<Termination>,
    pub history: Vec<StepMeasurement>,
    pub error: Option<String>,
}

impl FkValidationResult {
    fn empty() -> Self {
        Self {
            match_count: 0,
            orphan_count: 0,
            pk_only_count: 0,
            match_pct: 0.0,
            orphan_pct: 0.0,
            total_fk_rows: 0,
            total_pk_rows: 0,
            step_number: 0,
            sample_pct: 0.0,
            duration_seconds: 0.0,
            termination: None,
            history: Vec::new(),
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self { error: Some(error), ..Self::empty() }
    }

    pub fn is_validated(&self) -> bool {
        self.error.is_none() && self.match_pct >= FK_INTEGRITY_THRESHOLD
    }
}

/// Validates FK candidates using progressive parent-side sampling.
pub struct ProgressiveFkValidator {
    dialect: SqlDialect,
}

impl ProgressiveFkValidator {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    /// Validate one candidate edge.
    pub async fn validate(
        &self,
        exec: &mut SourceExecutor,
        candidate: &FkCandidate,
    ) -> CatalogResult<FkValidationResult> {
        tracing::info!(
            "Validating FK: {} -> {}",
            candidate.parent_view,
            candidate.referenced_view
        );

        let fk_rows = self.row_count(exec, &candidate.parent_view).await?;
        let pk_rows = self.row_count(exec, &candidate.referenced_view).await?;

        if fk_rows == 0 {
            return Ok(FkValidationResult::failed("parent table is empty".to_string()));
        }

        if fk_rows < PROGRESSIVE_THRESHOLD {
            let step = VALIDATION_STEPS[6];
            let mut result = self.validate_at_step(exec, candidate, step).await?;
            result.total_fk_rows = fk_rows;
            result.total_pk_rows = pk_rows;
            result.history =
                vec![StepMeasurement { step_number: 7, match_pct: result.match_pct }];
            return Ok(result);
        }

        self.validate_progressive(exec, candidate, fk_rows, pk_rows).await
    }

    /// Validate in both directions; the reversed edge drives cardinality
    /// classification.
    pub async fn validate_bidirectional(
        &self,
        exec: &mut SourceExecutor,
        candidate: &FkCandidate,
    ) -> CatalogResult<(FkValidationResult, FkValidationResult)> {
        let forward = self.validate(exec, candidate).await?;

        let reversed = FkCandidate {
            parent_view: candidate.referenced_view.clone(),
            parent_columns: candidate.referenced_columns.clone(),
            referenced_view: candidate.parent_view.clone(),
            referenced_columns: candidate.parent_columns.clone(),
            pattern_name: candidate.pattern_name.clone(),
            priority: candidate.priority,
            confidence: candidate.confidence,
        };
        let reverse = self.validate(exec, &reversed).await?;

        Ok((forward, reverse))
    }

    /// Label an edge from its two directional results.
    pub fn classify_cardinality(
        forward: &FkValidationResult,
        reverse: &FkValidationResult,
    ) -> Option<String> {
        if forward.error.is_some() || reverse.error.is_some() {
            return None;
        }
        if forward.match_pct >= FK_INTEGRITY_THRESHOLD
            && reverse.match_pct >= FK_INTEGRITY_THRESHOLD
        {
            Some("1:1".to_string())
        } else if forward.match_pct >= FK_INTEGRITY_THRESHOLD {
            Some("1:N".to_string())
        } else {
            Some("N:M".to_string())
        }
    }

    async fn validate_progressive(
        &self,
        exec: &mut SourceExecutor,
        candidate: &FkCandidate,
        fk_rows: u64,
        pk_rows: u64,
    ) -> CatalogResult<FkValidationResult> {
        let mut last_success: Option<FkValidationResult> = None;
        let mut history: Vec<StepMeasurement> = Vec::new();

        for step in VALIDATION_STEPS {
            let start = std::time::Instant::now();
            match self.validate_at_step(exec, candidate, step).await {
                Ok(mut result) => {
                    result.total_fk_rows = fk_rows;
                    result.total_pk_rows = pk_rows;
                    result.duration_seconds = start.elapsed().as_secs_f64();
                    history.push(StepMeasurement {
                        step_number: step.step_number,
                        match_pct: result.match_pct,
                    });
                    result.history = history.clone();

                    tracing::info!(
                        "Step {}: match={:.1}%",
                        step.step_number,
                        result.match_pct
                    );

                    if let Some(termination) = early_termination(&history) {
                        tracing::info!(
                            "Early termination at step {}: {:?}",
                            step.step_number,
                            termination
                        );
                        result.termination = Some(termination);
                        return Ok(result);
                    }

                    last_success = Some(result);
                }
                Err(e) => {
                    tracing::warn!("Step {} failed: {}", step.step_number, e);
                    if let Some(mut last) = last_success {
                        last.history = history;
                        return Ok(last);
                    }
                    return Ok(FkValidationResult::failed(e.to_string()));
                }
            }
        }

        Ok(last_success.unwrap_or_else(FkValidationResult::empty))
    }

    async fn validate_at_step(
        &self,
        exec: &mut SourceExecutor,
        candidate: &FkCandidate,
        step: ValidationStep,
    ) -> CatalogResult<FkValidationResult> {
        let mappings = candidate.mappings();
        let seed_col = if step.row_pct < 100.0 {
            candidate.parent_columns.first().map(|c| c.as_str())
        } else {
            None
        };

        let fk_table = quoted_qualified(&candidate.parent_view)?;
        let pk_table = quoted_qualified(&candidate.referenced_view)?;
        let sql = self.dialect.fk_validate(
            &fk_table,
            &pk_table,
            &mappings,
            step.row_pct,
            seed_col,
        )?;

        let row = exec
            .query_rows_with_timeout(&sql, step.timeout_secs)
            .await?
            .into_iter()
            .next();

        let mut result = FkValidationResult::empty();
        result.step_number = step.step_number;
        result.sample_pct = step.row_pct;

        let Some(row) = row else {
            return Ok(result);
        };

        result.match_count = row.as_ref(0).map(value_as_i64).unwrap_or(0);
        result.orphan_count = row.as_ref(1).map(value_as_i64).unwrap_or(0);
        result.pk_only_count = row.as_ref(2).map(value_as_i64).unwrap_or(0);

        let total = result.match_count + result.orphan_count;
        if total > 0 {
            result.match_pct = result.match_count as f64 / total as f64 * 100.0;
            result.orphan_pct = result.orphan_count as f64 / total as f64 * 100.0;
        }
        Ok(result)
    }

    async fn row_count(
        &self,
        exec: &mut SourceExecutor,
        qualified_name: &str,
    ) -> CatalogResult<u64> {
        let (schema, table) = parse_qualified_name(qualified_name)?;
        let sql = self.dialect.row_count(&schema, &table)?;
        let count = exec
            .query_one(&sql, OpClass::RowCount)
            .await?
            .and_then(|row| row.as_ref(0).map(value_as_i64))
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }
}

fn quoted_qualified(qualified_name: &str) -> CatalogResult<String> {
    let (schema, table) = parse_qualified_name(qualified_name)?;
    crate::services::sql_dialect::validate_identifier(&schema)?;
    crate::services::sql_dialect::validate_identifier(&table)?;
    Ok(format!("`{schema}`.`{table}`"))
}
