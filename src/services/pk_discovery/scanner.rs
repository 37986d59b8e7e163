//! Progressive scanner for PK discovery.
//!
//! Seven steps over (row-sample x column-subset) space:
//!     Step 1: 0.1% rows, 100% columns  - cheap screen
//!     Step 2: 0.3% rows, 30% columns   - first elimination
//!     Step 3: 1% rows, 10% columns     - composites begin
//!     Step 4: 3% rows, 3% columns      - escalation checkpoint
//!     Step 5: 10% rows, 1% columns     - final candidates
//!     Step 6: 30% rows                 - pre-validation
//!     Step 7: 100% rows                - full validation
//!
//! From step 6 the column percentage is no longer applied literally; the
//! active set is whatever elimination has left standing.

use std::collections::HashMap;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::ColumnMeta;
use crate::services::pk_discovery::decision::DecisionEngine;
use crate::services::pk_discovery::models::{
    ColumnCandidate, CompositeCandidate, DEFAULT_STEPS, ScanResult, ScanStatus, ScanStep,
    StepResult, parse_candidate,
};
use crate::services::sample_pool::SamplePool;
use crate::services::source_executor::{SourceExecutor, named_counts};
use crate::services::sql_dialect::SqlDialect;
use crate::utils::error::CatalogResult;

/// PK naming patterns and their priority tiers.
static PK_PATTERNS: Lazy<Vec<(Regex, u8)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"(?i)_ID$").unwrap(), 1),
        (Regex::new(r"(?i)_KEY$").unwrap(), 1),
        (Regex::new(r"(?i)_SK$").unwrap(), 1),
        (Regex::new(r"(?i)_SID$").unwrap(), 1),
        (Regex::new(r"(?i)^ID$").unwrap(), 2),
        (Regex::new(r"(?i)^KEY$").unwrap(), 2),
        (Regex::new(r"(?i)_CODE$").unwrap(), 3),
        (Regex::new(r"(?i)_NUM$").unwrap(), 3),
        (Regex::new(r"(?i)_NUMBER$").unwrap(), 3),
    ]
});

/// Declared types that can never be PK candidates.
const EXCLUDED_TYPES: [&str; 14] = [
    "blob",
    "tinyblob",
    "mediumblob",
    "longblob",
    "text",
    "tinytext",
    "mediumtext",
    "longtext",
    "json",
    "geometry",
    "point",
    "linestring",
    "polygon",
    "varbinary",
];

/// Maximum COUNT DISTINCT expressions per query.
const CARDINALITY_BATCH_SIZE: usize = 50;

/// Priority tier for a column name.
pub fn pk_priority(column_name: &str) -> u8 {
    for (pattern, priority) in PK_PATTERNS.iter() {
        if pattern.is_match(column_name) {
            return *priority;
        }
    }
    5
}

fn is_candidate_type(data_type: &str) -> bool {
    let base = data_type.to_lowercase();
    let base = base.split('(').next().unwrap_or("").trim().to_string();
    !EXCLUDED_TYPES.contains(&base.as_str())
}

/// How many active columns one step tests.
fn step_col_count(step: &ScanStep, total_cols: usize, active: usize) -> usize {
    if step.step_number >= 6 {
        return active.max(1);
    }
    let computed = (total_cols as f64 * step.col_subset_pct / 100.0).ceil() as usize;
    computed.max(1)
}

/// Orchestrates the seven-step progressive PK discovery algorithm.
pub struct ProgressiveScanner {
    dialect: SqlDialect,
    steps: Vec<ScanStep>,
}

impl ProgressiveScanner {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect, steps: DEFAULT_STEPS.to_vec() }
    }

    /// Execute a progressive scan against one asset.
    ///
    /// All samples come from the shared pool; a step whose source query
    /// fails terminates the scan with `ScanStatus::Error`.
    pub async fn scan(
        &self,
        exec: &mut SourceExecutor,
        pool: &mut SamplePool,
        qualified_name: &str,
        columns: &[ColumnMeta],
        total_rows: u64,
    ) -> CatalogResult<ScanResult> {
        let started_at = Utc::now();
        let total_cols = columns.len();
        tracing::info!(
            "Progressive scan for {}: {} rows, {} columns",
            qualified_name,
            total_rows,
            total_cols
        );

        let mut candidates: Vec<ColumnCandidate> = columns
            .iter()
            .filter(|c| is_candidate_type(&c.data_type))
            .map(|c| ColumnCandidate::new(&c.name, &c.data_type, c.ordinal, pk_priority(&c.name)))
            .collect();
        candidates.sort_by_key(|c| (c.pk_priority, c.ordinal));
        let candidates_total = candidates.len();

        let mut composites: Vec<CompositeCandidate> = Vec::new();
        let mut composites_tested = 0usize;
        let mut step_history: Vec<StepResult> = Vec::new();

        for step in &self.steps {
            let step_start = std::time::Instant::now();

            let active: Vec<String> = candidates
                .iter()
                .filter(|c| !c.is_eliminated())
                .map(|c| c.column_name.clone())
                .collect();
            if active.is_empty() {
                tracing::warn!("Step {}: no candidates remain", step.step_number);
                break;
            }
            let col_count = step_col_count(step, total_cols, active.len());
            let step_cols: Vec<String> = active.into_iter().take(col_count).collect();

            if step.step_number >= DecisionEngine::COMPOSITE_START_STEP {
                let max_cols = if step.step_number >= 4 { 3 } else { 2 };
                let new_composites = DecisionEngine::generate_composites(
                    &candidates,
                    &composites,
                    step.step_number,
                    max_cols,
                );
                composites_tested += new_composites.len();
                composites.extend(new_composites);
            }

            let (sample, _pool_rows) = pool.get(exec, step.row_sample_pct).await?;

            let comp_cols: Vec<Vec<String>> =
                composites.iter().map(|c| c.columns.clone()).collect();
            let counts = match self
                .batched_count_distinct(exec, &sample, &step_cols, &comp_cols, step.timeout_secs)
                .await
            {
                Ok(counts) => counts,
                Err(e) => {
                    tracing::error!("Step {} query failed: {}", step.step_number, e);
                    return Ok(ScanResult {
                        qualified_name: qualified_name.to_string(),
                        total_rows,
                        total_cols,
                        status: ScanStatus::Error,
                        primary_key: None,
                        confidence: 0.0,
                        steps_executed: step.step_number,
                        candidates_tested: candidates_total,
                        composites_tested,
                        started_at,
                        finished_at: Utc::now(),
                        step_history,
                        escalation_reason: Some(e.to_string()),
                    });
                }
            };

            let sample_rows = counts.get("_row_count").copied().unwrap_or(0).max(0) as u64;
            let mut selectivities: HashMap<String, f64> = HashMap::new();
            let mut cardinalities: HashMap<String, i64> = HashMap::new();
            for (name, count) in &counts {
                if name == "_row_count" {
                    continue;
                }
                cardinalities.insert(name.clone(), *count);
                selectivities
                    .insert(name.clone(), DecisionEngine::selectivity(*count, sample_rows as i64));
            }

            let decision =
                DecisionEngine::decide(step, &mut candidates, &mut composites, &selectivities);

            let step_result = StepResult {
                step_number: step.step_number,
                sample_rows,
                columns_tested: step_cols,
                cardinalities,
                selectivities,
                candidates_eliminated: decision.eliminated.clone(),
                best_candidate: decision.best_candidate.clone(),
                best_selectivity: decision.best_selectivity,
                duration_seconds: step_start.elapsed().as_secs_f64(),
            };
            step_history.push(step_result);

            tracing::info!(
                "Step {}: {} rows, best={} ({:.1}% sel), {:.1}s",
                step.step_number,
                sample_rows,
                decision.best_candidate.as_deref().unwrap_or("-"),
                decision.best_selectivity * 100.0,
                step_history.last().map(|s| s.duration_seconds).unwrap_or(0.0)
            );

            // Early stability checks over the recent best selectivities
            if step.step_number >= 4 {
                let recent: Vec<f64> = step_history
                    .iter()
                    .rev()
                    .take(3)
                    .map(|s| s.best_selectivity)
                    .collect();
                if recent.len() >= 2 {
                    let current = recent[0];
                    let prev = recent[1];
                    let spread = recent.iter().cloned().fold(f64::MIN, f64::max)
                        - recent.iter().cloned().fold(f64::MAX, f64::min);

                    if recent.len() >= 3
                        && recent.iter().all(|s| *s >= 0.95)
                        && spread <= 0.02
                        && let Some(best) = step_history.last().and_then(|s| s.best_candidate.clone())
                    {
                        tracing::info!(
                            "Step {}: selectivity stable at {:.1}%, confirming",
                            step.step_number,
                            current * 100.0
                        );
                        return Ok(self.finish(
                            qualified_name,
                            total_rows,
                            total_cols,
                            ScanStatus::Confirmed,
                            Some(parse_candidate(&best)),
                            current,
                            started_at,
                            step.step_number,
                            candidates_total,
                            composites_tested,
                            step_history,
                            None,
                        ));
                    }

                    if current < 0.85 && current <= prev {
                        return Ok(self.finish(
                            qualified_name,
                            total_rows,
                            total_cols,
                            ScanStatus::Escalated,
                            None,
                            0.0,
                            started_at,
                            step.step_number,
                            candidates_total,
                            composites_tested,
                            step_history,
                            Some(format!(
                                "selectivity {:.1}% declining below 85%",
                                current * 100.0
                            )),
                        ));
                    }
                }
            }

            use crate::services::pk_discovery::models::Verdict;
            match decision.verdict {
                Some(Verdict::Confirmed { columns, selectivity }) => {
                    return Ok(self.finish(
                        qualified_name,
                        total_rows,
                        total_cols,
                        ScanStatus::Confirmed,
                        Some(columns),
                        selectivity,
                        started_at,
                        step.step_number,
                        candidates_total,
                        composites_tested,
                        step_history,
                        None,
                    ));
                }
                Some(Verdict::Escalate { reason }) => {
                    return Ok(self.finish(
                        qualified_name,
                        total_rows,
                        total_cols,
                        ScanStatus::Escalated,
                        None,
                        0.0,
                        started_at,
                        step.step_number,
                        candidates_total,
                        composites_tested,
                        step_history,
                        Some(reason),
                    ));
                }
                None => {}
            }
        }

        // All seven steps ran without a verdict: best of the last step wins
        if let Some(last) = step_history.last()
            && let Some(best) = last.best_candidate.clone()
        {
            let confidence = last.best_selectivity;
            return Ok(self.finish(
                qualified_name,
                total_rows,
                total_cols,
                ScanStatus::Confirmed,
                Some(parse_candidate(&best)),
                confidence,
                started_at,
                7,
                candidates_total,
                composites_tested,
                step_history,
                None,
            ));
        }

        Ok(self.finish(
            qualified_name,
            total_rows,
            total_cols,
            ScanStatus::Escalated,
            None,
            0.0,
            started_at,
            7,
            candidates_total,
            composites_tested,
            step_history,
            Some("no viable candidate after all steps".to_string()),
        ))
    }

    /// Run the step's count-distinct query, batching when the expression
    /// count exceeds the dialect limit. Batches share one `_row_count`.
    async fn batched_count_distinct(
        &self,
        exec: &mut SourceExecutor,
        source: &str,
        columns: &[String],
        composites: &[Vec<String>],
        timeout_secs: u64,
    ) -> CatalogResult<HashMap<String, i64>> {
        let total_exprs = columns.len() + composites.len();
        if total_exprs <= CARDINALITY_BATCH_SIZE {
            return self
                .count_distinct_once(exec, source, columns, composites, timeout_secs)
                .await;
        }

        let mut results: HashMap<String, i64> = HashMap::new();
        let mut batch_start = 0usize;
        while batch_start < columns.len() {
            let batch_end = (batch_start + CARDINALITY_BATCH_SIZE).min(columns.len());
            let batch_cols = &columns[batch_start..batch_end];
            let batch_comps: &[Vec<String>] = if batch_start == 0 { composites } else { &[] };
            let batch =
                self.count_distinct_once(exec, source, batch_cols, batch_comps, timeout_secs)
                    .await?;
            for (k, v) in batch {
                if k != "_row_count" || !results.contains_key("_row_count") {
                    results.insert(k, v);
                }
            }
            batch_start = batch_end;
        }
        Ok(results)
    }

    async fn count_distinct_once(
        &self,
        exec: &mut SourceExecutor,
        source: &str,
        columns: &[String],
        composites: &[Vec<String>],
        timeout_secs: u64,
    ) -> CatalogResult<HashMap<String, i64>> {
        let sql = self.dialect.count_distinct(source, columns, composites)?;
        let rows = exec.query_rows_with_timeout(&sql, timeout_secs).await?;

        let mut results = HashMap::new();
        let Some(row) = rows.first() else {
            results.insert("_row_count".to_string(), 0);
            return Ok(results);
        };

        for (name, value) in named_counts(row) {
            if name == "_row_count" {
                results.insert(name, value);
            } else if let Some(idx) = name.strip_prefix("card_") {
                if let Ok(idx) = idx.parse::<usize>()
                    && idx < columns.len()
                {
                    results.insert(columns[idx].clone(), value);
                }
            } else if let Some(idx) = name.strip_prefix("comp_")
                && let Ok(idx) = idx.parse::<usize>()
                && idx < composites.len()
            {
                results.insert(composites[idx].join(" + "), value);
            }
        }
        Ok(results)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        qualified_name: &str,
        total_rows: u64,
        total_cols: usize,
        status: ScanStatus,
        primary_key: Option<Vec<String>>,
        confidence: f64,
        started_at: chrono::DateTime<Utc>,
        steps_executed: u32,
        candidates_tested: usize,
        composites_tested: usize,
        step_history: Vec<StepResult>,
        escalation_reason: Option<String>,
    ) -> ScanResult {
        ScanResult {
            qualified_name: qualified_name.to_string(),
            total_rows,
            total_cols,
            status,
            primary_key,
            confidence,
            steps_executed,
            candidates_tested,
            composites_tested,
            started_at,
            finished_at: Utc::now(),
            step_history,
            escalation_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_tiers_follow_naming_patterns() {
        assert_eq!(pk_priority("Customer_ID"), 1);
        assert_eq!(pk_priority("order_key"), 1);
        assert_eq!(pk_priority("Load_SK"), 1);
        assert_eq!(pk_priority("Patient_SID"), 1);
        assert_eq!(pk_priority("ID"), 2);
        assert_eq!(pk_priority("key"), 2);
        assert_eq!(pk_priority("Region_Code"), 3);
        assert_eq!(pk_priority("Line_Num"), 3);
        assert_eq!(pk_priority("Invoice_Number"), 3);
        assert_eq!(pk_priority("Amount"), 5);
        // "OrderID" has no underscore separator, so it falls to the default tier
        assert_eq!(pk_priority("OrderID"), 5);
    }

    #[test]
    fn excluded_types_never_become_candidates() {
        assert!(!is_candidate_type("longtext"));
        assert!(!is_candidate_type("JSON"));
        assert!(!is_candidate_type("geometry"));
        assert!(!is_candidate_type("varbinary(255)"));
        assert!(is_candidate_type("int"));
        assert!(is_candidate_type("varchar(50)"));
        assert!(is_candidate_type("datetime"));
    }

    #[test]
    fn col_count_formula_and_late_step_narrowing() {
        let steps = DEFAULT_STEPS;
        // Step 1: 100% of 40 columns
        assert_eq!(step_col_count(&steps[0], 40, 40), 40);
        // Step 2: ceil(40 * 0.30) = 12
        assert_eq!(step_col_count(&steps[1], 40, 30), 12);
        // Step 4: ceil(40 * 0.03) = 2
        assert_eq!(step_col_count(&steps[3], 40, 10), 2);
        // Steps 6-7 narrow to whatever is still active
        assert_eq!(step_col_count(&steps[5], 40, 3), 3);
        assert_eq!(step_col_count(&steps[6], 40, 1), 1);
        // Never below one column
        assert_eq!(step_col_count(&steps[4], 5, 5), 1);
    }
}
