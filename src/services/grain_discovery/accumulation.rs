//! Iterative accumulation: greedy composite growth by selectivity order.
//!
//! Fallback for tables where neither the progressive scan nor the chase
//! lands a key. Columns are ranked by per-column selectivity and appended
//! to a growing composite one at a time; cumulative selectivity is measured
//! in prefix batches. Two orderings run independently (highest-first and
//! lowest-first). A stalled ordering remembers its best plateau composite
//! so the caller can hand it to the varying-column chase.

use std::collections::HashMap;

use crate::models::{ColumnMeta, GrainResult, GrainStatus};
use crate::services::grain_discovery::fd_minimize::fd_minimize;
use crate::services::grain_discovery::should_test_column;
use crate::services::grain_discovery::varying_chase::varying_column_chase;
use crate::services::sample_pool::SamplePool;
use crate::services::source_executor::{OpClass, SourceExecutor, named_counts};
use crate::services::sql_dialect::SqlDialect;
use crate::utils::error::CatalogResult;

const MAX_DEPTH: usize = 10;
const PREFIX_BATCH_SIZE: usize = 5;
const UNIQUENESS_THRESHOLD: f64 = 0.9999;
const PLATEAU_LIMIT: u32 = 3;
const SELECTIVITY_BATCH: usize = 25;
const SMALL_TABLE_ROWS: u64 = 100_000;

/// Minimum gain required at the current selectivity level. Near the top
/// the bar drops so slow closers still count as progress.
pub fn improvement_threshold(selectivity: f64) -> f64 {
    if selectivity >= 0.90 { 0.001 } else { 0.01 }
}

/// Consecutive-low-improvement detector.
#[derive(Debug, Default)]
pub struct PlateauTracker {
    prev_selectivity: f64,
    plateau_count: u32,
}

impl PlateauTracker {
    /// Record one depth's selectivity; true once the plateau limit is hit.
    pub fn observe(&mut self, selectivity: f64) -> bool {
        let improvement = selectivity - self.prev_selectivity;
        if improvement < improvement_threshold(selectivity) {
            self.plateau_count += 1;
        } else {
            self.plateau_count = 0;
        }
        self.prev_selectivity = selectivity;
        self.plateau_count >= PLATEAU_LIMIT
    }
}

enum OrderingOutcome {
    Found(Vec<String>),
    Exhausted,
}

/// Run iterative accumulation for one asset. Returns a confirmed grain,
/// or `None` when both orderings (and the plateau chase) fail.
pub async fn iterative_accumulation(
    exec: &mut SourceExecutor,
    pool: &mut SamplePool,
    dialect: SqlDialect,
    qualified_name: &str,
    columns: &[ColumnMeta],
    row_count: u64,
) -> CatalogResult<Option<GrainResult>> {
    tracing::info!("Iterative accumulation for {}", qualified_name);
    let start = std::time::Instant::now();

    let testable: Vec<String> = columns
        .iter()
        .filter(|c| should_test_column(&c.name, &c.data_type))
        .map(|c| c.name.clone())
        .collect();
    if testable.is_empty() {
        return Ok(None);
    }

    let sample_pct = if row_count > SMALL_TABLE_ROWS { 1.0 } else { 100.0 };
    let (sample, _) = pool.get(exec, sample_pct).await?;

    let selectivities = measure_selectivities(exec, dialect, &sample, &testable).await?;
    let mut nonzero: Vec<(String, f64)> = selectivities
        .into_iter()
        .filter(|(_, sel)| *sel > 0.0)
        .collect();
    if nonzero.is_empty() {
        return Ok(None);
    }

    let mut best_plateau: Option<(Vec<String>, f64)> = None;

    // Top-down: highest selectivity first
    nonzero.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let top_down: Vec<String> = nonzero.iter().map(|(c, _)| c.clone()).collect();
    if let OrderingOutcome::Found(pk) =
        try_ordering(exec, dialect, &sample, &top_down, "top-down", &mut best_plateau).await?
    {
        return Ok(Some(
            finish(exec, dialect, &sample, qualified_name, pk, "top-down", sample_pct, start)
                .await?,
        ));
    }

    // Bottom-up: lowest selectivity first
    let bottom_up: Vec<String> = nonzero.iter().rev().map(|(c, _)| c.clone()).collect();
    if let OrderingOutcome::Found(pk) =
        try_ordering(exec, dialect, &sample, &bottom_up, "bottom-up", &mut best_plateau).await?
    {
        return Ok(Some(
            finish(exec, dialect, &sample, qualified_name, pk, "bottom-up", sample_pct, start)
                .await?,
        ));
    }

    // Both orderings stalled: chase the best plateau composite
    if let Some((plateau_cols, plateau_sel)) = best_plateau {
        tracing::info!(
            "Accumulation plateau, chasing {} ({:.4}%)",
            plateau_cols.join(" + "),
            plateau_sel * 100.0
        );
        let chased = varying_column_chase(
            exec,
            pool,
            dialect,
            qualified_name,
            &plateau_cols,
            plateau_sel,
            columns,
            row_count,
        )
        .await?;
        if chased.is_some() {
            return Ok(chased);
        }
    }

    tracing::info!(
        "Iterative accumulation found no PK for {} after {:.1}s",
        qualified_name,
        start.elapsed().as_secs_f64()
    );
    Ok(None)
}

/// Per-column selectivity on the sample, batched to stay inside SQL
/// expression limits.
async fn measure_selectivities(
    exec: &mut SourceExecutor,
    dialect: SqlDialect,
    sample: &str,
    columns: &[String],
) -> CatalogResult<Vec<(String, f64)>> {
    let mut out: Vec<(String, f64)> = Vec::new();

    for batch in columns.chunks(SELECTIVITY_BATCH) {
        let sql = dialect.count_distinct(sample, batch, &[])?;
        let row = match exec.query_one(&sql, OpClass::Cardinality).await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(out),
            Err(e) => {
                tracing::warn!("Selectivity measurement failed: {}", e);
                return Ok(out);
            }
        };

        let counts: HashMap<String, i64> = named_counts(&row).into_iter().collect();
        let row_count = counts.get("_row_count").copied().unwrap_or(0);
        if row_count == 0 {
            return Ok(Vec::new());
        }
        for (idx, col) in batch.iter().enumerate() {
            let distinct = counts.get(&format!("card_{idx}")).copied().unwrap_or(0);
            out.push((col.clone(), distinct as f64 / row_count as f64));
        }
    }

    tracing::info!("Measured selectivities for {} columns", out.len());
    Ok(out)
}

/// Grow a composite along one ordering, testing prefix batches of the
/// accumulated column list.
async fn try_ordering(
    exec: &mut SourceExecutor,
    dialect: SqlDialect,
    sample: &str,
    sorted_cols: &[String],
    ordering: &str,
    best_plateau: &mut Option<(Vec<String>, f64)>,
) -> CatalogResult<OrderingOutcome> {
    let max_depth = MAX_DEPTH.min(sorted_cols.len());
    let mut accumulated: Vec<String> = Vec::new();
    let mut tracker = PlateauTracker::default();

    let mut col_idx = 0usize;
    while col_idx < max_depth {
        let batch_end = (col_idx + PREFIX_BATCH_SIZE).min(max_depth);
        let batch_cols = &sorted_cols[col_idx..batch_end];

        // Each tested composite is the accumulation plus one more prefix
        let mut prefixes: Vec<Vec<String>> = Vec::new();
        for i in 0..batch_cols.len() {
            let mut prefix = accumulated.clone();
            prefix.extend(batch_cols[..=i].iter().cloned());
            prefixes.push(prefix);
        }

        let sql = dialect.count_distinct(sample, &[], &prefixes)?;
        let row = match exec.query_one(&sql, OpClass::Cardinality).await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(OrderingOutcome::Exhausted),
            Err(e) => {
                tracing::warn!("Accumulation query failed ({}): {}", ordering, e);
                return Ok(OrderingOutcome::Exhausted);
            }
        };

        let counts: HashMap<String, i64> = named_counts(&row).into_iter().collect();
        let row_count = counts.get("_row_count").copied().unwrap_or(0);
        if row_count == 0 {
            return Ok(OrderingOutcome::Exhausted);
        }

        for (i, prefix) in prefixes.iter().enumerate() {
            let depth = col_idx + i + 1;
            let distinct = counts.get(&format!("comp_{i}")).copied().unwrap_or(0);
            let selectivity = distinct as f64 / row_count as f64;
            tracing::debug!(
                "{} depth {}: {} -> {:.4}%",
                ordering,
                depth,
                prefix.join(" + "),
                selectivity * 100.0
            );

            if selectivity >= UNIQUENESS_THRESHOLD {
                tracing::info!(
                    "{} PK found at depth {}: {} ({:.4}%)",
                    ordering,
                    depth,
                    prefix.join(" + "),
                    selectivity * 100.0
                );
                return Ok(OrderingOutcome::Found(prefix.clone()));
            }

            if tracker.observe(selectivity) {
                tracing::info!(
                    "{} plateau after depth {} ({:.4}%), stopping",
                    ordering,
                    depth,
                    selectivity * 100.0
                );
                if best_plateau.as_ref().is_none_or(|(_, sel)| selectivity > *sel) {
                    *best_plateau = Some((prefix.clone(), selectivity));
                }
                return Ok(OrderingOutcome::Exhausted);
            }
        }

        accumulated = prefixes.last().cloned().unwrap_or(accumulated);
        col_idx = batch_end;
    }

    Ok(OrderingOutcome::Exhausted)
}

/// Leave-one-out minimisation then FD minimisation of a found key.
#[allow(clippy::too_many_arguments)]
async fn finish(
    exec: &mut SourceExecutor,
    dialect: SqlDialect,
    sample: &str,
    qualified_name: &str,
    pk_cols: Vec<String>,
    ordering: &str,
    sample_pct: f64,
    start: std::time::Instant,
) -> CatalogResult<GrainResult> {
    let minimized = minimize_leave_one_out(exec, dialect, sample, pk_cols).await?;
    let (minimal, removed) = fd_minimize(exec, dialect, sample, &minimized).await?;

    let duration = start.elapsed().as_secs_f64();
    tracing::info!(
        "Iterative accumulation ({}) found PK: {} in {:.1}s",
        ordering,
        minimized.join(" + "),
        duration
    );

    Ok(GrainResult {
        qualified_name: qualified_name.to_string(),
        status: GrainStatus::Confirmed,
        primary_key: Some(minimized),
        pk_minimal: if removed.is_empty() { None } else { Some(minimal) },
        fd_removed: if removed.is_empty() { None } else { Some(removed) },
        method: "iterative-accumulation".to_string(),
        confidence: UNIQUENESS_THRESHOLD,
        metadata: serde_json::json!({
            "ordering": ordering,
            "sample_pct": sample_pct,
            "duration_seconds": duration,
        }),
    })
}

/// Drop any column whose absence keeps the composite at the uniqueness
/// bar; repeat until nothing can be dropped.
async fn minimize_leave_one_out(
    exec: &mut SourceExecutor,
    dialect: SqlDialect,
    sample: &str,
    pk_cols: Vec<String>,
) -> CatalogResult<Vec<String>> {
    let mut current = pk_cols;

    while current.len() > 1 {
        let subsets: Vec<Vec<String>> = (0..current.len())
            .map(|i| {
                current
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, c)| c.clone())
                    .collect()
            })
            .collect();

        let sql = dialect.count_distinct(sample, &[], &subsets)?;
        let row = match exec.query_one(&sql, OpClass::Cardinality).await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(current),
            Err(e) => {
                tracing::warn!("Minimisation query failed: {}", e);
                return Ok(current);
            }
        };

        let counts: HashMap<String, i64> = named_counts(&row).into_iter().collect();
        let row_count = counts.get("_row_count").copied().unwrap_or(0);
        if row_count == 0 {
            return Ok(current);
        }

        let mut dropped = false;
        for (i, subset) in subsets.iter().enumerate() {
            let distinct = counts.get(&format!("comp_{i}")).copied().unwrap_or(0);
            let selectivity = distinct as f64 / row_count as f64;
            if selectivity >= UNIQUENESS_THRESHOLD {
                tracing::info!(
                    "Minimisation: dropped {}, {} columns remain",
                    current[i],
                    subset.len()
                );
                current = subset.clone();
                dropped = true;
                break;
            }
        }
        if !dropped {
            break;
        }
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn improvement_threshold_adapts_to_depth() {
        assert_eq!(improvement_threshold(0.5), 0.01);
        assert_eq!(improvement_threshold(0.89), 0.01);
        assert_eq!(improvement_threshold(0.90), 0.001);
        assert_eq!(improvement_threshold(0.99), 0.001);
    }

    #[test]
    fn plateau_fires_after_three_stalled_depths() {
        let mut tracker = PlateauTracker::default();
        assert!(!tracker.observe(0.50)); // +0.50, progress
        assert!(!tracker.observe(0.70)); // +0.20, progress
        assert!(!tracker.observe(0.705)); // +0.005 < 0.01, stall 1
        assert!(!tracker.observe(0.708)); // stall 2
        assert!(tracker.observe(0.709)); // stall 3 -> plateau
    }

    #[test]
    fn plateau_counter_resets_on_progress() {
        let mut tracker = PlateauTracker::default();
        assert!(!tracker.observe(0.50));
        assert!(!tracker.observe(0.505)); // stall 1
        assert!(!tracker.observe(0.506)); // stall 2
        assert!(!tracker.observe(0.60)); // progress resets
        assert!(!tracker.observe(0.605)); // stall 1
        assert!(!tracker.observe(0.606)); // stall 2
        assert!(tracker.observe(0.607)); // stall 3
    }

    #[test]
    fn near_unique_progress_uses_finer_threshold() {
        let mut tracker = PlateauTracker::default();
        assert!(!tracker.observe(0.95));
        // +0.002 >= 0.001 still counts as progress above 0.90
        assert!(!tracker.observe(0.952));
        assert!(!tracker.observe(0.954));
        assert!(!tracker.observe(0.9545)); // stall 1
        assert!(!tracker.observe(0.9546)); // stall 2
        assert!(tracker.observe(0.9547)); // stall 3
    }
}
