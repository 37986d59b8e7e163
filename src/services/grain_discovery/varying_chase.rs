//! Varying-column chase: find the discriminator for a near-unique key.
//!
//! When a candidate is almost unique, its few duplicate groups usually
//! differ in exactly the column the key is missing. The chase fetches rows
//! from the largest duplicate groups, finds columns that take more than
//! one value inside those groups, and tests the candidate augmented with
//! each such column.

use std::collections::HashMap;

use crate::models::{ColumnMeta, GrainResult, GrainStatus};
use crate::services::grain_discovery::fd_minimize::fd_minimize;
use crate::services::grain_discovery::should_test_column;
use crate::services::sample_pool::SamplePool;
use crate::services::source_executor::{
    OpClass, SourceExecutor, column_names, named_counts, row_values,
};
use crate::services::sql_dialect::SqlDialect;
use crate::utils::error::CatalogResult;

/// Fetch rows from this many duplicate groups.
const MAX_DUPE_GROUPS: u64 = 20;
/// A column must vary in more than this fraction of groups.
const VARIATION_THRESHOLD: f64 = 0.30;
/// Selectivity an augmented composite must reach.
const UNIQUENESS_THRESHOLD: f64 = 0.9999;
/// Cap on composite tests per chase.
const MAX_COMPOSITE_TESTS: usize = 10;
/// Small tables are chased on the full copy instead of the 1% sample.
const SMALL_TABLE_ROWS: u64 = 100_000;

/// Count, per testable column, the fraction of duplicate groups in which
/// it takes more than one distinct value. NULL-safe: two NULLs agree.
pub fn find_varying_columns(
    result_columns: &[String],
    rows: Vec<Vec<Option<String>>>,
    candidate_cols: &[String],
    testable_cols: &[String],
) -> Vec<(String, f64)> {
    let col_idx: HashMap<&str, usize> = result_columns
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();
    let cand_indices: Vec<usize> = candidate_cols
        .iter()
        .filter_map(|c| col_idx.get(c.as_str()).copied())
        .collect();
    if cand_indices.is_empty() {
        return Vec::new();
    }

    // Bucket rows by their candidate-key tuple; a None key component is a
    // real value here, which is what makes the grouping NULL-safe.
    let mut groups: HashMap<Vec<Option<String>>, Vec<Vec<Option<String>>>> = HashMap::new();
    for row in rows {
        let key: Vec<Option<String>> = cand_indices
            .iter()
            .map(|i| row.get(*i).cloned().unwrap_or(None))
            .collect();
        groups.entry(key).or_default().push(row);
    }
    let num_groups = groups.len();
    if num_groups == 0 {
        return Vec::new();
    }

    let mut varying: Vec<(String, f64)> = Vec::new();
    for col in testable_cols {
        let Some(idx) = col_idx.get(col.as_str()).copied() else {
            continue;
        };
        let varying_groups = groups
            .values()
            .filter(|group_rows| {
                let distinct: std::collections::HashSet<&Option<String>> = group_rows
                    .iter()
                    .filter_map(|r| r.get(idx))
                    .collect();
                distinct.len() > 1
            })
            .count();
        let fraction = varying_groups as f64 / num_groups as f64;
        if fraction > VARIATION_THRESHOLD {
            varying.push((col.clone(), fraction));
        }
    }

    varying.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    varying
}

/// Run the chase. Returns a confirmed grain when an augmented composite
/// reaches the uniqueness bar, `None` when the chase comes up empty.
#[allow(clippy::too_many_arguments)]
pub async fn varying_column_chase(
    exec: &mut SourceExecutor,
    pool: &mut SamplePool,
    dialect: SqlDialect,
    qualified_name: &str,
    candidate_cols: &[String],
    best_selectivity: f64,
    columns: &[ColumnMeta],
    row_count: u64,
) -> CatalogResult<Option<GrainResult>> {
    tracing::info!(
        "Varying-column chase for {}: candidate={} selectivity={:.2}%",
        qualified_name,
        candidate_cols.join(" + "),
        best_selectivity * 100.0
    );
    let start = std::time::Instant::now();

    let testable_cols: Vec<String> = columns
        .iter()
        .filter(|c| !candidate_cols.contains(&c.name))
        .filter(|c| should_test_column(&c.name, &c.data_type))
        .map(|c| c.name.clone())
        .collect();
    if testable_cols.is_empty() {
        tracing::info!("Chase: no testable non-candidate columns");
        return Ok(None);
    }

    let sample_pct = if row_count > SMALL_TABLE_ROWS { 1.0 } else { 100.0 };
    let (sample, _) = pool.get(exec, sample_pct).await?;

    let dupe_sql = dialect.top_duplicate_groups(&sample, candidate_cols, MAX_DUPE_GROUPS)?;
    let dupe_rows = match exec.query_rows(&dupe_sql, OpClass::Cardinality).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!("Chase: duplicate-group query failed: {}", e);
            return Ok(None);
        }
    };
    if dupe_rows.is_empty() {
        tracing::info!("Chase: no duplicate groups found in sample");
        return Ok(None);
    }

    let result_columns = column_names(&dupe_rows[0]);
    let values: Vec<Vec<Option<String>>> = dupe_rows.iter().map(row_values).collect();
    tracing::info!("Chase: fetched {} rows from duplicate groups", values.len());

    let varying = find_varying_columns(&result_columns, values, candidate_cols, &testable_cols);
    if varying.is_empty() {
        tracing::info!(
            "Chase: no columns vary in more than {:.0}% of groups",
            VARIATION_THRESHOLD * 100.0
        );
        return Ok(None);
    }
    tracing::info!(
        "Chase: {} varying columns: {}",
        varying.len(),
        varying
            .iter()
            .take(5)
            .map(|(c, f)| format!("{c}({:.0}%)", f * 100.0))
            .collect::<Vec<_>>()
            .join(", ")
    );

    // Candidate + one varying column each, plus one two-column augmentation.
    // Varying columns were filtered against the candidate set, so the
    // membership guard only matters if a caller hands in overlapping input.
    let mut composites: Vec<Vec<String>> = Vec::new();
    let augment = |extra: &[&String]| {
        let mut augmented = candidate_cols.to_vec();
        for col in extra {
            if !augmented.contains(*col) {
                augmented.push((*col).clone());
            }
        }
        augmented
    };
    for (col, _fraction) in &varying {
        if composites.len() >= MAX_COMPOSITE_TESTS {
            break;
        }
        composites.push(augment(&[col]));
    }
    if varying.len() >= 2 && composites.len() < MAX_COMPOSITE_TESTS {
        composites.push(augment(&[&varying[0].0, &varying[1].0]));
    }

    let test_sql = dialect.count_distinct(&sample, &[], &composites)?;
    let test_row = match exec.query_one(&test_sql, OpClass::Cardinality).await {
        Ok(Some(row)) => row,
        Ok(None) => return Ok(None),
        Err(e) => {
            tracing::warn!("Chase: composite test query failed: {}", e);
            return Ok(None);
        }
    };

    let counts: HashMap<String, i64> = named_counts(&test_row).into_iter().collect();
    let sample_count = counts.get("_row_count").copied().unwrap_or(0);
    if sample_count == 0 {
        return Ok(None);
    }

    for (idx, composite) in composites.iter().enumerate() {
        let distinct = counts.get(&format!("comp_{idx}")).copied().unwrap_or(0);
        let selectivity = distinct as f64 / sample_count as f64;
        if selectivity < UNIQUENESS_THRESHOLD {
            continue;
        }

        let (minimal, removed) = fd_minimize(exec, dialect, &sample, composite).await?;
        let duration = start.elapsed().as_secs_f64();
        tracing::info!(
            "Chase found PK: {} (selectivity {:.4}%) in {:.1}s",
            composite.join(" + "),
            selectivity * 100.0,
            duration
        );

        let discriminators: Vec<&String> = composite
            .iter()
            .filter(|c| !candidate_cols.contains(c))
            .collect();
        return Ok(Some(GrainResult {
            qualified_name: qualified_name.to_string(),
            status: GrainStatus::Confirmed,
            primary_key: Some(composite.clone()),
            pk_minimal: if removed.is_empty() { None } else { Some(minimal) },
            fd_removed: if removed.is_empty() { None } else { Some(removed) },
            method: "varying-column-chase".to_string(),
            confidence: selectivity,
            metadata: serde_json::json!({
                "original_candidate": candidate_cols.join(" + "),
                "original_selectivity": best_selectivity,
                "discriminating_columns": discriminators,
                "varying_columns": varying.iter().map(|(c, _)| c).collect::<Vec<_>>(),
                "duration_seconds": duration,
            }),
        }));
    }

    tracing::info!(
        "Chase: no PK after testing {} composites in {:.1}s",
        composites.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn row(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|v| v.map(|s| s.to_string())).collect()
    }

    #[test]
    fn detects_column_varying_within_duplicate_groups() {
        // Columns: PostPeriod, ExtractDTS, OrderID, Region
        // Two dupe groups of (PostPeriod, ExtractDTS); OrderID varies in
        // both, Region varies in neither.
        let columns = strs(&["PostPeriod", "ExtractDTS", "OrderID", "Region"]);
        let rows = vec![
            row(&[Some("2024-01"), Some("t1"), Some("1"), Some("east")]),
            row(&[Some("2024-01"), Some("t1"), Some("2"), Some("east")]),
            row(&[Some("2024-02"), Some("t2"), Some("3"), Some("west")]),
            row(&[Some("2024-02"), Some("t2"), Some("4"), Some("west")]),
        ];
        let varying = find_varying_columns(
            &columns,
            rows,
            &strs(&["PostPeriod", "ExtractDTS"]),
            &strs(&["OrderID", "Region"]),
        );
        assert_eq!(varying.len(), 1);
        assert_eq!(varying[0].0, "OrderID");
        assert_eq!(varying[0].1, 1.0);
    }

    #[test]
    fn variation_below_threshold_is_filtered() {
        // Qty varies in 1 of 4 groups = 25% <= 30% threshold
        let columns = strs(&["K", "Qty"]);
        let rows = vec![
            row(&[Some("a"), Some("1")]),
            row(&[Some("a"), Some("2")]),
            row(&[Some("b"), Some("1")]),
            row(&[Some("b"), Some("1")]),
            row(&[Some("c"), Some("1")]),
            row(&[Some("c"), Some("1")]),
            row(&[Some("d"), Some("1")]),
            row(&[Some("d"), Some("1")]),
        ];
        let varying = find_varying_columns(&columns, rows, &strs(&["K"]), &strs(&["Qty"]));
        assert!(varying.is_empty());
    }

    #[test]
    fn null_keys_group_together() {
        // Both NULL-keyed rows form one group; Val varies inside it.
        let columns = strs(&["K", "Val"]);
        let rows = vec![
            row(&[None, Some("1")]),
            row(&[None, Some("2")]),
        ];
        let varying = find_varying_columns(&columns, rows, &strs(&["K"]), &strs(&["Val"]));
        assert_eq!(varying.len(), 1);
        assert_eq!(varying[0].0, "Val");
    }

    #[test]
    fn varying_columns_sort_by_fraction_descending() {
        let columns = strs(&["K", "A", "B"]);
        // A varies in both groups, B in one of two.
        let rows = vec![
            row(&[Some("g1"), Some("1"), Some("x")]),
            row(&[Some("g1"), Some("2"), Some("y")]),
            row(&[Some("g2"), Some("3"), Some("z")]),
            row(&[Some("g2"), Some("4"), Some("z")]),
        ];
        let varying =
            find_varying_columns(&columns, rows, &strs(&["K"]), &strs(&["A", "B"]));
        assert_eq!(varying[0].0, "A");
        assert_eq!(varying[1].0, "B");
        assert!(varying[0].1 > varying[1].1);
    }
}
