//! Column cardinality and value-frequency scanning.
//!
//! The cardinality pass records distinct counts and selectivity per column
//! at the 1% and 10% sample levels. The frequency pass stores the top-N
//! values per FK-candidate column from the shared 10% sample, using the
//! batched unpivot shape with a per-column fallback for columns the batch
//! query returned nothing for.

use std::collections::HashMap;

use crate::models::{Asset, CardinalityRecord, ValueFrequency};
use crate::services::catalog_store::CatalogStore;
use crate::services::sample_pool::SamplePool;
use crate::services::source_executor::{
    OpClass, SourceExecutor, named_counts, row_values,
};
use crate::services::sql_dialect::{SqlDialect, validate_identifier};
use crate::utils::error::CatalogResult;

/// Max columns per unpivot batch.
const FREQ_BATCH_SIZE: usize = 50;
/// Max distinct-count expressions per cardinality query.
const CARDINALITY_BATCH_SIZE: usize = 50;
/// Sample levels the cardinality pass records, at minimum.
const CARDINALITY_LEVELS: [f64; 2] = [1.0, 10.0];

/// FK-candidate selectivity window: constants and unique-per-row columns
/// are excluded from frequency scanning.
const FK_CANDIDATE_MIN_SELECTIVITY: f64 = 0.0001;
const FK_CANDIDATE_MAX_SELECTIVITY: f64 = 1.0;

#[derive(Debug, Default)]
pub struct FrequencyScanSummary {
    pub columns_scanned: usize,
    pub rows_stored: usize,
    pub fallback_columns: usize,
    pub errors: Vec<String>,
}

pub struct CardinalityScanner<'a> {
    store: &'a CatalogStore,
    dialect: SqlDialect,
}

impl<'a> CardinalityScanner<'a> {
    pub fn new(store: &'a CatalogStore, dialect: SqlDialect) -> Self {
        Self { store, dialect }
    }

    /// Record cardinality/selectivity for every scannable column of the
    /// asset at each standard level. Returns the number of records written.
    pub async fn scan_cardinality(
        &self,
        exec: &mut SourceExecutor,
        pool: &mut SamplePool,
        asset: &Asset,
    ) -> CatalogResult<usize> {
        let columns: Vec<String> = asset
            .columns
            .iter()
            .filter(|c| validate_identifier(&c.name).is_ok())
            .map(|c| c.name.clone())
            .collect();
        if columns.is_empty() {
            return Ok(0);
        }

        let mut records: Vec<CardinalityRecord> = Vec::new();
        for level in CARDINALITY_LEVELS {
            let (sample, _) = pool.get(exec, level).await?;

            for batch in columns.chunks(CARDINALITY_BATCH_SIZE) {
                let sql = self.dialect.count_distinct(&sample, batch, &[])?;
                let row = match exec.query_one(&sql, OpClass::Cardinality).await {
                    Ok(Some(row)) => row,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(
                            "Cardinality batch failed for {} at {}%: {}",
                            asset.qualified_name,
                            level,
                            e
                        );
                        continue;
                    }
                };

                let counts: HashMap<String, i64> = named_counts(&row).into_iter().collect();
                let total = counts.get("_row_count").copied().unwrap_or(0);
                for (idx, col) in batch.iter().enumerate() {
                    let distinct = counts.get(&format!("card_{idx}")).copied().unwrap_or(0);
                    records.push(CardinalityRecord::new(
                        &asset.qualified_name,
                        col,
                        level,
                        distinct,
                        total,
                    ));
                }
            }
        }

        self.store.record_cardinality(&records).await?;
        tracing::info!(
            "Cardinality scan for {}: {} records at {:?}%",
            asset.qualified_name,
            records.len(),
            CARDINALITY_LEVELS
        );
        Ok(records.len())
    }

    /// Columns worth frequency-scanning: selectivity inside the
    /// FK-candidate window per the recorded cardinality, or every column
    /// when no cardinality data exists yet.
    pub async fn fk_candidate_columns(&self, asset: &Asset) -> CatalogResult<Vec<String>> {
        let columns: Vec<String> = asset
            .columns
            .iter()
            .filter(|c| validate_identifier(&c.name).is_ok())
            .map(|c| c.name.clone())
            .collect();

        let cardinality = self.store.cardinality_for_asset(&asset.qualified_name).await?;
        if cardinality.is_empty() {
            return Ok(columns);
        }

        // Best available selectivity per column, highest sample level first
        let mut best: HashMap<String, f64> = HashMap::new();
        for rec in cardinality {
            best.entry(rec.column_name)
                .and_modify(|sel| {
                    if rec.sample_pct >= 10.0 {
                        *sel = rec.selectivity;
                    }
                })
                .or_insert(rec.selectivity);
        }

        Ok(columns
            .into_iter()
            .filter(|col| match best.get(col) {
                Some(sel) => {
                    *sel >= FK_CANDIDATE_MIN_SELECTIVITY && *sel <= FK_CANDIDATE_MAX_SELECTIVITY
                }
                None => true,
            })
            .collect())
    }

    /// Scan top-N value frequencies for the asset's FK-candidate columns
    /// on the shared sample. Stores a rank-0 sentinel for empty columns.
    pub async fn scan_frequencies(
        &self,
        exec: &mut SourceExecutor,
        pool: &mut SamplePool,
        asset: &Asset,
        sample_pct: f64,
        top_n: usize,
    ) -> CatalogResult<FrequencyScanSummary> {
        let mut summary = FrequencyScanSummary::default();

        let columns = self.fk_candidate_columns(asset).await?;
        if columns.is_empty() {
            return Ok(summary);
        }
        summary.columns_scanned = columns.len();

        let (sample, sample_rows) = pool.get(exec, sample_pct).await?;
        let sample_rows = sample_rows as i64;

        let mut per_column: HashMap<String, Vec<(Option<String>, i64)>> =
            columns.iter().map(|c| (c.clone(), Vec::new())).collect();

        // Batched unpivot scan
        for batch in columns.chunks(FREQ_BATCH_SIZE) {
            let sql = self.dialect.unpivot_frequency(&sample, batch, top_n as u64)?;
            match exec.query_rows(&sql, OpClass::Frequency).await {
                Ok(rows) => {
                    for row in rows {
                        let values = row_values(&row);
                        let (Some(Some(col_name)), Some(value), Some(freq)) =
                            (values.first(), values.get(1), values.get(2))
                        else {
                            continue;
                        };
                        let freq: i64 =
                            freq.as_deref().and_then(|f| f.parse().ok()).unwrap_or(0);
                        if let Some(entry) = per_column.get_mut(col_name) {
                            entry.push((value.clone(), freq));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Unpivot batch failed: {}", e);
                    summary.errors.push(e.to_string());
                }
            }
        }

        // Per-column fallback for columns the unpivot produced nothing for
        let empty_columns: Vec<String> = per_column
            .iter()
            .filter(|(_, freqs)| freqs.is_empty())
            .map(|(col, _)| col.clone())
            .collect();
        if !empty_columns.is_empty() {
            tracing::info!("Per-column fallback for {} columns", empty_columns.len());
        }
        for col in empty_columns {
            summary.fallback_columns += 1;
            let sql = self.dialect.frequency(&sample, &col, top_n as u64)?;
            match exec.query_rows(&sql, OpClass::Frequency).await {
                Ok(rows) => {
                    if let Some(entry) = per_column.get_mut(&col) {
                        for row in rows {
                            let values = row_values(&row);
                            let value = values.first().cloned().unwrap_or(None);
                            let freq: i64 = values
                                .get(1)
                                .and_then(|f| f.as_deref())
                                .and_then(|f| f.parse().ok())
                                .unwrap_or(0);
                            entry.push((value, freq));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Per-column scan failed for {}: {}", col, e);
                    summary.errors.push(format!("{col}: {e}"));
                }
            }
        }

        // Build rows, sentinel for columns that stayed empty
        let mut freq_rows: Vec<ValueFrequency> = Vec::new();
        for col in &columns {
            let freqs = per_column.get(col).map(Vec::as_slice).unwrap_or(&[]);
            if freqs.is_empty() {
                freq_rows.push(ValueFrequency::sentinel(&asset.qualified_name, col, sample_pct));
                continue;
            }
            for (rank, (value, freq)) in freqs.iter().take(top_n).enumerate() {
                freq_rows.push(ValueFrequency::new(
                    &asset.qualified_name,
                    col,
                    rank as i64 + 1,
                    value.clone(),
                    *freq,
                    sample_rows,
                    sample_pct,
                ));
            }
        }

        self.store.record_frequencies(&asset.qualified_name, &freq_rows).await?;
        summary.rows_stored = freq_rows.len();
        tracing::info!(
            "Frequency scan for {}: {} columns, {} rows stored",
            asset.qualified_name,
            summary.columns_scanned,
            summary.rows_stored
        );
        Ok(summary)
    }
}
