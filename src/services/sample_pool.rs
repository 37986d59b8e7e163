//! Shared sample pool: per-asset cache of materialised row samples.
//!
//! Each sampling level (0.1%, 1%, 10%, ...) is materialised once on first
//! request and reused by every consumer (PK scanning, VCC, IA, cardinality
//! and frequency scans). One pool serves one asset within one orchestrator
//! run; the orchestrator releases it when it finishes the asset.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::ColumnMeta;
use crate::services::source_executor::{OpClass, SourceExecutor, value_as_i64};
use crate::services::sql_dialect::{SqlDialect, validate_identifier};
use crate::utils::error::CatalogResult;

/// The sampling levels the engine ever materialises.
pub const SAMPLE_LEVELS: [f64; 7] = [0.1, 0.3, 1.0, 3.0, 10.0, 30.0, 100.0];

/// A materialised sample of one asset at one percentage.
#[derive(Debug, Clone)]
pub struct SampleHandle {
    pub name: String,
    pub pct: f64,
    pub row_count: u64,
    pub created_at: DateTime<Utc>,
}

/// Canonicalise a requested percentage to the fixed level set.
///
/// Values >= 100 collapse to 100; anything else snaps to the nearest level
/// at or above it, keyed in tenths of a percent so the cache key is exact.
pub fn canonical_pct(pct: f64) -> f64 {
    if pct >= 100.0 {
        return 100.0;
    }
    for level in SAMPLE_LEVELS {
        if pct <= level {
            return level;
        }
    }
    100.0
}

fn pct_key(pct: f64) -> u32 {
    (canonical_pct(pct) * 10.0).round() as u32
}

fn pct_tag(pct: f64) -> String {
    // 0.1 -> "0x1", 10.0 -> "10"
    let s = if pct.fract() == 0.0 {
        format!("{}", pct as u64)
    } else {
        format!("{pct}")
    };
    s.replace('.', "x")
}

/// Lazy-creating, per-asset temp table cache.
pub struct SamplePool {
    dialect: SqlDialect,
    schema: String,
    table: String,
    seed_col: String,
    samples: HashMap<u32, SampleHandle>,
    ts: i64,
}

impl SamplePool {
    /// Build a pool for one asset, selecting the seed column first.
    ///
    /// The seed is the column with the highest approximate distinct count
    /// over a small prefix of the table; ties break toward lower ordinals.
    /// A failed pick falls back to the first column.
    pub async fn create(
        exec: &mut SourceExecutor,
        dialect: SqlDialect,
        schema: &str,
        table: &str,
        columns: &[ColumnMeta],
    ) -> CatalogResult<Self> {
        validate_identifier(schema)?;
        validate_identifier(table)?;

        let seed_col = select_seed_column(exec, dialect, schema, table, columns).await;

        Ok(Self {
            dialect,
            schema: schema.to_string(),
            table: table.to_string(),
            seed_col,
            samples: HashMap::new(),
            ts: Utc::now().timestamp(),
        })
    }

    pub fn seed_col(&self) -> &str {
        &self.seed_col
    }

    /// Get (or materialise) the sample at the given percentage.
    ///
    /// Returns the temp table name and its actual row count.
    pub async fn get(
        &mut self,
        exec: &mut SourceExecutor,
        pct: f64,
    ) -> CatalogResult<(String, u64)> {
        let pct = canonical_pct(pct);
        let key = pct_key(pct);

        if let Some(handle) = self.samples.get(&key) {
            tracing::debug!(
                "Reusing sample {} for {}% ({} rows)",
                handle.name,
                pct,
                handle.row_count
            );
            return Ok((handle.name.clone(), handle.row_count));
        }

        let temp_name = format!("pool_{}_{}", pct_tag(pct), self.ts);
        let create_sql =
            self.dialect
                .create_sample(&temp_name, &self.schema, &self.table, &self.seed_col, pct)?;

        let t0 = std::time::Instant::now();
        exec.execute(&create_sql, OpClass::SampleCreate).await?;

        let count_sql = format!("SELECT COUNT(*) FROM `{temp_name}`");
        let row_count = exec
            .query_one(&count_sql, OpClass::RowCount)
            .await?
            .and_then(|row| row.as_ref(0).map(value_as_i64))
            .unwrap_or(0)
            .max(0) as u64;

        tracing::info!(
            "Sample {} ready: {} rows in {:.1}s",
            temp_name,
            row_count,
            t0.elapsed().as_secs_f64()
        );

        let handle = SampleHandle {
            name: format!("`{temp_name}`"),
            pct,
            row_count,
            created_at: Utc::now(),
        };
        let result = (handle.name.clone(), handle.row_count);
        self.samples.insert(key, handle);
        Ok(result)
    }

    pub fn row_count(&self, pct: f64) -> Option<u64> {
        self.samples.get(&pct_key(pct)).map(|h| h.row_count)
    }

    /// Drop every temp table owned by this pool. Drop failures are logged
    /// and ignored; the session going away reclaims temps regardless.
    pub async fn release_all(&mut self, exec: &mut SourceExecutor) {
        for handle in self.samples.values() {
            let bare = handle.name.trim_matches('`');
            match self.dialect.drop_sample(bare) {
                Ok(sql) => {
                    if let Err(e) = exec.execute(&sql, OpClass::RowCount).await {
                        tracing::warn!("Failed to drop sample {}: {}", handle.name, e);
                    }
                }
                Err(e) => tracing::warn!("Failed to build drop for {}: {}", handle.name, e),
            }
        }
        self.samples.clear();
    }
}

/// Pick the highest-cardinality column as the sampling seed.
async fn select_seed_column(
    exec: &mut SourceExecutor,
    dialect: SqlDialect,
    schema: &str,
    table: &str,
    columns: &[ColumnMeta],
) -> String {
    let names: Vec<String> = columns.iter().take(30).map(|c| c.name.clone()).collect();
    if names.is_empty() {
        return String::new();
    }
    let fallback = names[0].clone();

    let sql = match dialect.seed_column(schema, table, &names, 10_000) {
        Ok(sql) => sql,
        Err(e) => {
            tracing::warn!("Seed column query build failed: {}", e);
            return fallback;
        }
    };

    match exec.query_one(&sql, OpClass::RowCount).await {
        Ok(Some(row)) => {
            let mut best_col = fallback;
            let mut best_card: i64 = 0;
            for (i, name) in names.iter().enumerate() {
                let card = row.as_ref(i).map(value_as_i64).unwrap_or(0);
                if card > best_card {
                    best_card = card;
                    best_col = name.clone();
                }
            }
            tracing::info!("Pool seed column: {} ({} unique)", best_col, best_card);
            best_col
        }
        Ok(None) => fallback,
        Err(e) => {
            tracing::warn!("Seed column selection failed: {}", e);
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_pct_snaps_to_fixed_levels() {
        assert_eq!(canonical_pct(0.05), 0.1);
        assert_eq!(canonical_pct(0.1), 0.1);
        assert_eq!(canonical_pct(0.2), 0.3);
        assert_eq!(canonical_pct(1.0), 1.0);
        assert_eq!(canonical_pct(5.0), 10.0);
        assert_eq!(canonical_pct(30.0), 30.0);
        assert_eq!(canonical_pct(100.0), 100.0);
        assert_eq!(canonical_pct(250.0), 100.0);
    }

    #[test]
    fn pct_keys_are_distinct_per_level() {
        let keys: std::collections::HashSet<u32> =
            SAMPLE_LEVELS.iter().map(|p| pct_key(*p)).collect();
        assert_eq!(keys.len(), SAMPLE_LEVELS.len());
    }

    #[test]
    fn pct_tag_is_identifier_safe() {
        assert_eq!(pct_tag(0.1), "0x1");
        assert_eq!(pct_tag(10.0), "10");
        assert_eq!(pct_tag(100.0), "100");
        assert!(validate_identifier(&format!("pool_{}_123", pct_tag(0.3))).is_ok());
    }
}
