//! Grain (primary key) discovery for catalogued assets.
//!
//! Discovery order per asset:
//! 1. `no_natural_pk` designation in the override file
//! 2. Manual PK override
//! 3. Pattern probe (`<Table>ID`-style names), validated on a 1% sample
//! 4. Progressive seven-step scan
//! 5. Varying-column chase on the scanner's best near-unique candidate
//! 6. Iterative accumulation (which re-enters the chase on plateau)
//!
//! Composite results pass through FD minimisation before they reach the
//! orchestrator; the service never writes the catalog itself.

pub mod accumulation;
pub mod fd_minimize;
pub mod varying_chase;

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{Asset, ColumnMeta, GrainResult, GrainStatus};
use crate::services::pk_discovery::{ProgressiveScanner, ScanStatus, parse_candidate};
use crate::services::sample_pool::SamplePool;
use crate::services::source_executor::{OpClass, SourceExecutor, named_counts, value_as_i64};
use crate::services::sql_dialect::{SqlDialect, validate_identifier};
use crate::utils::error::CatalogResult;

pub use accumulation::iterative_accumulation;
pub use fd_minimize::fd_minimize;
pub use varying_chase::varying_column_chase;

/// Selectivity a pattern hit must reach on the 1% sample (fraction).
const PATTERN_UNIQUENESS_THRESHOLD: f64 = 0.9999;

/// Minimum best-candidate selectivity for the chase to be worth running.
const CHASE_TRIGGER_THRESHOLD: f64 = 0.90;

/// Declared types never tested by the chase or accumulation.
const SKIP_TYPES: [&str; 13] = [
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
    "binary",
    "varbinary",
    "bit",
];

/// Column names excluded from key testing: change-capture bookkeeping,
/// archive timestamps, and replication GUIDs.
static SKIP_NAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^__").unwrap(),
        Regex::new(r"ArchiveDTS$").unwrap(),
        Regex::new(r"(?i)^rowguid$").unwrap(),
    ]
});

/// Whether a column is eligible for chase/accumulation testing.
pub fn should_test_column(name: &str, data_type: &str) -> bool {
    let base = data_type.to_lowercase();
    let base = base.split('(').next().unwrap_or("").trim().to_string();
    if SKIP_TYPES.contains(&base.as_str()) {
        return false;
    }
    if SKIP_NAME_PATTERNS.iter().any(|p| p.is_match(name)) {
        return false;
    }
    validate_identifier(name).is_ok()
}

/// One manual PK override entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkOverrideEntry {
    pub columns: Vec<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub confirmed_by: String,
    #[serde(default)]
    pub confirmed_date: String,
}

/// Operator-maintained PK configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PkOverrides {
    #[serde(default)]
    pub primary_keys: HashMap<String, PkOverrideEntry>,
    #[serde(default)]
    pub no_natural_pk: Vec<String>,
}

impl PkOverrides {
    pub fn load(path: &PathBuf) -> CatalogResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &PathBuf) -> CatalogResult<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Service for discovering primary keys, one asset at a time.
pub struct GrainDiscoveryService {
    dialect: SqlDialect,
    overrides: PkOverrides,
    overrides_path: PathBuf,
}

impl GrainDiscoveryService {
    pub fn new(dialect: SqlDialect, overrides_path: PathBuf) -> CatalogResult<Self> {
        let overrides = PkOverrides::load(&overrides_path)?;
        Ok(Self { dialect, overrides, overrides_path })
    }

    /// Discover the grain of one asset. Issues no source queries for
    /// assets resolved by the override file.
    pub async fn discover(
        &self,
        exec: &mut SourceExecutor,
        pool: &mut SamplePool,
        asset: &Asset,
    ) -> CatalogResult<GrainResult> {
        let qualified_name = &asset.qualified_name;

        if self.overrides.no_natural_pk.iter().any(|n| n == qualified_name) {
            return Ok(GrainResult::status_only(
                qualified_name,
                GrainStatus::NoNaturalPk,
                "no-pk",
            ));
        }

        if let Some(entry) = self.overrides.primary_keys.get(qualified_name) {
            let mut result =
                GrainResult::confirmed(qualified_name, entry.columns.clone(), "config");
            result.metadata = serde_json::json!({
                "source": entry.source,
                "confirmed_by": entry.confirmed_by,
            });
            return Ok(result);
        }

        if asset.columns.is_empty() {
            let mut result =
                GrainResult::status_only(qualified_name, GrainStatus::Error, "error");
            result.metadata =
                serde_json::json!({"error": "no columns available for grain discovery"});
            return Ok(result);
        }

        // Pattern probe, accepted only when it validates on a sample
        if let Some(pattern_pk) = pattern_probe(&asset.table_name, &asset.columns) {
            let selectivity = self.test_uniqueness(exec, pool, &pattern_pk).await?;
            if selectivity >= PATTERN_UNIQUENESS_THRESHOLD {
                let mut result = GrainResult::confirmed(qualified_name, pattern_pk, "pattern");
                result.confidence = selectivity;
                return Ok(result);
            }
            tracing::info!(
                "Pattern candidate {} selectivity {:.2}%, not unique",
                pattern_pk.join(" + "),
                selectivity * 100.0
            );
        }

        let row_count = match asset.row_count {
            Some(n) if n >= 0 => n as u64,
            _ => self.fetch_row_count(exec, asset).await?,
        };
        if row_count == 0 {
            return Ok(GrainResult::status_only(
                qualified_name,
                GrainStatus::Unknown,
                "exhausted",
            ));
        }

        // Progressive scan
        let scanner = ProgressiveScanner::new(self.dialect);
        let scan = scanner
            .scan(exec, pool, qualified_name, &asset.columns, row_count)
            .await?;

        match scan.status {
            ScanStatus::Confirmed => {
                if let Some(pk_cols) = scan.primary_key.clone() {
                    let mut result =
                        GrainResult::confirmed(qualified_name, pk_cols.clone(), "progressive-scan");
                    result.confidence = scan.confidence;
                    if pk_cols.len() > 1 {
                        let (sample, _) = pool.get(exec, 1.0).await?;
                        let (minimal, removed) =
                            fd_minimize(exec, self.dialect, &sample, &pk_cols).await?;
                        if !removed.is_empty() {
                            result.pk_minimal = Some(minimal);
                            result.fd_removed = Some(removed);
                        }
                    }
                    return Ok(result);
                }
            }
            ScanStatus::Error => {
                let mut result =
                    GrainResult::status_only(qualified_name, GrainStatus::Error, "error");
                result.metadata = serde_json::json!({
                    "error": scan.escalation_reason,
                    "steps_executed": scan.steps_executed,
                });
                return Ok(result);
            }
            ScanStatus::Escalated => {
                tracing::info!(
                    "Scan escalated for {}: {}",
                    qualified_name,
                    scan.escalation_reason.as_deref().unwrap_or("-")
                );
            }
        }

        // Varying-column chase on a near-unique best candidate
        if let Some((best, best_sel)) = scan.best_candidate()
            && best_sel >= CHASE_TRIGGER_THRESHOLD
        {
            let candidate_cols = parse_candidate(&best);
            if let Some(result) = varying_column_chase(
                exec,
                pool,
                self.dialect,
                qualified_name,
                &candidate_cols,
                best_sel,
                &asset.columns,
                row_count,
            )
            .await?
            {
                return Ok(result);
            }
        }

        // Iterative accumulation fallback
        if let Some(result) = iterative_accumulation(
            exec,
            pool,
            self.dialect,
            qualified_name,
            &asset.columns,
            row_count,
        )
        .await?
        {
            return Ok(result);
        }

        Ok(GrainResult::status_only(qualified_name, GrainStatus::Unknown, "exhausted"))
    }

    /// Selectivity of a column set on the pooled 1% sample (fraction).
    async fn test_uniqueness(
        &self,
        exec: &mut SourceExecutor,
        pool: &mut SamplePool,
        columns: &[String],
    ) -> CatalogResult<f64> {
        let (sample, _) = pool.get(exec, 1.0).await?;
        let sql = self.dialect.count_distinct(&sample, &[], &[columns.to_vec()])?;
        let row = match exec.query_one(&sql, OpClass::Cardinality).await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(0.0),
            Err(e) => {
                tracing::warn!("Uniqueness test failed: {}", e);
                return Ok(0.0);
            }
        };
        let counts: HashMap<String, i64> = named_counts(&row).into_iter().collect();
        let total = counts.get("_row_count").copied().unwrap_or(0);
        let distinct = counts.get("comp_0").copied().unwrap_or(0);
        if total == 0 {
            return Ok(0.0);
        }
        Ok(distinct as f64 / total as f64)
    }

    async fn fetch_row_count(
        &self,
        exec: &mut SourceExecutor,
        asset: &Asset,
    ) -> CatalogResult<u64> {
        let sql = self.dialect.row_count(&asset.table_schema, &asset.table_name)?;
        let count = exec
            .query_one(&sql, OpClass::RowCount)
            .await?
            .and_then(|row| row.as_ref(0).map(value_as_i64))
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    // ------------------------------------------------------------------
    // Override-file maintenance
    // ------------------------------------------------------------------

    /// Record an asset as having no natural PK and persist the override.
    pub fn mark_no_natural_pk(
        &mut self,
        qualified_name: &str,
        source: &str,
        confirmed_by: &str,
    ) -> CatalogResult<GrainResult> {
        if !self.overrides.no_natural_pk.iter().any(|n| n == qualified_name) {
            self.overrides.no_natural_pk.push(qualified_name.to_string());
            self.overrides.save(&self.overrides_path)?;
        }
        let mut result =
            GrainResult::status_only(qualified_name, GrainStatus::NoNaturalPk, "no-pk");
        result.metadata = serde_json::json!({"source": source, "confirmed_by": confirmed_by});
        Ok(result)
    }

    /// Record a manual PK override and persist it.
    pub fn apply_manual_override(
        &mut self,
        qualified_name: &str,
        columns: Vec<String>,
        source: &str,
        confirmed_by: &str,
    ) -> CatalogResult<GrainResult> {
        self.overrides.primary_keys.insert(
            qualified_name.to_string(),
            PkOverrideEntry {
                columns: columns.clone(),
                source: source.to_string(),
                confirmed_by: confirmed_by.to_string(),
                confirmed_date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
            },
        );
        self.overrides.save(&self.overrides_path)?;

        let mut result = GrainResult::confirmed(qualified_name, columns, "manual");
        result.metadata = serde_json::json!({"source": source, "confirmed_by": confirmed_by});
        Ok(result)
    }
}

/// Pattern-based PK probe over the column inventory.
///
/// Pattern 1: a column named exactly `<Table>` + ID/Key suffix.
/// Pattern 2: exactly one column ending in `ID`.
pub fn pattern_probe(table_name: &str, columns: &[ColumnMeta]) -> Option<Vec<String>> {
    let col_names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();

    for suffix in ["ID", "Id", "_ID", "_id", "Key", "_Key"] {
        let candidate = format!("{table_name}{suffix}");
        if let Some(hit) = col_names.iter().find(|n| **n == candidate) {
            return Some(vec![hit.to_string()]);
        }
    }

    let id_cols: Vec<&str> = col_names
        .iter()
        .filter(|n| n.to_uppercase().ends_with("ID"))
        .copied()
        .collect();
    if id_cols.len() == 1 {
        return Some(vec![id_cols[0].to_string()]);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, data_type: &str, ordinal: u32) -> ColumnMeta {
        ColumnMeta { name: name.to_string(), data_type: data_type.to_string(), ordinal }
    }

    #[test]
    fn pattern_probe_prefers_table_name_suffix() {
        let columns = vec![
            col("OrderID", "int", 1),
            col("CustomerID", "int", 2),
            col("Amount", "decimal", 3),
        ];
        assert_eq!(pattern_probe("Order", &columns), Some(vec!["OrderID".to_string()]));
    }

    #[test]
    fn pattern_probe_falls_back_to_single_id_column() {
        let columns = vec![col("InvoiceID", "int", 1), col("Amount", "decimal", 2)];
        assert_eq!(pattern_probe("Billing", &columns), Some(vec!["InvoiceID".to_string()]));
    }

    #[test]
    fn pattern_probe_declines_ambiguous_id_columns() {
        let columns = vec![
            col("InvoiceID", "int", 1),
            col("CustomerID", "int", 2),
            col("Amount", "decimal", 3),
        ];
        assert_eq!(pattern_probe("Billing", &columns), None);
    }

    #[test]
    fn should_test_column_filters_types_and_names() {
        assert!(should_test_column("OrderID", "int"));
        assert!(should_test_column("Name", "varchar(100)"));
        assert!(!should_test_column("Payload", "longblob"));
        assert!(!should_test_column("Doc", "json"));
        assert!(!should_test_column("__seq_val", "int"));
        assert!(!should_test_column("OrderArchiveDTS", "datetime"));
        assert!(!should_test_column("rowguid", "char(36)"));
        assert!(!should_test_column("bad;name", "int"));
    }

    #[test]
    fn overrides_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("keystone_pk_{}", uuid::Uuid::new_v4()));
        let path = dir.join("primary_keys_config.json");

        let mut overrides = PkOverrides::default();
        overrides.no_natural_pk.push("dbo.AuditTrail".to_string());
        overrides.primary_keys.insert(
            "dbo.Orders".to_string(),
            PkOverrideEntry {
                columns: vec!["OrderID".to_string()],
                source: "dba".to_string(),
                confirmed_by: "ops".to_string(),
                confirmed_date: "2026-08-01".to_string(),
            },
        );
        overrides.save(&path).unwrap();

        let loaded = PkOverrides::load(&path).unwrap();
        assert_eq!(loaded.no_natural_pk, vec!["dbo.AuditTrail".to_string()]);
        assert_eq!(
            loaded.primary_keys["dbo.Orders"].columns,
            vec!["OrderID".to_string()]
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_overrides_file_loads_empty() {
        let path = PathBuf::from("/nonexistent/keystone/primary_keys_config.json");
        let overrides = PkOverrides::load(&path).unwrap();
        assert!(overrides.primary_keys.is_empty());
        assert!(overrides.no_natural_pk.is_empty());
    }
}
