//! Repository operations over the local catalog store.
//!
//! Guarantees the rest of the engine relies on:
//! - asset upsert keys on `qualified_name`, so seeding is idempotent;
//! - relationship dedup keys on (parent, referenced, ordered mapping);
//! - phase logs are append-only, readers take the latest `success` row;
//! - batch writes (cardinality, frequencies) run in one transaction.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::models::{
    Asset, AssetKind, CardinalityRecord, ColumnMeta, ColumnVector, GrainResult, GrainStatus,
    PhaseLog, PhaseStatus, Relationship, ValueFrequency,
};
use crate::utils::error::CatalogResult;

#[derive(Clone)]
pub struct CatalogStore {
    db: SqlitePool,
}

#[derive(Debug, sqlx::FromRow)]
struct AssetRow {
    id: String,
    qualified_name: String,
    kind: String,
    table_schema: String,
    table_name: String,
    columns_json: String,
    row_count: Option<i64>,
    primary_key_json: Option<String>,
    pk_minimal_json: Option<String>,
    fd_removed_json: Option<String>,
    pk_method: Option<String>,
    grain_status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AssetRow {
    fn into_asset(self) -> CatalogResult<Asset> {
        let columns: Vec<ColumnMeta> = serde_json::from_str(&self.columns_json)?;
        let parse_cols = |json: Option<String>| -> CatalogResult<Option<Vec<String>>> {
            json.map(|j| serde_json::from_str(&j)).transpose().map_err(Into::into)
        };
        Ok(Asset {
            id: self.id,
            qualified_name: self.qualified_name,
            kind: AssetKind::parse(&self.kind),
            table_schema: self.table_schema,
            table_name: self.table_name,
            columns,
            row_count: self.row_count,
            primary_key: parse_cols(self.primary_key_json)?,
            pk_minimal: parse_cols(self.pk_minimal_json)?,
            fd_removed: parse_cols(self.fd_removed_json)?,
            pk_method: self.pk_method,
            grain_status: GrainStatus::parse(&self.grain_status),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Summary counts for the grain-status report.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GrainReport {
    pub total: i64,
    pub confirmed: i64,
    pub no_natural_pk: i64,
    pub unknown: i64,
    pub coverage_pct: f64,
}

impl CatalogStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    // ------------------------------------------------------------------
    // Assets
    // ------------------------------------------------------------------

    /// Insert or update an asset by qualified name.
    pub async fn upsert_asset(&self, asset: &Asset) -> CatalogResult<()> {
        let columns_json = serde_json::to_string(&asset.columns)?;
        let pk_json = asset.primary_key.as_ref().map(serde_json::to_string).transpose()?;
        let pk_minimal_json = asset.pk_minimal.as_ref().map(serde_json::to_string).transpose()?;
        let fd_removed_json = asset.fd_removed.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO assets (
                id, qualified_name, kind, table_schema, table_name,
                columns_json, row_count, primary_key_json, pk_minimal_json,
                fd_removed_json, pk_method, grain_status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(qualified_name) DO UPDATE SET
                kind = excluded.kind,
                columns_json = excluded.columns_json,
                row_count = excluded.row_count,
                primary_key_json = excluded.primary_key_json,
                pk_minimal_json = excluded.pk_minimal_json,
                fd_removed_json = excluded.fd_removed_json,
                pk_method = excluded.pk_method,
                grain_status = excluded.grain_status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&asset.id)
        .bind(&asset.qualified_name)
        .bind(asset.kind.as_str())
        .bind(&asset.table_schema)
        .bind(&asset.table_name)
        .bind(columns_json)
        .bind(asset.row_count)
        .bind(pk_json)
        .bind(pk_minimal_json)
        .bind(fd_removed_json)
        .bind(&asset.pk_method)
        .bind(asset.grain_status.as_str())
        .bind(asset.created_at)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Seed a batch of asset stubs in one transaction.
    pub async fn seed_assets(&self, assets: &[Asset]) -> CatalogResult<usize> {
        let mut tx = self.db.begin().await?;
        let mut seeded = 0usize;
        for asset in assets {
            let columns_json = serde_json::to_string(&asset.columns)?;
            sqlx::query(
                r#"
                INSERT INTO assets (
                    id, qualified_name, kind, table_schema, table_name,
                    columns_json, row_count, grain_status, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(qualified_name) DO UPDATE SET
                    kind = excluded.kind,
                    columns_json = excluded.columns_json,
                    row_count = excluded.row_count,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&asset.id)
            .bind(&asset.qualified_name)
            .bind(asset.kind.as_str())
            .bind(&asset.table_schema)
            .bind(&asset.table_name)
            .bind(columns_json)
            .bind(asset.row_count)
            .bind(asset.grain_status.as_str())
            .bind(asset.created_at)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
            seeded += 1;
        }
        tx.commit().await?;
        Ok(seeded)
    }

    pub async fn find_asset(&self, qualified_name: &str) -> CatalogResult<Option<Asset>> {
        let row: Option<AssetRow> =
            sqlx::query_as("SELECT * FROM assets WHERE qualified_name = ?")
                .bind(qualified_name)
                .fetch_optional(&self.db)
                .await?;
        row.map(AssetRow::into_asset).transpose()
    }

    /// Assets in a schema, in stable qualified-name order.
    pub async fn find_assets_by_schema(&self, schema: &str) -> CatalogResult<Vec<Asset>> {
        let rows: Vec<AssetRow> = sqlx::query_as(
            "SELECT * FROM assets WHERE table_schema = ? ORDER BY qualified_name",
        )
        .bind(schema)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(AssetRow::into_asset).collect()
    }

    pub async fn find_all_assets(&self) -> CatalogResult<Vec<Asset>> {
        let rows: Vec<AssetRow> =
            sqlx::query_as("SELECT * FROM assets ORDER BY qualified_name")
                .fetch_all(&self.db)
                .await?;
        rows.into_iter().map(AssetRow::into_asset).collect()
    }

    /// Persist a grain discovery result onto its asset.
    pub async fn update_grain(&self, result: &GrainResult) -> CatalogResult<()> {
        let pk_json = result.primary_key.as_ref().map(serde_json::to_string).transpose()?;
        let pk_minimal_json = result.pk_minimal.as_ref().map(serde_json::to_string).transpose()?;
        let fd_removed_json = result.fd_removed.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            UPDATE assets SET
                primary_key_json = ?,
                pk_minimal_json = ?,
                fd_removed_json = ?,
                pk_method = ?,
                grain_status = ?,
                updated_at = ?
            WHERE qualified_name = ?
            "#,
        )
        .bind(pk_json)
        .bind(pk_minimal_json)
        .bind(fd_removed_json)
        .bind(&result.method)
        .bind(result.status.as_str())
        .bind(Utc::now())
        .bind(&result.qualified_name)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Grain-status coverage report over one schema.
    pub async fn grain_report(&self, schema: &str) -> CatalogResult<GrainReport> {
        #[derive(sqlx::FromRow)]
        struct CountRow {
            grain_status: String,
            n: i64,
        }

        let rows: Vec<CountRow> = sqlx::query_as(
            "SELECT grain_status, COUNT(*) AS n FROM assets WHERE table_schema = ? GROUP BY grain_status",
        )
        .bind(schema)
        .fetch_all(&self.db)
        .await?;

        let mut report = GrainReport {
            total: 0,
            confirmed: 0,
            no_natural_pk: 0,
            unknown: 0,
            coverage_pct: 0.0,
        };
        for row in rows {
            report.total += row.n;
            match GrainStatus::parse(&row.grain_status) {
                GrainStatus::Confirmed => report.confirmed += row.n,
                GrainStatus::NoNaturalPk => report.no_natural_pk += row.n,
                _ => report.unknown += row.n,
            }
        }
        if report.total > 0 {
            report.coverage_pct =
                (report.confirmed + report.no_natural_pk) as f64 / report.total as f64 * 100.0;
        }
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Relationships
    // ------------------------------------------------------------------

    /// Insert or update an FK edge, deduplicated by
    /// (parent, referenced, ordered column mapping).
    pub async fn upsert_relationship(&self, rel: &Relationship) -> CatalogResult<()> {
        let mapping_key = Relationship::mapping_key(&rel.column_mappings);
        let mappings_json = serde_json::to_string(&rel.column_mappings)?;

        sqlx::query(
            r#"
            INSERT INTO relationships (
                id, parent_asset, referenced_asset, mapping_key, column_mappings_json,
                cardinality, pattern_name, confidence, match_pct, orphan_pct,
                sample_pct, validated, discovered_at, last_validated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(parent_asset, referenced_asset, mapping_key) DO UPDATE SET
                cardinality = excluded.cardinality,
                pattern_name = excluded.pattern_name,
                confidence = excluded.confidence,
                match_pct = excluded.match_pct,
                orphan_pct = excluded.orphan_pct,
                sample_pct = excluded.sample_pct,
                validated = excluded.validated,
                last_validated_at = excluded.last_validated_at
            "#,
        )
        .bind(&rel.id)
        .bind(&rel.parent_asset)
        .bind(&rel.referenced_asset)
        .bind(mapping_key)
        .bind(mappings_json)
        .bind(&rel.cardinality)
        .bind(&rel.pattern_name)
        .bind(rel.confidence)
        .bind(rel.match_pct)
        .bind(rel.orphan_pct)
        .bind(rel.sample_pct)
        .bind(rel.validated)
        .bind(rel.discovered_at)
        .bind(rel.last_validated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn relationships_for_parent(
        &self,
        parent_asset: &str,
    ) -> CatalogResult<Vec<Relationship>> {
        #[derive(sqlx::FromRow)]
        struct RelRow {
            id: String,
            parent_asset: String,
            referenced_asset: String,
            column_mappings_json: String,
            cardinality: Option<String>,
            pattern_name: String,
            confidence: f64,
            match_pct: f64,
            orphan_pct: f64,
            sample_pct: f64,
            validated: bool,
            discovered_at: DateTime<Utc>,
            last_validated_at: Option<DateTime<Utc>>,
        }

        let rows: Vec<RelRow> = sqlx::query_as(
            "SELECT id, parent_asset, referenced_asset, column_mappings_json, cardinality, \
                    pattern_name, confidence, match_pct, orphan_pct, sample_pct, validated, \
                    discovered_at, last_validated_at \
             FROM relationships WHERE parent_asset = ? ORDER BY referenced_asset",
        )
        .bind(parent_asset)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|r| {
                let column_mappings: Vec<(String, String)> =
                    serde_json::from_str(&r.column_mappings_json)?;
                Ok(Relationship {
                    id: r.id,
                    parent_asset: r.parent_asset,
                    referenced_asset: r.referenced_asset,
                    column_mappings,
                    cardinality: r.cardinality,
                    pattern_name: r.pattern_name,
                    confidence: r.confidence,
                    match_pct: r.match_pct,
                    orphan_pct: r.orphan_pct,
                    sample_pct: r.sample_pct,
                    validated: r.validated,
                    discovered_at: r.discovered_at,
                    last_validated_at: r.last_validated_at,
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Cardinality and frequencies
    // ------------------------------------------------------------------

    /// Write a batch of cardinality records in one transaction. Repeated
    /// scans replace the record for the same (asset, column, level).
    pub async fn record_cardinality(&self, records: &[CardinalityRecord]) -> CatalogResult<()> {
        let mut tx = self.db.begin().await?;
        for rec in records {
            sqlx::query(
                r#"
                INSERT INTO column_cardinality (
                    id, qualified_name, column_name, sample_pct,
                    distinct_count, total_rows, selectivity, discovered_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(qualified_name, column_name, sample_pct) DO UPDATE SET
                    distinct_count = excluded.distinct_count,
                    total_rows = excluded.total_rows,
                    selectivity = excluded.selectivity,
                    discovered_at = excluded.discovered_at
                "#,
            )
            .bind(&rec.id)
            .bind(&rec.qualified_name)
            .bind(&rec.column_name)
            .bind(rec.sample_pct)
            .bind(rec.distinct_count)
            .bind(rec.total_rows)
            .bind(rec.selectivity)
            .bind(rec.discovered_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn cardinality_for_asset(
        &self,
        qualified_name: &str,
    ) -> CatalogResult<Vec<CardinalityRecord>> {
        #[derive(sqlx::FromRow)]
        struct CardRow {
            id: String,
            qualified_name: String,
            column_name: String,
            sample_pct: f64,
            distinct_count: i64,
            total_rows: i64,
            selectivity: f64,
            discovered_at: DateTime<Utc>,
        }

        let rows: Vec<CardRow> = sqlx::query_as(
            "SELECT * FROM column_cardinality WHERE qualified_name = ? \
             ORDER BY column_name, sample_pct",
        )
        .bind(qualified_name)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| CardinalityRecord {
                id: r.id,
                qualified_name: r.qualified_name,
                column_name: r.column_name,
                sample_pct: r.sample_pct,
                distinct_count: r.distinct_count,
                total_rows: r.total_rows,
                selectivity: r.selectivity,
                discovered_at: r.discovered_at,
            })
            .collect())
    }

    /// Replace an asset's frequency rows with a fresh batch, in one
    /// transaction.
    pub async fn record_frequencies(
        &self,
        qualified_name: &str,
        rows: &[ValueFrequency],
    ) -> CatalogResult<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM column_value_frequencies WHERE qualified_name = ?")
            .bind(qualified_name)
            .execute(&mut *tx)
            .await?;
        for freq in rows {
            sqlx::query(
                r#"
                INSERT INTO column_value_frequencies (
                    id, qualified_name, column_name, rank, value,
                    frequency, relative_frequency, sample_pct, discovered_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&freq.id)
            .bind(&freq.qualified_name)
            .bind(&freq.column_name)
            .bind(freq.rank)
            .bind(&freq.value)
            .bind(freq.frequency)
            .bind(freq.relative_frequency)
            .bind(freq.sample_pct)
            .bind(freq.discovered_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn frequencies_for_column(
        &self,
        qualified_name: &str,
        column_name: &str,
    ) -> CatalogResult<Vec<ValueFrequency>> {
        #[derive(sqlx::FromRow)]
        struct FreqRow {
            id: String,
            qualified_name: String,
            column_name: String,
            rank: i64,
            value: Option<String>,
            frequency: i64,
            relative_frequency: Option<f64>,
            sample_pct: f64,
            discovered_at: DateTime<Utc>,
        }

        let rows: Vec<FreqRow> = sqlx::query_as(
            "SELECT * FROM column_value_frequencies \
             WHERE qualified_name = ? AND column_name = ? ORDER BY rank",
        )
        .bind(qualified_name)
        .bind(column_name)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ValueFrequency {
                id: r.id,
                qualified_name: r.qualified_name,
                column_name: r.column_name,
                rank: r.rank,
                value: r.value,
                frequency: r.frequency,
                relative_frequency: r.relative_frequency,
                sample_pct: r.sample_pct,
                discovered_at: r.discovered_at,
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Phase logs
    // ------------------------------------------------------------------

    /// Append one phase-log row (append-only, never updated).
    pub async fn log_phase(&self, log: &PhaseLog) -> CatalogResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_phase_logs (
                id, run_id, scope, phase_name, status, started_at,
                completed_at, duration_seconds, items_processed, error_detail
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&log.id)
        .bind(&log.run_id)
        .bind(&log.scope)
        .bind(&log.phase_name)
        .bind(log.status.as_str())
        .bind(log.started_at)
        .bind(log.completed_at)
        .bind(log.duration_seconds)
        .bind(log.items_processed)
        .bind(&log.error_detail)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Latest `success` log row for (scope, phase), if any.
    pub async fn latest_success(
        &self,
        scope: &str,
        phase_name: &str,
    ) -> CatalogResult<Option<PhaseLog>> {
        #[derive(sqlx::FromRow)]
        struct LogRow {
            id: String,
            run_id: String,
            scope: String,
            phase_name: String,
            status: String,
            started_at: DateTime<Utc>,
            completed_at: Option<DateTime<Utc>>,
            duration_seconds: f64,
            items_processed: i64,
            error_detail: Option<String>,
        }

        let row: Option<LogRow> = sqlx::query_as(
            "SELECT * FROM pipeline_phase_logs \
             WHERE scope = ? AND phase_name = ? AND status = 'success' \
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(scope)
        .bind(phase_name)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|r| PhaseLog {
            id: r.id,
            run_id: r.run_id,
            scope: r.scope,
            phase_name: r.phase_name,
            status: PhaseStatus::parse(&r.status),
            started_at: r.started_at,
            completed_at: r.completed_at,
            duration_seconds: r.duration_seconds,
            items_processed: r.items_processed,
            error_detail: r.error_detail,
        }))
    }

    // ------------------------------------------------------------------
    // Column vectors (written/read by the embedding collaborator)
    // ------------------------------------------------------------------

    pub async fn upsert_column_vector(&self, vector: &ColumnVector) -> CatalogResult<()> {
        let vector_json = serde_json::to_string(&vector.vector)?;
        sqlx::query(
            r#"
            INSERT INTO column_vectors (
                id, qualified_name, column_name, vector_type,
                vector_json, num_values, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(qualified_name, column_name, vector_type) DO UPDATE SET
                vector_json = excluded.vector_json,
                num_values = excluded.num_values,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&vector.id)
        .bind(&vector.qualified_name)
        .bind(&vector.column_name)
        .bind(&vector.vector_type)
        .bind(vector_json)
        .bind(vector.num_values)
        .bind(vector.created_at)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn find_column_vector(
        &self,
        qualified_name: &str,
        column_name: &str,
        vector_type: &str,
    ) -> CatalogResult<Option<ColumnVector>> {
        #[derive(sqlx::FromRow)]
        struct VectorRow {
            id: String,
            qualified_name: String,
            column_name: String,
            vector_type: String,
            vector_json: String,
            num_values: i64,
            created_at: DateTime<Utc>,
            updated_at: DateTime<Utc>,
        }

        let row: Option<VectorRow> = sqlx::query_as(
            "SELECT * FROM column_vectors \
             WHERE qualified_name = ? AND column_name = ? AND vector_type = ?",
        )
        .bind(qualified_name)
        .bind(column_name)
        .bind(vector_type)
        .fetch_optional(&self.db)
        .await?;

        row.map(|r| {
            let vector: Vec<f32> = serde_json::from_str(&r.vector_json)?;
            Ok(ColumnVector {
                id: r.id,
                qualified_name: r.qualified_name,
                column_name: r.column_name,
                vector_type: r.vector_type,
                vector,
                num_values: r.num_values,
                created_at: r.created_at,
                updated_at: r.updated_at,
            })
        })
        .transpose()
    }
}
