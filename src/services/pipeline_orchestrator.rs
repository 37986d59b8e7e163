//! Pipeline orchestrator for catalog discovery.
//!
//! Drives the phases per schema batch, strictly sequentially on the shared
//! source connection:
//!
//! 1. `seed`          - asset stubs + column/row-count enrichment
//! 2. `pk_discovery`  - grain discovery for unconfirmed assets
//! 3. `cardinality`   - per-column distinct counts at 1% and 10%
//! 4. `frequencies`   - top-N values per FK-candidate column
//! 5. `fk_discovery`  - pattern-proposed candidate edges
//! 6. `fk_validation` - progressive outer-join validation + persistence
//!
//! Each phase writes its own log rows and advances the on-disk checkpoint;
//! a resumed run skips phases the checkpoint records for the batch. Assets
//! are processed in qualified-name order; one asset's failure is recorded
//! and the run moves on, but a phase whose error rate exceeds the
//! configured threshold aborts the batch.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{
    Asset, AssetKind, ColumnMeta, GrainStatus, PhaseLog, PhaseStatus, Relationship,
};
use crate::services::cardinality_scanner::CardinalityScanner;
use crate::services::catalog_store::CatalogStore;
use crate::services::fk_discovery::FkDiscoveryService;
use crate::services::fk_validator::ProgressiveFkValidator;
use crate::services::grain_discovery::GrainDiscoveryService;
use crate::services::sample_pool::SamplePool;
use crate::services::source_executor::{OpClass, SourceExecutor, row_values, value_as_i64};
use crate::services::sql_dialect::{SqlDialect, validate_identifier};
use crate::utils::checkpoint::Checkpoint;
use crate::utils::error::CatalogResult;

/// Configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Schema to analyze; doubles as the batch name in logs and the
    /// checkpoint.
    pub schema_pattern: String,
    /// Sample percentage for the frequency scan.
    pub sample_pct: f64,
    pub top_n_values: usize,
    pub fk_top_n_per_column: usize,
    pub validate_fks: bool,
    /// Opt-in `1:1`/`1:N`/`N:M` labelling (runs the reversed edge too).
    pub classify_cardinality: bool,
    /// Abort the batch when a phase's error rate exceeds this fraction.
    pub error_rate_abort: f64,
    pub resume: bool,
    pub checkpoint_path: PathBuf,
    pub pk_overrides_path: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            schema_pattern: String::new(),
            sample_pct: 10.0,
            top_n_values: 100,
            fk_top_n_per_column: 3,
            validate_fks: true,
            classify_cardinality: false,
            error_rate_abort: 0.5,
            resume: false,
            checkpoint_path: PathBuf::from("data/pipeline_state.json"),
            pk_overrides_path: PathBuf::from("config/primary_keys.json"),
        }
    }
}

/// Per-phase work summary collected while the phase runs.
#[derive(Debug, Default)]
struct PhaseOutcome {
    items_processed: i64,
    items_total: i64,
    errors: Vec<String>,
}

impl PhaseOutcome {
    fn with_total(total: usize) -> Self {
        Self { items_total: total as i64, ..Self::default() }
    }

    fn error_rate(&self) -> f64 {
        if self.items_total == 0 {
            return 0.0;
        }
        self.errors.len() as f64 / self.items_total as f64
    }
}

/// Result from a single pipeline phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseResult {
    pub phase_name: String,
    pub status: PhaseStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub items_processed: i64,
    pub items_total: i64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Error,
}

/// Aggregate metrics for the run summary.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunMetrics {
    pub pk_discovered: i64,
    pub pk_no_natural: i64,
    pub cardinality_records: i64,
    pub frequency_rows: i64,
    pub fk_candidates: i64,
    pub fk_confirmed: i64,
}

/// Complete pipeline execution result.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub schema_name: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total_duration_seconds: f64,
    pub status: RunStatus,
    pub phases: Vec<PhaseResult>,
    pub errors: Vec<String>,
    pub metrics: RunMetrics,
}

const PHASE_SEED: &str = "seed";
const PHASE_PK_DISCOVERY: &str = "pk_discovery";
const PHASE_CARDINALITY: &str = "cardinality";
const PHASE_FREQUENCIES: &str = "frequencies";
const PHASE_FK_DISCOVERY: &str = "fk_discovery";
const PHASE_FK_VALIDATION: &str = "fk_validation";

/// Orchestrates the complete discovery pipeline for one source.
pub struct PipelineOrchestrator {
    store: CatalogStore,
    dialect: SqlDialect,
    exec: SourceExecutor,
    run_id: String,
    /// One sample pool per asset, shared across the sampling phases and
    /// released once the last of them completes.
    pools: HashMap<String, SamplePool>,
    metrics: RunMetrics,
}

/// Get or lazily create the pool for one asset.
async fn pool_for<'a>(
    pools: &'a mut HashMap<String, SamplePool>,
    exec: &mut SourceExecutor,
    dialect: SqlDialect,
    asset: &Asset,
) -> CatalogResult<&'a mut SamplePool> {
    match pools.entry(asset.qualified_name.clone()) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let pool = SamplePool::create(
                exec,
                dialect,
                &asset.table_schema,
                &asset.table_name,
                &asset.columns,
            )
            .await?;
            Ok(entry.insert(pool))
        }
    }
}

impl PipelineOrchestrator {
    pub fn new(store: CatalogStore, dialect: SqlDialect, exec: SourceExecutor) -> Self {
        Self {
            store,
            dialect,
            exec,
            run_id: uuid::Uuid::new_v4().to_string(),
            pools: HashMap::new(),
            metrics: RunMetrics::default(),
        }
    }

    pub fn into_executor(self) -> SourceExecutor {
        self.exec
    }

    /// Execute the full pipeline for one schema batch.
    pub async fn run(&mut self, config: &PipelineConfig) -> CatalogResult<PipelineResult> {
        let started_at = Utc::now();
        let batch = config.schema_pattern.clone();
        self.metrics = RunMetrics::default();

        let mut checkpoint = if config.resume {
            Checkpoint::load(&config.checkpoint_path)?
        } else {
            Checkpoint::default()
        };

        tracing::info!("Starting pipeline for schema {} (run {})", batch, self.run_id);

        let mut phases: Vec<PhaseResult> = Vec::new();
        let mut aborted = false;

        let phase_names = [
            PHASE_SEED,
            PHASE_PK_DISCOVERY,
            PHASE_CARDINALITY,
            PHASE_FREQUENCIES,
            PHASE_FK_DISCOVERY,
            PHASE_FK_VALIDATION,
        ];

        for phase_name in phase_names {
            if phase_name == PHASE_FK_VALIDATION && !config.validate_fks {
                continue;
            }
            if checkpoint.is_done(&batch, phase_name) {
                tracing::info!("Phase {} already complete for {}, skipping", phase_name, batch);
                continue;
            }
            // A resumed run also trusts the phase log when the checkpoint
            // file is gone or stale
            if config.resume
                && self.store.latest_success(&batch, phase_name).await?.is_some()
            {
                tracing::info!(
                    "Phase {} has a successful log entry for {}, skipping on resume",
                    phase_name,
                    batch
                );
                checkpoint.mark_done(&batch, phase_name);
                checkpoint.save(&config.checkpoint_path)?;
                continue;
            }

            let phase_started = Utc::now();
            self.store
                .log_phase(&PhaseLog::started(&self.run_id, &batch, phase_name))
                .await?;

            let outcome = match phase_name {
                PHASE_SEED => self.phase_seed(config).await,
                PHASE_PK_DISCOVERY => self.phase_pk_discovery(config).await,
                PHASE_CARDINALITY => self.phase_cardinality(config).await,
                PHASE_FREQUENCIES => self.phase_frequencies(config).await,
                PHASE_FK_DISCOVERY => self.phase_fk_discovery(config).await,
                _ => self.phase_fk_validation(config).await,
            };

            let phase_result = match outcome {
                Ok(outcome) => {
                    let failed = outcome.error_rate() > config.error_rate_abort;
                    let status =
                        if failed { PhaseStatus::Error } else { PhaseStatus::Success };
                    if failed {
                        tracing::error!(
                            "Phase {} error rate {:.0}% exceeds {:.0}%, aborting batch",
                            phase_name,
                            outcome.error_rate() * 100.0,
                            config.error_rate_abort * 100.0
                        );
                        aborted = true;
                    }
                    self.finish_phase(
                        &batch,
                        phase_name,
                        status,
                        phase_started,
                        outcome,
                    )
                    .await?
                }
                Err(e) => {
                    tracing::error!("Phase {} failed: {}", phase_name, e);
                    aborted = true;
                    let mut outcome = PhaseOutcome::default();
                    outcome.errors.push(e.to_string());
                    self.finish_phase(
                        &batch,
                        phase_name,
                        PhaseStatus::Error,
                        phase_started,
                        outcome,
                    )
                    .await?
                }
            };

            if phase_result.status == PhaseStatus::Success {
                checkpoint.mark_done(&batch, phase_name);
                checkpoint.save(&config.checkpoint_path)?;
            }
            phases.push(phase_result);

            // The sampling phases are done; the per-asset pools can go
            if phase_name == PHASE_FREQUENCIES || aborted {
                self.release_pools().await;
            }
            if aborted {
                break;
            }
        }
        self.release_pools().await;

        let completed_at = Utc::now();
        let has_errors = phases.iter().any(|p| p.status == PhaseStatus::Error);
        let status = if aborted {
            RunStatus::Error
        } else if has_errors {
            RunStatus::Partial
        } else {
            RunStatus::Success
        };

        let result = PipelineResult {
            schema_name: batch,
            run_id: self.run_id.clone(),
            started_at,
            completed_at,
            total_duration_seconds: (completed_at - started_at).num_milliseconds() as f64
                / 1000.0,
            status,
            errors: phases.iter().flat_map(|p| p.errors.iter().cloned()).collect(),
            phases,
            metrics: self.metrics,
        };

        tracing::info!(
            "Pipeline complete: {:?} in {:.1}s ({} phases)",
            result.status,
            result.total_duration_seconds,
            result.phases.len()
        );
        Ok(result)
    }

    async fn finish_phase(
        &self,
        batch: &str,
        phase_name: &str,
        status: PhaseStatus,
        started_at: DateTime<Utc>,
        outcome: PhaseOutcome,
    ) -> CatalogResult<PhaseResult> {
        let error_detail = if outcome.errors.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&outcome.errors)?)
        };
        let log = PhaseLog::finished(
            &self.run_id,
            batch,
            phase_name,
            status,
            started_at,
            outcome.items_processed,
            error_detail,
        );
        self.store.log_phase(&log).await?;

        Ok(PhaseResult {
            phase_name: phase_name.to_string(),
            status,
            started_at,
            completed_at: log.completed_at.unwrap_or(started_at),
            duration_seconds: log.duration_seconds,
            items_processed: outcome.items_processed,
            items_total: outcome.items_total,
            errors: outcome.errors,
        })
    }

    async fn release_pools(&mut self) {
        for pool in self.pools.values_mut() {
            pool.release_all(&mut self.exec).await;
        }
        self.pools.clear();
    }

    // ------------------------------------------------------------------
    // Phase 1: seed
    // ------------------------------------------------------------------

    /// Create/refresh asset stubs from the source's metadata views and
    /// enrich them with column inventories and row counts.
    async fn phase_seed(&mut self, config: &PipelineConfig) -> CatalogResult<PhaseOutcome> {
        let schema = &config.schema_pattern;
        let sql = self.dialect.table_inventory(schema)?;
        let rows = self.exec.query_rows(&sql, OpClass::RowCount).await?;

        let mut outcome = PhaseOutcome::with_total(rows.len());
        let mut assets: Vec<Asset> = Vec::new();

        for row in rows {
            let values = row_values(&row);
            let Some(Some(table_name)) = values.first().cloned() else {
                continue;
            };
            if validate_identifier(&table_name).is_err() {
                tracing::warn!("Skipping table with unsafe name: {:?}", table_name);
                outcome.errors.push(format!("unsafe table name: {table_name}"));
                continue;
            }
            let kind = match values.get(1).and_then(|v| v.as_deref()) {
                Some("VIEW") => AssetKind::View,
                _ => AssetKind::Table,
            };

            let mut asset = Asset::stub(kind, schema, &table_name);
            match self.enrich_asset(&mut asset).await {
                Ok(()) => assets.push(asset),
                Err(e) => {
                    tracing::warn!("Seed enrichment failed for {}.{}: {}", schema, table_name, e);
                    outcome.errors.push(format!("{schema}.{table_name}: {e}"));
                }
            }
        }

        let seeded = self.store.seed_assets(&assets).await?;
        outcome.items_processed = seeded as i64;
        tracing::info!("Seeded {} assets in schema {}", seeded, schema);
        Ok(outcome)
    }

    async fn enrich_asset(&mut self, asset: &mut Asset) -> CatalogResult<()> {
        let sql = self
            .dialect
            .column_metadata(&asset.table_schema, &asset.table_name)?;
        let rows = self.exec.query_rows(&sql, OpClass::RowCount).await?;
        asset.columns = rows
            .iter()
            .filter_map(|row| {
                let values = row_values(row);
                let name = values.first().cloned().flatten()?;
                let data_type = values.get(1).cloned().flatten().unwrap_or_default();
                let ordinal = row.as_ref(2).map(value_as_i64).unwrap_or(0).max(0) as u32;
                Some(ColumnMeta { name, data_type, ordinal })
            })
            .collect();

        let sql = self.dialect.row_count(&asset.table_schema, &asset.table_name)?;
        match self.exec.query_one(&sql, OpClass::RowCount).await {
            Ok(Some(row)) => {
                asset.row_count = row.as_ref(0).map(value_as_i64);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Row count failed for {}: {}", asset.qualified_name, e);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase 2: PK discovery
    // ------------------------------------------------------------------

    async fn phase_pk_discovery(
        &mut self,
        config: &PipelineConfig,
    ) -> CatalogResult<PhaseOutcome> {
        let assets = self.store.find_assets_by_schema(&config.schema_pattern).await?;
        let service =
            GrainDiscoveryService::new(self.dialect, config.pk_overrides_path.clone())?;
        let store = self.store.clone();
        let dialect = self.dialect;

        let mut outcome = PhaseOutcome::with_total(assets.len());
        for (i, asset) in assets.iter().enumerate() {
            if asset.grain_status == GrainStatus::Confirmed {
                outcome.items_processed += 1;
                continue;
            }
            tracing::info!(
                "[{}/{}] Discovering grain for {}",
                i + 1,
                assets.len(),
                asset.qualified_name
            );

            let pools = &mut self.pools;
            let exec = &mut self.exec;
            let pool = match pool_for(pools, exec, dialect, asset).await {
                Ok(pool) => pool,
                Err(e) => {
                    tracing::warn!("Sample pool failed for {}: {}", asset.qualified_name, e);
                    outcome.errors.push(format!("{}: {}", asset.qualified_name, e));
                    let mut error_result = crate::models::GrainResult::status_only(
                        &asset.qualified_name,
                        GrainStatus::Error,
                        "error",
                    );
                    error_result.metadata = serde_json::json!({"error": e.to_string()});
                    store.update_grain(&error_result).await?;
                    continue;
                }
            };

            match service.discover(exec, pool, asset).await {
                Ok(result) => {
                    match result.status {
                        GrainStatus::Confirmed => self.metrics.pk_discovered += 1,
                        GrainStatus::NoNaturalPk => self.metrics.pk_no_natural += 1,
                        GrainStatus::Error => {
                            outcome.errors.push(format!(
                                "{}: {}",
                                asset.qualified_name, result.metadata
                            ));
                        }
                        GrainStatus::Unknown => {}
                    }
                    store.update_grain(&result).await?;
                    outcome.items_processed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "PK discovery failed for {}: {}",
                        asset.qualified_name,
                        e
                    );
                    outcome.errors.push(format!("{}: {}", asset.qualified_name, e));
                }
            }
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Phase 3: cardinality
    // ------------------------------------------------------------------

    async fn phase_cardinality(
        &mut self,
        config: &PipelineConfig,
    ) -> CatalogResult<PhaseOutcome> {
        let assets = self.store.find_assets_by_schema(&config.schema_pattern).await?;
        let store = self.store.clone();
        let scanner = CardinalityScanner::new(&store, self.dialect);
        let dialect = self.dialect;

        let mut outcome = PhaseOutcome::with_total(assets.len());
        for asset in &assets {
            if asset.columns.is_empty() {
                outcome.items_processed += 1;
                continue;
            }
            let pools = &mut self.pools;
            let exec = &mut self.exec;
            let pool = match pool_for(pools, exec, dialect, asset).await {
                Ok(pool) => pool,
                Err(e) => {
                    outcome.errors.push(format!("{}: {}", asset.qualified_name, e));
                    continue;
                }
            };
            match scanner.scan_cardinality(exec, pool, asset).await {
                Ok(records) => {
                    self.metrics.cardinality_records += records as i64;
                    outcome.items_processed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "Cardinality scan failed for {}: {}",
                        asset.qualified_name,
                        e
                    );
                    outcome.errors.push(format!("{}: {}", asset.qualified_name, e));
                }
            }
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Phase 4: frequencies
    // ------------------------------------------------------------------

    async fn phase_frequencies(
        &mut self,
        config: &PipelineConfig,
    ) -> CatalogResult<PhaseOutcome> {
        let assets = self.store.find_assets_by_schema(&config.schema_pattern).await?;
        let store = self.store.clone();
        let scanner = CardinalityScanner::new(&store, self.dialect);
        let dialect = self.dialect;

        let mut outcome = PhaseOutcome::with_total(assets.len());
        for asset in &assets {
            if asset.columns.is_empty() {
                outcome.items_processed += 1;
                continue;
            }
            let pools = &mut self.pools;
            let exec = &mut self.exec;
            let pool = match pool_for(pools, exec, dialect, asset).await {
                Ok(pool) => pool,
                Err(e) => {
                    outcome.errors.push(format!("{}: {}", asset.qualified_name, e));
                    continue;
                }
            };
            match scanner
                .scan_frequencies(exec, pool, asset, config.sample_pct, config.top_n_values)
                .await
            {
                Ok(summary) => {
                    self.metrics.frequency_rows += summary.rows_stored as i64;
                    outcome.items_processed += 1;
                    for error in summary.errors {
                        outcome.errors.push(format!("{}: {}", asset.qualified_name, error));
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Frequency scan failed for {}: {}",
                        asset.qualified_name,
                        e
                    );
                    outcome.errors.push(format!("{}: {}", asset.qualified_name, e));
                }
            }
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Phase 5: FK candidate discovery
    // ------------------------------------------------------------------

    async fn phase_fk_discovery(
        &mut self,
        config: &PipelineConfig,
    ) -> CatalogResult<PhaseOutcome> {
        let assets = self.store.find_assets_by_schema(&config.schema_pattern).await?;
        let service = FkDiscoveryService::new();

        let mut outcome = PhaseOutcome::with_total(assets.len());
        for asset in &assets {
            let candidates =
                service.discover_candidates(asset, &assets, config.fk_top_n_per_column);
            self.metrics.fk_candidates += candidates.len() as i64;
            outcome.items_processed += 1;
        }
        tracing::info!(
            "FK discovery proposed {} candidates across {} assets",
            self.metrics.fk_candidates,
            assets.len()
        );
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Phase 6: FK validation
    // ------------------------------------------------------------------

    async fn phase_fk_validation(
        &mut self,
        config: &PipelineConfig,
    ) -> CatalogResult<PhaseOutcome> {
        let assets = self.store.find_assets_by_schema(&config.schema_pattern).await?;
        let service = FkDiscoveryService::new();
        let validator = ProgressiveFkValidator::new(self.dialect);
        let store = self.store.clone();

        let mut candidates = Vec::new();
        for asset in &assets {
            candidates.extend(service.discover_candidates(
                asset,
                &assets,
                config.fk_top_n_per_column,
            ));
        }

        let mut outcome = PhaseOutcome::with_total(candidates.len());
        for candidate in &candidates {
            let (result, cardinality) = if config.classify_cardinality {
                match validator.validate_bidirectional(&mut self.exec, candidate).await {
                    Ok((forward, reverse)) => {
                        let label =
                            ProgressiveFkValidator::classify_cardinality(&forward, &reverse);
                        (forward, label)
                    }
                    Err(e) => {
                        outcome.errors.push(format!(
                            "{} -> {}: {}",
                            candidate.parent_view, candidate.referenced_view, e
                        ));
                        continue;
                    }
                }
            } else {
                match validator.validate(&mut self.exec, candidate).await {
                    Ok(result) => (result, None),
                    Err(e) => {
                        outcome.errors.push(format!(
                            "{} -> {}: {}",
                            candidate.parent_view, candidate.referenced_view, e
                        ));
                        continue;
                    }
                }
            };

            if let Some(error) = &result.error {
                outcome.errors.push(format!(
                    "{} -> {}: {}",
                    candidate.parent_view, candidate.referenced_view, error
                ));
                continue;
            }

            let now = Utc::now();
            let relationship = Relationship {
                id: uuid::Uuid::new_v4().to_string(),
                parent_asset: candidate.parent_view.clone(),
                referenced_asset: candidate.referenced_view.clone(),
                column_mappings: candidate.mappings(),
                cardinality,
                pattern_name: candidate.pattern_name.clone(),
                confidence: candidate.confidence,
                match_pct: result.match_pct,
                orphan_pct: result.orphan_pct,
                sample_pct: result.sample_pct,
                validated: result.is_validated(),
                discovered_at: now,
                last_validated_at: Some(now),
            };
            store.upsert_relationship(&relationship).await?;

            if result.is_validated() {
                self.metrics.fk_confirmed += 1;
            }
            outcome.items_processed += 1;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_rate_counts_against_total() {
        let mut outcome = PhaseOutcome::with_total(10);
        assert_eq!(outcome.error_rate(), 0.0);
        outcome.errors.push("a".to_string());
        outcome.errors.push("b".to_string());
        assert_eq!(outcome.error_rate(), 0.2);

        let empty = PhaseOutcome::with_total(0);
        assert_eq!(empty.error_rate(), 0.0);
    }
}
