use std::path::PathBuf;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keystone::config::Config;
use keystone::services::{
    CatalogStore, PipelineConfig, PipelineOrchestrator, RunStatus, SourceExecutor, SqlDialect,
};
use keystone::db;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let (config, cli_args) = Config::load()?;
    init_tracing(&config)?;

    tracing::info!("Keystone starting: schema {}", config.pipeline.schema_pattern);

    let catalog_pool = db::connect(&config.catalog.url).await?;
    db::init_schema(&catalog_pool).await?;
    let store = CatalogStore::new(catalog_pool);

    let executor = SourceExecutor::connect(&config.source.url).await?;

    let pipeline_config = PipelineConfig {
        schema_pattern: config.pipeline.schema_pattern.clone(),
        sample_pct: config.pipeline.sample_pct,
        top_n_values: config.pipeline.top_n_values,
        fk_top_n_per_column: config.pipeline.fk_top_n_per_column,
        validate_fks: config.pipeline.validate_fks,
        classify_cardinality: config.pipeline.classify_cardinality,
        error_rate_abort: config.pipeline.error_rate_abort,
        resume: cli_args.resume,
        checkpoint_path: PathBuf::from(&config.pipeline.checkpoint_path),
        pk_overrides_path: PathBuf::from(&config.pipeline.pk_overrides_path),
    };

    let mut orchestrator = PipelineOrchestrator::new(store.clone(), SqlDialect::MySql, executor);
    let result = orchestrator.run(&pipeline_config).await;

    if let Err(e) = orchestrator.into_executor().disconnect().await {
        tracing::warn!("Source disconnect failed: {}", e);
    }

    let result = result?;
    tracing::info!(
        "Run {}: {} phases, {} PKs discovered, {} FK edges confirmed",
        result.run_id,
        result.phases.len(),
        result.metrics.pk_discovered,
        result.metrics.fk_confirmed
    );
    let report = store.grain_report(&config.pipeline.schema_pattern).await?;
    tracing::info!(
        "Grain coverage for {}: {}/{} assets ({:.1}%)",
        config.pipeline.schema_pattern,
        report.confirmed + report.no_natural_pk,
        report.total,
        report.coverage_pct
    );
    println!("{}", serde_json::to_string_pretty(&result)?);

    match result.status {
        RunStatus::Success => Ok(()),
        RunStatus::Partial => {
            tracing::warn!("Pipeline finished with phase errors");
            Ok(())
        }
        RunStatus::Error => {
            anyhow::bail!("pipeline aborted: {}", result.errors.join("; "))
        }
    }
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    if let Some(log_file) = &config.logging.file {
        let path = PathBuf::from(log_file);
        let dir = path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "keystone.log".to_string());
        let appender = tracing_appender::rolling::daily(dir, file_name);
        registry
            .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(appender))
            .init();
    } else {
        registry.init();
    }

    Ok(())
}
