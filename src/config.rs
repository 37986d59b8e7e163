use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub catalog: CatalogConfig,
    pub logging: LoggingConfig,
    pub pipeline: PipelineSettings,
}

/// Source database connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// MySQL-protocol connection URL.
    pub url: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { url: "mysql://root@127.0.0.1:3306".to_string() }
    }
}

/// Local catalog store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub url: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/keystone.db".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,keystone=debug".to_string(), file: None }
    }
}

/// Discovery pipeline settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Schema to analyze (batch name).
    pub schema_pattern: String,
    /// Frequency-scan sample percentage (default: 10).
    pub sample_pct: f64,
    /// Top-N values stored per column (default: 100).
    pub top_n_values: usize,
    /// Max FK candidates per source column (default: 3).
    pub fk_top_n_per_column: usize,
    /// Whether to run the FK validation phase (default: true).
    pub validate_fks: bool,
    /// Opt-in 1:1 / 1:N / N:M edge labelling (default: false).
    pub classify_cardinality: bool,
    /// Abort a batch when a phase's error rate exceeds this fraction.
    pub error_rate_abort: f64,
    /// Resume checkpoint path.
    pub checkpoint_path: String,
    /// Manual PK override file path.
    pub pk_overrides_path: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            schema_pattern: String::new(),
            sample_pct: 10.0,
            top_n_values: 100,
            fk_top_n_per_column: 3,
            validate_fks: true,
            classify_cardinality: false,
            error_rate_abort: 0.5,
            checkpoint_path: "data/pipeline_state.json".to_string(),
            pk_overrides_path: "config/primary_keys.json".to_string(),
        }
    }
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "keystone")]
#[command(version, about = "Keystone - data catalog discovery engine")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Source database URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub source_url: Option<String>,

    /// Catalog database URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub catalog_url: Option<String>,

    /// Schema to analyze (overrides config file)
    #[arg(long, value_name = "SCHEMA")]
    pub schema: Option<String>,

    /// Logging level (overrides config file, e.g. "info,keystone=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Resume from the last successful phase checkpoint
    #[arg(long)]
    pub resume: bool,

    /// Skip the FK validation phase
    #[arg(long)]
    pub skip_fk_validation: bool,

    /// Classify validated edges as 1:1 / 1:N / N:M
    #[arg(long)]
    pub classify_cardinality: bool,
}

impl Config {
    /// Load configuration with command line, environment variable, and file
    /// support.
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<(Self, CommandLineArgs), anyhow::Error> {
        let cli_args = CommandLineArgs::parse();
        let config = Self::load_with_args(&cli_args)?;
        Ok((config, cli_args))
    }

    pub fn load_with_args(cli_args: &CommandLineArgs) -> Result<Self, anyhow::Error> {
        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_SOURCE_URL: Source database URL
    /// - APP_CATALOG_URL: Catalog database URL
    /// - APP_SCHEMA_PATTERN: Schema to analyze
    /// - APP_LOG_LEVEL: Logging level (e.g. "info,keystone=debug")
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("APP_SOURCE_URL") {
            self.source.url = url;
            tracing::info!("Override source.url from env");
        }

        if let Ok(url) = std::env::var("APP_CATALOG_URL") {
            self.catalog.url = url;
            tracing::info!("Override catalog.url from env");
        }

        if let Ok(schema) = std::env::var("APP_SCHEMA_PATTERN") {
            self.pipeline.schema_pattern = schema;
            tracing::info!(
                "Override pipeline.schema_pattern from env: {}",
                self.pipeline.schema_pattern
            );
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(url) = &args.source_url {
            self.source.url = url.clone();
            tracing::info!("Override source.url from CLI");
        }

        if let Some(url) = &args.catalog_url {
            self.catalog.url = url.clone();
            tracing::info!("Override catalog.url from CLI");
        }

        if let Some(schema) = &args.schema {
            self.pipeline.schema_pattern = schema.clone();
            tracing::info!(
                "Override pipeline.schema_pattern from CLI: {}",
                self.pipeline.schema_pattern
            );
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }

        if args.skip_fk_validation {
            self.pipeline.validate_fks = false;
        }

        if args.classify_cardinality {
            self.pipeline.classify_cardinality = true;
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.source.url.is_empty() {
            anyhow::bail!("Source database URL cannot be empty");
        }

        if self.catalog.url.is_empty() {
            anyhow::bail!("Catalog database URL cannot be empty");
        }

        if self.pipeline.schema_pattern.is_empty() {
            anyhow::bail!(
                "No schema to analyze: set pipeline.schema_pattern, APP_SCHEMA_PATTERN, or --schema"
            );
        }

        if !(0.0..=1.0).contains(&self.pipeline.error_rate_abort) {
            anyhow::bail!("pipeline.error_rate_abort must be within [0, 1]");
        }

        if self.pipeline.sample_pct <= 0.0 {
            anyhow::bail!("pipeline.sample_pct must be > 0");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_except_schema() {
        let config = Config::default();
        assert_eq!(config.pipeline.sample_pct, 10.0);
        assert_eq!(config.pipeline.top_n_values, 100);
        assert!(config.pipeline.validate_fks);
        assert!(!config.pipeline.classify_cardinality);
        // The schema is the one thing an operator must provide
        assert!(config.validate().is_err());
    }

    #[test]
    fn cli_overrides_win() {
        let mut config = Config::default();
        let args = CommandLineArgs {
            schema: Some("sales".to_string()),
            skip_fk_validation: true,
            classify_cardinality: true,
            ..CommandLineArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.pipeline.schema_pattern, "sales");
        assert!(!config.pipeline.validate_fks);
        assert!(config.pipeline.classify_cardinality);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_sections_parse() {
        let toml_text = r#"
            [source]
            url = "mysql://svc@db:3306"

            [pipeline]
            schema_pattern = "dbo"
            sample_pct = 5.0
            classify_cardinality = true
        "#;
        let config: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(config.source.url, "mysql://svc@db:3306");
        assert_eq!(config.pipeline.schema_pattern, "dbo");
        assert_eq!(config.pipeline.sample_pct, 5.0);
        assert!(config.pipeline.classify_cardinality);
        // Unset fields keep defaults
        assert_eq!(config.pipeline.top_n_values, 100);
    }
}
