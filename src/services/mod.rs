pub mod cardinality_scanner;
pub mod catalog_store;
pub mod fk_discovery;
pub mod fk_patterns;
pub mod fk_validator;
pub mod grain_discovery;
pub mod pipeline_orchestrator;
pub mod pk_discovery;
pub mod sample_pool;
pub mod source_executor;
pub mod sql_dialect;

pub use cardinality_scanner::{CardinalityScanner, FrequencyScanSummary};
pub use catalog_store::{CatalogStore, GrainReport};
pub use fk_discovery::{FkCandidate, FkDiscoveryService};
pub use fk_patterns::{FkPattern, FkPatternRegistry};
pub use fk_validator::{
    FkValidationResult, ProgressiveFkValidator, StepMeasurement, Termination, VALIDATION_STEPS,
};
pub use grain_discovery::GrainDiscoveryService;
pub use pipeline_orchestrator::{
    PipelineConfig, PipelineOrchestrator, PipelineResult, RunStatus,
};
pub use pk_discovery::{DecisionEngine, ProgressiveScanner, ScanResult, ScanStatus};
pub use sample_pool::SamplePool;
pub use source_executor::{OpClass, SourceExecutor};
pub use sql_dialect::SqlDialect;
