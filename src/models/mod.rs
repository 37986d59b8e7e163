pub mod asset;
pub mod cardinality;
pub mod phase_log;
pub mod relationship;

pub use asset::{Asset, AssetKind, ColumnMeta, GrainResult, GrainStatus, parse_qualified_name};
pub use cardinality::{CardinalityRecord, ColumnVector, ValueFrequency};
pub use phase_log::{PhaseLog, PhaseStatus};
pub use relationship::Relationship;
