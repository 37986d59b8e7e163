//! Asset metadata: one record per discovered source table or view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::error::{CatalogError, CatalogResult};

/// One column of a source table, as reported by the source's metadata views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: String,
    pub ordinal: u32,
}

/// Kind of source object an asset tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Table,
    View,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Table => "table",
            AssetKind::View => "view",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "view" => AssetKind::View,
            _ => AssetKind::Table,
        }
    }
}

/// Grain (primary key) discovery status of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrainStatus {
    Confirmed,
    NoNaturalPk,
    Unknown,
    Error,
}

impl GrainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrainStatus::Confirmed => "confirmed",
            GrainStatus::NoNaturalPk => "no_natural_pk",
            GrainStatus::Unknown => "unknown",
            GrainStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "confirmed" => GrainStatus::Confirmed,
            "no_natural_pk" => GrainStatus::NoNaturalPk,
            "error" => GrainStatus::Error,
            _ => GrainStatus::Unknown,
        }
    }
}

/// Core asset metadata for a discovered table or view.
///
/// Created by seeding, enriched with column inventory and row counts, and
/// mutated by the orchestrator once PK discovery completes. `primary_key`
/// holds the business PK, `pk_minimal` the FD-minimised architectural PK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub qualified_name: String,
    pub kind: AssetKind,
    pub table_schema: String,
    pub table_name: String,
    pub columns: Vec<ColumnMeta>,
    pub row_count: Option<i64>,
    pub primary_key: Option<Vec<String>>,
    pub pk_minimal: Option<Vec<String>>,
    pub fd_removed: Option<Vec<String>>,
    pub pk_method: Option<String>,
    pub grain_status: GrainStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    /// New asset stub as produced by the seeding phase.
    pub fn stub(kind: AssetKind, table_schema: &str, table_name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            qualified_name: format!("{table_schema}.{table_name}"),
            kind,
            table_schema: table_schema.to_string(),
            table_name: table_name.to_string(),
            columns: Vec::new(),
            row_count: None,
            primary_key: None,
            pk_minimal: None,
            fd_removed: None,
            pk_method: None,
            grain_status: GrainStatus::Unknown,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Split a `schema.table` qualified name into its parts.
pub fn parse_qualified_name(qualified_name: &str) -> CatalogResult<(String, String)> {
    let mut parts = qualified_name.splitn(2, '.');
    match (parts.next(), parts.next()) {
        (Some(schema), Some(table)) if !schema.is_empty() && !table.is_empty() => {
            Ok((schema.to_string(), table.to_string()))
        }
        _ => Err(CatalogError::InvalidQualifiedName(
            qualified_name.to_string(),
        )),
    }
}

/// Outcome of grain discovery for a single asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrainResult {
    pub qualified_name: String,
    pub status: GrainStatus,
    pub primary_key: Option<Vec<String>>,
    pub pk_minimal: Option<Vec<String>>,
    pub fd_removed: Option<Vec<String>>,
    pub method: String,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl GrainResult {
    pub fn confirmed(qualified_name: &str, primary_key: Vec<String>, method: &str) -> Self {
        Self {
            qualified_name: qualified_name.to_string(),
            status: GrainStatus::Confirmed,
            primary_key: Some(primary_key),
            pk_minimal: None,
            fd_removed: None,
            method: method.to_string(),
            confidence: 1.0,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn status_only(qualified_name: &str, status: GrainStatus, method: &str) -> Self {
        Self {
            qualified_name: qualified_name.to_string(),
            status,
            primary_key: None,
            pk_minimal: None,
            fd_removed: None,
            method: method.to_string(),
            confidence: 0.0,
            metadata: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_qualified_name_splits_on_first_dot() {
        let (schema, table) = parse_qualified_name("dbo.Orders").unwrap();
        assert_eq!(schema, "dbo");
        assert_eq!(table, "Orders");
    }

    #[test]
    fn parse_qualified_name_rejects_bare_table() {
        assert!(parse_qualified_name("Orders").is_err());
        assert!(parse_qualified_name(".Orders").is_err());
        assert!(parse_qualified_name("dbo.").is_err());
    }

    #[test]
    fn grain_status_round_trips() {
        for status in [
            GrainStatus::Confirmed,
            GrainStatus::NoNaturalPk,
            GrainStatus::Unknown,
            GrainStatus::Error,
        ] {
            assert_eq!(GrainStatus::parse(status.as_str()), status);
        }
    }
}
