//! Validated foreign-key relationships between assets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A validated (or measured-but-rejected) parent -> referenced edge.
///
/// At most one row exists per (parent, referenced, ordered column mapping);
/// re-validation updates the existing row in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub parent_asset: String,
    pub referenced_asset: String,
    /// Ordered `(parent_col, referenced_col)` pairs.
    pub column_mappings: Vec<(String, String)>,
    /// `1:1`, `1:N`, `N:M`, or `None` when classification was not requested.
    pub cardinality: Option<String>,
    pub pattern_name: String,
    pub confidence: f64,
    pub match_pct: f64,
    pub orphan_pct: f64,
    /// Parent-side sample percentage the validator reached.
    pub sample_pct: f64,
    pub validated: bool,
    pub discovered_at: DateTime<Utc>,
    pub last_validated_at: Option<DateTime<Utc>>,
}

impl Relationship {
    /// Stable dedup key over the ordered column mapping.
    pub fn mapping_key(mappings: &[(String, String)]) -> String {
        mappings
            .iter()
            .map(|(p, r)| format!("{p}->{r}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_key_is_order_sensitive() {
        let a = vec![
            ("OrderID".to_string(), "ID".to_string()),
            ("LineNo".to_string(), "Line".to_string()),
        ];
        let b = vec![
            ("LineNo".to_string(), "Line".to_string()),
            ("OrderID".to_string(), "ID".to_string()),
        ];
        assert_ne!(Relationship::mapping_key(&a), Relationship::mapping_key(&b));
        assert_eq!(Relationship::mapping_key(&a), "OrderID->ID,LineNo->Line");
    }
}
