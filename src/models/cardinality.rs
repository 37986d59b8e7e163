//! Column cardinality and value-frequency records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Distinct-value count of one column at one sample level.
///
/// Selectivity is a noisy estimator: monotonicity across sample levels is
/// not assumed anywhere downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardinalityRecord {
    pub id: String,
    pub qualified_name: String,
    pub column_name: String,
    pub sample_pct: f64,
    pub distinct_count: i64,
    pub total_rows: i64,
    /// `distinct_count / total_rows`, 0.0 when the sample was empty.
    pub selectivity: f64,
    pub discovered_at: DateTime<Utc>,
}

impl CardinalityRecord {
    pub fn new(
        qualified_name: &str,
        column_name: &str,
        sample_pct: f64,
        distinct_count: i64,
        total_rows: i64,
    ) -> Self {
        let selectivity = if total_rows > 0 {
            distinct_count as f64 / total_rows as f64
        } else {
            0.0
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            qualified_name: qualified_name.to_string(),
            column_name: column_name.to_string(),
            sample_pct,
            distinct_count,
            total_rows,
            selectivity,
            discovered_at: Utc::now(),
        }
    }
}

/// One top-N value of a column with its observed frequency.
///
/// A sentinel row with `rank = 0` and `frequency = 0` marks a column that
/// yielded no values at all (all NULL, or empty sample).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueFrequency {
    pub id: String,
    pub qualified_name: String,
    pub column_name: String,
    pub rank: i64,
    pub value: Option<String>,
    pub frequency: i64,
    pub relative_frequency: Option<f64>,
    pub sample_pct: f64,
    pub discovered_at: DateTime<Utc>,
}

impl ValueFrequency {
    pub fn new(
        qualified_name: &str,
        column_name: &str,
        rank: i64,
        value: Option<String>,
        frequency: i64,
        sample_rows: i64,
        sample_pct: f64,
    ) -> Self {
        let relative_frequency = if sample_rows > 0 {
            Some(frequency as f64 / sample_rows as f64)
        } else {
            None
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            qualified_name: qualified_name.to_string(),
            column_name: column_name.to_string(),
            rank,
            value,
            frequency,
            relative_frequency,
            sample_pct,
            discovered_at: Utc::now(),
        }
    }

    /// Sentinel record for a column with no values.
    pub fn sentinel(qualified_name: &str, column_name: &str, sample_pct: f64) -> Self {
        Self::new(qualified_name, column_name, 0, None, 0, 0, sample_pct)
    }
}

/// Centroid vector over a column's value distribution.
///
/// Written and read by the external embedding collaborator; the core only
/// persists it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnVector {
    pub id: String,
    pub qualified_name: String,
    pub column_name: String,
    pub vector_type: String,
    pub vector: Vec<f32>,
    pub num_values: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectivity_handles_empty_sample() {
        let rec = CardinalityRecord::new("dbo.Orders", "OrderID", 1.0, 0, 0);
        assert_eq!(rec.selectivity, 0.0);

        let rec = CardinalityRecord::new("dbo.Orders", "OrderID", 1.0, 50, 50);
        assert_eq!(rec.selectivity, 1.0);
    }

    #[test]
    fn sentinel_has_rank_zero_and_no_relative_frequency() {
        let s = ValueFrequency::sentinel("dbo.Orders", "Status", 10.0);
        assert_eq!(s.rank, 0);
        assert_eq!(s.frequency, 0);
        assert!(s.value.is_none());
        assert!(s.relative_frequency.is_none());
    }
}
