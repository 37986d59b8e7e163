//! FK candidate discovery over the catalogued PK map.
//!
//! Pattern matchers propose edges; candidates are deduplicated, ranked by
//! `(priority, -confidence)`, and capped per source column before they
//! reach the validator.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::models::{Asset, GrainStatus};
use crate::services::fk_patterns::{CompositePattern, FkPatternRegistry};

/// A candidate foreign-key relationship proposed by a pattern.
#[derive(Debug, Clone, Serialize)]
pub struct FkCandidate {
    /// FK-side (child) table.
    pub parent_view: String,
    pub parent_columns: Vec<String>,
    /// PK-side (referenced) table.
    pub referenced_view: String,
    pub referenced_columns: Vec<String>,
    pub pattern_name: String,
    pub priority: u8,
    pub confidence: f64,
}

impl FkCandidate {
    pub fn mappings(&self) -> Vec<(String, String)> {
        self.parent_columns
            .iter()
            .cloned()
            .zip(self.referenced_columns.iter().cloned())
            .collect()
    }

    fn dedup_key(&self) -> String {
        format!(
            "{}:{}->{}:{}",
            self.parent_view,
            self.parent_columns.join("|"),
            self.referenced_view,
            self.referenced_columns.join("|")
        )
    }
}

/// Pattern-based FK discovery (no source validation).
pub struct FkDiscoveryService {
    registry: FkPatternRegistry,
}

impl Default for FkDiscoveryService {
    fn default() -> Self {
        Self::new()
    }
}

impl FkDiscoveryService {
    pub fn new() -> Self {
        let mut registry = FkPatternRegistry::new();
        registry.register_defaults();
        Self { registry }
    }

    /// Confirmed-PK map used as the pattern target set: the FD-minimal key
    /// when one exists, the business key otherwise.
    pub fn build_pk_map(assets: &[Asset]) -> HashMap<String, Vec<String>> {
        assets
            .iter()
            .filter(|a| a.grain_status == GrainStatus::Confirmed)
            .filter_map(|a| {
                a.pk_minimal
                    .clone()
                    .or_else(|| a.primary_key.clone())
                    .map(|pk| (a.qualified_name.clone(), pk))
            })
            .collect()
    }

    /// Discover ranked, deduplicated FK candidates for one asset.
    pub fn discover_candidates(
        &self,
        asset: &Asset,
        all_assets: &[Asset],
        top_n_per_column: usize,
    ) -> Vec<FkCandidate> {
        let pk_map = Self::build_pk_map(all_assets);
        if pk_map.is_empty() {
            tracing::warn!("No assets with confirmed PKs; nothing to match against");
            return Vec::new();
        }

        let source_columns = asset.column_names();
        if source_columns.is_empty() {
            return Vec::new();
        }

        let mut candidates: Vec<FkCandidate> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for pattern in self.registry.patterns() {
            for col_name in &source_columns {
                for (target_name, pk_cols) in &pk_map {
                    if target_name == &asset.qualified_name {
                        continue;
                    }
                    for hit in pattern.match_column(
                        col_name,
                        target_name,
                        pk_cols,
                        &asset.qualified_name,
                    ) {
                        if seen.insert(hit.dedup_key()) {
                            candidates.push(hit);
                        }
                    }
                }
            }
        }

        // Composite keys are matched at the asset level
        for (target_name, pk_cols) in &pk_map {
            if target_name == &asset.qualified_name {
                continue;
            }
            for hit in CompositePattern::match_composite(
                &source_columns,
                target_name,
                pk_cols,
                &asset.qualified_name,
            ) {
                if seen.insert(hit.dedup_key()) {
                    candidates.push(hit);
                }
            }
        }

        candidates.sort_by(|a, b| {
            a.priority.cmp(&b.priority).then(
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });

        // Cap candidates per source column
        if top_n_per_column > 0 {
            let mut col_counts: HashMap<String, usize> = HashMap::new();
            candidates.retain(|c| {
                let key = c.parent_columns.join("|");
                let count = col_counts.entry(key).or_insert(0);
                *count += 1;
                *count <= top_n_per_column
            });
        }

        tracing::info!(
            "Discovered {} FK candidates for {}",
            candidates.len(),
            asset.qualified_name
        );
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Asset, AssetKind, ColumnMeta};

    fn asset_with_pk(
        schema: &str,
        table: &str,
        columns: &[&str],
        pk: Option<&[&str]>,
    ) -> Asset {
        let mut asset = Asset::stub(AssetKind::Table, schema, table);
        asset.columns = columns
            .iter()
            .enumerate()
            .map(|(i, name)| ColumnMeta {
                name: name.to_string(),
                data_type: "int".to_string(),
                ordinal: i as u32 + 1,
            })
            .collect();
        if let Some(pk) = pk {
            asset.primary_key = Some(pk.iter().map(|s| s.to_string()).collect());
            asset.grain_status = GrainStatus::Confirmed;
        }
        asset
    }

    #[test]
    fn pk_map_prefers_minimal_key_and_skips_unconfirmed() {
        let mut with_minimal = asset_with_pk(
            "dbo",
            "Orders",
            &["PostPeriod", "ExtractDTS", "OrderID"],
            Some(&["PostPeriod", "ExtractDTS", "OrderID"]),
        );
        with_minimal.pk_minimal =
            Some(vec!["PostPeriod".to_string(), "OrderID".to_string()]);
        let unconfirmed = asset_with_pk("dbo", "Staging", &["A"], None);

        let pk_map = FkDiscoveryService::build_pk_map(&[with_minimal, unconfirmed]);
        assert_eq!(pk_map.len(), 1);
        assert_eq!(
            pk_map["dbo.Orders"],
            vec!["PostPeriod".to_string(), "OrderID".to_string()]
        );
    }

    #[test]
    fn discovers_same_name_candidate_and_skips_self() {
        let customers = asset_with_pk("dbo", "Customers", &["CustomerID", "Name"], Some(&["CustomerID"]));
        let orders = asset_with_pk(
            "dbo",
            "Orders",
            &["OrderID", "CustomerID", "Amount"],
            Some(&["OrderID"]),
        );
        let all = vec![customers, orders.clone()];

        let service = FkDiscoveryService::new();
        let candidates = service.discover_candidates(&orders, &all, 3);

        assert!(
            candidates
                .iter()
                .any(|c| c.referenced_view == "dbo.Customers"
                    && c.parent_columns == vec!["CustomerID".to_string()])
        );
        // Orders.OrderID -> Orders.OrderID must not appear
        assert!(candidates.iter().all(|c| c.referenced_view != "dbo.Orders"));
    }

    #[test]
    fn candidates_rank_by_priority_then_confidence() {
        let customers = asset_with_pk("dbo", "Customers", &["CustomerID"], Some(&["CustomerID"]));
        let orders = asset_with_pk("dbo", "Orders", &["CustomerID"], Some(&["CustomerID"]));
        let all = vec![customers, orders.clone()];

        let service = FkDiscoveryService::new();
        let candidates = service.discover_candidates(&orders, &all, 10);
        for pair in candidates.windows(2) {
            assert!(
                pair[0].priority < pair[1].priority
                    || (pair[0].priority == pair[1].priority
                        && pair[0].confidence >= pair[1].confidence)
            );
        }
    }

    #[test]
    fn per_column_cap_limits_candidates() {
        // Two targets both named so CustomerID matches each
        let customers = asset_with_pk("dbo", "Customers", &["CustomerID"], Some(&["CustomerID"]));
        let archive = asset_with_pk("dbo", "CustomersArchive", &["CustomerID"], Some(&["CustomerID"]));
        let orders = asset_with_pk("dbo", "Orders", &["CustomerID"], Some(&["CustomerID"]));
        let all = vec![customers, archive, orders.clone()];

        let service = FkDiscoveryService::new();
        let unlimited = service.discover_candidates(&orders, &all, 0);
        let capped = service.discover_candidates(&orders, &all, 1);
        assert!(unlimited.len() > 1);
        assert_eq!(capped.len(), 1);
    }
}
