//! FK candidate pattern matching.
//!
//! Each pattern proposes parent -> referenced edges from naming evidence
//! alone; the progressive validator decides what survives. The registry
//! does not auto-register: call `register_defaults()` after construction.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::services::fk_discovery::FkCandidate;

fn normalize(name: &str) -> String {
    name.replace(' ', "_").to_uppercase()
}

fn entity_of(qualified_name: &str) -> String {
    qualified_name.rsplit('.').next().unwrap_or(qualified_name).to_string()
}

/// A naming pattern that can propose FK candidates for one source column.
pub trait FkPattern {
    fn name(&self) -> &'static str;

    /// Test whether `col_name` in the source looks like a reference to the
    /// target's PK columns.
    fn match_column(
        &self,
        col_name: &str,
        target_name: &str,
        pk_cols: &[String],
        source_name: &str,
    ) -> Vec<FkCandidate>;
}

/// FK column name matches a PK column name exactly (or normalized).
pub struct SameNamePattern;

impl FkPattern for SameNamePattern {
    fn name(&self) -> &'static str {
        "same_name"
    }

    fn match_column(
        &self,
        col_name: &str,
        target_name: &str,
        pk_cols: &[String],
        source_name: &str,
    ) -> Vec<FkCandidate> {
        let mut matches = Vec::new();
        let norm_col = normalize(col_name);
        for pk_col in pk_cols {
            if col_name == pk_col {
                matches.push(FkCandidate {
                    parent_view: source_name.to_string(),
                    parent_columns: vec![col_name.to_string()],
                    referenced_view: target_name.to_string(),
                    referenced_columns: vec![pk_col.clone()],
                    pattern_name: self.name().to_string(),
                    priority: 1,
                    confidence: 0.9,
                });
            } else if normalize(pk_col) == norm_col {
                matches.push(FkCandidate {
                    parent_view: source_name.to_string(),
                    parent_columns: vec![col_name.to_string()],
                    referenced_view: target_name.to_string(),
                    referenced_columns: vec![pk_col.clone()],
                    pattern_name: self.name().to_string(),
                    priority: 2,
                    confidence: 0.7,
                });
            }
        }
        matches
    }
}

/// FK column = entity name + suffix (e.g. `Customer_ID` -> `Customers`).
pub struct EntityNamePattern;

const ENTITY_SUFFIXES: [&str; 6] = ["_ID", "_KEY", "_SK", "_SID", "ID", "KEY"];

impl FkPattern for EntityNamePattern {
    fn name(&self) -> &'static str {
        "entity_name"
    }

    fn match_column(
        &self,
        col_name: &str,
        target_name: &str,
        pk_cols: &[String],
        source_name: &str,
    ) -> Vec<FkCandidate> {
        let norm_col = normalize(col_name);
        let norm_entity = normalize(&entity_of(target_name));

        for suffix in ENTITY_SUFFIXES {
            if norm_col == format!("{norm_entity}{suffix}") {
                if let Some(pk_col) = pk_cols.first() {
                    return vec![FkCandidate {
                        parent_view: source_name.to_string(),
                        parent_columns: vec![col_name.to_string()],
                        referenced_view: target_name.to_string(),
                        referenced_columns: vec![pk_col.clone()],
                        pattern_name: self.name().to_string(),
                        priority: 2,
                        confidence: 0.8,
                    }];
                }
                break;
            }
        }
        Vec::new()
    }
}

/// FK column carries a table prefix in front of the PK name
/// (e.g. `ord_ProductID` -> `ProductID`).
pub struct PrefixPattern;

impl FkPattern for PrefixPattern {
    fn name(&self) -> &'static str {
        "prefix"
    }

    fn match_column(
        &self,
        col_name: &str,
        target_name: &str,
        pk_cols: &[String],
        source_name: &str,
    ) -> Vec<FkCandidate> {
        let mut matches = Vec::new();
        let norm_col = normalize(col_name);
        for pk_col in pk_cols {
            let norm_pk = normalize(pk_col);
            if norm_col != norm_pk
                && (norm_col.ends_with(&format!("_{norm_pk}")) || norm_col.ends_with(&norm_pk))
            {
                matches.push(FkCandidate {
                    parent_view: source_name.to_string(),
                    parent_columns: vec![col_name.to_string()],
                    referenced_view: target_name.to_string(),
                    referenced_columns: vec![pk_col.clone()],
                    pattern_name: self.name().to_string(),
                    priority: 3,
                    confidence: 0.6,
                });
            }
        }
        matches
    }
}

/// FK column has a standard key suffix whose stem names the target entity
/// (e.g. `CustID` where the target is `Customers`).
pub struct SuffixPattern;

static SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.+?)_?(ID|KEY|SK|SID)$").unwrap());

impl FkPattern for SuffixPattern {
    fn name(&self) -> &'static str {
        "suffix"
    }

    fn match_column(
        &self,
        col_name: &str,
        target_name: &str,
        pk_cols: &[String],
        source_name: &str,
    ) -> Vec<FkCandidate> {
        let Some(caps) = SUFFIX_RE.captures(col_name) else {
            return Vec::new();
        };
        let stem = normalize(caps.get(1).map(|m| m.as_str()).unwrap_or(""));
        let norm_entity = normalize(&entity_of(target_name));

        if (stem == norm_entity || norm_entity.starts_with(&stem))
            && let Some(pk_col) = pk_cols.first()
        {
            return vec![FkCandidate {
                parent_view: source_name.to_string(),
                parent_columns: vec![col_name.to_string()],
                referenced_view: target_name.to_string(),
                referenced_columns: vec![pk_col.clone()],
                pattern_name: self.name().to_string(),
                priority: 3,
                confidence: 0.5,
            }];
        }
        Vec::new()
    }
}

/// Multi-column FK where every PK column of the target exists in the
/// source. Checked at the asset level, not per column.
pub struct CompositePattern;

impl CompositePattern {
    pub fn match_composite(
        source_columns: &[String],
        target_name: &str,
        pk_cols: &[String],
        source_name: &str,
    ) -> Vec<FkCandidate> {
        if pk_cols.len() < 2 {
            return Vec::new();
        }

        let norm_source: std::collections::HashMap<String, &String> =
            source_columns.iter().map(|c| (normalize(c), c)).collect();

        let mut parent_columns = Vec::new();
        let mut referenced_columns = Vec::new();
        for pk_col in pk_cols {
            match norm_source.get(&normalize(pk_col)) {
                Some(source_col) => {
                    parent_columns.push((*source_col).clone());
                    referenced_columns.push(pk_col.clone());
                }
                None => return Vec::new(),
            }
        }

        vec![FkCandidate {
            parent_view: source_name.to_string(),
            parent_columns,
            referenced_view: target_name.to_string(),
            referenced_columns,
            pattern_name: "composite".to_string(),
            priority: 1,
            confidence: 0.85,
        }]
    }
}

impl FkPattern for CompositePattern {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn match_column(&self, _: &str, _: &str, _: &[String], _: &str) -> Vec<FkCandidate> {
        Vec::new()
    }
}

/// Registry of FK patterns in evaluation order.
#[derive(Default)]
pub struct FkPatternRegistry {
    patterns: Vec<Box<dyn FkPattern + Send + Sync>>,
}

impl FkPatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, pattern: Box<dyn FkPattern + Send + Sync>) {
        self.patterns.push(pattern);
    }

    pub fn register_defaults(&mut self) {
        self.patterns = vec![
            Box::new(SameNamePattern),
            Box::new(EntityNamePattern),
            Box::new(PrefixPattern),
            Box::new(SuffixPattern),
        ];
    }

    pub fn patterns(&self) -> &[Box<dyn FkPattern + Send + Sync>] {
        &self.patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn same_name_exact_outranks_normalized() {
        let exact = SameNamePattern.match_column(
            "CustomerID",
            "dbo.Customers",
            &strs(&["CustomerID"]),
            "dbo.Orders",
        );
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].priority, 1);

        let normalized = SameNamePattern.match_column(
            "customer id",
            "dbo.Customers",
            &strs(&["CUSTOMER_ID"]),
            "dbo.Orders",
        );
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].priority, 2);
    }

    #[test]
    fn entity_name_matches_table_plus_suffix() {
        let hits = EntityNamePattern.match_column(
            "Customer_ID",
            "dbo.Customer",
            &strs(&["CustID"]),
            "dbo.Orders",
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].referenced_columns, strs(&["CustID"]));

        let misses = EntityNamePattern.match_column(
            "Supplier_ID",
            "dbo.Customer",
            &strs(&["CustID"]),
            "dbo.Orders",
        );
        assert!(misses.is_empty());
    }

    #[test]
    fn composite_requires_every_pk_column() {
        let full = CompositePattern::match_composite(
            &strs(&["OrderID", "LineNo", "Qty"]),
            "dbo.OrderLines",
            &strs(&["OrderID", "LineNo"]),
            "dbo.Shipments",
        );
        assert_eq!(full.len(), 1);
        assert_eq!(full[0].parent_columns, strs(&["OrderID", "LineNo"]));

        let partial = CompositePattern::match_composite(
            &strs(&["OrderID", "Qty"]),
            "dbo.OrderLines",
            &strs(&["OrderID", "LineNo"]),
            "dbo.Shipments",
        );
        assert!(partial.is_empty());

        // Single-column PKs are the per-column patterns' job
        let single = CompositePattern::match_composite(
            &strs(&["OrderID"]),
            "dbo.Orders",
            &strs(&["OrderID"]),
            "dbo.Shipments",
        );
        assert!(single.is_empty());
    }

    #[test]
    fn registry_requires_explicit_default_registration() {
        let registry = FkPatternRegistry::new();
        assert!(registry.patterns().is_empty());

        let mut registry = FkPatternRegistry::new();
        registry.register_defaults();
        assert_eq!(registry.patterns().len(), 4);
    }
}
