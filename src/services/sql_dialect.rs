//! Source-database SQL generation.
//!
//! Every service that queries the source delegates SQL string construction
//! to a [`SqlDialect`]; no caller concatenates raw names into SQL. The one
//! concrete variant targets MySQL-protocol sources; adding an engine means
//! adding a variant and covering each query shape.
//!
//! Identifier validation is mandatory: schema, table, and column names must
//! match the safe-identifier pattern (letters, digits, underscores, spaces,
//! parentheses) or the operation fails with
//! [`CatalogError::UnsafeIdentifier`] before any SQL is built.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::utils::error::{CatalogError, CatalogResult};

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_ ()]+$").expect("identifier pattern"));

/// Validate a single SQL identifier (schema, table, or column name).
pub fn validate_identifier(name: &str) -> CatalogResult<&str> {
    if name.is_empty() || !IDENTIFIER_RE.is_match(name) {
        return Err(CatalogError::UnsafeIdentifier(name.to_string()));
    }
    Ok(name)
}

/// Validate and backtick-quote an identifier.
fn quote(name: &str) -> CatalogResult<String> {
    validate_identifier(name)?;
    Ok(format!("`{name}`"))
}

/// Validate and quote a `schema`.`table` pair.
fn quote_qualified(schema: &str, table: &str) -> CatalogResult<String> {
    Ok(format!("{}.{}", quote(schema)?, quote(table)?))
}

/// Hash modulus for a sampling percentage: 1-in-N row selection.
///
/// Rounded rather than truncated so 0.1% yields 1000 instead of the 999
/// that falls out of binary floating point.
fn sample_modulo(pct: f64) -> u64 {
    (100.0 / pct).round().max(1.0) as u64
}

/// SQL dialect for the source database.
///
/// One variant today; kept as a sum type so new engines slot in without a
/// trait-object layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlDialect {
    #[default]
    MySql,
}

impl SqlDialect {
    // ------------------------------------------------------------------
    // Row counting / metadata
    // ------------------------------------------------------------------

    /// Query yielding a single integer row count.
    pub fn row_count(&self, schema: &str, table: &str) -> CatalogResult<String> {
        let source = quote_qualified(schema, table)?;
        Ok(format!("SELECT COUNT(*) AS row_count FROM {source}"))
    }

    /// Query yielding `(column_name, data_type, ordinal_position)` rows in
    /// ordinal order.
    pub fn column_metadata(&self, schema: &str, table: &str) -> CatalogResult<String> {
        validate_identifier(schema)?;
        validate_identifier(table)?;
        Ok(format!(
            "SELECT COLUMN_NAME, DATA_TYPE, ORDINAL_POSITION \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = '{schema}' AND TABLE_NAME = '{table}' \
             ORDER BY ORDINAL_POSITION"
        ))
    }

    /// Query yielding `(table_name, table_type)` for every base table and
    /// view in a schema, name order. Used by the seeding phase.
    pub fn table_inventory(&self, schema: &str) -> CatalogResult<String> {
        validate_identifier(schema)?;
        Ok(format!(
            "SELECT TABLE_NAME, TABLE_TYPE \
             FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = '{schema}' \
               AND TABLE_TYPE IN ('BASE TABLE', 'VIEW') \
             ORDER BY TABLE_NAME"
        ))
    }

    // ------------------------------------------------------------------
    // Sample table management
    // ------------------------------------------------------------------

    /// CREATE statement for a deterministic sampled temp table.
    ///
    /// `pct >= 100` copies the table. Otherwise rows are selected where
    /// `CRC32(seed_col) % (100 / pct) = 0`; CRC32 is stable across calls
    /// and across runs against the same server, which is what makes
    /// resumed runs reproduce the same samples.
    pub fn create_sample(
        &self,
        temp_name: &str,
        schema: &str,
        table: &str,
        seed_col: &str,
        pct: f64,
    ) -> CatalogResult<String> {
        let temp = quote(temp_name)?;
        let source = quote_qualified(schema, table)?;

        if pct >= 100.0 {
            Ok(format!(
                "CREATE TEMPORARY TABLE {temp} AS SELECT * FROM {source}"
            ))
        } else {
            let seed = quote(seed_col)?;
            let modulo = sample_modulo(pct);
            Ok(format!(
                "CREATE TEMPORARY TABLE {temp} AS \
                 SELECT * FROM {source} \
                 WHERE CRC32({seed}) % {modulo} = 0"
            ))
        }
    }

    /// Conditional drop of a temp table.
    pub fn drop_sample(&self, temp_name: &str) -> CatalogResult<String> {
        let temp = quote(temp_name)?;
        Ok(format!("DROP TEMPORARY TABLE IF EXISTS {temp}"))
    }

    // ------------------------------------------------------------------
    // Cardinality / PK discovery
    // ------------------------------------------------------------------

    /// Single-row distinct-count query: `_row_count` plus `card_i` per
    /// single column and `comp_j` per composite.
    ///
    /// Composite distinctness concatenates values with the unit separator
    /// `CHAR(31)` (absent from catalogued data) and a `CHAR(0)` sentinel
    /// for NULLs so `(1, NULL)` and `(1, '')` count apart.
    pub fn count_distinct(
        &self,
        source: &str,
        columns: &[String],
        composites: &[Vec<String>],
    ) -> CatalogResult<String> {
        let mut exprs = vec!["COUNT(*) AS _row_count".to_string()];

        for (i, col) in columns.iter().enumerate() {
            let col = quote(col)?;
            exprs.push(format!("COUNT(DISTINCT {col}) AS card_{i}"));
        }

        for (j, comp) in composites.iter().enumerate() {
            let concat = comp
                .iter()
                .map(|c| {
                    let c = quote(c)?;
                    Ok(format!("IFNULL(CAST({c} AS CHAR), CHAR(0))"))
                })
                .collect::<CatalogResult<Vec<_>>>()?
                .join(", ");
            exprs.push(format!(
                "COUNT(DISTINCT CONCAT_WS(CHAR(31), {concat})) AS comp_{j}"
            ));
        }

        Ok(format!("SELECT {} FROM {source}", exprs.join(", ")))
    }

    /// Approximate distinct counts per column over the first `top_n` rows,
    /// used to pick a high-cardinality seed column.
    pub fn seed_column(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        top_n: u64,
    ) -> CatalogResult<String> {
        let source = quote_qualified(schema, table)?;
        let exprs = columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let col = quote(col)?;
                Ok(format!("COUNT(DISTINCT {col}) AS sel_{i}"))
            })
            .collect::<CatalogResult<Vec<_>>>()?
            .join(", ");
        Ok(format!(
            "SELECT {exprs} FROM (SELECT * FROM {source} LIMIT {top_n}) AS _sample"
        ))
    }

    // ------------------------------------------------------------------
    // Value frequency scanning
    // ------------------------------------------------------------------

    /// Top-N value/frequency pairs for a single column, frequency-descending.
    pub fn frequency(&self, source: &str, column: &str, top_n: u64) -> CatalogResult<String> {
        let col = quote(column)?;
        Ok(format!(
            "SELECT {col} AS val, COUNT(*) AS freq \
             FROM {source} \
             GROUP BY {col} \
             ORDER BY freq DESC \
             LIMIT {top_n}"
        ))
    }

    /// Batched top-N frequencies over many columns in one statement.
    ///
    /// MySQL has no UNPIVOT keyword; the shape is a UNION ALL unpivot plus
    /// `ROW_NUMBER()` ranking. Yields `(col_name, col_value, freq)` rows.
    pub fn unpivot_frequency(
        &self,
        source: &str,
        columns: &[String],
        top_n: u64,
    ) -> CatalogResult<String> {
        let arms = columns
            .iter()
            .map(|col| {
                let quoted = quote(col)?;
                Ok(format!(
                    "SELECT '{col}' AS col_name, CAST({quoted} AS CHAR) AS col_value FROM {source}"
                ))
            })
            .collect::<CatalogResult<Vec<_>>>()?
            .join(" UNION ALL ");

        Ok(format!(
            "SELECT col_name, col_value, freq FROM (\
               SELECT col_name, col_value, COUNT(*) AS freq, \
                      ROW_NUMBER() OVER (PARTITION BY col_name ORDER BY COUNT(*) DESC) AS rn \
               FROM ({arms}) AS raw_vals \
               WHERE col_value IS NOT NULL \
               GROUP BY col_name, col_value\
             ) AS ranked WHERE rn <= {top_n}"
        ))
    }

    // ------------------------------------------------------------------
    // FK validation
    // ------------------------------------------------------------------

    /// Full-outer-join integrity query, emulated as LEFT JOIN plus an
    /// anti-joined referenced side. Returns one row with three integers:
    /// `(match_count, orphan_count, pk_only_count)`.
    pub fn fk_validate(
        &self,
        fk_table: &str,
        pk_table: &str,
        column_mappings: &[(String, String)],
        sample_pct: f64,
        seed_col: Option<&str>,
    ) -> CatalogResult<String> {
        for (fk_col, pk_col) in column_mappings {
            validate_identifier(fk_col)?;
            validate_identifier(pk_col)?;
        }

        let join_cond = column_mappings
            .iter()
            .map(|(f, p)| format!("fk.`{f}` = pk.`{p}`"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let fk_not_null = column_mappings
            .iter()
            .map(|(f, _)| format!("fk.`{f}` IS NOT NULL"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let pk_not_null = column_mappings
            .iter()
            .map(|(_, p)| format!("pk.`{p}` IS NOT NULL"))
            .collect::<Vec<_>>()
            .join(" AND ");

        // Optional deterministic sampling on the FK (parent) side
        let fk_where = match seed_col {
            Some(seed) if sample_pct < 100.0 => {
                let seed = quote(seed)?;
                let modulo = sample_modulo(sample_pct);
                format!(" WHERE CRC32({seed}) % {modulo} = 0")
            }
            _ => String::new(),
        };

        Ok(format!(
            "SELECT \
               SUM(fk_present AND pk_present) AS match_count, \
               SUM(fk_present AND NOT pk_present) AS orphan_count, \
               SUM(NOT fk_present AND pk_present) AS pk_only_count \
             FROM (\
               SELECT ({fk_not_null}) AS fk_present, ({pk_not_null}) AS pk_present \
               FROM (SELECT * FROM {fk_table}{fk_where}) AS fk \
               LEFT JOIN {pk_table} AS pk ON {join_cond} \
               UNION ALL \
               SELECT FALSE AS fk_present, ({pk_not_null}) AS pk_present \
               FROM {pk_table} AS pk \
               WHERE NOT EXISTS (\
                 SELECT 1 FROM (SELECT * FROM {fk_table}{fk_where}) AS fk WHERE {join_cond}\
               )\
             ) AS pairs"
        ))
    }

    /// Distinct key projection materialised with an index on the first
    /// column, for repeated FK joins against the same referenced table.
    pub fn create_hash_temp(
        &self,
        temp_name: &str,
        schema: &str,
        table: &str,
        columns: &[String],
    ) -> CatalogResult<String> {
        let temp = quote(temp_name)?;
        let source = quote_qualified(schema, table)?;
        let Some(first_col) = columns.first() else {
            return Err(CatalogError::UnsafeIdentifier("(empty column list)".to_string()));
        };
        let col_list = columns
            .iter()
            .map(|c| quote(c))
            .collect::<CatalogResult<Vec<_>>>()?
            .join(", ");
        let index_col = quote(first_col)?;
        Ok(format!(
            "CREATE TEMPORARY TABLE {temp} (INDEX ({index_col})) AS \
             SELECT DISTINCT {col_list} FROM {source}"
        ))
    }

    // ------------------------------------------------------------------
    // Varying-column chase / FD minimisation
    // ------------------------------------------------------------------

    /// Fetch every row belonging to the `max_groups` largest duplicate
    /// groups of a candidate key. NULL-safe on the group key (`<=>`).
    pub fn top_duplicate_groups(
        &self,
        source: &str,
        columns: &[String],
        max_groups: u64,
    ) -> CatalogResult<String> {
        let col_list = columns
            .iter()
            .map(|c| quote(c))
            .collect::<CatalogResult<Vec<_>>>()?
            .join(", ");
        let join_cond = columns
            .iter()
            .map(|c| Ok(format!("s.{q} <=> dk.{q}", q = quote(c)?)))
            .collect::<CatalogResult<Vec<_>>>()?
            .join(" AND ");
        Ok(format!(
            "SELECT s.* FROM {source} s \
             INNER JOIN (\
               SELECT {col_list} FROM {source} \
               GROUP BY {col_list} \
               HAVING COUNT(*) > 1 \
               ORDER BY COUNT(*) DESC \
               LIMIT {max_groups}\
             ) dk ON {join_cond}"
        ))
    }

    /// Functional-dependency probe: the maximum number of distinct `column`
    /// values within any group of the remaining key columns. A result of 1
    /// means `column` is determined by the rest.
    pub fn fd_check(
        &self,
        source: &str,
        column: &str,
        group_cols: &[String],
    ) -> CatalogResult<String> {
        let col = quote(column)?;
        let group_list = group_cols
            .iter()
            .map(|c| quote(c))
            .collect::<CatalogResult<Vec<_>>>()?
            .join(", ");
        Ok(format!(
            "SELECT MAX(cnt) AS max_cnt FROM (\
               SELECT COUNT(DISTINCT {col}) AS cnt \
               FROM {source} \
               GROUP BY {group_list}\
             ) AS fd_check"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identifier_validation_accepts_safe_names() {
        for name in ["OrderID", "Order Line (v2)", "tbl_2024", "a"] {
            assert!(validate_identifier(name).is_ok(), "rejected {name}");
        }
    }

    #[test]
    fn identifier_validation_rejects_injection() {
        for name in [
            "",
            "Orders; DROP TABLE x",
            "a`b",
            "col'--",
            "x.y",
            "a\nb",
        ] {
            let err = validate_identifier(name).unwrap_err();
            assert!(matches!(err, CatalogError::UnsafeIdentifier(_)), "accepted {name:?}");
        }
    }

    #[test]
    fn every_dialect_operation_rejects_unsafe_identifiers() {
        let d = SqlDialect::MySql;
        let bad = "x; DROP TABLE y";

        assert!(d.row_count(bad, "t").is_err());
        assert!(d.column_metadata("s", bad).is_err());
        assert!(d.table_inventory(bad).is_err());
        assert!(d.create_sample("tmp", "s", "t", bad, 1.0).is_err());
        assert!(d.drop_sample(bad).is_err());
        assert!(d.count_distinct("src", &cols(&[bad]), &[]).is_err());
        assert!(d.count_distinct("src", &[], &[cols(&["a", bad])]).is_err());
        assert!(d.seed_column("s", "t", &cols(&[bad]), 10).is_err());
        assert!(d.frequency("src", bad, 100).is_err());
        assert!(d.unpivot_frequency("src", &cols(&[bad]), 100).is_err());
        assert!(
            d.fk_validate("f", "p", &[(bad.to_string(), "id".to_string())], 100.0, None)
                .is_err()
        );
        assert!(d.create_hash_temp("tmp", "s", "t", &cols(&[bad])).is_err());
        assert!(d.top_duplicate_groups("src", &cols(&[bad]), 20).is_err());
        assert!(d.fd_check("src", bad, &cols(&["a"])).is_err());
    }

    #[test]
    fn create_sample_full_copy_at_100_pct() {
        let d = SqlDialect::MySql;
        let sql = d.create_sample("pool_100_1", "dbo", "Orders", "OrderID", 100.0).unwrap();
        assert!(sql.contains("SELECT * FROM `dbo`.`Orders`"));
        assert!(!sql.contains("CRC32"));
    }

    #[test]
    fn create_sample_uses_hash_modulo_below_100_pct() {
        let d = SqlDialect::MySql;
        let sql = d.create_sample("pool_1_1", "dbo", "Orders", "OrderID", 1.0).unwrap();
        assert!(sql.contains("CRC32(`OrderID`) % 100 = 0"));

        let sql = d.create_sample("pool_0x3_1", "dbo", "Orders", "OrderID", 0.3).unwrap();
        // floor(100 / 0.3) = 333
        assert!(sql.contains("% 333 = 0"));
    }

    #[test]
    fn count_distinct_aliases_and_row_count() {
        let d = SqlDialect::MySql;
        let sql = d
            .count_distinct(
                "`tmp`",
                &cols(&["OrderID", "LineNo"]),
                &[cols(&["OrderID", "LineNo"])],
            )
            .unwrap();
        assert!(sql.contains("COUNT(*) AS _row_count"));
        assert!(sql.contains("COUNT(DISTINCT `OrderID`) AS card_0"));
        assert!(sql.contains("COUNT(DISTINCT `LineNo`) AS card_1"));
        assert!(sql.contains("CONCAT_WS(CHAR(31)"));
        assert!(sql.contains("AS comp_0"));
        assert!(sql.contains("IFNULL(CAST(`OrderID` AS CHAR), CHAR(0))"));
    }

    #[test]
    fn fk_validate_counts_and_sampling() {
        let d = SqlDialect::MySql;
        let mappings = vec![("CustomerID".to_string(), "CustomerID".to_string())];
        let sql = d
            .fk_validate("`dbo`.`Orders`", "`dbo`.`Customers`", &mappings, 0.1, Some("CustomerID"))
            .unwrap();
        assert!(sql.contains("AS match_count"));
        assert!(sql.contains("AS orphan_count"));
        assert!(sql.contains("AS pk_only_count"));
        assert!(sql.contains("CRC32(`CustomerID`) % 1000 = 0"));
        assert!(sql.contains("LEFT JOIN `dbo`.`Customers` AS pk"));
        assert!(sql.contains("NOT EXISTS"));

        // No sampling clause at 100%
        let sql = d
            .fk_validate("`dbo`.`Orders`", "`dbo`.`Customers`", &mappings, 100.0, Some("CustomerID"))
            .unwrap();
        assert!(!sql.contains("CRC32"));
    }

    #[test]
    fn hash_temp_projects_distinct_keys_with_index() {
        let d = SqlDialect::MySql;
        let sql = d
            .create_hash_temp("fk_keys", "dbo", "Customers", &cols(&["CustomerID", "Region"]))
            .unwrap();
        assert!(sql.contains("CREATE TEMPORARY TABLE `fk_keys`"));
        assert!(sql.contains("INDEX (`CustomerID`)"));
        assert!(sql.contains("SELECT DISTINCT `CustomerID`, `Region` FROM `dbo`.`Customers`"));
    }

    #[test]
    fn top_duplicate_groups_is_null_safe() {
        let d = SqlDialect::MySql;
        let sql = d
            .top_duplicate_groups("`tmp`", &cols(&["PostPeriod", "ExtractDTS"]), 20)
            .unwrap();
        assert!(sql.contains("HAVING COUNT(*) > 1"));
        assert!(sql.contains("LIMIT 20"));
        assert!(sql.contains("s.`PostPeriod` <=> dk.`PostPeriod`"));
    }

    #[test]
    fn fd_check_groups_by_remaining_columns() {
        let d = SqlDialect::MySql;
        let sql = d
            .fd_check("`tmp`", "ExtractDTS", &cols(&["PostPeriod", "OrderID"]))
            .unwrap();
        assert!(sql.contains("COUNT(DISTINCT `ExtractDTS`)"));
        assert!(sql.contains("GROUP BY `PostPeriod`, `OrderID`"));
        assert!(sql.contains("MAX(cnt)"));
    }

    #[test]
    fn unpivot_frequency_unions_each_column() {
        let d = SqlDialect::MySql;
        let sql = d.unpivot_frequency("`tmp`", &cols(&["Status", "Region"]), 100).unwrap();
        assert!(sql.contains("'Status' AS col_name"));
        assert!(sql.contains("'Region' AS col_name"));
        assert!(sql.contains("UNION ALL"));
        assert!(sql.contains("ROW_NUMBER() OVER (PARTITION BY col_name"));
        assert!(sql.contains("rn <= 100"));
    }
}
