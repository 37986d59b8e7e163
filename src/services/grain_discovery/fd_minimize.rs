//! Functional-dependency minimisation of composite primary keys.
//!
//! A column `c` of key `K` is FD-redundant when every grouping of the
//! sample by `K \ {c}` holds exactly one distinct `c` value. Such columns
//! add width without adding grain; they are removed and recorded so the
//! business key and the architectural key can both be persisted.

use crate::services::source_executor::{OpClass, SourceExecutor, value_as_i64};
use crate::services::sql_dialect::SqlDialect;
use crate::utils::error::CatalogResult;

/// One pass over the columns of the original key. Returns
/// `(minimal_key, removed_columns)`; the input key comes back untouched
/// when nothing is redundant or the key is a single column.
pub async fn fd_minimize(
    exec: &mut SourceExecutor,
    dialect: SqlDialect,
    source: &str,
    pk_columns: &[String],
) -> CatalogResult<(Vec<String>, Vec<String>)> {
    if pk_columns.len() <= 1 {
        return Ok((pk_columns.to_vec(), Vec::new()));
    }

    let mut remaining: Vec<String> = pk_columns.to_vec();
    let mut removed: Vec<String> = Vec::new();

    for col in pk_columns {
        let others: Vec<String> =
            remaining.iter().filter(|c| *c != col).cloned().collect();
        if others.is_empty() {
            continue;
        }

        let sql = dialect.fd_check(source, col, &others)?;
        let max_cnt = match exec.query_one(&sql, OpClass::Cardinality).await {
            Ok(Some(row)) => row.as_ref(0).map(value_as_i64).unwrap_or(0),
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("FD check failed for {}: {}", col, e);
                continue;
            }
        };

        if max_cnt == 1 {
            tracing::info!("FD: {} is redundant (determined by {})", col, others.join(" + "));
            remaining.retain(|c| c != col);
            removed.push(col.clone());
        }
    }

    Ok((remaining, removed))
}
