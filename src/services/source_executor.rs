//! Thin wrapper around the source-database connection.
//!
//! All source I/O in one orchestrator run goes through a single
//! [`SourceExecutor`], serially. The executor owns the per-operation-class
//! soft timeouts (`SET SESSION max_execution_time`), restores the prior
//! timeout on every exit path, drains result sets fully, and retries
//! transient connection/timeout errors with exponential backoff. Code-level
//! errors propagate unchanged.

use std::time::Duration;

use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Error as SourceError, Opts, Pool, Row, Value};

use crate::utils::error::CatalogResult;

/// Operation classes with their soft timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    SampleCreate,
    RowCount,
    Cardinality,
    Frequency,
    FkValidate,
}

impl OpClass {
    pub fn timeout_secs(self) -> u64 {
        match self {
            OpClass::SampleCreate => 600,
            OpClass::RowCount => 300,
            OpClass::Cardinality => 600,
            OpClass::Frequency => 300,
            OpClass::FkValidate => 600,
        }
    }
}

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_SECS: f64 = 1.0;
const RETRY_BACKOFF_FACTOR: f64 = 5.0;

/// SQLSTATE prefixes considered transient:
/// `08` = connection exception, `HYT` = timeout expired.
const RETRYABLE_SQLSTATE_PREFIXES: [&str; 2] = ["08", "HYT"];

fn is_retryable_error(error: &SourceError) -> bool {
    match error {
        SourceError::Io(_) => true,
        SourceError::Server(server) => RETRYABLE_SQLSTATE_PREFIXES
            .iter()
            .any(|prefix| server.state.starts_with(prefix)),
        _ => false,
    }
}

/// Serial executor over one source connection.
pub struct SourceExecutor {
    conn: Conn,
    pool: Pool,
    /// Session default for `max_execution_time`, restored after each query.
    default_timeout_ms: u64,
}

impl SourceExecutor {
    /// Connect and capture the session's default statement timeout.
    pub async fn connect(url: &str) -> CatalogResult<Self> {
        let opts = Opts::from_url(url).map_err(SourceError::from)?;
        let pool = Pool::new(opts);
        let mut conn = pool.get_conn().await?;

        let default_timeout_ms: u64 = conn
            .query_first("SELECT @@SESSION.max_execution_time")
            .await?
            .unwrap_or(0);

        Ok(Self { conn, pool, default_timeout_ms })
    }

    /// Close the connection and the underlying pool.
    pub async fn disconnect(self) -> CatalogResult<()> {
        drop(self.conn);
        self.pool.disconnect().await?;
        Ok(())
    }

    /// Execute a query under an operation-class timeout and drain all rows.
    pub async fn query_rows(&mut self, sql: &str, class: OpClass) -> CatalogResult<Vec<Row>> {
        self.query_rows_with_timeout(sql, class.timeout_secs()).await
    }

    /// Execute a query under an explicit soft timeout and drain all rows.
    ///
    /// The previous session timeout is restored even when the query fails.
    pub async fn query_rows_with_timeout(
        &mut self,
        sql: &str,
        timeout_secs: u64,
    ) -> CatalogResult<Vec<Row>> {
        self.set_timeout_ms(timeout_secs * 1000).await?;
        let result = self.run_with_retry(sql).await;
        self.restore_timeout().await;
        Ok(result?)
    }

    /// Execute a statement (DDL or otherwise) that yields no rows.
    pub async fn execute(&mut self, sql: &str, class: OpClass) -> CatalogResult<()> {
        self.query_rows(sql, class).await?;
        Ok(())
    }

    /// Single-row convenience: the first row of the result, if any.
    pub async fn query_one(&mut self, sql: &str, class: OpClass) -> CatalogResult<Option<Row>> {
        let mut rows = self.query_rows(sql, class).await?;
        if rows.is_empty() { Ok(None) } else { Ok(Some(rows.swap_remove(0))) }
    }

    async fn run_with_retry(&mut self, sql: &str) -> Result<Vec<Row>, SourceError> {
        let mut attempt: u32 = 0;
        loop {
            match self.conn.query(sql).await {
                Ok(rows) => return Ok(rows),
                Err(e) if attempt < MAX_RETRIES && is_retryable_error(&e) => {
                    let delay =
                        RETRY_BASE_DELAY_SECS * RETRY_BACKOFF_FACTOR.powi(attempt as i32);
                    tracing::warn!(
                        "Transient source error on attempt {}/{}: {}. Retrying in {:.1}s",
                        attempt + 1,
                        MAX_RETRIES + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn set_timeout_ms(&mut self, ms: u64) -> CatalogResult<()> {
        self.conn
            .query_drop(format!("SET SESSION max_execution_time = {ms}"))
            .await?;
        Ok(())
    }

    async fn restore_timeout(&mut self) {
        let ms = self.default_timeout_ms;
        if let Err(e) = self
            .conn
            .query_drop(format!("SET SESSION max_execution_time = {ms}"))
            .await
        {
            tracing::warn!("Failed to restore session timeout: {}", e);
        }
    }
}

// ----------------------------------------------------------------------
// Row value helpers
// ----------------------------------------------------------------------

/// Convert a source value to text; NULL becomes `None`.
pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        Value::Int(i) => Some(i.to_string()),
        Value::UInt(u) => Some(u.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Double(d) => Some(d.to_string()),
        Value::Date(year, month, day, hour, minute, second, _micro) => Some(format!(
            "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
        )),
        Value::Time(_neg, days, hours, minutes, seconds, _micro) => {
            let total_hours = days * 24 + u32::from(*hours);
            Some(format!("{total_hours}:{minutes:02}:{seconds:02}"))
        }
    }
}

/// Convert a source value to an integer count; NULL becomes 0.
pub fn value_as_i64(value: &Value) -> i64 {
    match value {
        Value::Int(i) => *i,
        Value::UInt(u) => *u as i64,
        Value::Double(d) => *d as i64,
        Value::Float(f) => *f as i64,
        Value::Bytes(bytes) => String::from_utf8_lossy(bytes).parse().unwrap_or(0),
        _ => 0,
    }
}

/// Column names of a result row, in result order.
pub fn column_names(row: &Row) -> Vec<String> {
    row.columns_ref()
        .iter()
        .map(|c| c.name_str().to_string())
        .collect()
}

/// `(column_name, integer_value)` pairs of a single-row count result.
pub fn named_counts(row: &Row) -> Vec<(String, i64)> {
    let names = column_names(row);
    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let value = row.as_ref(i).map(value_as_i64).unwrap_or(0);
            (name, value)
        })
        .collect()
}

/// All values of a row as optional text.
pub fn row_values(row: &Row) -> Vec<Option<String>> {
    (0..row.len())
        .map(|i| row.as_ref(i).and_then(value_as_string))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_class_timeouts_cover_all_classes() {
        assert_eq!(OpClass::SampleCreate.timeout_secs(), 600);
        assert_eq!(OpClass::RowCount.timeout_secs(), 300);
        assert_eq!(OpClass::Cardinality.timeout_secs(), 600);
        assert_eq!(OpClass::Frequency.timeout_secs(), 300);
        assert_eq!(OpClass::FkValidate.timeout_secs(), 600);
    }

    #[test]
    fn value_conversion_handles_null_and_numbers() {
        assert_eq!(value_as_string(&Value::NULL), None);
        assert_eq!(value_as_string(&Value::Int(42)), Some("42".to_string()));
        assert_eq!(
            value_as_string(&Value::Bytes(b"OrderID".to_vec())),
            Some("OrderID".to_string())
        );

        assert_eq!(value_as_i64(&Value::NULL), 0);
        assert_eq!(value_as_i64(&Value::UInt(7)), 7);
        assert_eq!(value_as_i64(&Value::Bytes(b"123".to_vec())), 123);
        assert_eq!(value_as_i64(&Value::Bytes(b"abc".to_vec())), 0);
    }
}
