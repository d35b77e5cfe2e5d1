use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, warn};

use crate::notices::Notices;

/// A single cell, keeping the storage class reported by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("None"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
            Self::Blob(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Integer(value) => serializer.serialize_i64(*value),
            Self::Real(value) => serializer.serialize_f64(*value),
            Self::Text(value) => serializer.serialize_str(value),
            Self::Blob(bytes) => serializer.serialize_str(&hex_lower(bytes)),
        }
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    use fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRow {
    pub values: Vec<CellValue>,
}

impl QueryRow {
    #[must_use]
    pub fn new(values: Vec<CellValue>) -> Self {
        Self { values }
    }
}

/// Ordered named columns plus ordered rows. An empty set is what the page
/// shows for both "no rows" and "query failed".
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<QueryRow>,
}

impl ResultSet {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<QueryRow>) -> Self {
        Self { columns, rows }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when there is nothing to display: no rows, or no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.columns.is_empty()
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    #[must_use]
    pub fn value(&self, row: usize, column: &str) -> Option<&CellValue> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.values.get(index)
    }
}

/// Row limit chosen on the browse page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct RowLimit(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("row limit {0} is outside {min}..={max}", min = RowLimit::MIN, max = RowLimit::MAX)]
pub struct RowLimitError(pub u32);

impl RowLimit {
    pub const MIN: u32 = 100;
    pub const MAX: u32 = 10_000;
    pub const DEFAULT: Self = Self(1_000);

    pub fn new(value: u32) -> Result<Self, RowLimitError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(RowLimitError(value))
        }
    }

    /// Pulls an out-of-range value back onto the nearest bound, the way a
    /// range control would.
    #[must_use]
    pub fn clamped(value: i64) -> Self {
        let bounded = value.clamp(i64::from(Self::MIN), i64::from(Self::MAX));
        Self(u32::try_from(bounded).unwrap_or(Self::MAX))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for RowLimit {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u32> for RowLimit {
    type Error = RowLimitError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RowLimit> for u32 {
    fn from(limit: RowLimit) -> Self {
        limit.0
    }
}

impl fmt::Display for RowLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a table name is placed into the browse statement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierQuoting {
    #[default]
    Verbatim,
    Quoted,
}

impl IdentifierQuoting {
    #[must_use]
    pub fn apply(self, identifier: &str) -> String {
        match self {
            Self::Verbatim => identifier.to_string(),
            Self::Quoted => format!("\"{}\"", identifier.replace('"', "\"\"")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct QueryBackendError {
    message: String,
}

impl QueryBackendError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Display text of these variants is exactly what the page shows as an
/// error notice.
#[derive(Debug, Error)]
pub enum QueryRunnerError {
    #[error("Error fetching data from table {table}: {source}")]
    Browse {
        table: String,
        #[source]
        source: QueryBackendError,
    },
    #[error("Error executing custom query: {0}")]
    Custom(#[source] QueryBackendError),
}

#[async_trait]
pub trait QueryBackend {
    /// Executes one statement and materializes every row it returns.
    async fn fetch_all(&mut self, sql: &str) -> Result<ResultSet, QueryBackendError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryRunner {
    quoting: IdentifierQuoting,
}

impl QueryRunner {
    #[must_use]
    pub fn new(quoting: IdentifierQuoting) -> Self {
        Self { quoting }
    }

    #[must_use]
    pub fn browse_sql(&self, table: &str, limit: RowLimit) -> String {
        format!("SELECT * FROM {} LIMIT {limit}", self.quoting.apply(table))
    }

    pub async fn try_browse<Q>(
        &self,
        connection: &mut Q,
        table: &str,
        limit: RowLimit,
    ) -> Result<ResultSet, QueryRunnerError>
    where
        Q: QueryBackend + Send,
    {
        let sql = self.browse_sql(table, limit);
        execute(connection, &sql)
            .await
            .map_err(|source| QueryRunnerError::Browse {
                table: table.to_string(),
                source,
            })
    }

    pub async fn try_custom<Q>(
        &self,
        connection: &mut Q,
        sql: &str,
    ) -> Result<ResultSet, QueryRunnerError>
    where
        Q: QueryBackend + Send,
    {
        execute(connection, sql)
            .await
            .map_err(QueryRunnerError::Custom)
    }

    /// Browses a table, turning a failure into an error notice and an empty
    /// result.
    pub async fn browse_table<Q>(
        &self,
        connection: &mut Q,
        table: &str,
        limit: RowLimit,
        notices: &mut Notices,
    ) -> ResultSet
    where
        Q: QueryBackend + Send,
    {
        let outcome = self.try_browse(connection, table, limit).await;
        collapse(outcome, notices)
    }

    /// Runs user SQL verbatim, turning a failure into an error notice and an
    /// empty result.
    pub async fn run_custom<Q>(
        &self,
        connection: &mut Q,
        sql: &str,
        notices: &mut Notices,
    ) -> ResultSet
    where
        Q: QueryBackend + Send,
    {
        let outcome = self.try_custom(connection, sql).await;
        collapse(outcome, notices)
    }
}

async fn execute<Q>(connection: &mut Q, sql: &str) -> Result<ResultSet, QueryBackendError>
where
    Q: QueryBackend + Send,
{
    let started_at = Instant::now();
    let result = connection.fetch_all(sql).await?;
    debug!(
        sql,
        rows = result.row_count(),
        columns = result.columns.len(),
        elapsed_ms = started_at.elapsed().as_secs_f64() * 1_000.0,
        "query executed"
    );
    Ok(result)
}

fn collapse(outcome: Result<ResultSet, QueryRunnerError>, notices: &mut Notices) -> ResultSet {
    match outcome {
        Ok(result) => result,
        Err(error) => {
            warn!(%error, "query failed");
            notices.error(error.to_string());
            ResultSet::empty()
        }
    }
}
