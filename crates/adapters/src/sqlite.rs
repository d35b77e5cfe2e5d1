use async_trait::async_trait;
use dbview_core::connection_manager::{BackendError, ConnectionBackend, DatabaseLocation};
use dbview_core::query_runner::{CellValue, QueryBackend, QueryBackendError, QueryRow, ResultSet};
use dbview_core::schema_lister::{SchemaBackend, SchemaBackendError, TABLE_CATALOG_SQL};
use rusqlite::types::ValueRef;
use rusqlite::{Batch, Connection};
use thiserror::Error;
use tokio::task::{self, JoinError};
use tracing::trace;

#[derive(Debug, Error)]
enum SqliteError {
    #[error(transparent)]
    Driver(#[from] rusqlite::Error),
    #[error("You can only execute one statement at a time.")]
    MultipleStatements,
    #[error("sqlite worker task failed: {0}")]
    Worker(#[from] JoinError),
    #[error("connection is already closed")]
    Closed,
}

#[derive(Debug, Clone, Default)]
pub struct SqliteConnectionBackend;

#[async_trait]
impl ConnectionBackend for SqliteConnectionBackend {
    type Connection = SqliteConnection;

    async fn connect(&self, location: &DatabaseLocation) -> Result<Self::Connection, BackendError> {
        let path = location.path().to_path_buf();
        let opened = task::spawn_blocking(move || Connection::open(path))
            .await
            .map_err(|error| to_connection_error(SqliteError::Worker(error)))?;
        opened
            .map(SqliteConnection::new)
            .map_err(|error| to_connection_error(SqliteError::Driver(error)))
    }

    async fn disconnect(&self, connection: Self::Connection) -> Result<(), BackendError> {
        // A handle lost to a panicked worker was already dropped, which closed it.
        let Some(inner) = connection.inner else {
            return Ok(());
        };
        task::spawn_blocking(move || inner.close().map_err(|(_, error)| SqliteError::from(error)))
            .await
            .map_err(SqliteError::from)
            .and_then(|closed| closed)
            .map_err(to_connection_error)
    }
}

/// One SQLite handle, in autocommit mode: every statement the user runs is
/// committed as soon as it finishes. Driver calls run on the blocking pool,
/// so the handle is moved out for the duration of each call.
#[derive(Debug)]
pub struct SqliteConnection {
    inner: Option<Connection>,
}

impl SqliteConnection {
    #[must_use]
    pub fn new(inner: Connection) -> Self {
        Self { inner: Some(inner) }
    }

    async fn run_blocking<T, F>(&mut self, work: F) -> Result<T, SqliteError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, SqliteError> + Send + 'static,
    {
        let connection = self.inner.take().ok_or(SqliteError::Closed)?;
        let (connection, outcome) = task::spawn_blocking(move || {
            let outcome = work(&connection);
            (connection, outcome)
        })
        .await?;
        self.inner = Some(connection);
        outcome
    }
}

#[async_trait]
impl SchemaBackend for SqliteConnection {
    async fn table_names(&mut self) -> Result<Vec<String>, SchemaBackendError> {
        self.run_blocking(|connection| catalog_table_names(connection).map_err(SqliteError::from))
            .await
            .map_err(to_schema_error)
    }
}

#[async_trait]
impl QueryBackend for SqliteConnection {
    async fn fetch_all(&mut self, sql: &str) -> Result<ResultSet, QueryBackendError> {
        let sql = sql.to_string();
        self.run_blocking(move |connection| query_all(connection, &sql))
            .await
            .map_err(to_query_error)
    }
}

fn catalog_table_names(connection: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut statement = connection.prepare(TABLE_CATALOG_SQL)?;
    let names = statement
        .query_map([], |row| row.get::<_, String>("name"))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// Runs exactly one statement. Input holding only comments or separators
/// yields an empty result; a second statement is rejected before anything
/// runs.
fn query_all(connection: &Connection, sql: &str) -> Result<ResultSet, SqliteError> {
    let mut batch = Batch::new(connection, sql);
    let Some(mut statement) = batch.next()? else {
        return Ok(ResultSet::empty());
    };
    if !matches!(batch.next(), Ok(None)) {
        return Err(SqliteError::MultipleStatements);
    }

    let columns = statement
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let column_count = columns.len();

    let mut rows = statement.query([])?;
    let mut collected = Vec::new();
    while let Some(row) = rows.next()? {
        let values = (0..column_count)
            .map(|index| row.get_ref(index).map(value_ref_to_cell))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        collected.push(QueryRow::new(values));
    }

    trace!(rows = collected.len(), "materialized sqlite rows");
    Ok(ResultSet::new(columns, collected))
}

fn value_ref_to_cell(value: ValueRef<'_>) -> CellValue {
    match value {
        ValueRef::Null => CellValue::Null,
        ValueRef::Integer(value) => CellValue::Integer(value),
        ValueRef::Real(value) => CellValue::Real(value),
        ValueRef::Text(bytes) => CellValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => CellValue::Blob(bytes.to_vec()),
    }
}

fn to_connection_error(error: SqliteError) -> BackendError {
    BackendError::new(error.to_string())
}

fn to_schema_error(error: SqliteError) -> SchemaBackendError {
    SchemaBackendError::new(error.to_string())
}

fn to_query_error(error: SqliteError) -> QueryBackendError {
    QueryBackendError::new(error.to_string())
}
