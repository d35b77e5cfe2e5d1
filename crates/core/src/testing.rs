//! In-memory backend shared by the unit tests of this crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::connection_manager::{BackendError, ConnectionBackend, DatabaseLocation};
use crate::query_runner::{CellValue, QueryBackend, QueryBackendError, QueryRow, ResultSet};
use crate::schema_lister::{SchemaBackend, SchemaBackendError};

#[derive(Debug, Clone)]
pub struct FakeTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<QueryRow>,
}

impl FakeTable {
    pub fn new(name: &str, columns: &[&str], row_count: i64) -> Self {
        let rows = (1..=row_count)
            .map(|id| {
                let values = columns
                    .iter()
                    .enumerate()
                    .map(|(index, column)| {
                        if index == 0 {
                            CellValue::Integer(id)
                        } else {
                            CellValue::Text(format!("{column}-{id}"))
                        }
                    })
                    .collect();
                QueryRow::new(values)
            })
            .collect();

        Self {
            name: name.to_string(),
            columns: columns.iter().map(|column| (*column).to_string()).collect(),
            rows,
        }
    }
}

#[derive(Debug, Default)]
pub struct Counters {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub catalog_queries: AtomicUsize,
    pub queries: AtomicUsize,
}

#[derive(Debug, Clone, Default)]
pub struct FakeDatabase {
    tables: Arc<Vec<FakeTable>>,
    executed: Arc<Mutex<Vec<String>>>,
    pub counters: Arc<Counters>,
    fail_connect: bool,
    fail_catalog: bool,
}

impl FakeDatabase {
    pub fn with_tables(tables: Vec<FakeTable>) -> Self {
        Self {
            tables: Arc::new(tables),
            ..Self::default()
        }
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_catalog(mut self) -> Self {
        self.fail_catalog = true;
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|executed| executed.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct FakeConnection {
    database: FakeDatabase,
}

#[async_trait]
impl ConnectionBackend for FakeDatabase {
    type Connection = FakeConnection;

    async fn connect(
        &self,
        _location: &DatabaseLocation,
    ) -> Result<Self::Connection, BackendError> {
        if self.fail_connect {
            return Err(BackendError::new("unable to open database file"));
        }
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection {
            database: self.clone(),
        })
    }

    async fn disconnect(&self, _connection: Self::Connection) -> Result<(), BackendError> {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl SchemaBackend for FakeConnection {
    async fn table_names(&mut self) -> Result<Vec<String>, SchemaBackendError> {
        self.database
            .counters
            .catalog_queries
            .fetch_add(1, Ordering::SeqCst);
        if self.database.fail_catalog {
            return Err(SchemaBackendError::new("database disk image is malformed"));
        }
        Ok(self
            .database
            .tables
            .iter()
            .map(|table| table.name.clone())
            .collect())
    }
}

/// Understands `SELECT * FROM <table> [LIMIT <n>]` and nothing else.
#[async_trait]
impl QueryBackend for FakeConnection {
    async fn fetch_all(&mut self, sql: &str) -> Result<ResultSet, QueryBackendError> {
        self.database.counters.queries.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut executed) = self.database.executed.lock() {
            executed.push(sql.to_string());
        }

        let statement = sql.trim().trim_end_matches(';');
        let rest = statement
            .strip_prefix("SELECT * FROM ")
            .ok_or_else(|| QueryBackendError::new("near \"?\": syntax error"))?;
        let (table_name, limit) = match rest.split_once(" LIMIT ") {
            Some((table_name, limit)) => (
                table_name,
                limit
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| QueryBackendError::new("datatype mismatch"))?,
            ),
            None => (rest, usize::MAX),
        };

        let table = self
            .database
            .tables
            .iter()
            .find(|table| table.name == table_name.trim())
            .ok_or_else(|| QueryBackendError::new(format!("no such table: {table_name}")))?;

        Ok(ResultSet::new(
            table.columns.clone(),
            table.rows.iter().take(limit).cloned().collect(),
        ))
    }
}
