use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Catalog query issued against SQLite's `sqlite_master`. Order is whatever
/// the catalog yields, which is table creation order.
pub const TABLE_CATALOG_SQL: &str = "SELECT name FROM sqlite_master WHERE type='table'";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SchemaBackendError {
    message: String,
}

impl SchemaBackendError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchemaListerError {
    #[error("failed to list tables: {0}")]
    Backend(#[source] SchemaBackendError),
}

#[async_trait]
pub trait SchemaBackend {
    /// Returns the `name` column of every catalog entry of kind `table`.
    async fn table_names(&mut self) -> Result<Vec<String>, SchemaBackendError>;
}

/// Lists tables without caching; every render cycle asks the catalog again.
pub async fn list_tables<S>(connection: &mut S) -> Result<Vec<String>, SchemaListerError>
where
    S: SchemaBackend + Send,
{
    let tables = connection
        .table_names()
        .await
        .map_err(SchemaListerError::Backend)?;
    debug!(count = tables.len(), "listed tables");
    Ok(tables)
}
