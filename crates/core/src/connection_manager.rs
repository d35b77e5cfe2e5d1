use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::query_runner::QueryBackend;
use crate::schema_lister::SchemaBackend;

/// Where the database file lives. Fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseLocation {
    path: PathBuf,
}

impl DatabaseLocation {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait ConnectionBackend {
    /// Handle for a single render cycle. Rows it produces are addressable by
    /// column name.
    type Connection: SchemaBackend + QueryBackend + Send;

    async fn connect(&self, location: &DatabaseLocation) -> Result<Self::Connection, BackendError>;
    async fn disconnect(&self, connection: Self::Connection) -> Result<(), BackendError>;
}

#[derive(Debug, Error)]
pub enum ConnectionManagerError {
    #[error("failed to open database at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: BackendError,
    },
    #[error("failed to close database connection: {0}")]
    Close(#[source] BackendError),
}

/// Opens one connection per render cycle. Holds no connection itself, so a
/// single manager can be shared by every request handler.
#[derive(Debug)]
pub struct ConnectionManager<B: ConnectionBackend> {
    backend: B,
    location: DatabaseLocation,
}

impl<B: ConnectionBackend> ConnectionManager<B> {
    #[must_use]
    pub fn new(backend: B, location: DatabaseLocation) -> Self {
        Self { backend, location }
    }

    #[must_use]
    pub fn location(&self) -> &DatabaseLocation {
        &self.location
    }

    pub async fn open(&self) -> Result<B::Connection, ConnectionManagerError> {
        let started_at = Instant::now();
        let connection = self
            .backend
            .connect(&self.location)
            .await
            .map_err(|source| ConnectionManagerError::Open {
                path: self.location.path().to_path_buf(),
                source,
            })?;
        debug!(
            path = %self.location.path().display(),
            elapsed_us = duration_micros(started_at.elapsed()),
            "opened database connection"
        );
        Ok(connection)
    }

    pub async fn close(&self, connection: B::Connection) -> Result<(), ConnectionManagerError> {
        self.backend
            .disconnect(connection)
            .await
            .map_err(ConnectionManagerError::Close)?;
        debug!(path = %self.location.path().display(), "closed database connection");
        Ok(())
    }

    /// Opens and immediately closes a connection. Used at startup so that an
    /// unreachable database aborts the process instead of the first request.
    pub async fn probe(&self) -> Result<(), ConnectionManagerError> {
        let connection = self.open().await?;
        self.close(connection).await
    }
}

fn duration_micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}
