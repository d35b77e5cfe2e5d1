use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info_span, Instrument};

use crate::connection_manager::{ConnectionBackend, ConnectionManager, ConnectionManagerError};
use crate::notices::Notices;
use crate::query_runner::{QueryRunner, QueryRunnerError, ResultSet, RowLimit};
use crate::schema_lister::{list_tables, SchemaListerError};

pub const DEFAULT_CUSTOM_QUERY: &str = "SELECT * FROM OUSR LIMIT 10;";

const NO_TABLES_WARNING: &str =
    "No tables found in the database. Please ensure the database is populated.";
const CUSTOM_QUERY_BANNER: &str =
    "Use this section to execute your own SQL queries. Be careful with UPDATE/DELETE/DROP statements.";
const BLANK_QUERY_NOTICE: &str = "Please enter a SQL query.";
const CUSTOM_EMPTY_NOTICE: &str = "Query executed, but no results returned or an error occurred.";
const CUSTOM_RESULTS_CAPTION: &str = "Query Results:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    #[serde(rename = "browse")]
    BrowseTables,
    #[serde(rename = "custom")]
    CustomSqlQuery,
}

impl Mode {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::BrowseTables => "Browse Tables",
            Self::CustomSqlQuery => "Custom SQL Query",
        }
    }

    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            Self::BrowseTables => "browse",
            Self::CustomSqlQuery => "custom",
        }
    }
}

/// Everything the user chose on the page before triggering a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    /// "Load Data" was pressed.
    #[serde(default)]
    pub load: bool,
    #[serde(default)]
    pub query: Option<String>,
    /// "Execute Query" was pressed.
    #[serde(default)]
    pub execute: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDefaults {
    pub row_limit: RowLimit,
    pub custom_query: String,
}

impl Default for PageDefaults {
    fn default() -> Self {
        Self {
            row_limit: RowLimit::DEFAULT,
            custom_query: DEFAULT_CUSTOM_QUERY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrowseView {
    pub tables: Vec<String>,
    pub selected_table: Option<String>,
    pub limit: RowLimit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomView {
    pub query_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayedResult {
    pub caption: String,
    pub result: ResultSet,
}

/// Output of one render cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageView {
    pub mode: Mode,
    pub browse: Option<BrowseView>,
    pub custom: Option<CustomView>,
    pub notices: Notices,
    pub result: Option<DisplayedResult>,
}

impl PageView {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            browse: None,
            custom: None,
            notices: Notices::default(),
            result: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Connection(#[from] ConnectionManagerError),
    #[error(transparent)]
    Schema(#[from] SchemaListerError),
    #[error(transparent)]
    Query(#[from] QueryRunnerError),
    #[error("table `{0}` does not exist")]
    UnknownTable(String),
}

/// Runs page logic, one connection per call.
#[derive(Debug)]
pub struct PageRenderer<B: ConnectionBackend> {
    manager: ConnectionManager<B>,
    runner: QueryRunner,
    defaults: PageDefaults,
}

impl<B> PageRenderer<B>
where
    B: ConnectionBackend + Sync,
{
    #[must_use]
    pub fn new(manager: ConnectionManager<B>, runner: QueryRunner, defaults: PageDefaults) -> Self {
        Self {
            manager,
            runner,
            defaults,
        }
    }

    #[must_use]
    pub fn manager(&self) -> &ConnectionManager<B> {
        &self.manager
    }

    #[must_use]
    pub fn defaults(&self) -> &PageDefaults {
        &self.defaults
    }

    /// One render cycle: open, run the branch the request selects, close.
    /// The connection is closed on every path, including fatal ones.
    pub async fn render(&self, request: &PageRequest) -> Result<PageView, RenderError> {
        self.render_cycle(request)
            .instrument(info_span!("render_cycle", mode = request.mode.slug()))
            .await
    }

    /// Browse query for a download. The table must be one the catalog lists;
    /// failures are returned instead of being turned into notices.
    pub async fn export_table(
        &self,
        table: &str,
        limit: RowLimit,
    ) -> Result<ResultSet, RenderError> {
        self.export_cycle(table, limit)
            .instrument(info_span!("export_cycle", table))
            .await
    }

    async fn render_cycle(&self, request: &PageRequest) -> Result<PageView, RenderError> {
        let mut connection = self.manager.open().await?;
        let outcome = match request.mode {
            Mode::BrowseTables => self.browse(&mut connection, request).await,
            Mode::CustomSqlQuery => Ok(self.custom(&mut connection, request).await),
        };
        self.finish(connection, outcome).await
    }

    async fn export_cycle(&self, table: &str, limit: RowLimit) -> Result<ResultSet, RenderError> {
        let mut connection = self.manager.open().await?;
        let outcome = self.export_rows(&mut connection, table, limit).await;
        self.finish(connection, outcome).await
    }

    async fn export_rows(
        &self,
        connection: &mut B::Connection,
        table: &str,
        limit: RowLimit,
    ) -> Result<ResultSet, RenderError> {
        let tables = list_tables(connection).await?;
        if !tables.iter().any(|known| known == table) {
            return Err(RenderError::UnknownTable(table.to_string()));
        }
        Ok(self.runner.try_browse(connection, table, limit).await?)
    }

    async fn finish<T>(
        &self,
        connection: B::Connection,
        outcome: Result<T, RenderError>,
    ) -> Result<T, RenderError> {
        let closed = self.manager.close(connection).await;
        match (outcome, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_error)) => Err(close_error.into()),
            (Err(cycle_error), closed) => {
                if let Err(close_error) = closed {
                    error!(%close_error, "close failed after cycle error");
                }
                error!(error = %cycle_error, "render cycle failed");
                Err(cycle_error)
            }
        }
    }

    async fn browse(
        &self,
        connection: &mut B::Connection,
        request: &PageRequest,
    ) -> Result<PageView, RenderError> {
        let mut view = PageView::new(Mode::BrowseTables);
        let tables = list_tables(connection).await?;
        let limit = request
            .limit
            .map_or(self.defaults.row_limit, RowLimit::clamped);

        if tables.is_empty() {
            view.notices.warning(NO_TABLES_WARNING);
            view.browse = Some(BrowseView {
                tables,
                selected_table: None,
                limit,
            });
            return Ok(view);
        }

        let selected = request
            .table
            .as_ref()
            .filter(|wanted| tables.contains(*wanted))
            .unwrap_or(&tables[0])
            .clone();

        if request.load {
            let result = self
                .runner
                .browse_table(connection, &selected, limit, &mut view.notices)
                .await;
            if result.is_empty() {
                view.notices.info(format!(
                    "No data found or an error occurred for table '{selected}'."
                ));
            } else {
                view.result = Some(DisplayedResult {
                    caption: format!(
                        "Displaying first {} rows from '{selected}':",
                        result.row_count()
                    ),
                    result,
                });
            }
        }

        view.browse = Some(BrowseView {
            tables,
            selected_table: Some(selected),
            limit,
        });
        Ok(view)
    }

    async fn custom(&self, connection: &mut B::Connection, request: &PageRequest) -> PageView {
        let mut view = PageView::new(Mode::CustomSqlQuery);
        view.notices.info(CUSTOM_QUERY_BANNER);
        let query_text = request
            .query
            .clone()
            .unwrap_or_else(|| self.defaults.custom_query.clone());

        if request.execute {
            if query_text.trim().is_empty() {
                view.notices.info(BLANK_QUERY_NOTICE);
            } else {
                let result = self
                    .runner
                    .run_custom(connection, &query_text, &mut view.notices)
                    .await;
                if result.is_empty() {
                    view.notices.info(CUSTOM_EMPTY_NOTICE);
                } else {
                    view.result = Some(DisplayedResult {
                        caption: CUSTOM_RESULTS_CAPTION.to_string(),
                        result,
                    });
                }
            }
        }

        view.custom = Some(CustomView { query_text });
        view
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::{Mode, PageDefaults, PageRenderer, PageRequest, RenderError};
    use crate::connection_manager::{ConnectionManager, DatabaseLocation};
    use crate::notices::NoticeLevel;
    use crate::query_runner::{QueryRunner, RowLimit};
    use crate::testing::{FakeDatabase, FakeTable};

    fn renderer(database: &FakeDatabase) -> PageRenderer<FakeDatabase> {
        PageRenderer::new(
            ConnectionManager::new(database.clone(), DatabaseLocation::new("fake.db")),
            QueryRunner::default(),
            PageDefaults::default(),
        )
    }

    fn sample_database() -> FakeDatabase {
        FakeDatabase::with_tables(vec![
            FakeTable::new("OUSR", &["USERID", "USER_CODE"], 3),
            FakeTable::new("OCRD", &["CardCode", "CardName"], 0),
        ])
    }

    fn assert_balanced(database: &FakeDatabase) {
        assert_eq!(
            database.counters.connects.load(Ordering::SeqCst),
            database.counters.disconnects.load(Ordering::SeqCst),
            "every opened connection must be closed"
        );
    }

    #[tokio::test]
    async fn browse_without_load_lists_tables_and_selects_first() {
        let database = sample_database();
        let view = renderer(&database)
            .render(&PageRequest::default())
            .await
            .expect("render should succeed");

        let browse = view.browse.expect("browse view expected");
        assert_eq!(browse.tables, vec!["OUSR", "OCRD"]);
        assert_eq!(browse.selected_table.as_deref(), Some("OUSR"));
        assert_eq!(browse.limit, RowLimit::DEFAULT);
        assert!(view.result.is_none());
        assert!(view.notices.is_empty());
        assert_eq!(database.counters.queries.load(Ordering::SeqCst), 0);
        assert_balanced(&database);
    }

    #[tokio::test]
    async fn load_runs_synthesized_select_with_chosen_limit() {
        let database = sample_database();
        let request = PageRequest {
            table: Some("OUSR".to_string()),
            limit: Some(100),
            load: true,
            ..PageRequest::default()
        };

        let view = renderer(&database)
            .render(&request)
            .await
            .expect("render should succeed");

        assert_eq!(database.executed(), vec!["SELECT * FROM OUSR LIMIT 100"]);
        let shown = view.result.expect("rows expected");
        assert_eq!(shown.caption, "Displaying first 3 rows from 'OUSR':");
        assert_eq!(shown.result.columns, vec!["USERID", "USER_CODE"]);
        assert_balanced(&database);
    }

    #[tokio::test]
    async fn out_of_range_limit_is_clamped_to_upper_bound() {
        let database = sample_database();
        let request = PageRequest {
            limit: Some(50_000),
            load: true,
            ..PageRequest::default()
        };

        renderer(&database)
            .render(&request)
            .await
            .expect("render should succeed");

        assert_eq!(database.executed(), vec!["SELECT * FROM OUSR LIMIT 10000"]);
    }

    #[tokio::test]
    async fn unknown_selection_falls_back_to_first_table() {
        let database = sample_database();
        let request = PageRequest {
            table: Some("nope; DROP TABLE OUSR".to_string()),
            load: true,
            ..PageRequest::default()
        };

        let view = renderer(&database)
            .render(&request)
            .await
            .expect("render should succeed");

        assert_eq!(database.executed(), vec!["SELECT * FROM OUSR LIMIT 1000"]);
        assert_eq!(
            view.browse.and_then(|browse| browse.selected_table).as_deref(),
            Some("OUSR")
        );
    }

    #[tokio::test]
    async fn empty_table_shows_info_notice_without_result() {
        let database = sample_database();
        let request = PageRequest {
            table: Some("OCRD".to_string()),
            load: true,
            ..PageRequest::default()
        };

        let view = renderer(&database)
            .render(&request)
            .await
            .expect("render should succeed");

        assert!(view.result.is_none());
        assert_eq!(view.notices.len(), 1);
        assert_eq!(
            view.notices.as_slice()[0].message,
            "No data found or an error occurred for table 'OCRD'."
        );
    }

    #[tokio::test]
    async fn no_tables_shows_warning() {
        let database = FakeDatabase::default();
        let view = renderer(&database)
            .render(&PageRequest::default())
            .await
            .expect("render should succeed");

        assert_eq!(view.notices.count(NoticeLevel::Warning), 1);
        assert!(view
            .browse
            .expect("browse view expected")
            .selected_table
            .is_none());
        assert_balanced(&database);
    }

    #[tokio::test]
    async fn custom_mode_prefills_sample_query_and_shows_banner() {
        let database = sample_database();
        let request = PageRequest {
            mode: Mode::CustomSqlQuery,
            ..PageRequest::default()
        };

        let view = renderer(&database)
            .render(&request)
            .await
            .expect("render should succeed");

        assert_eq!(
            view.custom.expect("custom view expected").query_text,
            "SELECT * FROM OUSR LIMIT 10;"
        );
        assert_eq!(view.notices.count(NoticeLevel::Info), 1);
        assert_eq!(database.counters.catalog_queries.load(Ordering::SeqCst), 0);
        assert_balanced(&database);
    }

    #[tokio::test]
    async fn blank_custom_query_never_reaches_driver() {
        let database = sample_database();
        let request = PageRequest {
            mode: Mode::CustomSqlQuery,
            query: Some("   \n\t ".to_string()),
            execute: true,
            ..PageRequest::default()
        };

        let view = renderer(&database)
            .render(&request)
            .await
            .expect("render should succeed");

        assert_eq!(database.counters.queries.load(Ordering::SeqCst), 0);
        assert!(view
            .notices
            .as_slice()
            .iter()
            .any(|notice| notice.level == NoticeLevel::Info
                && notice.message == "Please enter a SQL query."));
        assert!(view.result.is_none());
    }

    #[tokio::test]
    async fn failing_custom_query_reports_error_then_empty_info() {
        let database = sample_database();
        let request = PageRequest {
            mode: Mode::CustomSqlQuery,
            query: Some("SELECT * FROM nonexistent_table".to_string()),
            execute: true,
            ..PageRequest::default()
        };

        let view = renderer(&database)
            .render(&request)
            .await
            .expect("query errors must not fail the cycle");

        assert_eq!(view.notices.count(NoticeLevel::Error), 1);
        assert_eq!(
            view.notices.as_slice().last().map(|notice| notice.message.as_str()),
            Some("Query executed, but no results returned or an error occurred.")
        );
        assert!(view.result.is_none());
        assert_balanced(&database);
    }

    #[tokio::test]
    async fn custom_query_results_are_captioned() {
        let database = sample_database();
        let request = PageRequest {
            mode: Mode::CustomSqlQuery,
            query: Some("SELECT * FROM OUSR".to_string()),
            execute: true,
            ..PageRequest::default()
        };

        let view = renderer(&database)
            .render(&request)
            .await
            .expect("render should succeed");

        let shown = view.result.expect("rows expected");
        assert_eq!(shown.caption, "Query Results:");
        assert_eq!(shown.result.row_count(), 3);
    }

    #[tokio::test]
    async fn connect_failure_is_fatal() {
        let database = sample_database().failing_connect();
        let err = renderer(&database)
            .render(&PageRequest::default())
            .await
            .expect_err("render should fail");

        assert!(matches!(err, RenderError::Connection(_)));
    }

    #[tokio::test]
    async fn catalog_failure_is_fatal_but_connection_still_closes() {
        let database = sample_database().failing_catalog();
        let err = renderer(&database)
            .render(&PageRequest::default())
            .await
            .expect_err("render should fail");

        assert!(matches!(err, RenderError::Schema(_)));
        assert_eq!(database.counters.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn export_rejects_tables_missing_from_catalog() {
        let database = sample_database();
        let err = renderer(&database)
            .export_table("OUSR; DROP TABLE OUSR", RowLimit::DEFAULT)
            .await
            .expect_err("export should fail");

        assert!(matches!(err, RenderError::UnknownTable(_)));
        assert_eq!(database.counters.queries.load(Ordering::SeqCst), 0);
        assert_balanced(&database);
    }

    #[tokio::test]
    async fn export_returns_browse_rows() {
        let database = sample_database();
        let result = renderer(&database)
            .export_table("OUSR", RowLimit::DEFAULT)
            .await
            .expect("export should succeed");

        assert_eq!(result.row_count(), 3);
        assert_balanced(&database);
    }
}
