use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Router};
use dbview_adapters::export::{result_set_to_csv, result_set_to_json, ExportError};
use dbview_adapters::sqlite::SqliteConnectionBackend;
use dbview_core::config::ViewerConfig;
use dbview_core::connection_manager::{ConnectionManager, ConnectionManagerError};
use dbview_core::page::{Mode, PageRenderer, PageRequest, PageView, RenderError};
use dbview_core::query_runner::{QueryRunner, RowLimit};
use minijinja::{context, Environment};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const PAGE_TEMPLATE: &str = "page.html";

#[derive(Debug, Serialize)]
struct ModeOption {
    slug: &'static str,
    label: &'static str,
}

const MODES: [ModeOption; 2] = [
    ModeOption {
        slug: "browse",
        label: "Browse Tables",
    },
    ModeOption {
        slug: "custom",
        label: "Custom SQL Query",
    },
];

#[derive(Debug, Error)]
pub enum WebError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("failed to render page: {0}")]
    Template(#[from] minijinja::Error),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("unsupported export target `{0}`, expected <table>.csv or <table>.json")]
    UnsupportedExport(String),
    #[error("database is not reachable: {0}")]
    Startup(#[source] ConnectionManagerError),
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("http server error: {0}")]
    Serve(#[source] std::io::Error),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Render(RenderError::UnknownTable(_)) | Self::UnsupportedExport(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Render(RenderError::Query(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}

#[derive(Debug)]
pub struct AppState {
    renderer: PageRenderer<SqliteConnectionBackend>,
    templates: Environment<'static>,
    page_title: String,
    heading: String,
}

impl AppState {
    pub fn from_config(config: &ViewerConfig) -> Result<Self, WebError> {
        let mut templates = Environment::new();
        templates.add_template(PAGE_TEMPLATE, include_str!("../templates/page.html"))?;

        let manager = ConnectionManager::new(SqliteConnectionBackend, config.database_location());
        Ok(Self {
            renderer: PageRenderer::new(
                manager,
                QueryRunner::new(config.identifier_quoting),
                config.page_defaults(),
            ),
            templates,
            page_title: config.page_title.clone(),
            heading: config.heading.clone(),
        })
    }

    #[must_use]
    pub fn renderer(&self) -> &PageRenderer<SqliteConnectionBackend> {
        &self.renderer
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(page_from_query).post(page_from_form))
        .route("/export/{file}", get(export_table))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Probes the database, binds, and serves until Ctrl+C.
pub async fn serve(config: &ViewerConfig) -> Result<(), WebError> {
    let state = Arc::new(AppState::from_config(config)?);
    state
        .renderer
        .manager()
        .probe()
        .await
        .map_err(WebError::Startup)?;

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|source| WebError::Bind {
            address: address.clone(),
            source,
        })?;
    info!(
        %address,
        database = %config.database_path.display(),
        "serving database viewer at http://{address}"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(WebError::Serve)
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for ctrl-c");
    }
}

async fn page_from_query(
    State(state): State<Arc<AppState>>,
    Query(request): Query<PageRequest>,
) -> Result<Html<String>, WebError> {
    render_cycle(&state, &request).await
}

async fn page_from_form(
    State(state): State<Arc<AppState>>,
    Form(request): Form<PageRequest>,
) -> Result<Html<String>, WebError> {
    render_cycle(&state, &request).await
}

async fn render_cycle(state: &AppState, request: &PageRequest) -> Result<Html<String>, WebError> {
    let view = state.renderer.render(request).await?;
    Ok(Html(render_page(state, &view)?))
}

#[derive(Debug, Serialize)]
struct TableDisplay<'a> {
    caption: &'a str,
    columns: &'a [String],
    rows: Vec<Vec<String>>,
}

fn render_page(state: &AppState, view: &PageView) -> Result<String, WebError> {
    let template = state.templates.get_template(PAGE_TEMPLATE)?;

    // The custom-query banner sits above the editor, everything else below.
    let all_notices = view.notices.as_slice();
    let leading = match view.mode {
        Mode::CustomSqlQuery => all_notices.len().min(1),
        Mode::BrowseTables => 0,
    };
    let (leading_notices, notices) = all_notices.split_at(leading);

    let result = view.result.as_ref().map(|shown| TableDisplay {
        caption: &shown.caption,
        columns: &shown.result.columns,
        rows: shown
            .result
            .rows
            .iter()
            .map(|row| row.values.iter().map(ToString::to_string).collect())
            .collect(),
    });
    let show_export = view.mode == Mode::BrowseTables && result.is_some();

    Ok(template.render(context! {
        title => &state.page_title,
        heading => &state.heading,
        modes => &MODES,
        mode => view.mode.slug(),
        browse => &view.browse,
        custom => &view.custom,
        leading_notices => leading_notices,
        notices => notices,
        result => result,
        show_export => show_export,
        limit_min => RowLimit::MIN,
        limit_max => RowLimit::MAX,
    })?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::Json => "application/json",
        }
    }
}

fn parse_export_target(file: &str) -> Result<(&str, ExportFormat), WebError> {
    let unsupported = || WebError::UnsupportedExport(file.to_string());
    let (table, extension) = file.rsplit_once('.').ok_or_else(unsupported)?;
    if table.is_empty() {
        return Err(unsupported());
    }
    let format = match extension {
        "csv" => ExportFormat::Csv,
        "json" => ExportFormat::Json,
        _ => return Err(unsupported()),
    };
    Ok((table, format))
}

fn attachment_name(table: &str, format: ExportFormat) -> String {
    let stem = table
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();
    format!("attachment; filename=\"{stem}.{}\"", format.extension())
}

#[derive(Debug, Deserialize)]
struct ExportParams {
    limit: Option<i64>,
}

async fn export_table(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
    Query(params): Query<ExportParams>,
) -> Result<Response, WebError> {
    let (table, format) = parse_export_target(&file)?;
    let limit = params
        .limit
        .map_or(state.renderer.defaults().row_limit, RowLimit::clamped);

    let result = state.renderer.export_table(table, limit).await?;
    let body = match format {
        ExportFormat::Csv => result_set_to_csv(&result),
        ExportFormat::Json => result_set_to_json(&result)?,
    };

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, attachment_name(table, format)),
        ],
        body,
    )
        .into_response())
}
