//! HTTP front end: start a batch, poll its status, download the report it produced.

use crate::batch::{BatchCoordinator, BatchRequest, PendingBatch};
use crate::config::SweepConfig;
use crate::errors::{BatchError, InvalidParamsError};
use crate::model::{BatchOutcome, BatchPhase, BatchStatus};
use crate::report::write_report;
use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

pub struct ServerState {
    config: SweepConfig,
    coordinator: Arc<BatchCoordinator>,
    reports: Mutex<HashSet<PathBuf>>,
}

impl ServerState {
    pub fn new(config: SweepConfig) -> Arc<Self> {
        let coordinator = Arc::new(BatchCoordinator::from_config(&config));
        Self::with_coordinator(config, coordinator)
    }

    pub fn with_coordinator(config: SweepConfig, coordinator: Arc<BatchCoordinator>) -> Arc<Self> {
        Arc::new(Self {
            config,
            coordinator,
            reports: Mutex::new(HashSet::new()),
        })
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    fn is_known_report(&self, path: &Path) -> bool {
        self.reports.lock().contains(path)
    }

    /// Write the report for a finished batch and register it for download.
    fn publish_report(&self, outcome: &BatchOutcome, out_dir: &Path) -> Option<PathBuf> {
        if outcome.changes.is_empty() {
            return None;
        }
        match write_report(
            &outcome.changes,
            out_dir,
            self.config.report_format,
            self.config.report_encoding,
        ) {
            Ok(path) => {
                self.reports.lock().insert(path.clone());
                Some(path)
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to write report");
                None
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Conflict(_) => "conflict",
            ApiError::NotFound(_) => "not_found",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl From<InvalidParamsError> for ApiError {
    fn from(error: InvalidParamsError) -> Self {
        match error.field() {
            Some(field) => ApiError::BadRequest(format!("{}: {}", field, error.message())),
            None => ApiError::BadRequest(error.message().to_string()),
        }
    }
}

impl From<BatchError> for ApiError {
    fn from(error: BatchError) -> Self {
        match error {
            BatchError::InvalidParams(params) => params.into(),
            BatchError::Busy => ApiError::Conflict(error.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };
        (status, Json(serde_json::json!({ "error": body }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct RunParams {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    pub search: String,
    #[serde(default)]
    pub replace: Option<String>,
    /// Defaults to true when `replace` is empty.
    #[serde(default)]
    pub search_only: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub phase: String,
    pub current_file: Option<String>,
    pub progress: f64,
    pub total_files: usize,
    pub processed_files: usize,
    pub total_replacements: usize,
    pub message: String,
    pub report_path: Option<PathBuf>,
}

impl From<&BatchStatus> for StatusResponse {
    fn from(status: &BatchStatus) -> Self {
        let progress = &status.progress;
        let current_file = if progress.current_path.as_os_str().is_empty() {
            None
        } else {
            Some(progress.current_path.display().to_string())
        };
        Self {
            running: status.phase.is_active(),
            phase: status.phase.to_string(),
            current_file,
            progress: if status.phase == BatchPhase::Idle {
                0.0
            } else {
                progress.percent()
            },
            total_files: progress.total_count,
            processed_files: progress.processed_count,
            total_replacements: status.total_changes,
            message: status.message.clone(),
            report_path: status.report_path.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    pub path: PathBuf,
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/run", post(run_handler))
        .route("/api/status", get(status_handler))
        .route("/api/download", get(download_handler))
        .with_state(state)
}

async fn run_handler(
    State(state): State<Arc<ServerState>>,
    Json(params): Json<RunParams>,
) -> Result<Json<RunResponse>, ApiError> {
    let RunParams {
        dir,
        search,
        replace,
        search_only,
    } = params;

    if search.is_empty() {
        return Err(InvalidParamsError::new("run", "search text must not be empty")
            .with_field("search")
            .into());
    }
    let replace = replace.unwrap_or_default();
    let search_only = search_only.unwrap_or(replace.is_empty());

    let root = dir
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| state.config.resolve_path(dir))
        .unwrap_or_else(|| state.config.root.clone());
    if !root.is_dir() {
        return Err(InvalidParamsError::new(
            "run",
            format!("{} is not a directory", root.display()),
        )
        .with_field("dir")
        .into());
    }

    let request = BatchRequest {
        root,
        search,
        replace,
        search_only,
        excluded_exts: state.config.excluded_exts.clone(),
        excluded_dir: state.config.excluded_dir.clone(),
    };
    tracing::info!(root = %request.root.display(), search_only, "batch requested over http");
    let pending = state.coordinator.start(request)?;

    tokio::spawn(async move {
        run_and_report(&state, pending).await;
    });

    Ok(Json(RunResponse {
        status: "started".to_string(),
    }))
}

async fn run_and_report(state: &ServerState, pending: PendingBatch) {
    let out_dir = pending.request().root.clone();
    let result = state
        .coordinator
        .complete(pending, |_| {}, |outcome| state.publish_report(outcome, &out_dir))
        .await;

    match result {
        Ok(outcome) => {
            if let Some(error) = outcome.error() {
                tracing::warn!(error = %error, "batch finished with save failures");
            }
        }
        Err(error) => tracing::error!(error = %error, "batch failed"),
    }
}

async fn status_handler(State(state): State<Arc<ServerState>>) -> Json<StatusResponse> {
    let status = state.coordinator.status();
    Json(StatusResponse::from(&status))
}

async fn download_handler(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, ApiError> {
    if !state.is_known_report(&params.path) {
        return Err(ApiError::NotFound(format!(
            "no report at {}",
            params.path.display()
        )));
    }
    let bytes = tokio::fs::read(&params.path)
        .await
        .map_err(|e| ApiError::NotFound(format!("failed to read report: {e}")))?;

    let file_name = params
        .path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report.csv".to_string());
    let content_type = if file_name.ends_with(".tsv") {
        "text/tab-separated-values"
    } else {
        "text/csv"
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<ServerState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server failed")
}

pub async fn run_server(config: SweepConfig) -> Result<()> {
    config.ensure_root()?;
    let bind = config.http_bind_address;
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %bind, root = %config.root.display(), "serving http api");

    let state = ServerState::new(config);
    serve(listener, state, async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %error, "failed to listen for shutdown signal");
        }
    })
    .await?;
    tracing::info!("server stopped");
    Ok(())
}
