//! JSON HTTP surface for SigForge: trigger runs, read postings and run state.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sigforge_core::{RunState, DEFAULT_ALERT_THRESHOLD};
use sigforge_storage::{PostingFilter, StoreStats};
use sigforge_sync::Orchestrator;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "sigforge-web";

pub const MAX_PAGE_SIZE: usize = 200;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[derive(Debug, Default, Deserialize)]
struct JobsQuery {
    limit: Option<usize>,
    offset: Option<usize>,
    min_score: Option<u8>,
    location: Option<String>,
    company: Option<String>,
    source: Option<String>,
}

impl JobsQuery {
    fn into_filter(self) -> PostingFilter {
        let defaults = PostingFilter::default();
        let blank_to_none = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        PostingFilter {
            min_score: self.min_score,
            location: blank_to_none(self.location),
            company: blank_to_none(self.company),
            source: blank_to_none(self.source),
            limit: self.limit.unwrap_or(defaults.limit).clamp(1, MAX_PAGE_SIZE),
            offset: self.offset.unwrap_or(0),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatsBody {
    #[serde(flatten)]
    store: StoreStats,
    alert_threshold: u8,
    run_state: RunState,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/collect", post(collect_handler))
        .route("/api/runs/last", get(last_run_handler))
        .route("/api/jobs", get(jobs_handler))
        .route("/api/jobs/{id}", get(job_detail_handler))
        .route("/api/stats", get(stats_handler))
        .with_state(Arc::new(state))
}

/// Serves until `shutdown` resolves.
pub async fn serve<F>(addr: &str, orchestrator: Arc<Orchestrator>, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "http surface listening");
    axum::serve(listener, app(AppState::new(orchestrator)))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health_handler() -> Response {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
    }))
    .into_response()
}

async fn collect_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.orchestrator.trigger_run().await {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => server_error(err),
    }
}

async fn last_run_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.orchestrator.last_run_summary() {
        Some(summary) => Json(summary).into_response(),
        None => not_found("no run has finished yet"),
    }
}

async fn jobs_handler(State(state): State<Arc<AppState>>, Query(query): Query<JobsQuery>) -> Response {
    let filter = query.into_filter();
    match state.orchestrator.store().list(&filter).await {
        Ok(postings) => Json(postings).into_response(),
        Err(err) => server_error(err),
    }
}

async fn job_detail_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.orchestrator.store().get(&id).await {
        Ok(Some(posting)) => Json(posting).into_response(),
        Ok(None) => not_found("posting not found"),
        Err(err) => server_error(err),
    }
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    let alert_threshold = match state.orchestrator.rule_source().load().await {
        Ok(rules) => rules.alert_threshold,
        Err(err) => {
            warn!(error = %err, "rules unreadable; reporting default threshold");
            DEFAULT_ALERT_THRESHOLD
        }
    };
    match state.orchestrator.store().stats(alert_threshold).await {
        Ok(store) => Json(StatsBody {
            store,
            alert_threshold,
            run_state: state.orchestrator.state(),
        })
        .into_response(),
        Err(err) => server_error(err),
    }
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
}

fn server_error(err: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}
