//! Admin HTTP server: health, Prometheus metrics and job control.

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::metrics::metrics_handler;
use crate::background_jobs::{JobError, SchedulerHandle};

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
        .into_response()
}

async fn health() -> &'static str {
    "ok"
}

async fn list_jobs(State(scheduler): State<SchedulerHandle>) -> impl IntoResponse {
    Json(scheduler.list_jobs().await)
}

async fn get_job(
    State(scheduler): State<SchedulerHandle>,
    Path(job_id): Path<String>,
) -> Response {
    match scheduler.get_job(&job_id).await {
        Some(job) => Json(job).into_response(),
        None => error_response(StatusCode::NOT_FOUND, JobError::NotFound),
    }
}

async fn trigger_job(
    State(scheduler): State<SchedulerHandle>,
    Path(job_id): Path<String>,
) -> Response {
    match scheduler.trigger_job(&job_id).await {
        Ok(()) => {
            info!("Job {} triggered manually", job_id);
            StatusCode::ACCEPTED.into_response()
        }
        Err(e @ JobError::NotFound) => error_response(StatusCode::NOT_FOUND, e),
        Err(e @ JobError::AlreadyRunning) => error_response(StatusCode::CONFLICT, e),
        Err(e) => {
            warn!("Failed to trigger job {}: {}", job_id, e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, e)
        }
    }
}

pub fn make_app(scheduler: SchedulerHandle) -> Router {
    let job_routes: Router = Router::new()
        .route("/", get(list_jobs))
        .route("/{id}", get(get_job))
        .route("/{id}/trigger", post(trigger_job))
        .with_state(scheduler);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .nest("/v1/jobs", job_routes)
}

/// Serve the admin API on `port` until `shutdown_token` is cancelled.
pub async fn run_server(
    scheduler: SchedulerHandle,
    port: u16,
    shutdown_token: CancellationToken,
) -> Result<()> {
    let app = make_app(scheduler);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Admin server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await?;
    Ok(())
}

/// Run the admin API for the lifetime of the service.
///
/// Port 0 disables it. A server that cannot bind or stops with an error is
/// logged and this returns, leaving the scheduler untouched: the admin API is
/// optional, backups are not.
pub async fn run_admin_server(
    scheduler: SchedulerHandle,
    port: u16,
    shutdown_token: CancellationToken,
) {
    if port == 0 {
        info!("Admin server disabled");
        return;
    }
    if let Err(e) = run_server(scheduler, port, shutdown_token).await {
        error!(
            "Admin server on port {} failed, backups continue without it: {:#}",
            port, e
        );
    }
}
