//! # HTTP surface
//!
//! An `axum` router over a shared [`MediRag`]. Bodies are JSON; client errors come
//! back as `{"error": "..."}` with status 400 or 404.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::*;

use crate::error::{QueryError, RebuildError};
use crate::models::PatientStats;
use crate::service::{
    ChatRequest, ChatResponse, FieldRequest, FieldResponse, MediRag, PatientDetails,
    PatientSummary, RebuildResponse,
};

/// A client or server error rendered as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = self.status.as_u16(), message = %self.message, "Server error");
        } else {
            debug!(status = self.status.as_u16(), message = %self.message, "Client error");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct PatientsResponse<T> {
    patients: Vec<T>,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct CheckResponse {
    pub new_patients: usize,
    pub total_patients: usize,
    pub rebuilt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Build the router with every endpoint, request tracing and permissive CORS.
pub fn create_router(app: Arc<MediRag>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/chat/field", post(chat_field))
        .route("/api/rebuild-index", post(rebuild_index))
        .route("/api/check-new-patients", get(check_new_patients))
        .route("/api/stats", get(stats))
        .route("/api/patients", get(patients))
        .route("/api/patients/details", get(patient_details))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

async fn chat(
    State(app): State<Arc<MediRag>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload?;
    match app.answer(request).await {
        Ok(response) => Ok(Json(response)),
        Err(QueryError::EmptyQuestion) => {
            Err(ApiError::new(StatusCode::BAD_REQUEST, "question manquante"))
        }
        Err(e) => Err(ApiError::new(StatusCode::BAD_REQUEST, e.to_string())),
    }
}

async fn chat_field(
    State(app): State<Arc<MediRag>>,
    payload: Result<Json<FieldRequest>, JsonRejection>,
) -> Result<Json<FieldResponse>, ApiError> {
    let Json(request) = payload?;
    match app.field_query(request).await {
        Ok(response) => Ok(Json(response)),
        Err(QueryError::EmptyQuestion) => {
            Err(ApiError::new(StatusCode::BAD_REQUEST, "message manquant"))
        }
        Err(QueryError::MissingCase) => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "case_id manquant et aucun patient reconnu dans le message",
        )),
        Err(QueryError::CaseNotFound(_)) => {
            Err(ApiError::new(StatusCode::NOT_FOUND, "dossier introuvable"))
        }
    }
}

async fn rebuild_index(State(app): State<Arc<MediRag>>) -> (StatusCode, Json<RebuildResponse>) {
    let response = app.rebuild().await;
    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(response))
}

async fn check_new_patients(
    State(app): State<Arc<MediRag>>,
) -> Result<Json<CheckResponse>, ApiError> {
    let report = match app.check().await {
        Ok(report) => report,
        // An unreadable store means nothing new can be seen.
        Err(RebuildError::Store(e)) => {
            warn!("Freshness check could not read the store: {}", e);
            return Ok(Json(CheckResponse {
                new_patients: 0,
                total_patients: 0,
                rebuilt: false,
                analysis: None,
                error: Some(e.to_string()),
            }));
        }
        Err(e) => return Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    };
    Ok(Json(CheckResponse {
        new_patients: report.new_records,
        total_patients: report.total_records,
        rebuilt: report.rebuilt,
        analysis: report.analysis,
        error: None,
    }))
}

async fn stats(State(app): State<Arc<MediRag>>) -> Json<PatientStats> {
    Json(app.stats().await)
}

async fn patients(State(app): State<Arc<MediRag>>) -> Json<PatientsResponse<PatientSummary>> {
    Json(PatientsResponse {
        patients: app.patients().await,
    })
}

async fn patient_details(
    State(app): State<Arc<MediRag>>,
) -> Json<PatientsResponse<PatientDetails>> {
    Json(PatientsResponse {
        patients: app.patient_details().await,
    })
}

/// Bind `addr` and serve until Ctrl+C or SIGTERM.
pub async fn serve(app: Arc<MediRag>, addr: &str) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, create_router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Unable to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
