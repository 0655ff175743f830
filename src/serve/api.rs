use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tracing::warn;

use super::resolver::{AssetResolver, Resolved};
use crate::config::ShipyardConfig;
use crate::deploy::build::BuildOrchestrator;
use crate::deploy::cleanup::CleanupScheduler;
use crate::deploy::ingest::{CloneRequest, DeployPipeline, RepositoryCloner};
use crate::deploy::models::DeploymentId;
use crate::deploy::processes::ProcessRegistry;
use crate::deploy::proxy::RouteRegistrar;
use crate::deploy::publish::ArtifactPublisher;
use crate::deploy::store::ProjectStore;
use crate::deploy::tracker::DeploymentTracker;
use crate::errors::{DeployError, DeployResult};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub config: Arc<ShipyardConfig>,
    pub resolver: AssetResolver,
    pub pipeline: DeployPipeline,
    pub processes: ProcessRegistry,
    pub cleanup: CleanupScheduler,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the store, publisher, orchestrator and pipeline for `config`.
    pub fn new(
        config: ShipyardConfig,
        cloner: Arc<dyn RepositoryCloner>,
        registrar: Arc<dyn RouteRegistrar>,
    ) -> DeployResult<Self> {
        let config = Arc::new(config);
        let store = Arc::new(ProjectStore::open(&config.paths.serving_dir)?);
        let cleanup = CleanupScheduler::new();
        let processes = ProcessRegistry::new();
        let publisher = Arc::new(ArtifactPublisher::new(
            Arc::clone(&store),
            cleanup.clone(),
            config.cleanup_grace(),
        ));
        let orchestrator = Arc::new(BuildOrchestrator::new(
            Arc::clone(&config),
            publisher,
            processes.clone(),
        ));
        let pipeline = DeployPipeline::new(
            Arc::clone(&config),
            cloner,
            orchestrator,
            Arc::clone(&store),
            DeploymentTracker::new(),
            registrar,
        );
        Ok(Self {
            config,
            resolver: AssetResolver::new(store),
            pipeline,
            processes,
            cleanup,
        })
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct DeployRequest {
    pub repo_name: String,
    pub owner: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<DeployError> for ApiError {
    fn from(err: DeployError) -> Self {
        match &err {
            DeployError::InvalidName(_) => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/projects", get(list_projects))
        .route("/api/deploy", post(deploy))
        .route("/api/deployments", get(list_deployments))
        .route("/api/deployments/{id}", get(get_deployment))
        .route("/api/processes", get(list_processes))
        .route("/projects/{name}", get(project_root))
        .route("/projects/{name}/", get(project_root))
        .route("/projects/{name}/{*path}", get(project_asset))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Bearer token from `Authorization`, else the `access_token` cookie.
fn credential(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == "access_token" && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

async fn resolve(state: SharedState, name: String, path: String) -> Result<Response, ApiError> {
    let resolver = state.resolver.clone();
    let resolved = tokio::task::spawn_blocking(move || resolver.resolve(&name, &path))
        .await
        .map_err(|e| ApiError::Internal(format!("Resolver task failed: {}", e)))?;

    let response = match resolved {
        Resolved::Asset { path, body } => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                body,
            )
                .into_response()
        }
        Resolved::Html(html) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8".to_string())],
            html,
        )
            .into_response(),
        Resolved::NotFound(path) => {
            (StatusCode::NOT_FOUND, format!("File not found: {}", path)).into_response()
        }
    };
    Ok(response)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_projects(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let resolver = state.resolver.clone();
    let projects = tokio::task::spawn_blocking(move || resolver.list_projects())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(serde_json::json!({ "projects": projects })))
}

async fn deploy(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<DeployRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let credential = credential(&headers)
        .ok_or_else(|| ApiError::Unauthorized("Missing access token".into()))?;
    let owner = req
        .owner
        .filter(|o| !o.trim().is_empty())
        .or_else(|| state.config.source.default_owner.clone())
        .ok_or_else(|| ApiError::BadRequest("Repository owner is required".into()))?;
    let repo_name = req.repo_name.trim().to_string();
    if repo_name.is_empty() {
        return Err(ApiError::BadRequest("Repository name is required".into()));
    }

    let outcome = state
        .pipeline
        .deploy(CloneRequest {
            owner,
            repo_name,
            credential,
        })
        .await
        .map_err(|e| {
            warn!(error = %e, "deploy request failed");
            ApiError::from(e)
        })?;

    Ok(Json(serde_json::json!({
        "message": "Repository deployed successfully",
        "deploy_url": outcome.deploy_url,
        "deployment_id": outcome.deployment_id,
        "project_type": outcome.project_type,
    })))
}

async fn list_deployments(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.pipeline.tracker().list().await)
}

async fn get_deployment(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = DeploymentId::from(id.as_str());
    state
        .pipeline
        .tracker()
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Deployment {} not found", id)))
}

async fn list_processes(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.processes.list().await)
}

async fn project_root(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    resolve(state, name, "/".to_string()).await
}

async fn project_asset(
    State(state): State<SharedState>,
    Path((name, path)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    resolve(state, name, format!("/{}", path)).await
}
