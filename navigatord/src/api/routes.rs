use std::sync::Arc;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use shared::protocol::{
    DIGEST_PATH, DISCOVERY_OBSERVATIONS_PATH, DISCOVERY_RUN_PATH, DISCOVERY_STATUS_PATH,
    HEALTH_PATH, SERVICES_PATH, SERVICE_PATH,
};
use shared::types::{
    CreateServiceRequest, DiscoveryStatusInfo, EditPayload, ServiceEntry, ServiceQuery,
};
use crate::api::error::ApiError;
use crate::api::extract::ApiJson;
use crate::discovery::scanner::ScanPayload;
use crate::discovery::DiscoveryRunner;
use crate::registry::{MutationOutcome, RegistryHandle};

#[derive(Clone)]
pub struct AppState {
    pub registry: RegistryHandle,
    pub digest_rx: watch::Receiver<String>,
    pub discovery: Arc<DiscoveryRunner>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service_count: usize,
    pub now: DateTime<Utc>,
    pub version: &'static str,
}

/// A service as served to the dashboard, with its clickable link resolved.
#[derive(Serialize)]
pub struct ServiceView {
    #[serde(flatten)]
    pub entry: ServiceEntry,
    pub resolved_url: Option<String>,
}

impl From<ServiceEntry> for ServiceView {
    fn from(entry: ServiceEntry) -> Self {
        Self {
            resolved_url: entry.resolved_url(),
            entry,
        }
    }
}

#[derive(Serialize)]
pub struct DiscoveryRunResponse {
    pub summary: DiscoveryStatusInfo,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(SERVICES_PATH, get(list_services).post(create_service))
        .route(DIGEST_PATH, get(get_digest))
        .route(SERVICE_PATH, get(get_service).patch(update_service))
        .route(DISCOVERY_RUN_PATH, post(run_discovery))
        .route(DISCOVERY_OBSERVATIONS_PATH, post(ingest_observations))
        .route(DISCOVERY_STATUS_PATH, get(get_discovery_status))
        // The dashboard may be served from another origin.
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    Ok(Json(HealthResponse {
        status: "ok",
        service_count: state.registry.count().await?,
        now: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_services(
    State(state): State<AppState>,
    Query(query): Query<ServiceQuery>,
) -> Result<Json<Vec<ServiceView>>, ApiError> {
    let services = state.registry.list(query).await?;
    Ok(Json(services.into_iter().map(ServiceView::from).collect()))
}

async fn get_digest(State(state): State<AppState>) -> String {
    state.digest_rx.borrow().clone()
}

async fn get_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ServiceView>, ApiError> {
    state
        .registry
        .get(id.clone())
        .await?
        .map(|entry| Json(entry.into()))
        .ok_or(ApiError::NotFound(id))
}

async fn create_service(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateServiceRequest>,
) -> Result<(StatusCode, Json<ServiceView>), ApiError> {
    let entry = state.registry.create(request).await??;
    Ok((StatusCode::CREATED, Json(entry.into())))
}

async fn update_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(edit): ApiJson<EditPayload>,
) -> Result<Json<ServiceView>, ApiError> {
    match state.registry.edit(id.clone(), edit).await? {
        MutationOutcome::Applied(entry) => Ok(Json(entry.into())),
        MutationOutcome::Rejected(e) => Err(e.into()),
        MutationOutcome::NotFound => Err(ApiError::NotFound(id)),
    }
}

async fn run_discovery(
    State(state): State<AppState>,
) -> Result<Json<DiscoveryRunResponse>, ApiError> {
    state
        .discovery
        .run_once()
        .await
        .map(|summary| Json(DiscoveryRunResponse { summary }))
        .map_err(|e| ApiError::Discovery(format!("{e:#}")))
}

async fn ingest_observations(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ScanPayload>,
) -> Result<Json<DiscoveryRunResponse>, ApiError> {
    let summary = state.discovery.ingest(payload.into()).await?;
    Ok(Json(DiscoveryRunResponse { summary }))
}

async fn get_discovery_status(State(state): State<AppState>) -> Json<DiscoveryStatusInfo> {
    Json(state.discovery.status())
}
