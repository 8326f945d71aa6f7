//! HTTP interface for the router
//!
//! Orchestration callers use `/v1/*`; operators use the read-only `/admin/*`
//! listings and the single eligibility PATCH. Every failure is returned as
//! `{"error": <REASON_CODE>, "message": ...}`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use siva_router_core::{
    Error,
    admin::{AdminSurface, CapabilityView, DecisionQuery, DecisionView, DenialQuery, ModelQuery, ModelView},
    audit::{LogSummary, ReplayResolution, ReplayResolver},
    routing::{
        CapabilityDenial, CapabilityGateway, CapabilityRequest, CapabilityRouter, DenialReason,
        RoutingDecision,
    },
    service::RouterService,
};
use tracing::{info, warn};

/// Components shared by all handlers
pub struct AppState {
    gateway: CapabilityGateway,
    router: CapabilityRouter,
    replay: ReplayResolver,
    admin: AdminSurface,
    service: RouterService,
}

impl AppState {
    pub fn new(service: RouterService) -> Self {
        Self {
            gateway: service.gateway(),
            router: service.router(),
            replay: service.replay(),
            admin: service.admin(),
            service,
        }
    }
}

/// Error body for every non-success response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::ModelNotFound(_)
            | Error::PersonaNotFound(_)
            | Error::InteractionNotFound(_) => StatusCode::NOT_FOUND,
            Error::NotAuthorized { .. } => StatusCode::FORBIDDEN,
            Error::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Error::InvalidInput(_) | Error::CatalogInvalid(_) => StatusCode::BAD_REQUEST,
            Error::NoEligibleModel { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if !self.0.is_caller_error() {
            warn!(code = self.0.code(), status = status.as_u16(), error = %self.0, "Request failed");
        }

        let body = ErrorBody {
            error: self.0.code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError(Error::InvalidInput(format!("invalid request body: {}", e))))
}

fn parse_query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(q)| q)
        .map_err(|e| ApiError(Error::InvalidInput(format!("invalid query: {}", e))))
}

/// Build the HTTP router
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/authorize", post(authorize))
        .route("/v1/route", post(route))
        .route("/v1/replay/:interaction_id", get(replay))
        .route(
            "/admin/capabilities",
            get(list_capabilities).fallback(method_not_allowed),
        )
        .route(
            "/admin/models",
            get(list_models)
                .patch(patch_model)
                .fallback(method_not_allowed),
        )
        .route(
            "/admin/decisions",
            get(list_decisions).fallback(method_not_allowed),
        )
        .route(
            "/admin/denials",
            get(list_denials).fallback(method_not_allowed),
        )
        .route(
            "/admin/summary",
            get(summary).fallback(method_not_allowed),
        )
        .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn serve(service: RouterService, addr: SocketAddr) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(service));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<i32>,
}

async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    match state.service.database().health().await {
        Ok(health) if health.is_current() => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                schema_version: Some(health.schema_version),
            }),
        ),
        Ok(health) => {
            warn!(
                schema_version = health.schema_version,
                latest = health.latest_schema_version,
                "Router database schema is behind"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "outdated_schema".to_string(),
                    schema_version: Some(health.schema_version),
                }),
            )
        }
        Err(e) => {
            warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable".to_string(),
                    schema_version: None,
                }),
            )
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub interaction_id: String,
    pub decision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
}

async fn authorize(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<AuthorizeResponse> {
    let mut request: CapabilityRequest = parse_body(&body)?;
    let interaction_id = request.ensure_interaction_id().to_string();

    let outcome = state
        .gateway
        .authorizer()
        .authorize(&request.persona_id, &request.capability_key, &interaction_id)
        .await?;

    Ok(Json(AuthorizeResponse {
        interaction_id,
        decision: if outcome.is_allowed() { "ALLOW" } else { "DENY" }.to_string(),
        reason: outcome.denial_reason(),
    }))
}

#[derive(Debug, Deserialize)]
struct RouteRequest {
    persona_id: String,
    capability_key: String,
    interaction_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RouteResponse {
    pub interaction_id: String,
    pub model_id: String,
    pub score: f64,
    pub inputs_digest: String,
}

impl From<RoutingDecision> for RouteResponse {
    fn from(decision: RoutingDecision) -> Self {
        Self {
            interaction_id: decision.interaction_id,
            model_id: decision.model_id,
            score: decision.score,
            inputs_digest: decision.inputs_digest,
        }
    }
}

async fn route(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<RouteResponse> {
    let request: RouteRequest = parse_body(&body)?;
    if request.interaction_id.trim().is_empty() {
        return Err(Error::InvalidInput("interaction_id must not be empty".to_string()).into());
    }

    let timeout = state.gateway.call_timeout();
    let decision = tokio::time::timeout(
        timeout,
        state
            .router
            .route(&request.capability_key, &request.persona_id, &request.interaction_id),
    )
    .await
    .map_err(|_| Error::Timeout(timeout.as_millis() as u64))??;

    Ok(Json(decision.into()))
}

async fn replay(
    State(state): State<Arc<AppState>>,
    Path(interaction_id): Path<String>,
) -> ApiResult<ReplayResolution> {
    Ok(Json(state.replay.resolve_for_replay(&interaction_id).await?))
}

async fn list_capabilities(State(state): State<Arc<AppState>>) -> Json<Vec<CapabilityView>> {
    Json(state.admin.list_capabilities().await)
}

async fn list_models(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ModelQuery>, QueryRejection>,
) -> ApiResult<Vec<ModelView>> {
    let query = parse_query(query)?;
    Ok(Json(state.admin.list_models(&query).await))
}

async fn patch_model(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<ModelView> {
    let value: serde_json::Value = parse_body(&body)?;
    let patch = AdminSurface::parse_patch(&value)?;
    Ok(Json(state.admin.set_model_eligibility(&patch).await?))
}

async fn list_decisions(
    State(state): State<Arc<AppState>>,
    query: Result<Query<DecisionQuery>, QueryRejection>,
) -> ApiResult<Vec<DecisionView>> {
    let query = parse_query(query)?;
    Ok(Json(state.admin.list_decisions(&query).await?))
}

async fn list_denials(
    State(state): State<Arc<AppState>>,
    query: Result<Query<DenialQuery>, QueryRejection>,
) -> ApiResult<Vec<CapabilityDenial>> {
    let query = parse_query(query)?;
    Ok(Json(state.admin.list_denials(&query).await?))
}

async fn summary(State(state): State<Arc<AppState>>) -> ApiResult<LogSummary> {
    Ok(Json(state.admin.summary().await?))
}

async fn method_not_allowed() -> ApiError {
    ApiError(Error::MethodNotAllowed(
        "the admin surface is read-only apart from PATCH /admin/models".to_string(),
    ))
}
