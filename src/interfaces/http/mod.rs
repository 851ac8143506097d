//! Admin control plane (Axum)
//!
//! Synchronous JSON surface for operators and the order gateway. The
//! gateway MUST consult `/trade/can-trade/{clientId}` before submitting any
//! order; blocked accounts answer with the blocking reason.

pub mod dto;

use crate::application::coordinator::Coordinator;
use crate::domain::errors::EngineError;
use crate::domain::risk::RiskLimits;
use crate::domain::types::{ClientRecord, Credentials, Venue};
use crate::infrastructure::directory::InMemoryUserDirectory;
use axum::extract::{Json, Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::Router;
use dto::{
    AccountStatusResponse, ApiError, CanTradeResponse, OkResponse, StartMonitoringRequest,
    UpdateLimitsRequest,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub directory: Arc<InMemoryUserDirectory>,
}

/// Build the admin router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/monitoring/start", post(start_monitoring))
        .route("/monitoring/stop/:client_id", post(stop_monitoring))
        .route("/monitoring/status/:client_id", get(monitoring_status))
        .route("/risk/limits/:client_id", put(update_limits))
        .route("/trade/can-trade/:client_id", get(can_trade))
        .layer(cors)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "serverTime": chrono::Utc::now(),
    }))
}

async fn start_monitoring(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartMonitoringRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    if request.client_id.trim().is_empty() {
        return Err(ApiError::invalid_input("clientId must not be empty"));
    }
    if request.initial_balance <= Decimal::ZERO {
        return Err(ApiError::invalid_input("initialBalance must be positive"));
    }
    request.daily_risk.validate().map_err(ApiError::invalid_input)?;
    request.max_risk.validate().map_err(ApiError::invalid_input)?;
    let venue = Venue::from_str(&request.venue)
        .map_err(|e| ApiError::invalid_input(e.to_string()))?;

    // Refuse before touching the directory: a duplicate start must not
    // clobber the live registration.
    if state.coordinator.is_monitoring(&request.client_id).await {
        return Err(EngineError::AlreadyMonitored {
            client_id: request.client_id,
        }
        .into());
    }

    state
        .directory
        .register(
            ClientRecord {
                client_id: request.client_id.clone(),
                venue,
                initial_balance: request.initial_balance,
                daily_risk: request.daily_risk,
                max_risk: request.max_risk,
            },
            Credentials::new(request.api_key, request.api_secret),
        )
        .await;

    if let Err(e) = state.coordinator.start_monitoring(&request.client_id).await {
        // Keep directory and engine views consistent on failure.
        state.directory.remove(&request.client_id).await;
        return Err(e.into());
    }

    info!("AdminApi: Monitoring started for {}", request.client_id);
    Ok(Json(OkResponse::ok()))
}

async fn stop_monitoring(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    state.coordinator.stop_monitoring(&client_id).await?;
    info!("AdminApi: Monitoring stopped for {}", client_id);
    Ok(Json(OkResponse::ok()))
}

async fn monitoring_status(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Result<Json<AccountStatusResponse>, ApiError> {
    let status = state.coordinator.status(&client_id).await?;
    Ok(Json(status.into()))
}

async fn update_limits(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Json(request): Json<UpdateLimitsRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let limits = RiskLimits {
        daily_risk: request.daily_risk,
        max_risk: request.max_risk,
    };
    limits.validate().map_err(ApiError::invalid_input)?;

    state
        .directory
        .update_limits(&client_id, limits)
        .await
        .map_err(|e| ApiError::invalid_input(e.to_string()))?;

    // Limits are fixed for a session epoch; a change means a new session.
    if state.coordinator.is_monitoring(&client_id).await {
        state.coordinator.restart_monitoring(&client_id).await?;
    }

    info!("AdminApi: Limits updated for {}", client_id);
    Ok(Json(OkResponse::ok()))
}

async fn can_trade(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Result<Json<CanTradeResponse>, ApiError> {
    let decision = state.coordinator.can_trade(&client_id).await?;
    Ok(Json(CanTradeResponse {
        can_trade: decision.can_trade,
        reason: decision.reason,
    }))
}
