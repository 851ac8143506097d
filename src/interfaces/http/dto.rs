//! Admin control plane wire types.

use crate::domain::account::AccountState;
use crate::domain::errors::EngineError;
use crate::domain::risk::RiskLimit;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMonitoringRequest {
    pub client_id: String,
    pub api_key: String,
    pub api_secret: String,
    pub initial_balance: Decimal,
    pub daily_risk: RiskLimit,
    pub max_risk: RiskLimit,
    pub venue: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLimitsRequest {
    pub daily_risk: RiskLimit,
    pub max_risk: RiskLimit,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub status: &'static str,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { status: "ok" }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanTradeResponse {
    pub can_trade: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Outward projection of an account's monitoring state.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatusResponse {
    pub client_id: String,
    pub venue: String,
    pub status: String,
    pub active: bool,
    pub session_epoch: u64,
    pub initial_balance: Decimal,
    pub daily_start_balance: Decimal,
    pub current_balance: Decimal,
    pub total_pnl: Decimal,
    pub daily_pnl: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_blocked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_block_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permanent_blocked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permanent_block_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_balance_update: Option<DateTime<Utc>>,
    pub daily_reset_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AccountState> for AccountStatusResponse {
    fn from(state: AccountState) -> Self {
        Self {
            venue: state.venue.to_string(),
            status: state.status.to_string(),
            total_pnl: state.total_pnl(),
            daily_pnl: state.daily_pnl(),
            client_id: state.client_id,
            active: state.active,
            session_epoch: state.session_epoch,
            initial_balance: state.initial_balance,
            daily_start_balance: state.daily_start_balance,
            current_balance: state.current_balance,
            daily_blocked_at: state.daily_blocked_at,
            daily_block_reason: state.daily_block_reason,
            permanent_blocked_at: state.permanent_blocked_at,
            permanent_block_reason: state.permanent_block_reason,
            last_balance_update: state.last_balance_update,
            daily_reset_at: state.daily_reset_at,
            updated_at: state.updated_at,
        }
    }
}

/// `{success:false, error, message}` with a status code matching the error
/// kind. Invalid input never mutates state, so 4xx responses are safe to
/// retry after correction.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    success: bool,
    error: &'static str,
    message: String,
}

impl ApiError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "INVALID_INPUT",
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::InvalidInput(message) => Self {
                status: StatusCode::BAD_REQUEST,
                code: "INVALID_INPUT",
                message,
            },
            EngineError::NotMonitored { client_id } => Self {
                status: StatusCode::NOT_FOUND,
                code: "NOT_MONITORED",
                message: format!("client {} is not monitored", client_id),
            },
            EngineError::AlreadyMonitored { client_id } => Self {
                status: StatusCode::CONFLICT,
                code: "ALREADY_MONITORED",
                message: format!("client {} is already being monitored", client_id),
            },
            other => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "INTERNAL",
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            success: false,
            error: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
