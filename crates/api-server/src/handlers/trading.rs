//! Manual copy and close handlers.

use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use copytrade_core::types::{CloseReason, Venue};
use trading_engine::FollowerOutcome;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CopySignalRequest {
    pub user_id: Uuid,
    pub size_usdt: Option<Decimal>,
    pub venue: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClosePositionRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ExecutionResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<FollowerOutcome> for ExecutionResponse {
    fn from(outcome: FollowerOutcome) -> Self {
        match outcome {
            FollowerOutcome::Executed { trade_id } => Self {
                status: "executed".into(),
                trade_id: Some(trade_id),
                detail: None,
            },
            FollowerOutcome::RiskRejected { reason } => Self {
                status: "risk_rejected".into(),
                trade_id: None,
                detail: Some(reason),
            },
            FollowerOutcome::Skipped { reason } => Self {
                status: "skipped".into(),
                trade_id: None,
                detail: Some(reason),
            },
            FollowerOutcome::Failed { error } => Self {
                status: "failed".into(),
                trade_id: None,
                detail: Some(error),
            },
        }
    }
}

pub async fn copy_signal(
    State(state): State<AppState>,
    Path(signal_id): Path<Uuid>,
    Json(req): Json<CopySignalRequest>,
) -> ApiResult<Json<ExecutionResponse>> {
    let venue = match req.venue.as_deref() {
        Some(raw) => Some(
            Venue::parse(raw).ok_or_else(|| ApiError::BadRequest(format!("unknown venue {}", raw)))?,
        ),
        None => None,
    };
    let outcome = state
        .engine
        .copy_signal_manually(signal_id, req.user_id, req.size_usdt, venue)
        .await?;
    Ok(Json(outcome.into()))
}

pub async fn close_position(
    State(state): State<AppState>,
    Path(position_id): Path<Uuid>,
    Json(req): Json<ClosePositionRequest>,
) -> ApiResult<Json<ExecutionResponse>> {
    let outcome = state
        .engine
        .close_position(req.user_id, position_id, CloseReason::Manual)
        .await?;
    Ok(Json(outcome.into()))
}
