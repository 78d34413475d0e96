//! Read-only trade/position views for the UI.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use copytrade_core::db::PortfolioSummary;
use copytrade_core::dlq::DeadLetter;
use copytrade_core::types::{Position, Trade};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TradeListQuery {
    pub limit: Option<i64>,
}

pub async fn list_trades(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<TradeListQuery>,
) -> ApiResult<Json<Vec<Trade>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(state.trades.list_by_user(user_id, limit).await?))
}

pub async fn list_positions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Position>>> {
    Ok(Json(state.positions.list_open_by_user(user_id).await?))
}

pub async fn portfolio(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<PortfolioSummary>> {
    Ok(Json(state.positions.summary_for_user(user_id).await?))
}

pub async fn dead_letters(State(state): State<AppState>) -> Json<Vec<DeadLetter>> {
    Json(state.dlq.list())
}
