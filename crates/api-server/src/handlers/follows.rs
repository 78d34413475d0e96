//! Follow management handlers.

use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use copytrade_core::types::WhaleFollow;
use risk_manager::TierLimits;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FollowRequest {
    pub user_id: Uuid,
    pub whale_id: Uuid,
    #[serde(default)]
    pub auto_copy_enabled: Option<bool>,
    pub trade_size_usdt: Option<Decimal>,
    pub trade_size_percent: Option<Decimal>,
    pub leverage_override: Option<u32>,
    #[serde(default)]
    pub copy_whale_leverage: bool,
    pub stop_loss_percent: Option<Decimal>,
    pub take_profit_percent: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct FollowResponse {
    pub user_id: Uuid,
    pub whale_id: Uuid,
    pub active: bool,
}

pub async fn follow(
    State(state): State<AppState>,
    Json(req): Json<FollowRequest>,
) -> ApiResult<Json<FollowResponse>> {
    let user = state
        .users
        .get(req.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {}", req.user_id)))?;
    state
        .whales
        .get(req.whale_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("whale {}", req.whale_id)))?;

    let limits = TierLimits::for_tier(user.effective_tier());
    let following = state.follows.count_active_by_user(req.user_id).await?;
    let already = state.follows.get(req.user_id, req.whale_id).await?;
    if already.as_ref().map(|f| f.active) != Some(true)
        && following >= limits.max_followed_whales as i64
    {
        return Err(ApiError::Conflict(format!(
            "tier allows following at most {} whales",
            limits.max_followed_whales
        )));
    }

    let mut follow = already.unwrap_or_else(|| WhaleFollow::new(req.user_id, req.whale_id));
    follow.active = true;
    apply_request(&mut follow, &req);
    state.follows.upsert(&follow).await?;

    Ok(Json(FollowResponse {
        user_id: follow.user_id,
        whale_id: follow.whale_id,
        active: true,
    }))
}

pub async fn update_follow(
    State(state): State<AppState>,
    Json(req): Json<FollowRequest>,
) -> ApiResult<Json<FollowResponse>> {
    let mut follow = state
        .follows
        .get(req.user_id, req.whale_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("follow".into()))?;
    apply_request(&mut follow, &req);
    state.follows.upsert(&follow).await?;

    Ok(Json(FollowResponse {
        user_id: follow.user_id,
        whale_id: follow.whale_id,
        active: follow.active,
    }))
}

pub async fn unfollow(
    State(state): State<AppState>,
    Path((user_id, whale_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<FollowResponse>> {
    let removed = state.follows.deactivate(user_id, whale_id).await?;
    if !removed {
        return Err(ApiError::NotFound("follow".into()));
    }
    Ok(Json(FollowResponse {
        user_id,
        whale_id,
        active: false,
    }))
}

pub async fn list_follows(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Vec<WhaleFollow>>> {
    Ok(Json(state.follows.list_by_user(user_id).await?))
}

fn apply_request(follow: &mut WhaleFollow, req: &FollowRequest) {
    if let Some(auto_copy) = req.auto_copy_enabled {
        follow.auto_copy_enabled = auto_copy;
    }
    follow.trade_size_usdt = req.trade_size_usdt;
    follow.trade_size_percent = req.trade_size_percent;
    follow.leverage_override = req.leverage_override;
    follow.copy_whale_leverage = req.copy_whale_leverage;
    follow.stop_loss_percent = req.stop_loss_percent;
    follow.take_profit_percent = req.take_profit_percent;
}
