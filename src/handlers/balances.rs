//! Balance endpoints for the signed-in user

use crate::models::*;
use crate::services::BalanceEngine;
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use uuid::Uuid;

use super::{ok, ApiResult, AppState};

pub async fn list_balances(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<Vec<UserClaimBalance>> {
    ok(BalanceEngine::new(state.store.as_ref())
        .list_balances(user.id)
        .await?)
}

/// Current balance for one claim type, created on first access
pub async fn get_balance(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(claim_type_id): Path<Uuid>,
) -> ApiResult<UserClaimBalance> {
    ok(BalanceEngine::new(state.store.as_ref())
        .get_or_create_balance(user.id, claim_type_id)
        .await?)
}

pub async fn check_claim_amount(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(input): Json<CheckClaimRequest>,
) -> ApiResult<ClaimCheck> {
    ok(BalanceEngine::new(state.store.as_ref())
        .check_claim(user.id, input.claim_type_id, input.amount)
        .await?)
}
