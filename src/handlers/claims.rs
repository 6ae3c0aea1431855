//! Claim endpoints for signed-in users

use crate::models::*;
use crate::services::{AdminService, AuditContext, ClaimService, WorkflowView};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use uuid::Uuid;

use super::{created, ok, ApiResult, AppState};

/// Claim types a user can pick from
pub async fn list_claim_types(State(state): State<AppState>) -> ApiResult<Vec<ClaimType>> {
    ok(AdminService::new(state.store.as_ref()).list_claim_types().await?)
}

pub async fn list_claims(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> ApiResult<Vec<Claim>> {
    ok(ClaimService::new(state.store.as_ref()).list_claims(&user).await?)
}

pub async fn create_claim(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(ctx): Extension<AuditContext>,
    Json(input): Json<CreateClaim>,
) -> ApiResult<Claim> {
    let claim = ClaimService::new(state.store.as_ref())
        .create_claim(&user, input, &ctx)
        .await?;
    created(claim)
}

pub async fn get_claim(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> ApiResult<ClaimResponse> {
    ok(ClaimService::new(state.store.as_ref()).get_claim(&user, id).await?)
}

/// Edit a draft
pub async fn update_claim(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(ctx): Extension<AuditContext>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateClaim>,
) -> ApiResult<Claim> {
    ok(ClaimService::new(state.store.as_ref())
        .update_claim(&user, id, input, &ctx)
        .await?)
}

/// Cancel removes a draft or submitted claim outright
pub async fn cancel_claim(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(ctx): Extension<AuditContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    ClaimService::new(state.store.as_ref())
        .cancel_claim(&user, id, &ctx)
        .await?;
    Ok((
        StatusCode::OK,
        Json(ApiResponse::success(()).with_message("Claim cancelled")),
    ))
}

pub async fn transition_claim(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(ctx): Extension<AuditContext>,
    Path(id): Path<Uuid>,
    Json(input): Json<TransitionRequest>,
) -> ApiResult<Claim> {
    ok(ClaimService::new(state.store.as_ref())
        .transition_claim(&user, id, input, &ctx)
        .await?)
}

pub async fn get_workflow(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> ApiResult<WorkflowView> {
    ok(ClaimService::new(state.store.as_ref()).get_workflow(&user, id).await?)
}
