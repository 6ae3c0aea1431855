//! Administrator endpoints
//!
//! Everything here sits behind `require_user` and `require_admin`, so the
//! acting `User` extension is always an administrator.

use crate::models::*;
use crate::services::{AdminService, ApprovalLevelAdmin, AuditContext, OverrideAdmin};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use uuid::Uuid;

use super::{created, ok, ApiResult, AppState};

// =============================================================================
// Claim types
// =============================================================================

pub async fn list_claim_types(State(state): State<AppState>) -> ApiResult<Vec<ClaimType>> {
    ok(AdminService::new(state.store.as_ref()).list_claim_types().await?)
}

pub async fn create_claim_type(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Extension(ctx): Extension<AuditContext>,
    Json(input): Json<CreateClaimType>,
) -> ApiResult<ClaimType> {
    created(
        AdminService::new(state.store.as_ref())
            .create_claim_type(&admin, input, &ctx)
            .await?,
    )
}

pub async fn update_claim_type_limit(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Extension(ctx): Extension<AuditContext>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateClaimTypeLimit>,
) -> ApiResult<ClaimType> {
    ok(AdminService::new(state.store.as_ref())
        .update_claim_type_limit(&admin, id, input, &ctx)
        .await?)
}

// =============================================================================
// Users, groups and membership
// =============================================================================

pub async fn list_groups(State(state): State<AppState>) -> ApiResult<Vec<UserGroup>> {
    ok(AdminService::new(state.store.as_ref()).list_groups().await?)
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Extension(ctx): Extension<AuditContext>,
    Json(input): Json<CreateUserGroup>,
) -> ApiResult<UserGroup> {
    created(
        AdminService::new(state.store.as_ref())
            .create_group(&admin, input, &ctx)
            .await?,
    )
}

/// Register an account for an employee
pub async fn create_user(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Extension(ctx): Extension<AuditContext>,
    Json(input): Json<CreateUser>,
) -> ApiResult<UserResponse> {
    let user = AdminService::new(state.store.as_ref())
        .create_user(&admin, input, &ctx)
        .await?;
    created(UserResponse::from(user))
}

pub async fn assign_group(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Extension(ctx): Extension<AuditContext>,
    Path(user_id): Path<Uuid>,
    Json(input): Json<AssignGroupRequest>,
) -> ApiResult<UserResponse> {
    let user = AdminService::new(state.store.as_ref())
        .assign_group(&admin, user_id, input.user_group_id, &ctx)
        .await?;
    ok(UserResponse::from(user))
}

// =============================================================================
// Overrides
// =============================================================================

pub async fn set_group_permissions(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Extension(ctx): Extension<AuditContext>,
    Path(group_id): Path<Uuid>,
    Json(entries): Json<Vec<OverrideEntry>>,
) -> ApiResult<Vec<UserGroupClaimType>> {
    ok(OverrideAdmin::new(state.store.as_ref())
        .set_group_permissions(&admin, group_id, entries, &ctx)
        .await?)
}

pub async fn set_user_overrides(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Extension(ctx): Extension<AuditContext>,
    Path(user_id): Path<Uuid>,
    Json(entries): Json<Vec<OverrideEntry>>,
) -> ApiResult<Vec<UserClaimType>> {
    ok(OverrideAdmin::new(state.store.as_ref())
        .set_user_overrides(&admin, user_id, entries, &ctx)
        .await?)
}

// =============================================================================
// Approval levels
// =============================================================================

pub async fn list_approval_levels(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> ApiResult<Vec<ApprovalLevel>> {
    ok(ApprovalLevelAdmin::new(state.store.as_ref())
        .list(group_id)
        .await?)
}

pub async fn create_approval_level(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Extension(ctx): Extension<AuditContext>,
    Path(group_id): Path<Uuid>,
    Json(input): Json<CreateApprovalLevel>,
) -> ApiResult<ApprovalLevel> {
    created(
        ApprovalLevelAdmin::new(state.store.as_ref())
            .create(&admin, group_id, input, &ctx)
            .await?,
    )
}

pub async fn update_approval_level(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Extension(ctx): Extension<AuditContext>,
    Path(level_id): Path<Uuid>,
    Json(input): Json<UpdateApprovalLevel>,
) -> ApiResult<ApprovalLevel> {
    ok(ApprovalLevelAdmin::new(state.store.as_ref())
        .update(&admin, level_id, input, &ctx)
        .await?)
}

pub async fn delete_approval_level(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Extension(ctx): Extension<AuditContext>,
    Path(level_id): Path<Uuid>,
) -> ApiResult<()> {
    ApprovalLevelAdmin::new(state.store.as_ref())
        .delete(&admin, level_id, &ctx)
        .await?;
    Ok((
        StatusCode::OK,
        Json(ApiResponse::success(()).with_message("Approval level deleted")),
    ))
}

pub async fn reorder_approval_levels(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Extension(ctx): Extension<AuditContext>,
    Path(group_id): Path<Uuid>,
    Json(orders): Json<Vec<LevelOrder>>,
) -> ApiResult<Vec<ApprovalLevel>> {
    ok(ApprovalLevelAdmin::new(state.store.as_ref())
        .reorder(&admin, group_id, orders, &ctx)
        .await?)
}

// =============================================================================
// Balances
// =============================================================================

pub async fn list_user_balances(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Vec<UserClaimBalance>> {
    ok(AdminService::new(state.store.as_ref())
        .list_user_balances(user_id)
        .await?)
}

pub async fn adjust_balance(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    Extension(ctx): Extension<AuditContext>,
    Json(input): Json<AdjustBalanceRequest>,
) -> ApiResult<UserClaimBalance> {
    ok(AdminService::new(state.store.as_ref())
        .adjust_balance(&admin, input, &ctx)
        .await?)
}
