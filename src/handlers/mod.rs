//! HTTP request handlers

pub mod admin;
pub mod auth;
pub mod balances;
pub mod claims;
pub mod middleware;

use crate::db::ClaimStore;
use crate::error::CoreError;
use crate::models::ApiResponse;
use axum::{
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ClaimStore>,
    pub session_expiry_hours: u64,
    pub is_production: bool,
    /// Trusted proxy IP prefixes for X-Forwarded-For validation
    pub trusted_proxies: Vec<String>,
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), CoreError>;

pub(crate) fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

pub(crate) fn created<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::success(data))))
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::BalanceExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::Database(_) | CoreError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if self.is_business_failure() {
            self.to_string()
        } else {
            tracing::error!("Request failed: {}", self);
            "Internal server error".to_string()
        };

        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}

/// All `/api` routes with their auth layers applied
pub fn router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/claim-types",
            get(admin::list_claim_types).post(admin::create_claim_type),
        )
        .route("/claim-types/:id/limit", put(admin::update_claim_type_limit))
        .route("/groups", get(admin::list_groups).post(admin::create_group))
        .route(
            "/groups/:id/permissions",
            put(admin::set_group_permissions),
        )
        .route(
            "/groups/:id/approval-levels",
            get(admin::list_approval_levels).post(admin::create_approval_level),
        )
        .route(
            "/groups/:id/approval-levels/order",
            put(admin::reorder_approval_levels),
        )
        .route(
            "/approval-levels/:id",
            put(admin::update_approval_level).delete(admin::delete_approval_level),
        )
        .route("/users", post(admin::create_user))
        .route("/users/:id/group", put(admin::assign_group))
        .route("/users/:id/overrides", put(admin::set_user_overrides))
        .route("/users/:id/balances", get(admin::list_user_balances))
        .route("/balances", put(admin::adjust_balance))
        .layer(from_fn(middleware::require_admin));

    let user_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/claim-types", get(claims::list_claim_types))
        .route("/claims", get(claims::list_claims).post(claims::create_claim))
        .route(
            "/claims/:id",
            get(claims::get_claim)
                .put(claims::update_claim)
                .delete(claims::cancel_claim),
        )
        .route("/claims/:id/transition", post(claims::transition_claim))
        .route("/claims/:id/workflow", get(claims::get_workflow))
        .route("/balances", get(balances::list_balances))
        .route("/balances/check", post(balances::check_claim_amount))
        .route("/balances/:claim_type_id", get(balances::get_balance))
        .nest("/admin", admin_routes)
        .layer(from_fn_with_state(state.clone(), middleware::require_user));

    let api = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .merge(user_routes);

    Router::new()
        .nest("/api", api)
        .layer(from_fn_with_state(state.clone(), middleware::security_headers))
        .with_state(state)
}
