//! Middleware for authentication and security headers

use crate::handlers::auth::{client_ip, extract_session_token, hash_token, user_agent};
use crate::handlers::AppState;
use crate::models::User;
use crate::services::AuditContext;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::json;
use std::net::SocketAddr;

fn reject(status: StatusCode, message: &str) -> Response {
    (
        status,
        axum::Json(json!({"success": false, "data": null, "error": message})),
    )
        .into_response()
}

/// Resolves the session and makes `Extension<User>` and
/// `Extension<AuditContext>` available to the handlers behind it.
pub async fn require_user(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = match extract_session_token(request.headers()) {
        Some(t) => t,
        None => return reject(StatusCode::UNAUTHORIZED, "Not authenticated"),
    };

    let session = match state.store.find_session(&hash_token(&token), Utc::now()).await {
        Ok(Some(s)) => s,
        Ok(None) => return reject(StatusCode::UNAUTHORIZED, "Session expired or invalid"),
        Err(e) => {
            tracing::error!("Store error during session validation: {}", e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Authentication error");
        }
    };

    let user = match state.store.get_user(session.user_id).await {
        Ok(Some(u)) => u,
        Ok(None) => return reject(StatusCode::UNAUTHORIZED, "User not found"),
        Err(e) => {
            tracing::error!("Store error fetching session user: {}", e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Authentication error");
        }
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ctx = AuditContext {
        ip_address: client_ip(request.headers(), peer, &state.trusted_proxies),
        user_agent: user_agent(request.headers()),
    };

    request.extensions_mut().insert(user);
    request.extensions_mut().insert(ctx);

    next.run(request).await
}

/// Must run behind [`require_user`]
pub async fn require_admin(request: Request<Body>, next: Next) -> Response {
    match request.extensions().get::<User>() {
        Some(user) if user.is_admin() => next.run(request).await,
        Some(user) => {
            tracing::warn!("Non-admin user {} tried {}", user.email, request.uri().path());
            reject(StatusCode::FORBIDDEN, "Administrator access required")
        }
        None => reject(StatusCode::UNAUTHORIZED, "Not authenticated"),
    }
}

/// Security headers middleware
pub async fn security_headers(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    );
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );

    if state.is_production {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=63072000; includeSubDomains"),
        );
    }

    response
}
