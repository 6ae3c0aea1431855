//! Authentication handlers

use crate::error::{CoreError, CoreResult};
use crate::models::*;
use crate::services::audit::{entity, log_audit, AuditAction, AuditRecord};
use crate::services::AuditContext;
use crate::validation::validate_login;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use uuid::Uuid;

use super::{ok, ApiResult, AppState};
use crate::db::ClaimStore;

/// Session cookie name
pub const SESSION_COOKIE: &str = "hrcs_session";

const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Rate limit: max login attempts per IP per hour
pub const MAX_LOGIN_ATTEMPTS: i64 = 10;

// =============================================================================
// Login / Logout
// =============================================================================

pub async fn login(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(input): Json<LoginRequest>,
) -> Result<Response, CoreError> {
    let ctx = AuditContext {
        ip_address: client_ip(&headers, peer.map(|ConnectInfo(a)| a), &state.trusted_proxies),
        user_agent: user_agent(&headers),
    };

    let attempt_ip = ctx.ip_address.as_deref().unwrap_or("unknown");
    let attempted_at = Utc::now();
    if !check_rate_limit(state.store.as_ref(), attempt_ip, attempted_at).await {
        tracing::warn!("Login rate limit reached for {}", attempt_ip);
        return Ok((
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiResponse::<()>::error(
                "Too many login attempts. Please try again later.",
            )),
        )
            .into_response());
    }
    record_attempt(state.store.as_ref(), attempt_ip, attempted_at).await;

    validate_login(&input.email, &input.password)?;

    let email = input.email.trim().to_lowercase();
    let user = match state.store.find_user_by_email(&email).await? {
        Some(u) => u,
        None => {
            tracing::info!("Login failed for unknown email");
            return Ok(unauthorized(INVALID_CREDENTIALS));
        }
    };

    let parsed_hash = match PasswordHash::new(&user.password_hash) {
        Ok(h) => h,
        Err(_) => {
            tracing::error!("Invalid password hash stored for user {}", user.email);
            return Err(CoreError::Persistence("Authentication error".to_string()));
        }
    };

    if Argon2::default()
        .verify_password(input.password.as_bytes(), &parsed_hash)
        .is_err()
    {
        tracing::info!("Login failed for {}", user.email);
        return Ok(unauthorized(INVALID_CREDENTIALS));
    }

    let token = generate_session_token();
    let now = Utc::now();
    let expires_at = now + Duration::hours(state.session_expiry_hours as i64);

    state
        .store
        .insert_session(Session {
            id: Uuid::new_v4(),
            user_id: user.id,
            token_hash: hash_token(&token),
            expires_at,
            created_at: now,
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
        })
        .await?;

    tracing::info!("User {} logged in", user.email);
    log_audit(
        state.store.as_ref(),
        &ctx,
        AuditRecord::new(AuditAction::Login, entity::USER, Some(user.id)).by(user.id),
    )
    .await;

    let cookie = session_cookie(&token, state.session_expiry_hours * 3600, state.is_production);
    let body = LoginResponse {
        token,
        expires_at,
        user: UserResponse::from(user),
    };

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(ApiResponse::success(body)),
    )
        .into_response())
}

/// Drops the session behind the presented token, if any, and clears the cookie
pub async fn logout(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, CoreError> {
    if let Some(token) = extract_session_token(&headers) {
        if let Some(session) = state.store.delete_session(&hash_token(&token)).await? {
            let ctx = AuditContext {
                ip_address: client_ip(&headers, peer.map(|ConnectInfo(a)| a), &state.trusted_proxies),
                user_agent: user_agent(&headers),
            };
            log_audit(
                state.store.as_ref(),
                &ctx,
                AuditRecord::new(AuditAction::Logout, entity::USER, Some(session.user_id))
                    .by(session.user_id),
            )
            .await;
        }
    }

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, session_cookie("", 0, state.is_production))],
        Json(ApiResponse::success(())),
    )
        .into_response())
}

pub async fn me(Extension(user): Extension<User>) -> ApiResult<UserResponse> {
    ok(UserResponse::from(user))
}

/// Whether `ip` still has login attempts left this hour. A failing
/// lookup lets the attempt through.
async fn check_rate_limit(store: &dyn ClaimStore, ip: &str, now: DateTime<Utc>) -> bool {
    match store.count_login_attempts(ip, now - Duration::hours(1)).await {
        Ok(count) => count < MAX_LOGIN_ATTEMPTS,
        Err(e) => {
            tracing::warn!("Login attempt lookup failed: {}", e);
            true
        }
    }
}

async fn record_attempt(store: &dyn ClaimStore, ip: &str, now: DateTime<Utc>) {
    if let Err(e) = store.record_login_attempt(ip, now).await {
        tracing::warn!("Failed to record login attempt: {}", e);
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::<()>::error(message)),
    )
        .into_response()
}

fn session_cookie(token: &str, max_age_secs: u64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
        SESSION_COOKIE, token, max_age_secs
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

// =============================================================================
// Password Utilities
// =============================================================================

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Create the first administrator when the email is not taken yet
pub async fn bootstrap_admin(store: &dyn ClaimStore, email: &str, password: &str) -> CoreResult<()> {
    let email = email.trim().to_lowercase();
    if store.find_user_by_email(&email).await?.is_some() {
        return Ok(());
    }

    let password_hash =
        hash_password(password).map_err(|e| CoreError::Persistence(e.to_string()))?;
    let now = Utc::now();
    store
        .insert_user(User {
            id: Uuid::new_v4(),
            email: email.clone(),
            password_hash,
            first_name: "System".to_string(),
            last_name: "Administrator".to_string(),
            role: UserRole::Admin,
            user_group_id: None,
            created_at: now,
            updated_at: now,
        })
        .await?;

    tracing::info!("Created administrator account {}", email);
    Ok(())
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Session token from the cookie, or from an `Authorization: Bearer` header
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(cookie_header) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        for cookie in cookie_header.split(';') {
            if let Some(value) = cookie.trim().strip_prefix(&format!("{}=", SESSION_COOKIE)) {
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }

    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn generate_session_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

/// Sessions store only the SHA-256 of the token
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Client address for audit rows. Forwarding headers count only when the
/// direct peer is one of the trusted proxies.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &[String],
) -> Option<String> {
    let peer_ip = peer?.ip().to_string();
    let trusted = trusted_proxies
        .iter()
        .any(|prefix| !prefix.is_empty() && peer_ip.starts_with(prefix.as_str()));
    if !trusted {
        return Some(peer_ip);
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty());

    Some(forwarded.unwrap_or(peer_ip))
}

pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.chars().take(500).collect())
}
