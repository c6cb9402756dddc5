//! Dashboard login gate.
//!
//! Sessions are stateless tokens of the form `user.issued_at.signature`,
//! where the signature is the HMAC-SHA256 hex digest of `user.issued_at`
//! under the configured session secret.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, warn};

use super::handlers::AppState;
use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "session";

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn sign(secret: &str, payload: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Issue a session token for `user` at `issued_at` (Unix seconds).
pub fn issue_session_token(secret: &str, user: &str, issued_at: u64) -> Option<String> {
    let payload = format!("{}.{}", user, issued_at);
    let signature = sign(secret, &payload)?;
    Some(format!("{}.{}", payload, signature))
}

/// Verify a session token and return its user.
///
/// Fails on a bad signature, a malformed token, or an age above
/// `max_age_seconds`.
pub fn verify_session_token(
    secret: &str,
    token: &str,
    max_age_seconds: u64,
    now: u64,
) -> Option<String> {
    let mut parts = token.rsplitn(3, '.');
    let signature = parts.next()?;
    let issued_at_raw = parts.next()?;
    let user = parts.next()?;

    if secret.is_empty() || user.is_empty() || signature.is_empty() {
        return None;
    }

    let issued_at: u64 = match issued_at_raw.parse() {
        Ok(t) => t,
        Err(_) => {
            warn!(issued_at = %issued_at_raw, "session_invalid_timestamp");
            return None;
        }
    };

    let expected = sign(secret, &format!("{}.{}", user, issued_at_raw))?;
    if !constant_time_compare(&expected, signature) {
        warn!("session_signature_mismatch");
        return None;
    }

    // Tokens from the future are as suspect as stale ones.
    let age = now.abs_diff(issued_at);
    if age > max_age_seconds {
        info!(age_seconds = age, max_age_seconds = max_age_seconds, "session_expired");
        return None;
    }

    Some(user.to_string())
}

/// Constant-time string comparison to prevent timing attacks.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Find the session token in the cookie or bearer authorization header.
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|v| v.trim().to_string())
    })
}

/// Middleware rejecting dashboard requests without a valid session.
pub async fn require_session(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(secret) = state.config.session_secret.as_deref() else {
        return next.run(request).await;
    };

    let user = extract_session_token(request.headers()).and_then(|token| {
        verify_session_token(
            secret,
            &token,
            state.config.session_max_age_secs,
            now_secs(),
        )
    });

    match user {
        Some(_) => next.run(request).await,
        None => {
            warn!(path = %request.uri().path(), "session_required");
            ApiError::Unauthorized.into_response()
        }
    }
}

// =============================================================================
// Login / Logout
// =============================================================================

/// Login form.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Login response.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn credentials_match(state: &AppState, username: &str, password: &str) -> bool {
    match (
        state.config.dashboard_username.as_deref(),
        state.config.dashboard_password.as_deref(),
    ) {
        (Some(expected_user), Some(expected_password)) => {
            // Evaluate both comparisons so timing does not reveal which failed.
            let user_ok = constant_time_compare(expected_user, username);
            let password_ok = constant_time_compare(expected_password, password);
            user_ok & password_ok
        }
        _ => false,
    }
}

/// Login endpoint. Sets the session cookie on success.
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(form) = body.map_err(|e| ApiError::Validation(e.body_text()))?;

    let Some(secret) = state.config.session_secret.as_deref() else {
        return Ok(Json(LoginResponse {
            status: "gate_disabled",
            token: None,
        })
        .into_response());
    };

    if !credentials_match(&state, &form.username, &form.password) {
        warn!(username = %form.username, "login_rejected");
        return Err(ApiError::Unauthorized);
    }

    let token = issue_session_token(secret, &form.username, now_secs())
        .ok_or(ApiError::Unauthorized)?;

    let cookie = format!(
        "{}={}; HttpOnly; Path=/; Max-Age={}; SameSite=Lax",
        SESSION_COOKIE, token, state.config.session_max_age_secs
    );
    let cookie = HeaderValue::from_str(&cookie).map_err(|_| ApiError::Unauthorized)?;

    info!(username = %form.username, "login_succeeded");

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(LoginResponse {
            status: "ok",
            token: Some(token),
        }),
    )
        .into_response())
}

/// Logout endpoint. Clears the session cookie.
pub async fn logout() -> Response {
    let cookie = format!("{}=; HttpOnly; Path=/; Max-Age=0; SameSite=Lax", SESSION_COOKIE);
    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(LoginResponse {
            status: "logged_out",
            token: None,
        }),
    )
        .into_response()
}
