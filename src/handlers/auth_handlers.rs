//! Login, logout and current-user endpoints.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, header},
    response::IntoResponse,
};
use serde_json::json;

use crate::{
    errors::AppError,
    extractors::{AUTH_COOKIE, request_token},
    services::{
        auth_service::{AuthUser, TOKEN_TTL_DAYS},
        backend_client::LoginRequest,
    },
    state::AppState,
};

fn cookie(value: &str, max_age: i64) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(&format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        AUTH_COOKIE, value, max_age
    ))
    .map_err(|e| AppError::internal(format!("invalid cookie: {}", e)))
}

/// `POST /api/auth/login`
pub async fn login(
    State(state): State<AppState>,
    Json(credentials): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.login(&credentials).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        cookie(&user.token, TOKEN_TTL_DAYS * 24 * 60 * 60)?,
    );
    let body = json!({
        "success": true,
        "accessToken": &user.token,
        "user": user,
    });
    Ok((headers, Json(body)))
}

/// `POST /api/auth/logout`: forget the token and clear the cookie.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    if let Some(token) = request_token(&headers) {
        state.auth.logout(&token).await?;
    }
    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::SET_COOKIE, cookie("", 0)?);
    Ok((response_headers, Json(json!({ "success": true }))))
}

/// `GET /api/auth/me`
pub async fn me(user: AuthUser) -> impl IntoResponse {
    Json(user)
}
