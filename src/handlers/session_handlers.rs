//! Video session endpoints backed by [`VideoService`].

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    errors::AppError,
    extractors::MaybeAuthUser,
    models::video::VideoUpdate,
    services::{
        auth_service::AuthUser, backend_client::UserRole, video_service::NewVideoFile,
    },
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessions {
    pub files: Vec<NewVideoFile>,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub email: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryBody {
    pub summary: String,
}

/// `POST /api/sessions`: one pending record per announced file.
///
/// The verified caller's identity wins over the body; anonymous uploads
/// fall back to the configured defaults.
pub async fn create_sessions(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Json(body): Json<CreateSessions>,
) -> Result<impl IntoResponse, AppError> {
    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    let (email, name) = match caller.0 {
        Some(user) => (user.email, user.name),
        None => (
            non_empty(body.user_email).unwrap_or_else(|| state.defaults.email.clone()),
            non_empty(body.user_name).unwrap_or_else(|| state.defaults.name.clone()),
        ),
    };

    let videos = state.videos.create_records(body.files, &email, &name).await?;
    Ok(Json(json!({ "status": "created", "videos": videos })))
}

/// `GET /api/sessions?email=&limit=`: the caller's records, newest first.
/// Only admins may list another user's records.
pub async fn list_sessions(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let email = match query.email {
        Some(email) if email != caller.email => {
            caller.require_role(UserRole::Admin)?;
            email
        }
        _ => caller.email.clone(),
    };
    let videos = state.videos.list_for_user(&email, query.limit).await?;
    Ok(Json(json!({ "videos": videos, "count": videos.len() })))
}

/// `GET /api/sessions/{sessionId}`
pub async fn get_session(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.visible_video(caller.0.as_ref(), session_id).await?))
}

/// `PATCH /api/sessions/{sessionId}`: partial update of the caller's record.
///
/// Signature columns are written only by the signing flow.
pub async fn update_session(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(session_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let patch: VideoUpdate = serde_json::from_value(body)
        .map_err(|e| AppError::bad_request(format!("invalid update: {}", e)))?;
    if patch.is_empty() {
        return Err(AppError::bad_request("no fields to update"));
    }
    let managed = patch.signature_fields();
    if !managed.is_empty() {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            format!("{} cannot be set directly", managed.join(", ")),
        ));
    }
    state.visible_video(Some(&caller), session_id).await?;

    let updated_fields = patch.field_names();
    let session = state.videos.update(session_id, patch).await?;

    Ok(Json(json!({
        "success": true,
        "sessionId": session_id,
        "updatedFields": updated_fields,
        "session": session,
    })))
}

/// `PUT /api/sessions/{sessionId}/summary`
pub async fn update_summary(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(session_id): Path<Uuid>,
    Json(body): Json<SummaryBody>,
) -> Result<impl IntoResponse, AppError> {
    let summary = body.summary.trim();
    if summary.is_empty() {
        return Err(AppError::bad_request("summary must not be empty"));
    }
    state.visible_video(Some(&caller), session_id).await?;
    let session = state
        .videos
        .update_summary(session_id, summary.to_string())
        .await?;
    Ok(Json(session))
}
