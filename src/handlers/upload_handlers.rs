//! Upload endpoints.
//!
//! - `POST /api/upload/multipart` dispatches on the `action` field:
//!   `initiate`, `getPartUrls`, `complete`, `abort`.
//! - `GET /api/upload/multipart/{uploadId}` reports a session's state.
//! - `POST /api/upload/presigned-url` issues a single-shot PUT URL.

use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    errors::AppError,
    extractors::MaybeAuthUser,
    models::upload::UploadedPart,
    services::upload_service::{InitiateUpload, SingleUpload},
    state::AppState,
};

/// Identifies an existing session. Extra fields sent by clients (file name,
/// file id) are ignored: the stored session is authoritative.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    pub upload_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub upload_id: String,
    pub parts: Vec<UploadedPart>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum MultipartAction {
    Initiate(InitiateUpload),
    GetPartUrls(SessionRef),
    Complete(CompleteRequest),
    Abort(SessionRef),
}

/// `POST /api/upload/multipart`
pub async fn multipart(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let action = match body.get("action").and_then(Value::as_str) {
        Some("initiate" | "getPartUrls" | "complete" | "abort") => {
            serde_json::from_value::<MultipartAction>(body)
                .map_err(|e| AppError::bad_request(format!("invalid request: {}", e)))?
        }
        _ => return Err(AppError::bad_request("Invalid action")),
    };
    let user_id = caller.user_id();
    let uploads = &state.uploads;

    let response = match action {
        MultipartAction::Initiate(req) => {
            debug!(file = %req.file_name, size = req.file_size, "initiate");
            if let Some(session_id) = req.session_id {
                state.visible_video(caller.0.as_ref(), session_id).await?;
            }
            Json(uploads.initiate(req, user_id).await?).into_response()
        }
        MultipartAction::GetPartUrls(session) => {
            Json(uploads.part_urls(&session.upload_id, user_id).await?).into_response()
        }
        MultipartAction::Complete(req) => {
            Json(uploads.complete(&req.upload_id, req.parts, user_id).await?).into_response()
        }
        MultipartAction::Abort(session) => {
            uploads.abort(&session.upload_id, user_id).await?;
            Json(json!({ "success": true })).into_response()
        }
    };
    Ok(response)
}

/// `GET /api/upload/multipart/{uploadId}`
pub async fn upload_status(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Path(upload_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.uploads.session(&upload_id, caller.user_id()).await?))
}

/// `POST /api/upload/presigned-url`
pub async fn presigned_url(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Json(req): Json<SingleUpload>,
) -> Result<impl IntoResponse, AppError> {
    let url = state.uploads.presign_single(req, caller.user_id()).await?;
    Ok(Json(url))
}
