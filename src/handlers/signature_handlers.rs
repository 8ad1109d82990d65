//! Release-form signature endpoints.

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    errors::AppError, extractors::MaybeAuthUser, models::video::SignatureStatus, state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureBody {
    pub session_id: Uuid,
    pub user_email: String,
    #[serde(default)]
    pub user_name: Option<String>,
}

/// `POST /api/signatures`: email the release form for a session.
pub async fn create_signature(
    State(state): State<AppState>,
    Json(body): Json<SignatureBody>,
) -> Result<impl IntoResponse, AppError> {
    if body.user_email.trim().is_empty() {
        return Err(AppError::bad_request("userEmail is required"));
    }
    let request = state
        .signatures
        .request_signature(body.session_id, &body.user_email, body.user_name.as_deref())
        .await?;

    Ok(Json(json!({
        "success": true,
        "documentId": request.document_id,
        "signingUrl": request.signing_url,
        "emailSent": request.email_sent,
    })))
}

/// `GET /api/signatures/{sessionId}`: refresh and report signature state.
pub async fn signature_status(
    State(state): State<AppState>,
    caller: MaybeAuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.visible_video(caller.0.as_ref(), session_id).await?;
    let check = state.signatures.refresh(session_id).await?;
    let signature_status = if check.is_signed {
        SignatureStatus::Signed
    } else {
        SignatureStatus::Pending
    };

    Ok(Json(json!({
        "documentId": check.document_id,
        "status": check.document.status,
        "signatureStatus": signature_status,
        "recipients": check.document.recipients,
        "completedAt": check.document.completed_at,
        "session": check.session,
    })))
}
