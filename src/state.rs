use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    errors::AppError,
    models::video::VideoRecord,
    services::{
        auth_service::{AuthService, AuthUser},
        backend_client::{BackendClient, UserRole},
        signature_service::SignatureService,
        upload_service::UploadService,
        video_service::{VideoError, VideoService},
    },
};

/// Identity recorded on video records created by anonymous callers.
#[derive(Clone, Debug)]
pub struct UserDefaults {
    pub name: String,
    pub email: String,
}

/// Shared state handed to every handler. All services are cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub uploads: UploadService,
    pub videos: VideoService,
    pub signatures: SignatureService,
    pub auth: AuthService,
    pub backend: BackendClient,
    pub defaults: UserDefaults,
}

impl AppState {
    /// Owners and admins reach a record; anonymous callers only reach
    /// records filed under the default identity.
    pub fn can_access(&self, caller: Option<&AuthUser>, record: &VideoRecord) -> bool {
        match caller {
            Some(user) => user.role == UserRole::Admin || user.email == record.user_email,
            None => record.user_email == self.defaults.email,
        }
    }

    /// Load a video record visible to `caller`. Records belonging to someone
    /// else are reported as missing.
    pub async fn visible_video(
        &self,
        caller: Option<&AuthUser>,
        session_id: Uuid,
    ) -> Result<VideoRecord, AppError> {
        let record = self.videos.get(session_id).await?;
        if !self.can_access(caller, &record) {
            return Err(VideoError::NotFound(session_id).into());
        }
        Ok(record)
    }
}
