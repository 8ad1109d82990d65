//! VideoService: the single store for video records.

use chrono::Utc;
use serde::Deserialize;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite, types::Json};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::video::{SignatureStatus, UploadStatus, VideoRecord, VideoUpdate};

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 200;

const COLUMNS: &str = "session_id, video_id, video_name, user_name, user_email, s3_key, \
     s3_bucket, file_size, content_type, upload_status, signature_status, \
     signature_document_id, video_summary, summary_added_at, release_form_signed_at, \
     files, created_at, updated_at, uploaded_at";

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("video session `{0}` not found")]
    NotFound(Uuid),
    #[error("invalid video request: {0}")]
    Invalid(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type VideoResult<T> = Result<T, VideoError>;

/// A file announced before upload.
#[derive(Clone, Debug, Deserialize)]
pub struct NewVideoFile {
    pub name: String,
    pub size: i64,
    #[serde(rename = "type")]
    pub content_type: String,
}

#[derive(Clone)]
pub struct VideoService {
    db: Arc<SqlitePool>,
    bucket: String,
}

impl VideoService {
    pub fn new(db: Arc<SqlitePool>, bucket: impl Into<String>) -> Self {
        Self {
            db,
            bucket: bucket.into(),
        }
    }

    /// Create one `pending` record per file, each with fresh ids.
    pub async fn create_records(
        &self,
        files: Vec<NewVideoFile>,
        user_email: &str,
        user_name: &str,
    ) -> VideoResult<Vec<VideoRecord>> {
        if files.is_empty() {
            return Err(VideoError::Invalid("files must not be empty".into()));
        }
        if let Some(bad) = files.iter().find(|f| f.name.trim().is_empty() || f.size < 0) {
            return Err(VideoError::Invalid(format!(
                "file `{}` needs a name and a non-negative size",
                bad.name
            )));
        }

        let mut tx = self.db.begin().await?;
        let mut records = Vec::with_capacity(files.len());
        for file in files {
            let now = Utc::now();
            let record = sqlx::query_as::<_, VideoRecord>(&format!(
                "INSERT INTO video_sessions (
                    session_id, video_id, video_name, user_name, user_email, s3_key,
                    s3_bucket, file_size, content_type, upload_status, signature_status,
                    created_at, updated_at, uploaded_at
                 ) VALUES (?, ?, ?, ?, ?, '', ?, ?, ?, ?, ?, ?, ?, ?)
                 RETURNING {COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(Uuid::new_v4())
            .bind(&file.name)
            .bind(user_name)
            .bind(user_email)
            .bind(&self.bucket)
            .bind(file.size)
            .bind(&file.content_type)
            .bind(UploadStatus::Pending)
            .bind(SignatureStatus::None)
            .bind(now)
            .bind(now)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
            records.push(record);
        }
        tx.commit().await?;

        info!(count = records.len(), %user_email, "created video records");
        Ok(records)
    }

    pub async fn get(&self, session_id: Uuid) -> VideoResult<VideoRecord> {
        sqlx::query_as::<_, VideoRecord>(&format!(
            "SELECT {COLUMNS} FROM video_sessions WHERE session_id = ?"
        ))
        .bind(session_id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(VideoError::NotFound(session_id))
    }

    /// Apply a partial update. `updated_at` is always refreshed.
    pub async fn update(&self, session_id: Uuid, patch: VideoUpdate) -> VideoResult<VideoRecord> {
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE video_sessions SET updated_at = ");
        builder.push_bind(Utc::now());

        macro_rules! set {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = patch.$field {
                    builder.push(concat!(", ", stringify!($field), " = "));
                    builder.push_bind(value);
                })*
            };
        }
        set!(
            video_name,
            user_name,
            user_email,
            s3_key,
            file_size,
            content_type,
            upload_status,
            signature_status,
            signature_document_id,
            video_summary,
            summary_added_at,
            release_form_signed_at,
            uploaded_at,
        );
        if let Some(files) = patch.files {
            builder.push(", files = ");
            builder.push_bind(Json(files));
        }

        builder.push(" WHERE session_id = ");
        builder.push_bind(session_id);
        builder.push(format!(" RETURNING {COLUMNS}"));

        let record = builder
            .build_query_as::<VideoRecord>()
            .fetch_optional(&*self.db)
            .await?
            .ok_or(VideoError::NotFound(session_id))?;
        debug!(%session_id, "updated video record");
        Ok(record)
    }

    pub async fn update_summary(&self, session_id: Uuid, summary: String) -> VideoResult<VideoRecord> {
        self.update(
            session_id,
            VideoUpdate {
                video_summary: Some(summary),
                summary_added_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
    }

    /// Records uploaded by `user_email`, newest first.
    pub async fn list_for_user(&self, user_email: &str, limit: Option<i64>) -> VideoResult<Vec<VideoRecord>> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let records = sqlx::query_as::<_, VideoRecord>(&format!(
            "SELECT {COLUMNS} FROM video_sessions
             WHERE user_email = ?
             ORDER BY created_at DESC
             LIMIT ?"
        ))
        .bind(user_email)
        .bind(limit)
        .fetch_all(&*self.db)
        .await?;
        Ok(records)
    }

    /// Record the outcome of an upload; a completed upload also stores its key.
    pub async fn mark_upload(
        &self,
        session_id: Uuid,
        status: UploadStatus,
        s3_key: Option<&str>,
    ) -> VideoResult<VideoRecord> {
        let now = Utc::now();
        self.update(
            session_id,
            VideoUpdate {
                upload_status: Some(status),
                s3_key: s3_key.map(str::to_string),
                uploaded_at: (status == UploadStatus::Completed).then_some(now),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn mark_signature(
        &self,
        session_id: Uuid,
        status: SignatureStatus,
        document_id: Option<String>,
    ) -> VideoResult<VideoRecord> {
        self.update(
            session_id,
            VideoUpdate {
                signature_status: Some(status),
                signature_document_id: document_id,
                release_form_signed_at: (status == SignatureStatus::Signed).then(Utc::now),
                ..Default::default()
            },
        )
        .await
    }
}
