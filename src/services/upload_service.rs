//! UploadService: multipart upload orchestration.
//!
//! Session state lives in SQLite (`multipart_uploads`) and every state change
//! is a conditional `UPDATE ... WHERE state IN (...)`, so two racing requests
//! cannot both move the same session. Object bytes never pass through this
//! service: clients PUT parts straight to storage with presigned URLs.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    upload_plan::{PartPlan, UPLOAD_URL_EXPIRY, object_key},
    video_service::VideoService,
};
use crate::{
    models::{
        upload::{UploadSession, UploadState, UploadedPart},
        video::UploadStatus,
    },
    storage::{NewMultipartUpload, ObjectStorage, PresignedPut, StorageError},
};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("file of {file_size} bytes is below the multipart threshold of {threshold} bytes")]
    TooSmallForMultipart { file_size: u64, threshold: u64 },
    #[error("file of {file_size} bytes exceeds the multipart limit of {limit} bytes")]
    TooLargeForMultipart { file_size: u64, limit: u64 },
    /// Non-2xx response or missing ETag for one part. Retryable per part.
    #[error("part {part_number} failed: {reason}")]
    PartUploadFailed { part_number: u32, reason: String },
    /// Single-shot PUT of a whole file was refused or never arrived.
    #[error("upload of whole object failed: {0}")]
    ObjectUploadFailed(String),
    /// Storage cannot assemble the object. The session must be aborted.
    #[error("upload `{upload_id}` cannot be completed: {reason}")]
    CompletionMismatch { upload_id: String, reason: String },
    #[error("upload session `{0}` not found")]
    SessionNotFound(String),
    #[error("upload session `{upload_id}` is already {state}")]
    SessionClosed { upload_id: String, state: UploadState },
    #[error("invalid upload request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUpload {
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub file_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InitiatedUpload {
    pub upload_id: String,
    pub file_key: String,
    pub file_id: String,
    pub part_size: u64,
    pub total_parts: u32,
    pub expires_in: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartUrl {
    pub part_number: u32,
    pub presigned_url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartUrls {
    pub part_urls: Vec<PartUrl>,
    pub part_size: u64,
    pub total_parts: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletedUpload {
    pub location: Option<String>,
    pub bucket: String,
    pub key: String,
    pub etag: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleUpload {
    pub file_name: String,
    pub file_type: String,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub file_id: Option<String>,
    /// Precomputed object key; overrides the key convention when non-empty.
    #[serde(default)]
    pub s3_key: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleUploadUrl {
    pub presigned_url: String,
    /// Headers covered by the signature; the PUT must send all of them.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub file_key: String,
    pub file_id: String,
    pub expires_in: u64,
}

#[derive(Clone)]
pub struct UploadService {
    db: Arc<SqlitePool>,
    storage: Arc<dyn ObjectStorage>,
    videos: VideoService,
}

impl UploadService {
    pub fn new(db: Arc<SqlitePool>, storage: Arc<dyn ObjectStorage>, videos: VideoService) -> Self {
        Self {
            db,
            storage,
            videos,
        }
    }

    pub fn bucket(&self) -> &str {
        self.storage.bucket()
    }

    /// Open a multipart upload for a file of at least the multipart threshold.
    pub async fn initiate(
        &self,
        req: InitiateUpload,
        user_id: Option<&str>,
    ) -> UploadResult<InitiatedUpload> {
        ensure_named(&req.file_name, &req.file_type)?;
        let plan = PartPlan::for_file_size(req.file_size)?;

        let file_id = req
            .file_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let file_key = object_key(user_id, &file_id, &req.file_name);

        let mut metadata = base_metadata(&req.file_name, &file_id, user_id);
        metadata.insert(
            "session-id".into(),
            req.session_id.map(|id| id.to_string()).unwrap_or_default(),
        );
        metadata.insert("file-size".into(), req.file_size.to_string());
        metadata.insert("part-size".into(), plan.part_size.to_string());
        metadata.insert("total-parts".into(), plan.total_parts.to_string());

        let upload_id = self
            .storage
            .create_multipart_upload(&NewMultipartUpload {
                key: file_key.clone(),
                content_type: req.file_type.clone(),
                metadata,
            })
            .await?;

        let now = Utc::now();
        let insert = sqlx::query(
            "INSERT INTO multipart_uploads (
                upload_id, file_id, file_key, file_name, content_type, file_size,
                part_size, total_parts, user_id, session_id, state, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&upload_id)
        .bind(&file_id)
        .bind(&file_key)
        .bind(&req.file_name)
        .bind(&req.file_type)
        .bind(plan.file_size as i64)
        .bind(plan.part_size as i64)
        .bind(i64::from(plan.total_parts))
        .bind(user_id)
        .bind(req.session_id)
        .bind(UploadState::Initiated)
        .bind(now)
        .bind(now)
        .execute(&*self.db)
        .await;

        if let Err(err) = insert {
            // Nothing tracks the storage session without its row.
            if let Err(abort_err) = self.storage.abort_multipart_upload(&file_key, &upload_id).await {
                warn!(%upload_id, "failed to abort untracked upload: {}", abort_err);
            }
            return Err(err.into());
        }

        info!(
            %upload_id,
            %file_key,
            %file_id,
            part_size = plan.part_size,
            total_parts = plan.total_parts,
            "multipart upload initiated"
        );

        Ok(InitiatedUpload {
            upload_id,
            file_key,
            file_id,
            part_size: plan.part_size,
            total_parts: plan.total_parts,
            expires_in: UPLOAD_URL_EXPIRY.as_secs(),
        })
    }

    /// Issue one presigned URL per part.
    ///
    /// Idempotent: storage is not touched besides presigning, and the plan is
    /// recomputed from the recorded file size so repeated calls agree.
    pub async fn part_urls(&self, upload_id: &str, user_id: Option<&str>) -> UploadResult<PartUrls> {
        let session = self.fetch_session(upload_id, user_id).await?;
        if !session.state.can_transition_to(UploadState::PartsUploading) {
            return Err(UploadError::SessionClosed {
                upload_id: upload_id.to_string(),
                state: session.state,
            });
        }

        let plan = PartPlan::for_file_size(session.file_size as u64)?;
        let file_key = object_key(
            session.user_id.as_deref(),
            &session.file_id,
            &session.file_name,
        );
        debug_assert_eq!(file_key, session.file_key);

        let mut part_urls = Vec::with_capacity(plan.total_parts as usize);
        for part_number in 1..=plan.total_parts {
            let presigned_url = self
                .storage
                .presign_upload_part(&file_key, upload_id, part_number, UPLOAD_URL_EXPIRY)
                .await?;
            part_urls.push(PartUrl {
                part_number,
                presigned_url,
            });
        }

        self.transition(upload_id, UploadState::PartsUploading)
            .await?;
        debug!(%upload_id, count = part_urls.len(), "issued part URLs");

        Ok(PartUrls {
            part_urls,
            part_size: plan.part_size,
            total_parts: plan.total_parts,
        })
    }

    /// Assemble the object from the uploaded parts.
    ///
    /// Parts may arrive in any order; they are sorted ascending before being
    /// checked against `1..=total_parts` and submitted.
    pub async fn complete(
        &self,
        upload_id: &str,
        mut parts: Vec<UploadedPart>,
        user_id: Option<&str>,
    ) -> UploadResult<CompletedUpload> {
        let session = self.fetch_session(upload_id, user_id).await?;
        if !session.state.can_transition_to(UploadState::Completing) {
            return Err(UploadError::SessionClosed {
                upload_id: upload_id.to_string(),
                state: session.state,
            });
        }

        parts.sort_by_key(|p| p.part_number);
        check_part_list(upload_id, &parts, session.total_parts as u32)?;

        self.transition(upload_id, UploadState::Completing).await?;

        let completed = match self
            .storage
            .complete_multipart_upload(&session.file_key, upload_id, &parts)
            .await
        {
            Ok(completed) => completed,
            Err(StorageError::InvalidParts(reason)) => {
                warn!(%upload_id, "storage rejected part list: {}", reason);
                self.mark_video(&session, UploadStatus::Failed).await;
                return Err(UploadError::CompletionMismatch {
                    upload_id: upload_id.to_string(),
                    reason,
                });
            }
            Err(StorageError::NoSuchUpload(_)) => {
                warn!(%upload_id, "storage no longer knows the upload, closing session");
                self.transition(upload_id, UploadState::Aborted).await?;
                self.mark_video(&session, UploadStatus::Failed).await;
                return Err(UploadError::SessionNotFound(upload_id.to_string()));
            }
            Err(err) => {
                self.release_completion(upload_id, session.state).await;
                return Err(err.into());
            }
        };

        self.transition(upload_id, UploadState::Completed).await?;
        self.mark_video(&session, UploadStatus::Completed).await;
        info!(%upload_id, key = %completed.key, parts = parts.len(), "multipart upload completed");

        Ok(CompletedUpload {
            location: completed.location,
            bucket: completed.bucket,
            key: completed.key,
            etag: completed.etag,
        })
    }

    /// Release the storage session and discard any stored parts.
    pub async fn abort(&self, upload_id: &str, user_id: Option<&str>) -> UploadResult<()> {
        let session = self.fetch_session(upload_id, user_id).await?;
        if session.state.is_terminal() {
            return Err(UploadError::SessionClosed {
                upload_id: upload_id.to_string(),
                state: session.state,
            });
        }

        match self
            .storage
            .abort_multipart_upload(&session.file_key, upload_id)
            .await
        {
            Ok(()) => {}
            // Already gone at storage; only local bookkeeping remains.
            Err(StorageError::NoSuchUpload(_)) => {
                warn!(%upload_id, "storage has no record of upload being aborted");
            }
            Err(err) => return Err(err.into()),
        }

        self.transition(upload_id, UploadState::Aborted).await?;
        self.mark_video(&session, UploadStatus::Failed).await;
        info!(%upload_id, "multipart upload aborted");
        Ok(())
    }

    /// Current record of an upload session.
    pub async fn session(&self, upload_id: &str, user_id: Option<&str>) -> UploadResult<UploadSession> {
        self.fetch_session(upload_id, user_id).await
    }

    /// Presigned PUT for uploading a whole file in one request.
    pub async fn presign_single(
        &self,
        req: SingleUpload,
        user_id: Option<&str>,
    ) -> UploadResult<SingleUploadUrl> {
        ensure_named(&req.file_name, &req.file_type)?;

        let file_id = req
            .file_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let file_key = match req.s3_key.filter(|key| !key.is_empty()) {
            Some(key) => key,
            None => object_key(user_id, &file_id, &req.file_name),
        };

        let mut metadata = base_metadata(&req.file_name, &file_id, user_id);
        if let Some(size) = req.file_size {
            metadata.insert("file-size".into(), size.to_string());
        }

        let signed = self
            .storage
            .presign_put_object(&PresignedPut {
                key: file_key.clone(),
                content_type: req.file_type,
                content_length: req.file_size,
                metadata,
                expires_in: UPLOAD_URL_EXPIRY,
            })
            .await?;

        debug!(%file_key, %file_id, "issued single-shot upload URL");
        Ok(SingleUploadUrl {
            presigned_url: signed.url,
            headers: signed.headers,
            file_key,
            file_id,
            expires_in: UPLOAD_URL_EXPIRY.as_secs(),
        })
    }

    /// Load a session visible to `user_id`.
    ///
    /// Sessions owned by someone else are reported as missing.
    async fn fetch_session(&self, upload_id: &str, user_id: Option<&str>) -> UploadResult<UploadSession> {
        let session = sqlx::query_as::<_, UploadSession>(
            "SELECT upload_id, file_id, file_key, file_name, content_type, file_size,
                    part_size, total_parts, user_id, session_id, state, created_at, updated_at
             FROM multipart_uploads WHERE upload_id = ?",
        )
        .bind(upload_id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| UploadError::SessionNotFound(upload_id.to_string()))?;

        if session.user_id.as_deref() != user_id {
            return Err(UploadError::SessionNotFound(upload_id.to_string()));
        }
        Ok(session)
    }

    /// Move a session into `next` if its current state allows it.
    async fn transition(&self, upload_id: &str, next: UploadState) -> UploadResult<()> {
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE multipart_uploads SET state = ");
        builder.push_bind(next);
        builder.push(", updated_at = ");
        builder.push_bind(Utc::now());
        builder.push(" WHERE upload_id = ");
        builder.push_bind(upload_id);
        builder.push(" AND state IN (");
        let mut sources = builder.separated(", ");
        for from in UploadState::sources_of(next) {
            sources.push_bind(from);
        }
        sources.push_unseparated(")");

        let result = builder.build().execute(&*self.db).await?;
        if result.rows_affected() == 0 {
            let state = sqlx::query_scalar::<_, UploadState>(
                "SELECT state FROM multipart_uploads WHERE upload_id = ?",
            )
            .bind(upload_id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| UploadError::SessionNotFound(upload_id.to_string()))?;
            return Err(UploadError::SessionClosed {
                upload_id: upload_id.to_string(),
                state,
            });
        }
        Ok(())
    }

    /// Return a `completing` session to `previous` so completion can be retried.
    async fn release_completion(&self, upload_id: &str, previous: UploadState) {
        let released = sqlx::query(
            "UPDATE multipart_uploads SET state = ?, updated_at = ?
             WHERE upload_id = ? AND state = ?",
        )
        .bind(previous)
        .bind(Utc::now())
        .bind(upload_id)
        .bind(UploadState::Completing)
        .execute(&*self.db)
        .await;
        if let Err(err) = released {
            warn!(%upload_id, "could not reopen session after failed completion: {}", err);
        }
    }

    /// Mirror the upload outcome onto the linked video record, if any.
    async fn mark_video(&self, session: &UploadSession, status: UploadStatus) {
        let Some(session_id) = session.session_id else {
            return;
        };
        let key = (status == UploadStatus::Completed).then_some(session.file_key.as_str());
        if let Err(err) = self.videos.mark_upload(session_id, status, key).await {
            warn!(%session_id, upload_id = %session.upload_id, "could not update video record: {}", err);
        }
    }
}

fn ensure_named(file_name: &str, file_type: &str) -> UploadResult<()> {
    if file_name.trim().is_empty() || file_type.trim().is_empty() {
        return Err(UploadError::InvalidRequest(
            "fileName and fileType are required".into(),
        ));
    }
    Ok(())
}

fn base_metadata(file_name: &str, file_id: &str, user_id: Option<&str>) -> HashMap<String, String> {
    HashMap::from([
        ("original-name".to_string(), file_name.to_string()),
        ("file-id".to_string(), file_id.to_string()),
        (
            "user-id".to_string(),
            user_id.unwrap_or("anonymous").to_string(),
        ),
        (
            "upload-timestamp".to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        ),
    ])
}

/// Sorted parts must be exactly `1..=total_parts`, each with a tag.
fn check_part_list(upload_id: &str, parts: &[UploadedPart], total_parts: u32) -> UploadResult<()> {
    let mismatch = |reason: String| UploadError::CompletionMismatch {
        upload_id: upload_id.to_string(),
        reason,
    };

    for (index, part) in parts.iter().enumerate() {
        let expected = index as u32 + 1;
        if part.part_number != expected {
            return Err(mismatch(if part.part_number < expected {
                format!("part {} listed more than once", part.part_number)
            } else {
                format!("part {} is missing", expected)
            }));
        }
        if part.etag.trim().is_empty() {
            return Err(mismatch(format!("part {} has no ETag", part.part_number)));
        }
    }
    if parts.len() as u32 != total_parts {
        return Err(mismatch(format!(
            "expected {} parts, got {}",
            total_parts,
            parts.len()
        )));
    }
    Ok(())
}
