//! Multipart upload sessions and the parts stored under them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of a multipart upload session.
///
/// `Initiated -> PartsUploading -> Completing -> Completed`, with `Aborted`
/// reachable from every non-terminal state.
#[derive(sqlx::Type, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Initiated,
    PartsUploading,
    Completing,
    Completed,
    Aborted,
}

impl UploadState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::PartsUploading => "parts_uploading",
            Self::Completing => "completing",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::*;
        match (self, next) {
            (Initiated, PartsUploading) => true,
            (PartsUploading, PartsUploading) => true,
            (Initiated | PartsUploading, Completing) => true,
            (Completing, Completed) => true,
            (from, Aborted) => !from.is_terminal(),
            _ => false,
        }
    }

    /// States from which a transition into `next` is legal.
    pub fn sources_of(next: UploadState) -> Vec<UploadState> {
        [
            Self::Initiated,
            Self::PartsUploading,
            Self::Completing,
            Self::Completed,
            Self::Aborted,
        ]
        .into_iter()
        .filter(|from| from.can_transition_to(next))
        .collect()
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file being uploaded to object storage in parts.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    /// Upload id issued by object storage.
    pub upload_id: String,

    /// Caller-supplied or generated file identifier.
    pub file_id: String,

    /// Object key, `uploads/{user|sessions}/{file_id}/{sanitized name}`.
    pub file_key: String,

    /// Original (unsanitized) file name.
    pub file_name: String,

    /// MIME type declared at initiation.
    pub content_type: String,

    /// Total size in bytes.
    pub file_size: i64,

    /// Size of every part but the last.
    pub part_size: i64,

    /// Number of parts the file is split into.
    pub total_parts: i64,

    /// Verified owner, `None` for anonymous uploads.
    pub user_id: Option<String>,

    /// Video record this upload feeds, if any.
    pub session_id: Option<Uuid>,

    pub state: UploadState,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// A part stored successfully, identified by its 1-based number and ETag.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadedPart {
    #[serde(rename = "PartNumber", alias = "partNumber")]
    pub part_number: u32,

    #[serde(rename = "ETag", alias = "etag")]
    pub etag: String,
}

impl UploadedPart {
    pub fn new(part_number: u32, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            etag: etag.into(),
        }
    }
}
