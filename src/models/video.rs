//! The video record: one uploaded video and its workflow status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use uuid::Uuid;

#[derive(sqlx::Type, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

#[derive(sqlx::Type, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SignatureStatus {
    #[default]
    None,
    Pending,
    Signed,
}

/// A file attached to a video session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SessionFile {
    pub name: String,
    pub size: i64,
    #[serde(rename = "type")]
    pub content_type: String,
}

/// One uploaded video, keyed by its session id.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub session_id: Uuid,
    pub video_id: Uuid,
    pub video_name: String,
    pub user_name: String,
    pub user_email: String,

    /// Object key; empty until the upload completes.
    pub s3_key: String,
    pub s3_bucket: String,
    pub file_size: i64,
    pub content_type: String,
    pub upload_status: UploadStatus,
    pub signature_status: SignatureStatus,

    /// Document id at the e-signature provider once a release form was sent.
    pub signature_document_id: Option<String>,
    pub video_summary: Option<String>,
    pub summary_added_at: Option<DateTime<Utc>>,
    pub release_form_signed_at: Option<DateTime<Utc>>,
    pub files: Option<Json<Vec<SessionFile>>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub uploaded_at: DateTime<Utc>,
}

/// Partial update of a [`VideoRecord`]. `None` leaves a column untouched.
#[derive(Deserialize, Default, Clone, Debug)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VideoUpdate {
    pub video_name: Option<String>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub s3_key: Option<String>,
    pub file_size: Option<i64>,
    pub content_type: Option<String>,
    pub upload_status: Option<UploadStatus>,
    pub signature_status: Option<SignatureStatus>,
    pub signature_document_id: Option<String>,
    pub video_summary: Option<String>,
    pub summary_added_at: Option<DateTime<Utc>>,
    pub release_form_signed_at: Option<DateTime<Utc>>,
    pub files: Option<Vec<SessionFile>>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl VideoUpdate {
    /// Names of the fields this patch sets, in column order.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        macro_rules! collect {
            ($($field:ident => $name:literal),* $(,)?) => {
                $(if self.$field.is_some() { names.push($name); })*
            };
        }
        collect!(
            video_name => "videoName",
            user_name => "userName",
            user_email => "userEmail",
            s3_key => "s3Key",
            file_size => "fileSize",
            content_type => "contentType",
            upload_status => "uploadStatus",
            signature_status => "signatureStatus",
            signature_document_id => "signatureDocumentId",
            video_summary => "videoSummary",
            summary_added_at => "summaryAddedAt",
            release_form_signed_at => "releaseFormSignedAt",
            files => "files",
            uploaded_at => "uploadedAt",
        );
        names
    }

    pub fn is_empty(&self) -> bool {
        self.field_names().is_empty()
    }

    /// Fields set by this patch that only the signing flow may write.
    pub fn signature_fields(&self) -> Vec<&'static str> {
        self.field_names()
            .into_iter()
            .filter(|name| SIGNATURE_FIELDS.contains(name))
            .collect()
    }
}

/// Columns owned by the release-form signing flow.
const SIGNATURE_FIELDS: [&str; 3] = [
    "signatureStatus",
    "signatureDocumentId",
    "releaseFormSignedAt",
];
