//! Release-form e-signature through the Documenso v1 API.
//!
//! Flow: create a document with one signer, PUT the release-form PDF to the
//! upload URL Documenso hands back, then ask Documenso to email it out. The
//! video record tracks `none -> pending -> signed`.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::Arc};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use super::video_service::{VideoError, VideoService};
use crate::models::video::{SignatureStatus, VideoRecord};

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("e-signature is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("no signature request exists for session `{0}`")]
    NoDocument(Uuid),
    #[error("signature provider returned {status}: {message}")]
    Provider { status: u16, message: String },
    #[error("signature provider unreachable: {0}")]
    Http(#[from] reqwest::Error),
    #[error("release form unreadable: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Video(#[from] VideoError),
}

pub type SignatureResult<T> = Result<T, SignatureError>;

#[derive(Serialize, Clone, Debug)]
pub struct Recipient {
    pub name: String,
    pub email: String,
    pub role: &'static str,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    pub signing_order: &'static str,
}

#[derive(Serialize, Clone, Debug)]
pub struct NewDocument {
    pub title: String,
    pub recipients: Vec<Recipient>,
    pub meta: DocumentMeta,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RecipientInfo {
    pub email: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub signing_url: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreatedDocument {
    pub document_id: i64,
    pub upload_url: String,
    #[serde(default)]
    pub recipients: Vec<RecipientInfo>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RecipientStatus {
    pub email: String,
    pub status: String,
    #[serde(default)]
    pub signed_at: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStatus {
    pub status: String,
    #[serde(default)]
    pub recipients: Vec<RecipientStatus>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl DocumentStatus {
    /// Signed once the document completes or any recipient has signed.
    pub fn is_signed(&self) -> bool {
        self.status == "COMPLETED"
            || self
                .recipients
                .iter()
                .any(|r| r.status == "SIGNED" || r.status == "COMPLETED")
    }
}

#[async_trait]
pub trait SignatureProvider: Send + Sync {
    async fn create_document(&self, document: &NewDocument) -> SignatureResult<CreatedDocument>;
    async fn upload_pdf(&self, upload_url: &str, pdf: Bytes) -> SignatureResult<()>;
    async fn send_document(&self, document_id: i64, send_email: bool) -> SignatureResult<()>;
    async fn document_status(&self, document_id: &str) -> SignatureResult<DocumentStatus>;
}

pub struct DocumensoClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl DocumensoClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/v1{}", self.base_url, endpoint)
    }

    async fn checked(response: reqwest::Response) -> SignatureResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(SignatureError::Provider {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl SignatureProvider for DocumensoClient {
    async fn create_document(&self, document: &NewDocument) -> SignatureResult<CreatedDocument> {
        let response = self
            .http
            .post(self.url("/documents"))
            .bearer_auth(&self.api_key)
            .json(document)
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    async fn upload_pdf(&self, upload_url: &str, pdf: Bytes) -> SignatureResult<()> {
        debug!(size = pdf.len(), "uploading release form");
        let response = self
            .http
            .put(upload_url)
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .body(pdf)
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }

    async fn send_document(&self, document_id: i64, send_email: bool) -> SignatureResult<()> {
        let response = self
            .http
            .post(self.url(&format!("/documents/{}/send", document_id)))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "sendEmail": send_email }))
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }

    async fn document_status(&self, document_id: &str) -> SignatureResult<DocumentStatus> {
        let response = self
            .http
            .get(self.url(&format!("/documents/{}", document_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }
}

/// Outcome of sending a release form.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRequest {
    pub document_id: i64,
    pub signing_url: Option<String>,
    pub email_sent: bool,
}

/// Current signature state of a session.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SignatureCheck {
    pub document_id: String,
    pub is_signed: bool,
    pub document: DocumentStatus,
    pub session: VideoRecord,
}

#[derive(Clone)]
pub struct SignatureService {
    provider: Option<Arc<dyn SignatureProvider>>,
    videos: VideoService,
    release_form: Option<PathBuf>,
}

impl SignatureService {
    pub fn new(
        provider: Option<Arc<dyn SignatureProvider>>,
        videos: VideoService,
        release_form: Option<PathBuf>,
    ) -> Self {
        Self {
            provider,
            videos,
            release_form,
        }
    }

    fn provider(&self) -> SignatureResult<&Arc<dyn SignatureProvider>> {
        self.provider
            .as_ref()
            .ok_or(SignatureError::NotConfigured("no provider API key"))
    }

    /// Send the release form for `session_id` to the signer by email.
    pub async fn request_signature(
        &self,
        session_id: Uuid,
        user_email: &str,
        user_name: Option<&str>,
    ) -> SignatureResult<SignatureRequest> {
        let provider = self.provider()?;
        let path = self
            .release_form
            .as_ref()
            .ok_or(SignatureError::NotConfigured("no release form PDF"))?;

        // Fail on unknown sessions before creating anything remotely.
        self.videos.get(session_id).await?;
        let pdf = Bytes::from(fs::read(path).await?);

        let signer = user_name.filter(|n| !n.trim().is_empty()).unwrap_or("User");
        let document = provider
            .create_document(&NewDocument {
                title: format!("Video Release Form - {}", user_name.unwrap_or(user_email)),
                recipients: vec![Recipient {
                    name: signer.to_string(),
                    email: user_email.to_string(),
                    role: "SIGNER",
                }],
                meta: DocumentMeta {
                    signing_order: "PARALLEL",
                },
            })
            .await?;

        provider.upload_pdf(&document.upload_url, pdf).await?;
        provider.send_document(document.document_id, true).await?;

        self.videos
            .mark_signature(
                session_id,
                SignatureStatus::Pending,
                Some(document.document_id.to_string()),
            )
            .await?;
        info!(%session_id, document_id = document.document_id, "release form sent for signing");

        Ok(SignatureRequest {
            document_id: document.document_id,
            signing_url: document.recipients.first().and_then(|r| r.signing_url.clone()),
            email_sent: true,
        })
    }

    /// Ask the provider for the document state and record a completed signature.
    pub async fn refresh(&self, session_id: Uuid) -> SignatureResult<SignatureCheck> {
        let provider = self.provider()?;
        let record = self.videos.get(session_id).await?;
        let document_id = record
            .signature_document_id
            .clone()
            .ok_or(SignatureError::NoDocument(session_id))?;

        let document = provider.document_status(&document_id).await?;
        let is_signed = document.is_signed();
        let session = if is_signed && record.signature_status != SignatureStatus::Signed {
            info!(%session_id, %document_id, "release form signed");
            self.videos
                .mark_signature(session_id, SignatureStatus::Signed, None)
                .await?
        } else {
            record
        };

        Ok(SignatureCheck {
            document_id,
            is_signed,
            document,
            session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, services::video_service::NewVideoFile};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeProvider {
        calls: Mutex<Vec<String>>,
        status: Mutex<String>,
    }

    #[async_trait]
    impl SignatureProvider for FakeProvider {
        async fn create_document(&self, document: &NewDocument) -> SignatureResult<CreatedDocument> {
            self.calls.lock().unwrap().push(format!("create:{}", document.title));
            Ok(CreatedDocument {
                document_id: 77,
                upload_url: "https://docs.test/upload".into(),
                recipients: vec![RecipientInfo {
                    email: document.recipients[0].email.clone(),
                    status: Some("PENDING".into()),
                    signing_url: Some("https://docs.test/sign/77".into()),
                }],
            })
        }

        async fn upload_pdf(&self, _upload_url: &str, pdf: Bytes) -> SignatureResult<()> {
            self.calls.lock().unwrap().push(format!("upload:{}", pdf.len()));
            Ok(())
        }

        async fn send_document(&self, document_id: i64, _send_email: bool) -> SignatureResult<()> {
            self.calls.lock().unwrap().push(format!("send:{document_id}"));
            Ok(())
        }

        async fn document_status(&self, _document_id: &str) -> SignatureResult<DocumentStatus> {
            Ok(DocumentStatus {
                status: self.status.lock().unwrap().clone(),
                recipients: vec![],
                completed_at: None,
            })
        }
    }

    async fn setup(release_form: Option<PathBuf>) -> (SignatureService, Arc<FakeProvider>, VideoService, Uuid) {
        let pool = Arc::new(db::memory_pool().await.unwrap());
        let videos = VideoService::new(pool, "videos");
        let record = videos
            .create_records(
                vec![NewVideoFile {
                    name: "a.mp4".into(),
                    size: 1,
                    content_type: "video/mp4".into(),
                }],
                "s@example.com",
                "Sam",
            )
            .await
            .unwrap()
            .remove(0);
        let provider = Arc::new(FakeProvider::default());
        *provider.status.lock().unwrap() = "PENDING".into();
        let service = SignatureService::new(Some(provider.clone()), videos.clone(), release_form);
        (service, provider, videos, record.session_id)
    }

    fn release_form_file() -> PathBuf {
        let path = std::env::temp_dir().join(format!("release-{}.pdf", Uuid::new_v4()));
        std::fs::write(&path, b"%PDF-1.4 test").unwrap();
        path
    }

    #[tokio::test]
    async fn request_runs_create_upload_send_in_order() {
        let form = release_form_file();
        let (service, provider, videos, session_id) = setup(Some(form.clone())).await;

        let request = service
            .request_signature(session_id, "s@example.com", Some("Sam"))
            .await
            .unwrap();
        assert_eq!(request.document_id, 77);
        assert_eq!(request.signing_url.as_deref(), Some("https://docs.test/sign/77"));

        assert_eq!(
            *provider.calls.lock().unwrap(),
            vec![
                "create:Video Release Form - Sam".to_string(),
                "upload:13".to_string(),
                "send:77".to_string(),
            ]
        );
        let record = videos.get(session_id).await.unwrap();
        assert_eq!(record.signature_status, SignatureStatus::Pending);
        assert_eq!(record.signature_document_id.as_deref(), Some("77"));
        let _ = std::fs::remove_file(form);
    }

    #[tokio::test]
    async fn refresh_marks_completed_documents_signed() {
        let form = release_form_file();
        let (service, provider, _videos, session_id) = setup(Some(form.clone())).await;
        service
            .request_signature(session_id, "s@example.com", None)
            .await
            .unwrap();

        let check = service.refresh(session_id).await.unwrap();
        assert!(!check.is_signed);
        assert_eq!(check.session.signature_status, SignatureStatus::Pending);

        *provider.status.lock().unwrap() = "COMPLETED".into();
        let check = service.refresh(session_id).await.unwrap();
        assert!(check.is_signed);
        assert_eq!(check.session.signature_status, SignatureStatus::Signed);
        assert!(check.session.release_form_signed_at.is_some());
        let _ = std::fs::remove_file(form);
    }

    #[tokio::test]
    async fn refresh_without_request_is_reported() {
        let (service, _, _, session_id) = setup(None).await;
        let err = service.refresh(session_id).await.unwrap_err();
        assert!(matches!(err, SignatureError::NoDocument(id) if id == session_id));
    }

    #[tokio::test]
    async fn unknown_sessions_never_reach_the_provider() {
        let form = release_form_file();
        let (service, provider, _, _) = setup(Some(form.clone())).await;
        let err = service
            .request_signature(Uuid::new_v4(), "s@example.com", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SignatureError::Video(VideoError::NotFound(_))));
        assert!(provider.calls.lock().unwrap().is_empty());
        let _ = std::fs::remove_file(form);
    }

    #[test]
    fn recipient_signature_counts_as_signed() {
        let status: DocumentStatus = serde_json::from_str(
            r#"{"id":"1","title":"t","status":"PENDING",
                "recipients":[{"id":"9","email":"a@b.c","role":"SIGNER","status":"SIGNED"}]}"#,
        )
        .unwrap();
        assert!(status.is_signed());
    }
}
