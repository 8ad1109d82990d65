//! Upload client that drives a running server's upload API.

pub mod uploader;

use reqwest::StatusCode;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::services::{
    upload_plan::{MIN_MULTIPART_SIZE, PartPlan},
    upload_service::{CompletedUpload, InitiatedUpload, PartUrls, SingleUploadUrl, UploadError},
};
use uploader::{ByteProgress, FileSource, HttpTransport, MultipartUploader, put_single};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("server returned {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("{count} part(s) failed, upload aborted: {first}")]
    PartsFailed { count: usize, first: UploadError },
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// What ended up in storage.
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub file_key: String,
    pub file_size: u64,
    pub multipart: bool,
}

pub struct UploadClient {
    http: reqwest::Client,
    server: String,
    token: Option<String>,
    uploader: MultipartUploader,
}

impl UploadClient {
    pub fn new(http: reqwest::Client, server: impl Into<String>, token: Option<String>) -> Self {
        let uploader = MultipartUploader::new(Arc::new(HttpTransport::new(http.clone())));
        Self {
            http,
            server: server.into().trim_end_matches('/').to_string(),
            token,
            uploader,
        }
    }

    /// Upload one file, choosing the multipart path at or above the threshold.
    pub async fn upload_file(&self, path: &Path, content_type: &str) -> ClientResult<UploadReport> {
        let file_size = tokio::fs::metadata(path).await?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        if file_size >= MIN_MULTIPART_SIZE {
            self.upload_multipart(path, &file_name, file_size, content_type)
                .await
        } else {
            self.upload_single(path, &file_name, file_size, content_type)
                .await
        }
    }

    async fn upload_multipart(
        &self,
        path: &Path,
        file_name: &str,
        file_size: u64,
        content_type: &str,
    ) -> ClientResult<UploadReport> {
        let plan = PartPlan::for_file_size(file_size)?;
        let initiated: InitiatedUpload = self
            .multipart(json!({
                "action": "initiate",
                "fileName": file_name,
                "fileType": content_type,
                "fileSize": file_size,
            }))
            .await?;
        info!(
            upload_id = %initiated.upload_id,
            parts = initiated.total_parts,
            part_size = initiated.part_size,
            "multipart upload initiated"
        );

        let session = json!({
            "uploadId": initiated.upload_id,
            "fileName": file_name,
            "fileSize": file_size,
            "fileId": initiated.file_id,
        });
        let urls: PartUrls = self.multipart(with_action(&session, "getPartUrls")).await?;

        let source = FileSource::new(path);
        let outcome = self
            .uploader
            .upload_parts(&source, &plan, &urls.part_urls, &|done, total| {
                info!("uploaded part {}/{}", done, total);
            })
            .await;

        let failed_parts = outcome.failed_parts();
        let count = outcome.failed.len();
        if let Some(first) = outcome.failed.into_iter().next() {
            warn!(failed = ?failed_parts, "aborting multipart upload");
            if let Err(err) = self
                .multipart::<Value>(with_action(&session, "abort"))
                .await
            {
                warn!("abort failed: {}", err);
            }
            return Err(ClientError::PartsFailed { count, first });
        }

        let mut complete = with_action(&session, "complete");
        complete["parts"] = json!(outcome.uploaded);
        let completed: CompletedUpload = self.multipart(complete).await?;
        info!(key = %completed.key, "multipart upload complete");

        Ok(UploadReport {
            file_key: completed.key,
            file_size,
            multipart: true,
        })
    }

    async fn upload_single(
        &self,
        path: &Path,
        file_name: &str,
        file_size: u64,
        content_type: &str,
    ) -> ClientResult<UploadReport> {
        let url: SingleUploadUrl = self
            .post(
                "/api/upload/presigned-url",
                &json!({
                    "fileName": file_name,
                    "fileType": content_type,
                    "fileSize": file_size,
                }),
            )
            .await?;

        let progress: ByteProgress = Arc::new(|sent, total| {
            if total > 0 {
                info!("uploaded {:.1}%", sent as f64 * 100.0 / total as f64);
            }
        });
        put_single(
            &self.http,
            &url.presigned_url,
            &url.headers,
            path,
            content_type,
            progress,
        )
        .await?;
        info!(key = %url.file_key, "upload complete");

        Ok(UploadReport {
            file_key: url.file_key,
            file_size,
            multipart: false,
        })
    }

    async fn multipart<T: DeserializeOwned>(&self, body: Value) -> ClientResult<T> {
        self.post("/api/upload/multipart", &body).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> ClientResult<T> {
        let mut request = self.http.post(format!("{}{}", self.server, path)).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(text);
            return Err(ClientError::Api { status, message });
        }
        Ok(response.json().await?)
    }
}

fn with_action(session: &Value, action: &str) -> Value {
    let mut body = session.clone();
    body["action"] = Value::from(action);
    body
}

/// Entry point for the `upload` subcommand.
pub async fn run(
    server: &str,
    token: Option<String>,
    path: PathBuf,
    content_type: Option<String>,
) -> anyhow::Result<()> {
    let content_type = content_type.unwrap_or_else(|| guess_content_type(&path).to_string());
    let client = UploadClient::new(reqwest::Client::new(), server, token);
    let report = client.upload_file(&path, &content_type).await?;
    info!(
        key = %report.file_key,
        size = report.file_size,
        multipart = report.multipart,
        "done"
    );
    Ok(())
}

fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("mp4" | "m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(guess_content_type(Path::new("a/b/clip.MP4")), "video/mp4");
        assert_eq!(guess_content_type(Path::new("clip.mov")), "video/quicktime");
        assert_eq!(guess_content_type(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn actions_reuse_the_session_fields() {
        let session = json!({"uploadId": "u-1", "fileName": "a.mp4"});
        let body = with_action(&session, "abort");
        assert_eq!(body["action"], "abort");
        assert_eq!(body["uploadId"], "u-1");
        assert!(session.get("action").is_none());
    }
}
