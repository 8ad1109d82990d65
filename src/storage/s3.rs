//! S3-backed [`ObjectStorage`].
//!
//! Works against AWS S3 and S3-compatible services (MinIO, R2) through a
//! custom endpoint with path-style addressing.

use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{Builder, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata},
    presigning::PresigningConfig,
    types::{CompletedMultipartUpload, CompletedPart},
};
use std::time::Duration;
use tracing::debug;

use super::{
    CompletedObject, NewMultipartUpload, ObjectStorage, PresignedPut, SignedRequest, StorageError,
    StorageResult,
};
use crate::models::upload::UploadedPart;

/// S3 connection settings.
#[derive(Clone, Debug)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint URL (MinIO, R2, localstack).
    pub endpoint: Option<String>,
    /// Required by most S3-compatible services.
    pub force_path_style: bool,
}

pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    /// Build a client from the ambient AWS credential chain.
    pub async fn new(config: S3Config) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = Builder::from(&sdk_config).force_path_style(config.force_path_style);
        if let Some(endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self::from_conf(builder.build(), config.bucket)
    }

    /// Wrap an already-built SDK configuration.
    pub fn from_conf(config: aws_sdk_s3::Config, bucket: impl Into<String>) -> Self {
        Self {
            client: Client::from_conf(config),
            bucket: bucket.into(),
        }
    }

    fn presigning(expires_in: Duration) -> StorageResult<PresigningConfig> {
        PresigningConfig::expires_in(expires_in).map_err(|e| StorageError::Presign(e.to_string()))
    }
}

/// Map an SDK failure onto the storage taxonomy using the S3 error code.
fn classify<E>(err: E, upload_id: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    match err.code() {
        Some("NoSuchUpload") => StorageError::NoSuchUpload(upload_id.to_string()),
        Some("InvalidPart" | "InvalidPartOrder" | "EntityTooSmall") => {
            StorageError::InvalidParts(err.message().unwrap_or("rejected").to_string())
        }
        _ => StorageError::Other(DisplayErrorContext(&err).to_string()),
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn create_multipart_upload(&self, upload: &NewMultipartUpload) -> StorageResult<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&upload.key)
            .content_type(&upload.content_type)
            .set_metadata(Some(upload.metadata.clone()))
            .send()
            .await
            .map_err(|e| StorageError::Other(DisplayErrorContext(&e).to_string()))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::Other("storage returned no upload id".into()))
    }

    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let request = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .presigned(Self::presigning(expires_in)?)
            .await
            .map_err(|e| StorageError::Presign(DisplayErrorContext(&e).to_string()))?;

        Ok(request.uri().to_string())
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> StorageResult<CompletedObject> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|p| {
                        CompletedPart::builder()
                            .part_number(p.part_number as i32)
                            .e_tag(&p.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| classify(e, upload_id))?;

        debug!(key, upload_id, "multipart upload assembled");
        Ok(CompletedObject {
            location: output.location().map(str::to_string),
            bucket: output.bucket().unwrap_or(&self.bucket).to_string(),
            key: output.key().unwrap_or(key).to_string(),
            etag: output.e_tag().map(str::to_string),
        })
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| classify(e, upload_id))?;
        Ok(())
    }

    async fn presign_put_object(&self, put: &PresignedPut) -> StorageResult<SignedRequest> {
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&put.key)
            .content_type(&put.content_type)
            .set_content_length(put.content_length.map(|len| len as i64))
            .set_metadata(Some(put.metadata.clone()))
            .presigned(Self::presigning(put.expires_in)?)
            .await
            .map_err(|e| StorageError::Presign(DisplayErrorContext(&e).to_string()))?;

        // Metadata and content headers are signed as headers, not query
        // parameters, so the uploader has to replay them.
        let headers = request
            .headers()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("host"))
            .map(|(name, value)| (name.to_ascii_lowercase(), value.to_string()))
            .collect();

        Ok(SignedRequest {
            url: request.uri().to_string(),
            headers,
        })
    }
}
