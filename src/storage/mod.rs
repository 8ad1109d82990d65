//! Object-storage abstraction used by the upload service.
//!
//! The service never talks to S3 directly; it goes through [`ObjectStorage`]
//! so the composition root decides which backend is wired in.

use async_trait::async_trait;
use std::{collections::HashMap, time::Duration};
use thiserror::Error;

use crate::models::upload::UploadedPart;

#[cfg(test)]
pub mod memory;
pub mod s3;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The upload id is unknown to storage (never created, completed or aborted).
    #[error("upload `{0}` not found")]
    NoSuchUpload(String),
    /// Storage refused to assemble the object from the given parts.
    #[error("invalid part list: {0}")]
    InvalidParts(String),
    #[error("presigning failed: {0}")]
    Presign(String),
    #[error("storage error: {0}")]
    Other(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Parameters of a create-multipart-upload call.
#[derive(Clone, Debug)]
pub struct NewMultipartUpload {
    pub key: String,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

/// Parameters of a single-object presigned PUT.
#[derive(Clone, Debug)]
pub struct PresignedPut {
    pub key: String,
    pub content_type: String,
    pub content_length: Option<u64>,
    pub metadata: HashMap<String, String>,
    pub expires_in: Duration,
}

/// A presigned request: the URL plus every header the signature covers.
///
/// The caller must send `headers` verbatim or storage rejects the request.
/// `host` is omitted; HTTP clients derive it from the URL.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignedRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
}

/// Object assembled by a completed multipart upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedObject {
    pub location: Option<String>,
    pub bucket: String,
    pub key: String,
    pub etag: Option<String>,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Bucket every key is resolved against.
    fn bucket(&self) -> &str;

    /// Open a multipart upload and return the storage-issued upload id.
    async fn create_multipart_upload(&self, upload: &NewMultipartUpload) -> StorageResult<String>;

    /// Presign a PUT for one part. Has no side effects on storage.
    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Assemble the object from parts, which must be sorted by part number.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> StorageResult<CompletedObject>;

    /// Release the upload and discard any stored parts.
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> StorageResult<()>;

    /// Presign a single-shot PUT of a whole object.
    async fn presign_put_object(&self, put: &PresignedPut) -> StorageResult<SignedRequest>;
}
