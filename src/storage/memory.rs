//! In-memory [`ObjectStorage`] used by tests.

use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use super::{
    CompletedObject, NewMultipartUpload, ObjectStorage, PresignedPut, SignedRequest, StorageError,
    StorageResult,
};
use crate::models::upload::UploadedPart;

#[derive(Debug, Clone)]
pub struct OpenUpload {
    pub key: String,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

/// Records every call; parts are accepted when their ETag is `etag-{n}`.
#[derive(Default)]
pub struct MemoryStorage {
    pub uploads: Mutex<HashMap<String, OpenUpload>>,
    pub completed: Mutex<Vec<(String, Vec<UploadedPart>)>>,
    pub aborted: Mutex<Vec<String>>,
    pub mutating_calls: AtomicUsize,
    next_id: AtomicUsize,
    complete_failure: Mutex<Option<StorageError>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mutating_calls(&self) -> usize {
        self.mutating_calls.load(Ordering::SeqCst)
    }

    /// Make the next complete call fail with `err`, leaving the upload open.
    pub fn fail_next_complete(&self, err: StorageError) {
        *self.complete_failure.lock().unwrap() = Some(err);
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    fn bucket(&self) -> &str {
        "test-bucket"
    }

    async fn create_multipart_upload(&self, upload: &NewMultipartUpload) -> StorageResult<String> {
        self.mutating_calls.fetch_add(1, Ordering::SeqCst);
        let id = format!("upload-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.uploads.lock().unwrap().insert(
            id.clone(),
            OpenUpload {
                key: upload.key.clone(),
                content_type: upload.content_type.clone(),
                metadata: upload.metadata.clone(),
            },
        );
        Ok(id)
    }

    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> StorageResult<String> {
        Ok(format!(
            "https://storage.test/{key}?uploadId={upload_id}&partNumber={part_number}&expires={}",
            expires_in.as_secs()
        ))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> StorageResult<CompletedObject> {
        self.mutating_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.complete_failure.lock().unwrap().take() {
            return Err(err);
        }
        let open = self
            .uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| StorageError::NoSuchUpload(upload_id.to_string()))?;
        if let Some(bad) = parts
            .iter()
            .find(|p| p.etag != format!("etag-{}", p.part_number))
        {
            self.uploads
                .lock()
                .unwrap()
                .insert(upload_id.to_string(), open);
            return Err(StorageError::InvalidParts(format!(
                "part {} has unexpected etag",
                bad.part_number
            )));
        }
        self.completed
            .lock()
            .unwrap()
            .push((upload_id.to_string(), parts.to_vec()));
        Ok(CompletedObject {
            location: Some(format!("https://storage.test/{key}")),
            bucket: self.bucket().to_string(),
            key: key.to_string(),
            etag: Some(format!("\"final-{}\"", parts.len())),
        })
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> StorageResult<()> {
        self.mutating_calls.fetch_add(1, Ordering::SeqCst);
        self.uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| StorageError::NoSuchUpload(upload_id.to_string()))?;
        self.aborted.lock().unwrap().push(upload_id.to_string());
        Ok(())
    }

    async fn presign_put_object(&self, put: &PresignedPut) -> StorageResult<SignedRequest> {
        let mut headers: HashMap<String, String> = put
            .metadata
            .iter()
            .map(|(k, v)| (format!("x-amz-meta-{k}"), v.clone()))
            .collect();
        headers.insert("content-type".into(), put.content_type.clone());
        if let Some(len) = put.content_length {
            headers.insert("content-length".into(), len.to_string());
        }
        Ok(SignedRequest {
            url: format!(
                "https://storage.test/{}?expires={}",
                put.key,
                put.expires_in.as_secs()
            ),
            headers,
        })
    }
}
