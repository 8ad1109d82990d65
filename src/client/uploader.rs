//! Client-side transfer of file bytes to presigned URLs.
//!
//! Parts go out in batches of at most [`MAX_CONCURRENT_PARTS`]; a batch is
//! awaited in full before the next one starts. A failed part never cancels
//! its siblings: the outcome lists what succeeded and what failed, and the
//! caller decides whether to retry those parts or abort the session.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, future::join_all};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderMap, HeaderName, HeaderValue};
use std::{
    collections::HashMap,
    io::{self, SeekFrom},
    ops::Range,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::{
    models::upload::UploadedPart,
    services::{
        upload_plan::{MAX_CONCURRENT_PARTS, PartPlan},
        upload_service::{PartUrl, UploadError},
    },
};

/// Random access to the bytes being uploaded.
#[async_trait]
pub trait PartSource: Send + Sync {
    async fn read_range(&self, range: Range<u64>) -> io::Result<Bytes>;
}

#[async_trait]
impl PartSource for Bytes {
    async fn read_range(&self, range: Range<u64>) -> io::Result<Bytes> {
        let end = usize::try_from(range.end).map_err(io::Error::other)?;
        let start = usize::try_from(range.start).map_err(io::Error::other)?;
        if end > self.len() || start > end {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {:?} outside {} bytes", range, self.len()),
            ));
        }
        Ok(self.slice(start..end))
    }
}

/// A file on disk, reopened for every part so parts can be read concurrently.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PartSource for FileSource {
    async fn read_range(&self, range: Range<u64>) -> io::Result<Bytes> {
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(range.start)).await?;
        let len = usize::try_from(range.end - range.start).map_err(io::Error::other)?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// Puts one part body to its presigned URL and returns the ETag.
#[async_trait]
pub trait PartTransport: Send + Sync {
    async fn put_part(&self, part_number: u32, url: &str, body: Bytes) -> Result<String, UploadError>;
}

pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl PartTransport for HttpTransport {
    async fn put_part(&self, part_number: u32, url: &str, body: Bytes) -> Result<String, UploadError> {
        let failed = |reason: String| UploadError::PartUploadFailed {
            part_number,
            reason,
        };
        let response = self
            .http
            .put(url)
            .body(body)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("storage returned {}", status)));
        }
        response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| failed("response carried no ETag".into()))
    }
}

/// Result of one pass over a set of parts.
#[derive(Debug, Default)]
pub struct PartsOutcome {
    /// Successful parts, ascending by part number.
    pub uploaded: Vec<UploadedPart>,
    pub failed: Vec<UploadError>,
}

impl PartsOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_parts(&self) -> Vec<u32> {
        self.failed
            .iter()
            .filter_map(|e| match e {
                UploadError::PartUploadFailed { part_number, .. } => Some(*part_number),
                _ => None,
            })
            .collect()
    }
}

/// Called with `(completed_parts, total_parts)` after every finished part.
pub type PartProgress<'a> = &'a (dyn Fn(u32, u32) + Send + Sync);

#[derive(Clone)]
pub struct MultipartUploader {
    transport: Arc<dyn PartTransport>,
    max_concurrency: usize,
}

impl MultipartUploader {
    pub fn new(transport: Arc<dyn PartTransport>) -> Self {
        Self {
            transport,
            max_concurrency: MAX_CONCURRENT_PARTS,
        }
    }

    /// Upload the parts named by `urls`, which may be a subset of the plan
    /// when retrying.
    pub async fn upload_parts(
        &self,
        source: &dyn PartSource,
        plan: &PartPlan,
        urls: &[PartUrl],
        progress: PartProgress<'_>,
    ) -> PartsOutcome {
        let mut urls = urls.to_vec();
        urls.sort_by_key(|u| u.part_number);

        let batch_size = plan.batch_size().min(self.max_concurrency).max(1);
        let completed = &AtomicU32::new(0);
        let mut outcome = PartsOutcome::default();

        for (index, batch) in urls.chunks(batch_size).enumerate() {
            debug!(batch = index + 1, parts = batch.len(), "uploading batch");
            let results = join_all(batch.iter().map(|url| async move {
                let result = self.upload_one(source, plan, url).await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                progress(done, plan.total_parts);
                result
            }))
            .await;

            for result in results {
                match result {
                    Ok(part) => outcome.uploaded.push(part),
                    Err(err) => {
                        warn!("{}", err);
                        outcome.failed.push(err);
                    }
                }
            }
        }

        outcome.uploaded.sort_by_key(|p| p.part_number);
        outcome
    }

    async fn upload_one(
        &self,
        source: &dyn PartSource,
        plan: &PartPlan,
        url: &PartUrl,
    ) -> Result<UploadedPart, UploadError> {
        let part_number = url.part_number;
        let range = plan
            .part_range(part_number)
            .ok_or_else(|| UploadError::PartUploadFailed {
                part_number,
                reason: format!("outside 1..={}", plan.total_parts),
            })?;
        let body = source
            .read_range(range)
            .await
            .map_err(|e| UploadError::PartUploadFailed {
                part_number,
                reason: e.to_string(),
            })?;
        let etag = self
            .transport
            .put_part(part_number, &url.presigned_url, body)
            .await?;
        Ok(UploadedPart::new(part_number, etag))
    }
}

/// Called with `(bytes_sent, total_bytes)` as the body streams.
pub type ByteProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// PUT a whole file to a single presigned URL, streaming it from disk.
///
/// `signed_headers` are the headers the URL was signed with; they are sent
/// verbatim, except `Content-Length`, which always reflects the file.
pub async fn put_single(
    http: &reqwest::Client,
    url: &str,
    signed_headers: &HashMap<String, String>,
    path: &Path,
    content_type: &str,
    progress: ByteProgress,
) -> Result<(), UploadError> {
    let failed = UploadError::ObjectUploadFailed;
    let file = File::open(path).await.map_err(|e| failed(e.to_string()))?;
    let total = file
        .metadata()
        .await
        .map_err(|e| failed(e.to_string()))?
        .len();

    let sent = Arc::new(AtomicU64::new(0));
    let stream = ReaderStream::new(file).inspect(move |chunk| {
        if let Ok(chunk) = chunk {
            let so_far = sent.fetch_add(chunk.len() as u64, Ordering::SeqCst) + chunk.len() as u64;
            progress(so_far, total);
        }
    });

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(content_type).map_err(|e| failed(e.to_string()))?,
    );
    for (name, value) in signed_headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| failed(e.to_string()))?;
        let value = HeaderValue::from_str(value).map_err(|e| failed(e.to_string()))?;
        headers.insert(name, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(total));

    let response = http
        .put(url)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(stream))
        .send()
        .await
        .map_err(|e| failed(e.to_string()))?;

    if !response.status().is_success() {
        return Err(failed(format!("storage returned {}", response.status())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::upload_plan::MIB;
    use std::sync::Mutex;

    /// Records how many parts had finished when each part started, and the
    /// peak number of parts in flight.
    #[derive(Default)]
    struct RecordingTransport {
        in_flight: AtomicU32,
        peak: AtomicU32,
        finished: AtomicU32,
        started_after: Mutex<Vec<(u32, u32)>>,
        fail: Vec<u32>,
    }

    #[async_trait]
    impl PartTransport for RecordingTransport {
        async fn put_part(&self, part_number: u32, _url: &str, body: Bytes) -> Result<String, UploadError> {
            self.started_after
                .lock()
                .unwrap()
                .push((part_number, self.finished.load(Ordering::SeqCst)));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::task::yield_now().await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
            if self.fail.contains(&part_number) {
                return Err(UploadError::PartUploadFailed {
                    part_number,
                    reason: "503".into(),
                });
            }
            Ok(format!("\"{}-{}\"", part_number, body.len()))
        }
    }

    fn plan(total_parts: u32) -> PartPlan {
        PartPlan {
            file_size: u64::from(total_parts) * 4,
            part_size: 4,
            total_parts,
        }
    }

    fn urls(total_parts: u32) -> Vec<PartUrl> {
        (1..=total_parts)
            .rev()
            .map(|n| PartUrl {
                part_number: n,
                presigned_url: format!("https://s3.test/part/{n}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn twenty_three_parts_go_out_in_three_batches() {
        let transport = Arc::new(RecordingTransport::default());
        let uploader = MultipartUploader::new(transport.clone());
        let plan = plan(23);
        let source = Bytes::from(vec![7u8; plan.file_size as usize]);
        let reported = Mutex::new(Vec::new());

        let outcome = uploader
            .upload_parts(&source, &plan, &urls(23), &|done, total| {
                reported.lock().unwrap().push((done, total));
            })
            .await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.uploaded.len(), 23);
        assert!(outcome.uploaded.windows(2).all(|w| w[0].part_number < w[1].part_number));
        assert_eq!(transport.peak.load(Ordering::SeqCst), 10);

        // Each batch only starts once the previous one has fully finished.
        for (part, finished_before) in transport.started_after.lock().unwrap().iter() {
            let expected = match part {
                1..=10 => 0,
                11..=20 => 10,
                _ => 20,
            };
            assert_eq!(*finished_before, expected, "part {part}");
        }

        let reported = reported.into_inner().unwrap();
        assert_eq!(reported.len(), 23);
        assert_eq!(reported.last(), Some(&(23, 23)));
    }

    #[tokio::test]
    async fn failures_stay_with_their_part() {
        let transport = Arc::new(RecordingTransport {
            fail: vec![3, 12],
            ..Default::default()
        });
        let uploader = MultipartUploader::new(transport.clone());
        let plan = plan(15);
        let source = Bytes::from(vec![0u8; plan.file_size as usize]);

        let outcome = uploader
            .upload_parts(&source, &plan, &urls(15), &|_, _| {})
            .await;

        assert!(!outcome.is_complete());
        assert_eq!(outcome.failed_parts(), vec![3, 12]);
        assert_eq!(outcome.uploaded.len(), 13);
        // Siblings in the failing batches still ran.
        assert_eq!(transport.finished.load(Ordering::SeqCst), 15);
    }

    #[tokio::test]
    async fn short_reads_fail_only_that_part() {
        let uploader = MultipartUploader::new(Arc::new(RecordingTransport::default()));
        let plan = plan(3);
        // One byte short of the last part.
        let source = Bytes::from(vec![0u8; plan.file_size as usize - 1]);

        let outcome = uploader
            .upload_parts(&source, &plan, &urls(3), &|_, _| {})
            .await;
        assert_eq!(outcome.failed_parts(), vec![3]);
        assert_eq!(outcome.uploaded.len(), 2);
    }

    type Seen = Arc<Mutex<Vec<(String, usize, HeaderMap)>>>;

    /// Local stand-in for presigned storage URLs.
    async fn fake_storage() -> (String, Seen) {
        use axum::http::{StatusCode, Uri};

        let seen: Seen = Arc::default();
        let recorder = seen.clone();
        let app = axum::Router::new().route(
            "/{*key}",
            axum::routing::put(move |uri: Uri, headers: HeaderMap, body: Bytes| {
                let recorder = recorder.clone();
                async move {
                    recorder
                        .lock()
                        .unwrap()
                        .push((uri.path().to_string(), body.len(), headers));

                    let mut reply = HeaderMap::new();
                    if uri.path().ends_with("/broken") {
                        return (StatusCode::SERVICE_UNAVAILABLE, reply);
                    }
                    if !uri.path().ends_with("/no-etag") {
                        reply.insert(ETAG, "\"abc\"".parse().unwrap());
                    }
                    (StatusCode::OK, reply)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}"), seen)
    }

    #[tokio::test]
    async fn http_transport_needs_success_and_etag() {
        let (base, seen) = fake_storage().await;
        let transport = HttpTransport::new(reqwest::Client::new());

        let etag = transport
            .put_part(1, &format!("{base}/bucket/part-1"), Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(etag, "\"abc\"");

        let err = transport
            .put_part(2, &format!("{base}/bucket/no-etag"), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::PartUploadFailed { part_number: 2, .. }));

        let err = transport
            .put_part(3, &format!("{base}/bucket/broken"), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::PartUploadFailed { part_number: 3, .. }));

        let seen = seen.lock().unwrap();
        assert_eq!((seen[0].0.as_str(), seen[0].1), ("/bucket/part-1", 5));
        assert!(seen[0].2.get(CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn single_put_streams_file_and_reports_bytes() {
        let (base, seen) = fake_storage().await;
        let path = std::env::temp_dir().join(format!("single-{}.mp4", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, vec![1u8; 200_000]).await.unwrap();

        let reports = Arc::new(Mutex::new(Vec::new()));
        let recorder = reports.clone();
        let signed = HashMap::from([
            ("content-type".to_string(), "video/mp4".to_string()),
            ("x-amz-meta-file-id".to_string(), "f-1".to_string()),
        ]);
        put_single(
            &reqwest::Client::new(),
            &format!("{base}/bucket/clip.mp4"),
            &signed,
            &path,
            "video/mp4",
            Arc::new(move |sent, total| recorder.lock().unwrap().push((sent, total))),
        )
        .await
        .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].1, 200_000);
        let headers = &seen[0].2;
        assert_eq!(headers[CONTENT_TYPE], "video/mp4");
        assert_eq!(headers["x-amz-meta-file-id"], "f-1");
        assert_eq!(headers[CONTENT_LENGTH], "200000");
        assert_eq!(headers.get_all(CONTENT_TYPE).iter().count(), 1);
        let reports = reports.lock().unwrap();
        assert_eq!(reports.last(), Some(&(200_000, 200_000)));
        assert!(reports.windows(2).all(|w| w[0].0 < w[1].0));

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn refused_single_put_is_an_object_failure() {
        let (base, _) = fake_storage().await;
        let path = std::env::temp_dir().join(format!("refused-{}.mp4", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, b"abc").await.unwrap();

        let err = put_single(
            &reqwest::Client::new(),
            &format!("{base}/bucket/broken"),
            &HashMap::new(),
            &path,
            "video/mp4",
            Arc::new(|_, _| {}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UploadError::ObjectUploadFailed(ref m) if m.contains("503")), "{err}");

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn file_source_reads_exact_ranges() {
        let path = std::env::temp_dir().join(format!("parts-{}.bin", uuid::Uuid::new_v4()));
        let data: Vec<u8> = (0..=255u8).cycle().take(MIB as usize + 10).collect();
        tokio::fs::write(&path, &data).await.unwrap();

        let source = FileSource::new(&path);
        let tail = source.read_range(MIB..MIB + 10).await.unwrap();
        assert_eq!(&tail[..], &data[MIB as usize..]);
        assert!(source.read_range(MIB..MIB + 11).await.is_err());

        let _ = tokio::fs::remove_file(&path).await;
    }
}
