//! Chunked upload sink and the transport it writes through.
//!
//! The sink accumulates output container bytes until a size threshold
//! is reached, then sends the accumulated blob as one sequentially
//! numbered named segment. Awaiting the transport before accepting the
//! next write keeps at most one upload in flight and pushes
//! backpressure all the way up the chain.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

/// Errors surfaced by the upload path.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The transport failed to deliver the segment
    #[error("upload transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status
    #[error("upload rejected with status {status}")]
    Rejected {
        /// HTTP status code returned by the endpoint
        status: u16,
    },
}

/// Sends one named byte blob to wherever segments go.
///
/// The caller treats any error as fatal to the run; segments are never
/// retried or re-sent by this pipeline.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Uploads one segment.
    ///
    /// # Errors
    ///
    /// - `UploadError::Transport` - Delivery failed
    /// - `UploadError::Rejected` - Endpoint refused the segment
    async fn upload(&self, name: &str, data: Bytes) -> Result<(), UploadError>;
}

/// HTTP transport posting segments as multipart form data.
pub struct HttpUploadTransport {
    client: reqwest::Client,
    endpoint: Url,
    content_type: String,
}

impl HttpUploadTransport {
    /// Creates a transport posting to the given endpoint.
    pub fn new(endpoint: Url, content_type: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            content_type: content_type.into(),
        }
    }
}

#[async_trait]
impl UploadTransport for HttpUploadTransport {
    async fn upload(&self, name: &str, data: Bytes) -> Result<(), UploadError> {
        let part = reqwest::multipart::Part::bytes(data.to_vec())
            .file_name(name.to_string())
            .mime_str(&self.content_type)?;
        let form = reqwest::multipart::Form::new().part(name.to_string(), part);

        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UploadError::Rejected {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// One segment captured by [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct UploadedSegment {
    /// Segment name as it would appear at the endpoint
    pub name: String,
    /// Segment payload size in bytes
    pub byte_len: usize,
}

/// In-memory transport for tests and dry runs.
///
/// Records segment names and sizes instead of sending anything, and
/// can be told to start failing after a number of uploads.
#[derive(Default)]
pub struct MemoryTransport {
    segments: Mutex<Vec<UploadedSegment>>,
    fail_after: Option<u64>,
}

impl MemoryTransport {
    /// Creates a transport accepting every upload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every upload after the first `count` have succeeded.
    pub fn failing_after(count: u64) -> Self {
        Self {
            segments: Mutex::new(Vec::new()),
            fail_after: Some(count),
        }
    }

    /// Segments recorded so far.
    pub async fn segments(&self) -> Vec<UploadedSegment> {
        self.segments.lock().await.clone()
    }
}

#[async_trait]
impl UploadTransport for MemoryTransport {
    async fn upload(&self, name: &str, data: Bytes) -> Result<(), UploadError> {
        let mut segments = self.segments.lock().await;
        if let Some(limit) = self.fail_after
            && segments.len() as u64 >= limit
        {
            return Err(UploadError::Rejected { status: 503 });
        }
        segments.push(UploadedSegment {
            name: name.to_string(),
            byte_len: data.len(),
        });
        Ok(())
    }
}

/// Accumulates output bytes and uploads size-bounded segments.
///
/// Writes append to an internal accumulator; once the byte counter
/// reaches the threshold, the accumulated pieces become one blob named
/// `{base}-{label}-{seq}.{ext}` with a 1-indexed sequence number, the
/// transport is invoked, and the accumulator resets, all before the
/// next write is accepted. `close` flushes any non-empty remainder as
/// a final, possibly undersized, segment.
pub struct ChunkedUploadSink {
    transport: Arc<dyn UploadTransport>,
    base_name: String,
    resolution_label: String,
    extension: String,
    threshold: u64,
    pieces: Vec<Bytes>,
    byte_count: u64,
    sequence: u64,
}

impl ChunkedUploadSink {
    /// Creates a sink for one run's segment stream.
    pub fn new(
        transport: Arc<dyn UploadTransport>,
        base_name: impl Into<String>,
        resolution_label: impl Into<String>,
        extension: impl Into<String>,
        threshold: u64,
    ) -> Self {
        Self {
            transport,
            base_name: base_name.into(),
            resolution_label: resolution_label.into(),
            extension: extension.into(),
            threshold,
            pieces: Vec::new(),
            byte_count: 0,
            sequence: 0,
        }
    }

    fn segment_name(&self, sequence: u64) -> String {
        format!(
            "{}-{}-{}.{}",
            self.base_name, self.resolution_label, sequence, self.extension
        )
    }

    async fn upload_accumulated(&mut self) -> Result<(), UploadError> {
        let mut blob = BytesMut::with_capacity(self.byte_count as usize);
        for piece in self.pieces.drain(..) {
            blob.extend_from_slice(&piece);
        }
        self.byte_count = 0;

        self.sequence += 1;
        let name = self.segment_name(self.sequence);
        debug!("uploading segment {} ({} bytes)", name, blob.len());
        self.transport.upload(&name, blob.freeze()).await
    }

    /// Appends bytes, uploading a segment once the threshold is reached.
    ///
    /// # Errors
    ///
    /// - `UploadError` - Segment delivery failed; the stream must abort
    pub async fn write(&mut self, data: Bytes) -> Result<(), UploadError> {
        if data.is_empty() {
            return Ok(());
        }
        self.byte_count += data.len() as u64;
        self.pieces.push(data);

        if self.byte_count >= self.threshold {
            self.upload_accumulated().await?;
        }
        Ok(())
    }

    /// Flushes any non-empty remainder as a final undersized segment
    /// and returns the total number of segments uploaded.
    ///
    /// # Errors
    ///
    /// - `UploadError` - Final segment delivery failed
    pub async fn close(mut self) -> Result<u64, UploadError> {
        if self.byte_count > 0 {
            self.upload_accumulated().await?;
        }
        info!("upload sink closed after {} segments", self.sequence);
        Ok(self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(transport: Arc<MemoryTransport>, threshold: u64) -> ChunkedUploadSink {
        ChunkedUploadSink::new(transport, "movie", "144p", "webm", threshold)
    }

    #[tokio::test]
    async fn test_threshold_aligned_writes_match_floor() {
        // S = 400, T = 100, aligned on write boundaries: floor(S/T) = 4
        // non-final segments and nothing left for close.
        let transport = Arc::new(MemoryTransport::new());
        let mut sink = sink(Arc::clone(&transport), 100);

        for _ in 0..8 {
            sink.write(Bytes::from(vec![0u8; 50])).await.unwrap();
        }
        let total = sink.close().await.unwrap();

        assert_eq!(total, 4);
        let segments = transport.segments().await;
        assert_eq!(segments.len(), 4);
        assert!(segments.iter().all(|s| s.byte_len == 100));
    }

    #[tokio::test]
    async fn test_final_undersized_segment_on_close() {
        let transport = Arc::new(MemoryTransport::new());
        let mut sink = sink(Arc::clone(&transport), 100);

        sink.write(Bytes::from(vec![0u8; 30])).await.unwrap();
        let total = sink.close().await.unwrap();

        assert_eq!(total, 1);
        let segments = transport.segments().await;
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].byte_len, 30);
        assert_eq!(segments[0].name, "movie-144p-1.webm");
    }

    #[tokio::test]
    async fn test_empty_close_uploads_nothing() {
        let transport = Arc::new(MemoryTransport::new());
        let sink = sink(Arc::clone(&transport), 100);

        assert_eq!(sink.close().await.unwrap(), 0);
        assert!(transport.segments().await.is_empty());
    }

    #[tokio::test]
    async fn test_sequence_numbers_start_at_one_and_ascend() {
        let transport = Arc::new(MemoryTransport::new());
        let mut sink = sink(Arc::clone(&transport), 100);

        for _ in 0..2 {
            sink.write(Bytes::from(vec![0u8; 100])).await.unwrap();
        }
        sink.write(Bytes::from(vec![0u8; 10])).await.unwrap();
        sink.close().await.unwrap();

        let names: Vec<String> = transport
            .segments()
            .await
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "movie-144p-1.webm".to_string(),
                "movie-144p-2.webm".to_string(),
                "movie-144p-3.webm".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_upload_failure_surfaces_to_caller() {
        let transport = Arc::new(MemoryTransport::failing_after(1));
        let mut sink = sink(Arc::clone(&transport), 100);

        sink.write(Bytes::from(vec![0u8; 100])).await.unwrap();
        let result = sink.write(Bytes::from(vec![0u8; 100])).await;

        assert!(matches!(result, Err(UploadError::Rejected { status: 503 })));
        assert_eq!(transport.segments().await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_writes_are_ignored() {
        let transport = Arc::new(MemoryTransport::new());
        let mut sink = sink(Arc::clone(&transport), 100);

        sink.write(Bytes::new()).await.unwrap();
        assert_eq!(sink.close().await.unwrap(), 0);
    }

    proptest::proptest! {
        // Segments partition the written bytes exactly: every non-final
        // segment reaches the threshold, no segment overshoots it by
        // more than one write, and nothing is dropped or duplicated.
        #[test]
        fn prop_segments_partition_written_bytes(chunk in 1usize..=300, count in 0usize..=50) {
            let segments = tokio_test::block_on(async move {
                let transport = Arc::new(MemoryTransport::new());
                let mut sink = sink(Arc::clone(&transport), 100);
                for _ in 0..count {
                    sink.write(Bytes::from(vec![0u8; chunk])).await.unwrap();
                }
                sink.close().await.unwrap();
                transport.segments().await
            });

            let total: usize = segments.iter().map(|s| s.byte_len).sum();
            proptest::prop_assert_eq!(total, chunk * count);
            if let Some((_, non_final)) = segments.split_last() {
                proptest::prop_assert!(non_final.iter().all(|s| s.byte_len >= 100));
            }
            proptest::prop_assert!(segments.iter().all(|s| s.byte_len < 100 + chunk));
        }
    }
}
