//! Packaging stage: output chunks into container byte ranges.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{recv_or_cancel, send_or_cancel};
use crate::PipelineError;
use crate::media::OutputChunk;
use crate::mux::ContainerMuxer;

/// Counters reported by a finished packaging stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackageStats {
    /// Encoded chunks muxed
    pub chunks_muxed: u64,
    /// Container bytes emitted downstream
    pub bytes_emitted: u64,
}

/// Drives the container muxer and forwards finalized byte ranges.
///
/// Applies the configuration record before any dependent chunk and
/// forwards container bytes downstream as the muxer flushes them in
/// bounded-size writes.
pub struct PackageStage {
    muxer: Box<dyn ContainerMuxer>,
}

impl PackageStage {
    /// Creates a stage owning a fresh muxer instance for one run.
    pub fn new(muxer: Box<dyn ContainerMuxer>) -> Self {
        Self { muxer }
    }

    /// Runs the stage to completion.
    ///
    /// # Errors
    ///
    /// - `PipelineError::Mux` - Chunk before its configuration record, or container framing failed
    /// - `PipelineError::Cancelled` - The run was aborted elsewhere
    pub async fn run(
        mut self,
        mut chunks: mpsc::Receiver<OutputChunk>,
        out: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Result<PackageStats, PipelineError> {
        let result = self.process(&mut chunks, &out, &cancel).await;
        if let Err(error) = &result
            && !error.is_cancellation()
        {
            cancel.cancel();
        }
        result
    }

    async fn process(
        &mut self,
        chunks: &mut mpsc::Receiver<OutputChunk>,
        out: &mpsc::Sender<Bytes>,
        cancel: &CancellationToken,
    ) -> Result<PackageStats, PipelineError> {
        let mut stats = PackageStats::default();

        while let Some(chunk) = recv_or_cancel(chunks, cancel).await? {
            match chunk {
                OutputChunk::Configuration(config) => {
                    self.muxer.apply_config(&config)?;
                }
                OutputChunk::Encoded(sample) => {
                    self.muxer.add_chunk(&sample)?;
                    stats.chunks_muxed += 1;
                }
            }
            while let Some(write) = self.muxer.poll_bytes() {
                stats.bytes_emitted += write.len() as u64;
                send_or_cancel(out, write, cancel).await?;
            }
        }

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let trailer = self.muxer.finalize()?;
        if !trailer.is_empty() {
            stats.bytes_emitted += trailer.len() as u64;
            send_or_cancel(out, trailer, cancel).await?;
        }

        info!(
            "package stage finished: {} chunks, {} bytes",
            stats.chunks_muxed, stats.bytes_emitted
        );
        Ok(stats)
    }
}
