//! Encode stage: capability negotiation, then ordered frames to chunks.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{recv_or_cancel, send_or_cancel};
use crate::PipelineError;
use crate::codec::VideoEncoder;
use crate::config::TargetProfile;
use crate::media::{DecodedFrame, OutputChunk};

/// Counters reported by a finished encode stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeStats {
    /// Frames consumed from upstream
    pub frames_consumed: u64,
    /// Encoded chunks emitted downstream
    pub chunks_emitted: u64,
    /// Configuration records emitted (exactly one on a healthy run)
    pub config_records: u64,
}

/// Wraps the encode capability as a stream transform.
///
/// Validates that the target profile is supported before committing to
/// the encode, and before consuming a single frame, then feeds
/// frames through in order. Frames are moved into the capability, so
/// their lifetime ends at submission whether or not encoding succeeds.
pub struct EncodeStage {
    encoder: Box<dyn VideoEncoder>,
    profile: TargetProfile,
}

impl EncodeStage {
    /// Creates a stage owning a fresh encoder instance for one run.
    pub fn new(encoder: Box<dyn VideoEncoder>, profile: TargetProfile) -> Self {
        Self { encoder, profile }
    }

    /// Runs the stage to completion.
    ///
    /// # Errors
    ///
    /// - `PipelineError::CapabilityUnsupported` - Profile rejected before any frame was accepted
    /// - `PipelineError::Encode` - The capability failed mid-stream
    /// - `PipelineError::Cancelled` - The run was aborted elsewhere
    pub async fn run(
        mut self,
        mut frames: mpsc::Receiver<DecodedFrame>,
        chunks: mpsc::Sender<OutputChunk>,
        cancel: CancellationToken,
    ) -> Result<EncodeStats, PipelineError> {
        let result = self.process(&mut frames, &chunks, &cancel).await;
        if let Err(error) = &result
            && !error.is_cancellation()
        {
            cancel.cancel();
        }
        result
    }

    async fn process(
        &mut self,
        frames: &mut mpsc::Receiver<DecodedFrame>,
        chunks: &mpsc::Sender<OutputChunk>,
        cancel: &CancellationToken,
    ) -> Result<EncodeStats, PipelineError> {
        // Capability negotiation happens before the first frame is
        // pulled; an unsupported profile aborts with nothing consumed.
        if !self.encoder.is_supported(&self.profile).await {
            return Err(PipelineError::CapabilityUnsupported {
                codec: self.profile.codec.clone(),
                width: self.profile.width,
                height: self.profile.height,
            });
        }
        self.encoder
            .configure(&self.profile)
            .await
            .map_err(PipelineError::Encode)?;
        debug!(
            "encode stage configured: {} -> {}",
            self.profile.codec,
            self.profile.resolution_label()
        );

        let mut stats = EncodeStats::default();
        while let Some(frame) = recv_or_cancel(frames, cancel).await? {
            stats.frames_consumed += 1;
            let encoded = self
                .encoder
                .encode(frame)
                .await
                .map_err(PipelineError::Encode)?;
            self.forward(encoded, chunks, cancel, &mut stats).await?;
        }

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let drained = self.encoder.flush().await.map_err(PipelineError::Encode)?;
        self.forward(drained, chunks, cancel, &mut stats).await?;

        info!(
            "encode stage finished: {} frames, {} chunks",
            stats.frames_consumed, stats.chunks_emitted
        );
        Ok(stats)
    }

    async fn forward(
        &mut self,
        encoded: Vec<OutputChunk>,
        chunks: &mpsc::Sender<OutputChunk>,
        cancel: &CancellationToken,
        stats: &mut EncodeStats,
    ) -> Result<(), PipelineError> {
        for chunk in encoded {
            if chunk.is_configuration() {
                stats.config_records += 1;
            } else {
                stats.chunks_emitted += 1;
            }
            send_or_cancel(chunks, chunk, cancel).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::codec::SimulationEncoder;

    fn frame(timestamp_us: i64) -> DecodedFrame {
        DecodedFrame {
            timestamp_us,
            coded_width: 64,
            coded_height: 48,
            planes: Bytes::from_static(&[0u8; 32]),
        }
    }

    async fn run_stage(
        encoder: SimulationEncoder,
        profile: TargetProfile,
        frame_count: i64,
    ) -> (Result<EncodeStats, PipelineError>, Vec<OutputChunk>) {
        let (frame_tx, frame_rx) = mpsc::channel(64);
        let (chunk_tx, mut chunk_rx) = mpsc::channel(64);
        for i in 0..frame_count {
            frame_tx.send(frame(i * 1000)).await.unwrap();
        }
        drop(frame_tx);

        let stage = EncodeStage::new(Box::new(encoder), profile);
        let result = stage.run(frame_rx, chunk_tx, CancellationToken::new()).await;

        let mut chunks = Vec::new();
        while let Ok(chunk) = chunk_rx.try_recv() {
            chunks.push(chunk);
        }
        (result, chunks)
    }

    #[tokio::test]
    async fn test_config_record_once_and_first() {
        let encoder = SimulationEncoder::new().with_chunk_size(16);
        let (result, chunks) = run_stage(encoder, TargetProfile::default(), 5).await;
        let stats = result.unwrap();

        assert_eq!(stats.config_records, 1);
        assert_eq!(stats.chunks_emitted, 5);
        assert!(chunks[0].is_configuration());
        assert_eq!(
            chunks.iter().filter(|c| c.is_configuration()).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_unsupported_profile_rejected_before_frames() {
        let encoder = SimulationEncoder::new().with_supported_codecs(vec!["hvc1".to_string()]);
        let (result, chunks) = run_stage(encoder, TargetProfile::default(), 5).await;

        assert!(matches!(
            result,
            Err(PipelineError::CapabilityUnsupported { .. })
        ));
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_profile_consumes_no_frame() {
        let (frame_tx, frame_rx) = mpsc::channel(4);
        let (chunk_tx, _chunk_rx) = mpsc::channel(4);
        frame_tx.send(frame(0)).await.unwrap();

        let encoder = SimulationEncoder::new().with_supported_codecs(vec!["hvc1".to_string()]);
        let stage = EncodeStage::new(Box::new(encoder), TargetProfile::default());
        let cancel = CancellationToken::new();
        let result = stage.run(frame_rx, chunk_tx, cancel.clone()).await;

        assert!(result.is_err());
        assert!(cancel.is_cancelled());
        // The frame is still in the channel; the stage never pulled it.
        assert_eq!(frame_tx.capacity(), 3);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_propagates() {
        let encoder = SimulationEncoder::new().with_failure_after(2);
        let (result, _) = run_stage(encoder, TargetProfile::default(), 5).await;

        assert!(matches!(result, Err(PipelineError::Encode(_))));
    }
}
