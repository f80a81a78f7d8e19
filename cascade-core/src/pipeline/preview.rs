//! Verify/render stage: pass-through with a live preview side path.
//!
//! Every output chunk flows through unchanged; encoded chunks are
//! additionally decoded by a second, stage-owned decoder and handed to
//! the render sink. The sink is write-only from the pipeline's
//! perspective and this stage is its only writer.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::{recv_or_cancel, send_or_cancel};
use crate::PipelineError;
use crate::codec::{CodecError, VideoDecoder};
use crate::media::{DecodedFrame, OutputChunk};

/// Accepts decoded frames for display.
///
/// Rendering is fire-and-forget: the sink takes ownership of each
/// frame, ending its lifetime, and has no way to fail the pipeline.
pub trait FrameSink: Send + Sync {
    /// Renders one frame at its presentation timestamp.
    fn render(&self, frame: DecodedFrame);
}

/// Sink that drops every frame, for headless runs.
pub struct NullFrameSink;

impl FrameSink for NullFrameSink {
    fn render(&self, _frame: DecodedFrame) {}
}

/// Counters reported by a finished preview stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreviewStats {
    /// Chunks forwarded downstream (configuration record included)
    pub chunks_forwarded: u64,
    /// Frames handed to the render sink
    pub frames_rendered: u64,
}

/// Pass-through transform feeding a second decode into a render sink.
pub struct PreviewStage {
    decoder: Box<dyn VideoDecoder>,
    sink: Arc<dyn FrameSink>,
}

impl PreviewStage {
    /// Creates a stage owning a fresh preview decoder for one run.
    pub fn new(decoder: Box<dyn VideoDecoder>, sink: Arc<dyn FrameSink>) -> Self {
        Self { decoder, sink }
    }

    /// Runs the stage to completion.
    ///
    /// # Errors
    ///
    /// - `PipelineError::Decode` - Preview decoder rejected the
    ///   configuration record, a chunk, or a chunk arrived before the
    ///   record it depends on
    /// - `PipelineError::Cancelled` - The run was aborted elsewhere
    pub async fn run(
        mut self,
        mut chunks: mpsc::Receiver<OutputChunk>,
        out: mpsc::Sender<OutputChunk>,
        cancel: CancellationToken,
    ) -> Result<PreviewStats, PipelineError> {
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
        out: &mpsc::Sender<OutputChunk>,
        cancel: &CancellationToken,
    ) -> Result<PreviewStats, PipelineError> {
        let mut stats = PreviewStats::default();
        let mut configured = false;

        while let Some(chunk) = recv_or_cancel(chunks, cancel).await? {
            match &chunk {
                OutputChunk::Configuration(config) => {
                    // Reconfiguration completes before any dependent
                    // chunk is decoded; forwarding is independent of it.
                    self.decoder
                        .configure(config)
                        .await
                        .map_err(PipelineError::Decode)?;
                    configured = true;
                    debug!("preview decoder configured for {}", config.codec);
                }
                OutputChunk::Encoded(sample) => {
                    if !configured {
                        return Err(PipelineError::Decode(CodecError::NotConfigured));
                    }
                    let frames = self
                        .decoder
                        .decode(sample.clone())
                        .await
                        .map_err(PipelineError::Decode)?;
                    stats.frames_rendered += self.render(frames);
                }
            }
            stats.chunks_forwarded += 1;
            send_or_cancel(out, chunk, cancel).await?;
        }

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        // Drain whatever the preview decoder still holds so the last
        // frames reach the screen.
        if configured {
            let drained = self.decoder.flush().await.map_err(PipelineError::Decode)?;
            stats.frames_rendered += self.render(drained);
        }

        info!(
            "preview stage finished: {} chunks forwarded, {} frames rendered",
            stats.chunks_forwarded, stats.frames_rendered
        );
        Ok(stats)
    }

    fn render(&self, frames: Vec<DecodedFrame>) -> u64 {
        let count = frames.len() as u64;
        for frame in frames {
            trace!(
                "rendering frame at {}us ({} bytes)",
                frame.timestamp_us,
                frame.byte_len()
            );
            self.sink.render(frame);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;

    use super::*;
    use crate::codec::SimulationDecoder;
    use crate::media::{EncodedSample, SampleKind, TrackConfiguration};

    struct RecordingSink {
        timestamps: Mutex<Vec<i64>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                timestamps: Mutex::new(Vec::new()),
            }
        }
    }

    impl FrameSink for RecordingSink {
        fn render(&self, frame: DecodedFrame) {
            self.timestamps.lock().unwrap().push(frame.timestamp_us);
        }
    }

    fn config_chunk() -> OutputChunk {
        OutputChunk::Configuration(TrackConfiguration {
            codec: "vp09.00.10.08".to_string(),
            coded_width: 32,
            coded_height: 16,
            description: Bytes::from_static(&[1u8; 8]),
        })
    }

    fn encoded_chunk(timestamp_us: i64) -> OutputChunk {
        OutputChunk::Encoded(EncodedSample {
            kind: SampleKind::Key,
            timestamp_us,
            duration_us: 1000,
            data: Bytes::from_static(&[0u8; 16]),
        })
    }

    async fn run_stage(
        chunks_in: Vec<OutputChunk>,
        sink: Arc<RecordingSink>,
    ) -> (Result<PreviewStats, PipelineError>, Vec<OutputChunk>) {
        let (chunk_tx, chunk_rx) = mpsc::channel(64);
        let (out_tx, mut out_rx) = mpsc::channel(64);
        for chunk in chunks_in {
            chunk_tx.send(chunk).await.unwrap();
        }
        drop(chunk_tx);

        let stage = PreviewStage::new(Box::new(SimulationDecoder::new()), sink);
        let result = stage.run(chunk_rx, out_tx, CancellationToken::new()).await;

        let mut forwarded = Vec::new();
        while let Ok(chunk) = out_rx.try_recv() {
            forwarded.push(chunk);
        }
        (result, forwarded)
    }

    #[tokio::test]
    async fn test_configuration_record_forwarded_downstream() {
        let sink = Arc::new(RecordingSink::new());
        let chunks = vec![config_chunk(), encoded_chunk(0), encoded_chunk(1000)];
        let (result, forwarded) = run_stage(chunks, Arc::clone(&sink)).await;

        let stats = result.unwrap();
        assert_eq!(stats.chunks_forwarded, 3);
        assert_eq!(forwarded.len(), 3);
        assert!(forwarded[0].is_configuration());
    }

    #[tokio::test]
    async fn test_every_encoded_chunk_rendered() {
        let sink = Arc::new(RecordingSink::new());
        let chunks = vec![config_chunk(), encoded_chunk(0), encoded_chunk(1000)];
        let (result, _) = run_stage(chunks, Arc::clone(&sink)).await;

        assert_eq!(result.unwrap().frames_rendered, 2);
        assert_eq!(*sink.timestamps.lock().unwrap(), vec![0, 1000]);
    }

    #[tokio::test]
    async fn test_chunk_before_configuration_is_fatal() {
        let sink = Arc::new(RecordingSink::new());
        let (result, _) = run_stage(vec![encoded_chunk(0)], Arc::clone(&sink)).await;

        assert!(matches!(
            result,
            Err(PipelineError::Decode(CodecError::NotConfigured))
        ));
        assert!(sink.timestamps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_passthrough_preserves_chunk_order() {
        let sink = Arc::new(RecordingSink::new());
        let chunks = vec![
            config_chunk(),
            encoded_chunk(0),
            encoded_chunk(1000),
            encoded_chunk(2000),
        ];
        let (_, forwarded) = run_stage(chunks, sink).await;

        let timestamps: Vec<i64> = forwarded
            .iter()
            .filter_map(|c| match c {
                OutputChunk::Encoded(s) => Some(s.timestamp_us),
                _ => None,
            })
            .collect();
        assert_eq!(timestamps, vec![0, 1000, 2000]);
    }
}
