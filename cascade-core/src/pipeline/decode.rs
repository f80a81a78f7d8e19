//! Decode stage: ordered samples in, ordered frames out.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{recv_or_cancel, send_or_cancel};
use crate::PipelineError;
use crate::codec::VideoDecoder;
use crate::demux::{DemuxError, DemuxEvent};
use crate::media::DecodedFrame;

/// Counters reported by a finished decode stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeStats {
    /// Samples submitted to the decode capability
    pub samples_submitted: u64,
    /// Frames emitted downstream
    pub frames_emitted: u64,
}

/// Wraps the decode capability as a stream producer.
///
/// Configures the decoder once from the track configuration, submits
/// samples in arrival order, and forwards every completed frame
/// downstream. On end of input the stage drains the decoder through
/// its explicit flush acknowledgment, never a delay, and verifies
/// that no frame was lost.
pub struct DecodeStage {
    decoder: Box<dyn VideoDecoder>,
}

impl DecodeStage {
    /// Creates a stage owning a fresh decoder instance for one run.
    pub fn new(decoder: Box<dyn VideoDecoder>) -> Self {
        Self { decoder }
    }

    /// Runs the stage to completion.
    ///
    /// # Errors
    ///
    /// - `PipelineError::ContainerParse` - Sample arrived before the track configuration
    /// - `PipelineError::Decode` - The capability rejected the configuration or a sample
    /// - `PipelineError::FrameLoss` - Drain produced fewer frames than samples submitted
    /// - `PipelineError::Cancelled` - The run was aborted elsewhere
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<DemuxEvent>,
        frames: mpsc::Sender<DecodedFrame>,
        cancel: CancellationToken,
    ) -> Result<DecodeStats, PipelineError> {
        let result = self.process(&mut events, &frames, &cancel).await;
        if let Err(error) = &result
            && !error.is_cancellation()
        {
            // Cancel while `frames` is still alive so downstream stages
            // observe the token before they observe the closed channel.
            cancel.cancel();
        }
        result
    }

    async fn process(
        &mut self,
        events: &mut mpsc::Receiver<DemuxEvent>,
        frames: &mpsc::Sender<DecodedFrame>,
        cancel: &CancellationToken,
    ) -> Result<DecodeStats, PipelineError> {
        let mut stats = DecodeStats::default();
        let mut configured = false;

        while let Some(event) = recv_or_cancel(events, cancel).await? {
            match event {
                DemuxEvent::Config(config) => {
                    self.decoder
                        .configure(&config)
                        .await
                        .map_err(PipelineError::Decode)?;
                    configured = true;
                    debug!("decode stage configured for {}", config.codec);
                }
                DemuxEvent::Sample(sample) => {
                    if !configured {
                        return Err(PipelineError::ContainerParse(DemuxError::Malformed {
                            reason: "sample arrived before track configuration".to_string(),
                        }));
                    }
                    stats.samples_submitted += 1;
                    let decoded = self
                        .decoder
                        .decode(sample)
                        .await
                        .map_err(PipelineError::Decode)?;
                    for frame in decoded {
                        stats.frames_emitted += 1;
                        send_or_cancel(frames, frame, cancel).await?;
                    }
                }
            }
        }

        // Upstream ended: clean end of stream or an abort elsewhere.
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let drained = self.decoder.flush().await.map_err(PipelineError::Decode)?;
        for frame in drained {
            stats.frames_emitted += 1;
            send_or_cancel(frames, frame, cancel).await?;
        }

        if stats.frames_emitted != stats.samples_submitted {
            return Err(PipelineError::FrameLoss {
                submitted: stats.samples_submitted,
                emitted: stats.frames_emitted,
            });
        }

        info!(
            "decode stage finished: {} samples, {} frames",
            stats.samples_submitted, stats.frames_emitted
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::codec::SimulationDecoder;
    use crate::media::{EncodedSample, SampleKind, TrackConfiguration};

    fn track_config() -> TrackConfiguration {
        TrackConfiguration {
            codec: "avc1.42002A".to_string(),
            coded_width: 32,
            coded_height: 16,
            description: Bytes::from_static(&[1u8; 8]),
        }
    }

    fn sample(index: i64) -> EncodedSample {
        EncodedSample {
            kind: SampleKind::Key,
            timestamp_us: index * 1000,
            duration_us: 1000,
            data: Bytes::from_static(&[0u8; 16]),
        }
    }

    async fn run_stage(
        decoder: SimulationDecoder,
        events: Vec<DemuxEvent>,
    ) -> (Result<DecodeStats, PipelineError>, Vec<DecodedFrame>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (frame_tx, mut frame_rx) = mpsc::channel(64);
        for event in events {
            event_tx.send(event).await.unwrap();
        }
        drop(event_tx);

        let stage = DecodeStage::new(Box::new(decoder));
        let result = stage
            .run(event_rx, frame_tx, CancellationToken::new())
            .await;

        let mut frames = Vec::new();
        while let Ok(frame) = frame_rx.try_recv() {
            frames.push(frame);
        }
        (result, frames)
    }

    #[tokio::test]
    async fn test_frame_count_matches_sample_count() {
        let mut events = vec![DemuxEvent::Config(track_config())];
        events.extend((0..10).map(|i| DemuxEvent::Sample(sample(i))));

        let (result, frames) = run_stage(SimulationDecoder::new(), events).await;
        let stats = result.unwrap();

        assert_eq!(stats.samples_submitted, 10);
        assert_eq!(stats.frames_emitted, 10);
        assert_eq!(frames.len(), 10);
    }

    #[tokio::test]
    async fn test_timestamps_non_decreasing() {
        let mut events = vec![DemuxEvent::Config(track_config())];
        events.extend((0..8).map(|i| DemuxEvent::Sample(sample(i))));

        let (_, frames) = run_stage(SimulationDecoder::new().with_reorder_window(3), events).await;
        let timestamps: Vec<i64> = frames.iter().map(|f| f.timestamp_us).collect();

        assert_eq!(timestamps.len(), 8);
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_drain_flushes_held_frames() {
        let mut events = vec![DemuxEvent::Config(track_config())];
        events.extend((0..5).map(|i| DemuxEvent::Sample(sample(i))));

        // A reorder window of 4 holds most frames until the drain.
        let (result, frames) = run_stage(SimulationDecoder::new().with_reorder_window(4), events).await;

        assert_eq!(result.unwrap().frames_emitted, 5);
        assert_eq!(frames.len(), 5);
    }

    #[tokio::test]
    async fn test_sample_before_config_is_parse_error() {
        let events = vec![DemuxEvent::Sample(sample(0))];
        let (result, _) = run_stage(SimulationDecoder::new(), events).await;

        assert!(matches!(result, Err(PipelineError::ContainerParse(_))));
    }

    #[tokio::test]
    async fn test_failure_cancels_token() {
        let (event_tx, event_rx) = mpsc::channel(4);
        let (frame_tx, _frame_rx) = mpsc::channel(4);
        event_tx.send(DemuxEvent::Sample(sample(0))).await.unwrap();
        drop(event_tx);

        let cancel = CancellationToken::new();
        let stage = DecodeStage::new(Box::new(SimulationDecoder::new()));
        let result = stage.run(event_rx, frame_tx, cancel.clone()).await;

        assert!(result.is_err());
        assert!(cancel.is_cancelled());
    }
}
