//! Container reader contract.
//!
//! The pipeline treats container parsing as an external collaborator:
//! a reader turns an incoming byte stream into one track configuration
//! followed by ordered encoded samples. Box-tree traversal lives behind
//! the trait; only the event contract matters here.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::media::{EncodedSample, SampleKind, TrackConfiguration};

/// Errors surfaced by a container reader.
#[derive(Debug, Error)]
pub enum DemuxError {
    /// The container declared a video track but carried no codec
    /// description box to initialize a decoder from
    #[error("no codec description found for video track")]
    MissingDescription,

    /// The container carries no video track at all
    #[error("no video track in input")]
    NoVideoTrack,

    /// The container structure could not be parsed
    #[error("malformed container: {reason}")]
    Malformed {
        /// Specific reason for the parse failure
        reason: String,
    },

    /// The event consumer went away before the reader finished
    #[error("demux event stream terminated")]
    Terminated,
}

/// One demultiplexed event.
///
/// `Config` fires at most once and strictly before the first `Sample`;
/// samples arrive in ascending presentation order.
#[derive(Debug, Clone)]
pub enum DemuxEvent {
    /// Track configuration for the first video track
    Config(TrackConfiguration),
    /// One encoded sample in presentation order
    Sample(EncodedSample),
}

/// Turns a container byte stream into ordered demux events.
#[async_trait]
pub trait ContainerReader: Send + Sync {
    /// Consumes the input byte stream and emits events until the
    /// container is exhausted.
    ///
    /// # Errors
    ///
    /// - `DemuxError::MissingDescription` - Track present but not initializable
    /// - `DemuxError::NoVideoTrack` - Input carries no video track
    /// - `DemuxError::Malformed` - Container structure unreadable
    /// - `DemuxError::Terminated` - Event consumer dropped mid-stream
    async fn run(
        &self,
        input: mpsc::Receiver<Bytes>,
        events: mpsc::Sender<DemuxEvent>,
    ) -> Result<(), DemuxError>;
}

/// Deterministic container reader for tests and demo runs.
///
/// Synthesizes a configured video track from the raw byte stream: the
/// first bytes trigger the track configuration, and every
/// `sample_size` consumed bytes become one encoded sample. Output is
/// byte-exact and ordered, which keeps pipeline math verifiable
/// without a real container parser.
pub struct SimulationContainerReader {
    config: TrackConfiguration,
    sample_size: usize,
    sample_duration_us: i64,
    keyframe_interval: u64,
}

impl SimulationContainerReader {
    /// Creates a reader that reports the given track configuration.
    pub fn new(config: TrackConfiguration) -> Self {
        Self {
            config,
            sample_size: 4096,
            sample_duration_us: 33_333, // ~30fps
            keyframe_interval: 30,
        }
    }

    /// Sets how many input bytes make up one synthesized sample.
    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Sets the synthesized sample duration in microseconds.
    pub fn with_sample_duration_us(mut self, duration_us: i64) -> Self {
        self.sample_duration_us = duration_us;
        self
    }

    fn sample_at(&self, index: u64, data: Bytes) -> EncodedSample {
        let kind = if index % self.keyframe_interval == 0 {
            SampleKind::Key
        } else {
            SampleKind::Delta
        };
        EncodedSample {
            kind,
            timestamp_us: index as i64 * self.sample_duration_us,
            duration_us: self.sample_duration_us,
            data,
        }
    }
}

#[async_trait]
impl ContainerReader for SimulationContainerReader {
    async fn run(
        &self,
        mut input: mpsc::Receiver<Bytes>,
        events: mpsc::Sender<DemuxEvent>,
    ) -> Result<(), DemuxError> {
        let mut pending = BytesMut::new();
        let mut configured = false;
        let mut sample_index = 0u64;

        while let Some(chunk) = input.recv().await {
            trace!("demux consumed {} input bytes", chunk.len());
            pending.extend_from_slice(&chunk);

            if !configured {
                // A track without a description box cannot initialize a
                // decoder; surface that before emitting any sample.
                if self.config.description.is_empty() {
                    return Err(DemuxError::MissingDescription);
                }
                events
                    .send(DemuxEvent::Config(self.config.clone()))
                    .await
                    .map_err(|_| DemuxError::Terminated)?;
                configured = true;
                debug!(
                    "demux configured track: {} {}x{}",
                    self.config.codec, self.config.coded_width, self.config.coded_height
                );
            }

            while pending.len() >= self.sample_size {
                let data = pending.split_to(self.sample_size).freeze();
                let sample = self.sample_at(sample_index, data);
                events
                    .send(DemuxEvent::Sample(sample))
                    .await
                    .map_err(|_| DemuxError::Terminated)?;
                sample_index += 1;
            }
        }

        if !configured {
            return Err(DemuxError::NoVideoTrack);
        }

        // Flush the sub-sample remainder as a final short sample.
        if !pending.is_empty() {
            let sample = self.sample_at(sample_index, pending.freeze());
            events
                .send(DemuxEvent::Sample(sample))
                .await
                .map_err(|_| DemuxError::Terminated)?;
            sample_index += 1;
        }

        debug!("demux finished: {} samples", sample_index);
        Ok(())
    }
}
