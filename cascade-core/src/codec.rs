//! Opaque decode/encode capability contracts.
//!
//! Pixel transforms and entropy coding are external collaborators. The
//! pipeline only needs a configure/submit/drain contract: submit items
//! in order, receive outputs in order, and drain deterministically at
//! end of stream. `flush` is the explicit drain acknowledgment: a
//! stage knows every submitted item has produced its output when the
//! call returns, so no stage ever closes its output on a timer.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use crate::config::TargetProfile;
use crate::media::{DecodedFrame, EncodedSample, OutputChunk, SampleKind, TrackConfiguration};

/// Errors surfaced by a codec capability.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The requested configuration is not supported by this capability
    #[error("configuration not supported: {reason}")]
    Unsupported {
        /// What the capability rejected
        reason: String,
    },

    /// An item was submitted before the capability was configured
    #[error("codec used before configuration")]
    NotConfigured,

    /// Internal decode failure; the stream cannot continue
    #[error("decode failed: {reason}")]
    Decode {
        /// Specific reason reported by the capability
        reason: String,
    },

    /// Internal encode failure; the stream cannot continue
    #[error("encode failed: {reason}")]
    Encode {
        /// Specific reason reported by the capability
        reason: String,
    },
}

/// Opaque video decode capability.
///
/// Exactly one instance serves one pipeline run; instances are never
/// shared between runs.
#[async_trait]
pub trait VideoDecoder: Send {
    /// Initializes the decoder from the container's track configuration.
    ///
    /// # Errors
    ///
    /// - `CodecError::Unsupported` - Configuration rejected by the capability
    async fn configure(&mut self, config: &TrackConfiguration) -> Result<(), CodecError>;

    /// Submits one encoded sample, returning any frames that completed
    /// as a result, in presentation order. Codec delay may hold frames
    /// back; `flush` returns the rest.
    ///
    /// # Errors
    ///
    /// - `CodecError::NotConfigured` - `configure` has not succeeded yet
    /// - `CodecError::Decode` - Internal decode failure
    async fn decode(&mut self, sample: EncodedSample) -> Result<Vec<DecodedFrame>, CodecError>;

    /// Drains every pending frame. When this returns, all previously
    /// submitted samples have produced their output.
    ///
    /// # Errors
    ///
    /// - `CodecError::Decode` - Internal decode failure while draining
    async fn flush(&mut self) -> Result<Vec<DecodedFrame>, CodecError>;
}

/// Opaque video encode capability.
#[async_trait]
pub trait VideoEncoder: Send {
    /// Reports whether the capability can encode the given profile.
    /// Must be consulted before `configure`.
    async fn is_supported(&self, profile: &TargetProfile) -> bool;

    /// Initializes the encoder for the target profile.
    ///
    /// # Errors
    ///
    /// - `CodecError::Unsupported` - Profile rejected by the capability
    async fn configure(&mut self, profile: &TargetProfile) -> Result<(), CodecError>;

    /// Submits one decoded frame, consuming it regardless of outcome.
    ///
    /// The first returned batch carries the configuration record ahead
    /// of the chunk that depends on it; it appears exactly once per
    /// encoder lifetime.
    ///
    /// # Errors
    ///
    /// - `CodecError::NotConfigured` - `configure` has not succeeded yet
    /// - `CodecError::Encode` - Internal encode failure
    async fn encode(&mut self, frame: DecodedFrame) -> Result<Vec<OutputChunk>, CodecError>;

    /// Drains every pending chunk. When this returns, all previously
    /// submitted frames have produced their output.
    ///
    /// # Errors
    ///
    /// - `CodecError::Encode` - Internal encode failure while draining
    async fn flush(&mut self) -> Result<Vec<OutputChunk>, CodecError>;
}

/// Deterministic decoder for tests and demo runs.
///
/// Emits exactly one frame per sample, preserving timestamps. A
/// configurable reorder window holds samples back the way a real
/// codec's decode delay does, which makes the drain contract
/// observable in tests.
pub struct SimulationDecoder {
    config: Option<TrackConfiguration>,
    window: Vec<EncodedSample>,
    window_size: usize,
}

impl SimulationDecoder {
    /// Creates an unconfigured simulation decoder.
    pub fn new() -> Self {
        Self {
            config: None,
            window: Vec::new(),
            window_size: 0,
        }
    }

    /// Holds up to `window_size` samples before emitting their frames,
    /// simulating codec delay.
    pub fn with_reorder_window(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    /// 4:2:0 layout: full-resolution luma plus two half-size chroma
    /// planes. Widened before multiplying so large coded dimensions
    /// cannot overflow.
    fn plane_len(config: &TrackConfiguration) -> usize {
        let luma = config.coded_width as usize * config.coded_height as usize;
        luma + luma / 2
    }

    fn frame_for(config: &TrackConfiguration, sample: &EncodedSample) -> DecodedFrame {
        DecodedFrame {
            timestamp_us: sample.timestamp_us,
            coded_width: config.coded_width,
            coded_height: config.coded_height,
            planes: Bytes::from(vec![0u8; Self::plane_len(config)]),
        }
    }
}

impl Default for SimulationDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoDecoder for SimulationDecoder {
    async fn configure(&mut self, config: &TrackConfiguration) -> Result<(), CodecError> {
        if config.description.is_empty() {
            return Err(CodecError::Unsupported {
                reason: "empty codec description".to_string(),
            });
        }
        debug!(
            "simulation decoder configured: {} {}x{}",
            config.codec, config.coded_width, config.coded_height
        );
        self.config = Some(config.clone());
        Ok(())
    }

    async fn decode(&mut self, sample: EncodedSample) -> Result<Vec<DecodedFrame>, CodecError> {
        let Some(config) = self.config.clone() else {
            return Err(CodecError::NotConfigured);
        };

        self.window.push(sample);
        let mut frames = Vec::new();
        while self.window.len() > self.window_size {
            let sample = self.window.remove(0);
            frames.push(Self::frame_for(&config, &sample));
        }
        Ok(frames)
    }

    async fn flush(&mut self) -> Result<Vec<DecodedFrame>, CodecError> {
        let pending = std::mem::take(&mut self.window);
        match &self.config {
            Some(config) => Ok(pending
                .iter()
                .map(|sample| Self::frame_for(config, sample))
                .collect()),
            None => Ok(Vec::new()),
        }
    }
}

/// Deterministic encoder for tests and demo runs.
///
/// Emits one fixed-size chunk per frame and the configuration record
/// strictly before the first chunk. The supported-codec set and chunk
/// size are configurable so tests can steer capability negotiation and
/// output byte math.
pub struct SimulationEncoder {
    supported_codecs: Vec<String>,
    profile: Option<TargetProfile>,
    config_emitted: bool,
    chunk_size: usize,
    keyframe_interval: u64,
    frames_seen: u64,
    fail_after: Option<u64>,
}

impl SimulationEncoder {
    /// Creates an encoder supporting the common web codec families.
    pub fn new() -> Self {
        Self {
            supported_codecs: vec![
                "vp09".to_string(),
                "vp8".to_string(),
                "avc1".to_string(),
            ],
            profile: None,
            config_emitted: false,
            chunk_size: 4096,
            keyframe_interval: 30,
            frames_seen: 0,
            fail_after: None,
        }
    }

    /// Restricts the supported codec identifier prefixes.
    pub fn with_supported_codecs(mut self, codecs: Vec<String>) -> Self {
        self.supported_codecs = codecs;
        self
    }

    /// Sets the exact size of every emitted chunk.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Fails the encode after the given number of frames, for error
    /// propagation tests.
    pub fn with_failure_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    fn config_record(&self, profile: &TargetProfile) -> TrackConfiguration {
        TrackConfiguration {
            codec: profile.codec.clone(),
            coded_width: profile.width,
            coded_height: profile.height,
            description: Bytes::from_static(&[0xC5; 16]),
        }
    }
}

impl Default for SimulationEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoEncoder for SimulationEncoder {
    async fn is_supported(&self, profile: &TargetProfile) -> bool {
        profile.validate().is_ok()
            && self
                .supported_codecs
                .iter()
                .any(|prefix| profile.codec.starts_with(prefix.as_str()))
    }

    async fn configure(&mut self, profile: &TargetProfile) -> Result<(), CodecError> {
        if !self.is_supported(profile).await {
            return Err(CodecError::Unsupported {
                reason: format!("codec {} not in supported set", profile.codec),
            });
        }
        debug!(
            "simulation encoder configured: {} {}x{} @ {}bps",
            profile.codec, profile.width, profile.height, profile.bitrate
        );
        self.profile = Some(profile.clone());
        Ok(())
    }

    async fn encode(&mut self, frame: DecodedFrame) -> Result<Vec<OutputChunk>, CodecError> {
        // The frame is moved into this call; its lifetime ends here
        // whether or not encoding succeeds.
        let profile = self.profile.as_ref().ok_or(CodecError::NotConfigured)?;

        if let Some(limit) = self.fail_after
            && self.frames_seen >= limit
        {
            return Err(CodecError::Encode {
                reason: format!("simulated failure after {limit} frames"),
            });
        }

        let mut chunks = Vec::new();
        if !self.config_emitted {
            chunks.push(OutputChunk::Configuration(self.config_record(profile)));
            self.config_emitted = true;
        }

        let kind = if self.frames_seen % self.keyframe_interval == 0 {
            SampleKind::Key
        } else {
            SampleKind::Delta
        };
        chunks.push(OutputChunk::Encoded(EncodedSample {
            kind,
            timestamp_us: frame.timestamp_us,
            duration_us: 33_333,
            data: Bytes::from(vec![0xE0; self.chunk_size]),
        }));
        self.frames_seen += 1;
        Ok(chunks)
    }

    async fn flush(&mut self) -> Result<Vec<OutputChunk>, CodecError> {
        // Chunks are emitted eagerly, so draining is a no-op.
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_config() -> TrackConfiguration {
        TrackConfiguration {
            codec: "avc1.42002A".to_string(),
            coded_width: 64,
            coded_height: 48,
            description: Bytes::from_static(&[1u8; 8]),
        }
    }

    fn sample(timestamp_us: i64) -> EncodedSample {
        EncodedSample {
            kind: SampleKind::Key,
            timestamp_us,
            duration_us: 33_333,
            data: Bytes::from_static(&[0u8; 32]),
        }
    }

    fn frame(timestamp_us: i64) -> DecodedFrame {
        DecodedFrame {
            timestamp_us,
            coded_width: 64,
            coded_height: 48,
            planes: Bytes::from_static(&[0u8; 16]),
        }
    }

    #[tokio::test]
    async fn test_decoder_requires_configuration() {
        let mut decoder = SimulationDecoder::new();
        let result = decoder.decode(sample(0)).await;
        assert!(matches!(result, Err(CodecError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_decoder_one_frame_per_sample() {
        let mut decoder = SimulationDecoder::new();
        decoder.configure(&track_config()).await.unwrap();

        let frames = decoder.decode(sample(0)).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestamp_us, 0);
        assert_eq!(frames[0].coded_width, 64);
    }

    #[test]
    fn test_plane_len_survives_large_dimensions() {
        // 65536x65536 luma alone exceeds u32; the sizing math must not
        // wrap for dimensions a container can legally declare.
        let config = TrackConfiguration {
            codec: "avc1.42002A".to_string(),
            coded_width: 65_536,
            coded_height: 65_536,
            description: Bytes::from_static(&[1u8; 8]),
        };
        assert_eq!(SimulationDecoder::plane_len(&config), 6_442_450_944);
    }

    #[tokio::test]
    async fn test_decoder_flush_drains_reorder_window() {
        let mut decoder = SimulationDecoder::new().with_reorder_window(2);
        decoder.configure(&track_config()).await.unwrap();

        let mut emitted = 0;
        for i in 0..5 {
            emitted += decoder.decode(sample(i * 1000)).await.unwrap().len();
        }
        assert_eq!(emitted, 3); // two frames held back by the window

        let drained = decoder.flush().await.unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].timestamp_us, 3000);
        assert_eq!(drained[1].timestamp_us, 4000);
    }

    #[tokio::test]
    async fn test_encoder_support_check() {
        let encoder = SimulationEncoder::new();
        assert!(encoder.is_supported(&TargetProfile::default()).await);

        let mut unsupported = TargetProfile::default();
        unsupported.codec = "av01.0.04M.08".to_string();
        assert!(!encoder.is_supported(&unsupported).await);
    }

    #[tokio::test]
    async fn test_encoder_emits_config_record_exactly_once() {
        let mut encoder = SimulationEncoder::new().with_chunk_size(64);
        encoder.configure(&TargetProfile::default()).await.unwrap();

        let first = encoder.encode(frame(0)).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first[0].is_configuration());
        assert!(!first[1].is_configuration());

        let second = encoder.encode(frame(33_333)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert!(!second[0].is_configuration());
    }

    #[tokio::test]
    async fn test_encoder_rejects_unsupported_configure() {
        let mut encoder =
            SimulationEncoder::new().with_supported_codecs(vec!["hvc1".to_string()]);
        let result = encoder.configure(&TargetProfile::default()).await;
        assert!(matches!(result, Err(CodecError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn test_encoder_simulated_failure() {
        let mut encoder = SimulationEncoder::new().with_failure_after(1);
        encoder.configure(&TargetProfile::default()).await.unwrap();

        assert!(encoder.encode(frame(0)).await.is_ok());
        let result = encoder.encode(frame(33_333)).await;
        assert!(matches!(result, Err(CodecError::Encode { .. })));
    }
}
