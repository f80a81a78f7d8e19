//! Deterministic media backend for tests and local development.
//!
//! Composes the simulation capabilities into a [`MediaBackend`] so an
//! entire pipeline run executes without real codecs attached. Every
//! instance the backend opens is fresh; nothing is shared across runs.

use crate::codec::{SimulationDecoder, SimulationEncoder, VideoDecoder, VideoEncoder};
use crate::mux::{ContainerMuxer, SimulationMuxer};
use crate::pipeline::MediaBackend;

/// Backend producing simulation decoders, encoders, and muxers.
pub struct SimulationBackend {
    decoder_reorder_window: usize,
    encoder_chunk_size: usize,
    encoder_failure_after: Option<u64>,
    supported_codecs: Option<Vec<String>>,
}

impl SimulationBackend {
    /// Creates a backend with the capability defaults.
    pub fn new() -> Self {
        Self {
            decoder_reorder_window: 0,
            encoder_chunk_size: 4096,
            encoder_failure_after: None,
            supported_codecs: None,
        }
    }

    /// Sets how many frames each decoder holds back before emitting.
    #[must_use]
    pub fn with_decoder_reorder_window(mut self, window_size: usize) -> Self {
        self.decoder_reorder_window = window_size;
        self
    }

    /// Sets the byte size of every encoded chunk.
    #[must_use]
    pub fn with_encoder_chunk_size(mut self, chunk_size: usize) -> Self {
        self.encoder_chunk_size = chunk_size;
        self
    }

    /// Makes every opened encoder fail after the given frame count.
    #[must_use]
    pub fn with_encoder_failure_after(mut self, frames: u64) -> Self {
        self.encoder_failure_after = Some(frames);
        self
    }

    /// Restricts the codec prefixes encoders report as supported.
    #[must_use]
    pub fn with_supported_codecs(mut self, codecs: Vec<String>) -> Self {
        self.supported_codecs = Some(codecs);
        self
    }
}

impl Default for SimulationBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for SimulationBackend {
    fn open_decoder(&self) -> Box<dyn VideoDecoder> {
        Box::new(SimulationDecoder::new().with_reorder_window(self.decoder_reorder_window))
    }

    fn open_encoder(&self) -> Box<dyn VideoEncoder> {
        let mut encoder = SimulationEncoder::new().with_chunk_size(self.encoder_chunk_size);
        if let Some(codecs) = &self.supported_codecs {
            encoder = encoder.with_supported_codecs(codecs.clone());
        }
        if let Some(frames) = self.encoder_failure_after {
            encoder = encoder.with_failure_after(frames);
        }
        Box::new(encoder)
    }

    fn open_muxer(&self, write_size: usize) -> Box<dyn ContainerMuxer> {
        Box::new(SimulationMuxer::new(write_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetProfile;

    #[tokio::test]
    async fn test_opened_encoders_are_independent() {
        let backend = SimulationBackend::new().with_supported_codecs(vec!["vp09".to_string()]);
        let first = backend.open_encoder();
        let second = backend.open_encoder();

        assert!(first.is_supported(&TargetProfile::default()).await);
        assert!(second.is_supported(&TargetProfile::default()).await);
    }

    #[tokio::test]
    async fn test_codec_restriction_applies_to_opened_encoders() {
        let backend = SimulationBackend::new().with_supported_codecs(vec!["hvc1".to_string()]);
        let encoder = backend.open_encoder();

        assert!(!encoder.is_supported(&TargetProfile::default()).await);
    }
}
