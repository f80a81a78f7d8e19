//! Output container muxer contract.
//!
//! Container construction is an external collaborator. The pipeline
//! hands the muxer the configuration record and encoded chunks in
//! order, and reads back finalized byte ranges as the muxer flushes
//! them. Muxers buffer internally and flush in bounded-size writes,
//! not one write per input chunk.

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tracing::trace;

use crate::media::{EncodedSample, TrackConfiguration};

/// Errors surfaced by a container muxer.
#[derive(Debug, Error)]
pub enum MuxError {
    /// A chunk arrived before the configuration record it depends on
    #[error("encoded chunk received before configuration record")]
    MissingConfiguration,

    /// The muxer could not frame the output container
    #[error("container write failed: {reason}")]
    WriteFailed {
        /// Specific reason for the write failure
        reason: String,
    },
}

/// Accumulates encoded chunks into an output container byte stream.
///
/// Exactly one instance serves one pipeline run.
pub trait ContainerMuxer: Send {
    /// Applies the configuration record. Must be called before the
    /// first `add_chunk`.
    ///
    /// # Errors
    ///
    /// - `MuxError::WriteFailed` - Configuration could not be framed
    fn apply_config(&mut self, config: &TrackConfiguration) -> Result<(), MuxError>;

    /// Appends one encoded chunk, in presentation order.
    ///
    /// # Errors
    ///
    /// - `MuxError::MissingConfiguration` - No configuration applied yet
    /// - `MuxError::WriteFailed` - Chunk could not be framed
    fn add_chunk(&mut self, chunk: &EncodedSample) -> Result<(), MuxError>;

    /// Takes the next finalized byte range, if the muxer has flushed one.
    fn poll_bytes(&mut self) -> Option<Bytes>;

    /// Finishes the container and returns any trailing bytes.
    ///
    /// # Errors
    ///
    /// - `MuxError::WriteFailed` - Trailer could not be written
    fn finalize(&mut self) -> Result<Bytes, MuxError>;
}

/// Byte-exact muxer for tests and demo runs.
///
/// Passes chunk payloads through unframed and flushes them in
/// fixed-size writes, so downstream byte math stays verifiable. Real
/// container framing (headers, cueing) belongs to an external muxer
/// behind the same trait.
pub struct SimulationMuxer {
    configured: bool,
    buffered: BytesMut,
    write_size: usize,
    total_bytes: u64,
}

impl SimulationMuxer {
    /// Creates a muxer flushing in `write_size` blocks.
    pub fn new(write_size: usize) -> Self {
        Self {
            configured: false,
            buffered: BytesMut::new(),
            write_size,
            total_bytes: 0,
        }
    }

    /// Total bytes produced so far.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

impl ContainerMuxer for SimulationMuxer {
    fn apply_config(&mut self, config: &TrackConfiguration) -> Result<(), MuxError> {
        trace!(
            "muxer configured for {} {}x{}",
            config.codec, config.coded_width, config.coded_height
        );
        self.configured = true;
        Ok(())
    }

    fn add_chunk(&mut self, chunk: &EncodedSample) -> Result<(), MuxError> {
        if !self.configured {
            return Err(MuxError::MissingConfiguration);
        }
        trace!(
            "muxing {} chunk: {} bytes at {}us",
            if chunk.is_key() { "key" } else { "delta" },
            chunk.data.len(),
            chunk.timestamp_us
        );
        self.buffered.extend_from_slice(&chunk.data);
        self.total_bytes += chunk.data.len() as u64;
        Ok(())
    }

    fn poll_bytes(&mut self) -> Option<Bytes> {
        if self.buffered.len() >= self.write_size {
            Some(self.buffered.split_to(self.write_size).freeze())
        } else {
            None
        }
    }

    fn finalize(&mut self) -> Result<Bytes, MuxError> {
        Ok(self.buffered.split().freeze())
    }
}
