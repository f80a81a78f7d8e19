//! Cascade Core - Chained transcode-and-upload stream pipeline
//!
//! This crate ingests a container-wrapped video file, decodes it,
//! re-encodes it at a lower target resolution, previews the result,
//! repackages it into an output container, and uploads the result in
//! size-bounded segments. The whole chain runs off the invoking
//! context as spawned tasks wired with bounded channels: a full
//! channel suspends the producer, which bounds in-flight memory for
//! arbitrarily large inputs.

pub mod codec;
pub mod config;
pub mod demux;
pub mod media;
pub mod mux;
pub mod pipeline;
pub mod simulation;
pub mod tracing_setup;
pub mod upload;

// Re-export main types for convenient access
pub use config::{CascadeConfig, TargetProfile};
pub use pipeline::{Pipeline, PipelineRequest, PipelineSignal, RunHandle};

use crate::codec::CodecError;
use crate::demux::DemuxError;
use crate::mux::MuxError;
use crate::upload::UploadError;

/// Terminal errors a pipeline run can resolve with.
///
/// Any stage failure terminates the entire chained sequence; the
/// orchestrator reports exactly one of these per run. No stage
/// performs local recovery.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The target profile was rejected before any work began
    #[error("target profile not supported: {codec} {width}x{height}")]
    CapabilityUnsupported {
        /// Rejected codec identifier
        codec: String,
        /// Rejected output width
        width: u32,
        /// Rejected output height
        height: u32,
    },

    /// The input container could not be parsed
    #[error("container parse error: {0}")]
    ContainerParse(#[from] DemuxError),

    /// The decode capability failed mid-stream
    #[error("decode error: {0}")]
    Decode(CodecError),

    /// The encode capability failed mid-stream
    #[error("encode error: {0}")]
    Encode(CodecError),

    /// The output container muxer failed
    #[error("mux error: {0}")]
    Mux(#[from] MuxError),

    /// A segment upload failed; nothing is retried
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),

    /// The source file could not be read
    #[error("source read failed: {0}")]
    SourceRead(#[from] std::io::Error),

    /// The decoder drained without producing a frame for every sample
    #[error("frame loss: {submitted} samples submitted, {emitted} frames emitted")]
    FrameLoss {
        /// Samples submitted to the decoder
        submitted: u64,
        /// Frames the decoder emitted
        emitted: u64,
    },

    /// A stage task panicked or was aborted
    #[error("pipeline task failed: {reason}")]
    Internal {
        /// What the runtime reported
        reason: String,
    },

    /// The run was cancelled at a suspension point
    #[error("pipeline run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// True for the secondary error a stage reports when it unwinds
    /// because some other stage failed first.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
