//! Data contracts passed between pipeline stages.
//!
//! These types are the only currency the stages exchange: a track
//! configuration produced once per input, ordered encoded samples,
//! single-use decoded frames, and the discriminated output chunk that
//! threads the encoder's configuration record through a single channel
//! without a side channel.

use bytes::Bytes;

/// Per-track decoder initialization data extracted from the input container.
///
/// Produced at most once per input, before the first sample, and immutable
/// for the lifetime of a run. The same type carries the encoder's
/// configuration record downstream to the preview and packaging stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackConfiguration {
    /// Codec identifier string, e.g. "vp09.00.10.08" or "avc1.42002A"
    pub codec: String,
    /// Coded picture width in pixels
    pub coded_width: u32,
    /// Coded picture height in pixels
    pub coded_height: u32,
    /// Codec-specific description payload (e.g. avcC/vpcC box contents),
    /// opaque to the pipeline
    pub description: Bytes,
}

/// Whether a sample can be decoded independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// Independently decodable sample (sync sample)
    Key,
    /// Sample depending on previously decoded samples
    Delta,
}

/// One ordered unit of compressed video data.
///
/// Samples are consumed exactly once, in production order. Decode
/// correctness depends on that ordering, so no stage may reorder or
/// drop them.
#[derive(Debug, Clone)]
pub struct EncodedSample {
    /// Key or delta classification from the container
    pub kind: SampleKind,
    /// Presentation timestamp in microseconds
    pub timestamp_us: i64,
    /// Display duration in microseconds
    pub duration_us: i64,
    /// Compressed payload, opaque to the pipeline
    pub data: Bytes,
}

impl EncodedSample {
    /// Returns true for independently decodable samples.
    pub fn is_key(&self) -> bool {
        matches!(self.kind, SampleKind::Key)
    }
}

/// A raw decoded picture.
///
/// Frames come from a finite decoder pool, so they are single-use by
/// construction: every consuming operation takes the frame by value and
/// ends its lifetime. There is no release call to forget.
#[derive(Debug)]
pub struct DecodedFrame {
    /// Presentation timestamp in microseconds
    pub timestamp_us: i64,
    /// Picture width in pixels
    pub coded_width: u32,
    /// Picture height in pixels
    pub coded_height: u32,
    /// Raw plane data
    pub planes: Bytes,
}

impl DecodedFrame {
    /// Total size of the raw plane data in bytes.
    pub fn byte_len(&self) -> usize {
        self.planes.len()
    }
}

/// Output of the encode stage.
///
/// At most one `Configuration` appears per run, and it appears strictly
/// before any `Encoded` chunk that depends on it. Both the preview path
/// and the packaging path rely on that ordering.
#[derive(Debug, Clone)]
pub enum OutputChunk {
    /// Decoder configuration record for the freshly encoded stream
    Configuration(TrackConfiguration),
    /// One encoded chunk in presentation order
    Encoded(EncodedSample),
}

impl OutputChunk {
    /// Returns true for the configuration record variant.
    pub fn is_configuration(&self) -> bool {
        matches!(self, OutputChunk::Configuration(_))
    }

    /// Payload size in bytes (zero for configuration records).
    pub fn byte_len(&self) -> usize {
        match self {
            OutputChunk::Configuration(_) => 0,
            OutputChunk::Encoded(sample) => sample.data.len(),
        }
    }
}
