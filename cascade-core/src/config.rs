//! Centralized configuration for Cascade.
//!
//! All tunable parameters live here to avoid hard-coded values scattered
//! throughout the pipeline. Every value is a typed struct field; there
//! are no open-ended key/value maps.

use serde::Serialize;

/// Central configuration for one pipeline invocation.
#[derive(Debug, Clone, Default)]
pub struct CascadeConfig {
    pub profile: TargetProfile,
    pub upload: UploadPolicy,
    pub tuning: PipelineTuning,
}

/// Hardware acceleration preference handed to the encode capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Acceleration {
    /// Let the capability decide
    NoPreference,
    /// Prefer a hardware implementation if one exists
    PreferHardware,
    /// Prefer a software implementation for predictable output
    PreferSoftware,
}

/// Target encode profile for a pipeline run.
///
/// Immutable once a run begins. The encode stage validates support for
/// this profile before accepting any frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetProfile {
    /// Output picture width in pixels
    pub width: u32,
    /// Output picture height in pixels
    pub height: u32,
    /// Target bitrate in bits per second
    pub bitrate: u64,
    /// Codec identifier string, e.g. "vp09.00.10.08"
    pub codec: String,
    /// Acceleration preference for the encode capability
    pub acceleration: Acceleration,
}

impl Default for TargetProfile {
    fn default() -> Self {
        Self::preset_144p()
    }
}

impl TargetProfile {
    const DEFAULT_BITRATE: u64 = 10_000_000; // 10 Mbps
    const DEFAULT_CODEC: &'static str = "vp09.00.10.08";

    fn preset(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bitrate: Self::DEFAULT_BITRATE,
            codec: Self::DEFAULT_CODEC.to_string(),
            acceleration: Acceleration::PreferSoftware,
        }
    }

    /// 256x144 preview profile.
    pub fn preset_144p() -> Self {
        Self::preset(256, 144)
    }

    /// 426x240 profile.
    pub fn preset_240p() -> Self {
        Self::preset(426, 240)
    }

    /// 854x480 profile.
    pub fn preset_480p() -> Self {
        Self::preset(854, 480)
    }

    /// 1280x720 profile.
    pub fn preset_720p() -> Self {
        Self::preset(1280, 720)
    }

    /// 1920x1080 profile.
    pub fn preset_1080p() -> Self {
        Self::preset(1920, 1080)
    }

    /// Label used in segment names, derived from the target height.
    pub fn resolution_label(&self) -> String {
        format!("{}p", self.height)
    }

    /// Rejects profiles no encoder could accept.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason if dimensions, bitrate, or the
    /// codec identifier are empty/zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!(
                "target dimensions must be non-zero: {}x{}",
                self.width, self.height
            ));
        }
        if self.bitrate == 0 {
            return Err("target bitrate must be non-zero".to_string());
        }
        if self.codec.is_empty() {
            return Err("target codec identifier is empty".to_string());
        }
        Ok(())
    }
}

/// Segmented upload policy.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Accumulated bytes that trigger a segment upload
    pub segment_threshold: u64,
    /// Segment file extension, without the dot
    pub extension: String,
    /// MIME type sent with each segment
    pub content_type: String,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            segment_threshold: 10_000_000, // 10 MB
            extension: "webm".to_string(),
            content_type: "video/webm".to_string(),
        }
    }
}

/// Bounded-memory knobs for the stage chain.
///
/// Channel capacities bound the number of in-flight items between any
/// two stages; a full channel suspends the producer, which is the
/// pipeline's entire backpressure mechanism.
#[derive(Debug, Clone)]
pub struct PipelineTuning {
    /// Capacity of every inter-stage channel, in items
    pub channel_capacity: usize,
    /// Size of reads from the source file
    pub read_chunk_size: usize,
    /// Preferred size of finalized container writes
    pub mux_write_size: usize,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            channel_capacity: 16,
            read_chunk_size: 256 * 1024, // 256 KiB
            mux_write_size: 1024 * 1024, // 1 MiB
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_is_144p() {
        let profile = TargetProfile::default();
        assert_eq!(profile.width, 256);
        assert_eq!(profile.height, 144);
        assert_eq!(profile.bitrate, 10_000_000);
        assert_eq!(profile.acceleration, Acceleration::PreferSoftware);
    }

    #[test]
    fn test_resolution_label_derived_from_height() {
        assert_eq!(TargetProfile::preset_144p().resolution_label(), "144p");
        assert_eq!(TargetProfile::preset_720p().resolution_label(), "720p");
    }

    #[test]
    fn test_profile_validation() {
        assert!(TargetProfile::default().validate().is_ok());

        let mut profile = TargetProfile::default();
        profile.width = 0;
        assert!(profile.validate().is_err());

        let mut profile = TargetProfile::default();
        profile.bitrate = 0;
        assert!(profile.validate().is_err());

        let mut profile = TargetProfile::default();
        profile.codec.clear();
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_upload_policy_defaults() {
        let policy = UploadPolicy::default();
        assert_eq!(policy.segment_threshold, 10_000_000);
        assert_eq!(policy.extension, "webm");
        assert_eq!(policy.content_type, "video/webm");
    }
}
