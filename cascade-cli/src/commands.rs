//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use cascade_core::config::{CascadeConfig, TargetProfile};
use cascade_core::demux::SimulationContainerReader;
use cascade_core::media::TrackConfiguration;
use cascade_core::pipeline::{NullFrameSink, Pipeline, PipelineRequest, PipelineSignal, RunStats};
use cascade_core::simulation::SimulationBackend;
use cascade_core::upload::{HttpUploadTransport, MemoryTransport, UploadTransport};
use clap::Subcommand;
use url::Url;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Transcode a file and upload segments to an HTTP endpoint
    Run {
        /// Container file to transcode
        input: PathBuf,
        /// Upload endpoint accepting multipart POSTs
        #[arg(short, long)]
        endpoint: Url,
        /// Target resolution height (144, 240, 480, 720, or 1080)
        #[arg(long, default_value = "144")]
        height: u32,
        /// Target bitrate in bits per second
        #[arg(long)]
        bitrate: Option<u64>,
        /// Print the run result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the pipeline against an in-memory upload target
    Simulate {
        /// Container file to transcode
        input: PathBuf,
        /// Target resolution height (144, 240, 480, 720, or 1080)
        #[arg(long, default_value = "144")]
        height: u32,
        /// Segment threshold in bytes
        #[arg(long, default_value = "10000000")]
        threshold: u64,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Run {
            input,
            endpoint,
            height,
            bitrate,
            json,
        } => run_upload(input, endpoint, height, bitrate, json).await,
        Commands::Simulate {
            input,
            height,
            threshold,
        } => run_simulation(input, height, threshold).await,
    }
}

/// Transcode a file and post its segments to an HTTP endpoint
///
/// # Errors
/// - Invalid target height or profile
/// - Any pipeline failure, reported through the terminal signal
async fn run_upload(
    input: PathBuf,
    endpoint: Url,
    height: u32,
    bitrate: Option<u64>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut profile = profile_for_height(height)?;
    if let Some(bitrate) = bitrate {
        profile.bitrate = bitrate;
    }
    profile.validate()?;

    let config = CascadeConfig {
        profile: profile.clone(),
        ..CascadeConfig::default()
    };
    let transport = Arc::new(HttpUploadTransport::new(
        endpoint,
        config.upload.content_type.clone(),
    ));

    let stats = execute(config, transport, input.clone(), profile, json).await?;
    if !json {
        println!(
            "Uploaded {} segments ({} container bytes) from {}",
            stats.segments,
            stats.bytes_muxed,
            input.display()
        );
    }
    Ok(())
}

/// Run against an in-memory transport and print what would be uploaded
///
/// # Errors
/// - Invalid target height
/// - Any pipeline failure, reported through the terminal signal
async fn run_simulation(
    input: PathBuf,
    height: u32,
    threshold: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let profile = profile_for_height(height)?;

    let mut config = CascadeConfig {
        profile: profile.clone(),
        ..CascadeConfig::default()
    };
    config.upload.segment_threshold = threshold;
    let transport = Arc::new(MemoryTransport::new());

    execute(config, Arc::clone(&transport) as Arc<dyn UploadTransport>, input, profile, false)
        .await?;

    println!("Segments that would have been uploaded:");
    for segment in transport.segments().await {
        println!("  {} ({} bytes)", segment.name, segment.byte_len);
    }
    Ok(())
}

/// Wires the pipeline, runs it to its terminal signal, and reports
/// elapsed wall-clock time from this side of the invocation boundary.
async fn execute(
    config: CascadeConfig,
    transport: Arc<dyn UploadTransport>,
    input: PathBuf,
    profile: TargetProfile,
    json: bool,
) -> Result<RunStats, Box<dyn std::error::Error>> {
    // The simulation reader synthesizes demux events from the raw
    // byte stream; the track configuration describes the source track.
    let track = TrackConfiguration {
        codec: "avc1.42002A".to_string(),
        coded_width: 1920,
        coded_height: 1080,
        description: Bytes::from_static(&[0x01; 8]),
    };

    let pipeline = Pipeline::new(
        config,
        Arc::new(SimulationBackend::new()),
        Arc::new(SimulationContainerReader::new(track)),
        transport,
        Arc::new(NullFrameSink),
    );

    let started = Instant::now();
    let handle = pipeline.spawn(PipelineRequest {
        source: input,
        profile,
    });
    let signal = handle.wait().await;
    let elapsed = started.elapsed();

    if json {
        println!("{}", serde_json::to_string_pretty(&signal)?);
    }

    match signal {
        PipelineSignal::Done { stats } => {
            if !json {
                println!("Pipeline finished in {:.2}s", elapsed.as_secs_f64());
            }
            Ok(stats)
        }
        PipelineSignal::Failed { error } => Err(error.into()),
    }
}

/// Maps a target height to its resolution preset
fn profile_for_height(height: u32) -> Result<TargetProfile, String> {
    match height {
        144 => Ok(TargetProfile::preset_144p()),
        240 => Ok(TargetProfile::preset_240p()),
        480 => Ok(TargetProfile::preset_480p()),
        720 => Ok(TargetProfile::preset_720p()),
        1080 => Ok(TargetProfile::preset_1080p()),
        other => Err(format!(
            "Unsupported target height: {other}. Use 144, 240, 480, 720, or 1080."
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_for_height_known_presets() {
        assert_eq!(profile_for_height(144).unwrap().width, 256);
        assert_eq!(profile_for_height(720).unwrap().width, 1280);
    }

    #[test]
    fn test_profile_for_height_rejects_unknown() {
        assert!(profile_for_height(333).is_err());
    }

    #[tokio::test]
    async fn test_simulation_command_end_to_end() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, vec![0u8; 50_000]).unwrap();

        let result = run_simulation(input, 144, 10_000).await;
        assert!(result.is_ok());
    }
}
