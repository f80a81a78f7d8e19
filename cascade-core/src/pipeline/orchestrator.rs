//! Pipeline orchestrator: wires the stage chain for one run.
//!
//! The orchestrator spawns every stage as its own task, joins them
//! with bounded channels, and resolves the whole run into exactly one
//! terminal signal. The invoking context transfers the source path and
//! the render sink in, receives `Done` or `Failed` back, and measures
//! elapsed time on its own side of the boundary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{DecodeStage, EncodeStage, FrameSink, PackageStage, PreviewStage, recv_or_cancel, send_or_cancel};
use crate::PipelineError;
use crate::codec::{VideoDecoder, VideoEncoder};
use crate::config::{CascadeConfig, TargetProfile};
use crate::demux::{ContainerReader, DemuxError};
use crate::mux::ContainerMuxer;
use crate::upload::{ChunkedUploadSink, UploadTransport};

/// Opens fresh capability instances for one run.
///
/// Decode and encode capabilities come from finite pools; no run may
/// reuse another run's instances, so the orchestrator asks the backend
/// for new ones at every invocation.
pub trait MediaBackend: Send + Sync {
    /// Opens a decoder instance (called twice per run: main decode and
    /// preview decode).
    fn open_decoder(&self) -> Box<dyn VideoDecoder>;

    /// Opens an encoder instance.
    fn open_encoder(&self) -> Box<dyn VideoEncoder>;

    /// Opens a muxer flushing in writes of roughly `write_size` bytes.
    fn open_muxer(&self, write_size: usize) -> Box<dyn ContainerMuxer>;
}

/// One pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    /// Container file to transcode
    pub source: PathBuf,
    /// Target profile, immutable for the run
    pub profile: TargetProfile,
}

/// Counters for a completed run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunStats {
    /// Bytes read from the source file
    pub source_bytes: u64,
    /// Samples demuxed and decoded
    pub samples: u64,
    /// Frames handed to the render sink
    pub frames_rendered: u64,
    /// Encoded chunks produced
    pub chunks: u64,
    /// Output container bytes
    pub bytes_muxed: u64,
    /// Segments uploaded
    pub segments: u64,
}

/// Terminal signal delivered to the invoker, exactly once per run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineSignal {
    /// The run completed and every segment was uploaded
    Done {
        /// Counters for the completed run
        stats: RunStats,
    },
    /// The run aborted; no further segments will arrive
    Failed {
        /// Human-readable failure reason
        error: String,
    },
}

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Not yet started
    Idle,
    /// Stage chain executing
    Running,
    /// Terminal: success signaled
    Completed,
    /// Terminal: failure signaled
    Failed,
}

/// Handle returned to the invoking context.
///
/// Dropping the handle does not stop the run; call [`RunHandle::cancel`]
/// to abort at the next suspension point.
pub struct RunHandle {
    signal: oneshot::Receiver<PipelineSignal>,
    token: CancellationToken,
}

impl RunHandle {
    /// Requests cancellation of the run.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits for the terminal signal.
    pub async fn wait(self) -> PipelineSignal {
        self.signal.await.unwrap_or_else(|_| PipelineSignal::Failed {
            error: "pipeline task dropped before signaling".to_string(),
        })
    }
}

/// Derives the segment base name from the source path: strip the
/// directory, strip the container extension.
pub fn base_name(source: &Path) -> String {
    source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string())
}

/// Wires demux, decode, encode, preview, package, and upload into one
/// chained run.
///
/// The orchestrator holds no state across runs; every invocation gets
/// fresh capability instances and fresh channels.
#[derive(Clone)]
pub struct Pipeline {
    config: CascadeConfig,
    backend: Arc<dyn MediaBackend>,
    reader: Arc<dyn ContainerReader>,
    transport: Arc<dyn UploadTransport>,
    render_sink: Arc<dyn FrameSink>,
}

impl Pipeline {
    /// Creates a pipeline from its external collaborators.
    pub fn new(
        config: CascadeConfig,
        backend: Arc<dyn MediaBackend>,
        reader: Arc<dyn ContainerReader>,
        transport: Arc<dyn UploadTransport>,
        render_sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            config,
            backend,
            reader,
            transport,
            render_sink,
        }
    }

    /// Starts a run on the background executor and returns immediately.
    ///
    /// This is the invocation boundary: the request crosses into the
    /// executing context, and the terminal signal crosses back.
    pub fn spawn(&self, request: PipelineRequest) -> RunHandle {
        let token = CancellationToken::new();
        let (signal_tx, signal_rx) = oneshot::channel();
        let pipeline = self.clone();
        let run_token = token.clone();

        tokio::spawn(async move {
            let signal = match pipeline.run(request, run_token).await {
                Ok(stats) => PipelineSignal::Done { stats },
                Err(e) => {
                    error!("pipeline run failed: {}", e);
                    PipelineSignal::Failed {
                        error: e.to_string(),
                    }
                }
            };
            // The invoker may have dropped its handle; the run is done
            // either way.
            let _ = signal_tx.send(signal);
        });

        RunHandle {
            signal: signal_rx,
            token,
        }
    }

    /// Executes one run to its terminal state.
    ///
    /// # Errors
    ///
    /// Returns the first real stage failure of the run; see
    /// [`PipelineError`] for the taxonomy.
    pub async fn run(
        &self,
        request: PipelineRequest,
        cancel: CancellationToken,
    ) -> Result<RunStats, PipelineError> {
        let mut state = RunState::Idle;
        let base = base_name(&request.source);
        let label = request.profile.resolution_label();

        transition(&mut state, RunState::Running);
        info!(
            "pipeline run started: {} -> {}-{}-*.{}",
            request.source.display(),
            base,
            label,
            self.config.upload.extension
        );

        let capacity = self.config.tuning.channel_capacity;
        let (byte_tx, byte_rx) = mpsc::channel::<Bytes>(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);
        let (frame_tx, frame_rx) = mpsc::channel(capacity);
        let (chunk_tx, chunk_rx) = mpsc::channel(capacity);
        let (verified_tx, verified_rx) = mpsc::channel(capacity);
        let (write_tx, write_rx) = mpsc::channel(capacity);

        let source_task = tokio::spawn(read_source(
            request.source.clone(),
            self.config.tuning.read_chunk_size,
            byte_tx,
            cancel.clone(),
        ));

        let reader = Arc::clone(&self.reader);
        let demux_cancel = cancel.clone();
        let demux_task = tokio::spawn(async move {
            // Keep a sender clone alive past the failure decision so a
            // demux error cancels the token before downstream stages
            // can observe the closed event channel.
            let guard = event_tx.clone();
            let result = reader.run(byte_rx, event_tx).await.map_err(|e| match e {
                DemuxError::Terminated => PipelineError::Cancelled,
                other => PipelineError::ContainerParse(other),
            });
            if let Err(error) = &result
                && !error.is_cancellation()
            {
                demux_cancel.cancel();
            }
            drop(guard);
            result
        });

        let decode_task = tokio::spawn(
            DecodeStage::new(self.backend.open_decoder()).run(event_rx, frame_tx, cancel.clone()),
        );
        let encode_task = tokio::spawn(
            EncodeStage::new(self.backend.open_encoder(), request.profile.clone()).run(
                frame_rx,
                chunk_tx,
                cancel.clone(),
            ),
        );
        let preview_task = tokio::spawn(
            PreviewStage::new(self.backend.open_decoder(), Arc::clone(&self.render_sink)).run(
                chunk_rx,
                verified_tx,
                cancel.clone(),
            ),
        );
        let package_task = tokio::spawn(
            PackageStage::new(self.backend.open_muxer(self.config.tuning.mux_write_size)).run(
                verified_rx,
                write_tx,
                cancel.clone(),
            ),
        );

        let sink = ChunkedUploadSink::new(
            Arc::clone(&self.transport),
            base,
            label,
            self.config.upload.extension.clone(),
            self.config.upload.segment_threshold,
        );
        let upload_task = tokio::spawn(run_upload(sink, write_rx, cancel.clone()));

        let (source_r, demux_r, decode_r, encode_r, preview_r, package_r, upload_r) = tokio::join!(
            source_task,
            demux_task,
            decode_task,
            encode_task,
            preview_task,
            package_task,
            upload_task
        );

        let mut first_error = None;
        let mut saw_cancellation = false;
        let source_bytes = settle(flatten(source_r), &mut first_error, &mut saw_cancellation);
        settle(flatten(demux_r), &mut first_error, &mut saw_cancellation);
        let decode = settle(flatten(decode_r), &mut first_error, &mut saw_cancellation);
        let encode = settle(flatten(encode_r), &mut first_error, &mut saw_cancellation);
        let preview = settle(flatten(preview_r), &mut first_error, &mut saw_cancellation);
        let package = settle(flatten(package_r), &mut first_error, &mut saw_cancellation);
        let segments = settle(flatten(upload_r), &mut first_error, &mut saw_cancellation);

        if let Some(error) = first_error {
            transition(&mut state, RunState::Failed);
            warn!("pipeline run failed: {}", error);
            return Err(error);
        }
        if saw_cancellation {
            transition(&mut state, RunState::Failed);
            warn!("pipeline run cancelled");
            return Err(PipelineError::Cancelled);
        }

        let stats = RunStats {
            source_bytes: source_bytes.unwrap_or(0),
            samples: decode.map(|s| s.samples_submitted).unwrap_or(0),
            frames_rendered: preview.map(|s| s.frames_rendered).unwrap_or(0),
            chunks: encode.map(|s| s.chunks_emitted).unwrap_or(0),
            bytes_muxed: package.map(|s| s.bytes_emitted).unwrap_or(0),
            segments: segments.unwrap_or(0),
        };
        transition(&mut state, RunState::Completed);
        info!(
            "pipeline run completed: {} samples, {} bytes muxed, {} segments",
            stats.samples, stats.bytes_muxed, stats.segments
        );
        Ok(stats)
    }
}

fn transition(state: &mut RunState, next: RunState) {
    debug!("pipeline state {:?} -> {:?}", state, next);
    *state = next;
}

fn flatten<T>(joined: Result<Result<T, PipelineError>, JoinError>) -> Result<T, PipelineError> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(PipelineError::Internal {
            reason: e.to_string(),
        }),
    }
}

/// Folds one stage result into the run outcome, keeping the first real
/// error and noting cancellation unwinds separately.
fn settle<T>(
    result: Result<T, PipelineError>,
    first_error: &mut Option<PipelineError>,
    saw_cancellation: &mut bool,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) if error.is_cancellation() => {
            *saw_cancellation = true;
            None
        }
        Err(error) => {
            if first_error.is_none() {
                *first_error = Some(error);
            }
            None
        }
    }
}

/// Feeds the source file into the demuxer in bounded reads.
async fn read_source(
    path: PathBuf,
    chunk_size: usize,
    bytes: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
) -> Result<u64, PipelineError> {
    let result = read_source_inner(&path, chunk_size, &bytes, &cancel).await;
    if let Err(error) = &result
        && !error.is_cancellation()
    {
        cancel.cancel();
    }
    result
}

async fn read_source_inner(
    path: &Path,
    chunk_size: usize,
    bytes: &mpsc::Sender<Bytes>,
    cancel: &CancellationToken,
) -> Result<u64, PipelineError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buffer = vec![0u8; chunk_size];
    let mut total = 0u64;

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            read = file.read(&mut buffer) => read?,
        };
        if read == 0 {
            break;
        }
        total += read as u64;
        send_or_cancel(bytes, Bytes::copy_from_slice(&buffer[..read]), cancel).await?;
    }
    debug!("source reader finished: {} bytes", total);
    Ok(total)
}

/// Terminates the chain in the chunked upload sink.
async fn run_upload(
    mut sink: ChunkedUploadSink,
    mut writes: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) -> Result<u64, PipelineError> {
    loop {
        match recv_or_cancel(&mut writes, &cancel).await {
            Ok(Some(write)) => {
                if let Err(error) = sink.write(write).await {
                    cancel.cancel();
                    return Err(error.into());
                }
            }
            Ok(None) => break,
            Err(error) => return Err(error),
        }
    }

    // A closed channel after an abort elsewhere must not flush the
    // remainder as a bogus final segment.
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    match sink.close().await {
        Ok(segments) => Ok(segments),
        Err(error) => {
            cancel.cancel();
            Err(error.into())
        }
    }
}
