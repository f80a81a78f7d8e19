//! The chained stage pipeline.
//!
//! Stages run as independent tasks joined by bounded channels; a
//! downstream stage's pull implicitly suspends the upstream stage's
//! push, which is the only backpressure mechanism in the system. Every
//! channel wait doubles as a cancellation suspension point.
//!
//! Failure protocol: the first stage to fail cancels the shared token
//! while its channel endpoints are still alive, so every other stage
//! observing a closed channel can distinguish a clean end of stream
//! (flush and finish) from an abort (unwind without flushing).

mod decode;
mod encode;
mod orchestrator;
mod package;
mod preview;

pub use decode::{DecodeStage, DecodeStats};
pub use encode::{EncodeStage, EncodeStats};
pub use orchestrator::{
    MediaBackend, Pipeline, PipelineRequest, PipelineSignal, RunHandle, RunState, RunStats,
    base_name,
};
pub use package::{PackageStage, PackageStats};
pub use preview::{FrameSink, NullFrameSink, PreviewStage, PreviewStats};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::PipelineError;

/// Receives the next item unless the run is cancelled first.
///
/// `Ok(None)` means the upstream sender is gone; callers must check the
/// token before treating that as a clean end of stream.
pub(crate) async fn recv_or_cancel<T>(
    rx: &mut mpsc::Receiver<T>,
    cancel: &CancellationToken,
) -> Result<Option<T>, PipelineError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        item = rx.recv() => Ok(item),
    }
}

/// Sends one item downstream unless the run is cancelled first.
///
/// A closed channel maps to `Cancelled`: the downstream stage failed
/// and already carries the real error.
pub(crate) async fn send_or_cancel<T: Send>(
    tx: &mpsc::Sender<T>,
    item: T,
    cancel: &CancellationToken,
) -> Result<(), PipelineError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        sent = tx.send(item) => sent.map_err(|_| PipelineError::Cancelled),
    }
}
