//! The capture worker: copies one live rendition to disk until the stream
//! ends or the worker is cancelled.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use stream_probe::{Rendition, RenditionReader};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{EventBroadcaster, LooperEvent};
use crate::remux::Remuxer;
use crate::util::sanitize_filename;

/// Read chunk size for the copy loop.
const CHUNK_SIZE: usize = 64 * 1024;

/// Result of one finished capture attempt.
#[derive(Debug)]
pub struct CaptureOutcome {
    pub name: String,
    pub bytes_total: u64,
    /// Final file: the remuxed container when remuxing succeeded, otherwise
    /// the raw capture.
    pub output: PathBuf,
    pub ended_at: DateTime<Utc>,
    pub cancelled: bool,
}

/// Owns the full lifecycle of one capture attempt for one channel.
///
/// The worker copies bytes from the opened rendition to a uniquely named
/// sink, reports progress once per second, and finalizes the file when the
/// copy loop exits. Read-side errors end the capture exactly like a clean
/// end of stream. Cancellation is cooperative, checked every chunk.
pub struct CaptureWorker {
    name: String,
    rendition: Rendition,
    sink_path: PathBuf,
    cancel: CancellationToken,
    events: EventBroadcaster,
    remuxer: Arc<dyn Remuxer>,
    started_at: DateTime<Utc>,
    bytes_total: u64,
    bytes_since_report: u64,
}

impl CaptureWorker {
    /// Create a worker for a freshly probed channel.
    ///
    /// The sink name combines the channel name with the capture start time,
    /// so repeated captures of the same channel never collide.
    pub fn new(
        name: impl Into<String>,
        rendition: Rendition,
        output_dir: PathBuf,
        cancel: CancellationToken,
        events: EventBroadcaster,
        remuxer: Arc<dyn Remuxer>,
    ) -> Self {
        let name = name.into();
        let started_at = Utc::now();
        let sink_path = output_dir.join(format!(
            "{}_{}.ts",
            sanitize_filename(&name),
            started_at.format("%Y%m%d_%H%M%S")
        ));

        Self {
            name,
            rendition,
            sink_path,
            cancel,
            events,
            remuxer,
            started_at,
            bytes_total: 0,
            bytes_since_report: 0,
        }
    }

    /// Where the raw capture is written.
    pub fn sink_path(&self) -> &PathBuf {
        &self.sink_path
    }

    /// Run the copy loop to completion, then finalize.
    pub async fn run(mut self, mut reader: RenditionReader) -> CaptureOutcome {
        info!(
            channel = %self.name,
            rendition = %self.rendition.label,
            sink = %self.sink_path.display(),
            "capture started"
        );

        let file = match File::create(&self.sink_path).await {
            Ok(f) => f,
            Err(e) => {
                error!(channel = %self.name, error = %e, "failed to create capture sink");
                return self.outcome(false);
            }
        };
        let mut sink = BufWriter::new(file);

        let started = Instant::now();
        let mut progress = tokio::time::interval_at(
            tokio::time::Instant::now() + Duration::from_secs(1),
            Duration::from_secs(1),
        );
        progress.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!(channel = %self.name, "capture cancelled");
                    cancelled = true;
                    break;
                }
                _ = progress.tick() => {
                    self.events.publish(LooperEvent::CaptureProgress {
                        name: self.name.clone(),
                        elapsed_secs: started.elapsed().as_secs(),
                        bytes_total: self.bytes_total,
                        bytes_per_sec: self.bytes_since_report,
                    });
                    self.bytes_since_report = 0;
                }
                read = reader.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Err(e) = sink.write_all(&buf[..n]).await {
                            // A dead sink ends the capture; bytes already on
                            // disk are finalized below.
                            error!(channel = %self.name, error = %e, "capture sink write failed");
                            break;
                        }
                        self.bytes_total += n as u64;
                        self.bytes_since_report += n as u64;
                    }
                    // Read errors are not distinguishable from the stream
                    // ending mid-segment; treat them the same.
                    Err(e) => {
                        debug!(channel = %self.name, error = %e, "read ended the capture");
                        break;
                    }
                },
            }
        }

        if let Err(e) = sink.shutdown().await {
            warn!(channel = %self.name, error = %e, "failed to flush capture sink");
        }
        drop(sink);

        self.finalize(cancelled).await
    }

    /// Remux the finished raw file unless it is audio-only or empty.
    ///
    /// A partial capture from a cancellation is finalized like any other. On
    /// remux failure the raw file is preserved.
    async fn finalize(self, cancelled: bool) -> CaptureOutcome {
        if self.bytes_total == 0 || self.rendition.audio_only {
            return self.outcome(cancelled);
        }

        let container = self.sink_path.with_extension("mp4");
        match self.remuxer.remux(&self.sink_path, &container).await {
            Ok(()) => {
                if let Err(e) = tokio::fs::remove_file(&self.sink_path).await {
                    warn!(
                        channel = %self.name,
                        raw = %self.sink_path.display(),
                        error = %e,
                        "failed to remove raw capture"
                    );
                }
                let mut outcome = self.outcome(cancelled);
                outcome.output = container;
                outcome
            }
            Err(e) => {
                warn!(
                    channel = %self.name,
                    raw = %self.sink_path.display(),
                    error = %e,
                    "remux failed, keeping raw capture"
                );
                self.outcome(cancelled)
            }
        }
    }

    fn outcome(&self, cancelled: bool) -> CaptureOutcome {
        CaptureOutcome {
            name: self.name.clone(),
            bytes_total: self.bytes_total,
            output: self.sink_path.clone(),
            ended_at: Utc::now(),
            cancelled,
        }
    }

    /// When the capture started, for elapsed-time display.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
