//! Post-capture remuxing.
//!
//! A finished raw capture is converted to a playback-friendly container with
//! a fast stream copy; nothing is re-encoded. Remuxing is best-effort: a
//! failure is logged by the caller and the raw file is kept.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors from a remux attempt.
#[derive(Debug, Error)]
pub enum RemuxError {
    #[error("failed to spawn remux process: {0}")]
    Io(#[from] std::io::Error),

    #[error("remux exited with {status}: {stderr}")]
    Failed {
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Converts a raw capture into a standard container.
#[async_trait]
pub trait Remuxer: Send + Sync {
    async fn remux(&self, raw: &Path, output: &Path) -> Result<(), RemuxError>;
}

/// Remuxer backed by an external `ffmpeg` binary.
///
/// Performs a container-only copy (`-c:v copy -c:a copy`), which is fast and
/// lossless. A non-zero exit is returned as an error; the caller decides what
/// to do with the raw file (it is never deleted here).
pub struct FfmpegRemuxer {
    program: String,
}

impl FfmpegRemuxer {
    pub fn new() -> Self {
        Self::with_program("ffmpeg")
    }

    /// Use a specific ffmpeg binary path.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfmpegRemuxer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    async fn remux(&self, raw: &Path, output: &Path) -> Result<(), RemuxError> {
        debug!(raw = %raw.display(), output = %output.display(), "remuxing capture");

        let result = Command::new(&self.program)
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-i")
            .arg(raw)
            .arg("-c:v")
            .arg("copy")
            .arg("-c:a")
            .arg("copy")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if result.status.success() {
            Ok(())
        } else {
            Err(RemuxError::Failed {
                status: result.status,
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            })
        }
    }
}

/// A remuxer that records invocations and succeeds without touching disk.
///
/// Used by tests and dry runs.
#[derive(Default)]
pub struct NullRemuxer {
    calls: parking_lot::Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl NullRemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `(raw, output)` pairs remuxed so far.
    pub fn calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Remuxer for NullRemuxer {
    async fn remux(&self, raw: &Path, output: &Path) -> Result<(), RemuxError> {
        self.calls
            .lock()
            .push((raw.to_path_buf(), output.to_path_buf()));
        Ok(())
    }
}
