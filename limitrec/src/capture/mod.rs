//! External capture process supervision.
//!
//! A capture is one run of the capture tool (yt-dlp by default) against a
//! manifest or page URL, authenticated with a per-session Netscape cookie
//! file. The supervisor spawns it, collects a bounded stderr tail, waits for
//! or terminates it, and moves the finished file to its final directory.

mod output;

pub use output::{OutputTail, RecordReader};

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, ChildStderr};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::utils::fs;

/// yt-dlp format selector used when none is given.
pub const DEFAULT_FORMAT: &str = "b";
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);
const STDERR_TAIL_LINES: usize = 40;
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error(
        "Capture tool exited with {}: {stderr}",
        .code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}"))
    )]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Capture finished without output at {0}")]
    MissingOutput(PathBuf),

    #[error("IO error while {op} ({path}): {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CaptureError {
    fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    fn from_app(err: crate::Error, op: &'static str, path: &Path) -> Self {
        match err {
            crate::Error::IoPath { op, path, source } => Self::Io { op, path, source },
            other => Self::io(op, path, io::Error::other(other.to_string())),
        }
    }
}

/// A running capture process.
#[derive(Debug)]
pub struct CaptureHandle {
    child: Child,
    pid: Option<u32>,
    output_path: PathBuf,
    cookie_file: PathBuf,
    stderr: Option<JoinHandle<OutputTail>>,
    started_at: Instant,
}

impl CaptureHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn cookie_file(&self) -> &Path {
        &self.cookie_file
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Exit information of a finished capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutcome {
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    /// Last lines written to stderr.
    pub stderr: String,
    pub elapsed: Duration,
}

impl CaptureOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone)]
pub struct CaptureProcessSupervisor {
    binary: String,
    format: String,
    stop_grace: Duration,
}

impl CaptureProcessSupervisor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            format: DEFAULT_FORMAT.to_string(),
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    /// Set the format selector passed as `--format`.
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Command line passed to the capture tool.
    pub fn build_args(&self, input: &str, cookie_file: &Path, output_path: &Path) -> Vec<OsString> {
        vec![
            input.into(),
            "--output".into(),
            output_path.into(),
            "--cookies".into(),
            cookie_file.into(),
            "--no-live-from-start".into(),
            "--format".into(),
            self.format.clone().into(),
            "--no-part".into(),
            "--no-mtime".into(),
        ]
    }

    /// Spawn the capture tool.
    ///
    /// The cookie file is removed if the process cannot be started.
    /// Once started, [`Self::await_completion`] or [`Self::stop`] removes it.
    pub async fn launch(
        &self,
        input: &str,
        cookie_file: &Path,
        output_path: &Path,
    ) -> Result<CaptureHandle, CaptureError> {
        if let Err(e) = fs::ensure_parent_dir_with_op("creating capture output directory", output_path).await {
            fs::remove_file_best_effort(cookie_file, "cookie file").await;
            return Err(CaptureError::from_app(e, "creating capture output directory", output_path));
        }

        let mut cmd = process_utils::tokio_command(&self.binary);
        cmd.args(self.build_args(input, cookie_file, output_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                fs::remove_file_best_effort(cookie_file, "cookie file").await;
                return Err(CaptureError::Spawn {
                    binary: self.binary.clone(),
                    source,
                });
            }
        };

        let pid = child.id();
        let stderr = child.stderr.take().map(spawn_stderr_collector);
        info!(binary = %self.binary, pid = ?pid, output = %output_path.display(), "Capture started");

        Ok(CaptureHandle {
            child,
            pid,
            output_path: output_path.to_path_buf(),
            cookie_file: cookie_file.to_path_buf(),
            stderr,
            started_at: Instant::now(),
        })
    }

    /// Wait for the capture to exit on its own.
    ///
    /// Cancel safe: dropping the future leaves the process running.
    pub async fn await_completion(&self, handle: &mut CaptureHandle) -> Result<CaptureOutcome, CaptureError> {
        let status = match handle.child.wait().await {
            Ok(status) => status,
            Err(e) => {
                fs::remove_file_best_effort(&handle.cookie_file, "cookie file").await;
                return Err(CaptureError::io("waiting for capture", &handle.output_path, e));
            }
        };
        Ok(self.collect(handle, status.code()).await)
    }

    /// Terminate the capture, escalating to a kill after the grace period.
    pub async fn stop(&self, handle: &mut CaptureHandle) -> Result<CaptureOutcome, CaptureError> {
        info!(pid = ?handle.pid, "Stopping capture");
        let termination = match process_utils::terminate_gracefully(&mut handle.child, self.stop_grace).await {
            Ok(termination) => termination,
            Err(e) => {
                fs::remove_file_best_effort(&handle.cookie_file, "cookie file").await;
                return Err(CaptureError::io("terminating capture", &handle.output_path, e));
            }
        };
        debug!(?termination, "Capture terminated");
        Ok(self.collect(handle, termination.status().code()).await)
    }

    /// Move a successful capture into `final_dir` and return its final path.
    pub async fn finalize(
        &self,
        outcome: &CaptureOutcome,
        temp_path: &Path,
        final_dir: &Path,
    ) -> Result<PathBuf, CaptureError> {
        if !outcome.success() {
            return Err(CaptureError::NonZeroExit {
                code: outcome.exit_code,
                stderr: outcome.stderr.clone(),
            });
        }

        let exists = tokio::fs::try_exists(temp_path)
            .await
            .map_err(|e| CaptureError::io("checking capture output", temp_path, e))?;
        let Some(file_name) = temp_path.file_name().filter(|_| exists) else {
            return Err(CaptureError::MissingOutput(temp_path.to_path_buf()));
        };

        let destination = final_dir.join(file_name);
        fs::move_file(temp_path, &destination)
            .await
            .map_err(|e| CaptureError::from_app(e, "moving recording", temp_path))?;

        let size = tokio::fs::metadata(&destination).await.map(|m| m.len()).unwrap_or(0);
        info!(path = %destination.display(), size, "Recording saved");
        Ok(destination)
    }

    async fn collect(&self, handle: &mut CaptureHandle, exit_code: Option<i32>) -> CaptureOutcome {
        let tail = match handle.stderr.take() {
            Some(task) => drain_stderr(task).await,
            None => OutputTail::new(STDERR_TAIL_LINES),
        };
        fs::remove_file_best_effort(&handle.cookie_file, "cookie file").await;

        let outcome = CaptureOutcome {
            exit_code,
            stderr: tail.joined(),
            elapsed: handle.elapsed(),
        };
        debug!(
            exit_code = ?outcome.exit_code,
            elapsed_secs = outcome.elapsed.as_secs(),
            "Capture exited"
        );
        outcome
    }
}

fn spawn_stderr_collector(stderr: ChildStderr) -> JoinHandle<OutputTail> {
    tokio::spawn(async move {
        let mut reader = RecordReader::new(stderr);
        let mut tail = OutputTail::new(STDERR_TAIL_LINES);
        loop {
            match reader.next_record().await {
                Ok(Some(line)) => {
                    if line.starts_with("ERROR") || line.starts_with("WARNING") {
                        warn!(target: "limitrec::capture::tool", "{line}");
                    } else {
                        debug!(target: "limitrec::capture::tool", "{line}");
                    }
                    tail.push(line);
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "Capture stderr read failed");
                    break;
                }
            }
        }
        tail
    })
}

/// Grandchildren may keep the pipe open after the tool exits, so the drain is bounded.
async fn drain_stderr(mut task: JoinHandle<OutputTail>) -> OutputTail {
    match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(tail)) => tail,
        Ok(Err(e)) => {
            debug!(error = %e, "Capture stderr collector failed");
            OutputTail::new(STDERR_TAIL_LINES)
        }
        Err(_) => {
            task.abort();
            OutputTail::new(STDERR_TAIL_LINES)
        }
    }
}
