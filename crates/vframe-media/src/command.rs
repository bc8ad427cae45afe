//! External process runner and FFmpeg command builder.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path (or image sequence pattern)
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add an input argument (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add an output argument (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Set seek position (before input).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Limit the amount of input read.
    pub fn duration(self, seconds: f64) -> Self {
        self.input_arg("-t").input_arg(format!("{:.3}", seconds))
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Captured output of a finished process.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    /// Stdout decoded as UTF-8 (lossy).
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }
}

/// Runner for external commands with timeout and cancellation.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    /// Program to execute
    program: PathBuf,
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
    /// Timeout
    timeout: Option<Duration>,
}

impl CommandRunner {
    /// Create a new runner for `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cancel_rx: None,
            timeout: None,
        }
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Run the program to completion and capture its output.
    ///
    /// The child is killed on timeout, on cancellation, and if the returned
    /// future is dropped.
    pub async fn run<I, S>(&self, args: I) -> MediaResult<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        if let Some(ref rx) = self.cancel_rx {
            if *rx.borrow() {
                return Err(MediaError::Cancelled);
            }
        }

        let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        debug!(
            "Running {} {}",
            self.program.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("stderr not captured"))?;

        // Drain both pipes while waiting so a chatty child never blocks on a full pipe
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await.map(|_| buf)
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).await.map(|_| buf)
        });

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = wait_for_cancel(self.cancel_rx.clone()) => {
                info!("{} cancelled, killing process", self.program_name());
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", self.program_name(), e);
                }
                return Err(MediaError::Cancelled);
            }
            _ = sleep_or_forever(self.timeout) => {
                let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
                warn!("{} timed out after {} seconds, killing process", self.program_name(), secs);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", self.program_name(), e);
                }
                return Err(MediaError::Timeout(secs));
            }
        };

        let stdout = stdout_task
            .await
            .map_err(|e| MediaError::internal(e.to_string()))??;
        let stderr = stderr_task
            .await
            .map_err(|e| MediaError::internal(e.to_string()))??;
        let stderr = String::from_utf8_lossy(&stderr).trim().to_string();

        if status.success() {
            Ok(CommandOutput { stdout, stderr })
        } else {
            Err(MediaError::command_failed(
                self.program_name(),
                status.code(),
                stderr,
            ))
        }
    }
}

/// Resolve once the signal reads `true`. Never resolves without a receiver
/// or after the sender is gone.
pub async fn wait_for_cancel(cancel_rx: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = cancel_rx else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

async fn sleep_or_forever(timeout: Option<Duration>) {
    match timeout {
        Some(t) => tokio::time::sleep(t).await,
        None => std::future::pending().await,
    }
}

/// Locate an executable by name or path and make sure it is a non-empty file.
pub fn resolve_binary(name: impl AsRef<OsStr>) -> MediaResult<PathBuf> {
    let name = name.as_ref();
    let path = which::which(name)
        .map_err(|_| MediaError::BinaryNotFound(name.to_string_lossy().to_string()))?;

    let metadata = std::fs::metadata(&path)?;
    if !metadata.is_file() {
        return Err(MediaError::BinaryNotFound(path.to_string_lossy().to_string()));
    }
    if metadata.len() == 0 {
        return Err(MediaError::BinaryEmpty(path));
    }

    Ok(path)
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg(configured: Option<&str>) -> MediaResult<PathBuf> {
    resolve_binary(configured.unwrap_or("ffmpeg"))
}

/// Check if FFprobe is available.
pub fn check_ffprobe(configured: Option<&str>) -> MediaResult<PathBuf> {
    resolve_binary(configured.unwrap_or("ffprobe"))
}
