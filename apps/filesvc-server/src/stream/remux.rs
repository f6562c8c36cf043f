//! Live Remux Pipe
//!
//! Runs ffmpeg to repackage a media file as fragmented MP4 on stdout and
//! exposes that output as a byte stream. The child is killed as soon as
//! the stream is dropped, which is what happens when a client disconnects.

use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use axum::body::Bytes;
use futures::Stream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::io::ReaderStream;

use crate::error::{AppError, Result};

/// Media type of the remuxed output
pub const FMP4_CONTENT_TYPE: &str = "video/mp4";

#[derive(Debug, Clone)]
pub struct RemuxPipe {
    ffmpeg_path: String,
    chunk_size: usize,
}

impl RemuxPipe {
    pub fn new(ffmpeg_path: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Fail with `DependencyMissing` unless the tool runs
    pub async fn ensure_available(&self) -> Result<()> {
        let status = Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(AppError::DependencyMissing(format!(
                "{} -version exited with {}",
                self.ffmpeg_path, status
            ))),
            Err(e) => Err(AppError::DependencyMissing(format!(
                "ffmpeg is not available at {}: {}",
                self.ffmpeg_path, e
            ))),
        }
    }

    /// Start remuxing `source` and return its output
    pub async fn spawn(&self, source: &Path) -> Result<RemuxStream> {
        self.ensure_available().await?;

        let is_file = match tokio::fs::metadata(source).await {
            Ok(meta) => meta.is_file(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        if !is_file {
            return Err(AppError::NotFound("Source file not found".to_string()));
        }

        let mut child = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error", "-re", "-i"])
            .arg(source)
            .args([
                "-c",
                "copy",
                "-f",
                "mp4",
                "-movflags",
                "frag_keyframe+empty_moov+default_base_moof",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Internal(format!("Failed to spawn ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Internal("ffmpeg stdout was not captured".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let source = source.display().to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(source = %source, "ffmpeg: {}", line);
                }
            });
        }

        tracing::info!(source = %source.display(), pid = ?child.id(), "Remux started");

        Ok(RemuxStream {
            reader: ReaderStream::with_capacity(stdout, self.chunk_size),
            child,
        })
    }
}

/// ffmpeg's stdout as a stream of byte chunks; owns the child process
pub struct RemuxStream {
    reader: ReaderStream<ChildStdout>,
    child: Child,
}

impl RemuxStream {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

impl Stream for RemuxStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().reader).poll_next(cx)
    }
}

impl Drop for RemuxStream {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            tracing::debug!(pid = ?self.child.id(), "Remux stream dropped, stopping ffmpeg");
            if let Err(e) = self.child.start_kill() {
                tracing::warn!("Failed to stop ffmpeg: {}", e);
            }
        }
    }
}
